//! ICMP echo probe
//!
//! One check is an echo round of `count` requests, `ping_interval` apart,
//! bounded by a single per-target deadline of `timeout`. Each request may
//! wait `timeout / count` for its reply, so one lost reply costs one share
//! of the budget and the round still reports a partial loss fraction.

use super::{EchoStats, Probe, Sample};
use crate::statistics::StatisticsKind;
use anyhow::{anyhow, ensure, Context, Result};
use async_trait::async_trait;
use log::{debug, warn};
use octoping_common::{defaults, probe, Target};
use std::net::IpAddr;
use std::sync::atomic::{AtomicU16, Ordering};
use std::time::Duration;
use surge_ping::{Client, Config, PingIdentifier, PingSequence, Pinger, ICMP};
use tokio::time::{timeout_at, Instant};

const PAYLOAD: [u8; 56] = [0; 56];

/// Extra time the prober grants a check on top of its echo deadline, so
/// the round can return its partial result before the unit is cut off.
pub const DEADLINE_GRACE: Duration = Duration::from_millis(500);

/// Settings of one echo round
#[derive(Debug, Clone, PartialEq)]
pub struct EchoOptions {
    /// Requests sent per target and cycle
    pub count: u16,
    /// Pause between two requests
    pub ping_interval: Duration,
    /// Deadline of the whole round for one target
    pub timeout: Duration,
    pub report_threshold: f64,
}

impl Default for EchoOptions {
    fn default() -> Self {
        Self {
            count: defaults::ICMP_COUNT,
            ping_interval: defaults::ICMP_PING_INTERVAL,
            timeout: defaults::TIMEOUT,
            report_threshold: defaults::ICMP_PACKET_LOSS_THRESHOLD,
        }
    }
}

impl EchoOptions {
    pub fn validate(&self) -> Result<()> {
        ensure!(self.count > 0, "count must be greater than 0");
        ensure!(
            !self.ping_interval.is_zero(),
            "ping_interval must be greater than 0"
        );
        ensure!(!self.timeout.is_zero(), "timeout must be greater than 0");
        Ok(())
    }

    /// How long a single request waits for its reply
    pub fn echo_wait(&self) -> Duration {
        self.timeout / u32::from(self.count.max(1))
    }

    /// Budget for the prober's unit of work: the echo deadline plus grace
    pub fn unit_timeout(&self) -> Duration {
        self.timeout + DEADLINE_GRACE
    }
}

/// Sends one echo request and waits for its reply.
#[async_trait]
pub trait EchoSender: Send {
    async fn echo(&mut self, seq: u16) -> Result<Duration>;
}

#[async_trait]
impl EchoSender for Pinger {
    async fn echo(&mut self, seq: u16) -> Result<Duration> {
        let (_, rtt) = self.ping(PingSequence(seq), &PAYLOAD).await?;
        Ok(rtt)
    }
}

/// Runs `count` echoes through `sender`. Each one waits at most `wait`, and
/// nothing is sent after `deadline`. Requests cut off by the deadline count
/// as lost.
pub async fn echo_round(
    sender: &mut dyn EchoSender,
    count: u16,
    ping_interval: Duration,
    wait: Duration,
    deadline: Instant,
) -> EchoStats {
    let mut rtts = Vec::with_capacity(count as usize);
    let mut ticker = (!ping_interval.is_zero()).then(|| tokio::time::interval(ping_interval));

    for seq in 0..count {
        if let Some(ticker) = ticker.as_mut() {
            if timeout_at(deadline, ticker.tick()).await.is_err() {
                break;
            }
        }

        let until = (Instant::now() + wait).min(deadline);
        match timeout_at(until, sender.echo(seq)).await {
            Ok(Ok(rtt)) => rtts.push(rtt),
            Ok(Err(e)) => debug!("Echo {} failed: {}", seq, e),
            Err(_) => debug!("No reply to echo {} within {:?}", seq, wait),
        }

        if Instant::now() >= deadline {
            break;
        }
    }

    EchoStats::from_rtts(count, &rtts)
}

/// Pings each target `count` times over raw ICMP sockets.
pub struct IcmpProbe {
    v4: Client,
    v6: Option<Client>,
    options: EchoOptions,
    ident: AtomicU16,
}

impl IcmpProbe {
    /// Opens the ICMP sockets. Failing to open the IPv4 socket is fatal; a
    /// missing IPv6 socket only fails IPv6 targets.
    pub fn new(options: EchoOptions) -> Result<Self> {
        options.validate().context("Invalid echo options")?;

        let v4 = Client::new(&Config::default())
            .context("Failed to open ICMP socket (requires CAP_NET_RAW)")?;

        let v6 = match Client::new(&Config::builder().kind(ICMP::V6).build()) {
            Ok(client) => Some(client),
            Err(e) => {
                warn!("ICMPv6 socket unavailable, IPv6 targets will fail: {}", e);
                None
            }
        };

        Ok(Self {
            v4,
            v6,
            options,
            ident: AtomicU16::new(std::process::id() as u16),
        })
    }

    pub fn options(&self) -> &EchoOptions {
        &self.options
    }

    fn client(&self, ip: IpAddr) -> Result<&Client> {
        match ip {
            IpAddr::V4(_) => Ok(&self.v4),
            IpAddr::V6(_) => self
                .v6
                .as_ref()
                .ok_or_else(|| anyhow!("ICMPv6 socket unavailable for {}", ip)),
        }
    }
}

#[async_trait]
impl Probe for IcmpProbe {
    fn name(&self) -> &str {
        probe::ICMP
    }

    fn kind(&self) -> StatisticsKind {
        StatisticsKind::Echo {
            report_threshold: self.options.report_threshold,
        }
    }

    async fn check(&self, target: &Target) -> Result<Sample> {
        let deadline = Instant::now() + self.options.timeout;
        let ip = timeout_at(deadline, resolve(target))
            .await
            .map_err(|_| anyhow!("Timed out resolving {}", target))??;
        let client = self.client(ip)?;

        let wait = self.options.echo_wait();
        let ident = PingIdentifier(self.ident.fetch_add(1, Ordering::Relaxed));
        let mut pinger = client.pinger(ip, ident).await;
        pinger.timeout(wait);

        let echo = echo_round(
            &mut pinger,
            self.options.count,
            self.options.ping_interval,
            wait,
            deadline,
        )
        .await;

        Ok(Sample::Echo(echo))
    }
}

/// Parse an IP literal, or resolve a hostname to its first address.
pub async fn resolve(target: &Target) -> Result<IpAddr> {
    if let Ok(ip) = target.as_str().parse::<IpAddr>() {
        return Ok(ip);
    }

    tokio::net::lookup_host((target.as_str(), 0))
        .await
        .with_context(|| format!("Failed to resolve {}", target))?
        .next()
        .map(|addr| addr.ip())
        .ok_or_else(|| anyhow!("No address for {}", target))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::statistics::{Scope, Statistics};
    use std::collections::HashSet;

    /// Answers after 1ms, except for the sequence numbers it drops
    struct Dropping {
        dropped: HashSet<u16>,
        sent: Vec<u16>,
    }

    impl Dropping {
        fn new(dropped: &[u16]) -> Self {
            Self {
                dropped: dropped.iter().copied().collect(),
                sent: Vec::new(),
            }
        }
    }

    #[async_trait]
    impl EchoSender for Dropping {
        async fn echo(&mut self, seq: u16) -> Result<Duration> {
            self.sent.push(seq);
            if self.dropped.contains(&seq) {
                std::future::pending::<()>().await;
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
            Ok(Duration::from_millis(1))
        }
    }

    #[tokio::test]
    async fn test_resolve_literals() {
        assert_eq!(
            resolve(&Target::from("10.0.0.1")).await.unwrap(),
            "10.0.0.1".parse::<IpAddr>().unwrap()
        );
        assert_eq!(
            resolve(&Target::from("::1")).await.unwrap(),
            "::1".parse::<IpAddr>().unwrap()
        );
    }

    #[test]
    fn test_default_options() {
        let options = EchoOptions::default();
        assert_eq!(options.count, 5);
        assert_eq!(options.ping_interval, Duration::from_millis(100));
        assert_eq!(options.timeout, Duration::from_secs(5));
        assert_eq!(options.report_threshold, 0.05);
        assert_eq!(options.echo_wait(), Duration::from_secs(1));
        assert!(options.unit_timeout() > options.timeout);
        assert!(options.validate().is_ok());
    }

    #[test]
    fn test_zero_values_are_rejected() {
        let zero_interval = EchoOptions {
            ping_interval: Duration::ZERO,
            ..EchoOptions::default()
        };
        assert!(zero_interval.validate().is_err());

        let zero_count = EchoOptions {
            count: 0,
            ..EchoOptions::default()
        };
        assert!(zero_count.validate().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_one_dropped_reply_is_partial_loss() {
        let options = EchoOptions::default();
        let mut sender = Dropping::new(&[0]);
        let started = Instant::now();

        let echo = echo_round(
            &mut sender,
            options.count,
            options.ping_interval,
            options.echo_wait(),
            started + options.timeout,
        )
        .await;

        assert_eq!(sender.sent, vec![0, 1, 2, 3, 4]);
        assert_eq!(echo.received, 4);
        assert_eq!(echo.loss(), 0.2);
        assert!(started.elapsed() < options.unit_timeout());

        // The target still contributes an RTT sample
        let stats = Statistics::new(
            Scope::new("icmp", "node-a"),
            StatisticsKind::Echo {
                report_threshold: options.report_threshold,
            },
        );
        stats.record(&Sample::Echo(echo));
        let samples = stats.snapshot();
        assert_eq!(samples.packet_loss, vec![0.2]);
        assert_eq!(samples.mean_rtt.len(), 1);
        assert_eq!(samples.reports, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_ends_round_with_unsent_requests_lost() {
        let mut sender = Dropping::new(&[0, 1, 2, 3, 4]);
        let started = Instant::now();
        let deadline = started + Duration::from_millis(250);

        let echo = echo_round(
            &mut sender,
            5,
            Duration::from_millis(100),
            Duration::from_millis(200),
            deadline,
        )
        .await;

        assert_eq!(echo.received, 0);
        assert_eq!(echo.loss(), 1.0);
        assert!(sender.sent.len() < 5);
        assert!(Instant::now() <= deadline + Duration::from_millis(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_clean_round() {
        let mut sender = Dropping::new(&[]);
        let echo = echo_round(
            &mut sender,
            3,
            Duration::from_millis(100),
            Duration::from_secs(1),
            Instant::now() + Duration::from_secs(5),
        )
        .await;

        assert_eq!(echo.received, 3);
        assert_eq!(echo.loss(), 0.0);
        assert_eq!(echo.mean, Duration::from_millis(1));
    }
}
