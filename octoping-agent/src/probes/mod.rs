//! Probe implementations
//!
//! A probe checks one target and returns a [`Sample`]. Scheduling,
//! timeouts and aggregation are handled by [`crate::prober::Prober`].

pub mod dns;
pub mod icmp;

use crate::statistics::StatisticsKind;
use async_trait::async_trait;
use octoping_common::Target;
use std::time::Duration;

pub use dns::DnsProbe;
pub use icmp::IcmpProbe;

#[async_trait]
pub trait Probe: Send + Sync {
    /// Probe name, used as the `octoping_probe` label
    fn name(&self) -> &str;

    /// The aggregate this probe's samples are recorded into
    fn kind(&self) -> StatisticsKind;

    async fn check(&self, target: &Target) -> anyhow::Result<Sample>;
}

/// Result of one check against one target
#[derive(Debug, Clone, PartialEq)]
pub enum Sample {
    Echo(EchoStats),
    Lookup { addresses: usize },
}

/// Echo round of one target
#[derive(Debug, Clone, PartialEq)]
pub struct EchoStats {
    pub sent: u16,
    pub received: u16,
    pub worst: Duration,
    pub best: Duration,
    pub mean: Duration,
}

impl EchoStats {
    /// Summarise the round trip times of the replies to `sent` requests.
    pub fn from_rtts(sent: u16, rtts: &[Duration]) -> Self {
        let received = rtts.len().min(sent as usize) as u16;
        let worst = rtts.iter().copied().max().unwrap_or_default();
        let best = rtts.iter().copied().min().unwrap_or_default();
        let mean = if rtts.is_empty() {
            Duration::ZERO
        } else {
            rtts.iter().sum::<Duration>() / rtts.len() as u32
        };

        Self {
            sent,
            received,
            worst,
            best,
            mean,
        }
    }

    /// Fraction of requests without reply. Nothing sent counts as total
    /// loss.
    pub fn loss(&self) -> f64 {
        if self.sent == 0 {
            return 1.0;
        }
        f64::from(self.sent - self.received) / f64::from(self.sent)
    }
}
