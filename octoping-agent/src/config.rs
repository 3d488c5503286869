//! Configuration directory
//!
//! The directory is written by the control plane and contains:
//! - `nodes`: target addresses
//! - `probes.<type>.enabled`: `true` or `false`, missing means disabled
//! - `probes.<type>.properties`: `key: value` (or `key=value`) lines
//!
//! Properties are validated once into [`IcmpConfig`] and [`DnsConfig`].

use crate::probes::dns::{parse_server, LookupOptions};
use crate::probes::icmp::EchoOptions;
use crate::prober::ProberSettings;
use octoping_common::{defaults, probe};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

pub const NODES_FILE: &str = "nodes";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid value {value:?} for {key}: {reason}")]
    Invalid {
        key: String,
        value: String,
        reason: String,
    },
}

impl ConfigError {
    fn invalid(key: &str, value: &str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key: key.to_string(),
            value: value.to_string(),
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ConfigError>;

pub fn nodes_path(base: &Path) -> PathBuf {
    base.join(NODES_FILE)
}

fn enabled_path(base: &Path, name: &str) -> PathBuf {
    base.join(format!("probes.{}.enabled", name))
}

fn properties_path(base: &Path, name: &str) -> PathBuf {
    base.join(format!("probes.{}.properties", name))
}

/// Read `path`, mapping a missing file to `None`.
fn read_optional(path: &Path) -> Result<Option<String>> {
    match std::fs::read_to_string(path) {
        Ok(content) => Ok(Some(content)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(source) => Err(ConfigError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}

pub fn probe_enabled(base: &Path, name: &str) -> Result<bool> {
    let path = enabled_path(base, name);
    let Some(content) = read_optional(&path)? else {
        return Ok(false);
    };

    let value = content.trim();
    match value.to_ascii_lowercase().as_str() {
        "true" => Ok(true),
        "false" | "" => Ok(false),
        _ => Err(ConfigError::invalid(
            &format!("probes.{}.enabled", name),
            value,
            "expected true or false",
        )),
    }
}

pub fn probe_properties(base: &Path, name: &str) -> Result<Properties> {
    let path = properties_path(base, name);
    Ok(read_optional(&path)?
        .map(|content| Properties::parse(&content))
        .unwrap_or_default())
}

/// Key/value pairs of a properties file
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Properties(BTreeMap<String, String>);

impl Properties {
    /// Parse `key: value` or `key=value` lines. Blank, `#` comment and
    /// malformed lines are skipped. Later keys override earlier ones.
    pub fn parse(content: &str) -> Self {
        let map = content
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .filter_map(|line| {
                let (key, value) = line.split_once([':', '='])?;
                let key = key.trim();
                if key.is_empty() {
                    return None;
                }
                Some((key.to_string(), value.trim().to_string()))
            })
            .collect();
        Self(map)
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn duration(&self, key: &str, default: Duration) -> Result<Duration> {
        match self.get(key) {
            None | Some("") => Ok(default),
            Some(value) => {
                parse_duration(value).map_err(|reason| ConfigError::invalid(key, value, reason))
            }
        }
    }

    pub fn parse_or<T>(&self, key: &str, default: T) -> Result<T>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match self.get(key) {
            None | Some("") => Ok(default),
            Some(value) => value
                .parse()
                .map_err(|e: T::Err| ConfigError::invalid(key, value, e.to_string())),
        }
    }

    /// Comma separated list, blanks dropped
    pub fn list(&self, key: &str) -> Vec<String> {
        self.get(key)
            .map(|value| {
                value
                    .split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Parse `<n>ms`, `<n>s`, `<n>m` or `<n>h`.
pub fn parse_duration(s: &str) -> std::result::Result<Duration, String> {
    let s = s.trim();
    let (num, unit_ms) = if let Some(num) = s.strip_suffix("ms") {
        (num, 1u64)
    } else if let Some(num) = s.strip_suffix('s') {
        (num, 1_000)
    } else if let Some(num) = s.strip_suffix('m') {
        (num, 60_000)
    } else if let Some(num) = s.strip_suffix('h') {
        (num, 3_600_000)
    } else {
        return Err("expected a duration like 500ms, 30s, 5m or 1h".to_string());
    };

    let value: u64 = num
        .trim()
        .parse()
        .map_err(|_| format!("invalid duration number {:?}", num))?;
    value
        .checked_mul(unit_ms)
        .map(Duration::from_millis)
        .ok_or_else(|| "duration overflows".to_string())
}

fn positive(key: &str, value: Duration) -> Result<Duration> {
    if value.is_zero() {
        return Err(ConfigError::invalid(key, "0", "must be greater than 0"));
    }
    Ok(value)
}

fn non_zero(key: &str, value: usize) -> Result<usize> {
    if value == 0 {
        return Err(ConfigError::invalid(key, "0", "must be greater than 0"));
    }
    Ok(value)
}

#[derive(Debug, Clone, PartialEq)]
pub struct IcmpConfig {
    pub interval: Duration,
    pub timeout: Duration,
    pub count: u16,
    pub ping_interval: Duration,
    pub report_threshold: f64,
    pub concurrency: usize,
    pub exclude_nodes: Vec<String>,
    pub additional_targets: Vec<String>,
}

impl Default for IcmpConfig {
    fn default() -> Self {
        Self {
            interval: defaults::INTERVAL,
            timeout: defaults::TIMEOUT,
            count: defaults::ICMP_COUNT,
            ping_interval: defaults::ICMP_PING_INTERVAL,
            report_threshold: defaults::ICMP_PACKET_LOSS_THRESHOLD,
            concurrency: defaults::ICMP_CONCURRENCY,
            exclude_nodes: Vec::new(),
            additional_targets: Vec::new(),
        }
    }
}

impl IcmpConfig {
    pub fn from_properties(props: &Properties) -> Result<Self> {
        let count: u16 = props.parse_or("count", defaults::ICMP_COUNT)?;
        if count == 0 {
            return Err(ConfigError::invalid("count", "0", "must be greater than 0"));
        }

        let report_threshold: f64 = props.parse_or(
            "node_packet_loss_threshold",
            defaults::ICMP_PACKET_LOSS_THRESHOLD,
        )?;
        if !(0.0..=1.0).contains(&report_threshold) {
            return Err(ConfigError::invalid(
                "node_packet_loss_threshold",
                &report_threshold.to_string(),
                "must be between 0 and 1",
            ));
        }

        Ok(Self {
            interval: positive("interval", props.duration("interval", defaults::INTERVAL)?)?,
            timeout: positive("timeout", props.duration("timeout", defaults::TIMEOUT)?)?,
            count,
            ping_interval: positive(
                "ping_interval",
                props.duration("ping_interval", defaults::ICMP_PING_INTERVAL)?,
            )?,
            report_threshold,
            concurrency: non_zero(
                "concurrency",
                props.parse_or("concurrency", defaults::ICMP_CONCURRENCY)?,
            )?,
            exclude_nodes: props.list("exclude_nodes"),
            additional_targets: props.list("additional_targets"),
        })
    }

    /// The prober cuts a check off only after the echo deadline has passed,
    /// so a round with lost replies still reports its partial result.
    pub fn prober_settings(&self) -> ProberSettings {
        ProberSettings {
            interval: self.interval,
            timeout: self.echo_options().unit_timeout(),
            concurrency: self.concurrency,
        }
    }

    pub fn echo_options(&self) -> EchoOptions {
        EchoOptions {
            count: self.count,
            ping_interval: self.ping_interval,
            timeout: self.timeout,
            report_threshold: self.report_threshold,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DnsConfig {
    pub interval: Duration,
    pub timeout: Duration,
    pub server: Option<SocketAddr>,
    pub names: Vec<String>,
    pub concurrency: usize,
}

impl Default for DnsConfig {
    fn default() -> Self {
        Self {
            interval: defaults::INTERVAL,
            timeout: defaults::TIMEOUT,
            server: None,
            names: Vec::new(),
            concurrency: defaults::DNS_CONCURRENCY,
        }
    }
}

impl DnsConfig {
    pub fn from_properties(props: &Properties) -> Result<Self> {
        let server = match props.get("server") {
            None | Some("") => None,
            Some(value) => Some(parse_server(value).ok_or_else(|| {
                ConfigError::invalid("server", value, "expected an IP address with optional port")
            })?),
        };

        Ok(Self {
            interval: positive("interval", props.duration("interval", defaults::INTERVAL)?)?,
            timeout: positive("timeout", props.duration("timeout", defaults::TIMEOUT)?)?,
            server,
            names: props.list("names"),
            concurrency: non_zero(
                "concurrency",
                props.parse_or("concurrency", defaults::DNS_CONCURRENCY)?,
            )?,
        })
    }

    pub fn prober_settings(&self) -> ProberSettings {
        ProberSettings {
            interval: self.interval,
            timeout: self.timeout,
            concurrency: self.concurrency,
        }
    }

    pub fn lookup_options(&self) -> LookupOptions {
        LookupOptions {
            server: self.server,
            timeout: self.timeout,
        }
    }
}

/// Validated settings of every enabled probe
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProbeConfigs {
    pub icmp: Option<IcmpConfig>,
    pub dns: Option<DnsConfig>,
}

impl ProbeConfigs {
    pub fn load(base: &Path) -> Result<Self> {
        let icmp = if probe_enabled(base, probe::ICMP)? {
            Some(IcmpConfig::from_properties(&probe_properties(base, probe::ICMP)?)?)
        } else {
            None
        };

        let dns = if probe_enabled(base, probe::DNS)? {
            Some(DnsConfig::from_properties(&probe_properties(base, probe::DNS)?)?)
        } else {
            None
        };

        Ok(Self { icmp, dns })
    }
}
