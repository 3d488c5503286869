//! Shared types between the octoping agent and the CLI
//!
//! This crate defines:
//! - [`Target`] and [`TargetList`], the addresses probed in one cycle
//! - [`stats`], the summary functions used to project samples into metrics
//! - Defaults shared by the probes and their configuration

use std::fmt;

pub mod stats;

/// An address (IP literal or hostname) to probe.
///
/// A target has no identity beyond its string value and is re-derived
/// from the configured sources every cycle.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Target(String);

impl Target {
    pub fn new(addr: impl Into<String>) -> Self {
        Self(addr.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Target {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Target {
    fn from(addr: &str) -> Self {
        Self(addr.to_string())
    }
}

impl From<String> for Target {
    fn from(addr: String) -> Self {
        Self(addr)
    }
}

impl PartialEq<str> for Target {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

impl PartialEq<&str> for Target {
    fn eq(&self, other: &&str) -> bool {
        self.0 == *other
    }
}

/// Ordered targets for one cycle.
pub type TargetList = Vec<Target>;

/// Probe names as they appear in configuration files and metric labels
pub mod probe {
    pub const ICMP: &str = "icmp";
    pub const DNS: &str = "dns";
}

/// Defaults applied when a probe property is not configured
pub mod defaults {
    use std::time::Duration;

    pub const INTERVAL: Duration = Duration::from_secs(1);
    pub const TIMEOUT: Duration = Duration::from_secs(5);

    pub const ICMP_COUNT: u16 = 5;
    pub const ICMP_PING_INTERVAL: Duration = Duration::from_millis(100);
    pub const ICMP_CONCURRENCY: usize = 10;
    pub const ICMP_PACKET_LOSS_THRESHOLD: f64 = 0.05;

    pub const DNS_CONCURRENCY: usize = 100;
    pub const DNS_PORT: u16 = 53;
}
