#![allow(dead_code)]

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use octoping_agent::probes::{EchoStats, Probe, Sample};
use octoping_agent::{Monitor, Scope, StatisticsKind};
use octoping_common::Target;
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Monitor keeping the last value per metric and scope
#[derive(Default)]
pub struct RecordingMonitor {
    values: Mutex<BTreeMap<(String, String, String), f64>>,
    writes: AtomicUsize,
}

impl RecordingMonitor {
    pub fn get(&self, metric: &str, scope: &Scope) -> Option<f64> {
        self.values
            .lock()
            .unwrap()
            .get(&(metric.to_string(), scope.probe.clone(), scope.node.clone()))
            .copied()
    }

    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    fn put(&self, metric: &str, scope: &Scope, value: f64) -> Result<()> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.values.lock().unwrap().insert(
            (metric.to_string(), scope.probe.clone(), scope.node.clone()),
            value,
        );
        Ok(())
    }
}

impl Monitor for RecordingMonitor {
    fn set_health(&self, scope: &Scope, healthy: bool) -> Result<()> {
        self.put("health", scope, if healthy { 1.0 } else { 0.0 })
    }
    fn set_nodes_total(&self, scope: &Scope, value: f64) -> Result<()> {
        self.put("nodes_total", scope, value)
    }
    fn set_nodes_reports(&self, scope: &Scope, value: f64) -> Result<()> {
        self.put("nodes_reports", scope, value)
    }
    fn set_rtt_max(&self, scope: &Scope, value: f64) -> Result<()> {
        self.put("rtt_max", scope, value)
    }
    fn set_rtt_min(&self, scope: &Scope, value: f64) -> Result<()> {
        self.put("rtt_min", scope, value)
    }
    fn set_rtt_mean(&self, scope: &Scope, value: f64) -> Result<()> {
        self.put("rtt_mean", scope, value)
    }
    fn set_rtt_stddev(&self, scope: &Scope, value: f64) -> Result<()> {
        self.put("rtt_stddev", scope, value)
    }
    fn set_packet_loss_min(&self, scope: &Scope, value: f64) -> Result<()> {
        self.put("packet_loss_min", scope, value)
    }
    fn set_packet_loss_max(&self, scope: &Scope, value: f64) -> Result<()> {
        self.put("packet_loss_max", scope, value)
    }
    fn set_packet_loss_mean(&self, scope: &Scope, value: f64) -> Result<()> {
        self.put("packet_loss_mean", scope, value)
    }
    fn set_packet_loss_total(&self, scope: &Scope, value: f64) -> Result<()> {
        self.put("packet_loss_total", scope, value)
    }
    fn set_dns_total(&self, scope: &Scope, value: f64) -> Result<()> {
        self.put("dns_total", scope, value)
    }
    fn set_dns_success(&self, scope: &Scope, value: f64) -> Result<()> {
        self.put("dns_success", scope, value)
    }
    fn set_dns_error(&self, scope: &Scope, value: f64) -> Result<()> {
        self.put("dns_error", scope, value)
    }
}

/// Echo probe answering every target except the unreachable ones
pub struct FakeEcho {
    pub unreachable: HashSet<String>,
    pub rtt: Duration,
    pub delay: Duration,
    pub in_flight: AtomicUsize,
    pub peak: AtomicUsize,
    pub calls: AtomicUsize,
}

impl FakeEcho {
    pub fn new<I: IntoIterator<Item = &'static str>>(unreachable: I) -> Self {
        Self {
            unreachable: unreachable.into_iter().map(String::from).collect(),
            rtt: Duration::from_millis(1),
            delay: Duration::ZERO,
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

#[async_trait]
impl Probe for FakeEcho {
    fn name(&self) -> &str {
        "icmp"
    }

    fn kind(&self) -> StatisticsKind {
        StatisticsKind::Echo {
            report_threshold: 0.05,
        }
    }

    async fn check(&self, target: &Target) -> Result<Sample> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);

        tokio::time::sleep(self.delay).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.unreachable.contains(target.as_str()) {
            return Err(anyhow!("host unreachable"));
        }
        Ok(Sample::Echo(EchoStats::from_rtts(5, &[self.rtt; 5])))
    }
}

/// Lookup probe resolving every name except the unknown ones
pub struct FakeLookup {
    pub unknown: HashSet<String>,
}

impl FakeLookup {
    pub fn new<I: IntoIterator<Item = &'static str>>(unknown: I) -> Self {
        Self {
            unknown: unknown.into_iter().map(String::from).collect(),
        }
    }
}

#[async_trait]
impl Probe for FakeLookup {
    fn name(&self) -> &str {
        "dns"
    }

    fn kind(&self) -> StatisticsKind {
        StatisticsKind::Lookup
    }

    async fn check(&self, target: &Target) -> Result<Sample> {
        if self.unknown.contains(target.as_str()) {
            return Err(anyhow!("NXDOMAIN"));
        }
        Ok(Sample::Lookup { addresses: 1 })
    }
}

pub fn recording() -> Arc<RecordingMonitor> {
    Arc::new(RecordingMonitor::default())
}
