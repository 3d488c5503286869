//! Metric sink
//!
//! [`Monitor`] exposes one setter per exported statistic. Probe loops never
//! call the setters directly; they hand their aggregate to [`gather`],
//! which walks its [`Metric`]s and dispatches through
//! [`crate::statistics::write`].

use crate::statistics::{write, Collector, Metric};
use anyhow::Result;
use log::warn;
use prometheus::{GaugeVec, Opts, Registry};
use std::sync::mpsc;

pub const METRIC_PREFIX: &str = "octoping_probe";
pub const NODE_LABEL: &str = "octoping_node";
pub const PROBE_LABEL: &str = "octoping_probe";

/// Label set of one aggregate: the probe that produced it and the node it
/// ran on.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Scope {
    pub probe: String,
    pub node: String,
}

impl Scope {
    pub fn new(probe: impl Into<String>, node: impl Into<String>) -> Self {
        Self {
            probe: probe.into(),
            node: node.into(),
        }
    }
}

/// Sink for probe statistics. Setting the same label combination twice
/// overwrites the previous value.
pub trait Monitor: Send + Sync {
    fn set_health(&self, scope: &Scope, healthy: bool) -> Result<()>;

    fn set_nodes_total(&self, scope: &Scope, value: f64) -> Result<()>;
    fn set_nodes_reports(&self, scope: &Scope, value: f64) -> Result<()>;

    fn set_rtt_max(&self, scope: &Scope, value: f64) -> Result<()>;
    fn set_rtt_min(&self, scope: &Scope, value: f64) -> Result<()>;
    fn set_rtt_mean(&self, scope: &Scope, value: f64) -> Result<()>;
    fn set_rtt_stddev(&self, scope: &Scope, value: f64) -> Result<()>;

    fn set_packet_loss_min(&self, scope: &Scope, value: f64) -> Result<()>;
    fn set_packet_loss_max(&self, scope: &Scope, value: f64) -> Result<()>;
    fn set_packet_loss_mean(&self, scope: &Scope, value: f64) -> Result<()>;
    fn set_packet_loss_total(&self, scope: &Scope, value: f64) -> Result<()>;

    // DNS series carry the node label only
    fn set_dns_total(&self, scope: &Scope, value: f64) -> Result<()>;
    fn set_dns_success(&self, scope: &Scope, value: f64) -> Result<()>;
    fn set_dns_error(&self, scope: &Scope, value: f64) -> Result<()>;
}

/// Flush every metric of `collector` into `monitor`.
///
/// A failing setter is logged and does not stop the remaining writes.
pub fn gather(monitor: &dyn Monitor, collector: &dyn Collector) {
    let (tx, rx) = mpsc::channel::<Metric>();
    collector.collect(&tx);
    drop(tx);

    for metric in rx {
        if let Err(e) = write(monitor, &metric) {
            warn!("Failed to write metric {}: {:#}", metric.name(), e);
        }
    }
}

/// [`Monitor`] backed by a Prometheus registry owned by this instance.
#[derive(Clone)]
pub struct PrometheusMonitor {
    registry: Registry,
    health: GaugeVec,
    nodes_total: GaugeVec,
    nodes_reports: GaugeVec,
    rtt_max: GaugeVec,
    rtt_min: GaugeVec,
    rtt_mean: GaugeVec,
    rtt_stddev: GaugeVec,
    packet_loss_min: GaugeVec,
    packet_loss_max: GaugeVec,
    packet_loss_mean: GaugeVec,
    packet_loss_total: GaugeVec,
    dns_total: GaugeVec,
    dns_success: GaugeVec,
    dns_error: GaugeVec,
}

impl PrometheusMonitor {
    /// Creates a fresh registry and registers every probe gauge with it.
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        #[cfg(target_os = "linux")]
        registry.register(Box::new(
            prometheus::process_collector::ProcessCollector::for_self(),
        ))?;

        let probe_labels = &[NODE_LABEL, PROBE_LABEL];
        let node_labels = &[NODE_LABEL];

        Ok(Self {
            health: gauge(&registry, "health", "Health of the probe (1 healthy, 0 unhealthy)", probe_labels)?,
            nodes_total: gauge(&registry, "nodes_total", "Number of targets probed in the last cycle", probe_labels)?,
            nodes_reports: gauge(&registry, "nodes_reports", "Number of targets below the packet loss threshold", probe_labels)?,
            rtt_max: gauge(&registry, "rtt_max", "Maximum round trip time in microseconds", probe_labels)?,
            rtt_min: gauge(&registry, "rtt_min", "Minimum round trip time in microseconds", probe_labels)?,
            rtt_mean: gauge(&registry, "rtt_mean", "Mean round trip time in microseconds", probe_labels)?,
            rtt_stddev: gauge(&registry, "rtt_stddev", "Standard deviation of mean round trip times", probe_labels)?,
            packet_loss_min: gauge(&registry, "packet_loss_min", "Minimum packet loss fraction", probe_labels)?,
            packet_loss_max: gauge(&registry, "packet_loss_max", "Maximum packet loss fraction", probe_labels)?,
            packet_loss_mean: gauge(&registry, "packet_loss_mean", "Mean packet loss fraction", probe_labels)?,
            packet_loss_total: gauge(&registry, "packet_loss_total", "Sum of packet loss fractions", probe_labels)?,
            dns_total: gauge(&registry, "dns_total", "Number of names resolved in the last cycle", node_labels)?,
            dns_success: gauge(&registry, "dns_success", "Number of successful lookups", node_labels)?,
            dns_error: gauge(&registry, "dns_error", "Number of failed lookups", node_labels)?,
            registry,
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Renders the registry in the Prometheus text exposition format.
    pub fn encode(&self) -> Result<String> {
        let encoder = prometheus::TextEncoder::new();
        Ok(encoder.encode_to_string(&self.registry.gather())?)
    }

    fn set(vec: &GaugeVec, scope: &Scope, value: f64) -> Result<()> {
        vec.get_metric_with_label_values(&[scope.node.as_str(), scope.probe.as_str()])?
            .set(value);
        Ok(())
    }

    fn set_node(vec: &GaugeVec, scope: &Scope, value: f64) -> Result<()> {
        vec.get_metric_with_label_values(&[scope.node.as_str()])?
            .set(value);
        Ok(())
    }
}

fn gauge(registry: &Registry, name: &str, help: &str, labels: &[&str]) -> Result<GaugeVec> {
    let vec = GaugeVec::new(
        Opts::new(format!("{}_{}", METRIC_PREFIX, name), help),
        labels,
    )?;
    registry.register(Box::new(vec.clone()))?;
    Ok(vec)
}

impl Monitor for PrometheusMonitor {
    fn set_health(&self, scope: &Scope, healthy: bool) -> Result<()> {
        Self::set(&self.health, scope, if healthy { 1.0 } else { 0.0 })
    }

    fn set_nodes_total(&self, scope: &Scope, value: f64) -> Result<()> {
        Self::set(&self.nodes_total, scope, value)
    }

    fn set_nodes_reports(&self, scope: &Scope, value: f64) -> Result<()> {
        Self::set(&self.nodes_reports, scope, value)
    }

    fn set_rtt_max(&self, scope: &Scope, value: f64) -> Result<()> {
        Self::set(&self.rtt_max, scope, value)
    }

    fn set_rtt_min(&self, scope: &Scope, value: f64) -> Result<()> {
        Self::set(&self.rtt_min, scope, value)
    }

    fn set_rtt_mean(&self, scope: &Scope, value: f64) -> Result<()> {
        Self::set(&self.rtt_mean, scope, value)
    }

    fn set_rtt_stddev(&self, scope: &Scope, value: f64) -> Result<()> {
        Self::set(&self.rtt_stddev, scope, value)
    }

    fn set_packet_loss_min(&self, scope: &Scope, value: f64) -> Result<()> {
        Self::set(&self.packet_loss_min, scope, value)
    }

    fn set_packet_loss_max(&self, scope: &Scope, value: f64) -> Result<()> {
        Self::set(&self.packet_loss_max, scope, value)
    }

    fn set_packet_loss_mean(&self, scope: &Scope, value: f64) -> Result<()> {
        Self::set(&self.packet_loss_mean, scope, value)
    }

    fn set_packet_loss_total(&self, scope: &Scope, value: f64) -> Result<()> {
        Self::set(&self.packet_loss_total, scope, value)
    }

    fn set_dns_total(&self, scope: &Scope, value: f64) -> Result<()> {
        Self::set_node(&self.dns_total, scope, value)
    }

    fn set_dns_success(&self, scope: &Scope, value: f64) -> Result<()> {
        Self::set_node(&self.dns_success, scope, value)
    }

    fn set_dns_error(&self, scope: &Scope, value: f64) -> Result<()> {
        Self::set_node(&self.dns_error, scope, value)
    }
}
