use anyhow::Result;
use octoping_agent::{Monitor, Scope};
use serde::Serialize;
use std::sync::{Arc, PoisonError, RwLock};

/// One value written by a probe cycle
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Series {
    pub probe: String,
    pub node: String,
    pub name: &'static str,
    pub value: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Metrics {
    pub series: Vec<Series>,
}

impl Metrics {
    fn upsert(&mut self, name: &'static str, scope: &Scope, value: f64) {
        let existing = self
            .series
            .iter_mut()
            .find(|s| s.name == name && s.probe == scope.probe && s.node == scope.node);

        match existing {
            Some(series) => series.value = value,
            None => self.series.push(Series {
                probe: scope.probe.clone(),
                node: scope.node.clone(),
                name,
                value,
            }),
        }
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.series.iter().find(|s| s.name == name).map(|s| s.value)
    }
}

/// In-memory [`Monitor`] recording the last value of every series, in
/// write order.
pub struct MetricsCollector {
    metrics: Arc<RwLock<Metrics>>,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            metrics: Arc::new(RwLock::new(Metrics::default())),
        }
    }

    pub fn get_metrics(&self) -> Metrics {
        self.metrics
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn put(&self, name: &'static str, scope: &Scope, value: f64) -> Result<()> {
        self.metrics
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .upsert(name, scope, value);
        Ok(())
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl Monitor for MetricsCollector {
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_last_write_wins() {
        let collector = MetricsCollector::new();
        let scope = Scope::new("icmp", "node-a");

        collector.set_nodes_total(&scope, 3.0).unwrap();
        collector.set_rtt_max(&scope, 250.0).unwrap();
        collector.set_nodes_total(&scope, 2.0).unwrap();

        let metrics = collector.get_metrics();
        assert_eq!(metrics.series.len(), 2);
        assert_eq!(metrics.get("nodes_total"), Some(2.0));
        assert_eq!(metrics.series[0].name, "nodes_total");
    }

    #[test]
    fn test_health_is_binary() {
        let collector = MetricsCollector::default();
        collector
            .set_health(&Scope::new("dns", "node-a"), false)
            .unwrap();

        assert_eq!(collector.get_metrics().get("health"), Some(0.0));
    }
}
