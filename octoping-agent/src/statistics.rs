//! Per-cycle statistics aggregate and its metric projection

use crate::monitor::Monitor;
use crate::probes::Sample;
use anyhow::Result;
use octoping_common::stats;
use std::sync::mpsc::Sender;
use std::sync::{Mutex, MutexGuard, PoisonError};

pub use crate::monitor::Scope;

/// Selects which samples an aggregate accumulates and which metrics it
/// emits.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StatisticsKind {
    /// Round trip and loss statistics. A target counts as reporting when
    /// its loss is strictly below `report_threshold`.
    Echo { report_threshold: f64 },
    /// Success/error counters for name lookups
    Lookup,
}

/// Raw samples of one cycle
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Samples {
    /// Worst RTT per responding target, in microseconds
    pub max_rtt: Vec<f64>,
    /// Best RTT per responding target, in microseconds
    pub min_rtt: Vec<f64>,
    /// Mean RTT per responding target, in microseconds
    pub mean_rtt: Vec<f64>,
    /// Loss fraction per target, including failed ones
    pub packet_loss: Vec<f64>,
    pub total: usize,
    pub reports: usize,
    pub success: usize,
    pub errors: usize,
}

impl Samples {
    pub fn healthy(&self, kind: StatisticsKind) -> bool {
        match kind {
            StatisticsKind::Echo { .. } => self.reports == self.total,
            StatisticsKind::Lookup => self.errors == 0,
        }
    }
}

/// Thread-safe accumulator shared by the workers of one cycle.
#[derive(Debug)]
pub struct Statistics {
    scope: Scope,
    kind: StatisticsKind,
    samples: Mutex<Samples>,
}

impl Statistics {
    pub fn new(scope: Scope, kind: StatisticsKind) -> Self {
        Self {
            scope,
            kind,
            samples: Mutex::new(Samples::default()),
        }
    }

    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    pub fn kind(&self) -> StatisticsKind {
        self.kind
    }

    pub fn reset(&self) {
        *self.lock() = Samples::default();
    }

    pub fn set_total(&self, total: usize) {
        self.lock().total = total;
    }

    /// Adds the result of one successful check.
    pub fn record(&self, sample: &Sample) {
        let mut samples = self.lock();
        match sample {
            Sample::Echo(echo) => {
                let loss = echo.loss();
                if let StatisticsKind::Echo { report_threshold } = self.kind {
                    if loss < report_threshold {
                        samples.reports += 1;
                    }
                }
                if echo.received > 0 {
                    samples.max_rtt.push(micros(echo.worst));
                    samples.min_rtt.push(micros(echo.best));
                    samples.mean_rtt.push(micros(echo.mean));
                }
                samples.packet_loss.push(loss);
            }
            Sample::Lookup { addresses } => {
                if *addresses > 0 {
                    samples.success += 1;
                } else {
                    samples.errors += 1;
                }
            }
        }
    }

    /// Records a target whose check failed or timed out.
    pub fn record_failure(&self) {
        let mut samples = self.lock();
        match self.kind {
            StatisticsKind::Echo { .. } => samples.packet_loss.push(1.0),
            StatisticsKind::Lookup => samples.errors += 1,
        }
    }

    pub fn snapshot(&self) -> Samples {
        self.lock().clone()
    }

    fn lock(&self) -> MutexGuard<'_, Samples> {
        self.samples.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn micros(d: std::time::Duration) -> f64 {
    d.as_secs_f64() * 1_000_000.0
}

/// One exported projection of an aggregate
#[derive(Debug, Clone, PartialEq)]
pub enum Metric {
    RttMax { scope: Scope, values: Vec<f64> },
    RttMin { scope: Scope, values: Vec<f64> },
    RttMean { scope: Scope, values: Vec<f64> },
    /// Deviation across the per-target mean RTTs
    RttStddev { scope: Scope, values: Vec<f64> },
    /// Written as mean, min, max and total
    PacketLoss { scope: Scope, values: Vec<f64> },
    NodesTotal { scope: Scope, count: usize },
    NodesReports { scope: Scope, count: usize },
    Health { scope: Scope, healthy: bool },
    DnsTotal { scope: Scope, count: usize },
    DnsSuccess { scope: Scope, count: usize },
    DnsError { scope: Scope, count: usize },
}

impl Metric {
    pub fn name(&self) -> &'static str {
        match self {
            Metric::RttMax { .. } => "rtt_max",
            Metric::RttMin { .. } => "rtt_min",
            Metric::RttMean { .. } => "rtt_mean",
            Metric::RttStddev { .. } => "rtt_stddev",
            Metric::PacketLoss { .. } => "packet_loss",
            Metric::NodesTotal { .. } => "nodes_total",
            Metric::NodesReports { .. } => "nodes_reports",
            Metric::Health { .. } => "health",
            Metric::DnsTotal { .. } => "dns_total",
            Metric::DnsSuccess { .. } => "dns_success",
            Metric::DnsError { .. } => "dns_error",
        }
    }
}

/// Computes the scalar(s) of `metric` and calls the matching setter.
pub fn write(monitor: &dyn Monitor, metric: &Metric) -> Result<()> {
    match metric {
        Metric::RttMax { scope, values } => monitor.set_rtt_max(scope, stats::max(values)),
        Metric::RttMin { scope, values } => monitor.set_rtt_min(scope, stats::min(values)),
        Metric::RttMean { scope, values } => monitor.set_rtt_mean(scope, stats::mean(values)),
        Metric::RttStddev { scope, values } => {
            monitor.set_rtt_stddev(scope, stats::stddev(values))
        }
        Metric::PacketLoss { scope, values } => {
            monitor.set_packet_loss_mean(scope, stats::mean(values))?;
            monitor.set_packet_loss_min(scope, stats::min(values))?;
            monitor.set_packet_loss_max(scope, stats::max(values))?;
            monitor.set_packet_loss_total(scope, stats::sum(values))
        }
        Metric::NodesTotal { scope, count } => monitor.set_nodes_total(scope, *count as f64),
        Metric::NodesReports { scope, count } => {
            monitor.set_nodes_reports(scope, *count as f64)
        }
        Metric::Health { scope, healthy } => monitor.set_health(scope, *healthy),
        Metric::DnsTotal { scope, count } => monitor.set_dns_total(scope, *count as f64),
        Metric::DnsSuccess { scope, count } => monitor.set_dns_success(scope, *count as f64),
        Metric::DnsError { scope, count } => monitor.set_dns_error(scope, *count as f64),
    }
}

/// Enumerates the metrics of an aggregate.
pub trait Collector {
    fn collect(&self, ch: &Sender<Metric>);
}

impl Collector for Statistics {
    fn collect(&self, ch: &Sender<Metric>) {
        let samples = self.snapshot();
        let scope = &self.scope;

        let metrics = match self.kind {
            StatisticsKind::Echo { .. } => vec![
                Metric::RttMax {
                    scope: scope.clone(),
                    values: samples.max_rtt.clone(),
                },
                Metric::RttMin {
                    scope: scope.clone(),
                    values: samples.min_rtt.clone(),
                },
                Metric::RttStddev {
                    scope: scope.clone(),
                    values: samples.mean_rtt.clone(),
                },
                Metric::RttMean {
                    scope: scope.clone(),
                    values: samples.mean_rtt.clone(),
                },
                Metric::PacketLoss {
                    scope: scope.clone(),
                    values: samples.packet_loss.clone(),
                },
                Metric::NodesTotal {
                    scope: scope.clone(),
                    count: samples.total,
                },
                Metric::NodesReports {
                    scope: scope.clone(),
                    count: samples.reports,
                },
            ],
            StatisticsKind::Lookup => vec![
                Metric::DnsTotal {
                    scope: scope.clone(),
                    count: samples.total,
                },
                Metric::DnsSuccess {
                    scope: scope.clone(),
                    count: samples.success,
                },
                Metric::DnsError {
                    scope: scope.clone(),
                    count: samples.errors,
                },
            ],
        };

        let health = Metric::Health {
            scope: scope.clone(),
            healthy: samples.healthy(self.kind),
        };

        for metric in metrics.into_iter().chain(std::iter::once(health)) {
            // Receiver gone means nobody is flushing this cycle
            if ch.send(metric).is_err() {
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probes::EchoStats;
    use std::sync::mpsc;
    use std::time::Duration;

    fn echo() -> Statistics {
        Statistics::new(
            Scope::new("icmp", "node-a"),
            StatisticsKind::Echo {
                report_threshold: 0.05,
            },
        )
    }

    fn collect(stats: &Statistics) -> Vec<Metric> {
        let (tx, rx) = mpsc::channel();
        stats.collect(&tx);
        drop(tx);
        rx.into_iter().collect()
    }

    #[test]
    fn test_reachable_and_unreachable_target() {
        let stats = echo();
        stats.reset();
        stats.set_total(2);
        stats.record(&Sample::Echo(EchoStats::from_rtts(
            5,
            &[Duration::from_millis(1); 5],
        )));
        stats.record_failure();

        let samples = stats.snapshot();
        assert_eq!(samples.total, 2);
        assert_eq!(samples.reports, 1);
        assert_eq!(samples.packet_loss, vec![0.0, 1.0]);
        assert_eq!(samples.mean_rtt, vec![1000.0]);
        assert!(!samples.healthy(stats.kind()));
    }

    #[test]
    fn test_loss_at_threshold_is_not_reporting() {
        let stats = Statistics::new(
            Scope::new("icmp", "node-a"),
            StatisticsKind::Echo {
                report_threshold: 0.2,
            },
        );
        // 4 of 5 replies is exactly 20% loss
        stats.record(&Sample::Echo(EchoStats::from_rtts(
            5,
            &[Duration::from_millis(2); 4],
        )));

        let samples = stats.snapshot();
        assert_eq!(samples.reports, 0);
        assert_eq!(samples.max_rtt.len(), 1);
    }

    #[test]
    fn test_total_loss_contributes_no_rtt() {
        let stats = echo();
        stats.record(&Sample::Echo(EchoStats::from_rtts(5, &[])));

        let samples = stats.snapshot();
        assert!(samples.mean_rtt.is_empty());
        assert_eq!(samples.packet_loss, vec![1.0]);
    }

    #[test]
    fn test_lookup_outcomes() {
        let stats = Statistics::new(Scope::new("dns", "node-a"), StatisticsKind::Lookup);
        stats.set_total(3);
        stats.record(&Sample::Lookup { addresses: 2 });
        stats.record(&Sample::Lookup { addresses: 0 });
        stats.record_failure();

        let samples = stats.snapshot();
        assert_eq!(samples.success, 1);
        assert_eq!(samples.errors, 2);
        assert!(samples.packet_loss.is_empty());

        let metrics = collect(&stats);
        assert!(metrics.iter().all(|m| !matches!(m, Metric::RttMax { .. })));
        assert!(metrics.contains(&Metric::DnsError {
            scope: Scope::new("dns", "node-a"),
            count: 2
        }));
    }

    #[test]
    fn test_reset_clears_everything() {
        let stats = echo();
        stats.set_total(1);
        stats.record_failure();
        stats.reset();

        assert_eq!(stats.snapshot(), Samples::default());
        for metric in collect(&stats) {
            match metric {
                Metric::RttMax { values, .. }
                | Metric::RttMin { values, .. }
                | Metric::RttMean { values, .. }
                | Metric::RttStddev { values, .. }
                | Metric::PacketLoss { values, .. } => assert!(values.is_empty()),
                Metric::NodesTotal { count, .. } | Metric::NodesReports { count, .. } => {
                    assert_eq!(count, 0)
                }
                Metric::Health { healthy, .. } => assert!(healthy),
                other => panic!("unexpected metric {:?}", other),
            }
        }
    }

    #[test]
    fn test_collect_enumerates_every_echo_metric() {
        let names: Vec<_> = collect(&echo()).iter().map(Metric::name).collect();
        assert_eq!(
            names,
            vec![
                "rtt_max",
                "rtt_min",
                "rtt_stddev",
                "rtt_mean",
                "packet_loss",
                "nodes_total",
                "nodes_reports",
                "health"
            ]
        );
    }
}
