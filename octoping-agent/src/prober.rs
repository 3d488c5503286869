//! Probe loop
//!
//! One [`Prober`] drives one probe. Each cycle reloads the targets, resets
//! the aggregate, runs the probe against every target with bounded
//! concurrency, and flushes the aggregate to the monitor once all workers
//! have joined. The ticker is reset after the flush, so the effective
//! period is the interval plus the cycle time.

use crate::monitor::{self, Monitor, Scope};
use crate::probes::Probe;
use crate::server::{Listener, Ready, Runner};
use crate::statistics::Statistics;
use crate::targets::TargetLoader;
use anyhow::{ensure, Context, Result};
use async_trait::async_trait;
use log::{debug, info, warn};
use octoping_common::defaults;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, PartialEq)]
pub struct ProberSettings {
    /// Pause between the end of one cycle and the start of the next
    pub interval: Duration,
    /// Upper bound for one check against one target
    pub timeout: Duration,
    /// Maximum number of checks in flight
    pub concurrency: usize,
}

impl Default for ProberSettings {
    fn default() -> Self {
        Self {
            interval: defaults::INTERVAL,
            timeout: defaults::TIMEOUT,
            concurrency: defaults::ICMP_CONCURRENCY,
        }
    }
}

impl ProberSettings {
    fn validate(&self) -> Result<()> {
        ensure!(!self.interval.is_zero(), "interval must be greater than 0");
        ensure!(!self.timeout.is_zero(), "timeout must be greater than 0");
        ensure!(self.concurrency > 0, "concurrency must be greater than 0");
        Ok(())
    }
}

/// Outcome of one cycle
#[derive(Debug, Clone, PartialEq)]
pub struct CycleReport {
    pub targets: usize,
    pub failures: usize,
    pub elapsed: Duration,
    /// Set when the token fired mid-cycle; the aggregate was not flushed.
    pub cancelled: bool,
}

enum Outcome {
    Recorded,
    Failed,
    Cancelled,
}

pub struct Prober {
    probe: Arc<dyn Probe>,
    loader: TargetLoader,
    settings: ProberSettings,
    stats: Arc<Statistics>,
    monitor: Arc<dyn Monitor>,
}

impl Prober {
    pub fn new(
        probe: Arc<dyn Probe>,
        loader: TargetLoader,
        settings: ProberSettings,
        node: impl Into<String>,
        monitor: Arc<dyn Monitor>,
    ) -> Result<Self> {
        settings
            .validate()
            .with_context(|| format!("Invalid {} prober settings", probe.name()))?;

        let stats = Arc::new(Statistics::new(
            Scope::new(probe.name(), node),
            probe.kind(),
        ));

        Ok(Self {
            probe,
            loader,
            settings,
            stats,
            monitor,
        })
    }

    pub fn name(&self) -> &str {
        self.probe.name()
    }

    pub fn settings(&self) -> &ProberSettings {
        &self.settings
    }

    /// The aggregate of the most recent cycle
    pub fn statistics(&self) -> &Statistics {
        &self.stats
    }

    /// Run cycles until `token` is cancelled. Only a target load failure
    /// ends the loop with an error.
    pub async fn run(&self, token: CancellationToken) -> Result<()> {
        let mut ticker = tokio::time::interval(self.settings.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = token.cancelled() => return Ok(()),
                _ = ticker.tick() => {}
            }

            let report = self.cycle(&token).await?;
            if report.cancelled {
                return Ok(());
            }

            debug!(
                "{} cycle: {} targets, {} failures in {:?}",
                self.name(),
                report.targets,
                report.failures,
                report.elapsed
            );
            ticker.reset();
        }
    }

    /// Run a single cycle: reload, reset, fan out, join, flush.
    pub async fn cycle(&self, token: &CancellationToken) -> Result<CycleReport> {
        let started = Instant::now();
        let targets = self
            .loader
            .load()
            .with_context(|| format!("Failed to load {} targets", self.name()))?;

        self.stats.reset();
        self.stats.set_total(targets.len());

        let permits = Arc::new(Semaphore::new(self.settings.concurrency));
        let mut workers = JoinSet::new();
        let mut cancelled = false;

        for target in targets.iter().cloned() {
            let permit = tokio::select! {
                _ = token.cancelled() => {
                    cancelled = true;
                    break;
                }
                permit = Arc::clone(&permits).acquire_owned() => {
                    permit.context("Worker semaphore closed")?
                }
            };

            let probe = Arc::clone(&self.probe);
            let stats = Arc::clone(&self.stats);
            let token = token.clone();
            let timeout = self.settings.timeout;

            workers.spawn(async move {
                let _permit = permit;
                let result = tokio::select! {
                    _ = token.cancelled() => return Outcome::Cancelled,
                    result = tokio::time::timeout(timeout, probe.check(&target)) => result,
                };

                match result {
                    Ok(Ok(sample)) => {
                        stats.record(&sample);
                        Outcome::Recorded
                    }
                    Ok(Err(e)) => {
                        debug!("{} check of {} failed: {:#}", probe.name(), target, e);
                        stats.record_failure();
                        Outcome::Failed
                    }
                    Err(_) => {
                        debug!("{} check of {} timed out after {:?}", probe.name(), target, timeout);
                        stats.record_failure();
                        Outcome::Failed
                    }
                }
            });
        }

        let mut failures = 0;
        while let Some(joined) = workers.join_next().await {
            match joined {
                Ok(Outcome::Recorded) => {}
                Ok(Outcome::Failed) => failures += 1,
                Ok(Outcome::Cancelled) => cancelled = true,
                Err(e) => {
                    warn!("{} worker aborted: {}", self.name(), e);
                    self.stats.record_failure();
                    failures += 1;
                }
            }
        }

        let cancelled = cancelled || token.is_cancelled();
        if !cancelled {
            monitor::gather(self.monitor.as_ref(), self.stats.as_ref());
        }

        Ok(CycleReport {
            targets: targets.len(),
            failures,
            elapsed: started.elapsed(),
            cancelled,
        })
    }
}

#[async_trait]
impl Listener for Prober {
    async fn start(
        &self,
        token: CancellationToken,
        ready: Ready,
        _run: Runner,
    ) -> Result<()> {
        info!(
            "Starting {} prober (interval {:?}, timeout {:?}, concurrency {})",
            self.name(),
            self.settings.interval,
            self.settings.timeout,
            self.settings.concurrency
        );
        ready.ready();

        let result = self.run(token).await;
        info!("{} prober stopped", self.name());
        result
    }
}
