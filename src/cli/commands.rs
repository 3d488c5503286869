use crate::cli::{CheckType, Commands, OutputFormat};
use crate::error::OctopingError;
use crate::metrics::{MetricsCollector, MetricsExporter};
use crate::Result;
use octoping_agent::config::{self, ProbeConfigs};
use octoping_agent::probes::dns::{parse_server, LookupOptions};
use octoping_agent::probes::icmp::EchoOptions;
use octoping_agent::probes::{DnsProbe, IcmpProbe, Probe};
use octoping_agent::targets::{exclude_any, FileSource, StaticSource, TargetLoader};
use octoping_agent::{CycleReport, Monitor, Prober, ProberSettings, PrometheusMonitor};
use octoping_common::defaults;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

pub async fn handle_command(command: Commands) -> Result<()> {
    match command {
        Commands::Check { format, probe } => handle_check(probe, format).await,
        Commands::Config { dir } => handle_config(&dir),
    }
}

async fn handle_check(check: CheckType, format: OutputFormat) -> Result<()> {
    let (probe, targets, settings) = build_check(check)?;
    info!("Checking {} targets with {}", targets.len(), probe.name());

    let loader = TargetLoader::new().with_source(StaticSource::new(targets));
    let output = match format {
        OutputFormat::Prometheus => {
            let monitor = Arc::new(
                PrometheusMonitor::new().map_err(|e| OctopingError::MetricsError(e.to_string()))?,
            );
            run_cycle(probe, loader, settings, monitor.clone()).await?;
            monitor
                .encode()
                .map_err(|e| OctopingError::MetricsError(e.to_string()))?
        }
        _ => {
            let collector = Arc::new(MetricsCollector::new());
            run_cycle(probe, loader, settings, collector.clone()).await?;
            MetricsExporter::new(format).format_metrics(&collector.get_metrics())?
        }
    };

    print!("{}", output);
    Ok(())
}

fn build_check(check: CheckType) -> Result<(Arc<dyn Probe>, Vec<String>, ProberSettings)> {
    match check {
        CheckType::Icmp {
            targets,
            count,
            timeout,
        } => {
            if count == 0 {
                return Err(OctopingError::InvalidArgument {
                    name: "count".to_string(),
                    value: count.to_string(),
                });
            }
            let options = EchoOptions {
                count,
                timeout,
                ..EchoOptions::default()
            };
            let budget = options.unit_timeout();
            let probe = IcmpProbe::new(options).map_err(OctopingError::probe)?;
            Ok((
                Arc::new(probe),
                targets,
                settings(budget, defaults::ICMP_CONCURRENCY),
            ))
        }
        CheckType::Dns {
            names,
            server,
            timeout,
        } => {
            let server = server
                .map(|value| {
                    parse_server(&value).ok_or(OctopingError::InvalidArgument {
                        name: "server".to_string(),
                        value,
                    })
                })
                .transpose()?;
            let probe =
                DnsProbe::new(LookupOptions { server, timeout }).map_err(OctopingError::probe)?;
            Ok((
                Arc::new(probe),
                names,
                settings(timeout, defaults::DNS_CONCURRENCY),
            ))
        }
    }
}

fn settings(timeout: Duration, concurrency: usize) -> ProberSettings {
    ProberSettings {
        interval: defaults::INTERVAL,
        timeout,
        concurrency,
    }
}

/// Run exactly one cycle of `probe`, flushing into `monitor`.
pub async fn run_cycle(
    probe: Arc<dyn Probe>,
    loader: TargetLoader,
    settings: ProberSettings,
    monitor: Arc<dyn Monitor>,
) -> Result<CycleReport> {
    let node = node_name();
    let prober = Prober::new(probe, loader, settings, node, monitor).map_err(OctopingError::probe)?;

    let report = prober
        .cycle(&CancellationToken::new())
        .await
        .map_err(|e| OctopingError::TargetError(format!("{:#}", e)))?;
    debug!(
        "Cycle finished: {} targets, {} failures in {:?}",
        report.targets, report.failures, report.elapsed
    );
    Ok(report)
}

fn node_name() -> String {
    hostname::get()
        .map(|h| h.to_string_lossy().into_owned())
        .unwrap_or_else(|_| "localhost".to_string())
}

fn handle_config(dir: &Path) -> Result<()> {
    info!("Validating configuration in {}", dir.display());
    let configs = ProbeConfigs::load(dir)?;

    match &configs.icmp {
        Some(icmp) => {
            println!("icmp: enabled");
            println!("  interval:           {:?}", icmp.interval);
            println!("  timeout:            {:?}", icmp.timeout);
            println!("  count:              {}", icmp.count);
            println!("  ping_interval:      {:?}", icmp.ping_interval);
            println!("  loss threshold:     {}", icmp.report_threshold);
            println!("  concurrency:        {}", icmp.concurrency);
            println!("  exclude_nodes:      {}", icmp.exclude_nodes.join(", "));
            println!("  additional_targets: {}", icmp.additional_targets.join(", "));

            let targets = TargetLoader::new()
                .with_source(FileSource::new(config::nodes_path(dir)))
                .with_source(StaticSource::new(icmp.additional_targets.iter().cloned()))
                .with_filter(exclude_any(&icmp.exclude_nodes))
                .load()
                .map_err(|e| OctopingError::TargetError(format!("{:#}", e)))?;

            println!("  targets ({}):", targets.len());
            for target in &targets {
                println!("    {}", target);
            }
        }
        None => println!("icmp: disabled"),
    }

    match &configs.dns {
        Some(dns) => {
            println!("dns: enabled");
            println!("  interval:    {:?}", dns.interval);
            println!("  timeout:     {:?}", dns.timeout);
            match dns.server {
                Some(server) => println!("  server:      {}", server),
                None => println!("  server:      system resolver"),
            }
            println!("  concurrency: {}", dns.concurrency);
            println!("  names ({}):", dns.names.len());
            for name in &dns.names {
                println!("    {}", name);
            }
        }
        None => println!("dns: disabled"),
    }

    Ok(())
}
