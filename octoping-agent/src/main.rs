//! octoping-agent - Node agent for cluster network health checks
//!
//! The agent runs on each node and:
//! - Pings the peer nodes listed in the configuration directory
//! - Resolves the configured DNS names
//! - Aggregates each cycle into statistics
//! - Exposes them on the status endpoint for Prometheus

use anyhow::{Context, Result};
use clap::Parser;
use log::{error, info, warn};
use octoping_agent::config::{self, DnsConfig, IcmpConfig, ProbeConfigs};
use octoping_agent::probes::{DnsProbe, IcmpProbe};
use octoping_agent::status::{self, StatusListener};
use octoping_agent::targets::{exclude, exclude_any, FileSource, StaticSource, TargetLoader};
use octoping_agent::{Monitor, Prober, PrometheusMonitor, Server};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[derive(Parser, Debug)]
#[command(name = "octoping-agent")]
#[command(version)]
#[command(about = "Node agent probing cluster network health")]
struct Args {
    #[arg(long, env = "CONFIG_PATH", default_value = "/etc/config", help = "Configuration directory")]
    config: PathBuf,

    #[arg(long, env = "STATUS_ADDR", default_value = status::DEFAULT_ADDR, help = "Status server address")]
    status_addr: SocketAddr,

    #[arg(long, env = "NODE_NAME", help = "Node name used as metric label (defaults to hostname)")]
    node_name: Option<String>,

    #[arg(long, env = "POD_IP", help = "IP of this agent, excluded from the targets")]
    pod_ip: Option<String>,

    #[arg(long, env = "HOST_IP", help = "IP of this node, excluded from the targets")]
    host_ip: Option<String>,

    #[arg(long, env = "TASK_LIMIT", help = "Maximum number of supervised tasks")]
    limit: Option<usize>,

    #[arg(long, help = "Enable debug logging")]
    debug: bool,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let level = if args.debug { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    if let Err(e) = run(args).await {
        error!("{:#}", e);
        std::process::exit(1);
    }
}

async fn run(args: Args) -> Result<()> {
    info!("octoping-agent {} starting...", env!("CARGO_PKG_VERSION"));

    let node = node_name(args.node_name.as_deref())?;
    let configs = ProbeConfigs::load(&args.config)
        .with_context(|| format!("Failed to load configuration from {}", args.config.display()))?;

    let monitor = Arc::new(PrometheusMonitor::new()?);
    let sink: Arc<dyn Monitor> = monitor.clone();

    let mut server = Server::new(&CancellationToken::new());
    server.set_limit(args.limit);
    server.listen(StatusListener::new(args.status_addr, monitor), true);

    if let Some(icmp) = &configs.icmp {
        server.listen(icmp_prober(icmp, &args, &node, sink.clone())?, true);
    }
    if let Some(dns) = &configs.dns {
        server.listen(dns_prober(dns, &node, sink.clone())?, true);
    }
    if configs.icmp.is_none() && configs.dns.is_none() {
        warn!("No probes enabled in {}", args.config.display());
    }

    info!("octoping-agent running on node {}", node);
    server.wait().await?;

    info!("octoping-agent stopped");
    Ok(())
}

fn node_name(configured: Option<&str>) -> Result<String> {
    match configured {
        Some(name) if !name.is_empty() => Ok(name.to_string()),
        _ => Ok(hostname::get()
            .context("Failed to read hostname")?
            .to_string_lossy()
            .into_owned()),
    }
}

fn icmp_prober(
    config: &IcmpConfig,
    args: &Args,
    node: &str,
    monitor: Arc<dyn Monitor>,
) -> Result<Prober> {
    let probe = IcmpProbe::new(config.echo_options())?;
    let loader = TargetLoader::new()
        .with_source(FileSource::new(config::nodes_path(&args.config)))
        .with_source(StaticSource::new(config.additional_targets.iter().cloned()))
        .with_filter(exclude(args.pod_ip.as_deref().unwrap_or_default()))
        .with_filter(exclude(args.host_ip.as_deref().unwrap_or_default()))
        .with_filter(exclude_any(&config.exclude_nodes));

    Prober::new(Arc::new(probe), loader, config.prober_settings(), node, monitor)
}

fn dns_prober(config: &DnsConfig, node: &str, monitor: Arc<dyn Monitor>) -> Result<Prober> {
    if config.names.is_empty() {
        warn!("DNS probe enabled without names");
    }

    let probe = DnsProbe::new(config.lookup_options())?;
    let loader = TargetLoader::new().with_source(StaticSource::new(config.names.iter().cloned()));

    Prober::new(Arc::new(probe), loader, config.prober_settings(), node, monitor)
}
