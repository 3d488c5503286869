pub mod commands;

use clap::{Parser, Subcommand, ValueEnum};
use octoping_common::defaults;
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "octoping")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Cluster network health checks from the command line", long_about = None)]
pub struct Cli {
    #[arg(short, long, global = true, help = "Enable verbose logging")]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

impl Cli {
    /// `RUST_LOG` takes precedence over `--verbose`.
    pub fn log_filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(self.log_directives()))
    }

    fn log_directives(&self) -> &'static str {
        if self.verbose {
            "info,octoping=debug,octoping_agent=debug"
        } else {
            "info"
        }
    }
}

#[derive(Subcommand)]
pub enum Commands {
    #[command(about = "Run one probe cycle and print the resulting metrics")]
    Check {
        #[arg(
            short,
            long,
            global = true,
            value_enum,
            default_value_t = OutputFormat::Text,
            help = "Output format"
        )]
        format: OutputFormat,

        #[command(subcommand)]
        probe: CheckType,
    },
    #[command(about = "Validate a configuration directory and print the effective settings")]
    Config {
        #[arg(default_value = "/etc/config", help = "Configuration directory")]
        dir: PathBuf,
    },
}

#[derive(Subcommand)]
pub enum CheckType {
    #[command(about = "Ping targets over ICMP (requires CAP_NET_RAW)")]
    Icmp {
        #[arg(required = true, help = "Addresses or hostnames to ping")]
        targets: Vec<String>,

        #[arg(short, long, default_value_t = defaults::ICMP_COUNT, help = "Echo requests per target")]
        count: u16,

        #[arg(short, long, default_value = "5s", value_parser = parse_duration, help = "Timeout per target (e.g. 500ms, 5s)")]
        timeout: Duration,
    },
    #[command(about = "Resolve names over DNS")]
    Dns {
        #[arg(required = true, help = "Names to resolve")]
        names: Vec<String>,

        #[arg(short, long, help = "Name server address (defaults to the system resolver)")]
        server: Option<String>,

        #[arg(short, long, default_value = "5s", value_parser = parse_duration, help = "Timeout per lookup (e.g. 500ms, 5s)")]
        timeout: Duration,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
    Yaml,
    Prometheus,
}

fn parse_duration(s: &str) -> std::result::Result<Duration, String> {
    octoping_agent::config::parse_duration(s)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verbose_log_directives() {
        let quiet = Cli::parse_from(["octoping", "config"]);
        assert_eq!(quiet.log_directives(), "info");

        let verbose = Cli::parse_from(["octoping", "--verbose", "config"]);
        let directives = verbose.log_directives();
        assert!(directives.contains("octoping_agent=debug"));
        assert!(EnvFilter::try_new(directives).is_ok());
    }

    #[test]
    fn test_check_icmp_args() {
        let cli = Cli::parse_from([
            "octoping", "check", "icmp", "10.0.0.1", "10.0.0.2", "--timeout", "1s", "--format",
            "prometheus",
        ]);

        match cli.command {
            Some(Commands::Check {
                format,
                probe: CheckType::Icmp { targets, count, timeout },
            }) => {
                assert_eq!(format, OutputFormat::Prometheus);
                assert_eq!(targets, vec!["10.0.0.1", "10.0.0.2"]);
                assert_eq!(count, 5);
                assert_eq!(timeout, Duration::from_secs(1));
            }
            _ => panic!("expected check icmp"),
        }
    }

    #[test]
    fn test_check_dns_args() {
        let cli = Cli::parse_from(["octoping", "-v", "check", "dns", "example.com", "-s", "10.96.0.10"]);

        assert!(cli.verbose);
        match cli.command {
            Some(Commands::Check {
                format,
                probe: CheckType::Dns { names, server, .. },
            }) => {
                assert_eq!(format, OutputFormat::Text);
                assert_eq!(names, vec!["example.com"]);
                assert_eq!(server.as_deref(), Some("10.96.0.10"));
            }
            _ => panic!("expected check dns"),
        }
    }

    #[test]
    fn test_check_requires_targets() {
        assert!(Cli::try_parse_from(["octoping", "check", "icmp"]).is_err());
        assert!(Cli::try_parse_from(["octoping", "check", "icmp", "x", "--timeout", "soon"]).is_err());
    }
}
