use clap::Parser;
use octoping::cli::{commands, Cli};
use std::process;
use tracing::debug;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // stderr keeps `check` output parseable
    if let Err(e) = tracing_subscriber::fmt()
        .with_env_filter(cli.log_filter())
        .with_writer(std::io::stderr)
        .try_init()
    {
        eprintln!("Failed to install log subscriber: {}", e);
    }

    debug!("octoping v{}", octoping::VERSION);

    let Some(command) = cli.command else {
        eprintln!("No command specified. Use --help for usage information.");
        process::exit(1);
    };

    if let Err(e) = commands::handle_command(command).await {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}
