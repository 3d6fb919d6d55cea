//! Signal execution bot - entry point.

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::{error, info};

/// Executes trading signals on configured exchange accounts.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Configuration file path (can also be set via SIGEXEC_CONFIG env var)
    #[arg(short, long)]
    config: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the tick loops until ctrl-c (default).
    Run,
    /// Close every open position on every configured account and exit.
    Flatten,
    /// Validate the configuration and exit.
    Check,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // CLI arg > SIGEXEC_CONFIG env var > default
    let config_path = args
        .config
        .or_else(|| std::env::var("SIGEXEC_CONFIG").ok())
        .unwrap_or_else(|| "config/default.toml".to_string());

    let config = sigexec_bot::AppConfig::from_file(&config_path)?;
    sigexec_telemetry::init_logging(&config.telemetry.log_level)?;

    info!(
        config_path = %config_path,
        accounts = config.accounts.len(),
        "Starting sigexec-bot v{}",
        env!("CARGO_PKG_VERSION")
    );

    let app = sigexec_bot::Application::new(config)?;

    match args.command.unwrap_or(Command::Run) {
        Command::Run => app.run().await?,
        Command::Flatten => {
            let failed = app.flatten_all().await?;
            if failed > 0 {
                error!(failed, "Flatten incomplete");
                anyhow::bail!("{failed} account(s) could not be flattened");
            }
        }
        Command::Check => info!("Configuration valid"),
    }

    Ok(())
}
