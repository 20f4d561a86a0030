use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info};

use quotegate::app::App;
use quotegate::infrastructure::config::Config;

/// Real-time market-data gateway
#[derive(Parser, Debug)]
#[command(name = "quotegate")]
#[command(version)]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(short, long, global = true, default_value = "config.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the gateway (default)
    Run,
    /// Validate the configuration file and exit
    Check,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    let config = Config::load(&cli.config)
        .with_context(|| format!("failed to load {}", cli.config.display()))?;

    if matches!(cli.command, Some(Command::Check)) {
        println!("{}: ok", cli.config.display());
        return Ok(());
    }

    config.init_logging();
    info!(config = %cli.config.display(), "quotegate starting");

    let app = App::build(config)?;
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut running = tokio::spawn(app.run(shutdown_rx));

    tokio::select! {
        result = &mut running => {
            let result = result.context("gateway task panicked")?;
            if let Err(e) = &result {
                error!(error = %e, "Fatal error");
            }
            return result.map_err(Into::into);
        }
        _ = signal::ctrl_c() => {
            info!("Shutdown signal received");
        }
    }

    let _ = shutdown_tx.send(true);
    running.await.context("gateway task panicked")??;
    Ok(())
}
