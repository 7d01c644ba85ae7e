//! Mutarjim - EPUB Translation Engine
//!
//! Command line entry point: load configuration, open the project
//! directory, and dispatch to the workflow.

use anyhow::Result;
use clap::Parser;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use mutarjim::cli::{Args, Commands};
use mutarjim::config::Config;
use mutarjim::workflow::Workflow;

const CONFIG_FILE: &str = "mutarjim.toml";

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let level = if args.verbose { Level::DEBUG } else { Level::INFO };
    let _ = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .try_init();

    // Load configuration
    let config = match &args.config {
        Some(config_path) => Config::from_file(config_path)?,
        None => {
            if std::path::Path::new(CONFIG_FILE).exists() {
                info!("Found {} in current directory, loading...", CONFIG_FILE);
                Config::from_file(CONFIG_FILE)?
            } else {
                Config::default()
            }
        }
    };

    if let Commands::InitConfig = args.command {
        Config::default().save_to_file(CONFIG_FILE)?;
        println!("Wrote default configuration to {CONFIG_FILE}");
        return Ok(());
    }

    let workflow = Workflow::open(config.clone(), &args.project_dir).await?;

    match args.command {
        Commands::Import { input } => {
            workflow.import(&input).await?;
        }
        Commands::Translate => {
            workflow.translate(&config).await?;
        }
        Commands::Status => {
            workflow.status().await?;
        }
        Commands::Retry => {
            workflow.retry().await?;
        }
        Commands::Export { output, title, cover } => {
            workflow.export(output, title, cover).await?;
        }
        Commands::Backup { output } => {
            workflow.backup(output).await?;
        }
        Commands::Restore { input } => {
            workflow.restore(&input).await?;
        }
        Commands::InitConfig => unreachable!("handled above"),
    }

    Ok(())
}
