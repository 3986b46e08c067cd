use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use taskfloor::cli::{Cli, Command};
use taskfloor::clock::SystemClock;
use taskfloor::config::OfficeConfig;
use taskfloor::demo::{DemoOptions, run_demo};
use taskfloor::ui;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
        .with_target(false)
        .init();

    let config = match &cli.config {
        Some(path) => OfficeConfig::load_from(path).with_context(|| format!("loading {}", path.display()))?,
        None => OfficeConfig::load()?,
    };

    match cli.command {
        Command::Demo { quantity, stock } => {
            let report = run_demo(config, Arc::new(SystemClock), DemoOptions { quantity, stock }).await?;
            ui::print_report(&report);
            if report.summary.unhandled_failures > 0 {
                std::process::exit(1);
            }
        }
        Command::Config { json } => {
            let rendered = if json {
                serde_json::to_string_pretty(&config)?
            } else {
                toml::to_string_pretty(&config)?
            };
            println!("{rendered}");
        }
    }
    Ok(())
}
