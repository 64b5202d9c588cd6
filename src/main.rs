//! affiliate-ingest command line
//!
//! Exit code reflects the worst run outcome: 0 success, 2 degraded, 1 failed.

#![allow(clippy::uninlined_format_args)]

use affiliate_ingest::application::{IngestService, RunContext};
use affiliate_ingest::domain::{RunOutcome, RunResult};
use affiliate_ingest::infrastructure::config::ConfigManager;
use affiliate_ingest::infrastructure::logging::init_logging_with_config;
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::warn;

#[derive(Parser, Debug)]
#[command(name = "affiliate-ingest", version, about = "Affiliate product ingestion pipeline")]
struct Cli {
    /// Settings file (TOML or JSON). Defaults to the per-user config directory.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
#[command(rename_all = "kebab-case")]
enum Commands {
    /// Run one site by name
    Run {
        site: String,
    },
    /// Run every configured site in parallel
    RunAll,
    /// Show persisted state health for one site or all sites
    Status {
        site: Option<String>,
    },
    /// Snapshot persisted state for one site or all sites
    Backup {
        site: Option<String>,
    },
    /// Delete state backups older than the given number of days
    Cleanup {
        #[arg(long)]
        days: Option<u32>,
    },
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value).context("Failed to render JSON")?);
    Ok(())
}

fn exit_code_for(results: &[RunResult]) -> ExitCode {
    let worst = results
        .iter()
        .map(|r| r.outcome)
        .max()
        .unwrap_or(RunOutcome::Success);
    ExitCode::from(worst.exit_code())
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let config = ConfigManager::new(cli.config.clone())
        .load()
        .context("Failed to load configuration")?;
    init_logging_with_config(&config.logging)?;
    let context = RunContext::from_config(&config)?;
    let cancel = context.cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("🛑 Interrupt received, finishing current targets and stopping");
            cancel.cancel();
        }
    });
    let service = IngestService::new(Arc::new(context));

    match cli.command {
        Commands::Run { site } => {
            let result = service.run_site_by_name(&site).await;
            print_json(&result)?;
            Ok(exit_code_for(std::slice::from_ref(&result)))
        }
        Commands::RunAll => {
            let results = service.run_all_sites().await?;
            print_json(&results)?;
            Ok(exit_code_for(&results))
        }
        Commands::Status { site: Some(site) } => {
            print_json(&service.status(&site).await?)?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Status { site: None } => {
            print_json(&service.status_all().await?)?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Backup { site: Some(site) } => {
            print_json(&service.backup(&site).await?)?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Backup { site: None } => {
            let path = service.backup_all().await?;
            print_json(&serde_json::json!({ "backup_path": path }))?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Cleanup { days } => {
            let days = days.unwrap_or(config.state.backup_retention_days);
            let removed = service.cleanup_backups(days).await?;
            print_json(&serde_json::json!({ "removed": removed, "max_age_days": days }))?;
            Ok(ExitCode::SUCCESS)
        }
    }
}
