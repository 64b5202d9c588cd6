//! CLI-equivalent operations over the pipeline
//!
//! `run_site`, `status` and `backup` plus their multi-site variants. Sites
//! run as independent tokio tasks; a panic in one becomes a failed result
//! for that site only.

#![allow(clippy::uninlined_format_args)]

use chrono::Utc;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::application::orchestrator::Orchestrator;
use crate::application::run_context::RunContext;
use crate::domain::site::validate_site_name;
use crate::domain::{RunOutcome, RunPhase, RunResult, SiteConfig};
use crate::error::{ConfigError, StateError};
use crate::infrastructure::state_store::{SiteStatusSummary, StateSnapshot};

#[derive(Clone)]
pub struct IngestService {
    orchestrator: Orchestrator,
    ctx: Arc<RunContext>,
}

impl IngestService {
    pub fn new(ctx: Arc<RunContext>) -> Self {
        Self {
            orchestrator: Orchestrator::new(Arc::clone(&ctx)),
            ctx,
        }
    }

    pub fn context(&self) -> &RunContext {
        &self.ctx
    }

    pub async fn run_site(&self, site: &SiteConfig) -> RunResult {
        self.orchestrator.run_site(site).await
    }

    /// Load `<config_dir>/<name>.json` and run it.
    pub async fn run_site_by_name(&self, name: &str) -> RunResult {
        match self.load_site_config(name).await {
            Ok(site) => self.run_site(&site).await,
            Err(e) => failed_result(name, e.to_string()),
        }
    }

    /// Run sites in parallel, one task each. Results follow the input order.
    pub async fn run_sites(&self, sites: Vec<SiteConfig>) -> Vec<RunResult> {
        let handles: Vec<_> = sites
            .into_iter()
            .map(|site| {
                let orchestrator = self.orchestrator.clone();
                let name = site.site_name.clone();
                let handle = tokio::spawn(async move { orchestrator.run_site(&site).await });
                (name, handle)
            })
            .collect();

        let mut results = Vec::with_capacity(handles.len());
        for (name, handle) in handles {
            match handle.await {
                Ok(result) => results.push(result),
                Err(e) => {
                    error!("💥 Worker for site {} aborted: {}", name, e);
                    results.push(failed_result(&name, format!("site worker aborted: {}", e)));
                }
            }
        }
        results
    }

    /// Run every `*.json` site configuration in the config directory.
    pub async fn run_all_sites(&self) -> anyhow::Result<Vec<RunResult>> {
        let names = self.list_site_configs().await?;
        info!("📋 Running {} configured sites", names.len());

        let mut sites = Vec::new();
        let mut results = Vec::new();
        for name in names {
            match self.load_site_config(&name).await {
                Ok(site) => sites.push(site),
                Err(e) => {
                    warn!("⚠️ Skipping site {}: {}", name, e);
                    results.push(failed_result(&name, e.to_string()));
                }
            }
        }
        results.extend(self.run_sites(sites).await);
        Ok(results)
    }

    /// Health of one site, judged against its configured refresh interval
    /// when `<site>.json` is readable.
    pub async fn status(&self, site: &str) -> Result<SiteStatusSummary, StateError> {
        validate_site_name(site)?;
        let refresh_interval = match self.load_site_config(site).await {
            Ok(config) => Some(config.refresh_interval_hours),
            Err(ConfigError::SiteNotFound { .. }) => None,
            Err(e) => {
                warn!("⚠️ Using the default stale window for {}: {}", site, e);
                None
            }
        };
        self.ctx.state_store.status(site, refresh_interval).await
    }

    /// Status for every site that has persisted state.
    pub async fn status_all(&self) -> Result<Vec<SiteStatusSummary>, StateError> {
        let mut summaries = Vec::new();
        for site in self.ctx.state_store.list_sites().await? {
            summaries.push(self.status(&site).await?);
        }
        Ok(summaries)
    }

    pub async fn backup(&self, site: &str) -> Result<StateSnapshot, StateError> {
        self.ctx.state_store.backup(site).await
    }

    pub async fn backup_all(&self) -> Result<PathBuf, StateError> {
        self.ctx.state_store.backup_all().await
    }

    pub async fn cleanup_backups(&self, max_age_days: u32) -> Result<usize, StateError> {
        self.ctx.state_store.cleanup_backups(max_age_days).await
    }

    pub async fn load_site_config(&self, name: &str) -> Result<SiteConfig, ConfigError> {
        validate_site_name(name)?;
        let path = self.site_config_path(name);
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ConfigError::SiteNotFound { path });
            }
            Err(e) => {
                return Err(ConfigError::Unreadable {
                    path,
                    reason: e.to_string(),
                });
            }
        };
        serde_json::from_str(&content).map_err(|e| ConfigError::Unreadable {
            path,
            reason: e.to_string(),
        })
    }

    fn site_config_path(&self, name: &str) -> PathBuf {
        self.config_dir().join(format!("{}.json", name))
    }

    fn config_dir(&self) -> &Path {
        &self.ctx.settings.site_config_directory
    }

    async fn list_site_configs(&self) -> anyhow::Result<Vec<String>> {
        let dir = self.config_dir();
        let mut entries = match tokio::fs::read_dir(dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!("Site configuration directory {:?} does not exist", dir);
                return Ok(Vec::new());
            }
            Err(e) => return Err(anyhow::Error::new(e).context(format!("Failed to read {:?}", dir))),
        };

        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    names.push(stem.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }
}

fn failed_result(site_name: &str, error: String) -> RunResult {
    let now = Utc::now();
    RunResult {
        run_id: Uuid::new_v4(),
        site_name: site_name.to_string(),
        outcome: RunOutcome::Failed,
        source: None,
        phases: vec![RunPhase::Pending, RunPhase::Failed],
        statistics: Default::default(),
        products_published: 0,
        output_path: None,
        error: Some(error),
        started_at: now,
        finished_at: now,
    }
}
