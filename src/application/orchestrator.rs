//! Site run orchestrator
//!
//! Drives one site through
//! `PENDING → EXTRACTING → VALIDATING → IMAGE_PROCESSING → MERGING → WRITING → {COMPLETE, DEGRADED}`.
//! Configuration problems stop the run in `FAILED` before any I/O. Target
//! failures are isolated: they are counted and the next target runs.

#![allow(clippy::uninlined_format_args)]

use chrono::{DateTime, Utc};
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{Instrument, error, info, info_span, warn};
use uuid::Uuid;

use crate::application::image_processor::ImageProcessor;
use crate::application::run_context::RunContext;
use crate::application::state_merge::plan_merge;
use crate::application::validator::{ValidationOutcome, Validator};
use crate::domain::{
    PhaseTracker, ProductCard, ProductSource, RawCandidate, RunOutcome, RunPhase, RunResult,
    RunStatistics, ScrapeTarget, SiteConfig,
};
use crate::error::{ConfigError, ExtractError, FetchError};
use crate::infrastructure::extraction::{ExtractionContext, Extractor};
use crate::infrastructure::image_store::ImageStore;
use crate::infrastructure::output_writer::PublishedOutput;
use crate::infrastructure::request_pacer::RequestPacer;
use crate::infrastructure::retry_manager::RetryManager;
use crate::infrastructure::state_store::SiteLease;

/// Everything resolved from configuration before the first request.
struct PreparedRun {
    targets: Vec<ScrapeTarget>,
    image_store: Arc<dyn ImageStore>,
    lease: SiteLease,
}

/// Candidates from one successful target, with the extractor that produced them.
struct TargetHarvest {
    extractor: Arc<dyn Extractor>,
    candidates: Vec<RawCandidate>,
}

/// Bookkeeping shared by every exit path of a run.
struct RunRecorder {
    run_id: Uuid,
    site_name: String,
    started_at: DateTime<Utc>,
    tracker: PhaseTracker,
    statistics: RunStatistics,
}

impl RunRecorder {
    fn new(run_id: Uuid, site_name: &str) -> Self {
        Self {
            run_id,
            site_name: site_name.to_string(),
            started_at: Utc::now(),
            tracker: PhaseTracker::new(),
            statistics: RunStatistics::default(),
        }
    }

    fn enter(&mut self, phase: RunPhase) {
        if self.tracker.advance(phase) {
            info!("▶️ {} → {}", self.site_name, phase);
        }
    }

    fn fail(mut self, reason: String) -> RunResult {
        error!("❌ Run for {} failed during {}: {}", self.site_name, self.tracker.current(), reason);
        self.tracker.advance(RunPhase::Failed);
        self.finish(RunOutcome::Failed, None, 0, None, Some(reason))
    }

    fn finish(
        self,
        outcome: RunOutcome,
        source: Option<ProductSource>,
        products_published: usize,
        output_path: Option<PathBuf>,
        error: Option<String>,
    ) -> RunResult {
        RunResult {
            run_id: self.run_id,
            site_name: self.site_name,
            outcome,
            source,
            phases: self.tracker.into_history(),
            statistics: self.statistics,
            products_published,
            output_path,
            error,
            started_at: self.started_at,
            finished_at: Utc::now(),
        }
    }
}

#[derive(Clone)]
pub struct Orchestrator {
    ctx: Arc<RunContext>,
}

impl Orchestrator {
    pub fn new(ctx: Arc<RunContext>) -> Self {
        Self { ctx }
    }

    pub fn context(&self) -> &RunContext {
        &self.ctx
    }

    /// Run one site end to end. Never panics on bad input; every failure is
    /// reported through the returned [`RunResult`].
    pub async fn run_site(&self, site: &SiteConfig) -> RunResult {
        let run_id = Uuid::new_v4();
        let span = info_span!("site_run", site = %site.site_name, run_id = %run_id);
        self.execute(site, run_id).instrument(span).await
    }

    async fn execute(&self, site: &SiteConfig, run_id: Uuid) -> RunResult {
        let mut run = RunRecorder::new(run_id, &site.site_name);
        info!("🚀 Starting run for site {}", site.site_name);

        let prepared = match self.prepare(site) {
            Ok(prepared) => prepared,
            Err(e) => return run.fail(e.to_string()),
        };

        run.enter(RunPhase::Extracting);
        let harvests = self.extract_all(&prepared.targets, &mut run.statistics).await;

        run.enter(RunPhase::Validating);
        let mut validator = Validator::new(self.ctx.settings.validation);
        let mut accepted = Vec::new();
        for harvest in harvests {
            for raw in harvest.candidates {
                match validator.validate(raw, harvest.extractor.affiliate_rule()) {
                    ValidationOutcome::Accepted(product) => accepted.push(product),
                    ValidationOutcome::Rejected(rejection) => {
                        run.statistics.products_rejected += 1;
                        for issue in &rejection.issues {
                            run.statistics.record_rejection_reason(issue.key());
                        }
                    }
                }
            }
        }
        run.statistics.products_accepted = count(accepted.len());
        run.statistics.average_quality_score = if accepted.is_empty() {
            0.0
        } else {
            accepted.iter().map(|p| p.quality_score).sum::<f64>() / accepted.len() as f64
        };
        info!(
            "✅ Validation: {} accepted, {} rejected",
            run.statistics.products_accepted, run.statistics.products_rejected
        );

        run.enter(RunPhase::ImageProcessing);
        let processor = ImageProcessor::new(
            Arc::clone(&self.ctx.fetcher),
            prepared.image_store,
            self.ctx.settings.images,
            &site.image_storage.folder,
        );
        let images = processor.process_all(&accepted).await;
        let republished = images.iter().filter(|image| image.republished).count();
        run.statistics.images_republished = count(republished);
        run.statistics.images_fallback = count(images.len() - republished);
        let cards: Vec<ProductCard> = accepted
            .into_iter()
            .zip(images)
            .map(|(product, image)| ProductCard::assemble(product, image))
            .collect();

        run.enter(RunPhase::Merging);
        let previous = match self.ctx.state_store.load(&prepared.lease).await {
            Ok(previous) => previous,
            Err(e) => return run.fail(format!("failed to load previous state: {}", e)),
        };
        let plan = plan_merge(&site.site_name, previous, cards, &run.statistics, Utc::now());
        if plan.source == ProductSource::LastKnownGood {
            warn!(
                "⚠️ No fresh products for {}, republishing {} last-known-good products",
                site.site_name,
                plan.products.len()
            );
        }

        if plan.products.is_empty() {
            warn!("⚠️ Nothing to publish for {}, leaving existing output untouched", site.site_name);
            run.enter(RunPhase::Degraded);
            return run.finish(RunOutcome::Degraded, Some(plan.source), 0, None, None);
        }

        run.enter(RunPhase::Writing);
        let outcome = if plan.is_fresh() {
            RunOutcome::Success
        } else {
            RunOutcome::Degraded
        };
        let output = PublishedOutput::new(
            &site.site_name,
            outcome,
            plan.source,
            plan.products,
            run.statistics.clone(),
        );
        if let Err(e) = self.ctx.output_writer.write(&site.output_path, &output).await {
            return run.fail(format!("failed to write output: {}", e));
        }

        let mut outcome = outcome;
        let mut commit_error = None;
        if let Some(state) = &plan.state_to_persist {
            if let Err(e) = self.ctx.state_store.commit(state).await {
                warn!("⚠️ Output written but state commit failed for {}: {}", site.site_name, e);
                outcome = RunOutcome::Degraded;
                commit_error = Some(format!("failed to persist state: {}", e));
            }
        }

        run.enter(match outcome {
            RunOutcome::Success => RunPhase::Complete,
            _ => RunPhase::Degraded,
        });
        info!(
            "🎉 Run for {} finished as {:?} with {} products ({:?})",
            site.site_name, outcome, output.total_products, plan.source
        );
        run.finish(
            outcome,
            Some(plan.source),
            output.total_products,
            Some(site.output_path.clone()),
            commit_error,
        )
    }

    /// Validate configuration, credentials and storage, then claim the site.
    fn prepare(&self, site: &SiteConfig) -> anyhow::Result<PreparedRun> {
        let targets = site.validate(|platform| self.ctx.extractors.contains(platform))?;

        let platforms: BTreeSet<&str> = targets.iter().map(|t| t.platform.as_str()).collect();
        for platform in platforms {
            if self.ctx.credentials.tracking_id(platform).is_none() {
                return Err(ConfigError::MissingCredential {
                    platform: platform.to_string(),
                }
                .into());
            }
        }

        let image_store = self.ctx.image_stores.for_site(&site.image_storage)?;
        let lease = self.ctx.state_store.lock_site(&site.site_name)?;

        Ok(PreparedRun {
            targets,
            image_store,
            lease,
        })
    }

    /// Targets run sequentially in configured order so the request pacing holds.
    async fn extract_all(&self, targets: &[ScrapeTarget], stats: &mut RunStatistics) -> Vec<TargetHarvest> {
        let pacer = RequestPacer::new(self.ctx.settings.pacing);
        let retry = RetryManager::new(self.ctx.settings.retry);
        let mut harvests = Vec::new();

        for target in targets {
            stats.targets_attempted += 1;
            match self.extract_target(target, &pacer, &retry).await {
                Ok(harvest) => {
                    stats.targets_succeeded += 1;
                    stats.candidates_extracted += count(harvest.candidates.len());
                    harvests.push(harvest);
                }
                Err(e) => {
                    stats.targets_failed += 1;
                    warn!("❌ Target #{} ({}) failed: {}", target.index, target.url, e);
                }
            }
        }

        info!(
            "🔍 Extraction: {}/{} targets succeeded, {} candidates",
            stats.targets_succeeded, stats.targets_attempted, stats.candidates_extracted
        );
        harvests
    }

    async fn extract_target(
        &self,
        target: &ScrapeTarget,
        pacer: &RequestPacer,
        retry: &RetryManager,
    ) -> Result<TargetHarvest, ExtractError> {
        let cancel = &self.ctx.cancel;
        if cancel.is_cancelled() {
            return Err(FetchError::Cancelled {
                url: target.url.to_string(),
            }
            .into());
        }

        let extractor = self
            .ctx
            .extractors
            .get(&target.platform)
            .ok_or_else(|| FetchError::network(target.url.as_str(), "no extractor registered"))?;
        let extraction = ExtractionContext {
            fetcher: self.ctx.fetcher.as_ref(),
            pacer,
            credentials: &self.ctx.credentials,
            cancel,
        };

        let label = format!("{} target #{}", target.platform, target.index);
        let timeout = self.ctx.settings.target_timeout;
        let (extractor_ref, extraction_ref) = (extractor.as_ref(), &extraction);
        let attempts = retry.run(&label, cancel, move |_attempt| extractor_ref.extract(target, extraction_ref));

        match tokio::time::timeout(timeout, attempts).await {
            Ok(outcome) => outcome.result.map(|candidates| TargetHarvest {
                extractor: Arc::clone(&extractor),
                candidates,
            }),
            Err(_) => {
                warn!("⏳ {} exceeded the target timeout of {:?}", label, timeout);
                Err(FetchError::Timeout {
                    url: target.url.to_string(),
                }
                .into())
            }
        }
    }
}

fn count(n: usize) -> u32 {
    u32::try_from(n).unwrap_or(u32::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::run_context::PipelineSettings;
    use crate::domain::{AffiliateCredentials, ImageStorageConfig, TargetConfig};
    use crate::infrastructure::extraction::ExtractorRegistry;
    use crate::infrastructure::http_client::{FetchedImage, FetchedPage, PageFetcher};
    use crate::infrastructure::state_store::StateStore;
    use async_trait::async_trait;
    use tempfile::TempDir;
    use tokio_util::sync::CancellationToken;
    use url::Url;

    struct OfflineFetcher;

    #[async_trait]
    impl PageFetcher for OfflineFetcher {
        async fn fetch_page(&self, url: &Url, _cancel: &CancellationToken) -> Result<FetchedPage, FetchError> {
            Err(FetchError::network(url.as_str(), "offline"))
        }

        async fn fetch_image(&self, url: &Url, _max_bytes: usize) -> Result<FetchedImage, FetchError> {
            Err(FetchError::network(url.as_str(), "offline"))
        }
    }

    fn context(dir: &TempDir, credentials: AffiliateCredentials) -> Arc<RunContext> {
        let store = StateStore::new(dir.path().join("state"), dir.path().join("backups"), 48);
        Arc::new(RunContext::new(
            Arc::new(OfflineFetcher),
            ExtractorRegistry::with_defaults(),
            Arc::new(store),
            PipelineSettings::default(),
            credentials,
        ))
    }

    fn site(dir: &TempDir, platform: &str) -> SiteConfig {
        SiteConfig {
            site_name: "deals".into(),
            output_path: dir.path().join("out/products.json"),
            image_storage: ImageStorageConfig {
                directory: dir.path().join("images"),
                public_base_url: "https://cdn.example.com".into(),
                folder: "products".into(),
            },
            targets: vec![TargetConfig {
                url: "https://www.amazon.com/s?k=lamp".into(),
                platform: platform.into(),
                category: "Lighting".into(),
                expected_count: 10,
                custom_selectors: None,
            }],
            refresh_interval_hours: 24,
        }
    }

    fn assert_failed_before_extraction(result: &RunResult) {
        assert_eq!(result.outcome, RunOutcome::Failed);
        assert_eq!(result.phases, vec![RunPhase::Pending, RunPhase::Failed]);
        assert_eq!(result.statistics.targets_attempted, 0);
    }

    #[tokio::test]
    async fn test_unknown_platform_fails_fast() {
        let dir = TempDir::new().unwrap();
        let orchestrator = Orchestrator::new(context(&dir, AffiliateCredentials::new()));

        let result = orchestrator.run_site(&site(&dir, "ebay")).await;
        assert_failed_before_extraction(&result);
        assert!(result.error.unwrap().contains("ebay"));
        assert!(!dir.path().join("state").exists());
    }

    #[tokio::test]
    async fn test_missing_credential_fails_fast() {
        let dir = TempDir::new().unwrap();
        let orchestrator = Orchestrator::new(context(&dir, AffiliateCredentials::new()));

        let result = orchestrator.run_site(&site(&dir, "amazon")).await;
        assert_failed_before_extraction(&result);
    }

    #[tokio::test]
    async fn test_busy_site_fails_fast() {
        let dir = TempDir::new().unwrap();
        let ctx = context(&dir, AffiliateCredentials::new().with("amazon", "deals-20"));
        let _lease = ctx.state_store.lock_site("deals").unwrap();

        let result = Orchestrator::new(Arc::clone(&ctx)).run_site(&site(&dir, "amazon")).await;
        assert_failed_before_extraction(&result);
        assert!(result.error.unwrap().contains("in progress"));
    }

    #[tokio::test]
    async fn test_cancelled_run_counts_targets_as_failed() {
        let dir = TempDir::new().unwrap();
        let ctx = context(&dir, AffiliateCredentials::new().with("amazon", "deals-20"));
        ctx.cancel.cancel();

        let result = Orchestrator::new(Arc::clone(&ctx)).run_site(&site(&dir, "amazon")).await;
        assert_eq!(result.outcome, RunOutcome::Degraded);
        assert_eq!(result.statistics.targets_failed, 1);
        assert_eq!(result.source, Some(ProductSource::Empty));
        assert_eq!(result.final_phase(), Some(RunPhase::Degraded));
        assert!(!dir.path().join("out/products.json").exists());
    }
}
