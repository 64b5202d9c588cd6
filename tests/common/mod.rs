//! In-memory collaborators for pipeline integration tests

#![allow(dead_code)]

use affiliate_ingest::application::{PipelineSettings, RunContext};
use affiliate_ingest::domain::{
    AffiliateCredentials, AffiliateRule, ImageStorageConfig, ProductCard, RawCandidate,
    RunStatistics, ScrapeTarget, SiteConfig, SiteRunState, TargetConfig,
};
use affiliate_ingest::error::{ExtractError, FetchError, PublishError};
use affiliate_ingest::infrastructure::extraction::{ExtractionContext, Extractor, ExtractorRegistry};
use affiliate_ingest::infrastructure::http_client::{FetchedImage, FetchedPage, PageFetcher};
use affiliate_ingest::infrastructure::output_writer::{OutputWriter, PublishedOutput};
use affiliate_ingest::infrastructure::request_pacer::PacingSettings;
use affiliate_ingest::infrastructure::retry_manager::RetryPolicy;
use affiliate_ingest::infrastructure::state_store::StateStore;
use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use regex::Regex;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use url::Url;

pub const PLATFORM: &str = "a";
pub const SITE: &str = "deals";

/// Serves a tiny PNG for every image request.
pub struct StaticFetcher;

#[async_trait]
impl PageFetcher for StaticFetcher {
    async fn fetch_page(&self, url: &Url, _cancel: &CancellationToken) -> Result<FetchedPage, FetchError> {
        Ok(FetchedPage {
            url: url.clone(),
            body: String::new(),
        })
    }

    async fn fetch_image(&self, _url: &Url, _max_bytes: usize) -> Result<FetchedImage, FetchError> {
        Ok(FetchedImage {
            data: vec![0x89, b'P', b'N', b'G', 0x0d, 0x0a],
            content_type: "image/png".into(),
        })
    }
}

pub enum Script {
    Candidates(Vec<RawCandidate>),
    AlwaysTimeout,
}

/// Extractor for platform "a" answering from a per-URL script.
pub struct ScriptedExtractor {
    rule: AffiliateRule,
    scripts: HashMap<String, Script>,
    calls: HashMap<String, AtomicU32>,
}

impl ScriptedExtractor {
    pub fn new(scripts: Vec<(&str, Script)>) -> Self {
        let calls = scripts.iter().map(|(url, _)| ((*url).to_string(), AtomicU32::new(0))).collect();
        Self {
            rule: AffiliateRule::new(Regex::new(r"(^|\.)shop\.example$").unwrap(), "tag"),
            scripts: scripts.into_iter().map(|(url, s)| (url.to_string(), s)).collect(),
            calls,
        }
    }

    pub fn calls(&self, url: &str) -> u32 {
        self.calls.get(url).map_or(0, |c| c.load(Ordering::SeqCst))
    }
}

#[async_trait]
impl Extractor for ScriptedExtractor {
    fn platform(&self) -> &str {
        PLATFORM
    }

    fn affiliate_rule(&self) -> &AffiliateRule {
        &self.rule
    }

    async fn extract(
        &self,
        target: &ScrapeTarget,
        ctx: &ExtractionContext<'_>,
    ) -> Result<Vec<RawCandidate>, ExtractError> {
        let key = target.url.as_str();
        if let Some(counter) = self.calls.get(key) {
            counter.fetch_add(1, Ordering::SeqCst);
        }
        match self.scripts.get(key) {
            Some(Script::Candidates(candidates)) => {
                ctx.fetch_page(&target.url).await?;
                Ok(candidates.clone())
            }
            Some(Script::AlwaysTimeout) | None => Err(FetchError::Timeout { url: key.to_string() }.into()),
        }
    }
}

/// Output writer that always fails.
pub struct FailingWriter;

#[async_trait]
impl OutputWriter for FailingWriter {
    async fn write(&self, path: &Path, _output: &PublishedOutput) -> Result<(), PublishError> {
        Err(PublishError::io(path, std::io::Error::other("disk full")))
    }
}

pub fn candidate(n: u32, category: &str) -> RawCandidate {
    RawCandidate::new(PLATFORM, category, "https://shop.example/list")
        .with_title(format!("Fresh Product {n}"))
        .with_price(format!("${n}.99"))
        .with_image(format!("https://img.shop.example/{n}.jpg"))
        .with_affiliate(format!("https://shop.example/p/{n}?tag=deals-20"))
}

pub fn fast_settings(dir: &TempDir) -> PipelineSettings {
    PipelineSettings {
        retry: RetryPolicy::new(3, Duration::from_millis(1), Duration::from_millis(5)),
        pacing: PacingSettings::disabled(),
        target_timeout: Duration::from_secs(10),
        site_config_directory: dir.path().join("sites"),
        ..PipelineSettings::default()
    }
}

pub fn state_store(dir: &TempDir) -> Arc<StateStore> {
    Arc::new(StateStore::new(dir.path().join("state"), dir.path().join("backups"), 48))
}

pub fn context(dir: &TempDir, extractor: Arc<ScriptedExtractor>) -> RunContext {
    RunContext::new(
        Arc::new(StaticFetcher),
        ExtractorRegistry::new().register(extractor),
        state_store(dir),
        fast_settings(dir),
        AffiliateCredentials::new().with(PLATFORM, "deals-20"),
    )
}

pub fn site(dir: &TempDir, target_urls: &[&str]) -> SiteConfig {
    SiteConfig {
        site_name: SITE.into(),
        output_path: dir.path().join("public").join("products.json"),
        image_storage: ImageStorageConfig {
            directory: dir.path().join("public").join("images"),
            public_base_url: "https://deals.example.com/images".into(),
            folder: "products".into(),
        },
        targets: target_urls
            .iter()
            .map(|url| TargetConfig {
                url: (*url).to_string(),
                platform: PLATFORM.into(),
                category: "Home Office".into(),
                expected_count: 3,
                custom_selectors: None,
            })
            .collect(),
        refresh_interval_hours: 24,
    }
}

pub fn previous_state(products: usize) -> SiteRunState {
    SiteRunState {
        site_name: SITE.into(),
        products: (0..products)
            .map(|i| ProductCard {
                title: format!("Old Product {i}"),
                price: "$5.00".into(),
                affiliate_url: Url::parse(&format!("https://shop.example/old/{i}?tag=deals-20")).unwrap(),
                image_url: Url::parse(&format!("https://img.shop.example/old-{i}.jpg")).unwrap(),
                slug: format!("old-product-{i}"),
            })
            .collect(),
        last_success: Utc::now() - ChronoDuration::hours(6),
        statistics: RunStatistics::default(),
        consecutive_failures: 0,
    }
}

pub fn read_output(path: &Path) -> PublishedOutput {
    serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap()
}
