//! Explicit run context
//!
//! Built once by the caller and shared across site workers. Components get
//! settings, credentials and collaborators from here and never read the
//! process environment themselves.

use anyhow::Context;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::application::image_processor::ImageSettings;
use crate::application::validator::ValidationSettings;
use crate::domain::AffiliateCredentials;
use crate::infrastructure::config::{AppConfig, defaults};
use crate::infrastructure::extraction::ExtractorRegistry;
use crate::infrastructure::http_client::{HttpClient, HttpClientConfig, PageFetcher};
use crate::infrastructure::image_store::{ImageStoreFactory, LocalImageStoreFactory};
use crate::infrastructure::output_writer::{JsonOutputWriter, OutputWriter};
use crate::infrastructure::request_pacer::PacingSettings;
use crate::infrastructure::retry_manager::RetryPolicy;
use crate::infrastructure::state_store::StateStore;

/// Tunables that shape a site run.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub retry: RetryPolicy,
    pub pacing: PacingSettings,
    /// Bounds one target including all of its retries
    pub target_timeout: Duration,
    pub validation: ValidationSettings,
    pub images: ImageSettings,
    /// Where `<site>.json` configuration files live
    pub site_config_directory: PathBuf,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            pacing: PacingSettings::new(
                Duration::from_millis(defaults::MIN_DELAY_MS),
                Duration::from_millis(defaults::MAX_DELAY_MS),
            ),
            target_timeout: Duration::from_secs(defaults::TARGET_TIMEOUT_SECONDS),
            validation: ValidationSettings::default(),
            images: ImageSettings::default(),
            site_config_directory: PathBuf::from(defaults::SITE_CONFIG_DIRECTORY),
        }
    }
}

impl From<&AppConfig> for PipelineSettings {
    fn from(config: &AppConfig) -> Self {
        Self {
            retry: RetryPolicy::from(&config.scraping),
            pacing: PacingSettings::from(&config.scraping),
            target_timeout: config.scraping.target_timeout(),
            validation: ValidationSettings::from(&config.validation),
            images: ImageSettings::from(&config.images),
            site_config_directory: config.paths.config_directory.clone(),
        }
    }
}

pub struct RunContext {
    pub fetcher: Arc<dyn PageFetcher>,
    pub extractors: ExtractorRegistry,
    pub image_stores: Arc<dyn ImageStoreFactory>,
    pub state_store: Arc<StateStore>,
    pub output_writer: Arc<dyn OutputWriter>,
    pub settings: PipelineSettings,
    pub credentials: AffiliateCredentials,
    pub cancel: CancellationToken,
}

impl RunContext {
    /// Production wiring: reqwest fetcher, built-in extractors, local image
    /// storage and JSON output.
    pub fn from_config(config: &AppConfig) -> anyhow::Result<Self> {
        let fetcher = HttpClient::new(HttpClientConfig::from(&config.scraping))
            .context("Failed to create HTTP client")?;
        let state_store = StateStore::new(
            config.paths.state_directory.clone(),
            config.paths.backup_directory.clone(),
            config.state.stale_after_hours,
        );

        Ok(Self {
            fetcher: Arc::new(fetcher),
            extractors: ExtractorRegistry::with_defaults(),
            image_stores: Arc::new(LocalImageStoreFactory),
            state_store: Arc::new(state_store),
            output_writer: Arc::new(JsonOutputWriter),
            settings: PipelineSettings::from(config),
            credentials: config.affiliate.clone(),
            cancel: CancellationToken::new(),
        })
    }

    /// Assemble a context from explicit collaborators.
    pub fn new(
        fetcher: Arc<dyn PageFetcher>,
        extractors: ExtractorRegistry,
        state_store: Arc<StateStore>,
        settings: PipelineSettings,
        credentials: AffiliateCredentials,
    ) -> Self {
        Self {
            fetcher,
            extractors,
            image_stores: Arc::new(LocalImageStoreFactory),
            state_store,
            output_writer: Arc::new(JsonOutputWriter),
            settings,
            credentials,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_image_stores(mut self, image_stores: Arc<dyn ImageStoreFactory>) -> Self {
        self.image_stores = image_stores;
        self
    }

    pub fn with_output_writer(mut self, output_writer: Arc<dyn OutputWriter>) -> Self {
        self.output_writer = output_writer;
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settings_follow_app_config() {
        let mut config = AppConfig::default();
        config.scraping.max_retries = 5;
        config.scraping.target_timeout_seconds = 7;
        config.validation.quality_threshold = 0.8;
        config.images.enabled = false;

        let settings = PipelineSettings::from(&config);
        assert_eq!(settings.retry.max_attempts(), 6);
        assert_eq!(settings.target_timeout, Duration::from_secs(7));
        assert!((settings.validation.quality_threshold - 0.8).abs() < f64::EPSILON);
        assert!(!settings.images.enabled);
    }

    #[tokio::test]
    async fn test_from_config_wires_default_extractors() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut config = AppConfig::default();
        config.paths.state_directory = dir.path().join("state");
        config.paths.backup_directory = dir.path().join("backups");

        let context = RunContext::from_config(&config).unwrap();
        assert!(context.extractors.contains("amazon"));
        assert!(context.extractors.contains("rakuten"));
        assert!(context.extractors.contains("cj"));
        assert_eq!(context.state_store.state_dir(), dir.path().join("state"));
    }
}
