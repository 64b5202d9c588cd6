//! Configuration infrastructure
//!
//! Application settings are layered with the `config` crate:
//! 1. Built-in defaults (see [`defaults`])
//! 2. An optional TOML/JSON settings file
//! 3. `INGEST_*` environment variables, `__` separating nested keys
//!    (e.g. `INGEST_SCRAPING__MAX_RETRIES=5`)
//!
//! Only [`ConfigManager`] reads the process environment. Everything below it
//! receives plain values through the run context.

#![allow(clippy::uninlined_format_args)]

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

use crate::domain::AffiliateCredentials;
use crate::error::ConfigError;

/// Complete application configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub scraping: ScrapingConfig,
    pub validation: ValidationConfig,
    pub images: ImageConfig,
    pub paths: PathsConfig,
    pub state: StateConfig,
    /// Tracking id per platform id
    pub affiliate: AffiliateCredentials,
    pub logging: LoggingConfig,
}

/// Request pacing, retries and timeouts for extraction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScrapingConfig {
    /// Lower bound of the jittered delay between page requests
    pub min_delay_ms: u64,
    /// Upper bound of the jittered delay between page requests
    pub max_delay_ms: u64,
    /// Hard cap enforced by the HTTP client rate limiter
    pub max_requests_per_second: u32,
    pub request_timeout_seconds: u64,
    /// Bounds one target including all of its retries
    pub target_timeout_seconds: u64,
    /// Retries after the first attempt
    pub max_retries: u32,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
    pub user_agent: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationConfig {
    pub quality_threshold: f64,
    pub slug_max_length: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageConfig {
    pub enabled: bool,
    pub max_bytes: usize,
    pub timeout_seconds: u64,
    pub concurrency: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Directory holding one `<site>.json` per site
    pub config_directory: PathBuf,
    pub state_directory: PathBuf,
    pub backup_directory: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StateConfig {
    /// State older than this is reported as stale
    pub stale_after_hours: u32,
    pub backup_retention_days: u32,
}

/// Logging configuration settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: "error", "warn", "info", "debug", "trace"
    pub level: String,

    /// Enable JSON formatted logs
    pub json_format: bool,

    /// Enable console output
    pub console_output: bool,

    /// Enable file output
    pub file_output: bool,

    pub log_directory: PathBuf,

    /// Number of log files to keep (older files will be deleted)
    pub max_files: u32,

    /// Enable automatic log cleanup on startup
    pub auto_cleanup_logs: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            scraping: ScrapingConfig::default(),
            validation: ValidationConfig::default(),
            images: ImageConfig::default(),
            paths: PathsConfig::default(),
            state: StateConfig::default(),
            affiliate: AffiliateCredentials::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for ScrapingConfig {
    fn default() -> Self {
        Self {
            min_delay_ms: defaults::MIN_DELAY_MS,
            max_delay_ms: defaults::MAX_DELAY_MS,
            max_requests_per_second: defaults::MAX_REQUESTS_PER_SECOND,
            request_timeout_seconds: defaults::REQUEST_TIMEOUT_SECONDS,
            target_timeout_seconds: defaults::TARGET_TIMEOUT_SECONDS,
            max_retries: defaults::MAX_RETRIES,
            backoff_base_ms: defaults::BACKOFF_BASE_MS,
            backoff_max_ms: defaults::BACKOFF_MAX_MS,
            user_agent: defaults::USER_AGENT.to_string(),
        }
    }
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            quality_threshold: defaults::QUALITY_THRESHOLD,
            slug_max_length: defaults::SLUG_MAX_LENGTH,
        }
    }
}

impl Default for ImageConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_bytes: defaults::IMAGE_MAX_BYTES,
            timeout_seconds: defaults::IMAGE_TIMEOUT_SECONDS,
            concurrency: defaults::IMAGE_CONCURRENCY,
        }
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            config_directory: PathBuf::from(defaults::SITE_CONFIG_DIRECTORY),
            state_directory: PathBuf::from(defaults::STATE_DIRECTORY),
            backup_directory: PathBuf::from(defaults::BACKUP_DIRECTORY),
        }
    }
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            stale_after_hours: defaults::STALE_AFTER_HOURS,
            backup_retention_days: defaults::BACKUP_RETENTION_DAYS,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: defaults::LOG_LEVEL.to_string(),
            json_format: false,
            console_output: true,
            file_output: false,
            log_directory: ConfigManager::default_log_directory(),
            max_files: defaults::LOG_MAX_FILES,
            auto_cleanup_logs: true,
        }
    }
}

impl ScrapingConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }

    pub fn target_timeout(&self) -> Duration {
        Duration::from_secs(self.target_timeout_seconds)
    }
}

impl AppConfig {
    /// Reject values that would make the pipeline misbehave.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let threshold = self.validation.quality_threshold;
        if !(0.0..=1.0).contains(&threshold) {
            return Err(ConfigError::invalid(
                "validation.quality_threshold",
                format!("{} is outside [0, 1]", threshold),
            ));
        }
        if self.validation.slug_max_length < 8 {
            return Err(ConfigError::invalid("validation.slug_max_length", "must be at least 8"));
        }
        if self.scraping.min_delay_ms > self.scraping.max_delay_ms {
            return Err(ConfigError::invalid(
                "scraping.min_delay_ms",
                "cannot be greater than scraping.max_delay_ms",
            ));
        }
        if self.scraping.max_requests_per_second == 0 {
            return Err(ConfigError::invalid("scraping.max_requests_per_second", "must be greater than 0"));
        }
        if self.scraping.request_timeout_seconds == 0 || self.scraping.target_timeout_seconds == 0 {
            return Err(ConfigError::invalid("scraping.*_timeout_seconds", "must be greater than 0"));
        }
        if self.scraping.backoff_base_ms > self.scraping.backoff_max_ms {
            return Err(ConfigError::invalid(
                "scraping.backoff_base_ms",
                "cannot be greater than scraping.backoff_max_ms",
            ));
        }
        if self.images.max_bytes == 0 || self.images.concurrency == 0 {
            return Err(ConfigError::invalid("images", "max_bytes and concurrency must be greater than 0"));
        }
        Ok(())
    }
}

/// Loads [`AppConfig`] from defaults, an optional file and the environment.
pub struct ConfigManager {
    config_path: Option<PathBuf>,
    env_prefix: String,
}

impl ConfigManager {
    /// `config_path` must exist when given. Without it the per-user default
    /// location is used if present.
    pub fn new(config_path: Option<PathBuf>) -> Self {
        Self {
            config_path,
            env_prefix: defaults::ENV_PREFIX.to_string(),
        }
    }

    /// Override the environment prefix (useful to isolate tests).
    pub fn with_env_prefix(mut self, prefix: &str) -> Self {
        self.env_prefix = prefix.to_string();
        self
    }

    /// Per-user configuration directory
    pub fn get_config_dir() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join(defaults::APP_DIR_NAME))
    }

    pub fn default_log_directory() -> PathBuf {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(defaults::APP_DIR_NAME)
            .join("logs")
    }

    pub fn load(&self) -> Result<AppConfig> {
        let defaults = config::Config::try_from(&AppConfig::default())
            .context("Failed to build default configuration")?;

        let mut builder = config::Config::builder().add_source(defaults);

        match &self.config_path {
            Some(path) => {
                info!("Loading configuration from {:?}", path);
                builder = builder.add_source(config::File::from(path.as_path()).required(true));
            }
            None => {
                if let Some(path) = Self::get_config_dir().map(|dir| dir.join(defaults::CONFIG_FILE_NAME)) {
                    if path.exists() {
                        info!("Loading configuration from {:?}", path);
                        builder = builder.add_source(config::File::from(path.as_path()).required(false));
                    }
                }
            }
        }

        let settings = builder
            .add_source(
                config::Environment::with_prefix(&self.env_prefix)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to assemble configuration")?;

        let app_config: AppConfig = settings
            .try_deserialize()
            .context("Configuration does not match the expected schema")?;
        app_config.validate()?;
        Ok(app_config)
    }

    pub fn config_path(&self) -> Option<&Path> {
        self.config_path.as_deref()
    }
}

/// Default configuration values
pub mod defaults {
    pub const APP_DIR_NAME: &str = "affiliate-ingest";
    pub const CONFIG_FILE_NAME: &str = "config.toml";
    pub const ENV_PREFIX: &str = "INGEST";

    /// Default jittered inter-request delay bounds (1–4 s)
    pub const MIN_DELAY_MS: u64 = 1_000;
    pub const MAX_DELAY_MS: u64 = 4_000;
    pub const MAX_REQUESTS_PER_SECOND: u32 = 2;
    pub const REQUEST_TIMEOUT_SECONDS: u64 = 30;
    pub const TARGET_TIMEOUT_SECONDS: u64 = 180;

    /// Retries after the initial attempt
    pub const MAX_RETRIES: u32 = 3;
    pub const BACKOFF_BASE_MS: u64 = 1_000;
    pub const BACKOFF_MAX_MS: u64 = 60_000;

    pub const USER_AGENT: &str =
        "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36";

    pub const QUALITY_THRESHOLD: f64 = 0.7;
    pub const SLUG_MAX_LENGTH: usize = crate::domain::slug::DEFAULT_MAX_SLUG_LENGTH;

    /// Maximum image size (10MB)
    pub const IMAGE_MAX_BYTES: usize = 10 * 1024 * 1024;
    pub const IMAGE_TIMEOUT_SECONDS: u64 = 30;
    pub const IMAGE_CONCURRENCY: usize = 4;

    pub const SITE_CONFIG_DIRECTORY: &str = "./config/sites";
    pub const STATE_DIRECTORY: &str = "./state";
    pub const BACKUP_DIRECTORY: &str = "./state/backups";

    pub const STALE_AFTER_HOURS: u32 = 48;
    pub const BACKUP_RETENTION_DAYS: u32 = 30;

    pub const LOG_LEVEL: &str = "info";
    pub const LOG_MAX_FILES: u32 = 7;
}
