//! Site configuration and the scrape targets derived from it

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use url::Url;

use crate::error::ConfigError;

pub const MIN_EXPECTED_COUNT: u32 = 1;
pub const MAX_EXPECTED_COUNT: u32 = 100;
pub const DEFAULT_EXPECTED_COUNT: u32 = 10;
pub const DEFAULT_IMAGE_FOLDER: &str = "products";
pub const DEFAULT_REFRESH_INTERVAL_HOURS: u32 = 24;

/// One site's configuration, as read from `<config_dir>/<site>.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SiteConfig {
    pub site_name: String,
    /// Where the published product file is written
    pub output_path: PathBuf,
    pub image_storage: ImageStorageConfig,
    #[serde(alias = "urls_to_scrape")]
    pub targets: Vec<TargetConfig>,
    #[serde(default = "default_refresh_interval_hours")]
    pub refresh_interval_hours: u32,
}

/// Where republished images are stored and how they are addressed publicly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageStorageConfig {
    pub directory: PathBuf,
    pub public_base_url: String,
    #[serde(default = "default_image_folder")]
    pub folder: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetConfig {
    pub url: String,
    pub platform: String,
    pub category: String,
    #[serde(default = "default_expected_count")]
    pub expected_count: u32,
    #[serde(default)]
    pub custom_selectors: Option<SelectorOverrides>,
}

/// Per-target CSS selector overrides. Unset fields use the platform defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectorOverrides {
    #[serde(default, alias = "product_container")]
    pub container: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub price: Option<String>,
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub link: Option<String>,
}

/// One unit of extraction work. Immutable once built from configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScrapeTarget {
    /// Position in the site's configured target list
    pub index: usize,
    pub url: Url,
    pub platform: String,
    pub category: String,
    /// Hint only, extraction is not truncated to it
    pub expected_count: u32,
    pub custom_selectors: Option<SelectorOverrides>,
}

fn default_refresh_interval_hours() -> u32 {
    DEFAULT_REFRESH_INTERVAL_HOURS
}

fn default_image_folder() -> String {
    DEFAULT_IMAGE_FOLDER.to_string()
}

fn default_expected_count() -> u32 {
    DEFAULT_EXPECTED_COUNT
}

impl SiteConfig {
    /// Check the site record and build its targets in configured order.
    ///
    /// `is_registered` reports whether an extractor exists for a platform id.
    pub fn validate<F>(&self, is_registered: F) -> Result<Vec<ScrapeTarget>, ConfigError>
    where
        F: Fn(&str) -> bool,
    {
        validate_site_name(&self.site_name)?;

        if self.output_path.as_os_str().is_empty() {
            return Err(ConfigError::missing("output_path"));
        }
        if self.image_storage.directory.as_os_str().is_empty() {
            return Err(ConfigError::missing("image_storage.directory"));
        }
        if self.image_storage.public_base_url.trim().is_empty() {
            return Err(ConfigError::missing("image_storage.public_base_url"));
        }
        if self.targets.is_empty() {
            return Err(ConfigError::missing("targets"));
        }

        self.targets
            .iter()
            .enumerate()
            .map(|(index, target)| target.to_scrape_target(index, &is_registered))
            .collect()
    }
}

impl TargetConfig {
    fn to_scrape_target<F>(&self, index: usize, is_registered: &F) -> Result<ScrapeTarget, ConfigError>
    where
        F: Fn(&str) -> bool,
    {
        let url = Url::parse(self.url.trim()).map_err(|e| ConfigError::InvalidTargetUrl {
            index,
            url: self.url.clone(),
            reason: e.to_string(),
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ConfigError::InvalidTargetUrl {
                index,
                url: self.url.clone(),
                reason: format!("unsupported scheme '{}'", url.scheme()),
            });
        }

        let platform = self.platform.trim().to_ascii_lowercase();
        if platform.is_empty() {
            return Err(ConfigError::missing(&format!("targets[{index}].platform")));
        }
        if !is_registered(&platform) {
            return Err(ConfigError::UnknownPlatform { index, platform });
        }

        let category = self.category.trim();
        if category.is_empty() {
            return Err(ConfigError::missing(&format!("targets[{index}].category")));
        }

        if !(MIN_EXPECTED_COUNT..=MAX_EXPECTED_COUNT).contains(&self.expected_count) {
            return Err(ConfigError::ExpectedCountOutOfRange {
                index,
                value: self.expected_count,
            });
        }

        Ok(ScrapeTarget {
            index,
            url,
            platform,
            category: category.to_string(),
            expected_count: self.expected_count,
            custom_selectors: self.custom_selectors.clone(),
        })
    }
}

/// Site names become file names, so keep them to a safe alphabet.
pub fn validate_site_name(name: &str) -> Result<(), ConfigError> {
    if name.trim().is_empty() {
        return Err(ConfigError::missing("site_name"));
    }
    let valid = name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if !valid {
        return Err(ConfigError::InvalidSiteName {
            name: name.to_string(),
        });
    }
    Ok(())
}
