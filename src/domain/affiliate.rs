//! Affiliate link rules and tracking credentials

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use url::Url;

/// What a valid affiliate destination looks like for one platform.
#[derive(Debug, Clone)]
pub struct AffiliateRule {
    host_pattern: Regex,
    tracking_param: String,
}

impl AffiliateRule {
    /// `host_pattern` is matched against the URL host only.
    pub fn new(host_pattern: Regex, tracking_param: &str) -> Self {
        Self {
            host_pattern,
            tracking_param: tracking_param.to_string(),
        }
    }

    pub fn tracking_param(&self) -> &str {
        &self.tracking_param
    }

    pub fn matches_domain(&self, url: &Url) -> bool {
        url.host_str()
            .is_some_and(|host| self.host_pattern.is_match(&host.to_ascii_lowercase()))
    }

    pub fn has_tracking(&self, url: &Url) -> bool {
        url.query_pairs()
            .any(|(key, value)| key == self.tracking_param.as_str() && !value.is_empty())
    }
}

/// Tracking ids per platform, passed explicitly through the run context.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AffiliateCredentials(BTreeMap<String, String>);

impl AffiliateCredentials {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, platform: &str, tracking_id: &str) -> Self {
        self.0.insert(platform.to_ascii_lowercase(), tracking_id.to_string());
        self
    }

    pub fn tracking_id(&self, platform: &str) -> Option<&str> {
        self.0
            .get(&platform.to_ascii_lowercase())
            .map(String::as_str)
            .filter(|id| !id.trim().is_empty())
    }

    pub fn platforms(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }
}
