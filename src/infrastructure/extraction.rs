//! Extraction infrastructure
//!
//! Extractors are a static registry keyed by platform id. Every variant has
//! the same contract: given a [`ScrapeTarget`], return the raw candidates
//! found on the page or fail with a fetch or parse error. Single malformed
//! items are skipped, never fatal.

pub mod amazon;
pub mod cj;
pub mod listing_parser;
pub mod platform;
pub mod rakuten;

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::domain::{AffiliateCredentials, AffiliateRule, RawCandidate, ScrapeTarget};
use crate::error::{ExtractError, FetchError};
use crate::infrastructure::http_client::{FetchedPage, PageFetcher};
use crate::infrastructure::request_pacer::RequestPacer;

pub use amazon::AmazonProfile;
pub use cj::CjProfile;
pub use listing_parser::{ListingItem, ListingParser, ListingSelectors};
pub use platform::{ListingExtractor, PlatformProfile};
pub use rakuten::RakutenProfile;

/// Everything an extractor may use during one call.
pub struct ExtractionContext<'a> {
    pub fetcher: &'a dyn PageFetcher,
    pub pacer: &'a RequestPacer,
    pub credentials: &'a AffiliateCredentials,
    pub cancel: &'a CancellationToken,
}

impl ExtractionContext<'_> {
    /// Fetch a page after honoring the inter-request delay.
    pub async fn fetch_page(&self, url: &url::Url) -> Result<FetchedPage, FetchError> {
        if !self.pacer.pace(self.cancel).await {
            return Err(FetchError::Cancelled { url: url.to_string() });
        }
        self.fetcher.fetch_page(url, self.cancel).await
    }
}

#[async_trait]
pub trait Extractor: Send + Sync {
    /// Platform id this extractor is registered under (lowercase)
    fn platform(&self) -> &str;

    /// Domain and tracking rules the validator applies to this platform's links
    fn affiliate_rule(&self) -> &AffiliateRule;

    async fn extract(
        &self,
        target: &ScrapeTarget,
        ctx: &ExtractionContext<'_>,
    ) -> Result<Vec<RawCandidate>, ExtractError>;
}

/// Platform id → extractor
#[derive(Clone, Default)]
pub struct ExtractorRegistry {
    extractors: BTreeMap<String, Arc<dyn Extractor>>,
}

impl ExtractorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Amazon, Rakuten and CJ listing extractors.
    pub fn with_defaults() -> Self {
        Self::new()
            .register(Arc::new(ListingExtractor::new(AmazonProfile::new())))
            .register(Arc::new(ListingExtractor::new(RakutenProfile::new())))
            .register(Arc::new(ListingExtractor::new(CjProfile::new())))
    }

    /// Add or replace the extractor for its platform id.
    pub fn register(mut self, extractor: Arc<dyn Extractor>) -> Self {
        self.extractors
            .insert(extractor.platform().to_ascii_lowercase(), extractor);
        self
    }

    pub fn get(&self, platform: &str) -> Option<Arc<dyn Extractor>> {
        self.extractors.get(&platform.to_ascii_lowercase()).cloned()
    }

    pub fn contains(&self, platform: &str) -> bool {
        self.extractors.contains_key(&platform.to_ascii_lowercase())
    }

    pub fn platforms(&self) -> impl Iterator<Item = &str> {
        self.extractors.keys().map(String::as_str)
    }
}

impl std::fmt::Debug for ExtractorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExtractorRegistry")
            .field("platforms", &self.extractors.keys().collect::<Vec<_>>())
            .finish()
    }
}
