//! Shared listing extractor parameterized by a platform profile

use async_trait::async_trait;
use tracing::{debug, info};
use url::Url;

use super::listing_parser::{ListingParser, ListingSelectors};
use super::{ExtractionContext, Extractor};
use crate::domain::{AffiliateRule, RawCandidate, ScrapeTarget};
use crate::error::{ExtractError, FetchError};

/// Field-location and link-building rules for one affiliate platform.
pub trait PlatformProfile: Send + Sync {
    fn id(&self) -> &'static str;

    fn default_selectors(&self) -> ListingSelectors;

    fn affiliate_rule(&self) -> &AffiliateRule;

    /// Normalize scraped price text. The original currency formatting is kept.
    fn clean_price(&self, raw: &str) -> String;

    /// Turn a product link into a tracked affiliate link.
    fn build_affiliate_url(&self, product_url: &Url, tracking_id: &str) -> Url;

    /// Reason the page is a bot wall rather than a listing, if it is one.
    fn detect_block(&self, html: &str) -> Option<String> {
        let lowered = html.to_ascii_lowercase();
        ["id=\"captcha\"", "class=\"captcha\"", "g-recaptcha"]
            .iter()
            .find(|marker| lowered.contains(*marker))
            .map(|marker| format!("captcha marker '{marker}' present"))
    }
}

/// [`Extractor`] for listing pages, driven by a [`PlatformProfile`].
pub struct ListingExtractor<P> {
    profile: P,
}

impl<P: PlatformProfile> ListingExtractor<P> {
    pub fn new(profile: P) -> Self {
        Self { profile }
    }

    pub fn profile(&self) -> &P {
        &self.profile
    }

    /// Map parsed items to candidates. Pure, so it can be tested without I/O.
    pub fn candidates_from_html(
        &self,
        target: &ScrapeTarget,
        html: &str,
        page_url: &Url,
        tracking_id: Option<&str>,
    ) -> Result<Vec<RawCandidate>, ExtractError> {
        if let Some(reason) = self.profile.detect_block(html) {
            return Err(FetchError::Blocked {
                url: page_url.to_string(),
                reason,
            }
            .into());
        }

        let selectors = self
            .profile
            .default_selectors()
            .with_overrides(target.custom_selectors.as_ref());
        let parser = ListingParser::new(&selectors)?;
        let items = parser.parse(html, page_url)?;

        let candidates: Vec<RawCandidate> = items
            .into_iter()
            .map(|item| {
                let mut candidate = RawCandidate::new(self.profile.id(), &target.category, page_url.as_str());
                candidate.title = item.title;
                candidate.price_text = item
                    .price_text
                    .map(|raw| self.profile.clean_price(&raw))
                    .filter(|price| !price.is_empty());
                candidate.image_url = item.image_url;
                candidate.affiliate_url = item.link.map(|link| match tracking_id {
                    Some(id) => self.profile.build_affiliate_url(&link, id).to_string(),
                    None => link.to_string(),
                });
                candidate
            })
            .collect();

        Ok(candidates)
    }
}

#[async_trait]
impl<P: PlatformProfile> Extractor for ListingExtractor<P> {
    fn platform(&self) -> &str {
        self.profile.id()
    }

    fn affiliate_rule(&self) -> &AffiliateRule {
        self.profile.affiliate_rule()
    }

    async fn extract(
        &self,
        target: &ScrapeTarget,
        ctx: &ExtractionContext<'_>,
    ) -> Result<Vec<RawCandidate>, ExtractError> {
        let page = ctx.fetch_page(&target.url).await?;
        let tracking_id = ctx.credentials.tracking_id(self.profile.id());

        let candidates = self.candidates_from_html(target, &page.body, &page.url, tracking_id)?;

        let expected = usize::try_from(target.expected_count).unwrap_or(usize::MAX);
        if candidates.len() < expected {
            debug!(
                "{} returned {} candidates, fewer than the expected {}",
                target.url,
                candidates.len(),
                target.expected_count
            );
        }
        info!("🔍 [{}] extracted {} candidates from {}", self.profile.id(), candidates.len(), target.url);
        Ok(candidates)
    }
}

/// Append `key=value` unless the query already carries `key`.
pub(crate) fn with_query_param(url: &Url, key: &str, value: &str) -> Url {
    let mut tracked = url.clone();
    let existing: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| k != key)
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    {
        let mut pairs = tracked.query_pairs_mut();
        pairs.clear();
        for (k, v) in &existing {
            pairs.append_pair(k, v);
        }
        pairs.append_pair(key, value);
    }
    tracked
}

/// First `[\d,]+(\.\d+)?` amount in `text`, if any.
pub(crate) fn first_amount(text: &str) -> Option<&str> {
    static AMOUNT: once_cell::sync::Lazy<regex::Regex> =
        once_cell::sync::Lazy::new(|| regex::Regex::new(r"\d[\d,]*(?:\.\d+)?").expect("valid amount regex"));
    AMOUNT.find(text).map(|m| m.as_str())
}
