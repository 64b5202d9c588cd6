//! Amazon search-result listings

use once_cell::sync::Lazy;
use regex::Regex;
use url::Url;

use super::listing_parser::ListingSelectors;
use super::platform::{PlatformProfile, first_amount, with_query_param};
use crate::domain::AffiliateRule;

static ASIN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"/(?:dp|gp/product)/([A-Z0-9]{10})(?:[/?]|$)").expect("valid ASIN regex"));

const BLOCK_MARKERS: [&str; 4] = [
    "captchacharacters",
    "/errors/validatecaptcha",
    "enter the characters you see below",
    "api-services-support@amazon.com",
];

pub struct AmazonProfile {
    rule: AffiliateRule,
}

impl AmazonProfile {
    pub const ID: &'static str = "amazon";

    pub fn new() -> Self {
        let host = Regex::new(r"(^|\.)amazon\.(com|co\.[a-z]{2}|com\.[a-z]{2}|[a-z]{2})$")
            .expect("valid amazon host regex");
        Self {
            rule: AffiliateRule::new(host, "tag"),
        }
    }
}

impl Default for AmazonProfile {
    fn default() -> Self {
        Self::new()
    }
}

impl PlatformProfile for AmazonProfile {
    fn id(&self) -> &'static str {
        Self::ID
    }

    fn default_selectors(&self) -> ListingSelectors {
        ListingSelectors::new(
            &["[data-component-type='s-search-result']", "div.s-result-item[data-asin]"],
            &["h2 a span", "h2 span", "h2"],
            &[
                ".a-price .a-offscreen",
                ".a-price-whole",
                ".a-price-range .a-offscreen",
                ".a-text-price .a-offscreen",
            ],
            &["img.s-image", "img"],
            &["h2 a", "a.a-link-normal[href*='/dp/']"],
        )
    }

    fn affiliate_rule(&self) -> &AffiliateRule {
        &self.rule
    }

    fn clean_price(&self, raw: &str) -> String {
        let mut price = raw.trim();
        // ranges: keep the lower bound
        if let Some((first, _)) = price.split_once(" - ") {
            price = first.trim();
        }

        let mut cleaned = if !price.contains('$') && price.chars().any(|c| c.is_ascii_digit()) {
            first_amount(price).map_or_else(|| price.to_string(), |amount| format!("${amount}"))
        } else {
            price.to_string()
        };
        cleaned = cleaned.split_whitespace().collect::<Vec<_>>().join(" ");
        cleaned.replace("$ ", "$")
    }

    /// Canonical `/dp/<ASIN>?tag=` link when the ASIN is known.
    fn build_affiliate_url(&self, product_url: &Url, tracking_id: &str) -> Url {
        let asin = ASIN
            .captures(product_url.path())
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().to_string());
        let host = product_url.host_str().unwrap_or("www.amazon.com");

        match asin.and_then(|asin| Url::parse(&format!("https://{host}/dp/{asin}")).ok()) {
            Some(canonical) => with_query_param(&canonical, "tag", tracking_id),
            None => with_query_param(product_url, "tag", tracking_id),
        }
    }

    fn detect_block(&self, html: &str) -> Option<String> {
        let lowered = html.to_ascii_lowercase();
        BLOCK_MARKERS
            .iter()
            .find(|marker| lowered.contains(*marker))
            .map(|marker| format!("amazon robot check ({marker})"))
    }
}
