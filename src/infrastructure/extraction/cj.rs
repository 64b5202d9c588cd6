//! Commission Junction merchant listings
//!
//! CJ advertisers run their own storefronts, so the domain rule accepts any
//! http(s) host and only the `cjevent` tracking parameter is enforced.

use once_cell::sync::Lazy;
use regex::Regex;
use url::Url;

use super::listing_parser::ListingSelectors;
use super::platform::{PlatformProfile, first_amount, with_query_param};
use crate::domain::AffiliateRule;

static DOLLAR_AMOUNT: Lazy<Regex> = Lazy::new(|| Regex::new(r"\$[\d,]+(?:\.\d+)?").expect("valid dollar regex"));

pub struct CjProfile {
    rule: AffiliateRule,
}

impl CjProfile {
    pub const ID: &'static str = "cj";

    pub fn new() -> Self {
        let any_host = Regex::new(r"^[a-z0-9.-]+$").expect("valid host regex");
        Self {
            rule: AffiliateRule::new(any_host, "cjevent"),
        }
    }
}

impl Default for CjProfile {
    fn default() -> Self {
        Self::new()
    }
}

impl PlatformProfile for CjProfile {
    fn id(&self) -> &'static str {
        Self::ID
    }

    fn default_selectors(&self) -> ListingSelectors {
        ListingSelectors::new(
            &[".product", ".item", ".deal-item", ".product-item"],
            &[".product-title", ".item-title", ".deal-title", "h3", "h4"],
            &[".price", ".product-price", ".deal-price", ".cost", ".amount"],
            &[".product-image img", ".item-image img", ".deal-image img", "img"],
            &[".product-link", ".item-link", ".deal-link", "a[href*='/product/']", "a[href]"],
        )
    }

    fn affiliate_rule(&self) -> &AffiliateRule {
        &self.rule
    }

    fn clean_price(&self, raw: &str) -> String {
        let price = raw.trim();
        if let Some(m) = DOLLAR_AMOUNT.find(price) {
            return m.as_str().to_string();
        }
        match first_amount(price) {
            Some(amount) if amount.len() >= 2 => format!("${amount}"),
            _ => price.to_string(),
        }
    }

    fn build_affiliate_url(&self, product_url: &Url, tracking_id: &str) -> Url {
        with_query_param(product_url, "cjevent", tracking_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_price_prefers_dollar_amount() {
        let profile = CjProfile::new();
        assert_eq!(profile.clean_price("Was $80 now $59.99"), "$80");
        assert_eq!(profile.clean_price("59.99"), "$59.99");
        assert_eq!(profile.clean_price("9"), "9");
    }

    #[test]
    fn test_any_merchant_host_is_accepted() {
        let profile = CjProfile::new();
        let tracked = profile.build_affiliate_url(&Url::parse("https://outdoor-gear.example/p/tent").unwrap(), "evt1");
        assert_eq!(tracked.as_str(), "https://outdoor-gear.example/p/tent?cjevent=evt1");
        assert!(profile.affiliate_rule().matches_domain(&tracked));
        assert!(profile.affiliate_rule().has_tracking(&tracked));
    }
}
