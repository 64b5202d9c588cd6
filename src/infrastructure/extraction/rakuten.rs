//! Rakuten product listings

use once_cell::sync::Lazy;
use regex::Regex;
use url::Url;

use super::listing_parser::ListingSelectors;
use super::platform::{PlatformProfile, first_amount, with_query_param};
use crate::domain::AffiliateRule;

static YEN_AMOUNT: Lazy<Regex> = Lazy::new(|| Regex::new(r"¥\s?[\d,]+").expect("valid yen regex"));
static DOLLAR_AMOUNT: Lazy<Regex> = Lazy::new(|| Regex::new(r"\$\s?[\d,]+(?:\.\d+)?").expect("valid dollar regex"));

pub struct RakutenProfile {
    rule: AffiliateRule,
}

impl RakutenProfile {
    pub const ID: &'static str = "rakuten";

    pub fn new() -> Self {
        let host = Regex::new(r"(^|\.)rakuten\.(com|ca|co\.[a-z]{2}|[a-z]{2})$").expect("valid rakuten host regex");
        Self {
            rule: AffiliateRule::new(host, "ranMID"),
        }
    }
}

impl Default for RakutenProfile {
    fn default() -> Self {
        Self::new()
    }
}

impl PlatformProfile for RakutenProfile {
    fn id(&self) -> &'static str {
        Self::ID
    }

    fn default_selectors(&self) -> ListingSelectors {
        ListingSelectors::new(
            &[".product-item", ".item", ".product-card"],
            &[".product-title", ".item-title", "h3 a", ".title"],
            &[".price", ".product-price", ".item-price", ".cost"],
            &[".product-image img", ".item-image img", "img"],
            &[".product-link", ".item-link", "a[href*='/product/']", "a[href*='/item/']"],
        )
    }

    fn affiliate_rule(&self) -> &AffiliateRule {
        &self.rule
    }

    fn clean_price(&self, raw: &str) -> String {
        let price = raw.trim();
        if let Some(m) = YEN_AMOUNT.find(price) {
            return m.as_str().replace(' ', "");
        }
        if let Some(m) = DOLLAR_AMOUNT.find(price) {
            return m.as_str().replace(' ', "");
        }
        match first_amount(price) {
            Some(amount) if amount.len() >= 2 => format!("${amount}"),
            _ => price.split_whitespace().collect::<Vec<_>>().join(" "),
        }
    }

    fn build_affiliate_url(&self, product_url: &Url, tracking_id: &str) -> Url {
        let tracked = with_query_param(product_url, "ranMID", tracking_id);
        with_query_param(&tracked, "ranSiteID", tracking_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("¥ 3,980 (税込)", "¥3,980")]
    #[case("Sale $ 45.50", "$45.50")]
    #[case("45", "$45")]
    #[case("ask", "ask")]
    fn test_clean_price(#[case] raw: &str, #[case] expected: &str) {
        assert_eq!(RakutenProfile::new().clean_price(raw), expected);
    }

    #[test]
    fn test_affiliate_url_carries_tracking() {
        let profile = RakutenProfile::new();
        let link = Url::parse("https://www.rakuten.com/product/12345").unwrap();
        let tracked = profile.build_affiliate_url(&link, "mid-77");
        assert_eq!(tracked.as_str(), "https://www.rakuten.com/product/12345?ranMID=mid-77&ranSiteID=mid-77");
        assert!(profile.affiliate_rule().matches_domain(&tracked));
        assert!(profile.affiliate_rule().has_tracking(&tracked));
    }
}
