//! Quality gate between extraction and publishing
//!
//! Scoring starts at 1.0 and subtracts a fixed penalty per [`QualityIssue`].
//! A candidate is accepted when its score reaches the threshold and it has
//! every field a [`ProductCard`](crate::domain::ProductCard) needs.

use serde::{Deserialize, Serialize};
use std::fmt;
use url::Url;

use crate::domain::{AffiliateRule, RawCandidate, SlugRegistry, ValidatedProduct, derive_slug};
use crate::infrastructure::config::{ValidationConfig, defaults};

const MIN_TITLE_CHARS: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityIssue {
    MissingTitle,
    TitleTooShort,
    MissingPrice,
    UnparseablePrice,
    MissingImage,
    MissingAffiliate,
    AffiliateDomainMismatch,
    MissingTrackingParameter,
}

impl QualityIssue {
    pub fn penalty(self) -> f64 {
        match self {
            Self::MissingTitle | Self::MissingAffiliate => 0.40,
            Self::TitleTooShort => 0.10,
            Self::MissingPrice
            | Self::UnparseablePrice
            | Self::MissingImage
            | Self::AffiliateDomainMismatch
            | Self::MissingTrackingParameter => 0.35,
        }
    }

    /// Issues that leave a required output field unusable.
    pub fn is_blocking(self) -> bool {
        !matches!(self, Self::TitleTooShort)
    }

    pub fn key(self) -> &'static str {
        match self {
            Self::MissingTitle => "missing_title",
            Self::TitleTooShort => "title_too_short",
            Self::MissingPrice => "missing_price",
            Self::UnparseablePrice => "unparseable_price",
            Self::MissingImage => "missing_image",
            Self::MissingAffiliate => "missing_affiliate",
            Self::AffiliateDomainMismatch => "affiliate_domain_mismatch",
            Self::MissingTrackingParameter => "missing_tracking_parameter",
        }
    }
}

impl fmt::Display for QualityIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// Why a candidate was turned away.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rejection {
    pub score: f64,
    pub issues: Vec<QualityIssue>,
    pub title: Option<String>,
    pub source_url: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ValidationOutcome {
    Accepted(ValidatedProduct),
    Rejected(Rejection),
}

impl ValidationOutcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ValidationSettings {
    pub quality_threshold: f64,
    pub slug_max_length: usize,
}

impl Default for ValidationSettings {
    fn default() -> Self {
        Self {
            quality_threshold: defaults::QUALITY_THRESHOLD,
            slug_max_length: defaults::SLUG_MAX_LENGTH,
        }
    }
}

impl From<&ValidationConfig> for ValidationSettings {
    fn from(config: &ValidationConfig) -> Self {
        Self {
            quality_threshold: config.quality_threshold,
            slug_max_length: config.slug_max_length,
        }
    }
}

/// Fields after normalisation, plus what was wrong with them.
#[derive(Debug)]
struct Assessment {
    title: Option<String>,
    price: Option<String>,
    image_url: Option<Url>,
    affiliate_url: Option<Url>,
    issues: Vec<QualityIssue>,
}

impl Assessment {
    fn score(&self) -> f64 {
        let penalty: f64 = self.issues.iter().map(|issue| issue.penalty()).sum();
        (1.0 - penalty).clamp(0.0, 1.0)
    }
}

/// Score a candidate without claiming a slug.
pub fn quality_score(raw: &RawCandidate, rule: &AffiliateRule) -> f64 {
    assess(raw, rule).score()
}

fn assess(raw: &RawCandidate, rule: &AffiliateRule) -> Assessment {
    let mut issues = Vec::new();

    let title = raw.title.as_deref().map(collapse_whitespace).filter(|t| !t.is_empty());
    match &title {
        None => issues.push(QualityIssue::MissingTitle),
        Some(t) if t.chars().count() < MIN_TITLE_CHARS => issues.push(QualityIssue::TitleTooShort),
        Some(_) => {}
    }

    let price = raw.price_text.as_deref().map(collapse_whitespace).filter(|p| !p.is_empty());
    match &price {
        None => issues.push(QualityIssue::MissingPrice),
        Some(p) if !p.chars().any(|c| c.is_ascii_digit()) => issues.push(QualityIssue::UnparseablePrice),
        Some(_) => {}
    }

    let image_url = raw.image_url.as_deref().and_then(parse_absolute);
    if image_url.is_none() {
        issues.push(QualityIssue::MissingImage);
    }

    let affiliate_url = raw.affiliate_url.as_deref().and_then(parse_absolute);
    match &affiliate_url {
        None => issues.push(QualityIssue::MissingAffiliate),
        Some(url) => {
            if !rule.matches_domain(url) {
                issues.push(QualityIssue::AffiliateDomainMismatch);
            }
            if !rule.has_tracking(url) {
                issues.push(QualityIssue::MissingTrackingParameter);
            }
        }
    }

    Assessment {
        title,
        price,
        image_url,
        affiliate_url,
        issues,
    }
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn parse_absolute(text: &str) -> Option<Url> {
    Url::parse(text.trim())
        .ok()
        .filter(|url| matches!(url.scheme(), "http" | "https") && url.host_str().is_some())
}

/// One validator per site run; it owns the run's slug namespace.
#[derive(Debug)]
pub struct Validator {
    settings: ValidationSettings,
    slugs: SlugRegistry,
}

impl Validator {
    pub fn new(settings: ValidationSettings) -> Self {
        Self {
            settings,
            slugs: SlugRegistry::new(settings.slug_max_length),
        }
    }

    pub fn settings(&self) -> ValidationSettings {
        self.settings
    }

    /// Accept or reject `raw`. Accepted products get a slug unique within this run.
    pub fn validate(&mut self, raw: RawCandidate, rule: &AffiliateRule) -> ValidationOutcome {
        let assessment = assess(&raw, rule);
        let score = assessment.score();
        let blocked = assessment.issues.iter().any(|issue| issue.is_blocking());

        if score < self.settings.quality_threshold || blocked {
            tracing::debug!(
                "Rejected candidate from {} (score {:.2}): {:?}",
                raw.source_url,
                score,
                assessment.issues
            );
            return ValidationOutcome::Rejected(Rejection {
                score,
                issues: assessment.issues,
                title: assessment.title,
                source_url: raw.source_url,
            });
        }

        let (Some(title), Some(price), Some(image_url), Some(affiliate_url)) = (
            assessment.title,
            assessment.price,
            assessment.image_url,
            assessment.affiliate_url,
        ) else {
            // unreachable while every missing field is a blocking issue
            return ValidationOutcome::Rejected(Rejection {
                score,
                issues: assessment.issues,
                title: None,
                source_url: raw.source_url,
            });
        };

        let base = derive_slug(&title, &raw.category, self.settings.slug_max_length);
        let slug = self.slugs.claim(&base);

        ValidationOutcome::Accepted(ValidatedProduct {
            title,
            price,
            image_url,
            affiliate_url,
            platform: raw.platform,
            category: raw.category,
            extracted_at: raw.extracted_at,
            quality_score: score,
            slug,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use regex::Regex;
    use rstest::rstest;

    fn rule() -> AffiliateRule {
        AffiliateRule::new(Regex::new(r"(^|\.)shop\.example$").unwrap(), "tag")
    }

    fn complete(title: &str) -> RawCandidate {
        RawCandidate::new("a", "Home Office", "https://shop.example/list")
            .with_title(title)
            .with_price("$19.99")
            .with_image("https://img.shop.example/1.jpg")
            .with_affiliate("https://shop.example/p/1?tag=site-20")
    }

    fn accepted(outcome: ValidationOutcome) -> ValidatedProduct {
        match outcome {
            ValidationOutcome::Accepted(product) => product,
            ValidationOutcome::Rejected(rejection) => panic!("unexpected rejection: {rejection:?}"),
        }
    }

    #[test]
    fn test_complete_candidate_scores_one() {
        let mut validator = Validator::new(ValidationSettings::default());
        let product = accepted(validator.validate(complete("Ergonomic   Desk Chair"), &rule()));
        assert!((product.quality_score - 1.0).abs() < f64::EPSILON);
        assert_eq!(product.title, "Ergonomic Desk Chair");
        assert_eq!(product.slug, "ergonomic-desk-chair");
    }

    #[rstest]
    #[case::no_affiliate(complete("Desk Lamp").with_affiliate(""), QualityIssue::MissingAffiliate)]
    #[case::wrong_domain(complete("Desk Lamp").with_affiliate("https://evil.example/p?tag=x"), QualityIssue::AffiliateDomainMismatch)]
    #[case::no_tracking(complete("Desk Lamp").with_affiliate("https://shop.example/p/1"), QualityIssue::MissingTrackingParameter)]
    #[case::no_price(RawCandidate { price_text: None, ..complete("Desk Lamp") }, QualityIssue::MissingPrice)]
    #[case::price_without_digits(complete("Desk Lamp").with_price("See price in cart"), QualityIssue::UnparseablePrice)]
    #[case::relative_image(complete("Desk Lamp").with_image("/img/1.jpg"), QualityIssue::MissingImage)]
    #[case::blank_title(complete("   "), QualityIssue::MissingTitle)]
    fn test_single_defect_is_rejected(#[case] raw: RawCandidate, #[case] expected: QualityIssue) {
        let mut validator = Validator::new(ValidationSettings::default());
        match validator.validate(raw, &rule()) {
            ValidationOutcome::Rejected(rejection) => {
                assert_eq!(rejection.issues, vec![expected]);
                assert!(rejection.score < 0.7);
            }
            ValidationOutcome::Accepted(product) => panic!("accepted {product:?}"),
        }
    }

    #[test]
    fn test_short_title_is_only_penalised() {
        let mut validator = Validator::new(ValidationSettings::default());
        let product = accepted(validator.validate(complete("TV"), &rule()));
        assert!((product.quality_score - 0.9).abs() < 1e-9);
    }

    #[test]
    fn test_missing_affiliate_skips_affiliate_subchecks() {
        let raw = RawCandidate {
            affiliate_url: None,
            ..complete("Desk Lamp")
        };
        assert!((quality_score(&raw, &rule()) - 0.6).abs() < 1e-9);
    }

    #[test]
    fn test_score_is_clamped_at_zero() {
        let raw = RawCandidate::new("a", "misc", "https://shop.example/list");
        assert_eq!(quality_score(&raw, &rule()), 0.0);
    }

    #[test]
    fn test_colliding_titles_get_numeric_suffix() {
        let mut validator = Validator::new(ValidationSettings::default());
        let first = accepted(validator.validate(complete("USB-C Hub!"), &rule()));
        let second = accepted(validator.validate(complete("USB C Hub"), &rule()));
        assert_eq!(first.slug, "usb-c-hub");
        assert_eq!(second.slug, "usb-c-hub-2");
    }

    #[test]
    fn test_slugs_are_reproducible_across_runs() {
        let run = || {
            let mut validator = Validator::new(ValidationSettings::default());
            ["Desk Lamp", "Desk Lamp", "Monitor Arm"]
                .into_iter()
                .map(|title| accepted(validator.validate(complete(title), &rule())).slug)
                .collect::<Vec<_>>()
        };
        assert_eq!(run(), run());
    }

    #[test]
    fn test_price_formatting_is_preserved() {
        let mut validator = Validator::new(ValidationSettings::default());
        let product = accepted(validator.validate(complete("Desk Lamp").with_price("  ¥1,980 \n(税込)"), &rule()));
        assert_eq!(product.price, "¥1,980 (税込)");
    }
}
