//! Product records as they move through the pipeline
//!
//! `RawCandidate` → `ValidatedProduct` → `ProductCard` is one-way. Only
//! `ProductCard` leaves the process.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;

/// Extractor output before validation. Any field may be missing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawCandidate {
    pub title: Option<String>,
    pub price_text: Option<String>,
    pub image_url: Option<String>,
    pub affiliate_url: Option<String>,
    pub platform: String,
    pub category: String,
    /// Page the candidate was extracted from
    pub source_url: String,
    pub extracted_at: DateTime<Utc>,
}

impl RawCandidate {
    pub fn new(platform: &str, category: &str, source_url: &str) -> Self {
        Self {
            title: None,
            price_text: None,
            image_url: None,
            affiliate_url: None,
            platform: platform.to_string(),
            category: category.to_string(),
            source_url: source_url.to_string(),
            extracted_at: Utc::now(),
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_price(mut self, price: impl Into<String>) -> Self {
        self.price_text = Some(price.into());
        self
    }

    pub fn with_image(mut self, image_url: impl Into<String>) -> Self {
        self.image_url = Some(image_url.into());
        self
    }

    pub fn with_affiliate(mut self, affiliate_url: impl Into<String>) -> Self {
        self.affiliate_url = Some(affiliate_url.into());
        self
    }
}

/// A candidate that passed the quality gate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidatedProduct {
    pub title: String,
    /// Original formatting preserved, whitespace normalized
    pub price: String,
    pub image_url: Url,
    pub affiliate_url: Url,
    pub platform: String,
    pub category: String,
    pub extracted_at: DateTime<Utc>,
    pub quality_score: f64,
    pub slug: String,
}

/// Where the product image ended up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishedImage {
    pub url: Url,
    pub republished: bool,
}

impl PublishedImage {
    pub fn republished(url: Url) -> Self {
        Self {
            url,
            republished: true,
        }
    }

    /// Keep the source image when republishing was not possible.
    pub fn fallback(source: Url) -> Self {
        Self {
            url: source,
            republished: false,
        }
    }
}

/// The externally consumed record. Its shape is a contract with downstream
/// consumers and must not change between runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductCard {
    pub title: String,
    pub price: String,
    pub affiliate_url: Url,
    pub image_url: Url,
    pub slug: String,
}

impl ProductCard {
    pub fn assemble(product: ValidatedProduct, image: PublishedImage) -> Self {
        Self {
            title: product.title,
            price: product.price,
            affiliate_url: product.affiliate_url,
            image_url: image.url,
            slug: product.slug,
        }
    }
}
