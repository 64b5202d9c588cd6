//! Image acquisition and republishing
//!
//! Every failure here degrades to the source image URL. A product is never
//! dropped because of its image.

use futures::stream::{self, StreamExt};
use std::sync::Arc;
use std::time::Duration;

use crate::domain::slug::DEFAULT_MAX_SLUG_LENGTH;
use crate::domain::{PublishedImage, ValidatedProduct, slugify};
use crate::error::PublishError;
use crate::infrastructure::config::{ImageConfig, defaults};
use crate::infrastructure::http_client::PageFetcher;
use crate::infrastructure::image_store::ImageStore;

const NAME_HASH_HEX_LEN: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageSettings {
    pub enabled: bool,
    pub max_bytes: usize,
    pub timeout: Duration,
    pub concurrency: usize,
}

impl Default for ImageSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            max_bytes: defaults::IMAGE_MAX_BYTES,
            timeout: Duration::from_secs(defaults::IMAGE_TIMEOUT_SECONDS),
            concurrency: defaults::IMAGE_CONCURRENCY,
        }
    }
}

impl From<&ImageConfig> for ImageSettings {
    fn from(config: &ImageConfig) -> Self {
        Self {
            enabled: config.enabled,
            max_bytes: config.max_bytes,
            timeout: Duration::from_secs(config.timeout_seconds),
            concurrency: config.concurrency.max(1),
        }
    }
}

/// Stable destination name for a product image.
///
/// `<folder>/<category>/<slug>-<hash>.<ext>`; the hash covers title and
/// category so renamed products do not overwrite each other's files.
pub fn destination_name(folder: &str, product: &ValidatedProduct, content_type: &str) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(product.title.as_bytes());
    hasher.update(b"\0");
    hasher.update(product.category.as_bytes());
    let hash = hasher.finalize().to_hex();

    let category = match slugify(&product.category, DEFAULT_MAX_SLUG_LENGTH) {
        slug if slug.is_empty() => "uncategorized".to_string(),
        slug => slug,
    };
    let folder = folder.trim_matches('/');
    let file = format!(
        "{}/{}-{}.{}",
        category,
        product.slug,
        &hash.as_str()[..NAME_HASH_HEX_LEN],
        extension_for(content_type)
    );
    if folder.is_empty() { file } else { format!("{folder}/{file}") }
}

fn extension_for(content_type: &str) -> &'static str {
    let mime = content_type.split(';').next().unwrap_or_default().trim();
    match mime {
        "image/png" => "png",
        "image/webp" => "webp",
        "image/gif" => "gif",
        "image/avif" => "avif",
        "image/svg+xml" => "svg",
        _ => "jpg",
    }
}

pub struct ImageProcessor {
    fetcher: Arc<dyn PageFetcher>,
    store: Arc<dyn ImageStore>,
    settings: ImageSettings,
    folder: String,
}

impl ImageProcessor {
    pub fn new(
        fetcher: Arc<dyn PageFetcher>,
        store: Arc<dyn ImageStore>,
        settings: ImageSettings,
        folder: &str,
    ) -> Self {
        Self {
            fetcher,
            store,
            settings,
            folder: folder.to_string(),
        }
    }

    /// Republish the product image, or fall back to its source URL.
    pub async fn process(&self, product: &ValidatedProduct) -> PublishedImage {
        if !self.settings.enabled {
            return PublishedImage::fallback(product.image_url.clone());
        }

        match tokio::time::timeout(self.settings.timeout, self.republish(product)).await {
            Ok(Ok(image)) => image,
            Ok(Err(e)) => {
                tracing::warn!("🖼️ Keeping source image for {}: {}", product.slug, e);
                PublishedImage::fallback(product.image_url.clone())
            }
            Err(_) => {
                tracing::warn!(
                    "⏳ Image step for {} exceeded {:?}, keeping source image",
                    product.slug,
                    self.settings.timeout
                );
                PublishedImage::fallback(product.image_url.clone())
            }
        }
    }

    /// Process all products with bounded concurrency. Output order matches input order.
    pub async fn process_all(&self, products: &[ValidatedProduct]) -> Vec<PublishedImage> {
        let pending: Vec<_> = products.iter().map(|product| self.process(product)).collect();
        stream::iter(pending)
            .buffered(self.settings.concurrency.max(1))
            .collect()
            .await
    }

    async fn republish(&self, product: &ValidatedProduct) -> Result<PublishedImage, PublishError> {
        let image = self
            .fetcher
            .fetch_image(&product.image_url, self.settings.max_bytes)
            .await?;
        let name = destination_name(&self.folder, product, &image.content_type);
        let url = self.store.store(&name, &image.data, &image.content_type).await?;
        Ok(PublishedImage::republished(url))
    }
}
