//! Published product document

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

use crate::domain::{ProductCard, ProductSource, RunOutcome, RunStatistics};
use crate::error::PublishError;
use crate::infrastructure::atomic_file::write_atomic;

/// Document consumed by the site generator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublishedOutput {
    pub site_name: String,
    pub generated_at: DateTime<Utc>,
    pub outcome: RunOutcome,
    pub source: ProductSource,
    pub total_products: usize,
    pub products: Vec<ProductCard>,
    pub statistics: RunStatistics,
}

impl PublishedOutput {
    pub fn new(
        site_name: &str,
        outcome: RunOutcome,
        source: ProductSource,
        products: Vec<ProductCard>,
        statistics: RunStatistics,
    ) -> Self {
        Self {
            site_name: site_name.to_string(),
            generated_at: Utc::now(),
            outcome,
            source,
            total_products: products.len(),
            products,
            statistics,
        }
    }
}

#[async_trait]
pub trait OutputWriter: Send + Sync {
    /// Replace the document at `path`. Readers never observe a partial file.
    async fn write(&self, path: &Path, output: &PublishedOutput) -> Result<(), PublishError>;
}

/// Pretty-printed JSON, written through a temp file and renamed into place.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonOutputWriter;

#[async_trait]
impl OutputWriter for JsonOutputWriter {
    async fn write(&self, path: &Path, output: &PublishedOutput) -> Result<(), PublishError> {
        let bytes = serde_json::to_vec_pretty(output)?;
        let target: PathBuf = path.to_path_buf();
        let write_path = target.clone();

        tokio::task::spawn_blocking(move || write_atomic(&write_path, &bytes))
            .await
            .map_err(|e| PublishError::Task(e.to_string()))?
            .map_err(|e| PublishError::io(&target, e))?;

        info!(
            "📝 Wrote {} products for {} to {:?}",
            output.total_products, output.site_name, target
        );
        Ok(())
    }
}
