//! Storage for republished product images

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use url::Url;

use crate::domain::ImageStorageConfig;
use crate::error::{ConfigError, PublishError};
use crate::infrastructure::atomic_file::write_atomic;

#[async_trait]
pub trait ImageStore: Send + Sync {
    /// Store `data` under the relative `name` and return its public URL.
    async fn store(&self, name: &str, data: &[u8], content_type: &str) -> Result<Url, PublishError>;
}

/// Builds the image store for a site from its storage configuration.
pub trait ImageStoreFactory: Send + Sync {
    fn for_site(&self, storage: &ImageStorageConfig) -> Result<Arc<dyn ImageStore>, ConfigError>;
}

/// Files under a local directory that is served at `public_base_url`.
#[derive(Debug, Clone)]
pub struct LocalImageStore {
    root: PathBuf,
    public_base_url: Url,
}

impl LocalImageStore {
    pub fn new(root: impl Into<PathBuf>, public_base_url: &str) -> Result<Self, ConfigError> {
        let mut base = public_base_url.trim().to_string();
        if !base.ends_with('/') {
            base.push('/');
        }
        let public_base_url = Url::parse(&base)
            .map_err(|e| ConfigError::invalid("image_storage.public_base_url", e.to_string()))?;
        if !matches!(public_base_url.scheme(), "http" | "https") {
            return Err(ConfigError::invalid(
                "image_storage.public_base_url",
                "must be an http(s) URL",
            ));
        }
        Ok(Self {
            root: root.into(),
            public_base_url,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn checked_name<'a>(&self, name: &'a str) -> Result<&'a str, PublishError> {
        let invalid = name.is_empty()
            || name.starts_with('/')
            || name.split('/').any(|segment| segment.is_empty() || segment == "." || segment == "..");
        if invalid {
            return Err(PublishError::InvalidDestination {
                destination: name.to_string(),
                reason: "expected a relative path without '.' or '..' segments".to_string(),
            });
        }
        Ok(name)
    }
}

#[async_trait]
impl ImageStore for LocalImageStore {
    async fn store(&self, name: &str, data: &[u8], _content_type: &str) -> Result<Url, PublishError> {
        let name = self.checked_name(name)?;
        let public_url = self
            .public_base_url
            .join(name)
            .map_err(|e| PublishError::InvalidDestination {
                destination: name.to_string(),
                reason: e.to_string(),
            })?;

        let path = self.root.join(name);
        let bytes = data.to_vec();
        let target = path.clone();
        tokio::task::spawn_blocking(move || write_atomic(&target, &bytes))
            .await
            .map_err(|e| PublishError::Task(e.to_string()))?
            .map_err(|e| PublishError::io(&path, e))?;

        tracing::debug!("🖼️ Stored image {} → {}", path.display(), public_url);
        Ok(public_url)
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct LocalImageStoreFactory;

impl ImageStoreFactory for LocalImageStoreFactory {
    fn for_site(&self, storage: &ImageStorageConfig) -> Result<Arc<dyn ImageStore>, ConfigError> {
        Ok(Arc::new(LocalImageStore::new(
            storage.directory.clone(),
            &storage.public_base_url,
        )?))
    }
}
