//! Pipeline error taxonomy
//!
//! Every stage reports failures through one of the enums below. Validation
//! rejections are deliberately absent: a rejected candidate is a data outcome
//! (see `application::validator::ValidationOutcome`), not an error.

use std::path::PathBuf;
use thiserror::Error;

/// Malformed or missing configuration. Fatal for the run, raised before any I/O.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Required field '{field}' is missing or empty")]
    MissingField { field: String },

    #[error("Invalid value for '{field}': {reason}")]
    Invalid { field: String, reason: String },

    #[error("Invalid site name '{name}': only ASCII letters, digits, '-' and '_' are allowed")]
    InvalidSiteName { name: String },

    #[error("Target #{index} has an invalid URL '{url}': {reason}")]
    InvalidTargetUrl {
        index: usize,
        url: String,
        reason: String,
    },

    #[error("Target #{index} expected_count {value} is outside 1..=100")]
    ExpectedCountOutOfRange { index: usize, value: u32 },

    #[error("No extractor registered for platform '{platform}' (target #{index})")]
    UnknownPlatform { index: usize, platform: String },

    #[error("No affiliate tracking id configured for platform '{platform}'")]
    MissingCredential { platform: String },

    #[error("Site '{site}' already has a run in progress")]
    SiteBusy { site: String },

    #[error("Site configuration not found: {path}")]
    SiteNotFound { path: PathBuf },

    #[error("Failed to read site configuration {path}: {reason}")]
    Unreadable { path: PathBuf, reason: String },
}

impl ConfigError {
    pub fn missing(field: &str) -> Self {
        Self::MissingField {
            field: field.to_string(),
        }
    }

    pub fn invalid(field: &str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field: field.to_string(),
            reason: reason.into(),
        }
    }
}

/// Transient network failures during extraction or image retrieval.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    #[error("Request timed out: {url}")]
    Timeout { url: String },

    #[error("Network error for {url}: {message}")]
    Network { url: String, message: String },

    #[error("HTTP request failed with status {status}: {url}")]
    HttpStatus { status: u16, url: String },

    #[error("Blocked by upstream at {url}: {reason}")]
    Blocked { url: String, reason: String },

    #[error("Response from {url} exceeds {limit} bytes")]
    TooLarge { url: String, limit: usize },

    #[error("Response from {url} is not an image (content-type: {content_type})")]
    NotAnImage { url: String, content_type: String },

    #[error("Request cancelled: {url}")]
    Cancelled { url: String },
}

impl FetchError {
    pub fn network(url: &str, message: impl ToString) -> Self {
        Self::Network {
            url: url.to_string(),
            message: message.to_string(),
        }
    }

    /// Whether another attempt could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Timeout { .. } | Self::Network { .. } | Self::Blocked { .. } => true,
            Self::HttpStatus { status, .. } => *status == 429 || *status >= 500,
            Self::TooLarge { .. } | Self::NotAnImage { .. } | Self::Cancelled { .. } => false,
        }
    }
}

/// The fetched page did not contain any recognizable listing structure.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("No product containers found on {url} (tried: {})", tried_selectors.join(" | "))]
    NoContainers {
        url: String,
        tried_selectors: Vec<String>,
    },

    #[error("Invalid CSS selector for {field}: {selector} - {reason}")]
    InvalidSelector {
        field: String,
        selector: String,
        reason: String,
    },
}

impl ParseError {
    pub fn no_containers(url: &str, tried_selectors: Vec<String>) -> Self {
        Self::NoContainers {
            url: url.to_string(),
            tried_selectors,
        }
    }
}

/// What an extractor call can fail with.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExtractError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Parse(#[from] ParseError),
}

impl ExtractError {
    /// Only fetch failures are retried; page structure is assumed stable short-term.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Fetch(err) => err.is_retryable(),
            Self::Parse(_) => false,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Fetch(FetchError::Cancelled { .. }))
    }
}

/// Image republishing or output writing failed.
#[derive(Error, Debug)]
pub enum PublishError {
    #[error("I/O error writing {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to serialize published output: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Invalid publish destination '{destination}': {reason}")]
    InvalidDestination { destination: String, reason: String },

    #[error("Image fetch failed: {0}")]
    ImageFetch(#[from] FetchError),

    #[error("Background write task failed: {0}")]
    Task(String),
}

impl PublishError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Persisted site state could not be read or written.
#[derive(Error, Debug)]
pub enum StateError {
    #[error("State I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to serialize state: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("No persisted state for site '{site}'")]
    NotFound { site: String },

    #[error("State file {path} is unreadable: {reason}")]
    Corrupted { path: PathBuf, reason: String },

    /// Bad site name or a site that is already running
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Background state task failed: {0}")]
    Task(String),
}

impl StateError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fetch_error_retry_classification() {
        assert!(FetchError::Timeout { url: "u".into() }.is_retryable());
        assert!(FetchError::network("u", "reset").is_retryable());
        assert!(FetchError::HttpStatus { status: 503, url: "u".into() }.is_retryable());
        assert!(FetchError::HttpStatus { status: 429, url: "u".into() }.is_retryable());
        assert!(!FetchError::HttpStatus { status: 404, url: "u".into() }.is_retryable());
        assert!(!FetchError::Cancelled { url: "u".into() }.is_retryable());
    }

    #[test]
    fn test_parse_errors_are_never_retried() {
        let err: ExtractError = ParseError::no_containers("https://shop.example", vec![".item".into()]).into();
        assert!(!err.is_retryable());
        assert!(err.to_string().contains(".item"));
    }
}
