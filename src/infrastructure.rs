//! Infrastructure layer: HTTP, extraction, storage and process plumbing
//!
//! Everything here talks to the outside world (network, filesystem,
//! environment). The application layer composes these behind traits so
//! tests can substitute fakes.

pub mod atomic_file;
pub mod config;
pub mod extraction;
pub mod http_client;
pub mod image_store;
pub mod logging;
pub mod output_writer;
pub mod request_pacer;
pub mod retry_manager;
pub mod state_store;

pub use config::{AppConfig, ConfigManager};
pub use extraction::{ExtractionContext, Extractor, ExtractorRegistry};
pub use http_client::{FetchedImage, FetchedPage, HttpClient, HttpClientConfig, PageFetcher};
pub use image_store::{ImageStore, ImageStoreFactory, LocalImageStore, LocalImageStoreFactory};
pub use logging::{init_logging, init_logging_with_config};
pub use output_writer::{JsonOutputWriter, OutputWriter, PublishedOutput};
pub use request_pacer::{PacingSettings, RequestPacer};
pub use retry_manager::{RetryManager, RetryOutcome, RetryPolicy};
pub use state_store::{SiteLease, SiteStatusSummary, StateHealth, StateSnapshot, StateStore};
