//! Affiliate product ingestion pipeline
//!
//! Turns per-site configuration into a validated, published product list
//! while tolerating partial upstream failure. A broken or empty output never
//! replaces the last-known-good product set.

pub mod application;
pub mod domain;
pub mod error;
pub mod infrastructure;

pub use application::{IngestService, Orchestrator, RunContext};
pub use domain::{ProductCard, RunOutcome, RunResult, SiteConfig};
pub use error::{ConfigError, ExtractError, FetchError, ParseError, PublishError, StateError};
