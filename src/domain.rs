//! Domain module - pipeline records, site configuration and run state
//!
//! Pure data types and their invariants. Nothing in here performs I/O.

pub mod affiliate;
pub mod product;
pub mod run_state;
pub mod site;
pub mod slug;

pub use affiliate::{AffiliateCredentials, AffiliateRule};
pub use product::{ProductCard, PublishedImage, RawCandidate, ValidatedProduct};
pub use run_state::{
    PhaseTracker, ProductSource, RunOutcome, RunPhase, RunResult, RunStatistics, SiteRunState,
};
pub use site::{ImageStorageConfig, ScrapeTarget, SelectorOverrides, SiteConfig, TargetConfig};
pub use slug::{SlugRegistry, derive_slug, slugify};
