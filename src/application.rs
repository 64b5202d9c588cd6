//! Application layer: the ingestion pipeline
//!
//! Extractor → Validator → Image Processor → merge with last-known-good
//! state → Output Writer, driven per site by the [`Orchestrator`].

pub mod image_processor;
pub mod ingest_service;
pub mod orchestrator;
pub mod run_context;
pub mod state_merge;
pub mod validator;

pub use image_processor::{ImageProcessor, ImageSettings};
pub use ingest_service::IngestService;
pub use orchestrator::Orchestrator;
pub use run_context::{PipelineSettings, RunContext};
pub use state_merge::{MergePlan, plan_merge};
pub use validator::{QualityIssue, Rejection, ValidationOutcome, ValidationSettings, Validator};
