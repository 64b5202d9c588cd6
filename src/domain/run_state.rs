//! Run lifecycle, statistics and persisted per-site state

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use uuid::Uuid;

use super::product::ProductCard;

/// Stage of a single site run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunPhase {
    Pending,
    Extracting,
    Validating,
    ImageProcessing,
    Merging,
    Writing,
    Complete,
    Degraded,
    Failed,
}

impl RunPhase {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Complete | Self::Degraded | Self::Failed)
    }

    /// Allowed edges of the run state machine.
    ///
    /// `Merging → Degraded` covers the case where nothing can be published and
    /// writing is skipped. Any non-terminal phase may fail.
    pub fn can_transition_to(self, next: Self) -> bool {
        use RunPhase::{
            Complete, Degraded, Extracting, Failed, ImageProcessing, Merging, Pending, Validating,
            Writing,
        };
        match (self, next) {
            (from, Failed) => !from.is_terminal(),
            (Pending, Extracting)
            | (Extracting, Validating)
            | (Validating, ImageProcessing)
            | (ImageProcessing, Merging)
            | (Merging, Writing | Degraded)
            | (Writing, Complete | Degraded) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for RunPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::Pending => "pending",
            Self::Extracting => "extracting",
            Self::Validating => "validating",
            Self::ImageProcessing => "image processing",
            Self::Merging => "merging",
            Self::Writing => "writing",
            Self::Complete => "complete",
            Self::Degraded => "degraded",
            Self::Failed => "failed",
        };
        f.write_str(label)
    }
}

/// Records visited phases and rejects illegal transitions.
#[derive(Debug, Clone)]
pub struct PhaseTracker {
    history: Vec<RunPhase>,
}

impl PhaseTracker {
    pub fn new() -> Self {
        Self {
            history: vec![RunPhase::Pending],
        }
    }

    pub fn current(&self) -> RunPhase {
        self.history.last().copied().unwrap_or(RunPhase::Pending)
    }

    /// Move to `next`. Illegal transitions are ignored and reported as `false`.
    pub fn advance(&mut self, next: RunPhase) -> bool {
        let current = self.current();
        if current.can_transition_to(next) {
            tracing::debug!("Run phase {} → {}", current, next);
            self.history.push(next);
            true
        } else {
            tracing::warn!("Ignoring illegal run phase transition {} → {}", current, next);
            false
        }
    }

    pub fn history(&self) -> &[RunPhase] {
        &self.history
    }

    pub fn into_history(self) -> Vec<RunPhase> {
        self.history
    }
}

impl Default for PhaseTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// Result code handed back to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    Success,
    /// Ran, but some or all of the output is fallback data
    Degraded,
    /// Could not run at all
    Failed,
}

impl RunOutcome {
    pub fn exit_code(self) -> u8 {
        match self {
            Self::Success => 0,
            Self::Failed => 1,
            Self::Degraded => 2,
        }
    }
}

/// Provenance of the product list a run published.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProductSource {
    /// Every target succeeded
    Fresh,
    /// Some targets failed, the rest produced accepted products
    Partial,
    /// Previous state republished
    LastKnownGood,
    /// Nothing to publish
    Empty,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunStatistics {
    pub targets_attempted: u32,
    pub targets_succeeded: u32,
    pub targets_failed: u32,
    pub candidates_extracted: u32,
    pub products_accepted: u32,
    pub products_rejected: u32,
    pub images_republished: u32,
    pub images_fallback: u32,
    pub average_quality_score: f64,
    #[serde(default)]
    pub rejection_reasons: BTreeMap<String, u32>,
}

impl RunStatistics {
    pub fn record_rejection_reason(&mut self, reason: &str) {
        *self.rejection_reasons.entry(reason.to_string()).or_insert(0) += 1;
    }

    pub fn all_targets_failed(&self) -> bool {
        self.targets_attempted > 0 && self.targets_failed == self.targets_attempted
    }
}

/// Last successfully published product set for a site.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SiteRunState {
    pub site_name: String,
    pub products: Vec<ProductCard>,
    pub last_success: DateTime<Utc>,
    pub statistics: RunStatistics,
    /// Degraded runs since `last_success`. Reset by every fresh or partial commit.
    #[serde(default)]
    pub consecutive_failures: u32,
}

impl SiteRunState {
    /// Same products and timestamp, one more consecutive failure.
    pub fn with_failure_recorded(&self) -> Self {
        Self {
            consecutive_failures: self.consecutive_failures.saturating_add(1),
            ..self.clone()
        }
    }
}

/// What `run_site` reports back.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunResult {
    pub run_id: Uuid,
    pub site_name: String,
    pub outcome: RunOutcome,
    pub source: Option<ProductSource>,
    pub phases: Vec<RunPhase>,
    pub statistics: RunStatistics,
    pub products_published: usize,
    pub output_path: Option<PathBuf>,
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl RunResult {
    pub fn final_phase(&self) -> Option<RunPhase> {
        self.phases.last().copied()
    }

    pub fn used_fallback(&self) -> bool {
        matches!(self.source, Some(ProductSource::LastKnownGood))
    }
}
