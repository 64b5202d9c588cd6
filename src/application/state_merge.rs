//! Last-known-good merge policy
//!
//! | fresh accepted | targets        | published              | persisted |
//! |----------------|----------------|------------------------|-----------|
//! | ≥ 1            | all succeeded  | fresh                  | yes       |
//! | ≥ 1            | some failed    | fresh (partial)        | yes       |
//! | 0              | any            | previous, else nothing | counter   |
//! | any            | all failed     | previous, else nothing | counter   |
//!
//! "counter" persists the previous products and timestamp unchanged with
//! `consecutive_failures` bumped by one.

use chrono::{DateTime, Utc};

use crate::domain::{ProductCard, ProductSource, RunStatistics, SiteRunState};

#[derive(Debug, Clone, PartialEq)]
pub struct MergePlan {
    pub products: Vec<ProductCard>,
    pub source: ProductSource,
    /// State to commit once the output is written. `None` leaves the stored file alone.
    pub state_to_persist: Option<SiteRunState>,
}

impl MergePlan {
    pub fn is_fresh(&self) -> bool {
        self.source == ProductSource::Fresh
    }
}

pub fn plan_merge(
    site_name: &str,
    previous: Option<SiteRunState>,
    fresh: Vec<ProductCard>,
    statistics: &RunStatistics,
    now: DateTime<Utc>,
) -> MergePlan {
    if fresh.is_empty() || statistics.all_targets_failed() {
        return match previous {
            Some(state) => MergePlan {
                state_to_persist: Some(state.with_failure_recorded()),
                products: state.products,
                source: ProductSource::LastKnownGood,
            },
            None => MergePlan {
                products: Vec::new(),
                source: ProductSource::Empty,
                state_to_persist: None,
            },
        };
    }

    let source = if statistics.targets_failed == 0 {
        ProductSource::Fresh
    } else {
        ProductSource::Partial
    };

    MergePlan {
        state_to_persist: Some(SiteRunState {
            site_name: site_name.to_string(),
            products: fresh.clone(),
            last_success: now,
            statistics: statistics.clone(),
            consecutive_failures: 0,
        }),
        products: fresh,
        source,
    }
}
