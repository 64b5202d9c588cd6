//! 재시도 관리자 - bounded retries with exponential backoff
//!
//! Retries are an explicit loop around one extractor call: the classifier
//! decides whether an error is worth another attempt, the policy decides how
//! long to wait. Cancellation interrupts both the backoff sleep and the call.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{ExtractError, FetchError};

/// 재시도 정책
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the initial attempt
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
            max_delay: max_delay.max(base_delay),
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// 지수 백오프: `base * 2^(retry - 1)` capped at `max_delay`, plus up to 25% jitter
    /// (still capped).
    pub fn backoff_for(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1).min(20);
        let exponential = self.base_delay.saturating_mul(1u32 << exponent);
        let capped = exponential.min(self.max_delay);
        let jitter_ceiling = u64::try_from(capped.as_millis() / 4).unwrap_or(0);
        let jitter = if jitter_ceiling == 0 {
            Duration::ZERO
        } else {
            Duration::from_millis(fastrand::u64(0..=jitter_ceiling))
        };
        (capped + jitter).min(self.max_delay)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        use crate::infrastructure::config::defaults;
        Self::new(
            defaults::MAX_RETRIES,
            Duration::from_millis(defaults::BACKOFF_BASE_MS),
            Duration::from_millis(defaults::BACKOFF_MAX_MS),
        )
    }
}

impl From<&crate::infrastructure::config::ScrapingConfig> for RetryPolicy {
    fn from(scraping: &crate::infrastructure::config::ScrapingConfig) -> Self {
        Self::new(
            scraping.max_retries,
            Duration::from_millis(scraping.backoff_base_ms),
            Duration::from_millis(scraping.backoff_max_ms),
        )
    }
}

/// 실패 분류기 트레이트
pub trait FailureClassifier: Send + Sync {
    fn should_retry(&self, error: &ExtractError, attempt: u32) -> bool;
}

/// 표준 실패 분류기: transient fetch errors only, parse errors never.
#[derive(Debug, Default)]
pub struct StandardFailureClassifier;

impl FailureClassifier for StandardFailureClassifier {
    fn should_retry(&self, error: &ExtractError, _attempt: u32) -> bool {
        error.is_retryable()
    }
}

/// Final result of a retried operation and how many attempts it took.
#[derive(Debug)]
pub struct RetryOutcome<T> {
    pub result: Result<T, ExtractError>,
    pub attempts: u32,
}

/// 재시도 관리자
#[derive(Clone)]
pub struct RetryManager {
    policy: RetryPolicy,
    failure_classifier: Arc<dyn FailureClassifier>,
}

impl RetryManager {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            failure_classifier: Arc::new(StandardFailureClassifier),
        }
    }

    pub fn with_classifier(policy: RetryPolicy, classifier: Arc<dyn FailureClassifier>) -> Self {
        Self {
            policy,
            failure_classifier: classifier,
        }
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Run `operation` until it succeeds, fails permanently, or the retry budget
    /// is spent. The closure receives the 1-based attempt number.
    pub async fn run<T, F, Fut>(&self, label: &str, cancel: &CancellationToken, mut operation: F) -> RetryOutcome<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, ExtractError>>,
    {
        let max_attempts = self.policy.max_attempts();
        let mut attempt = 1;

        loop {
            let result = operation(attempt).await;
            let error = match result {
                Ok(value) => {
                    if attempt > 1 {
                        info!("✅ {} succeeded on attempt {}", label, attempt);
                    }
                    return RetryOutcome {
                        result: Ok(value),
                        attempts: attempt,
                    };
                }
                Err(error) => error,
            };

            if error.is_cancelled() || !self.failure_classifier.should_retry(&error, attempt) {
                debug!("{} failed without retry: {}", label, error);
                return RetryOutcome {
                    result: Err(error),
                    attempts: attempt,
                };
            }
            if attempt >= max_attempts {
                warn!("❌ {} exceeded max retries ({}): {}", label, self.policy.max_retries, error);
                return RetryOutcome {
                    result: Err(error),
                    attempts: attempt,
                };
            }

            let backoff = self.policy.backoff_for(attempt);
            warn!(
                "🔄 {} attempt {}/{} failed: {} (retrying in {:?})",
                label, attempt, max_attempts, error, backoff
            );
            tokio::select! {
                () = tokio::time::sleep(backoff) => {}
                () = cancel.cancelled() => {
                    return RetryOutcome {
                        result: Err(FetchError::Cancelled { url: label.to_string() }.into()),
                        attempts: attempt,
                    };
                }
            }
            attempt += 1;
        }
    }
}
