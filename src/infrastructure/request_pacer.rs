//! Minimum jittered delay between consecutive page requests
//!
//! Upstream blocking is the dominant real-world failure mode, so every page
//! fetch of a site waits on the pacer first. The HTTP client's rate limiter
//! is a separate, global cap.

use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacingSettings {
    pub min_delay: Duration,
    pub max_delay: Duration,
}

impl PacingSettings {
    pub fn new(min_delay: Duration, max_delay: Duration) -> Self {
        Self {
            min_delay,
            max_delay: max_delay.max(min_delay),
        }
    }

    pub fn disabled() -> Self {
        Self::new(Duration::ZERO, Duration::ZERO)
    }

    /// Uniformly jittered delay in `[min_delay, max_delay]`.
    pub fn jittered_delay(&self) -> Duration {
        let min = u64::try_from(self.min_delay.as_millis()).unwrap_or(u64::MAX);
        let max = u64::try_from(self.max_delay.as_millis()).unwrap_or(u64::MAX);
        if max <= min {
            return self.min_delay;
        }
        Duration::from_millis(fastrand::u64(min..=max))
    }
}

impl From<&crate::infrastructure::config::ScrapingConfig> for PacingSettings {
    fn from(scraping: &crate::infrastructure::config::ScrapingConfig) -> Self {
        Self::new(
            Duration::from_millis(scraping.min_delay_ms),
            Duration::from_millis(scraping.max_delay_ms),
        )
    }
}

/// One pacer per site run. The first request goes out immediately.
#[derive(Debug)]
pub struct RequestPacer {
    settings: PacingSettings,
    last_request: Mutex<Option<Instant>>,
}

impl RequestPacer {
    pub fn new(settings: PacingSettings) -> Self {
        Self {
            settings,
            last_request: Mutex::new(None),
        }
    }

    pub fn settings(&self) -> PacingSettings {
        self.settings
    }

    /// Wait until the jittered delay since the previous request has elapsed.
    /// Returns `false` if cancelled while waiting.
    pub async fn pace(&self, cancel: &CancellationToken) -> bool {
        let mut last = self.last_request.lock().await;
        if let Some(previous) = *last {
            let deadline = previous + self.settings.jittered_delay();
            if deadline > Instant::now() {
                tracing::debug!("⏳ Pacing next request for {:?}", deadline - Instant::now());
                tokio::select! {
                    () = tokio::time::sleep_until(deadline) => {}
                    () = cancel.cancelled() => return false,
                }
            }
        }
        *last = Some(Instant::now());
        true
    }
}
