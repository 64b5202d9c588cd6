//! Persisted last-known-good state per site
//!
//! Layout under the state directory:
//! - `<site>_state.json` current state, replaced atomically
//! - `<site>_state.json.corrupted` quarantined unreadable state
//! - `<site>.lock` advisory lock held by the running process
//!
//! Backups live in a separate directory as `<site>_state_<timestamp>.json`
//! plus combined `state_backup_<timestamp>.json` documents.
//!
//! Only the holder of a [`SiteLease`] may quarantine or replace a state file.
//! `status` and `backup` read without touching anything.

#![allow(clippy::uninlined_format_args)]

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fs::{File, TryLockError};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, info, warn};

use crate::domain::site::validate_site_name;
use crate::domain::{RunStatistics, SiteRunState};
use crate::error::{ConfigError, StateError};
use crate::infrastructure::atomic_file::write_atomic;

const STATE_SUFFIX: &str = "_state.json";
const LOCK_SUFFIX: &str = ".lock";
const BACKUP_TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

/// Consecutive degraded runs at which a site is reported critical.
pub const CRITICAL_FAILURE_COUNT: u32 = 3;

/// Health of a site's persisted state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StateHealth {
    Healthy,
    /// Recent degraded runs, fewer than [`CRITICAL_FAILURE_COUNT`]
    Warning,
    Stale,
    Critical,
    Missing,
    Corrupted,
}

/// Summary returned by `status`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SiteStatusSummary {
    pub site_name: String,
    pub has_state: bool,
    pub health: StateHealth,
    pub last_success: Option<DateTime<Utc>>,
    pub age_hours: Option<f64>,
    pub product_count: usize,
    pub consecutive_failures: u32,
    pub last_statistics: Option<RunStatistics>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// A copy of the persisted state taken by `backup`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateSnapshot {
    pub site_name: String,
    pub path: PathBuf,
    pub taken_at: DateTime<Utc>,
    pub state: SiteRunState,
}

#[derive(Debug, Serialize)]
struct CombinedBackup<'a> {
    backup_timestamp: DateTime<Utc>,
    total_sites: usize,
    states: BTreeMap<&'a str, &'a SiteRunState>,
}

/// What a read found on disk.
enum StoredState {
    Missing,
    Loaded(SiteRunState),
    Corrupted(String),
}

/// Exclusive right to run a site, across tasks and processes. Released on drop.
#[derive(Debug)]
pub struct SiteLease {
    site_name: String,
    _guard: OwnedMutexGuard<()>,
    _file: File,
}

impl SiteLease {
    pub fn site_name(&self) -> &str {
        &self.site_name
    }
}

pub struct StateStore {
    state_dir: PathBuf,
    backup_dir: PathBuf,
    stale_after: ChronoDuration,
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl StateStore {
    /// `stale_after_hours` applies when a site's refresh interval is unknown.
    pub fn new(state_dir: impl Into<PathBuf>, backup_dir: impl Into<PathBuf>, stale_after_hours: u32) -> Self {
        Self {
            state_dir: state_dir.into(),
            backup_dir: backup_dir.into(),
            stale_after: ChronoDuration::hours(i64::from(stale_after_hours)),
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn state_dir(&self) -> &Path {
        &self.state_dir
    }

    pub fn backup_dir(&self) -> &Path {
        &self.backup_dir
    }

    pub fn state_path(&self, site: &str) -> PathBuf {
        self.state_dir.join(format!("{}{}", site, STATE_SUFFIX))
    }

    pub fn lock_path(&self, site: &str) -> PathBuf {
        self.state_dir.join(format!("{}{}", site, LOCK_SUFFIX))
    }

    fn checked_state_path(&self, site: &str) -> Result<PathBuf, StateError> {
        validate_site_name(site)?;
        Ok(self.state_path(site))
    }

    /// Claim the single-writer lease for `site`. Fails fast with
    /// `ConfigError::SiteBusy` if another task or process holds it.
    pub fn lock_site(&self, site: &str) -> Result<SiteLease, StateError> {
        validate_site_name(site)?;
        let busy = || ConfigError::SiteBusy {
            site: site.to_string(),
        };

        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(locks.entry(site.to_string()).or_default())
        };
        let guard = lock.try_lock_owned().map_err(|_| busy())?;

        std::fs::create_dir_all(&self.state_dir).map_err(|e| StateError::io(&self.state_dir, e))?;
        let path = self.lock_path(site);
        let file = File::options()
            .create(true)
            .write(true)
            .truncate(false)
            .open(&path)
            .map_err(|e| StateError::io(&path, e))?;
        match file.try_lock() {
            Ok(()) => {}
            Err(TryLockError::WouldBlock) => {
                warn!("🔒 {:?} is held by another process", path);
                return Err(busy().into());
            }
            Err(TryLockError::Error(e)) => return Err(StateError::io(&path, e)),
        }

        debug!("Acquired lease for {}", site);
        Ok(SiteLease {
            site_name: site.to_string(),
            _guard: guard,
            _file: file,
        })
    }

    /// Load the leased site's state. An unparseable file is moved aside to
    /// `*.corrupted` and reported as absent.
    pub async fn load(&self, lease: &SiteLease) -> Result<Option<SiteRunState>, StateError> {
        let path = self.checked_state_path(lease.site_name())?;
        match read_state(&path).await? {
            StoredState::Missing => Ok(None),
            StoredState::Loaded(state) => Ok(Some(state)),
            StoredState::Corrupted(reason) => {
                let quarantine = path.with_extension("json.corrupted");
                warn!("⚠️  State file {:?} is unreadable: {}", path, reason);
                match tokio::fs::rename(&path, &quarantine).await {
                    Ok(()) => info!("Moved corrupted state to {:?}", quarantine),
                    Err(e) => warn!("Failed to quarantine corrupted state {:?}: {}", path, e),
                }
                Ok(None)
            }
        }
    }

    /// Read-only view of the persisted state. A corrupt file is an error and
    /// stays where it is.
    pub async fn peek(&self, site: &str) -> Result<Option<SiteRunState>, StateError> {
        let path = self.checked_state_path(site)?;
        match read_state(&path).await? {
            StoredState::Missing => Ok(None),
            StoredState::Loaded(state) => Ok(Some(state)),
            StoredState::Corrupted(reason) => Err(StateError::Corrupted { path, reason }),
        }
    }

    /// Atomically replace the site's state.
    pub async fn commit(&self, state: &SiteRunState) -> Result<(), StateError> {
        let path = self.checked_state_path(&state.site_name)?;
        let bytes = serde_json::to_vec_pretty(state)?;
        write_blocking(path.clone(), bytes).await?;
        info!(
            "💾 Persisted state for {} ({} products, {} consecutive failures)",
            state.site_name,
            state.products.len(),
            state.consecutive_failures
        );
        Ok(())
    }

    /// Sites that currently have a state file, sorted.
    pub async fn list_sites(&self) -> Result<Vec<String>, StateError> {
        let mut entries = match tokio::fs::read_dir(&self.state_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StateError::io(&self.state_dir, e)),
        };

        let mut sites = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| StateError::io(&self.state_dir, e))?
        {
            let file_name = entry.file_name();
            let Some(site) = file_name.to_str().and_then(|name| name.strip_suffix(STATE_SUFFIX)) else {
                continue;
            };
            if validate_site_name(site).is_ok() {
                sites.push(site.to_string());
            } else {
                debug!("Ignoring state file with invalid site name: {:?}", file_name);
            }
        }
        sites.sort();
        Ok(sites)
    }

    /// Health summary for `site`. State older than twice the refresh
    /// interval is stale; without an interval the store default applies.
    pub async fn status(&self, site: &str, refresh_interval_hours: Option<u32>) -> Result<SiteStatusSummary, StateError> {
        let path = self.checked_state_path(site)?;
        let stale_after = refresh_interval_hours
            .map(|hours| ChronoDuration::hours(2 * i64::from(hours)))
            .unwrap_or(self.stale_after);
        Ok(summarize(site, read_state(&path).await?, stale_after, Utc::now()))
    }

    /// Copy the current state of `site` into the backup directory.
    pub async fn backup(&self, site: &str) -> Result<StateSnapshot, StateError> {
        let state = self.peek(site).await?.ok_or_else(|| StateError::NotFound {
            site: site.to_string(),
        })?;
        let taken_at = Utc::now();
        let path = self.backup_dir.join(format!(
            "{}_state_{}.json",
            site,
            taken_at.format(BACKUP_TIMESTAMP_FORMAT)
        ));
        write_blocking(path.clone(), serde_json::to_vec_pretty(&state)?).await?;
        info!("📦 Backed up state for {} to {:?}", site, path);
        Ok(StateSnapshot {
            site_name: site.to_string(),
            path,
            taken_at,
            state,
        })
    }

    /// One combined document with every readable site state.
    pub async fn backup_all(&self) -> Result<PathBuf, StateError> {
        let mut states = Vec::new();
        for site in self.list_sites().await? {
            match self.peek(&site).await {
                Ok(Some(state)) => states.push(state),
                Ok(None) => {}
                Err(StateError::Corrupted { path, reason }) => {
                    warn!("⚠️  Leaving {:?} out of the backup: {}", path, reason);
                }
                Err(e) => return Err(e),
            }
        }

        let backup_timestamp = Utc::now();
        let document = CombinedBackup {
            backup_timestamp,
            total_sites: states.len(),
            states: states.iter().map(|s| (s.site_name.as_str(), s)).collect(),
        };
        let path = self.backup_dir.join(format!(
            "state_backup_{}.json",
            backup_timestamp.format(BACKUP_TIMESTAMP_FORMAT)
        ));
        write_blocking(path.clone(), serde_json::to_vec_pretty(&document)?).await?;
        info!("📦 Backed up {} site states to {:?}", states.len(), path);
        Ok(path)
    }

    /// Delete backup files older than `max_age_days`. Returns how many were removed.
    pub async fn cleanup_backups(&self, max_age_days: u32) -> Result<usize, StateError> {
        let cutoff = std::time::SystemTime::now()
            .checked_sub(std::time::Duration::from_secs(u64::from(max_age_days) * 86_400))
            .unwrap_or(std::time::UNIX_EPOCH);

        let mut entries = match tokio::fs::read_dir(&self.backup_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(StateError::io(&self.backup_dir, e)),
        };

        let mut removed = 0;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| StateError::io(&self.backup_dir, e))?
        {
            let path = entry.path();
            let is_backup = path.extension().is_some_and(|ext| ext == "json");
            let modified = match entry.metadata().await.and_then(|m| m.modified()) {
                Ok(modified) => modified,
                Err(_) => continue,
            };
            if is_backup && modified < cutoff {
                match tokio::fs::remove_file(&path).await {
                    Ok(()) => {
                        info!("🧹 Removed old backup {:?}", path);
                        removed += 1;
                    }
                    Err(e) => warn!("Failed to remove old backup {:?}: {}", path, e),
                }
            }
        }
        Ok(removed)
    }
}

fn summarize(site: &str, stored: StoredState, stale_after: ChronoDuration, now: DateTime<Utc>) -> SiteStatusSummary {
    let mut summary = SiteStatusSummary {
        site_name: site.to_string(),
        has_state: false,
        health: StateHealth::Missing,
        last_success: None,
        age_hours: None,
        product_count: 0,
        consecutive_failures: 0,
        last_statistics: None,
        error: None,
    };

    let state = match stored {
        StoredState::Missing => return summary,
        StoredState::Corrupted(reason) => {
            summary.health = StateHealth::Corrupted;
            summary.error = Some(reason);
            return summary;
        }
        StoredState::Loaded(state) => state,
    };

    let age = now - state.last_success;
    summary.health = if state.consecutive_failures >= CRITICAL_FAILURE_COUNT {
        StateHealth::Critical
    } else if age > stale_after {
        StateHealth::Stale
    } else if state.consecutive_failures > 0 {
        StateHealth::Warning
    } else {
        StateHealth::Healthy
    };
    summary.has_state = true;
    summary.last_success = Some(state.last_success);
    summary.age_hours = Some(age.num_minutes() as f64 / 60.0);
    summary.product_count = state.products.len();
    summary.consecutive_failures = state.consecutive_failures;
    summary.last_statistics = Some(state.statistics);
    summary
}

async fn read_state(path: &Path) -> Result<StoredState, StateError> {
    let content = match tokio::fs::read_to_string(path).await {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(StoredState::Missing),
        Err(e) => return Err(StateError::io(path, e)),
    };
    Ok(match serde_json::from_str::<SiteRunState>(&content) {
        Ok(state) => StoredState::Loaded(state),
        Err(e) => StoredState::Corrupted(e.to_string()),
    })
}

async fn write_blocking(path: PathBuf, bytes: Vec<u8>) -> Result<(), StateError> {
    let target = path.clone();
    tokio::task::spawn_blocking(move || write_atomic(&target, &bytes))
        .await
        .map_err(|e| StateError::Task(e.to_string()))?
        .map_err(|e| StateError::io(path, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ProductCard;
    use tempfile::TempDir;
    use url::Url;

    fn store(dir: &TempDir) -> StateStore {
        StateStore::new(dir.path().join("state"), dir.path().join("backups"), 48)
    }

    fn state(site: &str, products: usize) -> SiteRunState {
        SiteRunState {
            site_name: site.to_string(),
            products: (0..products)
                .map(|i| ProductCard {
                    title: format!("Product {i}"),
                    price: "$10".into(),
                    affiliate_url: Url::parse(&format!("https://www.amazon.com/dp/B00000000{i}?tag=t-20")).unwrap(),
                    image_url: Url::parse("https://cdn.example.com/p.jpg").unwrap(),
                    slug: format!("product-{i}"),
                })
                .collect(),
            last_success: Utc::now(),
            statistics: RunStatistics::default(),
            consecutive_failures: 0,
        }
    }

    fn is_busy(result: Result<SiteLease, StateError>) -> bool {
        matches!(result, Err(StateError::Config(ConfigError::SiteBusy { .. })))
    }

    #[tokio::test]
    async fn test_commit_and_load_roundtrip() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let lease = store.lock_site("deals").unwrap();
        assert_eq!(store.load(&lease).await.unwrap(), None);

        let saved = state("deals", 3);
        store.commit(&saved).await.unwrap();
        assert_eq!(store.load(&lease).await.unwrap(), Some(saved.clone()));
        assert_eq!(store.peek("deals").await.unwrap(), Some(saved));
        assert_eq!(store.list_sites().await.unwrap(), vec!["deals".to_string()]);
    }

    #[tokio::test]
    async fn test_corrupted_state_is_quarantined_under_lease() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        std::fs::create_dir_all(store.state_dir()).unwrap();
        std::fs::write(store.state_path("deals"), "{ not json").unwrap();

        let lease = store.lock_site("deals").unwrap();
        assert_eq!(store.load(&lease).await.unwrap(), None);
        assert!(!store.state_path("deals").exists());
        assert!(store.state_dir().join("deals_state.json.corrupted").exists());
    }

    #[tokio::test]
    async fn test_read_only_operations_leave_corrupted_state_in_place() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        std::fs::create_dir_all(store.state_dir()).unwrap();
        std::fs::write(store.state_path("deals"), "{ not json").unwrap();

        let summary = store.status("deals", None).await.unwrap();
        assert_eq!(summary.health, StateHealth::Corrupted);
        assert!(!summary.has_state);
        assert!(summary.error.is_some());

        assert!(matches!(store.peek("deals").await, Err(StateError::Corrupted { .. })));
        assert!(matches!(store.backup("deals").await, Err(StateError::Corrupted { .. })));
        let combined = store.backup_all().await.unwrap();
        let doc: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(combined).unwrap()).unwrap();
        assert_eq!(doc["total_sites"], 0);

        assert_eq!(std::fs::read_to_string(store.state_path("deals")).unwrap(), "{ not json");
        assert!(!store.state_dir().join("deals_state.json.corrupted").exists());
    }

    #[tokio::test]
    async fn test_site_names_cannot_escape_state_directories() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        std::fs::create_dir_all(store.state_dir()).unwrap();
        let outside = dir.path().join("secret_state.json");
        std::fs::write(&outside, serde_json::to_vec(&state("secret", 3)).unwrap()).unwrap();

        let invalid = |e: &StateError| matches!(e, StateError::Config(ConfigError::InvalidSiteName { .. }));
        assert!(invalid(&store.status("../secret", None).await.unwrap_err()));
        assert!(invalid(&store.peek("../secret").await.unwrap_err()));
        assert!(invalid(&store.backup("../secret").await.unwrap_err()));
        assert!(invalid(&store.lock_site("../secret").unwrap_err()));
        assert!(invalid(&store.commit(&state("../secret", 1)).await.unwrap_err()));

        assert!(outside.exists());
        assert!(!dir.path().join("secret_state.json.corrupted").exists());
        assert!(!store.backup_dir().exists());
    }

    #[test]
    fn test_second_lease_for_same_site_is_refused() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let lease = store.lock_site("deals").unwrap();
        assert_eq!(lease.site_name(), "deals");
        assert!(is_busy(store.lock_site("deals")));
        assert!(store.lock_site("other").is_ok());
        drop(lease);
        assert!(store.lock_site("deals").is_ok());
    }

    #[test]
    fn test_lock_file_held_elsewhere_refuses_lease() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        std::fs::create_dir_all(store.state_dir()).unwrap();

        // a separate open file description stands in for another process
        let foreign = File::options()
            .create(true)
            .write(true)
            .truncate(false)
            .open(store.lock_path("deals"))
            .unwrap();
        foreign.lock().unwrap();
        assert!(is_busy(store.lock_site("deals")));

        foreign.unlock().unwrap();
        assert!(store.lock_site("deals").is_ok());
    }

    #[tokio::test]
    async fn test_status_reports_health() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);

        let missing = store.status("deals", None).await.unwrap();
        assert_eq!(missing.health, StateHealth::Missing);

        let mut old = state("deals", 2);
        old.last_success = Utc::now() - ChronoDuration::hours(72);
        store.commit(&old).await.unwrap();
        let stale = store.status("deals", None).await.unwrap();
        assert_eq!(stale.health, StateHealth::Stale);
        assert_eq!(stale.product_count, 2);

        store.commit(&state("deals", 2)).await.unwrap();
        assert_eq!(store.status("deals", None).await.unwrap().health, StateHealth::Healthy);
    }

    #[tokio::test]
    async fn test_staleness_follows_refresh_interval() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let mut aged = state("deals", 1);
        aged.last_success = Utc::now() - ChronoDuration::hours(30);
        store.commit(&aged).await.unwrap();

        // default 48h window
        assert_eq!(store.status("deals", None).await.unwrap().health, StateHealth::Healthy);
        // refreshed every 12h: stale after 24h
        assert_eq!(store.status("deals", Some(12)).await.unwrap().health, StateHealth::Stale);
        assert_eq!(store.status("deals", Some(24)).await.unwrap().health, StateHealth::Healthy);
    }

    #[tokio::test]
    async fn test_consecutive_failures_drive_health() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);

        let mut degraded = state("deals", 2);
        degraded.consecutive_failures = 1;
        store.commit(&degraded).await.unwrap();
        let warning = store.status("deals", None).await.unwrap();
        assert_eq!(warning.health, StateHealth::Warning);
        assert_eq!(warning.consecutive_failures, 1);

        degraded.consecutive_failures = CRITICAL_FAILURE_COUNT;
        degraded.last_success = Utc::now() - ChronoDuration::hours(72);
        store.commit(&degraded).await.unwrap();
        assert_eq!(store.status("deals", None).await.unwrap().health, StateHealth::Critical);
    }

    #[tokio::test]
    async fn test_backup_copies_current_state() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        assert!(matches!(store.backup("deals").await, Err(StateError::NotFound { .. })));

        store.commit(&state("deals", 4)).await.unwrap();
        let snapshot = store.backup("deals").await.unwrap();
        assert!(snapshot.path.starts_with(store.backup_dir()));
        let copied: SiteRunState = serde_json::from_str(&std::fs::read_to_string(&snapshot.path).unwrap()).unwrap();
        assert_eq!(copied.products.len(), 4);

        store.commit(&state("other", 1)).await.unwrap();
        let combined = store.backup_all().await.unwrap();
        let doc: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(combined).unwrap()).unwrap();
        assert_eq!(doc["total_sites"], 2);
        assert!(doc["states"]["other"].is_object());
    }

    #[tokio::test]
    async fn test_cleanup_removes_only_old_backups() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        std::fs::create_dir_all(store.backup_dir()).unwrap();

        let old = store.backup_dir().join("deals_state_20200101_000000.json");
        let fresh = store.backup_dir().join("deals_state_20990101_000000.json");
        for path in [&old, &fresh] {
            std::fs::write(path, "{}").unwrap();
        }
        let ten_days_ago = std::time::SystemTime::now() - std::time::Duration::from_secs(10 * 86_400);
        std::fs::File::options()
            .write(true)
            .open(&old)
            .unwrap()
            .set_modified(ten_days_ago)
            .unwrap();

        assert_eq!(store.cleanup_backups(7).await.unwrap(), 1);
        assert!(!old.exists());
        assert!(fresh.exists());
    }
}
