use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// How often the background task prunes the request log
pub const DEFAULT_CLEANUP_INTERVAL: Duration = Duration::from_secs(10 * 60);
/// Timestamps older than this are dropped by the cleanup pass
pub const DEFAULT_MAX_AGE_MS: i64 = 60 * 60 * 1000;

/// Outcome of a single admission check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Decision {
    pub allowed: bool,
    pub remaining: u32,
    /// Milliseconds since epoch
    pub reset_time: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitStats {
    pub total_keys: usize,
    pub total_requests: usize,
}

/// Cadence of the background cleanup task
#[derive(Debug, Clone, Copy)]
pub struct CleanupSettings {
    pub interval: Duration,
    pub max_age_ms: i64,
}

impl Default for CleanupSettings {
    fn default() -> Self {
        Self {
            interval: DEFAULT_CLEANUP_INTERVAL,
            max_age_ms: DEFAULT_MAX_AGE_MS,
        }
    }
}

/// Sliding-window request log shared by every policy.
pub struct RateLimiter {
    /// admitted request timestamps (ms) per key, oldest first
    requests: Mutex<HashMap<String, Vec<i64>>>,
    settings: CleanupSettings,
    cleanup_task: Mutex<Option<JoinHandle<()>>>,
}

impl RateLimiter {
    pub fn new(settings: CleanupSettings) -> Self {
        Self {
            requests: Mutex::new(HashMap::new()),
            settings,
            cleanup_task: Mutex::new(None),
        }
    }

    pub fn settings(&self) -> CleanupSettings {
        self.settings
    }

    fn log(&self) -> MutexGuard<'_, HashMap<String, Vec<i64>>> {
        self.requests.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Decides whether a request for `key` is admitted at `now`.
    ///
    /// Timestamps at or before `now - window_ms` no longer count and are
    /// dropped from the stored log on both the admit and the deny path.
    /// A denied request is not recorded.
    pub fn evaluate(&self, key: &str, limit: u32, window_ms: i64, now: i64) -> Decision {
        let window_start = now.saturating_sub(window_ms);
        let mut requests = self.log();

        let timestamps = requests.entry(key.to_string()).or_default();
        timestamps.retain(|&t| t > window_start);

        if timestamps.len() >= limit as usize {
            let reset_time = timestamps
                .iter()
                .min()
                .map(|&oldest| oldest.saturating_add(window_ms))
                .unwrap_or(now.saturating_add(window_ms));
            return Decision {
                allowed: false,
                remaining: 0,
                reset_time,
            };
        }

        timestamps.push(now);
        let used = u32::try_from(timestamps.len()).unwrap_or(u32::MAX);
        Decision {
            allowed: true,
            remaining: limit.saturating_sub(used),
            reset_time: now.saturating_add(window_ms),
        }
    }

    /// Drops timestamps older than `max_age_ms` and forgets keys left empty.
    /// Returns the number of keys removed.
    pub fn cleanup(&self, now: i64, max_age_ms: i64) -> usize {
        let cutoff = now.saturating_sub(max_age_ms);
        let mut requests = self.log();
        let before = requests.len();

        requests.retain(|_, timestamps| {
            timestamps.retain(|&t| t > cutoff);
            !timestamps.is_empty()
        });

        let removed = before - requests.len();
        debug!(
            removed_keys = removed,
            remaining_keys = requests.len(),
            "Rate limiter cleanup completed"
        );
        removed
    }

    pub fn get_stats(&self) -> RateLimitStats {
        let requests = self.log();
        RateLimitStats {
            total_keys: requests.len(),
            total_requests: requests.values().map(Vec::len).sum(),
        }
    }

    /// Starts the recurring cleanup. The task only holds a weak reference and
    /// exits by itself once the limiter is dropped.
    pub fn spawn_cleanup(self: &Arc<Self>) {
        let mut slot = self
            .cleanup_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if slot.is_some() {
            debug!("Cleanup task already running");
            return;
        }

        let limiter: Weak<Self> = Arc::downgrade(self);
        let CleanupSettings {
            interval,
            max_age_ms,
        } = self.settings;

        *slot = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // the first tick completes immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(limiter) = limiter.upgrade() else {
                    break;
                };
                limiter.cleanup(now_ms(), max_age_ms);
            }
        }));
        info!(
            interval_secs = interval.as_secs(),
            max_age_ms, "Rate limiter cleanup task started"
        );
    }

    /// True while the background cleanup task is scheduled.
    pub fn is_running(&self) -> bool {
        self.cleanup_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Cancels the background cleanup. Stored history is kept and
    /// `evaluate` remains usable.
    pub fn destroy(&self) {
        let task = self
            .cleanup_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        match task {
            Some(handle) => {
                handle.abort();
                info!("Rate limiter cleanup task stopped");
            }
            None => debug!("Rate limiter already destroyed"),
        }
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(CleanupSettings::default())
    }
}

/// Wall-clock time in milliseconds since the Unix epoch
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
