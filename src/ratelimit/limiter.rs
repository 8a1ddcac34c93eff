//! Core rate limiter implementation.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use super::clock::{Clock, SystemClock};
use super::policy::RateLimitConfig;
use super::store::{spawn_sweeper, WindowCounterStore};
use crate::error::Result;

/// Whether a request fits within its client's quota.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Code {
    /// Within the limit
    Ok,
    /// Over the limit for the current window
    OverLimit,
}

/// The result of checking one request against the policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitStatus {
    /// Admission outcome
    pub code: Code,
    /// Configured requests per window
    pub limit: u64,
    /// Requests counted in the window, including this one
    pub count: u64,
    /// Requests still admitted in this window
    pub remaining: u64,
    /// When the window started (ms)
    pub window_start_ms: u64,
    /// When the window resets (ms)
    pub reset_at_ms: u64,
    /// Time left until the window resets
    pub reset_after: Duration,
}

impl RateLimitStatus {
    /// Whether the request was admitted.
    pub fn is_ok(&self) -> bool {
        self.code == Code::Ok
    }
}

/// Applies a fixed-window policy to client identities.
///
/// Each limiter owns its own counter store; two limiters never share counts.
/// This struct is thread-safe and can be shared across multiple tasks.
pub struct RateLimiter {
    /// Immutable admission policy
    config: RateLimitConfig,
    /// Per-identity window counters
    store: Arc<WindowCounterStore>,
    /// Time source for window math
    clock: Arc<dyn Clock>,
    /// Background eviction task, if started
    sweeper: Mutex<Option<JoinHandle<()>>>,
    /// Clock reading at which `check` next sweeps idle windows
    next_sweep_ms: AtomicU64,
}

impl RateLimiter {
    /// Create a rate limiter on the system clock.
    ///
    /// Fails if the policy is invalid.
    pub fn new(config: RateLimitConfig) -> Result<Self> {
        Self::with_clock(config, Arc::new(SystemClock::new()))
    }

    /// Create a rate limiter reading time from `clock`.
    pub fn with_clock(config: RateLimitConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        config.validate()?;
        Ok(Self::from_valid(config, clock))
    }

    fn from_valid(config: RateLimitConfig, clock: Arc<dyn Clock>) -> Self {
        debug!(
            window_duration_ms = config.window_duration_ms,
            max_requests_per_window = config.max_requests_per_window,
            "Creating rate limiter"
        );

        let next_sweep_ms = clock.now_ms().saturating_add(sweep_interval_ms(&config));
        Self {
            store: Arc::new(WindowCounterStore::new(config.window_duration_ms)),
            config,
            clock,
            sweeper: Mutex::new(None),
            next_sweep_ms: AtomicU64::new(next_sweep_ms),
        }
    }

    /// Count one request for `identity` and report whether it is admitted.
    ///
    /// Every call counts exactly once, whether or not it is admitted. Once per
    /// sweep interval, the calling request also evicts idle windows.
    pub fn check(&self, identity: &str) -> RateLimitStatus {
        let now_ms = self.clock.now_ms();
        let limit = self.config.max_requests_per_window;

        self.sweep_if_due(now_ms);

        let snapshot = self.store.record_and_count(identity, now_ms);

        trace!(
            identity = %identity,
            count = snapshot.count,
            limit,
            "Checked rate limit"
        );

        let code = if snapshot.count <= limit {
            Code::Ok
        } else {
            debug!(
                identity = %identity,
                count = snapshot.count,
                limit,
                "Rate limit exceeded"
            );
            Code::OverLimit
        };

        RateLimitStatus {
            code,
            limit,
            count: snapshot.count,
            remaining: limit.saturating_sub(snapshot.count),
            window_start_ms: snapshot.window_start_ms,
            reset_at_ms: snapshot.window_expiry_ms,
            reset_after: Duration::from_millis(snapshot.window_expiry_ms.saturating_sub(now_ms)),
        }
    }

    /// Evict idle windows if the sweep interval has passed.
    ///
    /// Only one of any number of concurrent callers wins the sweep.
    fn sweep_if_due(&self, now_ms: u64) {
        let due = self.next_sweep_ms.load(Ordering::Acquire);
        if now_ms < due {
            return;
        }

        let next = now_ms.saturating_add(sweep_interval_ms(&self.config));
        if self
            .next_sweep_ms
            .compare_exchange(due, next, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }

        let removed = self.store.sweep(now_ms);
        if removed > 0 {
            debug!(removed, remaining = self.store.len(), "Evicted idle rate limit windows");
        }
    }

    /// Start evicting idle windows in the background.
    ///
    /// Must be called from within a tokio runtime. Calling it again while the
    /// sweeper is running has no effect. The task stops when the limiter is
    /// dropped.
    pub fn start_sweeper(&self) {
        let mut sweeper = self.sweeper.lock();
        if sweeper.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return;
        }

        let every = self.config.sweep_interval();
        debug!(interval_ms = every.as_millis() as u64, "Starting window sweeper");
        *sweeper = Some(spawn_sweeper(self.store.clone(), self.clock.clone(), every));
    }

    /// The policy this limiter enforces.
    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// The underlying counter store.
    pub fn store(&self) -> &Arc<WindowCounterStore> {
        &self.store
    }

    /// The limiter's time source.
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }
}

fn sweep_interval_ms(config: &RateLimitConfig) -> u64 {
    (config.sweep_interval().as_millis() as u64).max(1)
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::from_valid(RateLimitConfig::default(), Arc::new(SystemClock::new()))
    }
}

impl Drop for RateLimiter {
    fn drop(&mut self) {
        if let Some(handle) = self.sweeper.get_mut().take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::clock::ManualClock;

    fn limiter_at(window_ms: u64, limit: u64) -> (RateLimiter, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(0));
        let limiter =
            RateLimiter::with_clock(RateLimitConfig::new(window_ms, limit), clock.clone()).unwrap();
        (limiter, clock)
    }

    #[test]
    fn test_rate_limiter_creation() {
        let limiter = RateLimiter::default();
        assert!(limiter.store().is_empty());
        assert_eq!(limiter.config(), &RateLimitConfig::default());
    }

    #[test]
    fn test_invalid_policy_refused() {
        assert!(RateLimiter::new(RateLimitConfig::new(0, 5)).is_err());
        assert!(RateLimiter::new(RateLimitConfig::new(1_000, 0)).is_err());
    }

    #[test]
    fn test_remaining_decreases_until_limit() {
        let (limiter, _clock) = limiter_at(60_000, 5);

        for n in 1..=5 {
            let status = limiter.check("client");
            assert_eq!(status.code, Code::Ok);
            assert_eq!(status.count, n);
            assert_eq!(status.remaining, 5 - n);
        }

        let status = limiter.check("client");
        assert_eq!(status.code, Code::OverLimit);
        assert_eq!(status.remaining, 0);
        assert_eq!(status.count, 6);
    }

    #[test]
    fn test_window_scenario() {
        let (limiter, clock) = limiter_at(1_000, 3);
        let mut outcomes = Vec::new();

        for t in [0, 100, 200, 300] {
            clock.set(t);
            let status = limiter.check("X");
            outcomes.push((status.code, status.remaining));
        }

        assert_eq!(
            outcomes,
            vec![
                (Code::Ok, 2),
                (Code::Ok, 1),
                (Code::Ok, 0),
                (Code::OverLimit, 0),
            ]
        );

        clock.set(1_050);
        let status = limiter.check("X");
        assert_eq!(status.code, Code::Ok);
        assert_eq!(status.remaining, 2);
        assert_eq!(status.window_start_ms, 1_050);
        assert_eq!(status.reset_at_ms, 2_050);
    }

    #[test]
    fn test_reset_after_counts_down() {
        let (limiter, clock) = limiter_at(1_000, 10);

        limiter.check("c");
        clock.set(400);
        let status = limiter.check("c");

        assert_eq!(status.reset_at_ms, 1_000);
        assert_eq!(status.reset_after, Duration::from_millis(600));
    }

    #[test]
    fn test_rejections_do_not_extend_window() {
        let (limiter, clock) = limiter_at(1_000, 1);

        limiter.check("r");
        for t in [100, 500, 999] {
            clock.set(t);
            assert_eq!(limiter.check("r").code, Code::OverLimit);
        }

        clock.set(1_000);
        assert!(limiter.check("r").is_ok());
    }

    #[test]
    fn test_separate_limiters_do_not_share_counts() {
        let a = RateLimiter::default();
        let b = RateLimiter::default();

        a.check("same");
        a.check("same");

        assert_eq!(b.check("same").count, 1);
    }

    #[test]
    fn test_check_evicts_idle_windows_without_sweeper() {
        let (limiter, clock) = limiter_at(10, 5);

        for n in 0..100 {
            limiter.check(&format!("client-{}", n));
        }
        assert_eq!(limiter.store().len(), 100);

        clock.set(1_000_000);
        limiter.check("late");

        assert_eq!(limiter.store().len(), 1);
        assert!(limiter.store().peek("late", 1_000_000).is_some());
    }

    #[test]
    fn test_check_sweeps_at_most_once_per_interval() {
        let (limiter, clock) = limiter_at(1_000, 5);

        limiter.check("old");
        clock.set(1_000);
        limiter.check("other");

        // Due sweep at 1_000 found nothing idle; "old" becomes idle at 2_000
        // but the next sweep is not due until 2_000 either.
        clock.set(1_999);
        limiter.check("other");
        assert_eq!(limiter.store().len(), 2);

        clock.set(2_000);
        limiter.check("other");
        assert_eq!(limiter.store().len(), 1);
        assert!(limiter.store().peek("old", 2_000).is_none());
    }

    #[tokio::test]
    async fn test_start_sweeper_is_idempotent() {
        let (limiter, _clock) = limiter_at(1_000, 10);

        limiter.start_sweeper();
        limiter.start_sweeper();

        assert!(limiter.sweeper.lock().is_some());
    }
}
