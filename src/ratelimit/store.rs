//! Concurrent per-client window counter store.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use super::clock::Clock;
use super::counter::{ClientWindowState, WindowSnapshot};

/// Idle entries become eligible for eviction after this many windows.
const IDLE_WINDOWS: u64 = 2;

/// Shortest interval the background sweeper runs at.
const MIN_SWEEP_INTERVAL: Duration = Duration::from_millis(1);

/// Tracks how many requests each client identity has made in its current
/// fixed window.
///
/// The table is sharded, so clients only contend with each other when their
/// identities land on the same shard. Every mutation, including eviction,
/// happens under the owning shard's write lock; an in-flight increment and a
/// sweep of the same identity are therefore strictly ordered.
pub struct WindowCounterStore {
    /// Window state indexed by client identity
    windows: DashMap<String, ClientWindowState>,
    /// Length of each fixed window in milliseconds
    window_ms: u64,
}

impl WindowCounterStore {
    /// Create an empty store using windows of `window_ms` milliseconds.
    pub fn new(window_ms: u64) -> Self {
        Self {
            windows: DashMap::new(),
            window_ms,
        }
    }

    /// Count one request for `identity` at `now_ms`.
    ///
    /// Opens a new window when the client has none or its window has run out,
    /// otherwise increments the current window in place. Concurrent calls for
    /// the same identity are linearized: each observes a distinct count.
    pub fn record_and_count(&self, identity: &str, now_ms: u64) -> WindowSnapshot {
        // Fast path avoids allocating a key for identities already present.
        let (snapshot, opened) = match self.windows.get_mut(identity) {
            Some(mut state) => state.record(now_ms, self.window_ms),
            None => self
                .windows
                .entry(identity.to_owned())
                .or_insert_with(|| ClientWindowState::new(now_ms))
                .record(now_ms, self.window_ms),
        };

        if opened {
            debug!(
                identity = %identity,
                window_start_ms = snapshot.window_start_ms,
                window_expiry_ms = snapshot.window_expiry_ms,
                "Opened new rate limit window"
            );
        }

        snapshot
    }

    /// Read the live window for `identity` without counting a request.
    ///
    /// Returns `None` when the client has no window or its window has expired.
    pub fn peek(&self, identity: &str, now_ms: u64) -> Option<WindowSnapshot> {
        self.windows
            .get(identity)
            .filter(|state| !state.is_expired(now_ms, self.window_ms))
            .map(|state| state.snapshot(self.window_ms))
    }

    /// Forget everything known about `identity`.
    ///
    /// Returns `true` if an entry was removed.
    pub fn reset(&self, identity: &str) -> bool {
        self.windows.remove(identity).is_some()
    }

    /// Remove entries whose clients have been idle for at least two windows.
    ///
    /// Returns the number of entries removed.
    pub fn sweep(&self, now_ms: u64) -> usize {
        let idle_ms = self.window_ms.saturating_mul(IDLE_WINDOWS);
        let mut removed = 0;
        self.windows.retain(|_, state| {
            let idle = state.is_idle(now_ms, idle_ms);
            removed += usize::from(idle);
            !idle
        });
        removed
    }

    /// Clear all windows.
    ///
    /// This is primarily useful for testing.
    pub fn clear(&self) {
        self.windows.clear();
    }

    /// Get the number of tracked identities.
    pub fn len(&self) -> usize {
        self.windows.len()
    }

    /// Whether no identity is tracked.
    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }

    /// Length of each window in milliseconds.
    pub fn window_ms(&self) -> u64 {
        self.window_ms
    }
}

/// Run [`WindowCounterStore::sweep`] every `every` on the current tokio runtime.
///
/// Intervals shorter than one millisecond are raised to one millisecond. The
/// task runs until the returned handle is aborted or the runtime shuts down.
pub fn spawn_sweeper(
    store: Arc<WindowCounterStore>,
    clock: Arc<dyn Clock>,
    every: Duration,
) -> JoinHandle<()> {
    let every = every.max(MIN_SWEEP_INTERVAL);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        // The first tick completes immediately.
        ticker.tick().await;

        loop {
            ticker.tick().await;
            let removed = store.sweep(clock.now_ms());
            if removed > 0 {
                debug!(removed, remaining = store.len(), "Evicted idle rate limit windows");
            } else {
                trace!(tracked = store.len(), "Sweep found no idle windows");
            }
        }
    })
}
