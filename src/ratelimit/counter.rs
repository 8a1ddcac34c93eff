//! Per-client window state.

/// The outcome of recording one request against a client's window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowSnapshot {
    /// Requests admitted to the window so far, including this one
    pub count: u64,
    /// When the window started (ms)
    pub window_start_ms: u64,
    /// When the window ends (ms), exclusive
    pub window_expiry_ms: u64,
}

/// Request count for one client within its current fixed window.
///
/// A new window replaces the whole state; the count of an old window is never
/// carried forward.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientWindowState {
    /// When the current window started
    window_start_ms: u64,
    /// Requests counted in the current window
    request_count: u64,
    /// Most recent request time, used for idle eviction
    last_seen_ms: u64,
}

impl ClientWindowState {
    /// Open a fresh, empty window at `now_ms`.
    pub fn new(now_ms: u64) -> Self {
        Self {
            window_start_ms: now_ms,
            request_count: 0,
            last_seen_ms: now_ms,
        }
    }

    /// Count one request, opening a new window first if the current one has
    /// expired.
    ///
    /// Returns `true` alongside the snapshot when a new window was opened.
    pub fn record(&mut self, now_ms: u64, window_ms: u64) -> (WindowSnapshot, bool) {
        if self.is_expired(now_ms, window_ms) {
            *self = Self::new(now_ms);
        }

        self.request_count += 1;
        self.last_seen_ms = self.last_seen_ms.max(now_ms);

        (self.snapshot(window_ms), self.request_count == 1)
    }

    /// Whether the window has run its full length at `now_ms`.
    ///
    /// A clock that reads earlier than the window start keeps the window open.
    pub fn is_expired(&self, now_ms: u64, window_ms: u64) -> bool {
        now_ms.saturating_sub(self.window_start_ms) >= window_ms
    }

    /// Whether the client has been silent for at least `idle_ms`.
    pub fn is_idle(&self, now_ms: u64, idle_ms: u64) -> bool {
        now_ms.saturating_sub(self.last_seen_ms) >= idle_ms
    }

    /// Current state without counting anything.
    pub fn snapshot(&self, window_ms: u64) -> WindowSnapshot {
        WindowSnapshot {
            count: self.request_count,
            window_start_ms: self.window_start_ms,
            window_expiry_ms: self.window_start_ms.saturating_add(window_ms),
        }
    }

    /// Requests counted in the current window.
    pub fn request_count(&self) -> u64 {
        self.request_count
    }

    /// When the current window started.
    pub fn window_start_ms(&self) -> u64 {
        self.window_start_ms
    }
}
