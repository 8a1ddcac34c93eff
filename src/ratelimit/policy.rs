//! Rate limit policy configuration.
//!
//! A policy is fixed once a limiter is built from it. Every field has a
//! default, so an empty YAML document is a valid policy.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::info;

use crate::error::{Result, WindowGuardError};

/// Default window length: 30 seconds.
pub const DEFAULT_WINDOW_DURATION_MS: u64 = 30_000;
/// Default number of requests admitted per window.
pub const DEFAULT_MAX_REQUESTS_PER_WINDOW: u64 = 150;
/// Default body sent with a rejection.
pub const DEFAULT_REJECTION_MESSAGE: &str = "Too many requests, please try again later.";

/// How a rejection body is labelled on the wire.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RejectionFormat {
    /// `text/plain`
    #[default]
    Text,
    /// `application/json`; the message must itself be a JSON document
    Json,
}

impl RejectionFormat {
    /// The `Content-Type` for this format.
    pub fn content_type(&self) -> &'static str {
        match self {
            RejectionFormat::Text => "text/plain; charset=utf-8",
            RejectionFormat::Json => "application/json",
        }
    }
}

/// Admission policy applied to every client identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Length of each fixed window in milliseconds
    pub window_duration_ms: u64,
    /// Requests admitted per client per window
    pub max_requests_per_window: u64,
    /// Body sent with a `429` response
    pub rejection_message: String,
    /// Content type of the rejection body
    pub rejection_format: RejectionFormat,
    /// Emit `RateLimit-*` headers
    pub emit_standard_headers: bool,
    /// Emit `X-RateLimit-*` headers
    pub emit_legacy_headers: bool,
    /// How often idle windows are swept; defaults to the window length
    pub sweep_interval_ms: Option<u64>,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            window_duration_ms: DEFAULT_WINDOW_DURATION_MS,
            max_requests_per_window: DEFAULT_MAX_REQUESTS_PER_WINDOW,
            rejection_message: DEFAULT_REJECTION_MESSAGE.to_string(),
            rejection_format: RejectionFormat::default(),
            emit_standard_headers: true,
            emit_legacy_headers: false,
            sweep_interval_ms: None,
        }
    }
}

impl RateLimitConfig {
    /// Create a policy admitting `max_requests_per_window` requests every
    /// `window_duration_ms`, with every other field defaulted.
    pub fn new(window_duration_ms: u64, max_requests_per_window: u64) -> Self {
        Self {
            window_duration_ms,
            max_requests_per_window,
            ..Self::default()
        }
    }

    /// Load a policy from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading rate limit policy");

        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Load a policy from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: RateLimitConfig = serde_yaml::from_str(yaml).map_err(|e| {
            WindowGuardError::Config(format!("Failed to parse rate limit policy: {}", e))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Reject policies a limiter cannot enforce.
    pub fn validate(&self) -> Result<()> {
        if self.window_duration_ms == 0 {
            return Err(WindowGuardError::Config(
                "window_duration_ms must be greater than zero".to_string(),
            ));
        }

        if self.max_requests_per_window == 0 {
            return Err(WindowGuardError::Config(
                "max_requests_per_window must be greater than zero".to_string(),
            ));
        }

        if self.sweep_interval_ms == Some(0) {
            return Err(WindowGuardError::Config(
                "sweep_interval_ms must be greater than zero".to_string(),
            ));
        }

        if self.rejection_format == RejectionFormat::Json {
            serde_json::from_str::<serde_json::Value>(&self.rejection_message).map_err(|e| {
                WindowGuardError::Config(format!(
                    "rejection_message is not valid JSON: {}",
                    e
                ))
            })?;
        }

        Ok(())
    }

    /// Window length as a `Duration`.
    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_duration_ms)
    }

    /// Period of the idle-window sweeper.
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms.unwrap_or(self.window_duration_ms))
    }
}
