//! Error types for the Windowguard service.

use thiserror::Error;

/// Main error type for Windowguard operations.
///
/// Rejected requests are not errors; they are an ordinary admission decision
/// and never surface through this type.
#[derive(Error, Debug)]
pub enum WindowGuardError {
    /// Invalid or unparseable configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Layered settings could not be assembled
    #[error("Settings error: {0}")]
    Settings(#[from] config::ConfigError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for Windowguard operations.
pub type Result<T> = std::result::Result<T, WindowGuardError>;
