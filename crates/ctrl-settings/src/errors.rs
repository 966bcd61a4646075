//! Settings error types.

use thiserror::Error;

/// Errors raised when the resolved settings cannot be used.
#[derive(Debug, Error)]
pub enum SettingsError {
    /// The default target URL is unusable.
    #[error("invalid default target: {0}")]
    Target(#[from] ctrl_core::ConfigError),
    /// A settings value was invalid (e.g., out of range).
    #[error("invalid settings value: {0}")]
    InvalidValue(String),
}

/// Result type for settings operations.
pub type Result<T> = std::result::Result<T, SettingsError>;
