//! Error types shared across the ETL crates.

use thiserror::Error;

/// Errors raised while loading or validating configuration.
///
/// These are the only errors treated as fatal at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Configuration sources could not be read or deserialized
    #[error("Configuration error: {0}")]
    Load(String),

    /// Configuration was read but describes an unusable setup
    #[error("Invalid configuration: {0}")]
    Invalid(String),

    /// Unknown entity name (CLI input or job definition)
    #[error("Unknown entity type: {0}")]
    UnknownEntity(String),
}
