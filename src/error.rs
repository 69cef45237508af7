//! Error types for the slowmode plugin.

use thiserror::Error;

use crate::host::AppError;

/// Main error type for slowmode operations.
#[derive(Error, Debug)]
pub enum SlowmodeError {
    /// The host failed to answer a channel lookup
    #[error("Host error: {0}")]
    Host(#[from] AppError),

    /// The channel header carries no `---` delimited fragment
    #[error("No YAML configuration found in channel header")]
    MissingFragment,

    /// The header fragment is not valid YAML
    #[error("Malformed channel configuration: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// A duration string could not be parsed
    #[error("Invalid duration: {0}")]
    InvalidDuration(String),

    /// Plugin settings errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for slowmode operations.
pub type Result<T> = std::result::Result<T, SlowmodeError>;
