//! Structured errors for the tabdata CLI.

use tabdata_core::{ConfigError, Error};

#[derive(Debug, thiserror::Error)]
pub enum CliError {
    /// Nothing is stored under the requested key.
    #[error("NOT_FOUND: no record stored for {0}")]
    NotFound(String),

    /// Stored bytes could not be decoded.
    #[error("DECODE_FAILED: {0}")]
    DecodeFailed(#[from] Error),

    #[error("CONFIG_ERROR: {0}")]
    Config(#[from] ConfigError),

    #[error("OUTPUT_FAILED: {0}")]
    Output(#[from] serde_json::Error),
}
