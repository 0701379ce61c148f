//! Configuration validation rules.
//!
//! This module provides validation logic for `AppConfig` values
//! after they have been loaded from environment, files, or defaults.

use crate::config::AppConfig;
use thiserror::Error;

/// Configuration validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    LoadFailed(String),

    #[error("invalid configuration: {field} - {reason}")]
    Invalid { field: String, reason: String },

    #[error("missing required configuration: {field} ({hint})")]
    Missing { field: String, hint: String },
}

impl AppConfig {
    /// Validate configuration values after loading.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` if:
    /// - `storage_dir` is empty
    /// - `shopping_ttl_ms` or `store_hours_ttl_ms` is not positive
    /// - `cipher_key` is set but is not 64 hex characters
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.storage_dir.as_os_str().is_empty() {
            return Err(ConfigError::Invalid { field: "storage_dir".into(), reason: "must not be empty".into() });
        }

        if self.shopping_ttl_ms <= 0 {
            return Err(ConfigError::Invalid {
                field: "shopping_ttl_ms".into(),
                reason: "must be greater than 0".into(),
            });
        }
        if self.store_hours_ttl_ms <= 0 {
            return Err(ConfigError::Invalid {
                field: "store_hours_ttl_ms".into(),
                reason: "must be greater than 0".into(),
            });
        }

        self.cipher_key_bytes()?;

        if self.cipher_key.is_none() {
            tracing::debug!("No cipher_key configured; encrypted records will not survive a restart");
        }

        Ok(())
    }

    /// Require a persistent cipher key (for tools reading earlier sessions).
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Missing` if no key is configured.
    pub fn require_cipher_key(&self) -> Result<[u8; 32], ConfigError> {
        self.cipher_key_bytes()?.ok_or_else(|| ConfigError::Missing {
            field: "cipher_key".into(),
            hint: "Set TABDATA_CIPHER_KEY environment variable".into(),
        })
    }
}
