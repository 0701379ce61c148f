//! Application configuration with layered loading.
//!
//! This module provides configuration management using figment for layered
//! configuration loading from multiple sources:
//!
//! 1. Environment variables (TABDATA_*)
//! 2. TOML config file (if TABDATA_CONFIG_FILE set)
//! 3. Built-in defaults

use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};

mod validation;

pub use validation::ConfigError;

/// Directory under `storage_dir` holding one file per record key.
pub const FILE_STORAGE_DIR: &str = "persisted_tab_data_storage";

/// Directory under `storage_dir` holding one key-value database per profile.
pub const PROFILE_STORE_DIR: &str = "profiles";

/// Application configuration with layered loading.
///
/// Loading precedence (highest wins):
/// 1. Environment variables (TABDATA_*)
/// 2. TOML config file (if TABDATA_CONFIG_FILE set)
/// 3. Built-in defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Root directory for all durable record storage.
    ///
    /// Set via TABDATA_STORAGE_DIR environment variable.
    #[serde(default = "default_storage_dir")]
    pub storage_dir: PathBuf,

    /// Hex-encoded 256-bit key for the encrypted file backend.
    ///
    /// Set via TABDATA_CIPHER_KEY environment variable. When unset a random
    /// key is generated per process, so encrypted records do not outlive it.
    #[serde(default)]
    pub cipher_key: Option<String>,

    /// Time to live for shopping price records, in milliseconds.
    ///
    /// Set via TABDATA_SHOPPING_TTL_MS environment variable.
    #[serde(default = "default_shopping_ttl_ms")]
    pub shopping_ttl_ms: i64,

    /// Time to live for store hours records, in milliseconds.
    ///
    /// Set via TABDATA_STORE_HOURS_TTL_MS environment variable.
    #[serde(default = "default_store_hours_ttl_ms")]
    pub store_hours_ttl_ms: i64,
}

fn default_storage_dir() -> PathBuf {
    PathBuf::from("./tabdata")
}

fn default_shopping_ttl_ms() -> i64 {
    3_600_000 // 1 hour
}

fn default_store_hours_ttl_ms() -> i64 {
    86_400_000 // 1 day
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            storage_dir: default_storage_dir(),
            cipher_key: None,
            shopping_ttl_ms: default_shopping_ttl_ms(),
            store_hours_ttl_ms: default_store_hours_ttl_ms(),
        }
    }
}

impl AppConfig {
    /// Directory used by the file and encrypted file backends.
    pub fn file_storage_dir(&self) -> PathBuf {
        self.storage_dir.join(FILE_STORAGE_DIR)
    }

    /// Database path for a profile's key-value store.
    pub fn profile_store_path(&self, profile_id: &str) -> PathBuf {
        self.storage_dir
            .join(PROFILE_STORE_DIR)
            .join(format!("{profile_id}.sqlite"))
    }

    /// Shopping TTL as a Duration.
    pub fn shopping_ttl(&self) -> Duration {
        Duration::from_millis(self.shopping_ttl_ms.max(0) as u64)
    }

    /// Store hours TTL as a Duration.
    pub fn store_hours_ttl(&self) -> Duration {
        Duration::from_millis(self.store_hours_ttl_ms.max(0) as u64)
    }

    /// Configuration rooted at `dir` with every other value defaulted.
    pub fn with_storage_dir(dir: impl AsRef<Path>) -> Self {
        Self { storage_dir: dir.as_ref().to_path_buf(), ..Default::default() }
    }

    /// Load configuration from all sources with layered precedence.
    ///
    /// Priority (highest wins):
    /// 1. Environment variables prefixed with `TABDATA_`
    /// 2. TOML file from `TABDATA_CONFIG_FILE` (if set)
    /// 3. Built-in defaults via `Default::default()`
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if:
    /// - Configuration file cannot be read
    /// - Environment variables cannot be parsed
    /// - Validation fails after loading
    pub fn load() -> Result<Self, ConfigError> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));

        if let Ok(config_path) = std::env::var("TABDATA_CONFIG_FILE") {
            figment = figment.merge(Toml::file(&config_path));
        }

        figment = figment.merge(
            Env::prefixed("TABDATA_")
                .map(|key| key.as_str().to_lowercase().into())
                .split("__"),
        );

        let config: Self = figment.extract().map_err(|e| ConfigError::LoadFailed(e.to_string()))?;

        config.validate()?;

        Ok(config)
    }

    /// Decode the configured cipher key, if any.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` if the key is not 64 hex characters.
    pub fn cipher_key_bytes(&self) -> Result<Option<[u8; 32]>, ConfigError> {
        let Some(key) = self.cipher_key.as_deref() else {
            return Ok(None);
        };
        let invalid = || ConfigError::Invalid { field: "cipher_key".into(), reason: "must be 64 hex characters".into() };
        let bytes = hex::decode(key).map_err(|_| invalid())?;
        let key: [u8; 32] = bytes.try_into().map_err(|_| invalid())?;
        Ok(Some(key))
    }
}
