//! Record kinds and the backends they persist through.
//!
//! The kind table binds every record kind and its encrypted variant to a type
//! id and a backend. [`BackendRegistry`] builds backends on first use and hands
//! out the same instance for the same input for as long as it lives. Key-value
//! backends are per profile and destroyed with their profile.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};

use crate::Error;
use crate::config::{AppConfig, ConfigError};
use crate::kinds::{self, CriticalData, MockData, ShoppingData, StoreHoursData};
use crate::owner::Profile;
use crate::record::NEVER_EXPIRES;
use crate::storage::cipher::RecordCipher;
use crate::storage::{EncryptedBackend, FileBackend, KeyValueBackend, StorageBackend};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordKind {
    /// Navigation state needed to restore a tab.
    Critical,
    /// Price tracking data.
    Shopping,
    /// Opening hours of the store a tab points at.
    StoreHours,
    Mock,
}

/// Backend implementation a kind is stored with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    File,
    EncryptedFile,
    KeyValue,
}

type DescribeFn = fn(&[u8]) -> Result<serde_json::Value, Error>;

struct KindEntry {
    name: &'static str,
    type_id: &'static str,
    encrypted_type_id: &'static str,
    backend: BackendKind,
    /// Durable copy is deleted when the owner closes.
    ephemeral: bool,
    describe: DescribeFn,
}

const CRITICAL: KindEntry = KindEntry {
    name: "critical",
    type_id: "CPTD",
    encrypted_type_id: "ECPTD",
    backend: BackendKind::File,
    ephemeral: false,
    describe: kinds::describe::<CriticalData>,
};

const SHOPPING: KindEntry = KindEntry {
    name: "shopping",
    type_id: "SPTD",
    encrypted_type_id: "ESPTD",
    backend: BackendKind::KeyValue,
    ephemeral: true,
    describe: kinds::describe::<ShoppingData>,
};

const STORE_HOURS: KindEntry = KindEntry {
    name: "store-hours",
    type_id: "STPTD",
    encrypted_type_id: "ESTPTD",
    backend: BackendKind::KeyValue,
    ephemeral: true,
    describe: kinds::describe::<StoreHoursData>,
};

const MOCK: KindEntry = KindEntry {
    name: "mock",
    type_id: "MPTD",
    encrypted_type_id: "EMPTD",
    backend: BackendKind::File,
    ephemeral: false,
    describe: kinds::describe::<MockData>,
};

impl RecordKind {
    pub const ALL: [RecordKind; 4] = [RecordKind::Critical, RecordKind::Shopping, RecordKind::StoreHours, RecordKind::Mock];

    fn entry(self) -> &'static KindEntry {
        match self {
            RecordKind::Critical => &CRITICAL,
            RecordKind::Shopping => &SHOPPING,
            RecordKind::StoreHours => &STORE_HOURS,
            RecordKind::Mock => &MOCK,
        }
    }

    pub fn name(self) -> &'static str {
        self.entry().name
    }

    pub fn type_id(self, encrypted: bool) -> &'static str {
        let entry = self.entry();
        if encrypted { entry.encrypted_type_id } else { entry.type_id }
    }

    /// Encrypted variants always live in encrypted files.
    pub fn backend_kind(self, encrypted: bool) -> BackendKind {
        if encrypted { BackendKind::EncryptedFile } else { self.entry().backend }
    }

    pub fn is_ephemeral(self) -> bool {
        self.entry().ephemeral
    }

    /// Decode stored bytes of this kind into JSON for inspection.
    pub fn describe(self, bytes: &[u8]) -> Result<serde_json::Value, Error> {
        (self.entry().describe)(bytes)
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for RecordKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        RecordKind::ALL
            .into_iter()
            .find(|kind| kind.name() == s)
            .ok_or_else(|| Error::UnknownKind(s.to_string()))
    }
}

/// Resolves record kinds to backend instances.
pub struct BackendRegistry {
    config: AppConfig,
    cipher_key: Option<[u8; 32]>,
    substitute: Option<Arc<dyn StorageBackend>>,
    ttl_overrides: HashMap<RecordKind, i64>,
    file: OnceLock<Arc<FileBackend>>,
    encrypted: OnceLock<Arc<EncryptedBackend>>,
    key_value: Mutex<HashMap<String, Arc<KeyValueBackend>>>,
}

impl fmt::Debug for BackendRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendRegistry")
            .field("storage_dir", &self.config.storage_dir)
            .field("substitute", &self.substitute.as_ref().map(|b| b.tag()))
            .field("profiles", &self.key_value().keys().cloned().collect::<Vec<_>>())
            .finish()
    }
}

impl BackendRegistry {
    /// Registry building real backends from `config`.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` if the configured cipher key is malformed.
    pub fn new(config: AppConfig) -> Result<Self, ConfigError> {
        let cipher_key = config.cipher_key_bytes()?;
        Ok(Self {
            config,
            cipher_key,
            substitute: None,
            ttl_overrides: HashMap::new(),
            file: OnceLock::new(),
            encrypted: OnceLock::new(),
            key_value: Mutex::new(HashMap::new()),
        })
    }

    /// Registry resolving every kind to `backend`.
    pub fn with_backend(backend: Arc<dyn StorageBackend>) -> Self {
        Self {
            config: AppConfig::default(),
            cipher_key: None,
            substitute: Some(backend),
            ttl_overrides: HashMap::new(),
            file: OnceLock::new(),
            encrypted: OnceLock::new(),
            key_value: Mutex::new(HashMap::new()),
        }
    }

    /// Override the time to live for one kind.
    pub fn with_time_to_live(mut self, kind: RecordKind, ttl_ms: i64) -> Self {
        self.ttl_overrides.insert(kind, ttl_ms);
        self
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn time_to_live_ms(&self, kind: RecordKind) -> i64 {
        if let Some(ttl) = self.ttl_overrides.get(&kind) {
            return *ttl;
        }
        match kind {
            RecordKind::Shopping => self.config.shopping_ttl_ms,
            RecordKind::StoreHours => self.config.store_hours_ttl_ms,
            RecordKind::Critical | RecordKind::Mock => NEVER_EXPIRES,
        }
    }

    /// Backend for `kind`, in its encrypted variant when `encrypted`.
    ///
    /// # Panics
    ///
    /// Panics when a key-value kind is requested unencrypted for an
    /// off-the-record profile.
    pub fn backend_for(&self, kind: RecordKind, encrypted: bool, profile: &Profile) -> Arc<dyn StorageBackend> {
        if let Some(substitute) = &self.substitute {
            return Arc::clone(substitute);
        }
        match kind.backend_kind(encrypted) {
            BackendKind::File => self.file_backend(),
            BackendKind::EncryptedFile => self.encrypted_backend(),
            BackendKind::KeyValue => self.key_value_backend(profile),
        }
    }

    /// Shared file backend.
    pub fn file_backend(&self) -> Arc<FileBackend> {
        Arc::clone(self.file.get_or_init(|| {
            let dir = self.config.file_storage_dir();
            tracing::debug!(dir = %dir.display(), "Creating file backend");
            Arc::new(FileBackend::new(dir))
        }))
    }

    fn encrypted_backend(&self) -> Arc<EncryptedBackend> {
        Arc::clone(self.encrypted.get_or_init(|| {
            let files = (*self.file_backend()).clone();
            Arc::new(EncryptedBackend::new(files, RecordCipher::new(self.cipher_key)))
        }))
    }

    fn key_value(&self) -> MutexGuard<'_, HashMap<String, Arc<KeyValueBackend>>> {
        self.key_value.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn key_value_backend(&self, profile: &Profile) -> Arc<KeyValueBackend> {
        let mut backends = self.key_value();
        let backend = backends.entry(profile.id().to_string()).or_insert_with(|| {
            tracing::debug!(profile = %profile.id(), "Creating key-value backend");
            Arc::new(KeyValueBackend::new(profile, self.config.profile_store_path(profile.id())))
        });
        Arc::clone(backend)
    }

    /// Drop and close the key-value backend of a destroyed profile.
    pub async fn on_profile_destroyed(&self, profile_id: &str) {
        let removed = self.key_value().remove(profile_id);
        if let Some(backend) = removed {
            backend.destroy().await;
        }
    }
}
