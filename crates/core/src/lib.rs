//! Core types and shared functionality for tabdata.
//!
//! This crate provides:
//! - Per-tab persisted records with a get-or-create cache protocol
//! - File, encrypted file and SQLite key-value storage backends
//! - Unified error types
//! - Configuration structures

pub mod config;
pub mod coordinator;
pub mod error;
pub mod kinds;
pub mod owner;
pub mod record;
pub mod registry;
pub mod storage;

pub use config::{AppConfig, ConfigError};
pub use coordinator::CacheCoordinator;
pub use error::Error;
pub use owner::{Owner, Profile, Tab};
pub use record::{Record, RecordData};
pub use registry::{BackendRegistry, RecordKind};
pub use storage::{RecordKey, SaveOutcome, StorageBackend};
