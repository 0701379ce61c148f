//! In-memory backend for hermetic tests and dry runs.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use futures_util::FutureExt;
use futures_util::future::BoxFuture;

use super::{PayloadSupplier, RecordKey, SaveOutcome, StorageBackend, evaluate_payload};

pub const TAG: &str = "MEMPTDS";

/// Backend keeping payloads in a map. Counts calls so tests can assert on them.
#[derive(Debug, Default, Clone)]
pub struct InMemoryBackend {
    entries: Arc<Mutex<HashMap<RecordKey, Vec<u8>>>>,
    counters: Arc<Counters>,
}

#[derive(Debug, Default)]
struct Counters {
    saves: AtomicUsize,
    restores: AtomicUsize,
    deletes: AtomicUsize,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<RecordKey, Vec<u8>>> {
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Store raw bytes directly, bypassing the save path.
    pub fn insert(&self, key: RecordKey, bytes: Vec<u8>) {
        self.entries().insert(key, bytes);
    }

    /// Raw bytes stored for a key.
    pub fn get(&self, key: RecordKey) -> Option<Vec<u8>> {
        self.entries().get(&key).cloned()
    }

    pub fn contains(&self, key: RecordKey) -> bool {
        self.entries().contains_key(&key)
    }

    pub fn save_count(&self) -> usize {
        self.counters.saves.load(Ordering::SeqCst)
    }

    pub fn restore_count(&self) -> usize {
        self.counters.restores.load(Ordering::SeqCst)
    }

    pub fn delete_count(&self) -> usize {
        self.counters.deletes.load(Ordering::SeqCst)
    }
}

impl StorageBackend for InMemoryBackend {
    fn save(&self, key: RecordKey, payload: PayloadSupplier) -> BoxFuture<'static, SaveOutcome> {
        self.counters.saves.fetch_add(1, Ordering::SeqCst);
        let outcome = match evaluate_payload(payload) {
            Ok(Some(bytes)) => {
                self.entries().insert(key, bytes);
                SaveOutcome::Written
            }
            Ok(None) => SaveOutcome::Skipped,
            Err(()) => SaveOutcome::Failed,
        };
        futures_util::future::ready(outcome).boxed()
    }

    fn restore(&self, key: RecordKey) -> BoxFuture<'static, Option<Vec<u8>>> {
        futures_util::future::ready(self.restore_blocking(key)).boxed()
    }

    fn restore_blocking(&self, key: RecordKey) -> Option<Vec<u8>> {
        self.counters.restores.fetch_add(1, Ordering::SeqCst);
        self.get(key)
    }

    fn delete(&self, key: RecordKey) -> BoxFuture<'static, ()> {
        self.counters.deletes.fetch_add(1, Ordering::SeqCst);
        self.entries().remove(&key);
        futures_util::future::ready(()).boxed()
    }

    fn tag(&self) -> &'static str {
        TAG
    }
}
