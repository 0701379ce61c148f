//! In-memory persisted records.
//!
//! A [`Record`] pairs kind-specific data ([`RecordData`]) with the key and
//! backend it persists through. Records are either fully decoded or absent:
//! bytes that fail to decode never produce a record.

use std::any::Any;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use futures_util::FutureExt;
use futures_util::future::BoxFuture;

use crate::Error;
use crate::owner::AttachedRecord;
use crate::registry::RecordKind;
use crate::storage::{PayloadSupplier, RecordKey, SaveOutcome, StorageBackend};

/// `last_updated_ms` of a record that was never populated.
pub const UNKNOWN_TIMESTAMP: i64 = 0;

/// `time_to_live_ms` of a record that never goes stale.
pub const NEVER_EXPIRES: i64 = i64::MAX;

/// Current wall-clock time in milliseconds since the Unix epoch.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Kind-specific payload of a record, with its encoder and decoder.
pub trait RecordData: Clone + Send + Sync + 'static {
    const KIND: RecordKind;

    fn encode(&self) -> Result<Vec<u8>, Error>;

    fn decode(bytes: &[u8]) -> Result<Self, Error>;

    fn last_updated_ms(&self) -> i64;

    fn set_last_updated_ms(&mut self, ms: i64);

    /// Whether the data is complete enough to be persisted.
    fn is_save_worthy(&self) -> bool {
        true
    }
}

/// Whether data last refreshed at `last_updated_ms` is stale at `now`.
pub fn is_stale(last_updated_ms: i64, time_to_live_ms: i64, now: i64) -> bool {
    if time_to_live_ms == NEVER_EXPIRES {
        return false;
    }
    if last_updated_ms == UNKNOWN_TIMESTAMP {
        return true;
    }
    last_updated_ms.saturating_add(time_to_live_ms) < now
}

/// A record owned by one tab.
pub struct Record<D: RecordData> {
    key: RecordKey,
    backend: Arc<dyn StorageBackend>,
    data: Arc<Mutex<D>>,
    time_to_live_ms: i64,
    save_enabled: AtomicBool,
}

impl<D: RecordData + fmt::Debug> fmt::Debug for Record<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Record")
            .field("key", &self.key)
            .field("backend", &self.backend.tag())
            .field("data", &*self.data())
            .field("time_to_live_ms", &self.time_to_live_ms)
            .field("save_enabled", &self.is_saving_enabled())
            .finish()
    }
}

impl<D: RecordData> Record<D> {
    pub fn new(key: RecordKey, backend: Arc<dyn StorageBackend>, data: D, time_to_live_ms: i64) -> Self {
        Self { key, backend, data: Arc::new(Mutex::new(data)), time_to_live_ms, save_enabled: AtomicBool::new(true) }
    }

    /// Decode a record from stored bytes.
    ///
    /// Returns `None` (and logs) if the bytes are corrupt.
    pub fn from_bytes(
        key: RecordKey, backend: Arc<dyn StorageBackend>, bytes: &[u8], time_to_live_ms: i64,
    ) -> Option<Self> {
        match D::decode(bytes) {
            Ok(data) => Some(Self::new(key, backend, data, time_to_live_ms)),
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Stored record is corrupt; treating as absent");
                None
            }
        }
    }

    fn data(&self) -> MutexGuard<'_, D> {
        self.data.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn key(&self) -> RecordKey {
        self.key
    }

    /// Copy of the current data.
    pub fn snapshot(&self) -> D {
        self.data().clone()
    }

    /// Read the current data without copying it.
    pub fn with<R>(&self, f: impl FnOnce(&D) -> R) -> R {
        f(&*self.data())
    }

    pub fn last_updated_ms(&self) -> i64 {
        self.data().last_updated_ms()
    }

    pub fn time_to_live_ms(&self) -> i64 {
        self.time_to_live_ms
    }

    pub fn needs_refresh(&self) -> bool {
        self.needs_refresh_at(now_ms())
    }

    pub fn needs_refresh_at(&self, now: i64) -> bool {
        is_stale(self.last_updated_ms(), self.time_to_live_ms, now)
    }

    /// Apply a mutation and persist the result.
    pub fn update(&self, f: impl FnOnce(&mut D)) {
        f(&mut *self.data());
        // Completion is not awaited; the backend has already queued the write.
        drop(self.save());
    }

    /// Persist the record.
    ///
    /// Encoding happens when the backend runs the write, so it sees the
    /// latest data. Skipped if saving is disabled or the data is not yet
    /// save-worthy.
    pub fn save(&self) -> BoxFuture<'static, SaveOutcome> {
        if !self.is_saving_enabled() {
            tracing::debug!(key = %self.key, "Saving disabled; skipping");
            return futures_util::future::ready(SaveOutcome::Skipped).boxed();
        }
        if !self.data().is_save_worthy() {
            tracing::debug!(key = %self.key, "Record not save-worthy yet; skipping");
            return futures_util::future::ready(SaveOutcome::Skipped).boxed();
        }

        let data = Arc::clone(&self.data);
        let key = self.key;
        let payload: PayloadSupplier = Box::new(move || {
            let data = data.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            match data.encode() {
                Ok(bytes) => Some(bytes),
                Err(e) => {
                    tracing::warn!(key = %key, error = %e, "Encoding record failed; not saved");
                    None
                }
            }
        });
        self.backend.save(self.key, payload)
    }

    /// Remove the durable copy.
    pub fn delete(&self) -> BoxFuture<'static, ()> {
        self.backend.delete(self.key)
    }

    pub fn disable_saving(&self) {
        self.save_enabled.store(false, Ordering::SeqCst);
    }

    pub fn is_saving_enabled(&self) -> bool {
        self.save_enabled.load(Ordering::SeqCst)
    }
}

impl<D: RecordData> AttachedRecord for Record<D> {
    fn kind(&self) -> RecordKind {
        D::KIND
    }

    fn disable_saving(&self) {
        Record::disable_saving(self);
    }

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kinds::mock::MockData;
    use crate::storage::InMemoryBackend;

    fn record(backend: &InMemoryBackend, data: MockData, ttl: i64) -> Record<MockData> {
        Record::new(RecordKey::new(1, "MPTD"), Arc::new(backend.clone()), data, ttl)
    }

    #[test]
    fn test_never_expires() {
        assert!(!is_stale(UNKNOWN_TIMESTAMP, NEVER_EXPIRES, 1_000));
        assert!(!is_stale(5, NEVER_EXPIRES, i64::MAX));
    }

    #[test]
    fn test_unknown_timestamp_is_stale() {
        assert!(is_stale(UNKNOWN_TIMESTAMP, 60_000, 1_000));
    }

    #[test]
    fn test_ttl_expiry() {
        let now = 1_700_000_000_000;
        let ttl = 3_600_000;
        assert!(is_stale(now - ttl - 1, ttl, now));
        assert!(!is_stale(now - ttl, ttl, now));
        assert!(!is_stale(now, ttl, now));
    }

    #[test]
    fn test_record_needs_refresh() {
        let backend = InMemoryBackend::new();
        let now = now_ms();
        let ttl = 10_000;

        let stale = record(&backend, MockData { field: 1, last_updated_ms: now - ttl - 1 }, ttl);
        assert!(stale.needs_refresh_at(now));

        let fresh = record(&backend, MockData { field: 1, last_updated_ms: now }, ttl);
        assert!(!fresh.needs_refresh_at(now));
    }

    #[test]
    fn test_corrupt_bytes_are_absent() {
        let backend = InMemoryBackend::new();
        let bytes = MockData { field: 42, last_updated_ms: 99 }.encode().unwrap();
        let truncated = &bytes[..bytes.len() / 2];
        let restored =
            Record::<MockData>::from_bytes(RecordKey::new(1, "MPTD"), Arc::new(backend), truncated, NEVER_EXPIRES);
        assert!(restored.is_none());
    }

    #[tokio::test]
    async fn test_update_saves() {
        let backend = InMemoryBackend::new();
        let rec = record(&backend, MockData::default(), NEVER_EXPIRES);

        rec.update(|d| d.field = 17);

        let stored = backend.get(rec.key()).unwrap();
        assert_eq!(MockData::decode(&stored).unwrap().field, 17);
    }

    #[tokio::test]
    async fn test_disabled_record_does_not_save() {
        let backend = InMemoryBackend::new();
        let rec = record(&backend, MockData::default(), NEVER_EXPIRES);

        rec.disable_saving();
        assert_eq!(rec.save().await, SaveOutcome::Skipped);
        rec.update(|d| d.field = 3);
        assert!(!backend.contains(rec.key()));
        assert_eq!(rec.snapshot().field, 3);
    }

    #[tokio::test]
    async fn test_delete_removes_durable_copy() {
        let backend = InMemoryBackend::new();
        let rec = record(&backend, MockData { field: 2, last_updated_ms: 1 }, NEVER_EXPIRES);
        assert_eq!(rec.save().await, SaveOutcome::Written);
        rec.delete().await;
        assert!(!backend.contains(rec.key()));
    }
}
