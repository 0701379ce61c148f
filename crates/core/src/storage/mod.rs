//! Durable storage backends for persisted records.
//!
//! Every backend stores one opaque byte payload per [`RecordKey`]. Backends
//! never surface storage failures to callers: a failed or missing read is an
//! absent payload, and a failed write is logged and reported through
//! [`SaveOutcome`].
//!
//! Requests are registered when a backend method is *called*. The returned
//! future only waits for completion, so dropping it does not cancel the work.

use std::fmt;

use futures_util::future::BoxFuture;

pub mod cipher;
pub mod encrypted;
pub mod file;
pub mod kv;
pub mod memory;
pub mod metrics;

pub use encrypted::EncryptedBackend;
pub use file::FileBackend;
pub use kv::KeyValueBackend;
pub use memory::InMemoryBackend;

/// Identity of one stored record: the owning tab and the record type id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RecordKey {
    pub owner_id: i32,
    pub type_id: &'static str,
}

impl RecordKey {
    pub fn new(owner_id: i32, type_id: &'static str) -> Self {
        Self { owner_id, type_id }
    }
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner_id, self.type_id)
    }
}

/// Lazily evaluated payload producer.
///
/// Called on the backend's executor so serialization cost is not paid by the
/// caller. Returning `None` or an empty payload skips the write.
pub type PayloadSupplier = Box<dyn FnOnce() -> Option<Vec<u8>> + Send>;

/// How a save request ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    /// Payload written.
    Written,
    /// Supplier produced no payload; nothing written.
    Skipped,
    /// A later save for the same key replaced this one before it ran.
    Superseded,
    /// Write or serialization failed; logged.
    Failed,
}

/// Durable save/restore/delete of a byte payload keyed by [`RecordKey`].
pub trait StorageBackend: Send + Sync + fmt::Debug {
    /// Persist the supplier's payload for `key`.
    fn save(&self, key: RecordKey, payload: PayloadSupplier) -> BoxFuture<'static, SaveOutcome>;

    /// Read the payload for `key`; `None` if missing or unreadable.
    fn restore(&self, key: RecordKey) -> BoxFuture<'static, Option<Vec<u8>>>;

    /// Read the payload for `key` on the calling thread.
    ///
    /// # Panics
    ///
    /// Backends that cannot block the caller panic; calling this on them is a
    /// programming error.
    fn restore_blocking(&self, key: RecordKey) -> Option<Vec<u8>>;

    /// Remove the payload for `key`. Failures are logged.
    fn delete(&self, key: RecordKey) -> BoxFuture<'static, ()>;

    /// Stable identifier used in logs and metrics.
    fn tag(&self) -> &'static str;
}

/// Evaluate a supplier, treating a panic as a serialization failure.
pub(crate) fn evaluate_payload(payload: PayloadSupplier) -> Result<Option<Vec<u8>>, ()> {
    match std::panic::catch_unwind(std::panic::AssertUnwindSafe(payload)) {
        Ok(Some(bytes)) if bytes.is_empty() => Ok(None),
        Ok(bytes) => Ok(bytes),
        Err(_) => Err(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_key_display() {
        assert_eq!(RecordKey::new(7, "SPTD").to_string(), "7/SPTD");
    }

    #[test]
    fn test_evaluate_payload_empty_is_absent() {
        assert_eq!(evaluate_payload(Box::new(|| Some(Vec::new()))), Ok(None));
        assert_eq!(evaluate_payload(Box::new(|| None)), Ok(None));
    }

    #[test]
    fn test_evaluate_payload_panic_is_failure() {
        assert_eq!(evaluate_payload(Box::new(|| -> Option<Vec<u8>> { panic!("serializer blew up") })), Err(()));
    }

    #[test]
    fn test_evaluate_payload_bytes() {
        assert_eq!(evaluate_payload(Box::new(|| Some(vec![1, 2, 3]))), Ok(Some(vec![1, 2, 3])));
    }
}
