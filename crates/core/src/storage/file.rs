//! File-per-record backend.
//!
//! Each [`RecordKey`] maps to one file in the storage directory. All requests
//! go through a single FIFO queue drained by one task, so operations for a key
//! never overlap. A new save for a key that already has a queued save removes
//! the older one and is appended at the tail: the last write wins and stale
//! writes never hit the disk.
//!
//! Requests carry the tag of the backend that issued them, so operations
//! routed here by [`super::EncryptedBackend`] report under its tag.
//!
//! Writes go to a temporary sibling and are renamed over the target, so a
//! restore never observes a partial file.

use std::collections::VecDeque;
use std::fmt;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use tokio::sync::oneshot;

use super::metrics::{OpTimer, StorageOp};
use super::{PayloadSupplier, RecordKey, SaveOutcome, StorageBackend, evaluate_payload};

pub const TAG: &str = "FPTDS";

/// Backend persisting each record as one file.
///
/// Cheap to clone; clones share the queue.
#[derive(Clone, Debug)]
pub struct FileBackend {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    dir: PathBuf,
    state: Mutex<QueueState>,
}

#[derive(Debug, Default)]
struct QueueState {
    queue: VecDeque<StorageRequest>,
    draining: bool,
    first_dispatched: bool,
    first_request_anomaly: bool,
}

enum StorageRequest {
    Save { tag: &'static str, key: RecordKey, payload: PayloadSupplier, done: oneshot::Sender<SaveOutcome> },
    Restore { tag: &'static str, key: RecordKey, done: oneshot::Sender<Option<Vec<u8>>> },
    Delete { tag: &'static str, key: RecordKey, done: oneshot::Sender<()> },
}

impl StorageRequest {
    fn tag(&self) -> &'static str {
        match self {
            StorageRequest::Save { tag, .. } | StorageRequest::Restore { tag, .. } | StorageRequest::Delete { tag, .. } => {
                tag
            }
        }
    }

    fn key(&self) -> RecordKey {
        match self {
            StorageRequest::Save { key, .. } | StorageRequest::Restore { key, .. } | StorageRequest::Delete { key, .. } => {
                *key
            }
        }
    }

    fn op(&self) -> StorageOp {
        match self {
            StorageRequest::Save { .. } => StorageOp::Save,
            StorageRequest::Restore { .. } => StorageOp::Restore,
            StorageRequest::Delete { .. } => StorageOp::Delete,
        }
    }
}

impl fmt::Debug for StorageRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StorageRequest")
            .field("tag", &self.tag())
            .field("op", &self.op().as_str())
            .field("key", &self.key())
            .finish()
    }
}

impl FileBackend {
    /// Create a backend storing files under `dir`.
    ///
    /// The directory is created on the first write.
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self { inner: Arc::new(Inner { dir: dir.as_ref().to_path_buf(), state: Mutex::new(QueueState::default()) }) }
    }

    /// Storage directory.
    pub fn dir(&self) -> &Path {
        &self.inner.dir
    }

    /// File path for a key.
    pub fn path_for(&self, key: RecordKey) -> PathBuf {
        file_path(&self.inner.dir, key)
    }

    /// Number of requests waiting to run.
    pub fn pending(&self) -> usize {
        self.inner.lock().queue.len()
    }

    /// True if the first request ever drained was not a restore.
    ///
    /// Startup is expected to restore the most recently active tab first.
    pub fn first_request_anomaly(&self) -> bool {
        self.inner.lock().first_request_anomaly
    }

    fn enqueue(&self, request: StorageRequest) {
        let start_drain = {
            let mut state = self.inner.lock();
            if let StorageRequest::Save { key, .. } = &request {
                let key = *key;
                let existing = state
                    .queue
                    .iter()
                    .position(|queued| matches!(queued, StorageRequest::Save { key: k, .. } if *k == key));
                if let Some(StorageRequest::Save { done, .. }) = existing.and_then(|pos| state.queue.remove(pos)) {
                    tracing::debug!(key = %key, "Dropping superseded save");
                    let _ = done.send(SaveOutcome::Superseded);
                }
            }
            state.queue.push_back(request);
            !std::mem::replace(&mut state.draining, true)
        };

        if start_drain {
            tokio::spawn(drain(Arc::clone(&self.inner)));
        }
    }
}

/// Entry points for decorators that report metrics under their own tag.
impl FileBackend {
    pub(crate) fn save_tagged(
        &self, tag: &'static str, key: RecordKey, payload: PayloadSupplier,
    ) -> BoxFuture<'static, SaveOutcome> {
        let (done, rx) = oneshot::channel();
        self.enqueue(StorageRequest::Save { tag, key, payload, done });
        async move { rx.await.unwrap_or(SaveOutcome::Failed) }.boxed()
    }

    pub(crate) fn restore_tagged(&self, tag: &'static str, key: RecordKey) -> BoxFuture<'static, Option<Vec<u8>>> {
        let (done, rx) = oneshot::channel();
        self.enqueue(StorageRequest::Restore { tag, key, done });
        async move { rx.await.ok().flatten() }.boxed()
    }

    pub(crate) fn restore_blocking_tagged(&self, tag: &'static str, key: RecordKey) -> Option<Vec<u8>> {
        read_record(&self.inner.dir, tag, key)
    }

    pub(crate) fn delete_tagged(&self, tag: &'static str, key: RecordKey) -> BoxFuture<'static, ()> {
        let (done, rx) = oneshot::channel();
        self.enqueue(StorageRequest::Delete { tag, key, done });
        async move {
            let _ = rx.await;
        }
        .boxed()
    }
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn next_request(&self) -> Option<StorageRequest> {
        let mut state = self.lock();
        let Some(request) = state.queue.pop_front() else {
            state.draining = false;
            return None;
        };
        if !state.first_dispatched {
            state.first_dispatched = true;
            if !matches!(request, StorageRequest::Restore { .. }) {
                state.first_request_anomaly = true;
                tracing::warn!(op = request.op().as_str(), key = %request.key(), "First storage request was not a restore");
            }
        }
        Some(request)
    }
}

/// Run queued requests one at a time until the queue is empty.
///
/// Each completion is sent before the next request starts.
async fn drain(inner: Arc<Inner>) {
    while let Some(request) = inner.next_request() {
        let dir = inner.dir.clone();
        match request {
            StorageRequest::Save { tag, key, payload, done } => {
                let outcome = tokio::task::spawn_blocking(move || write_record(&dir, tag, key, payload))
                    .await
                    .unwrap_or_else(|e| {
                        tracing::warn!(key = %key, error = %e, "Save task failed");
                        SaveOutcome::Failed
                    });
                let _ = done.send(outcome);
            }
            StorageRequest::Restore { tag, key, done } => {
                let bytes = tokio::task::spawn_blocking(move || read_record(&dir, tag, key))
                    .await
                    .unwrap_or_else(|e| {
                        tracing::warn!(key = %key, error = %e, "Restore task failed");
                        None
                    });
                let _ = done.send(bytes);
            }
            StorageRequest::Delete { tag, key, done } => {
                if let Err(e) = tokio::task::spawn_blocking(move || delete_record(&dir, tag, key)).await {
                    tracing::warn!(key = %key, error = %e, "Delete task failed");
                }
                let _ = done.send(());
            }
        }
    }
}

fn file_path(dir: &Path, key: RecordKey) -> PathBuf {
    dir.join(format!("{}_{}", key.owner_id, key.type_id))
}

fn write_record(dir: &Path, tag: &'static str, key: RecordKey, payload: PayloadSupplier) -> SaveOutcome {
    let timer = OpTimer::start(tag, key, StorageOp::Save);
    let bytes = match evaluate_payload(payload) {
        Ok(Some(bytes)) => bytes,
        Ok(None) => {
            tracing::debug!(key = %key, "Empty payload; skipping save");
            return SaveOutcome::Skipped;
        }
        Err(()) => {
            tracing::warn!(key = %key, "Serializing record failed; nothing written");
            timer.finish(false);
            return SaveOutcome::Failed;
        }
    };

    match atomic_write(dir, &file_path(dir, key), &bytes) {
        Ok(()) => {
            tracing::debug!(key = %key, len = bytes.len(), "Saved record");
            timer.finish(true);
            SaveOutcome::Written
        }
        Err(e) => {
            tracing::warn!(key = %key, error = %e, "Writing record failed");
            timer.finish(false);
            SaveOutcome::Failed
        }
    }
}

fn atomic_write(dir: &Path, path: &Path, bytes: &[u8]) -> io::Result<()> {
    fs::create_dir_all(dir)?;
    let temp_path = path.with_extension("tmp");
    {
        let mut file = fs::File::create(&temp_path)?;
        file.write_all(bytes)?;
        file.sync_all()?;
    }
    fs::rename(&temp_path, path)
}

fn read_record(dir: &Path, tag: &'static str, key: RecordKey) -> Option<Vec<u8>> {
    let timer = OpTimer::start(tag, key, StorageOp::Restore);
    match fs::read(file_path(dir, key)) {
        Ok(bytes) => {
            timer.finish(true);
            Some(bytes)
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            tracing::debug!(key = %key, "No stored record");
            timer.finish(false);
            None
        }
        Err(e) => {
            tracing::warn!(key = %key, error = %e, "Reading record failed");
            timer.finish(false);
            None
        }
    }
}

fn delete_record(dir: &Path, tag: &'static str, key: RecordKey) {
    let timer = OpTimer::start(tag, key, StorageOp::Delete);
    let path = file_path(dir, key);
    let exists = path.exists();
    tracing::debug!(key = %key, exists, "Deleting record");
    if !exists {
        timer.finish(true);
        return;
    }
    match fs::remove_file(&path) {
        Ok(()) => {
            timer.finish(true);
        }
        Err(e) => {
            tracing::warn!(key = %key, error = %e, "Deleting record failed");
            timer.finish(false);
        }
    }
}

impl StorageBackend for FileBackend {
    fn save(&self, key: RecordKey, payload: PayloadSupplier) -> BoxFuture<'static, SaveOutcome> {
        self.save_tagged(TAG, key, payload)
    }

    fn restore(&self, key: RecordKey) -> BoxFuture<'static, Option<Vec<u8>>> {
        self.restore_tagged(TAG, key)
    }

    fn restore_blocking(&self, key: RecordKey) -> Option<Vec<u8>> {
        self.restore_blocking_tagged(TAG, key)
    }

    fn delete(&self, key: RecordKey) -> BoxFuture<'static, ()> {
        self.delete_tagged(TAG, key)
    }

    fn tag(&self) -> &'static str {
        TAG
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(bytes: &[u8]) -> PayloadSupplier {
        let bytes = bytes.to_vec();
        Box::new(move || Some(bytes))
    }

    #[tokio::test]
    async fn test_save_and_restore() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FileBackend::new(dir.path());
        let key = RecordKey::new(1, "CPTD");

        assert_eq!(backend.save(key, payload(b"hello")).await, SaveOutcome::Written);
        assert_eq!(backend.restore(key).await, Some(b"hello".to_vec()));
        assert!(backend.path_for(key).ends_with("1_CPTD"));
    }

    #[tokio::test]
    async fn test_restore_missing() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FileBackend::new(dir.path());
        assert!(backend.restore(RecordKey::new(9, "CPTD")).await.is_none());
    }

    #[tokio::test]
    async fn test_last_write_wins() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FileBackend::new(dir.path());
        let key = RecordKey::new(2, "MPTD");

        let a = backend.save(key, payload(b"A"));
        let b = backend.save(key, payload(b"B"));
        let c = backend.save(key, payload(b"C"));
        assert_eq!(backend.pending(), 1);

        assert_eq!(a.await, SaveOutcome::Superseded);
        assert_eq!(b.await, SaveOutcome::Superseded);
        assert_eq!(c.await, SaveOutcome::Written);
        assert_eq!(std::fs::read(backend.path_for(key)).unwrap(), b"C");
    }

    #[tokio::test]
    async fn test_superseding_save_moves_behind_delete() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FileBackend::new(dir.path());
        let key = RecordKey::new(3, "MPTD");

        let first = backend.save(key, payload(b"old"));
        let delete = backend.delete(key);
        let second = backend.save(key, payload(b"new"));

        assert_eq!(first.await, SaveOutcome::Superseded);
        delete.await;
        assert_eq!(second.await, SaveOutcome::Written);
        assert_eq!(backend.restore(key).await, Some(b"new".to_vec()));
    }

    #[tokio::test]
    async fn test_saves_for_different_keys_all_run() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FileBackend::new(dir.path());

        let a = backend.save(RecordKey::new(1, "MPTD"), payload(b"1"));
        let b = backend.save(RecordKey::new(2, "MPTD"), payload(b"2"));
        assert_eq!(backend.pending(), 2);
        assert_eq!(a.await, SaveOutcome::Written);
        assert_eq!(b.await, SaveOutcome::Written);
    }

    #[tokio::test]
    async fn test_empty_payload_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FileBackend::new(dir.path());
        let key = RecordKey::new(4, "MPTD");

        assert_eq!(backend.save(key, Box::new(|| Some(Vec::new()))).await, SaveOutcome::Skipped);
        assert_eq!(backend.save(key, Box::new(|| None)).await, SaveOutcome::Skipped);
        assert!(!backend.path_for(key).exists());
    }

    #[tokio::test]
    async fn test_delete() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FileBackend::new(dir.path());
        let key = RecordKey::new(5, "CPTD");

        backend.save(key, payload(b"x")).await;
        backend.delete(key).await;
        assert!(backend.restore(key).await.is_none());

        // Deleting a missing record is a no-op.
        backend.delete(key).await;
    }

    #[tokio::test]
    async fn test_first_request_anomaly() {
        let dir = tempfile::tempdir().unwrap();

        let restore_first = FileBackend::new(dir.path());
        restore_first.restore(RecordKey::new(1, "CPTD")).await;
        restore_first.save(RecordKey::new(1, "CPTD"), payload(b"x")).await;
        assert!(!restore_first.first_request_anomaly());

        let save_first = FileBackend::new(dir.path());
        save_first.save(RecordKey::new(1, "CPTD"), payload(b"y")).await;
        assert!(save_first.first_request_anomaly());
    }

    #[tokio::test]
    async fn test_restore_blocking() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FileBackend::new(dir.path());
        let key = RecordKey::new(6, "CPTD");

        backend.save(key, payload(b"critical")).await;
        assert_eq!(backend.restore_blocking(key), Some(b"critical".to_vec()));
        assert!(backend.restore_blocking(RecordKey::new(7, "CPTD")).is_none());
    }

    #[tokio::test]
    async fn test_requests_carry_issuing_tag() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FileBackend::new(dir.path());
        let key = RecordKey::new(9, "ECPTD");

        let save = backend.save_tagged("EFPTDS", key, payload(b"x"));
        let delete = backend.delete(key);
        let tags: Vec<&str> = backend.inner.lock().queue.iter().map(StorageRequest::tag).collect();
        assert_eq!(tags, ["EFPTDS", TAG]);

        assert_eq!(save.await, SaveOutcome::Written);
        delete.await;
    }

    #[tokio::test]
    async fn test_write_failure_reports_failed() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not-a-dir");
        std::fs::write(&blocker, b"file").unwrap();

        let backend = FileBackend::new(&blocker);
        let key = RecordKey::new(8, "CPTD");
        assert_eq!(backend.save(key, payload(b"x")).await, SaveOutcome::Failed);
        assert!(backend.restore(key).await.is_none());
    }
}
