//! Backend over a per-profile namespaced key-value store.
//!
//! One instance exists per profile. The SQLite database is opened on first
//! use and closed by [`KeyValueBackend::destroy`] when the profile goes away.
//! Requests are sent to one worker task when a method is called and run in
//! that order, so a delete issued after a save always lands after it.
//! Only asynchronous restore is supported.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use tokio::sync::{OnceCell, mpsc, oneshot};

pub mod connection;
pub mod entries;
pub mod migrations;

pub use connection::KvStore;

use super::metrics::{OpTimer, StorageOp};
use super::{PayloadSupplier, RecordKey, SaveOutcome, StorageBackend};
use crate::Error;
use crate::owner::Profile;

pub const TAG: &str = "KVPTDS";

/// Namespace holding every persisted record entry.
pub const NAMESPACE: &str = "persisted_tab_data";

/// Separator between owner id and type id in entry keys.
pub const KEY_SEPARATOR: char = '-';

/// Entry key for a record.
pub fn entry_key(key: RecordKey) -> String {
    format!("{}{KEY_SEPARATOR}{}", key.owner_id, key.type_id)
}

#[derive(Clone, Debug)]
pub struct KeyValueBackend {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    profile_id: String,
    requests: mpsc::UnboundedSender<KvRequest>,
    /// Receiving end, taken by the worker on the first request.
    idle: Mutex<Option<mpsc::UnboundedReceiver<KvRequest>>>,
    store: Arc<Store>,
    destroy_requested: AtomicBool,
}

/// State owned by the worker. It does not hold the sender, so the worker
/// exits once every handle to the backend is dropped.
#[derive(Debug)]
struct Store {
    profile_id: String,
    /// `None` for an in-memory database.
    path: Option<PathBuf>,
    conn: OnceCell<KvStore>,
    destroyed: AtomicBool,
}

enum KvRequest {
    Save { key: RecordKey, payload: PayloadSupplier, done: oneshot::Sender<SaveOutcome> },
    Restore { key: RecordKey, done: oneshot::Sender<Option<Vec<u8>>> },
    Delete { key: RecordKey, done: oneshot::Sender<()> },
    Destroy { done: oneshot::Sender<()> },
}

impl std::fmt::Debug for KvRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            KvRequest::Save { key, .. } => f.debug_tuple("Save").field(key).finish(),
            KvRequest::Restore { key, .. } => f.debug_tuple("Restore").field(key).finish(),
            KvRequest::Delete { key, .. } => f.debug_tuple("Delete").field(key).finish(),
            KvRequest::Destroy { .. } => f.write_str("Destroy"),
        }
    }
}

impl KeyValueBackend {
    /// Backend for `profile`, stored at `path`.
    ///
    /// # Panics
    ///
    /// Panics if `profile` is off the record; those profiles must use the
    /// encrypted file backend.
    pub fn new(profile: &Profile, path: impl Into<PathBuf>) -> Self {
        Self::build(profile, Some(path.into()))
    }

    /// Backend for `profile` over an in-memory database.
    ///
    /// # Panics
    ///
    /// Panics if `profile` is off the record.
    pub fn in_memory(profile: &Profile) -> Self {
        Self::build(profile, None)
    }

    fn build(profile: &Profile, path: Option<PathBuf>) -> Self {
        assert!(
            !profile.is_off_the_record(),
            "key-value storage must not be used for off-the-record profile {}",
            profile.id()
        );
        let (requests, idle) = mpsc::unbounded_channel();
        Self {
            inner: Arc::new(Inner {
                profile_id: profile.id().to_string(),
                requests,
                idle: Mutex::new(Some(idle)),
                store: Arc::new(Store {
                    profile_id: profile.id().to_string(),
                    path,
                    conn: OnceCell::new(),
                    destroyed: AtomicBool::new(false),
                }),
                destroy_requested: AtomicBool::new(false),
            }),
        }
    }

    pub fn is_destroyed(&self) -> bool {
        self.inner.destroy_requested.load(Ordering::SeqCst)
    }

    /// Close the store once every earlier request has run. Later operations
    /// do nothing and restore nothing.
    pub async fn destroy(&self) {
        if self.inner.destroy_requested.swap(true, Ordering::SeqCst) {
            return;
        }
        tracing::info!(profile = %self.inner.profile_id, "Destroying key-value backend");
        let (done, rx) = oneshot::channel();
        self.enqueue(KvRequest::Destroy { done });
        let _ = rx.await;
    }

    /// Hand `request` to the worker, starting it on first use.
    fn enqueue(&self, request: KvRequest) {
        let idle = self.inner.idle.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).take();
        if let Some(requests) = idle {
            tokio::spawn(run(Arc::clone(&self.inner.store), requests));
        }
        if let Err(rejected) = self.inner.requests.send(request) {
            tracing::warn!(profile = %self.inner.profile_id, request = ?rejected.0, "Key-value worker is gone");
        }
    }
}

/// Run requests one at a time in the order they were sent.
async fn run(store: Arc<Store>, mut requests: mpsc::UnboundedReceiver<KvRequest>) {
    while let Some(request) = requests.recv().await {
        match request {
            KvRequest::Save { key, payload, done } => {
                let _ = done.send(store.save(key, payload).await);
            }
            KvRequest::Restore { key, done } => {
                let _ = done.send(store.restore(key).await);
            }
            KvRequest::Delete { key, done } => {
                store.delete(key).await;
                let _ = done.send(());
            }
            KvRequest::Destroy { done } => {
                store.destroy().await;
                let _ = done.send(());
            }
        }
    }
}

impl Store {
    async fn conn(&self) -> Result<&KvStore, Error> {
        if self.destroyed.load(Ordering::SeqCst) {
            return Err(Error::StoreDestroyed(self.profile_id.clone()));
        }
        self.conn
            .get_or_try_init(|| async {
                match &self.path {
                    Some(path) => KvStore::open(path).await,
                    None => KvStore::open_in_memory().await,
                }
            })
            .await
    }

    async fn destroy(&self) {
        self.destroyed.store(true, Ordering::SeqCst);
        if let Some(conn) = self.conn.get() {
            conn.clone().close().await;
        }
    }

    async fn save(&self, key: RecordKey, payload: PayloadSupplier) -> SaveOutcome {
        let timer = OpTimer::start(TAG, key, StorageOp::Save);
        let result = match self.conn().await {
            Ok(conn) => conn.put_entry(NAMESPACE, &entry_key(key), payload).await,
            Err(e) => Err(e),
        };
        match result {
            Ok(outcome) => {
                timer.finish(outcome == SaveOutcome::Written);
                outcome
            }
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Saving entry failed");
                timer.finish(false);
                SaveOutcome::Failed
            }
        }
    }

    async fn restore(&self, key: RecordKey) -> Option<Vec<u8>> {
        let timer = OpTimer::start(TAG, key, StorageOp::Restore);
        let result = match self.conn().await {
            Ok(conn) => conn.get_entry(NAMESPACE, &entry_key(key)).await,
            Err(e) => Err(e),
        };
        match result {
            Ok(value) => {
                timer.finish(value.is_some());
                value
            }
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Restoring entry failed");
                timer.finish(false);
                None
            }
        }
    }

    async fn delete(&self, key: RecordKey) {
        let timer = OpTimer::start(TAG, key, StorageOp::Delete);
        let result = match self.conn().await {
            Ok(conn) => conn.delete_entry(NAMESPACE, &entry_key(key)).await,
            Err(e) => Err(e),
        };
        match result {
            Ok(deleted) => {
                tracing::debug!(key = %key, existed = deleted > 0, "Deleted entry");
                timer.finish(true);
            }
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Deleting entry failed");
                timer.finish(false);
            }
        }
    }
}

impl StorageBackend for KeyValueBackend {
    fn save(&self, key: RecordKey, payload: PayloadSupplier) -> BoxFuture<'static, SaveOutcome> {
        let (done, rx) = oneshot::channel();
        self.enqueue(KvRequest::Save { key, payload, done });
        async move { rx.await.unwrap_or(SaveOutcome::Failed) }.boxed()
    }

    fn restore(&self, key: RecordKey) -> BoxFuture<'static, Option<Vec<u8>>> {
        let (done, rx) = oneshot::channel();
        self.enqueue(KvRequest::Restore { key, done });
        async move { rx.await.ok().flatten() }.boxed()
    }

    fn restore_blocking(&self, _key: RecordKey) -> Option<Vec<u8>> {
        panic!("{TAG} does not support synchronous restore");
    }

    fn delete(&self, key: RecordKey) -> BoxFuture<'static, ()> {
        let (done, rx) = oneshot::channel();
        self.enqueue(KvRequest::Delete { key, done });
        async move {
            let _ = rx.await;
        }
        .boxed()
    }

    fn tag(&self) -> &'static str {
        TAG
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile() -> Profile {
        Profile::new("Default")
    }

    #[test]
    fn test_entry_key() {
        assert_eq!(entry_key(RecordKey::new(12, "SPTD")), "12-SPTD");
    }

    #[tokio::test]
    async fn test_save_restore_delete() {
        let backend = KeyValueBackend::in_memory(&profile());
        let key = RecordKey::new(1, "SPTD");

        let outcome = backend.save(key, Box::new(|| Some(b"price".to_vec()))).await;
        assert_eq!(outcome, SaveOutcome::Written);
        assert_eq!(backend.restore(key).await, Some(b"price".to_vec()));

        backend.delete(key).await;
        assert!(backend.restore(key).await.is_none());
    }

    #[tokio::test]
    async fn test_persists_across_instances() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Default.sqlite");
        let key = RecordKey::new(2, "STPTD");

        let first = KeyValueBackend::new(&profile(), &path);
        first.save(key, Box::new(|| Some(b"hours".to_vec()))).await;
        first.destroy().await;

        let second = KeyValueBackend::new(&profile(), &path);
        assert_eq!(second.restore(key).await, Some(b"hours".to_vec()));
    }

    #[tokio::test]
    async fn test_destroyed_backend_is_inert() {
        let backend = KeyValueBackend::in_memory(&profile());
        let key = RecordKey::new(3, "SPTD");
        backend.save(key, Box::new(|| Some(b"x".to_vec()))).await;

        backend.destroy().await;
        assert!(backend.is_destroyed());
        assert!(backend.restore(key).await.is_none());
        assert_eq!(backend.save(key, Box::new(|| Some(b"y".to_vec()))).await, SaveOutcome::Failed);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_delete_issued_after_save_runs_after_it() {
        let backend = KeyValueBackend::in_memory(&profile());

        for id in 0..200 {
            let key = RecordKey::new(id, "SPTD");
            let save = backend.save(key, Box::new(|| Some(b"price".to_vec())));
            let delete = backend.delete(key);
            assert_eq!(save.await, SaveOutcome::Written);
            delete.await;
            assert!(backend.restore(key).await.is_none(), "entry {key} survived its delete");
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_unawaited_requests_keep_call_order() {
        let backend = KeyValueBackend::in_memory(&profile());
        let key = RecordKey::new(7, "STPTD");

        let first = backend.save(key, Box::new(|| Some(b"one".to_vec())));
        let read_first = backend.restore(key);
        let second = backend.save(key, Box::new(|| Some(b"two".to_vec())));
        let read_second = backend.restore(key);

        let (_, one, _, two) = tokio::join!(first, read_first, second, read_second);
        assert_eq!(one, Some(b"one".to_vec()));
        assert_eq!(two, Some(b"two".to_vec()));
    }

    #[tokio::test]
    async fn test_destroy_waits_for_queued_save() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Default.sqlite");
        let key = RecordKey::new(8, "SPTD");

        let backend = KeyValueBackend::new(&profile(), &path);
        let save = backend.save(key, Box::new(|| Some(b"queued".to_vec())));
        backend.destroy().await;
        assert_eq!(save.await, SaveOutcome::Written);

        let reopened = KeyValueBackend::new(&profile(), &path);
        assert_eq!(reopened.restore(key).await, Some(b"queued".to_vec()));
    }

    #[test]
    #[should_panic(expected = "off-the-record")]
    fn test_rejects_off_the_record_profile() {
        let _ = KeyValueBackend::in_memory(&Profile::off_the_record("Incognito"));
    }

    #[test]
    #[should_panic(expected = "does not support synchronous restore")]
    fn test_restore_blocking_panics() {
        let backend = KeyValueBackend::in_memory(&profile());
        backend.restore_blocking(RecordKey::new(1, "SPTD"));
    }
}
