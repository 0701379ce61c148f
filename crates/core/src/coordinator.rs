//! Get-or-create protocol for per-owner records.
//!
//! [`CacheCoordinator::from`] returns the record of kind `D` for an owner. A
//! fresh attached record is returned directly. Otherwise the caller joins the
//! in-flight fetch for the same key, or starts one. Only one restore and at
//! most one build run per key at a time, and every waiter receives the same
//! `Arc` in arrival order.

use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::oneshot;

use crate::owner::Owner;
use crate::record::{Record, RecordData, now_ms};
use crate::registry::{BackendRegistry, RecordKind};
use crate::storage::{RecordKey, SaveOutcome, StorageBackend};

type Shared = Arc<dyn Any + Send + Sync>;
type Waiter = oneshot::Sender<Option<Shared>>;

#[derive(Clone, Debug)]
pub struct CacheCoordinator {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    registry: Arc<BackendRegistry>,
    in_flight: Mutex<HashMap<RecordKey, Vec<Waiter>>>,
}

impl Inner {
    fn in_flight(&self) -> MutexGuard<'_, HashMap<RecordKey, Vec<Waiter>>> {
        self.in_flight.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Releases every waiter of a key when the fetch ends, including by panic.
struct Release {
    inner: Arc<Inner>,
    key: RecordKey,
    result: Option<Shared>,
}

impl Drop for Release {
    fn drop(&mut self) {
        let waiters = self.inner.in_flight().remove(&self.key).unwrap_or_default();
        tracing::debug!(key = %self.key, waiters = waiters.len(), found = self.result.is_some(), "Releasing waiters");
        for waiter in waiters {
            let _ = waiter.send(self.result.clone());
        }
    }
}

/// Drop a fetched record whose owner closed while it was fetched.
///
/// Its save may have been queued after the close's delete, so ephemeral
/// kinds are deleted again.
async fn discard<D: RecordData>(record: &Record<D>) {
    tracing::debug!(key = %record.key(), "Owner closed during fetch; discarding result");
    record.disable_saving();
    if D::KIND.is_ephemeral() {
        record.delete().await;
    }
}

impl CacheCoordinator {
    pub fn new(registry: Arc<BackendRegistry>) -> Self {
        Self { inner: Arc::new(Inner { registry, in_flight: Mutex::new(HashMap::new()) }) }
    }

    pub fn registry(&self) -> &Arc<BackendRegistry> {
        &self.inner.registry
    }

    /// Key of the `kind` record for `owner`; incognito owners use the encrypted variant.
    pub fn key_for<O: Owner>(&self, owner: &O, kind: RecordKind) -> RecordKey {
        RecordKey::new(owner.id(), kind.type_id(owner.is_ephemeral_profile()))
    }

    fn backend_for<O: Owner>(&self, owner: &O, kind: RecordKind) -> Arc<dyn StorageBackend> {
        self.inner.registry.backend_for(kind, owner.is_ephemeral_profile(), owner.profile())
    }

    /// Number of keys with a fetch in progress.
    pub fn in_flight_count(&self) -> usize {
        self.inner.in_flight().len()
    }

    /// Record of kind `D` for `owner`, restoring or building it if needed.
    ///
    /// `build` runs only when nothing usable is stored, and at most once per
    /// fetch. A `None` from it is handed to every waiter and not cached.
    /// Closed owners always get `None`.
    pub async fn from<D, O, F, Fut>(&self, owner: &Arc<O>, build: F) -> Option<Arc<Record<D>>>
    where
        D: RecordData,
        O: Owner,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Option<D>> + Send + 'static,
    {
        if owner.is_closed() {
            return None;
        }
        if let Some(record) = owner.user_data().get::<Record<D>>() {
            if !record.needs_refresh() {
                return Some(record);
            }
            tracing::debug!(key = %record.key(), "Attached record is stale");
        }

        let key = self.key_for(&**owner, D::KIND);
        let (tx, rx) = oneshot::channel();
        let first = {
            let mut in_flight = self.inner.in_flight();
            let waiters = in_flight.entry(key).or_default();
            waiters.push(tx);
            waiters.len() == 1
        };

        if first {
            let this = self.clone();
            let owner = Arc::clone(owner);
            tokio::spawn(async move { this.fetch(key, owner, build).await });
        } else {
            tracing::debug!(key = %key, "Joining in-flight fetch");
        }

        let shared = rx.await.ok().flatten()?;
        shared.downcast::<Record<D>>().ok()
    }

    async fn fetch<D, O, F, Fut>(self, key: RecordKey, owner: Arc<O>, build: F)
    where
        D: RecordData,
        O: Owner,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Option<D>> + Send + 'static,
    {
        let mut release = Release { inner: Arc::clone(&self.inner), key, result: None };

        let Some(record) = self.resolve(key, &*owner, build).await else {
            return;
        };
        if owner.is_closed() {
            discard::<D>(&record).await;
            return;
        }
        if let Some(replaced) = owner.user_data().set(Arc::clone(&record)) {
            replaced.disable_saving();
        }
        // A close marks the owner before clearing it, so either the close
        // detaches this record or this check sees the close.
        if owner.is_closed() {
            owner.user_data().remove::<Record<D>>();
            discard::<D>(&record).await;
            return;
        }
        release.result = Some(record);
    }

    async fn resolve<D, O, F, Fut>(&self, key: RecordKey, owner: &O, build: F) -> Option<Arc<Record<D>>>
    where
        D: RecordData,
        O: Owner,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Option<D>>,
    {
        let backend = self.backend_for(owner, D::KIND);
        let ttl = self.inner.registry.time_to_live_ms(D::KIND);

        if let Some(bytes) = backend.restore(key).await {
            if let Some(record) = Record::<D>::from_bytes(key, Arc::clone(&backend), &bytes, ttl) {
                if !record.needs_refresh() {
                    tracing::debug!(key = %key, "Restored record");
                    return Some(Arc::new(record));
                }
                tracing::debug!(key = %key, "Restored record is stale; rebuilding");
            }
        }

        let Some(mut data) = build().await else {
            tracing::debug!(key = %key, "Builder produced no record");
            return None;
        };
        data.set_last_updated_ms(now_ms());
        let record = Arc::new(Record::new(key, backend, data, ttl));

        if owner.is_closed() {
            tracing::debug!(key = %key, "Owner closed during build; not saving");
            return Some(record);
        }
        match record.save().await {
            SaveOutcome::Failed => tracing::warn!(key = %key, "Saving built record failed"),
            outcome => tracing::debug!(key = %key, ?outcome, "Saved built record"),
        }
        Some(record)
    }

    /// Attached record of kind `D`, or a new one with default data.
    ///
    /// Nothing is restored or saved; the record persists on its first update.
    pub fn get_or_create_default<D, O>(&self, owner: &Arc<O>) -> Arc<Record<D>>
    where
        D: RecordData + Default,
        O: Owner,
    {
        if let Some(record) = owner.user_data().get::<Record<D>>() {
            return record;
        }
        let key = self.key_for(&**owner, D::KIND);
        let backend = self.backend_for(&**owner, D::KIND);
        let ttl = self.inner.registry.time_to_live_ms(D::KIND);
        let record = Arc::new(Record::new(key, backend, D::default(), ttl));
        if owner.is_closed() {
            record.disable_saving();
        } else {
            owner.user_data().set(Arc::clone(&record));
        }
        record
    }

    /// Restore a record on the calling thread and attach it.
    ///
    /// Meant for the startup restore of critical data.
    ///
    /// # Panics
    ///
    /// Panics if the kind's backend cannot restore synchronously.
    pub fn restore_blocking<D, O>(&self, owner: &Arc<O>) -> Option<Arc<Record<D>>>
    where
        D: RecordData,
        O: Owner,
    {
        if owner.is_closed() {
            return None;
        }
        let key = self.key_for(&**owner, D::KIND);
        let backend = self.backend_for(&**owner, D::KIND);
        let ttl = self.inner.registry.time_to_live_ms(D::KIND);

        let bytes = backend.restore_blocking(key)?;
        let record = Record::<D>::from_bytes(key, backend, &bytes, ttl)?;
        if record.needs_refresh() {
            tracing::debug!(key = %key, "Blocking restore found stale record");
            return None;
        }
        let record = Arc::new(record);
        owner.user_data().set(Arc::clone(&record));
        Some(record)
    }

    /// Tear down the records of a closing owner.
    ///
    /// Attached records stop saving and are detached. Durable copies of
    /// ephemeral kinds are deleted; other kinds stay for the next restore.
    pub async fn on_owner_closed<O: Owner>(&self, owner: &Arc<O>) {
        owner.mark_closed();
        let detached = owner.user_data().clear();
        for record in &detached {
            record.disable_saving();
        }

        let deletes: Vec<_> = RecordKind::ALL
            .into_iter()
            .filter(|kind| kind.is_ephemeral())
            .map(|kind| self.backend_for(&**owner, kind).delete(self.key_for(&**owner, kind)))
            .collect();
        tracing::info!(
            owner = owner.id(),
            detached = detached.len(),
            deleted = deletes.len(),
            "Owner closed"
        );
        futures_util::future::join_all(deletes).await;
    }
}
