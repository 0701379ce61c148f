//! Owners of persisted records.
//!
//! An owner (a tab) holds at most one attached record per kind. Attachment is
//! a single-slot map keyed by the record's Rust type.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::registry::RecordKind;

/// Browser profile a tab belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Profile {
    id: String,
    off_the_record: bool,
}

impl Profile {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into(), off_the_record: false }
    }

    /// Incognito profile. Its records are always stored encrypted.
    pub fn off_the_record(id: impl Into<String>) -> Self {
        Self { id: id.into(), off_the_record: true }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn is_off_the_record(&self) -> bool {
        self.off_the_record
    }
}

/// A record that can sit in an owner's attachment slot.
pub trait AttachedRecord: Any + Send + Sync {
    fn kind(&self) -> RecordKind;

    /// Stop all future saves of this record.
    fn disable_saving(&self);

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

/// Single-slot-per-kind storage for attached records.
#[derive(Default)]
pub struct UserDataHost {
    slots: Mutex<HashMap<TypeId, Arc<dyn AttachedRecord>>>,
}

impl fmt::Debug for UserDataHost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kinds: Vec<RecordKind> = self.slots().values().map(|r| r.kind()).collect();
        f.debug_struct("UserDataHost").field("kinds", &kinds).finish()
    }
}

impl UserDataHost {
    fn slots(&self) -> MutexGuard<'_, HashMap<TypeId, Arc<dyn AttachedRecord>>> {
        self.slots.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn get<T: AttachedRecord>(&self) -> Option<Arc<T>> {
        let attached = self.slots().get(&TypeId::of::<T>()).cloned()?;
        attached.into_any().downcast::<T>().ok()
    }

    /// Attach `value`, returning the record it replaced.
    pub fn set<T: AttachedRecord>(&self, value: Arc<T>) -> Option<Arc<dyn AttachedRecord>> {
        self.slots().insert(TypeId::of::<T>(), value)
    }

    /// Detach the record of type `T`, returning it.
    pub fn remove<T: AttachedRecord>(&self) -> Option<Arc<dyn AttachedRecord>> {
        self.slots().remove(&TypeId::of::<T>())
    }

    /// Detach everything, returning what was attached.
    pub fn clear(&self) -> Vec<Arc<dyn AttachedRecord>> {
        self.slots().drain().map(|(_, record)| record).collect()
    }

    pub fn len(&self) -> usize {
        self.slots().len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots().is_empty()
    }
}

/// What the cache needs from the entity its records are scoped to.
pub trait Owner: Send + Sync + 'static {
    fn id(&self) -> i32;

    fn profile(&self) -> &Profile;

    /// True for incognito owners; selects the encrypted record variants.
    fn is_ephemeral_profile(&self) -> bool {
        self.profile().is_off_the_record()
    }

    fn user_data(&self) -> &UserDataHost;

    fn is_closed(&self) -> bool;

    fn mark_closed(&self);
}

/// A browser tab.
#[derive(Debug)]
pub struct Tab {
    id: i32,
    profile: Profile,
    user_data: UserDataHost,
    closed: AtomicBool,
}

impl Tab {
    pub fn new(id: i32, profile: Profile) -> Arc<Self> {
        Arc::new(Self { id, profile, user_data: UserDataHost::default(), closed: AtomicBool::new(false) })
    }
}

impl Owner for Tab {
    fn id(&self) -> i32 {
        self.id
    }

    fn profile(&self) -> &Profile {
        &self.profile
    }

    fn user_data(&self) -> &UserDataHost {
        &self.user_data
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn mark_closed(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[derive(Default)]
    struct StubRecord {
        disabled: AtomicUsize,
    }

    impl AttachedRecord for StubRecord {
        fn kind(&self) -> RecordKind {
            RecordKind::Mock
        }

        fn disable_saving(&self) {
            self.disabled.fetch_add(1, Ordering::SeqCst);
        }

        fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
            self
        }
    }

    #[test]
    fn test_slot_holds_one_per_type() {
        let host = UserDataHost::default();
        let first = Arc::new(StubRecord::default());
        let second = Arc::new(StubRecord::default());

        assert!(host.set(Arc::clone(&first)).is_none());
        assert!(host.set(Arc::clone(&second)).is_some());
        assert_eq!(host.len(), 1);
        assert!(Arc::ptr_eq(&host.get::<StubRecord>().unwrap(), &second));
    }

    #[test]
    fn test_clear_returns_attached() {
        let host = UserDataHost::default();
        host.set(Arc::new(StubRecord::default()));
        let cleared = host.clear();
        assert_eq!(cleared.len(), 1);
        assert!(host.is_empty());
        assert!(host.get::<StubRecord>().is_none());
    }

    #[test]
    fn test_remove_detaches_one_type() {
        let host = UserDataHost::default();
        host.set(Arc::new(StubRecord::default()));

        assert!(host.remove::<StubRecord>().is_some());
        assert!(host.get::<StubRecord>().is_none());
        assert!(host.remove::<StubRecord>().is_none());
    }

    #[test]
    fn test_tab_profile() {
        let tab = Tab::new(3, Profile::off_the_record("Incognito"));
        assert_eq!(tab.id(), 3);
        assert!(tab.is_ephemeral_profile());
        assert!(!tab.is_closed());
        tab.mark_closed();
        assert!(tab.is_closed());
    }
}
