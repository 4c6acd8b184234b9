//! Frozen read-only snapshots of a live persistable
//!
//! A task's persisted view must not race with concurrent in-memory mutation
//! of the same item: between the moment a mutation is registered and the
//! moment the batching context performs the physical write, the application
//! thread may lock the item, redeliver it, or rewrite its data. The
//! `CachedPersistable` decorator freezes the fields the owning task kind
//! cares about at a well-defined moment; everything else forwards to the
//! live primary.
//!
//! Which fields freeze depends on the task kind:
//!
//! - add: the lock id at construction, the member data on demand
//! - update: the member data and the byte size, both at construction
//! - redelivered-count persist: the redelivered count at construction
//!
//! Copying member data is O(payload size), so the copy is deliberately
//! conditional: data declared immutable-and-never-updated is captured by
//! reference instead (observable via `Arc::ptr_eq`).
//!
//! Once constructed, the cache is read-only to every consumer; all setters
//! fail. New application-level updates go to the live tuple, never to a
//! task's snapshot.

use std::sync::Arc;

use cask_core::{
    Error, LockId, MemberData, Persistable, Result, StorageStrategy, TransactionId,
};
use once_cell::sync::OnceCell;

/// A read-only decorator over a live persistable with selected fields frozen
///
/// Constructed through one of the per-task-kind constructors (`for_add`,
/// `for_update`, `for_redelivered_count`). Unfrozen getters forward to the
/// primary; every setter fails with
/// [`Error::CachedPersistableReadOnly`].
pub struct CachedPersistable {
    primary: Arc<dyn Persistable>,
    /// Frozen member data. Unset means reads forward to the primary until
    /// `ensure_data_frozen` runs; the inner Option distinguishes a frozen
    /// empty payload from "not frozen yet".
    data: OnceCell<Option<Arc<MemberData>>>,
    size: Option<u64>,
    lock_id: Option<LockId>,
    redelivered_count: Option<u32>,
}

impl CachedPersistable {
    /// Snapshot for an add task
    ///
    /// The lock id is frozen unconditionally: a consumer may lock the item
    /// immediately after it is added, and the add's persisted view must show
    /// the lock state at registration time. Member data is frozen now only
    /// if `copy_member_data` is set; otherwise reads forward to the live
    /// primary until `ensure_data_frozen` runs.
    pub fn for_add(primary: Arc<dyn Persistable>, copy_member_data: bool) -> Self {
        let cached = CachedPersistable {
            lock_id: Some(primary.lock_id()),
            data: OnceCell::new(),
            size: None,
            redelivered_count: None,
            primary,
        };
        if copy_member_data {
            cached.ensure_data_frozen(true);
        }
        cached
    }

    /// Snapshot for an update task
    ///
    /// Updates always risk the live item changing again before the physical
    /// write, so the member data is deep-copied and the byte size frozen
    /// immediately.
    pub fn for_update(primary: Arc<dyn Persistable>) -> Self {
        let cached = CachedPersistable {
            size: Some(primary.in_memory_byte_size()),
            data: OnceCell::new(),
            lock_id: None,
            redelivered_count: None,
            primary,
        };
        cached.ensure_data_frozen(true);
        cached
    }

    /// Snapshot for a redelivered-count persist task
    ///
    /// Freezes only the redelivered count; the count observed at
    /// registration is what gets written even if the item is redelivered
    /// again before the batch flushes.
    pub fn for_redelivered_count(primary: Arc<dyn Persistable>) -> Self {
        CachedPersistable {
            redelivered_count: Some(primary.redelivered_count()),
            data: OnceCell::new(),
            size: None,
            lock_id: None,
            primary,
        }
    }

    /// Freeze the member data if it is not frozen yet
    ///
    /// With `copy` set the primary's data is deep-copied into a fresh
    /// allocation; otherwise the primary's current `Arc` is captured as-is,
    /// which is sufficient for data declared immutable. Idempotent: once the
    /// data is frozen, later calls (with either flag) change nothing.
    pub fn ensure_data_frozen(&self, copy: bool) {
        self.data.get_or_init(|| {
            self.primary.data().map(|data| {
                if copy {
                    Arc::new((*data).clone())
                } else {
                    data
                }
            })
        });
    }

    /// True once the member data has been frozen
    pub fn is_data_frozen(&self) -> bool {
        self.data.get().is_some()
    }
}

impl Persistable for CachedPersistable {
    fn data(&self) -> Option<Arc<MemberData>> {
        match self.data.get() {
            Some(frozen) => frozen.clone(),
            None => self.primary.data(),
        }
    }

    fn in_memory_byte_size(&self) -> u64 {
        self.size
            .unwrap_or_else(|| self.primary.in_memory_byte_size())
    }

    fn lock_id(&self) -> LockId {
        self.lock_id.unwrap_or_else(|| self.primary.lock_id())
    }

    fn logically_deleted(&self) -> bool {
        self.primary.logically_deleted()
    }

    fn transaction_branch(&self) -> Option<TransactionId> {
        self.primary.transaction_branch()
    }

    fn redelivered_count(&self) -> u32 {
        self.redelivered_count
            .unwrap_or_else(|| self.primary.redelivered_count())
    }

    fn storage_strategy(&self) -> StorageStrategy {
        self.primary.storage_strategy()
    }

    fn requires_persistence(&self) -> bool {
        self.primary.requires_persistence()
    }

    fn set_data(&self, _data: Arc<MemberData>) -> Result<()> {
        Err(Error::CachedPersistableReadOnly { field: "data" })
    }

    fn set_lock_id(&self, _lock_id: LockId) -> Result<()> {
        Err(Error::CachedPersistableReadOnly { field: "lock_id" })
    }

    fn set_logically_deleted(
        &self,
        _deleted: bool,
        _branch: Option<TransactionId>,
    ) -> Result<()> {
        Err(Error::CachedPersistableReadOnly {
            field: "logically_deleted",
        })
    }

    fn set_redelivered_count(&self, _count: u32) -> Result<()> {
        Err(Error::CachedPersistableReadOnly {
            field: "redelivered_count",
        })
    }
}
