//! Tasks — one pending mutation per item, scoped to a transaction
//!
//! A task binds one mutation kind (add, update, remove, ...) to one link
//! and answers three questions for the enclosing transaction manager, all
//! keyed on the transaction's current state:
//!
//! - what does this mutation cost for quota accounting
//!   (`size_approximation`)
//! - which physical call does it issue (`persist`)
//! - which link and item callbacks fire in each commit phase
//!
//! The state-keyed behavior lives in two pure dispatch functions
//! (`size_approximation_for`, `persist_op`) so the tables are testable as
//! data. Any (kind, state) pair outside the tables is a fatal
//! [`Error::UnexpectedTransactionState`]: the coordinator reached a
//! combination this design says cannot happen, and guessing would corrupt
//! the quota or the store.

use std::fmt;
use std::sync::Arc;

use cask_core::{
    BatchingContext, ContainerId, Error, Item, Link, Persistable, Result, TaskKind, Transaction,
    TransactionState,
};
use once_cell::sync::OnceCell;
use tracing::warn;

use crate::cached::CachedPersistable;

/// Baseline cost of one database operation, independent of payload size
///
/// Added to the payload size in the quota table below; chosen to keep the
/// store's backpressure math conservative for small items.
pub const DEFAULT_TASK_PERSISTENT_SIZE: u64 = 500;

/// One pending mutation against one item
///
/// Created when an add/update/remove is requested inside a transaction and
/// discarded with its task list once the transaction post-completes. A task
/// is moved into at most one [`TaskList`](crate::TaskList); ownership makes
/// membership in two lists unrepresentable.
///
/// The item reference is resolved from the link once, on first use, and the
/// result is memoized even when it is absent.
pub struct Task {
    kind: TaskKind,
    link: Option<Arc<dyn Link>>,
    item: OnceCell<Option<Arc<dyn Item>>>,
    cache: OnceCell<Arc<CachedPersistable>>,
}

impl Task {
    /// A pending insert of a new item
    ///
    /// The snapshot is taken immediately with the lock id frozen: a consumer
    /// may lock the item right after it is added, and the insert must not
    /// observe that. Member data stays uncopied until
    /// `copy_data_if_vulnerable` or `ensure_data_available` decides.
    pub fn add(link: Arc<dyn Link>) -> Self {
        let cache = CachedPersistable::for_add(link.tuple(), false);
        let task = Task {
            kind: TaskKind::Add,
            link: Some(link),
            item: OnceCell::new(),
            cache: OnceCell::new(),
        };
        // Freshly created cell; the set cannot be contested.
        let _ = task.cache.set(Arc::new(cache));
        task
    }

    /// A pending rewrite of an existing item's data and size
    pub fn update(link: Arc<dyn Link>) -> Self {
        Task {
            kind: TaskKind::Update,
            link: Some(link),
            item: OnceCell::new(),
            cache: OnceCell::new(),
        }
    }

    /// A pending delete of an unlocked item
    pub fn remove(link: Arc<dyn Link>) -> Self {
        Task {
            kind: TaskKind::Remove,
            link: Some(link),
            item: OnceCell::new(),
            cache: OnceCell::new(),
        }
    }

    /// A pending delete of a locked item
    ///
    /// Identical to [`Task::remove`] except for the reported kind, which
    /// upstream code uses to track locked and unlocked removals separately.
    pub fn remove_locked(link: Arc<dyn Link>) -> Self {
        Task {
            kind: TaskKind::RemoveLocked,
            link: Some(link),
            item: OnceCell::new(),
            cache: OnceCell::new(),
        }
    }

    /// A pending rewrite of only the item's redelivered count
    pub fn persist_redelivered_count(link: Arc<dyn Link>) -> Self {
        Task {
            kind: TaskKind::PersistRedeliveredCount,
            link: Some(link),
            item: OnceCell::new(),
            cache: OnceCell::new(),
        }
    }

    /// A task that does nothing
    ///
    /// Lets an otherwise empty transaction still flow through the commit
    /// protocol, so auto-commit semantics stay uniform.
    pub fn null() -> Self {
        Task {
            kind: TaskKind::Null,
            link: None,
            item: OnceCell::new(),
            cache: OnceCell::new(),
        }
    }

    /// The kind of mutation this task represents
    pub fn kind(&self) -> TaskKind {
        self.kind
    }

    /// The persistable view the batching context will consume
    ///
    /// The cached snapshot once one was taken, otherwise the link's live
    /// tuple. None only for an unbound (null) task.
    pub fn persistable(&self) -> Option<Arc<dyn Persistable>> {
        if let Some(cache) = self.cache.get() {
            return Some(Arc::clone(cache) as Arc<dyn Persistable>);
        }
        self.link.as_ref().map(|link| link.tuple())
    }

    /// Snapshot mutable data before the live item can change under us
    ///
    /// - add: deep-copies the member data now if the item's data could still
    ///   mutate; data declared immutable-and-never-updated stays deferred
    /// - update: takes the update snapshot (deep copy, frozen size)
    /// - redelivered-count persist: freezes the count
    /// - remove and null: nothing to snapshot
    ///
    /// Idempotent: a second call never re-copies.
    pub fn copy_data_if_vulnerable(&self) {
        match self.kind {
            TaskKind::Add => {
                if let Some(cache) = self.cache.get() {
                    if self.data_is_vulnerable() {
                        cache.ensure_data_frozen(true);
                    }
                }
            }
            TaskKind::Update => {
                if let Some(link) = &self.link {
                    self.cache
                        .get_or_init(|| Arc::new(CachedPersistable::for_update(link.tuple())));
                }
            }
            TaskKind::PersistRedeliveredCount => {
                if let Some(link) = &self.link {
                    self.cache.get_or_init(|| {
                        Arc::new(CachedPersistable::for_redelivered_count(link.tuple()))
                    });
                }
            }
            TaskKind::Remove | TaskKind::RemoveLocked | TaskKind::Null | TaskKind::Unknown => {}
        }
    }

    /// Make sure the data this task will persist is materialized
    ///
    /// For an add this forces the snapshot to capture the member data
    /// (copying only if it is still mutable) and verifies the item is still
    /// logically present in the store. For every other kind it is
    /// [`Task::copy_data_if_vulnerable`].
    ///
    /// # Errors
    ///
    /// [`Error::ItemNotInStore`] if an add's item has been removed by an
    /// upstream mutation that raced ahead of this task.
    pub fn ensure_data_available(&self) -> Result<()> {
        if self.kind != TaskKind::Add {
            self.copy_data_if_vulnerable();
            return Ok(());
        }
        let Some(link) = &self.link else {
            return Ok(());
        };
        let in_store = self
            .resolve_item()
            .is_some_and(|item| item.is_in_store());
        if !in_store {
            return Err(Error::ItemNotInStore(link.item_id()));
        }
        if let Some(cache) = self.cache.get() {
            cache.ensure_data_frozen(self.data_is_vulnerable());
        }
        Ok(())
    }

    /// Approximate byte cost of this task for store-quota accounting
    ///
    /// # Errors
    ///
    /// [`Error::UnexpectedTransactionState`] for any (kind, state) pair
    /// outside the quota table.
    pub fn size_approximation(&self, state: TransactionState) -> Result<u64> {
        let payload = self
            .persistable()
            .map_or(0, |tuple| tuple.in_memory_byte_size());
        size_approximation_for(self.kind, state, payload)
    }

    /// Issue the physical call appropriate to this task and the
    /// transaction's state
    ///
    /// # Errors
    ///
    /// [`Error::UnexpectedTransactionState`] for any (kind, state) pair
    /// outside the persist table; otherwise whatever the batching context
    /// propagates.
    pub fn persist(
        &self,
        transaction: &dyn Transaction,
        batching: &dyn BatchingContext,
    ) -> Result<()> {
        let op = persist_op(self.kind, transaction.state())?;
        let Some(tuple) = self.persistable() else {
            return Ok(());
        };
        match op {
            PersistOp::Nothing => Ok(()),
            PersistOp::Insert => batching.insert(tuple.as_ref()),
            PersistOp::Delete => batching.delete(tuple.as_ref()),
            PersistOp::UpdateDataAndSize => batching.update_data_and_size(tuple.as_ref()),
            PersistOp::MarkLogicalDelete => {
                // Remove tasks never snapshot, so the tuple is the live one.
                tuple.set_logically_deleted(true, Some(transaction.id()))?;
                batching.update_logical_delete_and_xid(tuple.as_ref())
            }
            PersistOp::ClearLogicalDelete => {
                tuple.set_logically_deleted(false, None)?;
                batching.update_logical_delete_and_xid(tuple.as_ref())
            }
            PersistOp::UpdateRedeliveredCount => {
                batching.update_redelivered_count_only(tuple.as_ref())
            }
        }
    }

    /// Pre-commit callback, delegated to the link
    ///
    /// # Errors
    ///
    /// Propagates the link callback's failure.
    pub fn pre_commit(&self, transaction: &dyn Transaction) -> Result<()> {
        let Some(link) = self.link.as_deref() else {
            return Ok(());
        };
        match self.kind {
            TaskKind::Add => link.pre_commit_add(transaction),
            TaskKind::Update => link.pre_commit_update(transaction),
            TaskKind::Remove | TaskKind::RemoveLocked => link.pre_commit_remove(transaction),
            _ => Ok(()),
        }
    }

    /// In-memory commit (first commit pass), delegated to the link
    ///
    /// # Errors
    ///
    /// Propagates the link callback's failure.
    pub fn commit_internal(&self, transaction: &dyn Transaction) -> Result<()> {
        let Some(link) = self.link.as_deref() else {
            return Ok(());
        };
        match self.kind {
            TaskKind::Add => link.internal_commit_add(transaction),
            TaskKind::Update => link.internal_commit_update(transaction),
            TaskKind::Remove | TaskKind::RemoveLocked => link.internal_commit_remove(transaction),
            _ => Ok(()),
        }
    }

    /// Externally visible commit (second commit pass), delegated to the link
    ///
    /// # Errors
    ///
    /// Propagates the link callback's failure.
    pub fn commit_external(&self, transaction: &dyn Transaction) -> Result<()> {
        let Some(link) = self.link.as_deref() else {
            return Ok(());
        };
        match self.kind {
            TaskKind::Add => link.commit_add(transaction),
            TaskKind::Update => link.commit_update(transaction),
            TaskKind::Remove | TaskKind::RemoveLocked => link.commit_remove(transaction),
            _ => Ok(()),
        }
    }

    /// Abort callback, delegated to the link
    ///
    /// # Errors
    ///
    /// Propagates the link callback's failure.
    pub fn abort(&self, transaction: &dyn Transaction) -> Result<()> {
        let Some(link) = self.link.as_deref() else {
            return Ok(());
        };
        match self.kind {
            TaskKind::Add => link.abort_add(transaction),
            TaskKind::Update => link.abort_update(transaction),
            TaskKind::Remove | TaskKind::RemoveLocked => link.abort_remove(transaction),
            _ => Ok(()),
        }
    }

    /// Post-commit callback: the link first, then the item's event
    ///
    /// # Errors
    ///
    /// Propagates the link callback's failure; the item event does not fire
    /// if the link callback failed.
    pub fn post_commit(&self, transaction: &dyn Transaction) -> Result<()> {
        let Some(link) = self.link.as_deref() else {
            return Ok(());
        };
        match self.kind {
            TaskKind::Add => {
                link.post_commit_add(transaction)?;
                if let Some(item) = self.resolve_item() {
                    item.event_post_commit_add(transaction);
                }
                Ok(())
            }
            TaskKind::Update => {
                link.post_commit_update(transaction)?;
                if let Some(item) = self.resolve_item() {
                    item.event_post_commit_update(transaction);
                }
                Ok(())
            }
            TaskKind::Remove | TaskKind::RemoveLocked => {
                link.post_commit_remove(transaction)?;
                if let Some(item) = self.resolve_item() {
                    item.event_post_commit_remove(transaction);
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }

    /// Post-abort callback: the link first, then the item's event
    ///
    /// # Errors
    ///
    /// Propagates the link callback's failure; the item event does not fire
    /// if the link callback failed.
    pub fn post_abort(&self, transaction: &dyn Transaction) -> Result<()> {
        let Some(link) = self.link.as_deref() else {
            return Ok(());
        };
        match self.kind {
            TaskKind::Add => {
                link.post_abort_add(transaction)?;
                if let Some(item) = self.resolve_item() {
                    item.event_post_rollback_add(transaction);
                }
                Ok(())
            }
            TaskKind::Update => {
                link.post_abort_update(transaction)?;
                if let Some(item) = self.resolve_item() {
                    item.event_post_rollback_update(transaction);
                }
                Ok(())
            }
            TaskKind::Remove | TaskKind::RemoveLocked => {
                link.post_abort_remove(transaction)?;
                if let Some(item) = self.resolve_item() {
                    item.event_post_rollback_remove(transaction);
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }

    /// True for remove-kind tasks whose link belongs to the given container
    ///
    /// Lets the task list count pending removals against one container.
    pub fn is_remove_from_list(&self, container: ContainerId) -> bool {
        self.kind.is_remove()
            && self
                .link
                .as_ref()
                .is_some_and(|link| link.container() == container)
    }

    /// True if this task creates a persistent representation (add only)
    pub fn creates_persistent_representation(&self) -> bool {
        self.kind == TaskKind::Add
    }

    /// True if this task deletes a persistent representation (remove kinds)
    pub fn deletes_persistent_representation(&self) -> bool {
        self.kind.is_remove()
    }

    /// Resolve the in-memory item through the link, once
    ///
    /// The result is memoized, including an absent one; an absent item is
    /// logged the first time because it usually means the item was collected
    /// while its transaction was still in flight.
    fn resolve_item(&self) -> Option<Arc<dyn Item>> {
        self.item
            .get_or_init(|| {
                let item = self.link.as_ref().and_then(|link| link.item());
                if item.is_none() {
                    if let Some(link) = &self.link {
                        warn!(
                            target: "cask::commit",
                            item_id = %link.item_id(),
                            kind = %self.kind,
                            "item did not resolve from its link"
                        );
                    }
                }
                item
            })
            .clone()
    }

    /// Whether the item's data could still change before the physical write
    ///
    /// Unresolvable items are treated as vulnerable; copying is the safe
    /// side of that guess.
    fn data_is_vulnerable(&self) -> bool {
        match self.resolve_item() {
            Some(item) => {
                !(item.persistent_data_immutable() && item.persistent_data_never_updated())
            }
            None => true,
        }
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("kind", &self.kind)
            .field("item_id", &self.link.as_ref().map(|link| link.item_id()))
            .field("cached", &self.cache.get().is_some())
            .finish()
    }
}

/// The physical call a task issues for one (kind, state) pair
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PersistOp {
    Nothing,
    Insert,
    Delete,
    UpdateDataAndSize,
    MarkLogicalDelete,
    ClearLogicalDelete,
    UpdateRedeliveredCount,
}

/// Quota-accounting table: (kind, state, payload size) → approximate cost
///
/// Callers rely on the zero/non-zero distinctions here for backpressure
/// math, so the rows must not be "improved":
///
/// - an add during rollback costs only the baseline: the row never
///   physically existed, there is no payload to address
/// - an add at `Committing2PC` costs nothing: phase one already wrote it
/// - a remove costs a full row in every state, including both rollback
///   states (clearing the logical-delete flag addresses the row too) and
///   `Committing2PC` (its bookkeeping stays visible to 2PC coordination,
///   unlike an add's)
/// - a redelivered-count persist is fixed-cost metadata
fn size_approximation_for(
    kind: TaskKind,
    state: TransactionState,
    payload: u64,
) -> Result<u64> {
    use cask_core::TransactionState::*;
    match (kind, state) {
        (TaskKind::Null, _) => Ok(0),
        (TaskKind::Add, Committed | Committing1PC | Preparing | Prepared) => {
            Ok(DEFAULT_TASK_PERSISTENT_SIZE + payload)
        }
        (TaskKind::Add, RolledBack | RollingBack) => Ok(DEFAULT_TASK_PERSISTENT_SIZE),
        (TaskKind::Add, Committing2PC) => Ok(0),
        (TaskKind::Update, Committed | Committing1PC | Preparing) => {
            Ok(DEFAULT_TASK_PERSISTENT_SIZE + payload)
        }
        (TaskKind::Remove | TaskKind::RemoveLocked, _) => {
            Ok(DEFAULT_TASK_PERSISTENT_SIZE + payload)
        }
        (
            TaskKind::PersistRedeliveredCount,
            Committed | Committing1PC | Preparing | Prepared,
        ) => Ok(DEFAULT_TASK_PERSISTENT_SIZE),
        (kind, state) => Err(Error::UnexpectedTransactionState { kind, state }),
    }
}

/// Persist-routing table: (kind, state) → physical call
///
/// - add: insert while committing or preparing; delete while rolling back
///   (undoing the speculative insert); nothing at `Committing2PC`, where
///   phase one already wrote and phase two is a coordinator handshake
/// - update: legal only for one-phase commit; updates are not part of this
///   design's prepare protocol
/// - remove: delete once the outcome is commit; during prepare it only
///   marks the row logically deleted with the owning branch id, so an
///   in-doubt delete survives a coordinator crash; rollback unmarks
/// - redelivered-count persist: one-phase commit only
fn persist_op(kind: TaskKind, state: TransactionState) -> Result<PersistOp> {
    use cask_core::TransactionState::*;
    match (kind, state) {
        (TaskKind::Null, _) => Ok(PersistOp::Nothing),
        (TaskKind::Add, Committed | Committing1PC | Preparing | Prepared) => Ok(PersistOp::Insert),
        (TaskKind::Add, RolledBack | RollingBack) => Ok(PersistOp::Delete),
        (TaskKind::Add, Committing2PC) => Ok(PersistOp::Nothing),
        (TaskKind::Update, Committed | Committing1PC) => Ok(PersistOp::UpdateDataAndSize),
        (
            TaskKind::Remove | TaskKind::RemoveLocked,
            Committed | Committing1PC | Committing2PC,
        ) => Ok(PersistOp::Delete),
        (TaskKind::Remove | TaskKind::RemoveLocked, Preparing | Prepared) => {
            Ok(PersistOp::MarkLogicalDelete)
        }
        (TaskKind::Remove | TaskKind::RemoveLocked, RolledBack | RollingBack) => {
            Ok(PersistOp::ClearLogicalDelete)
        }
        (TaskKind::PersistRedeliveredCount, Committed | Committing1PC) => {
            Ok(PersistOp::UpdateRedeliveredCount)
        }
        (kind, state) => Err(Error::UnexpectedTransactionState { kind, state }),
    }
}
