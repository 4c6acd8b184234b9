//! Collaborator contracts for the task layer
//!
//! This module defines the traits through which the task layer reaches the
//! rest of the message store:
//!
//! - **`Persistable`**: the physical-record view of an item that the
//!   persistence layer consumes
//! - **`Link`**: the stable per-item handle providing identity, the live
//!   persistable, and the per-phase callback surface
//! - **`Item`**: the in-memory object a task lazily resolves to
//! - **`BatchingContext`**: the collaborator that performs the physical
//!   insert/update/delete
//! - **`Transaction`**: the read view of the active transaction handed
//!   through every phase
//!
//! All of these are object-safe so the task layer can hold them as
//! `Arc<dyn ...>` without knowing the concrete store types. Implementations
//! live in the surrounding item/persistence layers; the in-crate
//! implementations are test doubles only.

use std::sync::Arc;

use crate::data::MemberData;
use crate::error::Result;
use crate::types::{
    ContainerId, ItemId, LockId, StorageStrategy, TransactionId, TransactionState,
};

/// The physical-record view of an item
///
/// This is what the batching context actually writes: member data, an
/// approximate in-memory size, the lock id, the logical-delete flag with its
/// transaction-branch id, the redelivered count, and the storage strategy
/// governing whether persistence is required at all.
///
/// Setters take `&self`; implementations are expected to use interior
/// mutability, because the committing thread writes through the same handle
/// the application thread reads. The task layer's cached snapshot rejects
/// every setter.
///
/// Thread safety: implementations must be safe to share across the
/// application and committing threads (requires Send + Sync).
pub trait Persistable: Send + Sync {
    /// The member data, or None if the item carries no payload
    fn data(&self) -> Option<Arc<MemberData>>;

    /// Approximate in-memory byte size of the record
    fn in_memory_byte_size(&self) -> u64;

    /// Lock id of the owning item; `LockId::UNLOCKED` if unlocked
    fn lock_id(&self) -> LockId;

    /// True if the record has been marked logically deleted
    fn logically_deleted(&self) -> bool;

    /// The transaction branch that marked the record logically deleted
    ///
    /// Persisted alongside the logical-delete flag during two-phase prepare
    /// so an in-doubt delete can be matched back to its branch on recovery.
    fn transaction_branch(&self) -> Option<TransactionId>;

    /// How many times the item has been redelivered
    fn redelivered_count(&self) -> u32;

    /// The item's declared storage strategy
    fn storage_strategy(&self) -> StorageStrategy;

    /// True if this record must reach the persistence layer
    fn requires_persistence(&self) -> bool;

    /// Replace the member data
    ///
    /// # Errors
    ///
    /// Fails on read-only views (cached snapshots).
    fn set_data(&self, data: Arc<MemberData>) -> Result<()>;

    /// Replace the lock id
    ///
    /// # Errors
    ///
    /// Fails on read-only views (cached snapshots).
    fn set_lock_id(&self, lock_id: LockId) -> Result<()>;

    /// Set or clear the logical-delete flag together with the owning branch
    ///
    /// # Errors
    ///
    /// Fails on read-only views (cached snapshots).
    fn set_logically_deleted(&self, deleted: bool, branch: Option<TransactionId>) -> Result<()>;

    /// Replace the redelivered count
    ///
    /// # Errors
    ///
    /// Fails on read-only views (cached snapshots).
    fn set_redelivered_count(&self, count: u32) -> Result<()>;
}

/// The stable per-item handle a task is bound to
///
/// A link outlives the tasks referencing it: it provides the item's
/// identity, the live persistable, lazy access to the in-memory item, and
/// the per-task-kind callback surface the task layer invokes during each
/// commit phase.
///
/// Callback order within one phase is the task list's concern; a link only
/// ever sees calls for its own item.
pub trait Link: Send + Sync {
    /// Identity of the item this link refers to
    fn item_id(&self) -> ItemId;

    /// Identity of the container that owns the item
    fn container(&self) -> ContainerId;

    /// The in-memory item, if it is still reachable
    ///
    /// A task resolves this once and memoizes the result, including a None
    /// result.
    fn item(&self) -> Option<Arc<dyn Item>>;

    /// The live persistable tuple for the item
    fn tuple(&self) -> Arc<dyn Persistable>;

    /// Pre-commit callback for a pending add
    ///
    /// # Errors
    ///
    /// A failure aborts the owning transaction.
    fn pre_commit_add(&self, transaction: &dyn Transaction) -> Result<()>;

    /// Pre-commit callback for a pending update
    ///
    /// # Errors
    ///
    /// A failure aborts the owning transaction.
    fn pre_commit_update(&self, transaction: &dyn Transaction) -> Result<()>;

    /// Pre-commit callback for a pending remove
    ///
    /// # Errors
    ///
    /// A failure aborts the owning transaction.
    fn pre_commit_remove(&self, transaction: &dyn Transaction) -> Result<()>;

    /// In-memory commit of a pending add (first commit pass)
    ///
    /// # Errors
    ///
    /// A failure leaves the transaction in a state only the transaction
    /// manager can resolve.
    fn internal_commit_add(&self, transaction: &dyn Transaction) -> Result<()>;

    /// In-memory commit of a pending update (first commit pass)
    ///
    /// # Errors
    ///
    /// A failure leaves the transaction in a state only the transaction
    /// manager can resolve.
    fn internal_commit_update(&self, transaction: &dyn Transaction) -> Result<()>;

    /// In-memory commit of a pending remove (first commit pass)
    ///
    /// # Errors
    ///
    /// A failure leaves the transaction in a state only the transaction
    /// manager can resolve.
    fn internal_commit_remove(&self, transaction: &dyn Transaction) -> Result<()>;

    /// Externally visible commit of a pending add (second commit pass)
    ///
    /// # Errors
    ///
    /// A failure leaves the transaction in a state only the transaction
    /// manager can resolve.
    fn commit_add(&self, transaction: &dyn Transaction) -> Result<()>;

    /// Externally visible commit of a pending update (second commit pass)
    ///
    /// # Errors
    ///
    /// A failure leaves the transaction in a state only the transaction
    /// manager can resolve.
    fn commit_update(&self, transaction: &dyn Transaction) -> Result<()>;

    /// Externally visible commit of a pending remove (second commit pass)
    ///
    /// # Errors
    ///
    /// A failure leaves the transaction in a state only the transaction
    /// manager can resolve.
    fn commit_remove(&self, transaction: &dyn Transaction) -> Result<()>;

    /// Abort a pending add
    ///
    /// # Errors
    ///
    /// A failure is surfaced to the transaction manager driving the
    /// rollback.
    fn abort_add(&self, transaction: &dyn Transaction) -> Result<()>;

    /// Abort a pending update
    ///
    /// # Errors
    ///
    /// A failure is surfaced to the transaction manager driving the
    /// rollback.
    fn abort_update(&self, transaction: &dyn Transaction) -> Result<()>;

    /// Abort a pending remove
    ///
    /// # Errors
    ///
    /// A failure is surfaced to the transaction manager driving the
    /// rollback.
    fn abort_remove(&self, transaction: &dyn Transaction) -> Result<()>;

    /// Post-commit callback for a committed add
    ///
    /// # Errors
    ///
    /// A failure is surfaced to the transaction manager driving
    /// post-completion.
    fn post_commit_add(&self, transaction: &dyn Transaction) -> Result<()>;

    /// Post-commit callback for a committed update
    ///
    /// # Errors
    ///
    /// A failure is surfaced to the transaction manager driving
    /// post-completion.
    fn post_commit_update(&self, transaction: &dyn Transaction) -> Result<()>;

    /// Post-commit callback for a committed remove
    ///
    /// # Errors
    ///
    /// A failure is surfaced to the transaction manager driving
    /// post-completion.
    fn post_commit_remove(&self, transaction: &dyn Transaction) -> Result<()>;

    /// Post-abort callback for an aborted add
    ///
    /// # Errors
    ///
    /// A failure is surfaced to the transaction manager driving
    /// post-completion.
    fn post_abort_add(&self, transaction: &dyn Transaction) -> Result<()>;

    /// Post-abort callback for an aborted update
    ///
    /// # Errors
    ///
    /// A failure is surfaced to the transaction manager driving
    /// post-completion.
    fn post_abort_update(&self, transaction: &dyn Transaction) -> Result<()>;

    /// Post-abort callback for an aborted remove
    ///
    /// # Errors
    ///
    /// A failure is surfaced to the transaction manager driving
    /// post-completion.
    fn post_abort_remove(&self, transaction: &dyn Transaction) -> Result<()>;
}

/// The in-memory object a task eventually resolves to
///
/// Resolved lazily through `Link::item` and memoized by the task. The
/// mutability hints drive the conditional data-snapshot logic: data declared
/// immutable and never updated is safe to persist without a defensive copy.
///
/// The event callbacks are notifications fired after the matching `Link`
/// callback in the post-commit/post-abort phases; they cannot fail.
pub trait Item: Send + Sync {
    /// True while the item is logically present in the store
    fn is_in_store(&self) -> bool;

    /// True if the item's persistent data never mutates after creation
    fn persistent_data_immutable(&self) -> bool;

    /// True if the item's persistent data is never replaced by an update
    fn persistent_data_never_updated(&self) -> bool;

    /// Notification: an add of this item committed
    fn event_post_commit_add(&self, transaction: &dyn Transaction);

    /// Notification: an update of this item committed
    fn event_post_commit_update(&self, transaction: &dyn Transaction);

    /// Notification: a remove of this item committed
    fn event_post_commit_remove(&self, transaction: &dyn Transaction);

    /// Notification: an add of this item rolled back
    fn event_post_rollback_add(&self, transaction: &dyn Transaction);

    /// Notification: an update of this item rolled back
    fn event_post_rollback_update(&self, transaction: &dyn Transaction);

    /// Notification: a remove of this item rolled back
    fn event_post_rollback_remove(&self, transaction: &dyn Transaction);
}

/// The collaborator performing the physical writes
///
/// Consumed by `Task::persist`: each task routes to exactly one of these
/// methods per (kind, state) pair, handing over its persistable view. The
/// context batches, spools, or writes through under its own contract; from
/// this layer's perspective every call is synchronous and its failure is
/// observed immediately.
pub trait BatchingContext: Send + Sync {
    /// Insert a new record
    ///
    /// # Errors
    ///
    /// Propagates the underlying storage failure.
    fn insert(&self, tuple: &dyn Persistable) -> Result<()>;

    /// Delete an existing record
    ///
    /// # Errors
    ///
    /// Propagates the underlying storage failure.
    fn delete(&self, tuple: &dyn Persistable) -> Result<()>;

    /// Rewrite an existing record's data and size
    ///
    /// # Errors
    ///
    /// Propagates the underlying storage failure.
    fn update_data_and_size(&self, tuple: &dyn Persistable) -> Result<()>;

    /// Rewrite only the logical-delete flag and transaction-branch id
    ///
    /// # Errors
    ///
    /// Propagates the underlying storage failure.
    fn update_logical_delete_and_xid(&self, tuple: &dyn Persistable) -> Result<()>;

    /// Rewrite only the redelivered count
    ///
    /// # Errors
    ///
    /// Propagates the underlying storage failure.
    fn update_redelivered_count_only(&self, tuple: &dyn Persistable) -> Result<()>;
}

/// Read view of the active transaction
///
/// Handed through every phase callback and persist call. The state is owned
/// by the enclosing transaction manager; this layer only reads it to key its
/// dispatch tables.
pub trait Transaction {
    /// Identity of the transaction
    fn id(&self) -> TransactionId;

    /// Where the transaction sits in its commit lifecycle
    fn state(&self) -> TransactionState;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::{Mutex, RwLock};

    // ====================================================================
    // Minimal mock implementations for behavioral testing
    // ====================================================================

    /// A minimal in-memory Persistable for testing the trait contract.
    struct MockPersistable {
        data: RwLock<Option<Arc<MemberData>>>,
        lock_id: RwLock<LockId>,
        deleted: RwLock<(bool, Option<TransactionId>)>,
        redelivered: AtomicU32,
        strategy: StorageStrategy,
    }

    impl MockPersistable {
        fn new(strategy: StorageStrategy) -> Self {
            MockPersistable {
                data: RwLock::new(None),
                lock_id: RwLock::new(LockId::UNLOCKED),
                deleted: RwLock::new((false, None)),
                redelivered: AtomicU32::new(0),
                strategy,
            }
        }
    }

    impl Persistable for MockPersistable {
        fn data(&self) -> Option<Arc<MemberData>> {
            self.data.read().unwrap().clone()
        }

        fn in_memory_byte_size(&self) -> u64 {
            self.data().map_or(0, |d| d.byte_size())
        }

        fn lock_id(&self) -> LockId {
            *self.lock_id.read().unwrap()
        }

        fn logically_deleted(&self) -> bool {
            self.deleted.read().unwrap().0
        }

        fn transaction_branch(&self) -> Option<TransactionId> {
            self.deleted.read().unwrap().1
        }

        fn redelivered_count(&self) -> u32 {
            self.redelivered.load(Ordering::SeqCst)
        }

        fn storage_strategy(&self) -> StorageStrategy {
            self.strategy
        }

        fn requires_persistence(&self) -> bool {
            self.strategy == StorageStrategy::Always
        }

        fn set_data(&self, data: Arc<MemberData>) -> Result<()> {
            *self.data.write().unwrap() = Some(data);
            Ok(())
        }

        fn set_lock_id(&self, lock_id: LockId) -> Result<()> {
            *self.lock_id.write().unwrap() = lock_id;
            Ok(())
        }

        fn set_logically_deleted(
            &self,
            deleted: bool,
            branch: Option<TransactionId>,
        ) -> Result<()> {
            *self.deleted.write().unwrap() = (deleted, branch);
            Ok(())
        }

        fn set_redelivered_count(&self, count: u32) -> Result<()> {
            self.redelivered.store(count, Ordering::SeqCst);
            Ok(())
        }
    }

    /// A BatchingContext that records which method was called.
    struct MockBatchingContext {
        calls: Mutex<Vec<&'static str>>,
    }

    impl MockBatchingContext {
        fn new() -> Self {
            MockBatchingContext {
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    impl BatchingContext for MockBatchingContext {
        fn insert(&self, _tuple: &dyn Persistable) -> Result<()> {
            self.calls.lock().unwrap().push("insert");
            Ok(())
        }

        fn delete(&self, _tuple: &dyn Persistable) -> Result<()> {
            self.calls.lock().unwrap().push("delete");
            Ok(())
        }

        fn update_data_and_size(&self, _tuple: &dyn Persistable) -> Result<()> {
            self.calls.lock().unwrap().push("update_data_and_size");
            Ok(())
        }

        fn update_logical_delete_and_xid(&self, _tuple: &dyn Persistable) -> Result<()> {
            self.calls.lock().unwrap().push("update_logical_delete_and_xid");
            Ok(())
        }

        fn update_redelivered_count_only(&self, _tuple: &dyn Persistable) -> Result<()> {
            self.calls.lock().unwrap().push("update_redelivered_count_only");
            Ok(())
        }
    }

    /// A BatchingContext whose every method fails, for error-propagation
    /// tests.
    struct FailingBatchingContext;

    impl BatchingContext for FailingBatchingContext {
        fn insert(&self, _tuple: &dyn Persistable) -> Result<()> {
            Err(Error::Storage("insert failed".to_string()))
        }

        fn delete(&self, _tuple: &dyn Persistable) -> Result<()> {
            Err(Error::Storage("delete failed".to_string()))
        }

        fn update_data_and_size(&self, _tuple: &dyn Persistable) -> Result<()> {
            Err(Error::Storage("update failed".to_string()))
        }

        fn update_logical_delete_and_xid(&self, _tuple: &dyn Persistable) -> Result<()> {
            Err(Error::Storage("update failed".to_string()))
        }

        fn update_redelivered_count_only(&self, _tuple: &dyn Persistable) -> Result<()> {
            Err(Error::Storage("update failed".to_string()))
        }
    }

    struct MockTransaction {
        id: TransactionId,
        state: TransactionState,
    }

    impl Transaction for MockTransaction {
        fn id(&self) -> TransactionId {
            self.id
        }

        fn state(&self) -> TransactionState {
            self.state
        }
    }

    // ====================================================================
    // Compile-time contract tests (object safety, Send+Sync)
    // ====================================================================

    #[test]
    fn persistable_is_object_safe_and_send_sync() {
        fn accepts(_: &dyn Persistable) {}
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}
        let _ = accepts as fn(&dyn Persistable);
        assert_send::<Box<dyn Persistable>>();
        assert_sync::<Box<dyn Persistable>>();
    }

    #[test]
    fn link_is_object_safe_and_send_sync() {
        fn accepts(_: &dyn Link) {}
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}
        let _ = accepts as fn(&dyn Link);
        assert_send::<Box<dyn Link>>();
        assert_sync::<Box<dyn Link>>();
    }

    #[test]
    fn item_is_object_safe_and_send_sync() {
        fn accepts(_: &dyn Item) {}
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}
        let _ = accepts as fn(&dyn Item);
        assert_send::<Box<dyn Item>>();
        assert_sync::<Box<dyn Item>>();
    }

    #[test]
    fn batching_context_is_object_safe_and_send_sync() {
        fn accepts(_: &dyn BatchingContext) {}
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}
        let _ = accepts as fn(&dyn BatchingContext);
        assert_send::<Box<dyn BatchingContext>>();
        assert_sync::<Box<dyn BatchingContext>>();
    }

    #[test]
    fn transaction_is_object_safe() {
        fn accepts(_: &dyn Transaction) {}
        let _ = accepts as fn(&dyn Transaction);
    }

    // ====================================================================
    // Persistable behavioral tests
    // ====================================================================

    #[test]
    fn persistable_data_round_trips() {
        let tuple = MockPersistable::new(StorageStrategy::Always);
        assert!(tuple.data().is_none());
        assert_eq!(tuple.in_memory_byte_size(), 0);

        let data = Arc::new(MemberData::from(b"payload".as_slice()));
        tuple.set_data(Arc::clone(&data)).unwrap();

        let read_back = tuple.data().unwrap();
        assert!(Arc::ptr_eq(&read_back, &data));
        assert_eq!(tuple.in_memory_byte_size(), 7);
    }

    #[test]
    fn persistable_lock_id_round_trips() {
        let tuple = MockPersistable::new(StorageStrategy::Always);
        assert_eq!(tuple.lock_id(), LockId::UNLOCKED);

        tuple.set_lock_id(LockId::new(9)).unwrap();
        assert_eq!(tuple.lock_id(), LockId::new(9));
    }

    #[test]
    fn persistable_logical_delete_carries_branch() {
        let tuple = MockPersistable::new(StorageStrategy::Always);
        let branch = TransactionId::new();

        tuple.set_logically_deleted(true, Some(branch)).unwrap();
        assert!(tuple.logically_deleted());
        assert_eq!(tuple.transaction_branch(), Some(branch));

        tuple.set_logically_deleted(false, None).unwrap();
        assert!(!tuple.logically_deleted());
        assert!(tuple.transaction_branch().is_none());
    }

    #[test]
    fn persistable_requires_persistence_follows_strategy() {
        assert!(MockPersistable::new(StorageStrategy::Always).requires_persistence());
        assert!(!MockPersistable::new(StorageStrategy::Never).requires_persistence());
    }

    // ====================================================================
    // BatchingContext behavioral tests
    // ====================================================================

    #[test]
    fn batching_context_records_calls() {
        let context = MockBatchingContext::new();
        let tuple = MockPersistable::new(StorageStrategy::Always);

        context.insert(&tuple).unwrap();
        context.update_data_and_size(&tuple).unwrap();
        context.delete(&tuple).unwrap();

        let calls = context.calls.lock().unwrap();
        assert_eq!(*calls, vec!["insert", "update_data_and_size", "delete"]);
    }

    #[test]
    fn failing_batching_context_propagates_errors() {
        let context = FailingBatchingContext;
        let tuple = MockPersistable::new(StorageStrategy::Always);

        let err = context.insert(&tuple).unwrap_err();
        assert!(matches!(err, Error::Storage(_)));
        assert!(err.to_string().contains("insert failed"));
    }

    // ====================================================================
    // Transaction behavioral tests
    // ====================================================================

    #[test]
    fn transaction_exposes_id_and_state() {
        let id = TransactionId::new();
        let tx = MockTransaction {
            id,
            state: TransactionState::Committing1PC,
        };

        let dyn_tx: &dyn Transaction = &tx;
        assert_eq!(dyn_tx.id(), id);
        assert_eq!(dyn_tx.state(), TransactionState::Committing1PC);
    }
}
