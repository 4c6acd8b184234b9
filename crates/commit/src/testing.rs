//! Reference test doubles for the commit protocol
//!
//! This module provides the in-memory collaborator implementations used by
//! this crate's own tests and reusable by the enclosing transaction
//! manager's:
//!
//! - **`HeapPersistable`**: a live, mutable `Persistable` backed by a
//!   `RwLock`
//! - **`StubItem`**: an `Item` with configurable store-presence and
//!   mutability hints, recording its event callbacks
//! - **`RecordingLink`**: a `Link` that records every phase callback into a
//!   shared journal, with optional failure injection
//! - **`RecordingBatchingContext`**: a `BatchingContext` that records the
//!   physical calls it receives
//! - **`TestTransaction`**: a `Transaction` with a fixed id and a settable
//!   state
//!
//! Journal entries have the shape `"<callback>#<item-id>"`, so ordering
//! assertions read as plain string comparisons.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use cask_core::{
    BatchingContext, ContainerId, Error, Item, ItemId, Link, LockId, MemberData, Persistable,
    Result, StorageStrategy, Transaction, TransactionId, TransactionState,
};
use parking_lot::{Mutex, RwLock};

/// Shared journal the recording doubles append to
pub type Journal = Arc<Mutex<Vec<String>>>;

/// Create an empty shared journal
pub fn new_journal() -> Journal {
    Arc::new(Mutex::new(Vec::new()))
}

/// Drain a journal into a plain vector for assertions
pub fn journal_entries(journal: &Journal) -> Vec<String> {
    journal.lock().clone()
}

// ========================================================================
// HeapPersistable
// ========================================================================

struct HeapPersistableInner {
    data: Option<Arc<MemberData>>,
    size: u64,
    lock_id: LockId,
    logically_deleted: bool,
    branch: Option<TransactionId>,
    redelivered_count: u32,
}

/// A live, mutable in-memory persistable
///
/// The byte size tracks the data set through `with_data`/`set_data`.
/// `requires_persistence` defaults to true for `StorageStrategy::Always`
/// and can be overridden with `with_requires_persistence`.
pub struct HeapPersistable {
    strategy: StorageStrategy,
    requires_persistence: bool,
    inner: RwLock<HeapPersistableInner>,
}

impl HeapPersistable {
    /// Create an empty persistable with the given storage strategy
    pub fn new(strategy: StorageStrategy) -> Self {
        HeapPersistable {
            strategy,
            requires_persistence: strategy == StorageStrategy::Always,
            inner: RwLock::new(HeapPersistableInner {
                data: None,
                size: 0,
                lock_id: LockId::UNLOCKED,
                logically_deleted: false,
                branch: None,
                redelivered_count: 0,
            }),
        }
    }

    /// Set the member data; the byte size follows the data
    pub fn with_data(self, data: MemberData) -> Self {
        {
            let mut inner = self.inner.write();
            inner.size = data.byte_size();
            inner.data = Some(Arc::new(data));
        }
        self
    }

    /// Set the lock id
    pub fn with_lock_id(self, lock_id: LockId) -> Self {
        self.inner.write().lock_id = lock_id;
        self
    }

    /// Set the redelivered count
    pub fn with_redelivered_count(self, count: u32) -> Self {
        self.inner.write().redelivered_count = count;
        self
    }

    /// Override the `requires_persistence` flag
    pub fn with_requires_persistence(mut self, required: bool) -> Self {
        self.requires_persistence = required;
        self
    }
}

impl Persistable for HeapPersistable {
    fn data(&self) -> Option<Arc<MemberData>> {
        self.inner.read().data.clone()
    }

    fn in_memory_byte_size(&self) -> u64 {
        self.inner.read().size
    }

    fn lock_id(&self) -> LockId {
        self.inner.read().lock_id
    }

    fn logically_deleted(&self) -> bool {
        self.inner.read().logically_deleted
    }

    fn transaction_branch(&self) -> Option<TransactionId> {
        self.inner.read().branch
    }

    fn redelivered_count(&self) -> u32 {
        self.inner.read().redelivered_count
    }

    fn storage_strategy(&self) -> StorageStrategy {
        self.strategy
    }

    fn requires_persistence(&self) -> bool {
        self.requires_persistence
    }

    fn set_data(&self, data: Arc<MemberData>) -> Result<()> {
        let mut inner = self.inner.write();
        inner.size = data.byte_size();
        inner.data = Some(data);
        Ok(())
    }

    fn set_lock_id(&self, lock_id: LockId) -> Result<()> {
        self.inner.write().lock_id = lock_id;
        Ok(())
    }

    fn set_logically_deleted(&self, deleted: bool, branch: Option<TransactionId>) -> Result<()> {
        let mut inner = self.inner.write();
        inner.logically_deleted = deleted;
        inner.branch = branch;
        Ok(())
    }

    fn set_redelivered_count(&self, count: u32) -> Result<()> {
        self.inner.write().redelivered_count = count;
        Ok(())
    }
}

// ========================================================================
// StubItem
// ========================================================================

/// An in-memory item with configurable hints
///
/// Event callbacks are recorded into the shared journal as
/// `"event_<name>#<item-id>"`.
pub struct StubItem {
    item_id: ItemId,
    in_store: AtomicBool,
    data_immutable: bool,
    data_never_updated: bool,
    journal: Journal,
}

impl StubItem {
    /// Create an item that is in the store with mutable data
    pub fn new(item_id: ItemId, journal: Journal) -> Self {
        StubItem {
            item_id,
            in_store: AtomicBool::new(true),
            data_immutable: false,
            data_never_updated: false,
            journal,
        }
    }

    /// Declare the item's data immutable and never updated
    pub fn with_immutable_data(mut self) -> Self {
        self.data_immutable = true;
        self.data_never_updated = true;
        self
    }

    /// Flip whether the item is in the store
    pub fn set_in_store(&self, in_store: bool) {
        self.in_store.store(in_store, Ordering::SeqCst);
    }

    fn record(&self, event: &str) {
        self.journal.lock().push(format!("{}#{}", event, self.item_id));
    }
}

impl Item for StubItem {
    fn is_in_store(&self) -> bool {
        self.in_store.load(Ordering::SeqCst)
    }

    fn persistent_data_immutable(&self) -> bool {
        self.data_immutable
    }

    fn persistent_data_never_updated(&self) -> bool {
        self.data_never_updated
    }

    fn event_post_commit_add(&self, _transaction: &dyn Transaction) {
        self.record("event_post_commit_add");
    }

    fn event_post_commit_update(&self, _transaction: &dyn Transaction) {
        self.record("event_post_commit_update");
    }

    fn event_post_commit_remove(&self, _transaction: &dyn Transaction) {
        self.record("event_post_commit_remove");
    }

    fn event_post_rollback_add(&self, _transaction: &dyn Transaction) {
        self.record("event_post_rollback_add");
    }

    fn event_post_rollback_update(&self, _transaction: &dyn Transaction) {
        self.record("event_post_rollback_update");
    }

    fn event_post_rollback_remove(&self, _transaction: &dyn Transaction) {
        self.record("event_post_rollback_remove");
    }
}

// ========================================================================
// RecordingLink
// ========================================================================

/// A link that records every phase callback into the shared journal
///
/// Entries have the shape `"<callback>#<item-id>"`. One callback name can
/// be armed to fail via `failing_on`, for testing mid-walk failures.
pub struct RecordingLink {
    item_id: ItemId,
    container: ContainerId,
    tuple: Arc<HeapPersistable>,
    item: Option<Arc<StubItem>>,
    journal: Journal,
    fail_on: Option<String>,
}

impl RecordingLink {
    /// Create a link over the given tuple, with a default in-store item
    pub fn new(
        item_id: ItemId,
        container: ContainerId,
        tuple: Arc<HeapPersistable>,
        journal: Journal,
    ) -> Self {
        let item = Arc::new(StubItem::new(item_id, journal.clone()));
        RecordingLink {
            item_id,
            container,
            tuple,
            item: Some(item),
            journal,
            fail_on: None,
        }
    }

    /// Replace the item this link resolves to
    pub fn with_item(mut self, item: Arc<StubItem>) -> Self {
        self.item = Some(item);
        self
    }

    /// Make the link resolve to no item
    pub fn without_item(mut self) -> Self {
        self.item = None;
        self
    }

    /// Arm one callback (by journal name, e.g. `"pre_commit_add"`) to fail
    pub fn failing_on(mut self, callback: &str) -> Self {
        self.fail_on = Some(callback.to_string());
        self
    }

    /// The item this link resolves to, if any
    pub fn stub_item(&self) -> Option<&Arc<StubItem>> {
        self.item.as_ref()
    }

    fn record(&self, callback: &str) -> Result<()> {
        self.journal
            .lock()
            .push(format!("{}#{}", callback, self.item_id));
        if self.fail_on.as_deref() == Some(callback) {
            return Err(Error::Storage(format!("injected failure in {}", callback)));
        }
        Ok(())
    }
}

impl Link for RecordingLink {
    fn item_id(&self) -> ItemId {
        self.item_id
    }

    fn container(&self) -> ContainerId {
        self.container
    }

    fn item(&self) -> Option<Arc<dyn Item>> {
        self.item
            .as_ref()
            .map(|item| Arc::clone(item) as Arc<dyn Item>)
    }

    fn tuple(&self) -> Arc<dyn Persistable> {
        Arc::clone(&self.tuple) as Arc<dyn Persistable>
    }

    fn pre_commit_add(&self, _transaction: &dyn Transaction) -> Result<()> {
        self.record("pre_commit_add")
    }

    fn pre_commit_update(&self, _transaction: &dyn Transaction) -> Result<()> {
        self.record("pre_commit_update")
    }

    fn pre_commit_remove(&self, _transaction: &dyn Transaction) -> Result<()> {
        self.record("pre_commit_remove")
    }

    fn internal_commit_add(&self, _transaction: &dyn Transaction) -> Result<()> {
        self.record("internal_commit_add")
    }

    fn internal_commit_update(&self, _transaction: &dyn Transaction) -> Result<()> {
        self.record("internal_commit_update")
    }

    fn internal_commit_remove(&self, _transaction: &dyn Transaction) -> Result<()> {
        self.record("internal_commit_remove")
    }

    fn commit_add(&self, _transaction: &dyn Transaction) -> Result<()> {
        self.record("commit_add")
    }

    fn commit_update(&self, _transaction: &dyn Transaction) -> Result<()> {
        self.record("commit_update")
    }

    fn commit_remove(&self, _transaction: &dyn Transaction) -> Result<()> {
        self.record("commit_remove")
    }

    fn abort_add(&self, _transaction: &dyn Transaction) -> Result<()> {
        self.record("abort_add")
    }

    fn abort_update(&self, _transaction: &dyn Transaction) -> Result<()> {
        self.record("abort_update")
    }

    fn abort_remove(&self, _transaction: &dyn Transaction) -> Result<()> {
        self.record("abort_remove")
    }

    fn post_commit_add(&self, _transaction: &dyn Transaction) -> Result<()> {
        self.record("post_commit_add")
    }

    fn post_commit_update(&self, _transaction: &dyn Transaction) -> Result<()> {
        self.record("post_commit_update")
    }

    fn post_commit_remove(&self, _transaction: &dyn Transaction) -> Result<()> {
        self.record("post_commit_remove")
    }

    fn post_abort_add(&self, _transaction: &dyn Transaction) -> Result<()> {
        self.record("post_abort_add")
    }

    fn post_abort_update(&self, _transaction: &dyn Transaction) -> Result<()> {
        self.record("post_abort_update")
    }

    fn post_abort_remove(&self, _transaction: &dyn Transaction) -> Result<()> {
        self.record("post_abort_remove")
    }
}

// ========================================================================
// RecordingBatchingContext
// ========================================================================

/// A batching context that records every physical call it receives
///
/// The logical-delete and redelivered-count calls record the value visible
/// on the tuple at call time, so tests can assert what would have been
/// written.
#[derive(Default)]
pub struct RecordingBatchingContext {
    calls: Mutex<Vec<String>>,
}

impl RecordingBatchingContext {
    /// Create a context with an empty call record
    pub fn new() -> Self {
        Self::default()
    }

    /// The calls received so far, in order
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }
}

impl BatchingContext for RecordingBatchingContext {
    fn insert(&self, _tuple: &dyn Persistable) -> Result<()> {
        self.calls.lock().push("insert".to_string());
        Ok(())
    }

    fn delete(&self, _tuple: &dyn Persistable) -> Result<()> {
        self.calls.lock().push("delete".to_string());
        Ok(())
    }

    fn update_data_and_size(&self, _tuple: &dyn Persistable) -> Result<()> {
        self.calls.lock().push("update_data_and_size".to_string());
        Ok(())
    }

    fn update_logical_delete_and_xid(&self, tuple: &dyn Persistable) -> Result<()> {
        self.calls.lock().push(format!(
            "update_logical_delete_and_xid(deleted={})",
            tuple.logically_deleted()
        ));
        Ok(())
    }

    fn update_redelivered_count_only(&self, tuple: &dyn Persistable) -> Result<()> {
        self.calls.lock().push(format!(
            "update_redelivered_count_only({})",
            tuple.redelivered_count()
        ));
        Ok(())
    }
}

// ========================================================================
// TestTransaction
// ========================================================================

/// A transaction with a fixed id and a settable state
pub struct TestTransaction {
    id: TransactionId,
    state: Mutex<TransactionState>,
}

impl TestTransaction {
    /// Create a transaction in the given state
    pub fn new(state: TransactionState) -> Self {
        TestTransaction {
            id: TransactionId::new(),
            state: Mutex::new(state),
        }
    }

    /// Move the transaction to another state
    pub fn set_state(&self, state: TransactionState) {
        *self.state.lock() = state;
    }
}

impl Transaction for TestTransaction {
    fn id(&self) -> TransactionId {
        self.id
    }

    fn state(&self) -> TransactionState {
        *self.state.lock()
    }
}
