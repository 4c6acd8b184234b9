//! Core types for the Cask task layer
//!
//! This module defines the foundational types:
//! - TransactionState: Phase marker for the owning transaction
//! - TaskKind: Discriminates the pending-mutation kinds
//! - StorageStrategy: Per-item persistence policy
//! - ItemId / ContainerId / LockId: Identity newtypes for the item graph
//! - TransactionId: Unique identifier for a transaction

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Unique identifier for a transaction
///
/// A TransactionId is a wrapper around a UUID v4. Besides identifying the
/// transaction in diagnostics, it doubles as the transaction-branch id that
/// a remove task persists next to the logical-delete flag during two-phase
/// prepare, so that an in-doubt delete can be matched back to its branch
/// after a restart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TransactionId(Uuid);

impl TransactionId {
    /// Create a new random TransactionId using UUID v4
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create a TransactionId from raw bytes
    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(Uuid::from_bytes(bytes))
    }

    /// Get the raw bytes of this TransactionId
    pub fn as_bytes(&self) -> &[u8; 16] {
        self.0.as_bytes()
    }
}

impl Default for TransactionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identity of an item as known to its link
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ItemId(u64);

impl ItemId {
    /// Create an ItemId from a raw value
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Get the raw value
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identity of the container (stream or list) that owns an item
///
/// Used by the task layer to count pending removals against a given
/// container without reaching into the ownership graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ContainerId(u64);

impl ContainerId {
    /// Create a ContainerId from a raw value
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Get the raw value
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ContainerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lock identifier assigned by the lock manager
///
/// `LockId::UNLOCKED` is the sentinel meaning no consumer holds the item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LockId(u64);

impl LockId {
    /// Sentinel meaning the item is not locked
    pub const UNLOCKED: LockId = LockId(u64::MAX);

    /// Create a LockId from a raw value
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Get the raw value
    pub fn as_u64(&self) -> u64 {
        self.0
    }

    /// True unless this is the `UNLOCKED` sentinel
    pub fn is_locked(&self) -> bool {
        *self != Self::UNLOCKED
    }
}

impl fmt::Display for LockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_locked() {
            write!(f, "{}", self.0)
        } else {
            write!(f, "unlocked")
        }
    }
}

/// Where a transaction sits in its two-phase-commit lifecycle
///
/// Every task decision (what to persist, what size to report) is a pure
/// function of this enum plus the task's own kind. One-phase transactions
/// move straight to `Committing1PC`; two-phase transactions pass through
/// `Preparing`/`Prepared` first and finish in `Committing2PC`, where the
/// physical write for inserts has already happened in phase one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransactionState {
    /// Transaction has committed
    Committed,
    /// One-phase commit in progress
    Committing1PC,
    /// Second phase of a two-phase commit in progress
    Committing2PC,
    /// First phase of a two-phase commit in progress
    Preparing,
    /// First phase of a two-phase commit completed; awaiting the coordinator
    Prepared,
    /// Transaction has rolled back
    RolledBack,
    /// Rollback in progress
    RollingBack,
}

impl TransactionState {
    /// All states, in declaration order
    ///
    /// Handy for exhaustive table checks; the dispatch tables in the task
    /// layer are keyed on (kind, state) pairs.
    pub const ALL: [TransactionState; 7] = [
        TransactionState::Committed,
        TransactionState::Committing1PC,
        TransactionState::Committing2PC,
        TransactionState::Preparing,
        TransactionState::Prepared,
        TransactionState::RolledBack,
        TransactionState::RollingBack,
    ];
}

impl fmt::Display for TransactionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TransactionState::Committed => "Committed",
            TransactionState::Committing1PC => "Committing1PC",
            TransactionState::Committing2PC => "Committing2PC",
            TransactionState::Preparing => "Preparing",
            TransactionState::Prepared => "Prepared",
            TransactionState::RolledBack => "RolledBack",
            TransactionState::RollingBack => "RollingBack",
        };
        write!(f, "{}", name)
    }
}

/// Kind of pending mutation a task represents
///
/// A closed set; `Unknown` exists so that foreign task kinds introduced by
/// future layers fail loudly in the dispatch tables instead of silently
/// persisting nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskKind {
    /// Insert a new item's persistent representation
    Add,
    /// Rewrite an existing item's data and size
    Update,
    /// Delete an unlocked item's persistent representation
    Remove,
    /// Delete a locked item's persistent representation
    RemoveLocked,
    /// Rewrite only the redelivered count of an item
    PersistRedeliveredCount,
    /// No-op task; lets an empty transaction flow through the protocol
    Null,
    /// Unrecognized task kind
    Unknown,
}

impl TaskKind {
    /// True for the remove-family kinds
    pub fn is_remove(&self) -> bool {
        matches!(self, TaskKind::Remove | TaskKind::RemoveLocked)
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TaskKind::Add => "Add",
            TaskKind::Update => "Update",
            TaskKind::Remove => "Remove",
            TaskKind::RemoveLocked => "RemoveLocked",
            TaskKind::PersistRedeliveredCount => "PersistRedeliveredCount",
            TaskKind::Null => "Null",
            TaskKind::Unknown => "Unknown",
        };
        write!(f, "{}", name)
    }
}

/// Per-item policy governing whether persistence is required at all
///
/// Declared by the item at creation time; the task list aggregates which
/// strategies are present so the persistence layer can decide what actually
/// needs to be spooled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StorageStrategy {
    /// The item must always be persisted
    Always,
    /// The item must be persisted before the store shuts down or spills
    Eventually,
    /// The item may be persisted if memory pressure demands it
    Maybe,
    /// The item is never persisted
    Never,
}

impl fmt::Display for StorageStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StorageStrategy::Always => "Always",
            StorageStrategy::Eventually => "Eventually",
            StorageStrategy::Maybe => "Maybe",
            StorageStrategy::Never => "Never",
        };
        write!(f, "{}", name)
    }
}
