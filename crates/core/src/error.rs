//! Error types for the Cask task layer
//!
//! This module defines all error types used throughout the system.
//! We use `thiserror` for automatic `Display` and `Error` trait
//! implementations.
//!
//! Every error here propagates synchronously to the caller: this layer
//! performs no retry and swallows nothing. Retry policy, if any, belongs to
//! the batching-context collaborator or the transaction manager above.

use crate::types::{ItemId, TaskKind, TransactionState};
use thiserror::Error;

/// Result type alias for Cask operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for the Cask task layer
#[derive(Debug, Error)]
pub enum Error {
    /// A task list phase operation was invoked from a state in which it is
    /// not legal
    ///
    /// Indicates a bug in the calling transaction manager, not a recoverable
    /// condition. Carries the current state name so the faulty call sequence
    /// can be reconstructed from the message alone.
    #[error("illegal task list state for {operation}: {state}")]
    InvalidTaskListState {
        /// The operation that was attempted
        operation: &'static str,
        /// Name of the state the list was in
        state: String,
    },

    /// A task's persist or size method was invoked with a transaction state
    /// its kind does not support
    ///
    /// Indicates the transaction coordinator reached an impossible state
    /// combination; surfaced immediately rather than guessed around.
    #[error("unexpected transaction state {state} for {kind} task")]
    UnexpectedTransactionState {
        /// Kind of the task whose dispatch table has no row for the state
        kind: TaskKind,
        /// The offending transaction state
        state: TransactionState,
    },

    /// An add task found its item no longer present in the store
    ///
    /// Signals that upstream mutation raced ahead of this task; the
    /// transaction manager decides how to react.
    #[error("item {0} is not in the store")]
    ItemNotInStore(ItemId),

    /// A setter was invoked on a frozen cached persistable
    ///
    /// The cache is never the write target for application-level updates.
    #[error("cached persistable is read-only: cannot set {field}")]
    CachedPersistableReadOnly {
        /// The field the caller attempted to set
        field: &'static str,
    },

    /// Error propagated from the batching-context collaborator
    #[error("storage error: {0}")]
    Storage(String),
}
