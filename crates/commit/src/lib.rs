//! Commit protocol for the Cask task layer
//!
//! This crate implements the unit-of-work abstraction that carries item
//! mutations through a transaction:
//!
//! - **`CachedPersistable`**: a frozen, read-only snapshot of selected
//!   persistable fields, taken so a concurrent mutation of the live item
//!   cannot change what gets physically written
//! - **`Task`**: one pending mutation (add, update, remove, ...) bound to
//!   one link, with state-keyed persist and size-accounting behavior
//! - **`TaskList`**: the ordered per-transaction collection of tasks that
//!   drives the multi-phase commit protocol and enforces legal phase order
//!
//! The `testing` module provides reference doubles (in-memory persistable,
//! recording link, stub item, recording batching context) for this crate's
//! tests and for the enclosing transaction manager's.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod cached;
pub mod task;
pub mod task_list;
pub mod testing;

pub use cached::CachedPersistable;
pub use task::{Task, DEFAULT_TASK_PERSISTENT_SIZE};
pub use task_list::{TaskList, TaskListState};
