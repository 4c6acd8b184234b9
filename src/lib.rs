//! Cask - transactional task core for an embedded message store
//!
//! Cask implements the unit-of-work layer that sits between a message
//! store's item model and its persistence engine. Additions, updates, and
//! removals of items are captured as tasks, collected into a per-transaction
//! task list, and driven through a multi-phase commit protocol (pre-commit,
//! internal commit, external commit, post-complete) with strict phase
//! ordering.
//!
//! # Quick Start
//!
//! ```ignore
//! use cask::{Task, TaskList};
//!
//! let mut work = TaskList::new();
//! work.add_work(Task::add(link));
//!
//! work.pre_commit(&tx)?;
//! work.commit(&tx)?;
//! work.post_complete(&tx, true)?;
//! ```
//!
//! # Architecture
//!
//! The physical persistence engine, the item/link ownership graph, and the
//! lock manager are external collaborators reached through the traits in
//! `cask-core` (`BatchingContext`, `Link`, `Item`, `Persistable`). This
//! crate only re-exports the public API of the member crates.

pub use cask_commit::{
    CachedPersistable, Task, TaskList, TaskListState, DEFAULT_TASK_PERSISTENT_SIZE,
};
pub use cask_core::{
    BatchingContext, ContainerId, Error, Item, ItemId, Link, LockId, MemberData, Persistable,
    Result, StorageStrategy, TaskKind, Transaction, TransactionId, TransactionState,
};
