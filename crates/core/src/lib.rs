//! Core types and traits for Cask
//!
//! This crate defines the foundational types used throughout the system:
//! - TransactionState: Where a transaction sits in its commit lifecycle
//! - TaskKind: Discriminates the pending-mutation kinds (Add, Update, ...)
//! - StorageStrategy: Per-item policy governing whether persistence is required
//! - ItemId / ContainerId / LockId / TransactionId: Identity newtypes
//! - MemberData: An item's opaque persistent payload
//! - Error: Error type hierarchy
//! - Traits: Collaborator contracts (Persistable, Link, Item,
//!   BatchingContext, Transaction)

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod data;
pub mod error;
pub mod traits;
pub mod types;

// Re-export commonly used types and traits
pub use data::MemberData;
pub use error::{Error, Result};
pub use traits::{BatchingContext, Item, Link, Persistable, Transaction};
pub use types::{
    ContainerId, ItemId, LockId, StorageStrategy, TaskKind, TransactionId, TransactionState,
};
