//! The per-transaction work list and its commit-protocol state machine
//!
//! A `TaskList` collects the tasks registered by one transaction, in
//! registration order, and drives them through the multi-phase commit
//! protocol:
//!
//! ```text
//! Untouched → Precommitting → Precommitted → Committing → Committed
//!                        \                \→ Aborting   → Aborted
//!                         \ (rollback also legal from Untouched
//!                            and Precommitting)
//! Committed → PostCommitting → PostCommitted
//! Aborting/Aborted/Precommitted → PostAborting → PostAborted
//! ```
//!
//! Every operation checks the states it is legal from and fails with
//! [`Error::InvalidTaskListState`] otherwise; this guard is the primary
//! defense against a transaction manager invoking phases out of order.
//!
//! A task list is not thread-safe. It belongs to exactly one transaction
//! used by one thread at a time; serialization across transactions is the
//! surrounding item/lock layer's concern.

use std::fmt;

use cask_core::{ContainerId, Error, Result, StorageStrategy, Transaction, TransactionState};
use tracing::debug;

use crate::task::Task;

/// Where a task list sits in the commit protocol
///
/// The name is carried inside protocol-sequencing errors, so a misordered
/// call can be diagnosed from the message alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskListState {
    /// No phase has run yet
    Untouched,
    /// Pre-commit walk in progress; also where a failed walk leaves the list
    Precommitting,
    /// Pre-commit walk completed (or skipped for a recovered transaction)
    Precommitted,
    /// Commit passes in progress
    Committing,
    /// Both commit passes completed
    Committed,
    /// Abort walk in progress; also where a failed walk leaves the list
    Aborting,
    /// Abort walk completed
    Aborted,
    /// Post-commit walk in progress
    PostCommitting,
    /// Post-commit walk completed (terminal)
    PostCommitted,
    /// Post-abort walk in progress
    PostAborting,
    /// Post-abort walk completed (terminal)
    PostAborted,
}

impl Default for TaskListState {
    fn default() -> Self {
        TaskListState::Untouched
    }
}

impl fmt::Display for TaskListState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TaskListState::Untouched => "Untouched",
            TaskListState::Precommitting => "Precommitting",
            TaskListState::Precommitted => "Precommitted",
            TaskListState::Committing => "Committing",
            TaskListState::Committed => "Committed",
            TaskListState::Aborting => "Aborting",
            TaskListState::Aborted => "Aborted",
            TaskListState::PostCommitting => "PostCommitting",
            TaskListState::PostCommitted => "PostCommitted",
            TaskListState::PostAborting => "PostAborting",
            TaskListState::PostAborted => "PostAborted",
        };
        write!(f, "{}", name)
    }
}

fn strategy_index(strategy: StorageStrategy) -> usize {
    match strategy {
        StorageStrategy::Always => 0,
        StorageStrategy::Eventually => 1,
        StorageStrategy::Maybe => 2,
        StorageStrategy::Never => 3,
    }
}

/// The ordered collection of tasks registered against one transaction
///
/// Tasks are appended by `add_work` and walked in insertion order by every
/// phase; later-added tasks may reference state established by earlier ones
/// against the same link, so the order is part of the contract.
#[derive(Debug, Default)]
pub struct TaskList {
    tasks: Vec<Task>,
    state: TaskListState,
    strategy_present: [bool; 4],
    requires_persistence: bool,
}

impl TaskList {
    /// Create an empty list in the `Untouched` state
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a task to the tail of the list
    ///
    /// Updates the storage-strategy presence flags and ORs the task's
    /// `requires_persistence` into the list-level flag; a task without a
    /// persistable (a null task) is appended without touching either.
    pub fn add_work(&mut self, task: Task) {
        if let Some(tuple) = task.persistable() {
            self.strategy_present[strategy_index(tuple.storage_strategy())] = true;
            self.requires_persistence |= tuple.requires_persistence();
        }
        self.tasks.push(task);
    }

    /// Current protocol state
    pub fn state(&self) -> TaskListState {
        self.state
    }

    /// Number of tasks in the list
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// True if no work has been registered
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// True if any registered task's record must reach the persistence layer
    pub fn requires_persistence(&self) -> bool {
        self.requires_persistence
    }

    /// True if any registered task's item uses the given storage strategy
    pub fn contains_strategy(&self, strategy: StorageStrategy) -> bool {
        self.strategy_present[strategy_index(strategy)]
    }

    /// Iterate over the tasks in insertion order
    pub fn iter(&self) -> std::slice::Iter<'_, Task> {
        self.tasks.iter()
    }

    /// Iterate over the tasks whose persistable uses the given strategy
    pub fn iter_by_strategy(
        &self,
        strategy: StorageStrategy,
    ) -> impl Iterator<Item = &Task> {
        self.tasks.iter().filter(move |task| {
            task.persistable()
                .is_some_and(|tuple| tuple.storage_strategy() == strategy)
        })
    }

    /// Number of pending removals against the given container
    pub fn count_removing_items(&self, container: ContainerId) -> usize {
        self.tasks
            .iter()
            .filter(|task| task.is_remove_from_list(container))
            .count()
    }

    /// Sum of the tasks' size approximations for the given state
    ///
    /// # Errors
    ///
    /// Propagates the first task's [`Error::UnexpectedTransactionState`].
    pub fn size_approximation(&self, state: TransactionState) -> Result<u64> {
        let mut total = 0u64;
        for task in &self.tasks {
            total += task.size_approximation(state)?;
        }
        Ok(total)
    }

    /// Run the pre-commit walk
    ///
    /// Legal only from `Untouched`. Walks every task's `pre_commit` in
    /// insertion order; a mid-walk failure leaves the list in
    /// `Precommitting`, which the caller must treat as fatal for the
    /// transaction.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidTaskListState`] from any other state; otherwise the
    /// first failing task's error.
    pub fn pre_commit(&mut self, transaction: &dyn Transaction) -> Result<()> {
        self.ensure_state("pre_commit", &[TaskListState::Untouched])?;
        self.state = TaskListState::Precommitting;
        debug!(
            target: "cask::commit",
            transaction = %transaction.id(),
            tasks = self.tasks.len(),
            "pre-commit walk starting"
        );
        for task in &self.tasks {
            task.pre_commit(transaction)?;
        }
        self.state = TaskListState::Precommitted;
        debug!(
            target: "cask::commit",
            transaction = %transaction.id(),
            "pre-commit walk complete"
        );
        Ok(())
    }

    /// Run both commit passes
    ///
    /// Legal only from `Precommitted`. Pass one calls every task's
    /// `commit_internal` in insertion order; pass two calls every task's
    /// `commit_external`. The passes never interleave: an external commit
    /// must not run while any task's in-memory state is still
    /// pre-transition, or one task could observe another's link
    /// half-committed.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidTaskListState`] from any other state; otherwise the
    /// first failing task's error, leaving the list in `Committing`.
    pub fn commit(&mut self, transaction: &dyn Transaction) -> Result<()> {
        self.ensure_state("commit", &[TaskListState::Precommitted])?;
        self.state = TaskListState::Committing;
        debug!(
            target: "cask::commit",
            transaction = %transaction.id(),
            tasks = self.tasks.len(),
            "commit walk starting"
        );
        for task in &self.tasks {
            task.commit_internal(transaction)?;
        }
        for task in &self.tasks {
            task.commit_external(transaction)?;
        }
        self.state = TaskListState::Committed;
        debug!(
            target: "cask::commit",
            transaction = %transaction.id(),
            "commit walk complete"
        );
        Ok(())
    }

    /// Run the abort walk
    ///
    /// Legal from `Untouched` (user-initiated rollback before any
    /// pre-commit), `Precommitting` (failure during the pre-commit walk),
    /// or `Precommitted` (the external decision was to abort).
    ///
    /// # Errors
    ///
    /// [`Error::InvalidTaskListState`] from any other state; otherwise the
    /// first failing task's error, leaving the list in `Aborting`.
    pub fn rollback(&mut self, transaction: &dyn Transaction) -> Result<()> {
        self.ensure_state(
            "rollback",
            &[
                TaskListState::Untouched,
                TaskListState::Precommitting,
                TaskListState::Precommitted,
            ],
        )?;
        self.state = TaskListState::Aborting;
        debug!(
            target: "cask::commit",
            transaction = %transaction.id(),
            tasks = self.tasks.len(),
            "abort walk starting"
        );
        for task in &self.tasks {
            task.abort(transaction)?;
        }
        self.state = TaskListState::Aborted;
        debug!(
            target: "cask::commit",
            transaction = %transaction.id(),
            "abort walk complete"
        );
        Ok(())
    }

    /// Run the post-completion walk
    ///
    /// With `committed` set, legal only from `Committed`: walks every
    /// task's `post_commit`. Otherwise legal from `Aborting` (our own
    /// rollback failed mid-walk), `Aborted`, or `Precommitted` (a peer's
    /// rollback or the persistence layer's commit failed after our
    /// pre-commit, forcing a late abort): walks every task's `post_abort`.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidTaskListState`] from any other state; otherwise the
    /// first failing task's error, leaving the list in `PostCommitting` or
    /// `PostAborting`.
    pub fn post_complete(&mut self, transaction: &dyn Transaction, committed: bool) -> Result<()> {
        if committed {
            self.ensure_state("post_complete(committed)", &[TaskListState::Committed])?;
            self.state = TaskListState::PostCommitting;
            debug!(
                target: "cask::commit",
                transaction = %transaction.id(),
                tasks = self.tasks.len(),
                "post-commit walk starting"
            );
            for task in &self.tasks {
                task.post_commit(transaction)?;
            }
            self.state = TaskListState::PostCommitted;
        } else {
            self.ensure_state(
                "post_complete(aborted)",
                &[
                    TaskListState::Aborting,
                    TaskListState::Aborted,
                    TaskListState::Precommitted,
                ],
            )?;
            self.state = TaskListState::PostAborting;
            debug!(
                target: "cask::commit",
                transaction = %transaction.id(),
                tasks = self.tasks.len(),
                "post-abort walk starting"
            );
            for task in &self.tasks {
                task.post_abort(transaction)?;
            }
            self.state = TaskListState::PostAborted;
        }
        debug!(
            target: "cask::commit",
            transaction = %transaction.id(),
            committed,
            "post-complete walk done"
        );
        Ok(())
    }

    /// Declare the list already precommitted, skipping the walk
    ///
    /// Used when reconstructing the work of an in-doubt transaction that is
    /// known to have prepared before a restart; the pre-commit work already
    /// happened in the previous incarnation. Legal from `Untouched`;
    /// idempotent from `Precommitted`.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidTaskListState`] from any other state.
    pub fn declare_already_precommitted(&mut self) -> Result<()> {
        self.ensure_state(
            "declare_already_precommitted",
            &[TaskListState::Untouched, TaskListState::Precommitted],
        )?;
        self.state = TaskListState::Precommitted;
        Ok(())
    }

    fn ensure_state(&self, operation: &'static str, legal: &[TaskListState]) -> Result<()> {
        if legal.contains(&self.state) {
            return Ok(());
        }
        Err(Error::InvalidTaskListState {
            operation,
            state: self.state.to_string(),
        })
    }
}
