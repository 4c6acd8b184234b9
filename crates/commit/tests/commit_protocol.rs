//! End-to-end commit-protocol scenarios
//!
//! These tests drive full task lists through the phase walks the way the
//! enclosing transaction manager would, using the reference doubles from
//! `cask_commit::testing`.

use std::sync::Arc;

use cask_commit::testing::{
    journal_entries, new_journal, HeapPersistable, Journal, RecordingBatchingContext,
    RecordingLink, TestTransaction,
};
use cask_commit::{Task, TaskList, TaskListState};
use cask_core::{ContainerId, ItemId, MemberData, Persistable, StorageStrategy, TransactionState};

fn link_over(
    item_id: u64,
    tuple: Arc<HeapPersistable>,
    journal: &Journal,
) -> Arc<RecordingLink> {
    Arc::new(RecordingLink::new(
        ItemId::new(item_id),
        ContainerId::new(1),
        tuple,
        journal.clone(),
    ))
}

fn default_tuple() -> Arc<HeapPersistable> {
    Arc::new(
        HeapPersistable::new(StorageStrategy::Always)
            .with_data(MemberData::from(vec![vec![0u8; 50]])),
    )
}

#[test]
fn test_add_then_update_same_link_commits_in_order() {
    let journal = new_journal();
    let tuple = default_tuple();
    let link = link_over(1, tuple, &journal);

    let mut list = TaskList::new();
    list.add_work(Task::add(Arc::clone(&link) as _));
    list.add_work(Task::update(link));

    let tx = TestTransaction::new(TransactionState::Committing1PC);
    list.pre_commit(&tx).unwrap();
    list.commit(&tx).unwrap();
    tx.set_state(TransactionState::Committed);
    list.post_complete(&tx, true).unwrap();

    assert_eq!(list.state(), TaskListState::PostCommitted);
    assert_eq!(
        journal_entries(&journal),
        vec![
            "pre_commit_add#1",
            "pre_commit_update#1",
            "internal_commit_add#1",
            "internal_commit_update#1",
            "commit_add#1",
            "commit_update#1",
            "post_commit_add#1",
            "event_post_commit_add#1",
            "post_commit_update#1",
            "event_post_commit_update#1",
        ]
    );
}

#[test]
fn test_phase_walks_follow_insertion_order_across_links() {
    let journal = new_journal();
    let mut list = TaskList::new();
    list.add_work(Task::add(link_over(1, default_tuple(), &journal) as _));
    list.add_work(Task::remove(link_over(2, default_tuple(), &journal) as _));
    list.add_work(Task::update(link_over(3, default_tuple(), &journal) as _));

    let tx = TestTransaction::new(TransactionState::Committing1PC);
    list.pre_commit(&tx).unwrap();
    assert_eq!(
        journal_entries(&journal),
        vec![
            "pre_commit_add#1",
            "pre_commit_remove#2",
            "pre_commit_update#3"
        ]
    );
}

#[test]
fn test_commit_completes_every_internal_before_any_external() {
    let journal = new_journal();
    let mut list = TaskList::new();
    for id in 1..=3u64 {
        list.add_work(Task::add(link_over(id, default_tuple(), &journal) as _));
    }

    let tx = TestTransaction::new(TransactionState::Committing1PC);
    list.pre_commit(&tx).unwrap();
    list.commit(&tx).unwrap();

    let entries = journal_entries(&journal);
    let first_external = entries
        .iter()
        .position(|e| e.starts_with("commit_add"))
        .unwrap();
    let last_internal = entries
        .iter()
        .rposition(|e| e.starts_with("internal_commit_add"))
        .unwrap();
    assert!(last_internal < first_external);
}

#[test]
fn test_rollback_protocol_runs_abort_then_post_abort() {
    let journal = new_journal();
    let tuple = default_tuple();
    let link = link_over(4, tuple, &journal);

    let mut list = TaskList::new();
    list.add_work(Task::add(link));

    let tx = TestTransaction::new(TransactionState::RollingBack);
    list.rollback(&tx).unwrap();
    assert_eq!(list.state(), TaskListState::Aborted);

    tx.set_state(TransactionState::RolledBack);
    list.post_complete(&tx, false).unwrap();
    assert_eq!(list.state(), TaskListState::PostAborted);

    assert_eq!(
        journal_entries(&journal),
        vec![
            "abort_add#4",
            "post_abort_add#4",
            "event_post_rollback_add#4"
        ]
    );
}

#[test]
fn test_rollback_of_a_prepared_add_undoes_the_speculative_insert() {
    let journal = new_journal();
    let link = link_over(5, default_tuple(), &journal);
    let task = Task::add(link);
    let batching = RecordingBatchingContext::new();

    // Phase one wrote the row.
    let tx = TestTransaction::new(TransactionState::Preparing);
    task.persist(&tx, &batching).unwrap();

    // The coordinator decided to roll back.
    tx.set_state(TransactionState::RollingBack);
    task.persist(&tx, &batching).unwrap();

    assert_eq!(batching.calls(), vec!["insert", "delete"]);
}

#[test]
fn test_two_phase_remove_marks_then_deletes() {
    let journal = new_journal();
    let tuple = default_tuple();
    let link = link_over(6, Arc::clone(&tuple), &journal);
    let task = Task::remove_locked(link);
    let batching = RecordingBatchingContext::new();

    let tx = TestTransaction::new(TransactionState::Preparing);
    task.persist(&tx, &batching).unwrap();
    assert!(tuple.logically_deleted());
    assert_eq!(tuple.transaction_branch(), Some(tx.id()));

    tx.set_state(TransactionState::Committing2PC);
    task.persist(&tx, &batching).unwrap();

    assert_eq!(
        batching.calls(),
        vec!["update_logical_delete_and_xid(deleted=true)", "delete"]
    );
}

#[test]
fn test_empty_transaction_flows_through_with_a_null_task() {
    let mut list = TaskList::new();
    list.add_work(Task::null());
    assert!(!list.requires_persistence());

    let tx = TestTransaction::new(TransactionState::Committing1PC);
    list.pre_commit(&tx).unwrap();
    list.commit(&tx).unwrap();
    tx.set_state(TransactionState::Committed);
    list.post_complete(&tx, true).unwrap();

    assert_eq!(list.state(), TaskListState::PostCommitted);
}

#[test]
fn test_late_abort_after_precommit_takes_the_post_abort_path() {
    // The persistence layer failed a peer's commit after our pre-commit:
    // the manager skips our commit entirely and post-completes as aborted.
    let journal = new_journal();
    let mut list = TaskList::new();
    list.add_work(Task::update(link_over(7, default_tuple(), &journal) as _));

    let tx = TestTransaction::new(TransactionState::Committing1PC);
    list.pre_commit(&tx).unwrap();

    tx.set_state(TransactionState::RolledBack);
    list.post_complete(&tx, false).unwrap();
    assert_eq!(list.state(), TaskListState::PostAborted);
    assert_eq!(
        journal_entries(&journal),
        vec![
            "pre_commit_update#7",
            "post_abort_update#7",
            "event_post_rollback_update#7"
        ]
    );
}

#[test]
fn test_recovered_list_skips_the_precommit_walk() {
    let journal = new_journal();
    let mut list = TaskList::new();
    list.add_work(Task::remove(link_over(8, default_tuple(), &journal) as _));

    list.declare_already_precommitted().unwrap();
    list.declare_already_precommitted().unwrap();

    let tx = TestTransaction::new(TransactionState::Committing2PC);
    list.commit(&tx).unwrap();

    // No pre-commit entries: the walk was skipped, not replayed.
    let entries = journal_entries(&journal);
    assert!(entries.iter().all(|e| !e.starts_with("pre_commit")));
    assert_eq!(list.state(), TaskListState::Committed);
}

#[test]
fn test_quota_accounting_over_a_mixed_list() {
    let journal = new_journal();
    let mut list = TaskList::new();
    list.add_work(Task::add(link_over(1, default_tuple(), &journal) as _));
    list.add_work(Task::remove(link_over(2, default_tuple(), &journal) as _));
    list.add_work(Task::null());

    // Two 50-byte rows plus the per-operation baseline each.
    assert_eq!(
        list.size_approximation(TransactionState::Committing1PC)
            .unwrap(),
        1100
    );

    // While rolling back, the add's row never existed; the remove still
    // costs a full row.
    assert_eq!(
        list.size_approximation(TransactionState::RollingBack)
            .unwrap(),
        500 + 550
    );
}

#[test]
fn test_spooling_persists_only_the_matching_strategy() {
    let journal = new_journal();
    let mut list = TaskList::new();
    list.add_work(Task::add(link_over(
        1,
        Arc::new(HeapPersistable::new(StorageStrategy::Always)),
        &journal,
    ) as _));
    list.add_work(Task::add(link_over(
        2,
        Arc::new(HeapPersistable::new(StorageStrategy::Never)),
        &journal,
    ) as _));

    let tx = TestTransaction::new(TransactionState::Committing1PC);
    let batching = RecordingBatchingContext::new();
    for task in list.iter_by_strategy(StorageStrategy::Always) {
        task.persist(&tx, &batching).unwrap();
    }

    assert_eq!(batching.calls(), vec!["insert"]);
}
