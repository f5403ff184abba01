mod common;

use common::*;
use ledger::{
    AccessCredential, EntryDetails, EntryPatch, EntrySource, LedgerError, LedgerOp, LinkedAccount,
    LinkedItem, NewAccount, NewEntry, Reassignment,
};
use uuid::Uuid;

#[tokio::test]
async fn inserts_are_appended_and_balanced() {
    let (ledger, _roles, _db) = ledger_with_db().await;
    let account = open_account(&ledger, "alice", "Checking", None).await;
    let ids = seed(
        &ledger,
        "alice",
        account.id,
        &[(day(2), 100), (day(2), -30), (day(1), 50), (day(3), -5)],
    )
    .await;

    let stored = entries(&ledger, "alice", account.id).await;
    assert_eq!(
        stored.iter().map(|e| e.id).collect::<Vec<_>>(),
        vec![ids[2], ids[0], ids[1], ids[3]]
    );
    assert_eq!(sequence_of(&stored, ids[0]), Some(0));
    assert_eq!(sequence_of(&stored, ids[1]), Some(1));
    assert_eq!(sequence_of(&stored, ids[2]), Some(0));
    assert_eq!(balance_of(&stored, ids[3]), Some(115));
    assert_balance_invariant(&stored);
}

#[tokio::test]
async fn an_earlier_entry_rebalances_everything_after_it() {
    let (ledger, _roles, _db) = ledger_with_db().await;
    let account = open_account(&ledger, "alice", "Checking", None).await;
    let ids = seed(&ledger, "alice", account.id, &[(day(5), 100), (day(6), 40)]).await;

    let session = ledger.acquire("alice").await.unwrap();
    let early = ledger
        .insert(
            session,
            NewEntry::manual(account.id, day(4), -25).with_sequence(3),
        )
        .await
        .unwrap();

    let stored = entries(&ledger, "alice", account.id).await;
    assert_eq!(stored[0].id, early);
    assert_eq!(stored[0].sequence_num, Some(3));
    assert_eq!(balance_of(&stored, ids[0]), Some(75));
    assert_eq!(balance_of(&stored, ids[1]), Some(115));
    assert_balance_invariant(&stored);
}

#[tokio::test]
async fn reversing_a_date_is_written_without_index_conflicts() {
    let (ledger, _roles, _db) = ledger_with_db().await;
    let account = open_account(&ledger, "alice", "Checking", None).await;
    let ids = seed(
        &ledger,
        "alice",
        account.id,
        &[(day(1), 10), (day(1), 20), (day(1), 30), (day(1), 40)],
    )
    .await;

    let moves = ids
        .iter()
        .enumerate()
        .map(|(i, id)| Reassignment::to(*id, day(1), 3 - i as i64))
        .collect();
    let session = ledger.acquire("alice").await.unwrap();
    let rebalanced = ledger.resequence(session, account.id, moves).await.unwrap();
    assert_eq!(rebalanced, 4);

    let stored = entries(&ledger, "alice", account.id).await;
    assert_eq!(
        stored.iter().map(|e| e.id).collect::<Vec<_>>(),
        ids.iter().rev().copied().collect::<Vec<_>>()
    );
    assert_eq!(
        stored.iter().map(|e| e.balance_minor).collect::<Vec<_>>(),
        vec![Some(40), Some(70), Some(90), Some(100)]
    );
}

#[tokio::test]
async fn colliding_reassignment_changes_nothing() {
    let (ledger, _roles, _db) = ledger_with_db().await;
    let account = open_account(&ledger, "alice", "Checking", None).await;
    let ids = seed(&ledger, "alice", account.id, &[(day(1), 10), (day(1), 20)]).await;
    let before = entries(&ledger, "alice", account.id).await;

    let session = ledger.acquire("alice").await.unwrap();
    let err = ledger
        .resequence(session, account.id, vec![Reassignment::to(ids[0], day(1), 1)])
        .await
        .unwrap_err();
    assert_eq!(
        err,
        LedgerError::SequenceCollision {
            account_id: account.id,
            tx_date: day(1),
            sequence: 1,
        }
    );
    assert_eq!(entries(&ledger, "alice", account.id).await, before);
    assert!(ledger.units().is_empty());
}

#[tokio::test]
async fn overflowing_balance_is_rejected_and_rolled_back() {
    let (ledger, _roles, _db) = ledger_with_db().await;
    let account = open_account(&ledger, "alice", "Checking", None).await;
    seed(&ledger, "alice", account.id, &[(day(1), i64::MAX)]).await;
    let before = entries(&ledger, "alice", account.id).await;

    let session = ledger.acquire("alice").await.unwrap();
    let err = ledger
        .insert(session, NewEntry::manual(account.id, day(2), 1))
        .await
        .unwrap_err();
    assert_eq!(
        err,
        LedgerError::BalanceOverflow {
            account_id: account.id,
            tx_date: day(2),
        }
    );
    assert_eq!(entries(&ledger, "alice", account.id).await, before);
    assert!(ledger.units().is_empty());
}

#[tokio::test]
async fn a_failing_batch_leaves_no_trace() {
    let (ledger, _roles, _db) = ledger_with_db().await;
    let checking = open_account(&ledger, "alice", "Checking", Some("ext-1")).await;
    let savings = open_account(&ledger, "alice", "Savings", Some("ext-2")).await;

    let ops = vec![
        LedgerOp::Insert(NewEntry::manual(checking.id, day(1), 100)),
        LedgerOp::Insert(NewEntry::manual(savings.id, day(1), 200)),
        LedgerOp::Insert(NewEntry::manual(checking.id, day(2), -40)),
        LedgerOp::Amend {
            account_id: savings.id,
            id: Uuid::now_v7(),
            patch: EntryPatch::default(),
        },
    ];
    let session = ledger.acquire("alice").await.unwrap();
    let err = ledger.apply_batch(session, ops).await.unwrap_err();
    assert!(matches!(err, LedgerError::KeyNotFound(_)));

    assert!(entries(&ledger, "alice", checking.id).await.is_empty());
    assert!(entries(&ledger, "alice", savings.id).await.is_empty());
}

#[tokio::test]
async fn batches_span_accounts() {
    let (ledger, _roles, _db) = ledger_with_db().await;
    let checking = open_account(&ledger, "alice", "Checking", Some("ext-1")).await;
    let savings = open_account(&ledger, "alice", "Savings", Some("ext-2")).await;

    let ops = vec![
        LedgerOp::Insert(NewEntry::manual(checking.id, day(1), 100)),
        LedgerOp::Insert(NewEntry::manual(savings.id, day(1), 200)),
        LedgerOp::Insert(NewEntry::manual(checking.id, day(2), -40)),
    ];
    let session = ledger.acquire("alice").await.unwrap();
    let outcome = ledger.apply_batch(session, ops).await.unwrap();
    assert_eq!(outcome.ids.len(), 3);
    assert_eq!(outcome.rebalanced, 3);

    let stored = entries(&ledger, "alice", checking.id).await;
    assert_eq!(balance_of(&stored, outcome.ids[2]), Some(60));
    assert_balance_invariant(&stored);
    assert_eq!(
        balance_of(&entries(&ledger, "alice", savings.id).await, outcome.ids[1]),
        Some(200)
    );
}

#[tokio::test]
async fn several_steps_compose_in_one_unit() {
    let (ledger, _roles, _db) = ledger_with_db().await;
    let account = open_account(&ledger, "alice", "Checking", None).await;

    let mut session = ledger.acquire("alice").await.unwrap();
    let first = ledger
        .apply_in(
            &mut session,
            vec![LedgerOp::Insert(NewEntry::manual(account.id, day(1), 100))],
        )
        .await
        .unwrap();
    let second = ledger
        .apply_in(
            &mut session,
            vec![LedgerOp::Insert(NewEntry::manual(account.id, day(1), 25))],
        )
        .await
        .unwrap();
    // Reads inside the unit see its own writes.
    assert_eq!(ledger.entries(&session, account.id).await.unwrap().len(), 2);
    session.commit().await.unwrap();

    let stored = entries(&ledger, "alice", account.id).await;
    assert_eq!(balance_of(&stored, first.ids[0]), Some(100));
    assert_eq!(balance_of(&stored, second.ids[0]), Some(125));
}

#[tokio::test]
async fn repeated_source_ids_update_the_same_entry() {
    let (ledger, _roles, _db) = ledger_with_db().await;
    let account = open_account(&ledger, "alice", "Checking", None).await;

    let session = ledger.acquire("alice").await.unwrap();
    let first = ledger
        .insert(
            session,
            NewEntry::downloaded(account.id, "tx-1", day(3), -1250),
        )
        .await
        .unwrap();
    let details = EntryDetails {
        payee: Some("Coffee Shop".to_string()),
        ..EntryDetails::default()
    };
    let session = ledger.acquire("alice").await.unwrap();
    let second = ledger
        .insert(
            session,
            NewEntry::downloaded(account.id, "tx-1", day(3), -1300).with_details(details),
        )
        .await
        .unwrap();
    assert_eq!(first, second);

    let stored = entries(&ledger, "alice", account.id).await;
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].source, EntrySource::Downloaded);
    assert_eq!(stored[0].amount_minor, -1300);
    assert_eq!(stored[0].balance_minor, Some(-1300));
    assert_eq!(stored[0].details.payee.as_deref(), Some("Coffee Shop"));
}

#[tokio::test]
async fn amending_an_amount_rebalances_the_suffix() {
    let (ledger, _roles, _db) = ledger_with_db().await;
    let account = open_account(&ledger, "alice", "Checking", None).await;
    let ids = seed(
        &ledger,
        "alice",
        account.id,
        &[(day(1), 10), (day(2), 20), (day(3), 30)],
    )
    .await;

    let session = ledger.acquire("alice").await.unwrap();
    let patch = EntryPatch {
        amount_minor: Some(-20),
        ..EntryPatch::default()
    };
    ledger.amend(session, account.id, ids[1], patch).await.unwrap();

    let stored = entries(&ledger, "alice", account.id).await;
    assert_eq!(balance_of(&stored, ids[0]), Some(10));
    assert_eq!(balance_of(&stored, ids[1]), Some(-10));
    assert_eq!(balance_of(&stored, ids[2]), Some(20));
}

#[tokio::test]
async fn removing_entries_rebalances_and_is_idempotent() {
    let (ledger, _roles, _db) = ledger_with_db().await;
    let account = open_account(&ledger, "alice", "Checking", None).await;
    let manual = seed(&ledger, "alice", account.id, &[(day(1), 10)]).await;
    let session = ledger.acquire("alice").await.unwrap();
    ledger
        .insert(session, NewEntry::downloaded(account.id, "tx-9", day(2), 5))
        .await
        .unwrap();
    let last = seed(&ledger, "alice", account.id, &[(day(3), 1)]).await;

    let session = ledger.acquire("alice").await.unwrap();
    assert!(ledger.remove(session, account.id, "tx-9").await.unwrap());
    let session = ledger.acquire("alice").await.unwrap();
    assert!(!ledger.remove(session, account.id, "tx-9").await.unwrap());
    assert_eq!(
        balance_of(&entries(&ledger, "alice", account.id).await, last[0]),
        Some(11)
    );

    let session = ledger.acquire("alice").await.unwrap();
    assert!(ledger.delete(session, account.id, manual[0]).await.unwrap());
    let stored = entries(&ledger, "alice", account.id).await;
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].balance_minor, Some(1));
}

#[tokio::test]
async fn detached_entries_are_listed_last_without_balance() {
    let (ledger, _roles, _db) = ledger_with_db().await;
    let account = open_account(&ledger, "alice", "Checking", None).await;
    let ids = seed(
        &ledger,
        "alice",
        account.id,
        &[(day(1), 10), (day(1), 20), (day(2), 30)],
    )
    .await;

    let session = ledger.acquire("alice").await.unwrap();
    ledger
        .resequence(session, account.id, vec![Reassignment::detach(ids[0], day(1))])
        .await
        .unwrap();

    let stored = entries(&ledger, "alice", account.id).await;
    assert_eq!(stored.last().unwrap().id, ids[0]);
    assert_eq!(sequence_of(&stored, ids[0]), None);
    // The freed slot stays free.
    assert_eq!(sequence_of(&stored, ids[1]), Some(1));
    assert_eq!(balance_of(&stored, ids[2]), Some(50));
    assert_balance_invariant(&stored);

    // Detached entries can take the free slot back.
    let session = ledger.acquire("alice").await.unwrap();
    ledger
        .resequence(session, account.id, vec![Reassignment::to(ids[0], day(1), 0)])
        .await
        .unwrap();
    let stored = entries(&ledger, "alice", account.id).await;
    assert_eq!(balance_of(&stored, ids[2]), Some(60));
    assert_balance_invariant(&stored);
}

#[tokio::test]
async fn malformed_reassignments_are_rejected() {
    let (ledger, _roles, _db) = ledger_with_db().await;
    let account = open_account(&ledger, "alice", "Checking", None).await;
    let ids = seed(&ledger, "alice", account.id, &[(day(1), 10)]).await;

    let session = ledger.acquire("alice").await.unwrap();
    let err = ledger
        .resequence(session, account.id, vec![Reassignment::to(ids[0], day(1), -1)])
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::InvalidReassignment(_)));

    let session = ledger.acquire("alice").await.unwrap();
    let unknown = Uuid::now_v7();
    let err = ledger
        .resequence(session, account.id, vec![Reassignment::to(unknown, day(1), 4)])
        .await
        .unwrap_err();
    assert_eq!(err, LedgerError::KeyNotFound(unknown.to_string()));
    assert_eq!(sequence_of(&entries(&ledger, "alice", account.id).await, ids[0]), Some(0));
}

#[tokio::test]
async fn recalculating_empty_and_filled_accounts() {
    let (ledger, _roles, _db) = ledger_with_db().await;
    let account = open_account(&ledger, "alice", "Checking", None).await;

    let session = ledger.acquire("alice").await.unwrap();
    assert_eq!(ledger.recalculate(session, account.id).await.unwrap(), 0);

    seed(&ledger, "alice", account.id, &[(day(1), 10), (day(2), 20)]).await;
    let session = ledger.acquire("alice").await.unwrap();
    ledger.recalculate(session, account.id).await.unwrap();
    assert_balance_invariant(&entries(&ledger, "alice", account.id).await);
}

#[tokio::test]
async fn accounts_are_upserted_by_reference() {
    let (ledger, _roles, _db) = ledger_with_db().await;
    let first = open_account(&ledger, "alice", "Checking", Some("ext-1")).await;
    let renamed = open_account(&ledger, "alice", "Everyday Checking", Some("ext-1")).await;
    assert_eq!(first.id, renamed.id);
    assert_eq!(renamed.name, "Everyday Checking");

    let session = ledger.acquire("alice").await.unwrap();
    let accounts = ledger.accounts(&session).await.unwrap();
    assert_eq!(accounts.len(), 1);
    assert_eq!(
        ledger.account(&session, first.id).await.unwrap().user_id,
        "alice"
    );
    session.commit().await.unwrap();
}

#[tokio::test]
async fn linking_an_item_keeps_accounts_and_cursor_together() {
    let (ledger, _roles, _db) = ledger_with_db().await;

    let item = LinkedItem {
        item_id: "item-1".to_string(),
        access_token: AccessCredential::new("access-sandbox-1"),
        accounts: vec![
            LinkedAccount {
                reference_id: "ext-checking".to_string(),
                name: "Checking".to_string(),
            },
            LinkedAccount {
                reference_id: "ext-savings".to_string(),
                name: "Savings".to_string(),
            },
        ],
    };
    let session = ledger.acquire("alice").await.unwrap();
    let linked = ledger.link_item(session, item).await.unwrap();
    assert_eq!(linked.len(), 2);
    assert!(linked.iter().all(|a| a.item_key().as_deref() == Some("item-1")));

    let ids: Vec<i64> = linked.iter().map(|a| a.id).collect();
    let session = ledger.acquire("alice").await.unwrap();
    ledger.save_cursor(&session, &ids, "cursor-7").await.unwrap();
    session.commit().await.unwrap();

    // Relinking without a new token keeps the stored one.
    let session = ledger.acquire("alice").await.unwrap();
    let relinked = ledger
        .upsert_account(
            &session,
            NewAccount {
                reference_id: Some("ext-checking".to_string()),
                name: "Checking".to_string(),
                ..NewAccount::default()
            },
        )
        .await
        .unwrap();
    session.commit().await.unwrap();
    assert_eq!(
        relinked.access_token,
        Some(AccessCredential::new("access-sandbox-1"))
    );
    assert_eq!(relinked.cursor.as_deref(), Some("cursor-7"));

    let session = ledger.acquire("alice").await.unwrap();
    let err = ledger
        .save_cursor(&session, &[ids[0], 999], "cursor-8")
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::KeyNotFound(_)));
    session.rollback().await.unwrap();
}
