use std::collections::{BTreeMap, BTreeSet};

use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, Value, sea_query::Expr,
    sea_query::OnConflict,
};
use tracing::debug;
use uuid::Uuid;

use crate::entries::{self, Column};
use crate::reconcile::{AccountBook, BookDiff};
use crate::session::{Session, TenantRoles};
use crate::{EntryPatch, LedgerError, NewEntry, Reassignment, ResultLedger};

use super::{Ledger, load_entries, require_account, with_session};

/// One step of a batch. Every step names the account it changes.
#[derive(Clone, Debug, PartialEq)]
pub enum LedgerOp {
    Insert(NewEntry),
    Amend {
        account_id: i64,
        id: Uuid,
        patch: EntryPatch,
    },
    /// Remove by external source id; a missing pair is skipped.
    Remove {
        account_id: i64,
        source_id: String,
    },
    Delete {
        account_id: i64,
        id: Uuid,
    },
    Resequence {
        account_id: i64,
        moves: Vec<Reassignment>,
    },
    Recalculate {
        account_id: i64,
    },
}

impl LedgerOp {
    pub fn account_id(&self) -> i64 {
        match self {
            Self::Insert(entry) => entry.account_id,
            Self::Amend { account_id, .. }
            | Self::Remove { account_id, .. }
            | Self::Delete { account_id, .. }
            | Self::Resequence { account_id, .. }
            | Self::Recalculate { account_id } => *account_id,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    /// Ids of inserted or upserted entries, in op order.
    pub ids: Vec<Uuid>,
    pub removed: usize,
    /// Entries whose running balance was written.
    pub rebalanced: usize,
}

impl<R: TenantRoles> Ledger<R> {
    /// Apply `ops` as one unit of work.
    pub async fn apply_batch(
        &self,
        mut session: Session,
        ops: Vec<LedgerOp>,
    ) -> ResultLedger<BatchOutcome> {
        with_session!(session, self.apply_in(&mut session, ops).await)
    }

    /// Apply `ops` inside an already open unit without committing it.
    pub async fn apply_in(
        &self,
        session: &mut Session,
        ops: Vec<LedgerOp>,
    ) -> ResultLedger<BatchOutcome> {
        session.ensure_active()?;
        let account_ids: BTreeSet<i64> = ops.iter().map(LedgerOp::account_id).collect();
        let mut books = self.open_books(session, &account_ids).await?;

        let mut outcome = BatchOutcome::default();
        for op in ops {
            let account_id = op.account_id();
            let book = books
                .get_mut(&account_id)
                .ok_or_else(|| LedgerError::KeyNotFound(format!("account {account_id}")))?;
            match op {
                LedgerOp::Insert(entry) => outcome.ids.push(book.place(entry)?),
                LedgerOp::Amend { id, patch, .. } => book.amend(id, patch)?,
                LedgerOp::Remove { source_id, .. } => {
                    if book.remove_by_source(&source_id) {
                        outcome.removed += 1;
                    }
                }
                LedgerOp::Delete { id, .. } => {
                    if book.remove(id) {
                        outcome.removed += 1;
                    }
                }
                LedgerOp::Resequence { moves, .. } => book.reassign(&moves)?,
                LedgerOp::Recalculate { .. } => book.recalculate_all(),
            }
        }

        // Settle every account before the first write.
        let diffs = books
            .values_mut()
            .map(AccountBook::settle)
            .collect::<ResultLedger<Vec<_>>>()?;
        for diff in &diffs {
            outcome.rebalanced += diff.rebalanced;
            write_diff(session, diff).await?;
        }
        session.ensure_active()?;
        Ok(outcome)
    }

    /// Run `change` against one account's book inside `session` and write the
    /// result back. Returns the value of `change` and the rebalanced count.
    pub(super) async fn change_in<T>(
        &self,
        session: &mut Session,
        account_id: i64,
        change: impl FnOnce(&mut AccountBook) -> ResultLedger<T>,
    ) -> ResultLedger<(T, usize)> {
        session.ensure_active()?;
        let mut books = self
            .open_books(session, &BTreeSet::from([account_id]))
            .await?;
        let book = books
            .get_mut(&account_id)
            .ok_or_else(|| LedgerError::KeyNotFound(format!("account {account_id}")))?;
        let value = change(book)?;
        let diff = book.settle()?;
        write_diff(session, &diff).await?;
        session.ensure_active()?;
        Ok((value, diff.rebalanced))
    }

    /// Lock `account_ids` in ascending order, then load their books.
    async fn open_books(
        &self,
        session: &mut Session,
        account_ids: &BTreeSet<i64>,
    ) -> ResultLedger<BTreeMap<i64, AccountBook>> {
        for account_id in account_ids {
            if session.holds_lock(*account_id) {
                continue;
            }
            let guard = tokio::select! {
                biased;
                _ = session.cancel_token().cancelled() => return Err(LedgerError::Cancelled),
                guard = self.locks.lock(*account_id) => guard,
            };
            session.keep_lock(*account_id, guard);
        }

        let mut books = BTreeMap::new();
        for account_id in account_ids {
            require_account(session, *account_id).await?;
            let entries = load_entries(session, *account_id).await?;
            books.insert(*account_id, AccountBook::new(*account_id, entries));
        }
        Ok(books)
    }
}

/// Write a settled diff. Deleted rows go first and moved rows give up their
/// slot before any final position is written, so swaps never hit the unique
/// `(account_id, tx_date, sequence_num)` index.
async fn write_diff(session: &Session, diff: &BookDiff) -> ResultLedger<()> {
    if diff.is_empty() {
        return Ok(());
    }
    let conn = session.connection();
    let now = Utc::now();

    if !diff.deleted.is_empty() {
        entries::Entity::delete_many()
            .filter(Column::Id.is_in(diff.deleted.iter().map(Uuid::to_string)))
            .exec(conn)
            .await?;
    }
    if !diff.moved.is_empty() {
        entries::Entity::update_many()
            .col_expr(Column::SequenceNum, Expr::value(Value::BigInt(None)))
            .filter(Column::Id.is_in(diff.moved.iter().map(Uuid::to_string)))
            .exec(conn)
            .await?;
    }
    for entry in &diff.updated {
        entries::ActiveModel::for_update(entry, now)?
            .update(conn)
            .await?;
    }
    if !diff.inserted.is_empty() {
        let models = diff
            .inserted
            .iter()
            .map(|entry| entries::ActiveModel::for_insert(entry, session.tenant().as_str(), now))
            .collect::<ResultLedger<Vec<_>>>()?;
        entries::Entity::insert_many(models)
            .on_conflict(
                OnConflict::columns([Column::AccountId, Column::SourceId])
                    .update_columns([
                        Column::TxDate,
                        Column::SequenceNum,
                        Column::Payee,
                        Column::Memo,
                        Column::Category,
                        Column::Location,
                        Column::Icon,
                        Column::Tags,
                        Column::AmountMinor,
                        Column::BalanceMinor,
                        Column::UpdatedAt,
                    ])
                    .to_owned(),
            )
            .exec_without_returning(conn)
            .await?;
    }

    debug!(
        unit = %session.unit_id(),
        account_id = diff.account_id,
        inserted = diff.inserted.len(),
        updated = diff.updated.len(),
        deleted = diff.deleted.len(),
        "account written"
    );
    Ok(())
}
