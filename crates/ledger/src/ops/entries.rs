use sea_orm::{ColumnTrait, EntityTrait, QueryFilter};
use uuid::Uuid;

use crate::entries::{self, Column};
use crate::reconcile::ledger_order;
use crate::session::{Session, TenantRoles};
use crate::{EntryPatch, LedgerEntry, LedgerError, NewEntry, Reassignment, ResultLedger};

use super::{Ledger, load_entries, require_account, with_session};

impl<R: TenantRoles> Ledger<R> {
    /// Place a new entry, or update the one with the same source id.
    pub async fn insert(&self, mut session: Session, entry: NewEntry) -> ResultLedger<Uuid> {
        let account_id = entry.account_id;
        let (id, _) = with_session!(
            session,
            self.change_in(&mut session, account_id, |book| book.place(entry))
                .await
        )?;
        Ok(id)
    }

    /// Remove the entry with `source_id`. Returns false when none exists.
    pub async fn remove(
        &self,
        mut session: Session,
        account_id: i64,
        source_id: &str,
    ) -> ResultLedger<bool> {
        let (removed, _) = with_session!(
            session,
            self.change_in(&mut session, account_id, |book| {
                Ok(book.remove_by_source(source_id))
            })
            .await
        )?;
        Ok(removed)
    }

    pub async fn delete(
        &self,
        mut session: Session,
        account_id: i64,
        id: Uuid,
    ) -> ResultLedger<bool> {
        let (removed, _) = with_session!(
            session,
            self.change_in(&mut session, account_id, |book| Ok(book.remove(id)))
                .await
        )?;
        Ok(removed)
    }

    pub async fn amend(
        &self,
        mut session: Session,
        account_id: i64,
        id: Uuid,
        patch: EntryPatch,
    ) -> ResultLedger<()> {
        with_session!(
            session,
            self.change_in(&mut session, account_id, |book| book.amend(id, patch))
                .await
        )?;
        Ok(())
    }

    /// Move entries within the account and rebalance from the earliest
    /// position touched. Returns the number of rebalanced entries.
    pub async fn resequence(
        &self,
        mut session: Session,
        account_id: i64,
        moves: Vec<Reassignment>,
    ) -> ResultLedger<usize> {
        let ((), rebalanced) = with_session!(
            session,
            self.change_in(&mut session, account_id, |book| book.reassign(&moves))
                .await
        )?;
        Ok(rebalanced)
    }

    /// Recompute every balance of the account.
    pub async fn recalculate(
        &self,
        mut session: Session,
        account_id: i64,
    ) -> ResultLedger<usize> {
        let ((), rebalanced) = with_session!(
            session,
            self.change_in(&mut session, account_id, |book| {
                book.recalculate_all();
                Ok(())
            })
            .await
        )?;
        Ok(rebalanced)
    }

    /// Every entry of the account in ledger order, detached entries last.
    pub async fn entries(
        &self,
        session: &Session,
        account_id: i64,
    ) -> ResultLedger<Vec<LedgerEntry>> {
        session.ensure_active()?;
        require_account(session, account_id).await?;
        let mut entries = load_entries(session, account_id).await?;
        ledger_order(&mut entries);
        Ok(entries)
    }

    pub async fn entry(
        &self,
        session: &Session,
        account_id: i64,
        id: Uuid,
    ) -> ResultLedger<LedgerEntry> {
        session.ensure_active()?;
        entries::Entity::find_by_id(id.to_string())
            .filter(Column::AccountId.eq(account_id))
            .filter(Column::UserId.eq(session.tenant().as_str()))
            .one(session.connection())
            .await?
            .ok_or_else(|| LedgerError::KeyNotFound(id.to_string()))?
            .try_into()
    }

    pub async fn find_by_source(
        &self,
        session: &Session,
        account_id: i64,
        source_id: &str,
    ) -> ResultLedger<Option<LedgerEntry>> {
        session.ensure_active()?;
        entries::Entity::find()
            .filter(Column::AccountId.eq(account_id))
            .filter(Column::SourceId.eq(source_id))
            .filter(Column::UserId.eq(session.tenant().as_str()))
            .one(session.connection())
            .await?
            .map(LedgerEntry::try_from)
            .transpose()
    }
}
