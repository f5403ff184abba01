use sea_orm::{
    ActiveModelTrait, ActiveValue, ColumnTrait, EntityTrait, IntoActiveModel, QueryFilter,
    QueryOrder, sea_query::Expr,
};
use tracing::info;

use crate::accounts::{self, Column};
use crate::session::{Session, TenantRoles};
use crate::{Account, LedgerError, LinkedItem, NewAccount, ResultLedger};

use super::{Ledger, require_account, with_session};

impl<R: TenantRoles> Ledger<R> {
    /// The tenant's accounts, by id.
    pub async fn accounts(&self, session: &Session) -> ResultLedger<Vec<Account>> {
        session.ensure_active()?;
        let models = accounts::Entity::find()
            .filter(Column::UserId.eq(session.tenant().as_str()))
            .order_by_asc(Column::Id)
            .all(session.connection())
            .await?;
        Ok(models.into_iter().map(Account::from).collect())
    }

    pub async fn account(&self, session: &Session, account_id: i64) -> ResultLedger<Account> {
        session.ensure_active()?;
        Ok(require_account(session, account_id).await?.into())
    }

    /// Create the account, or update the one with the same `reference_id`.
    pub async fn upsert_account(
        &self,
        session: &Session,
        account: NewAccount,
    ) -> ResultLedger<Account> {
        session.ensure_active()?;
        let conn = session.connection();
        let tenant = session.tenant().as_str();

        let existing = match &account.reference_id {
            Some(reference_id) => {
                accounts::Entity::find()
                    .filter(Column::UserId.eq(tenant))
                    .filter(Column::ReferenceId.eq(reference_id.as_str()))
                    .one(conn)
                    .await?
            }
            None => None,
        };

        let model = match existing {
            Some(model) => {
                let mut active = model.into_active_model();
                active.name = ActiveValue::Set(account.name);
                if let Some(item_id) = account.item_id {
                    active.item_id = ActiveValue::Set(Some(item_id));
                }
                if let Some(token) = account.access_token {
                    active.access_token = ActiveValue::Set(Some(token.expose().to_string()));
                }
                active.update(conn).await?
            }
            None => {
                accounts::ActiveModel::from_new(&account, tenant)
                    .insert(conn)
                    .await?
            }
        };
        Ok(model.into())
    }

    /// Store one aggregator login and the accounts behind it.
    pub async fn link_item(
        &self,
        session: Session,
        item: LinkedItem,
    ) -> ResultLedger<Vec<Account>> {
        let tenant = session.tenant().clone();
        let linked = with_session!(session, self.link_item_in(&session, item).await)?;
        info!(tenant = %tenant, accounts = linked.len(), "item linked");
        Ok(linked)
    }

    async fn link_item_in(
        &self,
        session: &Session,
        item: LinkedItem,
    ) -> ResultLedger<Vec<Account>> {
        let mut linked = Vec::with_capacity(item.accounts.len());
        for account in item.accounts {
            let stored = self
                .upsert_account(
                    session,
                    NewAccount {
                        reference_id: Some(account.reference_id),
                        name: account.name,
                        item_id: Some(item.item_id.clone()),
                        access_token: Some(item.access_token.clone()),
                    },
                )
                .await?;
            linked.push(stored);
        }
        Ok(linked)
    }

    /// Record the sync cursor on every listed account.
    pub async fn save_cursor(
        &self,
        session: &Session,
        account_ids: &[i64],
        cursor: &str,
    ) -> ResultLedger<()> {
        session.ensure_active()?;
        if account_ids.is_empty() {
            return Ok(());
        }
        let updated = accounts::Entity::update_many()
            .col_expr(Column::Cursor, Expr::value(cursor))
            .filter(Column::UserId.eq(session.tenant().as_str()))
            .filter(Column::Id.is_in(account_ids.iter().copied()))
            .exec(session.connection())
            .await?;
        if updated.rows_affected != account_ids.len() as u64 {
            return Err(LedgerError::KeyNotFound(format!(
                "accounts {account_ids:?}"
            )));
        }
        Ok(())
    }
}
