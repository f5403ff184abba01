use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QuerySelect};
use tokio_util::sync::CancellationToken;

use crate::session::{Session, SessionProvisioner, StoreRoles, TenantRoles, UnitRegistry};
use crate::util::is_postgres;
use crate::{LedgerEntry, LedgerError, ResultLedger, TenantId};

mod accounts;
mod batch;
mod entries;
mod locks;

pub use batch::{BatchOutcome, LedgerOp};
pub(crate) use locks::AccountGuard;
use locks::AccountLocks;

/// Run `$body` against an owned session, committing on success and rolling
/// back on error.
macro_rules! with_session {
    ($session:ident, $body:expr) => {{
        let result = $body;
        $session.finish(result).await
    }};
}

pub(crate) use with_session;

/// The mutation gateway: every ledger read and write goes through a tenant
/// [`Session`].
pub struct Ledger<R = StoreRoles> {
    sessions: SessionProvisioner<R>,
    locks: AccountLocks,
}

impl Ledger {
    /// Return a builder for `Ledger`. Help to build the struct.
    pub fn builder() -> LedgerBuilder {
        LedgerBuilder::default()
    }
}

impl<R: TenantRoles> Ledger<R> {
    pub fn sessions(&self) -> &SessionProvisioner<R> {
        &self.sessions
    }

    pub fn units(&self) -> &UnitRegistry {
        self.sessions.units()
    }

    pub async fn acquire(&self, user: &str) -> ResultLedger<Session> {
        self.sessions.acquire(user).await
    }

    pub async fn acquire_with(
        &self,
        user: &str,
        cancel: CancellationToken,
    ) -> ResultLedger<Session> {
        self.sessions.acquire_with(user, cancel).await
    }

    pub fn release(&self, tenant: &TenantId) -> bool {
        self.sessions.release(tenant)
    }
}

/// Fail with `KeyNotFound` unless the tenant owns `account_id`. On Postgres
/// the account row stays locked until the unit ends.
async fn require_account(
    session: &Session,
    account_id: i64,
) -> ResultLedger<crate::accounts::Model> {
    let conn = session.connection();
    let mut query = crate::accounts::Entity::find_by_id(account_id)
        .filter(crate::accounts::Column::UserId.eq(session.tenant().as_str()));
    if is_postgres(conn) {
        query = query.lock_exclusive();
    }
    query
        .one(conn)
        .await?
        .ok_or_else(|| LedgerError::KeyNotFound(format!("account {account_id}")))
}

async fn load_entries(session: &Session, account_id: i64) -> ResultLedger<Vec<LedgerEntry>> {
    crate::entries::Entity::find()
        .filter(crate::entries::Column::AccountId.eq(account_id))
        .filter(crate::entries::Column::UserId.eq(session.tenant().as_str()))
        .all(session.connection())
        .await?
        .into_iter()
        .map(LedgerEntry::try_from)
        .collect()
}

/// The builder for `Ledger`
pub struct LedgerBuilder<R = StoreRoles> {
    database: DatabaseConnection,
    roles: R,
}

impl Default for LedgerBuilder {
    fn default() -> Self {
        Self {
            database: DatabaseConnection::default(),
            roles: StoreRoles::default(),
        }
    }
}

impl<R: TenantRoles> LedgerBuilder<R> {
    /// Pass the required database
    pub fn database(mut self, db: DatabaseConnection) -> Self {
        self.database = db;
        self
    }

    /// Replace the role adapter
    pub fn roles<T: TenantRoles>(self, roles: T) -> LedgerBuilder<T> {
        LedgerBuilder {
            database: self.database,
            roles,
        }
    }

    /// Construct `Ledger`
    pub async fn build(self) -> ResultLedger<Ledger<R>> {
        Ok(Ledger {
            sessions: SessionProvisioner::new(self.database, self.roles),
            locks: AccountLocks::default(),
        })
    }
}
