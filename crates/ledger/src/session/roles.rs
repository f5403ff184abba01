use std::future::Future;

use sea_orm::{
    ConnectionTrait, DatabaseTransaction, DbBackend, DbErr, RuntimeErr, Statement,
};
use thiserror::Error;
use tracing::info;

use crate::util::is_postgres;
use crate::{ResultLedger, TenantId};

/// Postgres `undefined_object`, raised by `SET ROLE` for an unknown role.
const UNDEFINED_OBJECT: &str = "42704";

/// Group role every tenant role joins. The row-security migration grants
/// table access and attaches its policies to this role.
pub const GROUP_ROLE: &str = "ledger_user";

#[derive(Error, Debug)]
pub enum SwitchError {
    #[error("tenant role does not exist")]
    MissingRole,
    #[error(transparent)]
    Database(#[from] DbErr),
}

/// Store adapter for tenant roles.
///
/// `switch` runs inside the tenant's unit of work and must scope every later
/// statement of that unit to the tenant. `create` runs inside a separate
/// administrative unit that is committed on success.
pub trait TenantRoles: Send + Sync {
    fn switch(
        &self,
        tx: &DatabaseTransaction,
        tenant: &TenantId,
    ) -> impl Future<Output = Result<(), SwitchError>> + Send;

    fn create(
        &self,
        tx: &DatabaseTransaction,
        tenant: &TenantId,
    ) -> impl Future<Output = ResultLedger<()>> + Send;
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RoleConfig {
    /// Base role used to create tenant roles. The login role when `None`.
    pub admin: Option<String>,
}

/// Database roles, one per tenant. Only Postgres has them; on any other
/// backend both operations succeed without doing anything.
#[derive(Clone, Debug, Default)]
pub struct StoreRoles {
    config: RoleConfig,
}

impl StoreRoles {
    pub fn new(config: RoleConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RoleConfig {
        &self.config
    }
}

impl TenantRoles for StoreRoles {
    async fn switch(&self, tx: &DatabaseTransaction, tenant: &TenantId) -> Result<(), SwitchError> {
        if !is_postgres(tx) {
            return Ok(());
        }
        // LOCAL: the role is reset when the unit ends, before the connection
        // returns to the pool.
        let sql = format!("SET LOCAL ROLE {}", quote_ident(tenant.as_str()));
        match tx.execute_unprepared(&sql).await {
            Ok(_) => Ok(()),
            Err(err) if is_missing_role(&err) => Err(SwitchError::MissingRole),
            Err(err) => Err(SwitchError::Database(err)),
        }
    }

    async fn create(&self, tx: &DatabaseTransaction, tenant: &TenantId) -> ResultLedger<()> {
        if !is_postgres(tx) {
            return Ok(());
        }
        if let Some(admin) = &self.config.admin {
            tx.execute_unprepared(&format!("SET LOCAL ROLE {}", quote_ident(admin)))
                .await?;
        }

        let role = quote_ident(tenant.as_str());
        let existing = tx
            .query_one(Statement::from_sql_and_values(
                DbBackend::Postgres,
                "SELECT 1 FROM pg_roles WHERE rolname = $1",
                [tenant.as_str().into()],
            ))
            .await?;
        if existing.is_none() {
            tx.execute_unprepared(&format!(
                "CREATE ROLE {role} WITH NOLOGIN IN ROLE {}",
                quote_ident(GROUP_ROLE)
            ))
            .await?;
            info!(tenant = %tenant, group = GROUP_ROLE, "tenant role created");
        }
        tx.execute_unprepared(&format!("GRANT {role} TO CURRENT_USER"))
            .await?;
        Ok(())
    }
}

/// Double-quote a Postgres identifier.
pub(crate) fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

fn is_missing_role(err: &DbErr) -> bool {
    match err {
        DbErr::Exec(RuntimeErr::SqlxError(inner)) | DbErr::Query(RuntimeErr::SqlxError(inner)) => {
            inner
                .as_database_error()
                .and_then(|db| db.code())
                .is_some_and(|code| code == UNDEFINED_OBJECT)
        }
        _ => false,
    }
}
