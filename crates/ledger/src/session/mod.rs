//! Tenant-scoped units of work.
//!
//! [`SessionProvisioner::acquire`] takes a connection from the pool, opens a
//! unit of work and switches it to the tenant's role, creating the role first
//! when the switch reports it missing. The returned [`Session`] owns the unit
//! until it is committed or rolled back.

use std::collections::BTreeSet;
use std::fmt;

use sea_orm::{DatabaseConnection, DatabaseTransaction, TransactionTrait};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::ops::AccountGuard;
use crate::{LedgerError, ResultLedger, TenantId};

mod registry;
mod roles;

pub(crate) use registry::Quarantine;
pub use registry::{OpenUnitInfo, UnitRegistry};
use registry::UnitMarker;
pub use roles::{GROUP_ROLE, RoleConfig, StoreRoles, SwitchError, TenantRoles};

pub struct SessionProvisioner<R = StoreRoles> {
    database: DatabaseConnection,
    roles: R,
    units: UnitRegistry,
    quarantine: Quarantine,
}

impl<R: TenantRoles> SessionProvisioner<R> {
    pub fn new(database: DatabaseConnection, roles: R) -> Self {
        Self {
            database,
            roles,
            units: UnitRegistry::default(),
            quarantine: Quarantine::default(),
        }
    }

    pub fn roles(&self) -> &R {
        &self.roles
    }

    pub fn units(&self) -> &UnitRegistry {
        &self.units
    }

    pub async fn acquire(&self, user: &str) -> ResultLedger<Session> {
        self.acquire_with(user, CancellationToken::new()).await
    }

    /// Like [`acquire`](Self::acquire); the session refuses to commit once
    /// `cancel` fires.
    pub async fn acquire_with(
        &self,
        user: &str,
        cancel: CancellationToken,
    ) -> ResultLedger<Session> {
        let tenant = TenantId::parse(user)?;
        if self.quarantine.contains(&tenant) {
            return Err(LedgerError::Quarantined(tenant.to_string()));
        }

        let tx = self.begin(&cancel).await?;
        let switched = self.roles.switch(&tx, &tenant).await;
        match switched {
            Ok(()) => return Ok(self.session(tenant, tx, cancel)),
            Err(SwitchError::MissingRole) => {}
            Err(SwitchError::Database(err)) => {
                self.discard(tx, &tenant).await?;
                return Err(err.into());
            }
        }

        // The failed unit is closed before the administrative one opens, so a
        // request never holds two pooled connections.
        self.discard(tx, &tenant).await?;
        info!(tenant = %tenant, "provisioning tenant role");
        if let Err(err) = self.provision(&tenant).await {
            // Another request may have created the role meanwhile.
            warn!(tenant = %tenant, error = %err, "role provisioning failed");
        }

        let tx = self.begin(&cancel).await?;
        let switched = self.roles.switch(&tx, &tenant).await;
        match switched {
            Ok(()) => Ok(self.session(tenant, tx, cancel)),
            Err(err) => {
                error!(tenant = %tenant, error = %err, "role switch failed after provisioning");
                self.discard(tx, &tenant).await?;
                Err(LedgerError::RoleProvisioning(tenant.to_string()))
            }
        }
    }

    /// Let a quarantined tenant be served again.
    pub fn release(&self, tenant: &TenantId) -> bool {
        let released = self.quarantine.release(tenant);
        if released {
            info!(tenant = %tenant, "tenant released from quarantine");
        }
        released
    }

    pub fn is_quarantined(&self, tenant: &TenantId) -> bool {
        self.quarantine.contains(tenant)
    }

    async fn begin(&self, cancel: &CancellationToken) -> ResultLedger<DatabaseTransaction> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(LedgerError::Cancelled),
            tx = self.database.begin() => Ok(tx?),
        }
    }

    async fn provision(&self, tenant: &TenantId) -> ResultLedger<()> {
        let tx = self.database.begin().await?;
        let created = self.roles.create(&tx, tenant).await;
        match created {
            Ok(()) => tx.commit().await.map_err(LedgerError::Commit),
            Err(err) => {
                self.discard(tx, tenant).await?;
                Err(err)
            }
        }
    }

    async fn discard(&self, tx: DatabaseTransaction, tenant: &TenantId) -> ResultLedger<()> {
        tx.rollback().await.map_err(|err| {
            error!(tenant = %tenant, error = %err, "rollback failed, tenant quarantined");
            self.quarantine.insert(tenant.clone());
            LedgerError::Rollback(err)
        })
    }

    fn session(
        &self,
        tenant: TenantId,
        tx: DatabaseTransaction,
        cancel: CancellationToken,
    ) -> Session {
        let marker = self.units.open(&tenant);
        Session {
            tenant,
            tx,
            cancel,
            locks: Vec::new(),
            locked: BTreeSet::new(),
            quarantine: self.quarantine.clone(),
            marker,
        }
    }
}

/// An open unit of work running as one tenant.
///
/// Dropping a session without [`commit`](Session::commit) or
/// [`rollback`](Session::rollback) rolls the unit back when its connection
/// returns to the pool.
pub struct Session {
    tenant: TenantId,
    tx: DatabaseTransaction,
    cancel: CancellationToken,
    locks: Vec<AccountGuard>,
    locked: BTreeSet<i64>,
    quarantine: Quarantine,
    marker: UnitMarker,
}

impl Session {
    pub fn tenant(&self) -> &TenantId {
        &self.tenant
    }

    pub fn connection(&self) -> &DatabaseTransaction {
        &self.tx
    }

    pub fn unit_id(&self) -> Uuid {
        self.marker.id()
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn ensure_active(&self) -> ResultLedger<()> {
        if self.cancel.is_cancelled() {
            return Err(LedgerError::Cancelled);
        }
        Ok(())
    }

    pub(crate) fn holds_lock(&self, account_id: i64) -> bool {
        self.locked.contains(&account_id)
    }

    pub(crate) fn keep_lock(&mut self, account_id: i64, guard: AccountGuard) {
        if self.locked.insert(account_id) {
            self.locks.push(guard);
        }
    }

    /// Commit the unit. A cancelled session is rolled back instead and
    /// reports [`LedgerError::Cancelled`].
    pub async fn commit(self) -> ResultLedger<()> {
        if self.cancel.is_cancelled() {
            self.rollback().await?;
            return Err(LedgerError::Cancelled);
        }
        let unit = self.marker.id();
        self.tx.commit().await.map_err(|err| {
            warn!(unit = %unit, tenant = %self.tenant, error = %err, "commit failed");
            LedgerError::Commit(err)
        })
    }

    /// Roll the unit back. Failing to do so quarantines the tenant.
    pub async fn rollback(self) -> ResultLedger<()> {
        let Self {
            tenant,
            tx,
            quarantine,
            marker,
            ..
        } = self;
        tx.rollback().await.map_err(|err| {
            error!(
                unit = %marker.id(),
                tenant = %tenant,
                error = %err,
                "rollback failed, tenant quarantined"
            );
            quarantine.insert(tenant);
            LedgerError::Rollback(err)
        })
    }

    /// Commit on `Ok`, roll back on `Err`. A rollback failure replaces the
    /// original error.
    pub async fn finish<T>(self, result: ResultLedger<T>) -> ResultLedger<T> {
        match result {
            Ok(value) => {
                self.commit().await?;
                Ok(value)
            }
            Err(err) => {
                self.rollback().await?;
                Err(err)
            }
        }
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("tenant", &self.tenant)
            .field("unit", &self.marker.id())
            .field("locked", &self.locked)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}
