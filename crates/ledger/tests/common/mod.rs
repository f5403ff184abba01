#![allow(dead_code)]

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};

use chrono::NaiveDate;
use sea_orm::{
    ConnectOptions, ConnectionTrait, Database, DatabaseConnection, DatabaseTransaction, DbErr,
};
use uuid::Uuid;

use ledger::{
    AccessCredential, Account, ItemAccess, Ledger, LedgerEntry, LedgerError, NewAccount, NewEntry,
    ResultLedger, SwitchError, SyncPage, TenantId, TenantRoles, TransactionSource,
};
use migration::MigratorTrait;

#[derive(Default)]
struct RoleState {
    roles: HashSet<String>,
    created: Vec<String>,
    switches: usize,
    fail_create: bool,
    create_without_effect: bool,
    end_next_unit: bool,
}

/// Tenant roles kept in memory, with the failure modes of a real store.
#[derive(Clone, Default)]
pub struct MemoryRoles {
    state: Arc<Mutex<RoleState>>,
}

impl MemoryRoles {
    /// Role creation fails outright.
    pub fn failing() -> Self {
        let roles = Self::default();
        roles.state.lock().unwrap().fail_create = true;
        roles
    }

    /// Role creation reports success but the role never appears.
    pub fn ineffective() -> Self {
        let roles = Self::default();
        roles.state.lock().unwrap().create_without_effect = true;
        roles
    }

    /// The next successful switch ends its unit behind the store's back, so
    /// rolling that unit back fails.
    pub fn ending_next_unit() -> Self {
        let roles = Self::default();
        roles.state.lock().unwrap().end_next_unit = true;
        roles
    }

    pub fn created(&self) -> Vec<String> {
        self.state.lock().unwrap().created.clone()
    }

    pub fn switches(&self) -> usize {
        self.state.lock().unwrap().switches
    }
}

impl TenantRoles for MemoryRoles {
    async fn switch(
        &self,
        tx: &DatabaseTransaction,
        tenant: &TenantId,
    ) -> Result<(), SwitchError> {
        let end_unit = {
            let mut state = self.state.lock().unwrap();
            state.switches += 1;
            if !state.roles.contains(tenant.as_str()) {
                return Err(SwitchError::MissingRole);
            }
            std::mem::take(&mut state.end_next_unit)
        };
        if end_unit {
            tx.execute_unprepared("COMMIT").await?;
        }
        Ok(())
    }

    async fn create(&self, _tx: &DatabaseTransaction, tenant: &TenantId) -> ResultLedger<()> {
        let mut state = self.state.lock().unwrap();
        if state.fail_create {
            return Err(LedgerError::from(DbErr::Custom(
                "permission denied to create role".to_string(),
            )));
        }
        state.created.push(tenant.to_string());
        if !state.create_without_effect {
            state.roles.insert(tenant.to_string());
        }
        Ok(())
    }
}

/// Aggregator replaying scripted pages per credential.
#[derive(Clone, Default)]
pub struct ScriptedSource {
    pages: Arc<Mutex<HashMap<String, VecDeque<ResultLedger<SyncPage>>>>>,
    calls: Arc<Mutex<Vec<(String, Option<String>)>>>,
}

impl ScriptedSource {
    pub fn script(self, credential: &str, pages: Vec<ResultLedger<SyncPage>>) -> Self {
        self.pages
            .lock()
            .unwrap()
            .entry(credential.to_string())
            .or_default()
            .extend(pages);
        self
    }

    /// `(credential, cursor)` of every page request.
    pub fn calls(&self) -> Vec<(String, Option<String>)> {
        self.calls.lock().unwrap().clone()
    }
}

impl TransactionSource for ScriptedSource {
    async fn fetch_page(
        &self,
        credential: &AccessCredential,
        cursor: Option<&str>,
    ) -> ResultLedger<SyncPage> {
        self.calls
            .lock()
            .unwrap()
            .push((credential.expose().to_string(), cursor.map(str::to_string)));
        self.pages
            .lock()
            .unwrap()
            .get_mut(credential.expose())
            .and_then(VecDeque::pop_front)
            .unwrap_or_else(|| Ok(SyncPage::default()))
    }

    /// `public-<x>` becomes item `item-<x>` with credential `access-<x>`.
    async fn exchange_token(&self, public_token: &str) -> ResultLedger<ItemAccess> {
        let Some(name) = public_token.strip_prefix("public-") else {
            return Err(LedgerError::Transport("INVALID_PUBLIC_TOKEN".to_string()));
        };
        Ok(ItemAccess {
            item_id: format!("item-{name}"),
            access_token: AccessCredential::new(format!("access-{name}")),
        })
    }
}

pub async fn ledger_with_db() -> (Ledger<MemoryRoles>, MemoryRoles, DatabaseConnection) {
    ledger_with_roles(MemoryRoles::default()).await
}

pub async fn ledger_with_roles(
    roles: MemoryRoles,
) -> (Ledger<MemoryRoles>, MemoryRoles, DatabaseConnection) {
    let db = Database::connect("sqlite::memory:").await.unwrap();
    migration::Migrator::up(&db, None).await.unwrap();
    let ledger = Ledger::builder()
        .database(db.clone())
        .roles(roles.clone())
        .build()
        .await
        .unwrap();
    (ledger, roles, db)
}

/// File-backed database with several pooled connections, for tests where
/// units of work really run side by side.
pub async fn ledger_with_file_db() -> (Ledger<MemoryRoles>, std::path::PathBuf) {
    let root = std::path::PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../../target/test_dbs");
    std::fs::create_dir_all(&root).unwrap();
    let path = root.join(format!("ledger_{}.db", Uuid::new_v4()));

    let mut options = ConnectOptions::new(format!("sqlite:{}?mode=rwc", path.display()));
    options.max_connections(4).sqlx_logging(false);
    let db = Database::connect(options).await.unwrap();
    migration::Migrator::up(&db, None).await.unwrap();
    let ledger = Ledger::builder()
        .database(db)
        .roles(MemoryRoles::default())
        .build()
        .await
        .unwrap();
    (ledger, path)
}

pub fn day(d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 9, d).unwrap()
}

pub async fn open_account(
    ledger: &Ledger<MemoryRoles>,
    user: &str,
    name: &str,
    reference_id: Option<&str>,
) -> Account {
    let session = ledger.acquire(user).await.unwrap();
    let account = ledger
        .upsert_account(
            &session,
            NewAccount {
                reference_id: reference_id.map(str::to_string),
                name: name.to_string(),
                ..NewAccount::default()
            },
        )
        .await
        .unwrap();
    session.commit().await.unwrap();
    account
}

/// Insert manual entries one unit of work at a time and return their ids.
pub async fn seed(
    ledger: &Ledger<MemoryRoles>,
    user: &str,
    account_id: i64,
    entries: &[(NaiveDate, i64)],
) -> Vec<Uuid> {
    let mut ids = Vec::with_capacity(entries.len());
    for (date, amount) in entries {
        let session = ledger.acquire(user).await.unwrap();
        let id = ledger
            .insert(session, NewEntry::manual(account_id, *date, *amount))
            .await
            .unwrap();
        ids.push(id);
    }
    ids
}

pub async fn entries(
    ledger: &Ledger<MemoryRoles>,
    user: &str,
    account_id: i64,
) -> Vec<LedgerEntry> {
    let session = ledger.acquire(user).await.unwrap();
    let entries = ledger.entries(&session, account_id).await.unwrap();
    session.commit().await.unwrap();
    entries
}

pub fn balance_of(entries: &[LedgerEntry], id: Uuid) -> Option<i64> {
    entries.iter().find(|e| e.id == id).unwrap().balance_minor
}

pub fn sequence_of(entries: &[LedgerEntry], id: Uuid) -> Option<i64> {
    entries.iter().find(|e| e.id == id).unwrap().sequence_num
}

/// Every ordered entry's balance is its predecessor's plus its own amount.
pub fn assert_balance_invariant(entries: &[LedgerEntry]) {
    let mut running = 0;
    for entry in entries.iter().filter(|e| !e.is_detached()) {
        running += entry.amount_minor;
        assert_eq!(entry.balance_minor, Some(running), "entry {}", entry.id);
    }
    for entry in entries.iter().filter(|e| e.is_detached()) {
        assert_eq!(entry.balance_minor, None, "detached entry {}", entry.id);
    }
}
