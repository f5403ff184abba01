//! Merging aggregator updates into the ledger.
//!
//! A sync run handles each item (one credential shared by several accounts)
//! once: it fetches every page after the stored cursor, resolves external
//! account ids, classifies modified entries and applies the result together
//! with the new cursor in one unit of work. Nothing of an item is persisted
//! unless all of it is.

use std::collections::HashSet;

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::session::{Session, TenantRoles};
use crate::{
    AccessCredential, Account, EntryPatch, Ledger, LedgerError, LedgerOp, LinkedAccount,
    LinkedItem, NewEntry, ResultLedger,
};

mod mapping;
mod source;

pub use mapping::AccountMap;
pub use source::{ItemAccess, RemoteEntry, RemovedEntry, SyncPage, TransactionSource};

/// Every change one credential reported after a cursor.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FetchedChanges {
    pub added: Vec<RemoteEntry>,
    pub modified: Vec<RemoteEntry>,
    pub removed: Vec<RemovedEntry>,
    /// Cursor to store once the changes are applied.
    pub next_cursor: Option<String>,
    pub pages: usize,
}

/// A modified entry matched to the internal entry it updates.
#[derive(Clone, Debug, PartialEq)]
pub struct ModifiedEntry {
    pub id: Uuid,
    pub entry: NewEntry,
}

/// Changes resolved to internal accounts and entries.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SyncDelta {
    pub added: Vec<NewEntry>,
    pub modified: Vec<ModifiedEntry>,
    /// `(account_id, source_id)` pairs.
    pub removed: Vec<(i64, String)>,
    pub next_cursor: Option<String>,
}

impl SyncDelta {
    pub fn into_ops(self) -> Vec<LedgerOp> {
        let mut ops =
            Vec::with_capacity(self.added.len() + self.modified.len() + self.removed.len());
        ops.extend(self.added.into_iter().map(LedgerOp::Insert));
        ops.extend(self.modified.into_iter().map(|modified| LedgerOp::Amend {
            account_id: modified.entry.account_id,
            id: modified.id,
            patch: EntryPatch::from(&modified.entry),
        }));
        ops.extend(
            self.removed
                .into_iter()
                .map(|(account_id, source_id)| LedgerOp::Remove {
                    account_id,
                    source_id,
                }),
        );
        ops
    }
}

/// Result of syncing one item.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ItemSync {
    pub item_id: Option<String>,
    pub accounts: Vec<i64>,
    pub added: usize,
    pub modified: usize,
    pub removed: usize,
    pub cursor: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub items: Vec<ItemSync>,
}

impl SyncReport {
    pub fn added(&self) -> usize {
        self.items.iter().map(|i| i.added).sum()
    }

    pub fn modified(&self) -> usize {
        self.items.iter().map(|i| i.modified).sum()
    }

    pub fn removed(&self) -> usize {
        self.items.iter().map(|i| i.removed).sum()
    }
}

pub struct SyncCoordinator<S> {
    source: S,
}

impl<S: TransactionSource> SyncCoordinator<S> {
    pub fn new(source: S) -> Self {
        Self { source }
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    /// Fetch every page after `cursor`. A failing page discards the pages
    /// fetched before it.
    pub async fn fetch(
        &self,
        credential: &AccessCredential,
        cursor: Option<&str>,
        cancel: &CancellationToken,
    ) -> ResultLedger<FetchedChanges> {
        let mut changes = FetchedChanges::default();
        let mut cursor = cursor.map(str::to_string);
        loop {
            let page = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(LedgerError::Cancelled),
                page = self.source.fetch_page(credential, cursor.as_deref()) => page?,
            };
            changes.pages += 1;
            changes.added.extend(page.added);
            changes.modified.extend(page.modified);
            changes.removed.extend(page.removed);
            if page.next_cursor.is_empty() {
                if page.has_more {
                    return Err(LedgerError::Transport(
                        "aggregator reported more pages without a cursor".to_string(),
                    ));
                }
            } else {
                cursor = Some(page.next_cursor);
            }
            if !page.has_more {
                break;
            }
        }
        changes.next_cursor = cursor;
        Ok(changes)
    }

    /// Map external accounts and split modified entries into updates of
    /// known entries and additions of entries never seen before.
    pub async fn resolve<R: TenantRoles>(
        &self,
        ledger: &Ledger<R>,
        session: &Session,
        changes: FetchedChanges,
        map: &AccountMap,
    ) -> ResultLedger<SyncDelta> {
        let mut delta = SyncDelta {
            next_cursor: changes.next_cursor,
            ..SyncDelta::default()
        };
        for remote in changes.added {
            delta.added.push(to_new_entry(remote, map)?);
        }
        for remote in changes.modified {
            let entry = to_new_entry(remote, map)?;
            let source_id = entry.source_id.as_deref().unwrap_or_default();
            let existing = ledger
                .find_by_source(session, entry.account_id, source_id)
                .await?;
            match existing {
                Some(existing) => delta.modified.push(ModifiedEntry {
                    id: existing.id,
                    entry,
                }),
                None => delta.added.push(entry),
            }
        }
        for removed in changes.removed {
            let account_id = map.resolve(&removed.external_account_id)?;
            delta.removed.push((account_id, removed.source_id));
        }
        Ok(delta)
    }

    /// Fetch and resolve the changes of one credential inside `session`.
    pub async fn sync<R: TenantRoles>(
        &self,
        ledger: &Ledger<R>,
        session: &Session,
        credential: &AccessCredential,
        cursor: Option<&str>,
        map: &AccountMap,
    ) -> ResultLedger<SyncDelta> {
        let changes = self
            .fetch(credential, cursor, session.cancel_token())
            .await?;
        self.resolve(ledger, session, changes, map).await
    }

    /// Exchange `public_token` and store the item with its accounts. The
    /// exchange happens before the tenant's unit of work is opened.
    pub async fn link<R: TenantRoles>(
        &self,
        ledger: &Ledger<R>,
        user: &str,
        public_token: &str,
        accounts: Vec<LinkedAccount>,
        cancel: &CancellationToken,
    ) -> ResultLedger<Vec<Account>> {
        let access = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(LedgerError::Cancelled),
            access = self.source.exchange_token(public_token) => access?,
        };
        info!(item = %access.item_id, accounts = accounts.len(), "public token exchanged");

        let session = ledger.acquire_with(user, cancel.clone()).await?;
        ledger
            .link_item(
                session,
                LinkedItem {
                    item_id: access.item_id,
                    access_token: access.access_token,
                    accounts,
                },
            )
            .await
    }

    /// Sync the tenant's linked accounts, one unit of work per item.
    pub async fn sync_user<R: TenantRoles>(
        &self,
        ledger: &Ledger<R>,
        user: &str,
        cancel: &CancellationToken,
    ) -> ResultLedger<SyncReport> {
        let session = ledger.acquire_with(user, cancel.clone()).await?;
        let accounts = ledger.accounts(&session).await;
        let accounts = session.finish(accounts).await?;
        let map = AccountMap::from_accounts(&accounts);
        self.sync_accounts(ledger, user, &accounts, &map, cancel)
            .await
    }

    /// Sync each distinct item of `accounts` once, in account order. The
    /// first failing item stops the run; items before it stay committed.
    pub async fn sync_accounts<R: TenantRoles>(
        &self,
        ledger: &Ledger<R>,
        user: &str,
        accounts: &[Account],
        map: &AccountMap,
        cancel: &CancellationToken,
    ) -> ResultLedger<SyncReport> {
        let mut report = SyncReport::default();
        let mut done = HashSet::new();
        for account in accounts {
            let (Some(credential), Some(key)) = (&account.access_token, account.item_key()) else {
                continue;
            };
            if !done.insert(key.clone()) {
                continue;
            }
            let siblings: Vec<i64> = accounts
                .iter()
                .filter(|a| a.item_key().as_deref() == Some(key.as_str()))
                .map(|a| a.id)
                .collect();

            let synced = self
                .sync_item(ledger, user, credential, account, &siblings, map, cancel)
                .await;
            match synced {
                Ok(item) => {
                    info!(
                        tenant = user,
                        item = ?item.item_id,
                        added = item.added,
                        modified = item.modified,
                        removed = item.removed,
                        "item synced"
                    );
                    report.items.push(item);
                }
                Err(err) => {
                    error!(
                        tenant = user,
                        item = ?account.item_id,
                        error = %err,
                        "item sync failed"
                    );
                    return Err(err);
                }
            }
        }
        if report.items.is_empty() {
            warn!(tenant = user, "no linked accounts to sync");
        }
        Ok(report)
    }

    #[allow(clippy::too_many_arguments)]
    async fn sync_item<R: TenantRoles>(
        &self,
        ledger: &Ledger<R>,
        user: &str,
        credential: &AccessCredential,
        account: &Account,
        siblings: &[i64],
        map: &AccountMap,
        cancel: &CancellationToken,
    ) -> ResultLedger<ItemSync> {
        // Pages are fetched before a connection is taken from the pool.
        let changes = self
            .fetch(credential, account.cursor.as_deref(), cancel)
            .await?;
        let mut session = ledger.acquire_with(user, cancel.clone()).await?;
        let result: ResultLedger<ItemSync> = async {
            let delta = self.resolve(ledger, &session, changes, map).await?;
            let mut item = ItemSync {
                item_id: account.item_id.clone(),
                accounts: siblings.to_vec(),
                added: delta.added.len(),
                modified: delta.modified.len(),
                removed: delta.removed.len(),
                cursor: delta.next_cursor.clone(),
            };
            let outcome = ledger.apply_in(&mut session, delta.into_ops()).await?;
            item.removed = outcome.removed;
            if let Some(cursor) = &item.cursor {
                ledger.save_cursor(&session, siblings, cursor).await?;
            }
            Ok(item)
        }
        .await;
        session.finish(result).await
    }
}

fn to_new_entry(remote: RemoteEntry, map: &AccountMap) -> ResultLedger<NewEntry> {
    let account_id = map.resolve(&remote.external_account_id)?;
    Ok(
        NewEntry::downloaded(account_id, remote.source_id, remote.tx_date, remote.amount_minor)
            .with_details(remote.details),
    )
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::*;
    use crate::EntryDetails;

    fn remote(account: &str, source_id: &str, amount_minor: i64) -> RemoteEntry {
        RemoteEntry {
            external_account_id: account.to_string(),
            source_id: source_id.to_string(),
            tx_date: NaiveDate::from_ymd_opt(2024, 9, 27).unwrap(),
            amount_minor,
            details: EntryDetails::default(),
        }
    }

    #[test]
    fn remote_entries_become_downloaded_entries() {
        let mut map = AccountMap::new();
        map.insert("ext-1", 4);
        let entry = to_new_entry(remote("ext-1", "tx-1", -1250), &map).unwrap();
        assert_eq!(entry.account_id, 4);
        assert_eq!(entry.source_id.as_deref(), Some("tx-1"));
        assert_eq!(entry.amount_minor, -1250);
        assert_eq!(entry.sequence_num, None);

        assert_eq!(
            to_new_entry(remote("ext-2", "tx-2", 1), &map),
            Err(LedgerError::UnresolvedAccountMapping("ext-2".to_string()))
        );
    }

    #[test]
    fn delta_ops_insert_then_amend_then_remove() {
        let mut map = AccountMap::new();
        map.insert("ext-1", 4);
        let modified_id = Uuid::now_v7();
        let delta = SyncDelta {
            added: vec![to_new_entry(remote("ext-1", "tx-1", 10), &map).unwrap()],
            modified: vec![ModifiedEntry {
                id: modified_id,
                entry: to_new_entry(remote("ext-1", "tx-2", 20), &map).unwrap(),
            }],
            removed: vec![(4, "tx-3".to_string())],
            next_cursor: Some("c-1".to_string()),
        };

        let ops = delta.into_ops();
        assert_eq!(ops.len(), 3);
        assert!(matches!(&ops[0], LedgerOp::Insert(entry) if entry.amount_minor == 10));
        assert!(matches!(
            &ops[1],
            LedgerOp::Amend { account_id: 4, id, patch } if *id == modified_id
                && patch.amount_minor == Some(20)
        ));
        assert_eq!(
            ops[2],
            LedgerOp::Remove {
                account_id: 4,
                source_id: "tx-3".to_string(),
            }
        );
    }
}
