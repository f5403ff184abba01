use std::future::Future;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::{AccessCredential, EntryDetails, ResultLedger};

/// External aggregator delivering incremental transaction updates.
pub trait TransactionSource: Send + Sync {
    /// Fetch the page after `cursor`, or the first page when `cursor` is
    /// `None`. Network errors are reported as `LedgerError::Transport`.
    fn fetch_page(
        &self,
        credential: &AccessCredential,
        cursor: Option<&str>,
    ) -> impl Future<Output = ResultLedger<SyncPage>> + Send;

    /// Trade the short-lived token of a finished link flow for the item's
    /// long-lived credential.
    fn exchange_token(
        &self,
        public_token: &str,
    ) -> impl Future<Output = ResultLedger<ItemAccess>> + Send;
}

/// Credential of one aggregator item.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ItemAccess {
    pub item_id: String,
    pub access_token: AccessCredential,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncPage {
    pub added: Vec<RemoteEntry>,
    pub modified: Vec<RemoteEntry>,
    pub removed: Vec<RemovedEntry>,
    pub has_more: bool,
    pub next_cursor: String,
}

/// A transaction as the aggregator reports it, already in ledger units:
/// signed minor-unit amount, outflows negative.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RemoteEntry {
    pub external_account_id: String,
    pub source_id: String,
    pub tx_date: NaiveDate,
    pub amount_minor: i64,
    pub details: EntryDetails,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemovedEntry {
    pub external_account_id: String,
    pub source_id: String,
}
