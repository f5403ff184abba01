use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Body of every error response.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub status: u16,
    pub message: String,
    pub trace_id: String,
}

pub mod account {
    use super::*;

    #[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
    pub struct AccountView {
        pub id: i64,
        /// External account id, for aggregator-linked accounts.
        pub reference_id: Option<String>,
        pub name: String,
        pub item_id: Option<String>,
        /// True once the account has been synced at least once.
        pub synced: bool,
    }

    #[derive(Debug, Serialize, Deserialize)]
    pub struct AccountList {
        pub accounts: Vec<AccountView>,
    }

    /// Manual account, or an update of the one with the same `reference_id`.
    #[derive(Debug, Serialize, Deserialize)]
    pub struct AccountNew {
        pub reference_id: Option<String>,
        pub name: String,
    }

    #[derive(Clone, Debug, Serialize, Deserialize)]
    pub struct ItemAccount {
        /// Aggregator account id.
        pub id: String,
        pub name: String,
    }

    /// Public token from the aggregator's link flow and the accounts it covers.
    #[derive(Debug, Serialize, Deserialize)]
    pub struct ItemLink {
        pub public_token: String,
        pub accounts: Vec<ItemAccount>,
    }
}

pub mod transaction {
    use super::*;

    #[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(rename_all = "snake_case")]
    pub enum EntrySource {
        Downloaded,
        Manual,
    }

    #[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
    pub struct LocationView {
        pub lat: Option<f64>,
        pub lon: Option<f64>,
        pub address: Option<String>,
        pub city: Option<String>,
        pub region: Option<String>,
        pub postal_code: Option<String>,
        pub country: Option<String>,
        pub store_number: Option<String>,
    }

    #[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
    pub struct EntryView {
        pub id: Uuid,
        pub account_id: i64,
        pub source: EntrySource,
        pub source_id: Option<String>,
        pub tx_date: NaiveDate,
        /// `None` for detached entries.
        pub sequence_num: Option<i64>,
        /// Signed amount in minor units, outflows negative.
        pub amount_minor: i64,
        pub balance_minor: Option<i64>,
        pub payee: Option<String>,
        pub memo: Option<String>,
        pub category: Option<String>,
        pub location: Option<LocationView>,
        pub icon: Option<String>,
        pub tags: Vec<String>,
    }

    #[derive(Debug, Serialize, Deserialize)]
    pub struct EntryList {
        pub entries: Vec<EntryView>,
    }

    /// A new entry. There is no balance field: balances are derived.
    #[derive(Debug, Default, Serialize, Deserialize)]
    pub struct EntryNew {
        pub tx_date: NaiveDate,
        pub amount_minor: i64,
        /// Appended after the last entry of the date when absent.
        pub sequence_num: Option<i64>,
        /// External id; a repeated id updates the existing entry.
        pub source_id: Option<String>,
        pub payee: Option<String>,
        pub memo: Option<String>,
        pub category: Option<String>,
        #[serde(default)]
        pub tags: Vec<String>,
    }

    #[derive(Debug, Serialize, Deserialize)]
    pub struct EntryCreated {
        pub id: Uuid,
    }

    #[derive(Debug, Serialize, Deserialize)]
    pub struct EntryRemoved {
        pub removed: bool,
    }
}

pub mod sequence {
    use super::*;

    #[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
    pub struct Reassign {
        pub id: Uuid,
        pub tx_date: NaiveDate,
        /// `None` detaches the entry from the ordering.
        pub sequence_num: Option<i64>,
    }

    #[derive(Debug, Serialize, Deserialize)]
    pub struct SequenceUpdate {
        pub moves: Vec<Reassign>,
    }

    #[derive(Debug, Serialize, Deserialize)]
    pub struct Rebalanced {
        pub rebalanced: usize,
    }
}

pub mod sync {
    use super::*;

    #[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
    pub struct ItemSyncView {
        pub item_id: Option<String>,
        pub accounts: Vec<i64>,
        pub added: usize,
        pub modified: usize,
        pub removed: usize,
    }

    #[derive(Debug, Serialize, Deserialize)]
    pub struct SyncResponse {
        pub items: Vec<ItemSyncView>,
        pub added: usize,
        pub modified: usize,
        pub removed: usize,
    }
}
