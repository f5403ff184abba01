//! Ledger entries (transactions).
//!
//! An entry is ordered inside its account by `(tx_date, sequence_num)`. The
//! running balance is derived by the reconciler and is never accepted from a
//! caller: [`NewEntry`] and [`EntryPatch`] have no balance field.

use chrono::{DateTime, NaiveDate, Utc};
use sea_orm::{ActiveValue, entity::prelude::*};
use serde::{Deserialize, Serialize};

use crate::util::{decode_json, encode_json};
use crate::{LedgerError, ResultLedger};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntrySource {
    Downloaded,
    Manual,
}

impl EntrySource {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Downloaded => "downloaded",
            Self::Manual => "manual",
        }
    }
}

impl TryFrom<&str> for EntrySource {
    type Error = LedgerError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "downloaded" => Ok(Self::Downloaded),
            "manual" => Ok(Self::Manual),
            other => Err(DbErr::Type(format!("invalid entry source: {other}")).into()),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    pub address: Option<String>,
    pub city: Option<String>,
    pub region: Option<String>,
    pub postal_code: Option<String>,
    pub country: Option<String>,
    pub store_number: Option<String>,
}

/// Descriptive metadata. The engine stores it but never interprets it.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct EntryDetails {
    pub payee: Option<String>,
    pub memo: Option<String>,
    pub category: Option<String>,
    pub location: Option<Location>,
    /// Merchant logo URL.
    pub icon: Option<String>,
    pub tags: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub id: Uuid,
    pub account_id: i64,
    pub source: EntrySource,
    pub source_id: Option<String>,
    pub tx_date: NaiveDate,
    /// `None` while the entry is detached from the account order.
    pub sequence_num: Option<i64>,
    pub amount_minor: i64,
    pub balance_minor: Option<i64>,
    pub details: EntryDetails,
}

impl LedgerEntry {
    pub fn position(&self) -> Option<(NaiveDate, i64)> {
        self.sequence_num.map(|seq| (self.tx_date, seq))
    }

    pub fn is_detached(&self) -> bool {
        self.sequence_num.is_none()
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct NewEntry {
    pub account_id: i64,
    pub source: EntrySource,
    pub source_id: Option<String>,
    pub tx_date: NaiveDate,
    /// Explicit slot; appended after the last entry of the date when `None`.
    pub sequence_num: Option<i64>,
    pub amount_minor: i64,
    pub details: EntryDetails,
}

impl NewEntry {
    pub fn manual(account_id: i64, tx_date: NaiveDate, amount_minor: i64) -> Self {
        Self {
            account_id,
            source: EntrySource::Manual,
            source_id: None,
            tx_date,
            sequence_num: None,
            amount_minor,
            details: EntryDetails::default(),
        }
    }

    pub fn downloaded(
        account_id: i64,
        source_id: impl Into<String>,
        tx_date: NaiveDate,
        amount_minor: i64,
    ) -> Self {
        Self {
            account_id,
            source: EntrySource::Downloaded,
            source_id: Some(source_id.into()),
            tx_date,
            sequence_num: None,
            amount_minor,
            details: EntryDetails::default(),
        }
    }

    pub fn with_sequence(mut self, sequence_num: i64) -> Self {
        self.sequence_num = Some(sequence_num);
        self
    }

    pub fn with_details(mut self, details: EntryDetails) -> Self {
        self.details = details;
        self
    }

    pub(crate) fn into_entry(self) -> LedgerEntry {
        LedgerEntry {
            id: Uuid::now_v7(),
            account_id: self.account_id,
            source: self.source,
            source_id: self.source_id,
            tx_date: self.tx_date,
            sequence_num: self.sequence_num,
            amount_minor: self.amount_minor,
            balance_minor: None,
            details: self.details,
        }
    }
}

/// Changes to an existing entry. `None` leaves a field untouched.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct EntryPatch {
    pub tx_date: Option<NaiveDate>,
    pub amount_minor: Option<i64>,
    pub details: Option<EntryDetails>,
}

impl From<&NewEntry> for EntryPatch {
    fn from(entry: &NewEntry) -> Self {
        Self {
            tx_date: Some(entry.tx_date),
            amount_minor: Some(entry.amount_minor),
            details: Some(entry.details.clone()),
        }
    }
}

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "transactions")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    pub user_id: String,
    pub account_id: i64,
    pub source: String,
    pub source_id: Option<String>,
    pub sequence_num: Option<i64>,
    pub tx_date: Date,
    pub payee: Option<String>,
    pub memo: Option<String>,
    pub category: Option<String>,
    pub location: Option<String>,
    pub icon: Option<String>,
    pub tags: Option<String>,
    pub amount_minor: i64,
    pub balance_minor: Option<i64>,
    pub created_at: DateTimeUtc,
    pub updated_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "crate::accounts::Entity",
        from = "Column::AccountId",
        to = "crate::accounts::Column::Id"
    )]
    Accounts,
}

impl Related<crate::accounts::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Accounts.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl TryFrom<Model> for LedgerEntry {
    type Error = LedgerError;

    fn try_from(model: Model) -> Result<Self, Self::Error> {
        let id = Uuid::parse_str(&model.id)
            .map_err(|_| DbErr::Type(format!("invalid entry id: {}", model.id)))?;
        let tags: Option<Vec<String>> = decode_json(model.tags.as_deref(), "tags")?;
        Ok(Self {
            id,
            account_id: model.account_id,
            source: EntrySource::try_from(model.source.as_str())?,
            source_id: model.source_id,
            tx_date: model.tx_date,
            sequence_num: model.sequence_num,
            amount_minor: model.amount_minor,
            balance_minor: model.balance_minor,
            details: EntryDetails {
                payee: model.payee,
                memo: model.memo,
                category: model.category,
                location: decode_json(model.location.as_deref(), "location")?,
                icon: model.icon,
                tags: tags.unwrap_or_default(),
            },
        })
    }
}

fn encode_tags(tags: &[String]) -> ResultLedger<Option<String>> {
    if tags.is_empty() {
        return Ok(None);
    }
    encode_json(&tags, "tags").map(Some)
}

fn encode_location(location: Option<&Location>) -> ResultLedger<Option<String>> {
    location.map(|l| encode_json(l, "location")).transpose()
}

impl ActiveModel {
    /// Every column of a not yet persisted entry.
    pub(crate) fn for_insert(
        entry: &LedgerEntry,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> ResultLedger<Self> {
        Ok(Self {
            id: ActiveValue::Set(entry.id.to_string()),
            user_id: ActiveValue::Set(user_id.to_string()),
            account_id: ActiveValue::Set(entry.account_id),
            source: ActiveValue::Set(entry.source.as_str().to_string()),
            source_id: ActiveValue::Set(entry.source_id.clone()),
            sequence_num: ActiveValue::Set(entry.sequence_num),
            tx_date: ActiveValue::Set(entry.tx_date),
            payee: ActiveValue::Set(entry.details.payee.clone()),
            memo: ActiveValue::Set(entry.details.memo.clone()),
            category: ActiveValue::Set(entry.details.category.clone()),
            location: ActiveValue::Set(encode_location(entry.details.location.as_ref())?),
            icon: ActiveValue::Set(entry.details.icon.clone()),
            tags: ActiveValue::Set(encode_tags(&entry.details.tags)?),
            amount_minor: ActiveValue::Set(entry.amount_minor),
            balance_minor: ActiveValue::Set(entry.balance_minor),
            created_at: ActiveValue::Set(now),
            updated_at: ActiveValue::Set(now),
        })
    }

    /// The mutable columns of an existing entry; identity and ownership stay
    /// untouched.
    pub(crate) fn for_update(entry: &LedgerEntry, now: DateTime<Utc>) -> ResultLedger<Self> {
        Ok(Self {
            id: ActiveValue::Unchanged(entry.id.to_string()),
            sequence_num: ActiveValue::Set(entry.sequence_num),
            tx_date: ActiveValue::Set(entry.tx_date),
            payee: ActiveValue::Set(entry.details.payee.clone()),
            memo: ActiveValue::Set(entry.details.memo.clone()),
            category: ActiveValue::Set(entry.details.category.clone()),
            location: ActiveValue::Set(encode_location(entry.details.location.as_ref())?),
            icon: ActiveValue::Set(entry.details.icon.clone()),
            tags: ActiveValue::Set(encode_tags(&entry.details.tags)?),
            amount_minor: ActiveValue::Set(entry.amount_minor),
            balance_minor: ActiveValue::Set(entry.balance_minor),
            updated_at: ActiveValue::Set(now),
            ..Default::default()
        })
    }
}
