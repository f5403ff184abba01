//! Tracked financial accounts.
//!
//! An account belongs to exactly one tenant. Accounts downloaded from an
//! aggregator carry the external `reference_id` and share an item (one
//! credential and one sync cursor) with their siblings from the same
//! institution login.

use std::fmt;

use sea_orm::{ActiveValue, entity::prelude::*};
use serde::{Deserialize, Serialize};

/// Opaque aggregator access token. Never printed.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccessCredential(String);

impl AccessCredential {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for AccessCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AccessCredential(***)")
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Account {
    pub id: i64,
    pub user_id: String,
    pub reference_id: Option<String>,
    pub name: String,
    pub item_id: Option<String>,
    pub access_token: Option<AccessCredential>,
    pub cursor: Option<String>,
}

impl Account {
    /// Key shared by every account synced through the same credential.
    pub fn item_key(&self) -> Option<String> {
        self.item_id
            .clone()
            .or_else(|| self.access_token.as_ref().map(|t| t.expose().to_string()))
    }
}

/// Account to create, or to update when `reference_id` is already known.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct NewAccount {
    pub reference_id: Option<String>,
    pub name: String,
    pub item_id: Option<String>,
    pub access_token: Option<AccessCredential>,
}

/// External accounts linked through one aggregator login.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LinkedItem {
    pub item_id: String,
    pub access_token: AccessCredential,
    pub accounts: Vec<LinkedAccount>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LinkedAccount {
    pub reference_id: String,
    pub name: String,
}

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "accounts")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub user_id: String,
    pub reference_id: Option<String>,
    pub name: String,
    pub item_id: Option<String>,
    pub access_token: Option<String>,
    pub cursor: Option<String>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "crate::entries::Entity")]
    Entries,
}

impl Related<crate::entries::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Entries.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl From<Model> for Account {
    fn from(model: Model) -> Self {
        Self {
            id: model.id,
            user_id: model.user_id,
            reference_id: model.reference_id,
            name: model.name,
            item_id: model.item_id,
            access_token: model.access_token.map(AccessCredential),
            cursor: model.cursor,
        }
    }
}

impl ActiveModel {
    pub(crate) fn from_new(account: &NewAccount, user_id: &str) -> Self {
        Self {
            id: ActiveValue::NotSet,
            user_id: ActiveValue::Set(user_id.to_string()),
            reference_id: ActiveValue::Set(account.reference_id.clone()),
            name: ActiveValue::Set(account.name.clone()),
            item_id: ActiveValue::Set(account.item_id.clone()),
            access_token: ActiveValue::Set(
                account.access_token.as_ref().map(|t| t.expose().to_string()),
            ),
            cursor: ActiveValue::NotSet,
        }
    }
}
