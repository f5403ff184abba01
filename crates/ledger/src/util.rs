//! Internal helpers for model conversion.
//!
//! These utilities are **not** part of the public API. They keep the JSON
//! text columns and backend checks consistent across the entity modules.

use sea_orm::{ConnectionTrait, DbBackend, DbErr};
use serde::{Serialize, de::DeserializeOwned};

use crate::{LedgerError, ResultLedger};

/// Decode an optional JSON text column, labeling the column on failure.
pub(crate) fn decode_json<T: DeserializeOwned>(
    value: Option<&str>,
    label: &str,
) -> ResultLedger<Option<T>> {
    value
        .map(|raw| {
            serde_json::from_str(raw).map_err(|err| {
                LedgerError::from(DbErr::Type(format!("invalid {label} column: {err}")))
            })
        })
        .transpose()
}

pub(crate) fn encode_json<T: Serialize>(value: &T, label: &str) -> ResultLedger<String> {
    serde_json::to_string(value)
        .map_err(|err| LedgerError::from(DbErr::Type(format!("cannot encode {label}: {err}"))))
}

/// Row locks and role switching only exist on Postgres.
pub(crate) fn is_postgres(conn: &impl ConnectionTrait) -> bool {
    conn.get_database_backend() == DbBackend::Postgres
}
