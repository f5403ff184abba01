//! Transactions API endpoints

use api_types::{
    sequence::{Rebalanced, SequenceUpdate},
    transaction::{
        EntryCreated, EntryList, EntryNew, EntryRemoved, EntrySource as ApiSource, EntryView,
        LocationView,
    },
};
use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
};
use ledger::{
    EntryDetails, EntrySource, LedgerEntry, Location, NewEntry, Reassignment, TenantRoles,
    TransactionSource,
};

use crate::{
    ServerError,
    server::{ServerState, Tenant},
};

fn map_source(source: EntrySource) -> ApiSource {
    match source {
        EntrySource::Downloaded => ApiSource::Downloaded,
        EntrySource::Manual => ApiSource::Manual,
    }
}

fn map_location(location: Location) -> LocationView {
    LocationView {
        lat: location.lat,
        lon: location.lon,
        address: location.address,
        city: location.city,
        region: location.region,
        postal_code: location.postal_code,
        country: location.country,
        store_number: location.store_number,
    }
}

fn entry_view(entry: LedgerEntry) -> EntryView {
    EntryView {
        id: entry.id,
        account_id: entry.account_id,
        source: map_source(entry.source),
        source_id: entry.source_id,
        tx_date: entry.tx_date,
        sequence_num: entry.sequence_num,
        amount_minor: entry.amount_minor,
        balance_minor: entry.balance_minor,
        payee: entry.details.payee,
        memo: entry.details.memo,
        category: entry.details.category,
        location: entry.details.location.map(map_location),
        icon: entry.details.icon,
        tags: entry.details.tags,
    }
}

/// Entries carrying an external id come from a feed; the rest are manual.
fn new_entry(account_id: i64, payload: EntryNew) -> NewEntry {
    let mut entry = match payload.source_id {
        Some(source_id) => {
            NewEntry::downloaded(account_id, source_id, payload.tx_date, payload.amount_minor)
        }
        None => NewEntry::manual(account_id, payload.tx_date, payload.amount_minor),
    };
    entry.sequence_num = payload.sequence_num;
    entry.with_details(EntryDetails {
        payee: payload.payee,
        memo: payload.memo,
        category: payload.category,
        location: None,
        icon: None,
        tags: payload.tags,
    })
}

/// Handle requests for listing the entries of an account in ledger order
pub async fn list<S, R>(
    Extension(tenant): Extension<Tenant>,
    State(state): State<ServerState<S, R>>,
    Path(account_id): Path<i64>,
) -> Result<Json<EntryList>, ServerError>
where
    S: TransactionSource,
    R: TenantRoles,
{
    let ledger = &state.ledger;
    let session = ledger
        .acquire_with(&tenant.0, state.shutdown.child_token())
        .await?;
    let entries = ledger.entries(&session, account_id).await;
    let entries = session.finish(entries).await?;

    Ok(Json(EntryList {
        entries: entries.into_iter().map(entry_view).collect(),
    }))
}

/// Handle requests for placing a new entry
pub async fn create<S, R>(
    Extension(tenant): Extension<Tenant>,
    State(state): State<ServerState<S, R>>,
    Path(account_id): Path<i64>,
    Json(payload): Json<EntryNew>,
) -> Result<(StatusCode, Json<EntryCreated>), ServerError>
where
    S: TransactionSource,
    R: TenantRoles,
{
    let ledger = &state.ledger;
    let session = ledger
        .acquire_with(&tenant.0, state.shutdown.child_token())
        .await?;
    let id = ledger
        .insert(session, new_entry(account_id, payload))
        .await?;

    Ok((StatusCode::CREATED, Json(EntryCreated { id })))
}

pub async fn remove<S, R>(
    Extension(tenant): Extension<Tenant>,
    State(state): State<ServerState<S, R>>,
    Path((account_id, source_id)): Path<(i64, String)>,
) -> Result<Json<EntryRemoved>, ServerError>
where
    S: TransactionSource,
    R: TenantRoles,
{
    let ledger = &state.ledger;
    let session = ledger
        .acquire_with(&tenant.0, state.shutdown.child_token())
        .await?;
    let removed = ledger.remove(session, account_id, &source_id).await?;

    Ok(Json(EntryRemoved { removed }))
}

/// Handle requests for moving entries within an account
pub async fn resequence<S, R>(
    Extension(tenant): Extension<Tenant>,
    State(state): State<ServerState<S, R>>,
    Path(account_id): Path<i64>,
    Json(payload): Json<SequenceUpdate>,
) -> Result<Json<Rebalanced>, ServerError>
where
    S: TransactionSource,
    R: TenantRoles,
{
    let moves = payload
        .moves
        .into_iter()
        .map(|m| Reassignment {
            id: m.id,
            tx_date: m.tx_date,
            sequence_num: m.sequence_num,
        })
        .collect();

    let ledger = &state.ledger;
    let session = ledger
        .acquire_with(&tenant.0, state.shutdown.child_token())
        .await?;
    let rebalanced = ledger.resequence(session, account_id, moves).await?;

    Ok(Json(Rebalanced { rebalanced }))
}

pub async fn recalculate<S, R>(
    Extension(tenant): Extension<Tenant>,
    State(state): State<ServerState<S, R>>,
    Path(account_id): Path<i64>,
) -> Result<Json<Rebalanced>, ServerError>
where
    S: TransactionSource,
    R: TenantRoles,
{
    let ledger = &state.ledger;
    let session = ledger
        .acquire_with(&tenant.0, state.shutdown.child_token())
        .await?;
    let rebalanced = ledger.recalculate(session, account_id).await?;

    Ok(Json(Rebalanced { rebalanced }))
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::*;

    fn payload(source_id: Option<&str>) -> EntryNew {
        EntryNew {
            tx_date: NaiveDate::from_ymd_opt(2024, 9, 27).unwrap(),
            amount_minor: -1250,
            source_id: source_id.map(str::to_string),
            payee: Some("Coffee Shop".to_string()),
            tags: vec!["food".to_string()],
            ..EntryNew::default()
        }
    }

    #[test]
    fn entries_with_external_id_are_downloaded() {
        let entry = new_entry(3, payload(Some("tx-1")));
        assert_eq!(entry.source, EntrySource::Downloaded);
        assert_eq!(entry.source_id.as_deref(), Some("tx-1"));
        assert_eq!(entry.account_id, 3);
        assert_eq!(entry.details.tags, vec!["food".to_string()]);
    }

    #[test]
    fn entries_without_external_id_are_manual() {
        let entry = new_entry(3, payload(None));
        assert_eq!(entry.source, EntrySource::Manual);
        assert_eq!(entry.sequence_num, None);
        assert_eq!(entry.details.payee.as_deref(), Some("Coffee Shop"));
    }
}
