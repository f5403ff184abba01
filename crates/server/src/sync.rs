//! Sync API endpoint

use api_types::sync::{ItemSyncView, SyncResponse};
use axum::{Extension, Json, extract::State};
use ledger::{ItemSync, TenantRoles, TransactionSource};

use crate::{
    ServerError,
    server::{ServerState, Tenant},
};

fn item_view(item: ItemSync) -> ItemSyncView {
    ItemSyncView {
        item_id: item.item_id,
        accounts: item.accounts,
        added: item.added,
        modified: item.modified,
        removed: item.removed,
    }
}

/// Pull aggregator updates for every linked item of the caller
pub async fn run<S, R>(
    Extension(tenant): Extension<Tenant>,
    State(state): State<ServerState<S, R>>,
) -> Result<Json<SyncResponse>, ServerError>
where
    S: TransactionSource,
    R: TenantRoles,
{
    let cancel = state.shutdown.child_token();
    let report = state
        .sync
        .sync_user(&state.ledger, &tenant.0, &cancel)
        .await?;

    Ok(Json(SyncResponse {
        added: report.added(),
        modified: report.modified(),
        removed: report.removed(),
        items: report.items.into_iter().map(item_view).collect(),
    }))
}
