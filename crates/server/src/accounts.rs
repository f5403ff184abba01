//! Account API endpoints

use api_types::account::{AccountList, AccountNew, AccountView, ItemLink};
use axum::{Extension, Json, extract::State, http::StatusCode};
use ledger::{Account, LinkedAccount, NewAccount, TenantRoles, TransactionSource};

use crate::{
    ServerError,
    server::{ServerState, Tenant},
};

fn account_view(account: Account) -> AccountView {
    AccountView {
        id: account.id,
        synced: account.cursor.is_some(),
        reference_id: account.reference_id,
        name: account.name,
        item_id: account.item_id,
    }
}

/// Handle requests for listing the caller's accounts
pub async fn list<S, R>(
    Extension(tenant): Extension<Tenant>,
    State(state): State<ServerState<S, R>>,
) -> Result<Json<AccountList>, ServerError>
where
    S: TransactionSource,
    R: TenantRoles,
{
    let ledger = &state.ledger;
    let session = ledger
        .acquire_with(&tenant.0, state.shutdown.child_token())
        .await?;
    let accounts = ledger.accounts(&session).await;
    let accounts = session.finish(accounts).await?;

    Ok(Json(AccountList {
        accounts: accounts.into_iter().map(account_view).collect(),
    }))
}

/// Create a manual account, or rename the one with the same reference id
pub async fn create<S, R>(
    Extension(tenant): Extension<Tenant>,
    State(state): State<ServerState<S, R>>,
    Json(payload): Json<AccountNew>,
) -> Result<(StatusCode, Json<AccountView>), ServerError>
where
    S: TransactionSource,
    R: TenantRoles,
{
    let ledger = &state.ledger;
    let session = ledger
        .acquire_with(&tenant.0, state.shutdown.child_token())
        .await?;
    let account = ledger
        .upsert_account(
            &session,
            NewAccount {
                reference_id: payload.reference_id,
                name: payload.name,
                ..NewAccount::default()
            },
        )
        .await;
    let account = session.finish(account).await?;

    Ok((StatusCode::CREATED, Json(account_view(account))))
}

/// Exchange a public token and link the item's accounts to the caller
pub async fn link<S, R>(
    Extension(tenant): Extension<Tenant>,
    State(state): State<ServerState<S, R>>,
    Json(payload): Json<ItemLink>,
) -> Result<(StatusCode, Json<AccountList>), ServerError>
where
    S: TransactionSource,
    R: TenantRoles,
{
    let accounts = payload
        .accounts
        .into_iter()
        .map(|a| LinkedAccount {
            reference_id: a.id,
            name: a.name,
        })
        .collect();
    let cancel = state.shutdown.child_token();
    let linked = state
        .sync
        .link(&state.ledger, &tenant.0, &payload.public_token, accounts, &cancel)
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(AccountList {
            accounts: linked.into_iter().map(account_view).collect(),
        }),
    ))
}
