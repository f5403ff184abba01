use std::sync::Arc;

use api_types::ErrorBody;
use axum::{
    Json, Router,
    extract::Request,
    http::{HeaderName, HeaderValue},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
};
use axum_extra::{
    TypedHeader,
    headers::{Error as AxumError, Header},
};
use ledger::{Ledger, LedgerError, StoreRoles, SyncCoordinator, TenantRoles, TransactionSource};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use uuid::Uuid;

use crate::{Failure, ServerError, accounts, sync, transactions};

static TENANT_HEADER: HeaderName = HeaderName::from_static("x-tenant-id");
static TRACE_HEADER: HeaderName = HeaderName::from_static("x-trace-id");

const MAX_TRACE_ID_LEN: usize = 128;

pub struct ServerState<S, R = StoreRoles> {
    pub ledger: Arc<Ledger<R>>,
    pub sync: Arc<SyncCoordinator<S>>,
    /// Cancelled on shutdown; every request works under a child token.
    pub shutdown: CancellationToken,
}

impl<S, R> Clone for ServerState<S, R> {
    fn clone(&self) -> Self {
        Self {
            ledger: self.ledger.clone(),
            sync: self.sync.clone(),
            shutdown: self.shutdown.clone(),
        }
    }
}

impl<S, R> ServerState<S, R> {
    pub fn new(ledger: Ledger<R>, sync: SyncCoordinator<S>, shutdown: CancellationToken) -> Self {
        Self {
            ledger: Arc::new(ledger),
            sync: Arc::new(sync),
            shutdown,
        }
    }
}

/// Verified tenant identity of the caller.
#[derive(Clone, Debug)]
pub struct Tenant(pub String);

/// `TypedHeader` for the tenant identity
///
/// Requests must contain the "x-tenant-id" entry set by the authenticating
/// proxy in front of the service.
#[derive(Debug)]
struct TenantHeader(String);

impl Header for TenantHeader {
    fn name() -> &'static HeaderName {
        &TENANT_HEADER
    }

    fn decode<'i, I>(values: &mut I) -> Result<Self, AxumError>
    where
        Self: Sized,
        I: Iterator<Item = &'i HeaderValue>,
    {
        let value = values.next().ok_or_else(AxumError::invalid)?;
        let Ok(value) = value.to_str() else {
            return Err(AxumError::invalid());
        };

        Ok(TenantHeader(value.to_string()))
    }

    fn encode<E: Extend<HeaderValue>>(&self, values: &mut E) {
        match HeaderValue::from_str(&self.0) {
            Ok(value) => values.extend(std::iter::once(value)),
            Err(_) => tracing::error!("failed to encode x-tenant-id header"),
        }
    }
}

async fn identify(
    tenant_header: Option<TypedHeader<TenantHeader>>,
    mut request: Request,
    next: Next,
) -> Result<Response, ServerError> {
    let Some(TypedHeader(TenantHeader(tenant))) = tenant_header else {
        return Err(LedgerError::EmptyIdentity.into());
    };
    request.extensions_mut().insert(Tenant(tenant));
    Ok(next.run(request).await)
}

fn accepted_trace_id(value: &HeaderValue) -> Option<String> {
    let value = value.to_str().ok()?;
    let valid = !value.is_empty()
        && value.len() <= MAX_TRACE_ID_LEN
        && value.chars().all(|c| c.is_ascii_graphic());
    valid.then(|| value.to_string())
}

/// Propagate or generate the trace id, run the request inside its span and
/// stamp it on the response and on any error body.
async fn trace(request: Request, next: Next) -> Response {
    let trace_id = request
        .headers()
        .get(&TRACE_HEADER)
        .and_then(accepted_trace_id)
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    let span = tracing::info_span!(
        "request",
        trace_id = %trace_id,
        method = %request.method(),
        path = %request.uri().path(),
    );

    let mut response = next.run(request).instrument(span).await;
    if let Some(failure) = response.extensions_mut().remove::<Failure>() {
        response = (
            failure.status,
            Json(ErrorBody {
                status: failure.status.as_u16(),
                message: failure.message,
                trace_id: trace_id.clone(),
            }),
        )
            .into_response();
    }
    match HeaderValue::from_str(&trace_id) {
        Ok(value) => {
            response.headers_mut().insert(TRACE_HEADER.clone(), value);
        }
        Err(_) => tracing::error!("failed to encode x-trace-id header"),
    }
    response
}

pub fn router<S, R>(state: ServerState<S, R>) -> Router
where
    S: TransactionSource + 'static,
    R: TenantRoles + 'static,
{
    Router::new()
        .route(
            "/accounts",
            get(accounts::list::<S, R>).post(accounts::create::<S, R>),
        )
        .route("/items", post(accounts::link::<S, R>))
        .route(
            "/accounts/{account_id}/transactions",
            get(transactions::list::<S, R>).post(transactions::create::<S, R>),
        )
        .route(
            "/accounts/{account_id}/transactions/{source_id}",
            delete(transactions::remove::<S, R>),
        )
        .route(
            "/accounts/{account_id}/sequence",
            post(transactions::resequence::<S, R>),
        )
        .route(
            "/accounts/{account_id}/recalculate",
            post(transactions::recalculate::<S, R>),
        )
        .route("/sync", post(sync::run::<S, R>))
        .route_layer(middleware::from_fn(identify))
        .layer(middleware::from_fn(trace))
        .with_state(state)
}

/// Serve until the state's shutdown token is cancelled.
pub async fn run_with_listener<S, R>(
    state: ServerState<S, R>,
    listener: tokio::net::TcpListener,
) -> Result<(), std::io::Error>
where
    S: TransactionSource + 'static,
    R: TenantRoles + 'static,
{
    let addr = listener.local_addr()?;
    tracing::info!("Server listening on {}", addr);

    let shutdown = state.shutdown.clone();
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await
}
