use api_types::ErrorBody;
use axum::{Json, http::StatusCode, response::IntoResponse};
use ledger::{ErrorKind, LedgerError};

pub use server::{ServerState, router, run_with_listener};

mod accounts;
mod server;
mod sync;
mod transactions;

/// A failed request, rendered as [`ErrorBody`].
///
/// The trace id is filled in by the tracing middleware, which finds the
/// pending [`Failure`] in the response extensions.
#[derive(Debug)]
pub struct ServerError(LedgerError);

#[derive(Clone, Debug)]
pub(crate) struct Failure {
    pub status: StatusCode,
    pub message: String,
}

fn status_for_kind(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::EmptyIdentity => StatusCode::UNAUTHORIZED,
        ErrorKind::InvalidIdentity => StatusCode::BAD_REQUEST,
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::SequenceCollision => StatusCode::CONFLICT,
        ErrorKind::InvalidReassignment | ErrorKind::InvalidAmount => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
        ErrorKind::UnresolvedAccountMapping => StatusCode::BAD_GATEWAY,
        ErrorKind::TransportFailure | ErrorKind::Quarantined | ErrorKind::Cancelled => {
            StatusCode::SERVICE_UNAVAILABLE
        }
        ErrorKind::RoleProvisioningFailure
        | ErrorKind::CommitFailure
        | ErrorKind::RollbackFailure
        | ErrorKind::Storage => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Storage failures are logged and replaced by a fixed message.
fn message_for_error(err: &LedgerError) -> String {
    match err.kind() {
        ErrorKind::Storage | ErrorKind::CommitFailure | ErrorKind::RollbackFailure => {
            tracing::error!(kind = err.kind().as_str(), "storage error: {err}");
            "internal server error".to_string()
        }
        ErrorKind::RoleProvisioningFailure => {
            tracing::error!("{err}");
            "tenant could not be provisioned".to_string()
        }
        ErrorKind::TransportFailure => {
            tracing::warn!("{err}");
            "upstream service unavailable".to_string()
        }
        _ => err.to_string(),
    }
}

impl ServerError {
    pub fn kind(&self) -> ErrorKind {
        self.0.kind()
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> axum::response::Response {
        let status = status_for_kind(self.0.kind());
        let message = message_for_error(&self.0);
        let mut response = (
            status,
            Json(ErrorBody {
                status: status.as_u16(),
                message: message.clone(),
                trace_id: String::new(),
            }),
        )
            .into_response();
        response
            .extensions_mut()
            .insert(Failure { status, message });
        response
    }
}

impl From<LedgerError> for ServerError {
    fn from(value: LedgerError) -> Self {
        Self(value)
    }
}
