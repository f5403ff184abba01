//! The errors the ledger can return.
//!
//! Each variant belongs to one [`ErrorKind`], the stable classification the
//! HTTP layer turns into a status code. Two kinds are fatal for the tenant:
//!
//! - [`Rollback`] means a unit of work could not be rolled back and the
//!   connection is in an unknown state.
//! - [`Quarantined`] is returned for every later request of a tenant that hit
//!   a rollback failure, until an operator releases it.
//!
//!  [`Rollback`]: LedgerError::Rollback
//!  [`Quarantined`]: LedgerError::Quarantined
use chrono::NaiveDate;
use sea_orm::DbErr;
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("tenant identity must not be empty")]
    EmptyIdentity,
    #[error("invalid tenant identity: {0}")]
    InvalidIdentity(String),
    #[error("could not provision role for tenant \"{0}\"")]
    RoleProvisioning(String),
    #[error("tenant \"{0}\" is quarantined after a failed rollback")]
    Quarantined(String),
    #[error("sequence {sequence} on {tx_date} is assigned twice in account {account_id}")]
    SequenceCollision {
        account_id: i64,
        tx_date: NaiveDate,
        sequence: i64,
    },
    #[error("invalid reassignment: {0}")]
    InvalidReassignment(String),
    #[error("running balance of account {account_id} overflows on {tx_date}")]
    BalanceOverflow { account_id: i64, tx_date: NaiveDate },
    #[error("\"{0}\" key not found!")]
    KeyNotFound(String),
    #[error("no internal account for external account \"{0}\"")]
    UnresolvedAccountMapping(String),
    #[error("transport failure: {0}")]
    Transport(String),
    #[error("operation cancelled")]
    Cancelled,
    #[error("commit failed: {0}")]
    Commit(DbErr),
    #[error("rollback failed: {0}")]
    Rollback(DbErr),
    #[error(transparent)]
    Database(DbErr),
}

/// Stable classification of a [`LedgerError`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    EmptyIdentity,
    InvalidIdentity,
    RoleProvisioningFailure,
    Quarantined,
    SequenceCollision,
    InvalidReassignment,
    InvalidAmount,
    NotFound,
    UnresolvedAccountMapping,
    TransportFailure,
    Cancelled,
    CommitFailure,
    RollbackFailure,
    Storage,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::EmptyIdentity => "empty_identity",
            Self::InvalidIdentity => "invalid_identity",
            Self::RoleProvisioningFailure => "role_provisioning_failure",
            Self::Quarantined => "quarantined",
            Self::SequenceCollision => "sequence_collision",
            Self::InvalidReassignment => "invalid_reassignment",
            Self::InvalidAmount => "invalid_amount",
            Self::NotFound => "not_found",
            Self::UnresolvedAccountMapping => "unresolved_account_mapping",
            Self::TransportFailure => "transport_failure",
            Self::Cancelled => "cancelled",
            Self::CommitFailure => "commit_failure",
            Self::RollbackFailure => "rollback_failure",
            Self::Storage => "storage",
        }
    }
}

impl LedgerError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::EmptyIdentity => ErrorKind::EmptyIdentity,
            Self::InvalidIdentity(_) => ErrorKind::InvalidIdentity,
            Self::RoleProvisioning(_) => ErrorKind::RoleProvisioningFailure,
            Self::Quarantined(_) => ErrorKind::Quarantined,
            Self::SequenceCollision { .. } => ErrorKind::SequenceCollision,
            Self::InvalidReassignment(_) => ErrorKind::InvalidReassignment,
            Self::BalanceOverflow { .. } => ErrorKind::InvalidAmount,
            Self::KeyNotFound(_) => ErrorKind::NotFound,
            Self::UnresolvedAccountMapping(_) => ErrorKind::UnresolvedAccountMapping,
            Self::Transport(_) => ErrorKind::TransportFailure,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::Commit(_) => ErrorKind::CommitFailure,
            Self::Rollback(_) => ErrorKind::RollbackFailure,
            Self::Database(_) => ErrorKind::Storage,
        }
    }

    /// True when the tenant cannot be served again without operator action.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Rollback(_) | Self::Quarantined(_))
    }
}

impl From<DbErr> for LedgerError {
    fn from(err: DbErr) -> Self {
        match err {
            DbErr::Conn(_) | DbErr::ConnectionAcquire(_) => Self::Transport(err.to_string()),
            other => Self::Database(other),
        }
    }
}

impl PartialEq for LedgerError {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::EmptyIdentity, Self::EmptyIdentity) | (Self::Cancelled, Self::Cancelled) => true,
            (Self::InvalidIdentity(a), Self::InvalidIdentity(b)) => a == b,
            (Self::RoleProvisioning(a), Self::RoleProvisioning(b)) => a == b,
            (Self::Quarantined(a), Self::Quarantined(b)) => a == b,
            (
                Self::SequenceCollision {
                    account_id: a_account,
                    tx_date: a_date,
                    sequence: a_seq,
                },
                Self::SequenceCollision {
                    account_id: b_account,
                    tx_date: b_date,
                    sequence: b_seq,
                },
            ) => a_account == b_account && a_date == b_date && a_seq == b_seq,
            (Self::InvalidReassignment(a), Self::InvalidReassignment(b)) => a == b,
            (
                Self::BalanceOverflow {
                    account_id: a_account,
                    tx_date: a_date,
                },
                Self::BalanceOverflow {
                    account_id: b_account,
                    tx_date: b_date,
                },
            ) => a_account == b_account && a_date == b_date,
            (Self::KeyNotFound(a), Self::KeyNotFound(b)) => a == b,
            (Self::UnresolvedAccountMapping(a), Self::UnresolvedAccountMapping(b)) => a == b,
            (Self::Transport(a), Self::Transport(b)) => a == b,
            (Self::Commit(a), Self::Commit(b))
            | (Self::Rollback(a), Self::Rollback(b))
            | (Self::Database(a), Self::Database(b)) => a.to_string() == b.to_string(),
            _ => false,
        }
    }
}
