//! Per-tenant ledger engine.
//!
//! Every mutation flows through a [`Session`] obtained from the
//! [`SessionProvisioner`], is applied by the [`Ledger`] gateway inside one unit
//! of work, and is placed and balanced by the account reconciler before it is
//! written back.

pub use accounts::{AccessCredential, Account, LinkedAccount, LinkedItem, NewAccount};
pub use entries::{EntryDetails, EntryPatch, EntrySource, LedgerEntry, Location, NewEntry};
pub use error::{ErrorKind, LedgerError};
pub use ops::{BatchOutcome, Ledger, LedgerBuilder, LedgerOp};
pub use reconcile::Reassignment;
pub use session::{
    GROUP_ROLE, OpenUnitInfo, RoleConfig, Session, SessionProvisioner, StoreRoles, SwitchError,
    TenantRoles, UnitRegistry,
};
pub use sync::{
    AccountMap, FetchedChanges, ItemAccess, ItemSync, ModifiedEntry, RemoteEntry, RemovedEntry,
    SyncCoordinator, SyncDelta, SyncPage, SyncReport, TransactionSource,
};
pub use tenant::TenantId;

pub mod accounts;
pub mod entries;
mod error;
mod ops;
mod reconcile;
mod session;
mod sync;
mod tenant;
mod util;

pub type ResultLedger<T> = Result<T, LedgerError>;
