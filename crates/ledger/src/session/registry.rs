use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info};
use uuid::Uuid;

use crate::TenantId;

/// One unit of work that has been opened and not yet closed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct OpenUnitInfo {
    pub id: Uuid,
    pub tenant: String,
    pub opened_at: DateTime<Utc>,
}

/// Process-wide view of the units of work currently open.
#[derive(Clone, Debug, Default)]
pub struct UnitRegistry {
    inner: Arc<Mutex<HashMap<Uuid, OpenUnitInfo>>>,
}

impl UnitRegistry {
    pub(crate) fn open(&self, tenant: &TenantId) -> UnitMarker {
        let info = OpenUnitInfo {
            id: Uuid::now_v7(),
            tenant: tenant.to_string(),
            opened_at: Utc::now(),
        };
        let id = info.id;
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, info);
        debug!(unit = %id, tenant = %tenant, "unit of work opened");
        UnitMarker {
            id,
            registry: self.clone(),
        }
    }

    fn close(&self, id: Uuid) {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id);
        debug!(unit = %id, "unit of work closed");
    }

    /// Open units, oldest first.
    pub fn open_units(&self) -> Vec<OpenUnitInfo> {
        let mut units: Vec<_> = self
            .inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        units.sort_by_key(|u| (u.opened_at, u.id));
        units
    }

    pub fn len(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn log_open_units(&self) {
        let now = Utc::now();
        for unit in self.open_units() {
            info!(
                unit = %unit.id,
                tenant = %unit.tenant,
                age_ms = (now - unit.opened_at).num_milliseconds(),
                "open unit of work"
            );
        }
    }
}

/// Registry entry of one unit of work. Dropping it clears the entry, whether
/// the unit was committed, rolled back or abandoned.
#[derive(Debug)]
pub(crate) struct UnitMarker {
    id: Uuid,
    registry: UnitRegistry,
}

impl UnitMarker {
    pub fn id(&self) -> Uuid {
        self.id
    }
}

impl Drop for UnitMarker {
    fn drop(&mut self) {
        self.registry.close(self.id);
    }
}

/// Tenants blocked after a rollback failure.
#[derive(Clone, Debug, Default)]
pub(crate) struct Quarantine {
    inner: Arc<Mutex<HashSet<TenantId>>>,
}

impl Quarantine {
    pub fn contains(&self, tenant: &TenantId) -> bool {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(tenant)
    }

    pub fn insert(&self, tenant: TenantId) {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(tenant);
    }

    pub fn release(&self, tenant: &TenantId) -> bool {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(tenant)
    }
}
