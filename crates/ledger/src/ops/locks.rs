use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

type Slots = Arc<Mutex<HashMap<i64, Arc<AsyncMutex<()>>>>>;

/// One async mutex per account. A guard is kept by the session that took it
/// until its unit of work ends; the slot goes away with the last guard.
#[derive(Clone, Debug, Default)]
pub(crate) struct AccountLocks {
    inner: Slots,
}

/// Held lock on one account.
#[derive(Debug)]
pub(crate) struct AccountGuard {
    account_id: i64,
    guard: Option<OwnedMutexGuard<()>>,
    slots: Slots,
}

impl AccountLocks {
    fn slot(&self, account_id: i64) -> Arc<AsyncMutex<()>> {
        let mut slots = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        slots.entry(account_id).or_default().clone()
    }

    pub async fn lock(&self, account_id: i64) -> AccountGuard {
        let guard = self.slot(account_id).lock_owned().await;
        AccountGuard {
            account_id,
            guard: Some(guard),
            slots: self.inner.clone(),
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl Drop for AccountGuard {
    fn drop(&mut self) {
        drop(self.guard.take());
        // Slots are only cloned under the map lock, so a count of one means
        // nobody holds or waits for this account.
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        if slots
            .get(&self.account_id)
            .is_some_and(|slot| Arc::strong_count(slot) == 1)
        {
            slots.remove(&self.account_id);
        }
    }
}
