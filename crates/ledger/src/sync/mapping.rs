use std::collections::HashMap;

use crate::{Account, LedgerError, ResultLedger};

/// External account id to internal account id, for one tenant.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AccountMap(HashMap<String, i64>);

impl AccountMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Map every account that carries an external reference.
    pub fn from_accounts(accounts: &[Account]) -> Self {
        accounts
            .iter()
            .filter_map(|a| a.reference_id.clone().map(|reference| (reference, a.id)))
            .collect()
    }

    pub fn insert(&mut self, external_id: impl Into<String>, account_id: i64) {
        self.0.insert(external_id.into(), account_id);
    }

    pub fn resolve(&self, external_id: &str) -> ResultLedger<i64> {
        self.0
            .get(external_id)
            .copied()
            .ok_or_else(|| LedgerError::UnresolvedAccountMapping(external_id.to_string()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<(String, i64)> for AccountMap {
    fn from_iter<I: IntoIterator<Item = (String, i64)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}
