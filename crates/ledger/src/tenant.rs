use std::fmt;

use crate::{LedgerError, ResultLedger};

/// Validated tenant identity.
///
/// The identity doubles as the name of the tenant's database role, so it is
/// restricted to characters that are safe in a quoted identifier and to the
/// Postgres identifier length.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TenantId(String);

impl TenantId {
    pub const MAX_LEN: usize = 63;

    pub fn parse(value: &str) -> ResultLedger<Self> {
        if value.trim().is_empty() {
            return Err(LedgerError::EmptyIdentity);
        }
        if value.len() > Self::MAX_LEN {
            return Err(LedgerError::InvalidIdentity(format!(
                "identity exceeds {} bytes",
                Self::MAX_LEN
            )));
        }
        if let Some(c) = value.chars().find(|c| !is_identity_char(*c)) {
            return Err(LedgerError::InvalidIdentity(format!(
                "unsupported character {c:?}"
            )));
        }
        Ok(Self(value.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

fn is_identity_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.' | '@' | '|' | ':')
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TenantId({})", self.0)
    }
}
