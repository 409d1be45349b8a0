use chrono::{DateTime, Utc};

use crate::domain::AccountId;

/// Per-call execution context: the authenticated caller identity and the
/// current time, both supplied by the hosting environment. Authorization
/// compares `caller` against the stored owner/manager identities; expiry
/// compares stored timestamps against `now`.
#[derive(Debug, Clone, Copy)]
pub struct CallContext {
    pub caller: AccountId,
    pub now: DateTime<Utc>,
}

impl CallContext {
    pub fn new(caller: AccountId, now: DateTime<Utc>) -> Self {
        Self { caller, now }
    }

    /// Context stamped with the wall clock.
    pub fn current(caller: AccountId) -> Self {
        Self::new(caller, Utc::now())
    }

    /// Same caller at a different instant.
    pub fn at(&self, now: DateTime<Utc>) -> Self {
        Self::new(self.caller, now)
    }
}
