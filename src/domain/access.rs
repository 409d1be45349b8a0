use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::ServiceId;

/// Identity of any party touching the ledgers: owners, clients, and the
/// linked contract references. The nil UUID is the zero identity and is
/// never a valid client or manager.
pub type AccountId = Uuid;

/// Per-(service, client) access record. Records are created lazily on the
/// first grant and never deleted: revocation zeroes both fields together,
/// never one without the other.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessGrant {
    pub service_id: ServiceId,
    pub client: AccountId,
    pub has_access: bool,
    /// Meaningful only while `has_access` is true.
    pub expires_at: Option<DateTime<Utc>>,
}

impl AccessGrant {
    /// A zero-valued record for a pair that was never granted.
    pub fn empty(service_id: ServiceId, client: AccountId) -> Self {
        Self {
            service_id,
            client,
            has_access: false,
            expires_at: None,
        }
    }

    /// A live grant expiring at `expires_at`.
    pub fn granted(service_id: ServiceId, client: AccountId, expires_at: DateTime<Utc>) -> Self {
        Self {
            service_id,
            client,
            has_access: true,
            expires_at: Some(expires_at),
        }
    }

    /// Zero both fields. Revocation and lazy expiry go through here so the
    /// pair always resets together.
    pub fn clear(&mut self) {
        self.has_access = false;
        self.expires_at = None;
    }

    /// True when the grant is live but its expiration has passed. Nothing
    /// fires on expiry; staleness is only resolved on inspection.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.has_access && self.expires_at.is_some_and(|exp| exp <= now)
    }
}

/// Validate a prospective grant before any state change.
pub fn validate_grant(
    existing: Option<&AccessGrant>,
    client: AccountId,
    expires_at: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Result<(), GrantError> {
    if client.is_nil() {
        return Err(GrantError::ZeroClient);
    }
    if existing.is_some_and(|grant| grant.has_access) {
        return Err(GrantError::AlreadyGranted);
    }
    if expires_at <= now {
        return Err(GrantError::NotInFuture { expires_at, now });
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GrantError {
    ZeroClient,
    AlreadyGranted,
    NotInFuture {
        expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    },
}

impl std::fmt::Display for GrantError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GrantError::ZeroClient => write!(f, "client is the zero identity"),
            GrantError::AlreadyGranted => write!(f, "pair already holds access"),
            GrantError::NotInFuture { expires_at, now } => {
                write!(
                    f,
                    "expiration {} is not strictly after current time {}",
                    expires_at, now
                )
            }
        }
    }
}

impl std::error::Error for GrantError {}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(secs, 0).unwrap()
    }

    #[test]
    fn test_validate_grant_ok() {
        let client = Uuid::new_v4();
        let result = validate_grant(None, client, at(2_000), at(1_000));
        assert!(result.is_ok());
    }

    #[test]
    fn test_validate_grant_zero_client() {
        let result = validate_grant(None, Uuid::nil(), at(2_000), at(1_000));
        assert_eq!(result, Err(GrantError::ZeroClient));
    }

    #[test]
    fn test_validate_grant_already_granted() {
        let client = Uuid::new_v4();
        let existing = AccessGrant::granted(0, client, at(5_000));
        let result = validate_grant(Some(&existing), client, at(2_000), at(1_000));
        assert_eq!(result, Err(GrantError::AlreadyGranted));
    }

    #[test]
    fn test_validate_grant_cleared_record_can_regrant() {
        let client = Uuid::new_v4();
        let mut existing = AccessGrant::granted(0, client, at(5_000));
        existing.clear();
        let result = validate_grant(Some(&existing), client, at(2_000), at(1_000));
        assert!(result.is_ok());
    }

    #[test]
    fn test_validate_grant_expiration_must_be_strictly_future() {
        let client = Uuid::new_v4();
        // Equal to now is not strictly in the future
        assert!(matches!(
            validate_grant(None, client, at(1_000), at(1_000)),
            Err(GrantError::NotInFuture { .. })
        ));
        assert!(matches!(
            validate_grant(None, client, at(999), at(1_000)),
            Err(GrantError::NotInFuture { .. })
        ));
        assert!(validate_grant(None, client, at(1_001), at(1_000)).is_ok());
    }

    #[test]
    fn test_clear_zeroes_both_fields() {
        let mut grant = AccessGrant::granted(3, Uuid::new_v4(), at(9_000));
        grant.clear();
        assert!(!grant.has_access);
        assert_eq!(grant.expires_at, None);
    }

    #[test]
    fn test_is_expired() {
        let grant = AccessGrant::granted(0, Uuid::new_v4(), at(5_000));
        assert!(!grant.is_expired(at(4_999)));
        // An expiration that has been reached counts as passed
        assert!(grant.is_expired(at(5_000)));
        assert!(grant.is_expired(at(5_000) + Duration::days(1)));
    }

    #[test]
    fn test_empty_record_is_never_expired() {
        let grant = AccessGrant::empty(0, Uuid::new_v4());
        assert!(!grant.is_expired(at(8_000_000_000_000)));
    }
}
