use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::Amount;

/// Sequential catalog id assigned at creation, starting at 0.
/// Ids are never reused and services are never removed.
pub type ServiceId = i64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BillingFrequency {
    /// A single payment buys long-lived access (100 fixed years)
    OneTime,
    /// 30 fixed days per payment
    Monthly,
    /// 365 fixed days per payment
    Yearly,
}

impl BillingFrequency {
    pub fn as_str(&self) -> &'static str {
        match self {
            BillingFrequency::OneTime => "one_time",
            BillingFrequency::Monthly => "monthly",
            BillingFrequency::Yearly => "yearly",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "one_time" | "one-time" | "once" => Some(BillingFrequency::OneTime),
            "monthly" => Some(BillingFrequency::Monthly),
            "yearly" => Some(BillingFrequency::Yearly),
            _ => None,
        }
    }

    /// Fixed calendar approximations - no true month/year arithmetic.
    pub fn duration(&self) -> Duration {
        match self {
            BillingFrequency::OneTime => Duration::days(36_500),
            BillingFrequency::Monthly => Duration::days(30),
            BillingFrequency::Yearly => Duration::days(365),
        }
    }

    /// Expiration for a grant paid at `now`.
    pub fn expiration_from(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now + self.duration()
    }
}

impl std::fmt::Display for BillingFrequency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A priced, recurring service in the catalog. Price and frequency changes
/// are forward-only: grants already issued keep their computed expiration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Service {
    pub id: ServiceId,
    pub is_active: bool,
    pub price: Amount,
    pub frequency: BillingFrequency,
    pub created_at: DateTime<Utc>,
}

impl Service {
    /// Create a new service. Services start active; the id is assigned by
    /// the repository from the sequential counter.
    pub fn new(price: Amount, frequency: BillingFrequency) -> Self {
        assert!(price >= 0, "Service price must not be negative");
        Self {
            id: 0, // Will be set by repository
            is_active: true,
            price,
            frequency,
            created_at: Utc::now(),
        }
    }
}
