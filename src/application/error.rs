use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::domain::{AccountId, Amount, ServiceId};

/// Outcome taxonomy for every mutating operation. Preconditions are
/// checked before any state change, so a returned error implies no
/// observable side effect: no event recorded, no balance or record change.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Caller {0} is not authorized for this operation")]
    Unauthorized(AccountId),

    #[error("The zero identity is not a valid address")]
    InvalidAddress,

    #[error("Service not found: {0}")]
    NotFound(ServiceId),

    #[error("Service {service_id} is already {state}")]
    InvalidState {
        service_id: ServiceId,
        state: &'static str,
    },

    #[error("Invalid payment for service {service_id}: price is {expected}, got {supplied}")]
    InvalidPayment {
        service_id: ServiceId,
        expected: Amount,
        supplied: Amount,
    },

    #[error("Client {client} already holds access to service {service_id}")]
    AlreadyGranted {
        service_id: ServiceId,
        client: AccountId,
    },

    #[error("Client {client} holds no access to service {service_id}")]
    NotGranted {
        service_id: ServiceId,
        client: AccountId,
    },

    #[error("Expiration {expires_at} is not strictly after current time {now}")]
    InvalidExpiration {
        expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    },

    #[error("Funds transfer failed: {0}")]
    TransferFailed(String),

    #[error("Database error: {0}")]
    Database(#[from] anyhow::Error),
}
