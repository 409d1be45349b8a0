use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{AccountId, Amount, ServiceId};

pub type PaymentId = Uuid;

/// A settled payment: exact value received in exchange for one access
/// grant. Payments are immutable and there is no refund path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Payment {
    pub id: PaymentId,
    pub service_id: ServiceId,
    /// Who supplied the value. May differ from `client` when paying on
    /// someone else's behalf.
    pub payer: AccountId,
    /// Who received the access grant.
    pub client: AccountId,
    pub amount: Amount,
    pub paid_at: DateTime<Utc>,
}

impl Payment {
    pub fn new(
        service_id: ServiceId,
        payer: AccountId,
        client: AccountId,
        amount: Amount,
        paid_at: DateTime<Utc>,
    ) -> Self {
        assert!(amount >= 0, "Payment amount must not be negative");
        Self {
            id: Uuid::new_v4(),
            service_id,
            payer,
            client,
            amount,
            paid_at,
        }
    }
}

/// A withdrawal of the entire accumulated balance to the owner.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Withdrawal {
    pub id: Uuid,
    pub recipient: AccountId,
    pub amount: Amount,
    pub withdrawn_at: DateTime<Utc>,
}

impl Withdrawal {
    pub fn new(recipient: AccountId, amount: Amount, withdrawn_at: DateTime<Utc>) -> Self {
        assert!(amount > 0, "Withdrawal amount must be positive");
        Self {
            id: Uuid::new_v4(),
            recipient,
            amount,
            withdrawn_at,
        }
    }
}

/// Balance held by the orchestrator: everything collected minus everything
/// withdrawn.
pub fn compute_balance(payments: &[Payment], withdrawals: &[Withdrawal]) -> Amount {
    let collected: Amount = payments.iter().map(|p| p.amount).sum();
    let withdrawn: Amount = withdrawals.iter().map(|w| w.amount).sum();
    collected - withdrawn
}

/// Total collected for a single service.
pub fn collected_for_service(service_id: ServiceId, payments: &[Payment]) -> Amount {
    payments
        .iter()
        .filter(|p| p.service_id == service_id)
        .map(|p| p.amount)
        .sum()
}
