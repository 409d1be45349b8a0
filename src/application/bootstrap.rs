use uuid::Uuid;

use crate::domain::AccountId;
use crate::storage::{LedgerConfig, Repository};

use super::AppError;

/// Bootstrap a freshly migrated database: record the immutable owners,
/// mint identities for the two ledger components, and link them to each
/// other (the access ledger accepts the orchestrator as its payment-side
/// manager, the orchestrator points at the access ledger).
pub async fn bootstrap_ledger(
    repo: &Repository,
    registry_owner: AccountId,
    access_owner: AccountId,
) -> Result<LedgerConfig, AppError> {
    if registry_owner.is_nil() || access_owner.is_nil() {
        return Err(AppError::InvalidAddress);
    }

    let orchestrator_id = Uuid::new_v4();
    let access_ledger_id = Uuid::new_v4();

    let config = LedgerConfig {
        registry_owner,
        access_owner,
        orchestrator_id,
        access_ledger_id,
        payment_contract: orchestrator_id,
        access_contract: access_ledger_id,
    };

    repo.bootstrap(&config).await?;
    Ok(config)
}
