use crate::domain::{AccessGrant, AccountId, Amount, Payment, ServiceId, Withdrawal};
use crate::storage::Repository;

use super::{AccessController, AppError, CallContext};

/// Payment-acceptance path of the payment ledger: validates an incoming
/// payment against the catalog, then drives the injected access ledger to
/// record the grant. The paid value is retained in the ledger balance.
pub struct PaymentService<A: AccessController> {
    repo: Repository,
    access: A,
}

/// Outcome of a successful payment.
pub struct PaymentReceipt {
    pub payment: Payment,
    pub grant: AccessGrant,
}

impl<A: AccessController> PaymentService<A> {
    pub fn new(repo: Repository, access: A) -> Self {
        Self { repo, access }
    }

    /// Pay for a service on the caller's own behalf.
    pub async fn pay_service(
        &self,
        ctx: &CallContext,
        service_id: ServiceId,
        value: Amount,
    ) -> Result<PaymentReceipt, AppError> {
        self.pay(ctx, service_id, ctx.caller, value).await
    }

    /// Pay for a service on behalf of a named client. Same validation,
    /// with the client substituted for the caller.
    pub async fn pay_service_from(
        &self,
        ctx: &CallContext,
        service_id: ServiceId,
        client: AccountId,
        value: Amount,
    ) -> Result<PaymentReceipt, AppError> {
        self.pay(ctx, service_id, client, value).await
    }

    async fn pay(
        &self,
        ctx: &CallContext,
        service_id: ServiceId,
        client: AccountId,
        value: Amount,
    ) -> Result<PaymentReceipt, AppError> {
        let service = self
            .repo
            .get_service(service_id)
            .await?
            .ok_or(AppError::NotFound(service_id))?;

        if !service.is_active {
            return Err(AppError::InvalidState {
                service_id,
                state: "inactive",
            });
        }

        // Exact price only: no overpayment tolerance, no refund path.
        if value != service.price {
            return Err(AppError::InvalidPayment {
                service_id,
                expected: service.price,
                supplied: value,
            });
        }

        // A client must let an existing grant lapse before repurchasing.
        if self.access.get_access(service_id, client).await? {
            return Err(AppError::AlreadyGranted { service_id, client });
        }

        let expires_at = service.frequency.expiration_from(ctx.now);

        let config = self.repo.get_config().await?;
        // The outbound call goes to whatever the access-contract reference
        // points at. Repointed away from the access ledger, there is
        // nothing there to take the grant.
        if config.access_contract != config.access_ledger_id {
            return Err(AppError::TransferFailed(
                "access contract does not point at the access ledger".to_string(),
            ));
        }

        // Every local check is done; the cross-component call comes last,
        // presents the orchestrator's own identity, and settles grant and
        // receipt together.
        let payment = Payment::new(service_id, ctx.caller, client, value, ctx.now);
        let grant_ctx = CallContext::new(config.orchestrator_id, ctx.now);
        let grant = self
            .access
            .give_paid_access(&grant_ctx, service_id, client, expires_at, &payment)
            .await?;

        Ok(PaymentReceipt { payment, grant })
    }

    /// Transfer the entire accumulated balance to the registry owner.
    pub async fn withdraw_funds(&self, ctx: &CallContext) -> Result<Withdrawal, AppError> {
        let config = self.repo.get_config().await?;
        if ctx.caller != config.registry_owner {
            return Err(AppError::Unauthorized(ctx.caller));
        }

        let balance = self.repo.compute_balance().await?;
        if balance <= 0 {
            return Err(AppError::TransferFailed("no funds available".to_string()));
        }

        let withdrawal = Withdrawal::new(config.registry_owner, balance, ctx.now);
        self.repo.save_withdrawal(&withdrawal).await?;
        Ok(withdrawal)
    }

    /// Repoint the access-ledger reference. Owner-only, forward-only:
    /// grants already recorded are not migrated.
    pub async fn change_access_contract(
        &self,
        ctx: &CallContext,
        account: AccountId,
    ) -> Result<(), AppError> {
        let config = self.repo.get_config().await?;
        if ctx.caller != config.registry_owner {
            return Err(AppError::Unauthorized(ctx.caller));
        }
        if account.is_nil() {
            return Err(AppError::InvalidAddress);
        }
        self.repo.set_access_contract(account).await?;
        Ok(())
    }

    /// Current withdrawable balance.
    pub async fn collected_balance(&self) -> Result<Amount, AppError> {
        Ok(self.repo.compute_balance().await?)
    }

    /// Payment history, oldest first.
    pub async fn list_payments(&self) -> Result<Vec<Payment>, AppError> {
        Ok(self.repo.list_payments().await?)
    }

    /// Withdrawal history, oldest first.
    pub async fn list_withdrawals(&self) -> Result<Vec<Withdrawal>, AppError> {
        Ok(self.repo.list_withdrawals().await?)
    }
}
