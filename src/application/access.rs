use chrono::{DateTime, Utc};

use crate::domain::{
    validate_grant, AccessGrant, AccountId, GrantError, Notification, Payment, ServiceId,
};
use crate::storage::Repository;

use super::{AppError, CallContext};

/// Capability surface of the access ledger. The payment orchestrator is
/// handed this at construction time, so tests can substitute a double and
/// no component reaches for the other through a global lookup.
#[allow(async_fn_in_trait)]
pub trait AccessController {
    /// Grant access to a (service, client) pair until `expires_at`.
    async fn give_access(
        &self,
        ctx: &CallContext,
        service_id: ServiceId,
        client: AccountId,
        expires_at: DateTime<Utc>,
    ) -> Result<AccessGrant, AppError>;

    /// Grant access and record the settling payment in the same storage
    /// transaction, so a fault cannot leave one without the other.
    async fn give_paid_access(
        &self,
        ctx: &CallContext,
        service_id: ServiceId,
        client: AccountId,
        expires_at: DateTime<Utc>,
        payment: &Payment,
    ) -> Result<AccessGrant, AppError>;

    /// Revoke a live grant, zeroing both record fields together.
    async fn retrieve_access(
        &self,
        ctx: &CallContext,
        service_id: ServiceId,
        client: AccountId,
    ) -> Result<(), AppError>;

    /// Check a live grant against the clock. An expired grant is lazily
    /// revoked through the same path as `retrieve_access` and the call
    /// returns `false`; an unexpired grant is left untouched.
    async fn verify_access(
        &self,
        ctx: &CallContext,
        service_id: ServiceId,
        client: AccountId,
    ) -> Result<bool, AppError>;

    /// Pure read; returns `false` for pairs never granted.
    async fn get_access(&self, service_id: ServiceId, client: AccountId)
        -> Result<bool, AppError>;

    /// Pure read; returns `None` for pairs never granted or already
    /// revoked.
    async fn get_expiration_date(
        &self,
        service_id: ServiceId,
        client: AccountId,
    ) -> Result<Option<DateTime<Utc>>, AppError>;
}

/// The access ledger: per-(service, client) grant records plus the two
/// authorized managers (the access owner and the linked payment contract).
pub struct AccessService {
    repo: Repository,
}

impl AccessService {
    pub fn new(repo: Repository) -> Self {
        Self { repo }
    }

    /// Grant/revoke authority: the access owner or whoever the
    /// payment-contract reference currently points at.
    async fn require_manager(&self, ctx: &CallContext) -> Result<(), AppError> {
        let config = self.repo.get_config().await?;
        if ctx.caller != config.access_owner && ctx.caller != config.payment_contract {
            return Err(AppError::Unauthorized(ctx.caller));
        }
        Ok(())
    }

    async fn require_live_grant(
        &self,
        service_id: ServiceId,
        client: AccountId,
    ) -> Result<AccessGrant, AppError> {
        self.repo
            .get_grant(service_id, client)
            .await?
            .filter(|grant| grant.has_access)
            .ok_or(AppError::NotGranted { service_id, client })
    }

    /// Hand grant/revoke authority to a new payment-side caller.
    /// Owner-only: this is a capability transfer point.
    pub async fn set_payment_contract(
        &self,
        ctx: &CallContext,
        account: AccountId,
    ) -> Result<(), AppError> {
        let config = self.repo.get_config().await?;
        if ctx.caller != config.access_owner {
            return Err(AppError::Unauthorized(ctx.caller));
        }
        if account.is_nil() {
            return Err(AppError::InvalidAddress);
        }
        self.repo.set_payment_contract(account).await?;
        Ok(())
    }

    async fn revoke(&self, mut grant: AccessGrant, now: DateTime<Utc>) -> Result<(), AppError> {
        let notification = Notification::AccessRetrieved {
            service_id: grant.service_id,
            client: grant.client,
        };
        grant.clear();
        self.repo.save_grant(&grant, &notification, now).await?;
        Ok(())
    }

    /// Authorization and precondition checks shared by both grant paths.
    /// Returns the record and its notification without persisting either.
    async fn validated_grant(
        &self,
        ctx: &CallContext,
        service_id: ServiceId,
        client: AccountId,
        expires_at: DateTime<Utc>,
    ) -> Result<(AccessGrant, Notification), AppError> {
        self.require_manager(ctx).await?;

        let existing = self.repo.get_grant(service_id, client).await?;
        validate_grant(existing.as_ref(), client, expires_at, ctx.now).map_err(|e| match e {
            GrantError::ZeroClient => AppError::InvalidAddress,
            GrantError::AlreadyGranted => AppError::AlreadyGranted { service_id, client },
            GrantError::NotInFuture { expires_at, now } => {
                AppError::InvalidExpiration { expires_at, now }
            }
        })?;

        let grant = AccessGrant::granted(service_id, client, expires_at);
        let notification = Notification::AccessGiven {
            service_id,
            client,
            expires_at,
        };
        Ok((grant, notification))
    }
}

impl AccessController for AccessService {
    async fn give_access(
        &self,
        ctx: &CallContext,
        service_id: ServiceId,
        client: AccountId,
        expires_at: DateTime<Utc>,
    ) -> Result<AccessGrant, AppError> {
        let (grant, notification) = self
            .validated_grant(ctx, service_id, client, expires_at)
            .await?;
        self.repo.save_grant(&grant, &notification, ctx.now).await?;
        Ok(grant)
    }

    async fn give_paid_access(
        &self,
        ctx: &CallContext,
        service_id: ServiceId,
        client: AccountId,
        expires_at: DateTime<Utc>,
        payment: &Payment,
    ) -> Result<AccessGrant, AppError> {
        let (grant, notification) = self
            .validated_grant(ctx, service_id, client, expires_at)
            .await?;
        self.repo
            .save_grant_and_payment(&grant, &notification, payment)
            .await?;
        Ok(grant)
    }

    async fn retrieve_access(
        &self,
        ctx: &CallContext,
        service_id: ServiceId,
        client: AccountId,
    ) -> Result<(), AppError> {
        self.require_manager(ctx).await?;

        let grant = self.require_live_grant(service_id, client).await?;
        self.revoke(grant, ctx.now).await
    }

    async fn verify_access(
        &self,
        ctx: &CallContext,
        service_id: ServiceId,
        client: AccountId,
    ) -> Result<bool, AppError> {
        self.require_manager(ctx).await?;

        let grant = self.require_live_grant(service_id, client).await?;
        if grant.is_expired(ctx.now) {
            self.revoke(grant, ctx.now).await?;
            Ok(false)
        } else {
            Ok(true)
        }
    }

    async fn get_access(
        &self,
        service_id: ServiceId,
        client: AccountId,
    ) -> Result<bool, AppError> {
        let grant = self.repo.get_grant(service_id, client).await?;
        Ok(grant.is_some_and(|g| g.has_access))
    }

    async fn get_expiration_date(
        &self,
        service_id: ServiceId,
        client: AccountId,
    ) -> Result<Option<DateTime<Utc>>, AppError> {
        let grant = self.repo.get_grant(service_id, client).await?;
        Ok(grant.and_then(|g| g.expires_at))
    }
}
