use crate::domain::{Amount, BillingFrequency, Notification, Service, ServiceId};
use crate::storage::Repository;

use super::{AppError, CallContext};

/// Catalog side of the payment ledger: owns the priced, recurring
/// services. All mutations are restricted to the registry owner; reads
/// are unrestricted.
pub struct RegistryService {
    repo: Repository,
}

impl RegistryService {
    pub fn new(repo: Repository) -> Self {
        Self { repo }
    }

    async fn require_owner(&self, ctx: &CallContext) -> Result<(), AppError> {
        let config = self.repo.get_config().await?;
        if ctx.caller != config.registry_owner {
            return Err(AppError::Unauthorized(ctx.caller));
        }
        Ok(())
    }

    async fn require_service(&self, id: ServiceId) -> Result<Service, AppError> {
        self.repo
            .get_service(id)
            .await?
            .ok_or(AppError::NotFound(id))
    }

    /// Append a new service to the catalog. Services start active and
    /// receive the next sequential id.
    pub async fn create_service(
        &self,
        ctx: &CallContext,
        price: Amount,
        frequency: BillingFrequency,
    ) -> Result<Service, AppError> {
        self.require_owner(ctx).await?;

        let mut service = Service::new(price, frequency);
        service.created_at = ctx.now;
        self.repo.save_service(&mut service).await?;
        Ok(service)
    }

    /// Reactivate a stopped service.
    pub async fn start_service(
        &self,
        ctx: &CallContext,
        id: ServiceId,
    ) -> Result<Service, AppError> {
        self.require_owner(ctx).await?;

        let mut service = self.require_service(id).await?;
        if service.is_active {
            return Err(AppError::InvalidState {
                service_id: id,
                state: "active",
            });
        }

        service.is_active = true;
        self.repo
            .update_service(
                &service,
                Some(&Notification::ServiceStarted { service_id: id }),
                ctx.now,
            )
            .await?;
        Ok(service)
    }

    /// Stop accepting payments for a service. Outstanding grants are
    /// unaffected until they expire.
    pub async fn stop_service(
        &self,
        ctx: &CallContext,
        id: ServiceId,
    ) -> Result<Service, AppError> {
        self.require_owner(ctx).await?;

        let mut service = self.require_service(id).await?;
        if !service.is_active {
            return Err(AppError::InvalidState {
                service_id: id,
                state: "inactive",
            });
        }

        service.is_active = false;
        self.repo
            .update_service(
                &service,
                Some(&Notification::ServiceStopped { service_id: id }),
                ctx.now,
            )
            .await?;
        Ok(service)
    }

    /// Change the price for future payments only. Works on active or
    /// inactive services.
    pub async fn change_service_price(
        &self,
        ctx: &CallContext,
        id: ServiceId,
        new_price: Amount,
    ) -> Result<Service, AppError> {
        self.require_owner(ctx).await?;

        let mut service = self.require_service(id).await?;
        service.price = new_price;
        self.repo.update_service(&service, None, ctx.now).await?;
        Ok(service)
    }

    /// Change the billing frequency for future payments only. Grants
    /// already issued keep their computed expiration.
    pub async fn change_service_frequency(
        &self,
        ctx: &CallContext,
        id: ServiceId,
        new_frequency: BillingFrequency,
    ) -> Result<Service, AppError> {
        self.require_owner(ctx).await?;

        let mut service = self.require_service(id).await?;
        service.frequency = new_frequency;
        self.repo.update_service(&service, None, ctx.now).await?;
        Ok(service)
    }

    /// Look up a service. Out-of-range ids fail with `NotFound`.
    pub async fn get_service(&self, id: ServiceId) -> Result<Service, AppError> {
        self.require_service(id).await
    }

    /// Number of services ever created (ids range over `0..count`).
    pub async fn count_services(&self) -> Result<i64, AppError> {
        Ok(self.repo.count_services().await?)
    }

    /// The whole catalog in id order.
    pub async fn list_services(&self) -> Result<Vec<Service>, AppError> {
        Ok(self.repo.list_services().await?)
    }
}
