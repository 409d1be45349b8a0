use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{
    collected_for_service, compute_balance, AccessGrant, Amount, BillingFrequency, Payment,
    Service, ServiceId, Withdrawal,
};
use crate::storage::Repository;

use super::AppError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RevenueReport {
    pub services: Vec<ServiceRevenue>,
    pub total_collected: Amount,
    pub total_withdrawn: Amount,
    pub balance: Amount,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceRevenue {
    pub service_id: ServiceId,
    pub is_active: bool,
    pub price: Amount,
    pub frequency: BillingFrequency,
    pub payment_count: i64,
    pub collected: Amount,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntegrityReport {
    pub service_count: i64,
    pub grant_count: i64,
    /// Grants currently flagged as held.
    pub live_grant_count: i64,
    /// Held grants whose expiration has passed but which were never
    /// inspected. Expected under lazy expiry.
    pub stale_grant_count: i64,
    /// Grant records referencing ids outside the catalog.
    pub orphan_grant_count: i64,
    /// Held grants missing an expiration timestamp. Must always be zero.
    pub grants_missing_expiration: i64,
    pub payment_count: i64,
    pub withdrawal_count: i64,
    pub balance: Amount,
    pub is_consistent: bool,
}

/// Per-service revenue aggregation over the payment ledger.
pub fn build_revenue_report(
    services: &[Service],
    payments: &[Payment],
    withdrawals: &[Withdrawal],
) -> RevenueReport {
    let service_revenues = services
        .iter()
        .map(|service| {
            let payment_count = payments
                .iter()
                .filter(|p| p.service_id == service.id)
                .count() as i64;
            ServiceRevenue {
                service_id: service.id,
                is_active: service.is_active,
                price: service.price,
                frequency: service.frequency,
                payment_count,
                collected: collected_for_service(service.id, payments),
            }
        })
        .collect();

    let total_collected: Amount = payments.iter().map(|p| p.amount).sum();
    let total_withdrawn: Amount = withdrawals.iter().map(|w| w.amount).sum();

    RevenueReport {
        services: service_revenues,
        total_collected,
        total_withdrawn,
        balance: compute_balance(payments, withdrawals),
    }
}

/// Read-only invariant scan over the whole database.
pub fn build_integrity_report(
    services: &[Service],
    grants: &[AccessGrant],
    payments: &[Payment],
    withdrawals: &[Withdrawal],
    now: DateTime<Utc>,
) -> IntegrityReport {
    let service_count = services.len() as i64;
    let live_grant_count = grants.iter().filter(|g| g.has_access).count() as i64;
    let stale_grant_count = grants.iter().filter(|g| g.is_expired(now)).count() as i64;
    let orphan_grant_count = grants
        .iter()
        .filter(|g| g.service_id < 0 || g.service_id >= service_count)
        .count() as i64;
    let grants_missing_expiration = grants
        .iter()
        .filter(|g| g.has_access && g.expires_at.is_none())
        .count() as i64;
    let balance = compute_balance(payments, withdrawals);

    IntegrityReport {
        service_count,
        grant_count: grants.len() as i64,
        live_grant_count,
        stale_grant_count,
        orphan_grant_count,
        grants_missing_expiration,
        payment_count: payments.len() as i64,
        withdrawal_count: withdrawals.len() as i64,
        balance,
        is_consistent: orphan_grant_count == 0 && grants_missing_expiration == 0 && balance >= 0,
    }
}

/// Build the revenue report from live data.
pub async fn revenue_report(repo: &Repository) -> Result<RevenueReport, AppError> {
    let services = repo.list_services().await?;
    let payments = repo.list_payments().await?;
    let withdrawals = repo.list_withdrawals().await?;
    Ok(build_revenue_report(&services, &payments, &withdrawals))
}

/// Build the integrity report from live data.
pub async fn integrity_report(
    repo: &Repository,
    now: DateTime<Utc>,
) -> Result<IntegrityReport, AppError> {
    let services = repo.list_services().await?;
    let grants = repo.list_grants().await?;
    let payments = repo.list_payments().await?;
    let withdrawals = repo.list_withdrawals().await?;
    Ok(build_integrity_report(
        &services,
        &grants,
        &payments,
        &withdrawals,
        now,
    ))
}
