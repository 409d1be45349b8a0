// Allow dead_code because these helpers are used across different test files
// which are compiled separately
#![allow(dead_code)]

use anyhow::Result;
use chrono::{DateTime, Utc};
use tempfile::TempDir;
use tollgate::application::{
    bootstrap_ledger, AccessService, CallContext, PaymentService, RegistryService,
};
use tollgate::storage::{LedgerConfig, Repository};
use uuid::Uuid;

/// A fully wired ledger over a temporary database.
pub struct TestLedger {
    pub repo: Repository,
    pub database_url: String,
    pub config: LedgerConfig,
    pub registry: RegistryService,
    pub access: AccessService,
    pub payments: PaymentService<AccessService>,
}

impl TestLedger {
    /// Context for the owner at the wall clock.
    pub fn owner_ctx(&self) -> CallContext {
        CallContext::current(self.config.registry_owner)
    }

    /// Context for the owner at a fixed instant.
    pub fn owner_ctx_at(&self, now: DateTime<Utc>) -> CallContext {
        CallContext::new(self.config.registry_owner, now)
    }
}

/// Helper to create a bootstrapped ledger with a temporary database.
pub async fn test_ledger() -> Result<(TestLedger, TempDir)> {
    let temp_dir = TempDir::new()?;
    let db_path = temp_dir.path().join("test.db");
    let db_url = format!("sqlite:{}?mode=rwc", db_path.to_str().unwrap());

    let repo = Repository::init(&db_url).await?;
    let owner = Uuid::new_v4();
    let config = bootstrap_ledger(&repo, owner, owner).await?;

    let registry = RegistryService::new(repo.clone());
    let access = AccessService::new(repo.clone());
    let payments = PaymentService::new(repo.clone(), AccessService::new(repo.clone()));

    Ok((
        TestLedger {
            repo,
            database_url: db_url,
            config,
            registry,
            access,
            payments,
        },
        temp_dir,
    ))
}

/// Fixed instant for deterministic expiration arithmetic.
pub fn at(secs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(secs, 0).unwrap()
}
