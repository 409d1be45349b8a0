mod common;

use anyhow::Result;
use common::{at, test_ledger};
use tollgate::application::{AccessController, AppError, CallContext};
use tollgate::domain::BillingFrequency;
use uuid::Uuid;

#[tokio::test]
async fn test_exact_payment_grants_access() -> Result<()> {
    let (ledger, _temp) = test_ledger().await?;
    let client = Uuid::new_v4();

    ledger
        .registry
        .create_service(&ledger.owner_ctx(), 5, BillingFrequency::Monthly)
        .await?;

    let ctx = CallContext::new(client, at(1_000));
    let receipt = ledger.payments.pay_service(&ctx, 0, 5).await?;

    assert_eq!(receipt.payment.amount, 5);
    assert_eq!(receipt.payment.client, client);
    assert!(ledger.access.get_access(0, client).await?);

    // expiration = payment time + 30 fixed days, exactly
    assert_eq!(
        ledger.access.get_expiration_date(0, client).await?,
        Some(at(1_000 + 30 * 86_400))
    );

    let events = ledger.repo.list_events(None).await?;
    assert_eq!(events.last().unwrap().notification.kind(), "access_given");
    // The event carries the payment instant, not the wall clock
    assert_eq!(events.last().unwrap().recorded_at, at(1_000));
    assert_eq!(ledger.payments.collected_balance().await?, 5);

    Ok(())
}

#[tokio::test]
async fn test_payment_wrong_value_rejected_without_side_effects() -> Result<()> {
    let (ledger, _temp) = test_ledger().await?;
    let client = Uuid::new_v4();

    ledger
        .registry
        .create_service(&ledger.owner_ctx(), 100, BillingFrequency::Monthly)
        .await?;

    let ctx = CallContext::new(client, at(1_000));
    for value in [0, 99, 101, 1_000] {
        let result = ledger.payments.pay_service(&ctx, 0, value).await;
        assert!(matches!(result, Err(AppError::InvalidPayment { .. })));
    }

    assert!(!ledger.access.get_access(0, client).await?);
    assert_eq!(ledger.payments.collected_balance().await?, 0);
    assert!(ledger.payments.list_payments().await?.is_empty());

    // Only the creation notification exists
    let events = ledger.repo.list_events(None).await?;
    assert_eq!(events.len(), 1);

    Ok(())
}

#[tokio::test]
async fn test_payment_for_unknown_service_fails() -> Result<()> {
    let (ledger, _temp) = test_ledger().await?;
    let ctx = CallContext::new(Uuid::new_v4(), at(1_000));

    let result = ledger.payments.pay_service(&ctx, 3, 100).await;
    assert!(matches!(result, Err(AppError::NotFound(3))));

    Ok(())
}

#[tokio::test]
async fn test_payment_for_inactive_service_fails() -> Result<()> {
    let (ledger, _temp) = test_ledger().await?;
    let client = Uuid::new_v4();

    ledger
        .registry
        .create_service(&ledger.owner_ctx(), 100, BillingFrequency::Monthly)
        .await?;
    ledger.registry.stop_service(&ledger.owner_ctx(), 0).await?;

    let ctx = CallContext::new(client, at(1_000));
    let result = ledger.payments.pay_service(&ctx, 0, 100).await;
    assert!(matches!(result, Err(AppError::InvalidState { .. })));
    assert!(!ledger.access.get_access(0, client).await?);

    Ok(())
}

#[tokio::test]
async fn test_second_payment_while_access_held_fails() -> Result<()> {
    let (ledger, _temp) = test_ledger().await?;
    let client = Uuid::new_v4();

    ledger
        .registry
        .create_service(&ledger.owner_ctx(), 100, BillingFrequency::Yearly)
        .await?;

    let ctx = CallContext::new(client, at(1_000));
    ledger.payments.pay_service(&ctx, 0, 100).await?;

    // Exact value or not, a held grant blocks repurchase
    let result = ledger.payments.pay_service(&ctx.at(at(2_000)), 0, 100).await;
    assert!(matches!(result, Err(AppError::AlreadyGranted { .. })));

    assert_eq!(ledger.payments.collected_balance().await?, 100);
    assert_eq!(ledger.payments.list_payments().await?.len(), 1);

    Ok(())
}

#[tokio::test]
async fn test_pay_on_behalf_of_named_client() -> Result<()> {
    let (ledger, _temp) = test_ledger().await?;
    let payer = Uuid::new_v4();
    let client = Uuid::new_v4();

    ledger
        .registry
        .create_service(&ledger.owner_ctx(), 40, BillingFrequency::Monthly)
        .await?;

    let ctx = CallContext::new(payer, at(1_000));
    let receipt = ledger.payments.pay_service_from(&ctx, 0, client, 40).await?;

    assert_eq!(receipt.payment.payer, payer);
    assert_eq!(receipt.payment.client, client);
    assert!(ledger.access.get_access(0, client).await?);
    assert!(!ledger.access.get_access(0, payer).await?);

    Ok(())
}

#[tokio::test]
async fn test_pay_on_behalf_of_zero_client_fails() -> Result<()> {
    let (ledger, _temp) = test_ledger().await?;

    ledger
        .registry
        .create_service(&ledger.owner_ctx(), 40, BillingFrequency::Monthly)
        .await?;

    let ctx = CallContext::new(Uuid::new_v4(), at(1_000));
    let result = ledger
        .payments
        .pay_service_from(&ctx, 0, Uuid::nil(), 40)
        .await;
    assert!(matches!(result, Err(AppError::InvalidAddress)));
    assert_eq!(ledger.payments.collected_balance().await?, 0);

    Ok(())
}

#[tokio::test]
async fn test_price_change_is_forward_only() -> Result<()> {
    let (ledger, _temp) = test_ledger().await?;
    let first = Uuid::new_v4();
    let second = Uuid::new_v4();

    ledger
        .registry
        .create_service(&ledger.owner_ctx(), 100, BillingFrequency::Monthly)
        .await?;

    ledger
        .payments
        .pay_service(&CallContext::new(first, at(1_000)), 0, 100)
        .await?;

    ledger
        .registry
        .change_service_price(&ledger.owner_ctx(), 0, 150)
        .await?;
    ledger
        .registry
        .change_service_frequency(&ledger.owner_ctx(), 0, BillingFrequency::Yearly)
        .await?;

    // The old price no longer clears
    let result = ledger
        .payments
        .pay_service(&CallContext::new(second, at(2_000)), 0, 100)
        .await;
    assert!(matches!(result, Err(AppError::InvalidPayment { .. })));

    // New price buys the new duration
    ledger
        .payments
        .pay_service(&CallContext::new(second, at(2_000)), 0, 150)
        .await?;
    assert_eq!(
        ledger.access.get_expiration_date(0, second).await?,
        Some(at(2_000 + 365 * 86_400))
    );

    // The grant issued before the change keeps its computed expiration
    assert_eq!(
        ledger.access.get_expiration_date(0, first).await?,
        Some(at(1_000 + 30 * 86_400))
    );

    Ok(())
}

#[tokio::test]
async fn test_one_time_payment_buys_long_lived_access() -> Result<()> {
    let (ledger, _temp) = test_ledger().await?;
    let client = Uuid::new_v4();

    ledger
        .registry
        .create_service(&ledger.owner_ctx(), 1_000, BillingFrequency::OneTime)
        .await?;

    ledger
        .payments
        .pay_service(&CallContext::new(client, at(0)), 0, 1_000)
        .await?;

    assert_eq!(
        ledger.access.get_expiration_date(0, client).await?,
        Some(at(36_500 * 86_400))
    );

    Ok(())
}

#[tokio::test]
async fn test_withdraw_funds() -> Result<()> {
    let (ledger, _temp) = test_ledger().await?;
    let client = Uuid::new_v4();

    ledger
        .registry
        .create_service(&ledger.owner_ctx(), 100, BillingFrequency::Monthly)
        .await?;

    // Nothing to withdraw yet
    let result = ledger.payments.withdraw_funds(&ledger.owner_ctx()).await;
    assert!(matches!(result, Err(AppError::TransferFailed(_))));

    ledger
        .payments
        .pay_service(&CallContext::new(client, at(1_000)), 0, 100)
        .await?;

    // Non-owner cannot withdraw
    let stranger = CallContext::current(Uuid::new_v4());
    let result = ledger.payments.withdraw_funds(&stranger).await;
    assert!(matches!(result, Err(AppError::Unauthorized(_))));
    assert_eq!(ledger.payments.collected_balance().await?, 100);

    // Owner empties the balance exactly once
    let withdrawal = ledger.payments.withdraw_funds(&ledger.owner_ctx()).await?;
    assert_eq!(withdrawal.amount, 100);
    assert_eq!(withdrawal.recipient, ledger.config.registry_owner);
    assert_eq!(ledger.payments.collected_balance().await?, 0);

    let result = ledger.payments.withdraw_funds(&ledger.owner_ctx()).await;
    assert!(matches!(result, Err(AppError::TransferFailed(_))));

    Ok(())
}

#[tokio::test]
async fn test_change_access_contract_guards() -> Result<()> {
    let (ledger, _temp) = test_ledger().await?;
    let stranger = CallContext::current(Uuid::new_v4());

    let result = ledger
        .payments
        .change_access_contract(&stranger, Uuid::new_v4())
        .await;
    assert!(matches!(result, Err(AppError::Unauthorized(_))));

    let result = ledger
        .payments
        .change_access_contract(&ledger.owner_ctx(), Uuid::nil())
        .await;
    assert!(matches!(result, Err(AppError::InvalidAddress)));

    ledger
        .payments
        .change_access_contract(&ledger.owner_ctx(), Uuid::new_v4())
        .await?;

    Ok(())
}

#[tokio::test]
async fn test_relinked_payment_contract_blocks_orchestrator() -> Result<()> {
    let (ledger, _temp) = test_ledger().await?;
    let client = Uuid::new_v4();

    ledger
        .registry
        .create_service(&ledger.owner_ctx(), 100, BillingFrequency::Monthly)
        .await?;

    // Point the access ledger at some other manager
    ledger
        .access
        .set_payment_contract(&ledger.owner_ctx(), Uuid::new_v4())
        .await?;

    // The orchestrator's grant is refused, so the whole payment fails
    // and no value is retained
    let result = ledger
        .payments
        .pay_service(&CallContext::new(client, at(1_000)), 0, 100)
        .await;
    assert!(matches!(result, Err(AppError::Unauthorized(_))));
    assert!(!ledger.access.get_access(0, client).await?);
    assert_eq!(ledger.payments.collected_balance().await?, 0);

    // Relinking restores the payment path
    ledger
        .access
        .set_payment_contract(&ledger.owner_ctx(), ledger.config.orchestrator_id)
        .await?;
    ledger
        .payments
        .pay_service(&CallContext::new(client, at(2_000)), 0, 100)
        .await?;
    assert!(ledger.access.get_access(0, client).await?);

    Ok(())
}

#[tokio::test]
async fn test_relinked_access_contract_blocks_payment() -> Result<()> {
    let (ledger, _temp) = test_ledger().await?;
    let client = Uuid::new_v4();

    ledger
        .registry
        .create_service(&ledger.owner_ctx(), 100, BillingFrequency::Monthly)
        .await?;

    // Point the orchestrator's access-ledger reference elsewhere
    ledger
        .payments
        .change_access_contract(&ledger.owner_ctx(), Uuid::new_v4())
        .await?;

    // There is no ledger at that reference, so the payment fails before
    // any value is retained or any grant recorded
    let result = ledger
        .payments
        .pay_service(&CallContext::new(client, at(1_000)), 0, 100)
        .await;
    assert!(matches!(result, Err(AppError::TransferFailed(_))));
    assert!(!ledger.access.get_access(0, client).await?);
    assert_eq!(ledger.payments.collected_balance().await?, 0);

    // Pointing it back at the access ledger restores the payment path
    ledger
        .payments
        .change_access_contract(&ledger.owner_ctx(), ledger.config.access_ledger_id)
        .await?;
    ledger
        .payments
        .pay_service(&CallContext::new(client, at(2_000)), 0, 100)
        .await?;
    assert!(ledger.access.get_access(0, client).await?);

    Ok(())
}

/// Grant and receipt settle in one transaction: a storage fault on the
/// receipt write must roll the grant back too.
#[tokio::test]
async fn test_failed_receipt_write_rolls_back_grant() -> Result<()> {
    let (ledger, _temp) = test_ledger().await?;
    let client = Uuid::new_v4();

    ledger
        .registry
        .create_service(&ledger.owner_ctx(), 100, BillingFrequency::Monthly)
        .await?;

    // Break the receipt write out from under the orchestrator
    let pool = sqlx::SqlitePool::connect(&ledger.database_url).await?;
    sqlx::query("DROP TABLE payments").execute(&pool).await?;

    let result = ledger
        .payments
        .pay_service(&CallContext::new(client, at(1_000)), 0, 100)
        .await;
    assert!(result.is_err());

    // No access without a receipt, and no stray access_given event
    assert!(!ledger.access.get_access(0, client).await?);
    let events = ledger.repo.list_events(None).await?;
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].notification.kind(), "service_created");

    Ok(())
}
