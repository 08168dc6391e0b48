use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{Duration, Utc};
use uuid::Uuid;

use paygate::billing::{
    BillingOutcome, CreateSubscription, SubscriptionService, SubscriptionStatus,
};
use paygate::error::SubscriptionError;
use paygate::gateway::{ChargeRequest, GatewayDecision, RefundRequest, SettlementGateway};
use paygate::notifier::NullNotifier;
use paygate::store::{MemoryStore, SandboxStore};
use paygate::transactions::TransactionService;

struct ApproveAll;

#[async_trait]
impl SettlementGateway for ApproveAll {
    async fn authorize_charge(&self, _request: &ChargeRequest) -> Result<GatewayDecision> {
        Ok(GatewayDecision {
            approved: true,
            message: "approved".to_string(),
            code: None,
        })
    }
    async fn settle_refund(&self, _request: &RefundRequest) -> Result<GatewayDecision> {
        Ok(GatewayDecision {
            approved: true,
            message: "approved".to_string(),
            code: None,
        })
    }
}

struct DeclineCharges;

#[async_trait]
impl SettlementGateway for DeclineCharges {
    async fn authorize_charge(&self, _request: &ChargeRequest) -> Result<GatewayDecision> {
        Ok(GatewayDecision {
            approved: false,
            message: "insufficient funds".to_string(),
            code: Some("insufficient_funds".to_string()),
        })
    }
    async fn settle_refund(&self, _request: &RefundRequest) -> Result<GatewayDecision> {
        Ok(GatewayDecision {
            approved: false,
            message: "declined".to_string(),
            code: None,
        })
    }
}

struct Env {
    store: Arc<dyn SandboxStore>,
    service: Arc<SubscriptionService>,
    merchant_id: Uuid,
    customer_id: Uuid,
}

fn env_with(gateway: Arc<dyn SettlementGateway>) -> Env {
    let (store, merchant_id, customer_id) = MemoryStore::with_sandbox_seed();
    let store: Arc<dyn SandboxStore> = Arc::new(store);
    let transactions = Arc::new(TransactionService::new(store.clone(), gateway));
    let service = Arc::new(SubscriptionService::new(
        store.clone(),
        transactions,
        Arc::new(NullNotifier),
    ));
    Env {
        store,
        service,
        merchant_id,
        customer_id,
    }
}

fn monthly_request(env: &Env, trial_days: Option<u32>) -> CreateSubscription {
    CreateSubscription {
        customer_id: env.customer_id,
        plan_id: Uuid::new_v4(),
        amount: 2_900,
        currency: "USD".to_string(),
        interval: "monthly".to_string(),
        interval_count: 1,
        trial_days,
        metadata: Default::default(),
    }
}

/// Rewinds the billing date so the subscription reads as due right now.
async fn make_due(env: &Env, subscription_id: Uuid) {
    let mut subscription = env
        .store
        .subscription(subscription_id)
        .await
        .unwrap()
        .unwrap();
    subscription.next_billing_date = Utc::now() - Duration::hours(1);
    env.store.update_subscription(&subscription).await.unwrap();
}

#[tokio::test]
async fn creation_sets_period_fields_and_trial_status() {
    let env = env_with(Arc::new(ApproveAll));

    let with_trial = env
        .service
        .create_subscription(env.merchant_id, monthly_request(&env, Some(7)))
        .await
        .unwrap();
    assert_eq!(with_trial.status, SubscriptionStatus::Trialing);
    assert!(with_trial.trial_end.unwrap() > Utc::now());
    assert_eq!(with_trial.billing_cycles_completed, 0);
    assert_eq!(with_trial.next_billing_date, with_trial.current_period_end);

    let without_trial = env
        .service
        .create_subscription(env.merchant_id, monthly_request(&env, None))
        .await
        .unwrap();
    assert_eq!(without_trial.status, SubscriptionStatus::Active);
    assert!(without_trial.trial_end.is_none());
}

#[tokio::test]
async fn creation_validations() {
    let env = env_with(Arc::new(ApproveAll));

    let mut bad_interval = monthly_request(&env, None);
    bad_interval.interval = "fortnightly".to_string();
    let err = env
        .service
        .create_subscription(env.merchant_id, bad_interval)
        .await
        .unwrap_err();
    assert!(matches!(err, SubscriptionError::InvalidInterval(_)));

    let mut zero_count = monthly_request(&env, None);
    zero_count.interval_count = 0;
    let err = env
        .service
        .create_subscription(env.merchant_id, zero_count)
        .await
        .unwrap_err();
    assert!(matches!(err, SubscriptionError::InvalidIntervalCount));

    let mut zero_amount = monthly_request(&env, None);
    zero_amount.amount = 0;
    let err = env
        .service
        .create_subscription(env.merchant_id, zero_amount)
        .await
        .unwrap_err();
    assert!(matches!(err, SubscriptionError::InvalidAmount));

    let mut unknown_customer = monthly_request(&env, None);
    unknown_customer.customer_id = Uuid::new_v4();
    let err = env
        .service
        .create_subscription(env.merchant_id, unknown_customer)
        .await
        .unwrap_err();
    assert!(matches!(err, SubscriptionError::NotFound));

    let err = env
        .service
        .create_subscription(Uuid::new_v4(), monthly_request(&env, None))
        .await
        .unwrap_err();
    assert!(matches!(err, SubscriptionError::Unauthorized));
}

#[tokio::test]
async fn trial_cycles_skip_the_charge_and_repeat_until_trial_ends() {
    let env = env_with(Arc::new(ApproveAll));
    let subscription = env
        .service
        .create_subscription(env.merchant_id, monthly_request(&env, Some(7)))
        .await
        .unwrap();

    // Day 3 of the trial: due but still inside the trial window.
    make_due(&env, subscription.id).await;
    let before = env
        .store
        .subscription(subscription.id)
        .await
        .unwrap()
        .unwrap();
    let outcome = env
        .service
        .process_billing(subscription.id)
        .await
        .unwrap();
    let next = match outcome {
        BillingOutcome::TrialSkipped { next_billing_date } => next_billing_date,
        other => panic!("expected trial skip, got {other:?}"),
    };
    assert_eq!(
        next,
        paygate::billing::next_billing_date(
            before.next_billing_date,
            before.interval,
            before.interval_count
        )
    );

    let after = env
        .store
        .subscription(subscription.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(after.status, SubscriptionStatus::Trialing);
    assert_eq!(after.billing_cycles_completed, 0);
    assert!(after.last_billed_at.is_none());

    // The check only looks at trial_end, so it repeats while the trial runs.
    make_due(&env, subscription.id).await;
    let again = env
        .service
        .process_billing(subscription.id)
        .await
        .unwrap();
    assert!(matches!(again, BillingOutcome::TrialSkipped { .. }));
}

#[tokio::test]
async fn successful_billing_advances_the_cycle() {
    let env = env_with(Arc::new(ApproveAll));
    let subscription = env
        .service
        .create_subscription(env.merchant_id, monthly_request(&env, None))
        .await
        .unwrap();
    make_due(&env, subscription.id).await;

    let outcome = env
        .service
        .process_billing(subscription.id)
        .await
        .unwrap();
    let transaction_id = match outcome {
        BillingOutcome::Billed {
            transaction_id,
            cycle,
        } => {
            assert_eq!(cycle, 1);
            transaction_id
        }
        other => panic!("expected a billed outcome, got {other:?}"),
    };

    let billed = env
        .store
        .subscription(subscription.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(billed.status, SubscriptionStatus::Active);
    assert_eq!(billed.billing_cycles_completed, 1);
    assert!(billed.last_billed_at.is_some());
    assert!(billed.next_billing_date > Utc::now());
    assert_eq!(billed.next_billing_date, billed.current_period_end);

    let transaction = env.store.transaction(transaction_id).await.unwrap().unwrap();
    assert_eq!(transaction.subscription_id, Some(subscription.id));
    assert_eq!(transaction.billing_cycle, Some(1));
    assert_eq!(transaction.amount, 2_900);

    // Freshly advanced, so an immediate second pass is rejected.
    let err = env
        .service
        .process_billing(subscription.id)
        .await
        .unwrap_err();
    assert!(matches!(err, SubscriptionError::NotDue));
}

#[tokio::test]
async fn declined_charge_marks_past_due_without_advancing_anything() {
    let env = env_with(Arc::new(DeclineCharges));
    let subscription = env
        .service
        .create_subscription(env.merchant_id, monthly_request(&env, None))
        .await
        .unwrap();
    make_due(&env, subscription.id).await;
    let before = env
        .store
        .subscription(subscription.id)
        .await
        .unwrap()
        .unwrap();

    let err = env
        .service
        .process_billing(subscription.id)
        .await
        .unwrap_err();
    assert!(matches!(err, SubscriptionError::BillingFailed(_)));

    let after = env
        .store
        .subscription(subscription.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(after.status, SubscriptionStatus::PastDue);
    assert_eq!(after.billing_cycles_completed, 0);
    assert_eq!(after.next_billing_date, before.next_billing_date);
    assert!(after.last_billing_attempt.is_some());
    assert!(after.last_billed_at.is_none());

    // past_due is not billable; it needs an external intervention path.
    let err = env
        .service
        .process_billing(subscription.id)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        SubscriptionError::NotActive {
            current: SubscriptionStatus::PastDue
        }
    ));
}

#[tokio::test]
async fn pause_and_resume_are_symmetric() {
    let env = env_with(Arc::new(ApproveAll));
    let subscription = env
        .service
        .create_subscription(env.merchant_id, monthly_request(&env, None))
        .await
        .unwrap();

    let paused = env
        .service
        .pause_subscription(env.merchant_id, subscription.id, Some("vacation".to_string()))
        .await
        .unwrap();
    assert_eq!(paused.status, SubscriptionStatus::Paused);
    assert!(paused.paused_at.is_some());
    assert_eq!(paused.pause_reason.as_deref(), Some("vacation"));

    // Pausing again is illegal; so is resuming anything not paused.
    let err = env
        .service
        .pause_subscription(env.merchant_id, subscription.id, None)
        .await
        .unwrap_err();
    assert!(matches!(err, SubscriptionError::InvalidStatus { .. }));

    let resumed = env
        .service
        .resume_subscription(env.merchant_id, subscription.id)
        .await
        .unwrap();
    assert_eq!(resumed.status, SubscriptionStatus::Active);
    assert!(resumed.paused_at.is_none());
    assert!(resumed.pause_reason.is_none());
    assert!(resumed.resumed_at.is_some());

    let err = env
        .service
        .resume_subscription(env.merchant_id, subscription.id)
        .await
        .unwrap_err();
    assert!(matches!(err, SubscriptionError::InvalidStatus { .. }));
}

#[tokio::test]
async fn reactivation_is_only_legal_from_cancelled() {
    let env = env_with(Arc::new(ApproveAll));
    let subscription = env
        .service
        .create_subscription(env.merchant_id, monthly_request(&env, None))
        .await
        .unwrap();

    let err = env
        .service
        .reactivate_subscription(env.merchant_id, subscription.id)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        SubscriptionError::InvalidStatus {
            current: SubscriptionStatus::Active
        }
    ));

    env.service
        .cancel_subscription(
            env.merchant_id,
            subscription.id,
            false,
            Some("too expensive".to_string()),
        )
        .await
        .unwrap();

    let reactivated = env
        .service
        .reactivate_subscription(env.merchant_id, subscription.id)
        .await
        .unwrap();
    assert_eq!(reactivated.status, SubscriptionStatus::Active);
    assert!(reactivated.cancelled_at.is_none());
    assert!(reactivated.cancellation_reason.is_none());
    assert!(reactivated.reactivated_at.is_some());
}

#[tokio::test]
async fn immediate_cancel_is_terminal_for_billing() {
    let env = env_with(Arc::new(ApproveAll));
    let subscription = env
        .service
        .create_subscription(env.merchant_id, monthly_request(&env, None))
        .await
        .unwrap();

    let cancelled = env
        .service
        .cancel_subscription(env.merchant_id, subscription.id, false, None)
        .await
        .unwrap();
    assert_eq!(cancelled.status, SubscriptionStatus::Cancelled);
    assert!(cancelled.cancelled_at.is_some());

    let err = env
        .service
        .cancel_subscription(env.merchant_id, subscription.id, false, None)
        .await
        .unwrap_err();
    assert!(matches!(err, SubscriptionError::InvalidStatus { .. }));

    make_due(&env, subscription.id).await;
    let err = env
        .service
        .process_billing(subscription.id)
        .await
        .unwrap_err();
    assert!(matches!(err, SubscriptionError::NotActive { .. }));
}

#[tokio::test]
async fn period_end_cancel_stores_the_flag_without_flipping_status() {
    let env = env_with(Arc::new(ApproveAll));
    let subscription = env
        .service
        .create_subscription(env.merchant_id, monthly_request(&env, None))
        .await
        .unwrap();

    let scheduled = env
        .service
        .cancel_subscription(
            env.merchant_id,
            subscription.id,
            true,
            Some("churn".to_string()),
        )
        .await
        .unwrap();
    assert_eq!(scheduled.status, SubscriptionStatus::Active);
    assert!(scheduled.cancel_at_period_end);
    assert!(scheduled.cancelled_at.is_none());
    assert_eq!(scheduled.cancellation_reason.as_deref(), Some("churn"));
}

#[tokio::test]
async fn amount_update_applies_to_the_next_cycle() {
    let env = env_with(Arc::new(ApproveAll));
    let subscription = env
        .service
        .create_subscription(env.merchant_id, monthly_request(&env, None))
        .await
        .unwrap();

    let updated = env
        .service
        .update_subscription_amount(env.merchant_id, subscription.id, 4_900)
        .await
        .unwrap();
    assert_eq!(updated.amount, 4_900);

    make_due(&env, subscription.id).await;
    let outcome = env
        .service
        .process_billing(subscription.id)
        .await
        .unwrap();
    let transaction_id = match outcome {
        BillingOutcome::Billed { transaction_id, .. } => transaction_id,
        other => panic!("expected a billed outcome, got {other:?}"),
    };
    let transaction = env.store.transaction(transaction_id).await.unwrap().unwrap();
    assert_eq!(transaction.amount, 4_900);

    // Amount changes are only legal while active.
    env.service
        .pause_subscription(env.merchant_id, subscription.id, None)
        .await
        .unwrap();
    let err = env
        .service
        .update_subscription_amount(env.merchant_id, subscription.id, 5_900)
        .await
        .unwrap_err();
    assert!(matches!(err, SubscriptionError::InvalidStatus { .. }));
}
