use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::SubscriptionError;
use crate::locks::KeyedLocks;
use crate::notifier::EventNotifier;
use crate::refunds::models::Metadata;
use crate::store::SandboxStore;
use crate::transactions::models::TransactionStatus;
use crate::transactions::TransactionService;

use super::clock::next_billing_date;
use super::models::{BillingInterval, BillingOutcome, Subscription, SubscriptionStatus};

#[derive(Debug, Clone, Deserialize)]
pub struct CreateSubscription {
    pub customer_id: Uuid,
    pub plan_id: Uuid,
    pub amount: i64,
    pub currency: String,
    pub interval: String,
    #[serde(default = "default_interval_count")]
    pub interval_count: u32,
    #[serde(default)]
    pub trial_days: Option<u32>,
    #[serde(default)]
    pub metadata: Metadata,
}

fn default_interval_count() -> u32 {
    1
}

/// key: subscription-lifecycle -> state machine owner
///
/// `trialing -> active`; `active -> past_due -> active`; `active <-> paused`;
/// any non-cancelled `-> cancelled -> active` (reactivate only). Billing for
/// the same subscription id serializes on a per-key lock.
pub struct SubscriptionService {
    store: Arc<dyn SandboxStore>,
    transactions: Arc<TransactionService>,
    notifier: Arc<dyn EventNotifier>,
    locks: KeyedLocks,
}

impl SubscriptionService {
    pub fn new(
        store: Arc<dyn SandboxStore>,
        transactions: Arc<TransactionService>,
        notifier: Arc<dyn EventNotifier>,
    ) -> Self {
        Self {
            store,
            transactions,
            notifier,
            locks: KeyedLocks::new(),
        }
    }

    async fn notify(&self, event: &str, merchant_id: Uuid, payload: Value) {
        if let Err(err) = self.notifier.emit(event, merchant_id, payload).await {
            warn!(?err, event, "event notification failed");
        }
    }

    pub async fn create_subscription(
        &self,
        merchant_id: Uuid,
        request: CreateSubscription,
    ) -> Result<Subscription, SubscriptionError> {
        if !self.store.merchant_is_active(merchant_id).await? {
            return Err(SubscriptionError::Unauthorized);
        }
        if !self.store.customer_is_active(request.customer_id).await? {
            return Err(SubscriptionError::NotFound);
        }
        if request.amount <= 0 {
            return Err(SubscriptionError::InvalidAmount);
        }
        let interval = BillingInterval::from_str(&request.interval)
            .map_err(|_| SubscriptionError::InvalidInterval(request.interval.clone()))?;
        if request.interval_count < 1 {
            return Err(SubscriptionError::InvalidIntervalCount);
        }
        let interval_count = request.interval_count;

        let now = Utc::now();
        let trial_days = request.trial_days.unwrap_or(0);
        let (status, trial_start, trial_end) = if trial_days > 0 {
            (
                SubscriptionStatus::Trialing,
                Some(now),
                Some(now + Duration::days(i64::from(trial_days))),
            )
        } else {
            (SubscriptionStatus::Active, None, None)
        };
        let period_end = next_billing_date(now, interval, interval_count);

        let subscription = Subscription {
            id: Uuid::new_v4(),
            merchant_id,
            customer_id: request.customer_id,
            plan_id: request.plan_id,
            amount: request.amount,
            currency: request.currency,
            interval,
            interval_count,
            status,
            current_period_start: now,
            current_period_end: period_end,
            next_billing_date: period_end,
            trial_start,
            trial_end,
            billing_cycles_completed: 0,
            cancel_at_period_end: false,
            cancelled_at: None,
            paused_at: None,
            resumed_at: None,
            reactivated_at: None,
            pause_reason: None,
            cancellation_reason: None,
            last_billed_at: None,
            last_billing_attempt: None,
            metadata: request.metadata,
            created_at: now,
            updated_at: now,
        };
        self.store.insert_subscription(&subscription).await?;
        info!(
            subscription = %subscription.id,
            merchant = %merchant_id,
            status = %subscription.status,
            "subscription created"
        );
        self.notify("subscription.created", merchant_id, json!(&subscription))
            .await;
        Ok(subscription)
    }

    pub async fn process_billing(
        &self,
        subscription_id: Uuid,
    ) -> Result<BillingOutcome, SubscriptionError> {
        self.process_billing_at(subscription_id, Utc::now()).await
    }

    /// Runs one billing cycle for a due subscription. On settlement failure
    /// `next_billing_date` is deliberately left unchanged so the record stays
    /// due; see DESIGN.md on the past_due self-healing gap.
    pub async fn process_billing_at(
        &self,
        subscription_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<BillingOutcome, SubscriptionError> {
        let _guard = self.locks.acquire(subscription_id).await;
        let mut subscription = self
            .store
            .subscription(subscription_id)
            .await?
            .ok_or(SubscriptionError::NotFound)?;

        if !subscription.status.is_billable() {
            return Err(SubscriptionError::NotActive {
                current: subscription.status,
            });
        }
        if subscription.next_billing_date > now {
            return Err(SubscriptionError::NotDue);
        }

        // Trial branch: advance the clock without charging. The check only
        // examines trial_end, so it repeats every cycle until the trial ends.
        if subscription.in_trial(now) {
            subscription.next_billing_date = next_billing_date(
                subscription.next_billing_date,
                subscription.interval,
                subscription.interval_count,
            );
            subscription.updated_at = now;
            self.store.update_subscription(&subscription).await?;
            info!(
                subscription = %subscription.id,
                next_billing = %subscription.next_billing_date,
                "trial cycle skipped without charge"
            );
            return Ok(BillingOutcome::TrialSkipped {
                next_billing_date: subscription.next_billing_date,
            });
        }

        let cycle = subscription.billing_cycles_completed + 1;
        let transaction = match self
            .transactions
            .create(
                subscription.merchant_id,
                subscription.amount,
                &subscription.currency,
                Some(subscription.id),
                Some(cycle),
            )
            .await
        {
            Ok(transaction) => transaction,
            Err(err) => {
                self.record_billing_failure(&mut subscription, now).await?;
                return Err(SubscriptionError::CreationError(err.to_string()));
            }
        };

        let settled = match self.transactions.settle(transaction.id).await {
            Ok(settled) => settled,
            Err(err) => {
                self.record_billing_failure(&mut subscription, now).await?;
                return Err(SubscriptionError::BillingFailed(err.to_string()));
            }
        };

        if settled.status == TransactionStatus::Success {
            subscription.billing_cycles_completed = cycle;
            subscription.last_billed_at = Some(now);
            subscription.current_period_start = now;
            let period_end = next_billing_date(
                now,
                subscription.interval,
                subscription.interval_count,
            );
            subscription.current_period_end = period_end;
            subscription.next_billing_date = period_end;
            subscription.status = SubscriptionStatus::Active;
            subscription.updated_at = now;
            self.store.update_subscription(&subscription).await?;
            info!(
                subscription = %subscription.id,
                transaction = %settled.id,
                cycle,
                "billing cycle settled"
            );
            self.notify(
                "subscription.billed",
                subscription.merchant_id,
                json!({
                    "subscription": &subscription,
                    "transaction_id": settled.id,
                    "cycle": cycle,
                }),
            )
            .await;
            Ok(BillingOutcome::Billed {
                transaction_id: settled.id,
                cycle,
            })
        } else {
            let message = settled
                .gateway_message
                .clone()
                .unwrap_or_else(|| "charge declined".to_string());
            self.record_billing_failure(&mut subscription, now).await?;
            Err(SubscriptionError::BillingFailed(message))
        }
    }

    async fn record_billing_failure(
        &self,
        subscription: &mut Subscription,
        now: DateTime<Utc>,
    ) -> Result<(), SubscriptionError> {
        subscription.status = SubscriptionStatus::PastDue;
        subscription.last_billing_attempt = Some(now);
        subscription.updated_at = now;
        self.store.update_subscription(subscription).await?;
        warn!(
            subscription = %subscription.id,
            "billing failed; subscription marked past_due"
        );
        self.notify(
            "subscription.billing_failed",
            subscription.merchant_id,
            json!(&subscription),
        )
        .await;
        Ok(())
    }

    pub async fn cancel_subscription(
        &self,
        merchant_id: Uuid,
        subscription_id: Uuid,
        cancel_at_period_end: bool,
        reason: Option<String>,
    ) -> Result<Subscription, SubscriptionError> {
        let _guard = self.locks.acquire(subscription_id).await;
        let mut subscription = self
            .owned_subscription(merchant_id, subscription_id)
            .await?;
        if subscription.status == SubscriptionStatus::Cancelled {
            return Err(SubscriptionError::InvalidStatus {
                current: subscription.status,
            });
        }

        let now = Utc::now();
        if cancel_at_period_end {
            // Deferred: the billing runner flips the status once the period
            // boundary passes.
            subscription.cancel_at_period_end = true;
            subscription.cancellation_reason = reason;
            subscription.updated_at = now;
            self.store.update_subscription(&subscription).await?;
            self.notify(
                "subscription.cancel_scheduled",
                merchant_id,
                json!(&subscription),
            )
            .await;
            return Ok(subscription);
        }

        subscription.status = SubscriptionStatus::Cancelled;
        subscription.cancelled_at = Some(now);
        subscription.cancellation_reason = reason;
        subscription.updated_at = now;
        self.store.update_subscription(&subscription).await?;
        info!(subscription = %subscription.id, "subscription cancelled");
        self.notify("subscription.cancelled", merchant_id, json!(&subscription))
            .await;
        Ok(subscription)
    }

    /// Runner-side completion of a deferred cancellation.
    pub(crate) async fn finalize_period_end_cancellation(
        &self,
        subscription_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Option<Subscription>, SubscriptionError> {
        let _guard = self.locks.acquire(subscription_id).await;
        let mut subscription = self
            .store
            .subscription(subscription_id)
            .await?
            .ok_or(SubscriptionError::NotFound)?;
        if !subscription.cancel_at_period_end
            || subscription.status == SubscriptionStatus::Cancelled
            || subscription.current_period_end > now
        {
            return Ok(None);
        }
        subscription.status = SubscriptionStatus::Cancelled;
        subscription.cancelled_at = Some(now);
        subscription.updated_at = now;
        self.store.update_subscription(&subscription).await?;
        info!(
            subscription = %subscription.id,
            "period-end cancellation finalized"
        );
        self.notify(
            "subscription.cancelled",
            subscription.merchant_id,
            json!(&subscription),
        )
        .await;
        Ok(Some(subscription))
    }

    /// Legal only from `cancelled`. Does not recompute `next_billing_date`;
    /// the caller must ensure it is still meaningful.
    pub async fn reactivate_subscription(
        &self,
        merchant_id: Uuid,
        subscription_id: Uuid,
    ) -> Result<Subscription, SubscriptionError> {
        let _guard = self.locks.acquire(subscription_id).await;
        let mut subscription = self
            .owned_subscription(merchant_id, subscription_id)
            .await?;
        if subscription.status != SubscriptionStatus::Cancelled {
            return Err(SubscriptionError::InvalidStatus {
                current: subscription.status,
            });
        }

        let now = Utc::now();
        subscription.status = SubscriptionStatus::Active;
        subscription.cancelled_at = None;
        subscription.cancellation_reason = None;
        subscription.cancel_at_period_end = false;
        subscription.reactivated_at = Some(now);
        subscription.updated_at = now;
        self.store.update_subscription(&subscription).await?;
        self.notify(
            "subscription.reactivated",
            merchant_id,
            json!(&subscription),
        )
        .await;
        Ok(subscription)
    }

    pub async fn pause_subscription(
        &self,
        merchant_id: Uuid,
        subscription_id: Uuid,
        reason: Option<String>,
    ) -> Result<Subscription, SubscriptionError> {
        let _guard = self.locks.acquire(subscription_id).await;
        let mut subscription = self
            .owned_subscription(merchant_id, subscription_id)
            .await?;
        if subscription.status != SubscriptionStatus::Active {
            return Err(SubscriptionError::InvalidStatus {
                current: subscription.status,
            });
        }

        let now = Utc::now();
        subscription.status = SubscriptionStatus::Paused;
        subscription.paused_at = Some(now);
        subscription.pause_reason = reason;
        subscription.resumed_at = None;
        subscription.updated_at = now;
        self.store.update_subscription(&subscription).await?;
        self.notify("subscription.paused", merchant_id, json!(&subscription))
            .await;
        Ok(subscription)
    }

    pub async fn resume_subscription(
        &self,
        merchant_id: Uuid,
        subscription_id: Uuid,
    ) -> Result<Subscription, SubscriptionError> {
        let _guard = self.locks.acquire(subscription_id).await;
        let mut subscription = self
            .owned_subscription(merchant_id, subscription_id)
            .await?;
        if subscription.status != SubscriptionStatus::Paused {
            return Err(SubscriptionError::InvalidStatus {
                current: subscription.status,
            });
        }

        let now = Utc::now();
        subscription.status = SubscriptionStatus::Active;
        subscription.resumed_at = Some(now);
        subscription.paused_at = None;
        subscription.pause_reason = None;
        subscription.updated_at = now;
        self.store.update_subscription(&subscription).await?;
        self.notify("subscription.resumed", merchant_id, json!(&subscription))
            .await;
        Ok(subscription)
    }

    /// Takes effect on the next cycle; the current cycle was already billed
    /// at the old amount.
    pub async fn update_subscription_amount(
        &self,
        merchant_id: Uuid,
        subscription_id: Uuid,
        new_amount: i64,
    ) -> Result<Subscription, SubscriptionError> {
        if new_amount <= 0 {
            return Err(SubscriptionError::InvalidAmount);
        }
        let _guard = self.locks.acquire(subscription_id).await;
        let mut subscription = self
            .owned_subscription(merchant_id, subscription_id)
            .await?;
        if subscription.status != SubscriptionStatus::Active {
            return Err(SubscriptionError::InvalidStatus {
                current: subscription.status,
            });
        }

        let old_amount = subscription.amount;
        subscription.amount = new_amount;
        subscription.updated_at = Utc::now();
        self.store.update_subscription(&subscription).await?;
        self.notify(
            "subscription.updated",
            merchant_id,
            json!({
                "subscription": &subscription,
                "old_amount": old_amount,
                "new_amount": new_amount,
            }),
        )
        .await;
        Ok(subscription)
    }

    pub async fn fetch(
        &self,
        merchant_id: Uuid,
        subscription_id: Uuid,
    ) -> Result<Subscription, SubscriptionError> {
        self.owned_subscription(merchant_id, subscription_id).await
    }

    async fn owned_subscription(
        &self,
        merchant_id: Uuid,
        subscription_id: Uuid,
    ) -> Result<Subscription, SubscriptionError> {
        let subscription = self
            .store
            .subscription(subscription_id)
            .await?
            .ok_or(SubscriptionError::NotFound)?;
        if subscription.merchant_id != merchant_id {
            return Err(SubscriptionError::Unauthorized);
        }
        Ok(subscription)
    }
}
