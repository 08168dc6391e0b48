use std::str::FromStr;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::billing::models::{BillingInterval, Subscription, SubscriptionStatus};
use crate::refunds::models::{ApprovalInfo, Metadata, Refund, RefundStatus, RefundType};
use crate::transactions::models::{RefundSummary, Transaction, TransactionStatus};

use super::{Customer, Merchant, SandboxStore};

/// key: sandbox-store-postgres -> durable backing
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn transaction_from_row(row: &PgRow) -> Result<Transaction> {
    let status: String = row.try_get("status")?;
    let refund_status: String = row.try_get("refund_status")?;
    Ok(Transaction {
        id: row.try_get("id")?,
        merchant_id: row.try_get("merchant_id")?,
        subscription_id: row.try_get("subscription_id")?,
        amount: row.try_get("amount")?,
        currency: row.try_get("currency")?,
        status: TransactionStatus::from_str(&status)?,
        refunded_amount: row.try_get("refunded_amount")?,
        refund_status: RefundSummary::from_str(&refund_status)?,
        gateway_message: row.try_get("gateway_message")?,
        billing_cycle: row.try_get("billing_cycle")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn refund_from_row(row: &PgRow) -> Result<Refund> {
    let status: String = row.try_get("status")?;
    let refund_type: String = row.try_get("refund_type")?;
    let approval_info: Option<serde_json::Value> = row.try_get("approval_info")?;
    let approval_info = approval_info
        .map(serde_json::from_value::<ApprovalInfo>)
        .transpose()
        .context("malformed approval_info")?;
    let metadata: serde_json::Value = row.try_get("metadata")?;
    let metadata: Metadata = serde_json::from_value(metadata).context("malformed metadata")?;
    Ok(Refund {
        id: row.try_get("id")?,
        reference: row.try_get("reference")?,
        transaction_id: row.try_get("transaction_id")?,
        merchant_id: row.try_get("merchant_id")?,
        amount: row.try_get("amount")?,
        currency: row.try_get("currency")?,
        reason: row.try_get("reason")?,
        refund_type: RefundType::from_str(&refund_type)?,
        status: RefundStatus::from_str(&status)?,
        refund_method: row.try_get("refund_method")?,
        idempotency_key: row.try_get("idempotency_key")?,
        processed_at: row.try_get("processed_at")?,
        failure_reason: row.try_get("failure_reason")?,
        approval_info,
        metadata,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn subscription_from_row(row: &PgRow) -> Result<Subscription> {
    let interval: String = row.try_get("billing_interval")?;
    let status: String = row.try_get("status")?;
    let interval_count: i32 = row.try_get("interval_count")?;
    let metadata: serde_json::Value = row.try_get("metadata")?;
    let metadata: Metadata = serde_json::from_value(metadata).context("malformed metadata")?;
    Ok(Subscription {
        id: row.try_get("id")?,
        merchant_id: row.try_get("merchant_id")?,
        customer_id: row.try_get("customer_id")?,
        plan_id: row.try_get("plan_id")?,
        amount: row.try_get("amount")?,
        currency: row.try_get("currency")?,
        interval: BillingInterval::from_str(&interval)?,
        interval_count: interval_count as u32,
        status: SubscriptionStatus::from_str(&status)?,
        current_period_start: row.try_get("current_period_start")?,
        current_period_end: row.try_get("current_period_end")?,
        next_billing_date: row.try_get("next_billing_date")?,
        trial_start: row.try_get("trial_start")?,
        trial_end: row.try_get("trial_end")?,
        billing_cycles_completed: row.try_get("billing_cycles_completed")?,
        cancel_at_period_end: row.try_get("cancel_at_period_end")?,
        cancelled_at: row.try_get("cancelled_at")?,
        paused_at: row.try_get("paused_at")?,
        resumed_at: row.try_get("resumed_at")?,
        reactivated_at: row.try_get("reactivated_at")?,
        pause_reason: row.try_get("pause_reason")?,
        cancellation_reason: row.try_get("cancellation_reason")?,
        last_billed_at: row.try_get("last_billed_at")?,
        last_billing_attempt: row.try_get("last_billing_attempt")?,
        metadata,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

#[async_trait]
impl SandboxStore for PgStore {
    async fn insert_merchant(&self, merchant: &Merchant) -> Result<()> {
        sqlx::query("INSERT INTO merchants (id, name, active, created_at) VALUES ($1, $2, $3, $4)")
            .bind(merchant.id)
            .bind(&merchant.name)
            .bind(merchant.active)
            .bind(merchant.created_at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn insert_customer(&self, customer: &Customer) -> Result<()> {
        sqlx::query(
            "INSERT INTO customers (id, merchant_id, active, created_at) VALUES ($1, $2, $3, $4)",
        )
        .bind(customer.id)
        .bind(customer.merchant_id)
        .bind(customer.active)
        .bind(customer.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn merchant_is_active(&self, id: Uuid) -> Result<bool> {
        let active: Option<bool> =
            sqlx::query_scalar("SELECT active FROM merchants WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(active.unwrap_or(false))
    }

    async fn customer_is_active(&self, id: Uuid) -> Result<bool> {
        let active: Option<bool> =
            sqlx::query_scalar("SELECT active FROM customers WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(active.unwrap_or(false))
    }

    async fn insert_transaction(&self, transaction: &Transaction) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO transactions (
                id, merchant_id, subscription_id, amount, currency, status,
                refunded_amount, refund_status, gateway_message, billing_cycle,
                created_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(transaction.id)
        .bind(transaction.merchant_id)
        .bind(transaction.subscription_id)
        .bind(transaction.amount)
        .bind(&transaction.currency)
        .bind(transaction.status.as_str())
        .bind(transaction.refunded_amount)
        .bind(transaction.refund_status.as_str())
        .bind(&transaction.gateway_message)
        .bind(transaction.billing_cycle)
        .bind(transaction.created_at)
        .bind(transaction.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn transaction(&self, id: Uuid) -> Result<Option<Transaction>> {
        let row = sqlx::query("SELECT * FROM transactions WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(transaction_from_row).transpose()
    }

    async fn update_transaction_settlement(
        &self,
        id: Uuid,
        status: TransactionStatus,
        gateway_message: Option<String>,
    ) -> Result<Transaction> {
        let row = sqlx::query(
            r#"
            UPDATE transactions
            SET status = $2, gateway_message = $3, updated_at = NOW()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(status.as_str())
        .bind(gateway_message)
        .fetch_one(&self.pool)
        .await?;
        transaction_from_row(&row)
    }

    async fn credit_transaction(
        &self,
        id: Uuid,
        amount: i64,
        refund_status: RefundSummary,
    ) -> Result<Option<Transaction>> {
        // Atomic conditional update; the WHERE clause is the balance guard.
        let row = sqlx::query(
            r#"
            UPDATE transactions
            SET refunded_amount = refunded_amount + $2,
                refund_status = $3,
                updated_at = NOW()
            WHERE id = $1
              AND $2 > 0
              AND refunded_amount + $2 <= amount
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(amount)
        .bind(refund_status.as_str())
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(transaction_from_row).transpose()
    }

    async fn insert_refund(&self, refund: &Refund) -> Result<()> {
        let approval_info = refund
            .approval_info
            .as_ref()
            .map(serde_json::to_value)
            .transpose()?;
        sqlx::query(
            r#"
            INSERT INTO refunds (
                id, reference, transaction_id, merchant_id, amount, currency,
                reason, refund_type, status, refund_method, idempotency_key,
                processed_at, failure_reason, approval_info, metadata,
                created_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)
            "#,
        )
        .bind(refund.id)
        .bind(&refund.reference)
        .bind(refund.transaction_id)
        .bind(refund.merchant_id)
        .bind(refund.amount)
        .bind(&refund.currency)
        .bind(&refund.reason)
        .bind(refund.refund_type.as_str())
        .bind(refund.status.as_str())
        .bind(&refund.refund_method)
        .bind(&refund.idempotency_key)
        .bind(refund.processed_at)
        .bind(&refund.failure_reason)
        .bind(approval_info)
        .bind(serde_json::to_value(&refund.metadata)?)
        .bind(refund.created_at)
        .bind(refund.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn refund(&self, id: Uuid) -> Result<Option<Refund>> {
        let row = sqlx::query("SELECT * FROM refunds WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(refund_from_row).transpose()
    }

    async fn refunds_for_transaction(&self, transaction_id: Uuid) -> Result<Vec<Refund>> {
        let rows = sqlx::query(
            "SELECT * FROM refunds WHERE transaction_id = $1 ORDER BY created_at ASC",
        )
        .bind(transaction_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(refund_from_row).collect()
    }

    async fn update_refund(&self, refund: &Refund) -> Result<()> {
        let approval_info = refund
            .approval_info
            .as_ref()
            .map(serde_json::to_value)
            .transpose()?;
        sqlx::query(
            r#"
            UPDATE refunds
            SET status = $2,
                processed_at = $3,
                failure_reason = $4,
                approval_info = $5,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(refund.id)
        .bind(refund.status.as_str())
        .bind(refund.processed_at)
        .bind(&refund.failure_reason)
        .bind(approval_info)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn insert_subscription(&self, subscription: &Subscription) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO subscriptions (
                id, merchant_id, customer_id, plan_id, amount, currency,
                billing_interval, interval_count, status,
                current_period_start, current_period_end, next_billing_date,
                trial_start, trial_end, billing_cycles_completed,
                cancel_at_period_end, metadata, created_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13,
                      $14, $15, $16, $17, $18, $19)
            "#,
        )
        .bind(subscription.id)
        .bind(subscription.merchant_id)
        .bind(subscription.customer_id)
        .bind(subscription.plan_id)
        .bind(subscription.amount)
        .bind(&subscription.currency)
        .bind(subscription.interval.as_str())
        .bind(subscription.interval_count as i32)
        .bind(subscription.status.as_str())
        .bind(subscription.current_period_start)
        .bind(subscription.current_period_end)
        .bind(subscription.next_billing_date)
        .bind(subscription.trial_start)
        .bind(subscription.trial_end)
        .bind(subscription.billing_cycles_completed)
        .bind(subscription.cancel_at_period_end)
        .bind(serde_json::to_value(&subscription.metadata)?)
        .bind(subscription.created_at)
        .bind(subscription.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn subscription(&self, id: Uuid) -> Result<Option<Subscription>> {
        let row = sqlx::query("SELECT * FROM subscriptions WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(subscription_from_row).transpose()
    }

    async fn update_subscription(&self, subscription: &Subscription) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE subscriptions
            SET amount = $2,
                status = $3,
                current_period_start = $4,
                current_period_end = $5,
                next_billing_date = $6,
                billing_cycles_completed = $7,
                cancel_at_period_end = $8,
                cancelled_at = $9,
                paused_at = $10,
                resumed_at = $11,
                reactivated_at = $12,
                pause_reason = $13,
                cancellation_reason = $14,
                last_billed_at = $15,
                last_billing_attempt = $16,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(subscription.id)
        .bind(subscription.amount)
        .bind(subscription.status.as_str())
        .bind(subscription.current_period_start)
        .bind(subscription.current_period_end)
        .bind(subscription.next_billing_date)
        .bind(subscription.billing_cycles_completed)
        .bind(subscription.cancel_at_period_end)
        .bind(subscription.cancelled_at)
        .bind(subscription.paused_at)
        .bind(subscription.resumed_at)
        .bind(subscription.reactivated_at)
        .bind(&subscription.pause_reason)
        .bind(&subscription.cancellation_reason)
        .bind(subscription.last_billed_at)
        .bind(subscription.last_billing_attempt)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn due_subscriptions(&self, now: DateTime<Utc>) -> Result<Vec<Subscription>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM subscriptions
            WHERE status IN ('trialing', 'active')
              AND next_billing_date <= $1
            ORDER BY next_billing_date ASC
            "#,
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(subscription_from_row).collect()
    }

    async fn period_end_cancellations(&self, now: DateTime<Utc>) -> Result<Vec<Subscription>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM subscriptions
            WHERE cancel_at_period_end = TRUE
              AND status <> 'cancelled'
              AND current_period_end <= $1
            "#,
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(subscription_from_row).collect()
    }
}
