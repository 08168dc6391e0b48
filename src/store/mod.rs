pub mod memory;
pub mod postgres;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::billing::models::Subscription;
use crate::refunds::models::Refund;
use crate::transactions::models::{RefundSummary, Transaction, TransactionStatus};

pub use memory::MemoryStore;
pub use postgres::PgStore;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Merchant {
    pub id: Uuid,
    pub name: String,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Customer {
    pub id: Uuid,
    pub merchant_id: Uuid,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

/// key: sandbox-store -> injected datastore boundary
///
/// Everything the core persists goes through this trait so the sandbox can
/// run against Postgres or entirely in memory. Implementations must make
/// `credit_transaction` an atomic conditional update; the services layer
/// additionally serializes per-entity access through `KeyedLocks`.
#[async_trait]
pub trait SandboxStore: Send + Sync {
    async fn insert_merchant(&self, merchant: &Merchant) -> Result<()>;
    async fn insert_customer(&self, customer: &Customer) -> Result<()>;
    async fn merchant_is_active(&self, id: Uuid) -> Result<bool>;
    async fn customer_is_active(&self, id: Uuid) -> Result<bool>;

    async fn insert_transaction(&self, transaction: &Transaction) -> Result<()>;
    async fn transaction(&self, id: Uuid) -> Result<Option<Transaction>>;
    async fn update_transaction_settlement(
        &self,
        id: Uuid,
        status: TransactionStatus,
        gateway_message: Option<String>,
    ) -> Result<Transaction>;

    /// Guarded credit of `refunded_amount`. Returns `None` without mutating
    /// anything when the credit would push `refunded_amount` past `amount`.
    async fn credit_transaction(
        &self,
        id: Uuid,
        amount: i64,
        refund_status: RefundSummary,
    ) -> Result<Option<Transaction>>;

    async fn insert_refund(&self, refund: &Refund) -> Result<()>;
    async fn refund(&self, id: Uuid) -> Result<Option<Refund>>;
    async fn refunds_for_transaction(&self, transaction_id: Uuid) -> Result<Vec<Refund>>;
    async fn update_refund(&self, refund: &Refund) -> Result<()>;

    async fn insert_subscription(&self, subscription: &Subscription) -> Result<()>;
    async fn subscription(&self, id: Uuid) -> Result<Option<Subscription>>;
    async fn update_subscription(&self, subscription: &Subscription) -> Result<()>;

    /// Subscriptions the runner should bill: status in {trialing, active}
    /// with `next_billing_date <= now`.
    async fn due_subscriptions(&self, now: DateTime<Utc>) -> Result<Vec<Subscription>>;

    /// Non-cancelled subscriptions whose `cancel_at_period_end` flag is set
    /// and whose period boundary has passed.
    async fn period_end_cancellations(&self, now: DateTime<Utc>) -> Result<Vec<Subscription>>;
}
