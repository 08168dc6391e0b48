use std::collections::HashMap;
use std::sync::Mutex;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::billing::models::Subscription;
use crate::refunds::models::Refund;
use crate::transactions::models::{RefundSummary, Transaction, TransactionStatus};

use super::{Customer, Merchant, SandboxStore};

/// key: sandbox-store-memory -> default backing for sandbox mode and tests
#[derive(Default)]
pub struct MemoryStore {
    merchants: Mutex<HashMap<Uuid, Merchant>>,
    customers: Mutex<HashMap<Uuid, Customer>>,
    transactions: Mutex<HashMap<Uuid, Transaction>>,
    refunds: Mutex<HashMap<Uuid, Refund>>,
    subscriptions: Mutex<HashMap<Uuid, Subscription>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds one active merchant and customer so a fresh sandbox is usable
    /// without any setup calls. Returns the seeded ids.
    pub fn with_sandbox_seed() -> (Self, Uuid, Uuid) {
        let store = Self::new();
        let merchant_id = Uuid::new_v4();
        let customer_id = Uuid::new_v4();
        let now = Utc::now();
        store.merchants.lock().unwrap().insert(
            merchant_id,
            Merchant {
                id: merchant_id,
                name: "sandbox".to_string(),
                active: true,
                created_at: now,
            },
        );
        store.customers.lock().unwrap().insert(
            customer_id,
            Customer {
                id: customer_id,
                merchant_id,
                active: true,
                created_at: now,
            },
        );
        (store, merchant_id, customer_id)
    }
}

#[async_trait]
impl SandboxStore for MemoryStore {
    async fn insert_merchant(&self, merchant: &Merchant) -> Result<()> {
        self.merchants
            .lock()
            .unwrap()
            .insert(merchant.id, merchant.clone());
        Ok(())
    }

    async fn insert_customer(&self, customer: &Customer) -> Result<()> {
        self.customers
            .lock()
            .unwrap()
            .insert(customer.id, customer.clone());
        Ok(())
    }

    async fn merchant_is_active(&self, id: Uuid) -> Result<bool> {
        Ok(self
            .merchants
            .lock()
            .unwrap()
            .get(&id)
            .map(|m| m.active)
            .unwrap_or(false))
    }

    async fn customer_is_active(&self, id: Uuid) -> Result<bool> {
        Ok(self
            .customers
            .lock()
            .unwrap()
            .get(&id)
            .map(|c| c.active)
            .unwrap_or(false))
    }

    async fn insert_transaction(&self, transaction: &Transaction) -> Result<()> {
        self.transactions
            .lock()
            .unwrap()
            .insert(transaction.id, transaction.clone());
        Ok(())
    }

    async fn transaction(&self, id: Uuid) -> Result<Option<Transaction>> {
        Ok(self.transactions.lock().unwrap().get(&id).cloned())
    }

    async fn update_transaction_settlement(
        &self,
        id: Uuid,
        status: TransactionStatus,
        gateway_message: Option<String>,
    ) -> Result<Transaction> {
        let mut transactions = self.transactions.lock().unwrap();
        let transaction = transactions
            .get_mut(&id)
            .ok_or_else(|| anyhow!("transaction {id} not found"))?;
        transaction.status = status;
        transaction.gateway_message = gateway_message;
        transaction.updated_at = Utc::now();
        Ok(transaction.clone())
    }

    async fn credit_transaction(
        &self,
        id: Uuid,
        amount: i64,
        refund_status: RefundSummary,
    ) -> Result<Option<Transaction>> {
        let mut transactions = self.transactions.lock().unwrap();
        let transaction = transactions
            .get_mut(&id)
            .ok_or_else(|| anyhow!("transaction {id} not found"))?;
        if amount <= 0 || transaction.refunded_amount + amount > transaction.amount {
            return Ok(None);
        }
        transaction.refunded_amount += amount;
        transaction.refund_status = refund_status;
        transaction.updated_at = Utc::now();
        Ok(Some(transaction.clone()))
    }

    async fn insert_refund(&self, refund: &Refund) -> Result<()> {
        self.refunds
            .lock()
            .unwrap()
            .insert(refund.id, refund.clone());
        Ok(())
    }

    async fn refund(&self, id: Uuid) -> Result<Option<Refund>> {
        Ok(self.refunds.lock().unwrap().get(&id).cloned())
    }

    async fn refunds_for_transaction(&self, transaction_id: Uuid) -> Result<Vec<Refund>> {
        let mut refunds: Vec<Refund> = self
            .refunds
            .lock()
            .unwrap()
            .values()
            .filter(|r| r.transaction_id == transaction_id)
            .cloned()
            .collect();
        refunds.sort_by_key(|r| r.created_at);
        Ok(refunds)
    }

    async fn update_refund(&self, refund: &Refund) -> Result<()> {
        let mut refunds = self.refunds.lock().unwrap();
        if !refunds.contains_key(&refund.id) {
            return Err(anyhow!("refund {} not found", refund.id));
        }
        refunds.insert(refund.id, refund.clone());
        Ok(())
    }

    async fn insert_subscription(&self, subscription: &Subscription) -> Result<()> {
        self.subscriptions
            .lock()
            .unwrap()
            .insert(subscription.id, subscription.clone());
        Ok(())
    }

    async fn subscription(&self, id: Uuid) -> Result<Option<Subscription>> {
        Ok(self.subscriptions.lock().unwrap().get(&id).cloned())
    }

    async fn update_subscription(&self, subscription: &Subscription) -> Result<()> {
        let mut subscriptions = self.subscriptions.lock().unwrap();
        if !subscriptions.contains_key(&subscription.id) {
            return Err(anyhow!("subscription {} not found", subscription.id));
        }
        subscriptions.insert(subscription.id, subscription.clone());
        Ok(())
    }

    async fn due_subscriptions(&self, now: DateTime<Utc>) -> Result<Vec<Subscription>> {
        let mut due: Vec<Subscription> = self
            .subscriptions
            .lock()
            .unwrap()
            .values()
            .filter(|s| s.status.is_billable() && s.next_billing_date <= now)
            .cloned()
            .collect();
        due.sort_by_key(|s| s.next_billing_date);
        Ok(due)
    }

    async fn period_end_cancellations(&self, now: DateTime<Utc>) -> Result<Vec<Subscription>> {
        Ok(self
            .subscriptions
            .lock()
            .unwrap()
            .values()
            .filter(|s| {
                s.cancel_at_period_end
                    && s.status != crate::billing::models::SubscriptionStatus::Cancelled
                    && s.current_period_end <= now
            })
            .cloned()
            .collect())
    }
}
