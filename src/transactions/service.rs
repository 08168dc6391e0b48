use std::sync::Arc;

use anyhow::{anyhow, Result};
use tracing::info;
use uuid::Uuid;

use crate::gateway::{ChargeRequest, SettlementGateway};
use crate::store::SandboxStore;

use super::models::{RefundSummary, Transaction, TransactionStatus};

/// key: transaction-collaborator -> create/settle/credit contract
///
/// The only component that writes transaction rows. Billing asks it for a
/// per-cycle charge; the refund ledger asks it to credit settled refunds.
pub struct TransactionService {
    store: Arc<dyn SandboxStore>,
    gateway: Arc<dyn SettlementGateway>,
}

impl TransactionService {
    pub fn new(store: Arc<dyn SandboxStore>, gateway: Arc<dyn SettlementGateway>) -> Self {
        Self { store, gateway }
    }

    pub async fn create(
        &self,
        merchant_id: Uuid,
        amount: i64,
        currency: &str,
        subscription_id: Option<Uuid>,
        billing_cycle: Option<i64>,
    ) -> Result<Transaction> {
        if amount <= 0 {
            return Err(anyhow!("transaction amount must be positive"));
        }
        let transaction = Transaction::new(
            merchant_id,
            amount,
            currency.to_string(),
            subscription_id,
            billing_cycle,
        );
        self.store.insert_transaction(&transaction).await?;
        info!(
            transaction = %transaction.id,
            merchant = %merchant_id,
            amount,
            "transaction created"
        );
        Ok(transaction)
    }

    /// Runs the simulated charge through the gateway and records the verdict.
    pub async fn settle(&self, id: Uuid) -> Result<Transaction> {
        let transaction = self
            .store
            .transaction(id)
            .await?
            .ok_or_else(|| anyhow!("transaction {id} not found"))?;
        let decision = self
            .gateway
            .authorize_charge(&ChargeRequest {
                transaction_id: transaction.id,
                merchant_id: transaction.merchant_id,
                amount: transaction.amount,
                currency: transaction.currency.clone(),
            })
            .await?;
        let status = if decision.approved {
            TransactionStatus::Success
        } else {
            TransactionStatus::Failed
        };
        self.store
            .update_transaction_settlement(id, status, Some(decision.message))
            .await
    }

    /// Guarded balance credit applied when a refund settles. `None` means the
    /// guard refused: the credit would have exceeded the transaction amount.
    pub async fn credit(
        &self,
        id: Uuid,
        amount: i64,
        refund_status: RefundSummary,
    ) -> Result<Option<Transaction>> {
        self.store.credit_transaction(id, amount, refund_status).await
    }

    pub async fn fetch(&self, id: Uuid) -> Result<Option<Transaction>> {
        self.store.transaction(id).await
    }
}
