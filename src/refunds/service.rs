use std::sync::Arc;

use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::RefundError;
use crate::gateway::{RefundRequest, SettlementGateway};
use crate::locks::KeyedLocks;
use crate::notifier::EventNotifier;
use crate::store::SandboxStore;
use crate::transactions::models::{RefundSummary, TransactionStatus};
use crate::transactions::TransactionService;

use super::models::{
    generate_reference, ApprovalInfo, Metadata, Refund, RefundStatus, RefundType,
};

pub const DEFAULT_REFUND_METHOD: &str = "original_payment_method";

#[derive(Debug, Clone, Deserialize)]
pub struct CreateRefund {
    pub transaction_id: Uuid,
    pub amount: i64,
    pub reason: String,
    #[serde(default)]
    pub refund_method: Option<String>,
    #[serde(default)]
    pub idempotency_key: Option<String>,
    #[serde(default)]
    pub metadata: Metadata,
}

/// key: refund-ledger -> remaining-balance invariant owner
///
/// The only component that mutates refunds. All operations against the same
/// transaction serialize on a per-transaction lock so the balance checks stay
/// race-free; the store's credit is additionally an atomic guarded update.
pub struct RefundLedger {
    store: Arc<dyn SandboxStore>,
    gateway: Arc<dyn SettlementGateway>,
    transactions: Arc<TransactionService>,
    notifier: Arc<dyn EventNotifier>,
    locks: KeyedLocks,
}

impl RefundLedger {
    pub fn new(
        store: Arc<dyn SandboxStore>,
        gateway: Arc<dyn SettlementGateway>,
        transactions: Arc<TransactionService>,
        notifier: Arc<dyn EventNotifier>,
    ) -> Self {
        Self {
            store,
            gateway,
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

    pub async fn create_refund(
        &self,
        merchant_id: Uuid,
        request: CreateRefund,
    ) -> Result<Refund, RefundError> {
        let _guard = self.locks.acquire(request.transaction_id).await;

        let transaction = self
            .store
            .transaction(request.transaction_id)
            .await?
            .ok_or(RefundError::NotFound)?;
        if transaction.merchant_id != merchant_id {
            return Err(RefundError::Unauthorized);
        }
        if transaction.status != TransactionStatus::Success {
            return Err(RefundError::NotRefundable);
        }
        if request.amount <= 0 || request.amount > transaction.amount {
            return Err(RefundError::InvalidAmount);
        }

        let existing = self
            .store
            .refunds_for_transaction(transaction.id)
            .await?;

        // Idempotency-key replay returns the original record untouched.
        if let Some(key) = request.idempotency_key.as_deref() {
            if let Some(prior) = existing
                .iter()
                .find(|r| r.idempotency_key.as_deref() == Some(key))
            {
                return Ok(prior.clone());
            }
        }

        let reserved: i64 = existing
            .iter()
            .filter(|r| r.status.counts_against_balance())
            .map(|r| r.amount)
            .sum();
        if reserved + request.amount > transaction.amount {
            return Err(RefundError::AmountExceeded {
                remaining: transaction.amount - reserved,
            });
        }

        // Best-effort duplicate guard on the exact amount, not an idempotency
        // key: callers wanting strong dedup supply `idempotency_key`.
        if existing
            .iter()
            .any(|r| r.amount == request.amount && r.status.counts_against_balance())
        {
            return Err(RefundError::DuplicateRefund);
        }

        let now = Utc::now();
        let refund = Refund {
            id: Uuid::new_v4(),
            reference: generate_reference(),
            transaction_id: transaction.id,
            merchant_id,
            amount: request.amount,
            currency: transaction.currency.clone(),
            reason: request.reason,
            refund_type: RefundType::derive(request.amount, transaction.amount),
            status: RefundStatus::Pending,
            refund_method: request
                .refund_method
                .unwrap_or_else(|| DEFAULT_REFUND_METHOD.to_string()),
            idempotency_key: request.idempotency_key,
            processed_at: None,
            failure_reason: None,
            approval_info: None,
            metadata: request.metadata,
            created_at: now,
            updated_at: now,
        };
        self.store.insert_refund(&refund).await?;
        info!(
            refund = %refund.id,
            reference = %refund.reference,
            transaction = %transaction.id,
            amount = refund.amount,
            "refund created"
        );
        self.notify("refund.created", merchant_id, json!(&refund))
            .await;
        Ok(refund)
    }

    /// Settles a pending refund through the gateway. Both branches are
    /// terminal; a failed settlement requires a brand-new refund request.
    pub async fn process_refund(
        &self,
        merchant_id: Uuid,
        refund_id: Uuid,
    ) -> Result<Refund, RefundError> {
        let located = self
            .store
            .refund(refund_id)
            .await?
            .ok_or(RefundError::NotFound)?;
        if located.merchant_id != merchant_id {
            return Err(RefundError::Unauthorized);
        }

        let _guard = self.locks.acquire(located.transaction_id).await;
        // Reload under the lock; another caller may have raced us here.
        let mut refund = self
            .store
            .refund(refund_id)
            .await?
            .ok_or(RefundError::NotFound)?;
        if refund.status != RefundStatus::Pending {
            return Err(RefundError::InvalidStatus {
                current: refund.status,
            });
        }

        refund.status = RefundStatus::Processing;
        refund.updated_at = Utc::now();
        self.store.update_refund(&refund).await?;

        let decision = match self
            .gateway
            .settle_refund(&RefundRequest {
                refund_id: refund.id,
                reference: refund.reference.clone(),
                amount: refund.amount,
                currency: refund.currency.clone(),
            })
            .await
        {
            Ok(decision) => decision,
            // A transport error is terminal like a decline; a refund left in
            // `processing` would reserve balance with no path to settle it.
            Err(err) => {
                let now = Utc::now();
                refund.status = RefundStatus::Failed;
                refund.failure_reason = Some(err.to_string());
                refund.processed_at = Some(now);
                refund.updated_at = now;
                self.store.update_refund(&refund).await?;
                warn!(refund = %refund.id, %err, "gateway settlement errored");
                self.notify("refund.failed", merchant_id, json!(&refund))
                    .await;
                return Err(RefundError::Gateway(err.to_string()));
            }
        };

        let now = Utc::now();
        if decision.approved {
            self.apply_credit(&mut refund).await?;
        } else {
            refund.status = RefundStatus::Failed;
            refund.failure_reason = Some(decision.message);
        }
        refund.processed_at = Some(now);
        refund.updated_at = now;
        self.store.update_refund(&refund).await?;

        let event = match refund.status {
            RefundStatus::Completed => "refund.completed",
            _ => "refund.failed",
        };
        info!(refund = %refund.id, status = %refund.status, "refund settled");
        self.notify(event, merchant_id, json!(&refund)).await;
        Ok(refund)
    }

    pub async fn cancel_refund(
        &self,
        merchant_id: Uuid,
        refund_id: Uuid,
        reason: String,
    ) -> Result<Refund, RefundError> {
        let located = self
            .store
            .refund(refund_id)
            .await?
            .ok_or(RefundError::NotFound)?;
        if located.merchant_id != merchant_id {
            return Err(RefundError::Unauthorized);
        }

        let _guard = self.locks.acquire(located.transaction_id).await;
        let mut refund = self
            .store
            .refund(refund_id)
            .await?
            .ok_or(RefundError::NotFound)?;
        if refund.status != RefundStatus::Pending {
            return Err(RefundError::InvalidStatus {
                current: refund.status,
            });
        }

        refund.status = RefundStatus::Cancelled;
        refund.failure_reason = Some(reason);
        refund.updated_at = Utc::now();
        self.store.update_refund(&refund).await?;
        self.notify("refund.cancelled", merchant_id, json!(&refund))
            .await;
        Ok(refund)
    }

    /// Administrative override for in-flight refunds; terminal records are
    /// immutable. Entering `completed` applies the same transaction credit as
    /// the settlement success path and stamps approval info if absent.
    pub async fn update_refund_status(
        &self,
        merchant_id: Uuid,
        refund_id: Uuid,
        status: RefundStatus,
        notes: Option<String>,
    ) -> Result<Refund, RefundError> {
        let located = self
            .store
            .refund(refund_id)
            .await?
            .ok_or(RefundError::NotFound)?;
        if located.merchant_id != merchant_id {
            return Err(RefundError::Unauthorized);
        }

        let _guard = self.locks.acquire(located.transaction_id).await;
        let mut refund = self
            .store
            .refund(refund_id)
            .await?
            .ok_or(RefundError::NotFound)?;
        // Terminal records are immutable: reopening a completed refund would
        // let a second pass credit the transaction again.
        if refund.status.is_terminal() {
            return Err(RefundError::InvalidStatus {
                current: refund.status,
            });
        }

        let now = Utc::now();
        if status == RefundStatus::Completed {
            self.apply_credit(&mut refund).await?;
            if refund.status == RefundStatus::Completed {
                if refund.processed_at.is_none() {
                    refund.processed_at = Some(now);
                }
                if refund.approval_info.is_none() {
                    refund.approval_info = Some(ApprovalInfo {
                        approved_by: "sandbox-admin".to_string(),
                        approved_at: now,
                        notes: notes.clone(),
                    });
                }
            }
        } else {
            refund.status = status;
            if matches!(status, RefundStatus::Failed | RefundStatus::Cancelled) {
                if let Some(notes) = notes.clone() {
                    refund.failure_reason = Some(notes);
                }
                if refund.processed_at.is_none() && status == RefundStatus::Failed {
                    refund.processed_at = Some(now);
                }
            }
        }
        refund.updated_at = now;
        self.store.update_refund(&refund).await?;
        self.notify("refund.updated", merchant_id, json!(&refund))
            .await;
        Ok(refund)
    }

    pub async fn fetch(&self, merchant_id: Uuid, refund_id: Uuid) -> Result<Refund, RefundError> {
        let refund = self
            .store
            .refund(refund_id)
            .await?
            .ok_or(RefundError::NotFound)?;
        if refund.merchant_id != merchant_id {
            return Err(RefundError::Unauthorized);
        }
        Ok(refund)
    }

    /// Credits the transaction for this refund's amount through the guarded
    /// update. A refused guard marks the refund failed instead of completing
    /// it, keeping `refunded_amount <= amount` under any interleaving.
    async fn apply_credit(&self, refund: &mut Refund) -> Result<(), RefundError> {
        // Summary reflects the balance after this credit, not the refund's
        // own type: a partial refund can exhaust the remaining amount.
        let transaction = self
            .store
            .transaction(refund.transaction_id)
            .await?
            .ok_or(RefundError::NotFound)?;
        let summary = if refund.amount >= transaction.remaining_amount() {
            RefundSummary::FullyRefunded
        } else {
            RefundSummary::PartiallyRefunded
        };
        let credited = self
            .transactions
            .credit(refund.transaction_id, refund.amount, summary)
            .await?;
        match credited {
            Some(_) => {
                refund.status = RefundStatus::Completed;
                Ok(())
            }
            None => {
                warn!(
                    refund = %refund.id,
                    transaction = %refund.transaction_id,
                    "credit guard refused; marking refund failed"
                );
                refund.status = RefundStatus::Failed;
                refund.failure_reason =
                    Some("credit would exceed transaction amount".to_string());
                Ok(())
            }
        }
    }
}
