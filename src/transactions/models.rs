use std::fmt;
use std::str::FromStr;

use anyhow::bail;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    Pending,
    Success,
    Failed,
}

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Pending => "pending",
            TransactionStatus::Success => "success",
            TransactionStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransactionStatus {
    type Err = anyhow::Error;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw {
            "pending" => Ok(TransactionStatus::Pending),
            "success" => Ok(TransactionStatus::Success),
            "failed" => Ok(TransactionStatus::Failed),
            other => bail!("unrecognized transaction status '{other}'"),
        }
    }
}

/// Running refund summary kept on the transaction row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefundSummary {
    NotRefunded,
    PartiallyRefunded,
    FullyRefunded,
}

impl RefundSummary {
    pub fn as_str(&self) -> &'static str {
        match self {
            RefundSummary::NotRefunded => "not_refunded",
            RefundSummary::PartiallyRefunded => "partially_refunded",
            RefundSummary::FullyRefunded => "fully_refunded",
        }
    }
}

impl FromStr for RefundSummary {
    type Err = anyhow::Error;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw {
            "not_refunded" => Ok(RefundSummary::NotRefunded),
            "partially_refunded" => Ok(RefundSummary::PartiallyRefunded),
            "fully_refunded" => Ok(RefundSummary::FullyRefunded),
            other => bail!("unrecognized refund summary '{other}'"),
        }
    }
}

/// key: transaction-model -> simulated charge record
///
/// Amounts are integer minor currency units throughout; invariant
/// `0 <= refunded_amount <= amount` holds after every ledger operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    pub id: Uuid,
    pub merchant_id: Uuid,
    pub subscription_id: Option<Uuid>,
    pub amount: i64,
    pub currency: String,
    pub status: TransactionStatus,
    pub refunded_amount: i64,
    pub refund_status: RefundSummary,
    pub gateway_message: Option<String>,
    pub billing_cycle: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Transaction {
    pub fn new(
        merchant_id: Uuid,
        amount: i64,
        currency: String,
        subscription_id: Option<Uuid>,
        billing_cycle: Option<i64>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            merchant_id,
            subscription_id,
            amount,
            currency,
            status: TransactionStatus::Pending,
            refunded_amount: 0,
            refund_status: RefundSummary::NotRefunded,
            gateway_message: None,
            billing_cycle,
            created_at: now,
            updated_at: now,
        }
    }

    /// The refundable ceiling.
    pub fn remaining_amount(&self) -> i64 {
        self.amount - self.refunded_amount
    }
}
