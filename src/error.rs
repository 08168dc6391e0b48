use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

use crate::billing::models::SubscriptionStatus;
use crate::refunds::models::RefundStatus;

/// key: refund-ledger-errors -> typed results, never faults
#[derive(Debug, Error)]
pub enum RefundError {
    #[error("not found")]
    NotFound,
    #[error("transaction does not belong to the requesting merchant")]
    Unauthorized,
    #[error("transaction is not refundable")]
    NotRefundable,
    #[error("invalid refund amount")]
    InvalidAmount,
    #[error("refund amount exceeds remaining balance; {remaining} remaining")]
    AmountExceeded { remaining: i64 },
    #[error("a refund for this amount is already in flight")]
    DuplicateRefund,
    #[error("operation not allowed while refund is {current}")]
    InvalidStatus { current: RefundStatus },
    #[error("gateway error: {0}")]
    Gateway(String),
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

/// key: subscription-lifecycle-errors
#[derive(Debug, Error)]
pub enum SubscriptionError {
    #[error("not found")]
    NotFound,
    #[error("merchant is not authorized for this subscription")]
    Unauthorized,
    #[error("invalid subscription amount")]
    InvalidAmount,
    #[error("unrecognized billing interval '{0}'")]
    InvalidInterval(String),
    #[error("interval_count must be at least 1")]
    InvalidIntervalCount,
    #[error("subscription is {current}, not billable")]
    NotActive { current: SubscriptionStatus },
    #[error("subscription is not due for billing yet")]
    NotDue,
    #[error("operation not allowed while subscription is {current}")]
    InvalidStatus { current: SubscriptionStatus },
    #[error("transaction creation failed: {0}")]
    CreationError(String),
    #[error("billing charge was declined: {0}")]
    BillingFailed(String),
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Refund(#[from] RefundError),
    #[error(transparent)]
    Subscription(#[from] SubscriptionError),
    #[error("not found")]
    NotFound,
    #[error("unauthorized")]
    Unauthorized,
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

fn refund_status_code(err: &RefundError) -> StatusCode {
    match err {
        RefundError::NotFound => StatusCode::NOT_FOUND,
        RefundError::Unauthorized => StatusCode::FORBIDDEN,
        RefundError::NotRefundable
        | RefundError::AmountExceeded { .. }
        | RefundError::DuplicateRefund
        | RefundError::InvalidStatus { .. } => StatusCode::CONFLICT,
        RefundError::InvalidAmount => StatusCode::UNPROCESSABLE_ENTITY,
        RefundError::Gateway(_) => StatusCode::BAD_GATEWAY,
        RefundError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn subscription_status_code(err: &SubscriptionError) -> StatusCode {
    match err {
        SubscriptionError::NotFound => StatusCode::NOT_FOUND,
        SubscriptionError::Unauthorized => StatusCode::FORBIDDEN,
        SubscriptionError::InvalidAmount
        | SubscriptionError::InvalidInterval(_)
        | SubscriptionError::InvalidIntervalCount => StatusCode::UNPROCESSABLE_ENTITY,
        SubscriptionError::NotActive { .. }
        | SubscriptionError::NotDue
        | SubscriptionError::InvalidStatus { .. } => StatusCode::CONFLICT,
        SubscriptionError::BillingFailed(_) => StatusCode::PAYMENT_REQUIRED,
        SubscriptionError::CreationError(_) => StatusCode::BAD_GATEWAY,
        SubscriptionError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self {
            AppError::Refund(err) => refund_status_code(err),
            AppError::Subscription(err) => subscription_status_code(err),
            AppError::NotFound => StatusCode::NOT_FOUND,
            AppError::Unauthorized => StatusCode::UNAUTHORIZED,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            tracing::error!(?self);
        }
        (status, self.to_string()).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;
