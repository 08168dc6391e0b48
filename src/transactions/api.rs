use std::sync::Arc;

use axum::{
    extract::{Extension, Path},
    http::HeaderMap,
    Json,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::auth::merchant_from_headers;
use crate::error::{AppError, AppResult};
use crate::refunds::models::Metadata;

use super::models::Transaction;
use super::service::TransactionService;

#[derive(Debug, Deserialize)]
pub struct SimulatePaymentRequest {
    pub amount: i64,
    pub currency: String,
    #[serde(default)]
    pub metadata: Metadata,
}

/// key: payments-api -> one-off charge simulation
pub async fn simulate_payment(
    Extension(transactions): Extension<Arc<TransactionService>>,
    headers: HeaderMap,
    Json(payload): Json<SimulatePaymentRequest>,
) -> AppResult<Json<Transaction>> {
    let merchant_id = merchant_from_headers(&headers)?;
    if payload.amount <= 0 {
        return Err(AppError::BadRequest(
            "amount must be a positive integer in minor units".to_string(),
        ));
    }
    let transaction = transactions
        .create(merchant_id, payload.amount, &payload.currency, None, None)
        .await?;
    let settled = transactions.settle(transaction.id).await?;
    Ok(Json(settled))
}

pub async fn get_transaction(
    Extension(transactions): Extension<Arc<TransactionService>>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Transaction>> {
    let merchant_id = merchant_from_headers(&headers)?;
    let transaction = transactions.fetch(id).await?.ok_or(AppError::NotFound)?;
    if transaction.merchant_id != merchant_id {
        return Err(AppError::NotFound);
    }
    Ok(Json(transaction))
}
