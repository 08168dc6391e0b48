use std::sync::Arc;

use axum::{
    extract::{Extension, Path},
    http::HeaderMap,
    Json,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::auth::merchant_from_headers;
use crate::error::AppResult;

use super::models::{Refund, RefundStatus};
use super::service::{CreateRefund, RefundLedger};

/// key: refunds-api -> ledger endpoints
pub async fn create_refund(
    Extension(ledger): Extension<Arc<RefundLedger>>,
    headers: HeaderMap,
    Json(payload): Json<CreateRefund>,
) -> AppResult<Json<Refund>> {
    let merchant_id = merchant_from_headers(&headers)?;
    let refund = ledger.create_refund(merchant_id, payload).await?;
    Ok(Json(refund))
}

pub async fn get_refund(
    Extension(ledger): Extension<Arc<RefundLedger>>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Refund>> {
    let merchant_id = merchant_from_headers(&headers)?;
    let refund = ledger.fetch(merchant_id, id).await?;
    Ok(Json(refund))
}

pub async fn process_refund(
    Extension(ledger): Extension<Arc<RefundLedger>>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Refund>> {
    let merchant_id = merchant_from_headers(&headers)?;
    let refund = ledger.process_refund(merchant_id, id).await?;
    Ok(Json(refund))
}

#[derive(Debug, Deserialize)]
pub struct CancelRefundRequest {
    pub reason: String,
}

pub async fn cancel_refund(
    Extension(ledger): Extension<Arc<RefundLedger>>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
    Json(payload): Json<CancelRefundRequest>,
) -> AppResult<Json<Refund>> {
    let merchant_id = merchant_from_headers(&headers)?;
    let refund = ledger.cancel_refund(merchant_id, id, payload.reason).await?;
    Ok(Json(refund))
}

#[derive(Debug, Deserialize)]
pub struct UpdateRefundStatusRequest {
    pub status: RefundStatus,
    #[serde(default)]
    pub notes: Option<String>,
}

pub async fn update_refund_status(
    Extension(ledger): Extension<Arc<RefundLedger>>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateRefundStatusRequest>,
) -> AppResult<Json<Refund>> {
    let merchant_id = merchant_from_headers(&headers)?;
    let refund = ledger
        .update_refund_status(merchant_id, id, payload.status, payload.notes)
        .await?;
    Ok(Json(refund))
}
