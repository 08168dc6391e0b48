use axum::http::HeaderMap;
use uuid::Uuid;

use crate::error::AppError;

pub const MERCHANT_HEADER: &str = "x-merchant-id";

/// Merchant identity for sandbox calls. Real authentication is an outer
/// concern; the core only needs a merchant id to scope ownership checks.
pub fn merchant_from_headers(headers: &HeaderMap) -> Result<Uuid, AppError> {
    let raw = headers
        .get(MERCHANT_HEADER)
        .and_then(|value| value.to_str().ok())
        .ok_or(AppError::Unauthorized)?;
    Uuid::parse_str(raw).map_err(|_| AppError::Unauthorized)
}
