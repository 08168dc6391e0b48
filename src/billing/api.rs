use std::sync::Arc;

use axum::{
    extract::{Extension, Path},
    http::HeaderMap,
    Json,
};
use chrono::Utc;
use serde::Deserialize;
use uuid::Uuid;

use crate::auth::merchant_from_headers;
use crate::error::AppResult;
use crate::store::SandboxStore;

use super::models::{RunnerReport, Subscription};
use super::runner;
use super::service::{CreateSubscription, SubscriptionService};

/// key: subscriptions-api -> lifecycle endpoints
pub async fn create_subscription(
    Extension(subscriptions): Extension<Arc<SubscriptionService>>,
    headers: HeaderMap,
    Json(payload): Json<CreateSubscription>,
) -> AppResult<Json<Subscription>> {
    let merchant_id = merchant_from_headers(&headers)?;
    let subscription = subscriptions
        .create_subscription(merchant_id, payload)
        .await?;
    Ok(Json(subscription))
}

pub async fn get_subscription(
    Extension(subscriptions): Extension<Arc<SubscriptionService>>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Subscription>> {
    let merchant_id = merchant_from_headers(&headers)?;
    let subscription = subscriptions.fetch(merchant_id, id).await?;
    Ok(Json(subscription))
}

#[derive(Debug, Deserialize)]
pub struct CancelSubscriptionRequest {
    #[serde(default)]
    pub cancel_at_period_end: bool,
    #[serde(default)]
    pub reason: Option<String>,
}

pub async fn cancel_subscription(
    Extension(subscriptions): Extension<Arc<SubscriptionService>>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
    Json(payload): Json<CancelSubscriptionRequest>,
) -> AppResult<Json<Subscription>> {
    let merchant_id = merchant_from_headers(&headers)?;
    let subscription = subscriptions
        .cancel_subscription(merchant_id, id, payload.cancel_at_period_end, payload.reason)
        .await?;
    Ok(Json(subscription))
}

#[derive(Debug, Deserialize)]
pub struct PauseSubscriptionRequest {
    #[serde(default)]
    pub reason: Option<String>,
}

pub async fn pause_subscription(
    Extension(subscriptions): Extension<Arc<SubscriptionService>>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
    Json(payload): Json<PauseSubscriptionRequest>,
) -> AppResult<Json<Subscription>> {
    let merchant_id = merchant_from_headers(&headers)?;
    let subscription = subscriptions
        .pause_subscription(merchant_id, id, payload.reason)
        .await?;
    Ok(Json(subscription))
}

pub async fn resume_subscription(
    Extension(subscriptions): Extension<Arc<SubscriptionService>>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Subscription>> {
    let merchant_id = merchant_from_headers(&headers)?;
    let subscription = subscriptions.resume_subscription(merchant_id, id).await?;
    Ok(Json(subscription))
}

pub async fn reactivate_subscription(
    Extension(subscriptions): Extension<Arc<SubscriptionService>>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Subscription>> {
    let merchant_id = merchant_from_headers(&headers)?;
    let subscription = subscriptions
        .reactivate_subscription(merchant_id, id)
        .await?;
    Ok(Json(subscription))
}

#[derive(Debug, Deserialize)]
pub struct UpdateAmountRequest {
    pub amount: i64,
}

pub async fn update_subscription_amount(
    Extension(subscriptions): Extension<Arc<SubscriptionService>>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateAmountRequest>,
) -> AppResult<Json<Subscription>> {
    let merchant_id = merchant_from_headers(&headers)?;
    let subscription = subscriptions
        .update_subscription_amount(merchant_id, id, payload.amount)
        .await?;
    Ok(Json(subscription))
}

/// On-demand trigger for one runner tick, alongside the scheduled loop.
pub async fn run_billing(
    Extension(subscriptions): Extension<Arc<SubscriptionService>>,
    Extension(store): Extension<Arc<dyn SandboxStore>>,
) -> AppResult<Json<RunnerReport>> {
    let report = runner::process_tick(&subscriptions, &store, Utc::now()).await?;
    Ok(Json(report))
}
