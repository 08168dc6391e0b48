use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::{Extension, Router};
use serde_json::{json, Value};
use tower::ServiceExt; // for `oneshot`
use uuid::Uuid;

use paygate::api_routes;
use paygate::billing::SubscriptionService;
use paygate::gateway::{ChargeRequest, GatewayDecision, RefundRequest, SettlementGateway};
use paygate::notifier::NullNotifier;
use paygate::refunds::RefundLedger;
use paygate::store::{MemoryStore, SandboxStore};
use paygate::transactions::TransactionService;

struct ApproveAll;

#[async_trait]
impl SettlementGateway for ApproveAll {
    async fn authorize_charge(&self, _request: &ChargeRequest) -> Result<GatewayDecision> {
        Ok(GatewayDecision {
            approved: true,
            message: "approved".to_string(),
            code: None,
        })
    }
    async fn settle_refund(&self, _request: &RefundRequest) -> Result<GatewayDecision> {
        Ok(GatewayDecision {
            approved: true,
            message: "approved".to_string(),
            code: None,
        })
    }
}

fn sandbox_app() -> (Router, Uuid, Uuid) {
    let (store, merchant_id, customer_id) = MemoryStore::with_sandbox_seed();
    let store: Arc<dyn SandboxStore> = Arc::new(store);
    let gateway: Arc<dyn SettlementGateway> = Arc::new(ApproveAll);
    let transactions = Arc::new(TransactionService::new(store.clone(), gateway.clone()));
    let refunds = Arc::new(RefundLedger::new(
        store.clone(),
        gateway,
        transactions.clone(),
        Arc::new(NullNotifier),
    ));
    let subscriptions = Arc::new(SubscriptionService::new(
        store.clone(),
        transactions.clone(),
        Arc::new(NullNotifier),
    ));
    let app = api_routes()
        .layer(Extension(store))
        .layer(Extension(transactions))
        .layer(Extension(refunds))
        .layer(Extension(subscriptions));
    (app, merchant_id, customer_id)
}

fn post_json(uri: &str, merchant_id: Option<Uuid>, body: Value) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json");
    if let Some(id) = merchant_id {
        builder = builder.header("x-merchant-id", id.to_string());
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

async fn json_body(response: axum::response::Response) -> Value {
    let bytes = hyper::body::to_bytes(response.into_body()).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn missing_merchant_header_is_unauthorized() {
    let (app, _, _) = sandbox_app();
    let response = app
        .oneshot(post_json(
            "/api/payments",
            None,
            json!({ "amount": 5000, "currency": "USD" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn payment_then_refund_roundtrip() {
    let (app, merchant_id, _) = sandbox_app();

    let response = app
        .clone()
        .oneshot(post_json(
            "/api/payments",
            Some(merchant_id),
            json!({ "amount": 5000, "currency": "USD" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let transaction = json_body(response).await;
    assert_eq!(transaction["status"], "success");
    let transaction_id = transaction["id"].as_str().unwrap().to_string();

    let response = app
        .clone()
        .oneshot(post_json(
            "/api/refunds",
            Some(merchant_id),
            json!({
                "transaction_id": transaction_id,
                "amount": 2000,
                "reason": "customer request",
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let refund = json_body(response).await;
    assert_eq!(refund["status"], "pending");
    assert_eq!(refund["refund_type"], "partial");
    let refund_id = refund["id"].as_str().unwrap();

    let response = app
        .clone()
        .oneshot(post_json(
            &format!("/api/refunds/{refund_id}/process"),
            Some(merchant_id),
            json!({}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let processed = json_body(response).await;
    assert_eq!(processed["status"], "completed");

    // Balance is visible on the transaction afterwards.
    let response = app
        .oneshot(
            Request::builder()
                .uri(format!("/api/transactions/{transaction_id}"))
                .header("x-merchant-id", merchant_id.to_string())
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let fetched = json_body(response).await;
    assert_eq!(fetched["refunded_amount"], 2000);
    assert_eq!(fetched["refund_status"], "partially_refunded");
}

#[tokio::test]
async fn over_refund_maps_to_conflict() {
    let (app, merchant_id, _) = sandbox_app();

    let response = app
        .clone()
        .oneshot(post_json(
            "/api/payments",
            Some(merchant_id),
            json!({ "amount": 1000, "currency": "USD" }),
        ))
        .await
        .unwrap();
    let transaction = json_body(response).await;
    let transaction_id = transaction["id"].as_str().unwrap().to_string();

    let response = app
        .oneshot(post_json(
            "/api/refunds",
            Some(merchant_id),
            json!({
                "transaction_id": transaction_id,
                "amount": 2000,
                "reason": "customer request",
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);
    let bytes = hyper::body::to_bytes(response.into_body()).await.unwrap();
    let message = String::from_utf8(bytes.to_vec()).unwrap();
    assert!(message.contains("1000 remaining"), "{message}");
}

#[tokio::test]
async fn subscription_lifecycle_over_http() {
    let (app, merchant_id, customer_id) = sandbox_app();

    let response = app
        .clone()
        .oneshot(post_json(
            "/api/subscriptions",
            Some(merchant_id),
            json!({
                "customer_id": customer_id,
                "plan_id": Uuid::new_v4(),
                "amount": 2900,
                "currency": "USD",
                "interval": "monthly",
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let subscription = json_body(response).await;
    assert_eq!(subscription["status"], "active");
    let id = subscription["id"].as_str().unwrap().to_string();

    let response = app
        .clone()
        .oneshot(post_json(
            &format!("/api/subscriptions/{id}/pause"),
            Some(merchant_id),
            json!({ "reason": "vacation" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let paused = json_body(response).await;
    assert_eq!(paused["status"], "paused");

    // Resuming a paused subscription succeeds; resuming twice conflicts.
    let response = app
        .clone()
        .oneshot(post_json(
            &format!("/api/subscriptions/{id}/resume"),
            Some(merchant_id),
            json!({}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .oneshot(post_json(
            &format!("/api/subscriptions/{id}/resume"),
            Some(merchant_id),
            json!({}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);
}
