use axum::{
    routing::{get, patch, post},
    Router,
};

use crate::{billing, refunds, transactions};

pub fn api_routes() -> Router {
    Router::new()
        .route("/api/payments", post(transactions::api::simulate_payment))
        .route(
            "/api/transactions/:id",
            get(transactions::api::get_transaction),
        )
        .route("/api/refunds", post(refunds::api::create_refund))
        .route("/api/refunds/:id", get(refunds::api::get_refund))
        .route("/api/refunds/:id/process", post(refunds::api::process_refund))
        .route("/api/refunds/:id/cancel", post(refunds::api::cancel_refund))
        .route(
            "/api/refunds/:id/status",
            patch(refunds::api::update_refund_status),
        )
        .route(
            "/api/subscriptions",
            post(billing::api::create_subscription),
        )
        .route(
            "/api/subscriptions/:id",
            get(billing::api::get_subscription),
        )
        .route(
            "/api/subscriptions/:id/cancel",
            post(billing::api::cancel_subscription),
        )
        .route(
            "/api/subscriptions/:id/pause",
            post(billing::api::pause_subscription),
        )
        .route(
            "/api/subscriptions/:id/resume",
            post(billing::api::resume_subscription),
        )
        .route(
            "/api/subscriptions/:id/reactivate",
            post(billing::api::reactivate_subscription),
        )
        .route(
            "/api/subscriptions/:id/amount",
            patch(billing::api::update_subscription_amount),
        )
        .route("/api/billing/run", post(billing::api::run_billing))
}
