use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{routing::get, Extension, Router};
use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::{fmt, EnvFilter};

use paygate::billing::{spawn_billing_runner, SubscriptionService};
use paygate::config;
use paygate::gateway::{SettlementGateway, SimulatedGateway};
use paygate::notifier::{EventNotifier, NullNotifier, WebhookNotifier};
use paygate::refunds::RefundLedger;
use paygate::routes::api_routes;
use paygate::store::{MemoryStore, PgStore, SandboxStore};
use paygate::transactions::TransactionService;

async fn root() -> &'static str {
    "Paygate sandbox API"
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .json()
        .init();

    dotenvy::dotenv().ok();

    let store: Arc<dyn SandboxStore> = match std::env::var("DATABASE_URL") {
        Ok(db_url) => {
            let pool = PgPoolOptions::new()
                .max_connections(5)
                .connect(&db_url)
                .await?;
            if let Err(error) = sqlx::migrate!().run(&pool).await {
                if *config::ALLOW_MIGRATION_FAILURE {
                    tracing::warn!(
                        ?error,
                        "Database migrations failed but continuing due to ALLOW_MIGRATION_FAILURE"
                    );
                } else {
                    return Err(Box::new(error) as Box<dyn std::error::Error>);
                }
            }
            Arc::new(PgStore::new(pool))
        }
        Err(_) => {
            let (store, merchant_id, customer_id) = MemoryStore::with_sandbox_seed();
            tracing::warn!(
                %merchant_id,
                %customer_id,
                "DATABASE_URL unset; running with an in-memory sandbox store"
            );
            Arc::new(store)
        }
    };

    let gateway: Arc<dyn SettlementGateway> = Arc::new(SimulatedGateway::from_env());
    let notifier: Arc<dyn EventNotifier> = match config::WEBHOOK_ENDPOINT.clone() {
        Some(endpoint) => Arc::new(WebhookNotifier::new(
            endpoint,
            config::WEBHOOK_SECRET.clone(),
            Duration::from_secs(*config::WEBHOOK_TIMEOUT_SECS),
        )?),
        None => Arc::new(NullNotifier),
    };

    let transactions = Arc::new(TransactionService::new(store.clone(), gateway.clone()));
    let refunds = Arc::new(RefundLedger::new(
        store.clone(),
        gateway.clone(),
        transactions.clone(),
        notifier.clone(),
    ));
    let subscriptions = Arc::new(SubscriptionService::new(
        store.clone(),
        transactions.clone(),
        notifier.clone(),
    ));

    spawn_billing_runner(subscriptions.clone(), store.clone());

    let app = Router::new()
        .route("/", get(root))
        .merge(api_routes())
        .layer(Extension(store.clone()))
        .layer(Extension(transactions))
        .layer(Extension(refunds))
        .layer(Extension(subscriptions));

    let addr: SocketAddr = format!("{}:{}", config::BIND_ADDRESS.as_str(), *config::BIND_PORT)
        .parse()
        .map_err(|error| Box::new(error) as Box<dyn std::error::Error>)?;
    tracing::info!(%addr, "Listening for incoming connections");
    axum::Server::bind(&addr)
        .serve(app.into_make_service())
        .await?;

    Ok(())
}
