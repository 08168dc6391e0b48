pub mod api;
pub mod clock;
pub mod models;
pub mod runner;
pub mod service;

pub use clock::next_billing_date;
pub use models::{
    BillingInterval, BillingOutcome, RunnerReport, Subscription, SubscriptionStatus,
};
pub use runner::{process_tick as run_billing_tick, spawn as spawn_billing_runner};
pub use service::{CreateSubscription, SubscriptionService};
