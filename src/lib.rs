pub mod auth;
pub mod billing;
pub mod config;
pub mod error;
pub mod gateway;
pub mod locks;
pub mod notifier;
pub mod refunds;
pub mod routes;
pub mod store;
pub mod transactions;

pub use routes::api_routes;
