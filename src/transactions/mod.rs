pub mod api;
pub mod models;
pub mod service;

pub use models::{RefundSummary, Transaction, TransactionStatus};
pub use service::TransactionService;
