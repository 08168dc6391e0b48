pub mod api;
pub mod models;
pub mod service;

pub use models::{ApprovalInfo, Metadata, Refund, RefundStatus, RefundType};
pub use service::{CreateRefund, RefundLedger, DEFAULT_REFUND_METHOD};
