//! Webhook ingestion: HMAC signature verification, decision-id extraction,
//! and dispatch of push / PR / CI events into the outcome tracker.

#[cfg(feature = "server")]
mod endpoint;
mod handler;

#[cfg(feature = "server")]
pub use endpoint::webhook_router;
pub use handler::{extract_decision_id, WebhookHandler, WebhookResponse};
