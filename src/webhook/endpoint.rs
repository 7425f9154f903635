//! HTTP listener for webhook deliveries (feature `server`).
//!
//! The route reads the raw body bytes before any JSON parsing so that
//! signature verification runs over exactly what was received.

use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::Json;
use axum::routing::post;
use axum::Router;
use std::sync::Arc;

use crate::webhook::handler::{WebhookHandler, WebhookResponse};

/// Build the webhook router. Mount with an axum server of your choosing.
pub fn webhook_router(handler: Arc<WebhookHandler>) -> Router {
    Router::new()
        .route("/webhook", post(receive_webhook))
        .with_state(handler)
}

async fn receive_webhook(
    State(handler): State<Arc<WebhookHandler>>,
    headers: HeaderMap,
    body: axum::body::Bytes,
) -> Json<WebhookResponse> {
    let event_type = headers
        .get("x-event-type")
        .or_else(|| headers.get("x-github-event"))
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string();
    let signature = headers
        .get("x-hub-signature-256")
        .and_then(|v| v.to_str().ok())
        .map(String::from);

    let response = handler.process(&event_type, &body, signature.as_deref());
    Json(response)
}
