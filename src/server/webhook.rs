//! Membership webhook endpoint.
//!
//! Always answers 200. The body says what happened; a non-2xx would only
//! make the sender redeliver an event that cannot succeed on retry.

use axum::Json;
use axum::body::Bytes;
use axum::extract::State;
use serde::Serialize;
use tracing::debug;

use super::AppState;
use crate::webhook::JoinAck;

#[derive(Debug, Serialize)]
pub struct WebhookReply {
    pub result: JoinAck,
}

/// `POST /webhook`
pub async fn webhook_handler(State(app_state): State<AppState>, body: Bytes) -> Json<WebhookReply> {
    let result = match serde_json::from_slice::<serde_json::Value>(&body) {
        Ok(payload) => app_state.webhook().handle_payload(&payload).await,
        Err(e) => {
            debug!("webhook body is not JSON: {e}");
            JoinAck::Ignored
        }
    };
    Json(WebhookReply { result })
}
