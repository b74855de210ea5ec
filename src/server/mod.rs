//! HTTP surface.
//!
//! # Endpoints
//!
//! - `POST /requests` - Intake; requires `x-api-key` (returns 202 Accepted)
//! - `GET /requests/{id}` - Status query; requires `x-api-key`
//! - `POST /webhook` - Membership events; always 200 with `{"result": ...}`
//! - `GET /health` - Returns 200 if the server is running

use std::sync::Arc;

use axum::http::HeaderMap;
use secrecy::SecretString;

use crate::config::secrets::secret_matches;
use crate::intake::Intake;
use crate::store::RequestStore;
use crate::webhook::WebhookHandler;

pub mod health;
pub mod requests;
pub mod webhook;

pub use health::health_handler;
pub use requests::{status_handler, submit_handler};
pub use webhook::webhook_handler;

/// Header carrying the shared caller secret.
pub const HEADER_API_KEY: &str = "x-api-key";

/// Shared application state, passed to handlers via axum's `State`.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    intake: Intake,
    store: Arc<dyn RequestStore>,
    webhook: WebhookHandler,
    api_secret: SecretString,
}

impl AppState {
    pub fn new(
        intake: Intake,
        store: Arc<dyn RequestStore>,
        webhook: WebhookHandler,
        api_secret: SecretString,
    ) -> Self {
        Self {
            inner: Arc::new(AppStateInner {
                intake,
                store,
                webhook,
                api_secret,
            }),
        }
    }

    pub fn intake(&self) -> &Intake {
        &self.inner.intake
    }

    pub fn store(&self) -> &Arc<dyn RequestStore> {
        &self.inner.store
    }

    pub fn webhook(&self) -> &WebhookHandler {
        &self.inner.webhook
    }

    /// Does the request carry the shared secret?
    pub fn authorized(&self, headers: &HeaderMap) -> bool {
        headers
            .get(HEADER_API_KEY)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|presented| secret_matches(&self.inner.api_secret, presented))
    }
}

/// Builds the axum Router with all endpoints.
pub fn build_router(app_state: AppState) -> axum::Router {
    use axum::routing::{get, post};

    axum::Router::new()
        .route("/requests", post(submit_handler))
        .route("/requests/{id}", get(status_handler))
        .route("/webhook", post(webhook_handler))
        .route("/health", get(health_handler))
        .with_state(app_state)
}
