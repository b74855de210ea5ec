//! Liveness and database health check.

use axum::http::StatusCode;

/// Always 200 while the process is serving.
pub async fn health_handler() -> (StatusCode, &'static str) {
    (StatusCode::OK, "ok")
}
