//! Intake and status endpoints.

use axum::Json;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use serde_json::json;
use tracing::error;

use super::AppState;
use crate::error::Error;
use crate::model::{NewInviteRequest, RequestId, RequestStatus};

/// Errors surfaced synchronously to intake/status callers.
#[derive(Debug)]
pub struct ApiError(Error);

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        ApiError(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            Error::Validation(_) => StatusCode::BAD_REQUEST,
            Error::Unauthorized => StatusCode::UNAUTHORIZED,
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            other => {
                error!("request failed: {other}");
                return (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({"error": "internal error"})),
                )
                    .into_response();
            }
        };
        (status, Json(json!({"error": self.0.to_string()}))).into_response()
    }
}

#[derive(Debug, Serialize)]
pub struct Queued {
    pub status: &'static str,
    pub request_id: RequestId,
}

#[derive(Debug, Serialize)]
pub struct StatusView {
    pub request_id: RequestId,
    pub status: RequestStatus,
    pub attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub invite_link: Option<String>,
}

/// `POST /requests`
///
/// Body `{"user_id": "...", "correlation_id": "..."}`; returns 202 with
/// `{"status": "queued", "request_id": "..."}`.
pub async fn submit_handler(
    State(app_state): State<AppState>,
    headers: HeaderMap,
    body: axum::body::Bytes,
) -> Result<(StatusCode, Json<Queued>), ApiError> {
    if !app_state.authorized(&headers) {
        return Err(Error::Unauthorized.into());
    }
    let new: NewInviteRequest = if body.is_empty() {
        NewInviteRequest::default()
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| Error::Validation(format!("invalid JSON body: {e}")))?
    };

    let request = app_state.intake().submit(new).await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(Queued {
            status: "queued",
            request_id: request.id,
        }),
    ))
}

/// `GET /requests/{id}`
///
/// The invite link is only included once the request is done.
pub async fn status_handler(
    State(app_state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<StatusView>, ApiError> {
    if !app_state.authorized(&headers) {
        return Err(Error::Unauthorized.into());
    }
    let id: RequestId = id.parse()?;
    let request = app_state
        .store()
        .get_request(id)
        .await?
        .ok_or_else(|| Error::NotFound(format!("request {id}")))?;

    Ok(Json(StatusView {
        request_id: request.id,
        status: request.status,
        attempts: request.attempts,
        invite_link: request
            .invite_link
            .filter(|_| request.status == RequestStatus::Done),
    }))
}
