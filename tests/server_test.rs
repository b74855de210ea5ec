//! HTTP routes driven through `tower::ServiceExt::oneshot`.

mod common;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use common::{Harness, Reply};
use http_body_util::BodyExt;
use invitegate::model::{RequestId, WorkMessage};
use invitegate::server::{AppState, HEADER_API_KEY, build_router};
use invitegate::store::RequestStore;
use secrecy::SecretString;
use serde_json::{Value, json};
use tower::ServiceExt;

const KEY: &str = "test-key";

fn app(h: &Harness) -> Router {
    build_router(AppState::new(
        h.intake.clone(),
        h.store.clone(),
        h.webhook.clone(),
        SecretString::from(KEY),
    ))
}

fn post(uri: &str, key: Option<&str>, body: &str) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json");
    if let Some(key) = key {
        builder = builder.header(HEADER_API_KEY, key);
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

fn get(uri: &str, key: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().uri(uri);
    if let Some(key) = key {
        builder = builder.header(HEADER_API_KEY, key);
    }
    builder.body(Body::empty()).unwrap()
}

async fn json_body(response: axum::response::Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

// ---------------------------------------------------------------------------
// Intake
// ---------------------------------------------------------------------------

#[tokio::test]
async fn submit_returns_accepted_with_request_id() {
    let h = Harness::new();
    let response = app(&h)
        .oneshot(post("/requests", Some(KEY), r#"{"user_id": "u1"}"#))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);

    let body = json_body(response).await;
    assert_eq!(body["status"], "queued");
    let id: RequestId = body["request_id"].as_str().unwrap().parse().unwrap();
    assert!(h.store.get_request(id).await.unwrap().is_some());
    assert_eq!(h.queue.scheduled().len(), 1);
    assert_eq!(h.provider.calls(), 0);
}

#[tokio::test]
async fn submit_without_key_is_unauthorized() {
    let h = Harness::new();
    for key in [None, Some("wrong")] {
        let response = app(&h)
            .oneshot(post("/requests", key, r#"{"user_id": "u1"}"#))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }
    assert_eq!(h.store.request_count(), 0);
}

#[tokio::test]
async fn submit_with_bad_body_is_bad_request() {
    let h = Harness::new();
    for body in ["{not json", r#"{"user_id": "  "}"#, ""] {
        let response = app(&h)
            .oneshot(post("/requests", Some(KEY), body))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{body:?}");
    }
    assert_eq!(h.store.request_count(), 0);
}

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

#[tokio::test]
async fn status_hides_link_until_done() {
    let h = Harness::new();
    let request = h
        .intake
        .submit(invitegate::model::NewInviteRequest::new("u1"))
        .await
        .unwrap();
    let uri = format!("/requests/{}", request.id);

    let response = app(&h).oneshot(get(&uri, Some(KEY))).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["status"], "queued");
    assert_eq!(body["attempts"], 0);
    assert!(body.get("invite_link").is_none());

    h.provider.push(Reply::Link("https://t.me/+STATUS".to_string()));
    h.worker
        .handle(WorkMessage {
            request_id: request.id,
        })
        .await;

    let body = json_body(app(&h).oneshot(get(&uri, Some(KEY))).await.unwrap()).await;
    assert_eq!(body["status"], "done");
    assert_eq!(body["attempts"], 1);
    assert_eq!(body["invite_link"], "https://t.me/+STATUS");
}

#[tokio::test]
async fn status_of_unknown_or_malformed_id() {
    let h = Harness::new();
    let missing = format!("/requests/{}", RequestId::new());
    let response = app(&h).oneshot(get(&missing, Some(KEY))).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = app(&h)
        .oneshot(get("/requests/not-a-uuid", Some(KEY)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app(&h).oneshot(get(&missing, None)).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

// ---------------------------------------------------------------------------
// Webhook and health
// ---------------------------------------------------------------------------

#[tokio::test]
async fn webhook_always_answers_ok() {
    let h = Harness::new();
    let cases = [
        ("garbage", "ignored"),
        (r#"{"hello": "world"}"#, "ignored"),
        (
            r#"{"invite_link": "https://t.me/+nobody", "status": "member", "user_id": 5}"#,
            "not_found",
        ),
    ];
    for (body, expected) in cases {
        let response = app(&h).oneshot(post("/webhook", None, body)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await, json!({"result": expected}));
    }
}

#[tokio::test]
async fn webhook_confirms_a_generated_link() {
    let h = Harness::new();
    let request = h
        .intake
        .submit(invitegate::model::NewInviteRequest::new("u1"))
        .await
        .unwrap();
    h.provider.push(Reply::Link("https://t.me/+HOOK".to_string()));
    h.worker
        .handle(WorkMessage {
            request_id: request.id,
        })
        .await;

    let body = r#"{"invite_link": "https://t.me/+HOOK", "status": "member", "user_id": "77"}"#;
    let response = app(&h).oneshot(post("/webhook", None, body)).await.unwrap();
    assert_eq!(json_body(response).await, json!({"result": "ok"}));
    assert!(h.store.get_request(request.id).await.unwrap().unwrap().joined);
}

#[tokio::test]
async fn health_is_ok() {
    let h = Harness::new();
    let response = app(&h).oneshot(get("/health", None)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}
