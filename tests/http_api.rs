#[path = "common/mod.rs"]
mod common;

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use common::{build_pipeline, CapturingLog, FakeBehavior, FakeProvider, TEST_MODEL};
use sentinel::{app, AppState};
use tower::ServiceExt; // for oneshot

fn make_app(behavior: FakeBehavior, max_request_bytes: Option<usize>) -> Router {
    let provider = FakeProvider::new(behavior);
    let log = Arc::new(CapturingLog::default());
    let state = AppState {
        pipeline: Arc::new(build_pipeline(provider, log)),
        max_request_bytes,
    };
    app(state)
}

fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_vec(&body).unwrap()))
        .unwrap()
}

async fn json_body(resp: axum::response::Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn chat_returns_response_trace_and_model() {
    let app = make_app(FakeBehavior::Reply("Paris."), None);
    let req = post_json("/chat", serde_json::json!({"prompt": "capital of France?"}));
    let resp = app.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let json = json_body(resp).await;
    assert_eq!(json["response"], "Paris.");
    assert_eq!(json["model"], TEST_MODEL);
    assert_eq!(json["trace_id"].as_str().unwrap().len(), 13);
}

#[tokio::test]
async fn blocked_prompt_maps_to_forbidden_with_trace_id() {
    let app = make_app(FakeBehavior::Reply("unused"), None);
    let req = post_json("/chat", serde_json::json!({"prompt": "jailbreak now"}));
    let resp = app.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    let json = json_body(resp).await;
    assert!(json["message"]
        .as_str()
        .unwrap()
        .starts_with("Access Denied:"));
    assert_eq!(json["trace_id"].as_str().unwrap().len(), 13);
}

#[tokio::test]
async fn provider_failure_still_returns_ok_with_unavailable_text() {
    let app = make_app(FakeBehavior::PermanentError, None);
    let req = post_json("/chat", serde_json::json!({"prompt": "hello"}));
    let resp = app.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let json = json_body(resp).await;
    assert!(json["response"]
        .as_str()
        .unwrap()
        .starts_with("Service temporarily unavailable"));
}

#[tokio::test]
async fn support_endpoint_shares_the_contract() {
    let app = make_app(FakeBehavior::Reply("happy to help"), None);
    let req = post_json("/support", serde_json::json!({"prompt": "order status?"}));
    let resp = app.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let json = json_body(resp).await;
    assert_eq!(json["response"], "happy to help");
}

#[tokio::test]
async fn health_reports_liveness() {
    let app = make_app(FakeBehavior::Reply("unused"), None);
    let req = Request::builder()
        .method("GET")
        .uri("/health")
        .body(Body::empty())
        .unwrap();
    let resp = app.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let json = json_body(resp).await;
    assert_eq!(json["status"], "Sentinel Active");
}

#[tokio::test]
async fn oversized_body_is_rejected() {
    let app = make_app(FakeBehavior::Reply("unused"), Some(32));
    let prompt = "x".repeat(200);
    let req = post_json("/chat", serde_json::json!({ "prompt": prompt }));
    let resp = app.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::PAYLOAD_TOO_LARGE);
}

#[tokio::test]
async fn malformed_json_is_a_client_error() {
    let app = make_app(FakeBehavior::Reply("unused"), None);
    let req = Request::builder()
        .method("POST")
        .uri("/chat")
        .header("content-type", "application/json")
        .body(Body::from("{not json"))
        .unwrap();
    let resp = app.oneshot(req).await.unwrap();
    assert!(resp.status().is_client_error());
}
