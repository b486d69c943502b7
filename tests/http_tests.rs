// Integration tests for the HTTP control API
//
// Requests go straight into the router; the session behind it runs against
// the scripted microphone and agent.

mod common;

use anyhow::Result;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use common::{today, Rig};
use loqa_voice::quota::{QuotaState, QUOTA_KEY};
use loqa_voice::store::{KeyValueStore, MemoryStore};
use loqa_voice::{create_router, AppState, SessionHandle};
use serde_json::Value;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tower::ServiceExt;

fn app(rig: Rig) -> Router {
    create_router(AppState::new(SessionHandle::spawn(rig.controller)))
}

async fn call(app: &Router, method: &str, uri: &str, body: Option<Value>) -> Result<(StatusCode, Value)> {
    let request = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(json) => request
            .header("content-type", "application/json")
            .body(Body::from(serde_json::to_vec(&json)?))?,
        None => request.body(Body::empty())?,
    };

    let response = app.clone().oneshot(request).await?;
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await?;
    let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    Ok((status, json))
}

#[tokio::test]
async fn test_health_check() -> Result<()> {
    let app = app(Rig::new());
    let response = app
        .oneshot(Request::builder().uri("/health").body(Body::empty())?)
        .await?;

    assert_eq!(response.status(), StatusCode::OK);
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await?;
    assert_eq!(&bytes[..], b"OK");
    Ok(())
}

#[tokio::test]
async fn test_start_status_stop() -> Result<()> {
    let app = app(Rig::new());

    let (status, body) = call(&app, "POST", "/voice/start", None).await?;
    assert_eq!(status, StatusCode::OK);
    assert!(body["session_id"].as_str().unwrap().starts_with("voice-"));
    assert_eq!(body["state"], "active");
    assert_eq!(body["remaining_quota"], 5);

    let (status, body) = call(&app, "GET", "/voice/status", None).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["state"], "active");
    assert_eq!(body["last_error"], Value::Null);

    // Already running
    let (status, _) = call(&app, "POST", "/voice/start", None).await?;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, body) = call(&app, "POST", "/voice/stop", None).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["state"], "idle");

    // Stopping again is a no-op
    let (status, _) = call(&app, "POST", "/voice/stop", None).await?;
    assert_eq!(status, StatusCode::OK);

    Ok(())
}

#[tokio::test]
async fn test_error_status_codes() -> Result<()> {
    let denied = Rig::new();
    denied.mic.deny.store(true, Ordering::SeqCst);
    let (status, body) = call(&app(denied), "POST", "/voice/start", None).await?;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert!(body["error"].as_str().is_some());

    let unreachable = Rig::new();
    unreachable.agent.fail_open.store(true, Ordering::SeqCst);
    let (status, _) = call(&app(unreachable), "POST", "/voice/start", None).await?;
    assert_eq!(status, StatusCode::BAD_GATEWAY);

    let store = Arc::new(MemoryStore::new());
    let spent = QuotaState {
        count: 5,
        day: today(),
    };
    store.set(QUOTA_KEY, &serde_json::to_vec(&spent)?)?;
    let exhausted = app(Rig::with_store(store));
    let (status, _) = call(&exhausted, "POST", "/voice/start", None).await?;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);

    let (_, body) = call(&exhausted, "GET", "/voice/status", None).await?;
    assert_eq!(body["state"], "idle");
    assert_eq!(body["remaining_quota"], 0);
    assert!(body["last_error"].as_str().unwrap().contains("quota"));

    Ok(())
}

#[tokio::test]
async fn test_text_turn_and_history() -> Result<()> {
    let app = app(Rig::new());

    let (status, body) = call(
        &app,
        "POST",
        "/chat/text",
        Some(serde_json::json!({"text": "good morning"})),
    )
    .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["role"], "agent");
    assert_eq!(body["text"], "You said: good morning");

    let (status, _) = call(&app, "POST", "/chat/text", Some(serde_json::json!({"text": "  "}))).await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = call(&app, "GET", "/chat/history", None).await?;
    assert_eq!(status, StatusCode::OK);
    let messages = body.as_array().unwrap();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0]["role"], "user");
    assert_eq!(messages[0]["text"], "good morning");
    assert_eq!(messages[1]["role"], "agent");

    // Text turns never count against the voice quota
    let (_, body) = call(&app, "GET", "/voice/status", None).await?;
    assert_eq!(body["remaining_quota"], 5);

    Ok(())
}
