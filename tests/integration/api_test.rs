//! HTTP API Integration Tests
//!
//! Drives the axum router in-process with `tower::ServiceExt::oneshot`:
//! - Health, tool listing, schemas and metrics
//! - Objective creation, lookup, replies and cancellation status codes
//! - The SSE stream ends with the `[DONE]` frame

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;
use uuid::Uuid;

use pixlie_core::ConversationStatus;
use pixlie_engine::services::streaming::{parse_frames, DONE_FRAME};
use pixlie_engine::{create_router, AppState};
use pixlie_llm::ScriptedPlanner;

use crate::support::{answer, ask, count_authors, wait_until_terminal, TestEngine};

// ============================================================================
// Helpers
// ============================================================================

fn router(engine: &TestEngine) -> Router {
    create_router(AppState::new(engine.coordinator.clone()))
}

async fn send(router: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Vec<u8>) {
    let mut request = Request::builder().method(method).uri(uri);
    let body = match body {
        Some(json) => {
            request = request.header(header::CONTENT_TYPE, "application/json");
            Body::from(json.to_string())
        }
        None => Body::empty(),
    };
    let response = router
        .clone()
        .oneshot(request.body(body).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    (status, bytes.to_vec())
}

async fn send_json(router: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let (status, bytes) = send(router, method, uri, body).await;
    let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, value)
}

async fn create(router: &Router, text: &str) -> Uuid {
    let (status, body) = send_json(
        router,
        Method::POST,
        "/api/v1/objectives",
        Some(json!({"workspace": "research", "objective": text})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    serde_json::from_value(body["objective_id"].clone()).unwrap()
}

// ============================================================================
// Health and Tools
// ============================================================================

#[tokio::test]
async fn test_health() {
    let engine = TestEngine::new(vec![Arc::new(ScriptedPlanner::repeating(answer("x")))]);
    let router = router(&engine);

    let (status, body) = send_json(&router, Method::GET, "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["tools"], 4);
    assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));

    engine.coordinator.shutdown().await;
}

#[tokio::test]
async fn test_tool_endpoints() {
    let engine = TestEngine::new(vec![Arc::new(ScriptedPlanner::repeating(answer("x")))]);
    let router = router(&engine);

    let (status, tools) = send_json(&router, Method::GET, "/api/v1/tools", None).await;
    assert_eq!(status, StatusCode::OK);
    let mut names: Vec<&str> = tools
        .as_array()
        .unwrap()
        .iter()
        .map(|t| t["name"].as_str().unwrap())
        .collect();
    names.sort();
    assert_eq!(
        names,
        vec!["explore_relations", "query_sql", "search_entities", "search_items"]
    );

    let (status, schemas) = send_json(&router, Method::GET, "/api/v1/tools/schema", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(schemas.as_object().unwrap().len(), 4);
    assert_eq!(schemas["query_sql"]["type"], "object");
    assert!(schemas["query_sql"]["properties"]["query"].is_object());

    let (status, tool) = send_json(&router, Method::GET, "/api/v1/tools/query_sql", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(tool["name"], "query_sql");

    let (status, metrics) =
        send_json(&router, Method::GET, "/api/v1/tools/query_sql/metrics", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(metrics["calls"], 0);

    let (status, body) = send_json(&router, Method::GET, "/api/v1/tools/drop_tables", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"].as_str().unwrap().contains("drop_tables"));
    let (status, _) =
        send_json(&router, Method::GET, "/api/v1/tools/drop_tables/metrics", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    engine.coordinator.shutdown().await;
}

// ============================================================================
// Objectives
// ============================================================================

#[tokio::test]
async fn test_objective_lifecycle_status_codes() {
    let engine = TestEngine::new(vec![Arc::new(ScriptedPlanner::new(vec![
        count_authors(),
        answer("42 authors"),
    ]))]);
    let router = router(&engine);

    let id = create(&router, "How many distinct authors?").await;
    wait_until_terminal(&engine.coordinator, id).await;

    let (status, conversation) =
        send_json(&router, Method::GET, &format!("/api/v1/objectives/{}", id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(conversation["status"], "answered");
    assert_eq!(conversation["steps"].as_array().unwrap().len(), 2);

    let (status, list) =
        send_json(&router, Method::GET, "/api/v1/objectives?workspace=research", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(list[0]["status"], "completed");

    let (status, _) = send_json(
        &router,
        Method::POST,
        &format!("/api/v1/objectives/{}/respond", id),
        Some(json!({"text": "thanks"})),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, _) = send_json(
        &router,
        Method::POST,
        &format!("/api/v1/objectives/{}/cancel", id),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, saved) =
        send_json(&router, Method::POST, "/api/v1/workspaces/research/save", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(saved["saved"], true);

    engine.coordinator.shutdown().await;
}

#[tokio::test]
async fn test_bad_requests() {
    let engine = TestEngine::new(vec![Arc::new(ScriptedPlanner::repeating(answer("x")))]);
    let router = router(&engine);

    let (status, _) = send_json(
        &router,
        Method::POST,
        "/api/v1/objectives",
        Some(json!({"workspace": "research", "objective": ""})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send_json(
        &router,
        Method::GET,
        &format!("/api/v1/objectives/{}", Uuid::new_v4()),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) =
        send_json(&router, Method::POST, "/api/v1/workspaces/nowhere/save", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    engine.coordinator.shutdown().await;
}

#[tokio::test]
async fn test_respond_and_cancel_are_accepted() {
    let engine = TestEngine::new(vec![Arc::new(ScriptedPlanner::repeating(ask(
        "Which year?",
    )))]);
    let router = router(&engine);

    let id = create(&router, "q").await;
    let (status, body) = send_json(
        &router,
        Method::POST,
        &format!("/api/v1/objectives/{}/respond", id),
        Some(json!({"text": "2024"})),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["status"], "accepted");

    let (status, _) = send_json(
        &router,
        Method::POST,
        &format!("/api/v1/objectives/{}/cancel", id),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);

    let conversation = wait_until_terminal(&engine.coordinator, id).await;
    assert_eq!(conversation.status(), ConversationStatus::Cancelled);

    engine.coordinator.shutdown().await;
}

// ============================================================================
// Streaming
// ============================================================================

#[tokio::test]
async fn test_stream_ends_with_done_frame() {
    let text = "There are 42 distinct authors.";
    let engine = TestEngine::new(vec![Arc::new(
        ScriptedPlanner::new(vec![answer(text)]).with_delay(Duration::from_millis(100)),
    )]);
    let router = router(&engine);

    let id = create(&router, "q").await;
    let response = router
        .clone()
        .oneshot(
            Request::builder()
                .uri(format!("/api/v1/objectives/{}/stream", id))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[header::CONTENT_TYPE],
        "text/event-stream"
    );

    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body = String::from_utf8(bytes.to_vec()).unwrap();
    assert!(body.ends_with(DONE_FRAME));

    let frames = parse_frames(&body);
    assert_eq!(frames.last().map(String::as_str), Some("[DONE]"));
    let events: Vec<Value> = frames[..frames.len() - 1]
        .iter()
        .map(|f| serde_json::from_str(f).unwrap())
        .collect();
    let streamed: String = events
        .iter()
        .filter(|e| e["type"] == "content")
        .map(|e| e["content"].as_str().unwrap())
        .collect();
    assert_eq!(streamed, text);
    let last = events.last().unwrap();
    assert_eq!(last["type"], "tool_execution");
    assert_eq!(last["step"]["results"]["summary"], text);

    engine.coordinator.shutdown().await;
}
