//! HTTP route handlers for the API.

use std::sync::Arc;

use axum::{
    body::Body,
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::Response,
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info};
use uuid::Uuid;

use pixlie_core::{Conversation, ToolDescriptor};
use pixlie_tools::ToolMetrics;

use super::AppState;
use crate::models::objective::ObjectiveSummary;
use crate::services::streaming::{sse_frames, EVENT_STREAM_CONTENT_TYPE};
use crate::utils::error::{AppError, AppResult};

// ============================================================================
// Health
// ============================================================================

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub uptime_seconds: u64,
    pub tools: usize,
    pub workspaces: Vec<String>,
}

/// Health check endpoint.
pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
        uptime_seconds: state.uptime_seconds(),
        tools: state.sandbox.registry().len(),
        workspaces: state.coordinator.workspace_names(),
    })
}

// ============================================================================
// Objectives
// ============================================================================

/// Create request body.
#[derive(Debug, Deserialize)]
pub struct CreateObjectiveRequest {
    pub workspace: String,
    pub objective: String,
}

/// Create response body.
#[derive(Debug, Serialize)]
pub struct CreateObjectiveResponse {
    pub objective_id: Uuid,
    pub conversation: Conversation,
}

#[derive(Debug, Deserialize)]
pub struct ListObjectivesQuery {
    pub workspace: Option<String>,
}

/// Reply request body.
#[derive(Debug, Deserialize)]
pub struct RespondRequest {
    pub text: String,
}

/// Body of `202 Accepted` responses.
#[derive(Debug, Serialize)]
pub struct AcceptedResponse {
    pub objective_id: Uuid,
    pub status: &'static str,
}

impl AcceptedResponse {
    fn new(objective_id: Uuid) -> Self {
        Self {
            objective_id,
            status: "accepted",
        }
    }
}

pub async fn create_objective(
    State(state): State<Arc<AppState>>,
    Json(request): Json<CreateObjectiveRequest>,
) -> AppResult<(StatusCode, Json<CreateObjectiveResponse>)> {
    info!(
        workspace = %request.workspace,
        objective_preview = %request.objective.chars().take(50).collect::<String>(),
        "Creating objective"
    );
    let objective_id = state
        .coordinator
        .create_objective(&request.workspace, &request.objective)
        .await?;
    let conversation = state.coordinator.conversation(objective_id).await?;

    Ok((
        StatusCode::CREATED,
        Json(CreateObjectiveResponse {
            objective_id,
            conversation,
        }),
    ))
}

pub async fn list_objectives(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListObjectivesQuery>,
) -> AppResult<Json<Vec<ObjectiveSummary>>> {
    let summaries = state
        .coordinator
        .list_objectives(query.workspace.as_deref())
        .await?;
    Ok(Json(summaries))
}

pub async fn get_objective(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Conversation>> {
    Ok(Json(state.coordinator.conversation(id).await?))
}

pub async fn respond(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(request): Json<RespondRequest>,
) -> AppResult<(StatusCode, Json<AcceptedResponse>)> {
    state
        .coordinator
        .submit_user_response(id, &request.text)
        .await?;
    Ok((StatusCode::ACCEPTED, Json(AcceptedResponse::new(id))))
}

pub async fn cancel_objective(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> AppResult<(StatusCode, Json<AcceptedResponse>)> {
    state.coordinator.cancel(id).await?;
    Ok((StatusCode::ACCEPTED, Json(AcceptedResponse::new(id))))
}

/// Ledger replay followed by live events, as `text/event-stream`.
pub async fn stream_objective(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> AppResult<Response> {
    let subscription = state.coordinator.subscribe(id).await?;
    debug!(objective = %id, live = subscription.is_live(), "Stream opened");

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, EVENT_STREAM_CONTENT_TYPE)
        .header(header::CACHE_CONTROL, "no-cache")
        .body(Body::from_stream(sse_frames(subscription)))
        .map_err(|e| AppError::internal(format!("Failed to build stream response: {}", e)))
}

// ============================================================================
// Tools
// ============================================================================

pub async fn list_tools(State(state): State<Arc<AppState>>) -> Json<Vec<ToolDescriptor>> {
    Json(state.sandbox.descriptors())
}

pub async fn tool_schemas(State(state): State<Arc<AppState>>) -> Json<Map<String, Value>> {
    Json(state.sandbox.registry().schemas())
}

pub async fn get_tool(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> AppResult<Json<ToolDescriptor>> {
    state
        .sandbox
        .descriptor(&name)
        .map(Json)
        .ok_or_else(|| AppError::not_found(format!("Tool not found: {}", name)))
}

pub async fn tool_metrics(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> AppResult<Json<ToolMetrics>> {
    state
        .sandbox
        .tool_metrics(&name)
        .map(Json)
        .ok_or_else(|| AppError::not_found(format!("Tool not found: {}", name)))
}

// ============================================================================
// Workspaces
// ============================================================================

#[derive(Debug, Serialize)]
pub struct SaveWorkspaceResponse {
    pub workspace: String,
    pub saved: bool,
}

pub async fn save_workspace(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> AppResult<Json<SaveWorkspaceResponse>> {
    state.coordinator.save_workspace(&name).await?;
    info!(workspace = %name, "Workspace saved on request");
    Ok(Json(SaveWorkspaceResponse {
        workspace: name,
        saved: true,
    }))
}
