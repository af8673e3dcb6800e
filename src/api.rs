//! The HTTP control plane: thin `axum` handlers that parse a request, call
//! a [`BranchEngine`] method, and translate [`Error`] into the response
//! shape below. Request-id and tracing middleware come from `tower-http`,
//! the ambient observability layer this crate carries regardless of the
//! feature-level non-goals around authentication/quota/metrics.

use std::sync::Arc;

use axum::extract::{Path as AxumPath, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tower_http::cors::CorsLayer;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;

use crate::branch::Branch;
use crate::engine::BranchEngine;
use crate::error::Error;

/// Build the full control-plane router over a shared engine handle.
pub fn build_router(engine: Arc<BranchEngine>) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/api/status", get(api_status))
        .route("/api/branch", post(create_branch))
        .route("/api/branches", get(list_branches))
        .route("/api/branch/:name", get(get_branch).delete(delete_branch))
        .route("/api/branch/:name/start", post(start_branch))
        .route("/api/branch/:name/stop", post(stop_branch))
        .route("/api/branch/:name/restart", post(restart_branch))
        .route("/api/branch/:name/status", get(branch_status))
        .route("/api/branch/:name/logs", get(branch_logs))
        .route(
            "/api/branch/:name/gemini-session",
            post(start_gemini_session),
        )
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(TraceLayer::new_for_http())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
        .layer(CorsLayer::permissive())
        .with_state(engine)
}

/// Uniform error body for every non-2xx response.
#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    code: Option<String>,
}

struct ApiError(Error);

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.0.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = ErrorBody {
            error: self.0.to_string(),
            code: Some(self.0.category().to_string()),
        };
        (status, Json(body)).into_response()
    }
}

type ApiResult<T> = std::result::Result<T, ApiError>;

async fn root() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "service": "hovel",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn health() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "time": Utc::now().to_rfc3339(),
    }))
}

async fn api_status() -> impl IntoResponse {
    Json(json!({
        "endpoints": [
            "GET /",
            "GET /health",
            "GET /api/status",
            "POST /api/branch",
            "GET /api/branches",
            "GET /api/branch/{name}",
            "DELETE /api/branch/{name}",
            "POST /api/branch/{name}/start",
            "POST /api/branch/{name}/stop",
            "POST /api/branch/{name}/restart",
            "GET /api/branch/{name}/status",
            "GET /api/branch/{name}/logs",
            "POST /api/branch/{name}/gemini-session",
        ],
    }))
}

#[derive(Debug, Deserialize)]
struct CreateBranchRequest {
    branch_name: String,
    #[serde(default)]
    services: Vec<String>,
    gemini_api_key: String,
    #[serde(default)]
    auto_start: bool,
}

#[derive(Debug, Serialize)]
struct CreateBranchResponse {
    branch_name: String,
    port: u16,
    status: String,
    services: Vec<String>,
    gemini_api_validated: bool,
    container_started: String,
}

async fn create_branch(
    State(engine): State<Arc<BranchEngine>>,
    Json(request): Json<CreateBranchRequest>,
) -> ApiResult<impl IntoResponse> {
    let branch = engine
        .create(
            &request.branch_name,
            request.services,
            &request.gemini_api_key,
            request.auto_start,
        )
        .await?;

    let container_started = if request.auto_start { "pending" } else { "skipped" };

    Ok((
        StatusCode::OK,
        Json(CreateBranchResponse {
            branch_name: branch.name,
            port: branch.port,
            status: branch.status.to_string(),
            services: branch.services,
            gemini_api_validated: branch.credential_validated,
            container_started: container_started.to_string(),
        }),
    ))
}

#[derive(Debug, Serialize)]
struct ListBranchesResponse {
    branches: Vec<Branch>,
    count: usize,
    timestamp: String,
}

async fn list_branches(State(engine): State<Arc<BranchEngine>>) -> ApiResult<impl IntoResponse> {
    let branches = engine.list()?;
    let count = branches.len();
    Ok(Json(ListBranchesResponse {
        branches,
        count,
        timestamp: Utc::now().to_rfc3339(),
    }))
}

async fn get_branch(
    State(engine): State<Arc<BranchEngine>>,
    AxumPath(name): AxumPath<String>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(engine.get(&name)?))
}

async fn delete_branch(
    State(engine): State<Arc<BranchEngine>>,
    AxumPath(name): AxumPath<String>,
) -> ApiResult<impl IntoResponse> {
    engine.delete(&name).await?;
    Ok(Json(json!({ "deleted": true })))
}

#[derive(Debug, Deserialize, Default)]
struct StartBranchRequest {
    #[serde(default)]
    services: Option<Vec<String>>,
}

async fn start_branch(
    State(engine): State<Arc<BranchEngine>>,
    AxumPath(name): AxumPath<String>,
    body: Option<Json<StartBranchRequest>>,
) -> ApiResult<impl IntoResponse> {
    let services = body.and_then(|Json(req)| req.services);
    let services_started = services.clone().unwrap_or_default();
    let branch = engine.start(&name, services).await?;
    Ok(Json(json!({
        "status": branch.status.to_string(),
        "services_started": services_started,
    })))
}

async fn stop_branch(
    State(engine): State<Arc<BranchEngine>>,
    AxumPath(name): AxumPath<String>,
) -> ApiResult<impl IntoResponse> {
    let branch = engine.stop(&name).await?;
    Ok(Json(json!({ "status": branch.status.to_string() })))
}

async fn restart_branch(
    State(engine): State<Arc<BranchEngine>>,
    AxumPath(name): AxumPath<String>,
) -> ApiResult<impl IntoResponse> {
    let branch = engine.restart(&name).await?;
    Ok(Json(json!({ "status": branch.status.to_string() })))
}

async fn branch_status(
    State(engine): State<Arc<BranchEngine>>,
    AxumPath(name): AxumPath<String>,
) -> ApiResult<impl IntoResponse> {
    let per_service = engine.status(&name).await?;
    let branch = engine.get(&name)?;
    Ok(Json(json!({
        "container_status": branch.status.to_string(),
        "per_service": per_service,
    })))
}

#[derive(Debug, Deserialize)]
struct LogsQuery {
    lines: Option<u32>,
}

async fn branch_logs(
    State(engine): State<Arc<BranchEngine>>,
    AxumPath(name): AxumPath<String>,
    Query(query): Query<LogsQuery>,
) -> ApiResult<impl IntoResponse> {
    let logs = engine.logs(&name, query.lines).await?;
    Ok(Json(json!({ "logs": logs })))
}

async fn start_gemini_session(
    State(engine): State<Arc<BranchEngine>>,
    AxumPath(name): AxumPath<String>,
) -> ApiResult<impl IntoResponse> {
    let branch = engine.start_terminal_session(&name).await?;
    let session = branch
        .terminal_session
        .expect("start_terminal_session always populates terminal_session on success");
    Ok(Json(json!({
        "ttyd_port": session.port,
        "ttyd_url": session.url,
        "access_url": session.url,
        "command": session.command,
    })))
}
