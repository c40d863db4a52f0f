//! Tool HTTP server.
//!
//! Exposes the [`ToolRegistry`] over a JSON HTTP API and over MCP
//! Streamable HTTP, so the chat bridge (or any MCP client) can call the
//! lookups.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/health` | Health check (returns version) |
//! | `GET`  | `/tools/list` | List all registered tools with schemas |
//! | `POST` | `/tools/{name}` | Call a tool; answers `{ "result": <envelope> }` |
//! | `*`    | `/mcp` | MCP Streamable HTTP endpoint |
//!
//! # Error Contract
//!
//! Transport-level failures use the body
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "missing required parameter: userName" } }
//! ```
//!
//! with codes `bad_request` (400) and `not_found` (404). Upstream or cache
//! failures are *not* HTTP errors: they arrive as a `200` whose `result` is
//! the `{ "error": message }` envelope.
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use rmcp::transport::streamable_http_server::{
    session::local::LocalSessionManager, StreamableHttpService,
};
use serde::Serialize;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use crate::config::Config;
use crate::engine::Engine;
use crate::mcp::McpBridge;
use crate::tools::{validate_params, ToolContext, ToolInfo, ToolRegistry};

#[derive(Clone)]
struct AppState {
    ctx: ToolContext,
    tools: Arc<ToolRegistry>,
}

/// Starts the tool server on `[server].bind` with the production engine.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let engine = Arc::new(Engine::from_config(config)?);
    run_server_with_engine(&config.server.bind, engine).await
}

/// Starts the tool server around an existing engine.
///
/// Runs until the process is terminated; returns an error if binding fails.
pub async fn run_server_with_engine(bind_addr: &str, engine: Arc<Engine>) -> anyhow::Result<()> {
    let tools = Arc::new(ToolRegistry::with_builtins());
    let app = router(ToolContext::new(engine), tools.clone());

    tracing::info!(count = tools.len(), "registered tools");
    for t in tools.tools() {
        tracing::debug!(tool = t.name(), "POST /tools/{}", t.name());
    }

    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    tracing::info!("tool server listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app).await?;

    Ok(())
}

/// Builds the router without binding, for embedding and tests.
pub fn router(ctx: ToolContext, tools: Arc<ToolRegistry>) -> Router {
    let bridge = McpBridge::new(ctx.clone(), tools.clone());
    let mcp_service = StreamableHttpService::new(
        move || Ok(bridge.clone()),
        LocalSessionManager::default().into(),
        Default::default(),
    );

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/tools/list", get(handle_list_tools))
        .route("/tools/{name}", post(handle_tool_call))
        .nest_service("/mcp", mcp_service)
        .layer(cors)
        .with_state(AppState { ctx, tools })
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request".to_string(),
        message: message.into(),
    }
}

fn not_found(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::NOT_FOUND,
        code: "not_found".to_string(),
        message: message.into(),
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ GET /tools/list ============

#[derive(Serialize)]
struct ToolListResponse {
    tools: Vec<ToolInfo>,
}

async fn handle_list_tools(State(state): State<AppState>) -> Json<ToolListResponse> {
    let tools = state
        .tools
        .tools()
        .iter()
        .map(|t| ToolInfo::of(t.as_ref()))
        .collect();
    Json(ToolListResponse { tools })
}

// ============ POST /tools/{name} ============

/// Looks the tool up, validates parameters and executes it.
///
/// `404` for an unknown tool, `400` for invalid parameters.
async fn handle_tool_call(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(params): Json<serde_json::Value>,
) -> Result<Json<serde_json::Value>, AppError> {
    let tool = state
        .tools
        .find(&name)
        .ok_or_else(|| not_found(format!("no tool registered with name: {}", name)))?;

    let validated = validate_params(&tool.parameters_schema(), &params)
        .map_err(|e| bad_request(format!("{}: {}", name, e)))?;

    let result = tool
        .execute(validated, &state.ctx)
        .await
        .map_err(|e| bad_request(format!("{}: {}", name, e)))?;

    Ok(Json(serde_json::json!({ "result": result })))
}
