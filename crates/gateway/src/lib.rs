//! HTTP gateway for ragbot.
//!
//! Exposes the knowledge base retrieval tool to other agents and services:
//!
//! - `GET  /health`            liveness and version
//! - `GET  /v1/tools`          tool definitions (name, description, JSON schema)
//! - `POST /v1/retrieve`       `{query, retrieve_limit?}` → rendered context + documents
//! - `POST /v1/tools/{name}`   `{arguments}` → tool result
//!
//! Built on Axum.

use axum::extract::{DefaultBodyLimit, Path, State};
use axum::{
    Router,
    http::StatusCode,
    response::Json,
    routing::{get, post},
};
use ragbot_config::AppConfig;
use ragbot_core::error::{RetrievalError, ToolError};
use ragbot_core::tool::{Tool, ToolRegistry, ToolResult};
use ragbot_rag::{RetrievalClient, RetrievedDocument, Retriever};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Request bodies above this size are rejected with 413.
const BODY_LIMIT_BYTES: usize = 64 * 1024;

/// Shared application state for the gateway.
pub struct GatewayState {
    pub retriever: Arc<dyn Retriever>,
    pub tools: ToolRegistry,
}

impl GatewayState {
    /// State whose registry wraps `retriever` under `tool_name`.
    pub fn new(retriever: Arc<dyn Retriever>, tool_name: &str) -> Self {
        let tools = ragbot_tools::default_registry(retriever.clone(), tool_name);
        Self { retriever, tools }
    }
}

type SharedState = Arc<GatewayState>;

/// Build the Axum router with all gateway routes.
pub fn build_router(state: SharedState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/v1/tools", get(list_tools_handler))
        .route("/v1/tools/{name}", post(call_tool_handler))
        .route("/v1/retrieve", post(retrieve_handler))
        .layer(DefaultBodyLimit::max(BODY_LIMIT_BYTES))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the gateway with retrieval built from `config`, until `shutdown` fires.
pub async fn start(
    config: &AppConfig,
    shutdown: CancellationToken,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let retriever: Arc<dyn Retriever> = Arc::new(RetrievalClient::from_config(&config.rag)?);
    start_with(retriever, config, shutdown).await
}

/// Start the gateway over an existing retriever, so its token cache is
/// shared with the other retrieval call sites in the process.
pub async fn start_with(
    retriever: Arc<dyn Retriever>,
    config: &AppConfig,
    shutdown: CancellationToken,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let state = Arc::new(GatewayState::new(retriever, &config.rag.tool_name));
    let addr = format!("{}:{}", config.gateway.host, config.gateway.port);
    serve(state, &addr, shutdown).await
}

/// Bind `addr` and serve `state` until `shutdown` fires.
pub async fn serve(
    state: SharedState,
    addr: &str,
    shutdown: CancellationToken,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(addr = %addr, "Gateway listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;
    info!("Gateway stopped");
    Ok(())
}

// --- Handlers ---

#[derive(Serialize, Deserialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".into(),
        version: env!("CARGO_PKG_VERSION").into(),
    })
}

#[derive(Debug, Serialize, Deserialize)]
struct ErrorResponse {
    error: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn api_error(status: StatusCode, message: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: message.into(),
        }),
    )
}

#[derive(Serialize, Deserialize)]
struct ToolDto {
    name: String,
    description: String,
    parameters: serde_json::Value,
}

#[derive(Serialize, Deserialize)]
struct ToolListResponse {
    tools: Vec<ToolDto>,
    count: usize,
}

async fn list_tools_handler(State(state): State<SharedState>) -> Json<ToolListResponse> {
    let defs = state.tools.definitions();
    let count = defs.len();

    Json(ToolListResponse {
        tools: defs
            .into_iter()
            .map(|d| ToolDto {
                name: d.name,
                description: d.description,
                parameters: d.parameters,
            })
            .collect(),
        count,
    })
}

#[derive(Deserialize)]
struct ToolCallRequest {
    #[serde(default)]
    arguments: serde_json::Value,
}

async fn call_tool_handler(
    State(state): State<SharedState>,
    Path(name): Path<String>,
    Json(payload): Json<ToolCallRequest>,
) -> Result<Json<ToolResult>, ApiError> {
    let tool = state
        .tools
        .get(&name)
        .ok_or_else(|| api_error(StatusCode::NOT_FOUND, format!("Tool '{name}' not found")))?;

    let arguments = match payload.arguments {
        serde_json::Value::Null => serde_json::json!({}),
        other => other,
    };

    match tool.execute(arguments).await {
        Ok(result) => Ok(Json(result)),
        Err(ToolError::InvalidArguments(msg)) => Err(api_error(StatusCode::BAD_REQUEST, msg)),
        Err(e) => {
            warn!(tool = %name, error = %e, "Tool call failed");
            Err(api_error(StatusCode::BAD_GATEWAY, e.to_string()))
        }
    }
}

#[derive(Deserialize)]
struct RetrieveRequest {
    query: String,
    #[serde(default)]
    retrieve_limit: Option<u32>,
}

#[derive(Serialize, Deserialize)]
struct RetrieveResponse {
    context: String,
    documents: Vec<RetrievedDocument>,
}

async fn retrieve_handler(
    State(state): State<SharedState>,
    Json(payload): Json<RetrieveRequest>,
) -> Result<Json<RetrieveResponse>, ApiError> {
    let query = payload.query.trim();
    if query.is_empty() {
        return Err(api_error(StatusCode::BAD_REQUEST, "query must not be empty"));
    }
    let limit = payload.retrieve_limit.filter(|n| *n > 0);

    let result = state.retriever.retrieve(query, limit).await.map_err(|e| {
        warn!(error = %e, "Retrieval failed");
        api_error(retrieval_status(&e), e.to_string())
    })?;

    Ok(Json(RetrieveResponse {
        context: result.render(),
        documents: result.results,
    }))
}

fn retrieval_status(err: &RetrievalError) -> StatusCode {
    match err {
        RetrievalError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
        RetrievalError::AuthExhausted
        | RetrievalError::Auth(_)
        | RetrievalError::Network(_)
        | RetrievalError::BadResponse { .. } => StatusCode::BAD_GATEWAY,
    }
}
