//! Status and invoke surface.
//!
//! Serves raw numeric values only; formatting (thousands abbreviations and
//! the like) belongs to the dashboard consumer.

use crate::connection::{ConnState, ConnectionStatus};
use crate::error::CoreError;
use crate::performance::{PerformanceMetrics, PerformanceStats};
use crate::resources::SystemResourceUsage;
use crate::service::CoreService;
use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use rmcp::model::Tool;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ServerStatusEntry {
    state: ConnState,
    #[serde(flatten)]
    status: ConnectionStatus,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct StatusResponse {
    servers: HashMap<String, ServerStatusEntry>,
    performance: PerformanceStats,
    metrics: PerformanceMetrics,
    resources: SystemResourceUsage,
}

#[must_use]
pub fn router(service: Arc<CoreService>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/status", get(status))
        .route("/tools", get(list_tools))
        .route("/tools/{name}", post(invoke_tool))
        .with_state(service)
}

async fn healthz() -> &'static str {
    "ok"
}

async fn status(State(service): State<Arc<CoreService>>) -> Json<StatusResponse> {
    let connections = service.connections();
    let servers = service
        .connection_statuses()
        .into_iter()
        .map(|(id, status)| {
            let state = connections
                .state(&id)
                .unwrap_or(ConnState::Disconnected);
            (id, ServerStatusEntry { state, status })
        })
        .collect();

    Json(StatusResponse {
        servers,
        performance: service.stats(),
        metrics: service.metrics(),
        resources: service.resource_usage(),
    })
}

async fn list_tools(State(service): State<Arc<CoreService>>) -> Json<Vec<Tool>> {
    Json(service.list_tools())
}

async fn invoke_tool(
    State(service): State<Arc<CoreService>>,
    Path(name): Path<String>,
    Json(arguments): Json<Value>,
) -> Response {
    match service.invoke(&name, arguments).await {
        Ok(result) => Json(result).into_response(),
        Err(e) => error_response(&e),
    }
}

fn error_response(error: &CoreError) -> Response {
    let status = match error {
        CoreError::Config(_)
        | CoreError::Runtime(_)
        | CoreError::Json(_)
        | CoreError::Yaml(_) => StatusCode::BAD_REQUEST,
        CoreError::Connection(_) | CoreError::Http(_) => StatusCode::BAD_GATEWAY,
        CoreError::NotImplemented(_) => StatusCode::NOT_IMPLEMENTED,
        CoreError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, error.to_string()).into_response()
}
