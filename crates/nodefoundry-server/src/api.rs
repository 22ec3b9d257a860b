//! HTTP surface
//!
//! Operator API under `/api/v1`, plus the unauthenticated endpoints booting
//! and installed machines fetch: iPXE scripts, preseed profiles, the agent
//! and its unit file, and the agent's status reports.

use crate::status_sync::{StatusMessage, StatusUpdate};
use crate::store::StoreError;
use crate::AppState;
use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use nodefoundry_common::{is_valid_mac, normalize_mac, Node, NodeStatus};
use nodefoundry_ipxe::{agent_service_unit, IpxeError, NetworkOverrides};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::error::TrySendError;
use tracing::{error, info, warn};

const TEXT_PLAIN: &str = "text/plain; charset=utf-8";

pub fn api_router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/api/v1/nodes", get(list_nodes).post(create_node))
        .route(
            "/api/v1/nodes/{mac}",
            get(get_node).put(update_node).delete(delete_node),
        )
        .route("/api/v1/leases", get(list_leases))
        .route("/boot/{mac}/boot.ipxe", get(boot_script))
        .route("/preseed/{mac}/preseed.cfg", get(preseed))
        .route("/agent/nodefoundry-agent", get(agent_binary))
        .route("/agent/nodefoundry-agent.service", get(agent_unit))
        .route("/agent/{mac}/status", post(report_status))
}

// ============================================================================
// Bodies
// ============================================================================

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    /// Seconds since the server started
    pub uptime: u64,
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub status: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CreateNodeRequest {
    pub mac: String,
    #[serde(default)]
    pub ip: Option<String>,
    #[serde(default)]
    pub hostname: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateNodeRequest {
    pub action: String,
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (
        status,
        Json(ErrorResponse {
            error: message.into(),
        }),
    )
        .into_response()
}

fn store_error_response(e: StoreError) -> Response {
    match e {
        StoreError::NotFound(mac) => {
            error_response(StatusCode::NOT_FOUND, format!("node {} not found", mac))
        }
        e @ StoreError::AlreadyExists(_) => error_response(StatusCode::CONFLICT, e.to_string()),
        e @ StoreError::InvalidTransition { .. } => {
            error_response(StatusCode::CONFLICT, e.to_string())
        }
        e @ StoreError::InvalidData(_) => error_response(StatusCode::BAD_REQUEST, e.to_string()),
        e => {
            error!(error = %e, "Store operation failed");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}

/// Canonical MAC from a path segment, or a 400 response.
#[allow(clippy::result_large_err)]
fn path_mac(raw: &str) -> Result<String, Response> {
    if is_valid_mac(raw) {
        Ok(normalize_mac(raw))
    } else {
        Err(error_response(
            StatusCode::BAD_REQUEST,
            format!("invalid MAC address: {}", raw),
        ))
    }
}

fn text(body: impl Into<String>) -> Response {
    ([(header::CONTENT_TYPE, TEXT_PLAIN)], body.into()).into_response()
}

// ============================================================================
// Health
// ============================================================================

async fn health(State(state): State<AppState>) -> Response {
    Json(HealthResponse {
        status: "ok".to_string(),
        uptime: state.started_at.elapsed().as_secs(),
    })
    .into_response()
}

// ============================================================================
// Nodes
// ============================================================================

async fn list_nodes(State(state): State<AppState>, Query(query): Query<ListQuery>) -> Response {
    let result = match query.status.as_deref().filter(|s| !s.is_empty()) {
        Some(status) => match status.parse::<NodeStatus>() {
            Ok(status) => state.store.list_by_status(status).await,
            Err(e) => return error_response(StatusCode::BAD_REQUEST, e.to_string()),
        },
        None => state.store.list().await,
    };

    match result {
        Ok(nodes) => (StatusCode::OK, Json(nodes)).into_response(),
        Err(e) => store_error_response(e),
    }
}

async fn get_node(State(state): State<AppState>, Path(mac): Path<String>) -> Response {
    let mac = match path_mac(&mac) {
        Ok(mac) => mac,
        Err(response) => return response,
    };

    match state.store.find_by_mac(&mac).await {
        Ok(node) => (StatusCode::OK, Json(node)).into_response(),
        Err(e) => store_error_response(e),
    }
}

async fn create_node(
    State(state): State<AppState>,
    Json(request): Json<CreateNodeRequest>,
) -> Response {
    let mut node = match Node::discovered(&request.mac) {
        Ok(node) => node,
        Err(e) => return error_response(StatusCode::BAD_REQUEST, e.to_string()),
    };
    node.ip = request.ip.filter(|ip| !ip.is_empty());
    node.hostname = request.hostname.filter(|h| !h.is_empty());

    match state.store.create(&node).await {
        Ok(node) => {
            info!(mac = %node.mac, "Node registered");
            (StatusCode::CREATED, Json(node)).into_response()
        }
        Err(e) => store_error_response(e),
    }
}

/// Operator actions on a node. `install` moves it to installing.
async fn update_node(
    State(state): State<AppState>,
    Path(mac): Path<String>,
    Json(request): Json<UpdateNodeRequest>,
) -> Response {
    let mac = match path_mac(&mac) {
        Ok(mac) => mac,
        Err(response) => return response,
    };

    let target = match request.action.as_str() {
        "install" => NodeStatus::Installing,
        other => {
            return error_response(
                StatusCode::BAD_REQUEST,
                format!("unknown action: {}", other),
            )
        }
    };

    match state.store.update_status(&mac, target).await {
        Ok(node) => {
            info!(mac = %mac, status = %node.status, "Install triggered");
            (StatusCode::OK, Json(node)).into_response()
        }
        Err(e) => store_error_response(e),
    }
}

async fn delete_node(State(state): State<AppState>, Path(mac): Path<String>) -> Response {
    let mac = match path_mac(&mac) {
        Ok(mac) => mac,
        Err(response) => return response,
    };

    match state.store.delete(&mac).await {
        Ok(()) => {
            info!(mac = %mac, "Node deleted");
            StatusCode::NO_CONTENT.into_response()
        }
        Err(e) => store_error_response(e),
    }
}

async fn list_leases(State(state): State<AppState>) -> Response {
    let leases = state
        .pool
        .as_ref()
        .map(|pool| pool.leases())
        .unwrap_or_default();
    (StatusCode::OK, Json(leases)).into_response()
}

// ============================================================================
// Boot chain
// ============================================================================

async fn boot_script(State(state): State<AppState>, Path(mac): Path<String>) -> Response {
    let mac = match path_mac(&mac) {
        Ok(mac) => mac,
        Err(response) => return response,
    };

    let node = match state.store.find_by_mac(&mac).await {
        Ok(node) => node,
        Err(e) => return store_error_response(e),
    };

    match state.boot_scripts.generate(&node) {
        Ok(script) => text(script),
        Err(e) => {
            error!(mac = %mac, error = %e, "Failed to generate boot script");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}

async fn preseed(
    State(state): State<AppState>,
    Path(mac): Path<String>,
    Query(overrides): Query<NetworkOverrides>,
) -> Response {
    let mac = match path_mac(&mac) {
        Ok(mac) => mac,
        Err(response) => return response,
    };

    let node = match state.store.find_by_mac(&mac).await {
        Ok(node) => node,
        Err(e) => return store_error_response(e),
    };

    match state.preseed.generate(&node, &overrides) {
        Ok(preseed) => text(preseed),
        Err(e @ IpxeError::InvalidNetwork(_)) => {
            warn!(mac = %mac, error = %e, "Rejected preseed network settings");
            error_response(StatusCode::BAD_REQUEST, e.to_string())
        }
        Err(e) => {
            error!(mac = %mac, error = %e, "Failed to generate preseed");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}

// ============================================================================
// Agent
// ============================================================================

async fn agent_binary(State(state): State<AppState>) -> Response {
    match tokio::fs::read(state.agent_binary.as_path()).await {
        Ok(bytes) => (
            [(header::CONTENT_TYPE, "application/octet-stream")],
            bytes,
        )
            .into_response(),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            warn!(path = %state.agent_binary.display(), "Agent binary not found");
            error_response(StatusCode::NOT_FOUND, "agent binary not available")
        }
        Err(e) => {
            error!(path = %state.agent_binary.display(), error = %e, "Failed to read agent binary");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}

async fn agent_unit() -> Response {
    text(agent_service_unit())
}

/// Queue a status report; it is applied asynchronously.
async fn report_status(
    State(state): State<AppState>,
    Path(mac): Path<String>,
    Json(message): Json<StatusMessage>,
) -> Response {
    let mac = match path_mac(&mac) {
        Ok(mac) => mac,
        Err(response) => return response,
    };

    match state.status_tx.try_send(StatusUpdate { mac, message }) {
        Ok(()) => StatusCode::ACCEPTED.into_response(),
        Err(TrySendError::Full(update)) => {
            warn!(mac = %update.mac, "Status queue full, dropping report");
            error_response(StatusCode::SERVICE_UNAVAILABLE, "status queue full")
        }
        Err(TrySendError::Closed(_)) => {
            error_response(StatusCode::SERVICE_UNAVAILABLE, "status sync stopped")
        }
    }
}
