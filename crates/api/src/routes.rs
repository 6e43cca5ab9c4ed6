use axum::{
    extract::State,
    response::Json,
    routing::{get, post},
    Router,
};
use chainscope_types::now_millis;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;

use crate::handlers::*;
use crate::ws::ws_upgrade;

const MAX_BODY_BYTES: usize = 1024 * 1024;

pub fn create_router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/api/v1/chains", get(list_chains).post(create_chain))
        .route("/api/v1/sync", get(list_sync_sessions))
        .route(
            "/api/v1/sync/:chain_id",
            get(get_sync_info).post(trigger_sync),
        )
        .route("/api/v1/ws/manager", get(ws_manager_info))
        .route("/api/v1/ws/groups", get(ws_groups))
        .route("/api/v1/ws/groups/:name", get(ws_group))
        .route("/api/v1/ws/send", post(ws_send))
        .route("/api/v1/ws/sendgroup", post(ws_send_group))
        .route("/api/v1/ws/sendall", post(ws_send_all))
        .route("/api/v1/ws/dial", post(ws_dial))
        .route("/api/v1/ws/clientsend", post(ws_client_send))
        .route("/ws/:group", get(ws_upgrade))
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Health check endpoint with component status
async fn health_check(State(state): State<Arc<ApiState>>) -> Json<serde_json::Value> {
    use serde_json::json;

    let storage_healthy = state.storage.list_chains().is_ok();
    let hub = state.hub.info();
    let sessions = state.manager.sessions();
    let syncing = sessions
        .iter()
        .filter(|s| s.status == chainscope_syncer::SyncStatus::Syncing)
        .count();

    let status = if storage_healthy { "healthy" } else { "degraded" };

    Json(json!({
        "status": status,
        "timestamp": now_millis(),
        "components": {
            "storage": {
                "status": if storage_healthy { "healthy" } else { "unhealthy" }
            },
            "sync": {
                "sessions": sessions.len(),
                "syncing": syncing
            },
            "hub": {
                "groups": hub.group_count,
                "connections": hub.connection_count
            }
        }
    }))
}
