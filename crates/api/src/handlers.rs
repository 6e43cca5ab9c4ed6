use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
};
use chainscope_hub::{ConnectionInfo, EventHub, Frame, GroupInfo, HubError, HubInfo, WsSubscriber};
use chainscope_storage::{Storage, StorageError};
use chainscope_syncer::{SyncManager, SyncSession, Syncer};
use chainscope_types::{new_record_id, now_millis, Chain, TopicConfig};
use std::sync::Arc;
use tracing::{info, warn};

use crate::types::*;

pub struct ApiState {
    pub storage: Arc<dyn Storage>,
    pub syncer: Arc<Syncer>,
    pub manager: Arc<SyncManager>,
    pub hub: EventHub,
    pub subscriber: Arc<WsSubscriber>,
    /// Reported as the local address of accepted websockets.
    pub local_addr: String,
}

pub type ApiError = (StatusCode, Json<ErrorResponse>);

fn api_error(status: StatusCode, error: &str, message: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: error.to_string(),
            message: message.into(),
        }),
    )
}

fn storage_error(e: StorageError) -> ApiError {
    warn!(error = %e, "storage request failed");
    api_error(StatusCode::INTERNAL_SERVER_ERROR, "StorageError", e.to_string())
}

fn hub_error(e: HubError) -> ApiError {
    match e {
        HubError::ConnectionNotFound { .. } => {
            api_error(StatusCode::NOT_FOUND, "ConnectionNotFound", e.to_string())
        }
        HubError::NotDialed(_) => api_error(StatusCode::BAD_REQUEST, "NotDialed", e.to_string()),
        HubError::UnknownTopic(_) => api_error(StatusCode::BAD_REQUEST, "UnknownTopic", e.to_string()),
        HubError::Closed => api_error(StatusCode::SERVICE_UNAVAILABLE, "HubClosed", e.to_string()),
        HubError::DialTimeout(..) | HubError::Transport(_) => {
            api_error(StatusCode::BAD_GATEWAY, "DialFailed", e.to_string())
        }
        other => api_error(StatusCode::INTERNAL_SERVER_ERROR, "HubError", other.to_string()),
    }
}

fn chain_not_found(chain_id: &str) -> ApiError {
    api_error(
        StatusCode::NOT_FOUND,
        "ChainNotFound",
        format!("Chain {} not found", chain_id),
    )
}

pub async fn create_chain(
    State(state): State<Arc<ApiState>>,
    Json(request): Json<CreateChainRequest>,
) -> Result<Json<Chain>, ApiError> {
    if request.name.trim().is_empty() || request.ip.trim().is_empty() {
        return Err(api_error(
            StatusCode::BAD_REQUEST,
            "InvalidChain",
            "name and ip are required",
        ));
    }

    let chain = Chain {
        id: request.id.filter(|id| !id.is_empty()).unwrap_or_else(new_record_id),
        name: request.name,
        ip: request.ip,
        rpc_port: request.rpc_port,
        p2p_port: request.p2p_port,
        ws_port: request.ws_port,
        desc: request.desc,
        ws_topics: request
            .ws_topics
            .unwrap_or_else(|| vec![TopicConfig::new_heads()]),
        create_time: now_millis(),
    };
    state.subscriber.validate_topics(&chain).map_err(hub_error)?;

    let existing = state.storage.list_chains().map_err(storage_error)?;
    if existing.iter().any(|c| c.id == chain.id || c.conflicts_with(&chain)) {
        return Err(api_error(
            StatusCode::CONFLICT,
            "ChainExists",
            format!(
                "chain {} exists or a port is already taken on {}",
                chain.name, chain.ip
            ),
        ));
    }

    if !state.syncer.rpc().ping(&chain.rpc_endpoint()).await {
        return Err(api_error(
            StatusCode::BAD_GATEWAY,
            "ChainUnreachable",
            format!("chain {} does not answer at {}", chain.name, chain.rpc_endpoint()),
        ));
    }

    state.storage.save_chain(&chain).map_err(storage_error)?;
    info!(chain_id = %chain.id, chain = %chain.name, "chain saved");

    let conn = state.subscriber.subscribe_chain(&chain).await.map_err(hub_error)?;
    info!(chain_id = %chain.id, conn_id = %conn.id, "chain subscribed");
    Ok(Json(chain))
}

pub async fn list_chains(State(state): State<Arc<ApiState>>) -> Result<Json<Vec<Chain>>, ApiError> {
    state.storage.list_chains().map(Json).map_err(storage_error)
}

pub async fn trigger_sync(
    State(state): State<Arc<ApiState>>,
    Path(chain_id): Path<String>,
    Query(query): Query<SyncQuery>,
) -> Result<Json<SyncTriggerResponse>, ApiError> {
    if state.storage.get_chain(&chain_id).map_err(storage_error)?.is_none() {
        return Err(chain_not_found(&chain_id));
    }

    let started = state
        .manager
        .trigger_sync(&chain_id, query.full, query.run_async)
        .await;

    Ok(Json(SyncTriggerResponse {
        session: state.manager.get_sync_info(&chain_id),
        chain_id,
        started,
    }))
}

pub async fn get_sync_info(
    State(state): State<Arc<ApiState>>,
    Path(chain_id): Path<String>,
) -> Result<Json<SyncSession>, ApiError> {
    state.manager.get_sync_info(&chain_id).map(Json).ok_or_else(|| {
        api_error(
            StatusCode::NOT_FOUND,
            "SessionNotFound",
            format!("No sync session for chain {}", chain_id),
        )
    })
}

pub async fn list_sync_sessions(State(state): State<Arc<ApiState>>) -> Json<Vec<SyncSession>> {
    Json(state.manager.sessions())
}

pub async fn ws_manager_info(State(state): State<Arc<ApiState>>) -> Json<HubInfo> {
    Json(state.hub.info())
}

pub async fn ws_groups(State(state): State<Arc<ApiState>>) -> Json<Vec<GroupInfo>> {
    Json(state.hub.groups())
}

pub async fn ws_group(
    State(state): State<Arc<ApiState>>,
    Path(name): Path<String>,
) -> Result<Json<GroupInfo>, ApiError> {
    state.hub.group(&name).map(Json).ok_or_else(|| {
        api_error(
            StatusCode::NOT_FOUND,
            "GroupNotFound",
            format!("Group {} not found", name),
        )
    })
}

pub async fn ws_send(
    State(state): State<Arc<ApiState>>,
    Json(request): Json<SendRequest>,
) -> Result<Json<SendResponse>, ApiError> {
    state
        .hub
        .send(&request.id, &request.group, Frame::Text(request.message))
        .await
        .map_err(hub_error)?;
    Ok(Json(SendResponse { queued: true }))
}

pub async fn ws_send_group(
    State(state): State<Arc<ApiState>>,
    Json(request): Json<SendGroupRequest>,
) -> Result<Json<SendResponse>, ApiError> {
    state
        .hub
        .send_group(&request.group, Frame::Text(request.message))
        .await
        .map_err(hub_error)?;
    Ok(Json(SendResponse { queued: true }))
}

pub async fn ws_send_all(
    State(state): State<Arc<ApiState>>,
    Json(request): Json<SendAllRequest>,
) -> Result<Json<SendResponse>, ApiError> {
    state
        .hub
        .send_all(Frame::Text(request.message))
        .await
        .map_err(hub_error)?;
    Ok(Json(SendResponse { queued: true }))
}

pub async fn ws_dial(
    State(state): State<Arc<ApiState>>,
    Json(request): Json<DialRequest>,
) -> Result<Json<ConnectionInfo>, ApiError> {
    let conn = state
        .hub
        .dial(&request.host, request.port, &request.path, &request.group)
        .await
        .map_err(hub_error)?;
    Ok(Json(conn.info()))
}

pub async fn ws_client_send(
    State(state): State<Arc<ApiState>>,
    Json(request): Json<SendRequest>,
) -> Result<Json<SendResponse>, ApiError> {
    let queued = state
        .hub
        .client_send(&request.group, &request.id, Frame::Text(request.message))
        .map_err(hub_error)?;
    Ok(Json(SendResponse { queued }))
}
