use chainscope_storage::StorageError;
use chainscope_syncer::{RpcError, SyncError};
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum HubError {
    #[error("event hub is shut down")]
    Closed,
    #[error("event hub already started")]
    AlreadyStarted,
    #[error("connection {id} not found in group {group}")]
    ConnectionNotFound { group: String, id: String },
    #[error("connection {0} was not dialed by this process")]
    NotDialed(String),
    #[error("dial to {0} timed out after {1:?}")]
    DialTimeout(String, Duration),
    #[error("websocket error: {0}")]
    Transport(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("unknown topic: {0}")]
    UnknownTopic(String),
    #[error("invalid message: {0}")]
    InvalidMessage(String),
    #[error("subscription {0} not found")]
    SubscriptionNotFound(String),
    #[error("sync error: {0}")]
    Sync(#[from] SyncError),
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("rpc error: {0}")]
    Rpc(#[from] RpcError),
}
