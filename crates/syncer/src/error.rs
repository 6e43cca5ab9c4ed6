use chainscope_storage::StorageError;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum RpcError {
    #[error("http transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("rpc error ({code}): {message}")]
    Remote { code: i64, message: String },
    #[error("rate limited: {0}")]
    RateLimited(String),
    #[error("invalid response: {0}")]
    InvalidResponse(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("call timed out after {0:?}")]
    Timeout(Duration),
}

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("chain {0} not found")]
    ChainNotFound(String),
    #[error("block {hash} not persisted for chain {chain_id}")]
    BlockMissing { chain_id: String, hash: String },
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("rpc error: {0}")]
    Rpc(#[from] RpcError),
}
