mod config;
mod error;
mod manager;
mod rpc_client;
mod session;
mod syncer;

#[cfg(any(test, feature = "test-utils"))]
pub mod mock;

pub use config::SyncerConfig;
pub use error::{RpcError, SyncError};
pub use manager::SyncManager;
pub use rpc_client::{decode_call_result, parse_block, parse_header, parse_nodes, parse_receipt, ChainRpc, JsonRpcClient};
pub use session::{
    BlockSyncProgress, ItemSyncProgress, NodeSyncProgress, Progress, RegistrySyncProgress,
    SyncErrorEvent, SyncErrorKind, SyncSession, SyncStatus,
};
pub use syncer::{Syncer, DEFAULT_NODE_VIEW_LIMIT};
