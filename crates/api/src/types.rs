use chainscope_syncer::SyncSession;
use chainscope_types::{ChainId, TopicConfig};
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CreateChainRequest {
    /// Generated when absent.
    #[serde(default)]
    pub id: Option<ChainId>,
    pub name: String,
    pub ip: String,
    pub rpc_port: u16,
    #[serde(default)]
    pub p2p_port: u16,
    pub ws_port: u16,
    #[serde(default)]
    pub desc: String,
    /// Defaults to `newHeads` only.
    #[serde(default)]
    pub ws_topics: Option<Vec<TopicConfig>>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct SyncQuery {
    #[serde(default)]
    pub full: bool,
    #[serde(default, rename = "async")]
    pub run_async: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SyncTriggerResponse {
    pub chain_id: ChainId,
    pub started: bool,
    pub session: Option<SyncSession>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SendRequest {
    pub id: String,
    pub group: String,
    pub message: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SendGroupRequest {
    pub group: String,
    pub message: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SendAllRequest {
    pub message: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DialRequest {
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub path: String,
    pub group: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SendResponse {
    pub queued: bool,
}
