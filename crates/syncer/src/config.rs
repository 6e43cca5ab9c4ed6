use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncerConfig {
    pub incr_interval_seconds: u64,
    pub start_delay_seconds: u64,
    pub rpc_timeout_seconds: u64,
    pub receipt_timeout_seconds: u64,
    pub rpc_max_retries: u32,
    pub rpc_retry_delay_seconds: u64,
    pub error_channel_size: usize,
}

impl SyncerConfig {
    pub fn incr_interval(&self) -> Duration {
        Duration::from_secs(self.incr_interval_seconds)
    }

    pub fn start_delay(&self) -> Duration {
        Duration::from_secs(self.start_delay_seconds)
    }

    pub fn receipt_timeout(&self) -> Duration {
        Duration::from_secs(self.receipt_timeout_seconds)
    }
}

impl Default for SyncerConfig {
    fn default() -> Self {
        Self {
            incr_interval_seconds: std::env::var("SYNC_INCR_INTERVAL_SECONDS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(30),
            start_delay_seconds: std::env::var("SYNC_START_DELAY_SECONDS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(5),
            rpc_timeout_seconds: std::env::var("RPC_TIMEOUT_SECONDS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(5),
            receipt_timeout_seconds: std::env::var("RECEIPT_TIMEOUT_SECONDS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(10),
            rpc_max_retries: std::env::var("RPC_MAX_RETRIES")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(2),
            rpc_retry_delay_seconds: std::env::var("RPC_RETRY_DELAY_SECONDS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(1),
            error_channel_size: std::env::var("SYNC_ERROR_CHANNEL_SIZE")
                .ok()
                .and_then(|v| v.parse().ok())
                .filter(|size: &usize| *size > 0)
                .unwrap_or(64),
        }
    }
}
