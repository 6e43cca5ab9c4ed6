use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Names used on the wire by subscriptions and forwarded summaries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageTypes {
    pub subscribe_kind: String,
    pub push_method: String,
    pub block: String,
    pub tx: String,
    pub stats: String,
    pub node_info: String,
}

impl Default for MessageTypes {
    fn default() -> Self {
        Self {
            subscribe_kind: "subscription".to_string(),
            push_method: "eth_subscription".to_string(),
            block: "block".to_string(),
            tx: "tx".to_string(),
            stats: "stats".to_string(),
            node_info: "node_info".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HubConfig {
    pub buffer_size: usize,
    pub dial_timeout_seconds: u64,
    pub max_retry_count: u32,
    pub subscribe_delay_seconds: u64,
    pub message_types: MessageTypes,
}

impl HubConfig {
    pub fn dial_timeout(&self) -> Duration {
        Duration::from_secs(self.dial_timeout_seconds)
    }

    pub fn subscribe_delay(&self) -> Duration {
        Duration::from_secs(self.subscribe_delay_seconds)
    }
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            buffer_size: std::env::var("WS_BUFFER_SIZE")
                .ok()
                .and_then(|v| v.parse().ok())
                .filter(|size: &usize| *size > 0)
                .unwrap_or(256),
            dial_timeout_seconds: std::env::var("WS_DIAL_TIMEOUT_SECONDS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(5),
            max_retry_count: std::env::var("WS_MAX_RETRY_COUNT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(3),
            subscribe_delay_seconds: std::env::var("WS_SUBSCRIBE_DELAY_SECONDS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(5),
            message_types: MessageTypes::default(),
        }
    }
}
