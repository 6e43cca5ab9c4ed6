use crate::config::MessageTypes;
use crate::connection::Frame;
use crate::error::HubError;
use crate::manager::EventHub;
use crate::processor::TopicHandler;
use async_trait::async_trait;
use chainscope_syncer::{Syncer, DEFAULT_NODE_VIEW_LIMIT};
use chainscope_types::SubscriptionRecord;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

#[derive(Serialize)]
struct Summary<'a, T: Serialize> {
    id: &'a str,
    #[serde(rename = "type")]
    kind: &'a str,
    content: T,
}

/// Broadcasts `{"id", "type", "content"}` to the group named after the chain ID.
pub async fn forward<T: Serialize>(
    hub: &EventHub,
    chain_id: &str,
    kind: &str,
    content: T,
) -> Result<(), HubError> {
    let text = serde_json::to_string(&Summary {
        id: chain_id,
        kind,
        content,
    })?;
    hub.send_group(chain_id, Frame::Text(text)).await
}

/// Persists each announced block and forwards the block, its transactions,
/// refreshed stats and node list.
pub struct NewHeadsHandler {
    syncer: Arc<Syncer>,
    types: MessageTypes,
    node_limit: usize,
}

impl NewHeadsHandler {
    pub fn new(syncer: Arc<Syncer>, types: MessageTypes) -> Self {
        Self {
            syncer,
            types,
            node_limit: DEFAULT_NODE_VIEW_LIMIT,
        }
    }
}

#[async_trait]
impl TopicHandler for NewHeadsHandler {
    async fn handle(
        &self,
        hub: &EventHub,
        record: &SubscriptionRecord,
        payload: &Value,
    ) -> Result<(), HubError> {
        let hash = payload
            .get("hash")
            .and_then(|h| h.as_str())
            .ok_or_else(|| HubError::InvalidMessage("new head without hash".to_string()))?;
        let chain_id = record.chain_id.as_str();

        let (block, txs) = self.syncer.persist_pushed_block(chain_id, hash).await?;
        debug!(chain_id, height = block.height, txs = txs.len(), "new head persisted");

        forward(hub, chain_id, &self.types.block, &block).await?;
        for tx in &txs {
            forward(hub, chain_id, &self.types.tx, tx).await?;
        }

        let stats = self.syncer.chain_stats(chain_id)?;
        forward(hub, chain_id, &self.types.stats, &stats).await?;

        let nodes = self.syncer.node_views(chain_id, self.node_limit).await?;
        forward(hub, chain_id, &self.types.node_info, &nodes).await?;
        Ok(())
    }
}
