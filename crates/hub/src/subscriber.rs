use crate::config::HubConfig;
use crate::connection::{Connection, Frame};
use crate::error::HubError;
use crate::manager::EventHub;
use crate::processor::{CorrelationTag, TopicRegistry};
use chainscope_storage::Storage;
use chainscope_types::{new_record_id, now_millis, Chain, SubscriptionRecord, TopicConfig};
use serde_json::Value;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{error, info, warn};

/// Dials every known chain and subscribes to its configured topics.
pub struct WsSubscriber {
    hub: EventHub,
    storage: Arc<dyn Storage>,
    topics: Arc<TopicRegistry>,
    config: HubConfig,
}

impl WsSubscriber {
    pub fn new(
        hub: EventHub,
        storage: Arc<dyn Storage>,
        topics: Arc<TopicRegistry>,
        config: HubConfig,
    ) -> Self {
        Self {
            hub,
            storage,
            topics,
            config,
        }
    }

    /// Waits for the subscribe delay, then subscribes all chains.
    pub fn start(self: &Arc<Self>) -> JoinHandle<()> {
        let subscriber = self.clone();
        tokio::spawn(async move {
            sleep(subscriber.config.subscribe_delay()).await;
            match subscriber.subscribe_all().await {
                Ok(count) => info!(chains = count, "subscriptions started"),
                Err(e) => error!(error = %e, "failed to start subscriptions"),
            }
        })
    }

    /// Returns the number of chains subscribed. A failing chain does not
    /// stop the others.
    pub async fn subscribe_all(&self) -> Result<usize, HubError> {
        let chains = self.storage.list_chains()?;
        let mut subscribed = 0;
        for chain in &chains {
            match self.subscribe_chain(chain).await {
                Ok(_) => subscribed += 1,
                Err(e) => error!(chain_id = %chain.id, chain = %chain.name, error = %e, "chain subscription failed"),
            }
        }
        Ok(subscribed)
    }

    /// Fails on the first configured topic no handler exists for.
    pub fn validate_topics(&self, chain: &Chain) -> Result<(), HubError> {
        self.topics.validate(&chain.ws_topics)
    }

    pub async fn subscribe_chain(&self, chain: &Chain) -> Result<Arc<Connection>, HubError> {
        self.validate_topics(chain)?;
        let conn = self.dial_with_retry(chain).await?;
        for topic in &chain.ws_topics {
            self.subscribe(chain, &conn, topic).await?;
        }
        Ok(conn)
    }

    async fn dial_with_retry(&self, chain: &Chain) -> Result<Arc<Connection>, HubError> {
        let mut attempt = 0;
        loop {
            match self.hub.dial(&chain.ip, chain.ws_port, "", &chain.name).await {
                Ok(conn) => {
                    conn.set_retry_count(attempt);
                    return Ok(conn);
                }
                Err(e) if attempt < self.config.max_retry_count => {
                    attempt += 1;
                    warn!(chain = %chain.name, attempt, error = %e, "dial failed, retrying");
                    sleep(self.config.dial_timeout()).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Sends one subscribe request, tagged so the ack can be correlated.
    pub async fn subscribe(
        &self,
        chain: &Chain,
        conn: &Connection,
        topic: &TopicConfig,
    ) -> Result<SubscriptionRecord, HubError> {
        let mut request: Value = serde_json::from_str(&topic.params)?;
        let fields = request.as_object_mut().ok_or_else(|| {
            HubError::InvalidMessage(format!("topic {} params is not an object", topic.name))
        })?;

        let kind = fields
            .get("id")
            .and_then(|id| id.as_str())
            .filter(|id| !id.is_empty())
            .unwrap_or(&self.config.message_types.subscribe_kind)
            .to_string();
        let tag = CorrelationTag {
            kind: kind.clone(),
            topic: topic.name.clone(),
            correlation_id: new_record_id(),
        };
        fields.insert("id".to_string(), Value::String(tag.to_string()));
        let message = request.to_string();

        let now = now_millis();
        let record = SubscriptionRecord {
            id: tag.correlation_id.clone(),
            chain_id: chain.id.clone(),
            kind,
            topic: topic.name.clone(),
            message: message.clone(),
            hash: None,
            create_time: now,
            update_time: now,
        };
        self.storage.insert_subscription(&record)?;
        self.hub.send(&conn.id, &conn.group, Frame::Text(message)).await?;

        info!(chain = %chain.name, topic = %topic.name, correlation_id = %record.id, "subscribe request sent");
        Ok(record)
    }
}
