use crate::config::MessageTypes;
use crate::connection::{Connection, Frame};
use crate::error::HubError;
use crate::manager::{EventHub, FrameHandler};
use async_trait::async_trait;
use chainscope_storage::Storage;
use chainscope_types::{now_millis, SubscriptionRecord, TopicConfig};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

pub const PING: &str = "ping";
pub const PONG: &str = "pong";

/// What an inbound frame turned out to be.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Ping,
    Ack {
        id: String,
        result: Option<Value>,
        error: Option<Value>,
    },
    Event {
        method: String,
        params: Value,
    },
    Unrecognized(String),
}

pub fn classify(frame: &Frame) -> Inbound {
    let text = match frame {
        Frame::Text(text) => text.as_str(),
        Frame::Binary(bytes) => match std::str::from_utf8(bytes) {
            Ok(text) => text,
            Err(_) => return Inbound::Unrecognized(format!("{} binary bytes", bytes.len())),
        },
        other => return Inbound::Unrecognized(format!("{:?}", other)),
    };

    if text.trim() == PING {
        return Inbound::Ping;
    }

    let Ok(Value::Object(obj)) = serde_json::from_str::<Value>(text) else {
        return Inbound::Unrecognized(text.to_string());
    };

    if let Some(id) = obj.get("id").filter(|id| !id.is_null()) {
        let id = match id {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        return Inbound::Ack {
            id,
            result: obj.get("result").cloned(),
            error: obj.get("error").cloned(),
        };
    }

    if let Some(method) = obj.get("method").and_then(|m| m.as_str()) {
        return Inbound::Event {
            method: method.to_string(),
            params: obj.get("params").cloned().unwrap_or(Value::Null),
        };
    }

    Inbound::Unrecognized(text.to_string())
}

/// The request identifier of a subscription: `"<kind> <topic> <correlation id>"`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorrelationTag {
    pub kind: String,
    pub topic: String,
    pub correlation_id: String,
}

impl CorrelationTag {
    pub fn parse(id: &str) -> Option<Self> {
        let mut parts = id.splitn(3, ' ');
        let kind = parts.next().filter(|s| !s.is_empty())?;
        let topic = parts.next().filter(|s| !s.is_empty())?;
        let correlation_id = parts.next().filter(|s| !s.is_empty())?;
        Some(Self {
            kind: kind.to_string(),
            topic: topic.to_string(),
            correlation_id: correlation_id.to_string(),
        })
    }
}

impl std::fmt::Display for CorrelationTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {} {}", self.kind, self.topic, self.correlation_id)
    }
}

/// Handles push notifications of one subscribed topic.
#[async_trait]
pub trait TopicHandler: Send + Sync {
    async fn handle(
        &self,
        hub: &EventHub,
        record: &SubscriptionRecord,
        payload: &Value,
    ) -> Result<(), HubError>;
}

#[derive(Default, Clone)]
pub struct TopicRegistry {
    handlers: HashMap<String, Arc<dyn TopicHandler>>,
}

impl TopicRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, topic: impl Into<String>, handler: Arc<dyn TopicHandler>) {
        self.handlers.insert(topic.into(), handler);
    }

    pub fn get(&self, topic: &str) -> Option<&Arc<dyn TopicHandler>> {
        self.handlers.get(topic)
    }

    pub fn topics(&self) -> Vec<String> {
        let mut names: Vec<String> = self.handlers.keys().cloned().collect();
        names.sort();
        names
    }

    /// Fails on the first configured topic without a handler.
    pub fn validate(&self, topics: &[TopicConfig]) -> Result<(), HubError> {
        match topics.iter().find(|t| !self.handlers.contains_key(&t.name)) {
            Some(unknown) => Err(HubError::UnknownTopic(unknown.name.clone())),
            None => Ok(()),
        }
    }
}

/// Topic pushes handled at once across all connections.
pub const MAX_CONCURRENT_PUSHES: usize = 16;

/// A push matched to its subscription and handler.
pub struct ResolvedPush {
    pub handler: Arc<dyn TopicHandler>,
    pub record: SubscriptionRecord,
    pub payload: Value,
}

/// Routes inbound frames: liveness probes, subscription acks and topic pushes.
///
/// Acks are applied on the reading connection's pump, so an ack is stored
/// before any push that follows it is resolved. Topic handlers run in spawned
/// tasks, at most [`MAX_CONCURRENT_PUSHES`] at a time.
pub struct MessageDispatcher {
    storage: Arc<dyn Storage>,
    topics: Arc<TopicRegistry>,
    types: MessageTypes,
    push_permits: Arc<Semaphore>,
}

impl MessageDispatcher {
    pub fn new(storage: Arc<dyn Storage>, topics: Arc<TopicRegistry>, types: MessageTypes) -> Self {
        Self {
            storage,
            topics,
            types,
            push_permits: Arc::new(Semaphore::new(MAX_CONCURRENT_PUSHES)),
        }
    }

    /// Records the remote subscription hash carried by an ack.
    pub fn process_ack(&self, id: &str, result: Option<&Value>, error: Option<&Value>) -> Result<(), HubError> {
        let tag = CorrelationTag::parse(id)
            .ok_or_else(|| HubError::InvalidMessage(format!("unexpected ack id {:?}", id)))?;

        if let Some(error) = error {
            warn!(topic = %tag.topic, correlation_id = %tag.correlation_id, error = %error, "subscription rejected");
            return Ok(());
        }

        let hash = result
            .and_then(|r| r.as_str())
            .ok_or_else(|| HubError::InvalidMessage(format!("ack {} carries no hash", id)))?;

        if !self
            .storage
            .set_subscription_hash(&tag.correlation_id, &tag.topic, hash, now_millis())?
        {
            return Err(HubError::SubscriptionNotFound(tag.correlation_id));
        }
        info!(topic = %tag.topic, correlation_id = %tag.correlation_id, hash, "subscription acknowledged");
        Ok(())
    }

    /// Matches a push to its subscription. `None` for methods that are not
    /// subscription pushes.
    pub fn resolve_event(&self, method: &str, params: &Value) -> Result<Option<ResolvedPush>, HubError> {
        if method != self.types.push_method {
            debug!(method, "unsupported method, dropped");
            return Ok(None);
        }

        let hash = params
            .get("subscription")
            .and_then(|s| s.as_str())
            .ok_or_else(|| HubError::InvalidMessage("push without subscription hash".to_string()))?;
        let record = self
            .storage
            .find_subscription_by_hash(hash)?
            .ok_or_else(|| HubError::SubscriptionNotFound(hash.to_string()))?;
        let handler = self
            .topics
            .get(&record.topic)
            .cloned()
            .ok_or_else(|| HubError::UnknownTopic(record.topic.clone()))?;

        Ok(Some(ResolvedPush {
            handler,
            record,
            payload: params.get("result").cloned().unwrap_or(Value::Null),
        }))
    }

    /// Hands a resolved push to a spawned task. Waits while all permits are taken.
    async fn spawn_push(&self, hub: &EventHub, push: ResolvedPush) -> Result<(), HubError> {
        let permit = self
            .push_permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| HubError::Closed)?;
        let hub = hub.clone();

        tokio::spawn(async move {
            let ResolvedPush { handler, record, payload } = push;
            if let Err(e) = handler.handle(&hub, &record, &payload).await {
                warn!(chain_id = %record.chain_id, topic = %record.topic, error = %e, "push handling failed");
            }
            drop(permit);
        });
        Ok(())
    }
}

#[async_trait]
impl FrameHandler for MessageDispatcher {
    async fn handle(&self, hub: &EventHub, conn: &Arc<Connection>, frame: Frame) -> Result<(), HubError> {
        match classify(&frame) {
            Inbound::Ping => {
                conn.enqueue(Frame::text(PONG));
                Ok(())
            }
            Inbound::Ack { id, result, error } => self.process_ack(&id, result.as_ref(), error.as_ref()),
            Inbound::Event { method, params } => match self.resolve_event(&method, &params)? {
                Some(push) => self.spawn_push(hub, push).await,
                None => Ok(()),
            },
            Inbound::Unrecognized(raw) => {
                debug!(conn_id = %conn.id, raw = %raw, "unrecognized frame dropped");
                Ok(())
            }
        }
    }
}
