mod config;
mod connection;
mod error;
mod manager;
mod new_heads;
mod processor;
mod subscriber;

pub use config::{HubConfig, MessageTypes};
pub use connection::{Connection, ConnectionId, ConnectionInfo, Frame};
pub use error::HubError;
pub use manager::{EventHub, FrameHandler, GroupInfo, HubInfo};
pub use new_heads::{forward, NewHeadsHandler};
pub use processor::{
    classify, CorrelationTag, Inbound, MessageDispatcher, ResolvedPush, TopicHandler, TopicRegistry,
    MAX_CONCURRENT_PUSHES, PING, PONG,
};
pub use subscriber::WsSubscriber;

use chainscope_syncer::Syncer;
use chainscope_types::topics;
use std::sync::Arc;

/// Topic handlers known to this build.
pub fn default_topics(syncer: Arc<Syncer>, types: &MessageTypes) -> TopicRegistry {
    let mut registry = TopicRegistry::new();
    registry.register(
        topics::NEW_HEADS,
        Arc::new(NewHeadsHandler::new(syncer, types.clone())),
    );
    registry
}
