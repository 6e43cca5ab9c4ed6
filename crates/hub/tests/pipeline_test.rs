// End-to-end: a fake chain websocket endpoint, the hub dialing it, and a
// front-end connection receiving the forwarded summaries.

use chainscope_hub::{
    default_topics, Connection, EventHub, Frame, HubConfig, HubError, MessageDispatcher,
    WsSubscriber,
};
use chainscope_storage::{InMemoryStorage, Storage};
use chainscope_syncer::mock::{mock_block_hash, mock_chain, MockChainRpc};
use chainscope_syncer::{Syncer, SyncerConfig};
use chainscope_types::{Chain, TopicConfig};
use futures::{SinkExt, StreamExt};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout};
use tokio_tungstenite::tungstenite::Message;

const SUBSCRIPTION_HASH: &str = "0xsubhash";

enum Script {
    /// ack every eth_subscribe, then push the given block hash
    AckAndPush(String),
    /// send "ping" and report what comes back
    Ping,
    /// close right after the handshake
    Close,
}

// Helper to run a one-connection fake chain endpoint; every text frame the
// hub sends is reported on the returned channel
async fn spawn_fake_chain(script: Script) -> (u16, mpsc::UnboundedReceiver<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let (seen_tx, seen_rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();

        match &script {
            Script::Close => {
                let _ = ws.close(None).await;
                return;
            }
            Script::Ping => ws.send(Message::Text("ping".to_string())).await.unwrap(),
            Script::AckAndPush(_) => {}
        }

        while let Some(Ok(msg)) = ws.next().await {
            let Message::Text(text) = msg else { continue };
            let _ = seen_tx.send(text.clone());

            if let Script::AckAndPush(block_hash) = &script {
                let request: Value = serde_json::from_str(&text).unwrap();
                if request["method"] == "eth_subscribe" {
                    let ack = serde_json::json!({
                        "jsonrpc": "2.0",
                        "id": request["id"],
                        "result": SUBSCRIPTION_HASH,
                    });
                    ws.send(Message::Text(ack.to_string())).await.unwrap();

                    let push = serde_json::json!({
                        "jsonrpc": "2.0",
                        "method": "eth_subscription",
                        "params": {
                            "subscription": SUBSCRIPTION_HASH,
                            "result": { "hash": block_hash, "number": "0x2" },
                        },
                    });
                    ws.send(Message::Text(push.to_string())).await.unwrap();
                }
            }
        }
    });

    (port, seen_rx)
}

struct TestEnv {
    storage: Arc<InMemoryStorage>,
    hub: EventHub,
    subscriber: WsSubscriber,
}

fn create_test_env(mock: Arc<MockChainRpc>) -> TestEnv {
    let storage = Arc::new(InMemoryStorage::new());
    let syncer = Arc::new(Syncer::new(storage.clone(), mock, SyncerConfig::default()));

    let config = HubConfig {
        dial_timeout_seconds: 1,
        max_retry_count: 0,
        subscribe_delay_seconds: 0,
        ..HubConfig::default()
    };
    let hub = EventHub::new(config.clone());
    hub.start().unwrap();

    let topics = Arc::new(default_topics(syncer, &config.message_types));
    hub.set_handler(Arc::new(MessageDispatcher::new(
        storage.clone(),
        topics.clone(),
        config.message_types.clone(),
    )));
    let subscriber = WsSubscriber::new(hub.clone(), storage.clone(), topics, config);

    TestEnv {
        storage,
        hub,
        subscriber,
    }
}

fn local_chain(port: u16) -> Chain {
    Chain {
        ip: "127.0.0.1".to_string(),
        ws_port: port,
        ..mock_chain("c1")
    }
}

#[tokio::test]
async fn test_new_head_push_is_persisted_and_forwarded() {
    let mock = Arc::new(MockChainRpc::with_blocks(2, 1));
    let env = create_test_env(mock);
    let (port, mut seen) = spawn_fake_chain(Script::AckAndPush(mock_block_hash(2))).await;
    let chain = local_chain(port);
    env.storage.save_chain(&chain).unwrap();

    // a front-end client watching chain c1
    let (frontend, mut inbox) = Connection::new("c1", "l", "r", "/ws/c1", false, 32);
    env.hub.register(frontend).await.unwrap();

    let upstream = env.subscriber.subscribe_chain(&chain).await.unwrap();
    assert!(upstream.is_dial);
    assert_eq!(upstream.group, chain.name);

    let request = timeout(Duration::from_secs(5), seen.recv()).await.unwrap().unwrap();
    let request: Value = serde_json::from_str(&request).unwrap();
    let id = request["id"].as_str().unwrap();
    assert!(id.starts_with("subscription newHeads "));

    let mut kinds = Vec::new();
    for _ in 0..4 {
        let frame = timeout(Duration::from_secs(5), inbox.recv()).await.unwrap().unwrap();
        let Frame::Text(text) = frame else { panic!("expected text frame") };
        let summary: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(summary["id"], "c1");
        kinds.push(summary["type"].as_str().unwrap().to_string());
    }
    assert_eq!(kinds, vec!["block", "tx", "stats", "node_info"]);

    let correlation_id = id.rsplit(' ').next().unwrap();
    let record = env.storage.get_subscription(correlation_id).unwrap().unwrap();
    assert_eq!(record.hash.as_deref(), Some(SUBSCRIPTION_HASH));
    assert_eq!(record.chain_id, "c1");
    assert!(env.storage.find_block("c1", &mock_block_hash(2)).unwrap().is_some());
}

#[tokio::test]
async fn test_dialed_connection_answers_ping() {
    let env = create_test_env(Arc::new(MockChainRpc::new()));
    let (port, mut seen) = spawn_fake_chain(Script::Ping).await;

    env.hub.dial("127.0.0.1", port, "", "chain-c1").await.unwrap();

    let reply = timeout(Duration::from_secs(5), seen.recv()).await.unwrap().unwrap();
    assert_eq!(reply, "pong");
}

#[tokio::test]
async fn test_remote_close_unregisters_connection() {
    let env = create_test_env(Arc::new(MockChainRpc::new()));
    let (port, _seen) = spawn_fake_chain(Script::Close).await;

    let conn = env.hub.dial("127.0.0.1", port, "", "chain-c1").await.unwrap();

    let mut gone = false;
    for _ in 0..100 {
        if env.hub.group("chain-c1").is_none() {
            gone = true;
            break;
        }
        sleep(Duration::from_millis(20)).await;
    }
    assert!(gone);
    assert!(!conn.is_alive());
}

#[tokio::test]
async fn test_unknown_topic_fails_before_dialing() {
    let env = create_test_env(Arc::new(MockChainRpc::new()));
    let chain = Chain {
        ws_topics: vec![TopicConfig {
            name: "pendingTransactions".to_string(),
            params: "{}".to_string(),
        }],
        ..local_chain(1)
    };

    let result = env.subscriber.subscribe_chain(&chain).await;
    assert!(matches!(result, Err(HubError::UnknownTopic(t)) if t == "pendingTransactions"));
    assert!(env.hub.groups().is_empty());
}

#[tokio::test]
async fn test_dial_failure_is_reported() {
    let env = create_test_env(Arc::new(MockChainRpc::new()));
    // bind then drop to get a port nobody listens on
    let port = {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().port()
    };

    let result = env.hub.dial("127.0.0.1", port, "", "chain-c1").await;
    assert!(result.is_err());
    assert_eq!(env.hub.info().connection_count, 0);
}
