use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use chainscope_api::{create_router, ApiState};
use chainscope_hub::{default_topics, Connection, EventHub, Frame, HubConfig, WsSubscriber};
use chainscope_storage::{InMemoryStorage, Storage};
use chainscope_syncer::mock::{mock_chain, MockChainRpc};
use chainscope_syncer::{SyncManager, Syncer, SyncerConfig};
use futures::StreamExt;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tower::ServiceExt;

struct TestApp {
    router: Router,
    state: Arc<ApiState>,
}

fn create_test_app(mock: Arc<MockChainRpc>) -> TestApp {
    let storage = Arc::new(InMemoryStorage::new());
    let config = SyncerConfig::default();
    let syncer = Arc::new(Syncer::new(storage.clone(), mock, config.clone()));
    let manager = Arc::new(SyncManager::new(syncer.clone(), storage.clone(), config));

    let hub_config = HubConfig {
        dial_timeout_seconds: 1,
        max_retry_count: 0,
        ..HubConfig::default()
    };
    let hub = EventHub::new(hub_config.clone());
    hub.start().unwrap();
    let topics = Arc::new(default_topics(syncer.clone(), &hub_config.message_types));
    let subscriber = Arc::new(WsSubscriber::new(hub.clone(), storage.clone(), topics, hub_config));

    let state = Arc::new(ApiState {
        storage,
        syncer,
        manager,
        hub,
        subscriber,
        local_addr: "127.0.0.1:8080".to_string(),
    });
    TestApp {
        router: create_router(state.clone()),
        state,
    }
}

// Helper to accept one websocket on a local port and report its text frames
async fn spawn_chain_endpoint() -> (u16, mpsc::UnboundedReceiver<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let (seen_tx, seen_rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        while let Some(Ok(msg)) = ws.next().await {
            if let Message::Text(text) = msg {
                let _ = seen_tx.send(text);
            }
        }
    });

    (port, seen_rx)
}

async fn call(app: &TestApp, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let request = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => request
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => request.body(Body::empty()).unwrap(),
    };

    let response = app.router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

#[tokio::test]
async fn test_health_reports_components() {
    let app = create_test_app(Arc::new(MockChainRpc::new()));
    let (status, body) = call(&app, "GET", "/health", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["components"]["hub"]["connections"], 0);
}

#[tokio::test]
async fn test_created_chain_is_subscribed() {
    let mock = Arc::new(MockChainRpc::new());
    mock.set_alive("http://127.0.0.1:6791", 0);
    let app = create_test_app(mock);
    let (ws_port, mut seen) = spawn_chain_endpoint().await;

    let (status, created) = call(
        &app,
        "POST",
        "/api/v1/chains",
        Some(json!({ "name": "alpha", "ip": "127.0.0.1", "rpc_port": 6791, "ws_port": ws_port })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(!created["id"].as_str().unwrap().is_empty());
    assert_eq!(created["ws_topics"][0]["name"], "newHeads");

    let request = timeout(Duration::from_secs(5), seen.recv())
        .await
        .unwrap()
        .unwrap();
    let request: Value = serde_json::from_str(&request).unwrap();
    assert_eq!(request["method"], "eth_subscribe");

    let (status, group) = call(&app, "GET", "/api/v1/ws/groups/alpha", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(group["connections"][0]["is_dial"], true);

    let (status, chains) = call(&app, "GET", "/api/v1/chains", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(chains.as_array().unwrap().len(), 1);
    assert_eq!(chains[0]["name"], "alpha");
}

#[tokio::test]
async fn test_create_chain_rejects_conflicts() {
    let app = create_test_app(Arc::new(MockChainRpc::new()));
    app.state.storage.save_chain(&mock_chain("c1")).unwrap();

    // same name as the stored chain
    let (status, body) = call(
        &app,
        "POST",
        "/api/v1/chains",
        Some(json!({ "name": "chain-c1", "ip": "10.9.9.9", "rpc_port": 1, "ws_port": 2 })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "ChainExists");

    // same host and ws port
    let (status, _) = call(
        &app,
        "POST",
        "/api/v1/chains",
        Some(json!({ "name": "other", "ip": "10.1.1.1", "rpc_port": 1, "ws_port": 6790 })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (_, chains) = call(&app, "GET", "/api/v1/chains", None).await;
    assert_eq!(chains.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_create_chain_checks_topics_and_reachability() {
    let app = create_test_app(Arc::new(MockChainRpc::new()));

    let (status, body) = call(
        &app,
        "POST",
        "/api/v1/chains",
        Some(json!({
            "name": "alpha",
            "ip": "10.0.0.5",
            "rpc_port": 6791,
            "ws_port": 6790,
            "ws_topics": [{ "name": "pendingTransactions", "params": "{}" }],
        })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "UnknownTopic");

    let (status, body) = call(
        &app,
        "POST",
        "/api/v1/chains",
        Some(json!({ "name": "alpha", "ip": "10.0.0.5", "rpc_port": 6791, "ws_port": 6790 })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(body["error"], "ChainUnreachable");

    let (_, chains) = call(&app, "GET", "/api/v1/chains", None).await;
    assert!(chains.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_create_chain_requires_name_and_ip() {
    let app = create_test_app(Arc::new(MockChainRpc::new()));
    let (status, body) = call(
        &app,
        "POST",
        "/api/v1/chains",
        Some(json!({ "name": "", "ip": "10.0.0.5", "rpc_port": 1, "ws_port": 2 })),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "InvalidChain");
}

#[tokio::test]
async fn test_blocking_sync_returns_finished_session() {
    let app = create_test_app(Arc::new(MockChainRpc::with_blocks(3, 1)));
    app.state.storage.save_chain(&mock_chain("c1")).unwrap();

    let (status, body) = call(&app, "POST", "/api/v1/sync/c1?full=true&async=false", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["started"], true);
    assert_eq!(body["session"]["status"], "success");
    assert_eq!(body["session"]["block"]["current_height"], 3);

    let (status, session) = call(&app, "GET", "/api/v1/sync/c1", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(session["chain_id"], "c1");

    let (_, sessions) = call(&app, "GET", "/api/v1/sync", None).await;
    assert_eq!(sessions.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_sync_unknown_chain_is_not_found() {
    let app = create_test_app(Arc::new(MockChainRpc::new()));

    let (status, body) = call(&app, "POST", "/api/v1/sync/missing", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "ChainNotFound");

    let (status, _) = call(&app, "GET", "/api/v1/sync/missing", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_group_queries_and_send() {
    let app = create_test_app(Arc::new(MockChainRpc::new()));
    let (conn, mut rx) = Connection::new("c1", "l", "r", "/ws/c1", false, 8);
    app.state.hub.register(conn.clone()).await.unwrap();

    let (status, groups) = call(&app, "GET", "/api/v1/ws/groups", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(groups[0]["name"], "c1");

    let (status, group) = call(&app, "GET", "/api/v1/ws/groups/c1", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(group["connections"][0]["id"], conn.id.as_str());

    let (status, _) = call(&app, "GET", "/api/v1/ws/groups/nobody", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, info) = call(&app, "GET", "/api/v1/ws/manager", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(info["connection_count"], 1);

    let (status, _) = call(
        &app,
        "POST",
        "/api/v1/ws/sendgroup",
        Some(json!({ "group": "c1", "message": "hello" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(rx.recv().await.unwrap(), Frame::text("hello"));

    let (status, _) = call(
        &app,
        "POST",
        "/api/v1/ws/send",
        Some(json!({ "id": conn.id, "group": "c1", "message": "direct" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(rx.recv().await.unwrap(), Frame::text("direct"));

    let (status, _) = call(&app, "POST", "/api/v1/ws/sendall", Some(json!({ "message": "all" }))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(rx.recv().await.unwrap(), Frame::text("all"));
}

#[tokio::test]
async fn test_client_send_rejects_inbound_connection() {
    let app = create_test_app(Arc::new(MockChainRpc::new()));
    let (conn, _rx) = Connection::new("c1", "l", "r", "/ws/c1", false, 8);
    app.state.hub.register(conn.clone()).await.unwrap();

    let (status, body) = call(
        &app,
        "POST",
        "/api/v1/ws/clientsend",
        Some(json!({ "id": conn.id, "group": "c1", "message": "x" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "NotDialed");

    let (status, _) = call(
        &app,
        "POST",
        "/api/v1/ws/clientsend",
        Some(json!({ "id": "missing", "group": "c1", "message": "x" })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
