use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    http::HeaderMap,
    response::Response,
};
use chainscope_hub::Frame;
use futures::{future, SinkExt, StreamExt};
use std::sync::Arc;
use tracing::warn;

use crate::handlers::ApiState;

fn to_frame(msg: Message) -> Frame {
    match msg {
        Message::Text(s) => Frame::Text(s),
        Message::Binary(b) => Frame::Binary(b),
        Message::Ping(p) => Frame::Ping(p),
        Message::Pong(p) => Frame::Pong(p),
        Message::Close(_) => Frame::Close,
    }
}

fn to_message(frame: Frame) -> Message {
    match frame {
        Frame::Text(s) => Message::Text(s),
        Frame::Binary(b) => Message::Binary(b),
        Frame::Ping(p) => Message::Ping(p),
        Frame::Pong(p) => Message::Pong(p),
        Frame::Close => Message::Close(None),
    }
}

fn client_addr(headers: &HeaderMap) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .or_else(|| headers.get("x-real-ip").and_then(|v| v.to_str().ok()))
        .unwrap_or("unknown")
        .to_string()
}

/// `GET /ws/:group`: the upgraded socket joins `group` in the event hub.
pub async fn ws_upgrade(
    State(state): State<Arc<ApiState>>,
    Path(group): Path<String>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    let remote_addr = client_addr(&headers);
    ws.on_upgrade(move |socket| serve_socket(state, group, remote_addr, socket))
}

async fn serve_socket(state: Arc<ApiState>, group: String, remote_addr: String, socket: WebSocket) {
    let path = format!("/ws/{}", group);
    let (write, read) = socket.split();
    let sink = write.with(|frame: Frame| future::ready(Ok::<_, axum::Error>(to_message(frame))));
    let stream = read.map(|item| item.map(to_frame));

    if let Err(e) = state
        .hub
        .serve_connection(
            &group,
            state.local_addr.clone(),
            remote_addr,
            &path,
            false,
            sink,
            stream,
        )
        .await
    {
        warn!(group = %group, error = %e, "inbound websocket not registered");
    }
}
