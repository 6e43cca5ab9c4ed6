use crate::manager::EventHub;
use chainscope_types::new_record_id;
use futures::{Sink, SinkExt, Stream, StreamExt};
use serde::Serialize;
use std::fmt::Display;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, warn};

pub type ConnectionId = String;

/// Transport-neutral websocket frame, shared by dialed and accepted sockets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Binary(Vec<u8>),
    Ping(Vec<u8>),
    Pong(Vec<u8>),
    Close,
}

impl Frame {
    pub fn text(s: impl Into<String>) -> Self {
        Frame::Text(s.into())
    }

    pub fn from_ws(msg: Message) -> Option<Frame> {
        match msg {
            Message::Text(s) => Some(Frame::Text(s)),
            Message::Binary(b) => Some(Frame::Binary(b)),
            Message::Ping(p) => Some(Frame::Ping(p)),
            Message::Pong(p) => Some(Frame::Pong(p)),
            Message::Close(_) => Some(Frame::Close),
            Message::Frame(_) => None,
        }
    }

    pub fn into_ws(self) -> Message {
        match self {
            Frame::Text(s) => Message::Text(s),
            Frame::Binary(b) => Message::Binary(b),
            Frame::Ping(p) => Message::Ping(p),
            Frame::Pong(p) => Message::Pong(p),
            Frame::Close => Message::Close(None),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionInfo {
    pub id: ConnectionId,
    pub group: String,
    pub local_addr: String,
    pub remote_addr: String,
    pub path: String,
    pub is_alive: bool,
    pub is_dial: bool,
    pub retry_count: u32,
}

/// One registered websocket. The outbound queue is drained by the
/// connection's write pump; closing the queue ends that pump.
pub struct Connection {
    pub id: ConnectionId,
    pub group: String,
    pub local_addr: String,
    pub remote_addr: String,
    pub path: String,
    pub is_dial: bool,
    alive: AtomicBool,
    retry_count: AtomicU32,
    outbound: Mutex<Option<mpsc::Sender<Frame>>>,
}

impl Connection {
    pub fn new(
        group: impl Into<String>,
        local_addr: impl Into<String>,
        remote_addr: impl Into<String>,
        path: impl Into<String>,
        is_dial: bool,
        buffer_size: usize,
    ) -> (Arc<Connection>, mpsc::Receiver<Frame>) {
        let (tx, rx) = mpsc::channel(buffer_size.max(1));
        let conn = Connection {
            id: new_record_id(),
            group: group.into(),
            local_addr: local_addr.into(),
            remote_addr: remote_addr.into(),
            path: path.into(),
            is_dial,
            alive: AtomicBool::new(true),
            retry_count: AtomicU32::new(0),
            outbound: Mutex::new(Some(tx)),
        };
        (Arc::new(conn), rx)
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    pub fn mark_dead(&self) {
        self.alive.store(false, Ordering::SeqCst);
    }

    pub fn retry_count(&self) -> u32 {
        self.retry_count.load(Ordering::SeqCst)
    }

    pub fn set_retry_count(&self, count: u32) {
        self.retry_count.store(count, Ordering::SeqCst);
    }

    /// Queues a frame without waiting. A full or closed queue drops it.
    pub fn enqueue(&self, frame: Frame) -> bool {
        let outbound = self.outbound.lock().unwrap_or_else(|p| p.into_inner());
        let Some(tx) = outbound.as_ref() else {
            debug!(conn_id = %self.id, "queue closed, frame dropped");
            return false;
        };
        match tx.try_send(frame) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(conn_id = %self.id, group = %self.group, "outbound queue full, frame dropped");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    /// Closes the outbound queue. Idempotent.
    pub fn close(&self) {
        self.outbound
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .take();
    }

    pub fn info(&self) -> ConnectionInfo {
        ConnectionInfo {
            id: self.id.clone(),
            group: self.group.clone(),
            local_addr: self.local_addr.clone(),
            remote_addr: self.remote_addr.clone(),
            path: self.path.clone(),
            is_alive: self.is_alive(),
            is_dial: self.is_dial,
            retry_count: self.retry_count(),
        }
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("group", &self.group)
            .field("remote_addr", &self.remote_addr)
            .field("is_dial", &self.is_dial)
            .finish()
    }
}

/// Drains the outbound queue into the transport. Sends a close frame once
/// the queue is closed.
pub(crate) async fn write_pump<S>(conn: Arc<Connection>, mut rx: mpsc::Receiver<Frame>, mut sink: S)
where
    S: Sink<Frame> + Unpin,
    S::Error: Display + Send,
{
    while let Some(frame) = rx.recv().await {
        if let Err(e) = sink.send(frame).await {
            warn!(conn_id = %conn.id, error = %e, "websocket write failed");
        }
    }

    if let Err(e) = sink.send(Frame::Close).await {
        debug!(conn_id = %conn.id, error = %e, "close frame not sent");
    }
    let _ = sink.close().await;
    debug!(conn_id = %conn.id, "write pump stopped");
}

/// Reads frames and hands them to the hub's frame handler one at a time.
/// Unregisters the connection on read error or close.
pub(crate) async fn read_pump<St, E>(hub: EventHub, conn: Arc<Connection>, mut stream: St)
where
    St: Stream<Item = Result<Frame, E>> + Unpin,
    E: Display,
{
    while let Some(item) = stream.next().await {
        match item {
            Ok(Frame::Close) => break,
            Ok(Frame::Ping(_)) | Ok(Frame::Pong(_)) => {}
            Ok(frame) => hub.dispatch(&conn, frame).await,
            Err(e) => {
                warn!(conn_id = %conn.id, group = %conn.group, error = %e, "websocket read failed");
                break;
            }
        }
    }

    conn.mark_dead();
    if let Err(e) = hub.unregister(conn.clone()).await {
        warn!(conn_id = %conn.id, error = %e, "unregister failed");
        conn.close();
    }
    debug!(conn_id = %conn.id, "read pump stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_enqueue_drops_when_full() {
        let (conn, mut rx) = Connection::new("g", "l", "r", "", false, 1);
        assert!(conn.enqueue(Frame::text("a")));
        assert!(!conn.enqueue(Frame::text("b")));
        assert_eq!(rx.try_recv().unwrap(), Frame::text("a"));
    }

    #[test]
    fn test_close_ends_queue() {
        let (conn, mut rx) = Connection::new("g", "l", "r", "", false, 4);
        conn.close();
        conn.close();
        assert!(!conn.enqueue(Frame::text("late")));
        assert!(matches!(
            rx.try_recv(),
            Err(mpsc::error::TryRecvError::Disconnected)
        ));
    }

    #[test]
    fn test_frame_ws_mapping() {
        assert_eq!(Frame::from_ws(Message::Text("x".into())), Some(Frame::text("x")));
        assert_eq!(Frame::from_ws(Message::Close(None)), Some(Frame::Close));
        assert!(matches!(Frame::Binary(vec![1]).into_ws(), Message::Binary(b) if b == vec![1]));
    }
}
