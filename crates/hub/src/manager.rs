use crate::config::HubConfig;
use crate::connection::{read_pump, write_pump, Connection, ConnectionId, ConnectionInfo, Frame};
use crate::error::HubError;
use async_trait::async_trait;
use futures::{future, Sink, SinkExt, Stream, StreamExt};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt::Display;
use std::sync::{Arc, Mutex, OnceLock, RwLock, RwLockReadGuard};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Error as WsError;
use tokio_tungstenite::{connect_async, MaybeTlsStream};
use tracing::{debug, info, warn};

type Groups = HashMap<String, HashMap<ConnectionId, Arc<Connection>>>;

/// Receives every data frame read from any registered connection.
#[async_trait]
pub trait FrameHandler: Send + Sync {
    async fn handle(&self, hub: &EventHub, conn: &Arc<Connection>, frame: Frame) -> Result<(), HubError>;
}

enum RegistryEvent {
    Register(Arc<Connection>, oneshot::Sender<bool>),
    Unregister(Arc<Connection>, oneshot::Sender<bool>),
}

struct Unicast {
    id: ConnectionId,
    group: String,
    frame: Frame,
}

struct GroupCast {
    group: String,
    frame: Frame,
}

struct HubReceivers {
    registry: mpsc::Receiver<RegistryEvent>,
    unicast: mpsc::Receiver<Unicast>,
    group: mpsc::Receiver<GroupCast>,
    all: mpsc::Receiver<Frame>,
}

struct HubInner {
    config: HubConfig,
    // mutated only by the registry loop
    groups: RwLock<Groups>,
    registry_tx: mpsc::Sender<RegistryEvent>,
    unicast_tx: mpsc::Sender<Unicast>,
    group_tx: mpsc::Sender<GroupCast>,
    all_tx: mpsc::Sender<Frame>,
    receivers: Mutex<Option<HubReceivers>>,
    handler: OnceLock<Arc<dyn FrameHandler>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HubInfo {
    pub group_count: usize,
    pub connection_count: usize,
    pub registry_queue: usize,
    pub unicast_queue: usize,
    pub group_queue: usize,
    pub all_queue: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GroupInfo {
    pub name: String,
    pub connections: Vec<ConnectionInfo>,
}

/// Registry of live websocket connections grouped by name, with unicast,
/// group and broadcast delivery.
#[derive(Clone)]
pub struct EventHub {
    inner: Arc<HubInner>,
}

fn queued<T>(tx: &mpsc::Sender<T>) -> usize {
    tx.max_capacity() - tx.capacity()
}

impl EventHub {
    pub fn new(config: HubConfig) -> Self {
        let size = config.buffer_size.max(1);
        let (registry_tx, registry) = mpsc::channel(size);
        let (unicast_tx, unicast) = mpsc::channel(size);
        let (group_tx, group) = mpsc::channel(size);
        let (all_tx, all) = mpsc::channel(size);

        Self {
            inner: Arc::new(HubInner {
                config,
                groups: RwLock::new(HashMap::new()),
                registry_tx,
                unicast_tx,
                group_tx,
                all_tx,
                receivers: Mutex::new(Some(HubReceivers {
                    registry,
                    unicast,
                    group,
                    all,
                })),
                handler: OnceLock::new(),
            }),
        }
    }

    pub fn config(&self) -> &HubConfig {
        &self.inner.config
    }

    /// Installs the frame handler. Only the first call has an effect.
    pub fn set_handler(&self, handler: Arc<dyn FrameHandler>) -> bool {
        self.inner.handler.set(handler).is_ok()
    }

    /// Spawns the registry loop and the three delivery loops.
    pub fn start(&self) -> Result<Vec<JoinHandle<()>>, HubError> {
        let receivers = self
            .inner
            .receivers
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .take()
            .ok_or(HubError::AlreadyStarted)?;

        let HubReceivers {
            registry,
            unicast,
            group,
            all,
        } = receivers;

        info!(buffer_size = self.inner.config.buffer_size, "starting event hub");
        Ok(vec![
            tokio::spawn(self.clone().registry_loop(registry)),
            tokio::spawn(self.clone().unicast_loop(unicast)),
            tokio::spawn(self.clone().group_loop(group)),
            tokio::spawn(self.clone().all_loop(all)),
        ])
    }

    fn read_groups(&self) -> RwLockReadGuard<'_, Groups> {
        self.inner.groups.read().unwrap_or_else(|p| p.into_inner())
    }

    async fn registry_loop(self, mut rx: mpsc::Receiver<RegistryEvent>) {
        while let Some(event) = rx.recv().await {
            let mut groups = self.inner.groups.write().unwrap_or_else(|p| p.into_inner());
            match event {
                RegistryEvent::Register(conn, ack) => {
                    groups
                        .entry(conn.group.clone())
                        .or_default()
                        .insert(conn.id.clone(), conn.clone());
                    drop(groups);
                    info!(conn_id = %conn.id, group = %conn.group, is_dial = conn.is_dial, "connection registered");
                    let _ = ack.send(true);
                }
                RegistryEvent::Unregister(conn, ack) => {
                    let removed = match groups.get_mut(&conn.group) {
                        Some(members) => {
                            let removed = members.remove(&conn.id).is_some();
                            if members.is_empty() {
                                groups.remove(&conn.group);
                            }
                            removed
                        }
                        None => false,
                    };
                    drop(groups);
                    if removed {
                        conn.close();
                        info!(conn_id = %conn.id, group = %conn.group, "connection unregistered");
                    }
                    let _ = ack.send(removed);
                }
            }
        }
        debug!("registry loop stopped");
    }

    async fn unicast_loop(self, mut rx: mpsc::Receiver<Unicast>) {
        while let Some(msg) = rx.recv().await {
            match self.connection(&msg.group, &msg.id) {
                Some(conn) => {
                    conn.enqueue(msg.frame);
                }
                None => debug!(conn_id = %msg.id, group = %msg.group, "unicast target gone"),
            }
        }
    }

    async fn group_loop(self, mut rx: mpsc::Receiver<GroupCast>) {
        while let Some(msg) = rx.recv().await {
            let members: Vec<Arc<Connection>> = self
                .read_groups()
                .get(&msg.group)
                .map(|m| m.values().cloned().collect())
                .unwrap_or_default();
            for conn in members {
                conn.enqueue(msg.frame.clone());
            }
        }
    }

    async fn all_loop(self, mut rx: mpsc::Receiver<Frame>) {
        while let Some(frame) = rx.recv().await {
            let members: Vec<Arc<Connection>> = self
                .read_groups()
                .values()
                .flat_map(|m| m.values().cloned())
                .collect();
            for conn in members {
                conn.enqueue(frame.clone());
            }
        }
    }

    /// Adds a connection to its group, creating the group if needed.
    pub async fn register(&self, conn: Arc<Connection>) -> Result<(), HubError> {
        let (ack, done) = oneshot::channel();
        self.inner
            .registry_tx
            .send(RegistryEvent::Register(conn, ack))
            .await
            .map_err(|_| HubError::Closed)?;
        done.await.map_err(|_| HubError::Closed)?;
        Ok(())
    }

    /// Removes a connection and closes its queue. Returns `false` when it was
    /// not registered.
    pub async fn unregister(&self, conn: Arc<Connection>) -> Result<bool, HubError> {
        let (ack, done) = oneshot::channel();
        self.inner
            .registry_tx
            .send(RegistryEvent::Unregister(conn, ack))
            .await
            .map_err(|_| HubError::Closed)?;
        done.await.map_err(|_| HubError::Closed)
    }

    pub fn info(&self) -> HubInfo {
        let groups = self.read_groups();
        HubInfo {
            group_count: groups.len(),
            connection_count: groups.values().map(|m| m.len()).sum(),
            registry_queue: queued(&self.inner.registry_tx),
            unicast_queue: queued(&self.inner.unicast_tx),
            group_queue: queued(&self.inner.group_tx),
            all_queue: queued(&self.inner.all_tx),
        }
    }

    pub fn groups(&self) -> Vec<GroupInfo> {
        let mut list: Vec<GroupInfo> = self
            .read_groups()
            .iter()
            .map(|(name, members)| GroupInfo {
                name: name.clone(),
                connections: members.values().map(|c| c.info()).collect(),
            })
            .collect();
        list.sort_by(|a, b| a.name.cmp(&b.name));
        list
    }

    pub fn group(&self, name: &str) -> Option<GroupInfo> {
        self.read_groups().get(name).map(|members| GroupInfo {
            name: name.to_string(),
            connections: members.values().map(|c| c.info()).collect(),
        })
    }

    pub fn connection(&self, group: &str, id: &str) -> Option<Arc<Connection>> {
        self.read_groups().get(group).and_then(|m| m.get(id)).cloned()
    }

    pub fn find_connection(&self, id: &str) -> Option<Arc<Connection>> {
        self.read_groups()
            .values()
            .find_map(|m| m.get(id))
            .cloned()
    }

    pub async fn send(&self, id: &str, group: &str, frame: Frame) -> Result<(), HubError> {
        self.inner
            .unicast_tx
            .send(Unicast {
                id: id.to_string(),
                group: group.to_string(),
                frame,
            })
            .await
            .map_err(|_| HubError::Closed)
    }

    pub async fn send_group(&self, group: &str, frame: Frame) -> Result<(), HubError> {
        self.inner
            .group_tx
            .send(GroupCast {
                group: group.to_string(),
                frame,
            })
            .await
            .map_err(|_| HubError::Closed)
    }

    pub async fn send_all(&self, frame: Frame) -> Result<(), HubError> {
        self.inner
            .all_tx
            .send(frame)
            .await
            .map_err(|_| HubError::Closed)
    }

    /// Writes straight to a connection this process dialed.
    pub fn client_send(&self, group: &str, id: &str, frame: Frame) -> Result<bool, HubError> {
        let conn = self
            .connection(group, id)
            .ok_or_else(|| HubError::ConnectionNotFound {
                group: group.to_string(),
                id: id.to_string(),
            })?;
        if !conn.is_dial {
            return Err(HubError::NotDialed(conn.id.clone()));
        }
        Ok(conn.enqueue(frame))
    }

    pub(crate) async fn dispatch(&self, conn: &Arc<Connection>, frame: Frame) {
        let Some(handler) = self.inner.handler.get() else {
            debug!(conn_id = %conn.id, "no frame handler installed, frame dropped");
            return;
        };
        if let Err(e) = handler.handle(self, conn, frame).await {
            warn!(conn_id = %conn.id, group = %conn.group, error = %e, "frame handling failed");
        }
    }

    /// Registers an established socket and starts its pumps.
    pub async fn serve_connection<S, St, E>(
        &self,
        group: &str,
        local_addr: String,
        remote_addr: String,
        path: &str,
        is_dial: bool,
        sink: S,
        stream: St,
    ) -> Result<Arc<Connection>, HubError>
    where
        S: Sink<Frame> + Unpin + Send + 'static,
        S::Error: Display + Send,
        St: Stream<Item = Result<Frame, E>> + Unpin + Send + 'static,
        E: Display + Send + 'static,
    {
        let (conn, rx) = Connection::new(
            group,
            local_addr,
            remote_addr,
            path,
            is_dial,
            self.inner.config.buffer_size,
        );
        self.register(conn.clone()).await?;

        tokio::spawn(write_pump(conn.clone(), rx, sink));
        tokio::spawn(read_pump(self.clone(), conn.clone(), stream));
        Ok(conn)
    }

    /// Opens `ws://host:port<path>` and registers it in `group` as a dialed connection.
    pub async fn dial(&self, host: &str, port: u16, path: &str, group: &str) -> Result<Arc<Connection>, HubError> {
        let url = format!("ws://{}:{}{}", host, port, path);
        let dial_timeout = self.inner.config.dial_timeout();
        let (ws, _) = timeout(dial_timeout, connect_async(url.as_str()))
            .await
            .map_err(|_| HubError::DialTimeout(url.clone(), dial_timeout))??;

        let (local_addr, remote_addr) = match ws.get_ref() {
            MaybeTlsStream::Plain(tcp) => (
                tcp.local_addr().map(|a| a.to_string()).unwrap_or_default(),
                tcp.peer_addr().map(|a| a.to_string()).unwrap_or_default(),
            ),
            _ => (String::new(), format!("{}:{}", host, port)),
        };

        let (write, read) = ws.split();
        let sink = write.with(|frame: Frame| future::ready(Ok::<_, WsError>(frame.into_ws())));
        let stream = read.filter_map(|item| {
            future::ready(match item {
                Ok(msg) => Frame::from_ws(msg).map(Ok),
                Err(e) => Some(Err(e)),
            })
        });

        let conn = self
            .serve_connection(group, local_addr, remote_addr, path, true, sink, Box::pin(stream))
            .await?;
        info!(url = %url, group, conn_id = %conn.id, "dialed");
        Ok(conn)
    }
}
