use crate::config::SyncerConfig;
use crate::error::SyncError;
use crate::session::{SyncErrorEvent, SyncErrorKind, SyncSession, SyncStatus};
use crate::syncer::Syncer;
use chainscope_storage::Storage;
use chainscope_types::{now_millis, sync, ChainId, TimestampMillis};
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep, Duration, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// Per-chain sync sessions: at most one running session per chain, three
/// concurrent sub-syncs per session.
pub struct SyncManager {
    syncer: Arc<Syncer>,
    storage: Arc<dyn Storage>,
    config: SyncerConfig,
    // never held across an await
    sessions: Mutex<HashMap<ChainId, SyncSession>>,
    error_tx: mpsc::Sender<SyncErrorEvent>,
    error_rx: Mutex<Option<mpsc::Receiver<SyncErrorEvent>>>,
}

impl SyncManager {
    pub fn new(syncer: Arc<Syncer>, storage: Arc<dyn Storage>, config: SyncerConfig) -> Self {
        let (error_tx, error_rx) = mpsc::channel(config.error_channel_size.max(1));
        Self {
            syncer,
            storage,
            config,
            sessions: Mutex::new(HashMap::new()),
            error_tx,
            error_rx: Mutex::new(Some(error_rx)),
        }
    }

    pub fn syncer(&self) -> &Arc<Syncer> {
        &self.syncer
    }

    fn lock_sessions(&self) -> MutexGuard<'_, HashMap<ChainId, SyncSession>> {
        self.sessions.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Applies `f` to the session of `chain_id` if it is still on run `run`.
    fn update_session(&self, chain_id: &str, run: u64, f: impl FnOnce(&mut SyncSession)) {
        let mut sessions = self.lock_sessions();
        if let Some(session) = sessions.get_mut(chain_id).filter(|s| s.run == run) {
            f(session);
        }
    }

    /// Spawns the incremental loop and the error/GC loop.
    pub fn start(self: &Arc<Self>) -> Vec<JoinHandle<()>> {
        let mut handles = Vec::new();

        let manager = self.clone();
        handles.push(tokio::spawn(async move { manager.run_incremental_loop().await }));

        match self.error_rx.lock().unwrap_or_else(|p| p.into_inner()).take() {
            Some(rx) => {
                let manager = self.clone();
                handles.push(tokio::spawn(async move { manager.run_error_gc_loop(rx).await }));
            }
            None => warn!("sync manager already started, error loop not spawned twice"),
        }

        handles
    }

    async fn run_incremental_loop(self: Arc<Self>) {
        sleep(self.config.start_delay()).await;
        info!(
            interval_seconds = self.config.incr_interval_seconds,
            "starting incremental sync loop"
        );

        let mut ticker = interval(self.config.incr_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;

            let chains = match self.storage.list_chains() {
                Ok(chains) => chains,
                Err(e) => {
                    error!(error = %e, "failed to list chains for incremental sync");
                    continue;
                }
            };

            for chain in chains {
                self.trigger_sync(&chain.id, false, true).await;
            }
        }
    }

    async fn run_error_gc_loop(self: Arc<Self>, mut rx: mpsc::Receiver<SyncErrorEvent>) {
        let mut gc = interval(Duration::from_secs(sync::GC_INTERVAL_SECONDS));
        gc.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // the first tick completes immediately
        gc.tick().await;

        loop {
            tokio::select! {
                event = rx.recv() => match event {
                    Some(event) => self.handle_error_event(event),
                    None => {
                        debug!("sync error channel closed");
                        return;
                    }
                },
                _ = gc.tick() => {
                    let removed = self.collect_garbage(now_millis());
                    if !removed.is_empty() {
                        debug!(count = removed.len(), "collected finished sync sessions");
                    }
                }
            }
        }
    }

    /// Starts a sync run for `chain_id` unless one is already running.
    /// Returns `false` for the no-op case. With `run_async` the run is
    /// spawned and this returns immediately.
    pub async fn trigger_sync(self: &Arc<Self>, chain_id: &str, full: bool, run_async: bool) -> bool {
        let run = {
            let mut sessions = self.lock_sessions();
            let session = sessions
                .entry(chain_id.to_string())
                .or_insert_with(|| SyncSession::new(chain_id));
            if session.status == SyncStatus::Syncing {
                debug!(chain_id, "sync already running, skipping");
                return false;
            }
            session.begin_run(now_millis());
            session.run
        };

        info!(chain_id, full, run, "sync run started");
        let manager = self.clone();
        let chain_id = chain_id.to_string();
        let task = async move { manager.run_session(chain_id, run, full).await };

        if run_async {
            tokio::spawn(task);
        } else {
            task.await;
        }
        true
    }

    pub fn get_sync_info(&self, chain_id: &str) -> Option<SyncSession> {
        self.lock_sessions().get(chain_id).cloned()
    }

    pub fn sessions(&self) -> Vec<SyncSession> {
        let mut list: Vec<SyncSession> = self.lock_sessions().values().cloned().collect();
        list.sort_by(|a, b| a.chain_id.cmp(&b.chain_id));
        list
    }

    /// Removes successful sessions finished longer than the retention window ago.
    pub fn collect_garbage(&self, now: TimestampMillis) -> Vec<ChainId> {
        let mut sessions = self.lock_sessions();
        let expired: Vec<ChainId> = sessions
            .values()
            .filter(|s| s.is_expired(now, sync::RETENTION_MILLIS))
            .map(|s| s.chain_id.clone())
            .collect();
        for chain_id in &expired {
            sessions.remove(chain_id);
        }
        expired
    }

    fn handle_error_event(&self, event: SyncErrorEvent) {
        error!(
            chain_id = %event.chain_id,
            kind = %event.kind,
            error = %event.error,
            "sync failed"
        );
        self.update_session(&event.chain_id, event.run, |session| {
            session.progress_mut(event.kind).fail(event.error.clone());
            session.status = SyncStatus::Error;
            session.err_msg = format!("{}: {}", event.kind, event.error);
        });
    }

    async fn run_session(self: Arc<Self>, chain_id: ChainId, run: u64, full: bool) {
        let node = self.spawn_worker(&chain_id, run, SyncErrorKind::Node, move |m, c| async move {
            m.node_sync(&c, run).await
        });
        let registry = self.spawn_worker(&chain_id, run, SyncErrorKind::Registry, move |m, c| async move {
            m.registry_sync(&c, run, full).await
        });
        let block = self.spawn_worker(&chain_id, run, SyncErrorKind::BlockOrTx, move |m, c| async move {
            m.block_sync(&c, run, full).await
        });

        let (node, registry, block) = tokio::join!(node, registry, block);
        for (kind, joined) in [
            (SyncErrorKind::Node, node),
            (SyncErrorKind::Registry, registry),
            (SyncErrorKind::BlockOrTx, block),
        ] {
            if let Err(join_error) = joined {
                error!(chain_id = %chain_id, kind = %kind, error = %join_error, "sync worker panicked");
                self.update_session(&chain_id, run, |session| {
                    session.progress_mut(kind).fail(format!("worker panicked: {}", join_error));
                });
            }
        }

        let mut status = SyncStatus::Prepare;
        self.update_session(&chain_id, run, |session| {
            session.finish_run(now_millis());
            status = session.status;
        });
        info!(chain_id = %chain_id, run, status = ?status, "sync run finished");
    }

    /// Runs one sub-sync in its own task. A returned error marks the
    /// sub-progress failed and is reported on the error channel.
    fn spawn_worker<F, Fut>(
        self: &Arc<Self>,
        chain_id: &ChainId,
        run: u64,
        kind: SyncErrorKind,
        work: F,
    ) -> JoinHandle<()>
    where
        F: FnOnce(Arc<Self>, ChainId) -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), SyncError>> + Send + 'static,
    {
        let manager = self.clone();
        let chain_id = chain_id.clone();
        tokio::spawn(async move {
            debug!(chain_id = %chain_id, kind = %kind, "sub-sync started");
            let result = work(manager.clone(), chain_id.clone()).await;
            match result {
                Ok(()) => debug!(chain_id = %chain_id, kind = %kind, "sub-sync finished"),
                Err(e) => {
                    let message = e.to_string();
                    manager.update_session(&chain_id, run, |session| {
                        session.progress_mut(kind).fail(message.clone());
                    });
                    let event = SyncErrorEvent {
                        chain_id,
                        kind,
                        error: message,
                        run,
                    };
                    if let Err(e) = manager.error_tx.try_send(event) {
                        warn!(error = %e, "sync error channel full, event dropped");
                    }
                }
            }
        })
    }

    async fn node_sync(&self, chain_id: &str, run: u64) -> Result<(), SyncError> {
        let chain = self.syncer.chain(chain_id)?;
        let nodes = self.syncer.fetch_nodes(&chain).await?;
        let size = nodes.len() as u64;
        self.update_session(chain_id, run, |s| s.node.size = size);

        for (i, node) in nodes.iter().enumerate() {
            self.syncer.save_node(&chain, node)?;
            let done = i as u64 + 1;
            let now = now_millis();
            self.update_session(chain_id, run, |s| {
                s.node.index = done;
                s.node.progress.record(now, done, size - done);
                s.refresh_estimate();
            });
        }

        self.update_session(chain_id, run, |s| s.node.progress.succeed(now_millis()));
        Ok(())
    }

    async fn registry_sync(&self, chain_id: &str, run: u64, full: bool) -> Result<(), SyncError> {
        let chain = self.syncer.chain(chain_id)?;
        let entries = self.syncer.fetch_registry(&chain).await?;
        let size = entries.len() as u64;
        self.update_session(chain_id, run, |s| s.registry.size = size);

        for (i, entry) in entries.iter().enumerate() {
            self.syncer.save_registry_entry(entry, full)?;
            let done = i as u64 + 1;
            let now = now_millis();
            self.update_session(chain_id, run, |s| {
                s.registry.index = done;
                s.registry.progress.record(now, done, size - done);
                s.refresh_estimate();
            });
        }

        self.update_session(chain_id, run, |s| s.registry.progress.succeed(now_millis()));
        Ok(())
    }

    /// Incremental runs resume after the highest persisted height, full runs
    /// start from genesis.
    async fn block_sync(&self, chain_id: &str, run: u64, full: bool) -> Result<(), SyncError> {
        let chain = self.syncer.chain(chain_id)?;
        let persisted = if full {
            None
        } else {
            self.storage.latest_block_height(chain_id)?
        };
        let current = persisted.unwrap_or(0);
        let latest = self.syncer.rpc().latest_block_number(&chain).await?;
        self.update_session(chain_id, run, |s| {
            s.block.current_height = current;
            s.block.latest_height = latest;
        });

        if current >= latest {
            self.update_session(chain_id, run, |s| s.block.progress.succeed(now_millis()));
            return Ok(());
        }

        let first = if persisted.is_some() { current + 1 } else { current };
        let total = latest - first + 1;
        for (done, height) in (first..=latest).enumerate() {
            self.syncer.sync_block_by_number(&chain, height, full).await?;
            let done = done as u64 + 1;
            let now = now_millis();
            self.update_session(chain_id, run, |s| {
                s.block.current_height = height;
                s.block.progress.record(now, done, total - done);
                s.refresh_estimate();
            });
        }

        self.update_session(chain_id, run, |s| s.block.progress.succeed(now_millis()));
        Ok(())
    }
}
