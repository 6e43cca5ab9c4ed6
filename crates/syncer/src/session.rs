use chainscope_types::{BlockHeight, ChainId, TimestampMillis};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    #[default]
    Prepare,
    Syncing,
    Error,
    Success,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SyncErrorKind {
    Node,
    Registry,
    BlockOrTx,
}

impl std::fmt::Display for SyncErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncErrorKind::Node => write!(f, "node"),
            SyncErrorKind::Registry => write!(f, "registry"),
            SyncErrorKind::BlockOrTx => write!(f, "blockOrTx"),
        }
    }
}

/// Failure of one sub-sync. `run` identifies the session run that produced
/// it, so late events never touch a newer run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncErrorEvent {
    pub chain_id: ChainId,
    pub kind: SyncErrorKind,
    pub error: String,
    pub run: u64,
}

/// Timing shared by all progress records. Times are unix milliseconds.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Progress {
    pub status: SyncStatus,
    pub start_time: TimestampMillis,
    pub avg_time_per_item: i64,
    pub estimate_complete_time: TimestampMillis,
    pub err_msg: String,
}

impl Progress {
    fn begin(&mut self, now: TimestampMillis) {
        *self = Progress {
            status: SyncStatus::Syncing,
            start_time: now,
            ..Progress::default()
        };
    }

    /// Recomputes the running average after `done` items and projects the
    /// completion of the `remaining` ones.
    pub fn record(&mut self, now: TimestampMillis, done: u64, remaining: u64) {
        let elapsed = (now - self.start_time).max(0);
        self.avg_time_per_item = elapsed / done.max(1) as i64;
        self.estimate_complete_time = now + remaining as i64 * self.avg_time_per_item;
    }

    pub fn fail(&mut self, err_msg: impl Into<String>) {
        self.status = SyncStatus::Error;
        self.err_msg = err_msg.into();
    }

    pub fn succeed(&mut self, now: TimestampMillis) {
        self.status = SyncStatus::Success;
        self.estimate_complete_time = self.estimate_complete_time.max(now);
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockSyncProgress {
    pub current_height: BlockHeight,
    pub latest_height: BlockHeight,
    #[serde(flatten)]
    pub progress: Progress,
}

/// Progress over a fetched list of items, used for nodes and registry entries.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemSyncProgress {
    pub size: u64,
    pub index: u64,
    #[serde(flatten)]
    pub progress: Progress,
}

pub type NodeSyncProgress = ItemSyncProgress;
pub type RegistrySyncProgress = ItemSyncProgress;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncSession {
    pub chain_id: ChainId,
    pub status: SyncStatus,
    pub start_time: TimestampMillis,
    pub estimate_complete_time: TimestampMillis,
    pub err_msg: String,
    pub block: BlockSyncProgress,
    pub registry: RegistrySyncProgress,
    pub node: NodeSyncProgress,
    #[serde(skip)]
    pub run: u64,
}

impl SyncSession {
    pub fn new(chain_id: impl Into<ChainId>) -> Self {
        Self {
            chain_id: chain_id.into(),
            ..Self::default()
        }
    }

    /// Starts a new run: every sub-progress goes back to `syncing`.
    pub fn begin_run(&mut self, now: TimestampMillis) {
        self.run += 1;
        self.status = SyncStatus::Syncing;
        self.start_time = now;
        self.estimate_complete_time = now;
        self.err_msg.clear();
        self.block = BlockSyncProgress::default();
        self.block.progress.begin(now);
        self.registry = ItemSyncProgress::default();
        self.registry.progress.begin(now);
        self.node = ItemSyncProgress::default();
        self.node.progress.begin(now);
    }

    pub fn progress_mut(&mut self, kind: SyncErrorKind) -> &mut Progress {
        match kind {
            SyncErrorKind::Node => &mut self.node.progress,
            SyncErrorKind::Registry => &mut self.registry.progress,
            SyncErrorKind::BlockOrTx => &mut self.block.progress,
        }
    }

    /// The session finishes when its latest sub-sync does.
    pub fn refresh_estimate(&mut self) {
        self.estimate_complete_time = [
            self.estimate_complete_time,
            self.block.progress.estimate_complete_time,
            self.registry.progress.estimate_complete_time,
            self.node.progress.estimate_complete_time,
        ]
        .into_iter()
        .max()
        .unwrap_or_default();
    }

    pub fn all_succeeded(&self) -> bool {
        [&self.block.progress, &self.registry.progress, &self.node.progress]
            .iter()
            .all(|p| p.status == SyncStatus::Success)
    }

    /// Settles the overall status once every worker of the run has ended.
    pub fn finish_run(&mut self, now: TimestampMillis) {
        self.refresh_estimate();
        if self.all_succeeded() {
            self.status = SyncStatus::Success;
            self.estimate_complete_time = self.estimate_complete_time.max(now);
            return;
        }

        self.status = SyncStatus::Error;
        if self.err_msg.is_empty() {
            self.err_msg = [
                (SyncErrorKind::Node, &self.node.progress),
                (SyncErrorKind::Registry, &self.registry.progress),
                (SyncErrorKind::BlockOrTx, &self.block.progress),
            ]
            .iter()
            .filter(|(_, p)| p.status != SyncStatus::Success)
            .map(|(kind, p)| format!("{}: {}", kind, p.err_msg))
            .collect::<Vec<_>>()
            .join("; ");
        }
    }

    pub fn is_expired(&self, now: TimestampMillis, retention_millis: i64) -> bool {
        self.status == SyncStatus::Success && now - self.estimate_complete_time > retention_millis
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_projects_remaining_items() {
        let mut progress = Progress::default();
        progress.begin(1_000);

        progress.record(1_400, 1, 3);
        assert_eq!(progress.avg_time_per_item, 400);
        assert_eq!(progress.estimate_complete_time, 1_400 + 3 * 400);

        progress.record(1_600, 2, 2);
        assert_eq!(progress.avg_time_per_item, 300);
        assert_eq!(progress.estimate_complete_time, 1_600 + 2 * 300);
    }

    #[test]
    fn test_fast_items_yield_zero_average() {
        let mut progress = Progress::default();
        progress.begin(1_000);
        progress.record(1_000, 5, 10);
        assert_eq!(progress.avg_time_per_item, 0);
        assert_eq!(progress.estimate_complete_time, 1_000);
    }

    #[test]
    fn test_session_estimate_is_latest_sub_estimate() {
        let mut session = SyncSession::new("c1");
        session.begin_run(0);
        session.block.progress.estimate_complete_time = 500;
        session.node.progress.estimate_complete_time = 900;
        session.registry.progress.estimate_complete_time = 100;
        session.refresh_estimate();
        assert_eq!(session.estimate_complete_time, 900);
    }

    #[test]
    fn test_finish_run_requires_all_three() {
        let mut session = SyncSession::new("c1");
        session.begin_run(0);
        session.block.progress.succeed(10);
        session.node.progress.succeed(10);
        session.registry.progress.fail("registry down");
        session.finish_run(20);

        assert_eq!(session.status, SyncStatus::Error);
        assert_eq!(session.err_msg, "registry: registry down");

        session.begin_run(30);
        assert_eq!(session.status, SyncStatus::Syncing);
        assert_eq!(session.registry.progress.status, SyncStatus::Syncing);
        assert!(session.err_msg.is_empty());

        session.block.progress.succeed(40);
        session.node.progress.succeed(40);
        session.registry.progress.succeed(40);
        session.finish_run(50);
        assert_eq!(session.status, SyncStatus::Success);
        assert_eq!(session.estimate_complete_time, 50);
    }

    #[test]
    fn test_expiry_only_for_successful_sessions() {
        let now = 10 * 60 * 1000;
        let retention = 2 * 60 * 1000;

        let mut old = SyncSession::new("c1");
        old.status = SyncStatus::Success;
        old.estimate_complete_time = now - 3 * 60 * 1000;
        assert!(old.is_expired(now, retention));

        let mut recent = old.clone();
        recent.estimate_complete_time = now - 30 * 1000;
        assert!(!recent.is_expired(now, retention));

        let mut failed = old.clone();
        failed.status = SyncStatus::Error;
        assert!(!failed.is_expired(now, retention));
    }

    #[test]
    fn test_status_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&SyncStatus::Success).unwrap(), "\"success\"");
        assert_eq!(
            serde_json::to_string(&SyncErrorKind::BlockOrTx).unwrap(),
            "\"blockOrTx\""
        );
    }
}
