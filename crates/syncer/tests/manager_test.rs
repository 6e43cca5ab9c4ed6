// Sync manager sessions, error routing and garbage collection

use chainscope_storage::{InMemoryStorage, Storage};
use chainscope_syncer::mock::{mock_chain, mock_node, MockChainRpc};
use chainscope_syncer::{SyncManager, SyncStatus, Syncer, SyncerConfig};
use chainscope_types::now_millis;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

fn create_test_manager(mock: Arc<MockChainRpc>) -> (Arc<InMemoryStorage>, Arc<SyncManager>) {
    let storage = Arc::new(InMemoryStorage::new());
    storage.save_chain(&mock_chain("c1")).unwrap();
    let config = SyncerConfig::default();
    let syncer = Arc::new(Syncer::new(storage.clone(), mock, config.clone()));
    let manager = Arc::new(SyncManager::new(syncer, storage.clone(), config));
    (storage, manager)
}

// Helper to wait until a session leaves the syncing state
async fn wait_for_finished(manager: &SyncManager, chain_id: &str, max_wait_ms: u64) -> SyncStatus {
    let start = std::time::Instant::now();
    loop {
        if let Some(session) = manager.get_sync_info(chain_id) {
            if session.status != SyncStatus::Syncing {
                return session.status;
            }
        }
        if start.elapsed().as_millis() as u64 >= max_wait_ms {
            return SyncStatus::Syncing;
        }
        sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test]
async fn test_fresh_chain_syncs_from_genesis() {
    let mock = Arc::new(MockChainRpc::with_blocks(2, 1));
    mock.set_nodes(vec![mock_node("c1", "n0", "20.0.0.1")]);
    let (storage, manager) = create_test_manager(mock.clone());

    assert!(manager.trigger_sync("c1", false, false).await);

    let session = manager.get_sync_info("c1").unwrap();
    assert_eq!(session.status, SyncStatus::Success);
    assert_eq!(mock.fetched_heights(), vec![0, 1, 2]);
    assert_eq!(session.block.current_height, 2);
    assert_eq!(session.block.latest_height, 2);
    assert_eq!(session.node.size, 1);
    assert_eq!(session.node.index, 1);
    assert_eq!(storage.count_blocks("c1").unwrap(), 3);
}

#[tokio::test]
async fn test_incremental_sync_resumes_after_persisted_height() {
    let mock = Arc::new(MockChainRpc::with_blocks(2, 0));
    let (_storage, manager) = create_test_manager(mock.clone());
    manager.trigger_sync("c1", false, false).await;

    for _ in 0..3 {
        mock.push_block(1);
    }
    manager.trigger_sync("c1", false, false).await;
    assert_eq!(mock.fetched_heights(), vec![0, 1, 2, 3, 4, 5]);
    assert_eq!(manager.get_sync_info("c1").unwrap().block.current_height, 5);

    // nothing new on the chain: no fetch at all
    let fetches = mock.block_fetches();
    manager.trigger_sync("c1", false, false).await;
    assert_eq!(mock.block_fetches(), fetches);
    assert_eq!(manager.get_sync_info("c1").unwrap().status, SyncStatus::Success);
}

#[tokio::test]
async fn test_second_trigger_while_syncing_is_noop() {
    let mock = Arc::new(MockChainRpc::with_blocks(3, 0));
    mock.set_block_delay(Duration::from_millis(50));
    let (_storage, manager) = create_test_manager(mock.clone());

    assert!(manager.trigger_sync("c1", false, true).await);
    assert!(!manager.trigger_sync("c1", true, true).await);

    assert_eq!(wait_for_finished(&manager, "c1", 5_000).await, SyncStatus::Success);
    assert_eq!(mock.block_fetches(), 4);
}

#[tokio::test]
async fn test_block_failure_keeps_last_completed_height() {
    let mock = Arc::new(MockChainRpc::with_blocks(4, 0));
    mock.fail_at_height(3);
    let (_storage, manager) = create_test_manager(mock.clone());

    manager.trigger_sync("c1", false, false).await;

    let session = manager.get_sync_info("c1").unwrap();
    assert_eq!(session.status, SyncStatus::Error);
    assert_eq!(session.block.progress.status, SyncStatus::Error);
    assert_eq!(session.block.current_height, 2);
    assert!(session.block.progress.err_msg.contains("height 3"));
    assert_eq!(session.node.progress.status, SyncStatus::Success);

    mock.clear_failures();
    manager.trigger_sync("c1", false, false).await;
    let session = manager.get_sync_info("c1").unwrap();
    assert_eq!(session.status, SyncStatus::Success);
    assert_eq!(session.block.current_height, 4);
}

#[tokio::test]
async fn test_worker_panic_fails_only_its_sub_sync() {
    let mock = Arc::new(MockChainRpc::with_blocks(1, 0));
    mock.panic_on_node_fetch(true);
    let (_storage, manager) = create_test_manager(mock);

    assert!(manager.trigger_sync("c1", false, false).await);

    let session = manager.get_sync_info("c1").unwrap();
    assert_eq!(session.status, SyncStatus::Error);
    assert_eq!(session.node.progress.status, SyncStatus::Error);
    assert!(session.node.progress.err_msg.starts_with("worker panicked"));
    assert_eq!(session.block.progress.status, SyncStatus::Success);
    assert_eq!(session.registry.progress.status, SyncStatus::Success);
}

#[tokio::test]
async fn test_error_loop_routes_reported_failures() {
    let mock = Arc::new(MockChainRpc::with_blocks(1, 0));
    mock.fail_at_height(1);
    let (_storage, manager) = create_test_manager(mock);
    let handles = manager.start();

    manager.trigger_sync("c1", false, false).await;
    sleep(Duration::from_millis(50)).await;

    let session = manager.get_sync_info("c1").unwrap();
    assert_eq!(session.status, SyncStatus::Error);
    assert!(session.err_msg.starts_with("blockOrTx"));

    for handle in handles {
        handle.abort();
    }
}

#[tokio::test]
async fn test_gc_removes_only_expired_successful_sessions() {
    let mock = Arc::new(MockChainRpc::with_blocks(0, 0));
    let (storage, manager) = create_test_manager(mock);
    storage.save_chain(&mock_chain("c2")).unwrap();

    manager.trigger_sync("c1", false, false).await;
    manager.trigger_sync("c2", false, false).await;
    let c1_done = manager.get_sync_info("c1").unwrap().estimate_complete_time;

    assert!(manager.collect_garbage(c1_done + 30_000).is_empty());

    let removed = manager.collect_garbage(now_millis() + 3 * 60 * 1000);
    assert_eq!(removed.len(), 2);
    assert!(manager.get_sync_info("c1").is_none());
    assert!(manager.sessions().is_empty());
}

#[tokio::test]
async fn test_unknown_chain_ends_in_error() {
    let mock = Arc::new(MockChainRpc::new());
    let (_storage, manager) = create_test_manager(mock);

    assert!(manager.trigger_sync("ghost", false, false).await);
    let session = manager.get_sync_info("ghost").unwrap();
    assert_eq!(session.status, SyncStatus::Error);
    assert!(session.err_msg.contains("not found"));
}
