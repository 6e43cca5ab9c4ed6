// Syncer persistence policies against an in-memory store and a scripted chain

use chainscope_storage::{InMemoryStorage, Storage};
use chainscope_syncer::mock::{mock_block_hash, mock_chain, mock_node, MockChainRpc};
use chainscope_syncer::{SyncError, Syncer, SyncerConfig};
use chainscope_types::{new_record_id, Block, RegistryEntry};
use std::sync::{Arc, Barrier};
use std::thread;

fn create_test_syncer(mock: Arc<MockChainRpc>) -> (Arc<InMemoryStorage>, Syncer) {
    let storage = Arc::new(InMemoryStorage::new());
    storage.save_chain(&mock_chain("c1")).unwrap();
    let syncer = Syncer::new(storage.clone(), mock, SyncerConfig::default());
    (storage, syncer)
}

fn registry_entry(name: &str, version: &str, address: &str) -> RegistryEntry {
    RegistryEntry {
        id: new_record_id(),
        chain_id: "c1".to_string(),
        name: name.to_string(),
        version: version.to_string(),
        address: address.to_string(),
    }
}

#[tokio::test]
async fn test_incremental_sync_persists_only_new_heights() {
    let mock = Arc::new(MockChainRpc::with_blocks(5, 2));
    let (storage, syncer) = create_test_syncer(mock.clone());

    let synced = syncer.block_incr_sync("c1", 2, 5).await.unwrap();
    assert_eq!(synced, 3);
    assert_eq!(mock.fetched_heights(), vec![3, 4, 5]);
    assert_eq!(storage.count_blocks("c1").unwrap(), 3);
    assert_eq!(storage.count_transactions("c1").unwrap(), 6);
    assert_eq!(storage.latest_block_height("c1").unwrap(), Some(5));
}

#[tokio::test]
async fn test_resync_inserts_no_duplicates() {
    let mock = Arc::new(MockChainRpc::with_blocks(3, 1));
    let (storage, syncer) = create_test_syncer(mock.clone());

    syncer.block_incr_sync("c1", 0, 3).await.unwrap();
    let first = storage.find_block("c1", &mock_block_hash(2)).unwrap().unwrap();

    syncer.block_incr_sync("c1", 0, 3).await.unwrap();
    let second = storage.find_block("c1", &mock_block_hash(2)).unwrap().unwrap();

    assert_eq!(storage.count_blocks("c1").unwrap(), 3);
    assert_eq!(storage.count_transactions("c1").unwrap(), 3);
    assert_eq!(first.id, second.id);
}

#[tokio::test]
async fn test_transactions_reference_persisted_block() {
    let mock = Arc::new(MockChainRpc::with_blocks(1, 2));
    let (storage, syncer) = create_test_syncer(mock);
    let chain = syncer.chain("c1").unwrap();

    let (block, txs) = syncer.sync_block_by_number(&chain, 1, false).await.unwrap();
    assert!(block.head.is_some());
    assert_eq!(txs.len(), 2);

    let stored = storage.find_transaction("c1", &txs[0].hash).unwrap().unwrap();
    assert_eq!(stored.block_id, block.id);
    assert!(stored.receipt.is_some());
}

#[tokio::test]
async fn test_contract_creation_derives_contract() {
    let mock = Arc::new(MockChainRpc::new());
    mock.push_block(0);
    mock.push_contract_block();
    let (storage, syncer) = create_test_syncer(mock);

    syncer.block_full_sync("c1").await.unwrap();

    assert_eq!(storage.count_contracts("c1").unwrap(), 1);
    let contract = storage
        .find_contract("c1", "0xtx1-0", "0xcontract1")
        .unwrap()
        .unwrap();
    assert_eq!(contract.creator, "0xsender");
    assert_eq!(contract.content, "0x6060");
}

#[tokio::test]
async fn test_node_sync_rewrites_loopback_and_overwrites() {
    let mock = Arc::new(MockChainRpc::new());
    mock.set_nodes(vec![
        mock_node("c1", "n0", "127.0.0.1"),
        mock_node("c1", "n1", "20.0.0.1"),
    ]);
    let (storage, syncer) = create_test_syncer(mock.clone());

    assert_eq!(syncer.sync_nodes("c1").await.unwrap(), 2);
    let n0 = storage.find_node("c1", "n0").unwrap().unwrap();
    assert_eq!(n0.external_ip, "10.1.1.1");

    // the node moved on-chain
    mock.set_nodes(vec![mock_node("c1", "n1", "30.0.0.1")]);
    syncer.sync_nodes("c1").await.unwrap();

    let n1 = storage.find_node("c1", "n1").unwrap().unwrap();
    assert_eq!(n1.external_ip, "30.0.0.1");
    assert_eq!(storage.count_nodes("c1").unwrap(), 2);
}

#[tokio::test]
async fn test_registry_policies() {
    let mock = Arc::new(MockChainRpc::new());
    mock.set_registry(vec![
        registry_entry("token", "1.0", "0xaaa"),
        registry_entry("vote", "1.0", "0xbbb"),
    ]);
    let (storage, syncer) = create_test_syncer(mock);

    assert_eq!(syncer.sync_registry("c1", false).await.unwrap(), 2);
    let first = storage
        .find_registry_entry("c1", "token", "0xaaa", "1.0")
        .unwrap()
        .unwrap();

    syncer.sync_registry("c1", true).await.unwrap();
    let again = storage
        .find_registry_entry("c1", "token", "0xaaa", "1.0")
        .unwrap()
        .unwrap();
    assert_eq!(first.id, again.id);
    assert_eq!(storage.list_registry_entries("c1").unwrap().len(), 2);
}

#[tokio::test]
async fn test_persist_pushed_block_by_hash() {
    let mock = Arc::new(MockChainRpc::with_blocks(2, 1));
    let (storage, syncer) = create_test_syncer(mock);

    let (block, txs) = syncer
        .persist_pushed_block("c1", &mock_block_hash(2))
        .await
        .unwrap();
    assert_eq!(block.height, 2);
    assert_eq!(txs.len(), 1);

    let stats = syncer.chain_stats("c1").unwrap();
    assert_eq!(stats.latest_height, 2);
    assert_eq!(stats.total_tx, 1);
    assert_eq!(storage.count_blocks("c1").unwrap(), 1);
}

#[tokio::test]
async fn test_node_views_mark_unreachable_nodes() {
    let mock = Arc::new(MockChainRpc::new());
    mock.set_nodes(vec![
        mock_node("c1", "n0", "20.0.0.1"),
        mock_node("c1", "n1", "20.0.0.2"),
    ]);
    mock.set_alive("http://20.0.0.1:6791", 42);
    let (_storage, syncer) = create_test_syncer(mock);
    syncer.sync_nodes("c1").await.unwrap();

    let views = syncer.node_views("c1", 10).await.unwrap();
    assert_eq!(views.len(), 2);
    let n0 = views.iter().find(|v| v.name == "n0").unwrap();
    let n1 = views.iter().find(|v| v.name == "n1").unwrap();
    assert!(n0.is_alive);
    assert_eq!(n0.block_number, 42);
    assert!(!n1.is_alive);
    assert_eq!(n1.block_number, 0);
}

#[tokio::test]
async fn test_unknown_chain_is_rejected() {
    let mock = Arc::new(MockChainRpc::new());
    let (_storage, syncer) = create_test_syncer(mock);

    let result = syncer.sync_nodes("missing").await;
    assert!(matches!(result, Err(SyncError::ChainNotFound(_))));
}

fn plain_block(hash: &str, height: u64) -> Block {
    Block {
        id: new_record_id(),
        chain_id: "c1".to_string(),
        hash: hash.to_string(),
        height,
        timestamp: 0,
        tx_amount: 0,
        proposer: String::new(),
        gas_used: 0,
        gas_limit: 0,
        parent_hash: String::new(),
        extra_data: String::new(),
        size: 0,
        head: None,
    }
}

#[test]
fn test_concurrent_incremental_saves_of_one_block() {
    const WRITERS: usize = 8;
    let (storage, syncer) = create_test_syncer(Arc::new(MockChainRpc::new()));
    let syncer = Arc::new(syncer);

    for round in 0..200u64 {
        let block = plain_block(&format!("0xh{}", round), round);
        let barrier = Arc::new(Barrier::new(WRITERS));
        let writers: Vec<_> = (0..WRITERS)
            .map(|_| {
                let syncer = syncer.clone();
                let barrier = barrier.clone();
                let block = block.clone();
                thread::spawn(move || {
                    barrier.wait();
                    syncer.save_block(&block, false)
                })
            })
            .collect();

        let stored: Vec<Block> = writers
            .into_iter()
            .map(|w| w.join().unwrap().unwrap())
            .collect();
        assert!(stored.iter().all(|b| b.id == stored[0].id));
    }

    assert_eq!(storage.count_blocks("c1").unwrap(), 200);
}
