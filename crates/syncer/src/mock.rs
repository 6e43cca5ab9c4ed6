//! Scripted in-process chain for tests.

use crate::error::RpcError;
use crate::rpc_client::ChainRpc;
use async_trait::async_trait;
use chainscope_types::{
    new_record_id, Block, BlockHead, BlockHeight, Chain, Node, Receipt, RegistryEntry, Transaction,
};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

pub fn mock_block_hash(height: BlockHeight) -> String {
    format!("0x{:064x}", height)
}

pub fn mock_chain(id: &str) -> Chain {
    Chain {
        id: id.to_string(),
        name: format!("chain-{}", id),
        ip: "10.1.1.1".to_string(),
        rpc_port: 6791,
        p2p_port: 16791,
        ws_port: 6790,
        desc: String::new(),
        ws_topics: vec![chainscope_types::TopicConfig::new_heads()],
        create_time: 0,
    }
}

pub fn mock_node(chain_id: &str, name: &str, external_ip: &str) -> Node {
    Node {
        id: new_record_id(),
        chain_id: chain_id.to_string(),
        name: name.to_string(),
        public_key: format!("pk-{}", name),
        desc: String::new(),
        internal_ip: "192.168.0.1".to_string(),
        external_ip: external_ip.to_string(),
        rpc_port: 6791,
        p2p_port: 16791,
        node_type: 1,
        status: 1,
        owner: "0xowner".to_string(),
    }
}

#[derive(Clone)]
struct MockBlock {
    head: BlockHead,
    txs: Vec<(Transaction, Receipt)>,
}

#[derive(Default)]
struct MockState {
    blocks: BTreeMap<BlockHeight, MockBlock>,
    nodes: Vec<Node>,
    registry: Vec<RegistryEntry>,
    calls: HashMap<String, Value>,
    failing_heights: HashSet<BlockHeight>,
    alive: HashMap<String, BlockHeight>,
    fetched_heights: Vec<BlockHeight>,
}

/// A chain whose blocks, nodes and registry entries are set up by the test.
/// Block fetches are counted.
#[derive(Default)]
pub struct MockChainRpc {
    state: Mutex<MockState>,
    block_fetches: AtomicUsize,
    panic_on_nodes: AtomicBool,
    block_delay_ms: AtomicUsize,
}

impl MockChainRpc {
    pub fn new() -> Self {
        Self::default()
    }

    /// A chain with blocks `0..=tip`, each holding `txs_per_block` plain transfers.
    pub fn with_blocks(tip: BlockHeight, txs_per_block: usize) -> Self {
        let mock = Self::new();
        for _ in 0..=tip {
            mock.push_block(txs_per_block);
        }
        mock
    }

    fn state(&self) -> std::sync::MutexGuard<'_, MockState> {
        self.state.lock().unwrap()
    }

    /// Appends a block with `tx_count` transfers and returns its hash.
    pub fn push_block(&self, tx_count: usize) -> String {
        self.push_block_with(tx_count, false)
    }

    /// Appends a block whose single transaction deploys a contract.
    pub fn push_contract_block(&self) -> String {
        self.push_block_with(1, true)
    }

    fn push_block_with(&self, tx_count: usize, deploy: bool) -> String {
        let mut state = self.state();
        let height = state.blocks.keys().next_back().map_or(0, |h| h + 1);
        let hash = mock_block_hash(height);
        let head = BlockHead {
            hash: hash.clone(),
            parent_hash: if height == 0 {
                String::new()
            } else {
                mock_block_hash(height - 1)
            },
            miner: "0xminer".to_string(),
            state_root: String::new(),
            transactions_root: String::new(),
            receipts_root: String::new(),
            logs_bloom: String::new(),
            height,
            gas_limit: 8_000_000,
            gas_used: 21_000 * tx_count as u64,
            timestamp: 1_700_000_000 + height as i64,
            extra_data: String::new(),
            mix_hash: String::new(),
            nonce: 0,
        };

        let txs = (0..tx_count)
            .map(|i| {
                let tx_hash = format!("0xtx{}-{}", height, i);
                let tx = Transaction {
                    id: new_record_id(),
                    chain_id: String::new(),
                    block_id: String::new(),
                    hash: tx_hash.clone(),
                    height,
                    timestamp: head.timestamp,
                    from: "0xsender".to_string(),
                    to: if deploy { String::new() } else { "0xrecipient".to_string() },
                    gas_limit: 21_000,
                    gas_price: 1,
                    nonce: i as u64,
                    input: if deploy { "0x6060".to_string() } else { String::new() },
                    value: "0x1".to_string(),
                    receipt: None,
                };
                let receipt = Receipt {
                    contract_address: if deploy {
                        format!("0xcontract{}", height)
                    } else {
                        String::new()
                    },
                    status: 1,
                    event: String::new(),
                    gas_used: 21_000,
                };
                (tx, receipt)
            })
            .collect();

        state.blocks.insert(height, MockBlock { head, txs });
        hash
    }

    pub fn set_nodes(&self, nodes: Vec<Node>) {
        self.state().nodes = nodes;
    }

    pub fn set_registry(&self, entries: Vec<RegistryEntry>) {
        self.state().registry = entries;
    }

    pub fn set_call_result(&self, method: &str, result: Value) {
        self.state().calls.insert(method.to_string(), result);
    }

    pub fn fail_at_height(&self, height: BlockHeight) {
        self.state().failing_heights.insert(height);
    }

    pub fn clear_failures(&self) {
        self.state().failing_heights.clear();
    }

    pub fn set_alive(&self, endpoint: &str, height: BlockHeight) {
        self.state().alive.insert(endpoint.to_string(), height);
    }

    pub fn panic_on_node_fetch(&self, enabled: bool) {
        self.panic_on_nodes.store(enabled, Ordering::SeqCst);
    }

    pub fn set_block_delay(&self, delay: Duration) {
        self.block_delay_ms.store(delay.as_millis() as usize, Ordering::SeqCst);
    }

    pub fn block_fetches(&self) -> usize {
        self.block_fetches.load(Ordering::SeqCst)
    }

    pub fn fetched_heights(&self) -> Vec<BlockHeight> {
        self.state().fetched_heights.clone()
    }

    fn materialize(chain: &Chain, mock: &MockBlock) -> (Block, Vec<Transaction>) {
        let block = Block {
            id: new_record_id(),
            chain_id: chain.id.clone(),
            hash: mock.head.hash.clone(),
            height: mock.head.height,
            timestamp: mock.head.timestamp,
            tx_amount: mock.txs.len() as u64,
            proposer: mock.head.miner.clone(),
            gas_used: mock.head.gas_used,
            gas_limit: mock.head.gas_limit,
            parent_hash: mock.head.parent_hash.clone(),
            extra_data: mock.head.extra_data.clone(),
            size: 512,
            head: None,
        };
        let txs = mock
            .txs
            .iter()
            .map(|(tx, _)| Transaction {
                chain_id: chain.id.clone(),
                block_id: block.id.clone(),
                ..tx.clone()
            })
            .collect();
        (block, txs)
    }

    async fn fetch(&self, chain: &Chain, height: Option<BlockHeight>, hash: Option<&str>) -> Result<(Block, Vec<Transaction>), RpcError> {
        let delay = self.block_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay as u64)).await;
        }
        self.block_fetches.fetch_add(1, Ordering::SeqCst);

        let mut state = self.state();
        let found = state
            .blocks
            .values()
            .find(|b| Some(b.head.height) == height || Some(b.head.hash.as_str()) == hash)
            .cloned();
        let mock = found.ok_or_else(|| RpcError::NotFound(format!("{:?} {:?}", height, hash)))?;
        if state.failing_heights.contains(&mock.head.height) {
            return Err(RpcError::InvalidResponse(format!(
                "scripted failure at height {}",
                mock.head.height
            )));
        }
        state.fetched_heights.push(mock.head.height);
        Ok(Self::materialize(chain, &mock))
    }

    fn head(&self, height: Option<BlockHeight>, hash: Option<&str>) -> Result<BlockHead, RpcError> {
        self.state()
            .blocks
            .values()
            .find(|b| Some(b.head.height) == height || Some(b.head.hash.as_str()) == hash)
            .map(|b| b.head.clone())
            .ok_or_else(|| RpcError::NotFound(format!("header {:?} {:?}", height, hash)))
    }
}

#[async_trait]
impl ChainRpc for MockChainRpc {
    async fn latest_block_number(&self, _chain: &Chain) -> Result<BlockHeight, RpcError> {
        Ok(self.state().blocks.keys().next_back().copied().unwrap_or(0))
    }

    async fn block_by_number(
        &self,
        chain: &Chain,
        height: BlockHeight,
    ) -> Result<(Block, Vec<Transaction>), RpcError> {
        self.fetch(chain, Some(height), None).await
    }

    async fn block_by_hash(
        &self,
        chain: &Chain,
        hash: &str,
    ) -> Result<(Block, Vec<Transaction>), RpcError> {
        self.fetch(chain, None, Some(hash)).await
    }

    async fn header_by_number(&self, _chain: &Chain, height: BlockHeight) -> Result<BlockHead, RpcError> {
        self.head(Some(height), None)
    }

    async fn header_by_hash(&self, _chain: &Chain, hash: &str) -> Result<BlockHead, RpcError> {
        self.head(None, Some(hash))
    }

    async fn transaction_receipt(&self, _chain: &Chain, tx_hash: &str) -> Result<Receipt, RpcError> {
        self.state()
            .blocks
            .values()
            .flat_map(|b| b.txs.iter())
            .find(|(tx, _)| tx.hash == tx_hash)
            .map(|(_, receipt)| receipt.clone())
            .ok_or_else(|| RpcError::NotFound(format!("receipt {}", tx_hash)))
    }

    async fn generic_call(
        &self,
        _chain: &Chain,
        _contract: &str,
        method: &str,
        _args: Value,
    ) -> Result<Value, RpcError> {
        self.state()
            .calls
            .get(method)
            .cloned()
            .ok_or_else(|| RpcError::NotFound(format!("no scripted result for {}", method)))
    }

    async fn block_number_at(&self, endpoint: &str) -> Result<BlockHeight, RpcError> {
        self.state()
            .alive
            .get(endpoint)
            .copied()
            .ok_or(RpcError::Timeout(Duration::from_secs(5)))
    }

    async fn fetch_all_nodes(&self, chain: &Chain) -> Result<Vec<Node>, RpcError> {
        if self.panic_on_nodes.load(Ordering::SeqCst) {
            panic!("scripted panic while fetching nodes");
        }
        Ok(self
            .state()
            .nodes
            .iter()
            .map(|n| Node {
                chain_id: chain.id.clone(),
                ..n.clone()
            })
            .collect())
    }

    async fn fetch_registry_entries(&self, chain: &Chain) -> Result<Vec<RegistryEntry>, RpcError> {
        Ok(self
            .state()
            .registry
            .iter()
            .map(|e| RegistryEntry {
                chain_id: chain.id.clone(),
                ..e.clone()
            })
            .collect())
    }
}
