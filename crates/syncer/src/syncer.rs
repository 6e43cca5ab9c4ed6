use crate::config::SyncerConfig;
use crate::error::{RpcError, SyncError};
use crate::rpc_client::ChainRpc;
use chainscope_storage::{Storage, StorageError};
use chainscope_types::{
    Block, BlockHeight, Chain, ChainStats, Contract, Node, NodeView, RegistryEntry, Transaction,
};
use std::sync::Arc;
use tracing::{debug, info, warn};

pub const DEFAULT_NODE_VIEW_LIMIT: usize = 10;

/// A concurrent writer that stored the same natural key first leaves nothing to do.
fn insert_if_absent(result: Result<(), StorageError>) -> Result<(), StorageError> {
    match result {
        Err(StorageError::DuplicateKey(key)) => {
            debug!(key = %key, "row stored concurrently");
            Ok(())
        }
        other => other,
    }
}

/// Fetch-and-persist routines for one chain item at a time.
///
/// Incremental mode inserts a row only when its natural key is unknown.
/// Full mode upserts. Nodes are always upserted.
pub struct Syncer {
    storage: Arc<dyn Storage>,
    rpc: Arc<dyn ChainRpc>,
    config: SyncerConfig,
}

impl Syncer {
    pub fn new(storage: Arc<dyn Storage>, rpc: Arc<dyn ChainRpc>, config: SyncerConfig) -> Self {
        Self { storage, rpc, config }
    }

    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.storage
    }

    pub fn rpc(&self) -> &Arc<dyn ChainRpc> {
        &self.rpc
    }

    pub fn chain(&self, chain_id: &str) -> Result<Chain, SyncError> {
        self.storage
            .get_chain(chain_id)?
            .ok_or_else(|| SyncError::ChainNotFound(chain_id.to_string()))
    }

    /// Persists a block and returns the stored row.
    pub fn save_block(&self, block: &Block, full: bool) -> Result<Block, SyncError> {
        if full {
            self.storage.upsert_block(block)?;
        } else if self.storage.find_block(&block.chain_id, &block.hash)?.is_none() {
            insert_if_absent(self.storage.insert_block(block))?;
        }

        self.storage
            .find_block(&block.chain_id, &block.hash)?
            .ok_or_else(|| SyncError::BlockMissing {
                chain_id: block.chain_id.clone(),
                hash: block.hash.clone(),
            })
    }

    /// Persists a transaction and, for a contract creation, the contract it deployed.
    pub fn save_transaction(&self, tx: &Transaction, full: bool) -> Result<(), SyncError> {
        if full {
            self.storage.upsert_transaction(tx)?;
        } else if self.storage.find_transaction(&tx.chain_id, &tx.hash)?.is_none() {
            insert_if_absent(self.storage.insert_transaction(tx))?;
        }

        if tx.is_contract_creation() {
            self.save_contract(&tx.to_contract(), full)?;
        }
        Ok(())
    }

    pub fn save_contract(&self, contract: &Contract, full: bool) -> Result<(), SyncError> {
        if full {
            self.storage.upsert_contract(contract)?;
        } else if self
            .storage
            .find_contract(&contract.chain_id, &contract.tx_hash, &contract.address)?
            .is_none()
        {
            insert_if_absent(self.storage.insert_contract(contract))?;
        }
        Ok(())
    }

    pub fn save_registry_entry(&self, entry: &RegistryEntry, full: bool) -> Result<(), SyncError> {
        if full {
            self.storage.upsert_registry_entry(entry)?;
        } else if self
            .storage
            .find_registry_entry(&entry.chain_id, &entry.name, &entry.address, &entry.version)?
            .is_none()
        {
            insert_if_absent(self.storage.insert_registry_entry(entry))?;
        }
        Ok(())
    }

    /// Upserts a node. A loopback external address is replaced by the chain's own IP.
    pub fn save_node(&self, chain: &Chain, node: &Node) -> Result<(), SyncError> {
        let mut node = node.clone();
        if node.has_loopback_ip() {
            node.external_ip = chain.ip.clone();
        }
        self.storage.upsert_node(&node)?;
        Ok(())
    }

    async fn attach_receipts(
        &self,
        chain: &Chain,
        block: &Block,
        txs: Vec<Transaction>,
    ) -> Result<Vec<Transaction>, SyncError> {
        let mut with_receipts = Vec::with_capacity(txs.len());
        for mut tx in txs {
            let timeout = self.config.receipt_timeout();
            let receipt = tokio::time::timeout(timeout, self.rpc.transaction_receipt(chain, &tx.hash))
                .await
                .map_err(|_| RpcError::Timeout(timeout))??;
            tx.block_id = block.id.clone();
            tx.receipt = Some(receipt);
            with_receipts.push(tx);
        }
        Ok(with_receipts)
    }

    async fn persist_fetched(
        &self,
        chain: &Chain,
        block: Block,
        txs: Vec<Transaction>,
        full: bool,
    ) -> Result<(Block, Vec<Transaction>), SyncError> {
        let stored = self.save_block(&block, full)?;
        let txs = self.attach_receipts(chain, &stored, txs).await?;
        for tx in &txs {
            self.save_transaction(tx, full)?;
        }
        Ok((stored, txs))
    }

    /// Fetches one block with its transactions and receipts and persists all of them.
    pub async fn sync_block_by_number(
        &self,
        chain: &Chain,
        height: BlockHeight,
        full: bool,
    ) -> Result<(Block, Vec<Transaction>), SyncError> {
        let (block, txs) = self.rpc.block_by_number(chain, height).await?;
        let head = self.rpc.header_by_number(chain, height).await?;
        let block = Block {
            head: Some(head),
            ..block
        };
        self.persist_fetched(chain, block, txs, full).await
    }

    pub async fn block_full_sync(&self, chain_id: &str) -> Result<BlockHeight, SyncError> {
        let chain = self.chain(chain_id)?;
        let latest = self.rpc.latest_block_number(&chain).await?;
        for height in 0..=latest {
            self.sync_block_by_number(&chain, height, true).await?;
        }
        info!(chain_id, latest, "block full sync finished");
        Ok(latest)
    }

    /// Persists heights `from + 1 ..= to`.
    pub async fn block_incr_sync(
        &self,
        chain_id: &str,
        from: BlockHeight,
        to: BlockHeight,
    ) -> Result<u64, SyncError> {
        let chain = self.chain(chain_id)?;
        let mut synced = 0;
        for height in from.saturating_add(1)..=to {
            self.sync_block_by_number(&chain, height, false).await?;
            synced += 1;
        }
        debug!(chain_id, from, to, synced, "block incremental sync finished");
        Ok(synced)
    }

    pub async fn fetch_nodes(&self, chain: &Chain) -> Result<Vec<Node>, SyncError> {
        Ok(self.rpc.fetch_all_nodes(chain).await?)
    }

    pub async fn fetch_registry(&self, chain: &Chain) -> Result<Vec<RegistryEntry>, SyncError> {
        Ok(self.rpc.fetch_registry_entries(chain).await?)
    }

    pub async fn sync_nodes(&self, chain_id: &str) -> Result<usize, SyncError> {
        let chain = self.chain(chain_id)?;
        let nodes = self.fetch_nodes(&chain).await?;
        for node in &nodes {
            self.save_node(&chain, node)?;
        }
        Ok(nodes.len())
    }

    pub async fn sync_registry(&self, chain_id: &str, full: bool) -> Result<usize, SyncError> {
        let chain = self.chain(chain_id)?;
        let entries = self.fetch_registry(&chain).await?;
        for entry in &entries {
            self.save_registry_entry(entry, full)?;
        }
        Ok(entries.len())
    }

    /// Pulls the block announced by a push notification and stores it incrementally.
    pub async fn persist_pushed_block(
        &self,
        chain_id: &str,
        hash: &str,
    ) -> Result<(Block, Vec<Transaction>), SyncError> {
        let chain = self.chain(chain_id)?;
        let head = self.rpc.header_by_hash(&chain, hash).await?;
        let (block, txs) = self.rpc.block_by_hash(&chain, hash).await?;
        let block = Block {
            head: Some(head),
            ..block
        };
        self.persist_fetched(&chain, block, txs, false).await
    }

    pub fn chain_stats(&self, chain_id: &str) -> Result<ChainStats, SyncError> {
        Ok(ChainStats {
            latest_height: self.storage.latest_block_height(chain_id)?.unwrap_or(0),
            total_tx: self.storage.count_transactions(chain_id)?,
            total_contract: self.storage.count_contracts(chain_id)?,
            total_node: self.storage.count_nodes(chain_id)?,
        })
    }

    /// Persisted nodes, each probed for its current height.
    pub async fn node_views(&self, chain_id: &str, limit: usize) -> Result<Vec<NodeView>, SyncError> {
        let nodes = self.storage.list_nodes(chain_id, Some(limit))?;
        let probes = nodes.iter().map(|node| {
            let endpoint = node.rpc_endpoint();
            async move { self.rpc.block_number_at(&endpoint).await }
        });
        let heights = futures::future::join_all(probes).await;

        Ok(nodes
            .into_iter()
            .zip(heights)
            .map(|(node, height)| {
                let height = match height {
                    Ok(height) => Some(height),
                    Err(e) => {
                        warn!(chain_id, node = %node.name, error = %e, "node probe failed");
                        None
                    }
                };
                NodeView::from_node(node, height)
            })
            .collect())
    }
}
