use crate::storage_trait::{Storage, StorageError};
use chainscope_types::{
    Block, BlockHeight, Chain, ChainId, Contract, Node, RecordId, RegistryEntry,
    SubscriptionRecord, TimestampMillis, Transaction,
};
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

type NodeKey = (ChainId, String);
type BlockKey = (ChainId, String);
type TxKey = (ChainId, String);
type ContractKey = (ChainId, String, String);
type RegistryKey = (ChainId, String, String, String);

pub struct InMemoryStorage {
    chains: RwLock<HashMap<ChainId, Chain>>,
    nodes: RwLock<HashMap<NodeKey, Node>>,
    blocks: RwLock<HashMap<BlockKey, Block>>,
    transactions: RwLock<HashMap<TxKey, Transaction>>,
    contracts: RwLock<HashMap<ContractKey, Contract>>,
    registry: RwLock<HashMap<RegistryKey, RegistryEntry>>,
    subscriptions: RwLock<HashMap<RecordId, SubscriptionRecord>>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self {
            chains: RwLock::new(HashMap::new()),
            nodes: RwLock::new(HashMap::new()),
            blocks: RwLock::new(HashMap::new()),
            transactions: RwLock::new(HashMap::new()),
            contracts: RwLock::new(HashMap::new()),
            registry: RwLock::new(HashMap::new()),
            subscriptions: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

fn read<T>(lock: &RwLock<T>) -> Result<RwLockReadGuard<'_, T>, StorageError> {
    lock.read().map_err(|_| StorageError::LockPoisoned)
}

fn write<T>(lock: &RwLock<T>) -> Result<RwLockWriteGuard<'_, T>, StorageError> {
    lock.write().map_err(|_| StorageError::LockPoisoned)
}

fn insert_unique<K, V>(map: &mut HashMap<K, V>, key: K, value: V) -> Result<(), StorageError>
where
    K: Eq + Hash + std::fmt::Debug,
{
    if map.contains_key(&key) {
        return Err(StorageError::DuplicateKey(format!("{:?}", key)));
    }
    map.insert(key, value);
    Ok(())
}

impl Storage for InMemoryStorage {
    fn save_chain(&self, chain: &Chain) -> Result<(), StorageError> {
        write(&self.chains)?.insert(chain.id.clone(), chain.clone());
        Ok(())
    }

    fn get_chain(&self, chain_id: &str) -> Result<Option<Chain>, StorageError> {
        Ok(read(&self.chains)?.get(chain_id).cloned())
    }

    fn list_chains(&self) -> Result<Vec<Chain>, StorageError> {
        let mut chains: Vec<Chain> = read(&self.chains)?.values().cloned().collect();
        chains.sort_by_key(|c| c.create_time);
        Ok(chains)
    }

    fn find_node(&self, chain_id: &str, name: &str) -> Result<Option<Node>, StorageError> {
        let nodes = read(&self.nodes)?;
        Ok(nodes.get(&(chain_id.to_string(), name.to_string())).cloned())
    }

    fn upsert_node(&self, node: &Node) -> Result<(), StorageError> {
        let mut nodes = write(&self.nodes)?;
        let key = (node.chain_id.clone(), node.name.clone());
        let mut stored = node.clone();
        if let Some(existing) = nodes.get(&key) {
            stored.id = existing.id.clone();
        }
        nodes.insert(key, stored);
        Ok(())
    }

    fn list_nodes(&self, chain_id: &str, limit: Option<usize>) -> Result<Vec<Node>, StorageError> {
        let nodes = read(&self.nodes)?;
        let mut list: Vec<Node> = nodes
            .values()
            .filter(|n| n.chain_id == chain_id)
            .cloned()
            .collect();
        list.sort_by(|a, b| a.name.cmp(&b.name));
        if let Some(limit) = limit {
            list.truncate(limit);
        }
        Ok(list)
    }

    fn count_nodes(&self, chain_id: &str) -> Result<u64, StorageError> {
        let nodes = read(&self.nodes)?;
        Ok(nodes.keys().filter(|(c, _)| c == chain_id).count() as u64)
    }

    fn find_block(&self, chain_id: &str, hash: &str) -> Result<Option<Block>, StorageError> {
        let blocks = read(&self.blocks)?;
        Ok(blocks.get(&(chain_id.to_string(), hash.to_string())).cloned())
    }

    fn insert_block(&self, block: &Block) -> Result<(), StorageError> {
        let mut blocks = write(&self.blocks)?;
        insert_unique(
            &mut blocks,
            (block.chain_id.clone(), block.hash.clone()),
            block.clone(),
        )
    }

    fn upsert_block(&self, block: &Block) -> Result<(), StorageError> {
        let mut blocks = write(&self.blocks)?;
        let key = (block.chain_id.clone(), block.hash.clone());
        let mut stored = block.clone();
        if let Some(existing) = blocks.get(&key) {
            stored.id = existing.id.clone();
        }
        blocks.insert(key, stored);
        Ok(())
    }

    fn count_blocks(&self, chain_id: &str) -> Result<u64, StorageError> {
        let blocks = read(&self.blocks)?;
        Ok(blocks.keys().filter(|(c, _)| c == chain_id).count() as u64)
    }

    fn latest_block_height(&self, chain_id: &str) -> Result<Option<BlockHeight>, StorageError> {
        let blocks = read(&self.blocks)?;
        Ok(blocks
            .values()
            .filter(|b| b.chain_id == chain_id)
            .map(|b| b.height)
            .max())
    }

    fn find_transaction(&self, chain_id: &str, hash: &str) -> Result<Option<Transaction>, StorageError> {
        let txs = read(&self.transactions)?;
        Ok(txs.get(&(chain_id.to_string(), hash.to_string())).cloned())
    }

    fn insert_transaction(&self, tx: &Transaction) -> Result<(), StorageError> {
        let mut txs = write(&self.transactions)?;
        insert_unique(&mut txs, (tx.chain_id.clone(), tx.hash.clone()), tx.clone())
    }

    fn upsert_transaction(&self, tx: &Transaction) -> Result<(), StorageError> {
        let mut txs = write(&self.transactions)?;
        let key = (tx.chain_id.clone(), tx.hash.clone());
        let mut stored = tx.clone();
        if let Some(existing) = txs.get(&key) {
            stored.id = existing.id.clone();
        }
        txs.insert(key, stored);
        Ok(())
    }

    fn count_transactions(&self, chain_id: &str) -> Result<u64, StorageError> {
        let txs = read(&self.transactions)?;
        Ok(txs.keys().filter(|(c, _)| c == chain_id).count() as u64)
    }

    fn find_contract(
        &self,
        chain_id: &str,
        tx_hash: &str,
        address: &str,
    ) -> Result<Option<Contract>, StorageError> {
        let contracts = read(&self.contracts)?;
        let key = (chain_id.to_string(), tx_hash.to_string(), address.to_string());
        Ok(contracts.get(&key).cloned())
    }

    fn insert_contract(&self, contract: &Contract) -> Result<(), StorageError> {
        let mut contracts = write(&self.contracts)?;
        let key = (
            contract.chain_id.clone(),
            contract.tx_hash.clone(),
            contract.address.clone(),
        );
        insert_unique(&mut contracts, key, contract.clone())
    }

    fn upsert_contract(&self, contract: &Contract) -> Result<(), StorageError> {
        let mut contracts = write(&self.contracts)?;
        let key = (
            contract.chain_id.clone(),
            contract.tx_hash.clone(),
            contract.address.clone(),
        );
        let mut stored = contract.clone();
        if let Some(existing) = contracts.get(&key) {
            stored.id = existing.id.clone();
        }
        contracts.insert(key, stored);
        Ok(())
    }

    fn count_contracts(&self, chain_id: &str) -> Result<u64, StorageError> {
        let contracts = read(&self.contracts)?;
        Ok(contracts.keys().filter(|(c, _, _)| c == chain_id).count() as u64)
    }

    fn find_registry_entry(
        &self,
        chain_id: &str,
        name: &str,
        address: &str,
        version: &str,
    ) -> Result<Option<RegistryEntry>, StorageError> {
        let registry = read(&self.registry)?;
        let key = (
            chain_id.to_string(),
            name.to_string(),
            address.to_string(),
            version.to_string(),
        );
        Ok(registry.get(&key).cloned())
    }

    fn insert_registry_entry(&self, entry: &RegistryEntry) -> Result<(), StorageError> {
        let mut registry = write(&self.registry)?;
        let key = (
            entry.chain_id.clone(),
            entry.name.clone(),
            entry.address.clone(),
            entry.version.clone(),
        );
        insert_unique(&mut registry, key, entry.clone())
    }

    fn upsert_registry_entry(&self, entry: &RegistryEntry) -> Result<(), StorageError> {
        let mut registry = write(&self.registry)?;
        let key = (
            entry.chain_id.clone(),
            entry.name.clone(),
            entry.address.clone(),
            entry.version.clone(),
        );
        let mut stored = entry.clone();
        if let Some(existing) = registry.get(&key) {
            stored.id = existing.id.clone();
        }
        registry.insert(key, stored);
        Ok(())
    }

    fn list_registry_entries(&self, chain_id: &str) -> Result<Vec<RegistryEntry>, StorageError> {
        let registry = read(&self.registry)?;
        let mut list: Vec<RegistryEntry> = registry
            .values()
            .filter(|e| e.chain_id == chain_id)
            .cloned()
            .collect();
        list.sort_by(|a, b| (&a.name, &a.version).cmp(&(&b.name, &b.version)));
        Ok(list)
    }

    fn insert_subscription(&self, record: &SubscriptionRecord) -> Result<(), StorageError> {
        let mut subs = write(&self.subscriptions)?;
        insert_unique(&mut subs, record.id.clone(), record.clone())
    }

    fn get_subscription(&self, id: &str) -> Result<Option<SubscriptionRecord>, StorageError> {
        Ok(read(&self.subscriptions)?.get(id).cloned())
    }

    fn find_subscription_by_hash(&self, hash: &str) -> Result<Option<SubscriptionRecord>, StorageError> {
        let subs = read(&self.subscriptions)?;
        Ok(subs
            .values()
            .find(|r| r.hash.as_deref() == Some(hash))
            .cloned())
    }

    fn set_subscription_hash(
        &self,
        id: &str,
        topic: &str,
        hash: &str,
        update_time: TimestampMillis,
    ) -> Result<bool, StorageError> {
        let mut subs = write(&self.subscriptions)?;
        match subs.get_mut(id) {
            Some(record) if record.topic == topic => {
                record.hash = Some(hash.to_string());
                record.update_time = update_time;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn flush(&self) -> Result<(), StorageError> {
        Ok(())
    }
}
