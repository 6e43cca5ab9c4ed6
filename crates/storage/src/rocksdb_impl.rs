use crate::storage_trait::{Storage, StorageError};
use chainscope_types::{
    Block, BlockHeight, Chain, Contract, Node, RegistryEntry, SubscriptionRecord, TimestampMillis,
    Transaction,
};
use rocksdb_rs::{ColumnFamily, ColumnFamilyDescriptor, Direction, IteratorMode, Options, DB};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::Path;
use std::sync::{Arc, Mutex};

const CF_CHAINS: &str = "chains";
const CF_NODES: &str = "nodes";
const CF_BLOCKS: &str = "blocks";
const CF_TRANSACTIONS: &str = "transactions";
const CF_CONTRACTS: &str = "contracts";
const CF_REGISTRY: &str = "registry_entries";
const CF_SUBSCRIPTIONS: &str = "subscriptions";
const CF_SUBSCRIPTION_HASHES: &str = "subscription_hashes";
const CF_METADATA: &str = "metadata";

const LATEST_HEIGHT_PREFIX: &str = "latest_height";

pub struct RocksDBStorage {
    db: Arc<DB>,
    // serializes read-modify-write of the per-chain latest height
    height_lock: Mutex<()>,
    // makes the exists check and the write of `insert_new` one step
    insert_lock: Mutex<()>,
}

/// Natural keys are the key parts joined and terminated by NUL, so that the
/// encoding of `[chain_id]` is a prefix of every key belonging to that chain.
fn encode_key(parts: &[&str]) -> Vec<u8> {
    let mut key = Vec::new();
    for part in parts {
        key.extend_from_slice(part.as_bytes());
        key.push(0);
    }
    key
}

fn db_err(e: rocksdb_rs::Error) -> StorageError {
    StorageError::DatabaseError(e.to_string())
}

impl RocksDBStorage {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let cfs = [
            CF_CHAINS,
            CF_NODES,
            CF_BLOCKS,
            CF_TRANSACTIONS,
            CF_CONTRACTS,
            CF_REGISTRY,
            CF_SUBSCRIPTIONS,
            CF_SUBSCRIPTION_HASHES,
            CF_METADATA,
        ]
        .into_iter()
        .map(|name| ColumnFamilyDescriptor::new(name, Options::default()));

        let db = DB::open_cf_descriptors(&opts, path, cfs).map_err(db_err)?;

        Ok(Self {
            db: Arc::new(db),
            height_lock: Mutex::new(()),
            insert_lock: Mutex::new(()),
        })
    }

    fn cf(&self, name: &str) -> Result<&ColumnFamily, StorageError> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| StorageError::DatabaseError(format!("{} not found", name)))
    }

    fn put<T: Serialize>(&self, cf_name: &str, key: &[u8], value: &T) -> Result<(), StorageError> {
        let cf = self.cf(cf_name)?;
        let bytes = bincode::serialize(value).map_err(|_| StorageError::SerializationFailed)?;
        self.db.put_cf(cf, key, bytes).map_err(db_err)
    }

    fn get<T: DeserializeOwned>(&self, cf_name: &str, key: &[u8]) -> Result<Option<T>, StorageError> {
        let cf = self.cf(cf_name)?;
        match self.db.get_cf(cf, key).map_err(db_err)? {
            Some(bytes) => {
                let value =
                    bincode::deserialize(&bytes[..]).map_err(|_| StorageError::DeserializationFailed)?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    fn exists(&self, cf_name: &str, key: &[u8]) -> Result<bool, StorageError> {
        let cf = self.cf(cf_name)?;
        Ok(self.db.get_pinned_cf(cf, key).map_err(db_err)?.is_some())
    }

    fn scan_prefix<T: DeserializeOwned>(
        &self,
        cf_name: &str,
        prefix: &[u8],
        limit: Option<usize>,
    ) -> Result<Vec<T>, StorageError> {
        let cf = self.cf(cf_name)?;
        let mut items = Vec::new();
        let iter = self
            .db
            .iterator_cf(cf, IteratorMode::From(prefix, Direction::Forward));

        for item in iter {
            if limit.map_or(false, |l| items.len() >= l) {
                break;
            }
            let (key, value) = item.map_err(db_err)?;
            if !key.starts_with(prefix) {
                break;
            }
            let decoded =
                bincode::deserialize(&value[..]).map_err(|_| StorageError::DeserializationFailed)?;
            items.push(decoded);
        }

        Ok(items)
    }

    fn count_prefix(&self, cf_name: &str, prefix: &[u8]) -> Result<u64, StorageError> {
        let cf = self.cf(cf_name)?;
        let mut count = 0;
        let iter = self
            .db
            .iterator_cf(cf, IteratorMode::From(prefix, Direction::Forward));

        for item in iter {
            let (key, _) = item.map_err(db_err)?;
            if !key.starts_with(prefix) {
                break;
            }
            count += 1;
        }

        Ok(count)
    }

    fn insert_new<T: Serialize>(&self, cf_name: &str, key: &[u8], value: &T) -> Result<(), StorageError> {
        let _guard = self.insert_lock.lock().map_err(|_| StorageError::LockPoisoned)?;
        if self.exists(cf_name, key)? {
            return Err(StorageError::DuplicateKey(
                String::from_utf8_lossy(key).replace('\0', "/"),
            ));
        }
        self.put(cf_name, key, value)
    }

    fn bump_latest_height(&self, chain_id: &str, height: BlockHeight) -> Result<(), StorageError> {
        let _guard = self.height_lock.lock().map_err(|_| StorageError::LockPoisoned)?;
        let key = encode_key(&[LATEST_HEIGHT_PREFIX, chain_id]);
        let current: Option<BlockHeight> = self.get(CF_METADATA, &key)?;
        if current.map_or(true, |h| height > h) {
            self.put(CF_METADATA, &key, &height)?;
        }
        Ok(())
    }
}

impl Storage for RocksDBStorage {
    fn save_chain(&self, chain: &Chain) -> Result<(), StorageError> {
        self.put(CF_CHAINS, &encode_key(&[chain.id.as_str()]), chain)
    }

    fn get_chain(&self, chain_id: &str) -> Result<Option<Chain>, StorageError> {
        self.get(CF_CHAINS, &encode_key(&[chain_id]))
    }

    fn list_chains(&self) -> Result<Vec<Chain>, StorageError> {
        let mut chains: Vec<Chain> = self.scan_prefix(CF_CHAINS, &[], None)?;
        chains.sort_by_key(|c| c.create_time);
        Ok(chains)
    }

    fn find_node(&self, chain_id: &str, name: &str) -> Result<Option<Node>, StorageError> {
        self.get(CF_NODES, &encode_key(&[chain_id, name]))
    }

    fn upsert_node(&self, node: &Node) -> Result<(), StorageError> {
        let key = encode_key(&[node.chain_id.as_str(), node.name.as_str()]);
        let mut stored = node.clone();
        if let Some(existing) = self.get::<Node>(CF_NODES, &key)? {
            stored.id = existing.id;
        }
        self.put(CF_NODES, &key, &stored)
    }

    fn list_nodes(&self, chain_id: &str, limit: Option<usize>) -> Result<Vec<Node>, StorageError> {
        self.scan_prefix(CF_NODES, &encode_key(&[chain_id]), limit)
    }

    fn count_nodes(&self, chain_id: &str) -> Result<u64, StorageError> {
        self.count_prefix(CF_NODES, &encode_key(&[chain_id]))
    }

    fn find_block(&self, chain_id: &str, hash: &str) -> Result<Option<Block>, StorageError> {
        self.get(CF_BLOCKS, &encode_key(&[chain_id, hash]))
    }

    fn insert_block(&self, block: &Block) -> Result<(), StorageError> {
        self.insert_new(CF_BLOCKS, &encode_key(&[block.chain_id.as_str(), block.hash.as_str()]), block)?;
        self.bump_latest_height(&block.chain_id, block.height)
    }

    fn upsert_block(&self, block: &Block) -> Result<(), StorageError> {
        let key = encode_key(&[block.chain_id.as_str(), block.hash.as_str()]);
        let mut stored = block.clone();
        if let Some(existing) = self.get::<Block>(CF_BLOCKS, &key)? {
            stored.id = existing.id;
        }
        self.put(CF_BLOCKS, &key, &stored)?;
        self.bump_latest_height(&block.chain_id, block.height)
    }

    fn count_blocks(&self, chain_id: &str) -> Result<u64, StorageError> {
        self.count_prefix(CF_BLOCKS, &encode_key(&[chain_id]))
    }

    fn latest_block_height(&self, chain_id: &str) -> Result<Option<BlockHeight>, StorageError> {
        self.get(CF_METADATA, &encode_key(&[LATEST_HEIGHT_PREFIX, chain_id]))
    }

    fn find_transaction(&self, chain_id: &str, hash: &str) -> Result<Option<Transaction>, StorageError> {
        self.get(CF_TRANSACTIONS, &encode_key(&[chain_id, hash]))
    }

    fn insert_transaction(&self, tx: &Transaction) -> Result<(), StorageError> {
        self.insert_new(CF_TRANSACTIONS, &encode_key(&[tx.chain_id.as_str(), tx.hash.as_str()]), tx)
    }

    fn upsert_transaction(&self, tx: &Transaction) -> Result<(), StorageError> {
        let key = encode_key(&[tx.chain_id.as_str(), tx.hash.as_str()]);
        let mut stored = tx.clone();
        if let Some(existing) = self.get::<Transaction>(CF_TRANSACTIONS, &key)? {
            stored.id = existing.id;
        }
        self.put(CF_TRANSACTIONS, &key, &stored)
    }

    fn count_transactions(&self, chain_id: &str) -> Result<u64, StorageError> {
        self.count_prefix(CF_TRANSACTIONS, &encode_key(&[chain_id]))
    }

    fn find_contract(
        &self,
        chain_id: &str,
        tx_hash: &str,
        address: &str,
    ) -> Result<Option<Contract>, StorageError> {
        self.get(CF_CONTRACTS, &encode_key(&[chain_id, tx_hash, address]))
    }

    fn insert_contract(&self, contract: &Contract) -> Result<(), StorageError> {
        let key = encode_key(&[contract.chain_id.as_str(), contract.tx_hash.as_str(), contract.address.as_str()]);
        self.insert_new(CF_CONTRACTS, &key, contract)
    }

    fn upsert_contract(&self, contract: &Contract) -> Result<(), StorageError> {
        let key = encode_key(&[contract.chain_id.as_str(), contract.tx_hash.as_str(), contract.address.as_str()]);
        let mut stored = contract.clone();
        if let Some(existing) = self.get::<Contract>(CF_CONTRACTS, &key)? {
            stored.id = existing.id;
        }
        self.put(CF_CONTRACTS, &key, &stored)
    }

    fn count_contracts(&self, chain_id: &str) -> Result<u64, StorageError> {
        self.count_prefix(CF_CONTRACTS, &encode_key(&[chain_id]))
    }

    fn find_registry_entry(
        &self,
        chain_id: &str,
        name: &str,
        address: &str,
        version: &str,
    ) -> Result<Option<RegistryEntry>, StorageError> {
        self.get(CF_REGISTRY, &encode_key(&[chain_id, name, address, version]))
    }

    fn insert_registry_entry(&self, entry: &RegistryEntry) -> Result<(), StorageError> {
        let key = encode_key(&[entry.chain_id.as_str(), entry.name.as_str(), entry.address.as_str(), entry.version.as_str()]);
        self.insert_new(CF_REGISTRY, &key, entry)
    }

    fn upsert_registry_entry(&self, entry: &RegistryEntry) -> Result<(), StorageError> {
        let key = encode_key(&[entry.chain_id.as_str(), entry.name.as_str(), entry.address.as_str(), entry.version.as_str()]);
        let mut stored = entry.clone();
        if let Some(existing) = self.get::<RegistryEntry>(CF_REGISTRY, &key)? {
            stored.id = existing.id;
        }
        self.put(CF_REGISTRY, &key, &stored)
    }

    fn list_registry_entries(&self, chain_id: &str) -> Result<Vec<RegistryEntry>, StorageError> {
        self.scan_prefix(CF_REGISTRY, &encode_key(&[chain_id]), None)
    }

    fn insert_subscription(&self, record: &SubscriptionRecord) -> Result<(), StorageError> {
        self.insert_new(CF_SUBSCRIPTIONS, &encode_key(&[record.id.as_str()]), record)
    }

    fn get_subscription(&self, id: &str) -> Result<Option<SubscriptionRecord>, StorageError> {
        self.get(CF_SUBSCRIPTIONS, &encode_key(&[id]))
    }

    fn find_subscription_by_hash(&self, hash: &str) -> Result<Option<SubscriptionRecord>, StorageError> {
        let id: Option<String> = self.get(CF_SUBSCRIPTION_HASHES, &encode_key(&[hash]))?;
        match id {
            Some(id) => self.get_subscription(&id),
            None => Ok(None),
        }
    }

    fn set_subscription_hash(
        &self,
        id: &str,
        topic: &str,
        hash: &str,
        update_time: TimestampMillis,
    ) -> Result<bool, StorageError> {
        let key = encode_key(&[id]);
        let mut record: SubscriptionRecord = match self.get(CF_SUBSCRIPTIONS, &key)? {
            Some(record) => record,
            None => return Ok(false),
        };
        if record.topic != topic {
            return Ok(false);
        }

        record.hash = Some(hash.to_string());
        record.update_time = update_time;
        self.put(CF_SUBSCRIPTIONS, &key, &record)?;
        self.put(CF_SUBSCRIPTION_HASHES, &encode_key(&[hash]), &record.id)?;
        Ok(true)
    }

    fn flush(&self) -> Result<(), StorageError> {
        self.db.flush().map_err(db_err)
    }
}
