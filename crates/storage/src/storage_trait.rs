use chainscope_types::{
    BlockHeight, Block, Chain, Contract, Node, RegistryEntry, SubscriptionRecord,
    TimestampMillis, Transaction,
};

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("record not found")]
    NotFound,
    #[error("duplicate key: {0}")]
    DuplicateKey(String),
    #[error("serialization failed")]
    SerializationFailed,
    #[error("deserialization failed")]
    DeserializationFailed,
    #[error("lock poisoned")]
    LockPoisoned,
    #[error("database error: {0}")]
    DatabaseError(String),
}

/// Collection-per-entity persistence gateway.
///
/// `insert_*` fails with [`StorageError::DuplicateKey`] when a row with the same
/// natural key exists. `upsert_*` overwrites by natural key and keeps the id of
/// the row already stored.
pub trait Storage: Send + Sync {
    fn save_chain(&self, chain: &Chain) -> Result<(), StorageError>;
    fn get_chain(&self, chain_id: &str) -> Result<Option<Chain>, StorageError>;
    fn list_chains(&self) -> Result<Vec<Chain>, StorageError>;

    fn find_node(&self, chain_id: &str, name: &str) -> Result<Option<Node>, StorageError>;
    fn upsert_node(&self, node: &Node) -> Result<(), StorageError>;
    fn list_nodes(&self, chain_id: &str, limit: Option<usize>) -> Result<Vec<Node>, StorageError>;
    fn count_nodes(&self, chain_id: &str) -> Result<u64, StorageError>;

    fn find_block(&self, chain_id: &str, hash: &str) -> Result<Option<Block>, StorageError>;
    fn insert_block(&self, block: &Block) -> Result<(), StorageError>;
    fn upsert_block(&self, block: &Block) -> Result<(), StorageError>;
    fn count_blocks(&self, chain_id: &str) -> Result<u64, StorageError>;
    /// Highest persisted block height of a chain.
    fn latest_block_height(&self, chain_id: &str) -> Result<Option<BlockHeight>, StorageError>;

    fn find_transaction(&self, chain_id: &str, hash: &str) -> Result<Option<Transaction>, StorageError>;
    fn insert_transaction(&self, tx: &Transaction) -> Result<(), StorageError>;
    fn upsert_transaction(&self, tx: &Transaction) -> Result<(), StorageError>;
    fn count_transactions(&self, chain_id: &str) -> Result<u64, StorageError>;

    fn find_contract(
        &self,
        chain_id: &str,
        tx_hash: &str,
        address: &str,
    ) -> Result<Option<Contract>, StorageError>;
    fn insert_contract(&self, contract: &Contract) -> Result<(), StorageError>;
    fn upsert_contract(&self, contract: &Contract) -> Result<(), StorageError>;
    fn count_contracts(&self, chain_id: &str) -> Result<u64, StorageError>;

    fn find_registry_entry(
        &self,
        chain_id: &str,
        name: &str,
        address: &str,
        version: &str,
    ) -> Result<Option<RegistryEntry>, StorageError>;
    fn insert_registry_entry(&self, entry: &RegistryEntry) -> Result<(), StorageError>;
    fn upsert_registry_entry(&self, entry: &RegistryEntry) -> Result<(), StorageError>;
    fn list_registry_entries(&self, chain_id: &str) -> Result<Vec<RegistryEntry>, StorageError>;

    fn insert_subscription(&self, record: &SubscriptionRecord) -> Result<(), StorageError>;
    fn get_subscription(&self, id: &str) -> Result<Option<SubscriptionRecord>, StorageError>;
    fn find_subscription_by_hash(&self, hash: &str) -> Result<Option<SubscriptionRecord>, StorageError>;
    /// Records the remote hash on the subscription matching `id` and `topic`.
    /// Returns `false` when no such subscription exists.
    fn set_subscription_hash(
        &self,
        id: &str,
        topic: &str,
        hash: &str,
        update_time: TimestampMillis,
    ) -> Result<bool, StorageError>;

    fn flush(&self) -> Result<(), StorageError>;
}
