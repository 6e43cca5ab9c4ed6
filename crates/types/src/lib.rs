mod constants;

pub use constants::*;

pub type RecordId = String;
pub type ChainId = String;
pub type BlockHeight = u64;
pub type TimestampMillis = i64;

pub fn new_record_id() -> RecordId {
    uuid::Uuid::new_v4().simple().to_string()
}

pub fn now_millis() -> TimestampMillis {
    chrono::Utc::now().timestamp_millis()
}

/// A named push-notification stream a chain's websocket endpoint can be subscribed to.
/// `params` is the JSON request template sent to the remote endpoint.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct TopicConfig {
    pub name: String,
    pub params: String,
}

impl TopicConfig {
    pub fn new_heads() -> Self {
        Self {
            name: topics::NEW_HEADS.to_string(),
            params: r#"{"jsonrpc":"2.0","id":"subscription","method":"eth_subscribe","params":["newHeads"]}"#
                .to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Chain {
    pub id: ChainId,
    pub name: String,
    pub ip: String,
    pub rpc_port: u16,
    pub p2p_port: u16,
    pub ws_port: u16,
    pub desc: String,
    pub ws_topics: Vec<TopicConfig>,
    pub create_time: TimestampMillis,
}

impl Chain {
    pub fn rpc_endpoint(&self) -> String {
        format!("http://{}:{}", self.ip, self.rpc_port)
    }

    pub fn ws_endpoint(&self) -> String {
        format!("ws://{}:{}", self.ip, self.ws_port)
    }

    /// Two chains clash when they share a name, or a host with any port in common.
    pub fn conflicts_with(&self, other: &Chain) -> bool {
        if self.name == other.name {
            return true;
        }
        self.ip == other.ip
            && (self.rpc_port == other.rpc_port
                || self.p2p_port == other.p2p_port
                || self.ws_port == other.ws_port)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Node {
    pub id: RecordId,
    pub chain_id: ChainId,
    pub name: String,
    pub public_key: String,
    pub desc: String,
    pub internal_ip: String,
    pub external_ip: String,
    pub rpc_port: u16,
    pub p2p_port: u16,
    pub node_type: i64,
    pub status: i64,
    pub owner: String,
}

impl Node {
    pub fn rpc_endpoint(&self) -> String {
        format!("http://{}:{}", self.external_ip, self.rpc_port)
    }

    pub fn has_loopback_ip(&self) -> bool {
        node::LOOPBACK_ALIASES.contains(&self.external_ip.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct NodeView {
    pub id: RecordId,
    pub chain_id: ChainId,
    pub name: String,
    pub public_key: String,
    pub desc: String,
    pub internal_ip: String,
    pub external_ip: String,
    pub rpc_port: u16,
    pub p2p_port: u16,
    pub node_type: i64,
    pub status: i64,
    pub owner: String,
    pub block_number: u64,
    pub is_alive: bool,
}

impl NodeView {
    pub fn from_node(node: Node, block_number: Option<u64>) -> Self {
        Self {
            id: node.id,
            chain_id: node.chain_id,
            name: node.name,
            public_key: node.public_key,
            desc: node.desc,
            internal_ip: node.internal_ip,
            external_ip: node.external_ip,
            rpc_port: node.rpc_port,
            p2p_port: node.p2p_port,
            node_type: node.node_type,
            status: node.status,
            owner: node.owner,
            block_number: block_number.unwrap_or(0),
            is_alive: block_number.is_some(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct BlockHead {
    pub hash: String,
    pub parent_hash: String,
    pub miner: String,
    pub state_root: String,
    pub transactions_root: String,
    pub receipts_root: String,
    pub logs_bloom: String,
    pub height: BlockHeight,
    pub gas_limit: u64,
    pub gas_used: u64,
    pub timestamp: i64,
    pub extra_data: String,
    pub mix_hash: String,
    pub nonce: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Block {
    pub id: RecordId,
    pub chain_id: ChainId,
    pub hash: String,
    pub height: BlockHeight,
    pub timestamp: i64,
    pub tx_amount: u64,
    pub proposer: String,
    pub gas_used: u64,
    pub gas_limit: u64,
    pub parent_hash: String,
    pub extra_data: String,
    pub size: u64,
    pub head: Option<BlockHead>,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Receipt {
    pub contract_address: String,
    pub status: u64,
    pub event: String,
    pub gas_used: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Transaction {
    pub id: RecordId,
    pub chain_id: ChainId,
    pub block_id: RecordId,
    pub hash: String,
    pub height: BlockHeight,
    pub timestamp: i64,
    pub from: String,
    pub to: String,
    pub gas_limit: u64,
    pub gas_price: u64,
    pub nonce: u64,
    pub input: String,
    pub value: String,
    pub receipt: Option<Receipt>,
}

impl Transaction {
    /// A transaction without a destination deploys a contract.
    pub fn is_contract_creation(&self) -> bool {
        self.to.is_empty()
    }

    pub fn to_contract(&self) -> Contract {
        Contract {
            id: new_record_id(),
            chain_id: self.chain_id.clone(),
            address: self
                .receipt
                .as_ref()
                .map(|r| r.contract_address.clone())
                .unwrap_or_default(),
            creator: self.from.clone(),
            tx_hash: self.hash.clone(),
            content: self.input.clone(),
            timestamp: self.timestamp,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Contract {
    pub id: RecordId,
    pub chain_id: ChainId,
    pub address: String,
    pub creator: String,
    pub tx_hash: String,
    pub content: String,
    pub timestamp: i64,
}

/// A name-registry mapping of a contract name and version to its address.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct RegistryEntry {
    pub id: RecordId,
    pub chain_id: ChainId,
    pub name: String,
    pub version: String,
    pub address: String,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct SubscriptionRecord {
    pub id: RecordId,
    pub chain_id: ChainId,
    pub kind: String,
    pub topic: String,
    pub message: String,
    pub hash: Option<String>,
    pub create_time: TimestampMillis,
    pub update_time: TimestampMillis,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ChainStats {
    pub latest_height: BlockHeight,
    pub total_tx: u64,
    pub total_contract: u64,
    pub total_node: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dummy_tx(to: &str) -> Transaction {
        Transaction {
            id: new_record_id(),
            chain_id: "c1".to_string(),
            block_id: "b1".to_string(),
            hash: "0xabc".to_string(),
            height: 7,
            timestamp: 1_700_000_000_000,
            from: "0xfrom".to_string(),
            to: to.to_string(),
            gas_limit: 21000,
            gas_price: 1,
            nonce: 0,
            input: "0x6060".to_string(),
            value: "0".to_string(),
            receipt: Some(Receipt {
                contract_address: "0xcontract".to_string(),
                status: 1,
                event: String::new(),
                gas_used: 21000,
            }),
        }
    }

    #[test]
    fn test_empty_destination_is_contract_creation() {
        assert!(dummy_tx("").is_contract_creation());
        assert!(!dummy_tx("0xdead").is_contract_creation());
    }

    #[test]
    fn test_to_contract_takes_address_from_receipt() {
        let contract = dummy_tx("").to_contract();
        assert_eq!(contract.address, "0xcontract");
        assert_eq!(contract.tx_hash, "0xabc");
        assert_eq!(contract.creator, "0xfrom");
        assert_eq!(contract.content, "0x6060");
    }

    #[test]
    fn test_node_view_marks_unreachable_node_dead() {
        let node = Node {
            id: new_record_id(),
            chain_id: "c1".to_string(),
            name: "n0".to_string(),
            public_key: String::new(),
            desc: String::new(),
            internal_ip: "10.0.0.1".to_string(),
            external_ip: "localhost".to_string(),
            rpc_port: 6791,
            p2p_port: 16791,
            node_type: 1,
            status: 1,
            owner: node::NO_OWNER.to_string(),
        };
        assert!(node.has_loopback_ip());

        let view = NodeView::from_node(node, None);
        assert!(!view.is_alive);
        assert_eq!(view.block_number, 0);
    }

    fn chain(name: &str, ip: &str, rpc_port: u16, p2p_port: u16, ws_port: u16) -> Chain {
        Chain {
            id: new_record_id(),
            name: name.to_string(),
            ip: ip.to_string(),
            rpc_port,
            p2p_port,
            ws_port,
            desc: String::new(),
            ws_topics: vec![TopicConfig::new_heads()],
            create_time: 0,
        }
    }

    #[test]
    fn test_chain_conflicts() {
        let base = chain("alpha", "10.0.0.1", 6791, 16791, 6790);

        assert!(base.conflicts_with(&chain("alpha", "10.0.0.9", 1, 2, 3)));
        assert!(base.conflicts_with(&chain("beta", "10.0.0.1", 1, 16791, 3)));
        assert!(!base.conflicts_with(&chain("beta", "10.0.0.1", 1, 2, 3)));
        assert!(!base.conflicts_with(&chain("beta", "10.0.0.2", 6791, 16791, 6790)));
    }
}
