use crate::config::SyncerConfig;
use crate::error::RpcError;
use async_trait::async_trait;
use chainscope_types::{
    new_record_id, node, system_contracts, Block, BlockHead, BlockHeight, Chain, Node, Receipt,
    RegistryEntry, Transaction,
};
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, error, warn};

/// Read access to a remote chain. Every call is bounded by the client's own
/// timeout.
#[async_trait]
pub trait ChainRpc: Send + Sync {
    async fn latest_block_number(&self, chain: &Chain) -> Result<BlockHeight, RpcError>;

    /// Block and its transactions. Transactions carry no receipt.
    async fn block_by_number(
        &self,
        chain: &Chain,
        height: BlockHeight,
    ) -> Result<(Block, Vec<Transaction>), RpcError>;

    async fn block_by_hash(
        &self,
        chain: &Chain,
        hash: &str,
    ) -> Result<(Block, Vec<Transaction>), RpcError>;

    async fn header_by_number(&self, chain: &Chain, height: BlockHeight) -> Result<BlockHead, RpcError>;

    async fn header_by_hash(&self, chain: &Chain, hash: &str) -> Result<BlockHead, RpcError>;

    async fn transaction_receipt(&self, chain: &Chain, tx_hash: &str) -> Result<Receipt, RpcError>;

    async fn generic_call(
        &self,
        chain: &Chain,
        contract: &str,
        method: &str,
        args: Value,
    ) -> Result<Value, RpcError>;

    async fn block_number_at(&self, endpoint: &str) -> Result<BlockHeight, RpcError>;

    async fn ping(&self, endpoint: &str) -> bool {
        self.block_number_at(endpoint).await.is_ok()
    }

    async fn fetch_all_nodes(&self, chain: &Chain) -> Result<Vec<Node>, RpcError> {
        let result = self
            .generic_call(
                chain,
                system_contracts::NODE_MANAGEMENT_ADDRESS,
                system_contracts::GET_ALL_NODES,
                serde_json::json!([]),
            )
            .await?;
        parse_nodes(&chain.id, &result)
    }

    /// Registered contracts, each confirmed against `getContractAddress` and
    /// deduplicated by name. Later entries win.
    async fn fetch_registry_entries(&self, chain: &Chain) -> Result<Vec<RegistryEntry>, RpcError> {
        let result = self
            .generic_call(
                chain,
                system_contracts::NAME_REGISTRY_ADDRESS,
                system_contracts::GET_REGISTERED_CONTRACTS,
                serde_json::json!(["", "", "", "(0,0)"]),
            )
            .await?;

        let mut entries: Vec<RegistryEntry> = Vec::new();
        let mut by_name: HashMap<String, usize> = HashMap::new();

        for item in data_array(&result)? {
            let name = str_field(item, "name")?;
            let version = str_field(item, "version")?;
            let address = str_field(item, "address")?;
            if name.is_empty() || version.is_empty() {
                return Err(RpcError::InvalidResponse(
                    "registry entry without name or version".to_string(),
                ));
            }

            let confirmed = self
                .generic_call(
                    chain,
                    system_contracts::NAME_REGISTRY_ADDRESS,
                    system_contracts::GET_CONTRACT_ADDRESS,
                    serde_json::json!([name, version]),
                )
                .await?;
            if !same_address(&address, &confirmed) {
                debug!(chain_id = %chain.id, name = %name, "registry address mismatch, skipping");
                continue;
            }

            let entry = RegistryEntry {
                id: new_record_id(),
                chain_id: chain.id.clone(),
                name: name.clone(),
                version,
                address,
            };
            match by_name.get(&name) {
                Some(&pos) => entries[pos] = entry,
                None => {
                    by_name.insert(name, entries.len());
                    entries.push(entry);
                }
            }
        }

        Ok(entries)
    }
}

pub struct JsonRpcClient {
    client: reqwest::Client,
    max_retries: u32,
    retry_delay_seconds: u64,
}

impl JsonRpcClient {
    pub fn new(config: &SyncerConfig) -> Result<Self, RpcError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.rpc_timeout_seconds))
            .build()?;

        Ok(Self {
            client,
            max_retries: config.rpc_max_retries,
            retry_delay_seconds: config.rpc_retry_delay_seconds,
        })
    }

    /// Returns the `result` member of the response.
    pub async fn call(&self, endpoint: &str, method: &str, params: Value) -> Result<Value, RpcError> {
        let payload = serde_json::json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
            "id": 1
        });

        let mut last_error = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = Duration::from_secs(self.retry_delay_seconds * attempt as u64);
                warn!(
                    method,
                    endpoint,
                    attempt,
                    max_retries = self.max_retries,
                    error = %last_error.as_ref().map(|e: &RpcError| e.to_string()).unwrap_or_default(),
                    "rpc call failed, retrying in {}s",
                    delay.as_secs()
                );
                sleep(delay).await;
            }

            match self.try_call(endpoint, &payload).await {
                Ok(result) => {
                    if attempt > 0 {
                        debug!(method, "rpc call succeeded after {} retries", attempt);
                    }
                    return Ok(result);
                }
                // the remote answered; asking again will not change the answer
                Err(e @ RpcError::Remote { .. }) => return Err(e),
                Err(e) => {
                    last_error = Some(e);
                    if attempt == self.max_retries {
                        error!(method, endpoint, "rpc call failed after {} retries", self.max_retries);
                    }
                }
            }
        }

        Err(last_error.unwrap_or_else(|| RpcError::InvalidResponse("rpc call failed".to_string())))
    }

    async fn try_call(&self, endpoint: &str, payload: &Value) -> Result<Value, RpcError> {
        let response: Value = self
            .client
            .post(endpoint)
            .json(payload)
            .send()
            .await?
            .json()
            .await?;

        if let Some(error) = response.get("error") {
            let message = error
                .get("message")
                .and_then(|v| v.as_str())
                .unwrap_or("Unknown RPC error")
                .to_string();
            let code = error.get("code").and_then(|v| v.as_i64()).unwrap_or(-1);

            if code == -32005 || code == 429 {
                return Err(RpcError::RateLimited(message));
            }

            return Err(RpcError::Remote { code, message });
        }

        response
            .get("result")
            .cloned()
            .ok_or_else(|| RpcError::InvalidResponse("missing result".to_string()))
    }

    async fn fetch_block(
        &self,
        chain: &Chain,
        method: &str,
        reference: Value,
    ) -> Result<(Block, Vec<Transaction>), RpcError> {
        let label = reference.to_string();
        let raw = self
            .call(&chain.rpc_endpoint(), method, serde_json::json!([reference, true]))
            .await?;
        if raw.is_null() {
            return Err(RpcError::NotFound(format!("block {}", label)));
        }
        parse_block(&chain.id, &raw)
    }

    async fn fetch_header(&self, chain: &Chain, method: &str, reference: Value) -> Result<BlockHead, RpcError> {
        let label = reference.to_string();
        let raw = self
            .call(&chain.rpc_endpoint(), method, serde_json::json!([reference, false]))
            .await?;
        if raw.is_null() {
            return Err(RpcError::NotFound(format!("header {}", label)));
        }
        parse_header(&raw)
    }
}

#[async_trait]
impl ChainRpc for JsonRpcClient {
    async fn latest_block_number(&self, chain: &Chain) -> Result<BlockHeight, RpcError> {
        self.block_number_at(&chain.rpc_endpoint()).await
    }

    async fn block_by_number(
        &self,
        chain: &Chain,
        height: BlockHeight,
    ) -> Result<(Block, Vec<Transaction>), RpcError> {
        self.fetch_block(chain, "eth_getBlockByNumber", Value::String(format!("0x{:x}", height)))
            .await
    }

    async fn block_by_hash(
        &self,
        chain: &Chain,
        hash: &str,
    ) -> Result<(Block, Vec<Transaction>), RpcError> {
        self.fetch_block(chain, "eth_getBlockByHash", Value::String(hash.to_string()))
            .await
    }

    async fn header_by_number(&self, chain: &Chain, height: BlockHeight) -> Result<BlockHead, RpcError> {
        self.fetch_header(chain, "eth_getBlockByNumber", Value::String(format!("0x{:x}", height)))
            .await
    }

    async fn header_by_hash(&self, chain: &Chain, hash: &str) -> Result<BlockHead, RpcError> {
        self.fetch_header(chain, "eth_getBlockByHash", Value::String(hash.to_string()))
            .await
    }

    async fn transaction_receipt(&self, chain: &Chain, tx_hash: &str) -> Result<Receipt, RpcError> {
        let raw = self
            .call(
                &chain.rpc_endpoint(),
                "eth_getTransactionReceipt",
                serde_json::json!([tx_hash]),
            )
            .await?;
        if raw.is_null() {
            return Err(RpcError::NotFound(format!("receipt {}", tx_hash)));
        }
        parse_receipt(&raw)
    }

    async fn generic_call(
        &self,
        chain: &Chain,
        contract: &str,
        method: &str,
        args: Value,
    ) -> Result<Value, RpcError> {
        let request = serde_json::json!({ "method": method, "params": args });
        let data = format!("0x{}", hex::encode(request.to_string()));
        let raw = self
            .call(
                &chain.rpc_endpoint(),
                "eth_call",
                serde_json::json!([{ "to": contract, "data": data }, "latest"]),
            )
            .await?;
        let encoded = raw
            .as_str()
            .ok_or_else(|| RpcError::InvalidResponse("eth_call result is not a string".to_string()))?;
        decode_call_result(encoded)
    }

    async fn block_number_at(&self, endpoint: &str) -> Result<BlockHeight, RpcError> {
        let raw = self.call(endpoint, "eth_blockNumber", serde_json::json!([])).await?;
        let hex_str = raw
            .as_str()
            .ok_or_else(|| RpcError::InvalidResponse("block number is not a string".to_string()))?;
        parse_hex_u64(hex_str)
    }
}

pub(crate) fn parse_hex_u64(value: &str) -> Result<u64, RpcError> {
    let digits = value.trim_start_matches("0x");
    if digits.is_empty() {
        return Ok(0);
    }
    u64::from_str_radix(digits, 16)
        .map_err(|e| RpcError::InvalidResponse(format!("bad quantity {}: {}", value, e)))
}

fn hex_field(raw: &Value, field: &str) -> Result<u64, RpcError> {
    let value = raw
        .get(field)
        .and_then(|v| v.as_str())
        .ok_or_else(|| RpcError::InvalidResponse(format!("missing field {}", field)))?;
    parse_hex_u64(value)
}

fn opt_hex_field(raw: &Value, field: &str) -> Result<u64, RpcError> {
    match raw.get(field).and_then(|v| v.as_str()) {
        Some(value) => parse_hex_u64(value),
        None => Ok(0),
    }
}

fn str_field(raw: &Value, field: &str) -> Result<String, RpcError> {
    raw.get(field)
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .ok_or_else(|| RpcError::InvalidResponse(format!("missing field {}", field)))
}

fn opt_str_field(raw: &Value, field: &str) -> String {
    raw.get(field)
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string()
}

fn int_field(raw: &Value, field: &str) -> i64 {
    match raw.get(field) {
        Some(Value::Number(n)) => n.as_i64().unwrap_or_default(),
        Some(Value::String(s)) => s.parse().unwrap_or_default(),
        _ => 0,
    }
}

fn port_field(raw: &Value, field: &str) -> Result<u16, RpcError> {
    let value = int_field(raw, field);
    u16::try_from(value)
        .map_err(|_| RpcError::InvalidResponse(format!("{} out of range: {}", field, value)))
}

fn data_array(result: &Value) -> Result<&Vec<Value>, RpcError> {
    result
        .get("data")
        .and_then(|v| v.as_array())
        .ok_or_else(|| RpcError::InvalidResponse("call result has no data array".to_string()))
}

/// Decodes the hex payload of a system contract call into a JSON document.
pub fn decode_call_result(encoded: &str) -> Result<Value, RpcError> {
    let bytes = hex::decode(encoded.trim_start_matches("0x"))
        .map_err(|e| RpcError::InvalidResponse(format!("bad hex in call result: {}", e)))?;
    if bytes.is_empty() {
        return Err(RpcError::InvalidResponse("empty call result".to_string()));
    }
    let text = String::from_utf8(bytes)
        .map_err(|e| RpcError::InvalidResponse(format!("call result is not utf-8: {}", e)))?;
    let trimmed = text.trim_end_matches(|c: char| c == '\0' || c == ' ');
    serde_json::from_str(trimmed)
        .map_err(|e| RpcError::InvalidResponse(format!("call result is not json: {}", e)))
}

fn same_address(expected: &str, confirmed: &Value) -> bool {
    let confirmed = confirmed
        .as_str()
        .or_else(|| confirmed.get("data").and_then(|v| v.as_str()))
        .unwrap_or_default()
        .trim_matches(|c: char| c == ' ' || c == '\0');
    !confirmed.is_empty() && confirmed.eq_ignore_ascii_case(expected)
}

pub fn parse_nodes(chain_id: &str, result: &Value) -> Result<Vec<Node>, RpcError> {
    data_array(result)?
        .iter()
        .map(|item| {
            let mut owner = opt_str_field(item, "owner");
            if owner == node::EMPTY_OWNER {
                owner = node::NO_OWNER.to_string();
            }
            Ok(Node {
                id: new_record_id(),
                chain_id: chain_id.to_string(),
                name: str_field(item, "name")?,
                public_key: opt_str_field(item, "publicKey"),
                desc: opt_str_field(item, "desc"),
                internal_ip: opt_str_field(item, "internalIP"),
                external_ip: str_field(item, "externalIP")?,
                rpc_port: port_field(item, "rpcPort")?,
                p2p_port: port_field(item, "p2pPort")?,
                node_type: int_field(item, "type"),
                status: int_field(item, "status"),
                owner,
            })
        })
        .collect()
}

pub fn parse_header(raw: &Value) -> Result<BlockHead, RpcError> {
    Ok(BlockHead {
        hash: str_field(raw, "hash")?,
        parent_hash: str_field(raw, "parentHash")?,
        miner: opt_str_field(raw, "miner"),
        state_root: opt_str_field(raw, "stateRoot"),
        transactions_root: opt_str_field(raw, "transactionsRoot"),
        receipts_root: opt_str_field(raw, "receiptsRoot"),
        logs_bloom: opt_str_field(raw, "logsBloom"),
        height: hex_field(raw, "number")?,
        gas_limit: opt_hex_field(raw, "gasLimit")?,
        gas_used: opt_hex_field(raw, "gasUsed")?,
        timestamp: hex_field(raw, "timestamp")? as i64,
        extra_data: opt_str_field(raw, "extraData"),
        mix_hash: opt_str_field(raw, "mixHash"),
        nonce: opt_hex_field(raw, "nonce")?,
    })
}

pub fn parse_block(chain_id: &str, raw: &Value) -> Result<(Block, Vec<Transaction>), RpcError> {
    let head = parse_header(raw)?;
    let block = Block {
        id: new_record_id(),
        chain_id: chain_id.to_string(),
        hash: head.hash.clone(),
        height: head.height,
        timestamp: head.timestamp,
        tx_amount: 0,
        proposer: head.miner.clone(),
        gas_used: head.gas_used,
        gas_limit: head.gas_limit,
        parent_hash: head.parent_hash.clone(),
        extra_data: head.extra_data.clone(),
        size: opt_hex_field(raw, "size")?,
        head: None,
    };

    let txs = raw
        .get("transactions")
        .and_then(|v| v.as_array())
        .map(|list| {
            list.iter()
                .map(|tx| parse_transaction(&block, tx))
                .collect::<Result<Vec<_>, _>>()
        })
        .transpose()?
        .unwrap_or_default();

    let block = Block {
        tx_amount: txs.len() as u64,
        ..block
    };
    Ok((block, txs))
}

fn parse_transaction(block: &Block, raw: &Value) -> Result<Transaction, RpcError> {
    Ok(Transaction {
        id: new_record_id(),
        chain_id: block.chain_id.clone(),
        block_id: block.id.clone(),
        hash: str_field(raw, "hash")?,
        height: block.height,
        timestamp: block.timestamp,
        from: opt_str_field(raw, "from"),
        to: opt_str_field(raw, "to"),
        gas_limit: opt_hex_field(raw, "gas")?,
        gas_price: opt_hex_field(raw, "gasPrice")?,
        nonce: opt_hex_field(raw, "nonce")?,
        input: opt_str_field(raw, "input"),
        value: opt_str_field(raw, "value"),
        receipt: None,
    })
}

pub fn parse_receipt(raw: &Value) -> Result<Receipt, RpcError> {
    let event = match raw.get("logs") {
        Some(Value::Array(logs)) if !logs.is_empty() => Value::Array(logs.clone()).to_string(),
        _ => String::new(),
    };
    Ok(Receipt {
        contract_address: opt_str_field(raw, "contractAddress"),
        status: opt_hex_field(raw, "status")?,
        event,
        gas_used: opt_hex_field(raw, "gasUsed")?,
    })
}
