pub mod system_contracts {
    pub const NODE_MANAGEMENT_ADDRESS: &str = "0x1000000000000000000000000000000000000002";
    pub const NAME_REGISTRY_ADDRESS: &str = "0x0000000000000000000000000000000000000011";

    pub const GET_ALL_NODES: &str = "getAllNodes";
    pub const GET_REGISTERED_CONTRACTS: &str = "getRegisteredContracts";
    pub const GET_CONTRACT_ADDRESS: &str = "getContractAddress";
}

pub mod node {
    pub const LOOPBACK_ALIASES: [&str; 2] = ["127.0.0.1", "localhost"];
    pub const EMPTY_OWNER: &str = "0x";
    pub const NO_OWNER: &str = "no owner";
}

pub mod topics {
    pub const NEW_HEADS: &str = "newHeads";
}

pub mod sync {
    /// GC tick of the sync session map.
    pub const GC_INTERVAL_SECONDS: u64 = 30 * 60;
    /// How long a finished session stays queryable past its completion estimate.
    pub const RETENTION_MILLIS: i64 = 2 * 60 * 1000;
}
