use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub bind_addr: String,
    /// RocksDB directory; unused by the in-memory backend.
    pub storage_path: PathBuf,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind_addr: std::env::var("API_BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string()),
            storage_path: std::env::var("STORAGE_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("./data")),
        }
    }
}
