use anyhow::Context;
use chainscope_api::{create_router, ApiConfig, ApiState};
use chainscope_hub::{default_topics, EventHub, HubConfig, MessageDispatcher, WsSubscriber};
use chainscope_storage::Storage;
#[cfg(not(feature = "rocksdb"))]
use chainscope_storage::InMemoryStorage;
#[cfg(feature = "rocksdb")]
use chainscope_storage::RocksDBStorage;
use chainscope_syncer::{JsonRpcClient, SyncManager, Syncer, SyncerConfig};
use futures::future::select_all;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info};

fn init_storage(config: &ApiConfig) -> anyhow::Result<Arc<dyn Storage>> {
    #[cfg(feature = "rocksdb")]
    {
        std::fs::create_dir_all(&config.storage_path)
            .with_context(|| format!("failed to create {}", config.storage_path.display()))?;

        info!(path = %config.storage_path.display(), "opening RocksDB storage");
        let storage = RocksDBStorage::open(&config.storage_path)
            .context("failed to open RocksDB storage")?;

        Ok(Arc::new(storage))
    }

    #[cfg(not(feature = "rocksdb"))]
    {
        let _ = config;
        info!("using in-memory storage (RocksDB not enabled)");
        Ok(Arc::new(InMemoryStorage::new()))
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = ApiConfig::default();
    let storage = init_storage(&config)?;

    let syncer_config = SyncerConfig::default();
    let rpc = Arc::new(JsonRpcClient::new(&syncer_config).context("failed to build RPC client")?);
    let syncer = Arc::new(Syncer::new(storage.clone(), rpc, syncer_config.clone()));
    let manager = Arc::new(SyncManager::new(syncer.clone(), storage.clone(), syncer_config));

    let hub_config = HubConfig::default();
    let hub = EventHub::new(hub_config.clone());
    let hub_handles = hub.start()?;

    let topics = Arc::new(default_topics(syncer.clone(), &hub_config.message_types));
    hub.set_handler(Arc::new(MessageDispatcher::new(
        storage.clone(),
        topics.clone(),
        hub_config.message_types.clone(),
    )));
    let subscriber = Arc::new(WsSubscriber::new(hub.clone(), storage.clone(), topics, hub_config));

    let sync_handles = manager.start();
    let _subscribe_handle = subscriber.start();

    let state = Arc::new(ApiState {
        storage,
        syncer,
        manager,
        hub,
        subscriber,
        local_addr: config.bind_addr.clone(),
    });
    let app = create_router(state);

    let listener = TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;
    info!(addr = %config.bind_addr, "chainscope API listening");

    let server_handle = tokio::spawn(async move { axum::serve(listener, app).await });

    tokio::select! {
        result = server_handle => {
            result??;
        }
        _ = select_all(sync_handles) => {
            error!("sync manager loop stopped unexpectedly");
        }
        _ = select_all(hub_handles) => {
            error!("event hub loop stopped unexpectedly");
        }
    }

    Ok(())
}
