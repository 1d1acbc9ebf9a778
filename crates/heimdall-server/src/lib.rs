pub mod config;
pub mod error;
pub mod policy;
pub mod push;
pub mod registry;
pub mod rest;
pub mod scheduler;
pub mod storage;

use std::sync::Arc;

use config::ServerConfig;
use policy::RulesCache;
use registry::ConnectionRegistry;
use storage::Storage;

/// Shared application state passed to every HTTP/WS handler and
/// background scheduler task.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServerConfig>,
    pub storage: Arc<Storage>,
    pub cache: Arc<RulesCache>,
    pub registry: Arc<ConnectionRegistry>,
    pub started_at: std::time::Instant,
}

impl AppState {
    pub async fn new(config: ServerConfig) -> anyhow::Result<Self> {
        let storage = Storage::new(&config.data_dir).await?;
        Ok(Self {
            config: Arc::new(config),
            storage: Arc::new(storage),
            cache: Arc::new(RulesCache::new()),
            registry: Arc::new(ConnectionRegistry::new()),
            started_at: std::time::Instant::now(),
        })
    }
}
