//! Store selection and engine wiring.

use std::sync::Arc;

use sampletrack_infra::{
    AppConfig, InMemoryInventoryStore, InventoryStore, PostgresInventoryStore, StoreError,
    TransactionEngine,
};

pub type SharedStore = Arc<dyn InventoryStore>;

pub struct AppServices {
    pub engine: TransactionEngine<SharedStore>,
}

impl AppServices {
    pub fn new(store: SharedStore) -> Self {
        Self {
            engine: TransactionEngine::new(store),
        }
    }
}

/// PostgreSQL when `DATABASE_URL` is configured, in-memory otherwise.
pub async fn build_services(config: &AppConfig) -> Result<AppServices, StoreError> {
    let store: SharedStore = match &config.database_url {
        Some(url) => {
            let store =
                PostgresInventoryStore::connect(url, config.db_max_connections, config.lock_timeout).await?;
            store.migrate().await?;
            tracing::info!("using postgres inventory store");
            Arc::new(store)
        }
        None => {
            tracing::warn!("DATABASE_URL not set; using in-memory inventory store");
            Arc::new(InMemoryInventoryStore::with_lock_timeout(config.lock_timeout))
        }
    };
    Ok(AppServices::new(store))
}
