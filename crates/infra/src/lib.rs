//! Infrastructure layer: storage backends, the Transaction Engine, config.

pub mod config;
pub mod engine;
pub mod store;

mod integration_tests;

pub use config::{AppConfig, ConfigError};
pub use engine::{EngineError, TransactionEngine};
pub use store::{InMemoryInventoryStore, InventoryStore, PostgresInventoryStore, StoreError, UnitOfWork};
