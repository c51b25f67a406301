//! Storage boundary for the Unit Registry, the Aggregate Inventory Ledger,
//! transactions and the Audit Log.
//!
//! All writes go through a [`UnitOfWork`]: an explicit transactional scope
//! that pessimistically locks the rows it reads, buffers writes, and makes
//! them visible together on [`UnitOfWork::commit`]. Dropping a unit of work
//! without committing discards everything it wrote.
//!
//! ## Lock order
//!
//! A unit of work locks unit rows first (sorted by unit id), then sample
//! rows (sorted by key), each group in a single call. Every writer follows
//! this order, so two units of work can wait on each other but never
//! deadlock. Batches over disjoint units of different samples share no rows
//! and never wait on each other.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use sampletrack_core::{DetailId, TransactionId};
use sampletrack_inventory::{
    AuditFilter, AuditPage, NewAuditEntry, NewDetail, NewTransaction, Pagination, Sample,
    SampleKey, Transaction, TransactionDetail, Unit, UnitId,
};

pub mod in_memory;
pub mod postgres;

pub use in_memory::InMemoryInventoryStore;
pub use postgres::PostgresInventoryStore;

/// Storage operation error.
///
/// These are infrastructure failures, as opposed to the domain errors the
/// engine raises from business rules.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A row lock could not be acquired in time.
    #[error("timed out waiting for lock on {0}")]
    LockTimeout(String),

    /// The backend aborted the transaction to keep it serializable (deadlock,
    /// serialization failure). Safe to retry.
    #[error("serialization failure: {0}")]
    Serialization(String),

    /// A unique key already exists (e.g. a concurrently registered unit).
    #[error("duplicate key: {0}")]
    Duplicate(String),

    /// A stored row cannot be turned back into a domain value.
    #[error("corrupt row: {0}")]
    Corrupt(String),

    /// Anything else the backend reports.
    #[error("storage backend error: {0}")]
    Backend(String),
}

/// Transactional scope for one engine operation.
#[async_trait]
pub trait UnitOfWork: Send {
    /// Lock and load registry rows. Ids without a row are absent from the
    /// result and may hold no lock; a concurrent insert of the same id fails
    /// on the primary key as `Duplicate`.
    async fn lock_units(&mut self, ids: &[UnitId]) -> Result<Vec<Unit>, StoreError>;

    /// Lock and load sample rows. Keys without a row are absent from the result.
    async fn lock_samples(&mut self, keys: &[SampleKey]) -> Result<Vec<Sample>, StoreError>;

    /// Lock and load a sample row, creating an empty one if it does not exist.
    async fn lock_or_create_sample(&mut self, key: &SampleKey) -> Result<Sample, StoreError>;

    /// Every open detail of the given (already locked) units, in one lookup.
    async fn open_details(&mut self, ids: &[UnitId]) -> Result<Vec<TransactionDetail>, StoreError>;

    async fn insert_transaction(&mut self, header: &NewTransaction) -> Result<TransactionId, StoreError>;

    async fn insert_details(
        &mut self,
        transaction_id: TransactionId,
        details: &[NewDetail],
    ) -> Result<(), StoreError>;

    /// Stamp `closed_at` on open details. Closing an already closed or
    /// unknown detail is an error.
    async fn close_details(&mut self, ids: &[DetailId], closed_at: DateTime<Utc>) -> Result<(), StoreError>;

    async fn insert_units(&mut self, units: &[Unit]) -> Result<(), StoreError>;

    /// Overwrite status and location of locked units.
    async fn update_units(&mut self, units: &[Unit]) -> Result<(), StoreError>;

    async fn delete_unit(&mut self, id: &UnitId) -> Result<(), StoreError>;

    /// Overwrite the counters of locked samples.
    async fn update_samples(&mut self, samples: &[Sample]) -> Result<(), StoreError>;

    async fn append_audit(&mut self, entries: &[NewAuditEntry]) -> Result<(), StoreError>;

    async fn commit(self: Box<Self>) -> Result<(), StoreError>;

    async fn rollback(self: Box<Self>) -> Result<(), StoreError>;
}

/// Inventory persistence: opens units of work and serves the read-only
/// query surface (read committed, no row locks).
#[async_trait]
pub trait InventoryStore: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn UnitOfWork>, StoreError>;

    async fn unit(&self, id: &UnitId) -> Result<Option<Unit>, StoreError>;

    async fn sample(&self, key: &SampleKey) -> Result<Option<Sample>, StoreError>;

    async fn transaction(&self, id: TransactionId) -> Result<Option<Transaction>, StoreError>;

    /// Open details of one unit (normally zero or one holder record).
    async fn unit_open_details(&self, id: &UnitId) -> Result<Vec<TransactionDetail>, StoreError>;

    /// Open holder records whose holder has this name, any department.
    async fn open_holdings(&self, holder_name: &str) -> Result<Vec<TransactionDetail>, StoreError>;

    async fn audit_log(&self, filter: &AuditFilter, pagination: Pagination) -> Result<AuditPage, StoreError>;
}

#[async_trait]
impl<S> InventoryStore for Arc<S>
where
    S: InventoryStore + ?Sized,
{
    async fn begin(&self) -> Result<Box<dyn UnitOfWork>, StoreError> {
        (**self).begin().await
    }

    async fn unit(&self, id: &UnitId) -> Result<Option<Unit>, StoreError> {
        (**self).unit(id).await
    }

    async fn sample(&self, key: &SampleKey) -> Result<Option<Sample>, StoreError> {
        (**self).sample(key).await
    }

    async fn transaction(&self, id: TransactionId) -> Result<Option<Transaction>, StoreError> {
        (**self).transaction(id).await
    }

    async fn unit_open_details(&self, id: &UnitId) -> Result<Vec<TransactionDetail>, StoreError> {
        (**self).unit_open_details(id).await
    }

    async fn open_holdings(&self, holder_name: &str) -> Result<Vec<TransactionDetail>, StoreError> {
        (**self).open_holdings(holder_name).await
    }

    async fn audit_log(&self, filter: &AuditFilter, pagination: Pagination) -> Result<AuditPage, StoreError> {
        (**self).audit_log(filter, pagination).await
    }
}
