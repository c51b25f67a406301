use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::OwnedMutexGuard;

use sampletrack_core::{AuditEntryId, DetailId, TransactionId};
use sampletrack_inventory::{
    AuditEntry, AuditFilter, AuditPage, NewAuditEntry, NewDetail, NewTransaction, Pagination,
    Sample, SampleKey, Transaction, TransactionDetail, TransactionRecord, Unit, UnitId,
};

use super::{InventoryStore, StoreError, UnitOfWork};

pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum RowKey {
    Unit(UnitId),
    Sample(SampleKey),
}

impl core::fmt::Display for RowKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            RowKey::Unit(id) => write!(f, "unit {id}"),
            RowKey::Sample(key) => write!(f, "sample {key}"),
        }
    }
}

#[derive(Debug, Default)]
struct Tables {
    units: BTreeMap<UnitId, Unit>,
    samples: BTreeMap<SampleKey, Sample>,
    transactions: BTreeMap<TransactionId, TransactionRecord>,
    details: BTreeMap<DetailId, TransactionDetail>,
    audit: Vec<AuditEntry>,
}

#[derive(Debug)]
struct Shared {
    tables: RwLock<Tables>,
    row_locks: Mutex<HashMap<RowKey, Arc<tokio::sync::Mutex<()>>>>,
    next_transaction: AtomicI64,
    next_detail: AtomicI64,
    next_audit: AtomicI64,
    lock_timeout: Duration,
}

fn poisoned() -> StoreError {
    StoreError::Backend("lock poisoned".to_string())
}

/// In-memory inventory store.
///
/// Intended for tests/dev. Row locks are per-key async mutexes, so it gives
/// the same blocking and atomicity behavior as the Postgres store: a unit of
/// work waits for rows another one holds, and its writes become visible in a
/// single step on commit.
#[derive(Debug, Clone)]
pub struct InMemoryInventoryStore {
    shared: Arc<Shared>,
}

impl Default for InMemoryInventoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryInventoryStore {
    pub fn new() -> Self {
        Self::with_lock_timeout(DEFAULT_LOCK_TIMEOUT)
    }

    pub fn with_lock_timeout(lock_timeout: Duration) -> Self {
        Self {
            shared: Arc::new(Shared {
                tables: RwLock::new(Tables::default()),
                row_locks: Mutex::new(HashMap::new()),
                next_transaction: AtomicI64::new(1),
                next_detail: AtomicI64::new(1),
                next_audit: AtomicI64::new(1),
                lock_timeout,
            }),
        }
    }
}

#[async_trait]
impl InventoryStore for InMemoryInventoryStore {
    async fn begin(&self) -> Result<Box<dyn UnitOfWork>, StoreError> {
        Ok(Box::new(InMemoryUnitOfWork {
            shared: self.shared.clone(),
            held: HashMap::new(),
            staged: Staged::default(),
        }))
    }

    async fn unit(&self, id: &UnitId) -> Result<Option<Unit>, StoreError> {
        let tables = self.shared.tables.read().map_err(|_| poisoned())?;
        Ok(tables.units.get(id).cloned())
    }

    async fn sample(&self, key: &SampleKey) -> Result<Option<Sample>, StoreError> {
        let tables = self.shared.tables.read().map_err(|_| poisoned())?;
        Ok(tables.samples.get(key).cloned())
    }

    async fn transaction(&self, id: TransactionId) -> Result<Option<Transaction>, StoreError> {
        let tables = self.shared.tables.read().map_err(|_| poisoned())?;
        let Some(header) = tables.transactions.get(&id).cloned() else {
            return Ok(None);
        };
        let details = tables
            .details
            .values()
            .filter(|d| d.transaction_id == id)
            .cloned()
            .collect();
        Ok(Some(Transaction { header, details }))
    }

    async fn unit_open_details(&self, id: &UnitId) -> Result<Vec<TransactionDetail>, StoreError> {
        let tables = self.shared.tables.read().map_err(|_| poisoned())?;
        Ok(tables
            .details
            .values()
            .filter(|d| &d.unit_id == id && d.closed_at.is_none())
            .cloned()
            .collect())
    }

    async fn open_holdings(&self, holder_name: &str) -> Result<Vec<TransactionDetail>, StoreError> {
        let name = holder_name.trim();
        let tables = self.shared.tables.read().map_err(|_| poisoned())?;
        Ok(tables
            .details
            .values()
            .filter(|d| d.is_open_holder_record())
            .filter(|d| d.holder.as_ref().is_some_and(|h| h.name == name))
            .cloned()
            .collect())
    }

    async fn audit_log(&self, filter: &AuditFilter, pagination: Pagination) -> Result<AuditPage, StoreError> {
        let tables = self.shared.tables.read().map_err(|_| poisoned())?;
        let matching = tables.audit.iter().filter(|e| filter.matches(e)).cloned().collect();
        Ok(AuditPage::from_matching(matching, pagination))
    }
}

/// Writes buffered by a unit of work until commit.
#[derive(Debug, Default)]
struct Staged {
    /// `None` marks a deleted unit.
    units: BTreeMap<UnitId, Option<Unit>>,
    samples: BTreeMap<SampleKey, Sample>,
    transactions: Vec<TransactionRecord>,
    details: Vec<TransactionDetail>,
    closed: HashMap<DetailId, DateTime<Utc>>,
    audit: Vec<AuditEntry>,
}

pub struct InMemoryUnitOfWork {
    shared: Arc<Shared>,
    held: HashMap<RowKey, OwnedMutexGuard<()>>,
    staged: Staged,
}

impl InMemoryUnitOfWork {
    /// Acquire row locks in the given order, skipping rows already held.
    async fn acquire(&mut self, keys: impl IntoIterator<Item = RowKey>) -> Result<(), StoreError> {
        for key in keys {
            if self.held.contains_key(&key) {
                continue;
            }
            let row = {
                let mut locks = self.shared.row_locks.lock().map_err(|_| poisoned())?;
                locks.entry(key.clone()).or_default().clone()
            };
            let guard = tokio::time::timeout(self.shared.lock_timeout, row.lock_owned())
                .await
                .map_err(|_| StoreError::LockTimeout(key.to_string()))?;
            self.held.insert(key, guard);
        }
        Ok(())
    }

    fn ensure_held(&self, key: RowKey) -> Result<(), StoreError> {
        if self.held.contains_key(&key) {
            Ok(())
        } else {
            Err(StoreError::Backend(format!("{key} written without holding its lock")))
        }
    }

    fn current_unit(&self, tables: &Tables, id: &UnitId) -> Option<Unit> {
        match self.staged.units.get(id) {
            Some(staged) => staged.clone(),
            None => tables.units.get(id).cloned(),
        }
    }

    fn current_sample(&self, tables: &Tables, key: &SampleKey) -> Option<Sample> {
        self.staged
            .samples
            .get(key)
            .or_else(|| tables.samples.get(key))
            .cloned()
    }

    fn release(&mut self) {
        self.held.clear();
        if let Ok(mut locks) = self.shared.row_locks.lock() {
            locks.retain(|_, row| Arc::strong_count(row) > 1);
        }
    }
}

impl Drop for InMemoryUnitOfWork {
    fn drop(&mut self) {
        self.release();
    }
}

#[async_trait]
impl UnitOfWork for InMemoryUnitOfWork {
    async fn lock_units(&mut self, ids: &[UnitId]) -> Result<Vec<Unit>, StoreError> {
        let mut sorted = ids.to_vec();
        sorted.sort();
        sorted.dedup();
        self.acquire(sorted.iter().cloned().map(RowKey::Unit)).await?;

        let tables = self.shared.tables.read().map_err(|_| poisoned())?;
        Ok(sorted.iter().filter_map(|id| self.current_unit(&tables, id)).collect())
    }

    async fn lock_samples(&mut self, keys: &[SampleKey]) -> Result<Vec<Sample>, StoreError> {
        let mut sorted = keys.to_vec();
        sorted.sort();
        sorted.dedup();
        self.acquire(sorted.iter().cloned().map(RowKey::Sample)).await?;

        let tables = self.shared.tables.read().map_err(|_| poisoned())?;
        Ok(sorted.iter().filter_map(|k| self.current_sample(&tables, k)).collect())
    }

    async fn lock_or_create_sample(&mut self, key: &SampleKey) -> Result<Sample, StoreError> {
        self.acquire([RowKey::Sample(key.clone())]).await?;

        let existing = {
            let tables = self.shared.tables.read().map_err(|_| poisoned())?;
            self.current_sample(&tables, key)
        };
        Ok(match existing {
            Some(sample) => sample,
            None => {
                let sample = Sample::empty(key.clone());
                self.staged.samples.insert(key.clone(), sample.clone());
                sample
            }
        })
    }

    async fn open_details(&mut self, ids: &[UnitId]) -> Result<Vec<TransactionDetail>, StoreError> {
        let wanted: HashSet<&UnitId> = ids.iter().collect();
        let tables = self.shared.tables.read().map_err(|_| poisoned())?;
        Ok(tables
            .details
            .values()
            .chain(self.staged.details.iter())
            .filter(|d| wanted.contains(&d.unit_id))
            .filter(|d| d.closed_at.is_none() && !self.staged.closed.contains_key(&d.id))
            .cloned()
            .collect())
    }

    async fn insert_transaction(&mut self, header: &NewTransaction) -> Result<TransactionId, StoreError> {
        let id = TransactionId::from_raw(self.shared.next_transaction.fetch_add(1, Ordering::SeqCst));
        self.staged.transactions.push(header.clone().into_record(id));
        Ok(id)
    }

    async fn insert_details(
        &mut self,
        transaction_id: TransactionId,
        details: &[NewDetail],
    ) -> Result<(), StoreError> {
        for detail in details {
            self.ensure_held(RowKey::Unit(detail.unit_id.clone()))?;
            let id = DetailId::from_raw(self.shared.next_detail.fetch_add(1, Ordering::SeqCst));
            self.staged.details.push(detail.clone().into_detail(id, transaction_id));
        }
        Ok(())
    }

    async fn close_details(&mut self, ids: &[DetailId], closed_at: DateTime<Utc>) -> Result<(), StoreError> {
        let tables = self.shared.tables.read().map_err(|_| poisoned())?;
        for id in ids {
            let detail = tables
                .details
                .get(id)
                .or_else(|| self.staged.details.iter().find(|d| d.id == *id))
                .ok_or_else(|| StoreError::Backend(format!("detail {id} does not exist")))?;
            if detail.closed_at.is_some() || self.staged.closed.contains_key(id) {
                return Err(StoreError::Backend(format!("detail {id} is already closed")));
            }
            self.ensure_held(RowKey::Unit(detail.unit_id.clone()))?;
        }
        drop(tables);

        for id in ids {
            self.staged.closed.insert(*id, closed_at);
        }
        Ok(())
    }

    async fn insert_units(&mut self, units: &[Unit]) -> Result<(), StoreError> {
        let tables = self.shared.tables.read().map_err(|_| poisoned())?;
        for unit in units {
            let id = unit.id_typed();
            self.ensure_held(RowKey::Unit(id.clone()))?;
            if self.current_unit(&tables, id).is_some() {
                return Err(StoreError::Duplicate(format!("unit {id}")));
            }
        }
        drop(tables);

        for unit in units {
            self.staged.units.insert(unit.id_typed().clone(), Some(unit.clone()));
        }
        Ok(())
    }

    async fn update_units(&mut self, units: &[Unit]) -> Result<(), StoreError> {
        for unit in units {
            self.ensure_held(RowKey::Unit(unit.id_typed().clone()))?;
        }
        for unit in units {
            self.staged.units.insert(unit.id_typed().clone(), Some(unit.clone()));
        }
        Ok(())
    }

    async fn delete_unit(&mut self, id: &UnitId) -> Result<(), StoreError> {
        self.ensure_held(RowKey::Unit(id.clone()))?;
        self.staged.units.insert(id.clone(), None);
        Ok(())
    }

    async fn update_samples(&mut self, samples: &[Sample]) -> Result<(), StoreError> {
        for sample in samples {
            self.ensure_held(RowKey::Sample(sample.key().clone()))?;
        }
        for sample in samples {
            self.staged.samples.insert(sample.key().clone(), sample.clone());
        }
        Ok(())
    }

    async fn append_audit(&mut self, entries: &[NewAuditEntry]) -> Result<(), StoreError> {
        for entry in entries {
            let id = AuditEntryId::from_raw(self.shared.next_audit.fetch_add(1, Ordering::SeqCst));
            self.staged.audit.push(entry.clone().into_entry(id));
        }
        Ok(())
    }

    async fn commit(mut self: Box<Self>) -> Result<(), StoreError> {
        let staged = std::mem::take(&mut self.staged);
        {
            let mut tables = self.shared.tables.write().map_err(|_| poisoned())?;
            for (id, unit) in staged.units {
                match unit {
                    Some(unit) => {
                        tables.units.insert(id, unit);
                    }
                    None => {
                        tables.units.remove(&id);
                    }
                }
            }
            tables.samples.extend(staged.samples);
            for header in staged.transactions {
                tables.transactions.insert(header.id, header);
            }
            for detail in staged.details {
                tables.details.insert(detail.id, detail);
            }
            for (id, at) in staged.closed {
                if let Some(detail) = tables.details.get_mut(&id) {
                    detail.closed_at = Some(at);
                }
            }
            tables.audit.extend(staged.audit);
        }
        self.release();
        Ok(())
    }

    async fn rollback(mut self: Box<Self>) -> Result<(), StoreError> {
        self.staged = Staged::default();
        self.release();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sampletrack_inventory::UnitStatus;

    fn uid(raw: &str) -> UnitId {
        UnitId::parse(raw).unwrap()
    }

    fn key(raw: &str) -> SampleKey {
        SampleKey::parse(raw).unwrap()
    }

    #[tokio::test]
    async fn writes_are_invisible_until_commit() {
        let store = InMemoryInventoryStore::new();
        let mut uow = store.begin().await.unwrap();
        let id = uid("S1|1");
        assert!(uow.lock_units(&[id.clone()]).await.unwrap().is_empty());
        uow.insert_units(&[Unit::register(id.clone(), "WH1").unwrap()]).await.unwrap();

        assert!(store.unit(&id).await.unwrap().is_none());
        uow.commit().await.unwrap();
        assert_eq!(store.unit(&id).await.unwrap().unwrap().status(), UnitStatus::Available);
    }

    #[tokio::test]
    async fn rollback_discards_staged_writes() {
        let store = InMemoryInventoryStore::new();
        let mut uow = store.begin().await.unwrap();
        let sample = uow.lock_or_create_sample(&key("S1")).await.unwrap();
        assert_eq!(sample.total(), 0);
        uow.rollback().await.unwrap();

        assert!(store.sample(&key("S1")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn writing_an_unlocked_row_is_rejected() {
        let store = InMemoryInventoryStore::new();
        let mut uow = store.begin().await.unwrap();
        let err = uow
            .update_units(&[Unit::register(uid("S1|1"), "WH1").unwrap()])
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Backend(_)));
    }

    #[tokio::test]
    async fn held_row_lock_times_out_for_a_second_writer() {
        let store = InMemoryInventoryStore::with_lock_timeout(Duration::from_millis(20));
        let mut first = store.begin().await.unwrap();
        first.lock_units(&[uid("S1|1")]).await.unwrap();

        let mut second = store.begin().await.unwrap();
        let err = second.lock_units(&[uid("S1|1")]).await.unwrap_err();
        assert!(matches!(err, StoreError::LockTimeout(_)));

        first.rollback().await.unwrap();
        assert!(second.lock_units(&[uid("S1|1")]).await.is_ok());
    }

    #[tokio::test]
    async fn dropping_a_unit_of_work_releases_its_locks() {
        let store = InMemoryInventoryStore::with_lock_timeout(Duration::from_millis(20));
        {
            let mut uow = store.begin().await.unwrap();
            uow.lock_samples(&[key("S1")]).await.unwrap();
        }
        let mut again = store.begin().await.unwrap();
        assert!(again.lock_samples(&[key("S1")]).await.is_ok());
        assert!(store.shared.row_locks.lock().unwrap().len() <= 1);
    }
}
