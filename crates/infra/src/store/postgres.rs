//! Postgres-backed inventory store.
//!
//! Each unit of work is one database transaction. Rows are locked with
//! `SELECT ... FOR UPDATE` in `unit_id` / `sample_key` order (byte collation,
//! matching the domain ordering), and `lock_timeout` bounds how long a unit of
//! work waits for another one.
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Error Code | StoreError |
//! |------------|----------------------|------------|
//! | Database (unique violation) | `23505` | `Duplicate` |
//! | Database (serialization failure, deadlock) | `40001`, `40P01` | `Serialization` |
//! | Database (lock not available) | `55P03` | `LockTimeout` |
//! | Database (other) | Any other | `Backend` |
//! | PoolClosed, network, etc. | N/A | `Backend` |

use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{FromRow, PgPool, Postgres, Row, Transaction as PgTransaction};
use tracing::{Span, instrument};

use sampletrack_core::{AuditEntryId, DetailId, TransactionId};
use sampletrack_inventory::{
    ActionType, AuditAction, AuditEntry, AuditFilter, AuditPage, NewAuditEntry, NewDetail,
    NewTransaction, Pagination, Party, Sample, SampleKey, Transaction, TransactionDetail,
    TransactionRecord, Unit, UnitId, UnitStatus,
};

use super::{InventoryStore, StoreError, UnitOfWork};

const SCHEMA: &str = include_str!("../../migrations/0001_sampletrack.sql");

#[derive(Debug, Clone)]
pub struct PostgresInventoryStore {
    pool: PgPool,
    lock_timeout: Duration,
}

impl PostgresInventoryStore {
    pub fn new(pool: PgPool, lock_timeout: Duration) -> Self {
        Self { pool, lock_timeout }
    }

    /// Open a connection pool against `database_url`.
    pub async fn connect(
        database_url: &str,
        max_connections: u32,
        lock_timeout: Duration,
    ) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;
        Ok(Self::new(pool, lock_timeout))
    }

    /// Create the schema if it does not exist yet.
    #[instrument(skip(self), err)]
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::raw_sql(SCHEMA)
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("migrate", e))?;
        Ok(())
    }
}

#[async_trait]
impl InventoryStore for PostgresInventoryStore {
    #[instrument(skip(self), err)]
    async fn begin(&self) -> Result<Box<dyn UnitOfWork>, StoreError> {
        let mut tx = self.pool.begin().await.map_err(|e| map_sqlx_error("begin", e))?;
        // SET does not take bind parameters; the value is an integer we format ourselves.
        sqlx::query(&format!("SET LOCAL lock_timeout = '{}ms'", self.lock_timeout.as_millis()))
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("set_lock_timeout", e))?;
        Ok(Box::new(PostgresUnitOfWork { tx }))
    }

    async fn unit(&self, id: &UnitId) -> Result<Option<Unit>, StoreError> {
        let row = sqlx::query("SELECT unit_id, status, location FROM units WHERE unit_id = $1")
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("unit", e))?;
        row.map(|r| decode::<UnitRow>(&r)?.into_unit()).transpose()
    }

    async fn sample(&self, key: &SampleKey) -> Result<Option<Sample>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT sample_key, quantity_on_hand, quantity_borrowed, quantity_exported, quantity_rejected
            FROM samples
            WHERE sample_key = $1
            "#,
        )
        .bind(key.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("sample", e))?;
        row.map(|r| decode::<SampleRow>(&r)?.into_sample()).transpose()
    }

    #[instrument(skip(self), fields(transaction_id = %id), err)]
    async fn transaction(&self, id: TransactionId) -> Result<Option<Transaction>, StoreError> {
        let header = sqlx::query(
            r#"
            SELECT transaction_id, action, actor_name, actor_department,
                   counterparty_name, counterparty_department, reason_id, note, occurred_at
            FROM transactions
            WHERE transaction_id = $1
            "#,
        )
        .bind(id.get())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("transaction", e))?;

        let Some(header) = header else {
            return Ok(None);
        };
        let header = decode::<TransactionRow>(&header)?.into_record()?;

        let rows = sqlx::query(&format!(
            "SELECT {DETAIL_COLUMNS} FROM transaction_details WHERE transaction_id = $1 ORDER BY detail_id"
        ))
        .bind(id.get())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("transaction_details", e))?;

        Ok(Some(Transaction {
            header,
            details: decode_details(&rows)?,
        }))
    }

    async fn unit_open_details(&self, id: &UnitId) -> Result<Vec<TransactionDetail>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {DETAIL_COLUMNS} FROM transaction_details WHERE unit_id = $1 AND closed_at IS NULL"
        ))
        .bind(id.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("unit_open_details", e))?;
        decode_details(&rows)
    }

    async fn open_holdings(&self, holder_name: &str) -> Result<Vec<TransactionDetail>, StoreError> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {DETAIL_COLUMNS}
            FROM transaction_details
            WHERE holder_name = $1 AND closed_at IS NULL
            ORDER BY opened_at, detail_id
            "#
        ))
        .bind(holder_name.trim())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("open_holdings", e))?;
        decode_details(&rows)
    }

    #[instrument(skip(self, filter), fields(limit = pagination.limit, offset = pagination.offset, total = tracing::field::Empty), err)]
    async fn audit_log(&self, filter: &AuditFilter, pagination: Pagination) -> Result<AuditPage, StoreError> {
        let sample_key = filter.sample_key.as_ref().map(|k| k.as_str().to_string());
        let unit_id = filter.unit_id.as_ref().map(|u| u.as_str().to_string());
        let action = filter.action.map(|a| a.as_str().to_string());

        let count_row = sqlx::query(
            r#"
            SELECT COUNT(*) AS total
            FROM audit_log
            WHERE ($1::text IS NULL OR sample_key = $1)
                AND ($2::text IS NULL OR unit_id = $2)
                AND ($3::timestamptz IS NULL OR occurred_at >= $3)
                AND ($4::timestamptz IS NULL OR occurred_at <= $4)
                AND ($5::text IS NULL OR action = $5)
            "#,
        )
        .bind(&sample_key)
        .bind(&unit_id)
        .bind(filter.from)
        .bind(filter.to)
        .bind(&action)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("count_audit_log", e))?;
        let total: i64 = count_row.try_get("total").map_err(|e| map_sqlx_error("count_audit_log", e))?;

        let rows = sqlx::query(
            r#"
            SELECT audit_id, transaction_id, unit_id, sample_key, action, quantity,
                   actor_name, actor_department, counterparty_name, counterparty_department,
                   previous_holder_name, previous_holder_department, reason_id, note, occurred_at
            FROM audit_log
            WHERE ($1::text IS NULL OR sample_key = $1)
                AND ($2::text IS NULL OR unit_id = $2)
                AND ($3::timestamptz IS NULL OR occurred_at >= $3)
                AND ($4::timestamptz IS NULL OR occurred_at <= $4)
                AND ($5::text IS NULL OR action = $5)
            ORDER BY occurred_at DESC, audit_id DESC
            LIMIT $6 OFFSET $7
            "#,
        )
        .bind(&sample_key)
        .bind(&unit_id)
        .bind(filter.from)
        .bind(filter.to)
        .bind(&action)
        .bind(i64::from(pagination.limit))
        .bind(i64::from(pagination.offset))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("audit_log", e))?;

        let entries = rows
            .iter()
            .map(|r| decode::<AuditRow>(r)?.into_entry())
            .collect::<Result<Vec<_>, _>>()?;

        let total = total.max(0) as u64;
        Span::current().record("total", total);
        let has_more = u64::from(pagination.offset) + (entries.len() as u64) < total;
        Ok(AuditPage {
            entries,
            total,
            pagination,
            has_more,
        })
    }
}

pub struct PostgresUnitOfWork {
    tx: PgTransaction<'static, Postgres>,
}

#[async_trait]
impl UnitOfWork for PostgresUnitOfWork {
    #[instrument(skip(self, ids), fields(count = ids.len()), err)]
    async fn lock_units(&mut self, ids: &[UnitId]) -> Result<Vec<Unit>, StoreError> {
        let raw: Vec<String> = ids.iter().map(|id| id.as_str().to_string()).collect();
        let rows = sqlx::query(
            r#"
            SELECT unit_id, status, location
            FROM units
            WHERE unit_id = ANY($1)
            ORDER BY unit_id COLLATE "C"
            FOR UPDATE
            "#,
        )
        .bind(&raw)
        .fetch_all(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("lock_units", e))?;

        rows.iter().map(|r| decode::<UnitRow>(r)?.into_unit()).collect()
    }

    #[instrument(skip(self, keys), fields(count = keys.len()), err)]
    async fn lock_samples(&mut self, keys: &[SampleKey]) -> Result<Vec<Sample>, StoreError> {
        let raw: Vec<String> = keys.iter().map(|k| k.as_str().to_string()).collect();
        let rows = sqlx::query(
            r#"
            SELECT sample_key, quantity_on_hand, quantity_borrowed, quantity_exported, quantity_rejected
            FROM samples
            WHERE sample_key = ANY($1)
            ORDER BY sample_key COLLATE "C"
            FOR UPDATE
            "#,
        )
        .bind(&raw)
        .fetch_all(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("lock_samples", e))?;

        rows.iter().map(|r| decode::<SampleRow>(r)?.into_sample()).collect()
    }

    async fn lock_or_create_sample(&mut self, key: &SampleKey) -> Result<Sample, StoreError> {
        sqlx::query("INSERT INTO samples (sample_key) VALUES ($1) ON CONFLICT (sample_key) DO NOTHING")
            .bind(key.as_str())
            .execute(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("create_sample", e))?;

        let row = sqlx::query(
            r#"
            SELECT sample_key, quantity_on_hand, quantity_borrowed, quantity_exported, quantity_rejected
            FROM samples
            WHERE sample_key = $1
            FOR UPDATE
            "#,
        )
        .bind(key.as_str())
        .fetch_one(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("lock_sample", e))?;
        decode::<SampleRow>(&row)?.into_sample()
    }

    async fn open_details(&mut self, ids: &[UnitId]) -> Result<Vec<TransactionDetail>, StoreError> {
        let raw: Vec<String> = ids.iter().map(|id| id.as_str().to_string()).collect();
        let rows = sqlx::query(&format!(
            "SELECT {DETAIL_COLUMNS} FROM transaction_details WHERE unit_id = ANY($1) AND closed_at IS NULL"
        ))
        .bind(&raw)
        .fetch_all(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("open_details", e))?;
        decode_details(&rows)
    }

    async fn insert_transaction(&mut self, header: &NewTransaction) -> Result<TransactionId, StoreError> {
        let (cp_name, cp_dept) = split_party(header.counterparty.as_ref());
        let row = sqlx::query(
            r#"
            INSERT INTO transactions (
                action, actor_name, actor_department, counterparty_name,
                counterparty_department, reason_id, note, occurred_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING transaction_id
            "#,
        )
        .bind(header.action.as_str())
        .bind(&header.actor.name)
        .bind(&header.actor.department)
        .bind(cp_name)
        .bind(cp_dept)
        .bind(header.reason_id)
        .bind(&header.note)
        .bind(header.occurred_at)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("insert_transaction", e))?;

        let id: i64 = row
            .try_get("transaction_id")
            .map_err(|e| map_sqlx_error("insert_transaction", e))?;
        Ok(TransactionId::from_raw(id))
    }

    async fn insert_details(
        &mut self,
        transaction_id: TransactionId,
        details: &[NewDetail],
    ) -> Result<(), StoreError> {
        for detail in details {
            let (holder_name, holder_dept) = split_party(detail.holder.as_ref());
            sqlx::query(
                r#"
                INSERT INTO transaction_details (
                    transaction_id, unit_id, action, holder_name, holder_department,
                    quantity, opened_at, closed_at, predecessor_id
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                "#,
            )
            .bind(transaction_id.get())
            .bind(detail.unit_id.as_str())
            .bind(detail.action.as_str())
            .bind(holder_name)
            .bind(holder_dept)
            .bind(detail.quantity)
            .bind(detail.opened_at)
            .bind(detail.closed_at)
            .bind(detail.predecessor.map(|p| p.get()))
            .execute(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("insert_details", e))?;
        }
        Ok(())
    }

    async fn close_details(&mut self, ids: &[DetailId], closed_at: DateTime<Utc>) -> Result<(), StoreError> {
        if ids.is_empty() {
            return Ok(());
        }
        let raw: Vec<i64> = ids.iter().map(|id| id.get()).collect();
        let result = sqlx::query(
            "UPDATE transaction_details SET closed_at = $1 WHERE detail_id = ANY($2) AND closed_at IS NULL",
        )
        .bind(closed_at)
        .bind(&raw)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("close_details", e))?;

        if result.rows_affected() != raw.len() as u64 {
            return Err(StoreError::Backend(format!(
                "closed {} of {} details; the rest were missing or already closed",
                result.rows_affected(),
                raw.len()
            )));
        }
        Ok(())
    }

    async fn insert_units(&mut self, units: &[Unit]) -> Result<(), StoreError> {
        for unit in units {
            sqlx::query("INSERT INTO units (unit_id, sample_key, status, location) VALUES ($1, $2, $3, $4)")
                .bind(unit.id_typed().as_str())
                .bind(unit.sample_key().as_str())
                .bind(unit.status().as_str())
                .bind(unit.location())
                .execute(&mut *self.tx)
                .await
                .map_err(|e| map_sqlx_error("insert_units", e))?;
        }
        Ok(())
    }

    async fn update_units(&mut self, units: &[Unit]) -> Result<(), StoreError> {
        for unit in units {
            let result = sqlx::query("UPDATE units SET status = $2, location = $3 WHERE unit_id = $1")
                .bind(unit.id_typed().as_str())
                .bind(unit.status().as_str())
                .bind(unit.location())
                .execute(&mut *self.tx)
                .await
                .map_err(|e| map_sqlx_error("update_units", e))?;
            if result.rows_affected() != 1 {
                return Err(StoreError::Backend(format!("unit {} vanished during update", unit.id_typed())));
            }
        }
        Ok(())
    }

    async fn delete_unit(&mut self, id: &UnitId) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM units WHERE unit_id = $1")
            .bind(id.as_str())
            .execute(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("delete_unit", e))?;
        Ok(())
    }

    async fn update_samples(&mut self, samples: &[Sample]) -> Result<(), StoreError> {
        for sample in samples {
            sqlx::query(
                r#"
                UPDATE samples
                SET quantity_on_hand = $2,
                    quantity_borrowed = $3,
                    quantity_exported = $4,
                    quantity_rejected = $5,
                    updated_at = now()
                WHERE sample_key = $1
                "#,
            )
            .bind(sample.key().as_str())
            .bind(sample.on_hand())
            .bind(sample.borrowed())
            .bind(sample.exported())
            .bind(sample.rejected())
            .execute(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("update_samples", e))?;
        }
        Ok(())
    }

    async fn append_audit(&mut self, entries: &[NewAuditEntry]) -> Result<(), StoreError> {
        for entry in entries {
            let (cp_name, cp_dept) = split_party(entry.counterparty.as_ref());
            let (prev_name, prev_dept) = split_party(entry.previous_holder.as_ref());
            sqlx::query(
                r#"
                INSERT INTO audit_log (
                    transaction_id, unit_id, sample_key, action, quantity,
                    actor_name, actor_department, counterparty_name, counterparty_department,
                    previous_holder_name, previous_holder_department, reason_id, note, occurred_at
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
                "#,
            )
            .bind(entry.transaction_id.map(|t| t.get()))
            .bind(entry.unit_id.as_str())
            .bind(entry.unit_id.sample_key().as_str())
            .bind(entry.action.as_str())
            .bind(entry.quantity)
            .bind(&entry.actor.name)
            .bind(&entry.actor.department)
            .bind(cp_name)
            .bind(cp_dept)
            .bind(prev_name)
            .bind(prev_dept)
            .bind(entry.reason_id)
            .bind(&entry.note)
            .bind(entry.occurred_at)
            .execute(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("append_audit", e))?;
        }
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        self.tx.commit().await.map_err(|e| map_sqlx_error("commit", e))
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        self.tx.rollback().await.map_err(|e| map_sqlx_error("rollback", e))
    }
}

/// Map SQLx errors to StoreError, keeping the operation name for context.
fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            match db_err.code().as_deref() {
                Some("23505") => StoreError::Duplicate(msg),
                Some("40001") | Some("40P01") => StoreError::Serialization(msg),
                Some("55P03") => StoreError::LockTimeout(msg),
                _ => StoreError::Backend(msg),
            }
        }
        sqlx::Error::PoolClosed => StoreError::Backend(format!("connection pool closed in {operation}")),
        other => StoreError::Backend(format!("{operation}: {other}")),
    }
}

fn decode<'r, T: FromRow<'r, PgRow>>(row: &'r PgRow) -> Result<T, StoreError> {
    T::from_row(row).map_err(|e| StoreError::Corrupt(e.to_string()))
}

fn decode_details(rows: &[PgRow]) -> Result<Vec<TransactionDetail>, StoreError> {
    rows.iter().map(|r| decode::<DetailRow>(r)?.into_detail()).collect()
}

fn split_party(party: Option<&Party>) -> (Option<&str>, Option<&str>) {
    match party {
        Some(p) => (Some(p.name.as_str()), p.department.as_deref()),
        None => (None, None),
    }
}

fn join_party(name: Option<String>, department: Option<String>) -> Option<Party> {
    name.map(|name| Party { name, department })
}

fn corrupt(what: &str, err: impl core::fmt::Display) -> StoreError {
    StoreError::Corrupt(format!("{what}: {err}"))
}

fn parse_enum<T: FromStr>(what: &str, raw: &str) -> Result<T, StoreError>
where
    T::Err: core::fmt::Display,
{
    T::from_str(raw).map_err(|e| corrupt(what, e))
}

// SQLx row types

const DETAIL_COLUMNS: &str = "detail_id, transaction_id, unit_id, action, holder_name, holder_department, \
     quantity, opened_at, closed_at, predecessor_id";

#[derive(Debug)]
struct UnitRow {
    unit_id: String,
    status: String,
    location: Option<String>,
}

impl<'r> FromRow<'r, PgRow> for UnitRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(UnitRow {
            unit_id: row.try_get("unit_id")?,
            status: row.try_get("status")?,
            location: row.try_get("location")?,
        })
    }
}

impl UnitRow {
    fn into_unit(self) -> Result<Unit, StoreError> {
        let id = UnitId::parse(&self.unit_id).map_err(|e| corrupt("units.unit_id", e))?;
        let status: UnitStatus = parse_enum("units.status", &self.status)?;
        Unit::from_parts(id, status, self.location).map_err(|e| corrupt("units", e))
    }
}

#[derive(Debug)]
struct SampleRow {
    sample_key: String,
    quantity_on_hand: i64,
    quantity_borrowed: i64,
    quantity_exported: i64,
    quantity_rejected: i64,
}

impl<'r> FromRow<'r, PgRow> for SampleRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(SampleRow {
            sample_key: row.try_get("sample_key")?,
            quantity_on_hand: row.try_get("quantity_on_hand")?,
            quantity_borrowed: row.try_get("quantity_borrowed")?,
            quantity_exported: row.try_get("quantity_exported")?,
            quantity_rejected: row.try_get("quantity_rejected")?,
        })
    }
}

impl SampleRow {
    fn into_sample(self) -> Result<Sample, StoreError> {
        let key = SampleKey::parse(&self.sample_key).map_err(|e| corrupt("samples.sample_key", e))?;
        Sample::from_parts(
            key,
            self.quantity_on_hand,
            self.quantity_borrowed,
            self.quantity_exported,
            self.quantity_rejected,
        )
        .map_err(|e| corrupt("samples", e))
    }
}

#[derive(Debug)]
struct TransactionRow {
    transaction_id: i64,
    action: String,
    actor_name: String,
    actor_department: Option<String>,
    counterparty_name: Option<String>,
    counterparty_department: Option<String>,
    reason_id: Option<i64>,
    note: Option<String>,
    occurred_at: DateTime<Utc>,
}

impl<'r> FromRow<'r, PgRow> for TransactionRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(TransactionRow {
            transaction_id: row.try_get("transaction_id")?,
            action: row.try_get("action")?,
            actor_name: row.try_get("actor_name")?,
            actor_department: row.try_get("actor_department")?,
            counterparty_name: row.try_get("counterparty_name")?,
            counterparty_department: row.try_get("counterparty_department")?,
            reason_id: row.try_get("reason_id")?,
            note: row.try_get("note")?,
            occurred_at: row.try_get("occurred_at")?,
        })
    }
}

impl TransactionRow {
    fn into_record(self) -> Result<TransactionRecord, StoreError> {
        Ok(TransactionRecord {
            id: TransactionId::from_raw(self.transaction_id),
            action: parse_enum::<ActionType>("transactions.action", &self.action)?,
            actor: Party {
                name: self.actor_name,
                department: self.actor_department,
            },
            counterparty: join_party(self.counterparty_name, self.counterparty_department),
            reason_id: self.reason_id,
            note: self.note,
            occurred_at: self.occurred_at,
        })
    }
}

#[derive(Debug)]
struct DetailRow {
    detail_id: i64,
    transaction_id: i64,
    unit_id: String,
    action: String,
    holder_name: Option<String>,
    holder_department: Option<String>,
    quantity: i64,
    opened_at: DateTime<Utc>,
    closed_at: Option<DateTime<Utc>>,
    predecessor_id: Option<i64>,
}

impl<'r> FromRow<'r, PgRow> for DetailRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(DetailRow {
            detail_id: row.try_get("detail_id")?,
            transaction_id: row.try_get("transaction_id")?,
            unit_id: row.try_get("unit_id")?,
            action: row.try_get("action")?,
            holder_name: row.try_get("holder_name")?,
            holder_department: row.try_get("holder_department")?,
            quantity: row.try_get("quantity")?,
            opened_at: row.try_get("opened_at")?,
            closed_at: row.try_get("closed_at")?,
            predecessor_id: row.try_get("predecessor_id")?,
        })
    }
}

impl DetailRow {
    fn into_detail(self) -> Result<TransactionDetail, StoreError> {
        Ok(TransactionDetail {
            id: DetailId::from_raw(self.detail_id),
            transaction_id: TransactionId::from_raw(self.transaction_id),
            unit_id: UnitId::parse(&self.unit_id).map_err(|e| corrupt("transaction_details.unit_id", e))?,
            action: parse_enum::<ActionType>("transaction_details.action", &self.action)?,
            holder: join_party(self.holder_name, self.holder_department),
            quantity: self.quantity,
            opened_at: self.opened_at,
            closed_at: self.closed_at,
            predecessor: self.predecessor_id.map(DetailId::from_raw),
        })
    }
}

#[derive(Debug)]
struct AuditRow {
    audit_id: i64,
    transaction_id: Option<i64>,
    unit_id: String,
    sample_key: String,
    action: String,
    quantity: i64,
    actor_name: String,
    actor_department: Option<String>,
    counterparty_name: Option<String>,
    counterparty_department: Option<String>,
    previous_holder_name: Option<String>,
    previous_holder_department: Option<String>,
    reason_id: Option<i64>,
    note: Option<String>,
    occurred_at: DateTime<Utc>,
}

impl<'r> FromRow<'r, PgRow> for AuditRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(AuditRow {
            audit_id: row.try_get("audit_id")?,
            transaction_id: row.try_get("transaction_id")?,
            unit_id: row.try_get("unit_id")?,
            sample_key: row.try_get("sample_key")?,
            action: row.try_get("action")?,
            quantity: row.try_get("quantity")?,
            actor_name: row.try_get("actor_name")?,
            actor_department: row.try_get("actor_department")?,
            counterparty_name: row.try_get("counterparty_name")?,
            counterparty_department: row.try_get("counterparty_department")?,
            previous_holder_name: row.try_get("previous_holder_name")?,
            previous_holder_department: row.try_get("previous_holder_department")?,
            reason_id: row.try_get("reason_id")?,
            note: row.try_get("note")?,
            occurred_at: row.try_get("occurred_at")?,
        })
    }
}

impl AuditRow {
    fn into_entry(self) -> Result<AuditEntry, StoreError> {
        Ok(AuditEntry {
            id: AuditEntryId::from_raw(self.audit_id),
            transaction_id: self.transaction_id.map(TransactionId::from_raw),
            unit_id: UnitId::parse(&self.unit_id).map_err(|e| corrupt("audit_log.unit_id", e))?,
            sample_key: SampleKey::parse(&self.sample_key).map_err(|e| corrupt("audit_log.sample_key", e))?,
            action: parse_enum::<AuditAction>("audit_log.action", &self.action)?,
            quantity: self.quantity,
            actor: Party {
                name: self.actor_name,
                department: self.actor_department,
            },
            counterparty: join_party(self.counterparty_name, self.counterparty_department),
            previous_holder: join_party(self.previous_holder_name, self.previous_holder_department),
            reason_id: self.reason_id,
            note: self.note,
            occurred_at: self.occurred_at,
        })
    }
}
