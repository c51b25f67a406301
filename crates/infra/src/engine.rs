//! Transaction Engine: the only writer of the Unit Registry and the
//! Aggregate Inventory Ledger.
//!
//! ## Submission flow
//!
//! ```text
//! SubmitTransaction
//!   ↓
//! 1. Validate the request shape (no storage access)
//!   ↓
//! 2. Begin a unit of work; lock unit rows, then sample rows
//!   ↓
//! 3. Resolve current holders (Return/Transfer, one bulk lookup)
//!   ↓
//! 4. Plan every write (pure; first offending unit wins)
//!   ↓
//! 5. Apply the plan and commit, or roll back on any failure
//! ```
//!
//! A failed submission leaves no observable effect.

use std::collections::BTreeSet;

use chrono::Utc;
use thiserror::Error;
use tracing::{Span, debug, error, info, instrument, warn};

use sampletrack_core::{DomainError, TransactionId};
use sampletrack_inventory::{
    AuditFilter, AuditPage, BatchPlan, DeregistrationPlan, Pagination, Party,
    RegisterUnits, RegistrationPlan, Sample, SampleKey, SubmitTransaction, Transaction,
    TransactionDetail, Unit, UnitId, UnitViolation, ValidatedBatch, ValidatedRegistration,
    current_holder_record, resolve_holders,
};

use crate::store::{InventoryStore, StoreError, UnitOfWork};

/// Target for registry/ledger drift reports. Operators alert on it.
pub const CONSISTENCY_TARGET: &str = "sampletrack::consistency";

/// Failure of an engine operation.
///
/// Domain failures carry the first offending unit, when there is one.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("{message}")]
    Validation { message: String, unit_id: Option<String> },

    #[error("{message}")]
    UnitNotFound { message: String, unit_id: Option<String> },

    #[error("{message}")]
    Precondition { message: String, unit_id: Option<String> },

    #[error("{message}")]
    Conflict { message: String, unit_id: Option<String> },

    #[error("{message}")]
    Consistency { message: String, unit_id: Option<String> },

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl EngineError {
    pub fn validation(message: impl Into<String>) -> Self {
        EngineError::Validation {
            message: message.into(),
            unit_id: None,
        }
    }

    /// Stable, machine-readable error class.
    pub fn kind(&self) -> &'static str {
        match self {
            EngineError::Validation { .. } => "validation_error",
            EngineError::UnitNotFound { .. } => "not_found",
            EngineError::Precondition { .. } => "precondition_error",
            EngineError::Conflict { .. } => "conflict",
            EngineError::Consistency { .. } => "consistency_error",
            EngineError::Store(e) if is_retryable(e) => "conflict",
            EngineError::Store(_) => "storage_error",
        }
    }

    pub fn offending_unit(&self) -> Option<&str> {
        match self {
            EngineError::Validation { unit_id, .. }
            | EngineError::UnitNotFound { unit_id, .. }
            | EngineError::Precondition { unit_id, .. }
            | EngineError::Conflict { unit_id, .. }
            | EngineError::Consistency { unit_id, .. } => unit_id.as_deref(),
            EngineError::Store(_) => None,
        }
    }

    /// HTTP-equivalent status code.
    pub fn http_status(&self) -> u16 {
        match self {
            EngineError::Validation { .. } | EngineError::Precondition { .. } => 400,
            EngineError::UnitNotFound { .. } => 404,
            EngineError::Conflict { .. } => 409,
            EngineError::Consistency { .. } => 500,
            EngineError::Store(e) if is_retryable(e) => 409,
            EngineError::Store(_) => 500,
        }
    }
}

/// Store failures the caller can fix by retrying.
fn is_retryable(err: &StoreError) -> bool {
    matches!(
        err,
        StoreError::LockTimeout(_) | StoreError::Serialization(_) | StoreError::Duplicate(_)
    )
}

impl From<UnitViolation> for EngineError {
    fn from(value: UnitViolation) -> Self {
        let unit_id = value.unit_id;
        match value.error {
            DomainError::Validation(message) => EngineError::Validation { message, unit_id },
            DomainError::Precondition(message) => EngineError::Precondition { message, unit_id },
            DomainError::NotFound(message) => EngineError::UnitNotFound { message, unit_id },
            DomainError::Conflict(message) => EngineError::Conflict { message, unit_id },
            // A counter going negative after the preconditions passed means the
            // ledger already disagrees with the registry.
            DomainError::Consistency(message) | DomainError::InvariantViolation(message) => {
                EngineError::Consistency { message, unit_id }
            }
        }
    }
}

impl From<DomainError> for EngineError {
    fn from(value: DomainError) -> Self {
        UnitViolation::batch(value).into()
    }
}

fn parse_unit_id(raw: &str) -> Result<UnitId, EngineError> {
    UnitId::parse(raw).map_err(|e| UnitViolation::unit(raw, e).into())
}

/// Orchestrates every mutation of the inventory and serves its read queries.
pub struct TransactionEngine<S> {
    store: S,
}

impl<S> TransactionEngine<S>
where
    S: InventoryStore,
{
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Validate, lock, plan and apply one batch atomically.
    #[instrument(
        skip(self, request),
        fields(
            action = %request.action,
            unit_count = request.units.len(),
            transaction_id = tracing::field::Empty
        )
    )]
    pub async fn submit(&self, request: SubmitTransaction) -> Result<TransactionId, EngineError> {
        let batch = request.validate().inspect_err(|v| debug!(error = %v, "batch rejected"))?;

        let mut uow = self.store.begin().await?;
        match self.apply_batch(uow.as_mut(), &batch).await {
            Ok(transaction_id) => {
                uow.commit().await.inspect_err(|e| error!(error = %e, "commit failed"))?;
                Span::current().record("transaction_id", transaction_id.get());
                info!(transaction_id = transaction_id.get(), "transaction committed");
                Ok(transaction_id)
            }
            Err(err) => {
                abandon(uow, "submit", &err).await;
                Err(err)
            }
        }
    }

    async fn apply_batch(
        &self,
        uow: &mut dyn UnitOfWork,
        batch: &ValidatedBatch,
    ) -> Result<TransactionId, EngineError> {
        let unit_ids = batch.sorted_unit_ids();
        let units = uow.lock_units(&unit_ids).await?;

        let keys: Vec<SampleKey> = unit_ids
            .iter()
            .map(|id| id.sample_key().clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let samples = uow.lock_samples(&keys).await?;

        // Status failures outrank holder resolution, so only resolve once
        // every unit is present and in a state the action accepts.
        let resolution = if batch.action.resolves_holder() && all_accept(batch, &units) {
            let open = uow.open_details(&unit_ids).await?;
            Some(resolve_holders(&batch.unit_ids, &open)?)
        } else {
            None
        };

        // Stamp after every lock is held, so commit order and time order agree.
        let now = Utc::now();
        let mut plan = BatchPlan::build(batch, &units, &samples, resolution.as_ref(), now)?;

        let transaction_id = uow.insert_transaction(&plan.header).await?;
        plan.stamp(transaction_id);
        uow.close_details(&plan.close, plan.occurred_at).await?;
        uow.insert_details(transaction_id, &plan.details).await?;
        uow.update_units(&plan.units).await?;
        uow.update_samples(&plan.samples).await?;
        uow.append_audit(&plan.audit).await?;
        Ok(transaction_id)
    }

    /// Register new units of one sample, creating the sample if needed.
    ///
    /// Returns the sample after registration.
    #[instrument(
        skip(self, request),
        fields(sample_key = %request.sample_key, unit_count = request.unit_ids.len())
    )]
    pub async fn register_units(&self, request: RegisterUnits) -> Result<Sample, EngineError> {
        let registration = request.validate()?;

        let mut uow = self.store.begin().await?;
        match apply_registration(uow.as_mut(), &registration).await {
            Ok(sample) => {
                uow.commit().await?;
                info!(on_hand = sample.on_hand(), "units registered");
                Ok(sample)
            }
            Err(err) => {
                abandon(uow, "register_units", &err).await;
                Err(err)
            }
        }
    }

    /// Remove an `Available` unit from the registry.
    ///
    /// Returns the sample after removal.
    #[instrument(skip(self, actor, note), fields(unit_id = %unit_id))]
    pub async fn deregister_unit(
        &self,
        unit_id: &str,
        actor: Party,
        note: Option<String>,
    ) -> Result<Sample, EngineError> {
        let id = parse_unit_id(unit_id)?;
        if actor.name.trim().is_empty() {
            return Err(EngineError::validation("actor name is required"));
        }

        let mut uow = self.store.begin().await?;
        match apply_deregistration(uow.as_mut(), &id, &actor, note).await {
            Ok(sample) => {
                uow.commit().await?;
                info!(on_hand = sample.on_hand(), "unit removed");
                Ok(sample)
            }
            Err(err) => {
                abandon(uow, "deregister_unit", &err).await;
                Err(err)
            }
        }
    }

    pub async fn unit(&self, unit_id: &str) -> Result<Option<Unit>, EngineError> {
        let id = parse_unit_id(unit_id)?;
        Ok(self.store.unit(&id).await?)
    }

    pub async fn sample(&self, sample_key: &str) -> Result<Option<Sample>, EngineError> {
        let key = SampleKey::parse(sample_key)?;
        Ok(self.store.sample(&key).await?)
    }

    pub async fn transaction(&self, id: TransactionId) -> Result<Option<Transaction>, EngineError> {
        Ok(self.store.transaction(id).await?)
    }

    /// The open Borrow/Transfer/Export record of a unit, if it is out.
    pub async fn current_holder(&self, unit_id: &str) -> Result<Option<TransactionDetail>, EngineError> {
        let id = parse_unit_id(unit_id)?;
        let open = self.store.unit_open_details(&id).await?;
        Ok(current_holder_record(&id, &open).cloned())
    }

    /// Every unit currently held by `holder_name`, oldest first.
    pub async fn open_holdings(&self, holder_name: &str) -> Result<Vec<TransactionDetail>, EngineError> {
        if holder_name.trim().is_empty() {
            return Err(EngineError::validation("holder name is required"));
        }
        let mut records = self.store.open_holdings(holder_name).await?;
        records.sort_by_key(|r| (r.opened_at, r.id));
        Ok(records)
    }

    pub async fn audit_log(&self, filter: &AuditFilter, pagination: Pagination) -> Result<AuditPage, EngineError> {
        if let (Some(from), Some(to)) = (filter.from, filter.to) {
            if from > to {
                return Err(EngineError::validation("audit range starts after it ends"));
            }
        }
        Ok(self.store.audit_log(filter, pagination).await?)
    }
}

fn all_accept(batch: &ValidatedBatch, units: &[Unit]) -> bool {
    units.len() == batch.unit_ids.len() && units.iter().all(|u| batch.action.accepts(u.status()))
}

async fn apply_registration(
    uow: &mut dyn UnitOfWork,
    registration: &ValidatedRegistration,
) -> Result<Sample, EngineError> {
    let existing = uow.lock_units(&registration.unit_ids).await?;
    let sample = uow.lock_or_create_sample(&registration.sample_key).await?;
    let now = Utc::now();

    let plan = RegistrationPlan::build(registration, &existing, Some(&sample), now)?;
    uow.insert_units(&plan.units).await?;
    uow.update_samples(std::slice::from_ref(&plan.sample)).await?;
    uow.append_audit(&plan.audit).await?;
    Ok(plan.sample)
}

async fn apply_deregistration(
    uow: &mut dyn UnitOfWork,
    id: &UnitId,
    actor: &Party,
    note: Option<String>,
) -> Result<Sample, EngineError> {
    let unit = uow
        .lock_units(std::slice::from_ref(id))
        .await?
        .into_iter()
        .next()
        .ok_or_else(|| EngineError::UnitNotFound {
            message: format!("unit {id} is not registered"),
            unit_id: Some(id.to_string()),
        })?;
    let sample = uow
        .lock_samples(std::slice::from_ref(id.sample_key()))
        .await?
        .into_iter()
        .next()
        .ok_or_else(|| EngineError::Consistency {
            message: format!("unit {id} belongs to unknown sample {}", id.sample_key()),
            unit_id: Some(id.to_string()),
        })?;
    let now = Utc::now();

    let plan = DeregistrationPlan::build(&unit, &sample, actor, note, now)?;
    uow.delete_unit(&plan.unit_id).await?;
    uow.update_samples(std::slice::from_ref(&plan.sample)).await?;
    uow.append_audit(std::slice::from_ref(&plan.audit)).await?;
    Ok(plan.sample)
}

/// Roll back a failed unit of work and report why it failed.
async fn abandon(uow: Box<dyn UnitOfWork>, operation: &'static str, err: &EngineError) {
    if let Err(rollback) = uow.rollback().await {
        error!(operation, error = %rollback, "rollback failed");
    }

    let unit_id = err.offending_unit();
    match err {
        EngineError::Consistency { message, .. } => {
            error!(
                target: CONSISTENCY_TARGET,
                operation,
                unit_id,
                %message,
                "registry and ledger disagree"
            );
        }
        EngineError::Conflict { .. } => warn!(operation, unit_id, error = %err, "conflict"),
        EngineError::Store(e) if is_retryable(e) => warn!(operation, error = %e, "retryable storage failure"),
        EngineError::Store(e) => error!(operation, error = %e, "storage failure"),
        _ => debug!(operation, unit_id, error = %err, kind = err.kind(), "request refused"),
    }
}

