//! Sample inventory domain (pure, no IO).
//!
//! Business rules for QR-coded sample units: the status transition table,
//! per-sample counters, transaction validation, holder resolution for
//! returns and transfers, and the batch planner that turns a request plus
//! the locked rows into the full set of writes.

pub mod action;
pub mod audit;
pub mod plan;
pub mod registration;
pub mod resolver;
pub mod sample;
pub mod transaction;
pub mod unit;
pub mod violation;

pub use action::ActionType;
pub use audit::{AuditAction, AuditEntry, AuditFilter, AuditPage, NewAuditEntry, Pagination};
pub use plan::BatchPlan;
pub use registration::{DeregistrationPlan, RegisterUnits, RegistrationPlan, ValidatedRegistration};
pub use resolver::{current_holder_record, resolve_holders, HolderResolution};
pub use sample::{QuantityDelta, Sample, SampleState};
pub use transaction::{
    NewDetail, NewTransaction, Party, SubmitTransaction, Transaction, TransactionDetail,
    TransactionRecord, UnitLine, ValidatedBatch,
};
pub use unit::{SampleKey, Unit, UnitId, UnitStatus};
pub use violation::UnitViolation;
