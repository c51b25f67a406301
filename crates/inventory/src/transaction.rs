//! Transactions, their per-unit details, and request validation.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use sampletrack_core::{DetailId, DomainError, TransactionId, ValueObject};

use crate::action::ActionType;
use crate::unit::UnitId;
use crate::violation::UnitViolation;

/// A person acting on, or holding, units.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Party {
    pub name: String,
    #[serde(default)]
    pub department: Option<String>,
}

impl Party {
    pub fn new(name: impl Into<String>, department: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            department: Some(department.into()),
        }
    }

    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            department: None,
        }
    }

    /// Whether this party is the holder named on a record. Departments are
    /// compared only when the record carries one.
    pub fn is_holder(&self, holder: &Party) -> bool {
        self.name == holder.name
            && holder
                .department
                .as_ref()
                .is_none_or(|dept| self.department.as_ref() == Some(dept))
    }

    fn normalized(&self) -> Self {
        Self {
            name: self.name.trim().to_string(),
            department: self
                .department
                .as_deref()
                .map(str::trim)
                .filter(|d| !d.is_empty())
                .map(str::to_string),
        }
    }
}

impl core::fmt::Display for Party {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match &self.department {
            Some(dept) => write!(f, "{} ({})", self.name, dept),
            None => f.write_str(&self.name),
        }
    }
}

impl ValueObject for Party {}

/// One requested unit in a batch. Quantity is always 1 per unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitLine {
    pub unit_id: String,
    #[serde(default = "UnitLine::default_quantity")]
    pub quantity: i64,
}

impl UnitLine {
    pub fn new(unit_id: impl Into<String>) -> Self {
        Self {
            unit_id: unit_id.into(),
            quantity: 1,
        }
    }

    fn default_quantity() -> i64 {
        1
    }
}

/// Request to apply one action to a batch of units.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitTransaction {
    pub action: ActionType,
    pub actor: Party,
    #[serde(default)]
    pub counterparty: Option<Party>,
    #[serde(default)]
    pub reason_id: Option<i64>,
    #[serde(default)]
    pub note: Option<String>,
    /// Warehouse the units go back to (Return only).
    #[serde(default)]
    pub destination: Option<String>,
    pub units: Vec<UnitLine>,
}

/// A request whose fields and unit identifiers have been checked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedBatch {
    pub action: ActionType,
    pub actor: Party,
    pub counterparty: Option<Party>,
    pub reason_id: Option<i64>,
    pub note: Option<String>,
    pub destination: Option<String>,
    /// In request order, without duplicates.
    pub unit_ids: Vec<UnitId>,
}

impl ValidatedBatch {
    /// Unit ids in lock order.
    pub fn sorted_unit_ids(&self) -> Vec<UnitId> {
        let mut ids = self.unit_ids.clone();
        ids.sort();
        ids
    }
}

impl SubmitTransaction {
    /// Check everything that can be checked without touching storage.
    pub fn validate(&self) -> Result<ValidatedBatch, UnitViolation> {
        let action = self.action;

        if self.units.is_empty() {
            return Err(DomainError::validation("a transaction needs at least one unit").into());
        }

        let actor = self.actor.normalized();
        if actor.name.is_empty() {
            return Err(DomainError::validation("actor name is required").into());
        }
        if actor.department.is_none() {
            return Err(DomainError::validation("actor department is required").into());
        }

        let counterparty = self
            .counterparty
            .as_ref()
            .map(Party::normalized)
            .filter(|p| !p.name.is_empty());
        if action.requires_counterparty() && counterparty.is_none() {
            return Err(DomainError::validation(format!("{action} requires a counterparty name")).into());
        }
        if action.requires_counterparty_department()
            && counterparty.as_ref().is_some_and(|p| p.department.is_none())
        {
            return Err(
                DomainError::validation(format!("{action} requires a counterparty department")).into(),
            );
        }

        if action.requires_reason() && self.reason_id.is_none() {
            return Err(DomainError::validation(format!("{action} requires an operation reason")).into());
        }

        let destination = self
            .destination
            .as_deref()
            .map(str::trim)
            .filter(|d| !d.is_empty())
            .map(str::to_string);
        if action.requires_destination() && destination.is_none() {
            return Err(DomainError::precondition(format!("{action} requires a destination location")).into());
        }

        let mut seen = HashSet::with_capacity(self.units.len());
        let mut unit_ids = Vec::with_capacity(self.units.len());
        for line in &self.units {
            let id = UnitId::parse(&line.unit_id)
                .map_err(|e| UnitViolation::unit(line.unit_id.trim(), e))?;
            if line.quantity != 1 {
                return Err(UnitViolation::unit(
                    id.as_str(),
                    DomainError::validation(format!("quantity must be 1 per unit, got {}", line.quantity)),
                ));
            }
            if !seen.insert(id.clone()) {
                return Err(UnitViolation::unit(
                    id.as_str(),
                    DomainError::validation("unit appears more than once in the batch"),
                ));
            }
            unit_ids.push(id);
        }

        Ok(ValidatedBatch {
            action,
            actor,
            counterparty,
            reason_id: self.reason_id,
            note: self.note.as_deref().map(str::trim).filter(|n| !n.is_empty()).map(str::to_string),
            destination,
            unit_ids,
        })
    }
}

/// Transaction header, as stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub id: TransactionId,
    pub action: ActionType,
    pub actor: Party,
    pub counterparty: Option<Party>,
    pub reason_id: Option<i64>,
    pub note: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Transaction header before the store assigns an id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTransaction {
    pub action: ActionType,
    pub actor: Party,
    pub counterparty: Option<Party>,
    pub reason_id: Option<i64>,
    pub note: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

impl NewTransaction {
    pub fn into_record(self, id: TransactionId) -> TransactionRecord {
        TransactionRecord {
            id,
            action: self.action,
            actor: self.actor,
            counterparty: self.counterparty,
            reason_id: self.reason_id,
            note: self.note,
            occurred_at: self.occurred_at,
        }
    }
}

/// One unit's line in a transaction.
///
/// A Borrow/Transfer/Export detail with `closed_at == None` is the unit's
/// holder record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionDetail {
    pub id: DetailId,
    pub transaction_id: TransactionId,
    pub unit_id: UnitId,
    pub action: ActionType,
    pub holder: Option<Party>,
    pub quantity: i64,
    pub opened_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
    /// Detail this one superseded (Transfer) or closed (Return).
    pub predecessor: Option<DetailId>,
}

impl TransactionDetail {
    pub fn is_open_holder_record(&self) -> bool {
        self.closed_at.is_none() && self.action.opens_holder_record()
    }
}

/// Detail row before the store assigns ids.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewDetail {
    pub unit_id: UnitId,
    pub action: ActionType,
    pub holder: Option<Party>,
    pub quantity: i64,
    pub opened_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
    pub predecessor: Option<DetailId>,
}

impl NewDetail {
    pub fn into_detail(self, id: DetailId, transaction_id: TransactionId) -> TransactionDetail {
        TransactionDetail {
            id,
            transaction_id,
            unit_id: self.unit_id,
            action: self.action,
            holder: self.holder,
            quantity: self.quantity,
            opened_at: self.opened_at,
            closed_at: self.closed_at,
            predecessor: self.predecessor,
        }
    }
}

/// A transaction header together with its details.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    #[serde(flatten)]
    pub header: TransactionRecord,
    pub details: Vec<TransactionDetail>,
}
