//! Adding units to, and removing units from, the registry.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use sampletrack_core::DomainError;

use crate::audit::{AuditAction, NewAuditEntry};
use crate::sample::{QuantityDelta, Sample};
use crate::transaction::Party;
use crate::unit::{SampleKey, Unit, UnitId, UnitStatus};
use crate::violation::UnitViolation;

/// Request to register new units of one sample at a warehouse.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterUnits {
    pub sample_key: String,
    pub unit_ids: Vec<String>,
    pub location: String,
    pub actor: Party,
    #[serde(default)]
    pub note: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedRegistration {
    pub sample_key: SampleKey,
    pub unit_ids: Vec<UnitId>,
    pub location: String,
    pub actor: Party,
    pub note: Option<String>,
}

impl RegisterUnits {
    pub fn validate(&self) -> Result<ValidatedRegistration, UnitViolation> {
        let sample_key = SampleKey::parse(&self.sample_key)?;
        if self.unit_ids.is_empty() {
            return Err(DomainError::validation("registration needs at least one unit").into());
        }
        if self.actor.name.trim().is_empty() {
            return Err(DomainError::validation("actor name is required").into());
        }
        let location = self.location.trim();
        if location.is_empty() {
            return Err(DomainError::validation("location is required").into());
        }

        let mut seen = HashSet::with_capacity(self.unit_ids.len());
        let mut unit_ids = Vec::with_capacity(self.unit_ids.len());
        for raw in &self.unit_ids {
            let id = UnitId::parse(raw).map_err(|e| UnitViolation::unit(raw.trim(), e))?;
            if *id.sample_key() != sample_key {
                return Err(UnitViolation::unit(
                    id.as_str(),
                    DomainError::validation(format!("unit {id} does not belong to sample {sample_key}")),
                ));
            }
            if !seen.insert(id.clone()) {
                return Err(UnitViolation::unit(
                    id.as_str(),
                    DomainError::validation("unit appears more than once in the registration"),
                ));
            }
            unit_ids.push(id);
        }
        unit_ids.sort();

        Ok(ValidatedRegistration {
            sample_key,
            unit_ids,
            location: location.to_string(),
            actor: self.actor.clone(),
            note: self.note.clone(),
        })
    }
}

/// Writes performed by a registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistrationPlan {
    pub units: Vec<Unit>,
    pub sample: Sample,
    pub audit: Vec<NewAuditEntry>,
}

impl RegistrationPlan {
    /// `existing` are the locked registry rows for the requested ids (any
    /// hit is a duplicate); `sample` the locked aggregate row, if there is one.
    pub fn build(
        reg: &ValidatedRegistration,
        existing: &[Unit],
        sample: Option<&Sample>,
        now: DateTime<Utc>,
    ) -> Result<Self, UnitViolation> {
        if let Some(dup) = existing.first() {
            return Err(UnitViolation::unit(
                dup.id_typed().as_str(),
                DomainError::conflict(format!("unit {} is already registered", dup.id_typed())),
            ));
        }

        let units = reg
            .unit_ids
            .iter()
            .map(|id| Unit::register(id.clone(), &reg.location))
            .collect::<Result<Vec<_>, _>>()?;

        let base = sample.cloned().unwrap_or_else(|| Sample::empty(reg.sample_key.clone()));
        let next = base.apply_delta(QuantityDelta::registered(units.len() as i64))?;

        let audit = units
            .iter()
            .map(|u| NewAuditEntry {
                transaction_id: None,
                unit_id: u.id_typed().clone(),
                action: AuditAction::Register,
                quantity: 1,
                actor: reg.actor.clone(),
                counterparty: None,
                previous_holder: None,
                reason_id: None,
                note: reg.note.clone(),
                occurred_at: now,
            })
            .collect();

        Ok(Self {
            units,
            sample: next,
            audit,
        })
    }
}

/// Writes performed when a unit is removed from the registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeregistrationPlan {
    pub unit_id: UnitId,
    pub sample: Sample,
    pub audit: NewAuditEntry,
}

impl DeregistrationPlan {
    /// Only units on the shelf can be removed; the sample loses one on-hand unit.
    pub fn build(
        unit: &Unit,
        sample: &Sample,
        actor: &Party,
        note: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<Self, UnitViolation> {
        let id = unit.id_typed();
        if unit.status() != UnitStatus::Available {
            return Err(UnitViolation::unit(
                id.as_str(),
                DomainError::precondition(format!(
                    "unit {id} is {}; only Available units can be removed",
                    unit.status()
                )),
            ));
        }
        let next = sample
            .apply_delta(QuantityDelta::deregistered(1))
            .map_err(|e| UnitViolation::unit(id.as_str(), e))?;

        Ok(Self {
            unit_id: id.clone(),
            sample: next,
            audit: NewAuditEntry {
                transaction_id: None,
                unit_id: id.clone(),
                action: AuditAction::Deregister,
                quantity: 1,
                actor: actor.clone(),
                counterparty: None,
                previous_holder: None,
                reason_id: None,
                note,
                occurred_at: now,
            },
        })
    }
}
