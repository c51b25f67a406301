//! Batch planning: turn a validated request plus the locked rows it touches
//! into the complete set of writes, or the first reason it must be refused.
//!
//! Planning is pure. The store applies a plan inside the same unit of work
//! that locked the rows, so a plan never outlives the state it was built from.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use sampletrack_core::{DetailId, DomainError, TransactionId, index_by_id};

use crate::action::ActionType;
use crate::audit::NewAuditEntry;
use crate::resolver::HolderResolution;
use crate::sample::{QuantityDelta, Sample};
use crate::transaction::{NewDetail, NewTransaction, ValidatedBatch};
use crate::unit::{SampleKey, Unit, UnitId};
use crate::violation::UnitViolation;

/// Every write one transaction performs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchPlan {
    pub header: NewTransaction,
    /// Next state of each unit, in request order.
    pub units: Vec<Unit>,
    /// Next state of each sample whose counters change, ordered by key.
    pub samples: Vec<Sample>,
    /// Holder records closed by this transaction.
    pub close: Vec<DetailId>,
    pub details: Vec<NewDetail>,
    pub audit: Vec<NewAuditEntry>,
    pub occurred_at: DateTime<Utc>,
}

impl BatchPlan {
    /// Build the plan for `batch`.
    ///
    /// `units` and `samples` are the locked current rows; `resolution` must be
    /// present for Return/Transfer. Checks run batch-wide in this order:
    /// unit existence, unit status, holder resolution, returner identity, on-hand sufficiency.
    pub fn build(
        batch: &ValidatedBatch,
        units: &[Unit],
        samples: &[Sample],
        resolution: Option<&HolderResolution>,
        now: DateTime<Utc>,
    ) -> Result<Self, UnitViolation> {
        let action = batch.action;
        let units_by_id = index_by_id(units);
        let samples_by_key = index_by_id(samples);

        let mut current = Vec::with_capacity(batch.unit_ids.len());
        for id in &batch.unit_ids {
            let unit = units_by_id.get(id).copied().ok_or_else(|| {
                UnitViolation::unit(id.as_str(), DomainError::not_found(format!("unit {id} is not registered")))
            })?;
            current.push(unit);
        }

        let next_units = current
            .iter()
            .map(|u| {
                u.transition(action, batch.destination.as_deref())
                    .map_err(|e| UnitViolation::unit(u.id_typed().as_str(), e))
            })
            .collect::<Result<Vec<_>, _>>()?;

        // Per sample: units requested and the first of them, for error reporting.
        let mut per_sample: BTreeMap<&SampleKey, (i64, &UnitId)> = BTreeMap::new();
        for unit in &current {
            per_sample
                .entry(unit.sample_key())
                .and_modify(|(n, _)| *n += 1)
                .or_insert((1, unit.id_typed()));
        }

        let lookup_sample = |key: &SampleKey, first: &UnitId| {
            samples_by_key.get(key).copied().ok_or_else(|| {
                UnitViolation::unit(
                    first.as_str(),
                    DomainError::consistency(format!("unit {first} belongs to unknown sample {key}")),
                )
            })
        };

        if action.consumes_on_hand() {
            for (key, (n, first)) in &per_sample {
                let sample = lookup_sample(*key, *first)?;
                if sample.on_hand() < *n {
                    return Err(UnitViolation::unit(
                        first.as_str(),
                        DomainError::precondition(format!(
                            "quantity insufficient: sample {key} has {} on hand, batch needs {n}",
                            sample.on_hand()
                        )),
                    ));
                }
            }
        }

        let resolution = if action.resolves_holder() {
            Some(resolution.ok_or_else(|| {
                UnitViolation::batch(DomainError::consistency(format!(
                    "{action} planned without resolved holder records"
                )))
            })?)
        } else {
            None
        };

        // Only the current holder can hand units back.
        if let (ActionType::Return, Some(resolved), Some(returner)) =
            (action, resolution, batch.counterparty.as_ref())
        {
            if !returner.is_holder(&resolved.holder) {
                return Err(UnitViolation::unit(
                    batch.unit_ids[0].as_str(),
                    DomainError::conflict(format!(
                        "units are held by {}, not {returner}",
                        resolved.holder
                    )),
                ));
            }
        }

        let mut deltas: BTreeMap<&SampleKey, QuantityDelta> = BTreeMap::new();
        for unit in &current {
            let delta = QuantityDelta::for_action(action, unit.status(), 1)
                .map_err(|e| UnitViolation::unit(unit.id_typed().as_str(), e))?;
            *deltas.entry(unit.sample_key()).or_default() += delta;
        }

        let mut next_samples = Vec::with_capacity(deltas.len());
        for (key, delta) in deltas {
            if delta.is_zero() {
                continue;
            }
            let first = per_sample.get(key).map(|(_, u)| *u).unwrap_or(&batch.unit_ids[0]);
            let sample = lookup_sample(key, first)?;
            let next = sample
                .apply_delta(delta)
                .map_err(|e| UnitViolation::unit(first.as_str(), e))?;
            next_samples.push(next);
        }

        let mut close = Vec::new();
        let mut details = Vec::with_capacity(current.len());
        let mut audit = Vec::with_capacity(current.len());
        for unit in &current {
            let prior = resolution.and_then(|r| r.record(unit.id_typed()));
            if let Some(record) = prior {
                close.push(record.id);
            }
            let previous_holder = prior.and_then(|r| r.holder.clone());

            let holder = match action {
                ActionType::Borrow | ActionType::Export | ActionType::Transfer => batch.counterparty.clone(),
                ActionType::Return => previous_holder.clone(),
                ActionType::Reject => None,
            };

            details.push(NewDetail {
                unit_id: unit.id_typed().clone(),
                action,
                holder,
                quantity: 1,
                opened_at: now,
                closed_at: if action.opens_holder_record() { None } else { Some(now) },
                predecessor: prior.map(|r| r.id),
            });

            audit.push(NewAuditEntry {
                transaction_id: None,
                unit_id: unit.id_typed().clone(),
                action: action.into(),
                quantity: 1,
                actor: batch.actor.clone(),
                counterparty: batch.counterparty.clone(),
                previous_holder,
                reason_id: batch.reason_id,
                note: batch.note.clone(),
                occurred_at: now,
            });
        }

        Ok(Self {
            header: NewTransaction {
                action,
                actor: batch.actor.clone(),
                counterparty: batch.counterparty.clone(),
                reason_id: batch.reason_id,
                note: batch.note.clone(),
                occurred_at: now,
            },
            units: next_units,
            samples: next_samples,
            close,
            details,
            audit,
            occurred_at: now,
        })
    }

    /// Attach the store-assigned transaction id to the audit rows.
    pub fn stamp(&mut self, transaction_id: TransactionId) {
        for entry in &mut self.audit {
            entry.transaction_id = Some(transaction_id);
        }
    }
}
