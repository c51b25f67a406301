//! Return/Transfer resolution: find the open holder record each unit must close.

use std::collections::BTreeMap;

use sampletrack_core::DomainError;

use crate::transaction::{Party, TransactionDetail};
use crate::unit::UnitId;
use crate::violation::UnitViolation;

/// Outcome of resolving a Return/Transfer batch: one shared holder, one open
/// record per unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HolderResolution {
    pub holder: Party,
    pub records: BTreeMap<UnitId, TransactionDetail>,
}

impl HolderResolution {
    pub fn record(&self, unit_id: &UnitId) -> Option<&TransactionDetail> {
        self.records.get(unit_id)
    }
}

/// Most recent open holder record of one unit, among `candidates`.
///
/// Newest `opened_at` wins; ties go to the larger transaction id.
pub fn current_holder_record<'a>(
    unit_id: &UnitId,
    candidates: impl IntoIterator<Item = &'a TransactionDetail>,
) -> Option<&'a TransactionDetail> {
    candidates
        .into_iter()
        .filter(|d| d.unit_id == *unit_id && d.is_open_holder_record())
        .max_by(|a, b| {
            a.opened_at
                .cmp(&b.opened_at)
                .then(a.transaction_id.cmp(&b.transaction_id))
                .then(a.id.cmp(&b.id))
        })
}

/// Resolve the holder of every unit in a Return/Transfer batch.
///
/// `open_details` is the single bulk lookup of open details for the whole
/// batch. Fails on the first unit without an open record (registry/ledger
/// drift) or whose holder differs from the first unit's holder.
pub fn resolve_holders(
    unit_ids: &[UnitId],
    open_details: &[TransactionDetail],
) -> Result<HolderResolution, UnitViolation> {
    let mut records = BTreeMap::new();
    let mut holder: Option<(Party, &UnitId)> = None;

    for unit_id in unit_ids {
        let record = current_holder_record(unit_id, open_details).ok_or_else(|| {
            UnitViolation::unit(
                unit_id.as_str(),
                DomainError::consistency(format!(
                    "unit {unit_id} is out but has no open borrow/transfer/export record"
                )),
            )
        })?;

        let record_holder = record.holder.clone().ok_or_else(|| {
            UnitViolation::unit(
                unit_id.as_str(),
                DomainError::consistency(format!(
                    "open record {} of unit {unit_id} names no holder",
                    record.id
                )),
            )
        })?;

        if let Some((first, first_unit)) = &holder {
            if *first != record_holder {
                return Err(UnitViolation::unit(
                    unit_id.as_str(),
                    DomainError::conflict(format!(
                        "batch spans multiple holders: {first_unit} is held by {first}, \
                         {unit_id} is held by {record_holder}"
                    )),
                ));
            }
        } else {
            holder = Some((record_holder, unit_id));
        }

        records.insert(unit_id.clone(), record.clone());
    }

    let (holder, _) = holder.ok_or_else(|| {
        UnitViolation::batch(DomainError::validation("nothing to resolve: empty batch"))
    })?;

    Ok(HolderResolution { holder, records })
}
