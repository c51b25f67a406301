//! Audit log rows and the filters the reporting side queries them with.
//!
//! Rows are append-only: nothing in this workspace updates or deletes one.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use sampletrack_core::{AuditEntryId, TransactionId};

use crate::action::ActionType;
use crate::transaction::Party;
use crate::unit::{SampleKey, UnitId};

/// What happened to a unit.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AuditAction {
    Borrow,
    Return,
    Transfer,
    Export,
    Reject,
    Register,
    Deregister,
}

impl AuditAction {
    pub fn as_str(self) -> &'static str {
        match self {
            AuditAction::Borrow => "Borrow",
            AuditAction::Return => "Return",
            AuditAction::Transfer => "Transfer",
            AuditAction::Export => "Export",
            AuditAction::Reject => "Reject",
            AuditAction::Register => "Register",
            AuditAction::Deregister => "Deregister",
        }
    }
}

impl From<ActionType> for AuditAction {
    fn from(value: ActionType) -> Self {
        match value {
            ActionType::Borrow => AuditAction::Borrow,
            ActionType::Return => AuditAction::Return,
            ActionType::Transfer => AuditAction::Transfer,
            ActionType::Export => AuditAction::Export,
            ActionType::Reject => AuditAction::Reject,
        }
    }
}

impl core::fmt::Display for AuditAction {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl core::str::FromStr for AuditAction {
    type Err = sampletrack_core::DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        [
            AuditAction::Borrow,
            AuditAction::Return,
            AuditAction::Transfer,
            AuditAction::Export,
            AuditAction::Reject,
            AuditAction::Register,
            AuditAction::Deregister,
        ]
        .into_iter()
        .find(|a| a.as_str().eq_ignore_ascii_case(wanted))
        .ok_or_else(|| sampletrack_core::DomainError::validation(format!("unknown audit action '{wanted}'")))
    }
}

/// Immutable history row: one per unit per operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: AuditEntryId,
    /// `None` for registry maintenance (register / deregister).
    pub transaction_id: Option<TransactionId>,
    pub unit_id: UnitId,
    pub sample_key: SampleKey,
    pub action: AuditAction,
    pub quantity: i64,
    pub actor: Party,
    pub counterparty: Option<Party>,
    /// Holder whose record this operation closed (Return / Transfer).
    pub previous_holder: Option<Party>,
    pub reason_id: Option<i64>,
    pub note: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Audit row before the store assigns an id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewAuditEntry {
    pub transaction_id: Option<TransactionId>,
    pub unit_id: UnitId,
    pub action: AuditAction,
    pub quantity: i64,
    pub actor: Party,
    pub counterparty: Option<Party>,
    pub previous_holder: Option<Party>,
    pub reason_id: Option<i64>,
    pub note: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

impl NewAuditEntry {
    pub fn into_entry(self, id: AuditEntryId) -> AuditEntry {
        AuditEntry {
            id,
            transaction_id: self.transaction_id,
            sample_key: self.unit_id.sample_key().clone(),
            unit_id: self.unit_id,
            action: self.action,
            quantity: self.quantity,
            actor: self.actor,
            counterparty: self.counterparty,
            previous_holder: self.previous_holder,
            reason_id: self.reason_id,
            note: self.note,
            occurred_at: self.occurred_at,
        }
    }
}

/// Audit query filter. All fields are optional and combine with AND.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditFilter {
    pub sample_key: Option<SampleKey>,
    pub unit_id: Option<UnitId>,
    /// Inclusive lower bound on `occurred_at`.
    pub from: Option<DateTime<Utc>>,
    /// Inclusive upper bound on `occurred_at`.
    pub to: Option<DateTime<Utc>>,
    pub action: Option<AuditAction>,
}

impl AuditFilter {
    pub fn matches(&self, entry: &AuditEntry) -> bool {
        self.sample_key.as_ref().is_none_or(|k| *k == entry.sample_key)
            && self.unit_id.as_ref().is_none_or(|u| *u == entry.unit_id)
            && self.from.is_none_or(|from| entry.occurred_at >= from)
            && self.to.is_none_or(|to| entry.occurred_at <= to)
            && self.action.is_none_or(|a| a == entry.action)
    }
}

/// Pagination parameters for audit queries.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    pub limit: u32,
    pub offset: u32,
}

impl Pagination {
    pub const MAX_LIMIT: u32 = 1000;

    /// Clamp the limit into `1..=MAX_LIMIT`.
    pub fn new(limit: u32, offset: u32) -> Self {
        Self {
            limit: limit.clamp(1, Self::MAX_LIMIT),
            offset,
        }
    }
}

impl Default for Pagination {
    fn default() -> Self {
        Self { limit: 100, offset: 0 }
    }
}

/// One page of audit rows, newest first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditPage {
    pub entries: Vec<AuditEntry>,
    /// Rows matching the filter across all pages.
    pub total: u64,
    pub pagination: Pagination,
    pub has_more: bool,
}

impl AuditPage {
    /// Order, count and slice an unordered set of matching rows.
    pub fn from_matching(mut matching: Vec<AuditEntry>, pagination: Pagination) -> Self {
        matching.sort_by(|a, b| b.occurred_at.cmp(&a.occurred_at).then(b.id.cmp(&a.id)));
        let total = matching.len() as u64;
        let entries: Vec<AuditEntry> = matching
            .into_iter()
            .skip(pagination.offset as usize)
            .take(pagination.limit as usize)
            .collect();
        let has_more = total > u64::from(pagination.offset) + entries.len() as u64;
        Self {
            entries,
            total,
            pagination,
            has_more,
        }
    }
}
