//! Transaction action types and the unit status precondition table.

use core::str::FromStr;
use serde::{Deserialize, Serialize};

use sampletrack_core::DomainError;

use crate::unit::UnitStatus;

/// Kind of batch operation a user submits.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ActionType {
    Borrow,
    Return,
    Transfer,
    Export,
    Reject,
}

/// Status every unit must currently hold for an action to be accepted.
///
/// This is the only place unit status preconditions are defined; callers go
/// through [`ActionType::required_statuses`] / [`ActionType::accepts`].
const STATUS_PRECONDITIONS: [(ActionType, &[UnitStatus]); 5] = [
    (ActionType::Borrow, &[UnitStatus::Available]),
    (ActionType::Export, &[UnitStatus::Available]),
    (ActionType::Reject, &[UnitStatus::Available]),
    (ActionType::Transfer, &[UnitStatus::Borrowed]),
    (ActionType::Return, &[UnitStatus::Borrowed, UnitStatus::Exported]),
];

impl ActionType {
    pub const ALL: [ActionType; 5] = [
        ActionType::Borrow,
        ActionType::Return,
        ActionType::Transfer,
        ActionType::Export,
        ActionType::Reject,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ActionType::Borrow => "Borrow",
            ActionType::Return => "Return",
            ActionType::Transfer => "Transfer",
            ActionType::Export => "Export",
            ActionType::Reject => "Reject",
        }
    }

    /// Statuses from which this action may be applied to a unit.
    pub fn required_statuses(self) -> &'static [UnitStatus] {
        STATUS_PRECONDITIONS
            .iter()
            .find(|(action, _)| *action == self)
            .map(|(_, statuses)| *statuses)
            .unwrap_or(&[])
    }

    pub fn accepts(self, current: UnitStatus) -> bool {
        self.required_statuses().contains(&current)
    }

    /// Status a unit ends up in after this action.
    pub fn target_status(self) -> UnitStatus {
        match self {
            ActionType::Borrow | ActionType::Transfer => UnitStatus::Borrowed,
            ActionType::Export => UnitStatus::Exported,
            ActionType::Reject => UnitStatus::Rejected,
            ActionType::Return => UnitStatus::Available,
        }
    }

    /// Details written by this action identify who currently holds the unit.
    pub fn opens_holder_record(self) -> bool {
        matches!(self, ActionType::Borrow | ActionType::Transfer | ActionType::Export)
    }

    /// The action must locate and close the unit's current holder record.
    pub fn resolves_holder(self) -> bool {
        matches!(self, ActionType::Return | ActionType::Transfer)
    }

    /// Units leave on-hand stock.
    pub fn consumes_on_hand(self) -> bool {
        matches!(self, ActionType::Borrow | ActionType::Export | ActionType::Reject)
    }

    pub fn requires_counterparty(self) -> bool {
        !matches!(self, ActionType::Reject)
    }

    pub fn requires_counterparty_department(self) -> bool {
        matches!(self, ActionType::Borrow | ActionType::Return | ActionType::Transfer)
    }

    pub fn requires_reason(self) -> bool {
        matches!(self, ActionType::Export | ActionType::Reject)
    }

    pub fn requires_destination(self) -> bool {
        matches!(self, ActionType::Return)
    }
}

impl core::fmt::Display for ActionType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActionType {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        ActionType::ALL
            .into_iter()
            .find(|a| a.as_str().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| DomainError::validation(format!("unknown action type '{wanted}'")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn precondition_table_matches_lifecycle() {
        assert!(ActionType::Borrow.accepts(UnitStatus::Available));
        assert!(!ActionType::Borrow.accepts(UnitStatus::Borrowed));
        assert!(ActionType::Transfer.accepts(UnitStatus::Borrowed));
        assert!(!ActionType::Transfer.accepts(UnitStatus::Exported));
        assert!(ActionType::Return.accepts(UnitStatus::Borrowed));
        assert!(ActionType::Return.accepts(UnitStatus::Exported));
        assert!(!ActionType::Return.accepts(UnitStatus::Rejected));
        for action in [ActionType::Borrow, ActionType::Export, ActionType::Reject] {
            assert!(!action.accepts(UnitStatus::Rejected));
        }
    }

    #[test]
    fn every_action_has_a_precondition_row() {
        for action in ActionType::ALL {
            assert!(!action.required_statuses().is_empty(), "{action} has no row");
        }
    }

    #[test]
    fn parses_case_insensitively() {
        assert_eq!("borrow".parse::<ActionType>().unwrap(), ActionType::Borrow);
        assert_eq!(" Transfer ".parse::<ActionType>().unwrap(), ActionType::Transfer);
        assert!("lend".parse::<ActionType>().is_err());
    }
}
