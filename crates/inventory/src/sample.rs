use serde::{Deserialize, Serialize};

use sampletrack_core::{DomainError, DomainResult, Entity};

use crate::action::ActionType;
use crate::unit::{SampleKey, UnitStatus};

/// Informational availability of a sample type.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SampleState {
    Available,
    Unavailable,
    /// Every unit still counted for the sample has been exported.
    Exported,
}

/// Aggregate Inventory Ledger row: per-sample counts derived from unit events.
///
/// `on_hand + borrowed + exported + rejected` always equals the number of
/// units registered for the sample (minus deleted ones); every field stays >= 0.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sample {
    key: SampleKey,
    on_hand: i64,
    borrowed: i64,
    exported: i64,
    rejected: i64,
}

/// Signed change to a sample's counters.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuantityDelta {
    pub on_hand: i64,
    pub borrowed: i64,
    pub exported: i64,
    pub rejected: i64,
}

impl QuantityDelta {
    /// Delta for `n` units of one sample going through `action` from `prior`.
    pub fn for_action(action: ActionType, prior: UnitStatus, n: i64) -> DomainResult<Self> {
        let delta = match (action, prior) {
            (ActionType::Borrow, _) => Self { on_hand: -n, borrowed: n, ..Self::default() },
            (ActionType::Export, _) => Self { on_hand: -n, exported: n, ..Self::default() },
            (ActionType::Reject, _) => Self { on_hand: -n, rejected: n, ..Self::default() },
            (ActionType::Transfer, _) => Self::default(),
            (ActionType::Return, UnitStatus::Borrowed) => {
                Self { on_hand: n, borrowed: -n, ..Self::default() }
            }
            (ActionType::Return, UnitStatus::Exported) => {
                Self { on_hand: n, exported: -n, ..Self::default() }
            }
            (ActionType::Return, other) => {
                return Err(DomainError::precondition(format!(
                    "cannot return a unit that is {other}"
                )));
            }
        };
        Ok(delta)
    }

    pub fn registered(n: i64) -> Self {
        Self { on_hand: n, ..Self::default() }
    }

    pub fn deregistered(n: i64) -> Self {
        Self { on_hand: -n, ..Self::default() }
    }

    pub fn is_zero(&self) -> bool {
        *self == Self::default()
    }

    /// Net change to the total unit count. Zero for every transaction.
    pub fn net(&self) -> i64 {
        self.on_hand + self.borrowed + self.exported + self.rejected
    }
}

impl core::ops::Add for QuantityDelta {
    type Output = QuantityDelta;

    fn add(self, rhs: Self) -> Self::Output {
        Self {
            on_hand: self.on_hand + rhs.on_hand,
            borrowed: self.borrowed + rhs.borrowed,
            exported: self.exported + rhs.exported,
            rejected: self.rejected + rhs.rejected,
        }
    }
}

impl core::ops::AddAssign for QuantityDelta {
    fn add_assign(&mut self, rhs: Self) {
        *self = *self + rhs;
    }
}

impl Sample {
    /// A sample with no units registered yet.
    pub fn empty(key: SampleKey) -> Self {
        Self {
            key,
            on_hand: 0,
            borrowed: 0,
            exported: 0,
            rejected: 0,
        }
    }

    /// Rebuild a sample from stored counters. Negative counters are drift.
    pub fn from_parts(
        key: SampleKey,
        on_hand: i64,
        borrowed: i64,
        exported: i64,
        rejected: i64,
    ) -> DomainResult<Self> {
        let sample = Self {
            key,
            on_hand,
            borrowed,
            exported,
            rejected,
        };
        if let Some(field) = sample.first_negative() {
            return Err(DomainError::consistency(format!(
                "sample {} has negative {field}",
                sample.key
            )));
        }
        Ok(sample)
    }

    pub fn key(&self) -> &SampleKey {
        &self.key
    }

    pub fn on_hand(&self) -> i64 {
        self.on_hand
    }

    pub fn borrowed(&self) -> i64 {
        self.borrowed
    }

    pub fn exported(&self) -> i64 {
        self.exported
    }

    pub fn rejected(&self) -> i64 {
        self.rejected
    }

    /// Number of units currently registered for this sample.
    pub fn total(&self) -> i64 {
        self.on_hand + self.borrowed + self.exported + self.rejected
    }

    pub fn state(&self) -> SampleState {
        if self.on_hand > 0 {
            SampleState::Available
        } else if self.exported > 0 && self.exported + self.rejected == self.total() {
            SampleState::Exported
        } else {
            SampleState::Unavailable
        }
    }

    /// Apply a counter delta, failing if any counter would go negative.
    ///
    /// Should be unreachable behind the engine's preconditions; a failure here
    /// means another writer got past the row locks.
    pub fn apply_delta(&self, delta: QuantityDelta) -> DomainResult<Self> {
        let next = Self {
            key: self.key.clone(),
            on_hand: self.on_hand + delta.on_hand,
            borrowed: self.borrowed + delta.borrowed,
            exported: self.exported + delta.exported,
            rejected: self.rejected + delta.rejected,
        };
        if let Some(field) = next.first_negative() {
            return Err(DomainError::invariant(format!(
                "sample {} {field} cannot go negative (delta {delta:?})",
                self.key
            )));
        }
        Ok(next)
    }

    fn first_negative(&self) -> Option<&'static str> {
        [
            ("quantity_on_hand", self.on_hand),
            ("borrowed_quantity", self.borrowed),
            ("exported_quantity", self.exported),
            ("rejected_quantity", self.rejected),
        ]
        .into_iter()
        .find(|(_, v)| *v < 0)
        .map(|(name, _)| name)
    }
}

impl Entity for Sample {
    type Id = SampleKey;

    fn id(&self) -> &Self::Id {
        &self.key
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn key() -> SampleKey {
        SampleKey::parse("A-1").unwrap()
    }

    fn stocked(n: i64) -> Sample {
        Sample::empty(key()).apply_delta(QuantityDelta::registered(n)).unwrap()
    }

    #[test]
    fn borrow_moves_on_hand_to_borrowed() {
        let delta = QuantityDelta::for_action(ActionType::Borrow, UnitStatus::Available, 1).unwrap();
        let s = stocked(10).apply_delta(delta).unwrap();
        assert_eq!((s.on_hand(), s.borrowed()), (9, 1));
    }

    #[test]
    fn return_credits_the_bucket_it_came_from() {
        let out = QuantityDelta::for_action(ActionType::Export, UnitStatus::Available, 2).unwrap();
        let back = QuantityDelta::for_action(ActionType::Return, UnitStatus::Exported, 2).unwrap();
        let s = stocked(5).apply_delta(out).unwrap().apply_delta(back).unwrap();
        assert_eq!((s.on_hand(), s.exported(), s.borrowed()), (5, 0, 0));
    }

    #[test]
    fn reject_decrements_on_hand() {
        let delta = QuantityDelta::for_action(ActionType::Reject, UnitStatus::Available, 1).unwrap();
        let s = stocked(3).apply_delta(delta).unwrap();
        assert_eq!((s.on_hand(), s.rejected()), (2, 1));
    }

    #[test]
    fn transfer_has_no_quantity_effect() {
        let delta = QuantityDelta::for_action(ActionType::Transfer, UnitStatus::Borrowed, 4).unwrap();
        assert!(delta.is_zero());
    }

    #[test]
    fn negative_result_is_rejected() {
        let delta = QuantityDelta::for_action(ActionType::Borrow, UnitStatus::Available, 2).unwrap();
        let err = stocked(1).apply_delta(delta).unwrap_err();
        assert!(matches!(err, DomainError::InvariantViolation(msg) if msg.contains("quantity_on_hand")));
    }

    #[test]
    fn state_follows_counters() {
        assert_eq!(stocked(1).state(), SampleState::Available);
        assert_eq!(Sample::empty(key()).state(), SampleState::Unavailable);

        let export = QuantityDelta::for_action(ActionType::Export, UnitStatus::Available, 2).unwrap();
        assert_eq!(stocked(2).apply_delta(export).unwrap().state(), SampleState::Exported);

        let borrow = QuantityDelta::for_action(ActionType::Borrow, UnitStatus::Available, 2).unwrap();
        assert_eq!(stocked(2).apply_delta(borrow).unwrap().state(), SampleState::Unavailable);
    }

    #[test]
    fn stored_negative_counters_are_drift() {
        assert!(matches!(
            Sample::from_parts(key(), 1, -1, 0, 0),
            Err(DomainError::Consistency(_))
        ));
    }

    fn action_strategy() -> impl Strategy<Value = (ActionType, UnitStatus)> {
        prop_oneof![
            Just((ActionType::Borrow, UnitStatus::Available)),
            Just((ActionType::Export, UnitStatus::Available)),
            Just((ActionType::Reject, UnitStatus::Available)),
            Just((ActionType::Transfer, UnitStatus::Borrowed)),
            Just((ActionType::Return, UnitStatus::Borrowed)),
            Just((ActionType::Return, UnitStatus::Exported)),
        ]
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            ..ProptestConfig::default()
        })]

        /// Property: transaction deltas never change the total; any delta that
        /// is accepted leaves every counter non-negative.
        #[test]
        fn transaction_deltas_conserve_total(
            registered in 0i64..50,
            steps in prop::collection::vec((action_strategy(), 1i64..5), 0..40)
        ) {
            let mut sample = stocked(registered);
            for ((action, prior), n) in steps {
                let delta = QuantityDelta::for_action(action, prior, n).unwrap();
                prop_assert_eq!(delta.net(), 0);
                if let Ok(next) = sample.apply_delta(delta) {
                    sample = next;
                }
                prop_assert_eq!(sample.total(), registered);
                prop_assert!(sample.on_hand() >= 0 && sample.borrowed() >= 0);
                prop_assert!(sample.exported() >= 0 && sample.rejected() >= 0);
            }
        }
    }
}
