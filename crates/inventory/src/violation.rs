use thiserror::Error;

use sampletrack_core::DomainError;

/// A domain error tied to the unit that caused it, when there is one.
///
/// Batch operations stop at the first offending unit; callers report its id
/// back so the user can fix exactly that line.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{error}")]
pub struct UnitViolation {
    pub unit_id: Option<String>,
    pub error: DomainError,
}

impl UnitViolation {
    pub fn batch(error: DomainError) -> Self {
        Self { unit_id: None, error }
    }

    pub fn unit(unit_id: impl Into<String>, error: DomainError) -> Self {
        Self {
            unit_id: Some(unit_id.into()),
            error,
        }
    }
}

impl From<DomainError> for UnitViolation {
    fn from(error: DomainError) -> Self {
        Self::batch(error)
    }
}
