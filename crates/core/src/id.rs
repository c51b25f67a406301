//! Store-assigned identifiers.
//!
//! Transactions, transaction details and audit rows are numbered by the store
//! from monotonically increasing sequences. A larger id always means a later
//! insert, which the holder resolution relies on as its tie-breaker.

use core::str::FromStr;
use serde::{Deserialize, Serialize};

use crate::error::DomainError;

/// Identifier of a submitted transaction (one batch operation).
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransactionId(i64);

/// Identifier of one per-unit transaction detail row.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DetailId(i64);

/// Identifier of an audit log row.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AuditEntryId(i64);

macro_rules! impl_sequence_newtype {
    ($t:ty, $name:literal) => {
        impl $t {
            pub fn from_raw(value: i64) -> Self {
                Self(value)
            }

            pub fn get(&self) -> i64 {
                self.0
            }
        }

        impl core::fmt::Display for $t {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                core::fmt::Display::fmt(&self.0, f)
            }
        }

        impl From<$t> for i64 {
            fn from(value: $t) -> Self {
                value.0
            }
        }

        impl FromStr for $t {
            type Err = DomainError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let raw = s
                    .trim()
                    .parse::<i64>()
                    .map_err(|e| DomainError::validation(format!("{}: {}", $name, e)))?;
                if raw <= 0 {
                    return Err(DomainError::validation(format!(
                        "{}: must be positive, got {raw}",
                        $name
                    )));
                }
                Ok(Self(raw))
            }
        }
    };
}

impl_sequence_newtype!(TransactionId, "TransactionId");
impl_sequence_newtype!(DetailId, "DetailId");
impl_sequence_newtype!(AuditEntryId, "AuditEntryId");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_positive_ids() {
        let id: TransactionId = "42".parse().unwrap();
        assert_eq!(id.get(), 42);
        assert_eq!(id.to_string(), "42");
    }

    #[test]
    fn rejects_zero_and_garbage() {
        assert!("0".parse::<DetailId>().is_err());
        assert!("abc".parse::<AuditEntryId>().is_err());
    }

    #[test]
    fn ordering_follows_sequence() {
        assert!(TransactionId::from_raw(7) > TransactionId::from_raw(3));
    }
}
