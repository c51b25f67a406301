use core::str::FromStr;
use serde::{Deserialize, Serialize};

use sampletrack_core::{DomainError, DomainResult, Entity, ValueObject};

use crate::action::ActionType;

/// Key of a sample type (one item/article/round combination).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SampleKey(String);

impl SampleKey {
    pub fn parse(raw: &str) -> DomainResult<Self> {
        let key = raw.trim();
        if key.is_empty() {
            return Err(DomainError::validation("sample key cannot be empty"));
        }
        Ok(Self(key.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for SampleKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for SampleKey {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<SampleKey> for String {
    fn from(value: SampleKey) -> Self {
        value.0
    }
}

impl ValueObject for SampleKey {}

/// Identifier of one QR-coded unit: `<sampleKey>|<index>` or `<sampleKey>-<index>`.
///
/// The last `|` wins; without one, the last `-` separates the index, so
/// `A-1|3` and `A-1-3` both name unit 3 of sample `A-1`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct UnitId {
    raw: String,
    sample_key: SampleKey,
    index: u32,
}

impl UnitId {
    pub fn parse(raw: &str) -> DomainResult<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(DomainError::validation("unit id cannot be empty"));
        }

        let (key, index) = raw
            .rsplit_once('|')
            .or_else(|| raw.rsplit_once('-'))
            .ok_or_else(|| {
                DomainError::validation(format!(
                    "unit id '{raw}' must look like <sampleKey>|<index> or <sampleKey>-<index>"
                ))
            })?;

        let sample_key = SampleKey::parse(key)
            .map_err(|_| DomainError::validation(format!("unit id '{raw}' has no sample key")))?;
        let index = index.trim().parse::<u32>().map_err(|_| {
            DomainError::validation(format!("unit id '{raw}': index '{index}' is not an integer"))
        })?;

        Ok(Self {
            raw: raw.to_string(),
            sample_key,
            index,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn sample_key(&self) -> &SampleKey {
        &self.sample_key
    }

    pub fn index(&self) -> u32 {
        self.index
    }
}

impl PartialOrd for UnitId {
    fn partial_cmp(&self, other: &Self) -> Option<core::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

// Row locks are taken in this order, so it must agree with the store's
// `ORDER BY unit_id`.
impl Ord for UnitId {
    fn cmp(&self, other: &Self) -> core::cmp::Ordering {
        self.raw.cmp(&other.raw)
    }
}

impl core::fmt::Display for UnitId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.raw)
    }
}

impl FromStr for UnitId {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for UnitId {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<UnitId> for String {
    fn from(value: UnitId) -> Self {
        value.raw
    }
}

impl ValueObject for UnitId {}

/// Current status of a unit. Exactly one holds at any time.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UnitStatus {
    Available,
    Borrowed,
    Exported,
    Rejected,
}

impl UnitStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            UnitStatus::Available => "Available",
            UnitStatus::Borrowed => "Borrowed",
            UnitStatus::Exported => "Exported",
            UnitStatus::Rejected => "Rejected",
        }
    }

    /// Units in this status are physically away and carry no location.
    pub fn is_out(self) -> bool {
        matches!(self, UnitStatus::Borrowed | UnitStatus::Exported)
    }
}

impl core::fmt::Display for UnitStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for UnitStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "Available" => Ok(UnitStatus::Available),
            "Borrowed" => Ok(UnitStatus::Borrowed),
            "Exported" => Ok(UnitStatus::Exported),
            "Rejected" => Ok(UnitStatus::Rejected),
            other => Err(DomainError::validation(format!("unknown unit status '{other}'"))),
        }
    }
}

/// Unit Registry row: status and physical location of one QR-coded unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Unit {
    id: UnitId,
    status: UnitStatus,
    location: Option<String>,
}

impl Unit {
    /// A freshly registered unit, on the shelf at `location`.
    pub fn register(id: UnitId, location: &str) -> DomainResult<Self> {
        let location = location.trim();
        if location.is_empty() {
            return Err(DomainError::validation(format!(
                "unit {id} needs a location to be registered"
            )));
        }
        Ok(Self {
            id,
            status: UnitStatus::Available,
            location: Some(location.to_string()),
        })
    }

    /// Rebuild a unit from stored fields, checking the location invariant.
    ///
    /// A stored row that breaks the invariant is registry drift, not bad input.
    pub fn from_parts(id: UnitId, status: UnitStatus, location: Option<String>) -> DomainResult<Self> {
        let location = location.filter(|l| !l.trim().is_empty());
        match (status, &location) {
            (UnitStatus::Available, None) => Err(DomainError::consistency(format!(
                "unit {id} is Available but has no location"
            ))),
            (s, Some(loc)) if s.is_out() => Err(DomainError::consistency(format!(
                "unit {id} is {s} but still located at '{loc}'"
            ))),
            _ => Ok(Self { id, status, location }),
        }
    }

    pub fn id_typed(&self) -> &UnitId {
        &self.id
    }

    pub fn sample_key(&self) -> &SampleKey {
        self.id.sample_key()
    }

    pub fn status(&self) -> UnitStatus {
        self.status
    }

    pub fn location(&self) -> Option<&str> {
        self.location.as_deref()
    }

    /// Apply `action` to this unit, returning its next state.
    ///
    /// `destination` is only read for `Return`.
    pub fn transition(&self, action: ActionType, destination: Option<&str>) -> DomainResult<Self> {
        if !action.accepts(self.status) {
            let allowed = action
                .required_statuses()
                .iter()
                .map(|s| s.as_str())
                .collect::<Vec<_>>()
                .join(" or ");
            return Err(DomainError::precondition(format!(
                "unit {} is {}; {} requires {}",
                self.id, self.status, action, allowed
            )));
        }

        let location = match action {
            ActionType::Return => {
                let dest = destination.map(str::trim).filter(|d| !d.is_empty()).ok_or_else(|| {
                    DomainError::precondition(format!("return of unit {} needs a destination", self.id))
                })?;
                Some(dest.to_string())
            }
            ActionType::Reject => self.location.clone(),
            ActionType::Borrow | ActionType::Export | ActionType::Transfer => None,
        };

        Ok(Self {
            id: self.id.clone(),
            status: action.target_status(),
            location,
        })
    }
}

impl Entity for Unit {
    type Id = UnitId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}
