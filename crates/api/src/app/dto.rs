use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use sampletrack_core::TransactionId;
use sampletrack_infra::EngineError;
use sampletrack_inventory::{
    ActionType, AuditAction, AuditFilter, Pagination, Party, RegisterUnits, Sample, SampleKey,
    SampleState, SubmitTransaction, Unit, UnitId, UnitLine, UnitStatus,
};

// -------------------------
// Request DTOs
// -------------------------

/// Body of `POST /transactions`. Accepts snake_case and camelCase field names.
#[derive(Debug, Deserialize)]
pub struct SubmitTransactionRequest {
    #[serde(alias = "actionType")]
    pub action_type: String,
    pub actor: Party,
    #[serde(default)]
    pub counterparty: Option<Party>,
    #[serde(default, alias = "reasonId")]
    pub reason_id: Option<i64>,
    #[serde(default)]
    pub note: Option<String>,
    #[serde(default)]
    pub destination: Option<String>,
    pub units: Vec<UnitLineRequest>,
}

#[derive(Debug, Deserialize)]
pub struct UnitLineRequest {
    #[serde(alias = "unitId")]
    pub unit_id: String,
    #[serde(default = "one")]
    pub quantity: i64,
}

fn one() -> i64 {
    1
}

impl SubmitTransactionRequest {
    pub fn into_command(self) -> Result<SubmitTransaction, EngineError> {
        let action: ActionType = self.action_type.parse()?;
        Ok(SubmitTransaction {
            action,
            actor: self.actor,
            counterparty: self.counterparty,
            reason_id: self.reason_id,
            note: self.note,
            destination: self.destination,
            units: self
                .units
                .into_iter()
                .map(|u| UnitLine {
                    unit_id: u.unit_id,
                    quantity: u.quantity,
                })
                .collect(),
        })
    }
}

/// Body of `POST /samples/:key/units`.
#[derive(Debug, Deserialize)]
pub struct RegisterUnitsRequest {
    #[serde(alias = "unitIds")]
    pub unit_ids: Vec<String>,
    pub location: String,
    pub actor: Party,
    #[serde(default)]
    pub note: Option<String>,
}

impl RegisterUnitsRequest {
    pub fn into_command(self, sample_key: String) -> RegisterUnits {
        RegisterUnits {
            sample_key,
            unit_ids: self.unit_ids,
            location: self.location,
            actor: self.actor,
            note: self.note,
        }
    }
}

/// Body of `DELETE /units/:id`.
#[derive(Debug, Deserialize)]
pub struct DeregisterUnitRequest {
    pub actor: Party,
    #[serde(default)]
    pub note: Option<String>,
}

/// Query string of `GET /audit`.
#[derive(Debug, Default, Deserialize)]
pub struct AuditQuery {
    pub sample_key: Option<String>,
    pub unit_id: Option<String>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub action: Option<String>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

impl AuditQuery {
    pub fn into_filter(self) -> Result<(AuditFilter, Pagination), EngineError> {
        let defaults = Pagination::default();
        let filter = AuditFilter {
            sample_key: self.sample_key.as_deref().map(SampleKey::parse).transpose()?,
            unit_id: self.unit_id.as_deref().map(UnitId::parse).transpose()?,
            from: self.from,
            to: self.to,
            action: self.action.as_deref().map(str::parse::<AuditAction>).transpose()?,
        };
        let pagination = Pagination::new(
            self.limit.unwrap_or(defaults.limit),
            self.offset.unwrap_or(defaults.offset),
        );
        Ok((filter, pagination))
    }
}

// -------------------------
// Response DTOs
// -------------------------

#[derive(Debug, Serialize)]
pub struct TransactionCreated {
    pub transaction_id: TransactionId,
}

#[derive(Debug, Serialize)]
pub struct UnitResponse {
    pub unit_id: String,
    pub sample_key: String,
    pub index: u32,
    pub status: UnitStatus,
    pub location: Option<String>,
}

impl From<&Unit> for UnitResponse {
    fn from(u: &Unit) -> Self {
        Self {
            unit_id: u.id_typed().as_str().to_string(),
            sample_key: u.sample_key().as_str().to_string(),
            index: u.id_typed().index(),
            status: u.status(),
            location: u.location().map(str::to_string),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct SampleResponse {
    pub sample_key: String,
    pub quantity_on_hand: i64,
    pub borrowed_quantity: i64,
    pub exported_quantity: i64,
    pub rejected_quantity: i64,
    pub total: i64,
    pub state: SampleState,
}

impl From<&Sample> for SampleResponse {
    fn from(s: &Sample) -> Self {
        Self {
            sample_key: s.key().as_str().to_string(),
            quantity_on_hand: s.on_hand(),
            borrowed_quantity: s.borrowed(),
            exported_quantity: s.exported(),
            rejected_quantity: s.rejected(),
            total: s.total(),
            state: s.state(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_camel_case_request() {
        let body = serde_json::json!({
            "actionType": "borrow",
            "actor": { "name": "Clerk", "department": "Warehouse" },
            "counterparty": { "name": "Ana", "department": "Design" },
            "units": [{ "unitId": "A-1|1", "quantity": 1 }, { "unitId": "A-1|2" }]
        });
        let req: SubmitTransactionRequest = serde_json::from_value(body).unwrap();
        let cmd = req.into_command().unwrap();
        assert_eq!(cmd.action, ActionType::Borrow);
        assert_eq!(cmd.units[1].quantity, 1);
    }

    #[test]
    fn unknown_action_is_a_validation_error() {
        let body = serde_json::json!({
            "action_type": "lend",
            "actor": { "name": "Clerk", "department": "Warehouse" },
            "units": []
        });
        let req: SubmitTransactionRequest = serde_json::from_value(body).unwrap();
        assert_eq!(req.into_command().unwrap_err().kind(), "validation_error");
    }

    #[test]
    fn audit_query_parses_filters() {
        let query = AuditQuery {
            unit_id: Some("A-1|1".into()),
            action: Some("return".into()),
            limit: Some(5000),
            ..AuditQuery::default()
        };
        let (filter, pagination) = query.into_filter().unwrap();
        assert_eq!(filter.action, Some(AuditAction::Return));
        assert_eq!(filter.unit_id.unwrap().as_str(), "A-1|1");
        assert_eq!(pagination.limit, 1000);

        let bad = AuditQuery {
            unit_id: Some("nope".into()),
            ..AuditQuery::default()
        };
        assert!(bad.into_filter().is_err());
    }
}
