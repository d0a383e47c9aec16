use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use sqlx::FromRow;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "audit_operation", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum OperationType {
    Mint,
    StatusQuery,
    Deactivate,
}

impl OperationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationType::Mint => "mint",
            OperationType::StatusQuery => "status_query",
            OperationType::Deactivate => "deactivate",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "audit_outcome", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Success,
    Failure,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct AuditEntry {
    pub id: i64,
    pub operation_type: OperationType,
    #[sqlx(rename = "promo_code")]
    pub code_ref: Option<String>, // nullable: malformed or never-minted codes
    pub outcome: Outcome,
    pub detail: JsonValue,
    pub requested_at: DateTime<Utc>,
}

/// An audit record before the log assigns its id and timestamp.
#[derive(Debug, Clone)]
pub struct NewAuditEntry {
    pub operation_type: OperationType,
    pub code_ref: Option<String>,
    pub outcome: Outcome,
    pub detail: JsonValue,
}

/// Optional filters for audit log listings.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct AuditFilter {
    pub operation: Option<OperationType>,
    pub outcome: Option<Outcome>,
}

impl AuditFilter {
    pub fn matches(&self, entry: &AuditEntry) -> bool {
        self.operation.map_or(true, |op| op == entry.operation_type)
            && self.outcome.map_or(true, |o| o == entry.outcome)
    }
}
