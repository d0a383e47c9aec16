use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Operator identity supplied by the authentication gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub id: String,
    pub username: String,
}

/// Who retired a code, when, and why. Only ever written as a whole.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeactivationStamp {
    pub deactivated_at: DateTime<Utc>,
    pub deactivated_by: Principal,
    pub deactivation_reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CodeState {
    Active,
    Deactivated(DeactivationStamp),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromoCode {
    pub code: String,
    pub created_at: DateTime<Utc>,
    pub state: CodeState,
}

impl PromoCode {
    pub fn new_active(code: String, created_at: DateTime<Utc>) -> Self {
        Self {
            code,
            created_at,
            state: CodeState::Active,
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self.state, CodeState::Active)
    }

    pub fn stamp(&self) -> Option<&DeactivationStamp> {
        match &self.state {
            CodeState::Active => None,
            CodeState::Deactivated(stamp) => Some(stamp),
        }
    }

    pub fn status(&self) -> CodeStatus {
        let stamp = self.stamp();
        CodeStatus {
            code: self.code.clone(),
            is_active: self.is_active(),
            created_at: self.created_at,
            deactivated_at: stamp.map(|s| s.deactivated_at),
            deactivated_by: stamp.map(|s| s.deactivated_by.clone()),
            deactivation_reason: stamp.and_then(|s| s.deactivation_reason.clone()),
        }
    }
}

/// Flat snapshot returned by status queries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CodeStatus {
    pub code: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deactivated_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deactivated_by: Option<Principal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deactivation_reason: Option<String>,
}

/// Raw `promo_codes` row as stored in Postgres.
#[derive(Debug, Clone, FromRow)]
pub struct PromoCodeRow {
    pub code: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub deactivated_at: Option<DateTime<Utc>>,
    pub deactivated_by: Option<String>,
    pub deactivated_by_username: Option<String>,
    pub deactivation_reason: Option<String>,
}

/// Returned when a row's stamp columns disagree with `is_active`.
#[derive(thiserror::Error, Debug)]
#[error("promo code {0} has an incomplete deactivation stamp")]
pub struct InconsistentRow(pub String);

impl TryFrom<PromoCodeRow> for PromoCode {
    type Error = InconsistentRow;

    fn try_from(row: PromoCodeRow) -> Result<Self, Self::Error> {
        let state = match (
            row.is_active,
            row.deactivated_at,
            row.deactivated_by,
            row.deactivated_by_username,
        ) {
            (true, None, None, None) if row.deactivation_reason.is_none() => CodeState::Active,
            (false, Some(at), Some(id), Some(username)) => {
                CodeState::Deactivated(DeactivationStamp {
                    deactivated_at: at,
                    deactivated_by: Principal { id, username },
                    deactivation_reason: row.deactivation_reason,
                })
            }
            _ => return Err(InconsistentRow(row.code)),
        };

        Ok(Self {
            code: row.code,
            created_at: row.created_at,
            state,
        })
    }
}
