use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

pub const ENTITY_TRANSACTION: &str = "transaction";
pub const ENTITY_ESCROW_ACCOUNT: &str = "escrow_account";
pub const ENTITY_INVESTMENT: &str = "investment";
pub const ENTITY_BANK_ACCOUNT: &str = "bank_account";

/// Append-only audit record, written in the same unit of work as the change it describes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEntry {
    pub id: Uuid,
    pub entity_id: Uuid,
    pub entity_type: String,
    pub action: String,
    pub old_value: Option<Value>,
    pub new_value: Option<Value>,
    pub actor: String,
    pub created_at: DateTime<Utc>,
}

impl AuditEntry {
    pub fn new(
        entity_id: Uuid,
        entity_type: &str,
        action: &str,
        old_value: Option<Value>,
        new_value: Option<Value>,
        actor: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            entity_id,
            entity_type: entity_type.to_string(),
            action: action.to_string(),
            old_value,
            new_value,
            actor: actor.into(),
            created_at: Utc::now(),
        }
    }

    pub fn creation(entity_id: Uuid, entity_type: &str, snapshot: Value, actor: impl Into<String>) -> Self {
        Self::new(entity_id, entity_type, "created", None, Some(snapshot), actor)
    }

    pub fn field_update(
        entity_id: Uuid,
        entity_type: &str,
        field: &str,
        old_value: Value,
        new_value: Value,
        actor: impl Into<String>,
    ) -> Self {
        Self::new(
            entity_id,
            entity_type,
            &format!("{}_updated", field),
            Some(old_value),
            Some(new_value),
            actor,
        )
    }
}
