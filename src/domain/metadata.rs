//! Typed replacement for the free-form transaction metadata bag.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use uuid::Uuid;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionMetadata {
    #[serde(default, skip_serializing_if = "ProviderRefs::is_empty")]
    pub provider: ProviderRefs,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub events: Vec<AuditNote>,
    /// Provider passthrough fields with no typed home.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, Value>,
}

impl TransactionMetadata {
    pub fn note(&mut self, note: AuditNote) {
        self.events.push(note);
    }

    pub fn merge_extra(&mut self, fields: BTreeMap<String, Value>) {
        for (key, value) in fields {
            if value.is_null() {
                self.extra.remove(&key);
            } else {
                self.extra.insert(key, value);
            }
        }
    }
}

/// Identifiers the payment provider assigned to objects backing this transaction.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderRefs {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payment_intent_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transfer_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payout_id: Option<String>,
}

impl ProviderRefs {
    pub fn is_empty(&self) -> bool {
        self.payment_intent_id.is_none() && self.transfer_id.is_none() && self.payout_id.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AuditNote {
    Approved {
        by: Uuid,
        notes: Option<String>,
        at: DateTime<Utc>,
    },
    Cancelled {
        by: Uuid,
        reason: String,
        at: DateTime<Utc>,
    },
    RetryScheduled {
        attempt: i32,
        next_retry_at: DateTime<Utc>,
    },
    Retried {
        by: Uuid,
        attempt: i32,
        forced: bool,
        at: DateTime<Utc>,
    },
    ProviderFailure {
        code: Option<String>,
        message: Option<String>,
        retryable: bool,
        at: DateTime<Utc>,
    },
    ReconciliationConflict {
        event_id: String,
        event_type: String,
        status: String,
        at: DateTime<Utc>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn merge_extra_overwrites_and_removes() {
        let mut metadata = TransactionMetadata::default();
        metadata.merge_extra(BTreeMap::from([
            ("a".to_string(), json!(1)),
            ("b".to_string(), json!("x")),
        ]));
        metadata.merge_extra(BTreeMap::from([
            ("a".to_string(), json!(2)),
            ("b".to_string(), Value::Null),
        ]));
        assert_eq!(metadata.extra.get("a"), Some(&json!(2)));
        assert!(!metadata.extra.contains_key("b"));
    }

    #[test]
    fn notes_are_tagged_by_kind() {
        let mut metadata = TransactionMetadata::default();
        metadata.note(AuditNote::RetryScheduled {
            attempt: 1,
            next_retry_at: Utc::now(),
        });
        let value = serde_json::to_value(&metadata).unwrap();
        assert_eq!(value["events"][0]["kind"], "retry_scheduled");
        assert!(value.get("provider").is_none());
    }
}
