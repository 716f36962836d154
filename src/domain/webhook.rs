use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

string_enum! {
    pub enum WebhookStatus {
        Pending => "PENDING",
        Processed => "PROCESSED",
        Failed => "FAILED",
    }
}

/// One inbound provider event, unique by the provider's `event_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookEvent {
    pub id: Uuid,
    pub event_id: String,
    pub event_type: String,
    pub payload: Value,
    pub status: WebhookStatus,
    pub retry_count: i32,
    pub error_message: Option<String>,
    pub received_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
}

impl WebhookEvent {
    pub fn received(event_id: impl Into<String>, payload: Value, now: DateTime<Utc>) -> Self {
        let event_type = payload
            .get("type")
            .and_then(Value::as_str)
            .unwrap_or("unknown")
            .to_string();

        Self {
            id: Uuid::new_v4(),
            event_id: event_id.into(),
            event_type,
            payload,
            status: WebhookStatus::Pending,
            retry_count: 0,
            error_message: None,
            received_at: now,
            processed_at: None,
        }
    }

    pub fn mark_processed(&mut self, now: DateTime<Utc>) {
        self.status = WebhookStatus::Processed;
        self.processed_at = Some(now);
        self.error_message = None;
    }

    pub fn mark_failed(&mut self, error: impl Into<String>) {
        self.status = WebhookStatus::Failed;
        self.retry_count += 1;
        self.error_message = Some(error.into());
    }
}
