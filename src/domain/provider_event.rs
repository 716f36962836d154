//! Closed set of provider webhook events the engine understands.

use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use thiserror::Error;
use uuid::Uuid;

pub const PAYMENT_SUCCEEDED: &str = "payment_intent.succeeded";
pub const PAYMENT_FAILED: &str = "payment_intent.payment_failed";
pub const PAYOUT_PAID: &str = "payout.paid";
pub const PAYOUT_FAILED: &str = "payout.failed";
pub const TRANSFER_PAID: &str = "transfer.paid";
pub const TRANSFER_FAILED: &str = "transfer.failed";
pub const ITEM_ERROR: &str = "item.error";
pub const ITEM_LOGIN_REQUIRED: &str = "item.login_required";

#[derive(Debug, Error)]
pub enum ProviderEventError {
    #[error("payload has no data.object")]
    MissingObject,
    #[error("malformed {event_type} object: {source}")]
    Malformed {
        event_type: String,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferKind {
    Payout,
    Transfer,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ProviderEvent {
    PaymentSucceeded(PaymentObject),
    PaymentFailed(PaymentObject),
    TransferSucceeded(TransferKind, TransferObject),
    TransferFailed(TransferKind, TransferObject),
    ExternalAccountError(ItemErrorObject),
    Unrecognized(String),
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct PaymentObject {
    pub id: String,
    #[serde(default)]
    pub amount: Option<i64>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    #[serde(default)]
    pub last_payment_error: Option<PaymentError>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct PaymentError {
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub decline_code: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct TransferObject {
    pub id: String,
    #[serde(default)]
    pub amount: Option<i64>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    #[serde(default)]
    pub failure_code: Option<String>,
    #[serde(default)]
    pub failure_message: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ItemErrorObject {
    pub item_id: String,
    #[serde(default)]
    pub error: Option<ItemError>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ItemError {
    #[serde(default)]
    pub error_code: Option<String>,
    #[serde(default)]
    pub error_message: Option<String>,
}

/// Correlation id we stamp into provider object metadata when creating the object.
fn correlated_transaction_id(metadata: &BTreeMap<String, String>) -> Option<Uuid> {
    metadata
        .get("transaction_id")
        .or_else(|| metadata.get("transactionId"))
        .and_then(|raw| Uuid::parse_str(raw).ok())
}

impl PaymentObject {
    pub fn transaction_id(&self) -> Option<Uuid> {
        correlated_transaction_id(&self.metadata)
    }

    /// Most specific failure code available (decline code wins over the generic code).
    pub fn failure_code(&self) -> Option<&str> {
        let error = self.last_payment_error.as_ref()?;
        error.decline_code.as_deref().or(error.code.as_deref())
    }

    pub fn failure_message(&self) -> Option<&str> {
        self.last_payment_error.as_ref()?.message.as_deref()
    }
}

impl TransferObject {
    pub fn transaction_id(&self) -> Option<Uuid> {
        correlated_transaction_id(&self.metadata)
    }
}

impl ItemErrorObject {
    pub fn error_code(&self) -> Option<&str> {
        self.error.as_ref()?.error_code.as_deref()
    }
}

impl ProviderEvent {
    pub fn parse(event_type: &str, payload: &Value) -> Result<Self, ProviderEventError> {
        match event_type {
            PAYMENT_SUCCEEDED => Ok(ProviderEvent::PaymentSucceeded(object(event_type, payload)?)),
            PAYMENT_FAILED => Ok(ProviderEvent::PaymentFailed(object(event_type, payload)?)),
            PAYOUT_PAID => Ok(ProviderEvent::TransferSucceeded(
                TransferKind::Payout,
                object(event_type, payload)?,
            )),
            PAYOUT_FAILED => Ok(ProviderEvent::TransferFailed(
                TransferKind::Payout,
                object(event_type, payload)?,
            )),
            TRANSFER_PAID => Ok(ProviderEvent::TransferSucceeded(
                TransferKind::Transfer,
                object(event_type, payload)?,
            )),
            TRANSFER_FAILED => Ok(ProviderEvent::TransferFailed(
                TransferKind::Transfer,
                object(event_type, payload)?,
            )),
            ITEM_ERROR | ITEM_LOGIN_REQUIRED => {
                Ok(ProviderEvent::ExternalAccountError(object(event_type, payload)?))
            }
            other => Ok(ProviderEvent::Unrecognized(other.to_string())),
        }
    }
}

fn object<T: serde::de::DeserializeOwned>(
    event_type: &str,
    payload: &Value,
) -> Result<T, ProviderEventError> {
    let object = payload
        .get("data")
        .and_then(|data| data.get("object"))
        .ok_or(ProviderEventError::MissingObject)?;

    serde_json::from_value(object.clone()).map_err(|source| ProviderEventError::Malformed {
        event_type: event_type.to_string(),
        source,
    })
}
