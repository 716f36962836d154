//! Inbound payment-provider webhooks.
//!
//! The raw body is authenticated before it is parsed. Once the event is stored
//! the delivery is acknowledged; processing continues in a spawned task and any
//! failure there is recorded on the event for redelivery.

use axum::{
    body::Bytes,
    extract::State,
    http::HeaderMap,
    Json,
};
use hmac::{Hmac, Mac};
use serde::Serialize;
use serde_json::Value;
use sha2::Sha256;

use crate::error::AppError;
use crate::AppState;

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "x-webhook-signature";

#[derive(Debug, Serialize)]
pub struct WebhookAck {
    pub received: bool,
    pub duplicate: bool,
}

/// Hex-encoded HMAC-SHA256 of `body` under `secret`.
pub fn sign_payload(secret: &str, body: &[u8]) -> Result<String, AppError> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| AppError::Internal(format!("invalid webhook secret: {}", e)))?;
    mac.update(body);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Constant-time check of the signature header against the raw body.
pub fn verify_signature(secret: &str, body: &[u8], signature: &str) -> bool {
    if secret.is_empty() {
        return false;
    }
    let Ok(expected) = hex::decode(signature.trim().trim_start_matches("sha256=")) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(body);
    mac.verify_slice(&expected).is_ok()
}

pub async fn receive_payment_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookAck>, AppError> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| AppError::Unauthorized("missing webhook signature".to_string()))?;

    if !verify_signature(&state.config.webhook_secret, &body, signature) {
        tracing::warn!(body_size = body.len(), "webhook signature mismatch");
        return Err(AppError::Unauthorized("invalid webhook signature".to_string()));
    }

    let payload: Value = serde_json::from_slice(&body)
        .map_err(|e| AppError::Validation(format!("webhook body is not valid JSON: {}", e)))?;
    let event_id = payload
        .get("id")
        .and_then(Value::as_str)
        .ok_or_else(|| AppError::Validation("webhook event has no id".to_string()))?
        .to_string();

    let outcome = state.reconciler.receive(&event_id, payload).await?;

    if !outcome.duplicate {
        let reconciler = state.reconciler.clone();
        tokio::spawn(async move {
            // Failures are already recorded on the event by the reconciler.
            let _ = reconciler.process(&event_id).await;
        });
    }

    Ok(Json(WebhookAck {
        received: true,
        duplicate: outcome.duplicate,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_round_trips() {
        let body = br#"{"id":"evt_1","type":"payment_intent.succeeded"}"#;
        let signature = sign_payload("whsec_test", body).unwrap();
        assert!(verify_signature("whsec_test", body, &signature));
        assert!(verify_signature("whsec_test", body, &format!("sha256={}", signature)));
    }

    #[test]
    fn rejects_tampered_body_wrong_secret_and_garbage() {
        let body = br#"{"id":"evt_1"}"#;
        let signature = sign_payload("whsec_test", body).unwrap();
        assert!(!verify_signature("whsec_test", br#"{"id":"evt_2"}"#, &signature));
        assert!(!verify_signature("other", body, &signature));
        assert!(!verify_signature("whsec_test", body, "not-hex"));
        assert!(!verify_signature("", body, &signature));
    }
}
