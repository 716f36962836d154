//! Retry policy: the attempt ceiling, the backoff curve and provider failure
//! classification.

use chrono::{DateTime, Duration, Utc};

use crate::domain::{AuditNote, InvalidTransition, Transaction, TransactionStatus};

/// Attempts allowed before a FAILED transaction stays failed.
pub const MAX_RETRY_ATTEMPTS: i32 = 3;

const BACKOFF_BASE_MINUTES: i64 = 30;
const BACKOFF_CAP_HOURS: i64 = 24;
const RETRY_LIMIT_SUFFIX: &str = " (retry limit reached)";

/// Delay before attempt `retry_count + 1`: 30m, 1h, 2h, ... capped at 24h.
pub fn backoff_delay(retry_count: i32) -> Duration {
    let cap = Duration::hours(BACKOFF_CAP_HOURS);
    let exponent = retry_count.clamp(0, 16) as u32;
    let minutes = BACKOFF_BASE_MINUTES.saturating_mul(1_i64 << exponent);
    Duration::minutes(minutes).min(cap)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    Retryable,
    Permanent,
}

const RETRYABLE_CODES: &[&str] = &[
    "rate_limit",
    "processing_error",
    "lock_timeout",
    "try_again_later",
    "issuer_not_available",
    "temporary_hold",
    "api_connection_error",
];

/// Unknown and missing codes are treated as permanent.
pub fn classify_failure(code: Option<&str>) -> FailureClass {
    match code {
        Some(code) if RETRYABLE_CODES.contains(&code) => FailureClass::Retryable,
        _ => FailureClass::Permanent,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    Scheduled { next_retry_at: DateTime<Utc> },
    Exhausted,
}

/// Moves a FAILED row to PENDING_RETRY when attempts remain; otherwise leaves it
/// FAILED and marks the failure reason.
pub fn schedule_retry(tx: &mut Transaction, now: DateTime<Utc>) -> Result<RetryDecision, InvalidTransition> {
    if tx.status != TransactionStatus::Failed {
        return Err(InvalidTransition {
            from: tx.status,
            to: TransactionStatus::PendingRetry,
        });
    }

    if tx.retry_count >= MAX_RETRY_ATTEMPTS {
        mark_exhausted(tx, now);
        return Ok(RetryDecision::Exhausted);
    }

    let next_retry_at = now + backoff_delay(tx.retry_count);
    tx.transition(TransactionStatus::PendingRetry, now)?;
    tx.next_retry_at = Some(next_retry_at);
    tx.metadata.note(AuditNote::RetryScheduled {
        attempt: tx.retry_count + 1,
        next_retry_at,
    });
    Ok(RetryDecision::Scheduled { next_retry_at })
}

fn mark_exhausted(tx: &mut Transaction, now: DateTime<Utc>) {
    let reason = tx.failure_reason.take().unwrap_or_else(|| "failed".to_string());
    if reason.ends_with(RETRY_LIMIT_SUFFIX) {
        tx.failure_reason = Some(reason);
    } else {
        tx.failure_reason = Some(format!("{}{}", reason, RETRY_LIMIT_SUFFIX));
    }
    tx.next_retry_at = None;
    tx.updated_at = now;
}
