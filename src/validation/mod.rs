use bigdecimal::BigDecimal;
use std::fmt;
use uuid::Uuid;

use crate::error::AppError;

pub const DESCRIPTION_MAX_LEN: usize = 500;
pub const INTERNAL_MEMO_MAX_LEN: usize = 2000;
pub const IDEMPOTENCY_KEY_MAX_LEN: usize = 128;
pub const PROVIDER_REFERENCE_MAX_LEN: usize = 255;
pub const CANCEL_REASON_MAX_LEN: usize = 500;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    pub fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

impl std::error::Error for ValidationError {}

impl From<ValidationError> for AppError {
    fn from(err: ValidationError) -> Self {
        AppError::Validation(err.to_string())
    }
}

pub type ValidationResult = Result<(), ValidationError>;

pub fn sanitize_string(value: &str) -> String {
    value
        .chars()
        .filter(|ch| !ch.is_control())
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn validate_required(field: &'static str, value: &str) -> ValidationResult {
    if value.trim().is_empty() {
        return Err(ValidationError::new(field, "must not be empty"));
    }

    Ok(())
}

pub fn validate_max_len(field: &'static str, value: &str, max_len: usize) -> ValidationResult {
    if value.chars().count() > max_len {
        return Err(ValidationError::new(
            field,
            format!("must be at most {} characters", max_len),
        ));
    }

    Ok(())
}

pub fn validate_positive_amount(amount: &BigDecimal) -> ValidationResult {
    if amount <= &BigDecimal::from(0) {
        return Err(ValidationError::new("amount", "must be greater than zero"));
    }
    validate_cents("amount", amount)
}

/// Money is carried with at most two decimal places.
pub fn validate_cents(field: &'static str, value: &BigDecimal) -> ValidationResult {
    if value.with_scale(2) != *value {
        return Err(ValidationError::new(field, "must have at most two decimal places"));
    }

    Ok(())
}

pub fn validate_fee(amount: &BigDecimal, fee: &BigDecimal) -> ValidationResult {
    if fee < &BigDecimal::from(0) {
        return Err(ValidationError::new("fee_amount", "must not be negative"));
    }
    if fee > amount {
        return Err(ValidationError::new("fee_amount", "must not exceed amount"));
    }
    validate_cents("fee_amount", fee)
}

pub fn validate_parties(from_user_id: Option<Uuid>, to_user_id: Option<Uuid>) -> ValidationResult {
    if from_user_id.is_none() && to_user_id.is_none() {
        return Err(ValidationError::new(
            "from_user_id",
            "at least one of from_user_id or to_user_id is required",
        ));
    }

    Ok(())
}

pub fn validate_idempotency_key(key: &str) -> ValidationResult {
    validate_required("idempotency_key", key)?;
    validate_max_len("idempotency_key", key, IDEMPOTENCY_KEY_MAX_LEN)?;

    if !key.chars().all(|ch| ch.is_ascii_graphic()) {
        return Err(ValidationError::new(
            "idempotency_key",
            "must contain only printable ASCII characters without spaces",
        ));
    }

    Ok(())
}
