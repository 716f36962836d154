//! Fee schedule and settlement estimate per payment rail.

use bigdecimal::BigDecimal;
use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc, Weekday};
use std::str::FromStr;

use crate::domain::PaymentMethod;

const ACH_RATE: &str = "0.008";
const ACH_CAP: &str = "5.00";
const WIRE_FLAT: &str = "15.00";
const CARD_RATE: &str = "0.029";
const CARD_FIXED: &str = "0.30";

fn constant(value: &str) -> BigDecimal {
    // Literals above are known-good decimals.
    BigDecimal::from_str(value).unwrap_or_else(|_| BigDecimal::from(0))
}

/// Rounds half-up to two decimal places. Fees are never negative.
pub fn round_cents(value: &BigDecimal) -> BigDecimal {
    let shifted = value.clone() * BigDecimal::from(100) + constant("0.5");
    let (cents, _) = shifted.with_scale(0).as_bigint_and_exponent();
    BigDecimal::new(cents, 2)
}

/// Scheduled fee for `amount` on `method`, capped at the amount itself.
pub fn fee_for(method: PaymentMethod, amount: &BigDecimal) -> BigDecimal {
    let raw = match method {
        PaymentMethod::Ach => {
            let percentage = round_cents(&(amount.clone() * constant(ACH_RATE)));
            percentage.min(constant(ACH_CAP))
        }
        PaymentMethod::Wire => constant(WIRE_FLAT),
        PaymentMethod::CreditCard => {
            round_cents(&(amount.clone() * constant(CARD_RATE) + constant(CARD_FIXED)))
        }
        PaymentMethod::Check | PaymentMethod::InternalTransfer => BigDecimal::from(0),
    };

    raw.min(amount.clone()).with_scale(2)
}

fn settlement_business_days(method: PaymentMethod) -> u32 {
    match method {
        PaymentMethod::Ach => 3,
        PaymentMethod::Wire => 1,
        PaymentMethod::Check => 7,
        PaymentMethod::CreditCard => 2,
        PaymentMethod::InternalTransfer => 0,
    }
}

/// Calendar date funds are expected to settle, skipping weekends.
pub fn estimated_settlement_date(method: PaymentMethod, from: DateTime<Utc>) -> NaiveDate {
    add_business_days(from.date_naive(), settlement_business_days(method))
}

fn add_business_days(start: NaiveDate, days: u32) -> NaiveDate {
    let mut date = start;
    let mut remaining = days;
    while remaining > 0 {
        date += Duration::days(1);
        if !matches!(date.weekday(), Weekday::Sat | Weekday::Sun) {
            remaining -= 1;
        }
    }
    date
}
