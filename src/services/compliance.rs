//! Pure compliance evaluation. Callers supply the history window; nothing here
//! touches the store.

use bigdecimal::BigDecimal;
use chrono::Duration;
use serde::Serialize;

use crate::domain::{CheckSeverity, CheckType, ComplianceCheck, ComplianceReport, Transaction};

/// Look-back window for the daily limit and velocity checks.
pub fn history_window() -> Duration {
    Duration::hours(24)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComplianceLimits {
    pub single_transaction_limit: BigDecimal,
    pub daily_limit: BigDecimal,
    /// Amounts at or above this go to manual review.
    pub approval_threshold: BigDecimal,
    /// More completed transactions than this inside the window is flagged.
    pub velocity_max_transactions: usize,
}

impl Default for ComplianceLimits {
    fn default() -> Self {
        Self {
            single_transaction_limit: BigDecimal::from(1_000_000),
            daily_limit: BigDecimal::from(250_000),
            approval_threshold: BigDecimal::from(50_000),
            velocity_max_transactions: 10,
        }
    }
}

/// Inputs for one evaluation.
pub struct ComplianceContext<'a> {
    pub amount: &'a BigDecimal,
    /// The actor's COMPLETED transactions inside [`history_window`].
    pub recent_completed: &'a [Transaction],
}

pub fn evaluate(limits: &ComplianceLimits, ctx: &ComplianceContext<'_>) -> ComplianceReport {
    let amount = ctx.amount;
    let window_total = ctx
        .recent_completed
        .iter()
        .fold(BigDecimal::from(0), |acc, tx| acc + tx.amount.clone());
    let projected = window_total.clone() + amount.clone();
    let recent_count = ctx.recent_completed.len();

    let checks = vec![
        ComplianceCheck {
            check_type: CheckType::SingleTransactionLimit,
            severity: CheckSeverity::Hard,
            passed: amount <= &limits.single_transaction_limit,
            details: format!(
                "amount {} against single transaction limit {}",
                amount, limits.single_transaction_limit
            ),
        },
        ComplianceCheck {
            check_type: CheckType::DailyLimit,
            severity: CheckSeverity::Hard,
            passed: projected <= limits.daily_limit,
            details: format!(
                "{} completed in the last 24h plus {} against daily limit {}",
                window_total, amount, limits.daily_limit
            ),
        },
        ComplianceCheck {
            check_type: CheckType::LargeTransactionReview,
            severity: CheckSeverity::Soft,
            passed: amount < &limits.approval_threshold,
            details: format!(
                "amount {} against review threshold {}",
                amount, limits.approval_threshold
            ),
        },
        ComplianceCheck {
            check_type: CheckType::Velocity,
            severity: CheckSeverity::Soft,
            passed: recent_count <= limits.velocity_max_transactions,
            details: format!(
                "{} completed transactions in the last 24h, limit {}",
                recent_count, limits.velocity_max_transactions
            ),
        },
    ];

    ComplianceReport::from_checks(checks)
}
