//! Compliance findings, persisted verbatim next to the transaction they gate.

use serde::{Deserialize, Serialize};

string_enum! {
    /// Hard findings block the transaction; soft findings route it to manual approval.
    pub enum CheckSeverity {
        Hard => "HARD",
        Soft => "SOFT",
    }
}

string_enum! {
    pub enum CheckType {
        SingleTransactionLimit => "SINGLE_TRANSACTION_LIMIT",
        DailyLimit => "DAILY_LIMIT",
        LargeTransactionReview => "LARGE_TRANSACTION_REVIEW",
        Velocity => "VELOCITY",
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComplianceCheck {
    pub check_type: CheckType,
    pub severity: CheckSeverity,
    pub passed: bool,
    pub details: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComplianceReport {
    /// Every check passed.
    pub passed: bool,
    /// No hard check failed but at least one soft check did.
    pub requires_approval: bool,
    pub checks: Vec<ComplianceCheck>,
}

impl ComplianceReport {
    pub fn from_checks(checks: Vec<ComplianceCheck>) -> Self {
        let passed = checks.iter().all(|c| c.passed);
        let blocked = checks
            .iter()
            .any(|c| !c.passed && c.severity == CheckSeverity::Hard);
        let soft_failed = checks
            .iter()
            .any(|c| !c.passed && c.severity == CheckSeverity::Soft);

        Self {
            passed,
            requires_approval: !blocked && soft_failed,
            checks,
        }
    }

    pub fn is_blocked(&self) -> bool {
        self.hard_failures().next().is_some()
    }

    pub fn hard_failures(&self) -> impl Iterator<Item = &ComplianceCheck> {
        self.checks
            .iter()
            .filter(|c| !c.passed && c.severity == CheckSeverity::Hard)
    }
}
