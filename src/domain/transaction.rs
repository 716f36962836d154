//! Transaction domain entity.
//! The unit of money movement and the state machine it moves through.

use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use super::compliance::ComplianceReport;
use super::metadata::TransactionMetadata;

string_enum! {
    pub enum TransactionType {
        Deposit => "DEPOSIT",
        Withdrawal => "WITHDRAWAL",
        Distribution => "DISTRIBUTION",
        ConstructionDraw => "CONSTRUCTION_DRAW",
        PlatformFee => "PLATFORM_FEE",
        ReferralFee => "REFERRAL_FEE",
        EscrowDeposit => "ESCROW_DEPOSIT",
        EscrowWithdrawal => "ESCROW_WITHDRAWAL",
        Refund => "REFUND",
        Transfer => "TRANSFER",
    }
}

string_enum! {
    pub enum PaymentMethod {
        Ach => "ACH",
        Wire => "WIRE",
        Check => "CHECK",
        CreditCard => "CREDIT_CARD",
        InternalTransfer => "INTERNAL_TRANSFER",
    }
}

string_enum! {
    pub enum TransactionStatus {
        Initiated => "INITIATED",
        PendingApproval => "PENDING_APPROVAL",
        Processing => "PROCESSING",
        Completed => "COMPLETED",
        Failed => "FAILED",
        PendingRetry => "PENDING_RETRY",
        Cancelled => "CANCELLED",
    }
}

impl TransactionStatus {
    /// COMPLETED and CANCELLED rows never change status again.
    pub fn is_terminal(self) -> bool {
        matches!(self, TransactionStatus::Completed | TransactionStatus::Cancelled)
    }

    pub fn is_cancellable(self) -> bool {
        matches!(
            self,
            TransactionStatus::Initiated
                | TransactionStatus::PendingApproval
                | TransactionStatus::Processing
        )
    }

    /// Edges of the local state machine.
    pub fn can_transition_to(self, next: TransactionStatus) -> bool {
        use TransactionStatus::*;

        matches!(
            (self, next),
            (Initiated, PendingApproval)
                | (Initiated, Processing)
                | (PendingApproval, Processing)
                | (Processing, Completed)
                | (Processing, Failed)
                | (Failed, PendingRetry)
                | (PendingRetry, Processing)
                | (PendingRetry, Failed)
                | (Initiated, Cancelled)
                | (PendingApproval, Cancelled)
                | (Processing, Cancelled)
        )
    }
}

impl TransactionType {
    /// Confirmed transactions of these types credit the offering's escrow.
    pub fn credits_escrow(self) -> bool {
        matches!(self, TransactionType::Deposit | TransactionType::EscrowDeposit)
    }

    /// Confirmed transactions of these types debit the offering's escrow.
    pub fn debits_escrow(self) -> bool {
        matches!(
            self,
            TransactionType::EscrowWithdrawal | TransactionType::ConstructionDraw
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("cannot move transaction from {from} to {to}")]
pub struct InvalidTransition {
    pub from: TransactionStatus,
    pub to: TransactionStatus,
}

/// Validated inputs for a new transaction, before identity and compliance are attached.
#[derive(Debug, Clone)]
pub struct TransactionDraft {
    pub transaction_type: TransactionType,
    pub payment_method: PaymentMethod,
    pub amount: BigDecimal,
    pub fee_amount: BigDecimal,
    pub description: String,
    pub from_user_id: Option<Uuid>,
    pub to_user_id: Option<Uuid>,
    pub from_bank_account_id: Option<Uuid>,
    pub to_bank_account_id: Option<Uuid>,
    pub offering_id: Option<Uuid>,
    pub provider_reference: Option<String>,
    pub metadata: TransactionMetadata,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    pub id: Uuid,
    pub idempotency_key: String,
    #[serde(rename = "type")]
    pub transaction_type: TransactionType,
    pub payment_method: PaymentMethod,
    pub status: TransactionStatus,
    pub amount: BigDecimal,
    pub fee_amount: BigDecimal,
    pub net_amount: BigDecimal,
    pub description: String,
    pub internal_memo: Option<String>,
    pub from_user_id: Option<Uuid>,
    pub to_user_id: Option<Uuid>,
    pub from_bank_account_id: Option<Uuid>,
    pub to_bank_account_id: Option<Uuid>,
    pub offering_id: Option<Uuid>,
    pub provider_reference: Option<String>,
    pub requires_approval: bool,
    pub approved_by: Option<Uuid>,
    pub approved_at: Option<DateTime<Utc>>,
    pub compliance_check_passed: bool,
    pub compliance_check_data: ComplianceReport,
    pub failure_reason: Option<String>,
    pub failure_code: Option<String>,
    pub retry_count: i32,
    pub next_retry_at: Option<DateTime<Utc>>,
    pub processed_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub failed_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub metadata: TransactionMetadata,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub created_by: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Transaction {
    /// Builds a fresh `INITIATED` transaction. `net_amount` is always derived here.
    pub fn initiate(
        draft: TransactionDraft,
        idempotency_key: String,
        compliance: ComplianceReport,
        created_by: Uuid,
        now: DateTime<Utc>,
    ) -> Self {
        let net_amount = draft.amount.clone() - draft.fee_amount.clone();

        Self {
            id: Uuid::new_v4(),
            idempotency_key,
            transaction_type: draft.transaction_type,
            payment_method: draft.payment_method,
            status: TransactionStatus::Initiated,
            amount: draft.amount,
            fee_amount: draft.fee_amount,
            net_amount,
            description: draft.description,
            internal_memo: None,
            from_user_id: draft.from_user_id,
            to_user_id: draft.to_user_id,
            from_bank_account_id: draft.from_bank_account_id,
            to_bank_account_id: draft.to_bank_account_id,
            offering_id: draft.offering_id,
            provider_reference: draft.provider_reference,
            requires_approval: compliance.requires_approval,
            approved_by: None,
            approved_at: None,
            compliance_check_passed: compliance.passed,
            compliance_check_data: compliance,
            failure_reason: None,
            failure_code: None,
            retry_count: 0,
            next_retry_at: None,
            processed_at: None,
            completed_at: None,
            failed_at: None,
            cancelled_at: None,
            metadata: draft.metadata,
            ip_address: draft.ip_address,
            user_agent: draft.user_agent,
            created_by,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn net_amount_holds(&self) -> bool {
        self.net_amount == self.amount.clone() - self.fee_amount.clone()
    }

    pub fn involves(&self, user_id: Uuid) -> bool {
        self.from_user_id == Some(user_id)
            || self.to_user_id == Some(user_id)
            || self.created_by == user_id
    }

    /// The investor behind a funding movement.
    pub fn investor_id(&self) -> Option<Uuid> {
        self.from_user_id.or(self.to_user_id)
    }

    pub fn approval_satisfied(&self) -> bool {
        !self.requires_approval || self.approved_by.is_some()
    }

    /// Moves along a local state machine edge and stamps the matching timestamp.
    pub fn transition(
        &mut self,
        next: TransactionStatus,
        now: DateTime<Utc>,
    ) -> Result<(), InvalidTransition> {
        if !self.status.can_transition_to(next) {
            return Err(InvalidTransition {
                from: self.status,
                to: next,
            });
        }
        self.enter(next, now);
        Ok(())
    }

    /// Provider-confirmed settlement. Authoritative for every non-terminal status,
    /// including rows a late client call had not yet moved to PROCESSING.
    pub fn complete_from_provider(&mut self, now: DateTime<Utc>) -> Result<(), InvalidTransition> {
        if self.status.is_terminal() {
            return Err(InvalidTransition {
                from: self.status,
                to: TransactionStatus::Completed,
            });
        }
        if self.processed_at.is_none() {
            self.processed_at = Some(now);
        }
        self.next_retry_at = None;
        self.enter(TransactionStatus::Completed, now);
        Ok(())
    }

    /// Provider-reported failure. Accepted from every non-terminal, non-failed status.
    pub fn fail_from_provider(
        &mut self,
        reason: impl Into<String>,
        code: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<(), InvalidTransition> {
        if self.status.is_terminal() || self.status == TransactionStatus::Failed {
            return Err(InvalidTransition {
                from: self.status,
                to: TransactionStatus::Failed,
            });
        }
        if self.processed_at.is_none() {
            self.processed_at = Some(now);
        }
        self.failure_reason = Some(reason.into());
        self.failure_code = code;
        self.next_retry_at = None;
        self.enter(TransactionStatus::Failed, now);
        Ok(())
    }

    fn enter(&mut self, next: TransactionStatus, now: DateTime<Utc>) {
        match next {
            TransactionStatus::Processing => self.processed_at = Some(now),
            TransactionStatus::Completed => self.completed_at = Some(now),
            TransactionStatus::Failed => self.failed_at = Some(now),
            TransactionStatus::Cancelled => self.cancelled_at = Some(now),
            _ => {}
        }
        self.status = next;
        self.updated_at = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn draft(amount: &str, fee: &str) -> TransactionDraft {
        TransactionDraft {
            transaction_type: TransactionType::Deposit,
            payment_method: PaymentMethod::Ach,
            amount: BigDecimal::from_str(amount).unwrap(),
            fee_amount: BigDecimal::from_str(fee).unwrap(),
            description: "Investment deposit".to_string(),
            from_user_id: Some(Uuid::new_v4()),
            to_user_id: None,
            from_bank_account_id: None,
            to_bank_account_id: None,
            offering_id: Some(Uuid::new_v4()),
            provider_reference: None,
            metadata: TransactionMetadata::default(),
            ip_address: None,
            user_agent: None,
        }
    }

    fn initiated() -> Transaction {
        Transaction::initiate(
            draft("10000", "50.80"),
            "key-1".to_string(),
            ComplianceReport::from_checks(vec![]),
            Uuid::new_v4(),
            Utc::now(),
        )
    }

    #[test]
    fn initiate_derives_net_amount() {
        let tx = initiated();
        assert_eq!(tx.status, TransactionStatus::Initiated);
        assert_eq!(tx.net_amount, BigDecimal::from_str("9949.20").unwrap());
        assert!(tx.net_amount_holds());
    }

    #[test]
    fn terminal_statuses_have_no_outgoing_edges() {
        for status in [TransactionStatus::Completed, TransactionStatus::Cancelled] {
            for next in TransactionStatus::ALL {
                assert!(!status.can_transition_to(*next), "{} -> {}", status, next);
            }
        }
    }

    #[test]
    fn failed_only_moves_to_pending_retry() {
        let allowed: Vec<_> = TransactionStatus::ALL
            .iter()
            .filter(|next| TransactionStatus::Failed.can_transition_to(**next))
            .collect();
        assert_eq!(allowed, vec![&TransactionStatus::PendingRetry]);
    }

    #[test]
    fn transition_stamps_timestamps() {
        let mut tx = initiated();
        let now = Utc::now();
        tx.transition(TransactionStatus::Processing, now).unwrap();
        assert_eq!(tx.processed_at, Some(now));

        let err = tx.transition(TransactionStatus::Initiated, now).unwrap_err();
        assert_eq!(err.from, TransactionStatus::Processing);
        assert_eq!(err.to, TransactionStatus::Initiated);

        tx.transition(TransactionStatus::Cancelled, now).unwrap();
        assert_eq!(tx.cancelled_at, Some(now));
        assert!(tx.transition(TransactionStatus::Processing, now).is_err());
    }

    #[test]
    fn provider_completion_rejected_once_terminal() {
        let mut tx = initiated();
        let now = Utc::now();
        tx.complete_from_provider(now).unwrap();
        assert_eq!(tx.status, TransactionStatus::Completed);
        assert_eq!(tx.completed_at, Some(now));
        assert!(tx.processed_at.is_some());
        assert!(tx.complete_from_provider(now).is_err());
        assert!(tx.fail_from_provider("late", None, now).is_err());
    }

    #[test]
    fn provider_completion_accepted_after_failure() {
        let mut tx = initiated();
        let now = Utc::now();
        tx.fail_from_provider("processing_error", Some("processing_error".into()), now)
            .unwrap();
        assert!(tx.fail_from_provider("again", None, now).is_err());
        tx.complete_from_provider(now).unwrap();
        assert_eq!(tx.status, TransactionStatus::Completed);
    }

    #[test]
    fn serializes_type_and_status_as_wire_strings() {
        let tx = initiated();
        let json = serde_json::to_value(&tx).unwrap();
        assert_eq!(json["type"], "DEPOSIT");
        assert_eq!(json["paymentMethod"], "ACH");
        assert_eq!(json["status"], "INITIATED");
        assert_eq!(json["retryCount"], 0);
    }
}
