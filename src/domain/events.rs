use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use super::transaction::{Transaction, TransactionStatus, TransactionType};

/// Lifecycle notifications published after the originating mutation commits.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TransactionEvent {
    Created(TransactionSnapshot),
    Approved(TransactionSnapshot),
    Cancelled(TransactionSnapshot),
    Completed(TransactionSnapshot),
    Failed(TransactionSnapshot),
    RetryScheduled(TransactionSnapshot),
    Retried(TransactionSnapshot),
    BankAccountReverificationRequired {
        item_id: String,
        bank_account_ids: Vec<Uuid>,
        paused_transaction_ids: Vec<Uuid>,
    },
}

impl TransactionEvent {
    pub fn name(&self) -> &'static str {
        match self {
            TransactionEvent::Created(_) => "transaction.created",
            TransactionEvent::Approved(_) => "transaction.approved",
            TransactionEvent::Cancelled(_) => "transaction.cancelled",
            TransactionEvent::Completed(_) => "transaction.completed",
            TransactionEvent::Failed(_) => "transaction.failed",
            TransactionEvent::RetryScheduled(_) => "transaction.retry_scheduled",
            TransactionEvent::Retried(_) => "transaction.retried",
            TransactionEvent::BankAccountReverificationRequired { .. } => {
                "bank_account.reverification_required"
            }
        }
    }

    pub fn transaction_id(&self) -> Option<Uuid> {
        match self {
            TransactionEvent::Created(s)
            | TransactionEvent::Approved(s)
            | TransactionEvent::Cancelled(s)
            | TransactionEvent::Completed(s)
            | TransactionEvent::Failed(s)
            | TransactionEvent::RetryScheduled(s)
            | TransactionEvent::Retried(s) => Some(s.transaction_id),
            TransactionEvent::BankAccountReverificationRequired { .. } => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionSnapshot {
    pub transaction_id: Uuid,
    #[serde(rename = "type")]
    pub transaction_type: TransactionType,
    pub status: TransactionStatus,
    pub amount: BigDecimal,
    pub net_amount: BigDecimal,
    pub offering_id: Option<Uuid>,
    pub user_id: Option<Uuid>,
    pub failure_reason: Option<String>,
    pub retry_count: i32,
    pub at: DateTime<Utc>,
}

impl From<&Transaction> for TransactionSnapshot {
    fn from(tx: &Transaction) -> Self {
        Self {
            transaction_id: tx.id,
            transaction_type: tx.transaction_type,
            status: tx.status,
            amount: tx.amount.clone(),
            net_amount: tx.net_amount.clone(),
            offering_id: tx.offering_id,
            user_id: tx.investor_id(),
            failure_reason: tx.failure_reason.clone(),
            retry_count: tx.retry_count,
            at: tx.updated_at,
        }
    }
}
