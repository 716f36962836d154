//! Repository ports.
//!
//! Services talk to the ledger store only through these traits. Every
//! read-check-write sequence runs inside one [`LedgerTx`] unit of work: the
//! implementation guarantees the unit is atomic and that rows read through a
//! `lock_*` method cannot be changed by a concurrent unit until this one ends.

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::domain::{
    AuditEntry, BankAccount, EntryDirection, EscrowAccount, EscrowEntry, Investment,
    PaymentMethod, Transaction, TransactionStatus, TransactionType, WebhookEvent,
};

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("record not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("database error: {0}")]
    Database(String),
}

impl From<sqlx::Error> for RepositoryError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => RepositoryError::NotFound("row".to_string()),
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                RepositoryError::Conflict(db.message().to_string())
            }
            other => RepositoryError::Database(other.to_string()),
        }
    }
}

pub type RepositoryResult<T> = Result<T, RepositoryError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SortField {
    #[default]
    CreatedAt,
    Amount,
    Status,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

pub const DEFAULT_PAGE_SIZE: i64 = 20;
pub const MAX_PAGE_SIZE: i64 = 100;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionFilter {
    pub status: Option<TransactionStatus>,
    #[serde(rename = "type")]
    pub transaction_type: Option<TransactionType>,
    pub payment_method: Option<PaymentMethod>,
    pub offering_id: Option<Uuid>,
    /// Matches either party.
    pub user_id: Option<Uuid>,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
    pub sort_by: Option<SortField>,
    pub sort_order: Option<SortOrder>,
}

impl TransactionFilter {
    pub fn limit(&self) -> i64 {
        self.limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE)
    }

    pub fn offset(&self) -> i64 {
        self.offset.unwrap_or(0).max(0)
    }

    pub fn matches(&self, tx: &Transaction) -> bool {
        self.status.map_or(true, |s| tx.status == s)
            && self.transaction_type.map_or(true, |t| tx.transaction_type == t)
            && self.payment_method.map_or(true, |m| tx.payment_method == m)
            && self.offering_id.map_or(true, |o| tx.offering_id == Some(o))
            && self.user_id.map_or(true, |u| tx.involves(u))
            && self.start_date.map_or(true, |start| tx.created_at >= start)
            && self.end_date.map_or(true, |end| tx.created_at <= end)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransactionPage {
    pub transactions: Vec<Transaction>,
    pub total: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsFilter {
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub offering_id: Option<Uuid>,
}

/// Raw aggregates over COMPLETED transactions.
#[derive(Debug, Clone, PartialEq)]
pub struct TransactionTotals {
    pub total_volume: BigDecimal,
    pub total_fees: BigDecimal,
    pub transaction_count: i64,
}

#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Opens a unit of work.
    async fn begin(&self) -> RepositoryResult<Box<dyn LedgerTx>>;

    async fn ping(&self) -> RepositoryResult<()>;

    async fn get_transaction(&self, id: Uuid) -> RepositoryResult<Option<Transaction>>;

    async fn list_transactions(&self, filter: &TransactionFilter) -> RepositoryResult<TransactionPage>;

    async fn transaction_totals(&self, filter: &StatsFilter) -> RepositoryResult<TransactionTotals>;

    /// PENDING_RETRY rows whose `next_retry_at` has passed, oldest first.
    async fn due_retries(&self, now: DateTime<Utc>, limit: i64) -> RepositoryResult<Vec<Transaction>>;

    async fn get_webhook_event(&self, event_id: &str) -> RepositoryResult<Option<WebhookEvent>>;

    /// PENDING or FAILED events that have not exhausted `max_attempts`.
    async fn redeliverable_events(&self, max_attempts: i32, limit: i64) -> RepositoryResult<Vec<WebhookEvent>>;

    async fn get_escrow_account_by_offering(&self, offering_id: Uuid) -> RepositoryResult<Option<EscrowAccount>>;

    async fn audit_trail(&self, entity_id: Uuid) -> RepositoryResult<Vec<AuditEntry>>;
}

#[async_trait]
pub trait LedgerTx: Send {
    async fn find_transaction_by_idempotency_key(&mut self, key: &str) -> RepositoryResult<Option<Transaction>>;

    /// Fails with [`RepositoryError::Conflict`] when the idempotency key is taken.
    async fn insert_transaction(&mut self, tx: &Transaction) -> RepositoryResult<()>;

    async fn lock_transaction(&mut self, id: Uuid) -> RepositoryResult<Option<Transaction>>;

    async fn lock_transaction_by_provider_reference(&mut self, reference: &str) -> RepositoryResult<Option<Transaction>>;

    async fn save_transaction(&mut self, tx: &Transaction) -> RepositoryResult<()>;

    /// COMPLETED transactions where the user is a party, created at or after `since`.
    async fn completed_transactions_for_user(&mut self, user_id: Uuid, since: DateTime<Utc>) -> RepositoryResult<Vec<Transaction>>;

    /// Non-terminal, in-flight (PROCESSING or PENDING_RETRY) transactions touching any of the accounts.
    async fn lock_in_flight_transactions_for_bank_accounts(&mut self, bank_account_ids: &[Uuid]) -> RepositoryResult<Vec<Transaction>>;

    async fn lock_escrow_account(&mut self, id: Uuid) -> RepositoryResult<Option<EscrowAccount>>;

    async fn lock_escrow_account_by_offering(&mut self, offering_id: Uuid) -> RepositoryResult<Option<EscrowAccount>>;

    /// No-op when the offering already has an account.
    async fn insert_escrow_account_if_absent(&mut self, account: &EscrowAccount) -> RepositoryResult<()>;

    async fn update_escrow_balance(&mut self, account: &EscrowAccount) -> RepositoryResult<()>;

    async fn escrow_entry_exists(&mut self, escrow_account_id: Uuid, transaction_id: Uuid, direction: EntryDirection) -> RepositoryResult<bool>;

    async fn insert_escrow_entry(&mut self, entry: &EscrowEntry) -> RepositoryResult<()>;

    async fn escrow_entries(&mut self, escrow_account_id: Uuid) -> RepositoryResult<Vec<EscrowEntry>>;

    async fn insert_investment(&mut self, investment: &Investment) -> RepositoryResult<()>;

    /// Oldest PENDING investment of the user in the offering.
    async fn lock_pending_investment(&mut self, user_id: Uuid, offering_id: Uuid) -> RepositoryResult<Option<Investment>>;

    async fn save_investment(&mut self, investment: &Investment) -> RepositoryResult<()>;

    async fn insert_bank_account(&mut self, account: &BankAccount) -> RepositoryResult<()>;

    async fn lock_bank_accounts_by_item(&mut self, item_id: &str) -> RepositoryResult<Vec<BankAccount>>;

    async fn save_bank_account(&mut self, account: &BankAccount) -> RepositoryResult<()>;

    /// Returns false when an event with the same `event_id` already exists.
    async fn insert_webhook_event_if_absent(&mut self, event: &WebhookEvent) -> RepositoryResult<bool>;

    async fn lock_webhook_event(&mut self, event_id: &str) -> RepositoryResult<Option<WebhookEvent>>;

    async fn save_webhook_event(&mut self, event: &WebhookEvent) -> RepositoryResult<()>;

    async fn insert_audit_entry(&mut self, entry: &AuditEntry) -> RepositoryResult<()>;

    async fn commit(self: Box<Self>) -> RepositoryResult<()>;
}
