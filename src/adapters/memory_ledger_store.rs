//! In-process implementation of the ledger ports.
//!
//! A unit of work holds the store's single async mutex for its whole lifetime and
//! mutates a scratch copy of the state, so units are serializable and a dropped
//! unit leaves no trace. Used for local runs without `DATABASE_URL` and in tests.

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use crate::domain::{
    AuditEntry, BankAccount, EntryDirection, EscrowAccount, EscrowEntry, Investment,
    InvestmentStatus, Transaction, TransactionStatus, WebhookEvent, WebhookStatus,
};
use crate::ports::{
    LedgerStore, LedgerTx, RepositoryError, RepositoryResult, SortField, SortOrder, StatsFilter,
    TransactionFilter, TransactionPage, TransactionTotals,
};

#[derive(Debug, Clone, Default)]
struct LedgerState {
    transactions: HashMap<Uuid, Transaction>,
    idempotency_index: HashMap<String, Uuid>,
    escrow_accounts: HashMap<Uuid, EscrowAccount>,
    escrow_entries: Vec<EscrowEntry>,
    investments: HashMap<Uuid, Investment>,
    bank_accounts: HashMap<Uuid, BankAccount>,
    webhook_events: HashMap<String, WebhookEvent>,
    audit_log: Vec<AuditEntry>,
}

#[derive(Clone, Default)]
pub struct MemoryLedgerStore {
    state: Arc<Mutex<LedgerState>>,
}

impl MemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LedgerStore for MemoryLedgerStore {
    async fn begin(&self) -> RepositoryResult<Box<dyn LedgerTx>> {
        let guard = self.state.clone().lock_owned().await;
        let scratch = guard.clone();
        Ok(Box::new(MemoryLedgerTx { guard, scratch }))
    }

    async fn ping(&self) -> RepositoryResult<()> {
        Ok(())
    }

    async fn get_transaction(&self, id: Uuid) -> RepositoryResult<Option<Transaction>> {
        Ok(self.state.lock().await.transactions.get(&id).cloned())
    }

    async fn list_transactions(&self, filter: &TransactionFilter) -> RepositoryResult<TransactionPage> {
        let state = self.state.lock().await;
        let mut matching: Vec<Transaction> = state
            .transactions
            .values()
            .filter(|tx| filter.matches(tx))
            .cloned()
            .collect();

        let field = filter.sort_by.unwrap_or_default();
        let order = filter.sort_order.unwrap_or_default();
        matching.sort_by(|a, b| {
            let ordering = compare(a, b, field).then_with(|| a.id.cmp(&b.id));
            match order {
                SortOrder::Asc => ordering,
                SortOrder::Desc => ordering.reverse(),
            }
        });

        let total = matching.len() as i64;
        let transactions = matching
            .into_iter()
            .skip(filter.offset() as usize)
            .take(filter.limit() as usize)
            .collect();

        Ok(TransactionPage { transactions, total })
    }

    async fn transaction_totals(&self, filter: &StatsFilter) -> RepositoryResult<TransactionTotals> {
        let state = self.state.lock().await;
        let mut totals = TransactionTotals {
            total_volume: BigDecimal::from(0),
            total_fees: BigDecimal::from(0),
            transaction_count: 0,
        };

        for tx in state.transactions.values() {
            if tx.status != TransactionStatus::Completed
                || filter.offering_id.map_or(false, |o| tx.offering_id != Some(o))
                || filter.start_date.map_or(false, |start| tx.created_at < start)
                || filter.end_date.map_or(false, |end| tx.created_at > end)
            {
                continue;
            }
            totals.total_volume = totals.total_volume + tx.amount.clone();
            totals.total_fees = totals.total_fees + tx.fee_amount.clone();
            totals.transaction_count += 1;
        }

        Ok(totals)
    }

    async fn due_retries(&self, now: DateTime<Utc>, limit: i64) -> RepositoryResult<Vec<Transaction>> {
        let state = self.state.lock().await;
        let mut due: Vec<Transaction> = state
            .transactions
            .values()
            .filter(|tx| {
                tx.status == TransactionStatus::PendingRetry
                    && tx.next_retry_at.map_or(false, |at| at <= now)
            })
            .cloned()
            .collect();
        due.sort_by_key(|tx| tx.next_retry_at);
        due.truncate(limit.max(0) as usize);
        Ok(due)
    }

    async fn get_webhook_event(&self, event_id: &str) -> RepositoryResult<Option<WebhookEvent>> {
        Ok(self.state.lock().await.webhook_events.get(event_id).cloned())
    }

    async fn redeliverable_events(&self, max_attempts: i32, limit: i64) -> RepositoryResult<Vec<WebhookEvent>> {
        let state = self.state.lock().await;
        let mut events: Vec<WebhookEvent> = state
            .webhook_events
            .values()
            .filter(|e| e.status != WebhookStatus::Processed && e.retry_count < max_attempts)
            .cloned()
            .collect();
        events.sort_by_key(|e| e.received_at);
        events.truncate(limit.max(0) as usize);
        Ok(events)
    }

    async fn get_escrow_account_by_offering(&self, offering_id: Uuid) -> RepositoryResult<Option<EscrowAccount>> {
        let state = self.state.lock().await;
        Ok(state
            .escrow_accounts
            .values()
            .find(|a| a.offering_id == offering_id)
            .cloned())
    }

    async fn audit_trail(&self, entity_id: Uuid) -> RepositoryResult<Vec<AuditEntry>> {
        let state = self.state.lock().await;
        Ok(state
            .audit_log
            .iter()
            .filter(|e| e.entity_id == entity_id)
            .cloned()
            .collect())
    }
}

fn compare(a: &Transaction, b: &Transaction, field: SortField) -> Ordering {
    match field {
        SortField::CreatedAt => a.created_at.cmp(&b.created_at),
        SortField::Amount => a.amount.cmp(&b.amount),
        SortField::Status => a.status.as_str().cmp(b.status.as_str()),
    }
}

struct MemoryLedgerTx {
    guard: OwnedMutexGuard<LedgerState>,
    scratch: LedgerState,
}

#[async_trait]
impl LedgerTx for MemoryLedgerTx {
    async fn find_transaction_by_idempotency_key(&mut self, key: &str) -> RepositoryResult<Option<Transaction>> {
        Ok(self
            .scratch
            .idempotency_index
            .get(key)
            .and_then(|id| self.scratch.transactions.get(id))
            .cloned())
    }

    async fn insert_transaction(&mut self, tx: &Transaction) -> RepositoryResult<()> {
        if self.scratch.idempotency_index.contains_key(&tx.idempotency_key) {
            return Err(RepositoryError::Conflict(format!(
                "idempotency key {} already used",
                tx.idempotency_key
            )));
        }
        self.scratch
            .idempotency_index
            .insert(tx.idempotency_key.clone(), tx.id);
        self.scratch.transactions.insert(tx.id, tx.clone());
        Ok(())
    }

    async fn lock_transaction(&mut self, id: Uuid) -> RepositoryResult<Option<Transaction>> {
        Ok(self.scratch.transactions.get(&id).cloned())
    }

    async fn lock_transaction_by_provider_reference(&mut self, reference: &str) -> RepositoryResult<Option<Transaction>> {
        Ok(self
            .scratch
            .transactions
            .values()
            .find(|tx| tx.provider_reference.as_deref() == Some(reference))
            .cloned())
    }

    async fn save_transaction(&mut self, tx: &Transaction) -> RepositoryResult<()> {
        match self.scratch.transactions.get_mut(&tx.id) {
            Some(stored) => {
                *stored = tx.clone();
                Ok(())
            }
            None => Err(RepositoryError::NotFound(format!("transaction {}", tx.id))),
        }
    }

    async fn completed_transactions_for_user(&mut self, user_id: Uuid, since: DateTime<Utc>) -> RepositoryResult<Vec<Transaction>> {
        Ok(self
            .scratch
            .transactions
            .values()
            .filter(|tx| {
                tx.status == TransactionStatus::Completed
                    && tx.created_at >= since
                    && (tx.from_user_id == Some(user_id) || tx.to_user_id == Some(user_id))
            })
            .cloned()
            .collect())
    }

    async fn lock_in_flight_transactions_for_bank_accounts(&mut self, bank_account_ids: &[Uuid]) -> RepositoryResult<Vec<Transaction>> {
        let touches = |id: Option<Uuid>| id.map_or(false, |id| bank_account_ids.contains(&id));
        Ok(self
            .scratch
            .transactions
            .values()
            .filter(|tx| {
                matches!(
                    tx.status,
                    TransactionStatus::Processing | TransactionStatus::PendingRetry
                ) && (touches(tx.from_bank_account_id) || touches(tx.to_bank_account_id))
            })
            .cloned()
            .collect())
    }

    async fn lock_escrow_account(&mut self, id: Uuid) -> RepositoryResult<Option<EscrowAccount>> {
        Ok(self.scratch.escrow_accounts.get(&id).cloned())
    }

    async fn lock_escrow_account_by_offering(&mut self, offering_id: Uuid) -> RepositoryResult<Option<EscrowAccount>> {
        Ok(self
            .scratch
            .escrow_accounts
            .values()
            .find(|a| a.offering_id == offering_id)
            .cloned())
    }

    async fn insert_escrow_account_if_absent(&mut self, account: &EscrowAccount) -> RepositoryResult<()> {
        let exists = self
            .scratch
            .escrow_accounts
            .values()
            .any(|a| a.offering_id == account.offering_id);
        if !exists {
            self.scratch
                .escrow_accounts
                .insert(account.id, account.clone());
        }
        Ok(())
    }

    async fn update_escrow_balance(&mut self, account: &EscrowAccount) -> RepositoryResult<()> {
        match self.scratch.escrow_accounts.get_mut(&account.id) {
            Some(stored) => {
                *stored = account.clone();
                Ok(())
            }
            None => Err(RepositoryError::NotFound(format!("escrow account {}", account.id))),
        }
    }

    async fn escrow_entry_exists(&mut self, escrow_account_id: Uuid, transaction_id: Uuid, direction: EntryDirection) -> RepositoryResult<bool> {
        Ok(self.scratch.escrow_entries.iter().any(|e| {
            e.escrow_account_id == escrow_account_id
                && e.transaction_id == transaction_id
                && e.direction == direction
        }))
    }

    async fn insert_escrow_entry(&mut self, entry: &EscrowEntry) -> RepositoryResult<()> {
        if self
            .escrow_entry_exists(entry.escrow_account_id, entry.transaction_id, entry.direction)
            .await?
        {
            return Err(RepositoryError::Conflict(format!(
                "{} for transaction {} already applied",
                entry.direction, entry.transaction_id
            )));
        }
        self.scratch.escrow_entries.push(entry.clone());
        Ok(())
    }

    async fn escrow_entries(&mut self, escrow_account_id: Uuid) -> RepositoryResult<Vec<EscrowEntry>> {
        Ok(self
            .scratch
            .escrow_entries
            .iter()
            .filter(|e| e.escrow_account_id == escrow_account_id)
            .cloned()
            .collect())
    }

    async fn insert_investment(&mut self, investment: &Investment) -> RepositoryResult<()> {
        self.scratch
            .investments
            .insert(investment.id, investment.clone());
        Ok(())
    }

    async fn lock_pending_investment(&mut self, user_id: Uuid, offering_id: Uuid) -> RepositoryResult<Option<Investment>> {
        Ok(self
            .scratch
            .investments
            .values()
            .filter(|i| {
                i.user_id == user_id
                    && i.offering_id == offering_id
                    && i.status == InvestmentStatus::Pending
            })
            .min_by_key(|i| i.created_at)
            .cloned())
    }

    async fn save_investment(&mut self, investment: &Investment) -> RepositoryResult<()> {
        match self.scratch.investments.get_mut(&investment.id) {
            Some(stored) => {
                *stored = investment.clone();
                Ok(())
            }
            None => Err(RepositoryError::NotFound(format!("investment {}", investment.id))),
        }
    }

    async fn insert_bank_account(&mut self, account: &BankAccount) -> RepositoryResult<()> {
        self.scratch
            .bank_accounts
            .insert(account.id, account.clone());
        Ok(())
    }

    async fn lock_bank_accounts_by_item(&mut self, item_id: &str) -> RepositoryResult<Vec<BankAccount>> {
        Ok(self
            .scratch
            .bank_accounts
            .values()
            .filter(|a| a.external_item_id == item_id)
            .cloned()
            .collect())
    }

    async fn save_bank_account(&mut self, account: &BankAccount) -> RepositoryResult<()> {
        match self.scratch.bank_accounts.get_mut(&account.id) {
            Some(stored) => {
                *stored = account.clone();
                Ok(())
            }
            None => Err(RepositoryError::NotFound(format!("bank account {}", account.id))),
        }
    }

    async fn insert_webhook_event_if_absent(&mut self, event: &WebhookEvent) -> RepositoryResult<bool> {
        if self.scratch.webhook_events.contains_key(&event.event_id) {
            return Ok(false);
        }
        self.scratch
            .webhook_events
            .insert(event.event_id.clone(), event.clone());
        Ok(true)
    }

    async fn lock_webhook_event(&mut self, event_id: &str) -> RepositoryResult<Option<WebhookEvent>> {
        Ok(self.scratch.webhook_events.get(event_id).cloned())
    }

    async fn save_webhook_event(&mut self, event: &WebhookEvent) -> RepositoryResult<()> {
        match self.scratch.webhook_events.get_mut(&event.event_id) {
            Some(stored) => {
                *stored = event.clone();
                Ok(())
            }
            None => Err(RepositoryError::NotFound(format!("webhook event {}", event.event_id))),
        }
    }

    async fn insert_audit_entry(&mut self, entry: &AuditEntry) -> RepositoryResult<()> {
        self.scratch.audit_log.push(entry.clone());
        Ok(())
    }

    async fn commit(self: Box<Self>) -> RepositoryResult<()> {
        let MemoryLedgerTx { mut guard, scratch } = *self;
        *guard = scratch;
        Ok(())
    }
}
