//! Escrow ledger. The only code that moves an escrow balance.
//!
//! Every movement is keyed by `(account, transaction, direction)`: the entry
//! marker is checked and written in the same unit as the balance update, under
//! the account row lock, so replays are no-ops and concurrent debits serialize.

use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

use crate::domain::audit::ENTITY_ESCROW_ACCOUNT;
use crate::domain::{AuditEntry, EntryDirection, EscrowAccount, EscrowEntry};
use crate::error::AppError;
use crate::ports::{LedgerStore, LedgerTx, RepositoryResult};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EscrowApplied {
    pub account: EscrowAccount,
    /// False when the movement had already been applied for this transaction.
    pub applied: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BalanceCheck {
    pub account: EscrowAccount,
    pub cached_balance: BigDecimal,
    pub computed_balance: BigDecimal,
    pub entry_count: usize,
    /// The cached balance disagreed with the entries and was rewritten.
    pub repaired: bool,
}

#[derive(Clone)]
pub struct EscrowLedger {
    store: Arc<dyn LedgerStore>,
}

impl EscrowLedger {
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        Self { store }
    }

    /// Get-or-create; a new account starts at zero.
    pub async fn create_escrow_account(&self, offering_id: Uuid) -> Result<EscrowAccount, AppError> {
        let mut unit = self.store.begin().await?;
        let account = get_or_create(unit.as_mut(), offering_id, Utc::now()).await?;
        unit.commit().await?;
        Ok(account)
    }

    pub async fn get_escrow_account(&self, id: Uuid) -> Result<EscrowAccount, AppError> {
        let mut unit = self.store.begin().await?;
        unit.lock_escrow_account(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("escrow account {}", id)))
    }

    pub async fn get_by_offering(&self, offering_id: Uuid) -> Result<EscrowAccount, AppError> {
        self.store
            .get_escrow_account_by_offering(offering_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("escrow account for offering {}", offering_id)))
    }

    pub async fn deposit_funds(
        &self,
        escrow_account_id: Uuid,
        transaction_id: Uuid,
        amount: &BigDecimal,
    ) -> Result<EscrowApplied, AppError> {
        let mut unit = self.store.begin().await?;
        let outcome = credit(unit.as_mut(), escrow_account_id, transaction_id, amount, Utc::now(), "system").await?;
        unit.commit().await?;
        Ok(outcome)
    }

    pub async fn withdraw_funds(
        &self,
        escrow_account_id: Uuid,
        transaction_id: Uuid,
        amount: &BigDecimal,
    ) -> Result<EscrowApplied, AppError> {
        let mut unit = self.store.begin().await?;
        let outcome = debit(unit.as_mut(), escrow_account_id, transaction_id, amount, Utc::now(), "system").await?;
        unit.commit().await?;
        Ok(outcome)
    }

    /// Compares the cached balance with the entry log without writing anything.
    pub async fn check_balance(&self, escrow_account_id: Uuid) -> Result<BalanceCheck, AppError> {
        let mut unit = self.store.begin().await?;
        let (account, computed, entry_count) = load_with_entries(unit.as_mut(), escrow_account_id).await?;
        // Read-only: the unit is dropped uncommitted.
        drop(unit);

        Ok(BalanceCheck {
            cached_balance: account.balance().clone(),
            account,
            computed_balance: computed,
            entry_count,
            repaired: false,
        })
    }

    /// Recomputes the balance from the entry log and rewrites the cached value on drift.
    pub async fn recompute_balance(&self, escrow_account_id: Uuid) -> Result<BalanceCheck, AppError> {
        let mut unit = self.store.begin().await?;
        let (account, computed, entry_count) = load_with_entries(unit.as_mut(), escrow_account_id).await?;
        let cached = account.balance().clone();

        if computed == cached {
            return Ok(BalanceCheck {
                account,
                cached_balance: cached,
                computed_balance: computed,
                entry_count,
                repaired: false,
            });
        }

        tracing::warn!(
            escrow_account_id = %account.id,
            offering_id = %account.offering_id,
            cached = %cached,
            computed = %computed,
            "escrow balance drifted from entry log"
        );

        let now = Utc::now();
        let repaired = EscrowAccount::from_parts(
            account.id,
            account.offering_id,
            computed.clone(),
            account.created_at,
            now,
        );
        unit.update_escrow_balance(&repaired).await?;
        unit.insert_audit_entry(&AuditEntry::field_update(
            repaired.id,
            ENTITY_ESCROW_ACCOUNT,
            "balance",
            json!(cached.to_string()),
            json!(computed.to_string()),
            "system:recompute",
        ))
        .await?;
        unit.commit().await?;

        Ok(BalanceCheck {
            account: repaired,
            cached_balance: cached,
            computed_balance: computed,
            entry_count,
            repaired: true,
        })
    }
}

async fn load_with_entries(
    unit: &mut dyn LedgerTx,
    escrow_account_id: Uuid,
) -> Result<(EscrowAccount, BigDecimal, usize), AppError> {
    let account = unit
        .lock_escrow_account(escrow_account_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("escrow account {}", escrow_account_id)))?;
    let entries = unit.escrow_entries(account.id).await?;
    let computed = entries
        .iter()
        .fold(BigDecimal::from(0), |acc, entry| acc + entry.signed_amount());
    Ok((account, computed, entries.len()))
}

/// Returns the offering's account, opening one inside `unit` if needed.
pub async fn get_or_create(
    unit: &mut dyn LedgerTx,
    offering_id: Uuid,
    now: DateTime<Utc>,
) -> RepositoryResult<EscrowAccount> {
    if let Some(account) = unit.lock_escrow_account_by_offering(offering_id).await? {
        return Ok(account);
    }

    let account = EscrowAccount::open(offering_id, now);
    unit.insert_escrow_account_if_absent(&account).await?;

    // A concurrent unit may have won the insert; the stored row is authoritative.
    match unit.lock_escrow_account_by_offering(offering_id).await? {
        Some(stored) => {
            if stored.id == account.id {
                tracing::info!(escrow_account_id = %stored.id, offering_id = %offering_id, "escrow account opened");
                unit.insert_audit_entry(&AuditEntry::creation(
                    stored.id,
                    ENTITY_ESCROW_ACCOUNT,
                    json!({ "offering_id": offering_id, "balance": "0.00" }),
                    "system",
                ))
                .await?;
            }
            Ok(stored)
        }
        None => Err(crate::ports::RepositoryError::Database(format!(
            "escrow account for offering {} vanished after insert",
            offering_id
        ))),
    }
}

pub async fn credit(
    unit: &mut dyn LedgerTx,
    escrow_account_id: Uuid,
    transaction_id: Uuid,
    amount: &BigDecimal,
    now: DateTime<Utc>,
    actor: &str,
) -> Result<EscrowApplied, AppError> {
    apply(unit, escrow_account_id, transaction_id, EntryDirection::Credit, amount, now, actor).await
}

pub async fn debit(
    unit: &mut dyn LedgerTx,
    escrow_account_id: Uuid,
    transaction_id: Uuid,
    amount: &BigDecimal,
    now: DateTime<Utc>,
    actor: &str,
) -> Result<EscrowApplied, AppError> {
    apply(unit, escrow_account_id, transaction_id, EntryDirection::Debit, amount, now, actor).await
}

async fn apply(
    unit: &mut dyn LedgerTx,
    escrow_account_id: Uuid,
    transaction_id: Uuid,
    direction: EntryDirection,
    amount: &BigDecimal,
    now: DateTime<Utc>,
    actor: &str,
) -> Result<EscrowApplied, AppError> {
    if amount <= &BigDecimal::from(0) {
        return Err(AppError::Validation(format!(
            "escrow {} amount must be greater than zero",
            direction.as_str().to_lowercase()
        )));
    }

    let mut account = unit
        .lock_escrow_account(escrow_account_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("escrow account {}", escrow_account_id)))?;

    if unit
        .escrow_entry_exists(account.id, transaction_id, direction)
        .await?
    {
        tracing::debug!(
            escrow_account_id = %account.id,
            transaction_id = %transaction_id,
            direction = %direction,
            "escrow movement already applied"
        );
        return Ok(EscrowApplied {
            account,
            applied: false,
        });
    }

    if direction == EntryDirection::Debit && amount > account.balance() {
        return Err(AppError::InsufficientFunds(format!(
            "escrow account {} holds {}, cannot withdraw {}",
            account.id,
            account.balance(),
            amount
        )));
    }

    let before = account.balance().clone();
    account.apply(direction, amount, now);

    unit.update_escrow_balance(&account).await?;
    unit.insert_escrow_entry(&EscrowEntry::new(
        account.id,
        transaction_id,
        direction,
        amount.clone(),
        now,
    ))
    .await?;
    unit.insert_audit_entry(&AuditEntry::field_update(
        account.id,
        ENTITY_ESCROW_ACCOUNT,
        "balance",
        json!(before.to_string()),
        json!(account.balance().to_string()),
        actor,
    ))
    .await?;

    tracing::info!(
        escrow_account_id = %account.id,
        transaction_id = %transaction_id,
        direction = %direction,
        amount = %amount,
        balance = %account.balance(),
        "escrow movement applied"
    );

    Ok(EscrowApplied {
        account,
        applied: true,
    })
}
