//! Webhook ingestion and reconciliation.
//!
//! Ingestion only persists the raw event (unique by provider `event_id`).
//! Processing applies it to the ledger in a single unit together with marking
//! the event PROCESSED; on error the unit is discarded and the failure is
//! recorded on the event in a fresh unit.

use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;
use uuid::Uuid;

use crate::domain::audit::{ENTITY_BANK_ACCOUNT, ENTITY_INVESTMENT, ENTITY_TRANSACTION};
use crate::domain::provider_event::{ItemErrorObject, PaymentObject, TransferObject};
use crate::domain::{
    AuditEntry, AuditNote, ProviderEvent, Transaction, TransactionEvent, TransactionStatus,
    TransferKind, WebhookEvent, WebhookStatus,
};
use crate::error::AppError;
use crate::ports::{LedgerStore, LedgerTx};
use crate::services::escrow;
use crate::services::events::EventEmitter;
use crate::services::retry::{self, FailureClass, RetryDecision};
use crate::validation::{validate_max_len, validate_required};

const WEBHOOK_ACTOR: &str = "system:webhook";
const EVENT_ID_MAX_LEN: usize = 255;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReceiveOutcome {
    pub event: WebhookEvent,
    pub duplicate: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessOutcome {
    Processed,
    AlreadyProcessed,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RedeliveryReport {
    pub attempted: usize,
    pub processed: usize,
    pub failed: usize,
}

/// Provider object the event refers to, used to backfill correlation data.
enum ProviderObjectRef<'a> {
    PaymentIntent(&'a str),
    Payout(&'a str),
    Transfer(&'a str),
}

impl<'a> ProviderObjectRef<'a> {
    fn transfer(kind: TransferKind, id: &'a str) -> Self {
        match kind {
            TransferKind::Payout => ProviderObjectRef::Payout(id),
            TransferKind::Transfer => ProviderObjectRef::Transfer(id),
        }
    }

    fn id(&self) -> &'a str {
        match *self {
            ProviderObjectRef::PaymentIntent(id)
            | ProviderObjectRef::Payout(id)
            | ProviderObjectRef::Transfer(id) => id,
        }
    }

    fn record(&self, tx: &mut Transaction) {
        let id = Some(self.id().to_string());
        match self {
            ProviderObjectRef::PaymentIntent(_) if tx.metadata.provider.payment_intent_id.is_none() => {
                tx.metadata.provider.payment_intent_id = id.clone()
            }
            ProviderObjectRef::Payout(_) if tx.metadata.provider.payout_id.is_none() => {
                tx.metadata.provider.payout_id = id.clone()
            }
            ProviderObjectRef::Transfer(_) if tx.metadata.provider.transfer_id.is_none() => {
                tx.metadata.provider.transfer_id = id.clone()
            }
            _ => {}
        }
        if tx.provider_reference.is_none() {
            tx.provider_reference = id;
        }
    }
}

#[derive(Clone)]
pub struct WebhookReconciler {
    store: Arc<dyn LedgerStore>,
    emitter: EventEmitter,
}

impl WebhookReconciler {
    pub fn new(store: Arc<dyn LedgerStore>, emitter: EventEmitter) -> Self {
        Self { store, emitter }
    }

    /// Persists the event as PENDING unless it is already known.
    pub async fn receive(&self, event_id: &str, payload: Value) -> Result<ReceiveOutcome, AppError> {
        validate_required("event_id", event_id)?;
        validate_max_len("event_id", event_id, EVENT_ID_MAX_LEN)?;

        let mut unit = self.store.begin().await?;
        let event = WebhookEvent::received(event_id, payload, Utc::now());

        if unit.insert_webhook_event_if_absent(&event).await? {
            unit.commit().await?;
            tracing::info!(event_id = %event.event_id, event_type = %event.event_type, "webhook event received");
            return Ok(ReceiveOutcome {
                event,
                duplicate: false,
            });
        }

        let stored = unit
            .lock_webhook_event(event_id)
            .await?
            .ok_or_else(|| AppError::Internal(format!("webhook event {} conflicted but is missing", event_id)))?;
        tracing::info!(event_id = %stored.event_id, status = %stored.status, "duplicate webhook delivery");
        Ok(ReceiveOutcome {
            event: stored,
            duplicate: true,
        })
    }

    pub async fn process(&self, event_id: &str) -> Result<ProcessOutcome, AppError> {
        let mut unit = self.store.begin().await?;
        let event = unit
            .lock_webhook_event(event_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("webhook event {}", event_id)))?;

        if event.status == WebhookStatus::Processed {
            tracing::debug!(event_id = %event_id, "webhook event already processed");
            return Ok(ProcessOutcome::AlreadyProcessed);
        }

        match self.apply(unit, event).await {
            Ok(events) => {
                self.emitter.emit_all(&events);
                Ok(ProcessOutcome::Processed)
            }
            Err(err) => {
                tracing::error!(event_id = %event_id, error = %err, "webhook processing failed");
                self.record_failure(event_id, &err).await;
                Err(err)
            }
        }
    }

    /// Re-processes PENDING and FAILED events that are still under the attempt cap.
    pub async fn redeliver(&self, max_attempts: i32, limit: i64) -> Result<RedeliveryReport, AppError> {
        let events = self.store.redeliverable_events(max_attempts, limit).await?;
        let mut report = RedeliveryReport::default();

        for event in events {
            report.attempted += 1;
            match self.process(&event.event_id).await {
                Ok(_) => report.processed += 1,
                Err(_) => report.failed += 1,
            }
        }

        if report.attempted > 0 {
            tracing::info!(
                attempted = report.attempted,
                processed = report.processed,
                failed = report.failed,
                "webhook redelivery pass finished"
            );
        }
        Ok(report)
    }

    /// Consumes the unit: it is either committed here or dropped (rolled back).
    async fn apply(&self, mut unit: Box<dyn LedgerTx>, mut event: WebhookEvent) -> Result<Vec<TransactionEvent>, AppError> {
        let now = Utc::now();
        let provider_event = ProviderEvent::parse(&event.event_type, &event.payload)
            .map_err(|e| AppError::Validation(e.to_string()))?;

        let emitted = match provider_event {
            ProviderEvent::PaymentSucceeded(object) => {
                let tx = correlate_payment(unit.as_mut(), &object).await?;
                on_success(unit.as_mut(), &event, tx, ProviderObjectRef::PaymentIntent(&object.id), now).await?
            }
            ProviderEvent::PaymentFailed(object) => {
                let tx = correlate_payment(unit.as_mut(), &object).await?;
                on_failure(
                    unit.as_mut(),
                    &event,
                    tx,
                    ProviderObjectRef::PaymentIntent(&object.id),
                    object.failure_code(),
                    object.failure_message(),
                    now,
                )
                .await?
            }
            ProviderEvent::TransferSucceeded(kind, object) => {
                let tx = correlate_transfer(unit.as_mut(), &object).await?;
                on_success(unit.as_mut(), &event, tx, ProviderObjectRef::transfer(kind, &object.id), now).await?
            }
            ProviderEvent::TransferFailed(kind, object) => {
                let tx = correlate_transfer(unit.as_mut(), &object).await?;
                on_failure(
                    unit.as_mut(),
                    &event,
                    tx,
                    ProviderObjectRef::transfer(kind, &object.id),
                    object.failure_code.as_deref(),
                    object.failure_message.as_deref(),
                    now,
                )
                .await?
            }
            ProviderEvent::ExternalAccountError(object) => on_item_error(unit.as_mut(), &object, now).await?,
            ProviderEvent::Unrecognized(event_type) => {
                tracing::info!(event_id = %event.event_id, event_type = %event_type, "unhandled webhook event type acknowledged");
                Vec::new()
            }
        };

        event.mark_processed(now);
        unit.save_webhook_event(&event).await?;
        unit.commit().await?;

        tracing::info!(
            event_id = %event.event_id,
            event_type = %event.event_type,
            emitted = emitted.len(),
            "webhook event processed"
        );
        Ok(emitted)
    }

    async fn record_failure(&self, event_id: &str, err: &AppError) {
        let result = async {
            let mut unit = self.store.begin().await?;
            if let Some(mut event) = unit.lock_webhook_event(event_id).await? {
                event.mark_failed(err.to_string());
                unit.save_webhook_event(&event).await?;
                unit.commit().await?;
            }
            Ok::<(), AppError>(())
        }
        .await;

        if let Err(record_err) = result {
            tracing::error!(event_id = %event_id, error = %record_err, "failed to record webhook failure");
        }
    }
}

async fn correlate(
    unit: &mut dyn LedgerTx,
    transaction_id: Option<Uuid>,
    provider_id: &str,
) -> Result<Option<Transaction>, AppError> {
    if let Some(id) = transaction_id {
        if let Some(tx) = unit.lock_transaction(id).await? {
            return Ok(Some(tx));
        }
    }
    Ok(unit.lock_transaction_by_provider_reference(provider_id).await?)
}

async fn correlate_payment(unit: &mut dyn LedgerTx, object: &PaymentObject) -> Result<Option<Transaction>, AppError> {
    correlate(unit, object.transaction_id(), &object.id).await
}

async fn correlate_transfer(unit: &mut dyn LedgerTx, object: &TransferObject) -> Result<Option<Transaction>, AppError> {
    correlate(unit, object.transaction_id(), &object.id).await
}

async fn on_success(
    unit: &mut dyn LedgerTx,
    event: &WebhookEvent,
    tx: Option<Transaction>,
    object: ProviderObjectRef<'_>,
    now: DateTime<Utc>,
) -> Result<Vec<TransactionEvent>, AppError> {
    let Some(mut tx) = tx else {
        tracing::warn!(event_id = %event.event_id, provider_id = %object.id(), "no transaction correlates with provider success");
        return Ok(Vec::new());
    };

    match tx.status {
        TransactionStatus::Completed => {
            tracing::debug!(transaction_id = %tx.id, "transaction already completed");
            return Ok(Vec::new());
        }
        TransactionStatus::Cancelled => {
            record_conflict(unit, event, &mut tx, now).await?;
            return Ok(Vec::new());
        }
        _ => {}
    }

    let before = tx.clone();
    let previous = tx.status;
    object.record(&mut tx);
    tx.complete_from_provider(now)?;

    if let Some(offering_id) = tx.offering_id {
        if tx.transaction_type.credits_escrow() {
            confirm_investment(unit, &tx, offering_id, now).await?;
            if tx.net_amount > BigDecimal::from(0) {
                let account = escrow::get_or_create(unit, offering_id, now).await?;
                escrow::credit(unit, account.id, tx.id, &tx.net_amount, now, WEBHOOK_ACTOR).await?;
            }
        } else if tx.transaction_type.debits_escrow() {
            let account = unit
                .lock_escrow_account_by_offering(offering_id)
                .await?
                .ok_or_else(|| AppError::NotFound(format!("escrow account for offering {}", offering_id)))?;
            match escrow::debit(unit, account.id, tx.id, &tx.amount, now, WEBHOOK_ACTOR).await {
                Ok(_) => {}
                // The provider has already paid out; redelivery cannot fix a short escrow.
                Err(AppError::InsufficientFunds(reason)) => {
                    tracing::error!(
                        transaction_id = %tx.id,
                        escrow_account_id = %account.id,
                        reason = %reason,
                        "paid-out transaction exceeds escrow balance"
                    );
                    let mut unchanged = before;
                    record_conflict(unit, event, &mut unchanged, now).await?;
                    return Ok(Vec::new());
                }
                Err(err) => return Err(err),
            }
        }
    }

    unit.save_transaction(&tx).await?;
    unit.insert_audit_entry(&status_audit(&tx, previous)).await?;

    tracing::info!(transaction_id = %tx.id, event_id = %event.event_id, "transaction completed by provider");
    Ok(vec![TransactionEvent::Completed((&tx).into())])
}

async fn on_failure(
    unit: &mut dyn LedgerTx,
    event: &WebhookEvent,
    tx: Option<Transaction>,
    object: ProviderObjectRef<'_>,
    code: Option<&str>,
    message: Option<&str>,
    now: DateTime<Utc>,
) -> Result<Vec<TransactionEvent>, AppError> {
    let Some(mut tx) = tx else {
        tracing::warn!(event_id = %event.event_id, provider_id = %object.id(), "no transaction correlates with provider failure");
        return Ok(Vec::new());
    };

    match tx.status {
        TransactionStatus::Failed | TransactionStatus::PendingRetry => {
            tracing::debug!(transaction_id = %tx.id, status = %tx.status, "failure already recorded");
            return Ok(Vec::new());
        }
        TransactionStatus::Completed | TransactionStatus::Cancelled => {
            record_conflict(unit, event, &mut tx, now).await?;
            return Ok(Vec::new());
        }
        _ => {}
    }

    let class = retry::classify_failure(code);
    let reason = message
        .or(code)
        .map(str::to_string)
        .unwrap_or_else(|| "payment failed".to_string());

    let previous = tx.status;
    object.record(&mut tx);
    tx.fail_from_provider(reason, code.map(str::to_string), now)?;
    tx.metadata.note(AuditNote::ProviderFailure {
        code: code.map(str::to_string),
        message: message.map(str::to_string),
        retryable: class == FailureClass::Retryable,
        at: now,
    });

    let mut emitted = vec![TransactionEvent::Failed((&tx).into())];
    if class == FailureClass::Retryable {
        if let RetryDecision::Scheduled { next_retry_at } = retry::schedule_retry(&mut tx, now)? {
            tracing::info!(transaction_id = %tx.id, next_retry_at = %next_retry_at, "retry scheduled");
            emitted.push(TransactionEvent::RetryScheduled((&tx).into()));
        }
    }

    unit.save_transaction(&tx).await?;
    unit.insert_audit_entry(&status_audit(&tx, previous)).await?;

    tracing::warn!(
        transaction_id = %tx.id,
        event_id = %event.event_id,
        failure_code = ?code,
        retryable = class == FailureClass::Retryable,
        "transaction failed at provider"
    );
    Ok(emitted)
}

async fn on_item_error(
    unit: &mut dyn LedgerTx,
    object: &ItemErrorObject,
    now: DateTime<Utc>,
) -> Result<Vec<TransactionEvent>, AppError> {
    let mut accounts = unit.lock_bank_accounts_by_item(&object.item_id).await?;
    if accounts.is_empty() {
        tracing::info!(item_id = %object.item_id, "no linked bank accounts for item");
        return Ok(Vec::new());
    }

    for account in accounts.iter_mut() {
        let previous = account.verification_status;
        if account.require_reverification(now) {
            unit.save_bank_account(account).await?;
            unit.insert_audit_entry(&AuditEntry::field_update(
                account.id,
                ENTITY_BANK_ACCOUNT,
                "verification_status",
                json!(previous),
                json!(account.verification_status),
                WEBHOOK_ACTOR,
            ))
            .await?;
        }
    }

    let bank_account_ids: Vec<Uuid> = accounts.iter().map(|a| a.id).collect();
    let code = object.error_code().unwrap_or("ITEM_LOGIN_REQUIRED");
    let in_flight = unit
        .lock_in_flight_transactions_for_bank_accounts(&bank_account_ids)
        .await?;

    let mut emitted = Vec::new();
    let mut paused_transaction_ids = Vec::new();
    for mut tx in in_flight {
        let previous = tx.status;
        tx.fail_from_provider(
            format!("linked bank account requires re-verification ({})", code),
            Some(code.to_string()),
            now,
        )?;
        unit.save_transaction(&tx).await?;
        unit.insert_audit_entry(&status_audit(&tx, previous)).await?;
        paused_transaction_ids.push(tx.id);
        emitted.push(TransactionEvent::Failed((&tx).into()));
    }

    tracing::warn!(
        item_id = %object.item_id,
        bank_accounts = bank_account_ids.len(),
        failed_transactions = paused_transaction_ids.len(),
        "linked bank account requires re-verification"
    );
    emitted.push(TransactionEvent::BankAccountReverificationRequired {
        item_id: object.item_id.clone(),
        bank_account_ids,
        paused_transaction_ids,
    });
    Ok(emitted)
}

async fn confirm_investment(
    unit: &mut dyn LedgerTx,
    tx: &Transaction,
    offering_id: Uuid,
    now: DateTime<Utc>,
) -> Result<(), AppError> {
    let Some(user_id) = tx.from_user_id else {
        return Ok(());
    };
    let Some(mut investment) = unit.lock_pending_investment(user_id, offering_id).await? else {
        tracing::debug!(transaction_id = %tx.id, user_id = %user_id, "no pending investment to confirm");
        return Ok(());
    };

    let previous = investment.status;
    investment.confirm(tx.id, now);
    unit.save_investment(&investment).await?;
    unit.insert_audit_entry(&AuditEntry::field_update(
        investment.id,
        ENTITY_INVESTMENT,
        "status",
        json!(previous),
        json!(investment.status),
        WEBHOOK_ACTOR,
    ))
    .await?;
    tracing::info!(investment_id = %investment.id, transaction_id = %tx.id, "investment confirmed");
    Ok(())
}

/// The provider disagrees with a terminal local status: keep the local status,
/// note the disagreement and acknowledge the event.
async fn record_conflict(
    unit: &mut dyn LedgerTx,
    event: &WebhookEvent,
    tx: &mut Transaction,
    now: DateTime<Utc>,
) -> Result<(), AppError> {
    tracing::warn!(
        transaction_id = %tx.id,
        event_id = %event.event_id,
        event_type = %event.event_type,
        status = %tx.status,
        "provider event conflicts with local status"
    );
    tx.metadata.note(AuditNote::ReconciliationConflict {
        event_id: event.event_id.clone(),
        event_type: event.event_type.clone(),
        status: tx.status.to_string(),
        at: now,
    });
    tx.updated_at = now;
    unit.save_transaction(tx).await?;
    Ok(())
}

fn status_audit(tx: &Transaction, previous: TransactionStatus) -> AuditEntry {
    AuditEntry::field_update(
        tx.id,
        ENTITY_TRANSACTION,
        "status",
        json!(previous),
        json!(tx.status),
        WEBHOOK_ACTOR,
    )
}
