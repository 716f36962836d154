//! Transaction orchestrator: creation, the local state machine and retries.
//!
//! Every read-check-write runs in one [`LedgerTx`] unit. Events are emitted only
//! after the unit commits.

use bigdecimal::BigDecimal;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::sync::Arc;
use uuid::Uuid;

use crate::domain::audit::ENTITY_TRANSACTION;
use crate::domain::{
    Actor, AuditEntry, AuditNote, ComplianceCheck, PaymentMethod, Transaction, TransactionDraft,
    TransactionEvent, TransactionMetadata, TransactionStatus, TransactionType,
};
use crate::error::AppError;
use crate::ports::{
    LedgerStore, LedgerTx, RepositoryError, StatsFilter, TransactionFilter, TransactionPage,
};
use crate::services::compliance::{self, ComplianceContext, ComplianceLimits};
use crate::services::events::EventEmitter;
use crate::services::fees;
use crate::services::retry::{self, RetryDecision, MAX_RETRY_ATTEMPTS};
use crate::validation::{
    sanitize_string, validate_fee, validate_idempotency_key, validate_max_len, validate_parties,
    validate_positive_amount, validate_required, CANCEL_REASON_MAX_LEN, DESCRIPTION_MAX_LEN,
    INTERNAL_MEMO_MAX_LEN, PROVIDER_REFERENCE_MAX_LEN,
};

/// Width of the bucket used when deriving an idempotency key.
pub const DERIVED_KEY_WINDOW_SECS: i64 = 60;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitiateRequest {
    #[serde(rename = "type")]
    pub transaction_type: TransactionType,
    pub payment_method: PaymentMethod,
    pub amount: BigDecimal,
    #[serde(default)]
    pub fee_amount: Option<BigDecimal>,
    pub description: String,
    #[serde(default)]
    pub from_user_id: Option<Uuid>,
    #[serde(default)]
    pub to_user_id: Option<Uuid>,
    #[serde(default)]
    pub from_bank_account_id: Option<Uuid>,
    #[serde(default)]
    pub to_bank_account_id: Option<Uuid>,
    #[serde(default)]
    pub offering_id: Option<Uuid>,
    #[serde(default)]
    pub provider_reference: Option<String>,
    #[serde(default)]
    pub idempotency_key: Option<String>,
    /// Stored under `metadata.extra`.
    #[serde(default)]
    pub metadata: BTreeMap<String, Value>,
    #[serde(skip)]
    pub ip_address: Option<String>,
    #[serde(skip)]
    pub user_agent: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InitiateOutcome {
    pub transaction: Transaction,
    pub estimated_settlement_date: NaiveDate,
    pub requires_approval: bool,
    pub compliance_checks: Vec<ComplianceCheck>,
    /// False when an existing row was returned for the idempotency key.
    pub created: bool,
}

impl InitiateOutcome {
    fn from_transaction(transaction: Transaction, created: bool) -> Self {
        Self {
            estimated_settlement_date: fees::estimated_settlement_date(
                transaction.payment_method,
                transaction.created_at,
            ),
            requires_approval: transaction.requires_approval,
            compliance_checks: transaction.compliance_check_data.checks.clone(),
            transaction,
            created,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateTransactionRequest {
    pub description: Option<String>,
    pub internal_memo: Option<String>,
    /// Merged into `metadata.extra`; a null value removes the key.
    pub metadata: Option<BTreeMap<String, Value>>,
    pub provider_reference: Option<String>,
    pub status: Option<TransactionStatus>,
}

impl UpdateTransactionRequest {
    fn touches_lifecycle(&self) -> bool {
        self.status.is_some() || self.provider_reference.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionStatistics {
    pub total_volume: BigDecimal,
    pub total_fees: BigDecimal,
    pub transaction_count: i64,
    pub avg_transaction_amount: BigDecimal,
}

#[derive(Clone)]
pub struct TransactionOrchestrator {
    store: Arc<dyn LedgerStore>,
    emitter: EventEmitter,
    limits: ComplianceLimits,
}

impl TransactionOrchestrator {
    pub fn new(store: Arc<dyn LedgerStore>, emitter: EventEmitter, limits: ComplianceLimits) -> Self {
        Self {
            store,
            emitter,
            limits,
        }
    }

    pub async fn initiate(&self, request: InitiateRequest, actor: &Actor) -> Result<InitiateOutcome, AppError> {
        let now = Utc::now();
        let idempotency_key = match request.idempotency_key.as_deref() {
            Some(key) => {
                validate_idempotency_key(key)?;
                key.to_string()
            }
            None => derive_idempotency_key(actor.id, &request, now)?,
        };
        let draft = build_draft(request)?;

        let mut unit = self.store.begin().await?;
        if let Some(existing) = unit.find_transaction_by_idempotency_key(&idempotency_key).await? {
            return replay(existing, &idempotency_key, actor);
        }

        let subject = draft
            .from_user_id
            .or(draft.to_user_id)
            .unwrap_or(actor.id);
        let recent = unit
            .completed_transactions_for_user(subject, now - compliance::history_window())
            .await?;
        let report = compliance::evaluate(
            &self.limits,
            &ComplianceContext {
                amount: &draft.amount,
                recent_completed: &recent,
            },
        );

        if report.is_blocked() {
            let failed: Vec<&str> = report.hard_failures().map(|c| c.check_type.as_str()).collect();
            tracing::warn!(
                user_id = %subject,
                amount = %draft.amount,
                checks = ?failed,
                "transaction rejected by compliance"
            );
            return Err(AppError::ComplianceRejected(failed.join(", ")));
        }

        let transaction = Transaction::initiate(draft, idempotency_key.clone(), report, actor.id, now);

        match unit.insert_transaction(&transaction).await {
            Ok(()) => {}
            Err(RepositoryError::Conflict(_)) => {
                drop(unit);
                return self.replay_winner(&idempotency_key, actor).await;
            }
            Err(err) => return Err(err.into()),
        }

        unit.insert_audit_entry(&AuditEntry::creation(
            transaction.id,
            ENTITY_TRANSACTION,
            json!({
                "type": transaction.transaction_type,
                "payment_method": transaction.payment_method,
                "amount": transaction.amount.to_string(),
                "fee_amount": transaction.fee_amount.to_string(),
                "net_amount": transaction.net_amount.to_string(),
                "status": transaction.status,
                "requires_approval": transaction.requires_approval,
            }),
            actor.audit_label(),
        ))
        .await?;

        match unit.commit().await {
            Ok(()) => {}
            Err(RepositoryError::Conflict(_)) => return self.replay_winner(&idempotency_key, actor).await,
            Err(err) => return Err(err.into()),
        }

        tracing::info!(
            transaction_id = %transaction.id,
            transaction_type = %transaction.transaction_type,
            amount = %transaction.amount,
            requires_approval = transaction.requires_approval,
            "transaction initiated"
        );
        self.emitter
            .emit(&TransactionEvent::Created((&transaction).into()));

        Ok(InitiateOutcome::from_transaction(transaction, true))
    }

    /// Re-reads the row that won an idempotency-key race.
    async fn replay_winner(&self, idempotency_key: &str, actor: &Actor) -> Result<InitiateOutcome, AppError> {
        let mut unit = self.store.begin().await?;
        let existing = unit
            .find_transaction_by_idempotency_key(idempotency_key)
            .await?
            .ok_or_else(|| {
                AppError::Internal(format!("idempotency key {} conflicted but no row found", idempotency_key))
            })?;
        replay(existing, idempotency_key, actor)
    }

    pub async fn get(&self, id: Uuid, actor: &Actor) -> Result<Transaction, AppError> {
        self.store
            .get_transaction(id)
            .await?
            .filter(|tx| visible_to(tx, actor))
            .ok_or_else(|| not_found(id))
    }

    /// Non-elevated actors only ever see their own transactions.
    pub async fn list(&self, mut filter: TransactionFilter, actor: &Actor) -> Result<TransactionPage, AppError> {
        if !actor.is_elevated() {
            filter.user_id = Some(actor.id);
        }
        Ok(self.store.list_transactions(&filter).await?)
    }

    pub async fn update(
        &self,
        id: Uuid,
        patch: UpdateTransactionRequest,
        actor: &Actor,
    ) -> Result<Transaction, AppError> {
        if patch.touches_lifecycle() && !actor.is_elevated() {
            return Err(AppError::Forbidden(
                "only elevated actors may change status or provider reference".to_string(),
            ));
        }

        let now = Utc::now();
        let mut unit = self.store.begin().await?;
        let mut tx = lock_visible(unit.as_mut(), id, actor).await?;
        let mut audit = Vec::new();
        let label = actor.audit_label();

        if let Some(next) = patch.status {
            if tx.status.is_terminal() {
                return Err(AppError::InvalidStateTransition(format!(
                    "transaction {} is {} and only accepts cosmetic updates",
                    tx.id, tx.status
                )));
            }
            if !matches!(next, TransactionStatus::PendingApproval | TransactionStatus::Processing) {
                return Err(AppError::InvalidStateTransition(format!(
                    "status {} is set by its dedicated operation, not by update",
                    next
                )));
            }
            if next == TransactionStatus::Processing && !tx.approval_satisfied() {
                return Err(AppError::InvalidStateTransition(format!(
                    "transaction {} requires approval before processing",
                    tx.id
                )));
            }
            let previous = tx.status;
            if previous != next {
                tx.transition(next, now)?;
                audit.push(AuditEntry::field_update(
                    tx.id,
                    ENTITY_TRANSACTION,
                    "status",
                    json!(previous),
                    json!(next),
                    label.clone(),
                ));
            }
        }

        if let Some(reference) = patch.provider_reference {
            if tx.status.is_terminal() {
                return Err(AppError::InvalidStateTransition(format!(
                    "transaction {} is {} and only accepts cosmetic updates",
                    tx.id, tx.status
                )));
            }
            let reference = sanitize_string(&reference);
            validate_required("provider_reference", &reference)?;
            validate_max_len("provider_reference", &reference, PROVIDER_REFERENCE_MAX_LEN)?;
            audit.push(AuditEntry::field_update(
                tx.id,
                ENTITY_TRANSACTION,
                "provider_reference",
                json!(tx.provider_reference),
                json!(reference),
                label.clone(),
            ));
            tx.provider_reference = Some(reference);
        }

        if let Some(description) = patch.description {
            let description = sanitize_string(&description);
            validate_required("description", &description)?;
            validate_max_len("description", &description, DESCRIPTION_MAX_LEN)?;
            audit.push(AuditEntry::field_update(
                tx.id,
                ENTITY_TRANSACTION,
                "description",
                json!(tx.description),
                json!(description),
                label.clone(),
            ));
            tx.description = description;
        }

        if let Some(memo) = patch.internal_memo {
            validate_max_len("internal_memo", &memo, INTERNAL_MEMO_MAX_LEN)?;
            let memo = if memo.trim().is_empty() { None } else { Some(memo) };
            audit.push(AuditEntry::field_update(
                tx.id,
                ENTITY_TRANSACTION,
                "internal_memo",
                json!(tx.internal_memo),
                json!(memo),
                label.clone(),
            ));
            tx.internal_memo = memo;
        }

        if let Some(extra) = patch.metadata {
            let before = json!(tx.metadata.extra);
            tx.metadata.merge_extra(extra);
            audit.push(AuditEntry::field_update(
                tx.id,
                ENTITY_TRANSACTION,
                "metadata",
                before,
                json!(tx.metadata.extra),
                label.clone(),
            ));
        }

        if audit.is_empty() {
            return Ok(tx);
        }

        tx.updated_at = now;
        unit.save_transaction(&tx).await?;
        for entry in &audit {
            unit.insert_audit_entry(entry).await?;
        }
        unit.commit().await?;

        tracing::info!(transaction_id = %tx.id, changes = audit.len(), "transaction updated");
        Ok(tx)
    }

    pub async fn approve(&self, id: Uuid, actor: &Actor, notes: Option<String>) -> Result<Transaction, AppError> {
        if !actor.is_elevated() {
            return Err(AppError::Forbidden("approval requires an elevated role".to_string()));
        }

        let now = Utc::now();
        let mut unit = self.store.begin().await?;
        let mut tx = lock_visible(unit.as_mut(), id, actor).await?;

        if !matches!(tx.status, TransactionStatus::Initiated | TransactionStatus::PendingApproval) {
            return Err(AppError::InvalidStateTransition(format!(
                "cannot approve transaction {} in status {}",
                tx.id, tx.status
            )));
        }
        if !tx.requires_approval {
            return Err(AppError::InvalidStateTransition(format!(
                "transaction {} does not require approval",
                tx.id
            )));
        }

        let previous = tx.status;
        tx.approved_by = Some(actor.id);
        tx.approved_at = Some(now);
        tx.transition(TransactionStatus::Processing, now)?;
        tx.metadata.note(AuditNote::Approved {
            by: actor.id,
            notes: notes.map(|n| sanitize_string(&n)).filter(|n| !n.is_empty()),
            at: now,
        });

        unit.save_transaction(&tx).await?;
        unit.insert_audit_entry(&AuditEntry::field_update(
            tx.id,
            ENTITY_TRANSACTION,
            "status",
            json!(previous),
            json!(tx.status),
            actor.audit_label(),
        ))
        .await?;
        unit.commit().await?;

        tracing::info!(transaction_id = %tx.id, approved_by = %actor.id, "transaction approved");
        self.emitter.emit(&TransactionEvent::Approved((&tx).into()));
        Ok(tx)
    }

    pub async fn cancel(&self, id: Uuid, reason: &str, actor: &Actor) -> Result<Transaction, AppError> {
        let reason = sanitize_string(reason);
        validate_required("reason", &reason)?;
        validate_max_len("reason", &reason, CANCEL_REASON_MAX_LEN)?;

        let now = Utc::now();
        let mut unit = self.store.begin().await?;
        let mut tx = lock_visible(unit.as_mut(), id, actor).await?;

        if !tx.status.is_cancellable() {
            return Err(AppError::InvalidStateTransition(format!(
                "cannot cancel transaction {} in status {}",
                tx.id, tx.status
            )));
        }
        if tx.status == TransactionStatus::Processing && tx.provider_reference.is_some() {
            return Err(AppError::InvalidStateTransition(format!(
                "transaction {} was already submitted to the payment provider",
                tx.id
            )));
        }

        let previous = tx.status;
        tx.transition(TransactionStatus::Cancelled, now)?;
        tx.metadata.note(AuditNote::Cancelled {
            by: actor.id,
            reason: reason.clone(),
            at: now,
        });

        unit.save_transaction(&tx).await?;
        unit.insert_audit_entry(&AuditEntry::field_update(
            tx.id,
            ENTITY_TRANSACTION,
            "status",
            json!(previous),
            json!(tx.status),
            actor.audit_label(),
        ))
        .await?;
        unit.commit().await?;

        tracing::info!(transaction_id = %tx.id, reason = %reason, "transaction cancelled");
        self.emitter.emit(&TransactionEvent::Cancelled((&tx).into()));
        Ok(tx)
    }

    /// Re-submits a FAILED or PENDING_RETRY transaction. Past the attempt ceiling
    /// only a forced retry by an elevated actor is accepted.
    pub async fn retry_transaction(&self, id: Uuid, force: bool, actor: &Actor) -> Result<Transaction, AppError> {
        if force && !actor.is_elevated() {
            return Err(AppError::Forbidden("forced retry requires an elevated role".to_string()));
        }

        let now = Utc::now();
        let mut unit = self.store.begin().await?;
        let mut tx = lock_visible(unit.as_mut(), id, actor).await?;

        if !matches!(tx.status, TransactionStatus::Failed | TransactionStatus::PendingRetry) {
            return Err(AppError::InvalidStateTransition(format!(
                "cannot retry transaction {} in status {}",
                tx.id, tx.status
            )));
        }
        if tx.retry_count >= MAX_RETRY_ATTEMPTS && !force {
            return Err(AppError::RetryLimitExceeded(format!(
                "transaction {} already retried {} times",
                tx.id, tx.retry_count
            )));
        }

        let previous = tx.status;
        if tx.status == TransactionStatus::Failed {
            tx.transition(TransactionStatus::PendingRetry, now)?;
        }
        tx.transition(TransactionStatus::Processing, now)?;
        tx.retry_count += 1;
        tx.next_retry_at = None;
        tx.failure_reason = None;
        tx.failure_code = None;
        tx.metadata.note(AuditNote::Retried {
            by: actor.id,
            attempt: tx.retry_count,
            forced: force,
            at: now,
        });

        unit.save_transaction(&tx).await?;
        unit.insert_audit_entry(&AuditEntry::field_update(
            tx.id,
            ENTITY_TRANSACTION,
            "status",
            json!(previous),
            json!(tx.status),
            actor.audit_label(),
        ))
        .await?;
        unit.commit().await?;

        tracing::info!(
            transaction_id = %tx.id,
            attempt = tx.retry_count,
            forced = force,
            "transaction retried"
        );
        self.emitter.emit(&TransactionEvent::Retried((&tx).into()));
        Ok(tx)
    }

    pub async fn retry_failed_transaction(&self, id: Uuid) -> Result<Transaction, AppError> {
        self.retry_transaction(id, false, &Actor::system()).await
    }

    /// Schedules the next attempt of a FAILED transaction, or marks it exhausted.
    pub async fn schedule_retry(&self, id: Uuid) -> Result<Transaction, AppError> {
        let now = Utc::now();
        let mut unit = self.store.begin().await?;
        let mut tx = unit.lock_transaction(id).await?.ok_or_else(|| not_found(id))?;

        let previous = tx.status;
        let decision = retry::schedule_retry(&mut tx, now)?;
        unit.save_transaction(&tx).await?;
        unit.insert_audit_entry(&AuditEntry::field_update(
            tx.id,
            ENTITY_TRANSACTION,
            "status",
            json!(previous),
            json!(tx.status),
            "system",
        ))
        .await?;
        unit.commit().await?;

        if let RetryDecision::Scheduled { next_retry_at } = decision {
            tracing::info!(transaction_id = %tx.id, next_retry_at = %next_retry_at, "retry scheduled");
            self.emitter
                .emit(&TransactionEvent::RetryScheduled((&tx).into()));
        } else {
            tracing::warn!(transaction_id = %tx.id, "retry limit reached");
        }
        Ok(tx)
    }

    pub async fn due_retries(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<Transaction>, AppError> {
        Ok(self.store.due_retries(now, limit).await?)
    }

    pub async fn get_statistics(&self, filter: &StatsFilter) -> Result<TransactionStatistics, AppError> {
        let totals = self.store.transaction_totals(filter).await?;
        let avg_transaction_amount = if totals.transaction_count == 0 {
            BigDecimal::from(0).with_scale(2)
        } else {
            fees::round_cents(&(totals.total_volume.clone() / BigDecimal::from(totals.transaction_count)))
        };

        Ok(TransactionStatistics {
            total_volume: totals.total_volume,
            total_fees: totals.total_fees,
            transaction_count: totals.transaction_count,
            avg_transaction_amount,
        })
    }

    pub async fn audit_trail(&self, id: Uuid, actor: &Actor) -> Result<Vec<AuditEntry>, AppError> {
        self.get(id, actor).await?;
        Ok(self.store.audit_trail(id).await?)
    }
}

fn not_found(id: Uuid) -> AppError {
    AppError::NotFound(format!("transaction {}", id))
}

/// A key owned by a row the caller cannot see is rejected without revealing the row.
fn replay(existing: Transaction, idempotency_key: &str, actor: &Actor) -> Result<InitiateOutcome, AppError> {
    if !visible_to(&existing, actor) {
        tracing::warn!(
            actor_id = %actor.id,
            idempotency_key = %idempotency_key,
            "idempotency key reused by an unrelated actor"
        );
        return Err(AppError::Validation("idempotency key already used".to_string()));
    }

    tracing::info!(
        transaction_id = %existing.id,
        idempotency_key = %idempotency_key,
        "idempotent replay of transaction creation"
    );
    Ok(InitiateOutcome::from_transaction(existing, false))
}

fn visible_to(tx: &Transaction, actor: &Actor) -> bool {
    actor.is_elevated() || tx.involves(actor.id)
}

async fn lock_visible(unit: &mut dyn LedgerTx, id: Uuid, actor: &Actor) -> Result<Transaction, AppError> {
    unit.lock_transaction(id)
        .await?
        .filter(|tx| visible_to(tx, actor))
        .ok_or_else(|| not_found(id))
}

fn build_draft(request: InitiateRequest) -> Result<TransactionDraft, AppError> {
    validate_positive_amount(&request.amount)?;
    validate_parties(request.from_user_id, request.to_user_id)?;

    let description = sanitize_string(&request.description);
    validate_required("description", &description)?;
    validate_max_len("description", &description, DESCRIPTION_MAX_LEN)?;

    let fee_amount = match request.fee_amount {
        Some(fee) => {
            validate_fee(&request.amount, &fee)?;
            fee
        }
        None => fees::fee_for(request.payment_method, &request.amount),
    };

    let mut metadata = TransactionMetadata::default();
    metadata.merge_extra(request.metadata);

    let provider_reference = request
        .provider_reference
        .map(|r| sanitize_string(&r))
        .filter(|r| !r.is_empty());
    if let Some(reference) = &provider_reference {
        validate_max_len("provider_reference", reference, PROVIDER_REFERENCE_MAX_LEN)?;
        match request.payment_method {
            PaymentMethod::InternalTransfer => metadata.provider.transfer_id = Some(reference.clone()),
            _ if request.transaction_type.debits_escrow()
                || request.transaction_type == TransactionType::Withdrawal =>
            {
                metadata.provider.payout_id = Some(reference.clone())
            }
            _ => metadata.provider.payment_intent_id = Some(reference.clone()),
        }
    }

    Ok(TransactionDraft {
        transaction_type: request.transaction_type,
        payment_method: request.payment_method,
        amount: request.amount,
        fee_amount,
        description,
        from_user_id: request.from_user_id,
        to_user_id: request.to_user_id,
        from_bank_account_id: request.from_bank_account_id,
        to_bank_account_id: request.to_bank_account_id,
        offering_id: request.offering_id,
        provider_reference,
        metadata,
        ip_address: request.ip_address,
        user_agent: request.user_agent,
    })
}

/// `sha256(actor ‖ canonical request json ‖ minute bucket)`, hex encoded.
pub fn derive_idempotency_key(actor_id: Uuid, request: &InitiateRequest, now: DateTime<Utc>) -> Result<String, AppError> {
    let canonical = serde_json::to_string(request)
        .map_err(|e| AppError::Internal(format!("failed to serialize request: {}", e)))?;
    let bucket = now.timestamp().div_euclid(DERIVED_KEY_WINDOW_SECS);

    let mut hasher = Sha256::new();
    hasher.update(actor_id.as_bytes());
    hasher.update(canonical.as_bytes());
    hasher.update(bucket.to_be_bytes());
    Ok(hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::str::FromStr;

    fn request() -> InitiateRequest {
        InitiateRequest {
            transaction_type: TransactionType::Deposit,
            payment_method: PaymentMethod::Ach,
            amount: BigDecimal::from_str("10000.00").unwrap(),
            fee_amount: None,
            description: "  Series A   deposit ".to_string(),
            from_user_id: Some(Uuid::new_v4()),
            to_user_id: None,
            from_bank_account_id: None,
            to_bank_account_id: None,
            offering_id: Some(Uuid::new_v4()),
            provider_reference: None,
            idempotency_key: None,
            metadata: BTreeMap::new(),
            ip_address: Some("203.0.113.10".to_string()),
            user_agent: None,
        }
    }

    #[test]
    fn derived_key_is_stable_inside_the_window() {
        let actor = Uuid::new_v4();
        let req = request();
        let at = Utc.with_ymd_and_hms(2026, 10, 17, 9, 30, 5).unwrap();
        let later = Utc.with_ymd_and_hms(2026, 10, 17, 9, 30, 59).unwrap();
        let next_window = Utc.with_ymd_and_hms(2026, 10, 17, 9, 31, 0).unwrap();

        let key = derive_idempotency_key(actor, &req, at).unwrap();
        assert_eq!(key.len(), 64);
        assert_eq!(key, derive_idempotency_key(actor, &req, later).unwrap());
        assert_ne!(key, derive_idempotency_key(actor, &req, next_window).unwrap());
        assert_ne!(key, derive_idempotency_key(Uuid::new_v4(), &req, at).unwrap());
    }

    #[test]
    fn derived_key_ignores_request_context() {
        let actor = Uuid::new_v4();
        let req = request();
        let mut other = req.clone();
        other.ip_address = Some("198.51.100.7".to_string());
        let at = Utc::now();
        assert_eq!(
            derive_idempotency_key(actor, &req, at).unwrap(),
            derive_idempotency_key(actor, &other, at).unwrap()
        );
    }

    #[test]
    fn draft_applies_fee_schedule_and_sanitizes() {
        let draft = build_draft(request()).unwrap();
        assert_eq!(draft.description, "Series A deposit");
        assert_eq!(draft.fee_amount, BigDecimal::from_str("5.00").unwrap());
    }

    #[test]
    fn draft_rejects_fee_above_amount() {
        let mut req = request();
        req.fee_amount = Some(BigDecimal::from_str("10000.01").unwrap());
        assert!(matches!(build_draft(req), Err(AppError::Validation(_))));
    }

    #[test]
    fn draft_records_provider_reference() {
        let mut req = request();
        req.provider_reference = Some("pi_123".to_string());
        let draft = build_draft(req).unwrap();
        assert_eq!(draft.provider_reference.as_deref(), Some("pi_123"));
        assert_eq!(draft.metadata.provider.payment_intent_id.as_deref(), Some("pi_123"));
    }
}
