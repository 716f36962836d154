mod common;

use common::{admin, dec, deposit_request, harness, investor, payment_failed, payment_succeeded};
use escrow_core::domain::{
    AuditNote, BankAccount, Investment, TransactionStatus, VerificationStatus, WebhookStatus,
};
use escrow_core::error::AppError;
use escrow_core::ports::{LedgerStore, LedgerTx};
use escrow_core::services::ProcessOutcome;
use serde_json::json;
use uuid::Uuid;

#[tokio::test]
async fn test_duplicate_success_delivery_credits_escrow_once() {
    let mut h = harness();
    let user = Uuid::new_v4();
    let offering = Uuid::new_v4();

    let mut unit = h.store.begin().await.unwrap();
    unit.insert_investment(&Investment::pending(user, offering, dec("10000.00")))
        .await
        .unwrap();
    unit.commit().await.unwrap();

    let outcome = h
        .orchestrator
        .initiate(deposit_request(user, offering, "scenario-3"), &investor(user))
        .await
        .unwrap();
    let id = outcome.transaction.id;

    let payload = payment_succeeded("evt_success", id);
    let first = h.reconciler.receive("evt_success", payload.clone()).await.unwrap();
    let second = h.reconciler.receive("evt_success", payload).await.unwrap();
    assert!(!first.duplicate);
    assert!(second.duplicate);

    assert_eq!(h.reconciler.process("evt_success").await.unwrap(), ProcessOutcome::Processed);
    assert_eq!(
        h.reconciler.process("evt_success").await.unwrap(),
        ProcessOutcome::AlreadyProcessed
    );

    let tx = h.orchestrator.get(id, &admin()).await.unwrap();
    assert_eq!(tx.status, TransactionStatus::Completed);
    assert!(tx.completed_at.is_some());
    assert_eq!(tx.provider_reference.as_deref(), Some(format!("pi_{}", id.simple()).as_str()));

    let account = h.escrow.get_by_offering(offering).await.unwrap();
    assert_eq!(account.balance(), &dec("9949.20"));

    let mut unit = h.store.begin().await.unwrap();
    assert!(unit.lock_pending_investment(user, offering).await.unwrap().is_none());
    assert_eq!(unit.escrow_entries(account.id).await.unwrap().len(), 1);
    drop(unit);

    let event = h.store.get_webhook_event("evt_success").await.unwrap().unwrap();
    assert_eq!(event.status, WebhookStatus::Processed);
    assert!(event.processed_at.is_some());

    let events = h.drain_events();
    assert_eq!(events.iter().filter(|e| **e == "transaction.completed").count(), 1);
}

#[tokio::test]
async fn test_redelivered_success_with_new_event_id_is_a_noop() {
    let h = harness();
    let user = Uuid::new_v4();
    let offering = Uuid::new_v4();
    let outcome = h
        .orchestrator
        .initiate(deposit_request(user, offering, "redelivered"), &investor(user))
        .await
        .unwrap();
    let id = outcome.transaction.id;

    h.deliver(payment_succeeded("evt_a", id)).await.unwrap();
    h.deliver(payment_succeeded("evt_b", id)).await.unwrap();

    let account = h.escrow.get_by_offering(offering).await.unwrap();
    assert_eq!(account.balance(), &dec("9949.20"));
}

#[tokio::test]
async fn test_correlates_by_provider_reference() {
    let h = harness();
    let user = Uuid::new_v4();
    let mut request = deposit_request(user, Uuid::new_v4(), "by-reference");
    request.provider_reference = Some("pi_known".to_string());
    let outcome = h.orchestrator.initiate(request, &investor(user)).await.unwrap();

    h.deliver(json!({
        "id": "evt_ref",
        "type": "payment_intent.succeeded",
        "data": { "object": { "id": "pi_known" } }
    }))
    .await
    .unwrap();

    let tx = h.orchestrator.get(outcome.transaction.id, &admin()).await.unwrap();
    assert_eq!(tx.status, TransactionStatus::Completed);
    assert_eq!(tx.metadata.provider.payment_intent_id.as_deref(), Some("pi_known"));
}

#[tokio::test]
async fn test_uncorrelated_and_unrecognized_events_are_acknowledged() {
    let h = harness();

    h.deliver(payment_succeeded("evt_orphan", Uuid::new_v4())).await.unwrap();
    h.deliver(json!({ "id": "evt_refund", "type": "charge.refunded", "data": { "object": {} } }))
        .await
        .unwrap();

    for event_id in ["evt_orphan", "evt_refund"] {
        let event = h.store.get_webhook_event(event_id).await.unwrap().unwrap();
        assert_eq!(event.status, WebhookStatus::Processed);
    }
}

#[tokio::test]
async fn test_permanent_failure_does_not_schedule_retry() {
    let mut h = harness();
    let user = Uuid::new_v4();
    let outcome = h
        .orchestrator
        .initiate(deposit_request(user, Uuid::new_v4(), "declined"), &investor(user))
        .await
        .unwrap();
    let id = outcome.transaction.id;
    h.submit(id).await;
    h.drain_events();

    h.deliver(payment_failed("evt_declined", id, "insufficient_funds"))
        .await
        .unwrap();

    let tx = h.orchestrator.get(id, &admin()).await.unwrap();
    assert_eq!(tx.status, TransactionStatus::Failed);
    assert_eq!(tx.failure_code.as_deref(), Some("insufficient_funds"));
    assert_eq!(tx.failure_reason.as_deref(), Some("provider said insufficient_funds"));
    assert!(tx.next_retry_at.is_none());
    assert!(tx.metadata.events.iter().any(|note| matches!(
        note,
        AuditNote::ProviderFailure { retryable: false, .. }
    )));
    assert_eq!(h.drain_events(), vec!["transaction.failed"]);
}

#[tokio::test]
async fn test_retryable_failure_schedules_backoff() {
    let h = harness();
    let user = Uuid::new_v4();
    let outcome = h
        .orchestrator
        .initiate(deposit_request(user, Uuid::new_v4(), "flaky"), &investor(user))
        .await
        .unwrap();
    let id = outcome.transaction.id;
    h.submit(id).await;

    h.deliver(payment_failed("evt_flaky", id, "rate_limit")).await.unwrap();

    let tx = h.orchestrator.get(id, &admin()).await.unwrap();
    assert_eq!(tx.status, TransactionStatus::PendingRetry);
    let delay = tx.next_retry_at.unwrap() - tx.failed_at.unwrap();
    assert_eq!(delay, chrono::Duration::minutes(30));

    // Not due yet.
    let due = h.orchestrator.due_retries(chrono::Utc::now(), 10).await.unwrap();
    assert!(due.is_empty());
    let later = chrono::Utc::now() + chrono::Duration::minutes(31);
    let due = h.orchestrator.due_retries(later, 10).await.unwrap();
    assert_eq!(due.len(), 1);
}

#[tokio::test]
async fn test_provider_success_after_cancel_is_recorded_as_conflict() {
    let h = harness();
    let user = Uuid::new_v4();
    let offering = Uuid::new_v4();
    let outcome = h
        .orchestrator
        .initiate(deposit_request(user, offering, "conflict"), &investor(user))
        .await
        .unwrap();
    let id = outcome.transaction.id;
    h.orchestrator.cancel(id, "duplicate order", &investor(user)).await.unwrap();

    h.deliver(payment_succeeded("evt_late", id)).await.unwrap();

    let tx = h.orchestrator.get(id, &admin()).await.unwrap();
    assert_eq!(tx.status, TransactionStatus::Cancelled);
    assert!(tx.metadata.events.iter().any(|note| matches!(
        note,
        AuditNote::ReconciliationConflict { event_id, .. } if event_id == "evt_late"
    )));
    assert!(matches!(
        h.escrow.get_by_offering(offering).await,
        Err(AppError::NotFound(_))
    ));
    let event = h.store.get_webhook_event("evt_late").await.unwrap().unwrap();
    assert_eq!(event.status, WebhookStatus::Processed);
}

#[tokio::test]
async fn test_failure_after_completion_keeps_completed() {
    let h = harness();
    let user = Uuid::new_v4();
    let outcome = h
        .orchestrator
        .initiate(deposit_request(user, Uuid::new_v4(), "settled"), &investor(user))
        .await
        .unwrap();
    let id = outcome.transaction.id;

    h.deliver(payment_succeeded("evt_ok", id)).await.unwrap();
    h.deliver(payment_failed("evt_nope", id, "card_declined")).await.unwrap();

    let tx = h.orchestrator.get(id, &admin()).await.unwrap();
    assert_eq!(tx.status, TransactionStatus::Completed);
    assert!(tx.failure_reason.is_none());
}

#[tokio::test]
async fn test_handler_error_rolls_back_and_marks_event_failed() {
    let h = harness();
    let user = Uuid::new_v4();
    let offering = Uuid::new_v4();

    // A withdrawal from an offering that never had an escrow account.
    let request = serde_json::from_value(json!({
        "type": "ESCROW_WITHDRAWAL",
        "paymentMethod": "WIRE",
        "amount": "500.00",
        "description": "Sponsor draw",
        "toUserId": user,
        "offeringId": offering,
        "idempotencyKey": "withdrawal-no-escrow",
    }))
    .unwrap();
    let outcome = h.orchestrator.initiate(request, &admin()).await.unwrap();
    let id = outcome.transaction.id;

    let result = h.deliver(payment_succeeded("evt_broken", id)).await;
    assert!(matches!(result, Err(AppError::NotFound(_))));

    let tx = h.orchestrator.get(id, &admin()).await.unwrap();
    assert_eq!(tx.status, TransactionStatus::Initiated);

    let event = h.store.get_webhook_event("evt_broken").await.unwrap().unwrap();
    assert_eq!(event.status, WebhookStatus::Failed);
    assert_eq!(event.retry_count, 1);
    assert!(event.error_message.is_some());

    let report = h.reconciler.redeliver(1, 10).await.unwrap();
    assert_eq!(report.attempted, 0);
    let report = h.reconciler.redeliver(5, 10).await.unwrap();
    assert_eq!(report.attempted, 1);
    assert_eq!(report.failed, 1);
}

#[tokio::test]
async fn test_payout_beyond_escrow_balance_is_acknowledged_as_conflict() {
    let h = harness();
    let sponsor = Uuid::new_v4();
    let offering = Uuid::new_v4();

    let account = h.escrow.create_escrow_account(offering).await.unwrap();
    h.escrow
        .deposit_funds(account.id, Uuid::new_v4(), &dec("100.00"))
        .await
        .unwrap();

    let request = serde_json::from_value(json!({
        "type": "ESCROW_WITHDRAWAL",
        "paymentMethod": "WIRE",
        "amount": "500.00",
        "description": "Construction draw",
        "toUserId": sponsor,
        "offeringId": offering,
        "idempotencyKey": "draw-too-large",
    }))
    .unwrap();
    let id = h.orchestrator.initiate(request, &admin()).await.unwrap().transaction.id;
    h.submit(id).await;

    h.deliver(json!({
        "id": "evt_payout_short",
        "type": "payout.paid",
        "data": { "object": { "id": "po_short", "metadata": { "transaction_id": id.to_string() } } }
    }))
    .await
    .unwrap();

    let event = h.store.get_webhook_event("evt_payout_short").await.unwrap().unwrap();
    assert_eq!(event.status, WebhookStatus::Processed);

    let tx = h.orchestrator.get(id, &admin()).await.unwrap();
    assert_eq!(tx.status, TransactionStatus::Processing);
    assert!(tx
        .metadata
        .events
        .iter()
        .any(|note| matches!(note, AuditNote::ReconciliationConflict { event_id, .. } if event_id == "evt_payout_short")));

    let balance = h.escrow.get_by_offering(offering).await.unwrap();
    assert_eq!(balance.balance(), &dec("100.00"));

    let report = h.reconciler.redeliver(5, 10).await.unwrap();
    assert_eq!(report.attempted, 0);
}

#[tokio::test]
async fn test_malformed_payload_marks_event_failed() {
    let h = harness();
    let result = h
        .deliver(json!({ "id": "evt_malformed", "type": "payment_intent.succeeded" }))
        .await;

    assert!(matches!(result, Err(AppError::Validation(_))));
    let event = h.store.get_webhook_event("evt_malformed").await.unwrap().unwrap();
    assert_eq!(event.status, WebhookStatus::Failed);
}

#[tokio::test]
async fn test_item_error_flags_accounts_and_fails_in_flight_transactions() {
    let mut h = harness();
    let user = Uuid::new_v4();
    let account = BankAccount::new(user, "item_123");

    let mut unit = h.store.begin().await.unwrap();
    unit.insert_bank_account(&account).await.unwrap();
    unit.commit().await.unwrap();

    let mut request = deposit_request(user, Uuid::new_v4(), "linked");
    request.from_bank_account_id = Some(account.id);
    let outcome = h.orchestrator.initiate(request, &investor(user)).await.unwrap();
    let id = outcome.transaction.id;
    h.submit(id).await;
    h.drain_events();

    h.deliver(json!({
        "id": "evt_item",
        "type": "item.error",
        "data": { "object": {
            "item_id": "item_123",
            "error": { "error_code": "ITEM_LOGIN_REQUIRED", "error_message": "login required" }
        } }
    }))
    .await
    .unwrap();

    let tx = h.orchestrator.get(id, &admin()).await.unwrap();
    assert_eq!(tx.status, TransactionStatus::Failed);
    assert_eq!(tx.failure_code.as_deref(), Some("ITEM_LOGIN_REQUIRED"));
    assert!(tx.next_retry_at.is_none());

    let mut unit = h.store.begin().await.unwrap();
    let accounts = unit.lock_bank_accounts_by_item("item_123").await.unwrap();
    assert_eq!(accounts[0].verification_status, VerificationStatus::ReverificationRequired);
    drop(unit);

    assert_eq!(
        h.drain_events(),
        vec!["transaction.failed", "bank_account.reverification_required"]
    );
}

#[tokio::test]
async fn test_receive_rejects_blank_event_id() {
    let h = harness();
    assert!(matches!(
        h.reconciler.receive("", json!({})).await,
        Err(AppError::Validation(_))
    ));
}
