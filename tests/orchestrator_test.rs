mod common;

use common::{admin, dec, deposit_request, harness, investor, payment_failed};
use escrow_core::domain::{Actor, ActorRole, AuditNote, TransactionStatus};
use escrow_core::error::AppError;
use escrow_core::ports::{StatsFilter, TransactionFilter};
use escrow_core::services::orchestrator::UpdateTransactionRequest;
use serde_json::json;
use std::collections::BTreeMap;
use uuid::Uuid;

#[tokio::test]
async fn test_initiate_deposit_derives_net_amount() {
    let mut h = harness();
    let user = Uuid::new_v4();

    let outcome = h
        .orchestrator
        .initiate(deposit_request(user, Uuid::new_v4(), "scenario-1"), &investor(user))
        .await
        .unwrap();

    let tx = &outcome.transaction;
    assert!(outcome.created);
    assert_eq!(tx.status, TransactionStatus::Initiated);
    assert_eq!(tx.amount, dec("10000.00"));
    assert_eq!(tx.fee_amount, dec("50.80"));
    assert_eq!(tx.net_amount, dec("9949.20"));
    assert!(tx.net_amount_holds());
    assert!(!outcome.requires_approval);
    assert_eq!(outcome.compliance_checks.len(), 4);
    assert_eq!(h.drain_events(), vec!["transaction.created"]);
}

#[tokio::test]
async fn test_same_idempotency_key_returns_existing_transaction() {
    let mut h = harness();
    let user = Uuid::new_v4();
    let offering = Uuid::new_v4();

    let first = h
        .orchestrator
        .initiate(deposit_request(user, offering, "scenario-2"), &investor(user))
        .await
        .unwrap();
    let second = h
        .orchestrator
        .initiate(deposit_request(user, offering, "scenario-2"), &investor(user))
        .await
        .unwrap();

    assert_eq!(first.transaction.id, second.transaction.id);
    assert!(!second.created);

    let page = h.orchestrator.list(TransactionFilter::default(), &admin()).await.unwrap();
    assert_eq!(page.total, 1);
    assert_eq!(h.drain_events(), vec!["transaction.created"]);
}

#[tokio::test]
async fn test_key_reuse_by_another_investor_does_not_reveal_row() {
    let h = harness();
    let alice = Uuid::new_v4();
    let mallory = Uuid::new_v4();
    let offering = Uuid::new_v4();

    let original = h
        .orchestrator
        .initiate(deposit_request(alice, offering, "alice-key"), &investor(alice))
        .await
        .unwrap();

    let result = h
        .orchestrator
        .initiate(deposit_request(mallory, offering, "alice-key"), &investor(mallory))
        .await;
    assert!(matches!(result, Err(AppError::Validation(_))));

    // Elevated actors may still replay.
    let replayed = h
        .orchestrator
        .initiate(deposit_request(alice, offering, "alice-key"), &admin())
        .await
        .unwrap();
    assert_eq!(replayed.transaction.id, original.transaction.id);
    assert!(!replayed.created);

    let page = h.orchestrator.list(TransactionFilter::default(), &admin()).await.unwrap();
    assert_eq!(page.total, 1);
}

#[tokio::test]
async fn test_concurrent_initiations_with_same_key_create_one_row() {
    let h = harness();
    let user = Uuid::new_v4();
    let offering = Uuid::new_v4();

    let actor = investor(user);

    let (a, b) = tokio::join!(
        h.orchestrator
            .initiate(deposit_request(user, offering, "race"), &actor),
        h.orchestrator
            .initiate(deposit_request(user, offering, "race"), &actor),
    );
    let (a, b) = (a.unwrap(), b.unwrap());

    assert_eq!(a.transaction.id, b.transaction.id);
    assert!(a.created ^ b.created);
}

#[tokio::test]
async fn test_missing_key_is_derived_from_request() {
    let h = harness();
    let user = Uuid::new_v4();
    let offering = Uuid::new_v4();

    let mut request = deposit_request(user, offering, "unused");
    request.idempotency_key = None;

    let first = h.orchestrator.initiate(request.clone(), &investor(user)).await.unwrap();
    let second = h.orchestrator.initiate(request, &investor(user)).await.unwrap();

    assert_eq!(first.transaction.idempotency_key.len(), 64);
    // Two identical calls inside one minute bucket collapse; across a bucket
    // boundary a second row is acceptable.
    if first.transaction.idempotency_key == second.transaction.idempotency_key {
        assert_eq!(first.transaction.id, second.transaction.id);
    }
}

#[tokio::test]
async fn test_validation_failures() {
    let h = harness();
    let user = Uuid::new_v4();

    let mut zero = deposit_request(user, Uuid::new_v4(), "zero");
    zero.amount = dec("0");
    assert!(matches!(
        h.orchestrator.initiate(zero, &investor(user)).await,
        Err(AppError::Validation(_))
    ));

    let mut fee_too_large = deposit_request(user, Uuid::new_v4(), "fee");
    fee_too_large.fee_amount = Some(dec("10000.01"));
    assert!(matches!(
        h.orchestrator.initiate(fee_too_large, &investor(user)).await,
        Err(AppError::Validation(_))
    ));

    let mut no_parties = deposit_request(user, Uuid::new_v4(), "parties");
    no_parties.from_user_id = None;
    assert!(matches!(
        h.orchestrator.initiate(no_parties, &investor(user)).await,
        Err(AppError::Validation(_))
    ));

    let mut long_description = deposit_request(user, Uuid::new_v4(), "desc");
    long_description.description = "x".repeat(501);
    assert!(matches!(
        h.orchestrator.initiate(long_description, &investor(user)).await,
        Err(AppError::Validation(_))
    ));
}

#[tokio::test]
async fn test_default_fee_schedule_applies_without_explicit_fee() {
    let h = harness();
    let user = Uuid::new_v4();

    let mut request = deposit_request(user, Uuid::new_v4(), "schedule");
    request.fee_amount = None;
    let outcome = h.orchestrator.initiate(request, &investor(user)).await.unwrap();

    // ACH: 0.8% capped at 5.00
    assert_eq!(outcome.transaction.fee_amount, dec("5.00"));
    assert_eq!(outcome.transaction.net_amount, dec("9995.00"));
}

#[tokio::test]
async fn test_compliance_hard_limit_rejects() {
    let h = harness();
    let user = Uuid::new_v4();

    let mut request = deposit_request(user, Uuid::new_v4(), "too-big");
    request.amount = dec("2000000.00");
    let result = h.orchestrator.initiate(request, &investor(user)).await;

    assert!(matches!(result, Err(AppError::ComplianceRejected(_))));
    let page = h.orchestrator.list(TransactionFilter::default(), &admin()).await.unwrap();
    assert_eq!(page.total, 0);
}

#[tokio::test]
async fn test_large_transaction_requires_approval() {
    let mut h = harness();
    let user = Uuid::new_v4();

    let mut request = deposit_request(user, Uuid::new_v4(), "large");
    request.amount = dec("75000.00");
    let outcome = h.orchestrator.initiate(request, &investor(user)).await.unwrap();
    let id = outcome.transaction.id;
    assert!(outcome.requires_approval);

    // Cannot skip approval through update.
    let patch = UpdateTransactionRequest {
        status: Some(TransactionStatus::Processing),
        ..UpdateTransactionRequest::default()
    };
    assert!(matches!(
        h.orchestrator.update(id, patch, &admin()).await,
        Err(AppError::InvalidStateTransition(_))
    ));

    assert!(matches!(
        h.orchestrator.approve(id, &investor(user), None).await,
        Err(AppError::Forbidden(_))
    ));

    let approver = admin();
    let approved = h
        .orchestrator
        .approve(id, &approver, Some("  reviewed  source of funds ".to_string()))
        .await
        .unwrap();
    assert_eq!(approved.status, TransactionStatus::Processing);
    assert_eq!(approved.approved_by, Some(approver.id));
    assert!(approved.metadata.events.iter().any(|note| matches!(
        note,
        AuditNote::Approved { notes: Some(n), .. } if n == "reviewed source of funds"
    )));

    assert!(matches!(
        h.orchestrator.approve(id, &approver, None).await,
        Err(AppError::InvalidStateTransition(_))
    ));
    assert_eq!(
        h.drain_events(),
        vec!["transaction.created", "transaction.approved"]
    );
}

#[tokio::test]
async fn test_cancel_rules() {
    let h = harness();
    let user = Uuid::new_v4();
    let actor = investor(user);

    let outcome = h
        .orchestrator
        .initiate(deposit_request(user, Uuid::new_v4(), "cancel"), &actor)
        .await
        .unwrap();
    let id = outcome.transaction.id;

    assert!(matches!(
        h.orchestrator.cancel(id, "   ", &actor).await,
        Err(AppError::Validation(_))
    ));

    let cancelled = h.orchestrator.cancel(id, "changed my mind", &actor).await.unwrap();
    assert_eq!(cancelled.status, TransactionStatus::Cancelled);
    assert!(cancelled.cancelled_at.is_some());

    assert!(matches!(
        h.orchestrator.cancel(id, "again", &actor).await,
        Err(AppError::InvalidStateTransition(_))
    ));

    // Terminal rows still accept cosmetic updates.
    let patch = UpdateTransactionRequest {
        internal_memo: Some("closed by investor".to_string()),
        ..UpdateTransactionRequest::default()
    };
    let updated = h.orchestrator.update(id, patch, &admin()).await.unwrap();
    assert_eq!(updated.internal_memo.as_deref(), Some("closed by investor"));
    assert_eq!(updated.status, TransactionStatus::Cancelled);
}

#[tokio::test]
async fn test_submitted_transaction_cannot_be_cancelled() {
    let h = harness();
    let user = Uuid::new_v4();

    let mut request = deposit_request(user, Uuid::new_v4(), "submitted");
    request.provider_reference = Some("pi_submitted".to_string());
    let outcome = h.orchestrator.initiate(request, &investor(user)).await.unwrap();
    h.submit(outcome.transaction.id).await;

    assert!(matches!(
        h.orchestrator
            .cancel(outcome.transaction.id, "too late", &investor(user))
            .await,
        Err(AppError::InvalidStateTransition(_))
    ));
}

#[tokio::test]
async fn test_update_lifecycle_fields_need_elevated_actor() {
    let h = harness();
    let user = Uuid::new_v4();
    let outcome = h
        .orchestrator
        .initiate(deposit_request(user, Uuid::new_v4(), "update"), &investor(user))
        .await
        .unwrap();
    let id = outcome.transaction.id;

    let status_patch = UpdateTransactionRequest {
        status: Some(TransactionStatus::Processing),
        ..UpdateTransactionRequest::default()
    };
    assert!(matches!(
        h.orchestrator.update(id, status_patch, &investor(user)).await,
        Err(AppError::Forbidden(_))
    ));

    let completed_patch = UpdateTransactionRequest {
        status: Some(TransactionStatus::Completed),
        ..UpdateTransactionRequest::default()
    };
    assert!(matches!(
        h.orchestrator.update(id, completed_patch, &admin()).await,
        Err(AppError::InvalidStateTransition(_))
    ));

    let cosmetic = UpdateTransactionRequest {
        description: Some("Series A commitment (amended)".to_string()),
        metadata: Some(BTreeMap::from([("channel".to_string(), json!("mobile"))])),
        ..UpdateTransactionRequest::default()
    };
    let updated = h.orchestrator.update(id, cosmetic, &investor(user)).await.unwrap();
    assert_eq!(updated.description, "Series A commitment (amended)");
    assert_eq!(updated.metadata.extra.get("channel"), Some(&json!("mobile")));

    let trail = h.orchestrator.audit_trail(id, &admin()).await.unwrap();
    assert!(trail.len() >= 2);
}

#[tokio::test]
async fn test_visibility_is_scoped_to_parties() {
    let h = harness();
    let owner = Uuid::new_v4();
    let stranger = Uuid::new_v4();

    let outcome = h
        .orchestrator
        .initiate(deposit_request(owner, Uuid::new_v4(), "mine"), &investor(owner))
        .await
        .unwrap();
    h.orchestrator
        .initiate(deposit_request(stranger, Uuid::new_v4(), "theirs"), &investor(stranger))
        .await
        .unwrap();

    assert!(matches!(
        h.orchestrator.get(outcome.transaction.id, &investor(stranger)).await,
        Err(AppError::NotFound(_))
    ));

    // A non-elevated caller cannot widen the filter to someone else.
    let filter = TransactionFilter {
        user_id: Some(owner),
        ..TransactionFilter::default()
    };
    let page = h.orchestrator.list(filter, &investor(stranger)).await.unwrap();
    assert_eq!(page.total, 1);
    assert!(page.transactions.iter().all(|tx| tx.involves(stranger)));

    let page = h.orchestrator.list(TransactionFilter::default(), &admin()).await.unwrap();
    assert_eq!(page.total, 2);
}

#[tokio::test]
async fn test_creator_sees_own_submission_in_list() {
    let h = harness();
    let sponsor = Actor::new(Uuid::new_v4(), ActorRole::Sponsor);
    let investor_id = Uuid::new_v4();

    let outcome = h
        .orchestrator
        .initiate(deposit_request(investor_id, Uuid::new_v4(), "on-behalf"), &sponsor)
        .await
        .unwrap();
    let id = outcome.transaction.id;

    assert_eq!(h.orchestrator.get(id, &sponsor).await.unwrap().id, id);

    let page = h.orchestrator.list(TransactionFilter::default(), &sponsor).await.unwrap();
    assert_eq!(page.total, 1);
    assert_eq!(page.transactions[0].id, id);

    let page = h
        .orchestrator
        .list(TransactionFilter::default(), &investor(investor_id))
        .await
        .unwrap();
    assert_eq!(page.total, 1);
}

#[tokio::test]
async fn test_list_paginates_and_sorts() {
    let h = harness();
    let user = Uuid::new_v4();
    for (i, amount) in ["100.00", "300.00", "200.00"].iter().enumerate() {
        let mut request = deposit_request(user, Uuid::new_v4(), &format!("page-{}", i));
        request.amount = dec(amount);
        request.fee_amount = Some(dec("0"));
        h.orchestrator.initiate(request, &investor(user)).await.unwrap();
    }

    let filter: TransactionFilter = serde_json::from_value(json!({
        "limit": 2,
        "offset": 0,
        "sortBy": "amount",
        "sortOrder": "asc"
    }))
    .unwrap();
    let page = h.orchestrator.list(filter, &investor(user)).await.unwrap();

    assert_eq!(page.total, 3);
    let amounts: Vec<_> = page.transactions.iter().map(|tx| tx.amount.clone()).collect();
    assert_eq!(amounts, vec![dec("100.00"), dec("200.00")]);
}

#[tokio::test]
async fn test_statistics_cover_completed_transactions() {
    let h = harness();
    let user = Uuid::new_v4();

    let empty = h.orchestrator.get_statistics(&StatsFilter::default()).await.unwrap();
    assert_eq!(empty.transaction_count, 0);
    assert_eq!(empty.avg_transaction_amount, dec("0.00"));

    let outcome = h
        .orchestrator
        .initiate(deposit_request(user, Uuid::new_v4(), "stats"), &investor(user))
        .await
        .unwrap();
    h.orchestrator
        .initiate(deposit_request(user, Uuid::new_v4(), "stats-pending"), &investor(user))
        .await
        .unwrap();
    h.deliver(common::payment_succeeded("evt_stats", outcome.transaction.id))
        .await
        .unwrap();

    let stats = h.orchestrator.get_statistics(&StatsFilter::default()).await.unwrap();
    assert_eq!(stats.transaction_count, 1);
    assert_eq!(stats.total_volume, dec("10000.00"));
    assert_eq!(stats.total_fees, dec("50.80"));
    assert_eq!(stats.avg_transaction_amount, dec("10000.00"));
}

#[tokio::test]
async fn test_retry_ceiling_and_forced_retry() {
    let mut h = harness();
    let user = Uuid::new_v4();
    let outcome = h
        .orchestrator
        .initiate(deposit_request(user, Uuid::new_v4(), "scenario-5"), &investor(user))
        .await
        .unwrap();
    let id = outcome.transaction.id;
    h.submit(id).await;

    for attempt in 1..=3 {
        h.deliver(payment_failed(&format!("evt_fail_{}", attempt), id, "processing_error"))
            .await
            .unwrap();
        let failed = h.orchestrator.get(id, &admin()).await.unwrap();
        assert_eq!(failed.status, TransactionStatus::PendingRetry);
        assert!(failed.next_retry_at.is_some());

        let retried = h
            .orchestrator
            .retry_transaction(id, false, &investor(user))
            .await
            .unwrap();
        assert_eq!(retried.status, TransactionStatus::Processing);
        assert_eq!(retried.retry_count, attempt);
        assert!(retried.failure_reason.is_none());
    }

    h.deliver(payment_failed("evt_fail_4", id, "processing_error"))
        .await
        .unwrap();
    let exhausted = h.orchestrator.get(id, &admin()).await.unwrap();
    assert_eq!(exhausted.status, TransactionStatus::Failed);
    assert!(exhausted.next_retry_at.is_none());
    assert!(exhausted
        .failure_reason
        .as_deref()
        .unwrap()
        .ends_with("(retry limit reached)"));

    assert!(matches!(
        h.orchestrator.retry_transaction(id, false, &investor(user)).await,
        Err(AppError::RetryLimitExceeded(_))
    ));
    assert!(matches!(
        h.orchestrator.retry_transaction(id, true, &investor(user)).await,
        Err(AppError::Forbidden(_))
    ));

    let forced = h.orchestrator.retry_transaction(id, true, &admin()).await.unwrap();
    assert_eq!(forced.status, TransactionStatus::Processing);
    assert_eq!(forced.retry_count, 4);

    let events = h.drain_events();
    assert_eq!(events.iter().filter(|e| **e == "transaction.retried").count(), 4);
    assert_eq!(events.iter().filter(|e| **e == "transaction.retry_scheduled").count(), 3);
}

#[tokio::test]
async fn test_only_failed_transactions_can_be_retried() {
    let h = harness();
    let user = Uuid::new_v4();
    let outcome = h
        .orchestrator
        .initiate(deposit_request(user, Uuid::new_v4(), "not-failed"), &investor(user))
        .await
        .unwrap();

    assert!(matches!(
        h.orchestrator
            .retry_transaction(outcome.transaction.id, false, &admin())
            .await,
        Err(AppError::InvalidStateTransition(_))
    ));
}
