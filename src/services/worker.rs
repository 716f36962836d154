use chrono::{DateTime, Utc};
use tokio::time::{sleep, Duration};
use tracing::{debug, error, info, warn};

use crate::error::AppError;
use crate::services::orchestrator::TransactionOrchestrator;
use crate::services::reconciliation::WebhookReconciler;

const SWEEP_BATCH: i64 = 50;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub due: usize,
    pub retried: usize,
    pub failed: usize,
}

/// Runs the retry sweeper loop. Picks up PENDING_RETRY rows whose backoff has
/// elapsed and re-submits them as the system actor.
pub async fn run_retry_sweeper(orchestrator: TransactionOrchestrator, poll_secs: u64) {
    info!(poll_secs, "retry sweeper started");

    loop {
        if let Err(e) = sweep_due_retries(&orchestrator, Utc::now(), SWEEP_BATCH).await {
            error!(error = %e, "retry sweep failed");
        }

        sleep(Duration::from_secs(poll_secs.max(1))).await;
    }
}

pub async fn sweep_due_retries(
    orchestrator: &TransactionOrchestrator,
    now: DateTime<Utc>,
    limit: i64,
) -> Result<SweepReport, AppError> {
    let due = orchestrator.due_retries(now, limit).await?;
    let mut report = SweepReport {
        due: due.len(),
        ..SweepReport::default()
    };

    if due.is_empty() {
        return Ok(report);
    }

    debug!("Retrying {} due transaction(s)", due.len());

    for tx in due {
        match orchestrator.retry_failed_transaction(tx.id).await {
            Ok(_) => report.retried += 1,
            Err(e) => {
                // Another worker or an operator may have moved the row first.
                warn!(transaction_id = %tx.id, error = %e, "scheduled retry skipped");
                report.failed += 1;
            }
        }
    }

    info!(due = report.due, retried = report.retried, failed = report.failed, "retry sweep finished");
    Ok(report)
}

/// Re-processes webhook events left PENDING or FAILED, e.g. after a crash
/// between ingestion and processing.
pub async fn run_webhook_redelivery(reconciler: WebhookReconciler, max_attempts: i32, poll_secs: u64) {
    info!(poll_secs, max_attempts, "webhook redelivery worker started");

    loop {
        if let Err(e) = reconciler.redeliver(max_attempts, SWEEP_BATCH).await {
            error!(error = %e, "webhook redelivery pass failed");
        }

        sleep(Duration::from_secs(poll_secs.max(1))).await;
    }
}
