pub mod compliance;
pub mod escrow;
pub mod events;
pub mod fees;
pub mod orchestrator;
pub mod reconciliation;
pub mod retry;
pub mod worker;

pub use compliance::ComplianceLimits;
pub use escrow::EscrowLedger;
pub use events::{BroadcastListener, EventEmitter, EventListener, TracingListener};
pub use orchestrator::{InitiateOutcome, InitiateRequest, TransactionOrchestrator, UpdateTransactionRequest};
pub use reconciliation::{ProcessOutcome, ReceiveOutcome, WebhookReconciler};
pub use worker::{run_retry_sweeper, run_webhook_redelivery};
