pub mod adapters;
pub mod cli;
pub mod config;
pub mod db;
pub mod domain;
pub mod error;
pub mod handlers;
pub mod health;
pub mod middleware;
pub mod ports;
pub mod services;
pub mod validation;

use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use std::time::Instant;

use crate::config::Config;
use crate::middleware::{enforce_source_allow_list, request_logger, SourceAllowList};
use crate::ports::LedgerStore;
use crate::services::{EscrowLedger, EventEmitter, TransactionOrchestrator, WebhookReconciler};

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn LedgerStore>,
    pub orchestrator: TransactionOrchestrator,
    pub reconciler: WebhookReconciler,
    pub escrow: EscrowLedger,
    pub config: Arc<Config>,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(store: Arc<dyn LedgerStore>, emitter: EventEmitter, config: Config) -> Self {
        Self {
            orchestrator: TransactionOrchestrator::new(store.clone(), emitter.clone(), config.compliance.clone()),
            reconciler: WebhookReconciler::new(store.clone(), emitter),
            escrow: EscrowLedger::new(store.clone()),
            store,
            config: Arc::new(config),
            started_at: Instant::now(),
        }
    }
}

pub fn create_app(state: AppState) -> Router {
    let webhooks = Router::new()
        .route("/webhooks/payments", post(handlers::webhook::receive_payment_webhook))
        .route_layer(axum::middleware::from_fn_with_state(
            SourceAllowList::from_config(&state.config),
            enforce_source_allow_list,
        ));

    Router::new()
        .route("/health", get(handlers::health))
        .route(
            "/transactions",
            post(handlers::transactions::create_transaction).get(handlers::transactions::list_transactions),
        )
        .route("/transactions/stats", get(handlers::transactions::get_statistics))
        .route(
            "/transactions/:id",
            get(handlers::transactions::get_transaction).patch(handlers::transactions::update_transaction),
        )
        .route("/transactions/:id/approve", post(handlers::transactions::approve_transaction))
        .route("/transactions/:id/cancel", post(handlers::transactions::cancel_transaction))
        .route("/transactions/:id/retry", post(handlers::transactions::retry_transaction))
        .route("/transactions/:id/audit", get(handlers::transactions::audit_trail))
        .route("/escrow/:offering_id", get(handlers::escrow::get_escrow_account))
        .merge(webhooks)
        .layer(axum::middleware::from_fn(request_logger))
        .with_state(state)
}
