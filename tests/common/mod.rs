#![allow(dead_code)]

use bigdecimal::BigDecimal;
use escrow_core::adapters::MemoryLedgerStore;
use escrow_core::domain::{Actor, ActorRole, Transaction, TransactionEvent};
use escrow_core::ports::LedgerStore;
use escrow_core::services::orchestrator::{InitiateRequest, UpdateTransactionRequest};
use escrow_core::services::{
    BroadcastListener, EscrowLedger, EventEmitter, TransactionOrchestrator, WebhookReconciler,
    ComplianceLimits,
};
use serde_json::{json, Value};
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::broadcast;
use uuid::Uuid;

pub struct Harness {
    pub store: Arc<dyn LedgerStore>,
    pub orchestrator: TransactionOrchestrator,
    pub reconciler: WebhookReconciler,
    pub escrow: EscrowLedger,
    pub events: broadcast::Receiver<TransactionEvent>,
}

pub fn harness() -> Harness {
    let store: Arc<dyn LedgerStore> = Arc::new(MemoryLedgerStore::new());
    let (tx, events) = broadcast::channel(64);
    let emitter = EventEmitter::new().with_listener(Arc::new(BroadcastListener::new(tx)));

    Harness {
        orchestrator: TransactionOrchestrator::new(store.clone(), emitter.clone(), ComplianceLimits::default()),
        reconciler: WebhookReconciler::new(store.clone(), emitter),
        escrow: EscrowLedger::new(store.clone()),
        store,
        events,
    }
}

impl Harness {
    /// Names of the events emitted so far.
    pub fn drain_events(&mut self) -> Vec<&'static str> {
        let mut names = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            names.push(event.name());
        }
        names
    }

    /// Admin moves an INITIATED transaction to PROCESSING.
    pub async fn submit(&self, id: Uuid) -> Transaction {
        let patch = UpdateTransactionRequest {
            status: Some(escrow_core::domain::TransactionStatus::Processing),
            ..UpdateTransactionRequest::default()
        };
        self.orchestrator.update(id, patch, &admin()).await.unwrap()
    }

    /// Ingests and processes one provider event.
    pub async fn deliver(&self, payload: Value) -> Result<(), escrow_core::error::AppError> {
        let event_id = payload["id"].as_str().unwrap().to_string();
        self.reconciler.receive(&event_id, payload).await?;
        self.reconciler.process(&event_id).await.map(|_| ())
    }
}

pub fn dec(value: &str) -> BigDecimal {
    BigDecimal::from_str(value).unwrap()
}

pub fn investor(id: Uuid) -> Actor {
    Actor::new(id, ActorRole::Investor)
}

pub fn admin() -> Actor {
    Actor::new(Uuid::new_v4(), ActorRole::Admin)
}

pub fn deposit_request(user_id: Uuid, offering_id: Uuid, key: &str) -> InitiateRequest {
    serde_json::from_value(json!({
        "type": "DEPOSIT",
        "paymentMethod": "ACH",
        "amount": "10000.00",
        "feeAmount": "50.80",
        "description": "Series A commitment",
        "fromUserId": user_id,
        "offeringId": offering_id,
        "idempotencyKey": key,
    }))
    .unwrap()
}

pub fn payment_succeeded(event_id: &str, transaction_id: Uuid) -> Value {
    json!({
        "id": event_id,
        "type": "payment_intent.succeeded",
        "data": { "object": {
            "id": format!("pi_{}", transaction_id.simple()),
            "amount": 1000000,
            "metadata": { "transaction_id": transaction_id.to_string() }
        } }
    })
}

pub fn payment_failed(event_id: &str, transaction_id: Uuid, code: &str) -> Value {
    json!({
        "id": event_id,
        "type": "payment_intent.payment_failed",
        "data": { "object": {
            "id": format!("pi_{}", transaction_id.simple()),
            "metadata": { "transaction_id": transaction_id.to_string() },
            "last_payment_error": { "code": code, "message": format!("provider said {}", code) }
        } }
    })
}
