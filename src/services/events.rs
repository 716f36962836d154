//! Post-commit event dispatch.
//!
//! Listeners are registered once at startup. A listener that errors or panics is
//! logged and skipped; it never affects the caller or the other listeners.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::domain::TransactionEvent;

pub trait EventListener: Send + Sync {
    fn name(&self) -> &str;

    fn on_event(&self, event: &TransactionEvent) -> anyhow::Result<()>;
}

#[derive(Clone, Default)]
pub struct EventEmitter {
    listeners: Vec<Arc<dyn EventListener>>,
}

impl EventEmitter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_listener(mut self, listener: Arc<dyn EventListener>) -> Self {
        self.listeners.push(listener);
        self
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    pub fn emit(&self, event: &TransactionEvent) {
        for listener in &self.listeners {
            match catch_unwind(AssertUnwindSafe(|| listener.on_event(event))) {
                Ok(Ok(())) => {}
                Ok(Err(err)) => tracing::warn!(
                    listener = listener.name(),
                    event = event.name(),
                    error = %err,
                    "event listener failed"
                ),
                Err(_) => tracing::warn!(
                    listener = listener.name(),
                    event = event.name(),
                    "event listener panicked"
                ),
            }
        }
    }

    pub fn emit_all(&self, events: &[TransactionEvent]) {
        for event in events {
            self.emit(event);
        }
    }
}

/// Writes one structured log line per event.
pub struct TracingListener;

impl EventListener for TracingListener {
    fn name(&self) -> &str {
        "tracing"
    }

    fn on_event(&self, event: &TransactionEvent) -> anyhow::Result<()> {
        match event.transaction_id() {
            Some(transaction_id) => tracing::info!(
                event = event.name(),
                transaction_id = %transaction_id,
                "transaction event"
            ),
            None => tracing::info!(event = event.name(), "transaction event"),
        }
        Ok(())
    }
}

/// Fans events out to in-process subscribers.
pub struct BroadcastListener {
    tx: broadcast::Sender<TransactionEvent>,
}

impl BroadcastListener {
    pub fn new(tx: broadcast::Sender<TransactionEvent>) -> Self {
        Self { tx }
    }
}

impl EventListener for BroadcastListener {
    fn name(&self) -> &str {
        "broadcast"
    }

    fn on_event(&self, event: &TransactionEvent) -> anyhow::Result<()> {
        // No receivers is not an error.
        let _ = self.tx.send(event.clone());
        Ok(())
    }
}
