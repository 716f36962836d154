use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::timeout;

use crate::ports::LedgerStore;

const CHECK_TIMEOUT_SECS: u64 = 5;

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_seconds: u64,
    pub dependencies: BTreeMap<String, DependencyStatus>,
}

impl HealthResponse {
    pub fn is_healthy(&self) -> bool {
        self.status == "healthy"
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DependencyStatus {
    Healthy { status: String, latency_ms: u64 },
    Unhealthy { status: String, error: String },
}

async fn check_store(store: &dyn LedgerStore) -> DependencyStatus {
    let start = Instant::now();
    match timeout(Duration::from_secs(CHECK_TIMEOUT_SECS), store.ping()).await {
        Ok(Ok(())) => DependencyStatus::Healthy {
            status: "healthy".to_string(),
            latency_ms: start.elapsed().as_millis() as u64,
        },
        Ok(Err(e)) => DependencyStatus::Unhealthy {
            status: "unhealthy".to_string(),
            error: e.to_string(),
        },
        Err(_) => DependencyStatus::Unhealthy {
            status: "unhealthy".to_string(),
            error: "timeout".to_string(),
        },
    }
}

pub async fn check_health(store: Arc<dyn LedgerStore>, start_time: Instant) -> HealthResponse {
    let mut dependencies = BTreeMap::new();
    dependencies.insert("ledger_store".to_string(), check_store(store.as_ref()).await);

    let status = if dependencies
        .values()
        .any(|d| matches!(d, DependencyStatus::Unhealthy { .. }))
    {
        "unhealthy"
    } else {
        "healthy"
    };

    HealthResponse {
        status: status.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: start_time.elapsed().as_secs(),
        dependencies,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::MemoryLedgerStore;

    #[tokio::test]
    async fn memory_store_reports_healthy() {
        let store: Arc<dyn LedgerStore> = Arc::new(MemoryLedgerStore::new());
        let health = check_health(store, Instant::now()).await;
        assert!(health.is_healthy());
        assert!(matches!(
            health.dependencies.get("ledger_store"),
            Some(DependencyStatus::Healthy { .. })
        ));
    }
}
