use axum::{
    extract::{ConnectInfo, Path, Query, State},
    http::{header::USER_AGENT, HeaderMap, StatusCode},
    Json,
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use uuid::Uuid;

use crate::domain::{Actor, AuditEntry, Transaction};
use crate::error::AppError;
use crate::middleware::allow_list::client_ip;
use crate::ports::{StatsFilter, TransactionFilter};
use crate::services::orchestrator::{
    InitiateOutcome, InitiateRequest, TransactionStatistics, UpdateTransactionRequest,
};
use crate::AppState;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
    pub total: i64,
    pub limit: i64,
    pub offset: i64,
    pub has_more: bool,
}

#[derive(Debug, Serialize)]
pub struct TransactionListResponse {
    pub transactions: Vec<Transaction>,
    pub pagination: Pagination,
}

#[derive(Debug, Default, Deserialize)]
pub struct ApproveBody {
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CancelBody {
    pub reason: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct RetryBody {
    #[serde(default)]
    pub force: bool,
}

pub async fn create_transaction(
    State(state): State<AppState>,
    actor: Actor,
    peer: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    Json(mut request): Json<InitiateRequest>,
) -> Result<(StatusCode, Json<InitiateOutcome>), AppError> {
    let peer = peer.map(|ConnectInfo(addr)| addr.ip());
    request.ip_address = client_ip(&headers, peer, state.config.trusted_proxy_depth).map(|ip| ip.to_string());
    request.user_agent = headers
        .get(USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let outcome = state.orchestrator.initiate(request, &actor).await?;
    Ok((StatusCode::CREATED, Json(outcome)))
}

pub async fn list_transactions(
    State(state): State<AppState>,
    actor: Actor,
    Query(filter): Query<TransactionFilter>,
) -> Result<Json<TransactionListResponse>, AppError> {
    let limit = filter.limit();
    let offset = filter.offset();
    let page = state.orchestrator.list(filter, &actor).await?;

    let has_more = offset + (page.transactions.len() as i64) < page.total;
    Ok(Json(TransactionListResponse {
        transactions: page.transactions,
        pagination: Pagination {
            total: page.total,
            limit,
            offset,
            has_more,
        },
    }))
}

pub async fn get_statistics(
    State(state): State<AppState>,
    actor: Actor,
    Query(filter): Query<StatsFilter>,
) -> Result<Json<TransactionStatistics>, AppError> {
    if !actor.is_elevated() {
        return Err(AppError::Forbidden("statistics require an elevated role".to_string()));
    }
    Ok(Json(state.orchestrator.get_statistics(&filter).await?))
}

pub async fn get_transaction(
    State(state): State<AppState>,
    actor: Actor,
    Path(id): Path<Uuid>,
) -> Result<Json<Transaction>, AppError> {
    Ok(Json(state.orchestrator.get(id, &actor).await?))
}

pub async fn update_transaction(
    State(state): State<AppState>,
    actor: Actor,
    Path(id): Path<Uuid>,
    Json(request): Json<UpdateTransactionRequest>,
) -> Result<Json<Transaction>, AppError> {
    Ok(Json(state.orchestrator.update(id, request, &actor).await?))
}

pub async fn approve_transaction(
    State(state): State<AppState>,
    actor: Actor,
    Path(id): Path<Uuid>,
    body: Option<Json<ApproveBody>>,
) -> Result<Json<Transaction>, AppError> {
    let notes = body.and_then(|Json(body)| body.notes);
    Ok(Json(state.orchestrator.approve(id, &actor, notes).await?))
}

pub async fn cancel_transaction(
    State(state): State<AppState>,
    actor: Actor,
    Path(id): Path<Uuid>,
    Json(body): Json<CancelBody>,
) -> Result<Json<Transaction>, AppError> {
    Ok(Json(state.orchestrator.cancel(id, &body.reason, &actor).await?))
}

pub async fn retry_transaction(
    State(state): State<AppState>,
    actor: Actor,
    Path(id): Path<Uuid>,
    body: Option<Json<RetryBody>>,
) -> Result<Json<Transaction>, AppError> {
    let force = body.map(|Json(body)| body.force).unwrap_or(false);
    Ok(Json(state.orchestrator.retry_transaction(id, force, &actor).await?))
}

pub async fn audit_trail(
    State(state): State<AppState>,
    actor: Actor,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<AuditEntry>>, AppError> {
    Ok(Json(state.orchestrator.audit_trail(id, &actor).await?))
}
