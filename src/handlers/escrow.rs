use axum::{
    extract::{Path, State},
    Json,
};
use uuid::Uuid;

use crate::domain::Actor;
use crate::error::AppError;
use crate::services::escrow::BalanceCheck;
use crate::AppState;

/// Escrow account of an offering, with its balance checked against the entry log.
/// Drift is reported, not repaired; `escrow verify` repairs it.
pub async fn get_escrow_account(
    State(state): State<AppState>,
    actor: Actor,
    Path(offering_id): Path<Uuid>,
) -> Result<Json<BalanceCheck>, AppError> {
    if !actor.is_elevated() {
        return Err(AppError::Forbidden("escrow accounts require an elevated role".to_string()));
    }
    let account = state.escrow.get_by_offering(offering_id).await?;
    Ok(Json(state.escrow.check_balance(account.id).await?))
}
