use crate::dtos::BalanceResponse;
use crate::error::ApiError;
use crate::startup::AppState;
use axum::{
    extract::{Path, State},
    Json,
};

pub async fn get_balance(
    State(state): State<AppState>,
    Path(account): Path<String>,
) -> Result<Json<BalanceResponse>, ApiError> {
    let balance = state.service.read(|p| Ok(p.balance_of(&account))).await?;
    Ok(Json(BalanceResponse { account, balance }))
}
