use axum::{
    extract::{Path, State},
    response::IntoResponse,
    Json,
};
use serde_json::json;

use crate::error::AppError;
use crate::AppState;

/// Carbon credit NFTs for a wallet, read directly from the chain.
pub async fn get_blockchain_credits(
    State(state): State<AppState>,
    Path(wallet): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let credits = state
        .ledger
        .credits_of(&wallet)
        .await
        .map_err(|e| AppError::BadRequest(e.to_string()))?;

    let total = credits.len();
    Ok(Json(json!({
        "wallet": wallet,
        "credits": credits,
        "total_credits": total,
    })))
}

pub async fn blockchain_status(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.ledger.connection_status().await)
}
