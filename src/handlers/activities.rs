use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

use crate::db::models::{Activity, MarketplaceStatus, Settlement};
use crate::db::queries;
use crate::error::AppError;
use crate::AppState;

/// Wire shape of an activity record. `transaction_hash` carries the legacy
/// display string; `settlement` is the structured outcome.
#[derive(Debug, Serialize)]
pub struct ActivityResponse {
    pub id: Uuid,
    pub user: String,
    pub activity_type: String,
    pub data: Value,
    pub predicted_emission: f64,
    pub timestamp: DateTime<Utc>,
    pub transaction_hash: Option<String>,
    pub token_id: Option<i64>,
    pub user_wallet: Option<String>,
    pub marketplace_status: MarketplaceStatus,
    pub listing_price: Option<f64>,
    pub settlement: Settlement,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_offset: Option<bool>,
}

impl ActivityResponse {
    pub fn from_activity(activity: Activity) -> Self {
        ActivityResponse {
            id: activity.id,
            user: activity.user,
            activity_type: activity.activity_type,
            data: activity.raw_payload,
            predicted_emission: activity.predicted_emission_kg,
            timestamp: activity.created_at,
            transaction_hash: activity.settlement.display_transaction_hash(),
            token_id: activity.settlement.token_id(),
            user_wallet: activity.user_wallet,
            marketplace_status: activity.marketplace_status,
            listing_price: activity.listing_price,
            settlement: activity.settlement,
            is_offset: None,
        }
    }

    pub fn with_offset_flag(mut self, is_offset: bool) -> Self {
        self.is_offset = Some(is_offset);
        self
    }
}

pub async fn log_activity(
    State(state): State<AppState>,
    Json(payload): Json<Value>,
) -> Result<impl IntoResponse, AppError> {
    tracing::info!("Received activity payload: {}", payload);

    let (activity, is_offset) = state.pipeline().log(payload).await?;

    let response = ActivityResponse::from_activity(activity).with_offset_flag(is_offset);
    Ok((StatusCode::CREATED, Json(response)))
}

pub async fn get_user_activities(
    State(state): State<AppState>,
    Path(username): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let activities = queries::list_activities_for_user(&state.db, &username)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

    let response: Vec<ActivityResponse> = activities
        .into_iter()
        .map(ActivityResponse::from_activity)
        .collect();

    Ok(Json(response))
}
