pub mod activities;
pub mod credits;
pub mod marketplace;

use crate::estimator;
use crate::AppState;
use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde::{Deserialize, Serialize};

#[derive(Serialize)]
pub struct HealthStatus {
    pub status: String,
    pub version: String,
    pub db: String,
}

pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    // Check database connectivity with SELECT 1 query
    let db_status = match sqlx::query("SELECT 1").execute(&state.db).await {
        Ok(_) => "connected",
        Err(_) => "disconnected",
    };

    let health_response = HealthStatus {
        status: if db_status == "connected" {
            "healthy".to_string()
        } else {
            "unhealthy".to_string()
        },
        version: env!("CARGO_PKG_VERSION").to_string(),
        db: db_status.to_string(),
    };

    let status_code = if db_status == "connected" {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status_code, Json(health_response))
}

#[derive(Debug, Deserialize)]
pub struct PredictPayload {
    #[serde(default)]
    pub activity: String,
    #[serde(default)]
    pub activity_type: String,
}

#[derive(Debug, Serialize)]
pub struct PredictResult {
    pub activity: String,
    pub predicted_emission: f64,
    pub unit: &'static str,
}

/// The prediction endpoint of the original AI engine, served from the same
/// unified estimator the pipeline falls back to.
pub async fn predict(Json(payload): Json<PredictPayload>) -> impl IntoResponse {
    let predicted_emission = estimator::estimate(&payload.activity, &payload.activity_type);

    Json(PredictResult {
        activity: payload.activity,
        predicted_emission,
        unit: "kg CO2e",
    })
}
