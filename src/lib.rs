pub mod chain;
pub mod config;
pub mod db;
pub mod error;
pub mod estimator;
pub mod handlers;
pub mod services;

use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::chain::CreditLedger;
use crate::estimator::RemoteEstimator;
use crate::services::ActivityPipeline;

#[derive(Clone)]
pub struct AppState {
    pub db: sqlx::PgPool,
    pub ledger: Arc<dyn CreditLedger>,
    pub estimator: RemoteEstimator,
}

impl AppState {
    pub fn pipeline(&self) -> ActivityPipeline {
        ActivityPipeline::new(self.db.clone(), self.ledger.clone(), self.estimator.clone())
    }
}

pub fn create_app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/predict", post(handlers::predict))
        .route("/log", post(handlers::activities::log_activity))
        .route(
            "/activities/:username",
            get(handlers::activities::get_user_activities),
        )
        .route(
            "/credits/:wallet",
            get(handlers::credits::get_blockchain_credits),
        )
        .route(
            "/blockchain/status",
            get(handlers::credits::blockchain_status),
        )
        .route(
            "/marketplace/listings",
            get(handlers::marketplace::get_listings),
        )
        .route(
            "/marketplace/user-credits/:wallet",
            get(handlers::marketplace::get_user_credits),
        )
        .route(
            "/marketplace/create",
            post(handlers::marketplace::create_listing),
        )
        .route(
            "/marketplace/buy/:id",
            post(handlers::marketplace::buy_listing),
        )
        .route(
            "/marketplace/check-approval/:token_id/:owner",
            get(handlers::marketplace::check_approval),
        )
        .route(
            "/marketplace/contract-address",
            get(handlers::marketplace::contract_address),
        )
        .route(
            "/marketplace/history/:wallet",
            get(handlers::marketplace::get_history),
        )
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
