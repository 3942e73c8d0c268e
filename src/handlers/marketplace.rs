//! Marketplace endpoints: listings over activities holding minted tokens,
//! with purchase settled as an on-chain transfer. Purchases are fail-closed;
//! the sold transition is claimed atomically so a listing cannot transfer
//! twice.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use crate::chain::kg_to_grams;
use crate::db::models::{Activity, MarketplaceStatus, Settlement};
use crate::db::queries;
use crate::error::AppError;
use crate::AppState;

const DEFAULT_LISTING_PRICE: f64 = 0.01;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Listing {
    pub id: String,
    pub token_id: i64,
    pub seller: String,
    pub seller_wallet: String,
    pub price_eth: f64,
    pub co2_amount: u64,
    pub activity_type: String,
    pub created_at: String,
    pub is_active: bool,
    pub transaction_hash: Option<String>,
}

impl Listing {
    fn from_activity(activity: &Activity) -> Option<Self> {
        let token_id = activity.settlement.token_id()?;
        Some(Listing {
            id: activity.id.to_string(),
            token_id,
            seller: activity.user.clone(),
            seller_wallet: activity
                .user_wallet
                .clone()
                .unwrap_or_else(|| "0x0000...0000".to_string()),
            price_eth: activity.listing_price.unwrap_or(DEFAULT_LISTING_PRICE),
            co2_amount: kg_to_grams(activity.predicted_emission_kg),
            activity_type: activity.activity_type.clone(),
            created_at: activity.created_at.format("%Y-%m-%d").to_string(),
            is_active: activity.marketplace_status == MarketplaceStatus::Listed,
            transaction_hash: activity.settlement.display_transaction_hash(),
        })
    }
}

pub async fn get_listings(State(state): State<AppState>) -> Result<impl IntoResponse, AppError> {
    let activities = queries::list_marketplace_listings(&state.db)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

    let listings: Vec<Listing> = activities.iter().filter_map(Listing::from_activity).collect();

    Ok(Json(json!({
        "success": true,
        "count": listings.len(),
        "listings": listings,
    })))
}

/// On-chain credits owned by a wallet, marketplace flavor of the same query.
pub async fn get_user_credits(
    State(state): State<AppState>,
    Path(wallet): Path<String>,
) -> impl IntoResponse {
    match state.ledger.credits_of(&wallet).await {
        Ok(credits) => (
            StatusCode::OK,
            Json(json!({
                "success": true,
                "count": credits.len(),
                "credits": credits,
            })),
        ),
        Err(e) => (
            StatusCode::BAD_REQUEST,
            Json(json!({
                "success": false,
                "error": e.to_string(),
                "credits": [],
            })),
        ),
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateListingRequest {
    pub token_id: i64,
    pub seller_wallet: String,
    pub price_eth: f64,
    pub seller: String,
}

pub async fn create_listing(
    State(state): State<AppState>,
    Json(request): Json<CreateListingRequest>,
) -> Result<impl IntoResponse, AppError> {
    if request.seller_wallet.is_empty() || request.seller.is_empty() {
        return Err(AppError::Validation("Missing required fields".to_string()));
    }
    if request.price_eth <= 0.0 {
        return Err(AppError::Validation(
            "priceEth must be positive".to_string(),
        ));
    }

    let activity = queries::find_owned_token(&state.db, request.token_id, &request.seller_wallet)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?
        .ok_or_else(|| AppError::NotFound("NFT not found or you don't own it".to_string()))?;

    let updated = queries::mark_listed(&state.db, activity.id, request.price_eth)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

    if !updated {
        return Err(AppError::Conflict(
            "NFT has already been sold".to_string(),
        ));
    }

    tracing::info!(
        "Listing created: token {} by {} at {} ETH",
        request.token_id,
        request.seller,
        request.price_eth
    );

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "success": true,
            "message": "Listing created successfully",
            "listingId": activity.id.to_string(),
        })),
    ))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuyRequest {
    pub buyer_wallet: String,
    pub buyer: String,
}

pub async fn buy_listing(
    State(state): State<AppState>,
    Path(listing_id): Path<Uuid>,
    Json(request): Json<BuyRequest>,
) -> Result<impl IntoResponse, AppError> {
    if request.buyer_wallet.is_empty() || request.buyer.is_empty() {
        return Err(AppError::Validation("Missing required fields".to_string()));
    }

    let listing = queries::get_activity(&state.db, listing_id)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?
        .ok_or_else(|| AppError::NotFound("Listing not found".to_string()))?;

    // No chain call unless the listing actually carries a minted token.
    let token_id = listing
        .settlement
        .token_id()
        .ok_or_else(|| AppError::BadRequest("Invalid listing - no NFT token found".to_string()))?;

    let seller_wallet = listing
        .user_wallet
        .clone()
        .filter(|w| !w.is_empty())
        .ok_or_else(|| AppError::BadRequest("Seller wallet not found".to_string()))?;

    // Atomic claim: only one buyer can move the row out of `listed`.
    let claimed = queries::claim_listing(&state.db, listing_id)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;
    let Some(listing) = claimed else {
        return Err(AppError::Conflict(
            "Listing is no longer available".to_string(),
        ));
    };

    tracing::info!(
        "Processing marketplace purchase: NFT #{} from {} to {}",
        token_id,
        seller_wallet,
        request.buyer_wallet
    );

    let transfer = state
        .ledger
        .transfer(&seller_wallet, &request.buyer_wallet, token_id as u64)
        .await;

    let receipt = match transfer {
        Ok(receipt) => receipt,
        Err(e) => {
            // Fail closed: release the claim and surface the chain error.
            if let Err(revert_err) = queries::revert_claim(&state.db, listing_id).await {
                tracing::error!(
                    "Failed to relist {} after transfer failure: {}",
                    listing_id,
                    revert_err
                );
            }
            return Err(AppError::BadRequest(format!(
                "Blockchain transfer failed: {}",
                e
            )));
        }
    };

    // A new activity records the purchase on the buyer's side.
    let mut purchase = Activity::new(
        request.buyer.clone(),
        "marketplace_purchase".to_string(),
        json!({
            "listing_id": listing_id.to_string(),
            "seller": listing.user,
            "seller_wallet": seller_wallet,
            "buyer_wallet": request.buyer_wallet,
            "token_id": token_id,
            "co2_amount": listing.predicted_emission_kg,
            "original_activity_type": listing.activity_type,
            "price_paid": listing.listing_price,
        }),
        listing.predicted_emission_kg,
        Some(request.buyer_wallet.clone()),
    );
    purchase.settlement = Settlement::Minted {
        transaction_hash: receipt.transaction_hash.clone(),
        token_id: Some(token_id),
    };

    queries::insert_activity(&state.db, &purchase)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

    Ok(Json(json!({
        "success": true,
        "message": "Purchase completed successfully on blockchain",
        "transactionHash": receipt.transaction_hash,
        "blockNumber": receipt.block_number,
        "tokenId": token_id,
    })))
}

pub async fn check_approval(
    State(state): State<AppState>,
    Path((token_id, owner)): Path<(u64, String)>,
) -> impl IntoResponse {
    match state.ledger.approval_status(&owner, token_id).await {
        Ok(status) => (
            StatusCode::OK,
            Json(json!({
                "success": true,
                "approved": status.approved,
                "backend_address": status.backend_address,
                "is_approved_for_all": status.is_approved_for_all,
            })),
        ),
        Err(e) => (
            StatusCode::BAD_REQUEST,
            Json(json!({
                "success": false,
                "error": e.to_string(),
                "approved": false,
            })),
        ),
    }
}

/// The operator address owners must approve, plus the contract in play.
pub async fn contract_address(State(state): State<AppState>) -> impl IntoResponse {
    let status = state.ledger.connection_status().await;

    Json(json!({
        "success": true,
        "contract_address": status.contract_address,
        "marketplace_operator": state.ledger.operator_address(),
        "chain_id": status.chain_id,
    }))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub token_id: i64,
    pub activity_type: String,
    pub co2_amount: u64,
    pub price_eth: f64,
    pub timestamp: String,
    pub transaction_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seller: Option<String>,
    pub status: &'static str,
}

pub async fn get_history(
    State(state): State<AppState>,
    Path(wallet): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let sold = queries::sold_by_wallet(&state.db, &wallet)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;
    let purchased = queries::purchases_by_wallet(&state.db, &wallet)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

    let mut history: Vec<(chrono::DateTime<chrono::Utc>, HistoryEntry)> = Vec::new();

    for item in &sold {
        let Some(token_id) = item.settlement.token_id() else {
            continue;
        };
        history.push((
            item.created_at,
            HistoryEntry {
                id: item.id.to_string(),
                kind: "sale",
                token_id,
                activity_type: item.activity_type.clone(),
                co2_amount: kg_to_grams(item.predicted_emission_kg),
                price_eth: item.listing_price.unwrap_or(DEFAULT_LISTING_PRICE),
                timestamp: item.created_at.format("%Y-%m-%d %H:%M:%S").to_string(),
                transaction_hash: item.settlement.display_transaction_hash(),
                seller: None,
                status: "sold",
            },
        ));
    }

    for item in &purchased {
        let Some(token_id) = item.settlement.token_id() else {
            continue;
        };
        let payload = &item.raw_payload;
        history.push((
            item.created_at,
            HistoryEntry {
                id: item.id.to_string(),
                kind: "purchase",
                token_id,
                activity_type: payload
                    .get("original_activity_type")
                    .and_then(|v| v.as_str())
                    .unwrap_or("unknown")
                    .to_string(),
                co2_amount: kg_to_grams(item.predicted_emission_kg),
                price_eth: payload
                    .get("price_paid")
                    .and_then(|v| v.as_f64())
                    .unwrap_or(DEFAULT_LISTING_PRICE),
                timestamp: item.created_at.format("%Y-%m-%d %H:%M:%S").to_string(),
                transaction_hash: item.settlement.display_transaction_hash(),
                seller: payload
                    .get("seller")
                    .and_then(|v| v.as_str())
                    .map(String::from)
                    .or_else(|| Some("Unknown".to_string())),
                status: "purchased",
            },
        ));
    }

    history.sort_by(|a, b| b.0.cmp(&a.0));
    let entries: Vec<HistoryEntry> = history.into_iter().map(|(_, entry)| entry).collect();

    Ok(Json(json!({
        "success": true,
        "count": entries.len(),
        "history": entries,
    })))
}
