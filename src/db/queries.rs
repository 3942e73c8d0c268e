use sqlx::{PgPool, Result};
use uuid::Uuid;

use crate::db::models::{Activity, ActivityRow, Settlement};

const ALL_COLUMNS: &str = "id, username, activity_type, raw_payload, predicted_emission_kg, \
     created_at, settlement_status, transaction_hash, mint_error, token_id, \
     user_wallet, marketplace_status, listing_price";

pub async fn insert_activity(pool: &PgPool, activity: &Activity) -> Result<Activity> {
    let row = sqlx::query_as::<_, ActivityRow>(&format!(
        r#"
        INSERT INTO activities (
            id, username, activity_type, raw_payload, predicted_emission_kg,
            created_at, settlement_status, transaction_hash, mint_error, token_id,
            user_wallet, marketplace_status, listing_price
        ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
        RETURNING {ALL_COLUMNS}
        "#
    ))
    .bind(activity.id)
    .bind(&activity.user)
    .bind(&activity.activity_type)
    .bind(&activity.raw_payload)
    .bind(activity.predicted_emission_kg)
    .bind(activity.created_at)
    .bind(activity.settlement.status_label())
    .bind(activity.settlement.stored_hash())
    .bind(activity.settlement.mint_error())
    .bind(activity.settlement.token_id())
    .bind(&activity.user_wallet)
    .bind(activity.marketplace_status.as_str())
    .bind(activity.listing_price)
    .fetch_one(pool)
    .await?;

    Ok(row.into_domain())
}

pub async fn get_activity(pool: &PgPool, id: Uuid) -> Result<Option<Activity>> {
    let row = sqlx::query_as::<_, ActivityRow>("SELECT * FROM activities WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await?;

    Ok(row.map(|r| r.into_domain()))
}

pub async fn list_activities_for_user(pool: &PgPool, username: &str) -> Result<Vec<Activity>> {
    let rows = sqlx::query_as::<_, ActivityRow>(
        "SELECT * FROM activities WHERE username = $1 ORDER BY created_at DESC",
    )
    .bind(username)
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(|r| r.into_domain()).collect())
}

/// Write the settlement outcome back onto the activity row.
pub async fn update_settlement(pool: &PgPool, id: Uuid, settlement: &Settlement) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE activities
        SET settlement_status = $2, transaction_hash = $3, mint_error = $4, token_id = $5
        WHERE id = $1
        "#,
    )
    .bind(id)
    .bind(settlement.status_label())
    .bind(settlement.stored_hash())
    .bind(settlement.mint_error())
    .bind(settlement.token_id())
    .execute(pool)
    .await?;

    Ok(())
}

/// The activity holding a given minted token for a given owner wallet.
pub async fn find_owned_token(
    pool: &PgPool,
    token_id: i64,
    wallet: &str,
) -> Result<Option<Activity>> {
    let row = sqlx::query_as::<_, ActivityRow>(
        "SELECT * FROM activities WHERE token_id = $1 AND user_wallet = $2",
    )
    .bind(token_id)
    .bind(wallet)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|r| r.into_domain()))
}

/// Mark an activity as listed at the given price. Sold rows are immutable,
/// hence the status guard. Returns false when nothing was updated.
pub async fn mark_listed(pool: &PgPool, id: Uuid, price: f64) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE activities
        SET marketplace_status = 'listed', listing_price = $2
        WHERE id = $1 AND marketplace_status <> 'sold'
        "#,
    )
    .bind(id)
    .bind(price)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

pub async fn list_marketplace_listings(pool: &PgPool) -> Result<Vec<Activity>> {
    let rows = sqlx::query_as::<_, ActivityRow>(
        r#"
        SELECT * FROM activities
        WHERE marketplace_status = 'listed'
          AND settlement_status = 'minted'
          AND token_id IS NOT NULL
        ORDER BY created_at DESC
        "#,
    )
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(|r| r.into_domain()).collect())
}

/// Atomically claim a listing for purchase: the row moves to `sold` only if
/// it is currently `listed`. A concurrent buyer loses the race and gets
/// `None` back.
pub async fn claim_listing(pool: &PgPool, id: Uuid) -> Result<Option<Activity>> {
    let row = sqlx::query_as::<_, ActivityRow>(&format!(
        r#"
        UPDATE activities
        SET marketplace_status = 'sold'
        WHERE id = $1 AND marketplace_status = 'listed'
        RETURNING {ALL_COLUMNS}
        "#
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|r| r.into_domain()))
}

/// Put a claimed listing back on the market after a failed transfer.
pub async fn revert_claim(pool: &PgPool, id: Uuid) -> Result<()> {
    sqlx::query(
        "UPDATE activities SET marketplace_status = 'listed' WHERE id = $1 AND marketplace_status = 'sold'",
    )
    .bind(id)
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn sold_by_wallet(pool: &PgPool, wallet: &str) -> Result<Vec<Activity>> {
    let rows = sqlx::query_as::<_, ActivityRow>(
        r#"
        SELECT * FROM activities
        WHERE user_wallet = $1 AND marketplace_status = 'sold' AND token_id IS NOT NULL
        ORDER BY created_at DESC
        "#,
    )
    .bind(wallet)
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(|r| r.into_domain()).collect())
}

pub async fn purchases_by_wallet(pool: &PgPool, wallet: &str) -> Result<Vec<Activity>> {
    let rows = sqlx::query_as::<_, ActivityRow>(
        r#"
        SELECT * FROM activities
        WHERE user_wallet = $1 AND activity_type = 'marketplace_purchase' AND token_id IS NOT NULL
        ORDER BY created_at DESC
        "#,
    )
    .bind(wallet)
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(|r| r.into_domain()).collect())
}
