//! Activity domain entity and its settlement state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Legacy display string for offset activities submitted without a wallet.
pub const NO_WALLET_SENTINEL: &str = "No wallet connected";
/// Legacy display string for emitting (non-offset) activities.
pub const NOT_OFFSET_SENTINEL: &str = "Emission logged (no NFT for emitting activities)";

/// How the on-chain settlement of an activity ended.
///
/// The original system overloaded a single transaction-hash string with five
/// different meanings; this keeps them as distinct variants and derives the
/// legacy string only for display.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Settlement {
    Pending,
    Minted {
        transaction_hash: String,
        token_id: Option<i64>,
    },
    NoWallet,
    NotOffset,
    MintFailed {
        reason: String,
    },
}

impl Settlement {
    pub fn status_label(&self) -> &'static str {
        match self {
            Settlement::Pending => "pending",
            Settlement::Minted { .. } => "minted",
            Settlement::NoWallet => "no_wallet",
            Settlement::NotOffset => "not_offset",
            Settlement::MintFailed { .. } => "mint_failed",
        }
    }

    pub fn token_id(&self) -> Option<i64> {
        match self {
            Settlement::Minted { token_id, .. } => *token_id,
            _ => None,
        }
    }

    /// The real chain hash, only ever present on a successful mint.
    pub fn stored_hash(&self) -> Option<&str> {
        match self {
            Settlement::Minted {
                transaction_hash, ..
            } => Some(transaction_hash),
            _ => None,
        }
    }

    pub fn mint_error(&self) -> Option<&str> {
        match self {
            Settlement::MintFailed { reason } => Some(reason),
            _ => None,
        }
    }

    /// The `transaction_hash` string the original API exposed.
    pub fn display_transaction_hash(&self) -> Option<String> {
        match self {
            Settlement::Pending => None,
            Settlement::Minted {
                transaction_hash, ..
            } => Some(transaction_hash.clone()),
            Settlement::NoWallet => Some(NO_WALLET_SENTINEL.to_string()),
            Settlement::NotOffset => Some(NOT_OFFSET_SENTINEL.to_string()),
            Settlement::MintFailed { reason } => Some(format!("Error: {}", reason)),
        }
    }

    pub fn from_columns(
        status: &str,
        transaction_hash: Option<String>,
        mint_error: Option<String>,
        token_id: Option<i64>,
    ) -> Self {
        match status {
            "minted" => Settlement::Minted {
                transaction_hash: transaction_hash.unwrap_or_default(),
                token_id,
            },
            "no_wallet" => Settlement::NoWallet,
            "not_offset" => Settlement::NotOffset,
            "mint_failed" => Settlement::MintFailed {
                reason: mint_error.unwrap_or_else(|| "Unknown error".to_string()),
            },
            _ => Settlement::Pending,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarketplaceStatus {
    NotListed,
    Listed,
    Sold,
}

impl MarketplaceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MarketplaceStatus::NotListed => "not_listed",
            MarketplaceStatus::Listed => "listed",
            MarketplaceStatus::Sold => "sold",
        }
    }

    pub fn parse(raw: &str) -> Self {
        match raw {
            "listed" => MarketplaceStatus::Listed,
            "sold" => MarketplaceStatus::Sold,
            _ => MarketplaceStatus::NotListed,
        }
    }
}

/// A logged activity. Created by the pipeline, settled once, mutated after
/// that only by marketplace transitions. Never deleted.
#[derive(Debug, Clone, Serialize)]
pub struct Activity {
    pub id: Uuid,
    pub user: String,
    pub activity_type: String,
    pub raw_payload: serde_json::Value,
    pub predicted_emission_kg: f64,
    pub created_at: DateTime<Utc>,
    pub settlement: Settlement,
    pub user_wallet: Option<String>,
    pub marketplace_status: MarketplaceStatus,
    pub listing_price: Option<f64>,
}

impl Activity {
    pub fn new(
        user: String,
        activity_type: String,
        raw_payload: serde_json::Value,
        predicted_emission_kg: f64,
        user_wallet: Option<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            user,
            activity_type,
            raw_payload,
            predicted_emission_kg,
            created_at: Utc::now(),
            settlement: Settlement::Pending,
            user_wallet,
            marketplace_status: MarketplaceStatus::NotListed,
            listing_price: None,
        }
    }
}

/// Internal row type for SQLx. Not exposed outside the db module.
#[derive(Debug, sqlx::FromRow)]
pub(crate) struct ActivityRow {
    pub id: Uuid,
    pub username: String,
    pub activity_type: String,
    pub raw_payload: serde_json::Value,
    pub predicted_emission_kg: f64,
    pub created_at: DateTime<Utc>,
    pub settlement_status: String,
    pub transaction_hash: Option<String>,
    pub mint_error: Option<String>,
    pub token_id: Option<i64>,
    pub user_wallet: Option<String>,
    pub marketplace_status: String,
    pub listing_price: Option<f64>,
}

impl ActivityRow {
    pub(crate) fn into_domain(self) -> Activity {
        let settlement = Settlement::from_columns(
            &self.settlement_status,
            self.transaction_hash,
            self.mint_error,
            self.token_id,
        );
        Activity {
            id: self.id,
            user: self.username,
            activity_type: self.activity_type,
            raw_payload: self.raw_payload,
            predicted_emission_kg: self.predicted_emission_kg,
            created_at: self.created_at,
            settlement,
            user_wallet: self.user_wallet,
            marketplace_status: MarketplaceStatus::parse(&self.marketplace_status),
            listing_price: self.listing_price,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_new_activity_defaults() {
        let activity = Activity::new(
            "alice".to_string(),
            "transport".to_string(),
            json!({"activity": "drove 20 km"}),
            3.0,
            None,
        );
        assert_eq!(activity.settlement, Settlement::Pending);
        assert_eq!(activity.marketplace_status, MarketplaceStatus::NotListed);
        assert!(activity.listing_price.is_none());
    }

    #[test]
    fn test_display_hash_minted_is_the_real_hash() {
        let settlement = Settlement::Minted {
            transaction_hash: "0xabc123".to_string(),
            token_id: Some(7),
        };
        assert_eq!(
            settlement.display_transaction_hash(),
            Some("0xabc123".to_string())
        );
        assert_eq!(settlement.token_id(), Some(7));
    }

    #[test]
    fn test_display_hash_sentinels() {
        assert_eq!(
            Settlement::NoWallet.display_transaction_hash(),
            Some("No wallet connected".to_string())
        );
        assert_eq!(
            Settlement::NotOffset.display_transaction_hash(),
            Some("Emission logged (no NFT for emitting activities)".to_string())
        );
        assert_eq!(
            Settlement::MintFailed {
                reason: "nonce too low".to_string()
            }
            .display_transaction_hash(),
            Some("Error: nonce too low".to_string())
        );
        assert_eq!(Settlement::Pending.display_transaction_hash(), None);
    }

    #[test]
    fn test_token_id_only_on_minted() {
        assert_eq!(Settlement::NoWallet.token_id(), None);
        assert_eq!(Settlement::NotOffset.token_id(), None);
        assert_eq!(
            Settlement::MintFailed {
                reason: "x".to_string()
            }
            .token_id(),
            None
        );
    }

    #[test]
    fn test_settlement_column_round_trip() {
        let cases = vec![
            Settlement::Pending,
            Settlement::Minted {
                transaction_hash: "0xdeadbeef".to_string(),
                token_id: Some(42),
            },
            Settlement::Minted {
                transaction_hash: "0xdeadbeef".to_string(),
                token_id: None,
            },
            Settlement::NoWallet,
            Settlement::NotOffset,
            Settlement::MintFailed {
                reason: "reverted".to_string(),
            },
        ];
        for settlement in cases {
            let rebuilt = Settlement::from_columns(
                settlement.status_label(),
                settlement.stored_hash().map(|s| s.to_string()),
                settlement.mint_error().map(|s| s.to_string()),
                settlement.token_id(),
            );
            assert_eq!(rebuilt, settlement);
        }
    }

    #[test]
    fn test_marketplace_status_parse() {
        assert_eq!(MarketplaceStatus::parse("listed"), MarketplaceStatus::Listed);
        assert_eq!(MarketplaceStatus::parse("sold"), MarketplaceStatus::Sold);
        assert_eq!(
            MarketplaceStatus::parse("not_listed"),
            MarketplaceStatus::NotListed
        );
        assert_eq!(
            MarketplaceStatus::parse("garbage"),
            MarketplaceStatus::NotListed
        );
    }
}
