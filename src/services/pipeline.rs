//! The activity-to-credit pipeline: estimate, persist, settle.
//!
//! A single linear pass per submission. Estimator and chain failures degrade
//! into fallback values or a recorded settlement outcome; only validation
//! and persistence failures surface as HTTP errors.

use std::sync::Arc;

use serde_json::Value;
use sqlx::PgPool;

use crate::chain::{CreditLedger, ZERO_ADDRESS};
use crate::db::models::{Activity, Settlement};
use crate::db::queries;
use crate::error::AppError;
use crate::estimator::{self, RemoteEstimator};

/// Fields extracted from a raw `/log` submission, with the documented
/// defaults applied. The full payload is retained separately for audit.
#[derive(Debug, Clone, PartialEq)]
pub struct LogRequest {
    pub user: String,
    pub activity_type: String,
    pub description: String,
    pub user_wallet: Option<String>,
    pub is_offset: bool,
}

impl LogRequest {
    pub fn from_payload(payload: &Value) -> Self {
        LogRequest {
            user: payload
                .get("user")
                .and_then(|v| v.as_str())
                .unwrap_or("anonymous")
                .to_string(),
            activity_type: payload
                .get("activity_type")
                .and_then(|v| v.as_str())
                .unwrap_or("unknown")
                .to_string(),
            description: payload
                .get("activity")
                .and_then(|v| v.as_str())
                .unwrap_or("")
                .to_string(),
            user_wallet: payload
                .get("user_wallet")
                .and_then(|v| v.as_str())
                .map(String::from),
            is_offset: payload
                .get("is_offset")
                .and_then(|v| v.as_bool())
                .unwrap_or(false),
        }
    }

    /// Offset classification: the explicit flag or a known offset type.
    pub fn is_offset_activity(&self) -> bool {
        self.is_offset || estimator::is_offset_type(&self.activity_type)
    }

    /// The wallet, if it can actually receive a mint. Empty strings and the
    /// zero address do not count.
    pub fn usable_wallet(&self) -> Option<&str> {
        self.user_wallet
            .as_deref()
            .filter(|w| !w.is_empty() && *w != ZERO_ADDRESS)
    }
}

/// Settle one activity against the ledger. Terminal: every branch yields a
/// recorded outcome, never an error.
pub async fn settle(
    ledger: &dyn CreditLedger,
    is_offset: bool,
    wallet: Option<&str>,
    emission_kg: f64,
    activity_type: &str,
) -> Settlement {
    if !is_offset {
        tracing::info!(
            "Emitting activity: {}. No NFT minting for carbon emissions.",
            activity_type
        );
        return Settlement::NotOffset;
    }

    let Some(wallet) = wallet else {
        tracing::info!("No wallet provided, skipping NFT minting");
        return Settlement::NoWallet;
    };

    match ledger.mint(wallet, emission_kg, activity_type).await {
        Ok(receipt) => Settlement::Minted {
            transaction_hash: receipt.transaction_hash,
            token_id: receipt.token_id.map(|id| id as i64),
        },
        Err(e) => {
            tracing::error!("Minting failed: {}", e);
            Settlement::MintFailed {
                reason: e.to_string(),
            }
        }
    }
}

#[derive(Clone)]
pub struct ActivityPipeline {
    db: PgPool,
    ledger: Arc<dyn CreditLedger>,
    estimator: RemoteEstimator,
}

impl ActivityPipeline {
    pub fn new(db: PgPool, ledger: Arc<dyn CreditLedger>, estimator: RemoteEstimator) -> Self {
        Self {
            db,
            ledger,
            estimator,
        }
    }

    /// One remote attempt, then the local estimator. The caller never learns
    /// the remote engine was unreachable.
    async fn resolve_emission(&self, description: &str, activity_type: &str) -> f64 {
        match self.estimator.predict(description, activity_type).await {
            Ok(emission) => {
                tracing::info!("AI Prediction: {} kg CO2", emission);
                emission
            }
            Err(e) => {
                tracing::warn!("AI engine unavailable, using local estimate: {}", e);
                estimator::estimate(description, activity_type)
            }
        }
    }

    /// Run the full pipeline for one submission. Returns the persisted
    /// activity and the transient offset classification.
    pub async fn log(&self, payload: Value) -> Result<(Activity, bool), AppError> {
        let request = LogRequest::from_payload(&payload);
        let is_offset = request.is_offset_activity();

        let emission_kg = self
            .resolve_emission(&request.description, &request.activity_type)
            .await;

        let activity = Activity::new(
            request.user.clone(),
            request.activity_type.clone(),
            payload,
            emission_kg,
            request.user_wallet.clone(),
        );
        let mut persisted = queries::insert_activity(&self.db, &activity).await?;

        let settlement = settle(
            self.ledger.as_ref(),
            is_offset,
            request.usable_wallet(),
            emission_kg,
            &request.activity_type,
        )
        .await;

        queries::update_settlement(&self.db, persisted.id, &settlement).await?;
        persisted.settlement = settlement;

        Ok((persisted, is_offset))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::{
        ApprovalStatus, ChainError, ConnectionStatus, CreditDetail, MintReceipt, TransferReceipt,
    };
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Ledger stub: succeeds with a fixed token id or fails with a fixed
    /// reason, counting mint calls.
    struct StubLedger {
        mint_outcome: Result<(Option<u64>, String), String>,
        mint_calls: AtomicUsize,
    }

    impl StubLedger {
        fn minting(token_id: Option<u64>, hash: &str) -> Self {
            Self {
                mint_outcome: Ok((token_id, hash.to_string())),
                mint_calls: AtomicUsize::new(0),
            }
        }

        fn failing(reason: &str) -> Self {
            Self {
                mint_outcome: Err(reason.to_string()),
                mint_calls: AtomicUsize::new(0),
            }
        }

        fn calls(&self) -> usize {
            self.mint_calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl CreditLedger for StubLedger {
        async fn mint(
            &self,
            _wallet: &str,
            emission_kg: f64,
            _activity_type: &str,
        ) -> Result<MintReceipt, ChainError> {
            self.mint_calls.fetch_add(1, Ordering::SeqCst);
            match &self.mint_outcome {
                Ok((token_id, hash)) => Ok(MintReceipt {
                    token_id: *token_id,
                    transaction_hash: hash.clone(),
                    co2_grams: crate::chain::kg_to_grams(emission_kg),
                    block_number: Some(1),
                    gas_used: 21_000,
                }),
                Err(reason) => Err(ChainError::InvalidKey(reason.clone())),
            }
        }

        async fn transfer(
            &self,
            _from: &str,
            _to: &str,
            _token_id: u64,
        ) -> Result<TransferReceipt, ChainError> {
            unimplemented!("not used in pipeline tests")
        }

        async fn balance_of(&self, _wallet: &str) -> Result<u64, ChainError> {
            Ok(0)
        }

        async fn credits_of(&self, _wallet: &str) -> Result<Vec<CreditDetail>, ChainError> {
            Ok(vec![])
        }

        async fn approval_status(
            &self,
            _owner: &str,
            _token_id: u64,
        ) -> Result<ApprovalStatus, ChainError> {
            Ok(ApprovalStatus {
                approved: false,
                backend_address: None,
                is_approved_for_all: false,
            })
        }

        async fn connection_status(&self) -> ConnectionStatus {
            ConnectionStatus {
                connected: true,
                chain_id: Some(31337),
                contract_address: ZERO_ADDRESS.to_string(),
                latest_block: Some(0),
            }
        }

        fn operator_address(&self) -> Option<String> {
            None
        }

        fn contract_address(&self) -> String {
            ZERO_ADDRESS.to_string()
        }
    }

    const WALLET: &str = "0x70997970C51812dc3A010C7d01b50e0d17dc79C8";

    #[test]
    fn test_request_defaults() {
        let request = LogRequest::from_payload(&json!({}));
        assert_eq!(request.user, "anonymous");
        assert_eq!(request.activity_type, "unknown");
        assert_eq!(request.description, "");
        assert_eq!(request.user_wallet, None);
        assert!(!request.is_offset);
    }

    #[test]
    fn test_offset_classification_by_type_and_flag() {
        let by_type = LogRequest::from_payload(&json!({"activity_type": "tree_planting"}));
        assert!(by_type.is_offset_activity());

        let by_flag =
            LogRequest::from_payload(&json!({"activity_type": "transport", "is_offset": true}));
        assert!(by_flag.is_offset_activity());

        let neither = LogRequest::from_payload(&json!({"activity_type": "transport"}));
        assert!(!neither.is_offset_activity());
    }

    #[test]
    fn test_zero_address_is_not_a_usable_wallet() {
        let request = LogRequest::from_payload(&json!({"user_wallet": ZERO_ADDRESS}));
        assert_eq!(request.usable_wallet(), None);

        let request = LogRequest::from_payload(&json!({"user_wallet": ""}));
        assert_eq!(request.usable_wallet(), None);

        let request = LogRequest::from_payload(&json!({"user_wallet": WALLET}));
        assert_eq!(request.usable_wallet(), Some(WALLET));
    }

    #[tokio::test]
    async fn test_settle_offset_with_wallet_mints() {
        let ledger = StubLedger::minting(Some(7), "0xfeed");
        let settlement = settle(&ledger, true, Some(WALLET), 60.0, "tree_planting").await;

        assert_eq!(
            settlement,
            Settlement::Minted {
                transaction_hash: "0xfeed".to_string(),
                token_id: Some(7),
            }
        );
        assert_eq!(ledger.calls(), 1);
    }

    #[tokio::test]
    async fn test_settle_offset_without_wallet_records_sentinel() {
        let ledger = StubLedger::minting(Some(7), "0xfeed");
        let settlement = settle(&ledger, true, None, 60.0, "tree_planting").await;

        assert_eq!(settlement, Settlement::NoWallet);
        assert_eq!(settlement.display_transaction_hash().unwrap(), "No wallet connected");
        assert_eq!(settlement.token_id(), None);
        assert_eq!(ledger.calls(), 0);
    }

    #[tokio::test]
    async fn test_settle_non_offset_never_touches_ledger() {
        let ledger = StubLedger::minting(Some(7), "0xfeed");
        let settlement = settle(&ledger, false, Some(WALLET), 3.0, "transport").await;

        assert_eq!(settlement, Settlement::NotOffset);
        assert_eq!(
            settlement.display_transaction_hash().unwrap(),
            "Emission logged (no NFT for emitting activities)"
        );
        assert_eq!(ledger.calls(), 0);
    }

    #[tokio::test]
    async fn test_settle_mint_failure_absorbed_into_outcome() {
        let ledger = StubLedger::failing("nonce too low");
        let settlement = settle(&ledger, true, Some(WALLET), 60.0, "tree_planting").await;

        match &settlement {
            Settlement::MintFailed { reason } => assert!(reason.contains("nonce too low")),
            other => panic!("expected MintFailed, got {:?}", other),
        }
        assert!(settlement
            .display_transaction_hash()
            .unwrap()
            .starts_with("Error: "));
    }

    #[tokio::test]
    async fn test_settle_mint_succeeds_without_event_token_id() {
        let ledger = StubLedger::minting(None, "0xfeed");
        let settlement = settle(&ledger, true, Some(WALLET), 1.0, "recycling").await;

        assert_eq!(
            settlement,
            Settlement::Minted {
                transaction_hash: "0xfeed".to_string(),
                token_id: None,
            }
        );
    }
}
