//! Carbon-credit ledger: the on-chain seam.
//!
//! `CreditLedger` abstracts the contract so handlers and the pipeline can be
//! exercised against a mock; `EvmLedger` is the real implementation.

pub mod client;

pub use client::EvmLedger;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

/// The all-zero address is treated as "no wallet".
pub const ZERO_ADDRESS: &str = "0x0000000000000000000000000000000000000000";

#[derive(Error, Debug)]
pub enum ChainError {
    #[error("PRIVATE_KEY not set in environment")]
    SignerMissing,
    #[error("Invalid Ethereum address: {0}")]
    InvalidAddress(String),
    #[error("Invalid RPC URL: {0}")]
    InvalidUrl(String),
    #[error("Invalid signing key: {0}")]
    InvalidKey(String),
    #[error("Transaction {tx_hash} failed on chain")]
    Reverted { tx_hash: String },
    #[error("Token {token_id} is not owned by {expected_owner}")]
    NotOwner {
        token_id: u64,
        expected_owner: String,
    },
    #[error("Operator {operator} is not approved to transfer token {token_id}")]
    NotApproved { token_id: u64, operator: String },
    #[error("Contract call failed: {0}")]
    Contract(#[from] alloy::contract::Error),
    #[error("RPC error: {0}")]
    Rpc(#[from] alloy::transports::RpcError<alloy::transports::TransportErrorKind>),
    #[error("Receipt wait failed: {0}")]
    Receipt(#[from] alloy::providers::PendingTransactionError),
}

/// Outcome of a successful mint transaction.
#[derive(Debug, Clone, Serialize)]
pub struct MintReceipt {
    /// Absent when the receipt carried no parseable CreditMinted event; the
    /// mint itself still succeeded.
    pub token_id: Option<u64>,
    pub transaction_hash: String,
    pub co2_grams: u64,
    pub block_number: Option<u64>,
    pub gas_used: u64,
}

/// Outcome of a successful transfer transaction.
#[derive(Debug, Clone, Serialize)]
pub struct TransferReceipt {
    pub transaction_hash: String,
    pub block_number: Option<u64>,
    pub gas_used: u64,
}

/// One minted credit as read back from the contract.
#[derive(Debug, Clone, Serialize)]
pub struct CreditDetail {
    pub token_id: u64,
    pub co2_amount_grams: u64,
    pub co2_amount_kg: f64,
    pub timestamp: u64,
    pub activity_type: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ApprovalStatus {
    pub approved: bool,
    pub backend_address: Option<String>,
    pub is_approved_for_all: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConnectionStatus {
    pub connected: bool,
    pub chain_id: Option<u64>,
    pub contract_address: String,
    pub latest_block: Option<u64>,
}

/// Contract amounts are integer grams; API amounts are float kilograms.
pub fn kg_to_grams(kg: f64) -> u64 {
    (kg * 1000.0).round().max(0.0) as u64
}

pub fn grams_to_kg(grams: u64) -> f64 {
    grams as f64 / 1000.0
}

#[async_trait]
pub trait CreditLedger: Send + Sync {
    /// Mint a carbon-credit NFT recording `emission_kg` (stored on chain in
    /// grams) for `wallet`.
    async fn mint(
        &self,
        wallet: &str,
        emission_kg: f64,
        activity_type: &str,
    ) -> Result<MintReceipt, ChainError>;

    /// Transfer a token from `from` to `to` via the backend operator key.
    /// Fails without sending when the owner or approval checks do not hold.
    async fn transfer(
        &self,
        from: &str,
        to: &str,
        token_id: u64,
    ) -> Result<TransferReceipt, ChainError>;

    async fn balance_of(&self, wallet: &str) -> Result<u64, ChainError>;

    /// All credits for a wallet: token-id listing followed by one detail
    /// call per token.
    async fn credits_of(&self, wallet: &str) -> Result<Vec<CreditDetail>, ChainError>;

    async fn approval_status(
        &self,
        owner: &str,
        token_id: u64,
    ) -> Result<ApprovalStatus, ChainError>;

    /// Best-effort connection probe; fields are null when unreachable.
    async fn connection_status(&self) -> ConnectionStatus;

    /// Address of the backend signing key, when configured.
    fn operator_address(&self) -> Option<String>;

    fn contract_address(&self) -> String;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kg_to_grams() {
        assert_eq!(kg_to_grams(1.2), 1200);
        assert_eq!(kg_to_grams(0.0), 0);
        assert_eq!(kg_to_grams(0.0004), 0);
        assert_eq!(kg_to_grams(0.0006), 1);
        assert_eq!(kg_to_grams(-3.0), 0);
    }

    #[test]
    fn test_kg_grams_round_trip_within_one_gram() {
        for kg in [0.001, 0.38, 1.2, 4.25, 60.0, 123.456] {
            let back = grams_to_kg(kg_to_grams(kg));
            assert!(
                (back - kg).abs() <= 0.001,
                "round trip drifted more than 1g: {} -> {}",
                kg,
                back
            );
        }
    }
}
