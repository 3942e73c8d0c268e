use std::time::Duration;

use alloy::consensus::TxReceipt as _;
use alloy::network::EthereumWallet;
use alloy::primitives::{Address, U256};
use alloy::providers::{DynProvider, Provider, ProviderBuilder};
use alloy::signers::local::PrivateKeySigner;
use alloy::sol;
use async_trait::async_trait;

use crate::config::Config;

use super::{
    grams_to_kg, kg_to_grams, ApprovalStatus, ChainError, ConnectionStatus, CreditDetail,
    CreditLedger, MintReceipt, TransferReceipt,
};

const MINT_GAS_LIMIT: u64 = 300_000;
const TRANSFER_GAS_LIMIT: u64 = 200_000;
const RECEIPT_TIMEOUT: Duration = Duration::from_secs(120);

sol! {
    #[sol(rpc)]
    contract CarbonCredit {
        event CreditMinted(address indexed user, uint256 indexed tokenId, uint256 co2Amount, string activityType);

        function mintCredit(address user, uint256 co2Amount, string memory activityType) external returns (uint256);
        function getCredit(uint256 tokenId) external view returns (uint256 co2Amount, uint256 timestamp, string memory activityType);
        function getUserCredits(address user) external view returns (uint256[] memory);
        function balanceOf(address owner) external view returns (uint256);
        function ownerOf(uint256 tokenId) external view returns (address);
        function getApproved(uint256 tokenId) external view returns (address);
        function isApprovedForAll(address owner, address operator) external view returns (bool);
        function transferFrom(address from, address to, uint256 tokenId) external;
    }
}

/// Ethereum-backed implementation of [`CreditLedger`].
///
/// Constructed once at startup and injected through `AppState`. Without a
/// signing key the ledger is read-only: mint and transfer fail with
/// `ChainError::SignerMissing` before touching the network.
#[derive(Clone)]
pub struct EvmLedger {
    provider: DynProvider,
    contract_address: Address,
    signer: Option<PrivateKeySigner>,
}

fn parse_address(raw: &str) -> Result<Address, ChainError> {
    raw.parse::<Address>()
        .map_err(|_| ChainError::InvalidAddress(raw.to_string()))
}

impl EvmLedger {
    pub fn from_config(config: &Config) -> Result<Self, ChainError> {
        let contract_address = parse_address(&config.contract_address)?;

        let signer = match &config.private_key {
            Some(key) => Some(
                key.trim_start_matches("0x")
                    .parse::<PrivateKeySigner>()
                    .map_err(|e| ChainError::InvalidKey(e.to_string()))?,
            ),
            None => None,
        };

        let url = config
            .rpc_url
            .parse()
            .map_err(|_| ChainError::InvalidUrl(config.rpc_url.clone()))?;

        let provider = match &signer {
            Some(s) => ProviderBuilder::new()
                .wallet(EthereumWallet::from(s.clone()))
                .connect_http(url)
                .erased(),
            None => ProviderBuilder::new().connect_http(url).erased(),
        };

        Ok(EvmLedger {
            provider,
            contract_address,
            signer,
        })
    }

    fn contract(&self) -> CarbonCredit::CarbonCreditInstance<DynProvider> {
        CarbonCredit::new(self.contract_address, self.provider.clone())
    }
}

#[async_trait]
impl CreditLedger for EvmLedger {
    async fn mint(
        &self,
        wallet: &str,
        emission_kg: f64,
        activity_type: &str,
    ) -> Result<MintReceipt, ChainError> {
        let signer = self.signer.as_ref().ok_or(ChainError::SignerMissing)?;
        let user = parse_address(wallet)?;
        let co2_grams = kg_to_grams(emission_kg);

        tracing::info!(
            "Minting {}g CO2 credit to {} for {}",
            co2_grams,
            wallet,
            activity_type
        );

        let nonce = self
            .provider
            .get_transaction_count(signer.address())
            .await?;
        let gas_price = self.provider.get_gas_price().await?;
        let chain_id = self.provider.get_chain_id().await?;

        let pending = self
            .contract()
            .mintCredit(user, U256::from(co2_grams), activity_type.to_string())
            .nonce(nonce)
            .gas(MINT_GAS_LIMIT)
            .gas_price(gas_price)
            .chain_id(chain_id)
            .send()
            .await?;

        let receipt = pending
            .with_timeout(Some(RECEIPT_TIMEOUT))
            .get_receipt()
            .await?;

        let tx_hash = receipt.transaction_hash.to_string();
        if !receipt.status() {
            return Err(ChainError::Reverted { tx_hash });
        }

        // Token id comes from the CreditMinted event; a receipt without a
        // decodable event is still a successful mint.
        let token_id = receipt
            .inner
            .logs()
            .iter()
            .find_map(|log| log.log_decode::<CarbonCredit::CreditMinted>().ok())
            .and_then(|decoded| u64::try_from(decoded.inner.data.tokenId).ok());

        if token_id.is_none() {
            tracing::warn!("Could not extract token id from mint receipt {}", tx_hash);
        }

        tracing::info!("Successfully minted! TX: {}, Token ID: {:?}", tx_hash, token_id);

        Ok(MintReceipt {
            token_id,
            transaction_hash: tx_hash,
            co2_grams,
            block_number: receipt.block_number,
            gas_used: receipt.gas_used.try_into().unwrap_or(u64::MAX),
        })
    }

    async fn transfer(
        &self,
        from: &str,
        to: &str,
        token_id: u64,
    ) -> Result<TransferReceipt, ChainError> {
        let signer = self.signer.as_ref().ok_or(ChainError::SignerMissing)?;
        let from_addr = parse_address(from)?;
        let to_addr = parse_address(to)?;
        let operator = signer.address();
        let token = U256::from(token_id);
        let contract = self.contract();

        let owner = contract.ownerOf(token).call().await?;
        if owner != from_addr {
            return Err(ChainError::NotOwner {
                token_id,
                expected_owner: from.to_string(),
            });
        }

        let approved = contract.getApproved(token).call().await?;
        let approved_for_all = contract.isApprovedForAll(from_addr, operator).call().await?;
        if approved != operator && !approved_for_all {
            return Err(ChainError::NotApproved {
                token_id,
                operator: operator.to_string(),
            });
        }

        let nonce = self.provider.get_transaction_count(operator).await?;
        let gas_price = self.provider.get_gas_price().await?;
        let chain_id = self.provider.get_chain_id().await?;

        tracing::info!("Transferring token {} from {} to {}", token_id, from, to);

        let pending = contract
            .transferFrom(from_addr, to_addr, token)
            .nonce(nonce)
            .gas(TRANSFER_GAS_LIMIT)
            .gas_price(gas_price)
            .chain_id(chain_id)
            .send()
            .await?;

        let receipt = pending
            .with_timeout(Some(RECEIPT_TIMEOUT))
            .get_receipt()
            .await?;

        let tx_hash = receipt.transaction_hash.to_string();
        if !receipt.status() {
            return Err(ChainError::Reverted { tx_hash });
        }

        Ok(TransferReceipt {
            transaction_hash: tx_hash,
            block_number: receipt.block_number,
            gas_used: receipt.gas_used.try_into().unwrap_or(u64::MAX),
        })
    }

    async fn balance_of(&self, wallet: &str) -> Result<u64, ChainError> {
        let owner = parse_address(wallet)?;
        let balance = self.contract().balanceOf(owner).call().await?;
        Ok(u64::try_from(balance).unwrap_or(u64::MAX))
    }

    async fn credits_of(&self, wallet: &str) -> Result<Vec<CreditDetail>, ChainError> {
        let owner = parse_address(wallet)?;
        let contract = self.contract();

        let token_ids = contract.getUserCredits(owner).call().await?;

        let mut credits = Vec::with_capacity(token_ids.len());
        for token in token_ids {
            let detail = contract.getCredit(token).call().await?;
            let grams = u64::try_from(detail.co2Amount).unwrap_or(u64::MAX);
            credits.push(CreditDetail {
                token_id: u64::try_from(token).unwrap_or(u64::MAX),
                co2_amount_grams: grams,
                co2_amount_kg: grams_to_kg(grams),
                timestamp: u64::try_from(detail.timestamp).unwrap_or_default(),
                activity_type: detail.activityType,
            });
        }

        Ok(credits)
    }

    async fn approval_status(
        &self,
        owner: &str,
        token_id: u64,
    ) -> Result<ApprovalStatus, ChainError> {
        let owner_addr = parse_address(owner)?;

        let Some(signer) = self.signer.as_ref() else {
            return Ok(ApprovalStatus {
                approved: false,
                backend_address: None,
                is_approved_for_all: false,
            });
        };

        let operator = signer.address();
        let contract = self.contract();

        let approved_addr = contract.getApproved(U256::from(token_id)).call().await?;
        let for_all = contract.isApprovedForAll(owner_addr, operator).call().await?;

        Ok(ApprovalStatus {
            approved: approved_addr == operator || for_all,
            backend_address: Some(operator.to_string()),
            is_approved_for_all: for_all,
        })
    }

    async fn connection_status(&self) -> ConnectionStatus {
        match self.provider.get_chain_id().await {
            Ok(chain_id) => ConnectionStatus {
                connected: true,
                chain_id: Some(chain_id),
                contract_address: self.contract_address.to_string(),
                latest_block: self.provider.get_block_number().await.ok(),
            },
            Err(_) => ConnectionStatus {
                connected: false,
                chain_id: None,
                contract_address: self.contract_address.to_string(),
                latest_block: None,
            },
        }
    }

    fn operator_address(&self) -> Option<String> {
        self.signer.as_ref().map(|s| s.address().to_string())
    }

    fn contract_address(&self) -> String {
        self.contract_address.to_string()
    }
}
