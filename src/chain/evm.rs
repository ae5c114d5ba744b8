//! EVM chain client.
//!
//! One implementation covers every EVM-compatible chain, parameterized by the
//! configured hub, forwarder, and PAN token addresses. Transactions go
//! through the [`TransactionSubmitter`](crate::submission::TransactionSubmitter),
//! which resubmits with increasing fees until inclusion; blockchain account
//! nonces come from the store's nonce allocator so they stay consistent
//! across retries and concurrent workers.

use alloy_network::EthereumWallet;
use alloy_primitives::{Address, B256, Bytes, U256};
use alloy_provider::fillers::{ChainIdFiller, FillProvider, JoinFill, WalletFiller};
use alloy_provider::{Identity, Provider, ProviderBuilder, RootProvider};
use alloy_rpc_client::ClientBuilder;
use alloy_signer::Signer;
use alloy_signer_local::PrivateKeySigner;
use alloy_sol_types::{SolCall, sol};
use alloy_transport::layers::FallbackService;
use alloy_transport_http::Http;
use async_trait::async_trait;
use std::num::NonZeroUsize;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use super::{
    Blockchain, ChainClient, ChainClientError, TransferFromSubmissionStart, TransferSubmissionStart,
    TransferSubmissionStatus,
};
use crate::amount::Amount;
use crate::config::BlockchainConfig;
use crate::store::TransferStore;
use crate::submission::{
    FeeSchedule, ResubmissionPolicy, SubmissionError, SubmissionRequest, SubmissionState,
    TransactionSubmitter,
};

sol! {
    /// Hub contract surface used by the service node.
    #[sol(rpc)]
    contract PantosHub {
        struct TransferRequest {
            address sender;
            address recipient;
            address token;
            uint256 amount;
            address serviceNode;
            uint256 fee;
            uint256 nonce;
            uint256 validUntil;
        }

        struct TransferFromRequest {
            uint256 destinationBlockchainId;
            address sender;
            string recipient;
            address sourceToken;
            string destinationToken;
            uint256 amount;
            address serviceNode;
            uint256 fee;
            uint256 nonce;
            uint256 validUntil;
        }

        struct ServiceNodeRecord {
            bool active;
            string url;
            uint256 deposit;
            address withdrawalAddress;
            uint256 unregisterTime;
        }

        function getServiceNodeRecord(address serviceNode) external view returns (ServiceNodeRecord memory);
        function isServiceNodeInTheUnbondingPeriod(address serviceNode) external view returns (bool);
        function getCurrentMinimumServiceNodeDeposit() external view returns (uint256);
        function getCurrentValidatorFeeFactor(uint256 blockchainId) external view returns (uint256);
        function registerServiceNode(address serviceNode, string calldata url, uint256 deposit, address withdrawalAddress) external;
        function unregisterServiceNode(address serviceNode) external;
        function cancelServiceNodeUnregistration(address serviceNode) external;
        function updateServiceNodeUrl(string calldata url) external;
        function verifyTransfer(TransferRequest calldata request, bytes calldata signature) external view;
        function verifyTransferFrom(TransferFromRequest calldata request, bytes calldata signature) external view;
        function transfer(TransferRequest calldata request, bytes calldata signature) external returns (uint256);
        function transferFrom(TransferFromRequest calldata request, bytes calldata signature) external returns (uint256);

        event TransferSucceeded(uint256 transferId, TransferRequest request, bytes signature);
        event TransferFromSucceeded(uint256 sourceTransferId, TransferFromRequest request, bytes signature);
    }

    /// PAN token surface used by the service node.
    #[sol(rpc)]
    contract PanToken {
        function approve(address spender, uint256 amount) external returns (bool);
        function balanceOf(address account) external view returns (uint256);
    }
}

const HUB_REGISTER_SERVICE_NODE_GAS: u64 = 300_000;
const HUB_TRANSFER_GAS: u64 = 200_000;
const HUB_TRANSFER_FROM_GAS: u64 = 250_000;
const HUB_UNREGISTER_SERVICE_NODE_GAS: u64 = 250_000;
const HUB_CANCEL_UNREGISTRATION_GAS: u64 = 250_000;
const HUB_UPDATE_SERVICE_NODE_URL_GAS: u64 = 250_000;
const TOKEN_APPROVE_GAS: u64 = 100_000;

const INSUFFICIENT_BALANCE_REVERT: &str = "insufficient balance of sender";
const INVALID_SIGNATURE_REVERT: &str = "invalid signature";

/// The composed provider type: chain-ID filler plus wallet signing over a
/// fallback HTTP transport.
pub type EvmProvider = FillProvider<
    JoinFill<JoinFill<Identity, ChainIdFiller>, WalletFiller<EthereumWallet>>,
    RootProvider,
>;

/// Classifies a preflight revert by its reason string.
fn classify_preflight_error(message: &str) -> ChainClientError {
    if message.contains(INSUFFICIENT_BALANCE_REVERT) {
        ChainClientError::InsufficientBalance
    } else if message.contains(INVALID_SIGNATURE_REVERT) {
        ChainClientError::InvalidSignature
    } else {
        ChainClientError::Other(message.to_string())
    }
}

fn parse_address(address: &str) -> Result<Address, ChainClientError> {
    Address::from_str(address)
        .map_err(|_| ChainClientError::Other(format!("invalid address: {address}")))
}

fn parse_signature(signature: &str) -> Result<Bytes, ChainClientError> {
    Bytes::from_str(signature)
        .map_err(|_| ChainClientError::Other("invalid transfer signature encoding".to_string()))
}

pub struct EvmChainClient {
    blockchain: Blockchain,
    /// The service node's own account.
    address: Address,
    hub_address: Address,
    pan_token_address: Address,
    provider: EvmProvider,
    submitter: TransactionSubmitter<EvmProvider>,
    store: Arc<dyn TransferStore>,
    provider_timeout: Duration,
}

impl EvmChainClient {
    pub async fn from_config(
        blockchain: Blockchain,
        config: &BlockchainConfig,
        store: Arc<dyn TransferStore>,
    ) -> Result<Self, ChainClientError> {
        let signer = Self::load_signer(config)?
            .with_chain_id(config.chain_id);
        let address = signer.address();
        let wallet = EthereumWallet::from(signer);

        let provider_urls = config
            .provider
            .iter()
            .chain(config.fallback_providers.iter());
        let transports: Vec<_> = provider_urls
            .map(|url| Http::new(url.clone()))
            .collect();
        let transport_count = NonZeroUsize::new(transports.len()).ok_or_else(|| {
            ChainClientError::Other(format!("no provider configured for {blockchain}"))
        })?;
        let fallback_transport = FallbackService::new(transports, transport_count.get());
        let client = ClientBuilder::default().transport(fallback_transport, false);
        let provider: EvmProvider = ProviderBuilder::default()
            .filler(ChainIdFiller::default())
            .wallet(wallet)
            .connect_client(client);

        let submitter = TransactionSubmitter::new(
            provider.clone(),
            address,
            FeeSchedule {
                min_adaptable_fee_per_gas: config.min_adaptable_fee_per_gas,
                max_total_fee_per_gas: config.fee_cap(),
                increase_factor: config.adaptable_fee_increase_factor,
            },
            ResubmissionPolicy {
                blocks_until_resubmission: config.blocks_until_resubmission,
                average_block_time: config.average_block_time,
                confirmations: config.confirmations,
            },
        );

        let hub_address = parse_address(
            config
                .hub
                .as_deref()
                .ok_or_else(|| ChainClientError::Other("hub address missing".to_string()))?,
        )?;
        let pan_token_address = parse_address(
            config
                .pan_token
                .as_deref()
                .ok_or_else(|| ChainClientError::Other("pan_token address missing".to_string()))?,
        )?;

        tracing::info!(%blockchain, %address, %hub_address, "initialized EVM chain client");
        Ok(Self {
            blockchain,
            address,
            hub_address,
            pan_token_address,
            provider,
            submitter,
            store,
            provider_timeout: Duration::from_secs(config.provider_timeout),
        })
    }

    /// The configured private key is either a raw hex key or a path to an
    /// encrypted keystore file.
    fn load_signer(config: &BlockchainConfig) -> Result<PrivateKeySigner, ChainClientError> {
        let private_key = config
            .private_key
            .as_ref()
            .ok_or_else(|| ChainClientError::Other("private_key missing".to_string()))?;
        if let Ok(raw) = B256::from_str(private_key.inner()) {
            return PrivateKeySigner::from_bytes(&raw)
                .map_err(|e| ChainClientError::Other(format!("invalid private key: {e}")));
        }
        let password = config
            .private_key_password
            .as_ref()
            .map(|p| p.inner().clone())
            .unwrap_or_default();
        PrivateKeySigner::decrypt_keystore(private_key.inner(), password)
            .map_err(|e| ChainClientError::Other(format!("unable to decrypt keystore: {e}")))
    }

    pub fn address(&self) -> Address {
        self.address
    }

    fn hub(&self) -> PantosHub::PantosHubInstance<&EvmProvider> {
        PantosHub::new(self.hub_address, &self.provider)
    }

    fn pan_token(&self) -> PanToken::PanTokenInstance<&EvmProvider> {
        PanToken::new(self.pan_token_address, &self.provider)
    }

    async fn timed<F, T, E>(&self, future: F) -> Result<T, ChainClientError>
    where
        F: IntoFuture<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        tokio::time::timeout(self.provider_timeout, future)
            .await
            .map_err(|_| ChainClientError::Other("provider timeout".to_string()))?
            .map_err(|e| ChainClientError::Other(e.to_string()))
    }

    async fn service_node_record(&self) -> Result<PantosHub::ServiceNodeRecord, ChainClientError> {
        self.timed(self.hub().getServiceNodeRecord(self.address).call())
            .await
    }

    async fn account_nonce(&self) -> Result<u64, ChainClientError> {
        self.timed(self.provider.get_transaction_count(self.address))
            .await
    }

    /// Allocates the blockchain nonce for a transfer, reusing abandoned
    /// nonces before minting a fresh one.
    async fn transfer_nonce(&self, internal_transfer_id: i64) -> Result<u64, ChainClientError> {
        let transaction_count = self.account_nonce().await?;
        self.store
            .assign_transfer_nonce(internal_transfer_id, self.blockchain, transaction_count as i64)
            .await?;
        let nonce = self
            .store
            .read_transfer_nonce(internal_transfer_id)
            .await?
            .ok_or_else(|| {
                ChainClientError::Other(format!(
                    "no nonce assigned to transfer {internal_transfer_id}"
                ))
            })?;
        Ok(nonce as u64)
    }

    /// Preflights, allocates a nonce, and hands the encoded hub call to the
    /// submitter. A nonce or fee-pricing rejection clears the stored nonce
    /// before bubbling so the next cycle reallocates.
    async fn submit_hub_call(
        &self,
        internal_transfer_id: i64,
        calldata: Bytes,
        gas_limit: u64,
    ) -> Result<Uuid, ChainClientError> {
        let nonce = self.transfer_nonce(internal_transfer_id).await?;
        let result = self
            .submitter
            .start(SubmissionRequest {
                to: self.hub_address,
                calldata,
                gas_limit,
                nonce,
            })
            .await;
        match result {
            Ok(handle) => Ok(handle),
            Err(e @ (SubmissionError::NonceTooLow | SubmissionError::Underpriced)) => {
                self.store
                    .reset_transfer_nonce(internal_transfer_id)
                    .await?;
                Err(match e {
                    SubmissionError::NonceTooLow => ChainClientError::NonceTooLow,
                    _ => ChainClientError::Underpriced,
                })
            }
            Err(SubmissionError::MaxTotalFeePerGasExceeded {
                max_total_fee_per_gas,
            }) => Err(ChainClientError::MaxTotalFeePerGasExceeded {
                max_total_fee_per_gas,
            }),
            Err(SubmissionError::Rpc(message)) => Err(ChainClientError::Other(message)),
        }
    }

    /// Reads the hub-assigned transfer ID from the receipt's event logs,
    /// skipping logs that do not decode to the expected event.
    async fn read_on_chain_transfer_id(
        &self,
        transaction_hash: &str,
        destination_blockchain: Blockchain,
    ) -> Result<Amount, ChainClientError> {
        let hash = B256::from_str(transaction_hash).map_err(|_| {
            ChainClientError::Other(format!("invalid transaction hash: {transaction_hash}"))
        })?;
        let receipt = self
            .timed(self.provider.get_transaction_receipt(hash))
            .await?
            .ok_or_else(|| {
                ChainClientError::Other(format!("no receipt for transaction {transaction_hash}"))
            })?;
        let hub_logs = receipt
            .logs()
            .iter()
            .filter(|log| log.address() == self.hub_address);
        let transfer_id = if self.blockchain == destination_blockchain {
            hub_logs
                .filter_map(|log| log.log_decode::<PantosHub::TransferSucceeded>().ok())
                .map(|log| log.inner.data.transferId)
                .next()
        } else {
            hub_logs
                .filter_map(|log| log.log_decode::<PantosHub::TransferFromSucceeded>().ok())
                .map(|log| log.inner.data.sourceTransferId)
                .next()
        };
        transfer_id.map(Amount::from).ok_or_else(|| {
            ChainClientError::Other(format!(
                "no transfer event in receipt of transaction {transaction_hash}"
            ))
        })
    }
}

#[async_trait]
impl ChainClient for EvmChainClient {
    fn blockchain(&self) -> Blockchain {
        self.blockchain
    }

    fn is_valid_address(&self, address: &str) -> bool {
        Address::from_str(address).is_ok()
    }

    fn is_valid_recipient_address(&self, address: &str) -> bool {
        match Address::from_str(address) {
            Ok(parsed) => parsed != Address::ZERO,
            Err(_) => false,
        }
    }

    async fn is_node_registered(&self) -> Result<bool, ChainClientError> {
        Ok(self.service_node_record().await?.active)
    }

    async fn read_node_url(&self) -> Result<String, ChainClientError> {
        Ok(self.service_node_record().await?.url)
    }

    async fn read_minimum_deposit(&self) -> Result<Amount, ChainClientError> {
        let minimum = self
            .timed(self.hub().getCurrentMinimumServiceNodeDeposit().call())
            .await?;
        Ok(Amount::from(minimum))
    }

    async fn read_own_token_balance(&self) -> Result<Amount, ChainClientError> {
        let balance = self
            .timed(self.pan_token().balanceOf(self.address).call())
            .await?;
        Ok(Amount::from(balance))
    }

    async fn register_node(
        &self,
        node_url: &str,
        node_deposit: Amount,
        withdrawal_address: &str,
    ) -> Result<(), ChainClientError> {
        let withdrawal_address = parse_address(withdrawal_address)?;
        let mut nonce = self.account_nonce().await?;
        if !node_deposit.is_zero() {
            let approve = PanToken::approveCall {
                spender: self.hub_address,
                amount: node_deposit.into(),
            };
            let handle = self
                .submitter
                .start(SubmissionRequest {
                    to: self.pan_token_address,
                    calldata: approve.abi_encode().into(),
                    gas_limit: TOKEN_APPROVE_GAS,
                    nonce,
                })
                .await
                .map_err(|e| ChainClientError::Other(e.to_string()))?;
            tracing::info!(blockchain = %self.blockchain, %handle, "node deposit allowance submitted");
            nonce += 1;
        }
        let register = PantosHub::registerServiceNodeCall {
            serviceNode: self.address,
            url: node_url.to_string(),
            deposit: node_deposit.into(),
            withdrawalAddress: withdrawal_address,
        };
        let handle = self
            .submitter
            .start(SubmissionRequest {
                to: self.hub_address,
                calldata: register.abi_encode().into(),
                gas_limit: HUB_REGISTER_SERVICE_NODE_GAS,
                nonce,
            })
            .await
            .map_err(|e| ChainClientError::Other(e.to_string()))?;
        tracing::info!(
            blockchain = %self.blockchain,
            %handle,
            node_url,
            deposit = %node_deposit,
            "node registration submitted"
        );
        Ok(())
    }

    async fn unregister_node(&self) -> Result<(), ChainClientError> {
        let nonce = self.account_nonce().await?;
        let call = PantosHub::unregisterServiceNodeCall {
            serviceNode: self.address,
        };
        let handle = self
            .submitter
            .start(SubmissionRequest {
                to: self.hub_address,
                calldata: call.abi_encode().into(),
                gas_limit: HUB_UNREGISTER_SERVICE_NODE_GAS,
                nonce,
            })
            .await
            .map_err(|e| ChainClientError::Other(e.to_string()))?;
        tracing::info!(blockchain = %self.blockchain, %handle, "node unregistration submitted");
        Ok(())
    }

    async fn is_unbonding(&self) -> Result<bool, ChainClientError> {
        self.timed(
            self.hub()
                .isServiceNodeInTheUnbondingPeriod(self.address)
                .call(),
        )
        .await
    }

    async fn cancel_unregistration(&self) -> Result<(), ChainClientError> {
        let nonce = self.account_nonce().await?;
        let call = PantosHub::cancelServiceNodeUnregistrationCall {
            serviceNode: self.address,
        };
        let handle = self
            .submitter
            .start(SubmissionRequest {
                to: self.hub_address,
                calldata: call.abi_encode().into(),
                gas_limit: HUB_CANCEL_UNREGISTRATION_GAS,
                nonce,
            })
            .await
            .map_err(|e| ChainClientError::Other(e.to_string()))?;
        tracing::info!(blockchain = %self.blockchain, %handle, "node unregistration cancellation submitted");
        Ok(())
    }

    async fn update_node_url(&self, node_url: &str) -> Result<(), ChainClientError> {
        let nonce = self.account_nonce().await?;
        let call = PantosHub::updateServiceNodeUrlCall {
            url: node_url.to_string(),
        };
        let handle = self
            .submitter
            .start(SubmissionRequest {
                to: self.hub_address,
                calldata: call.abi_encode().into(),
                gas_limit: HUB_UPDATE_SERVICE_NODE_URL_GAS,
                nonce,
            })
            .await
            .map_err(|e| ChainClientError::Other(e.to_string()))?;
        tracing::info!(blockchain = %self.blockchain, %handle, node_url, "node URL update submitted");
        Ok(())
    }

    async fn get_validator_fee_factor(
        &self,
        blockchain: Blockchain,
    ) -> Result<u64, ChainClientError> {
        let factor = self
            .timed(
                self.hub()
                    .getCurrentValidatorFeeFactor(U256::from(blockchain.id()))
                    .call(),
            )
            .await?;
        u64::try_from(factor)
            .map_err(|_| ChainClientError::Other("validator fee factor out of range".to_string()))
    }

    async fn start_transfer_submission(
        &self,
        request: TransferSubmissionStart,
    ) -> Result<Uuid, ChainClientError> {
        let on_chain_request = PantosHub::TransferRequest {
            sender: parse_address(&request.sender_address)?,
            recipient: parse_address(&request.recipient_address)?,
            token: parse_address(&request.token_address)?,
            amount: request.amount.into(),
            serviceNode: self.address,
            fee: request.fee.into(),
            nonce: request.sender_nonce.into(),
            validUntil: U256::from(request.valid_until),
        };
        let signature = parse_signature(&request.signature)?;

        let preflight = tokio::time::timeout(
            self.provider_timeout,
            self.hub()
                .verifyTransfer(on_chain_request.clone(), signature.clone())
                .call(),
        )
        .await
        .map_err(|_| ChainClientError::Other("provider timeout".to_string()))?;
        if let Err(e) = preflight {
            return Err(classify_preflight_error(&e.to_string()));
        }

        let call = PantosHub::transferCall {
            request: on_chain_request,
            signature,
        };
        self.submit_hub_call(
            request.internal_transfer_id,
            call.abi_encode().into(),
            HUB_TRANSFER_GAS,
        )
        .await
    }

    async fn start_transfer_from_submission(
        &self,
        request: TransferFromSubmissionStart,
    ) -> Result<Uuid, ChainClientError> {
        let on_chain_request = PantosHub::TransferFromRequest {
            destinationBlockchainId: U256::from(request.destination_blockchain.id()),
            sender: parse_address(&request.sender_address)?,
            recipient: request.recipient_address.clone(),
            sourceToken: parse_address(&request.source_token_address)?,
            destinationToken: request.destination_token_address.clone(),
            amount: request.amount.into(),
            serviceNode: self.address,
            fee: request.fee.into(),
            nonce: request.sender_nonce.into(),
            validUntil: U256::from(request.valid_until),
        };
        let signature = parse_signature(&request.signature)?;

        let preflight = tokio::time::timeout(
            self.provider_timeout,
            self.hub()
                .verifyTransferFrom(on_chain_request.clone(), signature.clone())
                .call(),
        )
        .await
        .map_err(|_| ChainClientError::Other("provider timeout".to_string()))?;
        if let Err(e) = preflight {
            return Err(classify_preflight_error(&e.to_string()));
        }

        let call = PantosHub::transferFromCall {
            request: on_chain_request,
            signature,
        };
        self.submit_hub_call(
            request.internal_transfer_id,
            call.abi_encode().into(),
            HUB_TRANSFER_FROM_GAS,
        )
        .await
    }

    async fn get_transfer_submission_status(
        &self,
        internal_transaction_id: Uuid,
        destination_blockchain: Blockchain,
    ) -> Result<TransferSubmissionStatus, ChainClientError> {
        let state = self
            .submitter
            .state(internal_transaction_id)
            .ok_or_else(|| {
                ChainClientError::UnresolvableSubmission(format!(
                    "unknown submission handle {internal_transaction_id}"
                ))
            })?;
        match state {
            SubmissionState::Pending => Ok(TransferSubmissionStatus::pending()),
            SubmissionState::Failed { reason } => {
                Err(ChainClientError::UnresolvableSubmission(reason))
            }
            SubmissionState::Completed {
                status,
                transaction_hash,
            } => {
                let on_chain_transfer_id = match status {
                    super::TransactionStatus::Confirmed => Some(
                        self.read_on_chain_transfer_id(&transaction_hash, destination_blockchain)
                            .await?,
                    ),
                    super::TransactionStatus::Reverted => None,
                };
                Ok(TransferSubmissionStatus {
                    completed: true,
                    status: Some(status),
                    transaction_id: Some(transaction_hash),
                    on_chain_transfer_id,
                })
            }
        }
    }

    async fn is_node_healthy(&self) -> bool {
        tokio::time::timeout(self.provider_timeout, self.provider.get_block_number())
            .await
            .map(|r| r.is_ok())
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::LogData;
    use alloy_sol_types::SolEvent;

    #[test]
    fn preflight_reverts_are_classified_by_reason() {
        assert!(matches!(
            classify_preflight_error(
                "execution reverted: PantosHub: insufficient balance of sender"
            ),
            ChainClientError::InsufficientBalance
        ));
        assert!(matches!(
            classify_preflight_error("execution reverted: PantosForwarder: invalid signature"),
            ChainClientError::InvalidSignature
        ));
        assert!(matches!(
            classify_preflight_error("execution reverted: PantosHub: transfer paused"),
            ChainClientError::Other(_)
        ));
    }

    #[test]
    fn address_parsing_accepts_hex_and_rejects_garbage() {
        assert!(parse_address("0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266").is_ok());
        assert!(parse_address("not-an-address").is_err());
        assert!(parse_address("0x1234").is_err());
    }

    #[test]
    fn signature_parsing_requires_hex_bytes() {
        assert!(parse_signature("0xdeadbeef").is_ok());
        assert!(parse_signature("zz").is_err());
    }

    fn transfer_request() -> PantosHub::TransferRequest {
        PantosHub::TransferRequest {
            sender: Address::repeat_byte(0x11),
            recipient: Address::repeat_byte(0x22),
            token: Address::repeat_byte(0x33),
            amount: U256::from(5),
            serviceNode: Address::repeat_byte(0x44),
            fee: U256::from(500_000),
            nonce: U256::from(22_222),
            validUntil: U256::from(1_700_000_000u64),
        }
    }

    #[test]
    fn transfer_succeeded_event_round_trips_through_log_data() {
        let event = PantosHub::TransferSucceeded {
            transferId: U256::from(77),
            request: transfer_request(),
            signature: Bytes::from(vec![1, 2, 3]),
        };
        let log_data: LogData = event.encode_log_data();
        let decoded = PantosHub::TransferSucceeded::decode_log_data(&log_data).unwrap();
        assert_eq!(decoded.transferId, U256::from(77));
    }

    #[test]
    fn transfer_from_succeeded_event_carries_the_source_transfer_id() {
        let event = PantosHub::TransferFromSucceeded {
            sourceTransferId: U256::from(99),
            request: PantosHub::TransferFromRequest {
                destinationBlockchainId: U256::from(Blockchain::BnbChain.id()),
                sender: Address::repeat_byte(0x11),
                recipient: "0x2222222222222222222222222222222222222222".to_string(),
                sourceToken: Address::repeat_byte(0x33),
                destinationToken: "0x4444444444444444444444444444444444444444".to_string(),
                amount: U256::from(5),
                serviceNode: Address::repeat_byte(0x55),
                fee: U256::from(500_000),
                nonce: U256::from(22_222),
                validUntil: U256::from(1_700_000_000u64),
            },
            signature: Bytes::from(vec![1, 2, 3]),
        };
        let log_data: LogData = event.encode_log_data();
        let decoded = PantosHub::TransferFromSucceeded::decode_log_data(&log_data).unwrap();
        assert_eq!(decoded.sourceTransferId, U256::from(99));
        // The two event shapes must not decode into each other.
        assert!(PantosHub::TransferSucceeded::decode_log_data(&log_data).is_err());
    }
}
