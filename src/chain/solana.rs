//! Placeholder Solana client.
//!
//! Solana support is not implemented. The client conforms to the chain
//! interface so the rest of the system can treat the chain uniformly:
//! address syntax is checked, the node reports itself as unregistered, and
//! every transacting operation returns a typed `Unsupported` error.

use async_trait::async_trait;
use uuid::Uuid;

use super::{
    Blockchain, ChainClient, ChainClientError, TransferFromSubmissionStart, TransferSubmissionStart,
    TransferSubmissionStatus,
};
use crate::amount::Amount;

#[derive(Debug, Default)]
pub struct SolanaChainClient;

impl SolanaChainClient {
    pub fn new() -> Self {
        Self
    }

    fn unsupported<T>(&self) -> Result<T, ChainClientError> {
        Err(ChainClientError::Unsupported(Blockchain::Solana))
    }
}

#[async_trait]
impl ChainClient for SolanaChainClient {
    fn blockchain(&self) -> Blockchain {
        Blockchain::Solana
    }

    fn is_valid_address(&self, address: &str) -> bool {
        // 32 bytes, base58.
        bs58::decode(address)
            .into_vec()
            .map(|bytes| bytes.len() == 32)
            .unwrap_or(false)
    }

    fn is_valid_recipient_address(&self, address: &str) -> bool {
        self.is_valid_address(address)
            && bs58::decode(address)
                .into_vec()
                .map(|bytes| bytes.iter().any(|b| *b != 0))
                .unwrap_or(false)
    }

    async fn is_node_registered(&self) -> Result<bool, ChainClientError> {
        Ok(false)
    }

    async fn read_node_url(&self) -> Result<String, ChainClientError> {
        self.unsupported()
    }

    async fn read_minimum_deposit(&self) -> Result<Amount, ChainClientError> {
        self.unsupported()
    }

    async fn read_own_token_balance(&self) -> Result<Amount, ChainClientError> {
        self.unsupported()
    }

    async fn register_node(
        &self,
        _node_url: &str,
        _node_deposit: Amount,
        _withdrawal_address: &str,
    ) -> Result<(), ChainClientError> {
        self.unsupported()
    }

    async fn unregister_node(&self) -> Result<(), ChainClientError> {
        self.unsupported()
    }

    async fn is_unbonding(&self) -> Result<bool, ChainClientError> {
        self.unsupported()
    }

    async fn cancel_unregistration(&self) -> Result<(), ChainClientError> {
        self.unsupported()
    }

    async fn update_node_url(&self, _node_url: &str) -> Result<(), ChainClientError> {
        self.unsupported()
    }

    async fn get_validator_fee_factor(
        &self,
        _blockchain: Blockchain,
    ) -> Result<u64, ChainClientError> {
        self.unsupported()
    }

    async fn start_transfer_submission(
        &self,
        _request: TransferSubmissionStart,
    ) -> Result<Uuid, ChainClientError> {
        self.unsupported()
    }

    async fn start_transfer_from_submission(
        &self,
        _request: TransferFromSubmissionStart,
    ) -> Result<Uuid, ChainClientError> {
        self.unsupported()
    }

    async fn get_transfer_submission_status(
        &self,
        _internal_transaction_id: Uuid,
        _destination_blockchain: Blockchain,
    ) -> Result<TransferSubmissionStatus, ChainClientError> {
        self.unsupported()
    }

    async fn is_node_healthy(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validates_base58_addresses() {
        let client = SolanaChainClient::new();
        assert!(client.is_valid_address("4zMMC9srt5Ri5X14GAgXhaHii3GnPAEERYPJgZ5nc4pb"));
        assert!(!client.is_valid_address("0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266"));
        assert!(!client.is_valid_address("tooshort"));
    }

    #[test]
    fn rejects_the_all_zero_recipient() {
        let client = SolanaChainClient::new();
        let zero = bs58::encode([0u8; 32]).into_string();
        assert!(client.is_valid_address(&zero));
        assert!(!client.is_valid_recipient_address(&zero));
    }

    #[tokio::test]
    async fn reports_itself_unregistered() {
        let client = SolanaChainClient::new();
        assert!(!client.is_node_registered().await.unwrap());
    }

    #[tokio::test]
    async fn transacting_operations_are_unsupported() {
        let client = SolanaChainClient::new();
        assert!(matches!(
            client.unregister_node().await,
            Err(ChainClientError::Unsupported(Blockchain::Solana))
        ));
    }
}
