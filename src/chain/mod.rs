//! Chain support for the service node.
//!
//! The service node talks to every supported blockchain through the
//! [`ChainClient`] trait. EVM-compatible chains share one implementation
//! parameterized by contract addresses and fee configuration
//! ([`evm::EvmChainClient`]); Solana is a placeholder variant that conforms
//! to the interface without transacting.

pub mod evm;
#[cfg(feature = "test-utils")]
pub mod mock;
pub mod solana;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt::{self, Display, Formatter};
use std::sync::Arc;
use uuid::Uuid;

use crate::amount::Amount;

/// A blockchain supported by the service node.
///
/// Discriminants are stable protocol identifiers: they appear in the HTTP
/// API, the database, and on-chain cross-chain requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(i32)]
pub enum Blockchain {
    Ethereum = 0,
    BnbChain = 1,
    Avalanche = 2,
    Celo = 3,
    Cronos = 4,
    Fantom = 5,
    Polygon = 6,
    Solana = 7,
    Sonic = 8,
}

impl Blockchain {
    pub const ALL: [Blockchain; 9] = [
        Blockchain::Ethereum,
        Blockchain::BnbChain,
        Blockchain::Avalanche,
        Blockchain::Celo,
        Blockchain::Cronos,
        Blockchain::Fantom,
        Blockchain::Polygon,
        Blockchain::Solana,
        Blockchain::Sonic,
    ];

    pub fn id(&self) -> i32 {
        *self as i32
    }

    pub fn from_id(id: i32) -> Option<Blockchain> {
        Blockchain::ALL.into_iter().find(|b| b.id() == id)
    }

    /// Protocol-level chain name, e.g. `BNB_CHAIN`.
    pub fn name(&self) -> &'static str {
        match self {
            Blockchain::Ethereum => "ETHEREUM",
            Blockchain::BnbChain => "BNB_CHAIN",
            Blockchain::Avalanche => "AVALANCHE",
            Blockchain::Celo => "CELO",
            Blockchain::Cronos => "CRONOS",
            Blockchain::Fantom => "FANTOM",
            Blockchain::Polygon => "POLYGON",
            Blockchain::Solana => "SOLANA",
            Blockchain::Sonic => "SONIC",
        }
    }

    /// Configuration key, e.g. `bnb_chain`.
    pub fn config_name(&self) -> String {
        self.name().to_lowercase()
    }

    pub fn from_config_name(name: &str) -> Option<Blockchain> {
        Blockchain::ALL
            .into_iter()
            .find(|b| b.config_name() == name)
    }

    pub fn is_evm(&self) -> bool {
        !matches!(self, Blockchain::Solana)
    }
}

impl Display for Blockchain {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Errors raised by chain clients.
///
/// The transfer engine classifies execute outcomes on these variants:
/// `InsufficientBalance` and `InvalidSignature` are unrecoverable, everything
/// else is retried.
#[derive(Debug, thiserror::Error)]
pub enum ChainClientError {
    /// Preflight reverted because the sender cannot cover amount plus fee.
    #[error("insufficient balance")]
    InsufficientBalance,
    /// Preflight reverted because the sender's transfer signature is invalid.
    #[error("invalid signature")]
    InvalidSignature,
    /// The submission handle cannot be resolved to a final transaction state.
    #[error("unresolvable transfer submission: {0}")]
    UnresolvableSubmission(String),
    /// The transaction was submitted with a nonce already consumed on chain.
    #[error("transaction nonce too low")]
    NonceTooLow,
    /// The node rejected the transaction fee as too low for the mempool.
    #[error("transaction underpriced")]
    Underpriced,
    /// The adaptive fee escalation would exceed the configured cap.
    #[error("maximum total fee per gas of {max_total_fee_per_gas} exceeded")]
    MaxTotalFeePerGasExceeded { max_total_fee_per_gas: u128 },
    /// The operation is not available on this chain family.
    #[error("operation not supported on {0}")]
    Unsupported(Blockchain),
    #[error("store error: {0}")]
    Store(#[from] crate::store::StoreError),
    #[error("{0}")]
    Other(String),
}

/// Final status of an included transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionStatus {
    Confirmed,
    Reverted,
}

/// Status of a transfer submission, polled by the confirm task.
#[derive(Debug, Clone)]
pub struct TransferSubmissionStatus {
    /// True once the transaction is either confirmed or reverted.
    pub completed: bool,
    pub status: Option<TransactionStatus>,
    pub transaction_id: Option<String>,
    /// Hub-assigned transfer ID, available once confirmed.
    pub on_chain_transfer_id: Option<Amount>,
}

impl TransferSubmissionStatus {
    pub fn pending() -> Self {
        Self {
            completed: false,
            status: None,
            transaction_id: None,
            on_chain_transfer_id: None,
        }
    }
}

/// Request data for starting a single-chain transfer submission.
#[derive(Debug, Clone)]
pub struct TransferSubmissionStart {
    pub internal_transfer_id: i64,
    pub sender_address: String,
    pub recipient_address: String,
    pub token_address: String,
    pub amount: Amount,
    pub fee: Amount,
    pub sender_nonce: Amount,
    pub valid_until: u64,
    pub signature: String,
}

/// Request data for starting a cross-chain transferFrom submission.
#[derive(Debug, Clone)]
pub struct TransferFromSubmissionStart {
    pub internal_transfer_id: i64,
    pub destination_blockchain: Blockchain,
    pub sender_address: String,
    pub recipient_address: String,
    pub source_token_address: String,
    pub destination_token_address: String,
    pub amount: Amount,
    pub fee: Amount,
    pub sender_nonce: Amount,
    pub valid_until: u64,
    pub signature: String,
}

/// Uniform interface over the supported blockchains.
#[async_trait]
pub trait ChainClient: Send + Sync {
    fn blockchain(&self) -> Blockchain;

    /// Whether an address string is syntactically valid on this chain.
    fn is_valid_address(&self, address: &str) -> bool;

    /// As [`Self::is_valid_address`], additionally rejecting the zero
    /// address, which can never receive tokens.
    fn is_valid_recipient_address(&self, address: &str) -> bool;

    /// Reads the hub's service-node record and returns its `active` flag.
    async fn is_node_registered(&self) -> Result<bool, ChainClientError>;

    /// Reads the URL field of the on-chain service-node record.
    async fn read_node_url(&self) -> Result<String, ChainClientError>;

    /// Reads the hub's current minimum service-node deposit.
    async fn read_minimum_deposit(&self) -> Result<Amount, ChainClientError>;

    /// Reads this node's own PAN token balance.
    async fn read_own_token_balance(&self) -> Result<Amount, ChainClientError>;

    /// Registers the service node at the hub. A positive deposit is first
    /// approved on the PAN token at nonce `n`, followed by the hub
    /// registration at nonce `n + 1`.
    async fn register_node(
        &self,
        node_url: &str,
        node_deposit: Amount,
        withdrawal_address: &str,
    ) -> Result<(), ChainClientError>;

    async fn unregister_node(&self) -> Result<(), ChainClientError>;

    /// Whether the node has initiated unregistration but not yet withdrawn
    /// its deposit.
    async fn is_unbonding(&self) -> Result<bool, ChainClientError>;

    async fn cancel_unregistration(&self) -> Result<(), ChainClientError>;

    async fn update_node_url(&self, node_url: &str) -> Result<(), ChainClientError>;

    /// Reads the hub's validator fee factor for the given blockchain.
    async fn get_validator_fee_factor(
        &self,
        blockchain: Blockchain,
    ) -> Result<u64, ChainClientError>;

    /// Starts a single-chain transfer submission after preflighting via the
    /// hub's read-only `verifyTransfer`, returning an opaque submission
    /// handle. The transaction is resubmitted with increasing fees until
    /// included.
    async fn start_transfer_submission(
        &self,
        request: TransferSubmissionStart,
    ) -> Result<Uuid, ChainClientError>;

    /// As [`Self::start_transfer_submission`] for cross-chain transfers,
    /// preflighting via `verifyTransferFrom`.
    async fn start_transfer_from_submission(
        &self,
        request: TransferFromSubmissionStart,
    ) -> Result<Uuid, ChainClientError>;

    /// Polls the status of a submission started earlier. On confirmation the
    /// receipt is read and the hub-assigned transfer ID extracted from the
    /// `TransferSucceeded` (same-chain) or `TransferFromSucceeded`
    /// (cross-chain) event log.
    async fn get_transfer_submission_status(
        &self,
        internal_transaction_id: Uuid,
        destination_blockchain: Blockchain,
    ) -> Result<TransferSubmissionStatus, ChainClientError>;

    /// Whether the chain's RPC endpoint currently answers.
    async fn is_node_healthy(&self) -> bool;
}

/// Chain clients for all active chains, keyed by blockchain.
#[derive(Clone, Default)]
pub struct ChainRegistry {
    clients: HashMap<Blockchain, Arc<dyn ChainClient>>,
}

impl ChainRegistry {
    pub fn new(clients: HashMap<Blockchain, Arc<dyn ChainClient>>) -> Self {
        Self { clients }
    }

    pub fn get(&self, blockchain: Blockchain) -> Option<&Arc<dyn ChainClient>> {
        self.clients.get(&blockchain)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Blockchain, &Arc<dyn ChainClient>)> {
        self.clients.iter()
    }

    pub fn blockchains(&self) -> Vec<Blockchain> {
        let mut chains: Vec<Blockchain> = self.clients.keys().copied().collect();
        chains.sort();
        chains
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blockchain_ids_are_stable() {
        assert_eq!(Blockchain::Ethereum.id(), 0);
        assert_eq!(Blockchain::BnbChain.id(), 1);
        assert_eq!(Blockchain::Solana.id(), 7);
        for blockchain in Blockchain::ALL {
            assert_eq!(Blockchain::from_id(blockchain.id()), Some(blockchain));
        }
    }

    #[test]
    fn config_name_round_trips() {
        for blockchain in Blockchain::ALL {
            assert_eq!(
                Blockchain::from_config_name(&blockchain.config_name()),
                Some(blockchain)
            );
        }
        assert_eq!(Blockchain::from_config_name("bitcoin"), None);
    }

    #[test]
    fn solana_is_the_only_non_evm_chain() {
        let non_evm: Vec<Blockchain> = Blockchain::ALL
            .into_iter()
            .filter(|b| !b.is_evm())
            .collect();
        assert_eq!(non_evm, vec![Blockchain::Solana]);
    }
}
