//! Scriptable chain client for tests (feature `test-utils`).

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use uuid::Uuid;

use super::{
    Blockchain, ChainClient, ChainClientError, TransferFromSubmissionStart, TransferSubmissionStart,
    TransferSubmissionStatus,
};
use crate::amount::Amount;

/// A chain client whose results are queued up front by the test.
///
/// Operations with no scripted result fall back to benign defaults. All
/// invoked operation names are recorded for assertions on call order.
pub struct MockChainClient {
    pub blockchain: Blockchain,
    registered: Mutex<bool>,
    unbonding: Mutex<bool>,
    node_url: Mutex<String>,
    minimum_deposit: Mutex<Amount>,
    own_balance: Mutex<Amount>,
    fee_factors: Mutex<HashMap<Blockchain, u64>>,
    start_results: Mutex<VecDeque<Result<Uuid, ChainClientError>>>,
    status_results: Mutex<VecDeque<Result<TransferSubmissionStatus, ChainClientError>>>,
    calls: Mutex<Vec<String>>,
}

impl MockChainClient {
    pub fn new(blockchain: Blockchain) -> Self {
        Self {
            blockchain,
            registered: Mutex::new(false),
            unbonding: Mutex::new(false),
            node_url: Mutex::new(String::new()),
            minimum_deposit: Mutex::new(Amount::ZERO),
            own_balance: Mutex::new(Amount::ZERO),
            fee_factors: Mutex::new(HashMap::new()),
            start_results: Mutex::new(VecDeque::new()),
            status_results: Mutex::new(VecDeque::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn with_registered(self, registered: bool) -> Self {
        *self.registered.lock().unwrap() = registered;
        self
    }

    pub fn with_unbonding(self, unbonding: bool) -> Self {
        *self.unbonding.lock().unwrap() = unbonding;
        self
    }

    pub fn with_node_url(self, url: &str) -> Self {
        *self.node_url.lock().unwrap() = url.to_string();
        self
    }

    pub fn with_minimum_deposit(self, minimum: Amount) -> Self {
        *self.minimum_deposit.lock().unwrap() = minimum;
        self
    }

    pub fn with_own_balance(self, balance: Amount) -> Self {
        *self.own_balance.lock().unwrap() = balance;
        self
    }

    pub fn with_fee_factor(self, blockchain: Blockchain, factor: u64) -> Self {
        self.fee_factors.lock().unwrap().insert(blockchain, factor);
        self
    }

    pub fn push_start_result(&self, result: Result<Uuid, ChainClientError>) {
        self.start_results.lock().unwrap().push_back(result);
    }

    pub fn push_status_result(&self, result: Result<TransferSubmissionStatus, ChainClientError>) {
        self.status_results.lock().unwrap().push_back(result);
    }

    /// Names of the operations invoked so far, in order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, name: &str) {
        self.calls.lock().unwrap().push(name.to_string());
    }
}

#[async_trait]
impl ChainClient for MockChainClient {
    fn blockchain(&self) -> Blockchain {
        self.blockchain
    }

    fn is_valid_address(&self, address: &str) -> bool {
        address.starts_with("0x") && address.len() == 42
    }

    fn is_valid_recipient_address(&self, address: &str) -> bool {
        self.is_valid_address(address) && address != "0x0000000000000000000000000000000000000000"
    }

    async fn is_node_registered(&self) -> Result<bool, ChainClientError> {
        self.record("is_node_registered");
        Ok(*self.registered.lock().unwrap())
    }

    async fn read_node_url(&self) -> Result<String, ChainClientError> {
        self.record("read_node_url");
        Ok(self.node_url.lock().unwrap().clone())
    }

    async fn read_minimum_deposit(&self) -> Result<Amount, ChainClientError> {
        self.record("read_minimum_deposit");
        Ok(*self.minimum_deposit.lock().unwrap())
    }

    async fn read_own_token_balance(&self) -> Result<Amount, ChainClientError> {
        self.record("read_own_token_balance");
        Ok(*self.own_balance.lock().unwrap())
    }

    async fn register_node(
        &self,
        _node_url: &str,
        _node_deposit: Amount,
        _withdrawal_address: &str,
    ) -> Result<(), ChainClientError> {
        self.record("register_node");
        Ok(())
    }

    async fn unregister_node(&self) -> Result<(), ChainClientError> {
        self.record("unregister_node");
        Ok(())
    }

    async fn is_unbonding(&self) -> Result<bool, ChainClientError> {
        self.record("is_unbonding");
        Ok(*self.unbonding.lock().unwrap())
    }

    async fn cancel_unregistration(&self) -> Result<(), ChainClientError> {
        self.record("cancel_unregistration");
        Ok(())
    }

    async fn update_node_url(&self, _node_url: &str) -> Result<(), ChainClientError> {
        self.record("update_node_url");
        Ok(())
    }

    async fn get_validator_fee_factor(
        &self,
        blockchain: Blockchain,
    ) -> Result<u64, ChainClientError> {
        self.record("get_validator_fee_factor");
        Ok(self
            .fee_factors
            .lock()
            .unwrap()
            .get(&blockchain)
            .copied()
            .unwrap_or(1))
    }

    async fn start_transfer_submission(
        &self,
        _request: TransferSubmissionStart,
    ) -> Result<Uuid, ChainClientError> {
        self.record("start_transfer_submission");
        self.start_results
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(Uuid::new_v4()))
    }

    async fn start_transfer_from_submission(
        &self,
        _request: TransferFromSubmissionStart,
    ) -> Result<Uuid, ChainClientError> {
        self.record("start_transfer_from_submission");
        self.start_results
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(Uuid::new_v4()))
    }

    async fn get_transfer_submission_status(
        &self,
        _internal_transaction_id: Uuid,
        _destination_blockchain: Blockchain,
    ) -> Result<TransferSubmissionStatus, ChainClientError> {
        self.record("get_transfer_submission_status");
        self.status_results
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(TransferSubmissionStatus::pending()))
    }

    async fn is_node_healthy(&self) -> bool {
        true
    }
}
