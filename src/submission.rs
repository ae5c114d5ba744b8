//! Adaptive-fee transaction submission.
//!
//! A submission sends a transaction at a fixed account nonce and keeps
//! watching the chain. If the transaction is not included within
//! `blocks_until_resubmission` blocks, it is resubmitted with the same nonce
//! and the adaptable fee scaled by the configured increase factor, bounded by
//! `max_total_fee_per_gas`. Each submission is tracked under an opaque
//! [`Uuid`] handle that the chain client polls for completion.
//!
//! Handles are process-local. After a restart a handle can no longer be
//! resolved, which the transfer engine treats as an unresolvable submission.

use alloy_network::TransactionBuilder;
use alloy_primitives::{Address, Bytes};
use alloy_provider::Provider;
use alloy_rpc_types_eth::{BlockNumberOrTag, TransactionRequest};
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::chain::TransactionStatus;

/// Escalation schedule for the adaptable (priority) fee per gas.
#[derive(Debug, Clone)]
pub struct FeeSchedule {
    pub min_adaptable_fee_per_gas: u128,
    /// `None` means uncapped.
    pub max_total_fee_per_gas: Option<u128>,
    pub increase_factor: f64,
}

impl FeeSchedule {
    pub fn initial_fee(&self) -> u128 {
        self.min_adaptable_fee_per_gas
    }

    /// The fee for the next resubmission.
    pub fn next_fee(&self, current: u128) -> u128 {
        let scaled = (current as f64 * self.increase_factor).round();
        (scaled as u128).max(current + 1)
    }

    /// Checks the projected total fee per gas against the cap.
    pub fn check_total(&self, base_fee_per_gas: u128, adaptable_fee_per_gas: u128) -> Result<u128, SubmissionError> {
        let total = base_fee_per_gas.saturating_add(adaptable_fee_per_gas);
        match self.max_total_fee_per_gas {
            Some(cap) if total > cap => Err(SubmissionError::MaxTotalFeePerGasExceeded {
                max_total_fee_per_gas: cap,
            }),
            _ => Ok(total),
        }
    }
}

/// Pacing of the resubmission watch.
#[derive(Debug, Clone)]
pub struct ResubmissionPolicy {
    pub blocks_until_resubmission: u64,
    pub average_block_time: u64,
    pub confirmations: u64,
}

#[derive(Debug, thiserror::Error)]
pub enum SubmissionError {
    #[error("transaction nonce too low")]
    NonceTooLow,
    #[error("transaction underpriced")]
    Underpriced,
    #[error("maximum total fee per gas of {max_total_fee_per_gas} exceeded")]
    MaxTotalFeePerGasExceeded { max_total_fee_per_gas: u128 },
    #[error("rpc error: {0}")]
    Rpc(String),
}

/// Classifies a node error message for a transaction send.
fn classify_send_error(message: &str) -> SubmissionError {
    let lowered = message.to_lowercase();
    if lowered.contains("nonce too low") {
        SubmissionError::NonceTooLow
    } else if lowered.contains("underpriced") {
        SubmissionError::Underpriced
    } else {
        SubmissionError::Rpc(message.to_string())
    }
}

/// Transaction data submitted at a fixed nonce.
#[derive(Debug, Clone)]
pub struct SubmissionRequest {
    pub to: Address,
    pub calldata: Bytes,
    pub gas_limit: u64,
    pub nonce: u64,
}

/// Terminal or in-flight state of a tracked submission.
#[derive(Debug, Clone)]
pub enum SubmissionState {
    Pending,
    Completed {
        status: TransactionStatus,
        transaction_hash: String,
    },
    Failed {
        reason: String,
    },
}

/// Sends transactions with adaptive-fee resubmission and tracks them by
/// handle.
#[derive(Debug, Clone)]
pub struct TransactionSubmitter<P> {
    provider: P,
    from: Address,
    fee_schedule: FeeSchedule,
    policy: ResubmissionPolicy,
    records: Arc<DashMap<Uuid, SubmissionState>>,
}

impl<P> TransactionSubmitter<P>
where
    P: Provider + Clone + Send + Sync + 'static,
{
    pub fn new(
        provider: P,
        from: Address,
        fee_schedule: FeeSchedule,
        policy: ResubmissionPolicy,
    ) -> Self {
        Self {
            provider,
            from,
            fee_schedule,
            policy,
            records: Arc::new(DashMap::new()),
        }
    }

    /// Current state of a submission, or `None` for an unknown handle.
    pub fn state(&self, handle: Uuid) -> Option<SubmissionState> {
        self.records.get(&handle).map(|entry| entry.value().clone())
    }

    async fn base_fee_per_gas(&self) -> u128 {
        let base_fee = self
            .provider
            .get_block_by_number(BlockNumberOrTag::Latest)
            .await
            .ok()
            .flatten()
            .and_then(|block| block.header.base_fee_per_gas);
        match base_fee {
            Some(fee) => u128::from(fee),
            // Pre-1559 chain; the node's gas price estimate stands in.
            None => self.provider.get_gas_price().await.unwrap_or_default(),
        }
    }

    fn build_transaction(
        &self,
        request: &SubmissionRequest,
        adaptable_fee: u128,
        total_fee: u128,
    ) -> TransactionRequest {
        TransactionRequest::default()
            .with_from(self.from)
            .with_to(request.to)
            .with_input(request.calldata.clone())
            .with_gas_limit(request.gas_limit)
            .with_nonce(request.nonce)
            .with_max_priority_fee_per_gas(adaptable_fee)
            .with_max_fee_per_gas(total_fee)
    }

    /// Sends the first attempt synchronously and spawns the resubmission
    /// watch. Nonce and fee-pricing rejections of the first attempt surface
    /// to the caller; later outcomes are recorded under the returned handle.
    pub async fn start(&self, request: SubmissionRequest) -> Result<Uuid, SubmissionError> {
        let adaptable_fee = self.fee_schedule.initial_fee();
        let base_fee = self.base_fee_per_gas().await;
        let total_fee = self.fee_schedule.check_total(base_fee, adaptable_fee)?;
        let transaction = self.build_transaction(&request, adaptable_fee, total_fee);
        let pending = self
            .provider
            .send_transaction(transaction)
            .await
            .map_err(|e| classify_send_error(&e.to_string()))?;
        let first_hash = *pending.tx_hash();

        let handle = Uuid::new_v4();
        self.records.insert(handle, SubmissionState::Pending);
        tracing::info!(
            %handle,
            nonce = request.nonce,
            transaction_hash = %first_hash,
            adaptable_fee_per_gas = adaptable_fee,
            "transaction submitted"
        );

        let watcher = self.clone();
        tokio::spawn(async move {
            watcher
                .watch(handle, request, adaptable_fee, vec![first_hash])
                .await;
        });
        Ok(handle)
    }

    async fn watch(
        &self,
        handle: Uuid,
        request: SubmissionRequest,
        mut adaptable_fee: u128,
        mut hashes: Vec<alloy_primitives::TxHash>,
    ) {
        let poll_interval = Duration::from_secs(self.policy.average_block_time.max(1));
        loop {
            for _ in 0..self.policy.blocks_until_resubmission.max(1) {
                tokio::time::sleep(poll_interval).await;
                for hash in &hashes {
                    match self.provider.get_transaction_receipt(*hash).await {
                        Ok(Some(receipt)) => {
                            self.await_confirmations(receipt.block_number).await;
                            let status = if receipt.status() {
                                TransactionStatus::Confirmed
                            } else {
                                TransactionStatus::Reverted
                            };
                            tracing::info!(%handle, transaction_hash = %hash, ?status, "transaction included");
                            self.records.insert(
                                handle,
                                SubmissionState::Completed {
                                    status,
                                    transaction_hash: format!("{hash:#x}"),
                                },
                            );
                            return;
                        }
                        Ok(None) => {}
                        Err(e) => {
                            tracing::warn!(%handle, error = %e, "receipt poll failed");
                        }
                    }
                }
            }

            // Not included within the window: escalate and resubmit at the
            // same nonce.
            adaptable_fee = self.fee_schedule.next_fee(adaptable_fee);
            let base_fee = self.base_fee_per_gas().await;
            let total_fee = match self.fee_schedule.check_total(base_fee, adaptable_fee) {
                Ok(total) => total,
                Err(e) => {
                    tracing::error!(%handle, error = %e, "giving up on transaction submission");
                    self.records
                        .insert(handle, SubmissionState::Failed { reason: e.to_string() });
                    return;
                }
            };
            let transaction = self.build_transaction(&request, adaptable_fee, total_fee);
            match self.provider.send_transaction(transaction).await {
                Ok(pending) => {
                    let hash = *pending.tx_hash();
                    tracing::info!(
                        %handle,
                        transaction_hash = %hash,
                        adaptable_fee_per_gas = adaptable_fee,
                        "transaction resubmitted"
                    );
                    hashes.push(hash);
                }
                Err(e) => match classify_send_error(&e.to_string()) {
                    // An earlier attempt consumed the nonce; keep polling
                    // the hashes already sent.
                    SubmissionError::NonceTooLow => {
                        tracing::debug!(%handle, "nonce consumed, awaiting receipt of an earlier attempt");
                    }
                    other => {
                        tracing::warn!(%handle, error = %other, "resubmission failed");
                    }
                },
            }
        }
    }

    async fn await_confirmations(&self, included_in: Option<u64>) {
        let Some(included_in) = included_in else {
            return;
        };
        let target = included_in + self.policy.confirmations;
        loop {
            match self.provider.get_block_number().await {
                Ok(head) if head >= target => return,
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(error = %e, "block number poll failed");
                }
            }
            tokio::time::sleep(Duration::from_secs(self.policy.average_block_time.max(1))).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schedule(cap: Option<u128>) -> FeeSchedule {
        FeeSchedule {
            min_adaptable_fee_per_gas: 1_000_000_000,
            max_total_fee_per_gas: cap,
            increase_factor: 1.101,
        }
    }

    #[test]
    fn fee_escalates_by_the_increase_factor() {
        let schedule = schedule(None);
        assert_eq!(schedule.initial_fee(), 1_000_000_000);
        assert_eq!(schedule.next_fee(1_000_000_000), 1_101_000_000);
        assert_eq!(schedule.next_fee(1_101_000_000), 1_212_201_000);
    }

    #[test]
    fn fee_always_strictly_increases() {
        let schedule = FeeSchedule {
            min_adaptable_fee_per_gas: 1,
            max_total_fee_per_gas: None,
            increase_factor: 1.101,
        };
        assert!(schedule.next_fee(1) > 1);
    }

    #[test]
    fn cap_limits_the_projected_total() {
        let schedule = schedule(Some(50_000_000_000));
        assert!(schedule.check_total(0, 1_000_000_000).is_ok());
        let error = schedule.check_total(49_500_000_000, 1_000_000_000).unwrap_err();
        assert!(matches!(
            error,
            SubmissionError::MaxTotalFeePerGasExceeded {
                max_total_fee_per_gas: 50_000_000_000
            }
        ));
    }

    #[test]
    fn absent_cap_means_uncapped() {
        let schedule = schedule(None);
        assert!(schedule.check_total(u128::MAX - 1, 1).is_ok());
    }

    #[test]
    fn escalation_hits_the_cap_eventually() {
        let schedule = schedule(Some(50_000_000_000));
        let mut fee = schedule.initial_fee();
        let mut steps = 0;
        while schedule.check_total(0, fee).is_ok() {
            fee = schedule.next_fee(fee);
            steps += 1;
            assert!(steps < 100, "escalation must reach the cap");
        }
    }

    #[test]
    fn send_errors_are_classified_by_message() {
        assert!(matches!(
            classify_send_error("server returned an error response: nonce too low"),
            SubmissionError::NonceTooLow
        ));
        assert!(matches!(
            classify_send_error("replacement transaction underpriced"),
            SubmissionError::Underpriced
        ));
        assert!(matches!(
            classify_send_error("connection refused"),
            SubmissionError::Rpc(_)
        ));
    }
}
