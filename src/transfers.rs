//! Transfer lifecycle engine.
//!
//! Intake persists an `ACCEPTED` transfer and schedules the execute task.
//! Execute preflights and submits the hub transaction, then schedules
//! confirm; confirm polls the submission until it is confirmed or reverted.
//! Execute retries are unbounded; confirm retries are capped. Unrecoverable
//! outcomes mark the transfer `FAILED` and stop.

use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

use crate::amount::Amount;
use crate::bids::{BidRejection, verify_bid};
use crate::chain::{
    Blockchain, ChainClient, ChainClientError, TransactionStatus, TransferFromSubmissionStart,
    TransferSubmissionStart,
};
use crate::context::Context;
use crate::plugins::Bid;
use crate::scheduler::{self, TRANSFERS_QUEUE, TaskError, TaskOutcome, TaskRegistry};
use crate::store::{NewTransfer, StoreError, TransferStatus, TransferStore as _};

pub const EXECUTE_TRANSFER_TASK: &str = "execute_transfer";
pub const CONFIRM_TRANSFER_TASK: &str = "confirm_transfer";

/// Confirm polls are capped; execute retries are not.
pub const CONFIRM_TRANSFER_MAX_ATTEMPTS: i32 = 100;

#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("sender nonce {0} is not unique")]
    SenderNonceNotUnique(Amount),
    #[error("{0}")]
    BidNotAccepted(#[from] BidRejection),
    #[error("resource with task ID \"{0}\" not found")]
    ResourceNotFound(Uuid),
    /// The transfer is terminally failed and must not be retried.
    #[error("{0}")]
    Unrecoverable(String),
    #[error("{0}")]
    Internal(String),
}

impl From<StoreError> for TransferError {
    fn from(error: StoreError) -> Self {
        match error {
            StoreError::SenderNonceNotUnique { sender_nonce, .. } => {
                TransferError::SenderNonceNotUnique(sender_nonce)
            }
            other => TransferError::Internal(other.to_string()),
        }
    }
}

/// Request data for initiating a new transfer.
#[derive(Debug, Clone)]
pub struct InitiateTransferRequest {
    pub source_blockchain: Blockchain,
    pub destination_blockchain: Blockchain,
    pub sender_address: String,
    pub recipient_address: String,
    pub source_token_address: String,
    pub destination_token_address: String,
    pub amount: Amount,
    /// Sender nonce at the forwarder contract.
    pub nonce: Amount,
    pub valid_until: u64,
    pub signature: String,
    pub time_received: f64,
    pub bid: Bid,
    pub bid_signature: String,
}

/// Execute-task payload and request data.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecuteTransferRequest {
    pub internal_transfer_id: i64,
    pub source_blockchain: Blockchain,
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

/// Confirm-task payload and request data.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfirmTransferRequest {
    pub internal_transfer_id: i64,
    pub source_blockchain: Blockchain,
    pub destination_blockchain: Blockchain,
    pub internal_transaction_id: Uuid,
}

/// Public view of a transfer, keyed by task ID.
#[derive(Debug, Clone)]
pub struct FindTransferResponse {
    pub source_blockchain: Blockchain,
    pub destination_blockchain: Blockchain,
    pub sender_address: String,
    pub recipient_address: String,
    pub source_token_address: String,
    pub destination_token_address: String,
    pub amount: Amount,
    pub fee: Amount,
    pub status: TransferStatus,
    pub on_chain_transfer_id: Option<Amount>,
    pub transaction_id: Option<String>,
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

pub struct TransferEngine {
    ctx: Arc<Context>,
}

impl TransferEngine {
    pub fn new(ctx: Arc<Context>) -> Self {
        Self { ctx }
    }

    fn client(&self, blockchain: Blockchain) -> Result<&Arc<dyn ChainClient>, TransferError> {
        self.ctx
            .client(blockchain)
            .ok_or_else(|| TransferError::Internal(format!("no chain client for {blockchain}")))
    }

    /// Initiates a new transfer: validates the bid, persists the `ACCEPTED`
    /// row, schedules the execute task, and returns the task ID.
    pub async fn initiate_transfer(
        &self,
        request: InitiateTransferRequest,
    ) -> Result<Uuid, TransferError> {
        tracing::info!(
            source_blockchain = %request.source_blockchain,
            destination_blockchain = %request.destination_blockchain,
            sender_address = %request.sender_address,
            "initiating a new token transfer"
        );
        let chain_config = self
            .ctx
            .config
            .blockchain(request.source_blockchain)
            .filter(|c| c.active && c.registered)
            .ok_or_else(|| {
                TransferError::Internal(format!(
                    "source blockchain {} is not active and registered",
                    request.source_blockchain
                ))
            })?;

        verify_bid(
            &self.ctx.signer,
            self.ctx.bid_plugin.as_ref(),
            &request.bid,
            &request.bid_signature,
            request.source_blockchain,
            request.destination_blockchain,
            request.valid_until,
            request.time_received,
            unix_now(),
        )?;

        let internal_transfer_id = self
            .ctx
            .transfers
            .create_transfer(NewTransfer {
                source_blockchain: request.source_blockchain,
                destination_blockchain: request.destination_blockchain,
                sender_address: request.sender_address.clone(),
                recipient_address: request.recipient_address.clone(),
                source_token_address: request.source_token_address.clone(),
                destination_token_address: request.destination_token_address.clone(),
                amount: request.amount,
                fee: request.bid.fee,
                sender_nonce: request.nonce,
                signature: request.signature.clone(),
                hub_address: chain_config.hub.clone().unwrap_or_default(),
                forwarder_address: chain_config.forwarder.clone().unwrap_or_default(),
            })
            .await?;

        let task_id = scheduler::enqueue(
            &self.ctx.tasks,
            TRANSFERS_QUEUE,
            EXECUTE_TRANSFER_TASK,
            &ExecuteTransferRequest {
                internal_transfer_id,
                source_blockchain: request.source_blockchain,
                destination_blockchain: request.destination_blockchain,
                sender_address: request.sender_address,
                recipient_address: request.recipient_address,
                source_token_address: request.source_token_address,
                destination_token_address: request.destination_token_address,
                amount: request.amount,
                fee: request.bid.fee,
                sender_nonce: request.nonce,
                valid_until: request.valid_until,
                signature: request.signature,
            },
            Duration::zero(),
        )
        .await
        .map_err(|e| TransferError::Internal(e.to_string()))?;

        self.ctx
            .transfers
            .update_transfer_task_id(internal_transfer_id, task_id)
            .await?;
        Ok(task_id)
    }

    /// Executes a transfer: submits the hub transaction on the source chain
    /// and returns the submission handle.
    pub async fn execute_transfer(
        &self,
        request: &ExecuteTransferRequest,
    ) -> Result<Uuid, TransferError> {
        tracing::info!(
            internal_transfer_id = request.internal_transfer_id,
            source_blockchain = %request.source_blockchain,
            "executing a token transfer"
        );
        if request.valid_until < unix_now() {
            self.mark_failed(request.internal_transfer_id).await?;
            return Err(TransferError::Unrecoverable(
                "validity of the transfer request has expired".to_string(),
            ));
        }
        let internal_transaction_id =
            if request.source_blockchain == request.destination_blockchain {
                self.single_chain_transfer(request).await?
            } else {
                self.cross_chain_transfer(request).await?
            };
        self.ctx
            .transfers
            .update_transfer_status(request.internal_transfer_id, TransferStatus::Submitted)
            .await?;
        Ok(internal_transaction_id)
    }

    async fn single_chain_transfer(
        &self,
        request: &ExecuteTransferRequest,
    ) -> Result<Uuid, TransferError> {
        if request.source_token_address != request.destination_token_address {
            self.mark_failed(request.internal_transfer_id).await?;
            return Err(TransferError::Unrecoverable(
                "source and destination token addresses must be equal for a single-chain \
                 token transfer"
                    .to_string(),
            ));
        }
        let client = self.client(request.source_blockchain)?;
        let result = client
            .start_transfer_submission(TransferSubmissionStart {
                internal_transfer_id: request.internal_transfer_id,
                sender_address: request.sender_address.clone(),
                recipient_address: request.recipient_address.clone(),
                token_address: request.source_token_address.clone(),
                amount: request.amount,
                fee: request.fee,
                sender_nonce: request.sender_nonce,
                valid_until: request.valid_until,
                signature: request.signature.clone(),
            })
            .await;
        self.classify_submission_start(request.internal_transfer_id, result, "single-chain")
            .await
    }

    async fn cross_chain_transfer(
        &self,
        request: &ExecuteTransferRequest,
    ) -> Result<Uuid, TransferError> {
        let client = self.client(request.source_blockchain)?;
        let result = client
            .start_transfer_from_submission(TransferFromSubmissionStart {
                internal_transfer_id: request.internal_transfer_id,
                destination_blockchain: request.destination_blockchain,
                sender_address: request.sender_address.clone(),
                recipient_address: request.recipient_address.clone(),
                source_token_address: request.source_token_address.clone(),
                destination_token_address: request.destination_token_address.clone(),
                amount: request.amount,
                fee: request.fee,
                sender_nonce: request.sender_nonce,
                valid_until: request.valid_until,
                signature: request.signature.clone(),
            })
            .await;
        self.classify_submission_start(request.internal_transfer_id, result, "cross-chain")
            .await
    }

    /// Maps a submission-start outcome onto the state machine: balance and
    /// signature preflight failures are terminal, anything else reverts the
    /// transfer to `ACCEPTED` so the next execute cycle picks it up again.
    async fn classify_submission_start(
        &self,
        internal_transfer_id: i64,
        result: Result<Uuid, ChainClientError>,
        kind: &str,
    ) -> Result<Uuid, TransferError> {
        match result {
            Ok(handle) => Ok(handle),
            Err(
                e @ (ChainClientError::InsufficientBalance | ChainClientError::InvalidSignature),
            ) => {
                tracing::error!(internal_transfer_id, error = %e, "transfer preflight failed");
                self.mark_failed(internal_transfer_id).await?;
                Err(TransferError::Unrecoverable(format!(
                    "unable to send a {kind} transfer: {e}"
                )))
            }
            Err(e) => {
                // The nonce-assigned tag must not survive a failed attempt;
                // the nonce itself was already handled by the chain client.
                self.ctx
                    .transfers
                    .update_transfer_status(internal_transfer_id, TransferStatus::Accepted)
                    .await?;
                Err(TransferError::Internal(format!(
                    "unable to send a {kind} transfer: {e}"
                )))
            }
        }
    }

    /// Polls the source chain for the submission result. Returns true once
    /// the transfer reached a terminal transaction state.
    pub async fn confirm_transfer(
        &self,
        request: &ConfirmTransferRequest,
    ) -> Result<bool, TransferError> {
        tracing::info!(
            internal_transfer_id = request.internal_transfer_id,
            internal_transaction_id = %request.internal_transaction_id,
            "determining if a token transfer is confirmed"
        );
        let client = self.client(request.source_blockchain)?;
        let status = match client
            .get_transfer_submission_status(
                request.internal_transaction_id,
                request.destination_blockchain,
            )
            .await
        {
            Err(ChainClientError::UnresolvableSubmission(reason)) => {
                tracing::error!(
                    internal_transfer_id = request.internal_transfer_id,
                    reason,
                    "token transfer failed"
                );
                self.ctx
                    .transfers
                    .reset_transfer_nonce(request.internal_transfer_id)
                    .await?;
                self.mark_failed(request.internal_transfer_id).await?;
                return Ok(true);
            }
            Err(e) => {
                return Err(TransferError::Internal(format!(
                    "unable to determine if a token transfer is confirmed: {e}"
                )));
            }
            Ok(status) => status,
        };

        if !status.completed {
            tracing::info!(
                internal_transfer_id = request.internal_transfer_id,
                "token transfer not yet confirmed"
            );
            return Ok(false);
        }
        let transaction_id = status.transaction_id.ok_or_else(|| {
            TransferError::Internal("completed submission without a transaction ID".to_string())
        })?;
        match status.status {
            Some(TransactionStatus::Reverted) => {
                tracing::warn!(
                    internal_transfer_id = request.internal_transfer_id,
                    transaction_id,
                    "token transfer reverted"
                );
                self.ctx
                    .transfers
                    .update_transfer_status(request.internal_transfer_id, TransferStatus::Reverted)
                    .await?;
                Ok(true)
            }
            Some(TransactionStatus::Confirmed) => {
                let on_chain_transfer_id = status.on_chain_transfer_id.ok_or_else(|| {
                    TransferError::Internal(
                        "confirmed submission without an on-chain transfer ID".to_string(),
                    )
                })?;
                tracing::info!(
                    internal_transfer_id = request.internal_transfer_id,
                    transaction_id,
                    on_chain_transfer_id = %on_chain_transfer_id,
                    "token transfer confirmed"
                );
                self.ctx
                    .transfers
                    .update_transfer_transaction_id(request.internal_transfer_id, &transaction_id)
                    .await?;
                self.ctx
                    .transfers
                    .update_on_chain_transfer_id(request.internal_transfer_id, on_chain_transfer_id)
                    .await?;
                self.ctx
                    .transfers
                    .update_transfer_status(request.internal_transfer_id, TransferStatus::Confirmed)
                    .await?;
                Ok(true)
            }
            None => Err(TransferError::Internal(
                "completed submission without a transaction status".to_string(),
            )),
        }
    }

    /// Finds a transfer by its task ID.
    pub async fn find_transfer(&self, task_id: Uuid) -> Result<FindTransferResponse, TransferError> {
        let transfer = self
            .ctx
            .transfers
            .read_transfer_by_task_id(task_id)
            .await?
            .ok_or(TransferError::ResourceNotFound(task_id))?;
        Ok(FindTransferResponse {
            source_blockchain: transfer.source_blockchain,
            destination_blockchain: transfer.destination_blockchain,
            sender_address: transfer.sender_address,
            recipient_address: transfer.recipient_address,
            source_token_address: transfer.source_token_address,
            destination_token_address: transfer.destination_token_address,
            amount: transfer.amount,
            fee: transfer.fee,
            status: transfer.status,
            on_chain_transfer_id: transfer.on_chain_transfer_id,
            transaction_id: transfer.transaction_id,
        })
    }

    async fn mark_failed(&self, internal_transfer_id: i64) -> Result<(), TransferError> {
        self.ctx
            .transfers
            .update_transfer_status(internal_transfer_id, TransferStatus::Failed)
            .await?;
        Ok(())
    }
}

/// Execute-task handler. Unrecoverable outcomes end the task; transient ones
/// retry without bound.
pub async fn handle_execute_transfer(
    ctx: Arc<Context>,
    payload: serde_json::Value,
) -> Result<TaskOutcome, TaskError> {
    let request: ExecuteTransferRequest = serde_json::from_value(payload)?;
    let engine = TransferEngine::new(Arc::clone(&ctx));
    match engine.execute_transfer(&request).await {
        Ok(internal_transaction_id) => {
            let confirm_interval = ctx.config.tasks.confirm_transfer.interval;
            scheduler::enqueue(
                &ctx.tasks,
                TRANSFERS_QUEUE,
                CONFIRM_TRANSFER_TASK,
                &ConfirmTransferRequest {
                    internal_transfer_id: request.internal_transfer_id,
                    source_blockchain: request.source_blockchain,
                    destination_blockchain: request.destination_blockchain,
                    internal_transaction_id,
                },
                Duration::seconds(confirm_interval as i64),
            )
            .await?;
            Ok(TaskOutcome::Done)
        }
        Err(TransferError::Unrecoverable(e)) => {
            tracing::error!(
                internal_transfer_id = request.internal_transfer_id,
                error = %e,
                "unable to execute a token transfer - unrecoverable error"
            );
            Ok(TaskOutcome::Done)
        }
        Err(e) => {
            tracing::error!(
                internal_transfer_id = request.internal_transfer_id,
                error = %e,
                "unable to execute a token transfer - retrying"
            );
            Ok(TaskOutcome::Retry {
                countdown: Duration::seconds(
                    ctx.config.tasks.execute_transfer.retry_interval_after_error as i64,
                ),
            })
        }
    }
}

/// Confirm-task handler. Polls until the submission completes; errors retry
/// with the error interval up to the attempt cap.
pub async fn handle_confirm_transfer(
    ctx: Arc<Context>,
    payload: serde_json::Value,
) -> Result<TaskOutcome, TaskError> {
    let request: ConfirmTransferRequest = serde_json::from_value(payload)?;
    let engine = TransferEngine::new(Arc::clone(&ctx));
    match engine.confirm_transfer(&request).await {
        Ok(true) => Ok(TaskOutcome::Done),
        Ok(false) => Ok(TaskOutcome::Retry {
            countdown: Duration::seconds(ctx.config.tasks.confirm_transfer.interval as i64),
        }),
        Err(e) => {
            tracing::error!(
                internal_transfer_id = request.internal_transfer_id,
                error = %e,
                "unable to confirm a token transfer"
            );
            Ok(TaskOutcome::Retry {
                countdown: Duration::seconds(
                    ctx.config.tasks.confirm_transfer.retry_interval_after_error as i64,
                ),
            })
        }
    }
}

pub fn register_tasks(registry: &mut TaskRegistry) {
    registry.register(
        EXECUTE_TRANSFER_TASK,
        TRANSFERS_QUEUE,
        None,
        Arc::new(|ctx, payload| Box::pin(handle_execute_transfer(ctx, payload))),
    );
    registry.register(
        CONFIRM_TRANSFER_TASK,
        TRANSFERS_QUEUE,
        Some(CONFIRM_TRANSFER_MAX_ATTEMPTS),
        Arc::new(|ctx, payload| Box::pin(handle_confirm_transfer(ctx, payload))),
    );
}
