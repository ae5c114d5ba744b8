//! Durable state of the service node.
//!
//! Three narrow traits cover the persistence seams: [`TransferStore`] for the
//! transfer lifecycle (including blockchain-nonce allocation), [`BidStore`]
//! for the currently offered bids, and [`TaskStore`] for the scheduler queue.
//! The production implementation is Postgres ([`postgres::PgStore`]); an
//! in-memory implementation backs tests (feature `test-utils`).

#[cfg(feature = "test-utils")]
pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::amount::Amount;
use crate::chain::Blockchain;

/// Offset separating the internal nonce-assigned tag from public status
/// values.
const NEW_NONCE_ASSIGNED_OFFSET: i32 = 100;

/// Lifecycle status of a transfer.
///
/// `AcceptedNewNonceAssigned` is internal bookkeeping for the window between
/// nonce allocation and submission; its public projection collapses to
/// `Accepted`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(i32)]
pub enum TransferStatus {
    Accepted = 0,
    Failed = 1,
    Submitted = 2,
    Reverted = 3,
    Confirmed = 4,
    AcceptedNewNonceAssigned = NEW_NONCE_ASSIGNED_OFFSET,
}

impl TransferStatus {
    pub fn id(&self) -> i32 {
        *self as i32
    }

    pub fn from_id(id: i32) -> Option<TransferStatus> {
        match id {
            0 => Some(TransferStatus::Accepted),
            1 => Some(TransferStatus::Failed),
            2 => Some(TransferStatus::Submitted),
            3 => Some(TransferStatus::Reverted),
            4 => Some(TransferStatus::Confirmed),
            NEW_NONCE_ASSIGNED_OFFSET => Some(TransferStatus::AcceptedNewNonceAssigned),
            _ => None,
        }
    }

    /// The status visible through the HTTP API.
    pub fn to_public(&self) -> TransferStatus {
        match self {
            TransferStatus::AcceptedNewNonceAssigned => TransferStatus::Accepted,
            other => *other,
        }
    }

    /// Lower-case public status name as rendered by the status endpoint.
    pub fn public_name(&self) -> &'static str {
        match self.to_public() {
            TransferStatus::Accepted => "accepted",
            TransferStatus::Failed => "failed",
            TransferStatus::Submitted => "submitted",
            TransferStatus::Reverted => "reverted",
            TransferStatus::Confirmed => "confirmed",
            TransferStatus::AcceptedNewNonceAssigned => unreachable!(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TransferStatus::Failed | TransferStatus::Reverted | TransferStatus::Confirmed
        )
    }
}

/// Errors raised by store implementations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The `(forwarder, sender, sender_nonce)` uniqueness constraint was hit.
    #[error("sender nonce {sender_nonce} of {sender_address} on {blockchain} is not unique")]
    SenderNonceNotUnique {
        blockchain: Blockchain,
        sender_address: String,
        sender_nonce: Amount,
    },
    #[error("unknown internal transfer ID: {0}")]
    UnknownTransfer(i64),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("{0}")]
    Other(String),
}

/// Immutable data of a new transfer row.
#[derive(Debug, Clone)]
pub struct NewTransfer {
    pub source_blockchain: Blockchain,
    pub destination_blockchain: Blockchain,
    pub sender_address: String,
    pub recipient_address: String,
    pub source_token_address: String,
    pub destination_token_address: String,
    pub amount: Amount,
    pub fee: Amount,
    pub sender_nonce: Amount,
    pub signature: String,
    /// Hub contract address on the source blockchain.
    pub hub_address: String,
    /// Forwarder contract address on the source blockchain.
    pub forwarder_address: String,
}

/// A persisted transfer with its contract addresses resolved.
#[derive(Debug, Clone)]
pub struct TransferRecord {
    pub id: i64,
    pub source_blockchain: Blockchain,
    pub destination_blockchain: Blockchain,
    pub sender_address: String,
    pub recipient_address: String,
    pub source_token_address: String,
    pub destination_token_address: String,
    pub amount: Amount,
    pub fee: Amount,
    pub sender_nonce: Option<Amount>,
    pub signature: String,
    pub hub_address: String,
    pub forwarder_address: String,
    pub task_id: Option<Uuid>,
    pub on_chain_transfer_id: Option<Amount>,
    pub transaction_id: Option<String>,
    /// Blockchain account nonce assigned by the allocator; NULL before
    /// assignment and after the nonce has been handed to another transfer.
    pub nonce: Option<i64>,
    pub status: TransferStatus,
}

/// Durable record of every transfer and the blockchain-nonce allocator.
#[async_trait]
pub trait TransferStore: Send + Sync {
    /// Persists a new `ACCEPTED` transfer and returns its internal ID.
    ///
    /// Fails with [`StoreError::SenderNonceNotUnique`] when another
    /// non-terminally-failed transfer already holds the same
    /// `(forwarder, sender, sender_nonce)` triple.
    async fn create_transfer(&self, new: NewTransfer) -> Result<i64, StoreError>;

    async fn read_transfer_by_task_id(
        &self,
        task_id: Uuid,
    ) -> Result<Option<TransferRecord>, StoreError>;

    async fn read_transfer_nonce(&self, internal_transfer_id: i64)
    -> Result<Option<i64>, StoreError>;

    /// Assigns a blockchain nonce to the transfer, reusing the smallest
    /// abandoned nonce on the chain before minting a fresh one.
    ///
    /// In one atomic update: if no transfer on `blockchain` holds a nonce in
    /// status `FAILED` or `ACCEPTED`, the transfer receives
    /// `max(all nonces) + 1` when that exceeds `latest_blockchain_nonce` and
    /// `latest_blockchain_nonce` otherwise. Otherwise the smallest such
    /// abandoned nonce moves to this transfer and is NULLed on its previous
    /// holder, which keeps `FAILED` or reverts to `ACCEPTED`. The transfer
    /// itself becomes `ACCEPTED_NEW_NONCE_ASSIGNED`.
    async fn assign_transfer_nonce(
        &self,
        internal_transfer_id: i64,
        blockchain: Blockchain,
        latest_blockchain_nonce: i64,
    ) -> Result<(), StoreError>;

    /// Clears the blockchain nonce; the next execute cycle reallocates.
    async fn reset_transfer_nonce(&self, internal_transfer_id: i64) -> Result<(), StoreError>;

    /// Updates the status. Terminal `FAILED`/`REVERTED` also clear the
    /// sender nonce so the uniqueness constraint no longer blocks reuse.
    async fn update_transfer_status(
        &self,
        internal_transfer_id: i64,
        status: TransferStatus,
    ) -> Result<(), StoreError>;

    async fn update_transfer_task_id(
        &self,
        internal_transfer_id: i64,
        task_id: Uuid,
    ) -> Result<(), StoreError>;

    async fn update_transfer_transaction_id(
        &self,
        internal_transfer_id: i64,
        transaction_id: &str,
    ) -> Result<(), StoreError>;

    async fn update_on_chain_transfer_id(
        &self,
        internal_transfer_id: i64,
        on_chain_transfer_id: Amount,
    ) -> Result<(), StoreError>;
}

/// A bid as stored per `(source, destination)` pair. Signatures are attached
/// at read time, not stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredBid {
    pub execution_time: u64,
    pub valid_until: u64,
    pub fee: Amount,
}

/// Durable set of currently offered bids.
#[async_trait]
pub trait BidStore: Send + Sync {
    /// Atomically replaces the bid set for the pair (delete plus bulk insert
    /// in one transaction).
    async fn replace_bids(
        &self,
        source_blockchain: Blockchain,
        destination_blockchain: Blockchain,
        bids: Vec<StoredBid>,
    ) -> Result<(), StoreError>;

    async fn read_bids(
        &self,
        source_blockchain: Blockchain,
        destination_blockchain: Blockchain,
    ) -> Result<Vec<StoredBid>, StoreError>;
}

/// A claimed task ready for execution.
#[derive(Debug, Clone)]
pub struct TaskRow {
    pub id: Uuid,
    pub queue: String,
    pub name: String,
    pub payload: serde_json::Value,
    /// Number of completed executions before this one.
    pub attempts: i32,
}

/// Durable task queue used by the scheduler.
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Enqueues a named task to run after `delay`, returning its durable ID.
    async fn enqueue_task(
        &self,
        queue: &str,
        name: &str,
        payload: serde_json::Value,
        delay: Duration,
    ) -> Result<Uuid, StoreError>;

    /// Claims one due task from the queue, leasing it for `lease` so no
    /// other worker picks it up concurrently. Returns `None` when nothing is
    /// due.
    async fn claim_due_task(
        &self,
        queue: &str,
        lease: Duration,
        now: DateTime<Utc>,
    ) -> Result<Option<TaskRow>, StoreError>;

    /// Removes a finished task.
    async fn complete_task(&self, id: Uuid) -> Result<(), StoreError>;

    /// Re-schedules a claimed task to run again after `countdown`.
    async fn retry_task(&self, id: Uuid, countdown: Duration) -> Result<(), StoreError>;

    /// Drops all tasks of a queue, returning how many were removed.
    async fn purge_queue(&self, queue: &str) -> Result<u64, StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn internal_status_projects_to_accepted() {
        assert_eq!(
            TransferStatus::AcceptedNewNonceAssigned.to_public(),
            TransferStatus::Accepted
        );
        assert_eq!(
            TransferStatus::AcceptedNewNonceAssigned.public_name(),
            "accepted"
        );
    }

    #[test]
    fn public_statuses_project_to_themselves() {
        for status in [
            TransferStatus::Accepted,
            TransferStatus::Failed,
            TransferStatus::Submitted,
            TransferStatus::Reverted,
            TransferStatus::Confirmed,
        ] {
            assert_eq!(status.to_public(), status);
        }
    }

    #[test]
    fn status_ids_round_trip() {
        for status in [
            TransferStatus::Accepted,
            TransferStatus::Failed,
            TransferStatus::Submitted,
            TransferStatus::Reverted,
            TransferStatus::Confirmed,
            TransferStatus::AcceptedNewNonceAssigned,
        ] {
            assert_eq!(TransferStatus::from_id(status.id()), Some(status));
        }
        assert_eq!(TransferStatus::from_id(42), None);
    }

    #[test]
    fn terminal_statuses() {
        assert!(TransferStatus::Failed.is_terminal());
        assert!(TransferStatus::Reverted.is_terminal());
        assert!(TransferStatus::Confirmed.is_terminal());
        assert!(!TransferStatus::Accepted.is_terminal());
        assert!(!TransferStatus::Submitted.is_terminal());
        assert!(!TransferStatus::AcceptedNewNonceAssigned.is_terminal());
    }
}
