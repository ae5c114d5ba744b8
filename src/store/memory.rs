//! In-memory store implementation for tests (feature `test-utils`).
//!
//! Mirrors the Postgres semantics closely enough to exercise the transfer
//! engine, the nonce allocator, and the scheduler without a database.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::Mutex;
use uuid::Uuid;

use super::{
    BidStore, NewTransfer, StoreError, StoredBid, TaskRow, TaskStore, TransferRecord,
    TransferStatus, TransferStore,
};
use crate::amount::Amount;
use crate::chain::Blockchain;

#[derive(Debug, Clone)]
struct MemTask {
    id: Uuid,
    queue: String,
    name: String,
    payload: serde_json::Value,
    run_at: DateTime<Utc>,
    attempts: i32,
    locked_until: Option<DateTime<Utc>>,
}

#[derive(Default)]
struct Inner {
    transfers: Vec<TransferRecord>,
    next_transfer_id: i64,
    bids: HashMap<(Blockchain, Blockchain), Vec<StoredBid>>,
    tasks: Vec<MemTask>,
}

#[derive(Default)]
pub struct InMemoryStore {
    inner: Mutex<Inner>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of a transfer row for assertions.
    pub fn transfer(&self, internal_transfer_id: i64) -> Option<TransferRecord> {
        self.inner
            .lock()
            .unwrap()
            .transfers
            .iter()
            .find(|t| t.id == internal_transfer_id)
            .cloned()
    }

    pub fn transfers(&self) -> Vec<TransferRecord> {
        self.inner.lock().unwrap().transfers.clone()
    }

    /// Number of tasks currently queued.
    pub fn task_count(&self, queue: &str) -> usize {
        self.inner
            .lock()
            .unwrap()
            .tasks
            .iter()
            .filter(|t| t.queue == queue)
            .count()
    }

    pub fn tasks_named(&self, name: &str) -> Vec<serde_json::Value> {
        self.inner
            .lock()
            .unwrap()
            .tasks
            .iter()
            .filter(|t| t.name == name)
            .map(|t| t.payload.clone())
            .collect()
    }
}

#[async_trait]
impl TransferStore for InMemoryStore {
    async fn create_transfer(&self, new: NewTransfer) -> Result<i64, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        let duplicate = inner.transfers.iter().any(|t| {
            t.forwarder_address == new.forwarder_address
                && t.sender_address == new.sender_address
                && t.sender_nonce == Some(new.sender_nonce)
        });
        if duplicate {
            return Err(StoreError::SenderNonceNotUnique {
                blockchain: new.source_blockchain,
                sender_address: new.sender_address,
                sender_nonce: new.sender_nonce,
            });
        }
        inner.next_transfer_id += 1;
        let id = inner.next_transfer_id;
        inner.transfers.push(TransferRecord {
            id,
            source_blockchain: new.source_blockchain,
            destination_blockchain: new.destination_blockchain,
            sender_address: new.sender_address,
            recipient_address: new.recipient_address,
            source_token_address: new.source_token_address,
            destination_token_address: new.destination_token_address,
            amount: new.amount,
            fee: new.fee,
            sender_nonce: Some(new.sender_nonce),
            signature: new.signature,
            hub_address: new.hub_address,
            forwarder_address: new.forwarder_address,
            task_id: None,
            on_chain_transfer_id: None,
            transaction_id: None,
            nonce: None,
            status: TransferStatus::Accepted,
        });
        Ok(id)
    }

    async fn read_transfer_by_task_id(
        &self,
        task_id: Uuid,
    ) -> Result<Option<TransferRecord>, StoreError> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .transfers
            .iter()
            .find(|t| t.task_id == Some(task_id))
            .cloned())
    }

    async fn read_transfer_nonce(
        &self,
        internal_transfer_id: i64,
    ) -> Result<Option<i64>, StoreError> {
        self.inner
            .lock()
            .unwrap()
            .transfers
            .iter()
            .find(|t| t.id == internal_transfer_id)
            .map(|t| t.nonce)
            .ok_or(StoreError::UnknownTransfer(internal_transfer_id))
    }

    async fn assign_transfer_nonce(
        &self,
        internal_transfer_id: i64,
        blockchain: Blockchain,
        latest_blockchain_nonce: i64,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        let abandoned_min = inner
            .transfers
            .iter()
            .filter(|t| {
                t.source_blockchain == blockchain
                    && t.nonce.is_some()
                    && matches!(
                        t.status,
                        TransferStatus::Failed | TransferStatus::Accepted
                    )
            })
            .filter_map(|t| t.nonce)
            .min();
        let assigned = match abandoned_min {
            // Reclaim the smallest abandoned nonce and NULL it on every
            // previous holder.
            Some(min_nonce) => {
                for t in inner
                    .transfers
                    .iter_mut()
                    .filter(|t| t.source_blockchain == blockchain && t.nonce == Some(min_nonce))
                {
                    if t.id != internal_transfer_id {
                        t.nonce = None;
                        t.status = match t.status {
                            TransferStatus::Failed => TransferStatus::Failed,
                            _ => TransferStatus::Accepted,
                        };
                    }
                }
                min_nonce
            }
            // Mint a fresh nonce above everything seen so far.
            None => {
                let max_nonce = inner
                    .transfers
                    .iter()
                    .filter(|t| t.source_blockchain == blockchain)
                    .filter_map(|t| t.nonce)
                    .max();
                match max_nonce {
                    Some(max) if max >= latest_blockchain_nonce => max + 1,
                    _ => latest_blockchain_nonce,
                }
            }
        };
        let transfer = inner
            .transfers
            .iter_mut()
            .find(|t| t.id == internal_transfer_id)
            .ok_or(StoreError::UnknownTransfer(internal_transfer_id))?;
        transfer.nonce = Some(assigned);
        transfer.status = TransferStatus::AcceptedNewNonceAssigned;
        Ok(())
    }

    async fn reset_transfer_nonce(&self, internal_transfer_id: i64) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(t) = inner
            .transfers
            .iter_mut()
            .find(|t| t.id == internal_transfer_id)
        {
            t.nonce = None;
        }
        Ok(())
    }

    async fn update_transfer_status(
        &self,
        internal_transfer_id: i64,
        status: TransferStatus,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        let transfer = inner
            .transfers
            .iter_mut()
            .find(|t| t.id == internal_transfer_id)
            .ok_or(StoreError::UnknownTransfer(internal_transfer_id))?;
        transfer.status = status;
        if matches!(status, TransferStatus::Failed | TransferStatus::Reverted) {
            transfer.sender_nonce = None;
        }
        Ok(())
    }

    async fn update_transfer_task_id(
        &self,
        internal_transfer_id: i64,
        task_id: Uuid,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        let transfer = inner
            .transfers
            .iter_mut()
            .find(|t| t.id == internal_transfer_id)
            .ok_or(StoreError::UnknownTransfer(internal_transfer_id))?;
        transfer.task_id = Some(task_id);
        Ok(())
    }

    async fn update_transfer_transaction_id(
        &self,
        internal_transfer_id: i64,
        transaction_id: &str,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        let transfer = inner
            .transfers
            .iter_mut()
            .find(|t| t.id == internal_transfer_id)
            .ok_or(StoreError::UnknownTransfer(internal_transfer_id))?;
        transfer.transaction_id = Some(transaction_id.to_string());
        Ok(())
    }

    async fn update_on_chain_transfer_id(
        &self,
        internal_transfer_id: i64,
        on_chain_transfer_id: Amount,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        let transfer = inner
            .transfers
            .iter_mut()
            .find(|t| t.id == internal_transfer_id)
            .ok_or(StoreError::UnknownTransfer(internal_transfer_id))?;
        transfer.on_chain_transfer_id = Some(on_chain_transfer_id);
        Ok(())
    }
}

#[async_trait]
impl BidStore for InMemoryStore {
    async fn replace_bids(
        &self,
        source_blockchain: Blockchain,
        destination_blockchain: Blockchain,
        bids: Vec<StoredBid>,
    ) -> Result<(), StoreError> {
        self.inner
            .lock()
            .unwrap()
            .bids
            .insert((source_blockchain, destination_blockchain), bids);
        Ok(())
    }

    async fn read_bids(
        &self,
        source_blockchain: Blockchain,
        destination_blockchain: Blockchain,
    ) -> Result<Vec<StoredBid>, StoreError> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .bids
            .get(&(source_blockchain, destination_blockchain))
            .cloned()
            .unwrap_or_default())
    }
}

#[async_trait]
impl TaskStore for InMemoryStore {
    async fn enqueue_task(
        &self,
        queue: &str,
        name: &str,
        payload: serde_json::Value,
        delay: Duration,
    ) -> Result<Uuid, StoreError> {
        let id = Uuid::new_v4();
        self.inner.lock().unwrap().tasks.push(MemTask {
            id,
            queue: queue.to_string(),
            name: name.to_string(),
            payload,
            run_at: Utc::now() + delay,
            attempts: 0,
            locked_until: None,
        });
        Ok(id)
    }

    async fn claim_due_task(
        &self,
        queue: &str,
        lease: Duration,
        now: DateTime<Utc>,
    ) -> Result<Option<TaskRow>, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        let candidate = inner
            .tasks
            .iter_mut()
            .filter(|t| {
                t.queue == queue
                    && t.run_at <= now
                    && t.locked_until.is_none_or(|until| until <= now)
            })
            .min_by_key(|t| t.run_at);
        Ok(candidate.map(|t| {
            t.locked_until = Some(now + lease);
            TaskRow {
                id: t.id,
                queue: t.queue.clone(),
                name: t.name.clone(),
                payload: t.payload.clone(),
                attempts: t.attempts,
            }
        }))
    }

    async fn complete_task(&self, id: Uuid) -> Result<(), StoreError> {
        self.inner.lock().unwrap().tasks.retain(|t| t.id != id);
        Ok(())
    }

    async fn retry_task(&self, id: Uuid, countdown: Duration) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(t) = inner.tasks.iter_mut().find(|t| t.id == id) {
            t.run_at = Utc::now() + countdown;
            t.attempts += 1;
            t.locked_until = None;
        }
        Ok(())
    }

    async fn purge_queue(&self, queue: &str) -> Result<u64, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        let before = inner.tasks.len();
        inner.tasks.retain(|t| t.queue != queue);
        Ok((before - inner.tasks.len()) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_transfer(sender_nonce: u64) -> NewTransfer {
        NewTransfer {
            source_blockchain: Blockchain::Ethereum,
            destination_blockchain: Blockchain::BnbChain,
            sender_address: "0x60ae6a7c1e7a0f".to_string(),
            recipient_address: "0xf39fd6e51aad88".to_string(),
            source_token_address: "0x5fbdb2315678af".to_string(),
            destination_token_address: "0xe7f1725e7734ce".to_string(),
            amount: Amount::from(5),
            fee: Amount::from(500_000),
            sender_nonce: Amount::from(sender_nonce),
            signature: "00aa".to_string(),
            hub_address: "0xhub".to_string(),
            forwarder_address: "0xforwarder".to_string(),
        }
    }

    async fn create_with_nonce(
        store: &InMemoryStore,
        sender_nonce: u64,
        blockchain_nonce: Option<i64>,
        status: TransferStatus,
    ) -> i64 {
        let id = store.create_transfer(new_transfer(sender_nonce)).await.unwrap();
        if let Some(nonce) = blockchain_nonce {
            let mut inner = store.inner.lock().unwrap();
            let t = inner.transfers.iter_mut().find(|t| t.id == id).unwrap();
            t.nonce = Some(nonce);
        }
        if status != TransferStatus::Accepted {
            store.update_transfer_status(id, status).await.unwrap();
        }
        id
    }

    #[tokio::test]
    async fn fresh_nonce_follows_the_chain_when_store_is_behind() {
        let store = InMemoryStore::new();
        let id = store.create_transfer(new_transfer(1)).await.unwrap();
        store
            .assign_transfer_nonce(id, Blockchain::Ethereum, 7)
            .await
            .unwrap();
        let transfer = store.transfer(id).unwrap();
        assert_eq!(transfer.nonce, Some(7));
        assert_eq!(transfer.status, TransferStatus::AcceptedNewNonceAssigned);
    }

    #[tokio::test]
    async fn fresh_nonce_continues_above_the_stored_maximum() {
        let store = InMemoryStore::new();
        create_with_nonce(&store, 1, Some(9), TransferStatus::Confirmed).await;
        let id = store.create_transfer(new_transfer(2)).await.unwrap();
        store
            .assign_transfer_nonce(id, Blockchain::Ethereum, 5)
            .await
            .unwrap();
        assert_eq!(store.transfer(id).unwrap().nonce, Some(10));
    }

    #[tokio::test]
    async fn abandoned_nonce_is_reclaimed_and_nulled_on_previous_holder() {
        // T1..T3 confirmed with nonces 0..2, T4 failed holding nonce 3. A new
        // transfer reclaims 3 and T4's nonce becomes NULL.
        let store = InMemoryStore::new();
        for (sender_nonce, nonce) in [(1, 0), (2, 1), (3, 2)] {
            create_with_nonce(&store, sender_nonce, Some(nonce), TransferStatus::Confirmed).await;
        }
        let failed = create_with_nonce(&store, 4, Some(3), TransferStatus::Failed).await;
        let id = store.create_transfer(new_transfer(5)).await.unwrap();
        store
            .assign_transfer_nonce(id, Blockchain::Ethereum, 4)
            .await
            .unwrap();

        assert_eq!(store.transfer(id).unwrap().nonce, Some(3));
        let failed_transfer = store.transfer(failed).unwrap();
        assert_eq!(failed_transfer.nonce, None);
        assert_eq!(failed_transfer.status, TransferStatus::Failed);
    }

    #[tokio::test]
    async fn reclaiming_from_an_accepted_holder_keeps_it_accepted() {
        let store = InMemoryStore::new();
        let holder = create_with_nonce(&store, 1, Some(5), TransferStatus::Accepted).await;
        let id = store.create_transfer(new_transfer(2)).await.unwrap();
        store
            .assign_transfer_nonce(id, Blockchain::Ethereum, 6)
            .await
            .unwrap();
        assert_eq!(store.transfer(id).unwrap().nonce, Some(5));
        let holder_transfer = store.transfer(holder).unwrap();
        assert_eq!(holder_transfer.nonce, None);
        assert_eq!(holder_transfer.status, TransferStatus::Accepted);
    }

    #[tokio::test]
    async fn nonce_assignment_is_idempotent() {
        let store = InMemoryStore::new();
        create_with_nonce(&store, 1, Some(3), TransferStatus::Failed).await;
        let id = store.create_transfer(new_transfer(2)).await.unwrap();
        store
            .assign_transfer_nonce(id, Blockchain::Ethereum, 4)
            .await
            .unwrap();
        let first = store.transfers();
        store
            .assign_transfer_nonce(id, Blockchain::Ethereum, 4)
            .await
            .unwrap();
        let second = store.transfers();
        for (a, b) in first.iter().zip(second.iter()) {
            assert_eq!(a.nonce, b.nonce);
            assert_eq!(a.status, b.status);
        }
    }

    #[tokio::test]
    async fn at_most_one_active_holder_per_nonce() {
        let store = InMemoryStore::new();
        create_with_nonce(&store, 1, Some(0), TransferStatus::Failed).await;
        create_with_nonce(&store, 2, Some(1), TransferStatus::Failed).await;
        let a = store.create_transfer(new_transfer(3)).await.unwrap();
        let b = store.create_transfer(new_transfer(4)).await.unwrap();
        store
            .assign_transfer_nonce(a, Blockchain::Ethereum, 2)
            .await
            .unwrap();
        store
            .assign_transfer_nonce(b, Blockchain::Ethereum, 2)
            .await
            .unwrap();
        let mut held: Vec<i64> = store
            .transfers()
            .iter()
            .filter(|t| !t.status.is_terminal())
            .filter_map(|t| t.nonce)
            .collect();
        held.sort();
        let mut deduped = held.clone();
        deduped.dedup();
        assert_eq!(held, deduped);
    }

    #[tokio::test]
    async fn duplicate_sender_nonce_is_rejected_until_terminal_failure() {
        let store = InMemoryStore::new();
        let id = store.create_transfer(new_transfer(22222)).await.unwrap();
        let error = store.create_transfer(new_transfer(22222)).await.unwrap_err();
        assert!(matches!(error, StoreError::SenderNonceNotUnique { .. }));

        // Terminal failure releases the sender nonce.
        store
            .update_transfer_status(id, TransferStatus::Failed)
            .await
            .unwrap();
        assert_eq!(store.transfer(id).unwrap().sender_nonce, None);
        store.create_transfer(new_transfer(22222)).await.unwrap();
    }

    #[tokio::test]
    async fn replace_bids_swaps_the_whole_pair_set() {
        let store = InMemoryStore::new();
        let pair = (Blockchain::Ethereum, Blockchain::BnbChain);
        store
            .replace_bids(
                pair.0,
                pair.1,
                vec![StoredBid {
                    execution_time: 600,
                    valid_until: 100,
                    fee: Amount::from(1),
                }],
            )
            .await
            .unwrap();
        let replacement = vec![
            StoredBid {
                execution_time: 700,
                valid_until: 200,
                fee: Amount::from(2),
            },
            StoredBid {
                execution_time: 800,
                valid_until: 200,
                fee: Amount::from(3),
            },
        ];
        store
            .replace_bids(pair.0, pair.1, replacement.clone())
            .await
            .unwrap();
        assert_eq!(store.read_bids(pair.0, pair.1).await.unwrap(), replacement);
    }

    #[tokio::test]
    async fn claimed_tasks_are_leased() {
        let store = InMemoryStore::new();
        store
            .enqueue_task("transfers", "noop", serde_json::json!({}), Duration::zero())
            .await
            .unwrap();
        let now = Utc::now();
        let claimed = store
            .claim_due_task("transfers", Duration::seconds(60), now)
            .await
            .unwrap();
        assert!(claimed.is_some());
        let second = store
            .claim_due_task("transfers", Duration::seconds(60), now)
            .await
            .unwrap();
        assert!(second.is_none());
    }
}
