//! Postgres implementation of the store traits.
//!
//! Numeric 256-bit columns are `NUMERIC(78, 0)` bound and read as canonical
//! decimal text. The nonce allocator is one atomic UPDATE; the
//! `(source_blockchain, nonce, status)` uniqueness constraint is declared
//! deferrable so the nonce can move between two rows within the statement.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sqlx::Row;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use uuid::Uuid;

use super::{
    BidStore, NewTransfer, StoreError, StoredBid, TaskRow, TaskStore, TransferRecord,
    TransferStatus, TransferStore,
};
use crate::amount::Amount;
use crate::chain::Blockchain;
use crate::config::DatabaseConfig;

/// Name of the unique sender nonce constraint, used to map the duplicate-key
/// error at intake.
pub const UNIQUE_SENDER_NONCE_CONSTRAINT: &str = "unique_sender_nonce";

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Connects the pool and optionally applies pending migrations.
    pub async fn connect(config: &DatabaseConfig) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.pool_size + config.max_overflow)
            .connect(config.url.as_str())
            .await?;
        if config.apply_migrations {
            sqlx::migrate!("./migrations")
                .run(&pool)
                .await
                .map_err(|e| StoreError::Other(format!("migration failed: {e}")))?;
        }
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Returns the row ID of the contract, inserting it on first reference.
    ///
    /// Concurrent first references may race; `ON CONFLICT DO NOTHING`
    /// tolerates the duplicate key and the second read picks up the winner's
    /// row.
    async fn get_or_create_contract(
        &self,
        table: &str,
        blockchain: Blockchain,
        address: &str,
    ) -> Result<i64, StoreError> {
        let select = format!("SELECT id FROM {table} WHERE blockchain_id = $1 AND address = $2");
        if let Some(row) = sqlx::query(&select)
            .bind(blockchain.id())
            .bind(address)
            .fetch_optional(&self.pool)
            .await?
        {
            return Ok(row.try_get::<i64, _>("id")?);
        }
        let insert = format!(
            "INSERT INTO {table} (blockchain_id, address) VALUES ($1, $2) \
             ON CONFLICT DO NOTHING RETURNING id"
        );
        if let Some(row) = sqlx::query(&insert)
            .bind(blockchain.id())
            .bind(address)
            .fetch_optional(&self.pool)
            .await?
        {
            return Ok(row.try_get::<i64, _>("id")?);
        }
        let row = sqlx::query(&select)
            .bind(blockchain.id())
            .bind(address)
            .fetch_one(&self.pool)
            .await?;
        Ok(row.try_get::<i64, _>("id")?)
    }
}

fn amount_from_column(row: &PgRow, column: &str) -> Result<Amount, StoreError> {
    let text: String = row.try_get(column)?;
    text.parse()
        .map_err(|e| StoreError::Other(format!("column {column}: {e}")))
}

fn optional_amount_from_column(row: &PgRow, column: &str) -> Result<Option<Amount>, StoreError> {
    let text: Option<String> = row.try_get(column)?;
    text.map(|t| {
        t.parse()
            .map_err(|e| StoreError::Other(format!("column {column}: {e}")))
    })
    .transpose()
}

fn transfer_from_row(row: &PgRow) -> Result<TransferRecord, StoreError> {
    let source_blockchain_id: i32 = row.try_get("source_blockchain_id")?;
    let destination_blockchain_id: i32 = row.try_get("destination_blockchain_id")?;
    let status_id: i32 = row.try_get("status_id")?;
    Ok(TransferRecord {
        id: row.try_get("id")?,
        source_blockchain: Blockchain::from_id(source_blockchain_id)
            .ok_or_else(|| StoreError::Other(format!("unknown blockchain {source_blockchain_id}")))?,
        destination_blockchain: Blockchain::from_id(destination_blockchain_id).ok_or_else(
            || StoreError::Other(format!("unknown blockchain {destination_blockchain_id}")),
        )?,
        sender_address: row.try_get("sender_address")?,
        recipient_address: row.try_get("recipient_address")?,
        source_token_address: row.try_get("source_token_address")?,
        destination_token_address: row.try_get("destination_token_address")?,
        amount: amount_from_column(row, "amount")?,
        fee: amount_from_column(row, "fee")?,
        sender_nonce: optional_amount_from_column(row, "sender_nonce")?,
        signature: row.try_get("signature")?,
        hub_address: row.try_get("hub_address")?,
        forwarder_address: row.try_get("forwarder_address")?,
        task_id: row.try_get("task_id")?,
        on_chain_transfer_id: optional_amount_from_column(row, "on_chain_transfer_id")?,
        transaction_id: row.try_get("transaction_id")?,
        nonce: row.try_get("nonce")?,
        status: TransferStatus::from_id(status_id)
            .ok_or_else(|| StoreError::Other(format!("unknown transfer status {status_id}")))?,
    })
}

#[async_trait]
impl TransferStore for PgStore {
    async fn create_transfer(&self, new: NewTransfer) -> Result<i64, StoreError> {
        let source_token_id = self
            .get_or_create_contract(
                "token_contracts",
                new.source_blockchain,
                &new.source_token_address,
            )
            .await?;
        let destination_token_id = self
            .get_or_create_contract(
                "token_contracts",
                new.destination_blockchain,
                &new.destination_token_address,
            )
            .await?;
        let hub_id = self
            .get_or_create_contract("hub_contracts", new.source_blockchain, &new.hub_address)
            .await?;
        let forwarder_id = self
            .get_or_create_contract(
                "forwarder_contracts",
                new.source_blockchain,
                &new.forwarder_address,
            )
            .await?;

        let result = sqlx::query(
            "INSERT INTO transfers (source_blockchain_id, destination_blockchain_id, \
             sender_address, recipient_address, source_token_contract_id, \
             destination_token_contract_id, amount, fee, sender_nonce, signature, \
             hub_contract_id, forwarder_contract_id, status_id) \
             VALUES ($1, $2, $3, $4, $5, $6, $7::numeric, $8::numeric, $9::numeric, $10, \
             $11, $12, $13) RETURNING id",
        )
        .bind(new.source_blockchain.id())
        .bind(new.destination_blockchain.id())
        .bind(&new.sender_address)
        .bind(&new.recipient_address)
        .bind(source_token_id)
        .bind(destination_token_id)
        .bind(new.amount.to_string())
        .bind(new.fee.to_string())
        .bind(new.sender_nonce.to_string())
        .bind(&new.signature)
        .bind(hub_id)
        .bind(forwarder_id)
        .bind(TransferStatus::Accepted.id())
        .fetch_one(&self.pool)
        .await;

        match result {
            Ok(row) => Ok(row.try_get::<i64, _>("id")?),
            Err(sqlx::Error::Database(db_error))
                if db_error.constraint() == Some(UNIQUE_SENDER_NONCE_CONSTRAINT) =>
            {
                Err(StoreError::SenderNonceNotUnique {
                    blockchain: new.source_blockchain,
                    sender_address: new.sender_address,
                    sender_nonce: new.sender_nonce,
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn read_transfer_by_task_id(
        &self,
        task_id: Uuid,
    ) -> Result<Option<TransferRecord>, StoreError> {
        let row = sqlx::query(
            "SELECT t.id, t.source_blockchain_id, t.destination_blockchain_id, \
             t.sender_address, t.recipient_address, \
             st.address AS source_token_address, dt.address AS destination_token_address, \
             t.amount::TEXT AS amount, t.fee::TEXT AS fee, \
             t.sender_nonce::TEXT AS sender_nonce, t.signature, \
             h.address AS hub_address, f.address AS forwarder_address, \
             t.task_id, t.on_chain_transfer_id::TEXT AS on_chain_transfer_id, \
             t.transaction_id, t.nonce, t.status_id \
             FROM transfers t \
             JOIN token_contracts st ON st.id = t.source_token_contract_id \
             JOIN token_contracts dt ON dt.id = t.destination_token_contract_id \
             JOIN hub_contracts h ON h.id = t.hub_contract_id \
             JOIN forwarder_contracts f ON f.id = t.forwarder_contract_id \
             WHERE t.task_id = $1",
        )
        .bind(task_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(|r| transfer_from_row(&r)).transpose()
    }

    async fn read_transfer_nonce(
        &self,
        internal_transfer_id: i64,
    ) -> Result<Option<i64>, StoreError> {
        let row = sqlx::query("SELECT nonce FROM transfers WHERE id = $1")
            .bind(internal_transfer_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(StoreError::UnknownTransfer(internal_transfer_id))?;
        Ok(row.try_get("nonce")?)
    }

    async fn assign_transfer_nonce(
        &self,
        internal_transfer_id: i64,
        blockchain: Blockchain,
        latest_blockchain_nonce: i64,
    ) -> Result<(), StoreError> {
        // One statement; the deferred uniqueness constraint is checked at
        // commit, after both rows have been updated.
        sqlx::query(
            "WITH abandoned AS ( \
                 SELECT count(*) AS cnt, min(nonce) AS min_nonce \
                 FROM transfers \
                 WHERE source_blockchain_id = $2 \
                   AND nonce IS NOT NULL \
                   AND status_id IN ($4, $5) \
             ), highest AS ( \
                 SELECT max(nonce) AS max_nonce \
                 FROM transfers \
                 WHERE source_blockchain_id = $2 \
             ) \
             UPDATE transfers AS t \
             SET nonce = CASE \
                     WHEN (SELECT cnt FROM abandoned) = 0 THEN \
                         CASE WHEN (SELECT max_nonce FROM highest) >= $3 \
                              THEN (SELECT max_nonce FROM highest) + 1 \
                              ELSE $3 \
                         END \
                     WHEN t.id = $1 THEN (SELECT min_nonce FROM abandoned) \
                     ELSE NULL \
                 END, \
                 status_id = CASE \
                     WHEN t.id = $1 THEN $6 \
                     WHEN t.status_id = $5 THEN $5 \
                     ELSE $4 \
                 END, \
                 updated = now() \
             WHERE t.id = $1 \
                OR (t.source_blockchain_id = $2 \
                    AND t.nonce = (SELECT min_nonce FROM abandoned))",
        )
        .bind(internal_transfer_id)
        .bind(blockchain.id())
        .bind(latest_blockchain_nonce)
        .bind(TransferStatus::Accepted.id())
        .bind(TransferStatus::Failed.id())
        .bind(TransferStatus::AcceptedNewNonceAssigned.id())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn reset_transfer_nonce(&self, internal_transfer_id: i64) -> Result<(), StoreError> {
        sqlx::query("UPDATE transfers SET nonce = NULL, updated = now() WHERE id = $1")
            .bind(internal_transfer_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn update_transfer_status(
        &self,
        internal_transfer_id: i64,
        status: TransferStatus,
    ) -> Result<(), StoreError> {
        // A failed or reverted transfer releases its sender nonce for reuse.
        let clear_sender_nonce =
            matches!(status, TransferStatus::Failed | TransferStatus::Reverted);
        let result = if clear_sender_nonce {
            sqlx::query(
                "UPDATE transfers SET status_id = $2, sender_nonce = NULL, updated = now() \
                 WHERE id = $1",
            )
            .bind(internal_transfer_id)
            .bind(status.id())
            .execute(&self.pool)
            .await?
        } else {
            sqlx::query("UPDATE transfers SET status_id = $2, updated = now() WHERE id = $1")
                .bind(internal_transfer_id)
                .bind(status.id())
                .execute(&self.pool)
                .await?
        };
        if result.rows_affected() == 0 {
            return Err(StoreError::UnknownTransfer(internal_transfer_id));
        }
        Ok(())
    }

    async fn update_transfer_task_id(
        &self,
        internal_transfer_id: i64,
        task_id: Uuid,
    ) -> Result<(), StoreError> {
        let result = sqlx::query("UPDATE transfers SET task_id = $2, updated = now() WHERE id = $1")
            .bind(internal_transfer_id)
            .bind(task_id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::UnknownTransfer(internal_transfer_id));
        }
        Ok(())
    }

    async fn update_transfer_transaction_id(
        &self,
        internal_transfer_id: i64,
        transaction_id: &str,
    ) -> Result<(), StoreError> {
        let result =
            sqlx::query("UPDATE transfers SET transaction_id = $2, updated = now() WHERE id = $1")
                .bind(internal_transfer_id)
                .bind(transaction_id)
                .execute(&self.pool)
                .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::UnknownTransfer(internal_transfer_id));
        }
        Ok(())
    }

    async fn update_on_chain_transfer_id(
        &self,
        internal_transfer_id: i64,
        on_chain_transfer_id: Amount,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE transfers SET on_chain_transfer_id = $2::numeric, updated = now() \
             WHERE id = $1",
        )
        .bind(internal_transfer_id)
        .bind(on_chain_transfer_id.to_string())
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::UnknownTransfer(internal_transfer_id));
        }
        Ok(())
    }
}

#[async_trait]
impl BidStore for PgStore {
    async fn replace_bids(
        &self,
        source_blockchain: Blockchain,
        destination_blockchain: Blockchain,
        bids: Vec<StoredBid>,
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            "DELETE FROM bids \
             WHERE source_blockchain_id = $1 AND destination_blockchain_id = $2",
        )
        .bind(source_blockchain.id())
        .bind(destination_blockchain.id())
        .execute(&mut *tx)
        .await?;
        for bid in &bids {
            sqlx::query(
                "INSERT INTO bids (source_blockchain_id, destination_blockchain_id, \
                 execution_time, valid_until, fee) VALUES ($1, $2, $3, $4, $5::numeric)",
            )
            .bind(source_blockchain.id())
            .bind(destination_blockchain.id())
            .bind(bid.execution_time as i64)
            .bind(bid.valid_until as i64)
            .bind(bid.fee.to_string())
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn read_bids(
        &self,
        source_blockchain: Blockchain,
        destination_blockchain: Blockchain,
    ) -> Result<Vec<StoredBid>, StoreError> {
        let rows = sqlx::query(
            "SELECT execution_time, valid_until, fee::TEXT AS fee FROM bids \
             WHERE source_blockchain_id = $1 AND destination_blockchain_id = $2 \
             ORDER BY execution_time",
        )
        .bind(source_blockchain.id())
        .bind(destination_blockchain.id())
        .fetch_all(&self.pool)
        .await?;
        rows.iter()
            .map(|row| {
                Ok(StoredBid {
                    execution_time: row.try_get::<i64, _>("execution_time")? as u64,
                    valid_until: row.try_get::<i64, _>("valid_until")? as u64,
                    fee: amount_from_column(row, "fee")?,
                })
            })
            .collect()
    }
}

#[async_trait]
impl TaskStore for PgStore {
    async fn enqueue_task(
        &self,
        queue: &str,
        name: &str,
        payload: serde_json::Value,
        delay: Duration,
    ) -> Result<Uuid, StoreError> {
        let id = Uuid::new_v4();
        sqlx::query(
            "INSERT INTO tasks (id, queue, name, payload, run_at) VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(id)
        .bind(queue)
        .bind(name)
        .bind(payload)
        .bind(Utc::now() + delay)
        .execute(&self.pool)
        .await?;
        Ok(id)
    }

    async fn claim_due_task(
        &self,
        queue: &str,
        lease: Duration,
        now: DateTime<Utc>,
    ) -> Result<Option<TaskRow>, StoreError> {
        let row = sqlx::query(
            "UPDATE tasks SET locked_until = $3 \
             WHERE id = ( \
                 SELECT id FROM tasks \
                 WHERE queue = $1 AND run_at <= $2 \
                   AND (locked_until IS NULL OR locked_until <= $2) \
                 ORDER BY run_at \
                 LIMIT 1 \
                 FOR UPDATE SKIP LOCKED \
             ) \
             RETURNING id, queue, name, payload, attempts",
        )
        .bind(queue)
        .bind(now)
        .bind(now + lease)
        .fetch_optional(&self.pool)
        .await?;
        row.map(|r| {
            Ok(TaskRow {
                id: r.try_get("id")?,
                queue: r.try_get("queue")?,
                name: r.try_get("name")?,
                payload: r.try_get("payload")?,
                attempts: r.try_get("attempts")?,
            })
        })
        .transpose()
    }

    async fn complete_task(&self, id: Uuid) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM tasks WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn retry_task(&self, id: Uuid, countdown: Duration) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE tasks SET run_at = $2, attempts = attempts + 1, locked_until = NULL \
             WHERE id = $1",
        )
        .bind(id)
        .bind(Utc::now() + countdown)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn purge_queue(&self, queue: &str) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM tasks WHERE queue = $1")
            .bind(queue)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}
