//! Periodic bid recomputation.
//!
//! One task per source chain asks the bid strategy for fresh quotes against
//! every destination chain, composes validator fees for cross-chain pairs,
//! atomically replaces the stored bid set, and re-schedules itself with the
//! strategy-returned delay. Strategy and store failures are logged, never
//! fatal: the tick always reschedules.

use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::amount::Amount;
use crate::chain::{Blockchain, ChainClient};
use crate::context::Context;
use crate::plugins::Bid;
use crate::scheduler::{self, BIDS_QUEUE, TaskError, TaskOutcome, TaskRegistry};
use crate::store::{BidStore as _, StoredBid};

pub const EXECUTE_BID_PLUGIN_TASK: &str = "execute_bid_plugin";

/// Delay used when the strategy fails to provide one.
const DEFAULT_DELAY: u64 = 60;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecuteBidPluginTask {
    pub source_blockchain: Blockchain,
}

/// Composes the validator fee into a bid fee:
/// `round(fee × (source + destination) / source)`, with exact ties rounding
/// half to even.
pub fn compose_validator_fee(
    fee: Amount,
    source_factor: u64,
    destination_factor: u64,
) -> Amount {
    use alloy_primitives::U256;

    let fee: U256 = fee.into();
    let source = U256::from(source_factor.max(1));
    let total = source + U256::from(destination_factor);
    let product = fee * total;
    let quotient = product / source;
    let twice_remainder = (product % source) * U256::from(2);
    let round_up = twice_remainder > source
        || (twice_remainder == source && quotient % U256::from(2) == U256::from(1));
    Amount(if round_up {
        quotient + U256::from(1)
    } else {
        quotient
    })
}

/// Recomputes the bids offered from `source_blockchain` and returns the
/// delay in seconds until the next tick.
pub async fn replace_bids(ctx: &Context, source_blockchain: Blockchain) -> u64 {
    let arguments = &ctx.config.plugins.bids.arguments;
    let Some(source_client) = ctx.client(source_blockchain) else {
        tracing::error!(%source_blockchain, "no chain client for bid recomputation");
        return DEFAULT_DELAY;
    };
    let source_factor = match source_client.get_validator_fee_factor(source_blockchain).await {
        Ok(factor) => factor,
        Err(e) => {
            tracing::error!(%source_blockchain, error = %e, "unable to read the validator fee factor");
            return DEFAULT_DELAY;
        }
    };

    let mut delay = DEFAULT_DELAY;
    for destination_blockchain in Blockchain::ALL {
        tracing::debug!(%source_blockchain, %destination_blockchain, "executing the bid strategy");
        match recompute_pair(
            ctx,
            source_client,
            source_blockchain,
            destination_blockchain,
            source_factor,
            arguments,
        )
        .await
        {
            Ok(pair_delay) => delay = pair_delay,
            Err(PairError::Plugin(e)) => {
                tracing::debug!(
                    %source_blockchain,
                    %destination_blockchain,
                    error = %e,
                    "bid strategy provided no bids"
                );
            }
            Err(PairError::Other(e)) => {
                tracing::error!(
                    %source_blockchain,
                    %destination_blockchain,
                    error = %e,
                    "unable to replace the bids"
                );
            }
        }
    }
    delay
}

enum PairError {
    Plugin(crate::plugins::BidPluginError),
    Other(String),
}

async fn recompute_pair(
    ctx: &Context,
    source_client: &Arc<dyn ChainClient>,
    source_blockchain: Blockchain,
    destination_blockchain: Blockchain,
    source_factor: u64,
    arguments: &serde_json::Value,
) -> Result<u64, PairError> {
    // Both factors are read from the source hub.
    let destination_factor = source_client
        .get_validator_fee_factor(destination_blockchain)
        .await
        .map_err(|e| PairError::Other(e.to_string()))?;
    let (mut bids, delay) = ctx
        .bid_plugin
        .get_bids(source_blockchain, destination_blockchain, arguments)
        .await
        .map_err(PairError::Plugin)?;
    if source_blockchain != destination_blockchain {
        for bid in &mut bids {
            bid.fee = compose_validator_fee(bid.fee, source_factor, destination_factor);
        }
    }
    tracing::debug!(
        %source_blockchain,
        %destination_blockchain,
        count = bids.len(),
        "storing recomputed bids"
    );
    let stored = bids.iter().map(stored_bid).collect();
    ctx.bids
        .replace_bids(source_blockchain, destination_blockchain, stored)
        .await
        .map_err(|e| PairError::Other(e.to_string()))?;
    Ok(delay)
}

fn stored_bid(bid: &Bid) -> StoredBid {
    StoredBid {
        execution_time: bid.execution_time,
        valid_until: bid.valid_until,
        fee: bid.fee,
    }
}

/// Task handler: recompute, then re-schedule the next tick for this source
/// chain unless it has been deactivated.
pub async fn handle_execute_bid_plugin(
    ctx: Arc<Context>,
    payload: serde_json::Value,
) -> Result<TaskOutcome, TaskError> {
    let task: ExecuteBidPluginTask = serde_json::from_value(payload)?;
    let source_blockchain = task.source_blockchain;
    let delay = replace_bids(&ctx, source_blockchain).await;

    let chain_config = ctx.config.blockchain(source_blockchain);
    let still_offering = chain_config.map(|c| c.active && c.registered).unwrap_or(false);
    if !still_offering {
        tracing::warn!(%source_blockchain, "chain no longer active and registered, stopping bid recomputation");
        return Ok(TaskOutcome::Done);
    }
    scheduler::enqueue(
        &ctx.tasks,
        BIDS_QUEUE,
        EXECUTE_BID_PLUGIN_TASK,
        &ExecuteBidPluginTask { source_blockchain },
        Duration::seconds(delay as i64),
    )
    .await?;
    Ok(TaskOutcome::Done)
}

pub fn register_tasks(registry: &mut TaskRegistry) {
    registry.register(
        EXECUTE_BID_PLUGIN_TASK,
        BIDS_QUEUE,
        None,
        Arc::new(|ctx, payload| Box::pin(handle_execute_bid_plugin(ctx, payload))),
    );
}

/// Enqueues the first tick for every chain that offers bids.
pub async fn seed_bid_tasks(ctx: &Arc<Context>) -> Result<(), TaskError> {
    for (blockchain, chain_config) in ctx.config.blockchains.iter() {
        if !chain_config.active || !chain_config.registered {
            continue;
        }
        scheduler::enqueue(
            &ctx.tasks,
            BIDS_QUEUE,
            EXECUTE_BID_PLUGIN_TASK,
            &ExecuteBidPluginTask {
                source_blockchain: *blockchain,
            },
            Duration::zero(),
        )
        .await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::mock::MockChainClient;
    use crate::context::testing::{StaticBidPlugin, context};
    use crate::store::BidStore;
    use crate::store::memory::InMemoryStore;
    use std::collections::HashMap;

    #[test]
    fn validator_fee_composition_scales_by_the_factor_sum() {
        // round(100 × (2 + 4) / 2) = 300
        assert_eq!(compose_validator_fee(Amount::from(100), 2, 4), Amount::from(300));
        // round(100 × 7 / 3) = round(233.33) = 233
        assert_eq!(compose_validator_fee(Amount::from(100), 3, 4), Amount::from(233));
    }

    #[test]
    fn validator_fee_composition_rounds_ties_to_even() {
        // round(1 × 5 / 2) = round(2.5) = 2, not 3
        assert_eq!(compose_validator_fee(Amount::from(1), 2, 3), Amount::from(2));
        // round(5 × 3 / 2) = round(7.5) = 8
        assert_eq!(compose_validator_fee(Amount::from(5), 2, 1), Amount::from(8));
    }

    fn bid(source: Blockchain, destination: Blockchain, fee: u64) -> Bid {
        Bid {
            source_blockchain: source,
            destination_blockchain: destination,
            fee: Amount::from(fee),
            execution_time: 600,
            valid_until: 2_000_000_000,
        }
    }

    fn engine_ctx(
        plugin: StaticBidPlugin,
        source_factor: u64,
        destination_factor: u64,
    ) -> (Arc<Context>, Arc<InMemoryStore>) {
        let store = Arc::new(InMemoryStore::new());
        let client = MockChainClient::new(Blockchain::Ethereum)
            .with_fee_factor(Blockchain::Ethereum, source_factor)
            .with_fee_factor(Blockchain::BnbChain, destination_factor);
        let mut clients: HashMap<Blockchain, Arc<dyn crate::chain::ChainClient>> = HashMap::new();
        clients.insert(Blockchain::Ethereum, Arc::new(client));
        let ctx = context(Arc::clone(&store), clients, Arc::new(plugin));
        (ctx, store)
    }

    #[tokio::test]
    async fn cross_chain_bids_carry_the_validator_fee() {
        let plugin = StaticBidPlugin::accepting().with_bids(vec![bid(
            Blockchain::Ethereum,
            Blockchain::BnbChain,
            100,
        )]);
        let (ctx, store) = engine_ctx(plugin, 2, 4);

        let delay = replace_bids(&ctx, Blockchain::Ethereum).await;
        assert_eq!(delay, 60);
        let stored = store
            .read_bids(Blockchain::Ethereum, Blockchain::BnbChain)
            .await
            .unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].fee, Amount::from(300));
    }

    #[tokio::test]
    async fn same_chain_bids_are_not_adjusted() {
        let plugin = StaticBidPlugin::accepting().with_bids(vec![bid(
            Blockchain::Ethereum,
            Blockchain::Ethereum,
            100,
        )]);
        let (ctx, store) = engine_ctx(plugin, 2, 4);

        replace_bids(&ctx, Blockchain::Ethereum).await;
        let stored = store
            .read_bids(Blockchain::Ethereum, Blockchain::Ethereum)
            .await
            .unwrap();
        assert_eq!(stored[0].fee, Amount::from(100));
    }

    #[tokio::test]
    async fn strategy_failure_leaves_old_bids_and_uses_the_default_delay() {
        let store = Arc::new(InMemoryStore::new());
        store
            .replace_bids(
                Blockchain::Ethereum,
                Blockchain::BnbChain,
                vec![crate::store::StoredBid {
                    execution_time: 600,
                    valid_until: 1,
                    fee: Amount::from(9),
                }],
            )
            .await
            .unwrap();
        let client = MockChainClient::new(Blockchain::Ethereum);
        let mut clients: HashMap<Blockchain, Arc<dyn crate::chain::ChainClient>> = HashMap::new();
        clients.insert(Blockchain::Ethereum, Arc::new(client));
        let ctx = context(
            Arc::clone(&store),
            clients,
            Arc::new(StaticBidPlugin::failing("no bids available")),
        );

        let delay = replace_bids(&ctx, Blockchain::Ethereum).await;
        assert_eq!(delay, 60);
        let stored = store
            .read_bids(Blockchain::Ethereum, Blockchain::BnbChain)
            .await
            .unwrap();
        assert_eq!(stored[0].fee, Amount::from(9));
    }

    #[tokio::test]
    async fn tick_reschedules_itself_for_an_offering_chain() {
        let plugin = StaticBidPlugin::accepting();
        let (ctx, store) = engine_ctx(plugin, 1, 1);
        let payload = serde_json::to_value(ExecuteBidPluginTask {
            source_blockchain: Blockchain::Ethereum,
        })
        .unwrap();

        let outcome = handle_execute_bid_plugin(Arc::clone(&ctx), payload).await.unwrap();
        assert!(matches!(outcome, TaskOutcome::Done));
        assert_eq!(store.tasks_named(EXECUTE_BID_PLUGIN_TASK).len(), 1);
    }

    #[tokio::test]
    async fn tick_stops_for_a_chain_without_bid_offering() {
        let plugin = StaticBidPlugin::accepting();
        let (ctx, store) = engine_ctx(plugin, 1, 1);
        // Solana is configured inactive in the test config.
        let payload = serde_json::to_value(ExecuteBidPluginTask {
            source_blockchain: Blockchain::Solana,
        })
        .unwrap();

        handle_execute_bid_plugin(Arc::clone(&ctx), payload).await.unwrap();
        assert!(store.tasks_named(EXECUTE_BID_PLUGIN_TASK).is_empty());
    }

    #[tokio::test]
    async fn seeding_enqueues_one_tick_per_offering_chain() {
        let plugin = StaticBidPlugin::accepting();
        let (ctx, store) = engine_ctx(plugin, 1, 1);
        seed_bid_tasks(&ctx).await.unwrap();
        // ethereum and bnb_chain are active and registered in the test config.
        assert_eq!(store.tasks_named(EXECUTE_BID_PLUGIN_TASK).len(), 2);
    }
}
