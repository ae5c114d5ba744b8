//! Service-node bids.
//!
//! Outbound: `GET /bids` reads the stored bid set for a chain pair and signs
//! each bid over the canonical message at read time. Inbound: a transfer
//! request carries the bid the sender accepted; [`verify_bid`] re-checks it
//! in a fixed order before the transfer is admitted.

use serde::{Deserialize, Serialize};

use crate::amount::Amount;
use crate::chain::Blockchain;
use crate::context::Context;
use crate::plugins::{Bid, BidPlugin};
use crate::signer::{BidSigner, build_bid_message};
use crate::store::{BidStore as _, StoreError};

/// A bid attached to an inbound transfer request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignedBid {
    pub fee: Amount,
    pub execution_time: u64,
    pub valid_until: u64,
    pub signature: String,
}

/// A bid as returned by `GET /bids`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OfferedBid {
    pub fee: Amount,
    pub execution_time: u64,
    pub valid_until: u64,
    pub signature: String,
}

#[derive(Debug, thiserror::Error)]
pub enum BidError {
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Reads the current bids for a pair and signs each over the canonical
/// message.
pub async fn current_bids(
    ctx: &Context,
    source_blockchain: Blockchain,
    destination_blockchain: Blockchain,
) -> Result<Vec<OfferedBid>, BidError> {
    tracing::info!(%source_blockchain, %destination_blockchain, "reading bids from the store");
    let stored = ctx
        .bids
        .read_bids(source_blockchain, destination_blockchain)
        .await?;
    let bids = stored
        .into_iter()
        .map(|bid| {
            let message = build_bid_message(
                bid.fee,
                bid.valid_until,
                source_blockchain,
                destination_blockchain,
                bid.execution_time,
            );
            OfferedBid {
                fee: bid.fee,
                execution_time: bid.execution_time,
                valid_until: bid.valid_until,
                signature: ctx.signer.sign_message(&message),
            }
        })
        .collect();
    Ok(bids)
}

/// Why an inbound bid was rejected. The messages surface verbatim in the
/// HTTP 406 response.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BidRejection {
    #[error("bid not valid for blockchain pair")]
    PairMismatch,
    #[error("bid has expired")]
    Expired,
    #[error("bid's signature is invalid")]
    SignatureInvalid,
    #[error(
        "\"valid until\" timestamp must be at least the current timestamp plus the service \
         node bid's execution time"
    )]
    ValidUntilTooShort,
    #[error("bid not accepted")]
    NotAccepted,
}

/// Verifies an inbound bid. The checks run in a fixed order and the first
/// failure rejects the bid: pair match, freshness, signature, execution-time
/// adequacy, plugin acceptance.
#[allow(clippy::too_many_arguments)]
pub fn verify_bid(
    signer: &BidSigner,
    plugin: &dyn BidPlugin,
    bid: &Bid,
    signature: &str,
    source_blockchain: Blockchain,
    destination_blockchain: Blockchain,
    request_valid_until: u64,
    time_received: f64,
    now: u64,
) -> Result<(), BidRejection> {
    if bid.source_blockchain != source_blockchain
        || bid.destination_blockchain != destination_blockchain
    {
        return Err(BidRejection::PairMismatch);
    }
    if now > bid.valid_until {
        return Err(BidRejection::Expired);
    }
    let message = build_bid_message(
        bid.fee,
        bid.valid_until,
        bid.source_blockchain,
        bid.destination_blockchain,
        bid.execution_time,
    );
    if !signer.verify_message(&message, signature) {
        return Err(BidRejection::SignatureInvalid);
    }
    if request_valid_until < time_received.floor() as u64 + bid.execution_time {
        return Err(BidRejection::ValidUntilTooShort);
    }
    if !plugin.accept_bid(bid) {
        return Err(BidRejection::NotAccepted);
    }
    Ok(())
}
