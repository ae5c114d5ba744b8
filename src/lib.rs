//! Cross-chain token-transfer service node.
//!
//! A long-running network service that accepts signed transfer requests,
//! quotes fees via signed bids, and asynchronously drives each accepted
//! transfer through submission, confirmation, retry, and terminal status on
//! EVM-compatible blockchains. On every supported chain the node is itself
//! an on-chain registered actor whose registration is reconciled with
//! configuration at startup.
//!
//! Major pieces:
//!
//! - [`transfers`]: the transfer lifecycle engine and its scheduled tasks
//! - [`chain`]: the uniform blockchain-client abstraction
//! - [`submission`]: adaptive-fee transaction resubmission
//! - [`store`]: durable state, including the blockchain-nonce allocator
//! - [`bids`] / [`bid_engine`] / [`plugins`]: bid quoting and validation
//! - [`node`]: on-chain registration reconciliation
//! - [`scheduler`]: the durable task queues and worker loops
//! - [`handlers`]: the HTTP surface

pub mod amount;
pub mod bid_engine;
pub mod bids;
pub mod chain;
pub mod config;
pub mod context;
pub mod handlers;
pub mod node;
pub mod plugins;
pub mod protocol;
pub mod scheduler;
pub mod signer;
pub mod store;
pub mod submission;
pub mod telemetry;
pub mod transfers;

pub use amount::Amount;
pub use chain::Blockchain;
pub use config::Config;
pub use context::Context;
