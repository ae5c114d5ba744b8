//! Process-wide context.
//!
//! All module-level state lives in one [`Context`] constructed at startup
//! and passed explicitly. Initialization order: configuration → logging →
//! database → signer → chain clients → plugin resolution; any failure is
//! fatal and the process exits non-zero.

use std::collections::HashMap;
use std::sync::Arc;

use crate::chain::evm::EvmChainClient;
use crate::chain::solana::SolanaChainClient;
use crate::chain::{Blockchain, ChainClient, ChainClientError, ChainRegistry};
use crate::config::Config;
use crate::plugins::{BidPlugin, resolve_bid_plugin};
use crate::signer::{BidSigner, SignerError};
use crate::store::postgres::PgStore;
use crate::store::{BidStore, StoreError, TaskStore, TransferStore};

#[derive(Debug, thiserror::Error)]
pub enum ContextError {
    #[error("unable to initialize the database: {0}")]
    Store(#[from] StoreError),
    #[error("unable to initialize the signer: {0}")]
    Signer(#[from] SignerError),
    #[error("unable to initialize the {blockchain} client: {source}")]
    Chain {
        blockchain: Blockchain,
        #[source]
        source: ChainClientError,
    },
    #[error("unknown bid strategy: {0}")]
    UnknownBidStrategy(String),
}

pub struct Context {
    pub config: Config,
    pub transfers: Arc<dyn TransferStore>,
    pub bids: Arc<dyn BidStore>,
    pub tasks: Arc<dyn TaskStore>,
    pub chains: ChainRegistry,
    pub signer: Arc<BidSigner>,
    pub bid_plugin: Arc<dyn BidPlugin>,
}

impl Context {
    pub async fn initialize(config: Config) -> Result<Arc<Self>, ContextError> {
        let store = Arc::new(PgStore::connect(&config.database).await?);
        let transfer_store: Arc<dyn TransferStore> = store.clone();

        let signer = Arc::new(BidSigner::load(
            &config.signer.pem,
            config.signer.pem_password.as_ref().map(|p| p.inner().as_str()),
        )?);

        let mut clients: HashMap<Blockchain, Arc<dyn ChainClient>> = HashMap::new();
        for blockchain in config.blockchains.active_chains() {
            let chain_config = config
                .blockchain(blockchain)
                .expect("active chain has configuration");
            let client: Arc<dyn ChainClient> = if blockchain.is_evm() {
                Arc::new(
                    EvmChainClient::from_config(blockchain, chain_config, transfer_store.clone())
                        .await
                        .map_err(|source| ContextError::Chain { blockchain, source })?,
                )
            } else {
                Arc::new(SolanaChainClient::new())
            };
            clients.insert(blockchain, client);
        }

        let bid_plugin = resolve_bid_plugin(&config.plugins.bids.strategy)
            .ok_or_else(|| ContextError::UnknownBidStrategy(config.plugins.bids.strategy.clone()))?;

        Ok(Arc::new(Context {
            transfers: transfer_store,
            bids: store.clone(),
            tasks: store,
            chains: ChainRegistry::new(clients),
            signer,
            bid_plugin,
            config,
        }))
    }

    pub fn client(&self, blockchain: Blockchain) -> Option<&Arc<dyn ChainClient>> {
        self.chains.get(blockchain)
    }
}

#[cfg(feature = "test-utils")]
pub mod testing {
    //! Context construction for tests.

    use super::*;
    use crate::amount::Amount;
    use crate::plugins::{Bid, BidPluginError};
    use crate::store::memory::InMemoryStore;
    use async_trait::async_trait;
    use ed25519_dalek::SigningKey;
    use std::sync::Mutex;

    /// A plugin with a fixed bid list and a switchable acceptance flag.
    pub struct StaticBidPlugin {
        pub bids: Mutex<Vec<Bid>>,
        pub delay: u64,
        pub accept: bool,
        pub fail_with: Option<String>,
    }

    impl StaticBidPlugin {
        pub fn accepting() -> Self {
            Self {
                bids: Mutex::new(Vec::new()),
                delay: 60,
                accept: true,
                fail_with: None,
            }
        }

        pub fn rejecting() -> Self {
            Self {
                accept: false,
                ..Self::accepting()
            }
        }

        pub fn failing(message: &str) -> Self {
            Self {
                fail_with: Some(message.to_string()),
                ..Self::accepting()
            }
        }

        pub fn with_bids(self, bids: Vec<Bid>) -> Self {
            *self.bids.lock().unwrap() = bids;
            self
        }
    }

    #[async_trait]
    impl BidPlugin for StaticBidPlugin {
        async fn get_bids(
            &self,
            source_blockchain: Blockchain,
            destination_blockchain: Blockchain,
            _arguments: &serde_json::Value,
        ) -> Result<(Vec<Bid>, u64), BidPluginError> {
            if let Some(message) = &self.fail_with {
                return Err(BidPluginError(message.clone()));
            }
            let bids = self
                .bids
                .lock()
                .unwrap()
                .iter()
                .filter(|b| {
                    b.source_blockchain == source_blockchain
                        && b.destination_blockchain == destination_blockchain
                })
                .cloned()
                .collect();
            Ok((bids, self.delay))
        }

        fn accept_bid(&self, _bid: &Bid) -> bool {
            self.accept
        }
    }

    pub fn test_config() -> Config {
        let json = serde_json::json!({
            "protocol": "0.2.0",
            "application": {
                "url": "https://service-node.example.com"
            },
            "database": {
                "url": "postgres://localhost/service_node_test"
            },
            "signer": {
                "pem": "/dev/null"
            },
            "tasks": {
                "confirm_transfer": {
                    "interval": 30,
                    "retry_interval_after_error": 60
                },
                "execute_transfer": {
                    "retry_interval_after_error": 60
                }
            },
            "blockchains": {
                "ethereum": {
                    "active": true,
                    "registered": true,
                    "provider": "http://localhost:8545",
                    "hub": "0x308eF9f94a642A31D9F9eA83f183544027A9742D",
                    "forwarder": "0xfB37499DC5401Dc39a0734df1fC7924d769721d5",
                    "pan_token": "0x53D9547e1F6eF34Ad5Ba1A50ac03BD6cd60A3123",
                    "private_key":
                        "0x4c0883a69102937d6231471b5dbb6204fe512961708279f1d8d1d9d9d9d9d9d9",
                    "withdrawal_address": "0x90F8bf6A479f320ead074411a4B0e7944Ea8c9C1",
                    "deposit": 0
                },
                "bnb_chain": {
                    "active": true,
                    "registered": true,
                    "provider": "http://localhost:8546",
                    "hub": "0x5e447968d4a177fE7bFB8877cA12aE20Bd60dDB3",
                    "forwarder": "0xB2C9783E7eFA5F55d41a46460eb1Cb7658e71552",
                    "pan_token": "0x5538e600dc919f72858dd4D4F5E4327ec6f2af60",
                    "private_key":
                        "0x4c0883a69102937d6231471b5dbb6204fe512961708279f1d8d1d9d9d9d9d9d9",
                    "withdrawal_address": "0x90F8bf6A479f320ead074411a4B0e7944Ea8c9C1",
                    "deposit": 0
                },
                "solana": {
                    "active": false,
                    "registered": false
                }
            }
        });
        serde_json::from_value(json).expect("test configuration is valid")
    }

    /// Builds a context over in-memory stores and the given chain clients.
    pub fn context(
        store: Arc<InMemoryStore>,
        clients: HashMap<Blockchain, Arc<dyn ChainClient>>,
        bid_plugin: Arc<dyn BidPlugin>,
    ) -> Arc<Context> {
        Arc::new(Context {
            config: test_config(),
            transfers: store.clone(),
            bids: store.clone(),
            tasks: store,
            chains: ChainRegistry::new(clients),
            signer: Arc::new(BidSigner::from_signing_key(SigningKey::from_bytes(&[7u8; 32]))),
            bid_plugin,
        })
    }

    /// The fee used by most engine tests.
    pub fn test_fee() -> Amount {
        Amount::from(500_000)
    }
}
