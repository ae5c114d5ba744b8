//! Node-registration reconciliation.
//!
//! At startup the configured intent (`active`, `registered`, URL, deposit,
//! withdrawal address) is reconciled with the on-chain service-node record
//! of every active chain: register, update the URL, cancel a pending
//! unregistration, or unregister. Validation failures are typed and fatal.

use std::sync::Arc;
use url::Url;

use crate::amount::Amount;
use crate::chain::{Blockchain, ChainClient, ChainClientError};
use crate::config::BlockchainConfig;
use crate::context::Context;

const VALID_NODE_URL_SCHEMES: [&str; 2] = ["http", "https"];

#[derive(Debug, thiserror::Error)]
pub enum NodeError {
    #[error("invalid service node URL: {0}")]
    InvalidUrl(String),
    #[error(
        "invalid deposit of {deposit}: must be between the minimum deposit of {minimum} and \
         the own token balance of {balance}"
    )]
    InvalidAmount {
        deposit: Amount,
        minimum: Amount,
        balance: Amount,
    },
    #[error("invalid withdrawal address: {0}")]
    InvalidBlockchainAddress(String),
    #[error("unable to update the service node registration on {blockchain}: {reason}")]
    Registration {
        blockchain: Blockchain,
        reason: String,
    },
}

/// URL scheme must be http(s) and the host part non-empty.
pub(crate) fn validate_node_url(node_url: &str) -> Result<(), NodeError> {
    let parsed = Url::parse(node_url).map_err(|_| NodeError::InvalidUrl(node_url.to_string()))?;
    let scheme_valid = VALID_NODE_URL_SCHEMES.contains(&parsed.scheme());
    let host_valid = parsed.host_str().is_some_and(|host| !host.is_empty());
    if !scheme_valid || !host_valid {
        return Err(NodeError::InvalidUrl(node_url.to_string()));
    }
    Ok(())
}

/// The deposit must cover the hub's minimum and not exceed the node's own
/// token balance.
pub(crate) async fn validate_node_deposit(
    client: &Arc<dyn ChainClient>,
    deposit: Amount,
) -> Result<(), NodeError> {
    let minimum = client
        .read_minimum_deposit()
        .await
        .map_err(|e| registration_error(client.blockchain(), e))?;
    let balance = client
        .read_own_token_balance()
        .await
        .map_err(|e| registration_error(client.blockchain(), e))?;
    if deposit < minimum || deposit > balance {
        return Err(NodeError::InvalidAmount {
            deposit,
            minimum,
            balance,
        });
    }
    Ok(())
}

pub(crate) fn validate_withdrawal_address(
    client: &Arc<dyn ChainClient>,
    withdrawal_address: &str,
) -> Result<(), NodeError> {
    if !client.is_valid_address(withdrawal_address) {
        return Err(NodeError::InvalidBlockchainAddress(
            withdrawal_address.to_string(),
        ));
    }
    Ok(())
}

fn registration_error(blockchain: Blockchain, error: ChainClientError) -> NodeError {
    NodeError::Registration {
        blockchain,
        reason: error.to_string(),
    }
}

pub struct NodeRegistrar {
    ctx: Arc<Context>,
}

impl NodeRegistrar {
    pub fn new(ctx: Arc<Context>) -> Self {
        Self { ctx }
    }

    /// Reconciles the registration on every active chain.
    pub async fn update_node_registrations(&self) -> Result<(), NodeError> {
        for blockchain in Blockchain::ALL {
            let Some(chain_config) = self.ctx.config.blockchain(blockchain) else {
                continue;
            };
            if !chain_config.active {
                continue;
            }
            tracing::info!(%blockchain, "updating the service node registration");
            self.update_registration(blockchain, chain_config).await?;
        }
        Ok(())
    }

    async fn update_registration(
        &self,
        blockchain: Blockchain,
        chain_config: &BlockchainConfig,
    ) -> Result<(), NodeError> {
        let client = self.ctx.client(blockchain).ok_or(NodeError::Registration {
            blockchain,
            reason: "no chain client".to_string(),
        })?;
        let to_be_registered = chain_config.registered;
        let is_registered = client
            .is_node_registered()
            .await
            .map_err(|e| registration_error(blockchain, e))?;

        if to_be_registered && is_registered {
            let old_node_url = client
                .read_node_url()
                .await
                .map_err(|e| registration_error(blockchain, e))?;
            let new_node_url = &self.ctx.config.application.url;
            if old_node_url != *new_node_url {
                validate_node_url(new_node_url)?;
                client
                    .update_node_url(new_node_url)
                    .await
                    .map_err(|e| registration_error(blockchain, e))?;
            }
        } else if to_be_registered {
            let is_unbonding = client
                .is_unbonding()
                .await
                .map_err(|e| registration_error(blockchain, e))?;
            if is_unbonding {
                // Unregistered earlier but the deposit is still locked;
                // re-activation is cheaper than a fresh registration.
                client
                    .cancel_unregistration()
                    .await
                    .map_err(|e| registration_error(blockchain, e))?;
            } else {
                let node_url = &self.ctx.config.application.url;
                let node_deposit = chain_config.deposit;
                let withdrawal_address = chain_config.withdrawal_address.as_deref().unwrap_or("");
                validate_node_url(node_url)?;
                validate_node_deposit(client, node_deposit).await?;
                validate_withdrawal_address(client, withdrawal_address)?;
                client
                    .register_node(node_url, node_deposit, withdrawal_address)
                    .await
                    .map_err(|e| registration_error(blockchain, e))?;
            }
        } else if is_registered {
            // No longer meant to be registered.
            client
                .unregister_node()
                .await
                .map_err(|e| registration_error(blockchain, e))?;
        }
        Ok(())
    }
}
