//! Bid strategies.
//!
//! A bid strategy quotes fees for `(source, destination)` chain pairs and
//! vets inbound bids at transfer intake. Strategies are compiled in and
//! resolved by name at process start; the default reads quotes from a YAML
//! file.

use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::amount::Amount;
use crate::chain::Blockchain;

/// A fee quote for a chain pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bid {
    pub source_blockchain: Blockchain,
    pub destination_blockchain: Blockchain,
    pub fee: Amount,
    /// Time in seconds the transfer takes to execute.
    pub execution_time: u64,
    /// Unix timestamp until which the bid is valid.
    pub valid_until: u64,
}

/// Raised by strategies; treated as transient by the bid engine.
#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct BidPluginError(pub String);

/// A pluggable source of bids.
#[async_trait]
pub trait BidPlugin: Send + Sync {
    /// Quotes bids for the pair and returns the delay in seconds until the
    /// next recomputation.
    async fn get_bids(
        &self,
        source_blockchain: Blockchain,
        destination_blockchain: Blockchain,
        arguments: &serde_json::Value,
    ) -> Result<(Vec<Bid>, u64), BidPluginError>;

    /// Whether the node is still willing to honor this bid. Kept cheap; it
    /// runs on every transfer intake.
    fn accept_bid(&self, bid: &Bid) -> bool;
}

/// Resolves a compiled-in strategy by its configured name.
pub fn resolve_bid_plugin(strategy: &str) -> Option<Arc<dyn BidPlugin>> {
    match strategy {
        "config-file" => Some(Arc::new(ConfigFileBidPlugin::new())),
        _ => None,
    }
}

#[derive(Debug, Deserialize)]
struct BidFileEntry {
    execution_time: u64,
    fee: Amount,
    /// Seconds from quote time for which the bid stays valid.
    valid_period: u64,
}

#[derive(Debug, Deserialize)]
struct BidFile {
    blockchains: HashMap<String, HashMap<String, Vec<BidFileEntry>>>,
}

/// Default strategy: bids come from a YAML file named by the `file_path`
/// argument, loaded once and cached.
pub struct ConfigFileBidPlugin {
    delay: u64,
    cached: Mutex<Option<(PathBuf, Arc<BidFile>)>>,
}

impl Default for ConfigFileBidPlugin {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigFileBidPlugin {
    pub fn new() -> Self {
        Self {
            delay: 60,
            cached: Mutex::new(None),
        }
    }

    fn load(&self, path: &Path) -> Result<Arc<BidFile>, BidPluginError> {
        let mut cached = self.cached.lock().unwrap();
        if let Some((cached_path, file)) = cached.as_ref()
            && cached_path == path
        {
            return Ok(Arc::clone(file));
        }
        let content = std::fs::read_to_string(path)
            .map_err(|e| BidPluginError(format!("unable to read {}: {e}", path.display())))?;
        let file: BidFile = serde_yaml::from_str(&content)
            .map_err(|e| BidPluginError(format!("unable to parse {}: {e}", path.display())))?;
        let file = Arc::new(file);
        *cached = Some((path.to_path_buf(), Arc::clone(&file)));
        Ok(file)
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

#[async_trait]
impl BidPlugin for ConfigFileBidPlugin {
    async fn get_bids(
        &self,
        source_blockchain: Blockchain,
        destination_blockchain: Blockchain,
        arguments: &serde_json::Value,
    ) -> Result<(Vec<Bid>, u64), BidPluginError> {
        let file_path = arguments
            .get("file_path")
            .and_then(|v| v.as_str())
            .ok_or_else(|| BidPluginError("missing 'file_path' argument".to_string()))?;
        let file = self.load(Path::new(file_path))?;

        let source_bids = file
            .blockchains
            .get(&source_blockchain.config_name())
            .ok_or_else(|| {
                BidPluginError(format!("no bids for source blockchain {source_blockchain}"))
            })?;
        let entries = source_bids
            .get(&destination_blockchain.config_name())
            .ok_or_else(|| {
                BidPluginError(format!(
                    "no bids for source blockchain {source_blockchain} and destination \
                     blockchain {destination_blockchain}"
                ))
            })?;

        let now = unix_now();
        let bids = entries
            .iter()
            .map(|entry| Bid {
                source_blockchain,
                destination_blockchain,
                fee: entry.fee,
                execution_time: entry.execution_time,
                valid_until: now + entry.valid_period,
            })
            .collect();
        Ok((bids, self.delay))
    }

    fn accept_bid(&self, _bid: &Bid) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const BID_FILE: &str = "\
blockchains:
  ethereum:
    bnb_chain:
      - execution_time: 600
        fee: 50000000
        valid_period: 300
      - execution_time: 1200
        fee: 25000000
        valid_period: 300
";

    fn bid_file() -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{BID_FILE}").unwrap();
        file
    }

    fn arguments(path: &Path) -> serde_json::Value {
        serde_json::json!({ "file_path": path.to_str().unwrap() })
    }

    #[tokio::test]
    async fn quotes_bids_from_the_file() {
        let file = bid_file();
        let plugin = ConfigFileBidPlugin::new();
        let before = unix_now();
        let (bids, delay) = plugin
            .get_bids(
                Blockchain::Ethereum,
                Blockchain::BnbChain,
                &arguments(file.path()),
            )
            .await
            .unwrap();
        assert_eq!(delay, 60);
        assert_eq!(bids.len(), 2);
        assert_eq!(bids[0].fee, Amount::from(50_000_000));
        assert_eq!(bids[0].execution_time, 600);
        assert!(bids[0].valid_until >= before + 300);
    }

    #[tokio::test]
    async fn missing_pair_is_a_plugin_error() {
        let file = bid_file();
        let plugin = ConfigFileBidPlugin::new();
        let error = plugin
            .get_bids(
                Blockchain::Ethereum,
                Blockchain::Celo,
                &arguments(file.path()),
            )
            .await
            .unwrap_err();
        assert!(error.to_string().contains("no bids"));
    }

    #[tokio::test]
    async fn missing_file_path_argument_is_a_plugin_error() {
        let plugin = ConfigFileBidPlugin::new();
        let error = plugin
            .get_bids(
                Blockchain::Ethereum,
                Blockchain::BnbChain,
                &serde_json::Value::Null,
            )
            .await
            .unwrap_err();
        assert!(error.to_string().contains("file_path"));
    }

    #[test]
    fn default_strategy_resolves_by_name() {
        assert!(resolve_bid_plugin("config-file").is_some());
        assert!(resolve_bid_plugin("does-not-exist").is_none());
    }

    #[test]
    fn config_file_strategy_accepts_every_bid() {
        let plugin = ConfigFileBidPlugin::new();
        let bid = Bid {
            source_blockchain: Blockchain::Ethereum,
            destination_blockchain: Blockchain::BnbChain,
            fee: Amount::from(1),
            execution_time: 600,
            valid_until: 0,
        };
        assert!(plugin.accept_bid(&bid));
    }
}
