//! Configuration for the service node.
//!
//! Configuration is a JSON file selected with `--config` (or the `CONFIG`
//! environment variable). Secret-bearing string fields accept `$VAR` /
//! `${VAR}` references that are resolved against the process environment
//! during deserialization.

use clap::Parser;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashMap;
use std::fs;
use std::net::IpAddr;
use std::ops::Deref;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use url::Url;

use crate::amount::Amount;
use crate::chain::Blockchain;
use crate::protocol;

/// Lowest accepted fee escalation factor; smaller factors would let
/// resubmissions be rejected as underpriced replacements.
pub const MIN_ADAPTABLE_FEE_INCREASE_FACTOR: f64 = 1.101;

/// CLI arguments.
#[derive(Parser, Debug)]
#[command(name = "pantos-service-node")]
#[command(about = "Cross-chain token-transfer service node")]
struct CliArgs {
    /// Path to the JSON configuration file
    #[arg(long, short, env = "CONFIG", default_value = "config.json")]
    config: PathBuf,
}

/// A transparent wrapper that resolves environment variables during
/// deserialization.
///
/// Supports literal values, `$VAR`, and `${VAR}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiteralOrEnv<T>(T);

impl<T> LiteralOrEnv<T> {
    pub fn inner(&self) -> &T {
        &self.0
    }

    fn parse_env_var_syntax(s: &str) -> Option<String> {
        if s.starts_with("${") && s.ends_with('}') {
            Some(s[2..s.len() - 1].to_string())
        } else if let Some(name) = s.strip_prefix('$') {
            if !name.is_empty() && name.chars().all(|c| c.is_alphanumeric() || c == '_') {
                Some(name.to_string())
            } else {
                None
            }
        } else {
            None
        }
    }
}

impl<T> Deref for LiteralOrEnv<T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl<'de, T> Deserialize<'de> for LiteralOrEnv<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        let value = if let Some(var_name) = Self::parse_env_var_syntax(&s) {
            std::env::var(&var_name).map_err(|_| {
                serde::de::Error::custom(format!(
                    "environment variable '{var_name}' not found (referenced as '{s}')"
                ))
            })?
        } else {
            s
        };
        let parsed = value
            .parse::<T>()
            .map_err(|e| serde::de::Error::custom(format!("failed to parse value: {e}")))?;
        Ok(LiteralOrEnv(parsed))
    }
}

impl<T: Serialize> Serialize for LiteralOrEnv<T> {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.0.serialize(serializer)
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Human,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConsoleConfig {
    #[serde(default = "config_defaults::default_true")]
    pub enabled: bool,
}

impl Default for LogConsoleConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LogFileConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub name: Option<PathBuf>,
    /// Rotation thresholds; rotation itself is left to the platform.
    #[serde(default)]
    pub max_bytes: Option<u64>,
    #[serde(default)]
    pub backup_count: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    #[serde(default = "config_defaults::default_log_format")]
    pub format: LogFormat,
    #[serde(default)]
    pub console: LogConsoleConfig,
    #[serde(default)]
    pub file: LogFileConfig,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::Human,
            console: LogConsoleConfig::default(),
            file: LogFileConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplicationConfig {
    #[serde(default = "config_defaults::default_host")]
    pub host: IpAddr,
    #[serde(default = "config_defaults::default_port")]
    pub port: u16,
    /// Public URL under which this service node is reachable; registered
    /// on-chain.
    pub url: String,
    #[serde(default)]
    pub debug: bool,
    #[serde(default)]
    pub log: LogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: LiteralOrEnv<String>,
    #[serde(default = "config_defaults::default_pool_size")]
    pub pool_size: u32,
    #[serde(default = "config_defaults::default_max_overflow")]
    pub max_overflow: u32,
    #[serde(default = "config_defaults::default_true")]
    pub apply_migrations: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignerConfig {
    /// Path to the Ed25519 private key, PKCS#8 PEM.
    pub pem: PathBuf,
    #[serde(default)]
    pub pem_password: Option<LiteralOrEnv<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BidsPluginConfig {
    /// Name of a compiled-in bid strategy.
    #[serde(default = "config_defaults::default_bid_strategy")]
    pub strategy: String,
    /// Strategy-specific arguments.
    #[serde(default)]
    pub arguments: serde_json::Value,
}

impl Default for BidsPluginConfig {
    fn default() -> Self {
        Self {
            strategy: config_defaults::default_bid_strategy(),
            arguments: serde_json::Value::Null,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PluginsConfig {
    #[serde(default)]
    pub bids: BidsPluginConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfirmTransferTaskConfig {
    /// Seconds between confirmation polls.
    #[serde(default = "config_defaults::default_confirm_interval")]
    pub interval: u64,
    #[serde(default = "config_defaults::default_retry_interval")]
    pub retry_interval_after_error: u64,
}

impl Default for ConfirmTransferTaskConfig {
    fn default() -> Self {
        Self {
            interval: config_defaults::default_confirm_interval(),
            retry_interval_after_error: config_defaults::default_retry_interval(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecuteTransferTaskConfig {
    #[serde(default = "config_defaults::default_retry_interval")]
    pub retry_interval_after_error: u64,
}

impl Default for ExecuteTransferTaskConfig {
    fn default() -> Self {
        Self {
            retry_interval_after_error: config_defaults::default_retry_interval(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkersConfig {
    #[serde(default = "config_defaults::default_transfer_workers")]
    pub transfers: usize,
    #[serde(default = "config_defaults::default_bid_workers")]
    pub bids: usize,
}

impl Default for WorkersConfig {
    fn default() -> Self {
        Self {
            transfers: config_defaults::default_transfer_workers(),
            bids: config_defaults::default_bid_workers(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TasksConfig {
    #[serde(default)]
    pub confirm_transfer: ConfirmTransferTaskConfig,
    #[serde(default)]
    pub execute_transfer: ExecuteTransferTaskConfig,
    #[serde(default)]
    pub workers: WorkersConfig,
}

/// Per-chain configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockchainConfig {
    /// Whether the service node interacts with this chain at all.
    #[serde(default)]
    pub active: bool,
    /// Whether the node intends to be registered at the hub of this chain.
    #[serde(default)]
    pub registered: bool,
    #[serde(default)]
    pub withdrawal_address: Option<String>,
    /// Raw 32-byte hex key, or a path to an encrypted keystore file.
    #[serde(default)]
    pub private_key: Option<LiteralOrEnv<String>>,
    #[serde(default)]
    pub private_key_password: Option<LiteralOrEnv<String>>,
    #[serde(default)]
    pub provider: Option<Url>,
    #[serde(default)]
    pub fallback_providers: Vec<Url>,
    /// RPC timeout in seconds.
    #[serde(default = "config_defaults::default_provider_timeout")]
    pub provider_timeout: u64,
    /// Seconds between blocks, used to pace the resubmission watch.
    #[serde(default = "config_defaults::default_average_block_time")]
    pub average_block_time: u64,
    #[serde(default)]
    pub chain_id: Option<u64>,
    #[serde(default)]
    pub hub: Option<String>,
    #[serde(default)]
    pub forwarder: Option<String>,
    #[serde(default)]
    pub pan_token: Option<String>,
    #[serde(default = "config_defaults::default_confirmations")]
    pub confirmations: u64,
    #[serde(default = "config_defaults::default_min_adaptable_fee_per_gas")]
    pub min_adaptable_fee_per_gas: u128,
    /// Zero or absent means uncapped.
    #[serde(default)]
    pub max_total_fee_per_gas: Option<u128>,
    #[serde(default = "config_defaults::default_adaptable_fee_increase_factor")]
    pub adaptable_fee_increase_factor: f64,
    #[serde(default = "config_defaults::default_blocks_until_resubmission")]
    pub blocks_until_resubmission: u64,
    #[serde(default)]
    pub deposit: Amount,
}

impl BlockchainConfig {
    /// The fee cap, normalizing the configured zero to "uncapped".
    pub fn fee_cap(&self) -> Option<u128> {
        match self.max_total_fee_per_gas {
            Some(0) | None => None,
            Some(cap) => Some(cap),
        }
    }
}

/// Per-chain configuration keyed by blockchain.
#[derive(Debug, Clone, Default)]
pub struct BlockchainsConfig(HashMap<Blockchain, BlockchainConfig>);

impl BlockchainsConfig {
    pub fn get(&self, blockchain: Blockchain) -> Option<&BlockchainConfig> {
        self.0.get(&blockchain)
    }

    /// Chains configured as active, sorted by ID.
    pub fn active_chains(&self) -> Vec<Blockchain> {
        let mut chains: Vec<Blockchain> = self
            .0
            .iter()
            .filter(|(_, c)| c.active)
            .map(|(b, _)| *b)
            .collect();
        chains.sort();
        chains
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Blockchain, &BlockchainConfig)> {
        self.0.iter()
    }
}

impl<'de> Deserialize<'de> for BlockchainsConfig {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw: HashMap<String, BlockchainConfig> = HashMap::deserialize(deserializer)?;
        let mut chains = HashMap::with_capacity(raw.len());
        for (name, config) in raw {
            let blockchain = Blockchain::from_config_name(&name)
                .ok_or_else(|| serde::de::Error::custom(format!("unknown blockchain: {name}")))?;
            chains.insert(blockchain, config);
        }
        Ok(BlockchainsConfig(chains))
    }
}

impl Serialize for BlockchainsConfig {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::SerializeMap;
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (blockchain, config) in &self.0 {
            map.serialize_entry(&blockchain.config_name(), config)?;
        }
        map.end()
    }
}

/// Root configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub protocol: String,
    pub application: ApplicationConfig,
    pub database: DatabaseConfig,
    pub signer: SignerConfig,
    #[serde(default)]
    pub plugins: PluginsConfig,
    #[serde(default)]
    pub tasks: TasksConfig,
    #[serde(default)]
    pub blockchains: BlockchainsConfig,
}

mod config_defaults {
    use super::LogFormat;
    use std::env;
    use std::net::IpAddr;

    pub fn default_true() -> bool {
        true
    }

    pub fn default_log_format() -> LogFormat {
        LogFormat::Human
    }

    pub fn default_host() -> IpAddr {
        env::var("HOST")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or_else(|| "0.0.0.0".parse().expect("valid literal"))
    }

    pub fn default_port() -> u16 {
        env::var("PORT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(8080)
    }

    pub fn default_pool_size() -> u32 {
        10
    }

    pub fn default_max_overflow() -> u32 {
        10
    }

    pub fn default_bid_strategy() -> String {
        "config-file".to_string()
    }

    pub fn default_confirm_interval() -> u64 {
        30
    }

    pub fn default_retry_interval() -> u64 {
        60
    }

    pub fn default_transfer_workers() -> usize {
        4
    }

    pub fn default_bid_workers() -> usize {
        1
    }

    pub fn default_provider_timeout() -> u64 {
        10
    }

    pub fn default_average_block_time() -> u64 {
        14
    }

    pub fn default_confirmations() -> u64 {
        12
    }

    pub fn default_min_adaptable_fee_per_gas() -> u128 {
        1_000_000_000
    }

    pub fn default_adaptable_fee_increase_factor() -> f64 {
        super::MIN_ADAPTABLE_FEE_INCREASE_FACTOR
    }

    pub fn default_blocks_until_resubmission() -> u64 {
        20
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file at {0}: {1}")]
    FileRead(PathBuf, #[source] std::io::Error),
    #[error("failed to parse config file: {0}")]
    JsonParse(#[from] serde_json::Error),
    #[error("unsupported protocol version: {0}")]
    UnsupportedProtocolVersion(String),
    #[error("invalid configuration for {blockchain}: {reason}")]
    InvalidBlockchainConfig {
        blockchain: Blockchain,
        reason: String,
    },
}

impl Config {
    /// Loads the configuration from the CLI-selected JSON file and validates
    /// it.
    pub fn load() -> Result<Self, ConfigError> {
        let cli_args = CliArgs::parse();
        let config_path = Path::new(&cli_args.config)
            .canonicalize()
            .map_err(|e| ConfigError::FileRead(cli_args.config, e))?;
        Self::load_from_path(&config_path)
    }

    pub fn load_from_path(path: &Path) -> Result<Self, ConfigError> {
        let content =
            fs::read_to_string(path).map_err(|e| ConfigError::FileRead(path.to_path_buf(), e))?;
        let config: Config = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// The configured protocol version, already validated as supported.
    pub fn protocol_version(&self) -> semver::Version {
        semver::Version::parse(&self.protocol).expect("validated at load time")
    }

    pub fn blockchain(&self, blockchain: Blockchain) -> Option<&BlockchainConfig> {
        self.blockchains.get(blockchain)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let version = semver::Version::parse(&self.protocol)
            .map_err(|_| ConfigError::UnsupportedProtocolVersion(self.protocol.clone()))?;
        if !protocol::is_supported_protocol_version(&version) {
            return Err(ConfigError::UnsupportedProtocolVersion(self.protocol.clone()));
        }
        for (blockchain, chain_config) in self.blockchains.iter() {
            if !chain_config.active {
                continue;
            }
            if chain_config.adaptable_fee_increase_factor < MIN_ADAPTABLE_FEE_INCREASE_FACTOR {
                return Err(ConfigError::InvalidBlockchainConfig {
                    blockchain: *blockchain,
                    reason: format!(
                        "adaptable_fee_increase_factor must be at least \
                         {MIN_ADAPTABLE_FEE_INCREASE_FACTOR}"
                    ),
                });
            }
            if blockchain.is_evm() {
                for (key, present) in [
                    ("provider", chain_config.provider.is_some()),
                    ("hub", chain_config.hub.is_some()),
                    ("forwarder", chain_config.forwarder.is_some()),
                    ("pan_token", chain_config.pan_token.is_some()),
                    ("private_key", chain_config.private_key.is_some()),
                ] {
                    if !present {
                        return Err(ConfigError::InvalidBlockchainConfig {
                            blockchain: *blockchain,
                            reason: format!("{key} is required for an active chain"),
                        });
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_config_json() -> serde_json::Value {
        serde_json::json!({
            "protocol": "0.2.0",
            "application": {
                "url": "https://service-node.example.com"
            },
            "database": {
                "url": "postgres://localhost/service_node"
            },
            "signer": {
                "pem": "/etc/service-node/signer.pem"
            },
            "blockchains": {
                "ethereum": {
                    "active": true,
                    "registered": true,
                    "provider": "https://rpc.example.com",
                    "hub": "0x308eF9f94a642A31D9F9eA83f183544027A9742D",
                    "forwarder": "0xfB37499DC5401Dc39a0734df1fC7924d769721d5",
                    "pan_token": "0x53D9547e1F6eF34Ad5Ba1A50ac03BD6cd60A3123",
                    "private_key": "0x4c0883a69102937d6231471b5dbb6204fe512961708279f1d8d1d9d9d9d9d9d9",
                    "deposit": 0
                }
            }
        })
    }

    fn parse(value: serde_json::Value) -> Result<Config, ConfigError> {
        let config: Config = serde_json::from_value(value).map_err(ConfigError::JsonParse)?;
        config.validate()?;
        Ok(config)
    }

    #[test]
    fn minimal_config_parses_with_defaults() {
        let config = parse(minimal_config_json()).unwrap();
        assert_eq!(config.application.port, 8080);
        assert_eq!(config.tasks.confirm_transfer.interval, 30);
        assert_eq!(config.plugins.bids.strategy, "config-file");
        let ethereum = config.blockchain(Blockchain::Ethereum).unwrap();
        assert_eq!(ethereum.confirmations, 12);
        assert_eq!(ethereum.blocks_until_resubmission, 20);
        assert_eq!(config.blockchains.active_chains(), vec![Blockchain::Ethereum]);
    }

    #[test]
    fn unsupported_protocol_version_is_rejected() {
        let mut json = minimal_config_json();
        json["protocol"] = serde_json::json!("3.0.0");
        assert!(matches!(
            parse(json),
            Err(ConfigError::UnsupportedProtocolVersion(_))
        ));
    }

    #[test]
    fn unknown_blockchain_name_is_rejected() {
        let mut json = minimal_config_json();
        json["blockchains"]["bitcoin"] = serde_json::json!({"active": false});
        assert!(parse(json).is_err());
    }

    #[test]
    fn active_chain_requires_contract_addresses() {
        let mut json = minimal_config_json();
        json["blockchains"]["ethereum"]
            .as_object_mut()
            .unwrap()
            .remove("hub");
        assert!(matches!(
            parse(json),
            Err(ConfigError::InvalidBlockchainConfig { .. })
        ));
    }

    #[test]
    fn fee_increase_factor_floor_is_enforced() {
        let mut json = minimal_config_json();
        json["blockchains"]["ethereum"]["adaptable_fee_increase_factor"] = serde_json::json!(1.05);
        assert!(matches!(
            parse(json),
            Err(ConfigError::InvalidBlockchainConfig { .. })
        ));
    }

    #[test]
    fn zero_fee_cap_means_uncapped() {
        let mut json = minimal_config_json();
        json["blockchains"]["ethereum"]["max_total_fee_per_gas"] = serde_json::json!(0);
        let config = parse(json).unwrap();
        assert_eq!(
            config.blockchain(Blockchain::Ethereum).unwrap().fee_cap(),
            None
        );

        let mut json = minimal_config_json();
        json["blockchains"]["ethereum"]["max_total_fee_per_gas"] =
            serde_json::json!(50_000_000_000u64);
        let config = parse(json).unwrap();
        assert_eq!(
            config.blockchain(Blockchain::Ethereum).unwrap().fee_cap(),
            Some(50_000_000_000)
        );
    }

    #[test]
    fn env_references_resolve() {
        // Unsafe on edition 2024; the test process is single-threaded here.
        unsafe { std::env::set_var("SERVICE_NODE_TEST_DB", "postgres://db.internal/sn") };
        let mut json = minimal_config_json();
        json["database"]["url"] = serde_json::json!("$SERVICE_NODE_TEST_DB");
        let config = parse(json).unwrap();
        assert_eq!(config.database.url.inner(), "postgres://db.internal/sn");
    }

    #[test]
    fn inactive_chain_needs_no_contract_config() {
        let mut json = minimal_config_json();
        json["blockchains"]["solana"] = serde_json::json!({"active": false, "registered": false});
        assert!(parse(json).is_ok());
    }
}
