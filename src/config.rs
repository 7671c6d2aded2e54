use ethers::types::{Address, U256};
use serde::Deserialize;
use std::fs;

use crate::error::EngineError;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub rpc: RpcConfig,
    pub chain: ChainConfig,
    pub execution: ExecutionConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub monitoring: MonitoringConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RpcConfig {
    pub endpoints: Vec<String>,
    #[serde(default = "default_health_ttl_secs")]
    pub health_ttl_secs: u64,
    #[serde(default = "default_acquire_retries")]
    pub acquire_retries: u32,
    #[serde(default = "default_transport_timeout_secs")]
    pub transport_timeout_secs: u64,
}

fn default_health_ttl_secs() -> u64 {
    300
}
fn default_acquire_retries() -> u32 {
    3
}
fn default_transport_timeout_secs() -> u64 {
    10
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChainConfig {
    pub chain_id: u64,
    pub router: String,
    pub wrapped_native: String,
    #[serde(default)]
    pub usdt: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExecutionConfig {
    #[serde(default = "default_gas_price_gwei")]
    pub default_gas_price_gwei: u64,
    #[serde(default)]
    pub reward_per_tx: bool,
    #[serde(default = "default_repeat_count")]
    pub repeat_count: u32,
    #[serde(default = "default_consecutive_failure_threshold")]
    pub consecutive_failure_threshold: u32,
}

fn default_gas_price_gwei() -> u64 {
    5
}
fn default_repeat_count() -> u32 {
    1
}
fn default_consecutive_failure_threshold() -> u32 {
    5
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

fn default_db_path() -> String {
    "job-engine.db".to_string()
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MonitoringConfig {
    pub telegram_bot_token: Option<String>,
    pub telegram_chat_id: Option<String>,
}

impl Config {
    pub fn load(path: &str) -> eyre::Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        Ok(config)
    }

    pub fn load_or_default() -> Self {
        Self::load("config.toml").unwrap_or_else(|_| Self::default())
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            rpc: RpcConfig {
                endpoints: vec![
                    std::env::var("RPC_URL_PRIMARY")
                        .unwrap_or_else(|_| "https://bsc-dataseed.binance.org".into()),
                    std::env::var("RPC_URL_BACKUP1")
                        .unwrap_or_else(|_| "https://bsc-dataseed1.defibit.io".into()),
                ],
                health_ttl_secs: default_health_ttl_secs(),
                acquire_retries: default_acquire_retries(),
                transport_timeout_secs: default_transport_timeout_secs(),
            },
            chain: ChainConfig {
                chain_id: 56,
                router: "0x10ED43C718714eb63d5aA57B78B54704E256024E".into(),
                wrapped_native: "0xbb4CdB9CBd36B01bD1cBaEF95b79eFD60Bb44cB".into(),
                usdt: Some("0x55d398326f99059fF775485246999027B3197955".into()),
            },
            execution: ExecutionConfig {
                default_gas_price_gwei: default_gas_price_gwei(),
                reward_per_tx: false,
                repeat_count: default_repeat_count(),
                consecutive_failure_threshold: default_consecutive_failure_threshold(),
            },
            store: StoreConfig::default(),
            monitoring: MonitoringConfig {
                telegram_bot_token: std::env::var("TELEGRAM_BOT_TOKEN").ok(),
                telegram_chat_id: std::env::var("TELEGRAM_CHAT_ID").ok(),
            },
        }
    }
}

/// Config with addresses/amounts parsed once at startup, per the teacher's
/// `Config`/`ParsedConfig` split.
#[derive(Debug, Clone)]
pub struct ParsedConfig {
    pub router: Address,
    pub wrapped_native: Address,
    pub usdt: Option<Address>,
    pub chain_id: u64,
    pub default_gas_price_wei: U256,
}

impl ParsedConfig {
    pub fn from_config(config: &Config) -> Result<Self, EngineError> {
        let router = config
            .chain
            .router
            .parse()
            .map_err(|e| EngineError::Config(format!("invalid router address: {e}")))?;
        let wrapped_native = config
            .chain
            .wrapped_native
            .parse()
            .map_err(|e| EngineError::Config(format!("invalid wrapped-native address: {e}")))?;
        let usdt = config
            .chain
            .usdt
            .as_ref()
            .map(|s| s.parse())
            .transpose()
            .map_err(|e: ethers::types::ParseError| {
                EngineError::Config(format!("invalid usdt address: {e}"))
            })?;
        let default_gas_price_wei =
            ethers::utils::parse_units(config.execution.default_gas_price_gwei, "gwei")
                .map_err(|e| EngineError::Config(format!("invalid gas price: {e}")))?
                .into();

        Ok(ParsedConfig {
            router,
            wrapped_native,
            usdt,
            chain_id: config.chain.chain_id,
            default_gas_price_wei,
        })
    }
}
