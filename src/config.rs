//! Service configuration
//!
//! Loaded from an optional JSON file, then overridden from the environment
//! using the deployment's variable names (`CARDANO_NETWORK`,
//! `BLOCKFROST_PROJECT_ID`, `ESCROW_SCRIPT_PATH`, ...).

use crate::chain::{
    BlockfrostClient, CachedProvider, KupoClient, MockProvider, ParamsSource, UtxoProvider,
};
use crate::core::{ExecutionBudgets, Network, ProtocolParameters, SelectionStrategy};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Default Kupo endpoint for a local devnet
pub const DEFAULT_KUPO_URL: &str = "http://localhost:1442";

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(#[from] io::Error),
    #[error("Invalid config file: {0}")]
    ParseError(#[from] serde_json::Error),
    #[error("Invalid value for {var}: '{value}'")]
    InvalidValue { var: &'static str, value: String },
    #[error("BLOCKFROST_PROJECT_ID is required for the blockfrost backend")]
    MissingBlockfrostKey,
}

/// Which chain indexer answers UTXO queries
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChainBackend {
    #[default]
    Blockfrost,
    Kupo,
    Mock,
}

impl fmt::Display for ChainBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ChainBackend::Blockfrost => "blockfrost",
            ChainBackend::Kupo => "kupo",
            ChainBackend::Mock => "mock",
        };
        write!(f, "{}", name)
    }
}

impl FromStr for ChainBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "blockfrost" => Ok(ChainBackend::Blockfrost),
            "kupo" => Ok(ChainBackend::Kupo),
            "mock" | "memory" => Ok(ChainBackend::Mock),
            other => Err(format!("unknown chain backend '{}'", other)),
        }
    }
}

/// Application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub network: Network,
    pub backend: ChainBackend,
    pub blockfrost_project_id: Option<String>,
    /// Overrides the per-network Blockfrost endpoint
    pub blockfrost_base_url: Option<String>,
    pub kupo_url: String,
    pub escrow_script_path: Option<PathBuf>,
    pub nft_policy_script_path: Option<PathBuf>,
    /// Address every successful claim pays out to
    pub receiver_address: Option<String>,
    pub utxo_cache_ttl_secs: u64,
    /// How long an unsubmitted script spend holds its reservation
    pub reservation_ttl_secs: u64,
    pub data_dir: PathBuf,
    pub budgets: ExecutionBudgets,
    pub selection: SelectionStrategy,
    /// Fixed parameters; when absent they are queried from the backend
    pub params: Option<ProtocolParameters>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            network: Network::default(),
            backend: ChainBackend::default(),
            blockfrost_project_id: None,
            blockfrost_base_url: None,
            kupo_url: DEFAULT_KUPO_URL.to_string(),
            escrow_script_path: None,
            nft_policy_script_path: None,
            receiver_address: None,
            utxo_cache_ttl_secs: 20,
            reservation_ttl_secs: 600,
            data_dir: PathBuf::from(".skillforge_data"),
            budgets: ExecutionBudgets::default(),
            selection: SelectionStrategy::default(),
            params: None,
        }
    }
}

fn parse<T: FromStr>(var: &'static str, value: String) -> Result<T, ConfigError> {
    value
        .parse()
        .map_err(|_| ConfigError::InvalidValue { var, value })
}

impl AppConfig {
    /// Read `path` when given (missing file is an error), then apply
    /// environment overrides
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => serde_json::from_str(&fs::read_to_string(path)?)?,
            None => Self::default(),
        };
        config.apply_overrides(|var| std::env::var(var).ok())?;
        Ok(config)
    }

    /// Apply overrides from `lookup`, which maps variable names to values
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("CARDANO_NETWORK") {
            self.network = parse("CARDANO_NETWORK", v)?;
        }
        if let Some(v) = lookup("CHAIN_BACKEND") {
            self.backend = parse("CHAIN_BACKEND", v)?;
        }
        if let Some(v) = lookup("BLOCKFROST_PROJECT_ID") {
            self.blockfrost_project_id = Some(v);
        }
        if let Some(v) = lookup("BLOCKFROST_BASE_URL") {
            self.blockfrost_base_url = Some(v);
        }
        if let Some(v) = lookup("KUPO_URL") {
            self.kupo_url = v;
        }
        if let Some(v) = lookup("ESCROW_SCRIPT_PATH") {
            self.escrow_script_path = Some(PathBuf::from(v));
        }
        if let Some(v) = lookup("NFT_POLICY_SCRIPT_PATH") {
            self.nft_policy_script_path = Some(PathBuf::from(v));
        }
        if let Some(v) = lookup("RECEIVER_ADDRESS") {
            self.receiver_address = Some(v);
        }
        if let Some(v) = lookup("UTXO_CACHE_TTL_SECS") {
            self.utxo_cache_ttl_secs = parse("UTXO_CACHE_TTL_SECS", v)?;
        }
        if let Some(v) = lookup("DATA_DIR") {
            self.data_dir = PathBuf::from(v);
        }
        Ok(())
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.utxo_cache_ttl_secs)
    }

    pub fn reservation_ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(i64::try_from(self.reservation_ttl_secs).unwrap_or(i64::MAX))
    }

    /// Blockfrost client for the configured network
    pub fn blockfrost(&self) -> Result<BlockfrostClient, ConfigError> {
        let key = self
            .blockfrost_project_id
            .clone()
            .ok_or(ConfigError::MissingBlockfrostKey)?;
        Ok(match &self.blockfrost_base_url {
            Some(url) => BlockfrostClient::new(url.clone(), key),
            None => BlockfrostClient::for_network(self.network, key),
        })
    }

    /// The configured backend
    pub fn utxo_backend(&self) -> Result<Arc<dyn UtxoProvider>, ConfigError> {
        let backend: Arc<dyn UtxoProvider> = match self.backend {
            ChainBackend::Blockfrost => Arc::new(self.blockfrost()?),
            ChainBackend::Kupo => Arc::new(KupoClient::new(self.kupo_url.clone())),
            ChainBackend::Mock => Arc::new(MockProvider::new()),
        };
        Ok(backend)
    }

    /// The configured backend behind the UTXO cache
    pub fn cached_provider(&self) -> Result<CachedProvider, ConfigError> {
        Ok(CachedProvider::with_ttl(self.utxo_backend()?, self.cache_ttl()))
    }

    /// Where to query protocol parameters, if anywhere
    pub fn params_source(&self) -> Option<Box<dyn ParamsSource>> {
        self.blockfrost()
            .ok()
            .map(|client| Box::new(client) as Box<dyn ParamsSource>)
    }
}
