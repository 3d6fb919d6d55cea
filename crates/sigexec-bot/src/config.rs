//! Application configuration.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sigexec_executor::{AccountSettings, ControllerConfig};
use sigexec_gateway::BybitConfig;
use sigexec_risk::NewsGateConfig;
use sigexec_telemetry::DEFAULT_FILTER;

use crate::error::{AppError, AppResult};

/// Order store backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// Process-local maps. Orders are lost on restart.
    Memory,
    /// JSON Lines journal under `data_dir`, replayed on start.
    #[default]
    Journal,
}

/// Persistence configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistenceConfig {
    #[serde(default)]
    pub backend: StoreBackend,
    /// Directory holding `orders.jsonl`, `signals.jsonl` and `audit.jsonl`.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            data_dir: default_data_dir(),
        }
    }
}

/// Telemetry configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Log filter used when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Prometheus text snapshot written on shutdown.
    #[serde(default)]
    pub metrics_file: Option<PathBuf>,
}

fn default_log_level() -> String {
    DEFAULT_FILTER.to_string()
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            metrics_file: None,
        }
    }
}

/// Exchange adapter for an account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExchangeKind {
    /// Simulated account; nothing leaves the process.
    #[default]
    Paper,
    Bybit,
}

impl ExchangeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Paper => "paper",
            Self::Bybit => "bybit",
        }
    }
}

/// Starting state of a paper account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaperAccountConfig {
    /// Available USDT margin. Default: 10,000.
    #[serde(default = "default_paper_margin")]
    pub margin: Decimal,
    /// Fixed ticker for the account symbol. Unset means every sizing fails.
    #[serde(default)]
    pub price: Option<Decimal>,
}

fn default_paper_margin() -> Decimal {
    Decimal::new(10_000, 0)
}

impl Default for PaperAccountConfig {
    fn default() -> Self {
        Self {
            margin: default_paper_margin(),
            price: None,
        }
    }
}

/// One `[[accounts]]` entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountConfig {
    #[serde(flatten)]
    pub settings: AccountSettings,
    #[serde(default)]
    pub exchange: ExchangeKind,
    #[serde(default)]
    pub bybit: BybitConfig,
    #[serde(default)]
    pub paper: PaperAccountConfig,
    /// Environment variable holding the API key.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    /// Environment variable holding the API secret.
    #[serde(default = "default_api_secret_env")]
    pub api_secret_env: String,
}

fn default_api_key_env() -> String {
    "BYBIT_API_KEY".to_string()
}

fn default_api_secret_env() -> String {
    "BYBIT_API_SECRET".to_string()
}

impl AccountConfig {
    pub fn new(settings: AccountSettings, exchange: ExchangeKind) -> Self {
        Self {
            settings,
            exchange,
            bybit: BybitConfig::default(),
            paper: PaperAccountConfig::default(),
            api_key_env: default_api_key_env(),
            api_secret_env: default_api_secret_env(),
        }
    }
}

/// Top-level configuration file.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub controller: ControllerConfig,
    #[serde(default)]
    pub news: NewsGateConfig,
    #[serde(default)]
    pub persistence: PersistenceConfig,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
    #[serde(default)]
    pub accounts: Vec<AccountConfig>,
}

impl AppConfig {
    /// Load from a specific file.
    pub fn from_file(path: impl AsRef<Path>) -> AppResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            AppError::Config(format!("Failed to read config {}: {e}", path.display()))
        })?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> AppResult<Self> {
        toml::from_str(content).map_err(|e| AppError::Config(format!("Failed to parse config: {e}")))
    }

    /// Reject configs that would start no loops or run two loops for the
    /// same account and symbol.
    pub fn validate(&self) -> AppResult<()> {
        if self.accounts.is_empty() {
            return Err(AppError::Config("no [[accounts]] configured".to_string()));
        }
        self.controller.validate()?;
        self.news
            .validate()
            .map_err(|e| AppError::Config(e.to_string()))?;

        let mut seen = HashSet::new();
        for account in &self.accounts {
            account.settings.validate()?;
            let key = (
                account.settings.user_id.as_str(),
                account.exchange,
                account.settings.symbol.to_ascii_uppercase(),
            );
            if !seen.insert(key) {
                return Err(AppError::Config(format!(
                    "account {} lists {} on {} twice",
                    account.settings.user_id,
                    account.settings.symbol,
                    account.exchange.as_str()
                )));
            }
        }
        Ok(())
    }
}
