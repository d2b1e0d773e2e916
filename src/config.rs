use serde::{Deserialize, Serialize};
use std::fs;
use std::time::Duration;
use thiserror::Error;

use crate::provider::credentials::PartnerCredentials;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error("Failed to parse config yaml: {0}")]
    Parse(#[from] serde_yaml::Error),
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AppConfig {
    pub log_level: String,
    pub log_dir: String,
    pub log_file: String,
    pub use_json: bool,
    pub rotation: String,
    pub gateway: GatewayConfig,
    /// PostgreSQL connection URL. `DATABASE_URL` wins when set; absent means in-memory stores.
    #[serde(default)]
    pub postgres_url: Option<String>,
    #[serde(default)]
    pub provider: ProviderConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub correlation: CorrelationConfig,
    /// Static partner credentials (dev/sandbox). Production loads them from PostgreSQL.
    #[serde(default)]
    pub partners: Vec<PartnerCredentials>,
}

/// HTTP API listener
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct GatewayConfig {
    pub host: String,
    pub port: u16,
}

/// Outbound payout gateway settings shared by all partners
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ProviderConfig {
    pub timeout_ms: u64,
    pub command_id: String,
    pub result_url: String,
    pub queue_timeout_url: String,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 30_000,
            command_id: "BusinessPayment".to_string(),
            result_url: "http://localhost:8080/callbacks/payout-result".to_string(),
            queue_timeout_url: "http://localhost:8080/callbacks/payout-timeout".to_string(),
        }
    }
}

impl ProviderConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Retry scheduler and backoff settings. Omitted keys take their defaults.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub base_delay_minutes: i64,
    pub multiplier: i64,
    pub cap_minutes: i64,
    pub scan_interval_secs: u64,
    pub batch_size: usize,
    pub inter_retry_delay_ms: u64,
    pub permanent_codes: Vec<String>,
    /// Stored callbacks still unprocessed after this long are replayed
    pub callback_replay_after_secs: i64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_minutes: 5,
            multiplier: 3,
            cap_minutes: 135,
            scan_interval_secs: 300,
            batch_size: 100,
            inter_retry_delay_ms: 500,
            permanent_codes: crate::retry::policy::DEFAULT_PERMANENT_CODES
                .iter()
                .map(|c| c.to_string())
                .collect(),
            callback_replay_after_secs: 60,
        }
    }
}

/// Callback lookup retry, for callbacks racing ahead of the submit commit
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct CorrelationConfig {
    pub lookup_attempts: u32,
    pub lookup_delay_ms: u64,
}

impl Default for CorrelationConfig {
    fn default() -> Self {
        Self {
            lookup_attempts: 3,
            lookup_delay_ms: 200,
        }
    }
}

impl AppConfig {
    pub fn load(env: &str) -> Result<Self, ConfigError> {
        let config_path = format!("config/{}.yaml", env);
        let content = fs::read_to_string(&config_path).map_err(|source| ConfigError::Read {
            path: config_path.clone(),
            source,
        })?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        let mut config: AppConfig = serde_yaml::from_str(content)?;
        if let Ok(url) = std::env::var("DATABASE_URL") {
            config.postgres_url = Some(url);
        }
        Ok(config)
    }
}
