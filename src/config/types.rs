use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExchangeType {
    Crypto,
    Stock,
    Forex,
    Derivatives,
}

impl ExchangeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExchangeType::Crypto => "crypto",
            ExchangeType::Stock => "stock",
            ExchangeType::Forex => "forex",
            ExchangeType::Derivatives => "derivatives",
        }
    }
}

impl fmt::Display for ExchangeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Connection settings for a single venue.
///
/// `api_key_env` and `api_secret_env` hold the *names* of the environment
/// variables carrying the credentials, never the credentials themselves.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExchangeConfig {
    pub name: String,
    #[serde(rename = "type")]
    pub exchange_type: ExchangeType,
    pub api_key_env: String,
    pub api_secret_env: String,
    /// Requests per second.
    pub rate_limit: u32,
    pub timeout_secs: u64,
    pub enabled: bool,
}

impl ExchangeConfig {
    pub const DEFAULT_RATE_LIMIT: u32 = 10;
    pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

    pub fn new(
        name: impl Into<String>,
        exchange_type: ExchangeType,
        api_key_env: impl Into<String>,
        api_secret_env: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            exchange_type,
            api_key_env: api_key_env.into(),
            api_secret_env: api_secret_env.into(),
            rate_limit: Self::DEFAULT_RATE_LIMIT,
            timeout_secs: Self::DEFAULT_TIMEOUT_SECS,
            enabled: true,
        }
    }

    pub fn with_rate_limit(mut self, rate_limit: u32) -> Self {
        self.rate_limit = rate_limit;
        self
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Risk limits shared by every strategy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradingConfig {
    pub max_position_size_usd: Decimal,
    pub max_daily_loss_pct: Decimal,
    pub stop_loss_pct: Decimal,
    pub take_profit_pct: Decimal,
    pub correlation_threshold: f64,
    pub volatility_threshold: f64,
}

impl Default for TradingConfig {
    fn default() -> Self {
        Self {
            max_position_size_usd: dec!(10000),
            max_daily_loss_pct: dec!(2.0),
            stop_loss_pct: dec!(1.0),
            take_profit_pct: dec!(2.0),
            correlation_threshold: 0.7,
            volatility_threshold: 0.15,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MLConfig {
    /// Relative to the project base directory.
    pub model_checkpoint_dir: String,
    pub training_batch_size: usize,
    pub prediction_batch_size: usize,
    pub sequence_length: usize,
    pub feature_count: usize,
}

impl Default for MLConfig {
    fn default() -> Self {
        Self {
            model_checkpoint_dir: "models/checkpoints".to_string(),
            training_batch_size: 64,
            prediction_batch_size: 32,
            sequence_length: 100,
            feature_count: 50,
        }
    }
}

/// Batching and delivery policy for the remote log sink.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteLogSettings {
    pub batch_size: usize,
    pub flush_timeout_ms: u64,
    /// Attempts made after the first failed write.
    pub max_retries: u32,
    pub retry_backoff_ms: u64,
    /// Append undeliverable batches to `logs/remote_fallback.jsonl`.
    pub fallback_to_file: bool,
    /// Full batches allowed to wait for the worker. Batches beyond this are
    /// dropped rather than queued.
    pub max_pending_batches: usize,
    /// Upper bound on the final flush plus worker join at shutdown.
    pub shutdown_timeout_ms: u64,
}

impl RemoteLogSettings {
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }

    pub fn flush_timeout(&self) -> Duration {
        Duration::from_millis(self.flush_timeout_ms)
    }

    /// Linear backoff: the n-th retry waits `n * retry_backoff_ms`.
    pub fn backoff(&self, retry: u32) -> Duration {
        Duration::from_millis(self.retry_backoff_ms.saturating_mul(u64::from(retry)))
    }
}

impl Default for RemoteLogSettings {
    fn default() -> Self {
        Self {
            batch_size: 100,
            flush_timeout_ms: 5_000,
            max_retries: 2,
            retry_backoff_ms: 200,
            fallback_to_file: true,
            max_pending_batches: 8,
            shutdown_timeout_ms: 10_000,
        }
    }
}
