pub mod env;
pub mod types;
pub mod validate;

pub use env::EnvVars;
pub use types::*;
pub use validate::{CredentialIssue, CredentialKind};

use serde::Deserialize;
use std::ops::Index;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

pub const DEFAULT_ENV: &str = "development";
pub const DEFAULT_LOG_LEVEL: &str = "INFO";
pub const SETTINGS_FILE: &str = "config/acdn.toml";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to create directory {}: {source}", .path.display())]
    CreateDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid settings file {}: {source}", .path.display())]
    Settings {
        path: PathBuf,
        #[source]
        source: config::ConfigError,
    },
}

/// Exchange settings keyed by name, kept in insertion order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Exchanges {
    entries: Vec<ExchangeConfig>,
}

impl Exchanges {
    pub fn get(&self, name: &str) -> Option<&ExchangeConfig> {
        self.entries.iter().find(|e| e.name == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ExchangeConfig> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn enabled(&self) -> Vec<&ExchangeConfig> {
        self.entries.iter().filter(|e| e.enabled).collect()
    }
}

impl From<Vec<ExchangeConfig>> for Exchanges {
    /// Later entries with a duplicate name are dropped.
    fn from(candidates: Vec<ExchangeConfig>) -> Self {
        let mut entries: Vec<ExchangeConfig> = Vec::with_capacity(candidates.len());
        for exchange in candidates {
            if entries.iter().any(|e| e.name == exchange.name) {
                warn!("Duplicate exchange entry {} ignored", exchange.name);
                continue;
            }
            entries.push(exchange);
        }
        Self { entries }
    }
}

impl Index<&str> for Exchanges {
    type Output = ExchangeConfig;

    fn index(&self, name: &str) -> &Self::Output {
        self.get(name)
            .unwrap_or_else(|| panic!("unknown exchange: {name}"))
    }
}

#[derive(Debug, Default, Deserialize)]
struct SettingsFile {
    #[serde(default)]
    remote_log: RemoteLogSettings,
}

/// Process-wide settings, assembled once at startup and passed to each
/// subsystem that needs it.
#[derive(Debug, Clone)]
pub struct Config {
    pub env: String,
    pub log_level: String,
    pub base_dir: PathBuf,
    pub data_dir: PathBuf,
    pub logs_dir: PathBuf,
    pub models_dir: PathBuf,
    pub trading: TradingConfig,
    pub ml: MLConfig,
    pub exchanges: Exchanges,
    /// Empty when remote logging/storage is unavailable.
    pub firebase_credentials_path: String,
    pub remote_log: RemoteLogSettings,
    /// Problems found while validating exchange credentials.
    pub credential_issues: Vec<CredentialIssue>,
}

impl Config {
    /// Assemble the configuration from the process environment, rooted at
    /// the project directory.
    pub fn load(env: Option<&str>) -> Result<Self, ConfigError> {
        Self::load_with_base_dir(env, project_base_dir())
    }

    pub fn load_with_base_dir<P: AsRef<Path>>(
        env: Option<&str>,
        base_dir: P,
    ) -> Result<Self, ConfigError> {
        Self::from_env(env, base_dir, &EnvVars::from_process())
    }

    /// Build, validate, and provision directories.
    ///
    /// Missing credentials or a missing Firebase path only produce
    /// warnings. Only directory creation and a malformed settings file fail.
    pub fn from_env<P: AsRef<Path>>(
        env: Option<&str>,
        base_dir: P,
        vars: &EnvVars,
    ) -> Result<Self, ConfigError> {
        let base_dir = base_dir.as_ref().to_path_buf();

        let env = env
            .filter(|e| !e.is_empty())
            .unwrap_or_else(|| vars.get_or("ACDN_ENV", DEFAULT_ENV))
            .to_string();
        let log_level = vars.get_or("LOG_LEVEL", DEFAULT_LOG_LEVEL).to_string();

        let (exchanges, issues) = validate::validate_exchanges(default_exchanges(), vars);
        for issue in &issues {
            warn!(
                exchange = %issue.exchange,
                env_var = %issue.env_var,
                "{} not set for {}. Disabling.",
                issue.kind,
                issue.exchange
            );
        }

        let firebase_credentials_path = vars
            .get_or("FIREBASE_CREDENTIALS_PATH", "")
            .to_string();
        if firebase_credentials_path.is_empty() {
            warn!("Firebase credentials path not set. Firestore will be unavailable.");
        }

        let settings = load_settings_file(&base_dir.join(SETTINGS_FILE))?;

        let config = Self {
            env,
            log_level,
            data_dir: base_dir.join("data"),
            logs_dir: base_dir.join("logs"),
            models_dir: base_dir.join("models"),
            base_dir,
            trading: TradingConfig::default(),
            ml: MLConfig::default(),
            exchanges: Exchanges::from(exchanges),
            firebase_credentials_path,
            remote_log: settings.remote_log,
            credential_issues: issues,
        };

        config.setup_directories()?;

        info!(
            env = %config.env,
            base_dir = %config.base_dir.display(),
            enabled = config.exchanges.enabled().len(),
            "Configuration loaded"
        );

        Ok(config)
    }

    /// Re-emit the startup report. Useful once the tracing subscriber is
    /// installed, since assembly runs before it.
    pub fn log_summary(&self) {
        info!(env = %self.env, log_level = %self.log_level, "ACDN configuration");
        for exchange in self.exchanges.iter() {
            if exchange.enabled {
                info!(
                    exchange = %exchange.name,
                    kind = %exchange.exchange_type,
                    rate_limit = exchange.rate_limit,
                    "Exchange enabled"
                );
            }
        }
        for issue in &self.credential_issues {
            warn!(exchange = %issue.exchange, env_var = %issue.env_var, "{}", issue);
        }
        if !self.remote_logging_available() {
            warn!("Firebase credentials path not set. Firestore will be unavailable.");
        }
    }

    pub fn get_enabled_exchanges(&self) -> Vec<&ExchangeConfig> {
        self.exchanges.enabled()
    }

    pub fn checkpoint_dir(&self) -> PathBuf {
        self.base_dir.join(&self.ml.model_checkpoint_dir)
    }

    pub fn remote_logging_available(&self) -> bool {
        !self.firebase_credentials_path.is_empty()
    }

    fn setup_directories(&self) -> Result<(), ConfigError> {
        // The checkpoint directory lives under models/, which it creates.
        for dir in [self.data_dir.clone(), self.logs_dir.clone(), self.checkpoint_dir()] {
            std::fs::create_dir_all(&dir).map_err(|source| ConfigError::CreateDirectory {
                path: dir.clone(),
                source,
            })?;
            debug!("Directory ready: {}", dir.display());
        }
        Ok(())
    }
}

/// Crate root, fixed at compile time so it does not depend on the working
/// directory.
pub fn project_base_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
}

fn default_exchanges() -> Vec<ExchangeConfig> {
    vec![
        // Crypto
        ExchangeConfig::new(
            "binance",
            ExchangeType::Crypto,
            "BINANCE_API_KEY",
            "BINANCE_API_SECRET",
        )
        .with_rate_limit(20),
        ExchangeConfig::new(
            "coinbase",
            ExchangeType::Crypto,
            "COINBASE_API_KEY",
            "COINBASE_API_SECRET",
        )
        .with_rate_limit(15),
        // Stocks via Alpaca
        ExchangeConfig::new(
            "alpaca",
            ExchangeType::Stock,
            "ALPACA_API_KEY",
            "ALPACA_API_SECRET",
        )
        .with_rate_limit(200),
    ]
}

fn load_settings_file(path: &Path) -> Result<SettingsFile, ConfigError> {
    if !path.exists() {
        return Ok(SettingsFile::default());
    }

    config::Config::builder()
        .add_source(config::File::from(path))
        .build()
        .and_then(|settings| settings.try_deserialize())
        .map_err(|source| ConfigError::Settings {
            path: path.to_path_buf(),
            source,
        })
}
