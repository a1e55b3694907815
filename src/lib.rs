pub mod config;
pub mod logging;

pub use config::{Config, ConfigError, EnvVars, ExchangeConfig, ExchangeType};
pub use logging::{init_tracing, DocumentStore, LogRecord, LoggingGuard, RemoteLogHandler};
