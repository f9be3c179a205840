//! Configuration loading and management

use crate::core::batch::DEFAULT_MAX_CONCURRENCY;
use crate::core::error::ConfigError;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Complete configuration of a stockpile deployment
///
/// Every section is optional in YAML and falls back to its defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StockpileConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub ledger: LedgerConfig,
    pub order: OrderConfig,
    pub batch: BatchConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Socket address the HTTP server binds to
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8080".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Connection URL; `DATABASE_URL` is used when absent
    pub url: Option<String>,
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: 10,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// How long a transaction waits for a stock row lock
    pub lock_timeout_ms: u64,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            lock_timeout_ms: 5_000,
        }
    }
}

impl LedgerConfig {
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrderConfig {
    /// Upper bound for one order transaction; unbounded when absent
    pub timeout_ms: Option<u64>,
}

impl OrderConfig {
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    /// Items of one batch applied at the same time
    pub max_concurrency: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
        }
    }
}

impl StockpileConfig {
    /// Load configuration from a YAML file
    pub fn from_yaml_file(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&content)
    }

    /// Load configuration from a YAML string
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.bind.parse::<std::net::SocketAddr>().is_err() {
            return Err(ConfigError::InvalidValue {
                field: "server.bind".to_string(),
                value: self.server.bind.clone(),
                message: "expected a socket address such as 127.0.0.1:8080".to_string(),
            });
        }
        if self.database.max_connections == 0 {
            return Err(ConfigError::InvalidValue {
                field: "database.max_connections".to_string(),
                value: "0".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        if self.ledger.lock_timeout_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "ledger.lock_timeout_ms".to_string(),
                value: "0".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        if self.order.timeout_ms == Some(0) {
            return Err(ConfigError::InvalidValue {
                field: "order.timeout_ms".to_string(),
                value: "0".to_string(),
                message: "omit the field for no deadline".to_string(),
            });
        }
        if self.batch.max_concurrency == 0 {
            return Err(ConfigError::InvalidValue {
                field: "batch.max_concurrency".to_string(),
                value: "0".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_empty_yaml_gives_defaults() {
        let config = StockpileConfig::from_yaml_str("{}").unwrap();
        assert_eq!(config, StockpileConfig::default());
        assert_eq!(config.ledger.lock_timeout(), Duration::from_secs(5));
        assert_eq!(config.order.timeout(), None);
        assert_eq!(config.batch.max_concurrency, DEFAULT_MAX_CONCURRENCY);
    }

    #[test]
    fn test_partial_sections() {
        let yaml = r#"
server:
  bind: "0.0.0.0:9000"
order:
  timeout_ms: 2500
batch:
  max_concurrency: 4
"#;
        let config = StockpileConfig::from_yaml_str(yaml).unwrap();
        assert_eq!(config.server.bind, "0.0.0.0:9000");
        assert_eq!(config.order.timeout(), Some(Duration::from_millis(2500)));
        assert_eq!(config.batch.max_concurrency, 4);
        assert_eq!(config.database.max_connections, 10);
    }

    #[test]
    fn test_rejects_zero_concurrency() {
        let err = StockpileConfig::from_yaml_str("batch:\n  max_concurrency: 0\n").unwrap_err();
        assert!(err.to_string().contains("batch.max_concurrency"));
    }

    #[test]
    fn test_rejects_bad_bind_address() {
        assert!(StockpileConfig::from_yaml_str("server:\n  bind: nowhere\n").is_err());
    }

    #[test]
    fn test_from_yaml_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "database:\n  url: postgres://localhost/stockpile\n  max_connections: 3"
        )
        .unwrap();

        let config = StockpileConfig::from_yaml_file(file.path().to_str().unwrap()).unwrap();
        assert_eq!(
            config.database.url.as_deref(),
            Some("postgres://localhost/stockpile")
        );
        assert_eq!(config.database.max_connections, 3);
    }

    #[test]
    fn test_yaml_serialization() {
        let config = StockpileConfig::default();
        let yaml = serde_yaml::to_string(&config).unwrap();
        let parsed = StockpileConfig::from_yaml_str(&yaml).unwrap();
        assert_eq!(parsed, config);
    }
}
