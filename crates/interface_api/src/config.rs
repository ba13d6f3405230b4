//! API configuration
//!
//! Server settings come from `API_*` variables and engine tunables from
//! `BILLING_*` variables. Anything unset keeps its default.

use config::{Config, ConfigError, Environment, Map};
use serde::Deserialize;

use domain_billing::BillingConfig;
use infra_db::DatabaseConfig;

/// Where the engine keeps its state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Postgres,
    /// Process-local; state is lost on restart
    Memory,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Plain,
    Json,
}

/// API configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Server host
    pub host: String,
    /// Server port
    pub port: u16,
    /// Database URL
    pub database_url: String,
    pub storage: StorageBackend,
    pub max_connections: u32,
    /// Log level
    pub log_level: String,
    pub log_format: LogFormat,
    /// Engine tunables, loaded separately from `BILLING_*`
    #[serde(skip)]
    pub billing: BillingConfig,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            database_url: "postgres://localhost/billing".to_string(),
            storage: StorageBackend::Postgres,
            max_connections: 10,
            log_level: "info".to_string(),
            log_format: LogFormat::Plain,
            billing: BillingConfig::default(),
        }
    }
}

impl ApiConfig {
    /// Loads configuration from the process environment
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_sources(None, None)
    }

    /// Loads configuration from explicit variable maps instead of the
    /// process environment
    ///
    /// Keys keep their prefix, e.g. `API_PORT` or `BILLING_RELEASE_GRACE_SECS`.
    pub fn from_sources(
        api_vars: Option<Map<String, String>>,
        billing_vars: Option<Map<String, String>>,
    ) -> Result<Self, ConfigError> {
        let mut api: ApiConfig = Config::builder()
            .add_source(Environment::with_prefix("API").source(api_vars))
            .build()?
            .try_deserialize()?;

        api.billing = Config::builder()
            .add_source(Environment::with_prefix("BILLING").source(billing_vars))
            .build()?
            .try_deserialize()?;

        Ok(api)
    }

    /// Returns the server address
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Pool settings for the PostgreSQL backend
    pub fn database(&self) -> DatabaseConfig {
        DatabaseConfig::new(self.database_url.clone())
            .max_connections(self.max_connections)
            .statement_timeout(self.billing.operation_timeout())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> Option<Map<String, String>> {
        Some(
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        )
    }

    #[test]
    fn test_empty_environment_uses_defaults() {
        let config = ApiConfig::from_sources(vars(&[]), vars(&[])).unwrap();
        assert_eq!(config.server_addr(), "0.0.0.0:8080");
        assert_eq!(config.storage, StorageBackend::Postgres);
        assert_eq!(config.log_format, LogFormat::Plain);
        assert_eq!(config.billing.release_grace_secs, 0);
    }

    #[test]
    fn test_prefixed_variables_override_defaults() {
        let config = ApiConfig::from_sources(
            vars(&[
                ("API_PORT", "9090"),
                ("API_STORAGE", "memory"),
                ("API_LOG_FORMAT", "json"),
            ]),
            vars(&[
                ("BILLING_RELEASE_GRACE_SECS", "3600"),
                ("BILLING_OUTBOX_BATCH_SIZE", "25"),
            ]),
        )
        .unwrap();

        assert_eq!(config.port, 9090);
        assert_eq!(config.storage, StorageBackend::Memory);
        assert_eq!(config.log_format, LogFormat::Json);
        assert_eq!(config.billing.release_grace_secs, 3600);
        assert_eq!(config.billing.outbox_batch_size, 25);
        assert_eq!(config.billing.scheduler_interval_secs, 300);
    }

    #[test]
    fn test_statement_timeout_follows_operation_timeout() {
        let config = ApiConfig::from_sources(
            vars(&[("API_MAX_CONNECTIONS", "4")]),
            vars(&[("BILLING_OPERATION_TIMEOUT_SECS", "3")]),
        )
        .unwrap();
        let database = config.database();
        assert_eq!(database.max_connections, 4);
        assert_eq!(database.statement_timeout, Some(std::time::Duration::from_secs(3)));
    }

    #[test]
    fn test_unknown_storage_backend_is_rejected() {
        let result = ApiConfig::from_sources(vars(&[("API_STORAGE", "sqlite")]), vars(&[]));
        assert!(result.is_err());
    }
}
