//! Connection pool configuration.

use std::time::Duration;

use deadpool_postgres::{Config, ManagerConfig, Pool, PoolConfig, RecyclingMethod, Runtime};
use tenantry_core::{ConfigError, StoreResult};
use tokio_postgres::NoTls;

// ============================================================================
// CONNECTION POOL CONFIGURATION
// ============================================================================

/// Database connection pool configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DbConfig {
    /// PostgreSQL host
    pub host: String,
    /// PostgreSQL port
    pub port: u16,
    /// Database name
    pub dbname: String,
    /// Database user
    pub user: String,
    /// Database password
    pub password: String,
    /// Maximum pool size
    pub max_size: usize,
    /// How long `acquire` waits for a free connection
    pub timeout: Duration,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            dbname: "tenantry".to_string(),
            user: "postgres".to_string(),
            password: String::new(),
            max_size: 16,
            timeout: Duration::from_secs(30),
        }
    }
}

impl DbConfig {
    /// Read `TENANTRY_DB_*` variables, falling back to the defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            host: lookup("TENANTRY_DB_HOST").unwrap_or(defaults.host),
            port: lookup("TENANTRY_DB_PORT")
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.port),
            dbname: lookup("TENANTRY_DB_NAME").unwrap_or(defaults.dbname),
            user: lookup("TENANTRY_DB_USER").unwrap_or(defaults.user),
            password: lookup("TENANTRY_DB_PASSWORD").unwrap_or(defaults.password),
            max_size: lookup("TENANTRY_DB_POOL_SIZE")
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.max_size),
            timeout: lookup("TENANTRY_DB_TIMEOUT")
                .and_then(|s| s.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.timeout),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.host.is_empty() {
            return Err(ConfigError::MissingRequired {
                field: "host".to_string(),
            });
        }
        if self.max_size == 0 {
            return Err(ConfigError::InvalidValue {
                field: "max_size".to_string(),
                value: "0".to_string(),
                reason: "pool needs at least one connection".to_string(),
            });
        }
        Ok(())
    }

    /// Create a connection pool. No connection is opened until the first
    /// acquire.
    pub fn create_pool(&self) -> StoreResult<Pool> {
        self.validate()?;

        let mut cfg = Config::new();
        cfg.host = Some(self.host.clone());
        cfg.port = Some(self.port);
        cfg.dbname = Some(self.dbname.clone());
        cfg.user = Some(self.user.clone());
        cfg.password = Some(self.password.clone());
        cfg.manager = Some(ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        });

        let mut pool = PoolConfig::new(self.max_size);
        pool.timeouts.wait = Some(self.timeout);
        pool.timeouts.create = Some(self.timeout);
        cfg.pool = Some(pool);

        let pool = cfg
            .create_pool(Some(Runtime::Tokio1), NoTls)
            .map_err(|e| ConfigError::InvalidValue {
                field: "pool".to_string(),
                value: format!("{}:{}/{}", self.host, self.port, self.dbname),
                reason: e.to_string(),
            })?;
        tracing::info!(
            host = %self.host,
            port = self.port,
            dbname = %self.dbname,
            max_size = self.max_size,
            "connection pool created"
        );
        Ok(pool)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_lookup_overrides_defaults() {
        let vars: HashMap<&str, &str> = [
            ("TENANTRY_DB_HOST", "db.internal"),
            ("TENANTRY_DB_PORT", "6432"),
            ("TENANTRY_DB_POOL_SIZE", "4"),
            ("TENANTRY_DB_TIMEOUT", "not-a-number"),
        ]
        .into_iter()
        .collect();
        let config = DbConfig::from_lookup(|name| vars.get(name).map(|v| v.to_string()));

        assert_eq!(config.host, "db.internal");
        assert_eq!(config.port, 6432);
        assert_eq!(config.max_size, 4);
        assert_eq!(config.dbname, "tenantry");
        assert_eq!(config.timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_zero_pool_rejected() {
        let config = DbConfig {
            max_size: 0,
            ..DbConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { .. })
        ));
        assert!(config.create_pool().is_err());
    }

    #[tokio::test]
    async fn test_pool_is_lazy() {
        let pool = DbConfig::default().create_pool().expect("pool");
        assert_eq!(pool.status().size, 0);
        assert_eq!(pool.status().max_size, 16);
    }
}
