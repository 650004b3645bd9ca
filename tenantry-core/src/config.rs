//! Configuration types

use serde::{Deserialize, Serialize};

use crate::ConfigError;

/// Read-through cache settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Upper bound on cached entries across all namespaces. `None` means
    /// bounded only by process memory and explicit eviction.
    pub max_entries: Option<usize>,
    /// Remember confirmed-absent keys so repeated misses skip storage.
    pub cache_absence: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: None,
            cache_absence: true,
        }
    }
}

impl CacheConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bound the number of cached entries.
    pub fn with_max_entries(mut self, max: usize) -> Self {
        self.max_entries = Some(max);
        self
    }

    /// Enable or disable caching of confirmed-absent keys.
    pub fn with_absence_caching(mut self, enabled: bool) -> Self {
        self.cache_absence = enabled;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_entries == Some(0) {
            return Err(ConfigError::InvalidValue {
                field: "cache.max_entries".to_string(),
                value: "0".to_string(),
                reason: "must be at least 1; omit it for an unbounded cache".to_string(),
            });
        }
        Ok(())
    }
}

/// Top-level store settings, embeddable in an application config file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub cache: CacheConfig,
}

impl StoreConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        let config: StoreConfig = toml::from_str(input).map_err(|e| ConfigError::InvalidValue {
            field: "store".to_string(),
            value: input.lines().next().unwrap_or_default().to_string(),
            reason: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.cache.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_config_builder() {
        let config = CacheConfig::new()
            .with_max_entries(5000)
            .with_absence_caching(false);
        assert_eq!(config.max_entries, Some(5000));
        assert!(!config.cache_absence);
    }

    #[test]
    fn test_from_toml() {
        let config = StoreConfig::from_toml_str("[cache]\nmax_entries = 10\n").expect("parses");
        assert_eq!(config.cache.max_entries, Some(10));
        assert!(config.cache.cache_absence);
    }

    #[test]
    fn test_empty_toml_uses_defaults() {
        let config = StoreConfig::from_toml_str("").expect("parses");
        assert_eq!(config, StoreConfig::default());
    }

    #[test]
    fn test_zero_entries_rejected() {
        let err = StoreConfig::from_toml_str("[cache]\nmax_entries = 0\n").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }
}
