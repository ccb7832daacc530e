use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerConfig {
    pub environment: Environment,
    /// Hard cap applied to `take` on list reads; `None` disables the cap
    pub max_take: Option<u64>,
    /// Maximum nesting depth accepted in a `where` clause
    pub max_where_depth: u32,
    /// Per-store-call timeout; `None` waits indefinitely
    pub op_timeout_ms: Option<u64>,
    pub debug_logging: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Environment {
    Development,
    Staging,
    Production,
}

impl BrokerConfig {
    pub fn from_env() -> Self {
        let environment = match env::var("BROKER_ENV").as_deref() {
            Ok("production") | Ok("prod") => Environment::Production,
            Ok("staging") | Ok("stage") => Environment::Staging,
            _ => Environment::Development,
        };

        // Set defaults based on environment, then override with specific env vars
        match environment {
            Environment::Production => Self::production(),
            Environment::Staging => Self::staging(),
            Environment::Development => Self::development(),
        }
        .with_env_overrides()
    }

    fn with_env_overrides(mut self) -> Self {
        if let Ok(v) = env::var("BROKER_MAX_TAKE") {
            self.max_take = v.parse().ok();
        }
        if let Ok(v) = env::var("BROKER_MAX_WHERE_DEPTH") {
            self.max_where_depth = v.parse().unwrap_or(self.max_where_depth);
        }
        if let Ok(v) = env::var("BROKER_OP_TIMEOUT_MS") {
            self.op_timeout_ms = v.parse().ok();
        }
        if let Ok(v) = env::var("BROKER_DEBUG_LOGGING") {
            self.debug_logging = v.parse().unwrap_or(self.debug_logging);
        }

        self
    }

    pub fn development() -> Self {
        Self {
            environment: Environment::Development,
            max_take: Some(1000),
            max_where_depth: 10,
            op_timeout_ms: None,
            debug_logging: true,
        }
    }

    pub fn staging() -> Self {
        Self {
            environment: Environment::Staging,
            max_take: Some(500),
            max_where_depth: 5,
            op_timeout_ms: Some(10_000),
            debug_logging: false,
        }
    }

    pub fn production() -> Self {
        Self {
            environment: Environment::Production,
            max_take: Some(100),
            max_where_depth: 3,
            op_timeout_ms: Some(5_000),
            debug_logging: false,
        }
    }

    /// Store-call timeout as a `Duration`, when one is configured
    pub fn op_timeout(&self) -> Option<Duration> {
        self.op_timeout_ms.map(Duration::from_millis)
    }
}

// Process-wide defaults - resolved once, cloned into each broker at construction
pub static CONFIG: Lazy<BrokerConfig> = Lazy::new(BrokerConfig::from_env);

// Convenience function for accessing config
pub fn config() -> &'static BrokerConfig {
    &CONFIG
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_development_config() {
        let config = BrokerConfig::development();
        assert_eq!(config.max_take, Some(1000));
        assert!(config.op_timeout().is_none());
        assert!(config.debug_logging);
    }

    #[test]
    fn test_default_production_config() {
        let config = BrokerConfig::production();
        assert_eq!(config.max_take, Some(100));
        assert_eq!(config.op_timeout(), Some(Duration::from_millis(5_000)));
        assert!(!config.debug_logging);
    }
}
