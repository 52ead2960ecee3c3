//! Provisioning configuration
//!
//! Loaded from the environment, from any key lookup (tests), or from a
//! `cloudsql://` DSN (see [`ProvisionConfig::parse_dsn`]).

mod dsn;

use crate::instance::{DatabaseTarget, InstanceRef, NetworkMode, PrincipalIdentity};
use crate::{Error, Result};
use std::time::Duration;

/// Environment variable names
pub mod env_keys {
    /// `project:region:instance`
    pub const INSTANCE_CONNECTION_NAME: &str = "INSTANCE_CONNECTION_NAME";
    /// IAM database user
    pub const DB_USER: &str = "DB_USER";
    /// Database name
    pub const DB_NAME: &str = "DB_NAME";
    /// PRIVATE_PEERED or PUBLIC_PROXIED
    pub const NETWORK_MODE: &str = "NETWORK_MODE";
    /// Persistent pool size
    pub const POOL_SIZE: &str = "POOL_SIZE";
    /// Extra sessions beyond the pool size
    pub const MAX_OVERFLOW: &str = "MAX_OVERFLOW";
    /// Acquire timeout in seconds
    pub const POOL_TIMEOUT: &str = "POOL_TIMEOUT";
    /// Recycle interval in seconds
    pub const POOL_RECYCLE: &str = "POOL_RECYCLE";
}

/// Everything needed to open one session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectTarget {
    /// Target instance
    pub instance: InstanceRef,
    /// IAM principal
    pub principal: PrincipalIdentity,
    /// Database name
    pub database: DatabaseTarget,
    /// Transport path
    pub mode: NetworkMode,
}

impl ConnectTarget {
    /// Build a target
    pub fn new(
        instance: InstanceRef,
        principal: PrincipalIdentity,
        database: DatabaseTarget,
        mode: NetworkMode,
    ) -> Self {
        Self {
            instance,
            principal,
            database,
            mode,
        }
    }

    /// Same target over a different network path
    pub fn with_mode(mut self, mode: NetworkMode) -> Self {
        self.mode = mode;
        self
    }
}

/// Pool sizing and timing
///
/// Owned by the caller; the pool bounds concurrent sessions at
/// `size + max_overflow`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolConfig {
    /// Sessions kept open when idle
    pub size: usize,
    /// Additional sessions allowed under load, closed when returned
    pub max_overflow: usize,
    /// Maximum wait for a free slot
    pub acquire_timeout: Duration,
    /// Sessions older than this are closed instead of reused
    pub recycle: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            size: 5,
            max_overflow: 2,
            acquire_timeout: Duration::from_secs(30),
            recycle: Duration::from_secs(1800),
        }
    }
}

impl PoolConfig {
    /// Set the persistent pool size
    pub fn size(mut self, size: usize) -> Self {
        self.size = size;
        self
    }

    /// Set the overflow allowance
    pub fn max_overflow(mut self, max_overflow: usize) -> Self {
        self.max_overflow = max_overflow;
        self
    }

    /// Set the acquire timeout
    pub fn acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = timeout;
        self
    }

    /// Set the recycle interval
    pub fn recycle(mut self, recycle: Duration) -> Self {
        self.recycle = recycle;
        self
    }

    /// Upper bound on concurrent sessions
    pub fn capacity(&self) -> usize {
        self.size.saturating_add(self.max_overflow)
    }

    /// Reject configurations that could never hand out a session
    pub fn validate(&self) -> Result<()> {
        if self.capacity() == 0 {
            return Err(Error::Config(
                "pool size plus max_overflow must be at least 1".into(),
            ));
        }
        if self.capacity() > tokio::sync::Semaphore::MAX_PERMITS {
            return Err(Error::Config(format!(
                "pool capacity {} exceeds {}",
                self.capacity(),
                tokio::sync::Semaphore::MAX_PERMITS
            )));
        }
        if self.acquire_timeout.is_zero() {
            return Err(Error::Config("pool timeout must be greater than zero".into()));
        }
        Ok(())
    }
}

/// Full provisioning configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisionConfig {
    /// Instance, principal, database and network mode
    pub target: ConnectTarget,
    /// Pool parameters
    pub pool: PoolConfig,
}

impl ProvisionConfig {
    /// Load from process environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load from an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |key: &str| {
            lookup(key)
                .filter(|v| !v.trim().is_empty())
                .ok_or_else(|| Error::Config(format!("{} is not set", key)))
        };

        let instance: InstanceRef = required(env_keys::INSTANCE_CONNECTION_NAME)?.parse()?;
        let principal = PrincipalIdentity::parse(&required(env_keys::DB_USER)?)?;
        let database = DatabaseTarget::new(required(env_keys::DB_NAME)?)?;
        let mode = match lookup(env_keys::NETWORK_MODE) {
            Some(v) if !v.trim().is_empty() => v.parse()?,
            _ => NetworkMode::default(),
        };

        let mut pool = PoolConfig::default();
        if let Some(v) = lookup(env_keys::POOL_SIZE) {
            pool.size = parse_number(env_keys::POOL_SIZE, &v)?;
        }
        if let Some(v) = lookup(env_keys::MAX_OVERFLOW) {
            pool.max_overflow = parse_number(env_keys::MAX_OVERFLOW, &v)?;
        }
        if let Some(v) = lookup(env_keys::POOL_TIMEOUT) {
            pool.acquire_timeout = Duration::from_secs(parse_number(env_keys::POOL_TIMEOUT, &v)?);
        }
        if let Some(v) = lookup(env_keys::POOL_RECYCLE) {
            pool.recycle = Duration::from_secs(parse_number(env_keys::POOL_RECYCLE, &v)?);
        }
        pool.validate()?;

        Ok(Self {
            target: ConnectTarget::new(instance, principal, database, mode),
            pool,
        })
    }
}

pub(crate) fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| Error::Config(format!("{} must be a non-negative integer, got '{}'", key, value)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_pool_config_defaults() {
        let pool = PoolConfig::default();
        assert_eq!(pool.size, 5);
        assert_eq!(pool.max_overflow, 2);
        assert_eq!(pool.acquire_timeout, Duration::from_secs(30));
        assert_eq!(pool.recycle, Duration::from_secs(1800));
        assert_eq!(pool.capacity(), 7);
    }

    #[test]
    fn test_pool_config_rejects_zero_capacity() {
        let pool = PoolConfig::default().size(0).max_overflow(0);
        assert!(pool.validate().is_err());
    }

    #[test]
    fn test_from_lookup_minimal() {
        let config = ProvisionConfig::from_lookup(lookup(&[
            ("INSTANCE_CONNECTION_NAME", "proj:region:inst"),
            ("DB_USER", "svc@proj.iam"),
            ("DB_NAME", "appdb"),
        ]))
        .unwrap();
        assert_eq!(config.target.instance.to_string(), "proj:region:inst");
        assert_eq!(config.target.principal.as_str(), "svc@proj.iam");
        assert_eq!(config.target.database.as_str(), "appdb");
        assert_eq!(config.target.mode, NetworkMode::PublicProxied);
        assert_eq!(config.pool, PoolConfig::default());
    }

    #[test]
    fn test_from_lookup_overrides() {
        let config = ProvisionConfig::from_lookup(lookup(&[
            ("INSTANCE_CONNECTION_NAME", "proj:region:inst"),
            ("DB_USER", "svc@proj.iam"),
            ("DB_NAME", "appdb"),
            ("NETWORK_MODE", "PRIVATE_PEERED"),
            ("POOL_SIZE", "2"),
            ("MAX_OVERFLOW", "0"),
            ("POOL_TIMEOUT", "1"),
            ("POOL_RECYCLE", "60"),
        ]))
        .unwrap();
        assert_eq!(config.target.mode, NetworkMode::PrivatePeered);
        assert_eq!(config.pool.size, 2);
        assert_eq!(config.pool.max_overflow, 0);
        assert_eq!(config.pool.acquire_timeout, Duration::from_secs(1));
        assert_eq!(config.pool.recycle, Duration::from_secs(60));
    }

    #[test]
    fn test_from_lookup_missing_required() {
        let err = ProvisionConfig::from_lookup(lookup(&[
            ("INSTANCE_CONNECTION_NAME", "proj:region:inst"),
            ("DB_NAME", "appdb"),
        ]))
        .unwrap_err();
        assert!(err.to_string().contains("DB_USER"));
    }

    #[test]
    fn test_from_lookup_invalid_number() {
        let result = ProvisionConfig::from_lookup(lookup(&[
            ("INSTANCE_CONNECTION_NAME", "proj:region:inst"),
            ("DB_USER", "svc@proj.iam"),
            ("DB_NAME", "appdb"),
            ("POOL_SIZE", "five"),
        ]));
        assert!(matches!(result, Err(Error::Config(_))));
    }
}
