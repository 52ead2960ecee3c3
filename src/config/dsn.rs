//! DSN parsing
//!
//! Format:
//! * cloudsql://user@project:region:instance/database[?params]
//!
//! Recognized params: `network_mode`, `pool_size`, `max_overflow`,
//! `pool_timeout` (seconds), `pool_recycle` (seconds). The user part is the
//! IAM identity, so it contains an `@` of its own; the last `@` before the
//! path separates it from the instance. `%40` is accepted for `@`.

use super::{parse_number, ConnectTarget, PoolConfig, ProvisionConfig};
use crate::instance::{DatabaseTarget, InstanceRef, NetworkMode, PrincipalIdentity};
use crate::{Error, Result};
use std::time::Duration;

const SCHEME: &str = "cloudsql://";

/// Extract a query parameter value from a query string
fn parse_query_param(query_string: &str, param: &str) -> Option<String> {
    query_string
        .trim_start_matches('?')
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .find(|(key, _)| *key == param)
        .map(|(_, value)| value.to_string())
}

impl ProvisionConfig {
    /// Parse a `cloudsql://` DSN
    pub fn parse_dsn(s: &str) -> Result<Self> {
        let rest = s.strip_prefix(SCHEME).ok_or_else(|| {
            Error::Config(format!("connection string must start with {}", SCHEME))
        })?;

        let (rest, query_string) = match rest.find('?') {
            Some(pos) => rest.split_at(pos),
            None => (rest, ""),
        };

        let (authority, database) = rest
            .split_once('/')
            .ok_or_else(|| Error::Config("connection string is missing /database".into()))?;

        let (user, instance) = authority.rsplit_once('@').ok_or_else(|| {
            Error::Config("connection string is missing the IAM user before the instance".into())
        })?;
        let user = user.replace("%40", "@");

        let instance: InstanceRef = instance.parse()?;
        let principal = PrincipalIdentity::parse(&user)?;
        let database = DatabaseTarget::new(database)?;

        let mode = match parse_query_param(query_string, "network_mode") {
            Some(v) => v.parse()?,
            None => NetworkMode::default(),
        };

        let mut pool = PoolConfig::default();
        if let Some(v) = parse_query_param(query_string, "pool_size") {
            pool.size = parse_number("pool_size", &v)?;
        }
        if let Some(v) = parse_query_param(query_string, "max_overflow") {
            pool.max_overflow = parse_number("max_overflow", &v)?;
        }
        if let Some(v) = parse_query_param(query_string, "pool_timeout") {
            pool.acquire_timeout = Duration::from_secs(parse_number("pool_timeout", &v)?);
        }
        if let Some(v) = parse_query_param(query_string, "pool_recycle") {
            pool.recycle = Duration::from_secs(parse_number("pool_recycle", &v)?);
        }
        pool.validate()?;

        Ok(Self {
            target: ConnectTarget::new(instance, principal, database, mode),
            pool,
        })
    }
}
