//! cloudsql-connect: IAM-authenticated connection provisioning for managed Postgres
//!
//! A [`Connector`] owns one [`Provider`] and opens sessions to a Cloud SQL
//! instance as an IAM principal, either through the auth proxy
//! ([`NetworkMode::PublicProxied`]) or over a peered private network
//! ([`NetworkMode::PrivatePeered`]). Sessions can be pooled with bounded
//! concurrency, acquire timeouts and age-based recycling.
//!
//! ```no_run
//! use cloudsql_connect::{
//!     CloudSqlProvider, Connector, InstanceEndpoints, MetadataServerToken, ProvisionConfig,
//! };
//! use std::sync::Arc;
//!
//! # async fn run() -> cloudsql_connect::Result<()> {
//! let config = ProvisionConfig::from_env()?;
//! let provider = CloudSqlProvider::builder()
//!     .instance(config.target.instance.clone(), InstanceEndpoints::new())
//!     .token_source(Arc::new(MetadataServerToken::new()?))
//!     .build()?;
//!
//! let connector = Connector::new(Arc::new(provider));
//! let mut session = connector.acquire(&config.target).await?;
//! let one: i64 = session.query_scalar("SELECT 1").await?;
//! assert_eq!(one, 1);
//! connector.release(session).await?;
//! connector.shutdown().await?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod auth;
pub mod config;
pub mod connection;
pub mod error;
pub mod instance;
pub mod metrics;
pub mod policy;
pub mod pool;
pub mod protocol;
pub mod provider;
pub mod row;

pub use auth::{AccessToken, EnvToken, MetadataServerToken, StaticToken, TokenSource};
pub use config::{ConnectTarget, PoolConfig, ProvisionConfig};
pub use connection::SslMode;
pub use error::{Error, Result};
pub use instance::{DatabaseTarget, InstanceRef, NetworkMode, PrincipalIdentity};
pub use policy::{ConnectionSession, Connector, ProviderState};
pub use pool::{Pool, PoolStatus, PooledSession};
pub use provider::{
    CloudSqlProvider, ConnectRequest, FakeProvider, InstanceEndpoints, IpType, Provider,
    ProxyEndpoint, Session,
};
pub use row::Row;
