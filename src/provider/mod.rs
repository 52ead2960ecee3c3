//! Connection providers
//!
//! A [`Provider`] turns a [`ConnectRequest`] into a live [`Session`]. The
//! connector owns exactly one provider and is the only caller of
//! [`Provider::close`].

mod cloudsql;
mod fake;

pub use cloudsql::{CloudSqlProvider, CloudSqlProviderBuilder, InstanceEndpoints, ProxyEndpoint};
pub use fake::{FakeProvider, FakeProviderBuilder};

use crate::instance::InstanceRef;
use crate::row::Row;
use crate::Result;
use async_trait::async_trait;

/// IP address class to dial
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IpType {
    /// Instance private address, reachable only over a peered network
    Private,
    /// Instance public address
    Public,
}

/// Parameters for one provider connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectRequest {
    /// Target instance
    pub instance: InstanceRef,
    /// IAM database user (normalized principal)
    pub user: String,
    /// Database name
    pub database: String,
    /// Explicit address class; `None` leaves routing to the provider default
    pub ip_type: Option<IpType>,
    /// Authenticate with an IAM token instead of a password
    pub enable_iam_auth: bool,
}

/// Source of database sessions
#[async_trait]
pub trait Provider: Send + Sync {
    /// Prepare the provider before the first connection
    async fn start(&self) -> Result<()> {
        Ok(())
    }

    /// Open one authenticated session
    async fn connect(&self, request: &ConnectRequest) -> Result<Box<dyn Session>>;

    /// Release provider resources; called once, after every session is closed
    async fn close(&self) -> Result<()>;
}

/// One live database session
#[async_trait]
pub trait Session: Send {
    /// Run a simple-protocol query
    async fn simple_query(&mut self, sql: &str) -> Result<Vec<Row>>;

    /// Close the session
    async fn close(self: Box<Self>) -> Result<()>;
}
