//! Cloud SQL provider over the PostgreSQL wire protocol
//!
//! Public connections go through a locally running auth proxy, which owns
//! TLS and the IAM credential exchange. Private connections dial the
//! instance's private address directly, negotiate TLS and answer the
//! server's cleartext password request with an IAM access token.

use super::{ConnectRequest, IpType, Provider, Session};
use crate::auth::TokenSource;
use crate::connection::{Connection, ConnectionConfig, SslMode, TlsConfig, Transport};
use crate::instance::InstanceRef;
use crate::row::Row;
use crate::{Error, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::Instrument;

/// Default Postgres port
const DEFAULT_PORT: u16 = 5432;

/// Where the auth proxy listens for an instance
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProxyEndpoint {
    /// TCP listener
    Tcp {
        /// Host
        host: String,
        /// Port
        port: u16,
    },
    /// Socket directory; the proxy creates `<dir>/<instance>/.s.PGSQL.5432`
    Unix(PathBuf),
}

impl Default for ProxyEndpoint {
    fn default() -> Self {
        ProxyEndpoint::Tcp {
            host: "127.0.0.1".to_string(),
            port: DEFAULT_PORT,
        }
    }
}

impl ProxyEndpoint {
    fn socket_path(dir: &std::path::Path, instance: &InstanceRef) -> PathBuf {
        dir.join(instance.to_string())
            .join(format!(".s.PGSQL.{}", DEFAULT_PORT))
    }
}

/// Addresses registered for one instance
#[derive(Debug, Clone)]
pub struct InstanceEndpoints {
    proxy: ProxyEndpoint,
    private_address: Option<String>,
    private_port: u16,
}

impl Default for InstanceEndpoints {
    fn default() -> Self {
        Self::new()
    }
}

impl InstanceEndpoints {
    /// Proxy on `127.0.0.1:5432`, no private address
    pub fn new() -> Self {
        Self {
            proxy: ProxyEndpoint::default(),
            private_address: None,
            private_port: DEFAULT_PORT,
        }
    }

    /// Auth proxy listener
    pub fn proxy(mut self, proxy: ProxyEndpoint) -> Self {
        self.proxy = proxy;
        self
    }

    /// Private IP or DNS name of the instance
    pub fn private_address(mut self, host: impl Into<String>) -> Self {
        self.private_address = Some(host.into());
        self
    }

    /// Port of the private address
    pub fn private_port(mut self, port: u16) -> Self {
        self.private_port = port;
        self
    }
}

/// Provider dialing registered Cloud SQL instances
pub struct CloudSqlProvider {
    instances: HashMap<InstanceRef, InstanceEndpoints>,
    tokens: Option<Arc<dyn TokenSource>>,
    tls: Option<TlsConfig>,
    connect_timeout: Option<Duration>,
    application_name: String,
}

impl std::fmt::Debug for CloudSqlProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CloudSqlProvider")
            .field("instances", &self.instances)
            .field("tokens", &self.tokens.is_some())
            .field("tls", &self.tls)
            .field("connect_timeout", &self.connect_timeout)
            .finish()
    }
}

impl CloudSqlProvider {
    /// Create a builder
    pub fn builder() -> CloudSqlProviderBuilder {
        CloudSqlProviderBuilder {
            instances: HashMap::new(),
            tokens: None,
            sslmode: SslMode::default(),
            ca_cert_path: None,
            connect_timeout: Some(Duration::from_secs(10)),
            application_name: env!("CARGO_PKG_NAME").to_string(),
        }
    }

    fn endpoints(&self, instance: &InstanceRef) -> Result<&InstanceEndpoints> {
        self.instances.get(instance).ok_or_else(|| {
            Error::Config(format!("instance {} is not registered with the provider", instance))
        })
    }

    async fn dial(&self, request: &ConnectRequest) -> Result<Connection> {
        let endpoints = self.endpoints(&request.instance)?;
        let config = ConnectionConfig::builder(&request.database, &request.user)
            .application_name(&self.application_name)
            .build();
        let tokens = if request.enable_iam_auth {
            self.tokens.as_ref()
        } else {
            None
        };

        match request.ip_type {
            Some(IpType::Private) => {
                let host = endpoints.private_address.as_deref().ok_or_else(|| {
                    Error::Config(format!(
                        "instance {} has no private address configured",
                        request.instance
                    ))
                })?;
                tracing::debug!(host, port = endpoints.private_port, "dialing private address");
                let transport =
                    Transport::connect_tcp(host, endpoints.private_port, self.connect_timeout)
                        .await?;
                let mut conn = Connection::new(transport);
                let tls = self.tls.as_ref().map(|tls| (tls, host));
                conn.startup(&config, tls, tokens).await?;
                Ok(conn)
            }
            Some(IpType::Public) => Err(Error::Config(
                "direct public IP connections are not supported; omit ip_type to use the auth proxy"
                    .into(),
            )),
            None => {
                let transport = match &endpoints.proxy {
                    ProxyEndpoint::Tcp { host, port } => {
                        tracing::debug!(host = %host, port, "dialing auth proxy");
                        Transport::connect_tcp(host, *port, self.connect_timeout).await?
                    }
                    ProxyEndpoint::Unix(dir) => {
                        let path = ProxyEndpoint::socket_path(dir, &request.instance);
                        tracing::debug!(path = %path.display(), "dialing auth proxy socket");
                        Transport::connect_unix(&path, self.connect_timeout).await?
                    }
                };
                let mut conn = Connection::new(transport);
                conn.startup(&config, None, tokens).await?;
                Ok(conn)
            }
        }
    }
}

#[async_trait]
impl Provider for CloudSqlProvider {
    async fn connect(&self, request: &ConnectRequest) -> Result<Box<dyn Session>> {
        let span = tracing::info_span!(
            "cloudsql_connect",
            instance = %request.instance,
            private = matches!(request.ip_type, Some(IpType::Private))
        );
        let conn = self.dial(request).instrument(span).await?;
        tracing::debug!(
            server_version = ?conn.server_parameter("server_version"),
            backend_pid = ?conn.process_id(),
            tls = conn.is_tls(),
            "wire session ready"
        );
        Ok(Box::new(PgSession { conn }))
    }

    async fn close(&self) -> Result<()> {
        tracing::debug!("cloud sql provider closed");
        Ok(())
    }
}

/// Builder for [`CloudSqlProvider`]
pub struct CloudSqlProviderBuilder {
    instances: HashMap<InstanceRef, InstanceEndpoints>,
    tokens: Option<Arc<dyn TokenSource>>,
    sslmode: SslMode,
    ca_cert_path: Option<String>,
    connect_timeout: Option<Duration>,
    application_name: String,
}

impl CloudSqlProviderBuilder {
    /// Register an instance
    pub fn instance(mut self, instance: InstanceRef, endpoints: InstanceEndpoints) -> Self {
        self.instances.insert(instance, endpoints);
        self
    }

    /// Token source for IAM login
    pub fn token_source(mut self, tokens: Arc<dyn TokenSource>) -> Self {
        self.tokens = Some(tokens);
        self
    }

    /// TLS mode for private address connections
    pub fn sslmode(mut self, mode: SslMode) -> Self {
        self.sslmode = mode;
        self
    }

    /// Instance server CA for `verify-full`
    pub fn ca_cert_path(mut self, path: impl Into<String>) -> Self {
        self.ca_cert_path = Some(path.into());
        self
    }

    /// Bound on TCP connect; `None` waits for the OS
    pub fn connect_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// `application_name` sent at startup
    pub fn application_name(mut self, name: impl Into<String>) -> Self {
        self.application_name = name.into();
        self
    }

    /// Build the provider
    pub fn build(self) -> Result<CloudSqlProvider> {
        let tls = match self.sslmode {
            SslMode::Disable => None,
            mode => {
                let mut builder = TlsConfig::builder().mode(mode);
                if let Some(path) = self.ca_cert_path {
                    builder = builder.ca_cert_path(path);
                }
                Some(builder.build()?)
            }
        };

        Ok(CloudSqlProvider {
            instances: self.instances,
            tokens: self.tokens,
            tls,
            connect_timeout: self.connect_timeout,
            application_name: self.application_name,
        })
    }
}

/// Session backed by a wire connection
struct PgSession {
    conn: Connection,
}

#[async_trait]
impl Session for PgSession {
    async fn simple_query(&mut self, sql: &str) -> Result<Vec<Row>> {
        self.conn.simple_query(sql).await
    }

    async fn close(self: Box<Self>) -> Result<()> {
        self.conn.close().await
    }
}
