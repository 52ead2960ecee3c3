//! Core connection type

use super::state::ConnectionState;
use super::tls::TlsConfig;
use super::transport::Transport;
use crate::auth::TokenSource;
use crate::metrics::labels;
use crate::protocol::constants::PROTOCOL_VERSION;
use crate::protocol::{
    decode_message, encode_message, AuthenticationMessage, BackendMessage, FrontendMessage,
};
use crate::row::Row;
use crate::{Error, Result};
use bytes::{Buf, BytesMut};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::Instrument;

/// Startup parameters for one wire connection
///
/// There is deliberately no password field: the only credential ever sent is
/// an IAM access token obtained from a [`TokenSource`] during startup.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Database name
    pub database: String,
    /// IAM database user
    pub user: String,
    /// Application name for Postgres logs
    pub application_name: Option<String>,
}

impl ConnectionConfig {
    /// Create new configuration with defaults
    pub fn new(database: impl Into<String>, user: impl Into<String>) -> Self {
        Self::builder(database, user).build()
    }

    /// Create a builder for advanced configuration
    pub fn builder(
        database: impl Into<String>,
        user: impl Into<String>,
    ) -> ConnectionConfigBuilder {
        ConnectionConfigBuilder {
            config: ConnectionConfig {
                database: database.into(),
                user: user.into(),
                application_name: None,
            },
        }
    }

    fn startup_params(&self) -> Vec<(String, String)> {
        let mut params = vec![
            ("user".to_string(), self.user.clone()),
            ("database".to_string(), self.database.clone()),
        ];
        if let Some(app_name) = &self.application_name {
            params.push(("application_name".to_string(), app_name.clone()));
        }
        params
    }
}

/// Builder for [`ConnectionConfig`]
#[derive(Debug, Clone)]
pub struct ConnectionConfigBuilder {
    config: ConnectionConfig,
}

impl ConnectionConfigBuilder {
    /// Set application name for Postgres logs
    pub fn application_name(mut self, name: impl Into<String>) -> Self {
        self.config.application_name = Some(name.into());
        self
    }

    /// Build the configuration
    pub fn build(self) -> ConnectionConfig {
        self.config
    }
}

/// Postgres connection
pub struct Connection {
    transport: Option<Transport>,
    state: ConnectionState,
    read_buf: BytesMut,
    process_id: Option<i32>,
    server_params: HashMap<String, String>,
}

impl Connection {
    /// Create connection from transport
    pub fn new(transport: Transport) -> Self {
        Self {
            transport: Some(transport),
            state: ConnectionState::Initial,
            read_buf: BytesMut::with_capacity(8192),
            process_id: None,
            server_params: HashMap::new(),
        }
    }

    /// Get current connection state
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Backend process id, once startup completed
    pub fn process_id(&self) -> Option<i32> {
        self.process_id
    }

    /// Parameter reported by the server during startup (e.g. `server_version`)
    pub fn server_parameter(&self, name: &str) -> Option<&str> {
        self.server_params.get(name).map(String::as_str)
    }

    /// Whether the underlying transport is encrypted
    pub fn is_tls(&self) -> bool {
        self.transport.as_ref().is_some_and(Transport::is_tls)
    }

    fn transport(&mut self) -> Result<&mut Transport> {
        self.transport.as_mut().ok_or(Error::ConnectionClosed)
    }

    /// Negotiate TLS upgrade with the server via the SSLRequest protocol.
    async fn negotiate_tls(&mut self, tls_config: &TlsConfig, host: &str) -> Result<()> {
        self.state.transition(ConnectionState::NegotiatingTls)?;
        self.send_message(&FrontendMessage::SslRequest).await?;

        // Single-byte response: S = proceed with TLS, N = reject
        while self.read_buf.is_empty() {
            let transport = self.transport.as_mut().ok_or(Error::ConnectionClosed)?;
            if transport.read_buf(&mut self.read_buf).await? == 0 {
                return Err(Error::ConnectionClosed);
            }
        }
        let response = self.read_buf.get_u8();

        match response {
            b'S' => {
                // Anything past the S byte arrived before the handshake
                if !self.read_buf.is_empty() {
                    return Err(Error::Protocol(format!(
                        "{} unencrypted byte(s) received after SSLRequest response",
                        self.read_buf.len()
                    )));
                }
                let transport = self.transport.take().ok_or(Error::ConnectionClosed)?;
                self.transport = Some(transport.upgrade_to_tls(tls_config, host).await?);
                tracing::debug!("TLS established");
                Ok(())
            }
            b'N' => Err(Error::Transport(format!(
                "server at {} does not accept TLS (sslmode={})",
                host,
                tls_config.mode()
            ))),
            other => Err(Error::Protocol(format!(
                "unexpected SSLRequest response byte: 0x{:02X}",
                other
            ))),
        }
    }

    /// Perform startup and authentication
    ///
    /// `tls` carries the TLS settings and the host name to verify; `tokens`
    /// answers a cleartext password request with an IAM access token.
    pub async fn startup(
        &mut self,
        config: &ConnectionConfig,
        tls: Option<(&TlsConfig, &str)>,
        tokens: Option<&Arc<dyn TokenSource>>,
    ) -> Result<()> {
        async {
            if let Some((tls_config, host)) = tls {
                self.negotiate_tls(tls_config, host).await?;
            }

            self.state.transition(ConnectionState::Authenticating)?;
            let startup = FrontendMessage::Startup {
                version: PROTOCOL_VERSION,
                params: config.startup_params(),
            };
            self.send_message(&startup).await?;
            self.authenticate(tokens).await?;

            self.state.transition(ConnectionState::Idle)?;
            tracing::debug!("startup complete");
            Ok(())
        }
        .instrument(tracing::info_span!(
            "startup",
            user = %config.user,
            database = %config.database
        ))
        .await
    }

    /// Handle authentication
    async fn authenticate(&mut self, tokens: Option<&Arc<dyn TokenSource>>) -> Result<()> {
        let mut mechanism = labels::MECHANISM_NONE;

        loop {
            match self.receive_message().await? {
                BackendMessage::Authentication(auth) => match auth {
                    AuthenticationMessage::Ok => {
                        tracing::debug!(mechanism, "authentication successful");
                    }
                    AuthenticationMessage::CleartextPassword => {
                        mechanism = labels::MECHANISM_IAM_TOKEN;
                        crate::metrics::counters::auth_attempted(mechanism);

                        let source = tokens.ok_or_else(|| {
                            Error::Auth(
                                "server requested a password but no IAM token source is configured"
                                    .into(),
                            )
                        })?;
                        let token = source.token().await?;
                        self.send_message(&FrontendMessage::Password(token.secret().to_string()))
                            .await?;
                    }
                    AuthenticationMessage::Md5Password => {
                        return Err(Error::Auth(
                            "server requested MD5 password authentication; IAM login requires cleartext token exchange".into(),
                        ));
                    }
                    AuthenticationMessage::Sasl { mechanisms } => {
                        return Err(Error::Auth(format!(
                            "server requested SASL ({}); IAM login requires cleartext token exchange",
                            mechanisms.join(", ")
                        )));
                    }
                    AuthenticationMessage::Other(code) => {
                        return Err(Error::Auth(format!(
                            "unsupported authentication request: {}",
                            code
                        )));
                    }
                },
                BackendMessage::BackendKeyData { process_id, .. } => {
                    self.process_id = Some(process_id);
                }
                BackendMessage::ParameterStatus { name, value } => {
                    tracing::trace!("parameter status: {} = {}", name, value);
                    self.server_params.insert(name, value);
                }
                BackendMessage::NoticeResponse(notice) => {
                    tracing::debug!("notice during startup: {}", notice);
                }
                BackendMessage::ReadyForQuery { .. } => return Ok(()),
                BackendMessage::ErrorResponse(err) => {
                    crate::metrics::counters::auth_failed(mechanism);
                    if err.is_auth_failure() {
                        return Err(Error::Auth(err.to_string()));
                    }
                    return Err(Error::Sql(err.to_string()));
                }
                other => {
                    return Err(Error::Protocol(format!(
                        "unexpected message during auth: {:?}",
                        other
                    )));
                }
            }
        }
    }

    /// Execute a simple query and collect every returned row
    ///
    /// An `ErrorResponse` is surfaced as `Error::Sql` only after the server
    /// reports ReadyForQuery, so the connection stays usable.
    pub async fn simple_query(&mut self, query: &str) -> Result<Vec<Row>> {
        if self.state != ConnectionState::Idle {
            return Err(Error::InvalidState {
                expected: ConnectionState::Idle.to_string(),
                actual: self.state.to_string(),
            });
        }

        self.state.transition(ConnectionState::QueryInProgress)?;
        self.send_message(&FrontendMessage::Query(query.to_string()))
            .await?;

        let mut columns: Arc<[String]> = Arc::from(Vec::new());
        let mut rows = Vec::new();
        let mut failure = None;

        loop {
            match self.receive_message().await? {
                BackendMessage::RowDescription(fields) => {
                    columns = fields.into_iter().map(|f| f.name).collect();
                }
                BackendMessage::DataRow(values) => {
                    let values = values
                        .into_iter()
                        .map(|v| v.map(|b| String::from_utf8_lossy(&b).into_owned()))
                        .collect();
                    rows.push(Row::new(columns.clone(), values));
                }
                BackendMessage::CommandComplete(tag) => {
                    tracing::trace!("command complete: {}", tag);
                }
                BackendMessage::EmptyQueryResponse => {}
                BackendMessage::ErrorResponse(err) => {
                    failure = Some(err);
                }
                BackendMessage::NoticeResponse(notice) => {
                    tracing::debug!("notice: {}", notice);
                }
                BackendMessage::ParameterStatus { name, value } => {
                    self.server_params.insert(name, value);
                }
                BackendMessage::ReadyForQuery { .. } => break,
                other => {
                    self.state = ConnectionState::Closed;
                    return Err(Error::Protocol(format!(
                        "unexpected message in query response: {:?}",
                        other
                    )));
                }
            }
        }

        self.state.transition(ConnectionState::Idle)?;
        match failure {
            Some(err) => Err(Error::Sql(err.to_string())),
            None => Ok(rows),
        }
    }

    /// Send a frontend message
    async fn send_message(&mut self, msg: &FrontendMessage) -> Result<()> {
        let buf = encode_message(msg);
        self.transport()?.send(&buf).await
    }

    /// Receive a backend message
    async fn receive_message(&mut self) -> Result<BackendMessage> {
        loop {
            let decoded = decode_message(&self.read_buf)
                .map_err(|e| Error::Protocol(format!("malformed backend message: {}", e)))?;
            if let Some((msg, consumed)) = decoded {
                self.read_buf.advance(consumed);
                return Ok(msg);
            }

            let transport = self.transport.as_mut().ok_or(Error::ConnectionClosed)?;
            let n = transport.read_buf(&mut self.read_buf).await?;
            if n == 0 {
                return Err(Error::ConnectionClosed);
            }
        }
    }

    /// Close the connection
    pub async fn close(mut self) -> Result<()> {
        self.state.transition(ConnectionState::Closed)?;
        // Terminate is a courtesy; the socket shutdown below is what matters
        let _ = self.send_message(&FrontendMessage::Terminate).await;
        if let Some(mut transport) = self.transport.take() {
            transport.shutdown().await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_config() {
        let config = ConnectionConfig::new("appdb", "svc@proj.iam");
        assert_eq!(config.database, "appdb");
        assert_eq!(config.user, "svc@proj.iam");
        assert!(config.application_name.is_none());
    }

    #[test]
    fn test_startup_params() {
        let config = ConnectionConfig::builder("appdb", "svc@proj.iam")
            .application_name("cloudsql-connect")
            .build();

        let params = config.startup_params();
        assert_eq!(params[0], ("user".to_string(), "svc@proj.iam".to_string()));
        assert_eq!(params[1], ("database".to_string(), "appdb".to_string()));
        assert!(params.contains(&("application_name".to_string(), "cloudsql-connect".to_string())));
        assert_eq!(params.len(), 3);
    }
}
