//! Transport abstraction (TCP, TLS over TCP, Unix socket)

use super::tls::{parse_server_name, TlsConfig};
use crate::{Error, Result};
use bytes::BytesMut;
use std::future::Future;
use std::path::Path;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpStream, UnixStream};
use tokio_rustls::client::TlsStream;

/// Byte stream to the database or the auth proxy
pub enum Transport {
    /// Plain TCP
    Tcp(TcpStream),
    /// TLS-encrypted TCP
    Tls(Box<TlsStream<TcpStream>>),
    /// Unix domain socket (auth proxy listening on a socket directory)
    Unix(UnixStream),
}

impl std::fmt::Debug for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Transport::Tcp(_) => f.write_str("Transport::Tcp"),
            Transport::Tls(_) => f.write_str("Transport::Tls"),
            Transport::Unix(_) => f.write_str("Transport::Unix"),
        }
    }
}

/// Run a connect future under an optional deadline, mapping failures to `Transport`
async fn bounded<T, F>(target: &str, timeout: Option<Duration>, fut: F) -> Result<T>
where
    F: Future<Output = std::io::Result<T>>,
{
    let outcome = match timeout {
        Some(limit) => tokio::time::timeout(limit, fut)
            .await
            .map_err(|_| Error::Transport(format!("connect to {} timed out after {:?}", target, limit)))?,
        None => fut.await,
    };
    outcome.map_err(|e| Error::Transport(format!("failed to reach {}: {}", target, e)))
}

impl Transport {
    /// Connect via plain TCP
    pub async fn connect_tcp(host: &str, port: u16, timeout: Option<Duration>) -> Result<Self> {
        let target = format!("{}:{}", host, port);
        let stream = bounded(&target, timeout, TcpStream::connect((host, port))).await?;
        // Best effort: startup and simple queries are latency bound
        let _ = stream.set_nodelay(true);
        Ok(Transport::Tcp(stream))
    }

    /// Connect via Unix socket
    pub async fn connect_unix(path: &Path, timeout: Option<Duration>) -> Result<Self> {
        let target = path.display().to_string();
        let stream = bounded(&target, timeout, UnixStream::connect(path)).await?;
        Ok(Transport::Unix(stream))
    }

    /// Upgrade a plain TCP transport to TLS after SSLRequest negotiation.
    pub async fn upgrade_to_tls(self, tls_config: &TlsConfig, host: &str) -> Result<Self> {
        match self {
            Transport::Tcp(tcp_stream) => {
                let server_name = parse_server_name(host)?;
                let connector = tokio_rustls::TlsConnector::from(tls_config.client_config());
                let tls_stream = connector
                    .connect(server_name, tcp_stream)
                    .await
                    .map_err(|e| Error::Transport(format!("TLS handshake with {} failed: {}", host, e)))?;
                Ok(Transport::Tls(Box::new(tls_stream)))
            }
            Transport::Tls(_) => Err(Error::Config("transport is already TLS-encrypted".into())),
            Transport::Unix(_) => Err(Error::Config("cannot upgrade Unix socket to TLS".into())),
        }
    }

    /// Whether traffic is encrypted
    pub fn is_tls(&self) -> bool {
        matches!(self, Transport::Tls(_))
    }

    /// Write all bytes and flush
    pub async fn send(&mut self, buf: &[u8]) -> Result<()> {
        match self {
            Transport::Tcp(stream) => {
                stream.write_all(buf).await?;
                stream.flush().await?;
            }
            Transport::Tls(stream) => {
                stream.write_all(buf).await?;
                stream.flush().await?;
            }
            Transport::Unix(stream) => {
                stream.write_all(buf).await?;
                stream.flush().await?;
            }
        }
        Ok(())
    }

    /// Read bytes into buffer
    pub async fn read_buf(&mut self, buf: &mut BytesMut) -> Result<usize> {
        let n = match self {
            Transport::Tcp(stream) => stream.read_buf(buf).await?,
            Transport::Tls(stream) => stream.read_buf(buf).await?,
            Transport::Unix(stream) => stream.read_buf(buf).await?,
        };
        Ok(n)
    }

    /// Shutdown the transport
    pub async fn shutdown(&mut self) -> Result<()> {
        match self {
            Transport::Tcp(stream) => stream.shutdown().await?,
            Transport::Tls(stream) => stream.shutdown().await?,
            Transport::Unix(stream) => stream.shutdown().await?,
        }
        Ok(())
    }
}
