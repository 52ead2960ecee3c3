//! TLS for direct (private address) connections.
//!
//! The auth proxy terminates TLS itself, so only the private path negotiates
//! TLS here. Instance server certificates are issued by a per-instance CA,
//! which is why `require` (encrypt, no verification) is the default for that
//! path and `verify-full` expects the instance CA via `ca_cert_path`.

use crate::{Error, Result};
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::CryptoProvider;
use rustls_pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};
use std::fs;
use std::sync::Arc;

/// SSL/TLS connection mode, named after the PostgreSQL `sslmode` values.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SslMode {
    /// No TLS (plaintext connection)
    Disable,
    /// TLS required, server certificate is not verified
    #[default]
    Require,
    /// TLS required, certificate chain and hostname verified
    VerifyFull,
}

impl std::fmt::Display for SslMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disable => write!(f, "disable"),
            Self::Require => write!(f, "require"),
            Self::VerifyFull => write!(f, "verify-full"),
        }
    }
}

impl std::str::FromStr for SslMode {
    type Err = Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "disable" => Ok(Self::Disable),
            "require" => Ok(Self::Require),
            "verify-full" => Ok(Self::VerifyFull),
            _ => Err(Error::Config(format!(
                "invalid sslmode '{}': expected disable, require, or verify-full",
                s
            ))),
        }
    }
}

/// Compiled TLS client configuration
#[derive(Clone)]
pub struct TlsConfig {
    mode: SslMode,
    ca_cert_path: Option<String>,
    client_config: Arc<ClientConfig>,
}

impl TlsConfig {
    /// Create a new TLS configuration builder.
    pub fn builder() -> TlsConfigBuilder {
        TlsConfigBuilder::default()
    }

    /// The rustls configuration used for handshakes
    pub fn client_config(&self) -> Arc<ClientConfig> {
        self.client_config.clone()
    }

    /// Mode this configuration was built for
    pub fn mode(&self) -> SslMode {
        self.mode
    }
}

impl std::fmt::Debug for TlsConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsConfig")
            .field("mode", &self.mode)
            .field("ca_cert_path", &self.ca_cert_path)
            .field("client_config", &"<ClientConfig>")
            .finish()
    }
}

/// Builder for [`TlsConfig`]
#[derive(Debug, Default)]
pub struct TlsConfigBuilder {
    mode: SslMode,
    ca_cert_path: Option<String>,
}

impl TlsConfigBuilder {
    /// Set the verification mode (`Disable` is rejected at build time)
    pub fn mode(mut self, mode: SslMode) -> Self {
        self.mode = mode;
        self
    }

    /// PEM file with the instance server CA; system roots are used otherwise
    pub fn ca_cert_path(mut self, path: impl Into<String>) -> Self {
        self.ca_cert_path = Some(path.into());
        self
    }

    /// Build the TLS configuration.
    pub fn build(self) -> Result<TlsConfig> {
        let provider = crypto_provider();
        let builder = ClientConfig::builder_with_provider(provider.clone())
            .with_safe_default_protocol_versions()
            .map_err(|e| Error::Config(format!("TLS protocol setup failed: {}", e)))?;

        let client_config = match self.mode {
            SslMode::Disable => {
                return Err(Error::Config(
                    "sslmode=disable does not need a TlsConfig".into(),
                ))
            }
            SslMode::Require => builder
                .dangerous()
                .with_custom_certificate_verifier(Arc::new(NoServerVerification(provider)))
                .with_no_client_auth(),
            SslMode::VerifyFull => {
                let roots = match &self.ca_cert_path {
                    Some(path) => load_custom_ca(path)?,
                    None => system_roots(),
                };
                builder.with_root_certificates(roots).with_no_client_auth()
            }
        };

        Ok(TlsConfig {
            mode: self.mode,
            ca_cert_path: self.ca_cert_path,
            client_config: Arc::new(client_config),
        })
    }
}

fn crypto_provider() -> Arc<CryptoProvider> {
    CryptoProvider::get_default()
        .cloned()
        .unwrap_or_else(|| Arc::new(rustls::crypto::aws_lc_rs::default_provider()))
}

/// Native roots, falling back to the bundled Mozilla set
fn system_roots() -> RootCertStore {
    let mut store = RootCertStore::empty();
    let native = rustls_native_certs::load_native_certs();
    for err in &native.errors {
        tracing::debug!("skipping native root certificate: {}", err);
    }
    store.add_parsable_certificates(native.certs);
    if store.is_empty() {
        store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    }
    store
}

/// Load a custom CA certificate from a PEM file.
fn load_custom_ca(ca_path: &str) -> Result<RootCertStore> {
    let pem = fs::read(ca_path).map_err(|e| {
        Error::Config(format!(
            "Failed to read CA certificate file '{}': {}",
            ca_path, e
        ))
    })?;

    let certs = rustls_pemfile::certs(&mut pem.as_slice())
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| {
            Error::Config(format!(
                "Failed to parse CA certificate from '{}': {}",
                ca_path, e
            ))
        })?;

    let mut root_store = RootCertStore::empty();
    let (added, _ignored) = root_store.add_parsable_certificates(certs);
    if added == 0 {
        return Err(Error::Config(format!(
            "No valid certificates found in '{}'",
            ca_path
        )));
    }
    Ok(root_store)
}

/// Encrypt-only verifier for `sslmode=require`; signatures are still checked.
#[derive(Debug)]
struct NoServerVerification(Arc<CryptoProvider>);

impl ServerCertVerifier for NoServerVerification {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(
            message,
            cert,
            dss,
            &self.0.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(
            message,
            cert,
            dss,
            &self.0.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.0.signature_verification_algorithms.supported_schemes()
    }
}

/// Server name for TLS SNI; accepts DNS names and IP addresses.
pub fn parse_server_name(host: &str) -> Result<ServerName<'static>> {
    let host = host.trim_end_matches('.');
    ServerName::try_from(host.to_string())
        .map_err(|_| Error::Config(format!("Invalid hostname for TLS: '{}'", host)))
}
