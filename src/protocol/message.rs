//! Protocol message types

use super::constants::SQLSTATE_CLASS_AUTH;
use bytes::Bytes;
use std::fmt;

/// Frontend message (client → server)
#[derive(Clone)]
pub enum FrontendMessage {
    /// Startup message
    Startup {
        /// Protocol version
        version: i32,
        /// Connection parameters
        params: Vec<(String, String)>,
    },

    /// Password message; carries the IAM access token
    Password(String),

    /// Simple query
    Query(String),

    /// Terminate
    Terminate,

    /// SSLRequest (TLS negotiation)
    SslRequest,
}

// Tokens must never reach logs.
impl fmt::Debug for FrontendMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Startup { version, params } => f
                .debug_struct("Startup")
                .field("version", version)
                .field("params", params)
                .finish(),
            Self::Password(_) => f.write_str("Password(<redacted>)"),
            Self::Query(q) => f.debug_tuple("Query").field(q).finish(),
            Self::Terminate => f.write_str("Terminate"),
            Self::SslRequest => f.write_str("SslRequest"),
        }
    }
}

/// Backend message (server → client)
#[derive(Debug, Clone)]
pub enum BackendMessage {
    /// Authentication request
    Authentication(AuthenticationMessage),

    /// Backend key data (for cancellation)
    BackendKeyData {
        /// Process ID
        process_id: i32,
        /// Secret key
        secret_key: i32,
    },

    /// Command complete with its tag (e.g. `SELECT 1`)
    CommandComplete(String),

    /// Data row, text format
    DataRow(Vec<Option<Bytes>>),

    /// Response to an empty query string
    EmptyQueryResponse,

    /// Error response
    ErrorResponse(ErrorFields),

    /// Notice response
    NoticeResponse(ErrorFields),

    /// Parameter status
    ParameterStatus {
        /// Parameter name
        name: String,
        /// Parameter value
        value: String,
    },

    /// Ready for query
    ReadyForQuery {
        /// Transaction status
        status: u8,
    },

    /// Row description
    RowDescription(Vec<FieldDescription>),
}

/// Authentication request variants
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthenticationMessage {
    /// Authentication OK
    Ok,
    /// Cleartext password required
    CleartextPassword,
    /// MD5 password required
    Md5Password,
    /// SASL mechanisms offered
    Sasl {
        /// Mechanism names
        mechanisms: Vec<String>,
    },
    /// Any other request code
    Other(i32),
}

/// Column metadata
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDescription {
    /// Column name
    pub name: String,
    /// Data type OID
    pub type_oid: u32,
}

/// Error/notice fields
#[derive(Debug, Clone, Default)]
pub struct ErrorFields {
    /// Severity (ERROR, FATAL, ...)
    pub severity: Option<String>,
    /// SQLSTATE code
    pub code: Option<String>,
    /// Human-readable message
    pub message: Option<String>,
    /// Additional detail
    pub detail: Option<String>,
    /// Hint
    pub hint: Option<String>,
}

impl ErrorFields {
    /// SQLSTATE class 28 (invalid authorization specification)
    pub fn is_auth_failure(&self) -> bool {
        self.code
            .as_deref()
            .is_some_and(|code| code.starts_with(SQLSTATE_CLASS_AUTH))
    }
}

impl fmt::Display for ErrorFields {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(ref msg) = self.message {
            write!(f, "{}", msg)?;
        }
        if let Some(ref code) = self.code {
            write!(f, " ({})", code)?;
        }
        Ok(())
    }
}
