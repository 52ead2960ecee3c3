//! Connection management
//!
//! This module handles:
//! * Transport abstraction (TCP, TLS over TCP, Unix socket)
//! * Startup with IAM token authentication and simple queries
//! * State machine enforcement
//! * TLS for the private address path

mod conn;
mod state;
mod tls;
mod transport;

pub use conn::{Connection, ConnectionConfig, ConnectionConfigBuilder};
pub use state::ConnectionState;
pub use tls::{parse_server_name, SslMode, TlsConfig};
pub use transport::Transport;
