//! Minimal Postgres v3 wire protocol: startup, cleartext auth, simple query

pub mod constants;
pub mod decode;
pub mod encode;
pub mod message;

pub use decode::decode_message;
pub use encode::encode_message;
pub use message::{AuthenticationMessage, BackendMessage, ErrorFields, FieldDescription, FrontendMessage};
