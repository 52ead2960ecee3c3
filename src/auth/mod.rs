//! IAM credentials for database login

mod token;

pub use token::{AccessToken, EnvToken, MetadataServerToken, StaticToken, TokenSource, METADATA_TOKEN_URL};
