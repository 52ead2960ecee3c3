//! Identifiers for the target instance, principal and database

use crate::{Error, Result};
use std::fmt;
use std::str::FromStr;

/// Suffix dropped from service-account emails to form the database user name
const SERVICE_ACCOUNT_SUFFIX: &str = ".gserviceaccount.com";

/// Managed instance identifier (`project:region:instance`)
///
/// Domain-scoped projects carry their own colon (`example.com:proj`), so the
/// string is split from the right.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct InstanceRef {
    project: String,
    region: String,
    instance: String,
}

impl InstanceRef {
    /// Build from components
    pub fn new(
        project: impl Into<String>,
        region: impl Into<String>,
        instance: impl Into<String>,
    ) -> Result<Self> {
        let instance_ref = Self {
            project: project.into(),
            region: region.into(),
            instance: instance.into(),
        };
        if instance_ref.project.is_empty()
            || instance_ref.region.is_empty()
            || instance_ref.instance.is_empty()
        {
            return Err(Error::Config(format!(
                "invalid instance connection name '{}': expected project:region:instance",
                instance_ref
            )));
        }
        Ok(instance_ref)
    }

    /// Project id
    pub fn project(&self) -> &str {
        &self.project
    }

    /// Region
    pub fn region(&self) -> &str {
        &self.region
    }

    /// Instance name
    pub fn instance(&self) -> &str {
        &self.instance
    }
}

impl FromStr for InstanceRef {
    type Err = Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let mut parts = s.trim().rsplitn(3, ':');
        let instance = parts.next().unwrap_or_default();
        let region = parts.next().unwrap_or_default();
        let project = parts.next().unwrap_or_default();
        Self::new(project, region, instance)
    }
}

impl fmt::Display for InstanceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.project, self.region, self.instance)
    }
}

/// IAM identity used as the database user (never carries a password)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PrincipalIdentity(String);

impl PrincipalIdentity {
    /// Validate and normalize an IAM identity
    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.is_empty() {
            return Err(Error::Config("database user must not be empty".into()));
        }
        if s.contains(':') {
            return Err(Error::Config(
                "database user must be an IAM identity without a password".into(),
            ));
        }
        if !s.contains('@') {
            return Err(Error::Config(format!(
                "database user '{}' is not an IAM identity (expected name@domain)",
                s
            )));
        }
        let user = s.strip_suffix(SERVICE_ACCOUNT_SUFFIX).unwrap_or(s);
        Ok(Self(user.to_string()))
    }

    /// Database user name
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for PrincipalIdentity {
    type Err = Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for PrincipalIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Logical database within the instance
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DatabaseTarget(String);

impl DatabaseTarget {
    /// Validate a database name
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(Error::Config("database name must not be empty".into()));
        }
        Ok(Self(name))
    }

    /// Database name
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for DatabaseTarget {
    type Err = Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl fmt::Display for DatabaseTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Transport path to the instance
///
/// `PrivatePeered` assumes a private route already exists (VPC peering or a
/// serverless connector); it is not checked here.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum NetworkMode {
    /// Direct connection to the instance's private address
    PrivatePeered,
    /// Through public endpoints via the auth proxy
    #[default]
    PublicProxied,
}

impl NetworkMode {
    /// Stable label
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PrivatePeered => "private_peered",
            Self::PublicProxied => "public_proxied",
        }
    }
}

impl fmt::Display for NetworkMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PrivatePeered => write!(f, "PRIVATE_PEERED"),
            Self::PublicProxied => write!(f, "PUBLIC_PROXIED"),
        }
    }
}

impl FromStr for NetworkMode {
    type Err = Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "private_peered" | "private" => Ok(Self::PrivatePeered),
            "public_proxied" | "public" => Ok(Self::PublicProxied),
            other => Err(Error::Config(format!(
                "invalid network mode '{}': expected PRIVATE_PEERED or PUBLIC_PROXIED",
                other
            ))),
        }
    }
}
