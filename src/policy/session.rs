//! Sessions handed out by the connector

use crate::instance::NetworkMode;
use crate::provider::Session;
use crate::row::Row;
use crate::{Error, Result};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::time::Instant;

/// Counts a session as outstanding until dropped
#[derive(Debug)]
pub(crate) struct Lease {
    outstanding: Arc<AtomicUsize>,
}

impl Lease {
    pub(crate) fn new(outstanding: Arc<AtomicUsize>) -> Self {
        outstanding.fetch_add(1, Ordering::SeqCst);
        Self { outstanding }
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        self.outstanding.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Live, authenticated session to one database
///
/// Must be handed back through [`Connector::release`](super::Connector::release)
/// (or a pool) on every path; release consumes the value, so a session
/// cannot be released twice.
pub struct ConnectionSession {
    id: u64,
    mode: NetworkMode,
    created_at: Instant,
    inner: Option<Box<dyn Session>>,
    broken: bool,
    _lease: Lease,
}

impl std::fmt::Debug for ConnectionSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionSession")
            .field("id", &self.id)
            .field("mode", &self.mode)
            .field("open", &self.inner.is_some())
            .field("broken", &self.broken)
            .finish()
    }
}

impl ConnectionSession {
    pub(crate) fn new(id: u64, mode: NetworkMode, inner: Box<dyn Session>, lease: Lease) -> Self {
        Self {
            id,
            mode,
            created_at: Instant::now(),
            inner: Some(inner),
            broken: false,
            _lease: lease,
        }
    }

    /// Connector-unique id
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Network path the session was opened over
    pub fn mode(&self) -> NetworkMode {
        self.mode
    }

    /// When the session was opened
    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    /// Whether a query failed in a way that lost the connection
    ///
    /// Broken sessions are never handed out again by a pool.
    pub fn is_broken(&self) -> bool {
        self.broken
    }

    /// Run a simple query
    pub async fn simple_query(&mut self, sql: &str) -> Result<Vec<Row>> {
        let inner = self.inner.as_mut().ok_or(Error::ConnectionClosed)?;
        let result = inner.simple_query(sql).await;
        if let Err(e) = &result {
            if e.is_disconnect() {
                tracing::debug!(session = self.id, error = %e, "session marked broken");
                self.broken = true;
            }
        }
        result
    }

    /// Run a query expected to return one value in the first column
    pub async fn query_scalar<T: std::str::FromStr>(&mut self, sql: &str) -> Result<T> {
        let rows = self.simple_query(sql).await?;
        let row = rows
            .first()
            .ok_or_else(|| Error::Protocol(format!("query returned no rows: {}", sql)))?;
        row.try_get(0)
    }

    /// Close the underlying provider session
    pub(crate) async fn close(mut self) -> Result<()> {
        match self.inner.take() {
            Some(inner) => inner.close().await,
            None => Ok(()),
        }
    }
}

impl Drop for ConnectionSession {
    fn drop(&mut self) {
        if self.inner.is_some() {
            tracing::warn!(session = self.id, "session dropped without release");
        }
    }
}
