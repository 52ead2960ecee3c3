//! Bounded session pool
//!
//! Checkout flow:
//!   acquire()
//!     → wait for a permit (at most `size + max_overflow` are handed out)
//!     → no permit within `acquire_timeout` → `Error::PoolExhausted`
//!     → reuse the oldest idle session younger than `recycle`
//!     → otherwise open a new session through the connector
//!
//! Dropping a [`PooledSession`] returns it to the idle list, which keeps at
//! most `size` sessions; anything beyond that, and any session whose
//! connection broke, is closed on a background task that [`Pool::close`]
//! waits for.

use crate::config::{ConnectTarget, PoolConfig};
use crate::policy::{ConnectionSession, Connector};
use crate::row::Row;
use crate::{Error, Result};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinSet;
use tokio::time::Instant;

/// Point-in-time pool occupancy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStatus {
    /// Sessions kept open for reuse
    pub idle: usize,
    /// Sessions currently checked out
    pub in_use: usize,
    /// `size + max_overflow`
    pub capacity: usize,
}

/// Pool of sessions for one target
///
/// Cheap to clone; clones share the same sessions.
#[derive(Clone)]
pub struct Pool {
    inner: Arc<PoolInner>,
}

struct PoolInner {
    connector: Connector,
    target: ConnectTarget,
    config: PoolConfig,
    permits: Arc<Semaphore>,
    idle: Mutex<VecDeque<ConnectionSession>>,
    closing: Mutex<JoinSet<()>>,
    closed: AtomicBool,
}

impl std::fmt::Debug for Pool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pool")
            .field("target", &self.inner.target)
            .field("config", &self.inner.config)
            .field("status", &self.status())
            .finish()
    }
}

impl PoolInner {
    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn take_idle(&self) -> Option<ConnectionSession> {
        self.idle.lock().ok()?.pop_front()
    }

    /// Keep `session` for reuse, or hand it back if it cannot be kept
    fn put_idle(&self, session: ConnectionSession) -> Option<ConnectionSession> {
        if self.is_closed() || session.is_broken() {
            return Some(session);
        }
        match self.idle.lock() {
            Ok(mut idle) if idle.len() < self.config.size => {
                idle.push_back(session);
                None
            }
            _ => Some(session),
        }
    }

    fn expired(&self, session: &ConnectionSession) -> bool {
        session.created_at().elapsed() >= self.config.recycle
    }

    /// Close `session` on a background task tracked until [`Pool::close`]
    fn close_in_background(&self, session: ConnectionSession) {
        let handle = match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle,
            Err(_) => {
                tracing::warn!(
                    session = session.id(),
                    "no runtime to close returned session; dropping it"
                );
                return;
            }
        };
        let mut closing = match self.closing.lock() {
            Ok(closing) => closing,
            Err(_) => {
                tracing::warn!(session = session.id(), "pool state poisoned; dropping session");
                return;
            }
        };
        // Reap finished closes so the set only holds in-flight ones
        while closing.try_join_next().is_some() {}

        let connector = self.connector.clone();
        closing.spawn_on(
            async move {
                if let Err(e) = connector.release(session).await {
                    tracing::warn!(error = %e, "failed to close returned session");
                }
            },
            &handle,
        );
    }

    /// Wait for every background close started so far
    async fn drain_closing(&self) {
        let mut pending = match self.closing.lock() {
            Ok(mut closing) => std::mem::take(&mut *closing),
            Err(_) => return,
        };
        while let Some(joined) = pending.join_next().await {
            if let Err(e) = joined {
                tracing::warn!(error = %e, "session close task failed");
            }
        }
    }
}

impl Drop for PoolInner {
    fn drop(&mut self) {
        // Let in-flight closes finish instead of aborting them
        if let Ok(closing) = self.closing.get_mut() {
            closing.detach_all();
        }
    }
}

impl Pool {
    pub(crate) fn new(connector: Connector, target: ConnectTarget, config: PoolConfig) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                connector,
                target,
                permits: Arc::new(Semaphore::new(config.capacity())),
                config,
                idle: Mutex::new(VecDeque::new()),
                closing: Mutex::new(JoinSet::new()),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Pool parameters
    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    /// Check out a session
    pub async fn acquire(&self) -> Result<PooledSession> {
        let inner = &self.inner;
        if inner.is_closed() {
            return Err(Error::Usage("pool is closed".into()));
        }

        let started = Instant::now();
        let timeout = inner.config.acquire_timeout;
        let permit = match tokio::time::timeout(timeout, inner.permits.clone().acquire_owned()).await
        {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) => return Err(Error::Usage("pool is closed".into())),
            Err(_) => {
                crate::metrics::counters::pool_exhausted();
                tracing::warn!(?timeout, capacity = inner.config.capacity(), "pool exhausted");
                return Err(Error::PoolExhausted { timeout });
            }
        };
        crate::metrics::histograms::pool_wait_duration(started.elapsed().as_millis() as u64);

        while let Some(session) = inner.take_idle() {
            if !inner.expired(&session) {
                tracing::trace!(session = session.id(), "reusing idle session");
                return Ok(PooledSession::new(session, inner.clone(), permit));
            }
            crate::metrics::counters::pool_recycled();
            tracing::debug!(session = session.id(), "recycling expired session");
            if let Err(e) = inner.connector.release(session).await {
                tracing::warn!(error = %e, "failed to close recycled session");
            }
        }

        let session = inner.connector.acquire(&inner.target).await?;
        Ok(PooledSession::new(session, inner.clone(), permit))
    }

    /// Current occupancy
    pub fn status(&self) -> PoolStatus {
        let inner = &self.inner;
        let capacity = inner.config.capacity();
        PoolStatus {
            idle: inner.idle.lock().map(|idle| idle.len()).unwrap_or(0),
            in_use: capacity.saturating_sub(inner.permits.available_permits()),
            capacity,
        }
    }

    /// Close every idle session and refuse further checkouts
    ///
    /// Waits for sessions already returned to finish closing, so once every
    /// session is back and this returns, nothing from the pool is
    /// outstanding. Sessions still checked out are closed when they come
    /// back. Closing twice only waits for pending closes.
    pub async fn close(&self) -> Result<()> {
        let inner = &self.inner;
        if inner.closed.swap(true, Ordering::SeqCst) {
            inner.drain_closing().await;
            return Ok(());
        }
        inner.permits.close();

        let drained: Vec<ConnectionSession> = match inner.idle.lock() {
            Ok(mut idle) => idle.drain(..).collect(),
            Err(_) => Vec::new(),
        };
        tracing::debug!(count = drained.len(), "closing pool");

        let mut first_error = None;
        for session in drained {
            if let Err(e) = inner.connector.release(session).await {
                tracing::warn!(error = %e, "failed to close idle session");
                first_error.get_or_insert(e);
            }
        }
        inner.drain_closing().await;

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

/// Session checked out of a [`Pool`]
pub struct PooledSession {
    session: Option<ConnectionSession>,
    pool: Arc<PoolInner>,
    _permit: OwnedSemaphorePermit,
}

impl std::fmt::Debug for PooledSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledSession")
            .field("session", &self.session)
            .finish()
    }
}

impl PooledSession {
    fn new(session: ConnectionSession, pool: Arc<PoolInner>, permit: OwnedSemaphorePermit) -> Self {
        Self {
            session: Some(session),
            pool,
            _permit: permit,
        }
    }

    fn session_mut(&mut self) -> Result<&mut ConnectionSession> {
        self.session.as_mut().ok_or(Error::ConnectionClosed)
    }

    /// Id of the underlying session
    pub fn id(&self) -> Option<u64> {
        self.session.as_ref().map(ConnectionSession::id)
    }

    /// Run a simple query
    pub async fn simple_query(&mut self, sql: &str) -> Result<Vec<Row>> {
        self.session_mut()?.simple_query(sql).await
    }

    /// Run a query expected to return one value in the first column
    pub async fn query_scalar<T: std::str::FromStr>(&mut self, sql: &str) -> Result<T> {
        self.session_mut()?.query_scalar(sql).await
    }

    /// Close the session instead of returning it to the pool
    pub async fn discard(mut self) -> Result<()> {
        match self.session.take() {
            Some(session) => self.pool.connector.release(session).await,
            None => Ok(()),
        }
    }
}

impl Drop for PooledSession {
    fn drop(&mut self) {
        let Some(session) = self.session.take() else {
            return;
        };
        if let Some(session) = self.pool.put_idle(session) {
            self.pool.close_in_background(session);
        }
    }
}
