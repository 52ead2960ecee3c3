//! In-memory provider for tests and demos

use super::{ConnectRequest, IpType, Provider, Session};
use crate::row::Row;
use crate::{Error, Result};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Debug, Clone)]
struct CannedResult {
    columns: Arc<[String]>,
    rows: Vec<Vec<Option<String>>>,
}

/// Deterministic provider
///
/// Records every request, tracks open sessions and enforces that `close`
/// happens once, after all sessions are closed.
#[derive(Debug)]
pub struct FakeProvider {
    private_route: bool,
    authorized: HashSet<String>,
    latency: Option<Duration>,
    results: Arc<HashMap<String, CannedResult>>,
    disconnects: Arc<HashSet<String>>,
    requests: Mutex<Vec<ConnectRequest>>,
    open: Arc<AtomicUsize>,
    closed: Mutex<bool>,
}

impl FakeProvider {
    /// Create a builder
    pub fn builder() -> FakeProviderBuilder {
        FakeProviderBuilder::default()
    }

    /// Every request seen so far, in order
    pub fn requests(&self) -> Vec<ConnectRequest> {
        self.requests
            .lock()
            .map(|r| r.clone())
            .unwrap_or_default()
    }

    /// Sessions connected and not yet closed
    pub fn open_sessions(&self) -> usize {
        self.open.load(Ordering::SeqCst)
    }

    /// Whether `close` succeeded
    pub fn is_closed(&self) -> bool {
        self.closed.lock().map(|c| *c).unwrap_or(true)
    }

    fn lock_closed(&self) -> Result<std::sync::MutexGuard<'_, bool>> {
        self.closed
            .lock()
            .map_err(|_| Error::Usage("fake provider state poisoned".into()))
    }
}

#[async_trait]
impl Provider for FakeProvider {
    async fn connect(&self, request: &ConnectRequest) -> Result<Box<dyn Session>> {
        let closed = *self.lock_closed()?;
        if closed {
            return Err(Error::Usage("provider is closed".into()));
        }
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request.clone());
        }
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        if request.ip_type == Some(IpType::Private) && !self.private_route {
            return Err(Error::Transport(format!(
                "no route to private address of {}",
                request.instance
            )));
        }
        if !self.authorized.is_empty() && !self.authorized.contains(&request.user) {
            return Err(Error::Auth(format!(
                "principal {} is not a database user on {}",
                request.user, request.instance
            )));
        }

        self.open.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeSession {
            results: self.results.clone(),
            disconnects: self.disconnects.clone(),
            open: self.open.clone(),
            lost: false,
        }))
    }

    async fn close(&self) -> Result<()> {
        let mut closed = self.lock_closed()?;
        if *closed {
            return Err(Error::Usage("provider already closed".into()));
        }
        let open = self.open_sessions();
        if open > 0 {
            return Err(Error::Usage(format!(
                "provider closed with {} open session(s)",
                open
            )));
        }
        *closed = true;
        Ok(())
    }
}

/// Builder for [`FakeProvider`]
#[derive(Debug, Default)]
pub struct FakeProviderBuilder {
    private_route: bool,
    authorized: HashSet<String>,
    latency: Option<Duration>,
    results: HashMap<String, CannedResult>,
    disconnects: HashSet<String>,
}

impl FakeProviderBuilder {
    /// Whether private addresses are reachable (a peering exists)
    pub fn private_route(mut self, available: bool) -> Self {
        self.private_route = available;
        self
    }

    /// Accept this principal; with none registered every principal is accepted
    pub fn authorize(mut self, principal: impl Into<String>) -> Self {
        self.authorized.insert(principal.into());
        self
    }

    /// Delay each connect on the tokio clock
    pub fn latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Fixed result for an exact query string
    pub fn result(
        mut self,
        sql: impl Into<String>,
        columns: &[&str],
        rows: Vec<Vec<Option<String>>>,
    ) -> Self {
        let columns: Arc<[String]> = columns.iter().map(|c| c.to_string()).collect();
        self.results
            .insert(sql.into(), CannedResult { columns, rows });
        self
    }

    /// Drop the connection when this exact query is run
    ///
    /// The query and every later one on that session fail with
    /// `Error::ConnectionClosed`.
    pub fn disconnect_on(mut self, sql: impl Into<String>) -> Self {
        self.disconnects.insert(sql.into());
        self
    }

    /// Build the provider
    pub fn build(self) -> FakeProvider {
        FakeProvider {
            private_route: self.private_route,
            authorized: self.authorized,
            latency: self.latency,
            results: Arc::new(self.results),
            disconnects: Arc::new(self.disconnects),
            requests: Mutex::new(Vec::new()),
            open: Arc::new(AtomicUsize::new(0)),
            closed: Mutex::new(false),
        }
    }
}

struct FakeSession {
    results: Arc<HashMap<String, CannedResult>>,
    disconnects: Arc<HashSet<String>>,
    open: Arc<AtomicUsize>,
    lost: bool,
}

/// `SELECT <integer>` as a single `?column?` row
fn select_literal(sql: &str) -> Option<Vec<Row>> {
    let sql = sql.trim().trim_end_matches(';').trim();
    let (keyword, rest) = sql.split_once(char::is_whitespace)?;
    if !keyword.eq_ignore_ascii_case("select") {
        return None;
    }
    let value: i64 = rest.trim().parse().ok()?;
    let columns: Arc<[String]> = vec!["?column?".to_string()].into();
    Some(vec![Row::new(columns, vec![Some(value.to_string())])])
}

#[async_trait]
impl Session for FakeSession {
    async fn simple_query(&mut self, sql: &str) -> Result<Vec<Row>> {
        if self.lost || self.disconnects.contains(sql) {
            self.lost = true;
            return Err(Error::ConnectionClosed);
        }
        if let Some(canned) = self.results.get(sql) {
            return Ok(canned
                .rows
                .iter()
                .map(|values| Row::new(canned.columns.clone(), values.clone()))
                .collect());
        }
        select_literal(sql)
            .ok_or_else(|| Error::Sql(format!("fake provider has no result for '{}'", sql)))
    }

    async fn close(self: Box<Self>) -> Result<()> {
        self.open.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    }
}
