//! Connection provisioning policy
//!
//! [`Connector`] owns one provider for its whole lifetime and decides how
//! each connection is requested:
//! * `PublicProxied` leaves address selection to the provider (auth proxy)
//! * `PrivatePeered` explicitly requests the instance's private address
//!
//! IAM authentication is always enabled; there is no password path.

mod lifecycle;
mod session;

pub use lifecycle::ProviderState;
pub use session::ConnectionSession;

use crate::config::{ConnectTarget, PoolConfig};
use crate::instance::{DatabaseTarget, InstanceRef, NetworkMode, PrincipalIdentity};
use crate::pool::Pool;
use crate::provider::{ConnectRequest, IpType, Provider};
use crate::{Error, Result};
use futures::future::BoxFuture;
use session::Lease;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::Instrument;

/// Owned handle to a provider plus the provisioning rules
///
/// Cloning is cheap and every clone shares the same provider and lifecycle.
#[derive(Clone)]
pub struct Connector {
    inner: Arc<ConnectorInner>,
}

struct ConnectorInner {
    provider: Arc<dyn Provider>,
    state: Mutex<ProviderState>,
    outstanding: Arc<AtomicUsize>,
    next_id: AtomicU64,
}

impl std::fmt::Debug for Connector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connector")
            .field("outstanding", &self.outstanding())
            .finish()
    }
}

fn request_for(
    instance: &InstanceRef,
    principal: &PrincipalIdentity,
    database: &DatabaseTarget,
    mode: NetworkMode,
) -> ConnectRequest {
    let ip_type = match mode {
        NetworkMode::PrivatePeered => Some(IpType::Private),
        NetworkMode::PublicProxied => None,
    };
    ConnectRequest {
        instance: instance.clone(),
        user: principal.as_str().to_string(),
        database: database.as_str().to_string(),
        ip_type,
        enable_iam_auth: true,
    }
}

impl Connector {
    /// Wrap a provider; nothing is contacted until the first acquisition
    pub fn new(provider: Arc<dyn Provider>) -> Self {
        Self {
            inner: Arc::new(ConnectorInner {
                provider,
                state: Mutex::new(ProviderState::Uninitialized),
                outstanding: Arc::new(AtomicUsize::new(0)),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// Current lifecycle state
    pub async fn state(&self) -> ProviderState {
        *self.inner.state.lock().await
    }

    /// Sessions acquired and not yet released
    pub fn outstanding(&self) -> usize {
        self.inner.outstanding.load(Ordering::SeqCst)
    }

    /// Start the provider if it is not running yet
    pub async fn start(&self) -> Result<()> {
        let mut state = self.inner.state.lock().await;
        self.start_locked(&mut state).await
    }

    async fn start_locked(&self, state: &mut ProviderState) -> Result<()> {
        state.ensure_usable()?;
        if *state == ProviderState::Uninitialized {
            self.inner.provider.start().await?;
            state.transition(ProviderState::Active)?;
            tracing::debug!("connector active");
        }
        Ok(())
    }

    /// Start if needed and count an in-flight acquisition as outstanding
    async fn lease(&self) -> Result<Lease> {
        let mut state = self.inner.state.lock().await;
        self.start_locked(&mut state).await?;
        Ok(Lease::new(self.inner.outstanding.clone()))
    }

    /// Open one authenticated session over the requested network path
    ///
    /// Provider failures (`Auth`, `Transport`) propagate unchanged and are
    /// never retried.
    pub async fn acquire_connection(
        &self,
        instance: &InstanceRef,
        principal: &PrincipalIdentity,
        database: &DatabaseTarget,
        mode: NetworkMode,
    ) -> Result<ConnectionSession> {
        let lease = self.lease().await?;

        let request = request_for(instance, principal, database, mode);
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let span = tracing::info_span!(
            "acquire_connection",
            session = id,
            instance = %instance,
            user = %principal,
            database = %database,
            mode = mode.as_str()
        );

        async {
            crate::metrics::counters::connection_attempted(mode.as_str());
            let started = Instant::now();

            match self.inner.provider.connect(&request).await {
                Ok(inner) => {
                    let elapsed = started.elapsed().as_millis() as u64;
                    crate::metrics::counters::connection_established(mode.as_str());
                    crate::metrics::histograms::connect_duration(mode.as_str(), elapsed);
                    tracing::info!(elapsed_ms = elapsed, "session established");
                    Ok(ConnectionSession::new(id, mode, inner, lease))
                }
                Err(e) => {
                    crate::metrics::counters::connection_failed(mode.as_str(), e.category());
                    tracing::warn!(error = %e, "session could not be established");
                    Err(e)
                }
            }
        }
        .instrument(span)
        .await
    }

    /// [`acquire_connection`](Self::acquire_connection) for a bundled target
    pub async fn acquire(&self, target: &ConnectTarget) -> Result<ConnectionSession> {
        self.acquire_connection(
            &target.instance,
            &target.principal,
            &target.database,
            target.mode,
        )
        .await
    }

    /// Build a pool whose sessions come from [`acquire`](Self::acquire)
    pub async fn build_pool(&self, target: ConnectTarget, config: PoolConfig) -> Result<Pool> {
        config.validate()?;
        self.state().await.ensure_usable()?;
        Ok(Pool::new(self.clone(), target, config))
    }

    /// Close a session
    pub async fn release(&self, session: ConnectionSession) -> Result<()> {
        let id = session.id();
        let result = session.close().await;
        crate::metrics::counters::session_released();
        match &result {
            Ok(()) => tracing::debug!(session = id, "session released"),
            Err(e) => tracing::warn!(session = id, error = %e, "session close failed"),
        }
        result
    }

    /// Close the provider; every session must have been released first
    pub async fn shutdown(&self) -> Result<()> {
        let mut state = self.inner.state.lock().await;
        state.ensure_usable()?;

        let outstanding = self.outstanding();
        if outstanding > 0 {
            return Err(Error::Usage(format!(
                "shutdown with {} session(s) still outstanding",
                outstanding
            )));
        }

        let was_active = *state == ProviderState::Active;
        state.transition(ProviderState::ShutDown)?;
        if was_active {
            self.inner.provider.close().await?;
        }
        tracing::info!("connector shut down");
        Ok(())
    }

    /// Acquire a session, run `body`, and release on every path
    ///
    /// A release failure is logged rather than returned when `body` already
    /// failed, so the body's error is never masked.
    pub async fn with_session<T, F>(&self, target: &ConnectTarget, body: F) -> Result<T>
    where
        F: for<'s> FnOnce(&'s mut ConnectionSession) -> BoxFuture<'s, Result<T>>,
    {
        let mut session = self.acquire(target).await?;
        let outcome = body(&mut session).await;
        let released = self.release(session).await;

        match (outcome, released) {
            (Ok(value), Ok(())) => Ok(value),
            (Ok(_), Err(e)) => Err(e),
            (Err(e), Ok(())) => Err(e),
            (Err(e), Err(release_err)) => {
                tracing::warn!(error = %release_err, "release failed after body error");
                Err(e)
            }
        }
    }
}
