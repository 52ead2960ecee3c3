//! Metrics recorded through the `metrics` facade
//!
//! Nothing is exported unless the embedding application installs a recorder.

/// Metric names
pub mod names {
    /// Connection attempts by network mode
    pub const CONNECTIONS_ATTEMPTED: &str = "cloudsql_connections_attempted_total";
    /// Connections established by network mode
    pub const CONNECTIONS_ESTABLISHED: &str = "cloudsql_connections_established_total";
    /// Failed connection attempts by network mode and error category
    pub const CONNECTIONS_FAILED: &str = "cloudsql_connections_failed_total";
    /// Sessions released
    pub const SESSIONS_RELEASED: &str = "cloudsql_sessions_released_total";
    /// Auth exchanges attempted by mechanism
    pub const AUTH_ATTEMPTED: &str = "cloudsql_auth_attempted_total";
    /// Auth exchanges rejected by mechanism
    pub const AUTH_FAILED: &str = "cloudsql_auth_failed_total";
    /// Pool acquisitions that timed out
    pub const POOL_EXHAUSTED: &str = "cloudsql_pool_exhausted_total";
    /// Pooled sessions closed for exceeding the recycle interval
    pub const POOL_RECYCLED: &str = "cloudsql_pool_recycled_total";
    /// Time to establish a connection (ms)
    pub const CONNECT_DURATION: &str = "cloudsql_connect_duration_ms";
    /// Time spent waiting for a pool slot (ms)
    pub const POOL_WAIT_DURATION: &str = "cloudsql_pool_wait_duration_ms";
}

/// Label values
pub mod labels {
    /// Cleartext password exchange carrying an IAM token
    pub const MECHANISM_IAM_TOKEN: &str = "iam_token";
    /// Trust / proxy-managed auth, no client credential sent
    pub const MECHANISM_NONE: &str = "none";
}

/// Counter helpers
pub mod counters {
    use super::names;

    /// A connection attempt started
    pub fn connection_attempted(mode: &'static str) {
        metrics::counter!(names::CONNECTIONS_ATTEMPTED, "mode" => mode).increment(1);
    }

    /// A connection was established
    pub fn connection_established(mode: &'static str) {
        metrics::counter!(names::CONNECTIONS_ESTABLISHED, "mode" => mode).increment(1);
    }

    /// A connection attempt failed
    pub fn connection_failed(mode: &'static str, category: &'static str) {
        metrics::counter!(names::CONNECTIONS_FAILED, "mode" => mode, "error" => category)
            .increment(1);
    }

    /// A session was released
    pub fn session_released() {
        metrics::counter!(names::SESSIONS_RELEASED).increment(1);
    }

    /// Auth exchange attempted
    pub fn auth_attempted(mechanism: &'static str) {
        metrics::counter!(names::AUTH_ATTEMPTED, "mechanism" => mechanism).increment(1);
    }

    /// Auth exchange rejected
    pub fn auth_failed(mechanism: &'static str) {
        metrics::counter!(names::AUTH_FAILED, "mechanism" => mechanism).increment(1);
    }

    /// Pool acquisition timed out
    pub fn pool_exhausted() {
        metrics::counter!(names::POOL_EXHAUSTED).increment(1);
    }

    /// Pooled session recycled
    pub fn pool_recycled() {
        metrics::counter!(names::POOL_RECYCLED).increment(1);
    }
}

/// Histogram helpers
pub mod histograms {
    use super::names;

    /// Connection establishment time
    pub fn connect_duration(mode: &'static str, millis: u64) {
        metrics::histogram!(names::CONNECT_DURATION, "mode" => mode).record(millis as f64);
    }

    /// Pool slot wait time
    pub fn pool_wait_duration(millis: u64) {
        metrics::histogram!(names::POOL_WAIT_DURATION).record(millis as f64);
    }
}
