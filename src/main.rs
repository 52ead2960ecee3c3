//! # cloudsql-connect CLI
//!
//! Opens one IAM-authenticated session to a Cloud SQL instance, runs a query
//! and prints the result.
//!
//! Configuration comes from a `cloudsql://` DSN or the environment
//! (`INSTANCE_CONNECTION_NAME`, `DB_USER`, `DB_NAME`, `NETWORK_MODE`, pool
//! variables). Teardown (session release, pool close, connector shutdown)
//! always runs; on failure the first error is reported afterwards and the
//! process exits non-zero.

use anyhow::{Context, Result};
use clap::Parser;
use cloudsql_connect::{
    CloudSqlProvider, Connector, EnvToken, InstanceEndpoints, MetadataServerToken, NetworkMode,
    ProvisionConfig, ProxyEndpoint, Row, SslMode, TokenSource,
};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::info;

/// Connect to a Cloud SQL instance as an IAM principal
#[derive(Parser, Debug)]
#[command(name = "cloudsql-connect")]
#[command(version, about, long_about = None)]
struct Cli {
    /// cloudsql://USER@PROJECT:REGION:INSTANCE/DB?network_mode=... (overrides environment)
    #[arg(long, env = "CLOUDSQL_DSN")]
    dsn: Option<String>,

    /// Query to run
    #[arg(short, long, default_value = "SELECT 1")]
    query: String,

    /// List tables in the public schema instead of running --query
    #[arg(long)]
    list_tables: bool,

    /// Check the session out of a pool built from the pool settings
    #[arg(long)]
    pool: bool,

    /// Auth proxy host
    #[arg(long, env = "CLOUDSQL_PROXY_HOST", default_value = "127.0.0.1")]
    proxy_host: String,

    /// Auth proxy port
    #[arg(long, env = "CLOUDSQL_PROXY_PORT", default_value = "5432")]
    proxy_port: u16,

    /// Auth proxy Unix socket directory (overrides host and port)
    #[arg(long, env = "CLOUDSQL_PROXY_SOCKET_DIR", value_name = "DIR")]
    proxy_socket_dir: Option<PathBuf>,

    /// Private address of the instance, used in private_peered mode
    #[arg(long, env = "PRIVATE_IP")]
    private_ip: Option<String>,

    /// TLS mode for private connections (disable, require, verify-full)
    #[arg(long, env = "PGSSLMODE", default_value = "require")]
    sslmode: SslMode,

    /// Instance server CA for verify-full
    #[arg(long, env = "PGSSLROOTCERT", value_name = "FILE")]
    sslrootcert: Option<String>,

    /// Read the IAM access token from this environment variable instead of
    /// the metadata server
    #[arg(long, value_name = "VAR")]
    access_token_env: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "CLOUDSQL_LOG_LEVEL", default_value = "info")]
    log_level: String,
}

const LIST_TABLES: &str =
    "SELECT tablename FROM pg_catalog.pg_tables WHERE schemaname = 'public' ORDER BY tablename";

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = init_logging(&cli.log_level) {
        eprintln!("error: {:#}", e);
        return ExitCode::FAILURE;
    }

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = match &cli.dsn {
        Some(dsn) => ProvisionConfig::parse_dsn(dsn).context("invalid DSN")?,
        None => ProvisionConfig::from_env().context("incomplete environment configuration")?,
    };
    let connector = Connector::new(Arc::new(build_provider(&cli, &config)?));

    info!(
        instance = %config.target.instance,
        user = %config.target.principal,
        mode = %config.target.mode,
        "connecting"
    );

    let sql = if cli.list_tables {
        LIST_TABLES.to_string()
    } else {
        cli.query.clone()
    };
    let outcome = if cli.pool {
        query_pooled(&connector, &config, sql).await
    } else {
        connector
            .with_session(&config.target, move |session| {
                Box::pin(async move { session.simple_query(&sql).await })
            })
            .await
    };

    let teardown = connector.shutdown().await;

    let rows = match (outcome, teardown) {
        (Ok(rows), Ok(())) => rows,
        (Ok(_), Err(e)) => return Err(e).context("shutdown failed"),
        (Err(e), teardown) => {
            if let Err(te) = teardown {
                tracing::warn!(error = %te, "shutdown failed after error");
            }
            return Err(e).context(format!("query over {} failed", config.target.mode));
        }
    };

    println!(
        "connected to {} as {} ({})",
        config.target.instance, config.target.principal, config.target.mode
    );
    print_rows(&rows);
    Ok(())
}

fn build_provider(cli: &Cli, config: &ProvisionConfig) -> Result<CloudSqlProvider> {
    let proxy = match &cli.proxy_socket_dir {
        Some(dir) => ProxyEndpoint::Unix(dir.clone()),
        None => ProxyEndpoint::Tcp {
            host: cli.proxy_host.clone(),
            port: cli.proxy_port,
        },
    };
    let mut endpoints = InstanceEndpoints::new().proxy(proxy);
    if let Some(ip) = &cli.private_ip {
        endpoints = endpoints.private_address(ip.clone());
    } else if config.target.mode == NetworkMode::PrivatePeered {
        anyhow::bail!("private_peered mode needs --private-ip (or PRIVATE_IP)");
    }

    let tokens: Arc<dyn TokenSource> = match &cli.access_token_env {
        Some(var) => Arc::new(EnvToken::new(var.clone())),
        None => Arc::new(MetadataServerToken::new()?),
    };

    let mut builder = CloudSqlProvider::builder()
        .instance(config.target.instance.clone(), endpoints)
        .token_source(tokens)
        .sslmode(cli.sslmode);
    if let Some(path) = &cli.sslrootcert {
        builder = builder.ca_cert_path(path.clone());
    }
    Ok(builder.build()?)
}

async fn query_pooled(
    connector: &Connector,
    config: &ProvisionConfig,
    sql: String,
) -> cloudsql_connect::Result<Vec<Row>> {
    let pool = connector
        .build_pool(config.target.clone(), config.pool)
        .await?;

    let outcome = match pool.acquire().await {
        Ok(mut session) => {
            let rows = session.simple_query(&sql).await;
            info!(status = ?pool.status(), "pool status");
            rows
        }
        Err(e) => Err(e),
    };

    let closed = pool.close().await;
    match (outcome, closed) {
        (Ok(rows), Ok(())) => Ok(rows),
        (Ok(_), Err(e)) => Err(e),
        (Err(e), closed) => {
            if let Err(ce) = closed {
                tracing::warn!(error = %ce, "pool close failed after error");
            }
            Err(e)
        }
    }
}

fn print_rows(rows: &[Row]) {
    let Some(first) = rows.first() else {
        println!("(0 rows)");
        return;
    };
    println!("{}", first.columns().join(" | "));
    for row in rows {
        let values: Vec<&str> = (0..row.len()).map(|i| row.get(i).unwrap_or("NULL")).collect();
        println!("{}", values.join(" | "));
    }
    println!("({} row{})", rows.len(), if rows.len() == 1 { "" } else { "s" });
}

/// Initialize tracing subscriber for logging
fn init_logging(level: &str) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(level))
        .context("Failed to create log filter")?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact()
        .init();

    Ok(())
}
