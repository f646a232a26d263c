//! Database connection management
//!
//! `ConnectionProvider` hands out pooled connections for the three scopes a
//! command may need. Pools are created lazily, verified on first use, cached
//! for the rest of the invocation and closed before the process exits.

pub mod queries;

use crate::config::{Credentials, PostgresConfig, SslMode};
use crate::error::{connectivity_error, AppError, AppResult};
use deadpool_postgres::{
    Config, ManagerConfig, Object, Pool, PoolConfig, RecyclingMethod, Runtime, Timeouts,
};
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio_postgres::NoTls;
use tracing::{debug, info};

/// Operation deadlines
pub mod deadline {
    use std::time::Duration;

    /// Connect, ping and catalog probes
    pub const PROBE: Duration = Duration::from_secs(5);
    pub const RELATIONSHIP: Duration = Duration::from_secs(10);
    pub const PROVISION: Duration = Duration::from_secs(30);
    pub const GRAPH_INIT: Duration = Duration::from_secs(60);
    pub const EXPORT: Duration = Duration::from_secs(120);
    pub const RESTORE: Duration = Duration::from_secs(300);
}

/// Run `fut` under a deadline; expiry is reported as `AppError::Timeout`
pub async fn with_deadline<T, F>(operation: &str, limit: Duration, fut: F) -> AppResult<T>
where
    F: Future<Output = AppResult<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(AppError::Timeout {
            operation: operation.to_string(),
            seconds: limit.as_secs(),
        }),
    }
}

/// Identity and database a connection is opened with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionScope {
    /// Admin identity on the maintenance database (roles, CREATE/DROP DATABASE)
    AdminMaintenance,
    /// Admin identity on the target database (DDL, grants)
    AdminTarget,
    /// App identity on the target database (runtime reads and writes)
    AppTarget,
}

impl ConnectionScope {
    pub fn label(&self) -> &'static str {
        match self {
            ConnectionScope::AdminMaintenance => "admin-maintenance",
            ConnectionScope::AdminTarget => "admin-target",
            ConnectionScope::AppTarget => "app-target",
        }
    }

    pub fn is_admin(&self) -> bool {
        !matches!(self, ConnectionScope::AppTarget)
    }
}

impl fmt::Display for ConnectionScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Database connection configuration
#[derive(Clone)]
pub struct DbConnectionConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub database: String,
    pub sslmode: SslMode,
}

impl fmt::Debug for DbConnectionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}:{}/{}", self.user, self.host, self.port, self.database)
    }
}

/// Pooled connections for one CLI invocation
pub struct ConnectionProvider {
    settings: PostgresConfig,
    pools: RwLock<HashMap<ConnectionScope, Pool>>,
}

impl ConnectionProvider {
    pub fn new(settings: &PostgresConfig) -> Self {
        Self {
            settings: settings.clone(),
            pools: RwLock::new(HashMap::new()),
        }
    }

    pub fn settings(&self) -> &PostgresConfig {
        &self.settings
    }

    /// Fails with `MissingCredentials` unless the admin identity is configured
    pub fn require_admin(&self) -> AppResult<&Credentials> {
        let admin = &self.settings.admin;
        if !admin.is_present() {
            return Err(AppError::MissingCredentials(
                "postgres.admin.user and postgres.admin.password (or password_temp) must be set"
                    .to_string(),
            ));
        }
        Ok(admin)
    }

    /// Resolve the identity and database for a scope
    pub fn connection_config(&self, scope: ConnectionScope) -> AppResult<DbConnectionConfig> {
        let (creds, database) = match scope {
            ConnectionScope::AdminMaintenance => {
                (self.require_admin()?, &self.settings.maintenance_db)
            }
            ConnectionScope::AdminTarget => (self.require_admin()?, &self.settings.dbname),
            ConnectionScope::AppTarget => {
                if self.settings.app.user.trim().is_empty() {
                    return Err(AppError::MissingCredentials(
                        "postgres.app.user must be set".to_string(),
                    ));
                }
                (&self.settings.app, &self.settings.dbname)
            }
        };

        Ok(DbConnectionConfig {
            host: self.settings.host.clone(),
            port: self.settings.port,
            user: creds.user.clone(),
            password: creds.effective_password().to_string(),
            database: database.clone(),
            sslmode: self.settings.sslmode,
        })
    }

    /// Get a verified client for `scope`, creating its pool on first use
    pub async fn client(&self, scope: ConnectionScope) -> AppResult<Object> {
        let cached = self.pools.read().await.get(&scope).cloned();
        if let Some(pool) = cached {
            return pool.get().await.map_err(|e| {
                connectivity_error(format!("{} connection unavailable: {}", scope, e))
            });
        }

        let config = self.connection_config(scope)?;
        let pool = create_pool(&config)?;
        let client = with_deadline("connect", deadline::PROBE, async {
            let client = pool.get().await.map_err(|e| {
                connectivity_error(format!("cannot connect as {} to {:?}: {}", scope, config, e))
            })?;
            client.query_one("SELECT 1", &[]).await.map_err(|e| {
                connectivity_error(format!("ping failed as {} on {:?}: {}", scope, config, e))
            })?;
            Ok(client)
        })
        .await?;

        debug!("Opened {} connection to {:?}", scope, config);
        self.pools.write().await.insert(scope, pool);
        Ok(client)
    }

    /// Close the pool for a scope (no-op when it was never opened)
    pub async fn release(&self, scope: ConnectionScope) {
        if let Some(pool) = self.pools.write().await.remove(&scope) {
            pool.close();
            debug!("Closed {} connection", scope);
        }
    }

    /// Close every open pool
    pub async fn close(&self) {
        let mut pools = self.pools.write().await;
        let count = pools.len();
        for (_, pool) in pools.drain() {
            pool.close();
        }
        if count > 0 {
            debug!("Closed {} connection pool(s)", count);
        }
    }
}

/// Create a single-connection pool with TLS chosen by `sslmode`
fn create_pool(config: &DbConnectionConfig) -> AppResult<Pool> {
    let mut cfg = Config::new();
    cfg.host = Some(config.host.clone());
    cfg.port = Some(config.port);
    cfg.user = Some(config.user.clone());
    cfg.password = Some(config.password.clone());
    cfg.dbname = Some(config.database.clone());
    cfg.application_name = Some("rbc-admin".to_string());
    cfg.connect_timeout = Some(deadline::PROBE);
    cfg.manager = Some(ManagerConfig {
        recycling_method: RecyclingMethod::Fast,
    });
    cfg.pool = Some(PoolConfig {
        max_size: 1,
        timeouts: Timeouts {
            wait: Some(deadline::PROBE),
            create: Some(deadline::PROBE),
            recycle: Some(deadline::PROBE),
        },
        ..Default::default()
    });

    let pool = match config.sslmode {
        SslMode::Disable => cfg.create_pool(Some(Runtime::Tokio1), NoTls),
        SslMode::Prefer | SslMode::Require => {
            cfg.ssl_mode = Some(if config.sslmode == SslMode::Require {
                deadpool_postgres::SslMode::Require
            } else {
                deadpool_postgres::SslMode::Prefer
            });
            let certs = rustls_native_certs::load_native_certs();
            let mut root_store = rustls::RootCertStore::empty();
            for cert in certs.certs {
                root_store.add(cert).ok();
            }
            let tls_config = rustls::ClientConfig::builder()
                .with_root_certificates(root_store)
                .with_no_client_auth();
            let tls = tokio_postgres_rustls::MakeRustlsConnect::new(tls_config);
            info!("Using TLS ({:?}) for {}:{}", config.sslmode, config.host, config.port);
            cfg.create_pool(Some(Runtime::Tokio1), tls)
        }
    };

    pool.map_err(|e| AppError::Config(format!("Failed to create pool: {}", e)))
}
