//! Connection pool management
//!
//! Pools are created lazily on first use and cached per target identity
//! (engine + URL), so repeated sessions against the same target share one
//! pool. Establishment is bounded by the target's connect timeout and
//! retried a bounded number of times for transient failures.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use mongodb::bson::doc;
use sqlx::mysql::MySqlPoolOptions;
use sqlx::postgres::PgPoolOptions;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{MySqlPool, PgPool, SqlitePool};
use tokio::sync::RwLock;
use tracing::{debug, instrument, warn};

use crate::config::{EngineKind, TargetConfig, TargetKey};
use crate::error::{UdomError, UdomResult};

/// A live pool handle for one target. Cloning is cheap; every variant is
/// reference-counted internally.
#[derive(Clone)]
pub enum EnginePool {
    Sqlite(SqlitePool),
    MySql(MySqlPool),
    Postgres(PgPool),
    Mssql(bb8::Pool<bb8_tiberius::ConnectionManager>),
    Mongo(mongodb::Client),
}

/// Shared registry of live pools, keyed by [`TargetKey`].
#[derive(Default)]
pub struct ConnectionManager {
    pools: RwLock<HashMap<TargetKey, EnginePool>>,
}

/// Process-wide manager used by the convenience constructors.
pub fn global() -> Arc<ConnectionManager> {
    static GLOBAL: OnceLock<Arc<ConnectionManager>> = OnceLock::new();
    GLOBAL
        .get_or_init(|| Arc::new(ConnectionManager::new()))
        .clone()
}

impl ConnectionManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the pool for this target, establishing it on first use.
    #[instrument(skip(self, config), fields(engine = %config.engine))]
    pub async fn pool(&self, config: &TargetConfig) -> UdomResult<EnginePool> {
        let key = config.target_key();

        if let Some(pool) = self.pools.read().await.get(&key) {
            return Ok(pool.clone());
        }

        let pool = self.establish_with_retry(config).await?;

        // Double-checked under the write lock; a racing task may have
        // established the same target first. Keep the stored one.
        let mut pools = self.pools.write().await;
        if let Some(existing) = pools.get(&key) {
            return Ok(existing.clone());
        }
        pools.insert(key, pool.clone());
        debug!(engine = %config.engine, "pool established");
        Ok(pool)
    }

    /// Number of live pools, for introspection.
    pub async fn pool_count(&self) -> usize {
        self.pools.read().await.len()
    }

    /// Closes every pool and clears the registry.
    pub async fn close_all(&self) {
        let pools: Vec<EnginePool> = {
            let mut map = self.pools.write().await;
            map.drain().map(|(_, p)| p).collect()
        };
        for pool in pools {
            match pool {
                EnginePool::Sqlite(p) => p.close().await,
                EnginePool::MySql(p) => p.close().await,
                EnginePool::Postgres(p) => p.close().await,
                // bb8 and the mongo client release connections on drop.
                EnginePool::Mssql(_) | EnginePool::Mongo(_) => {}
            }
        }
    }

    async fn establish_with_retry(&self, config: &TargetConfig) -> UdomResult<EnginePool> {
        let mut attempt = 0u32;
        loop {
            let result = tokio::time::timeout(config.connect_timeout, self.establish(config))
                .await
                .unwrap_or(Err(UdomError::Timeout {
                    timeout_ms: config.connect_timeout.as_millis() as u64,
                }));

            match result {
                Ok(pool) => return Ok(pool),
                Err(err) if err.is_retryable() && attempt < config.connect_retries => {
                    attempt += 1;
                    warn!(
                        engine = %config.engine,
                        attempt,
                        error = %err,
                        "connect failed, retrying"
                    );
                    tokio::time::sleep(config.retry_backoff).await;
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn establish(&self, config: &TargetConfig) -> UdomResult<EnginePool> {
        match config.engine {
            EngineKind::Sqlite => build_sqlite(config).await,
            EngineKind::MySql => build_mysql(config).await,
            EngineKind::Postgres => build_postgres(config).await,
            EngineKind::Mssql => build_mssql(config).await,
            EngineKind::MongoDb => build_mongo(config).await,
        }
    }
}

async fn build_sqlite(config: &TargetConfig) -> UdomResult<EnginePool> {
    let path = config.sqlite_path();
    let (options, max_connections) = if path == ":memory:" {
        // A pooled in-memory database only behaves as one database through
        // a single connection.
        (SqliteConnectOptions::new().in_memory(true), 1)
    } else {
        (
            SqliteConnectOptions::new()
                .filename(&path)
                .create_if_missing(true),
            config.pool_max_connections,
        )
    };

    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections)
        .min_connections(config.pool_min_connections)
        .acquire_timeout(config.pool_acquire_timeout)
        .connect_with(options)
        .await
        .map_err(|e| UdomError::connection_failed(e.to_string()))?;
    Ok(EnginePool::Sqlite(pool))
}

async fn build_mysql(config: &TargetConfig) -> UdomResult<EnginePool> {
    let pool = MySqlPoolOptions::new()
        .max_connections(config.pool_max_connections)
        .min_connections(config.pool_min_connections)
        .acquire_timeout(config.pool_acquire_timeout)
        .connect(&config.url)
        .await
        .map_err(|e| UdomError::connection_failed(e.to_string()))?;
    Ok(EnginePool::MySql(pool))
}

async fn build_postgres(config: &TargetConfig) -> UdomResult<EnginePool> {
    let pool = PgPoolOptions::new()
        .max_connections(config.pool_max_connections)
        .min_connections(config.pool_min_connections)
        .acquire_timeout(config.pool_acquire_timeout)
        .connect(&config.url)
        .await
        .map_err(|e| UdomError::connection_failed(e.to_string()))?;
    Ok(EnginePool::Postgres(pool))
}

async fn build_mssql(config: &TargetConfig) -> UdomResult<EnginePool> {
    let parts = config.mssql_parts()?;

    let mut tds = tiberius::Config::new();
    tds.host(&parts.host);
    tds.port(parts.port);
    tds.authentication(tiberius::AuthMethod::sql_server(
        &parts.username,
        &parts.password,
    ));
    if let Some(database) = &parts.database {
        tds.database(database);
    }
    tds.trust_cert();

    let manager = bb8_tiberius::ConnectionManager::new(tds);
    let pool = bb8::Pool::builder()
        .max_size(config.pool_max_connections)
        .connection_timeout(config.pool_acquire_timeout)
        .build(manager)
        .await
        .map_err(|e| UdomError::connection_failed(e.to_string()))?;

    // bb8 builds lazily; borrow one connection so a bad target fails here
    // instead of on the first operation.
    match pool.get().await {
        Ok(_) => {}
        Err(bb8::RunError::TimedOut) => {
            return Err(UdomError::PoolTimeout {
                timeout_ms: config.pool_acquire_timeout.as_millis() as u64,
            })
        }
        Err(bb8::RunError::User(e)) => return Err(UdomError::connection_failed(e.to_string())),
    }

    Ok(EnginePool::Mssql(pool))
}

async fn build_mongo(config: &TargetConfig) -> UdomResult<EnginePool> {
    let mut options = mongodb::options::ClientOptions::parse(&config.url)
        .await
        .map_err(|e| UdomError::connection_failed(e.to_string()))?;
    options.max_pool_size = Some(config.pool_max_connections);
    options.server_selection_timeout = Some(config.connect_timeout);

    let client = mongodb::Client::with_options(options)
        .map_err(|e| UdomError::connection_failed(e.to_string()))?;

    // The client is lazy; ping so establishment failures surface now.
    client
        .database("admin")
        .run_command(doc! { "ping": 1 })
        .await
        .map_err(|e| UdomError::connection_failed(e.to_string()))?;

    Ok(EnginePool::Mongo(client))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sqlite_target(dir: &tempfile::TempDir) -> TargetConfig {
        let url = format!("sqlite:///{}", dir.path().join("pool.db").display());
        TargetConfig::new("sql", "sqlite", &url).unwrap()
    }

    #[tokio::test]
    async fn same_target_shares_one_pool() {
        let dir = tempfile::tempdir().unwrap();
        let manager = ConnectionManager::new();
        let config = sqlite_target(&dir);

        manager.pool(&config).await.unwrap();
        manager.pool(&config).await.unwrap();
        assert_eq!(manager.pool_count().await, 1);
    }

    #[tokio::test]
    async fn distinct_targets_get_distinct_pools() {
        let dir = tempfile::tempdir().unwrap();
        let manager = ConnectionManager::new();

        let a = sqlite_target(&dir);
        let url_b = format!("sqlite:///{}", dir.path().join("other.db").display());
        let b = TargetConfig::new("sql", "sqlite", &url_b).unwrap();

        manager.pool(&a).await.unwrap();
        manager.pool(&b).await.unwrap();
        assert_eq!(manager.pool_count().await, 2);
    }

    #[tokio::test]
    async fn close_all_clears_the_registry() {
        let dir = tempfile::tempdir().unwrap();
        let manager = ConnectionManager::new();
        manager.pool(&sqlite_target(&dir)).await.unwrap();

        manager.close_all().await;
        assert_eq!(manager.pool_count().await, 0);
    }
}
