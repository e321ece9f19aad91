//! sqlx-backed [`SqlExecutor`] and [`Connector`]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::{Connection, PgPool};
use tracing::debug;

use super::{Connector, SharedConnection, SqlExecutor};
use crate::types::SuperuserCredential;
use crate::Error;

/// Pool sizing applied to every connection we open
#[derive(Clone, Debug)]
pub struct PoolSettings {
    /// Maximum connections per pool
    pub max_connections: u32,
    /// How long to wait for a connection before failing
    pub acquire_timeout: Duration,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            max_connections: 5,
            acquire_timeout: Duration::from_secs(10),
        }
    }
}

/// Opens one lazily-connecting pool per credential
#[derive(Clone, Debug, Default)]
pub struct PgConnector {
    settings: PoolSettings,
}

impl PgConnector {
    /// Create a connector with the given pool settings
    pub fn new(settings: PoolSettings) -> Self {
        Self { settings }
    }
}

#[async_trait]
impl Connector for PgConnector {
    async fn open(&self, credential: &SuperuserCredential) -> Result<SharedConnection, Error> {
        let options = PgConnectOptions::new()
            .host(&credential.host)
            .port(credential.port)
            .username(&credential.user)
            .password(&credential.password)
            .database(&credential.database);

        debug!(
            host = %credential.host,
            port = credential.port,
            user = %credential.user,
            database = %credential.database,
            "opening connection pool"
        );

        let pool = PgPoolOptions::new()
            .max_connections(self.settings.max_connections)
            .acquire_timeout(self.settings.acquire_timeout)
            .connect_lazy_with(options);

        Ok(Arc::new(PgExecutor::new(pool)))
    }
}

/// [`SqlExecutor`] over a sqlx Postgres pool
pub struct PgExecutor {
    pool: PgPool,
}

impl PgExecutor {
    /// Wrap an existing pool
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn failed(operation: &'static str) -> impl Fn(sqlx::Error) -> Error {
    move |e| Error::database_during(operation, e.to_string())
}

#[async_trait]
impl SqlExecutor for PgExecutor {
    async fn ping(&self) -> Result<(), Error> {
        let mut conn = self.pool.acquire().await.map_err(failed("ping"))?;
        conn.ping().await.map_err(failed("ping"))
    }

    async fn query_exists(&self, sql: &str, arg: &str) -> Result<bool, Error> {
        let row = sqlx::query(sql)
            .bind(arg)
            .fetch_optional(&self.pool)
            .await
            .map_err(failed("query"))?;
        Ok(row.is_some())
    }

    async fn query_text(&self, sql: &str, arg: &str) -> Result<Option<String>, Error> {
        sqlx::query_scalar::<_, String>(sql)
            .bind(arg)
            .fetch_optional(&self.pool)
            .await
            .map_err(failed("query"))
    }

    async fn query_column(&self, sql: &str) -> Result<Vec<String>, Error> {
        sqlx::query_scalar::<_, String>(sql)
            .fetch_all(&self.pool)
            .await
            .map_err(failed("query"))
    }

    async fn execute(&self, sql: &str) -> Result<(), Error> {
        sqlx::raw_sql(sql)
            .execute(&self.pool)
            .await
            .map_err(failed("exec"))?;
        Ok(())
    }
}
