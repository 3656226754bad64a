use sqlx::{postgres::PgPoolOptions, PgPool};
use std::time::Duration;
use thiserror::Error;
use tracing::info;

use crate::config::DatabaseConfig;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("open database: {0}")]
    Open(#[source] sqlx::Error),
    #[error("database connectivity check failed: {0}")]
    Ping(#[source] sqlx::Error),
}

/// A pool that answered the liveness probe. Closing consumes it.
#[derive(Debug)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    pub async fn connect(cfg: &DatabaseConfig) -> Result<Self, DbError> {
        // lazy: no I/O until the probe below
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .acquire_timeout(Duration::from_secs(5))
            .connect_lazy(&cfg.dsn())
            .map_err(DbError::Open)?;

        if let Err(e) = ping(&pool).await {
            pool.close().await;
            return Err(DbError::Ping(e));
        }
        info!(host = %cfg.host, name = %cfg.name, "database connected");

        Ok(Self { pool })
    }

    pub async fn close(self) {
        self.pool.close().await;
        info!("database connection closed");
    }
}

async fn ping(pool: &PgPool) -> Result<(), sqlx::Error> {
    sqlx::query_scalar::<_, i32>("SELECT 1")
        .fetch_one(pool)
        .await
        .map(|_| ())
}
