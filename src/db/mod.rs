//! Database connection management

pub mod schema;

use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;

/// PostgreSQL database connection pool
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Create a new database connection pool
    pub async fn connect(database_url: &str) -> Result<Self, sqlx::Error> {
        let pool = PgPoolOptions::new()
            .max_connections(20)
            .acquire_timeout(Duration::from_secs(5))
            .connect(database_url)
            .await?;

        tracing::info!("PostgreSQL connection pool established");
        Ok(Self { pool })
    }

    /// Get a reference to the connection pool
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Check database health
    pub async fn health_check(&self) -> Result<(), sqlx::Error> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    /// Create the deposit tables and indexes if they do not exist
    pub async fn init_schema(&self) -> Result<(), sqlx::Error> {
        for (name, sql) in schema::ALL {
            sqlx::query(sql).execute(&self.pool).await.map_err(|e| {
                tracing::error!(object = name, error = %e, "Schema bootstrap failed");
                e
            })?;
        }
        tracing::info!("Deposit schema initialized");
        Ok(())
    }
}
