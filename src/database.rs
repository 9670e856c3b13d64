use sqlx::{postgres::PgPoolOptions, PgPool};
use std::time::Duration;
use tracing::{info, warn};

use crate::config::DatabaseConfig;

const CONNECT_ATTEMPTS: u32 = 5;

#[derive(Clone)]
pub struct Database {
    pub pool: PgPool,
}

impl Database {
    /// Подключается к PostgreSQL: до `CONNECT_ATTEMPTS` попыток с растущей паузой.
    pub async fn connect(config: &DatabaseConfig) -> Result<Self, sqlx::Error> {
        let options = PgPoolOptions::new()
            .max_connections(config.pool_size)
            .min_connections(1)
            .acquire_timeout(Duration::from_secs(5));

        let mut attempt = 1;
        loop {
            match options.clone().connect(&config.url).await {
                Ok(pool) => {
                    info!("Database connected (pool size {})", config.pool_size);
                    return Ok(Database { pool });
                }
                Err(e) if attempt < CONNECT_ATTEMPTS => {
                    let delay = Duration::from_secs(1 << attempt);
                    warn!(
                        "⏳ Database not ready (attempt {}/{}): {}. Retrying in {:?}",
                        attempt, CONNECT_ATTEMPTS, e, delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    pub async fn run_migrations(&self) -> Result<(), sqlx::migrate::MigrateError> {
        info!("Running database migrations...");
        sqlx::migrate!("./src/migrations").run(&self.pool).await?;
        info!("Migrations completed");
        Ok(())
    }

    // для /health
    pub async fn ping(&self) -> bool {
        sqlx::query_scalar::<_, i32>("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .is_ok()
    }
}
