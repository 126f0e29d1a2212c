use sqlx::postgres::PgPoolOptions;
use sqlx::{Pool, Postgres};
use std::time::Duration;
use tracing::info;

use crate::app_config::DatabaseConfig;
use crate::ride_repo::PostgresRideRepository;

#[derive(Clone)]
pub struct DbClient {
    pub pool: Pool<Postgres>,
}

impl DbClient {
    pub async fn connect(config: &DatabaseConfig) -> Result<Self, sqlx::Error> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_secs(3))
            .connect(&config.url)
            .await?;
        info!("Postgres pool ready ({} connections max)", config.max_connections);

        Ok(Self { pool })
    }

    /// Applies the embedded schema (users, rides, bookings)
    pub async fn migrate(&self) -> Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("../migrations").run(&self.pool).await?;
        info!("Ride schema is up to date");
        Ok(())
    }

    pub fn ride_repository(&self) -> PostgresRideRepository {
        PostgresRideRepository::new(self.pool.clone())
    }
}
