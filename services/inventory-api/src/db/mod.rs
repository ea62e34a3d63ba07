//! Postgres storage: the connection pool, the component store the
//! reconciler runs against, and machine registrations.

mod components;
mod error;
mod machines;

pub use components::{PgComponentStore, PgComponentTx};
pub use error::DbError;
pub use machines::{MachineRecord, MachineStore, NewMachine, Registration};

use std::path::PathBuf;
use std::time::Duration;

use sqlx::migrate::Migrator;
use sqlx::postgres::{PgPool, PgPoolOptions};
use tracing::{info, instrument};

/// Connection pool settings.
#[derive(Debug, Clone)]
pub struct DbConfig {
    pub database_url: String,
    pub max_connections: u32,
    pub min_connections: u32,

    /// How long a caller waits for a free connection before the store is
    /// reported unavailable.
    pub acquire_timeout: Duration,
    pub idle_timeout: Duration,
    pub max_lifetime: Duration,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            database_url: "postgres://localhost/fleetsync".to_string(),
            max_connections: 10,
            min_connections: 1,
            acquire_timeout: Duration::from_secs(5),
            idle_timeout: Duration::from_secs(600),
            max_lifetime: Duration::from_secs(1800),
        }
    }
}

impl DbConfig {
    fn pool_options(&self) -> PgPoolOptions {
        PgPoolOptions::new()
            .max_connections(self.max_connections)
            .min_connections(self.min_connections)
            .acquire_timeout(self.acquire_timeout)
            .idle_timeout(Some(self.idle_timeout))
            .max_lifetime(Some(self.max_lifetime))
    }
}

/// Places the migrations directory may live, depending on where the binary
/// or test runner was started from.
fn migration_dirs() -> [PathBuf; 3] {
    [
        PathBuf::from("./migrations"),
        PathBuf::from("services/inventory-api/migrations"),
        PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("migrations"),
    ]
}

/// Shared handle to the pool. Cheap to clone.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Open the pool, failing fast if the database is unreachable.
    #[instrument(skip_all, fields(max_connections = config.max_connections))]
    pub async fn connect(config: &DbConfig) -> Result<Self, DbError> {
        let pool = config
            .pool_options()
            .connect(&config.database_url)
            .await
            .map_err(DbError::Connect)?;

        info!("Database connection pool established");
        Ok(Self { pool })
    }

    /// Open the pool without connecting; the first query does.
    pub fn connect_lazy(config: &DbConfig) -> Result<Self, DbError> {
        config
            .pool_options()
            .connect_lazy(&config.database_url)
            .map(|pool| Self { pool })
            .map_err(DbError::Connect)
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn health_check(&self) -> Result<(), DbError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map(|_| ())
            .map_err(DbError::Query)
    }

    /// Apply pending migrations. Used in dev mode and by tests; production
    /// applies them out of band.
    pub async fn run_migrations(&self) -> Result<(), DbError> {
        let dirs = migration_dirs();

        let Some(dir) = dirs.iter().find(|dir| dir.is_dir()) else {
            let tried = dirs
                .iter()
                .map(|dir| dir.display().to_string())
                .collect::<Vec<_>>()
                .join(", ");
            return Err(DbError::MigrationDirNotFound { tried });
        };

        info!(migrations_dir = %dir.display(), "Running database migrations");
        let migrator = Migrator::new(dir.clone())
            .await
            .map_err(DbError::Migration)?;
        migrator.run(&self.pool).await.map_err(DbError::Migration)?;

        info!("Database migrations complete");
        Ok(())
    }

    pub fn component_store(&self) -> PgComponentStore {
        PgComponentStore::new(self.pool.clone())
    }

    pub fn machine_store(&self) -> MachineStore {
        MachineStore::new(self.pool.clone())
    }
}
