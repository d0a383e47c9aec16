use secrecy::{ExposeSecret, Secret};
use sqlx::{postgres::PgPoolOptions, PgPool};
use std::time::Duration;

pub mod audit_log;
pub mod ledger;
pub mod memory;

pub use audit_log::{AuditError, AuditLog, PgAuditLog};
pub use ledger::{LedgerError, LedgerStore, PgLedgerStore};

pub async fn create_pool(
    database_url: &Secret<String>,
    max_connections: u32,
) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(Duration::from_secs(3))
        .connect(database_url.expose_secret())
        .await
}

pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::Error> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(|e| sqlx::Error::Migrate(Box::new(e)))
}
