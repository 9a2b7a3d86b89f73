use std::path::Path;

use diesel::prelude::*;
use diesel::r2d2::{ConnectionManager, Pool, PooledConnection};
use diesel::sqlite::SqliteConnection;
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};

use super::StoreError;

pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

pub type DbPool = Pool<ConnectionManager<SqliteConnection>>;
pub type DbPooledConnection = PooledConnection<ConnectionManager<SqliteConnection>>;

/// Establish a single connection with a busy timeout, used for the startup
/// migration pass before the pool is built.
pub fn establish_connection(database_url: &str) -> Result<SqliteConnection, StoreError> {
    let mut conn = SqliteConnection::establish(database_url)
        .map_err(|e| StoreError::Unavailable(e.to_string()))?;

    // Set busy timeout to 5 seconds to handle concurrent access gracefully
    diesel::sql_query("PRAGMA busy_timeout = 5000")
        .execute(&mut conn)
        .map_err(|e| StoreError::Unavailable(format!("failed to set busy_timeout: {e}")))?;

    Ok(conn)
}

/// Run all pending migrations. Schema changes are additive only: new
/// columns default to null, so this never requires a data migration.
pub fn run_migrations(conn: &mut SqliteConnection) -> Result<(), StoreError> {
    conn.run_pending_migrations(MIGRATIONS)
        .map(|_| ())
        .map_err(|e| StoreError::SchemaMismatch(e.to_string()))
}

/// Build the r2d2 pool used by the rest of the process. One physical file
/// with any number of pooled connections; SQLite's own locking combined
/// with the busy_timeout above serialises concurrent writers.
pub fn build_pool(db_path: &Path) -> Result<DbPool, StoreError> {
    let database_url = db_path.to_string_lossy().to_string();

    let mut conn = establish_connection(&database_url)?;
    run_migrations(&mut conn)?;
    drop(conn);

    let manager = ConnectionManager::<SqliteConnection>::new(database_url);
    Pool::builder()
        .max_size(8)
        .build(manager)
        .map_err(|e| StoreError::Unavailable(format!("failed to create connection pool: {e}")))
}
