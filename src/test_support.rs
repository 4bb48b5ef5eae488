use crate::db_migration::initialize_database;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;

/// Fresh migrated in-memory database. One connection, since every
/// connection to `sqlite::memory:` opens its own database.
pub async fn memory_pool() -> SqlitePool {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("in-memory sqlite pool");
    initialize_database(&pool).await.expect("migrations apply");
    pool
}
