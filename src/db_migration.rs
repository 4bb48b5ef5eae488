use sqlx::SqlitePool;

use crate::errors::{DbError, DbResult};

// Embed all migration SQL files at compile time
const MIGRATION_FIELD_RECORDS: &str = include_str!("../migrations/20250601000000_field_records.sql");
const MIGRATION_SYNC_QUEUE: &str = include_str!("../migrations/20250602000000_sync_queue.sql");

// List of migrations with their names and SQL content
const MIGRATIONS: &[(&str, &str)] = &[
    ("20250601000000_field_records.sql", MIGRATION_FIELD_RECORDS),
    ("20250602000000_sync_queue.sql", MIGRATION_SYNC_QUEUE),
];

/// Apply every migration that has not been recorded yet.
pub async fn initialize_database(pool: &SqlitePool) -> DbResult<()> {
    log::info!("Starting database migration process");

    create_migrations_table(pool).await?;

    let last_migration = get_last_migration(pool).await?;
    match &last_migration {
        Some(name) => log::debug!("Last applied migration: {}", name),
        None => log::debug!("No migrations applied yet"),
    }

    apply_pending_migrations(pool, last_migration).await?;

    log::info!("Database migration process completed");
    Ok(())
}

/// Create migrations table if it doesn't exist
async fn create_migrations_table(pool: &SqlitePool) -> DbResult<()> {
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS migrations (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            applied_at TEXT NOT NULL
        )"
    )
    .execute(pool)
    .await
    .map_err(|e| DbError::Migration(format!("Failed to create migrations table: {}", e)))?;

    Ok(())
}

/// Get the last applied migration
async fn get_last_migration(pool: &SqlitePool) -> DbResult<Option<String>> {
    let result = sqlx::query_scalar::<_, String>(
        "SELECT name FROM migrations ORDER BY id DESC LIMIT 1"
    )
    .fetch_optional(pool)
    .await
    .map_err(|e| DbError::Migration(format!("Failed to get last migration: {}", e)))?;

    Ok(result)
}

/// Apply pending migrations inside a single transaction
async fn apply_pending_migrations(pool: &SqlitePool, last_migration: Option<String>) -> DbResult<()> {
    let pending_migrations = get_pending_migrations(last_migration.as_deref());

    if pending_migrations.is_empty() {
        log::debug!("No pending migrations to apply");
        return Ok(());
    }

    log::info!("Found {} pending migrations", pending_migrations.len());

    let mut tx = pool.begin().await
        .map_err(|e| DbError::Transaction(format!("Failed to begin transaction: {}", e)))?;

    for (migration_name, migration_sql) in pending_migrations {
        log::debug!("Applying migration: {}", migration_name);

        sqlx::raw_sql(migration_sql)
            .execute(&mut *tx)
            .await
            .map_err(|e| DbError::Migration(format!("Failed to apply migration {}: {}", migration_name, e)))?;

        let now = crate::utils::to_db_timestamp(&chrono::Utc::now());
        sqlx::query("INSERT INTO migrations (name, applied_at) VALUES (?, ?)")
            .bind(migration_name)
            .bind(now)
            .execute(&mut *tx)
            .await
            .map_err(|e| DbError::Migration(format!("Failed to record migration {}: {}", migration_name, e)))?;
    }

    tx.commit().await
        .map_err(|e| DbError::Transaction(format!("Failed to commit migrations: {}", e)))?;

    log::info!("All migrations applied and committed");
    Ok(())
}

/// Determine which migrations need to be applied
fn get_pending_migrations(last_migration: Option<&str>) -> Vec<(&'static str, &'static str)> {
    let mut pending = Vec::new();
    let mut should_include = last_migration.is_none();

    for &(migration_name, migration_sql) in MIGRATIONS {
        if should_include {
            pending.push((migration_name, migration_sql));
        } else if Some(migration_name) == last_migration {
            // Found the last applied migration, include all subsequent ones
            should_include = true;
        }
    }

    pending
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::memory_pool;

    #[test]
    fn test_pending_migrations_after_last() {
        assert_eq!(get_pending_migrations(None).len(), MIGRATIONS.len());
        let after_first = get_pending_migrations(Some(MIGRATIONS[0].0));
        assert_eq!(after_first.len(), MIGRATIONS.len() - 1);
        assert!(get_pending_migrations(Some(MIGRATIONS[MIGRATIONS.len() - 1].0)).is_empty());
    }

    #[tokio::test]
    async fn test_initialize_is_idempotent() {
        let pool = memory_pool().await;
        // memory_pool already migrated once; a second run must be a no-op
        initialize_database(&pool).await.unwrap();
        let applied: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM migrations")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(applied, MIGRATIONS.len() as i64);
    }
}
