use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

/// Create the cache database named in `[cache] path` and its tables.
pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(&config.cache.path).await?;
    create_schema(&pool).await?;
    pool.close().await;
    Ok(())
}

/// Create the index cache tables. Idempotent.
pub async fn create_schema(pool: &SqlitePool) -> Result<()> {
    // One row per cache key; the coach only ever uses a single key.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS index_cache (
            key TEXT PRIMARY KEY,
            version TEXT NOT NULL,
            model TEXT NOT NULL,
            dims INTEGER NOT NULL,
            created_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS index_cache_vectors (
            key TEXT NOT NULL,
            entry_id INTEGER NOT NULL,
            position INTEGER NOT NULL,
            hash TEXT NOT NULL,
            embedding BLOB NOT NULL,
            PRIMARY KEY (key, entry_id, position),
            FOREIGN KEY (key) REFERENCES index_cache(key)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}
