//! SQLite-backed [`IndexCache`].
//!
//! The record lives under a single key (`kb-index`) in two tables:
//! `index_cache` holds the header (fingerprint, model, dims, timestamp) and
//! `index_cache_vectors` one row per phrasing embedding, stored as a
//! little-endian `f32` BLOB. [`put`](IndexCache::put) replaces both in one
//! transaction so readers never observe a half-written index.

use async_trait::async_trait;
use sqlx::{Row, SqlitePool};
use std::path::Path;

use trail_coach_core::cache::{CacheRecord, CachedEntry, CachedVector, IndexCache};
use trail_coach_core::embedding::{blob_to_vec, vec_to_blob};
use trail_coach_core::{CoachError, Result};

use crate::{db, migrate};

/// Key of the single cached index.
pub const CACHE_KEY: &str = "kb-index";

const BACKEND: &str = "sqlite";

/// SQLite implementation of [`IndexCache`].
pub struct SqliteCache {
    pool: SqlitePool,
}

impl SqliteCache {
    /// Open the database at `path`, creating the schema when missing.
    pub async fn open(path: &Path) -> anyhow::Result<Self> {
        let pool = db::connect(path).await?;
        migrate::create_schema(&pool).await?;
        Ok(Self { pool })
    }
}

fn read_err(e: impl std::fmt::Display) -> CoachError {
    CoachError::CacheRead {
        backend: BACKEND.to_string(),
        message: e.to_string(),
    }
}

fn write_err(e: impl std::fmt::Display) -> CoachError {
    CoachError::CacheWrite {
        backend: BACKEND.to_string(),
        message: e.to_string(),
    }
}

#[async_trait]
impl IndexCache for SqliteCache {
    fn backend_name(&self) -> &str {
        BACKEND
    }

    async fn get(&self) -> Result<Option<CacheRecord>> {
        let header = sqlx::query(
            "SELECT version, model, dims, created_at FROM index_cache WHERE key = ?",
        )
        .bind(CACHE_KEY)
        .fetch_optional(&self.pool)
        .await
        .map_err(read_err)?;

        let header = match header {
            Some(row) => row,
            None => return Ok(None),
        };
        let dims: i64 = header.get("dims");

        let rows = sqlx::query(
            r#"
            SELECT entry_id, position, hash, embedding
            FROM index_cache_vectors
            WHERE key = ?
            ORDER BY entry_id ASC, position ASC
            "#,
        )
        .bind(CACHE_KEY)
        .fetch_all(&self.pool)
        .await
        .map_err(read_err)?;

        let mut entries: Vec<CachedEntry> = Vec::new();
        for row in &rows {
            let entry_id: i64 = row.get("entry_id");
            let position: i64 = row.get("position");
            let blob: Vec<u8> = row.get("embedding");

            if entries.last().map(|e| e.id) != Some(entry_id) {
                entries.push(CachedEntry {
                    id: entry_id,
                    vectors: Vec::new(),
                });
            }
            let entry = entries
                .last_mut()
                .ok_or_else(|| read_err("vector row without entry"))?;
            if position != entry.vectors.len() as i64 {
                return Err(read_err(format!(
                    "entry {} has a gap at phrasing {}",
                    entry_id, position
                )));
            }
            entry.vectors.push(CachedVector {
                hash: row.get("hash"),
                embedding: blob_to_vec(&blob),
            });
        }

        Ok(Some(CacheRecord {
            version: header.get("version"),
            model: header.get("model"),
            dims: dims.max(0) as usize,
            created_at: header.get("created_at"),
            entries,
        }))
    }

    async fn put(&self, record: &CacheRecord) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(write_err)?;

        sqlx::query("DELETE FROM index_cache_vectors WHERE key = ?")
            .bind(CACHE_KEY)
            .execute(&mut *tx)
            .await
            .map_err(write_err)?;

        sqlx::query(
            r#"
            INSERT INTO index_cache (key, version, model, dims, created_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(key) DO UPDATE SET
                version = excluded.version,
                model = excluded.model,
                dims = excluded.dims,
                created_at = excluded.created_at
            "#,
        )
        .bind(CACHE_KEY)
        .bind(&record.version)
        .bind(&record.model)
        .bind(record.dims as i64)
        .bind(record.created_at)
        .execute(&mut *tx)
        .await
        .map_err(write_err)?;

        for entry in &record.entries {
            for (position, vector) in entry.vectors.iter().enumerate() {
                sqlx::query(
                    r#"
                    INSERT INTO index_cache_vectors (key, entry_id, position, hash, embedding)
                    VALUES (?, ?, ?, ?, ?)
                    "#,
                )
                .bind(CACHE_KEY)
                .bind(entry.id)
                .bind(position as i64)
                .bind(&vector.hash)
                .bind(vec_to_blob(&vector.embedding))
                .execute(&mut *tx)
                .await
                .map_err(write_err)?;
            }
        }

        tx.commit().await.map_err(write_err)?;
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(write_err)?;
        sqlx::query("DELETE FROM index_cache_vectors WHERE key = ?")
            .bind(CACHE_KEY)
            .execute(&mut *tx)
            .await
            .map_err(write_err)?;
        sqlx::query("DELETE FROM index_cache WHERE key = ?")
            .bind(CACHE_KEY)
            .execute(&mut *tx)
            .await
            .map_err(write_err)?;
        tx.commit().await.map_err(write_err)?;
        Ok(())
    }
}
