//! Durable cache index (`file_cache` table)

use echo_common::time::now_millis;
use sqlx::{Row, SqlitePool};

use crate::error::Result;

/// Page size for the created-at ordered reconciliation scan
pub const SCAN_PAGE_SIZE: i64 = 50;

/// One row of the cache index
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub hash: String,
    pub bytes: i64,
    pub accessed_at: i64,
    pub created_at: i64,
}

/// Cursor for the paged scan (last row seen)
#[derive(Debug, Clone, Default)]
pub struct ScanCursor {
    created_at: i64,
    hash: String,
}

/// Queries over the `file_cache` table
#[derive(Clone)]
pub struct CacheIndex {
    pool: SqlitePool,
}

impl CacheIndex {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn entry_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<CacheEntry> {
        Ok(CacheEntry {
            hash: row.try_get("hash")?,
            bytes: row.try_get("bytes")?,
            accessed_at: row.try_get("accessed_at")?,
            created_at: row.try_get("created_at")?,
        })
    }

    pub async fn get(&self, hash: &str) -> Result<Option<CacheEntry>> {
        let row = sqlx::query(
            "SELECT hash, bytes, accessed_at, created_at FROM file_cache WHERE hash = ?",
        )
        .bind(hash)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::entry_from_row).transpose()
    }

    /// Insert or replace the entry for `hash`, stamping both timestamps with now
    pub async fn upsert(&self, hash: &str, bytes: u64) -> Result<()> {
        let now = now_millis();
        let bytes = i64::try_from(bytes).unwrap_or(i64::MAX);

        sqlx::query(
            r#"
            INSERT INTO file_cache (hash, bytes, accessed_at, created_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(hash) DO UPDATE SET
                bytes = excluded.bytes,
                accessed_at = excluded.accessed_at
            "#,
        )
        .bind(hash)
        .bind(bytes)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Update `accessed_at` to now
    pub async fn touch(&self, hash: &str) -> Result<()> {
        sqlx::query("UPDATE file_cache SET accessed_at = ? WHERE hash = ?")
            .bind(now_millis())
            .bind(hash)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn delete(&self, hash: &str) -> Result<()> {
        sqlx::query("DELETE FROM file_cache WHERE hash = ?")
            .bind(hash)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Sum of `bytes` over all entries
    pub async fn total_bytes(&self) -> Result<u64> {
        let total: i64 = sqlx::query_scalar("SELECT COALESCE(SUM(bytes), 0) FROM file_cache")
            .fetch_one(&self.pool)
            .await?;
        Ok(u64::try_from(total).unwrap_or(0))
    }

    pub async fn count(&self) -> Result<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM file_cache")
            .fetch_one(&self.pool)
            .await?;
        Ok(u64::try_from(count).unwrap_or(0))
    }

    /// Least recently accessed entry (insertion order breaks ties)
    pub async fn oldest_accessed(&self) -> Result<Option<CacheEntry>> {
        let row = sqlx::query(
            r#"
            SELECT hash, bytes, accessed_at, created_at FROM file_cache
            ORDER BY accessed_at ASC, rowid ASC
            LIMIT 1
            "#,
        )
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::entry_from_row).transpose()
    }

    /// Next page of entries ascending by `created_at`, starting after `cursor`
    ///
    /// Keyset pagination keeps the scan stable while rows are deleted between
    /// pages. Returns an empty page once the scan is exhausted.
    pub async fn scan_page(&self, cursor: &mut ScanCursor) -> Result<Vec<CacheEntry>> {
        let rows = sqlx::query(
            r#"
            SELECT hash, bytes, accessed_at, created_at FROM file_cache
            WHERE created_at > ?1 OR (created_at = ?1 AND hash > ?2)
            ORDER BY created_at ASC, hash ASC
            LIMIT ?3
            "#,
        )
        .bind(cursor.created_at)
        .bind(&cursor.hash)
        .bind(SCAN_PAGE_SIZE)
        .fetch_all(&self.pool)
        .await?;

        let page = rows
            .iter()
            .map(Self::entry_from_row)
            .collect::<Result<Vec<_>>>()?;

        if let Some(last) = page.last() {
            cursor.created_at = last.created_at;
            cursor.hash = last.hash.clone();
        }

        Ok(page)
    }
}
