//! Key/value result cache
//!
//! JSON values with an expiry, stored in `key_value_cache`. Keys come from
//! [`KeyValueCache::derive_key`], never from serialized arguments.

use std::future::Future;
use std::time::Duration;

use echo_common::time::{millis_from_now, now_millis};
use serde::de::DeserializeOwned;
use serde::Serialize;
use sqlx::{Row, SqlitePool};
use tracing::{debug, warn};

use crate::error::{Error, Result};

pub const MIN_KEY_LENGTH: usize = 4;

pub const ONE_HOUR: Duration = Duration::from_secs(60 * 60);

#[derive(Clone)]
pub struct KeyValueCache {
    pool: SqlitePool,
}

impl KeyValueCache {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Versioned key for `namespace` and ordered `parts`
    pub fn derive_key(namespace: &str, parts: &[&str]) -> String {
        echo_common::keys::derive_key(namespace, parts)
    }

    fn check_key(key: &str) -> Result<()> {
        if key.len() < MIN_KEY_LENGTH {
            return Err(Error::InvalidInput(format!(
                "cache key {:?} is too short, minimum length is {}",
                key, MIN_KEY_LENGTH
            )));
        }
        Ok(())
    }

    /// Fresh cached value for `key`
    ///
    /// Expired and unparseable rows are deleted and reported as absent.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        Self::check_key(key)?;

        let row = sqlx::query("SELECT value, expires_at FROM key_value_cache WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let expires_at: i64 = row.try_get("expires_at")?;
        if expires_at <= now_millis() {
            debug!("Cache entry expired: {}", key);
            self.delete(key).await?;
            return Ok(None);
        }

        let value: String = row.try_get("value")?;
        match serde_json::from_str(&value) {
            Ok(parsed) => Ok(Some(parsed)),
            Err(e) => {
                warn!("Deleting corrupt cache entry {}: {}", key, e);
                self.delete(key).await?;
                Ok(None)
            }
        }
    }

    pub async fn set<T: Serialize>(&self, key: &str, value: &T, ttl: Duration) -> Result<()> {
        Self::check_key(key)?;

        let json = serde_json::to_string(value)
            .map_err(|e| Error::InvalidInput(format!("value not serializable: {}", e)))?;

        sqlx::query(
            r#"
            INSERT INTO key_value_cache (key, value, expires_at) VALUES (?, ?, ?)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value, expires_at = excluded.expires_at
            "#,
        )
        .bind(key)
        .bind(json)
        .bind(millis_from_now(ttl.as_secs()))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn delete(&self, key: &str) -> Result<()> {
        sqlx::query("DELETE FROM key_value_cache WHERE key = ?")
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Return the cached value for `key`, or run `producer` and cache its result
    ///
    /// Producer errors are returned uncached.
    pub async fn wrap<T, F, Fut>(&self, key: &str, ttl: Duration, producer: F) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        if let Some(hit) = self.get::<T>(key).await? {
            debug!("Cache hit: {}", key);
            return Ok(hit);
        }

        debug!("Cache miss: {}", key);
        let value = producer().await?;

        if let Err(e) = self.set(key, &value, ttl).await {
            warn!("Failed to store cache entry {}: {}", key, e);
        }

        Ok(value)
    }

    /// Delete every expired row
    pub async fn purge_expired(&self) -> Result<u64> {
        let result = sqlx::query("DELETE FROM key_value_cache WHERE expires_at <= ?")
            .bind(now_millis())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}
