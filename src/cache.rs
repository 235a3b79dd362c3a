//! Content-hash keyed summary cache.
//!
//! Lookups are exact matches on an element's content hash, so identical
//! content is summarized once no matter which file or page it came from.
//! There is no expiry and no eviction; [`SummaryCache::clear`] is the only
//! way to force reprocessing.
//!
//! Storage failures never abort the pipeline. A cache whose database cannot
//! be opened runs in degraded mode, and any failed read is reported as a
//! miss. Summaries are then simply recomputed.

use anyhow::Result;
use sqlx::{Row, SqlitePool};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::db;
use crate::migrate;
use crate::models::{CacheEntry, Summary};

/// Hit/miss/write counters for one cache instance.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub writes: u64,
}

pub struct SummaryCache {
    pool: Option<SqlitePool>,
    hits: AtomicU64,
    misses: AtomicU64,
    writes: AtomicU64,
}

impl SummaryCache {
    /// Open the cache stored in the SQLite file at `path`.
    ///
    /// Never fails: if the database cannot be opened or migrated the cache
    /// comes up degraded and behaves as permanently empty.
    pub async fn open(path: &Path) -> Self {
        match db::connect_path(path).await {
            Ok(pool) => Self::with_pool(pool).await,
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "summary cache unavailable, continuing without cache"
                );
                Self::disabled()
            }
        }
    }

    /// Use an existing pool, creating the cache table if needed.
    pub async fn with_pool(pool: SqlitePool) -> Self {
        match migrate::apply_cache_schema(&pool).await {
            Ok(()) => Self::from_parts(Some(pool)),
            Err(e) => {
                tracing::warn!(error = %e, "summary cache schema unavailable, continuing without cache");
                Self::disabled()
            }
        }
    }

    /// A cache that never stores anything.
    pub fn disabled() -> Self {
        Self::from_parts(None)
    }

    fn from_parts(pool: Option<SqlitePool>) -> Self {
        Self {
            pool,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            writes: AtomicU64::new(0),
        }
    }

    /// Whether entries survive this process.
    pub fn is_persistent(&self) -> bool {
        self.pool.is_some()
    }

    /// Look up the summary stored for `hash`.
    pub async fn get(&self, hash: &str) -> Option<Summary> {
        let found = match self.entry(hash).await {
            Ok(entry) => entry.map(|e| e.value),
            Err(e) => {
                tracing::warn!(error = %e, "summary cache read failed, treating as miss");
                None
            }
        };

        if found.is_some() {
            self.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
        }
        found
    }

    /// Full cache row for `hash`, surfacing storage errors.
    pub async fn entry(&self, hash: &str) -> Result<Option<CacheEntry>> {
        let Some(pool) = &self.pool else {
            return Ok(None);
        };

        let row = sqlx::query(
            "SELECT element_id, summary, model_used, created_at FROM summary_cache WHERE content_hash = ?",
        )
        .bind(hash)
        .fetch_optional(pool)
        .await?;

        Ok(row.map(|row| CacheEntry {
            key: hash.to_string(),
            value: Summary {
                element_id: row.get("element_id"),
                text: row.get("summary"),
                model_used: row.get("model_used"),
            },
            timestamp: row.get("created_at"),
        }))
    }

    /// Store `summary` under `hash`, replacing any previous entry.
    ///
    /// Returns `false` if the write did not reach storage.
    pub async fn put(&self, hash: &str, summary: &Summary) -> bool {
        let Some(pool) = &self.pool else {
            return false;
        };

        let now = chrono::Utc::now().timestamp();
        let result = sqlx::query(
            r#"
            INSERT INTO summary_cache (content_hash, element_id, summary, model_used, created_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(content_hash) DO UPDATE SET
                element_id = excluded.element_id,
                summary = excluded.summary,
                model_used = excluded.model_used,
                created_at = excluded.created_at
            "#,
        )
        .bind(hash)
        .bind(&summary.element_id)
        .bind(&summary.text)
        .bind(&summary.model_used)
        .bind(now)
        .execute(pool)
        .await;

        match result {
            Ok(_) => {
                self.writes.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(e) => {
                tracing::warn!(error = %e, "summary cache write failed");
                false
            }
        }
    }

    /// Remove every entry. Returns the number of entries removed.
    pub async fn clear(&self) -> Result<u64> {
        let Some(pool) = &self.pool else {
            return Ok(0);
        };
        let result = sqlx::query("DELETE FROM summary_cache")
            .execute(pool)
            .await?;
        Ok(result.rows_affected())
    }

    /// Number of stored entries (0 when degraded or unreadable).
    pub async fn len(&self) -> u64 {
        let Some(pool) = &self.pool else {
            return 0;
        };
        sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM summary_cache")
            .fetch_one(pool)
            .await
            .map(|n| n as u64)
            .unwrap_or(0)
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            writes: self.writes.load(Ordering::Relaxed),
        }
    }

    /// Flush and release the underlying connection.
    pub async fn close(self) {
        if let Some(pool) = self.pool {
            pool.close().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn summary(id: &str, text: &str) -> Summary {
        Summary {
            element_id: id.to_string(),
            text: text.to_string(),
            model_used: "test-model".to_string(),
        }
    }

    #[tokio::test]
    async fn put_then_get_returns_same_summary() {
        let tmp = TempDir::new().unwrap();
        let cache = SummaryCache::open(&tmp.path().join("c.sqlite")).await;
        assert!(cache.is_persistent());

        let s = summary("text_p1_abc", "A short summary.");
        assert!(cache.put("hash-1", &s).await);
        assert_eq!(cache.get("hash-1").await, Some(s));
        assert_eq!(cache.get("hash-2").await, None);

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.writes, 1);
    }

    #[tokio::test]
    async fn entries_survive_reopen() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("c.sqlite");

        let cache = SummaryCache::open(&path).await;
        cache.put("h", &summary("e", "kept")).await;
        cache.close().await;

        let reopened = SummaryCache::open(&path).await;
        let entry = reopened.entry("h").await.unwrap().unwrap();
        assert_eq!(entry.value.text, "kept");
        assert!(entry.timestamp > 0);
    }

    #[tokio::test]
    async fn put_overwrites_existing_key() {
        let tmp = TempDir::new().unwrap();
        let cache = SummaryCache::open(&tmp.path().join("c.sqlite")).await;
        cache.put("h", &summary("e", "old")).await;
        cache.put("h", &summary("e", "new")).await;
        assert_eq!(cache.get("h").await.unwrap().text, "new");
        assert_eq!(cache.len().await, 1);
    }

    #[tokio::test]
    async fn clear_removes_everything() {
        let tmp = TempDir::new().unwrap();
        let cache = SummaryCache::open(&tmp.path().join("c.sqlite")).await;
        for i in 0..4 {
            cache.put(&format!("h{}", i), &summary("e", "s")).await;
        }
        assert_eq!(cache.clear().await.unwrap(), 4);
        assert!(cache.is_empty().await);
        for i in 0..4 {
            assert_eq!(cache.get(&format!("h{}", i)).await, None);
        }
    }

    #[tokio::test]
    async fn disabled_cache_always_misses() {
        let cache = SummaryCache::disabled();
        assert!(!cache.is_persistent());
        assert!(!cache.put("h", &summary("e", "s")).await);
        assert_eq!(cache.get("h").await, None);
        assert_eq!(cache.clear().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn unopenable_path_degrades_instead_of_failing() {
        let tmp = TempDir::new().unwrap();
        // A regular file where a directory is expected.
        let blocker = tmp.path().join("not-a-dir");
        std::fs::write(&blocker, b"x").unwrap();

        let cache = SummaryCache::open(&blocker.join("c.sqlite")).await;
        assert!(!cache.is_persistent());
        assert_eq!(cache.get("anything").await, None);
    }

    #[tokio::test]
    async fn closed_pool_read_is_a_miss() {
        let tmp = TempDir::new().unwrap();
        let pool = db::connect_path(&tmp.path().join("c.sqlite")).await.unwrap();
        let cache = SummaryCache::with_pool(pool.clone()).await;
        cache.put("h", &summary("e", "s")).await;

        pool.close().await;
        assert_eq!(cache.get("h").await, None);
        assert!(!cache.put("h2", &summary("e", "s")).await);
    }
}
