//! Cache and index statistics.
//!
//! Used by `mmrag stats` and `mmrag cache stats` to show what has been
//! summarized and indexed, and which embedding model the index is pinned to.

use anyhow::Result;
use sqlx::{Row, SqlitePool};

use crate::config::Config;
use crate::db;
use crate::index::{PinnedModel, VectorIndex};
use crate::migrate;

/// Per-PDF document counts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceStats {
    pub source: String,
    pub documents: i64,
    pub last_indexed_ts: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stats {
    /// Placeholder summaries are never cached, so this counts real ones only.
    pub cache_entries: i64,
    pub cache_oldest_ts: Option<i64>,
    pub cache_newest_ts: Option<i64>,
    pub documents: i64,
    pub by_kind: Vec<(String, i64)>,
    pub by_source: Vec<SourceStats>,
    pub pinned: Option<PinnedModel>,
}

pub async fn collect(pool: &SqlitePool) -> Result<Stats> {
    migrate::apply(pool).await?;

    let cache_row = sqlx::query(
        "SELECT COUNT(*) AS n, MIN(created_at) AS oldest, MAX(created_at) AS newest FROM summary_cache",
    )
    .fetch_one(pool)
    .await?;

    let source_rows = sqlx::query(
        r#"
        SELECT source, COUNT(*) AS n, MAX(created_at) AS last_ts
        FROM documents
        GROUP BY source
        ORDER BY n DESC, source
        "#,
    )
    .fetch_all(pool)
    .await?;

    let index = VectorIndex::open(pool.clone()).await?;

    Ok(Stats {
        cache_entries: cache_row.get("n"),
        cache_oldest_ts: cache_row.get("oldest"),
        cache_newest_ts: cache_row.get("newest"),
        documents: index.len().await? as i64,
        by_kind: index.counts_by_kind().await?,
        by_source: source_rows
            .iter()
            .map(|r| SourceStats {
                source: r.get("source"),
                documents: r.get("n"),
                last_indexed_ts: r.get("last_ts"),
            })
            .collect(),
        pinned: index.pinned_model().await?,
    })
}

/// `mmrag stats`: print a summary of the database.
pub async fn run_stats(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    let stats = collect(&pool).await?;

    let db_size = std::fs::metadata(&config.db.path)
        .map(|m| m.len())
        .unwrap_or(0);

    println!("Multimodal RAG Database Stats");
    println!("=============================");
    println!();
    println!("  Database:    {}", config.db.path.display());
    println!("  Size:        {}", format_bytes(db_size));
    println!();
    println!("  Cached summaries: {}", stats.cache_entries);
    println!("  Indexed documents: {}", stats.documents);
    for (kind, n) in &stats.by_kind {
        println!("    {:<8} {:>6}", kind, n);
    }
    match &stats.pinned {
        Some(p) => println!("  Embedding model: {} ({} dims)", p.model, p.dims),
        None => println!("  Embedding model: (none yet)"),
    }

    if !stats.by_source.is_empty() {
        println!();
        println!("  By source:");
        println!("  {:<48} {:>6}   {}", "SOURCE", "DOCS", "LAST INGEST");
        println!("  {}", "-".repeat(72));
        for s in &stats.by_source {
            let when = match s.last_indexed_ts {
                Some(ts) => format_ts_relative(ts),
                None => "never".to_string(),
            };
            println!("  {:<48} {:>6}   {}", s.source, s.documents, when);
        }
    }

    println!();
    pool.close().await;
    Ok(())
}

/// `mmrag cache stats`.
pub async fn run_cache_stats(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    let stats = collect(&pool).await?;

    println!("summary cache {}", config.db.path.display());
    println!("  entries: {}", stats.cache_entries);
    if let (Some(oldest), Some(newest)) = (stats.cache_oldest_ts, stats.cache_newest_ts) {
        println!("  oldest: {}", format_ts_relative(oldest));
        println!("  newest: {}", format_ts_relative(newest));
    }

    pool.close().await;
    Ok(())
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

/// Format a Unix timestamp as a relative time string (e.g. "3 hours ago").
fn format_ts_relative(ts: i64) -> String {
    let delta = chrono::Utc::now().timestamp() - ts;

    if delta < 0 {
        format_ts_iso(ts)
    } else if delta < 60 {
        "just now".to_string()
    } else if delta < 3600 {
        let mins = delta / 60;
        format!("{} min{} ago", mins, if mins == 1 { "" } else { "s" })
    } else if delta < 86400 {
        let hours = delta / 3600;
        format!("{} hour{} ago", hours, if hours == 1 { "" } else { "s" })
    } else if delta < 86400 * 30 {
        let days = delta / 86400;
        format!("{} day{} ago", days, if days == 1 { "" } else { "s" })
    } else {
        format_ts_iso(ts)
    }
}

fn format_ts_iso(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| ts.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::SummaryCache;
    use crate::models::Summary;
    use tempfile::TempDir;

    #[test]
    fn bytes_are_humanized() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.0 KB");
        assert_eq!(format_bytes(5 * 1024 * 1024), "5.0 MB");
    }

    #[test]
    fn recent_timestamps_are_relative() {
        let now = chrono::Utc::now().timestamp();
        assert_eq!(format_ts_relative(now), "just now");
        assert_eq!(format_ts_relative(now - 7200), "2 hours ago");
        assert_eq!(format_ts_relative(now - 86400), "1 day ago");
    }

    #[tokio::test]
    async fn empty_database_has_zero_counts() {
        let tmp = TempDir::new().unwrap();
        let pool = db::connect_path(&tmp.path().join("s.sqlite")).await.unwrap();
        let stats = collect(&pool).await.unwrap();
        assert_eq!(stats.cache_entries, 0);
        assert_eq!(stats.documents, 0);
        assert!(stats.by_kind.is_empty());
        assert!(stats.pinned.is_none());
        assert_eq!(stats.cache_oldest_ts, None);
    }

    #[tokio::test]
    async fn counts_cache_entries() {
        let tmp = TempDir::new().unwrap();
        let pool = db::connect_path(&tmp.path().join("s.sqlite")).await.unwrap();
        let cache = SummaryCache::with_pool(pool.clone()).await;
        let s = Summary {
            element_id: "e".into(),
            text: "t".into(),
            model_used: "m".into(),
        };
        cache.put("a", &s).await;
        cache.put("b", &s).await;

        let stats = collect(&pool).await.unwrap();
        assert_eq!(stats.cache_entries, 2);
        assert!(stats.cache_newest_ts.is_some());
    }
}
