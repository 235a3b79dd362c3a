//! Persistent vector index over element summaries.
//!
//! [`VectorIndex`] stores one row per element in SQLite: the summary text,
//! its embedding as a little-endian `f32` BLOB, and the metadata needed to
//! cite it (kind, page, preview). Retrieval is an exact scan scoring every
//! stored vector by cosine similarity in Rust, so rankings are
//! deterministic: score descending, ties broken by element id.
//!
//! The embedding model that produced the vectors is pinned in `index_meta`.
//! Vectors from different models are not comparable, so writing with, or
//! querying through, any other model is refused with
//! [`IndexError::EmbeddingModelMismatch`].
//!
//! [`IndexBuilder`] turns summaries into indexed documents, skipping the
//! embedding call for elements already indexed with identical content,
//! summary, and model.

use anyhow::Result;
use sqlx::{Row, SqlitePool};
use std::collections::HashSet;
use thiserror::Error;

use crate::embedding::{self, EmbeddingProvider};
use crate::migrate;
use crate::models::{
    DocumentMetadata, ElementKind, IndexedDocument, ScoredDocument, SummarizedElement,
};

const META_MODEL: &str = "embedding_model";
const META_DIMS: &str = "embedding_dims";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum IndexError {
    #[error(
        "index was built with embedding model '{indexed}' but '{configured}' is configured; \
         switch back or run `mmrag index clear` and re-ingest"
    )]
    EmbeddingModelMismatch { indexed: String, configured: String },

    #[error(
        "index was built with {indexed}-dimensional '{model}' embeddings but {configured} \
         dimensions are configured; fix `embedding.dims` or run `mmrag index clear` and re-ingest"
    )]
    EmbeddingDimsMismatch {
        model: String,
        indexed: usize,
        configured: usize,
    },

    #[error("the index is empty; ingest a PDF first")]
    EmptyIndex,
}

/// Model identity recorded with the index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PinnedModel {
    pub model: String,
    pub dims: usize,
}

pub struct VectorIndex {
    pool: SqlitePool,
}

impl VectorIndex {
    /// Wrap `pool`, creating the index tables if needed.
    pub async fn open(pool: SqlitePool) -> Result<Self> {
        migrate::apply_index_schema(&pool).await?;
        Ok(Self { pool })
    }

    pub async fn pinned_model(&self) -> Result<Option<PinnedModel>> {
        let model = self.meta(META_MODEL).await?;
        let dims = self.meta(META_DIMS).await?;
        Ok(match (model, dims) {
            (Some(model), Some(dims)) => Some(PinnedModel {
                model,
                dims: dims.parse().unwrap_or(0),
            }),
            _ => None,
        })
    }

    /// Fail unless `model` and `dims` match what the index was built with.
    /// An unpinned index accepts anything.
    pub async fn check_model(&self, model: &str, dims: usize) -> Result<()> {
        let Some(pinned) = self.pinned_model().await? else {
            return Ok(());
        };
        if pinned.model != model {
            return Err(IndexError::EmbeddingModelMismatch {
                indexed: pinned.model,
                configured: model.to_string(),
            }
            .into());
        }
        // 0 means the dimension was never recorded.
        if pinned.dims != 0 && pinned.dims != dims {
            return Err(IndexError::EmbeddingDimsMismatch {
                model: pinned.model,
                indexed: pinned.dims,
                configured: dims,
            }
            .into());
        }
        Ok(())
    }

    /// Pin `model` for writing. An empty index is re-pinned freely.
    pub async fn pin_model(&self, model: &str, dims: usize) -> Result<()> {
        if self.len().await? > 0 {
            self.check_model(model, dims).await?;
        }
        self.set_meta(META_MODEL, model).await?;
        self.set_meta(META_DIMS, &dims.to_string()).await?;
        Ok(())
    }

    async fn meta(&self, key: &str) -> Result<Option<String>> {
        Ok(
            sqlx::query_scalar("SELECT value FROM index_meta WHERE key = ?")
                .bind(key)
                .fetch_optional(&self.pool)
                .await?,
        )
    }

    async fn set_meta(&self, key: &str, value: &str) -> Result<()> {
        sqlx::query(
            "INSERT INTO index_meta (key, value) VALUES (?, ?) \
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Insert or replace the document for `doc.metadata.element_id`.
    pub async fn upsert(
        &self,
        source: &str,
        doc: &IndexedDocument,
        content_hash: &str,
        model: &str,
    ) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        sqlx::query(
            r#"
            INSERT INTO documents (element_id, source, kind, page, preview, text, content_hash, model, dims, embedding, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(element_id) DO UPDATE SET
                source = excluded.source,
                kind = excluded.kind,
                page = excluded.page,
                preview = excluded.preview,
                text = excluded.text,
                content_hash = excluded.content_hash,
                model = excluded.model,
                dims = excluded.dims,
                embedding = excluded.embedding,
                created_at = excluded.created_at
            "#,
        )
        .bind(&doc.metadata.element_id)
        .bind(source)
        .bind(doc.metadata.kind.as_str())
        .bind(doc.metadata.page as i64)
        .bind(&doc.metadata.preview)
        .bind(&doc.text)
        .bind(content_hash)
        .bind(model)
        .bind(doc.vector.len() as i64)
        .bind(embedding::vec_to_blob(&doc.vector))
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// True when `element` is stored from `source` with the same content,
    /// summary text, and model.
    async fn is_current(
        &self,
        source: &str,
        element: &SummarizedElement,
        model: &str,
    ) -> Result<bool> {
        let row = sqlx::query(
            "SELECT source, content_hash, text, model FROM documents WHERE element_id = ?",
        )
        .bind(&element.element_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.is_some_and(|row| {
            row.get::<String, _>("source") == source
                && row.get::<String, _>("content_hash") == element.content_hash
                && row.get::<String, _>("text") == element.summary.text
                && row.get::<String, _>("model") == model
        }))
    }

    /// Delete documents from `source` whose ids are not in `keep`.
    pub async fn prune_source(&self, source: &str, keep: &HashSet<String>) -> Result<u64> {
        let ids: Vec<String> =
            sqlx::query_scalar("SELECT element_id FROM documents WHERE source = ?")
                .bind(source)
                .fetch_all(&self.pool)
                .await?;

        let mut removed = 0;
        for id in ids.iter().filter(|id| !keep.contains(*id)) {
            removed += sqlx::query("DELETE FROM documents WHERE element_id = ?")
                .bind(id)
                .execute(&self.pool)
                .await?
                .rows_affected();
        }
        Ok(removed)
    }

    pub async fn get(&self, element_id: &str) -> Result<Option<IndexedDocument>> {
        let row = sqlx::query(
            "SELECT element_id, kind, page, preview, text, embedding FROM documents WHERE element_id = ?",
        )
        .bind(element_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| -> Result<IndexedDocument> {
            let blob: Vec<u8> = row.get("embedding");
            Ok(IndexedDocument {
                vector: embedding::blob_to_vec(&blob),
                metadata: row_metadata(&row)?,
                text: row.get("text"),
            })
        })
        .transpose()
    }

    /// The `k` documents most similar to `vector`, optionally of one kind.
    pub async fn query(
        &self,
        vector: &[f32],
        k: usize,
        kind: Option<ElementKind>,
    ) -> Result<Vec<ScoredDocument>> {
        let rows = match kind {
            Some(kind) => {
                sqlx::query(
                    "SELECT element_id, kind, page, preview, text, dims, embedding FROM documents WHERE kind = ?",
                )
                .bind(kind.as_str())
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(
                    "SELECT element_id, kind, page, preview, text, dims, embedding FROM documents",
                )
                .fetch_all(&self.pool)
                .await?
            }
        };

        let mut scored = Vec::with_capacity(rows.len());
        for row in &rows {
            let dims: i64 = row.get("dims");
            if dims as usize != vector.len() {
                continue;
            }
            let blob: Vec<u8> = row.get("embedding");
            let score = embedding::cosine_similarity(vector, &embedding::blob_to_vec(&blob));
            scored.push(ScoredDocument {
                metadata: row_metadata(row)?,
                text: row.get("text"),
                score,
            });
        }

        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.metadata.element_id.cmp(&b.metadata.element_id))
        });
        scored.truncate(k);
        Ok(scored)
    }

    pub async fn len(&self) -> Result<u64> {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM documents")
            .fetch_one(&self.pool)
            .await?;
        Ok(n as u64)
    }

    pub async fn is_empty(&self) -> Result<bool> {
        Ok(self.len().await? == 0)
    }

    /// Document counts per kind, in kind order.
    pub async fn counts_by_kind(&self) -> Result<Vec<(String, i64)>> {
        let rows =
            sqlx::query("SELECT kind, COUNT(*) AS n FROM documents GROUP BY kind ORDER BY kind")
                .fetch_all(&self.pool)
                .await?;
        Ok(rows
            .iter()
            .map(|r| (r.get::<String, _>("kind"), r.get::<i64, _>("n")))
            .collect())
    }

    /// Remove every document and the model pin.
    pub async fn clear(&self) -> Result<u64> {
        let removed = sqlx::query("DELETE FROM documents")
            .execute(&self.pool)
            .await?
            .rows_affected();
        sqlx::query("DELETE FROM index_meta")
            .execute(&self.pool)
            .await?;
        Ok(removed)
    }
}

fn row_metadata(row: &sqlx::sqlite::SqliteRow) -> Result<DocumentMetadata> {
    let kind: String = row.get("kind");
    let page: i64 = row.get("page");
    Ok(DocumentMetadata {
        kind: kind.parse().map_err(anyhow::Error::msg)?,
        page: page as u32,
        preview: row.get("preview"),
        element_id: row.get("element_id"),
    })
}

/// Outcome of one [`IndexBuilder::ingest`] call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestReport {
    /// Documents embedded and written.
    pub upserted: u64,
    /// Documents already current, left untouched.
    pub unchanged: u64,
    /// Elements dropped because no vector could be produced or stored.
    pub failed: u64,
    /// Stale documents from the same source removed.
    pub pruned: u64,
}

pub struct IndexBuilder<'a> {
    index: &'a VectorIndex,
    embedder: &'a dyn EmbeddingProvider,
    batch_size: usize,
}

impl<'a> IndexBuilder<'a> {
    pub fn new(
        index: &'a VectorIndex,
        embedder: &'a dyn EmbeddingProvider,
        batch_size: usize,
    ) -> Self {
        Self {
            index,
            embedder,
            batch_size: batch_size.max(1),
        }
    }

    /// Embed and upsert `elements` as the full contents of `source`.
    ///
    /// Documents previously indexed from `source` that are not in
    /// `elements` are removed. Embedding failures drop the affected element
    /// with a warning and never abort the run.
    pub async fn ingest(
        &self,
        source: &str,
        elements: &[SummarizedElement],
    ) -> Result<IngestReport> {
        let model = self.embedder.model_name().to_string();
        self.index.pin_model(&model, self.embedder.dims()).await?;

        let mut report = IngestReport::default();

        for batch in elements.chunks(self.batch_size) {
            let mut pending = Vec::new();
            for element in batch {
                if self.index.is_current(source, element, &model).await? {
                    report.unchanged += 1;
                } else {
                    pending.push(element);
                }
            }
            if pending.is_empty() {
                continue;
            }

            for (element, vector) in self.embed_pending(&pending).await {
                let Some(vector) = vector else {
                    report.failed += 1;
                    continue;
                };
                let doc = IndexedDocument {
                    vector,
                    metadata: DocumentMetadata {
                        kind: element.kind,
                        page: element.page,
                        preview: element.preview.clone(),
                        element_id: element.element_id.clone(),
                    },
                    text: element.summary.text.clone(),
                };
                match self.index.upsert(source, &doc, &element.content_hash, &model).await {
                    Ok(()) => report.upserted += 1,
                    Err(e) => {
                        tracing::warn!(element = %element.element_id, error = %e, "failed to store document");
                        report.failed += 1;
                    }
                }
            }
        }

        let keep: HashSet<String> = elements.iter().map(|e| e.element_id.clone()).collect();
        report.pruned = self.index.prune_source(source, &keep).await?;

        tracing::info!(
            source,
            upserted = report.upserted,
            unchanged = report.unchanged,
            failed = report.failed,
            pruned = report.pruned,
            "index updated"
        );
        Ok(report)
    }

    /// Embed a batch; on batch failure retry element by element so one bad
    /// input only loses itself.
    async fn embed_pending<'e>(
        &self,
        pending: &[&'e SummarizedElement],
    ) -> Vec<(&'e SummarizedElement, Option<Vec<f32>>)> {
        let texts: Vec<String> = pending.iter().map(|e| e.summary.text.clone()).collect();

        match self.embed_checked(&texts).await {
            Ok(vectors) => {
                return pending
                    .iter()
                    .copied()
                    .zip(vectors.into_iter().map(Some))
                    .collect();
            }
            Err(e) if pending.len() > 1 => {
                tracing::warn!(error = %e, size = pending.len(), "embedding batch failed, retrying individually");
            }
            Err(_) => {}
        }

        let mut out = Vec::with_capacity(pending.len());
        for element in pending {
            let vector = match self.embed_checked(&[element.summary.text.clone()]).await {
                Ok(mut v) => v.pop(),
                Err(e) => {
                    tracing::warn!(element = %element.element_id, error = %e, "embedding failed, element dropped from index");
                    None
                }
            };
            out.push((*element, vector));
        }
        out
    }

    async fn embed_checked(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let vectors = self.embedder.embed_texts(texts).await?;
        if vectors.len() != texts.len() {
            anyhow::bail!(
                "embedding provider returned {} vectors for {} inputs",
                vectors.len(),
                texts.len()
            );
        }
        for v in &vectors {
            embedding::check_dims(self.embedder, v)?;
        }
        Ok(vectors)
    }
}
