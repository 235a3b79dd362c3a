//! Ingest orchestration.
//!
//! Runs one PDF through extraction → cache-gated summarization → indexing.
//! Every stage tolerates per-element failures; only an unreadable PDF, a
//! broken database, or an embedding model that contradicts the index stops
//! the run.

use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Arc;

use crate::cache::SummaryCache;
use crate::config::{Config, Credentials};
use crate::db;
use crate::embedding::{self, EmbeddingProvider};
use crate::extract::{ExtractionCounts, Extractor, PdfExtractor};
use crate::index::{IndexBuilder, IngestReport, VectorIndex};
use crate::llm::{GeminiClient, GroqClient};
use crate::models::SummarizedElement;
use crate::progress::{IngestProgressEvent, IngestProgressReporter, ProgressMode};
use crate::summarize::{Summarizer, SummarySource};

/// What one ingest run did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestSummary {
    pub source: String,
    pub extracted: ExtractionCounts,
    /// Elements skipped during extraction.
    pub skipped: usize,
    pub summaries_cached: u64,
    pub summaries_generated: u64,
    pub summaries_placeholder: u64,
    pub index: IngestReport,
}

pub struct Pipeline<'a> {
    extractor: &'a dyn Extractor,
    summarizer: &'a Summarizer,
    index: &'a VectorIndex,
    embedder: &'a dyn EmbeddingProvider,
    config: &'a Config,
}

impl<'a> Pipeline<'a> {
    pub fn new(
        extractor: &'a dyn Extractor,
        summarizer: &'a Summarizer,
        index: &'a VectorIndex,
        embedder: &'a dyn EmbeddingProvider,
        config: &'a Config,
    ) -> Self {
        Self {
            extractor,
            summarizer,
            index,
            embedder,
            config,
        }
    }

    pub async fn ingest(
        &self,
        path: &Path,
        progress: &dyn IngestProgressReporter,
    ) -> Result<IngestSummary> {
        let source = source_key(path);

        // Refuse early rather than after paying for summaries.
        if !self.index.is_empty().await? {
            self.index
                .check_model(self.embedder.model_name(), self.embedder.dims())
                .await?;
        }

        progress.report(IngestProgressEvent::Extracting {
            source: source.clone(),
        });
        let extraction = self.extractor.extract(path)?;

        let mut summary = IngestSummary {
            source: source.clone(),
            extracted: extraction.counts(),
            skipped: extraction.warnings.len(),
            ..IngestSummary::default()
        };

        let total = extraction.elements.len() as u64;
        let mut summarized = Vec::with_capacity(extraction.elements.len());

        for (i, element) in extraction.elements.iter().enumerate() {
            let outcome = self.summarizer.summarize(element).await;
            match outcome.source {
                SummarySource::Cache => summary.summaries_cached += 1,
                SummarySource::Model => summary.summaries_generated += 1,
                SummarySource::Placeholder => summary.summaries_placeholder += 1,
            }
            progress.report(IngestProgressEvent::Summarizing {
                n: i as u64 + 1,
                total,
                cached: summary.summaries_cached,
            });

            summarized.push(SummarizedElement {
                element_id: element.id.clone(),
                kind: element.kind,
                page: element.page,
                content_hash: element.content_hash.clone(),
                preview: element.preview(self.config.retrieval.context_preview_chars),
                summary: outcome.summary,
            });
        }

        progress.report(IngestProgressEvent::Indexing {
            total: summarized.len() as u64,
        });
        let builder =
            IndexBuilder::new(self.index, self.embedder, self.config.embedding.batch_size);
        summary.index = builder.ingest(&source, &summarized).await?;

        Ok(summary)
    }
}

/// Stable identity for a PDF in the index: its canonical path when resolvable.
pub fn source_key(path: &Path) -> String {
    std::fs::canonicalize(path)
        .unwrap_or_else(|_| path.to_path_buf())
        .display()
        .to_string()
}

/// Open the shared database as a summary cache plus vector index.
pub async fn open_stores(config: &Config) -> Result<(Arc<SummaryCache>, VectorIndex)> {
    let pool = db::connect(config).await?;
    let cache = Arc::new(SummaryCache::with_pool(pool.clone()).await);
    let index = VectorIndex::open(pool).await?;
    Ok((cache, index))
}

/// `mmrag ingest`: build the real clients and run the pipeline once.
pub async fn run_ingest(config: &Config, pdf: &Path, mode: ProgressMode) -> Result<IngestSummary> {
    if !pdf.exists() {
        anyhow::bail!("PDF file not found at {}", pdf.display());
    }

    let credentials = Credentials::from_env();
    let text_model = Arc::new(GroqClient::from_config(
        &config.summarization,
        &credentials,
        &config.summarization.text_model,
    )?);
    let vision_model = Arc::new(GeminiClient::from_config(&config.summarization, &credentials)?);
    let embedder = embedding::create_provider(&config.embedding)
        .context("embedding provider unavailable")?;

    let (cache, index) = open_stores(config).await?;
    let summarizer =
        Summarizer::new(cache.clone(), text_model, vision_model, &config.summarization);
    let extractor = PdfExtractor::new(config.extraction.clone());

    let summary = Pipeline::new(&extractor, &summarizer, &index, embedder.as_ref(), config)
        .ingest(pdf, mode.reporter().as_ref())
        .await?;

    print_summary(&summary);
    Ok(summary)
}

pub fn print_summary(s: &IngestSummary) {
    println!("ingest {}", s.source);
    println!(
        "  extracted: {} text, {} tables, {} images ({} skipped)",
        s.extracted.text, s.extracted.tables, s.extracted.images, s.skipped
    );
    println!(
        "  summaries: {} cached, {} generated, {} placeholders",
        s.summaries_cached, s.summaries_generated, s.summaries_placeholder
    );
    println!(
        "  index: {} upserted, {} unchanged, {} failed, {} pruned",
        s.index.upserted, s.index.unchanged, s.index.failed, s.index.pruned
    );
    println!("ok");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_key_falls_back_to_given_path() {
        assert_eq!(source_key(Path::new("no/such/file.pdf")), "no/such/file.pdf");
    }

    #[test]
    fn source_key_canonicalizes_existing_files() {
        let tmp = tempfile::TempDir::new().unwrap();
        let file = tmp.path().join("a.pdf");
        std::fs::write(&file, b"x").unwrap();
        let dotted = tmp.path().join(".").join("a.pdf");
        assert_eq!(source_key(&dotted), source_key(&file));
    }
}
