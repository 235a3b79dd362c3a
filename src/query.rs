//! Retrieval and cited answer generation.
//!
//! # Flow
//!
//! 1. Check the configured embedding model against the one pinned in the
//!    index, then embed the question with it.
//! 2. Retrieve the top-k documents ([`VectorIndex::query`]).
//! 3. Build a context of numbered sources, each tagged with its kind and page:
//!    `[Source 1] (Type: text, Page: 3)`.
//! 4. Ask the generation model to answer only from that context and to
//!    return JSON `{"answer": "...", "sources": [1, 3]}`.
//! 5. Parse the reply into a [`ParseOutcome`]. An unparseable reply gets one
//!    retry with a stricter instruction; after that the raw text is returned
//!    as the answer with no sources and `low` confidence. A reply the
//!    provider's JSON mode rejected counts as unparseable, with the rejected
//!    text standing in for the reply.
//!
//! # Confidence
//!
//! [`assess_confidence`] looks only at the documents the model cited. A
//! level is reached when enough of them clear that level's similarity
//! threshold ([`ConfidenceConfig`]). Citing an extra document, or a cited
//! document scoring higher, never lowers the result.

use anyhow::Result;
use serde::Deserialize;

use crate::config::{ConfidenceConfig, Config, Credentials, GenerationConfig, RetrievalConfig};
use crate::db;
use crate::embedding::{self, EmbeddingProvider};
use crate::index::{IndexError, VectorIndex};
use crate::llm::{CompletionRequest, GroqClient, ProviderError, TextModel};
use crate::models::{
    truncate_chars, Confidence, ElementKind, QueryResult, ScoredDocument, SourceRef,
};
use crate::retry::{self, RetryPolicy};

/// Answer returned when retrieval finds nothing.
pub const NO_INFORMATION: &str = "I couldn't find relevant information to answer this question.";

const SYSTEM_PROMPT: &str =
    "You are a helpful assistant that answers questions based on provided context. Always cite your sources.";

/// Questions shown before the interactive loop.
pub const EXAMPLE_QUERIES: &[&str] = &[
    "What is the Transformer architecture?",
    "Explain the attention mechanism",
    "What are the key components of the model?",
    "What results are shown in the tables?",
];

/// The model's reply, decoded.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedAnswer {
    pub answer: String,
    /// 1-based source numbers, in ascending order, without duplicates.
    pub cited: Vec<usize>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ParseOutcome {
    Parsed(ParsedAnswer),
    Unparseable(String),
}

#[derive(Deserialize)]
struct RawAnswer {
    answer: String,
    #[serde(default)]
    sources: Vec<serde_json::Value>,
}

/// Decode a generation reply. Citations outside `1..=source_count` are dropped.
///
/// Tolerates Markdown code fences and prose around the JSON object.
pub fn parse_answer(raw: &str, source_count: usize) -> ParseOutcome {
    let unparseable = || ParseOutcome::Unparseable(raw.trim().to_string());

    let (Some(start), Some(end)) = (raw.find('{'), raw.rfind('}')) else {
        return unparseable();
    };
    if end < start {
        return unparseable();
    }

    let parsed: RawAnswer = match serde_json::from_str(&raw[start..=end]) {
        Ok(p) => p,
        Err(_) => return unparseable(),
    };

    let answer = parsed.answer.trim();
    if answer.is_empty() {
        return unparseable();
    }

    let mut cited: Vec<usize> = parsed
        .sources
        .iter()
        .filter_map(source_number)
        .filter(|n| (1..=source_count).contains(n))
        .collect();
    cited.sort_unstable();
    cited.dedup();

    ParseOutcome::Parsed(ParsedAnswer {
        answer: answer.to_string(),
        cited,
    })
}

/// `2`, `"2"`, and `"Source 2"` all cite source 2.
fn source_number(value: &serde_json::Value) -> Option<usize> {
    match value {
        serde_json::Value::Number(n) => n.as_u64().map(|n| n as usize),
        serde_json::Value::String(s) => {
            let digits: String = s
                .chars()
                .skip_while(|c| !c.is_ascii_digit())
                .take_while(|c| c.is_ascii_digit())
                .collect();
            digits.parse().ok()
        }
        _ => None,
    }
}

/// Confidence from the cited documents' retrieval scores.
pub fn assess_confidence(cited: &[&ScoredDocument], config: &ConfidenceConfig) -> Confidence {
    let clearing = |min: f32| cited.iter().filter(|d| d.score >= min).count();

    if clearing(config.high_min_similarity) >= config.high_min_sources {
        Confidence::High
    } else if clearing(config.medium_min_similarity) >= config.medium_min_sources {
        Confidence::Medium
    } else {
        Confidence::Low
    }
}

/// Numbered context block handed to the generation model.
pub fn build_context(docs: &[ScoredDocument]) -> String {
    docs.iter()
        .enumerate()
        .map(|(i, d)| {
            format!(
                "[Source {}] (Type: {}, Page: {})\n{}\n",
                i + 1,
                d.metadata.kind,
                d.metadata.page,
                d.text
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn answer_request(
    question: &str,
    context: &str,
    strict: bool,
    config: &GenerationConfig,
) -> CompletionRequest {
    let mut prompt = format!(
        "You are a helpful AI assistant answering questions based on provided context from a document.\n\n\
         Context:\n{context}\n\n\
         Question: {question}\n\n\
         Instructions:\n\
         1. Answer the question based ONLY on the provided context\n\
         2. Be specific and cite which sources you're using (e.g., \"According to Source 1...\")\n\
         3. If the context doesn't contain enough information, say so\n\
         4. Keep your answer clear and concise\n\n\
         Respond with a JSON object of the form {{\"answer\": \"<your answer>\", \"sources\": [<numbers of the sources you used>]}}."
    );
    if strict {
        prompt.push_str(
            "\n\nYour previous reply could not be parsed. Reply with ONLY the JSON object: \
             no Markdown, no code fences, no text before or after it. \
             \"answer\" must be a non-empty string and \"sources\" an array of integers.",
        );
    }

    CompletionRequest {
        system: SYSTEM_PROMPT.to_string(),
        prompt,
        temperature: config.temperature,
        max_tokens: config.max_tokens,
        json_output: true,
    }
}

pub struct QueryEngine<'a> {
    index: &'a VectorIndex,
    embedder: &'a dyn EmbeddingProvider,
    generator: &'a dyn TextModel,
    retrieval: RetrievalConfig,
    generation: GenerationConfig,
    confidence: ConfidenceConfig,
    policy: RetryPolicy,
}

impl<'a> QueryEngine<'a> {
    pub fn new(
        index: &'a VectorIndex,
        embedder: &'a dyn EmbeddingProvider,
        generator: &'a dyn TextModel,
        config: &Config,
    ) -> Self {
        Self {
            index,
            embedder,
            generator,
            retrieval: config.retrieval.clone(),
            generation: config.generation.clone(),
            confidence: config.confidence.clone(),
            policy: RetryPolicy::from_config(&config.summarization),
        }
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn default_k(&self) -> usize {
        self.retrieval.top_k
    }

    /// Answer `question` from the top `k` documents.
    pub async fn answer(&self, question: &str, k: usize) -> Result<QueryResult> {
        self.answer_filtered(question, k, None).await
    }

    /// Answer `question`, retrieving only documents of `kind` when given.
    pub async fn answer_filtered(
        &self,
        question: &str,
        k: usize,
        kind: Option<ElementKind>,
    ) -> Result<QueryResult> {
        self.index
            .check_model(self.embedder.model_name(), self.embedder.dims())
            .await?;
        if self.index.is_empty().await? {
            return Err(IndexError::EmptyIndex.into());
        }

        let vector = embedding::embed_query(self.embedder, question).await?;
        let hits = self.index.query(&vector, k, kind).await?;
        tracing::debug!(question, retrieved = hits.len(), "retrieval complete");

        if hits.is_empty() {
            return Ok(QueryResult {
                answer: NO_INFORMATION.to_string(),
                sources: Vec::new(),
                confidence: Confidence::Low,
            });
        }

        let context = build_context(&hits);

        let first = match self.generate(question, &context, false).await {
            Ok(reply) => parse_answer(&reply, hits.len()),
            Err(ProviderError::InvalidJson { generation, .. }) => {
                parse_answer(&generation, hits.len())
            }
            Err(e) => {
                tracing::warn!(error = %e, "answer generation failed");
                return Ok(fallback(format!("Error generating response: {}", e)));
            }
        };

        let raw = match first {
            ParseOutcome::Parsed(parsed) => return Ok(self.build_result(parsed, &hits)),
            ParseOutcome::Unparseable(raw) => raw,
        };

        tracing::info!("answer was not valid JSON, retrying with stricter instructions");
        let second = match self.generate(question, &context, true).await {
            Ok(reply) => parse_answer(&reply, hits.len()),
            Err(ProviderError::InvalidJson { generation, .. }) => {
                parse_answer(&generation, hits.len())
            }
            Err(e) => {
                tracing::warn!(error = %e, "strict retry failed");
                return Ok(fallback(raw));
            }
        };

        match second {
            ParseOutcome::Parsed(parsed) => Ok(self.build_result(parsed, &hits)),
            ParseOutcome::Unparseable(raw2) => {
                Ok(fallback(if raw2.is_empty() { raw } else { raw2 }))
            }
        }
    }

    /// Answer several questions one after another.
    pub async fn answer_batch(&self, questions: &[String], k: usize) -> Result<Vec<QueryResult>> {
        let mut results = Vec::with_capacity(questions.len());
        for q in questions {
            results.push(self.answer(q, k).await?);
        }
        Ok(results)
    }

    async fn generate(
        &self,
        question: &str,
        context: &str,
        strict: bool,
    ) -> Result<String, ProviderError> {
        let request = &answer_request(question, context, strict, &self.generation);
        let generator = self.generator;
        retry::retry(&self.policy, "answer generation", |_| async move {
            generator.complete(request).await
        })
        .await
    }

    fn build_result(&self, parsed: ParsedAnswer, hits: &[ScoredDocument]) -> QueryResult {
        let cited: Vec<&ScoredDocument> = parsed.cited.iter().map(|n| &hits[n - 1]).collect();
        let sources = cited
            .iter()
            .map(|doc| SourceRef {
                kind: doc.metadata.kind,
                page: doc.metadata.page,
                preview: truncate_chars(&doc.metadata.preview, self.retrieval.preview_chars),
                element_id: doc.metadata.element_id.clone(),
            })
            .collect();

        QueryResult {
            confidence: assess_confidence(&cited, &self.confidence),
            answer: parsed.answer,
            sources,
        }
    }
}

fn fallback(answer: String) -> QueryResult {
    QueryResult {
        answer,
        sources: Vec::new(),
        confidence: Confidence::Low,
    }
}

/// Human-readable answer block.
pub fn render_result(result: &QueryResult) -> String {
    let rule = "=".repeat(80);
    let mut out = format!(
        "\n{rule}\nANSWER:\n{}\n\nCONFIDENCE: {}\n\nSOURCES ({}):\n",
        result.answer,
        result.confidence.as_str().to_uppercase(),
        result.sources.len()
    );
    for (i, s) in result.sources.iter().enumerate() {
        out.push_str(&format!(
            "\n  [{}] {} (Page {})\n      ID: {}\n      Preview: {}...\n",
            i + 1,
            s.kind.as_str().to_uppercase(),
            s.page,
            s.element_id,
            s.preview
        ));
    }
    out.push_str(&rule);
    out.push('\n');
    out
}

/// `mmrag ask`: answer one question against the existing index.
pub async fn run_ask(
    config: &Config,
    question: &str,
    k: Option<usize>,
    kind: Option<ElementKind>,
    json: bool,
) -> Result<QueryResult> {
    let credentials = Credentials::from_env();
    let generator = GroqClient::from_config(
        &config.summarization,
        &credentials,
        &config.generation.model,
    )?;
    let embedder = embedding::create_provider(&config.embedding)?;

    let pool = db::connect(config).await?;
    let index = VectorIndex::open(pool.clone()).await?;
    let engine = QueryEngine::new(&index, embedder.as_ref(), &generator, config);

    let k = k.unwrap_or_else(|| engine.default_k());
    let result = engine.answer_filtered(question, k, kind).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        print!("{}", render_result(&result));
    }

    pool.close().await;
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::index::IndexBuilder;
    use crate::models::{DocumentMetadata, Summary, SummarizedElement};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tempfile::TempDir;

    fn scored(score: f32) -> ScoredDocument {
        ScoredDocument {
            metadata: DocumentMetadata {
                kind: ElementKind::Text,
                page: 1,
                preview: "p".into(),
                element_id: "e".into(),
            },
            text: "t".into(),
            score,
        }
    }

    #[test]
    fn parses_plain_json() {
        let out = parse_answer(r#"{"answer": "Attention weights inputs.", "sources": [1]}"#, 2);
        assert_eq!(
            out,
            ParseOutcome::Parsed(ParsedAnswer {
                answer: "Attention weights inputs.".into(),
                cited: vec![1]
            })
        );
    }

    #[test]
    fn parses_fenced_json_with_string_citations() {
        let raw = "Here you go:\n```json\n{\"answer\": \"x\", \"sources\": [\"Source 3\", \"1\", 3]}\n```";
        match parse_answer(raw, 3) {
            ParseOutcome::Parsed(p) => assert_eq!(p.cited, vec![1, 3]),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn out_of_range_citations_are_dropped() {
        match parse_answer(r#"{"answer": "x", "sources": [0, 2, 9]}"#, 2) {
            ParseOutcome::Parsed(p) => assert_eq!(p.cited, vec![2]),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn malformed_replies_are_unparseable() {
        for raw in [
            "Attention is a mechanism.",
            "{\"answer\": ",
            r#"{"sources": [1]}"#,
            r#"{"answer": "   ", "sources": []}"#,
            "} backwards {",
        ] {
            assert!(
                matches!(parse_answer(raw, 3), ParseOutcome::Unparseable(_)),
                "{raw}"
            );
        }
    }

    fn confidence(scores: &[f32]) -> Confidence {
        let docs: Vec<ScoredDocument> = scores.iter().map(|&s| scored(s)).collect();
        let cited: Vec<&ScoredDocument> = docs.iter().collect();
        assess_confidence(&cited, &ConfidenceConfig::default())
    }

    #[test]
    fn confidence_levels() {
        assert_eq!(confidence(&[0.8, 0.6]), Confidence::High);
        assert_eq!(confidence(&[0.8]), Confidence::Medium);
        assert_eq!(confidence(&[0.8, 0.4]), Confidence::Medium);
        assert_eq!(confidence(&[0.35]), Confidence::Medium);
        assert_eq!(confidence(&[]), Confidence::Low);
        assert_eq!(confidence(&[0.1, 0.1, 0.1]), Confidence::Low);
    }

    #[test]
    fn citing_a_weak_extra_source_keeps_confidence() {
        assert_eq!(confidence(&[0.6, 0.6]), Confidence::High);
        assert_eq!(confidence(&[0.6, 0.6, 0.2]), Confidence::High);
        assert_eq!(confidence(&[0.35, 0.0, 0.0]), Confidence::Medium);
    }

    #[test]
    fn confidence_is_monotonic() {
        let scores = [0.0f32, 0.2, 0.3, 0.45, 0.5, 0.7, 1.0];
        let mut cited: Vec<f32> = Vec::new();
        for &extra in scores.iter().rev().chain(scores.iter()) {
            let before = confidence(&cited);
            cited.push(extra);
            assert!(confidence(&cited) >= before, "adding {extra} to {cited:?}");
        }
        for (i, &s) in scores.iter().enumerate() {
            if let Some(&better) = scores.get(i + 1) {
                assert!(confidence(&[0.6, better]) >= confidence(&[0.6, s]));
                assert!(confidence(&[better]) >= confidence(&[s]));
            }
        }
    }

    #[test]
    fn context_numbers_sources_with_kind_and_page() {
        let mut d = scored(0.9);
        d.metadata.page = 3;
        d.text = "Attention summary".into();
        let ctx = build_context(&[d.clone(), d]);
        assert!(ctx.starts_with("[Source 1] (Type: text, Page: 3)\nAttention summary\n"));
        assert!(ctx.contains("[Source 2] (Type: text, Page: 3)"));
    }

    #[test]
    fn render_lists_sources() {
        let r = QueryResult {
            answer: "A.".into(),
            sources: vec![SourceRef {
                kind: ElementKind::Table,
                page: 5,
                preview: "Model BLEU".into(),
                element_id: "table_p5_x".into(),
            }],
            confidence: Confidence::Medium,
        };
        let out = render_result(&r);
        assert!(out.contains("CONFIDENCE: MEDIUM"));
        assert!(out.contains("[1] TABLE (Page 5)"));
        assert!(out.contains("ID: table_p5_x"));
    }

    // ---- engine ----

    struct OneHot;

    #[async_trait]
    impl EmbeddingProvider for OneHot {
        fn model_name(&self) -> &str {
            "one-hot"
        }
        fn dims(&self) -> usize {
            2
        }
        async fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Ok(texts
                .iter()
                .map(|t| {
                    if t.to_lowercase().contains("attention") {
                        vec![1.0, 0.0]
                    } else {
                        vec![0.0, 1.0]
                    }
                })
                .collect())
        }
    }

    /// Replays canned outcomes in order, counting calls and noting which
    /// requests carried the stricter instruction.
    struct Scripted {
        replies: Mutex<Vec<Result<String, ProviderError>>>,
        strict: Mutex<Vec<bool>>,
        calls: AtomicUsize,
    }

    impl Scripted {
        fn new(replies: &[&str]) -> Self {
            Self::with_outcomes(replies.iter().map(|s| Ok(s.to_string())).collect())
        }

        fn with_outcomes(mut outcomes: Vec<Result<String, ProviderError>>) -> Self {
            outcomes.reverse();
            Self {
                replies: Mutex::new(outcomes),
                strict: Mutex::new(Vec::new()),
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl TextModel for Scripted {
        fn model_name(&self) -> &str {
            "scripted"
        }
        async fn complete(&self, request: &CompletionRequest) -> Result<String, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.strict
                .lock()
                .unwrap()
                .push(request.prompt.contains("could not be parsed"));
            self.replies
                .lock()
                .unwrap()
                .pop()
                .unwrap_or(Err(ProviderError::EmptyResponse { provider: "scripted" }))
        }
    }

    fn rejected(generation: &str) -> Result<String, ProviderError> {
        Err(ProviderError::InvalidJson {
            provider: "Groq",
            generation: generation.to_string(),
        })
    }

    async fn seeded_index(tmp: &TempDir) -> VectorIndex {
        let pool = db::connect_path(&tmp.path().join("q.sqlite")).await.unwrap();
        let index = VectorIndex::open(pool).await.unwrap();
        let docs = vec![SummarizedElement {
            element_id: "text_p3_abc".into(),
            kind: ElementKind::Text,
            page: 3,
            content_hash: "h".into(),
            preview: "Attention is a mechanism for weighting inputs".into(),
            summary: Summary {
                element_id: "text_p3_abc".into(),
                text: "Attention weights inputs by relevance.".into(),
                model_used: "m".into(),
            },
        }];
        IndexBuilder::new(&index, &OneHot, 8)
            .ingest("doc.pdf", &docs)
            .await
            .unwrap();
        index
    }

    fn engine<'a>(index: &'a VectorIndex, gen: &'a Scripted) -> QueryEngine<'a> {
        QueryEngine::new(index, &OneHot, gen, &Config::minimal())
            .with_policy(RetryPolicy::no_retry())
    }

    #[tokio::test]
    async fn cited_answer_carries_source_metadata() {
        let tmp = TempDir::new().unwrap();
        let index = seeded_index(&tmp).await;
        let gen = Scripted::new(&[r#"{"answer": "It weights inputs.", "sources": [1]}"#]);

        let r = engine(&index, &gen).answer("What is attention?", 5).await.unwrap();
        assert_eq!(r.answer, "It weights inputs.");
        assert_eq!(r.sources.len(), 1);
        assert_eq!(r.sources[0].page, 3);
        assert!(r.sources[0].preview.contains("weighting inputs"));
        assert_eq!(gen.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn malformed_twice_falls_back_to_raw_low() {
        let tmp = TempDir::new().unwrap();
        let index = seeded_index(&tmp).await;
        let gen = Scripted::new(&["Attention is great.", "Still not JSON."]);

        let r = engine(&index, &gen).answer("What is attention?", 5).await.unwrap();
        assert_eq!(r.answer, "Still not JSON.");
        assert!(r.sources.is_empty());
        assert_eq!(r.confidence, Confidence::Low);
        assert_eq!(gen.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn strict_retry_can_recover() {
        let tmp = TempDir::new().unwrap();
        let index = seeded_index(&tmp).await;
        let gen = Scripted::new(&["nope", r#"{"answer": "Recovered.", "sources": [1]}"#]);

        let r = engine(&index, &gen).answer("What is attention?", 5).await.unwrap();
        assert_eq!(r.answer, "Recovered.");
        assert_eq!(r.sources.len(), 1);
    }

    #[tokio::test]
    async fn json_mode_rejection_gets_the_strict_retry() {
        let tmp = TempDir::new().unwrap();
        let index = seeded_index(&tmp).await;
        let gen = Scripted::with_outcomes(vec![
            rejected("Attention weights inputs (Source 1)."),
            Ok(r#"{"answer": "It weights inputs.", "sources": [1]}"#.to_string()),
        ]);

        let r = engine(&index, &gen).answer("What is attention?", 5).await.unwrap();
        assert_eq!(r.answer, "It weights inputs.");
        assert_eq!(r.sources.len(), 1);
        assert_eq!(*gen.strict.lock().unwrap(), vec![false, true]);
    }

    #[tokio::test]
    async fn repeated_json_mode_rejection_returns_rejected_text() {
        let tmp = TempDir::new().unwrap();
        let index = seeded_index(&tmp).await;
        let gen = Scripted::with_outcomes(vec![
            rejected("first try"),
            rejected("  Attention weights inputs.\n"),
        ]);

        let r = engine(&index, &gen).answer("What is attention?", 5).await.unwrap();
        assert_eq!(r.answer, "Attention weights inputs.");
        assert!(r.sources.is_empty());
        assert_eq!(r.confidence, Confidence::Low);
        assert_eq!(gen.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn generation_failure_is_low_confidence_answer() {
        let tmp = TempDir::new().unwrap();
        let index = seeded_index(&tmp).await;
        let gen = Scripted::new(&[]);

        let r = engine(&index, &gen).answer("What is attention?", 5).await.unwrap();
        assert!(r.answer.starts_with("Error generating response"));
        assert_eq!(r.confidence, Confidence::Low);
    }

    #[tokio::test]
    async fn empty_retrieval_skips_generation() {
        let tmp = TempDir::new().unwrap();
        let index = seeded_index(&tmp).await;
        let gen = Scripted::new(&[]);

        let r = engine(&index, &gen)
            .answer_filtered("What is attention?", 5, Some(ElementKind::Image))
            .await
            .unwrap();
        assert_eq!(r.answer, NO_INFORMATION);
        assert_eq!(r.confidence, Confidence::Low);
        assert_eq!(gen.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn empty_index_is_an_error() {
        let tmp = TempDir::new().unwrap();
        let pool = db::connect_path(&tmp.path().join("e.sqlite")).await.unwrap();
        let index = VectorIndex::open(pool).await.unwrap();
        let gen = Scripted::new(&[]);

        let err = engine(&index, &gen).answer("anything", 5).await.unwrap_err();
        assert_eq!(err.downcast_ref::<IndexError>(), Some(&IndexError::EmptyIndex));
    }

    /// Same model name as [`OneHot`] but a different vector width.
    struct Resized(usize);

    #[async_trait]
    impl EmbeddingProvider for Resized {
        fn model_name(&self) -> &str {
            "one-hot"
        }
        fn dims(&self) -> usize {
            self.0
        }
        async fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Ok(texts.iter().map(|_| vec![1.0; self.0]).collect())
        }
    }

    #[tokio::test]
    async fn resized_embeddings_are_refused_before_retrieval() {
        let tmp = TempDir::new().unwrap();
        let index = seeded_index(&tmp).await;
        let gen = Scripted::new(&[]);
        let embedder = Resized(3);

        let err = QueryEngine::new(&index, &embedder, &gen, &Config::minimal())
            .answer("What is attention?", 5)
            .await
            .unwrap_err();
        assert_eq!(
            err.downcast_ref::<IndexError>(),
            Some(&IndexError::EmbeddingDimsMismatch {
                model: "one-hot".into(),
                indexed: 2,
                configured: 3
            })
        );
        assert_eq!(gen.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn batch_answers_in_order() {
        let tmp = TempDir::new().unwrap();
        let index = seeded_index(&tmp).await;
        let gen = Scripted::new(&[
            r#"{"answer": "first", "sources": [1]}"#,
            r#"{"answer": "second", "sources": []}"#,
        ]);
        let qs = vec!["What is attention?".to_string(), "And then?".to_string()];

        let rs = engine(&index, &gen).answer_batch(&qs, 5).await.unwrap();
        assert_eq!(rs[0].answer, "first");
        assert_eq!(rs[1].answer, "second");
        assert_eq!(rs[1].confidence, Confidence::Low);
    }
}
