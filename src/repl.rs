//! Interactive question loop.
//!
//! Reads one line at a time. Besides free-text questions it understands two
//! control words: `clear` empties the summary cache, and `quit`, `exit` or
//! `q` end the session. End of input also ends the session.

use anyhow::Result;
use std::io::{BufRead, Write};
use std::path::Path;

use crate::cache::SummaryCache;
use crate::config::{Config, Credentials};
use crate::embedding;
use crate::llm::GroqClient;
use crate::pipeline;
use crate::progress::ProgressMode;
use crate::query::{render_result, QueryEngine, EXAMPLE_QUERIES};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplCommand {
    Empty,
    Quit,
    ClearCache,
    Ask(String),
}

impl ReplCommand {
    pub fn parse(line: &str) -> Self {
        let line = line.trim();
        if line.is_empty() {
            return ReplCommand::Empty;
        }
        match line.to_lowercase().as_str() {
            "quit" | "exit" | "q" => ReplCommand::Quit,
            "clear" => ReplCommand::ClearCache,
            _ => ReplCommand::Ask(line.to_string()),
        }
    }
}

/// Print the banner and example questions.
pub fn print_intro<W: Write>(out: &mut W) -> Result<()> {
    writeln!(out, "Example queries:")?;
    for (i, q) in EXAMPLE_QUERIES.iter().enumerate() {
        writeln!(out, "  {}. {}", i + 1, q)?;
    }
    writeln!(out)?;
    writeln!(out, "{}", "=".repeat(80))?;
    writeln!(out, "INTERACTIVE MODE")?;
    writeln!(out, "{}", "=".repeat(80))?;
    writeln!(
        out,
        "Type your question, 'clear' to clear cache, or 'quit' to exit\n"
    )?;
    Ok(())
}

/// Run the loop until quit or end of input. Returns the number of questions answered.
pub async fn run<R: BufRead, W: Write>(
    engine: &QueryEngine<'_>,
    cache: &SummaryCache,
    k: usize,
    mut input: R,
    out: &mut W,
) -> Result<usize> {
    print_intro(out)?;
    let mut answered = 0;
    let mut line = String::new();

    loop {
        write!(out, "Your question: ")?;
        out.flush()?;

        line.clear();
        if input.read_line(&mut line)? == 0 {
            writeln!(out, "\nGoodbye!")?;
            break;
        }

        match ReplCommand::parse(&line) {
            ReplCommand::Empty => continue,
            ReplCommand::Quit => {
                writeln!(out, "Goodbye!")?;
                break;
            }
            ReplCommand::ClearCache => match cache.clear().await {
                Ok(0) => writeln!(out, "No cache to clear.\n")?,
                Ok(n) => writeln!(
                    out,
                    "Cache cleared ({} entries). Ingest the PDF again to re-process it.\n",
                    n
                )?,
                Err(e) => writeln!(out, "Error: could not clear cache: {}\n", e)?,
            },
            ReplCommand::Ask(question) => match engine.answer(&question, k).await {
                Ok(result) => {
                    answered += 1;
                    write!(out, "{}", render_result(&result))?;
                }
                Err(e) => writeln!(out, "\nError: {:#}\n", e)?,
            },
        }
    }

    Ok(answered)
}

/// `mmrag chat`: optionally ingest a PDF, then answer questions from stdin.
pub async fn run_chat(config: &Config, pdf: Option<&Path>, progress: ProgressMode) -> Result<()> {
    if let Some(pdf) = pdf {
        pipeline::run_ingest(config, pdf, progress).await?;
        println!();
    }

    let credentials = Credentials::from_env();
    let generator = GroqClient::from_config(
        &config.summarization,
        &credentials,
        &config.generation.model,
    )?;
    let embedder = embedding::create_provider(&config.embedding)?;
    let (cache, index) = pipeline::open_stores(config).await?;

    let engine = QueryEngine::new(&index, embedder.as_ref(), &generator, config);
    let stdin = std::io::stdin();
    let mut stdout = std::io::stdout();
    let answered = run(&engine, &cache, engine.default_k(), stdin.lock(), &mut stdout).await?;
    tracing::debug!(answered, "chat session ended");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::embedding::EmbeddingProvider;
    use crate::index::{IndexBuilder, VectorIndex};
    use crate::llm::{CompletionRequest, ProviderError, TextModel};
    use crate::models::{ElementKind, Summary, SummarizedElement};
    use crate::retry::RetryPolicy;
    use async_trait::async_trait;
    use std::io::Cursor;
    use tempfile::TempDir;

    #[test]
    fn control_words() {
        assert_eq!(ReplCommand::parse("  "), ReplCommand::Empty);
        assert_eq!(ReplCommand::parse("quit\n"), ReplCommand::Quit);
        assert_eq!(ReplCommand::parse("EXIT"), ReplCommand::Quit);
        assert_eq!(ReplCommand::parse("q"), ReplCommand::Quit);
        assert_eq!(ReplCommand::parse("Clear"), ReplCommand::ClearCache);
        assert_eq!(
            ReplCommand::parse(" What is attention? "),
            ReplCommand::Ask("What is attention?".into())
        );
        assert_eq!(
            ReplCommand::parse("clear the table"),
            ReplCommand::Ask("clear the table".into())
        );
    }

    struct Flat;

    #[async_trait]
    impl EmbeddingProvider for Flat {
        fn model_name(&self) -> &str {
            "flat"
        }
        fn dims(&self) -> usize {
            1
        }
        async fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Ok(texts.iter().map(|_| vec![1.0]).collect())
        }
    }

    struct CitesFirst;

    #[async_trait]
    impl TextModel for CitesFirst {
        fn model_name(&self) -> &str {
            "cites-first"
        }
        async fn complete(&self, _: &CompletionRequest) -> Result<String, ProviderError> {
            Ok(r#"{"answer": "Attention weights inputs.", "sources": [1]}"#.to_string())
        }
    }

    #[tokio::test]
    async fn session_answers_clears_and_quits() {
        let tmp = TempDir::new().unwrap();
        let pool = db::connect_path(&tmp.path().join("r.sqlite")).await.unwrap();
        let cache = SummaryCache::with_pool(pool.clone()).await;
        let index = VectorIndex::open(pool).await.unwrap();

        let summary = Summary {
            element_id: "text_p3_x".into(),
            text: "Attention summary.".into(),
            model_used: "m".into(),
        };
        cache.put("h", &summary).await;
        IndexBuilder::new(&index, &Flat, 4)
            .ingest(
                "doc.pdf",
                &[SummarizedElement {
                    element_id: "text_p3_x".into(),
                    kind: ElementKind::Text,
                    page: 3,
                    content_hash: "h".into(),
                    preview: "Attention is a mechanism".into(),
                    summary,
                }],
            )
            .await
            .unwrap();

        let engine = QueryEngine::new(&index, &Flat, &CitesFirst, &Config::minimal())
            .with_policy(RetryPolicy::no_retry());
        let input = Cursor::new("\nWhat is attention?\nclear\nclear\nquit\nnever asked\n");
        let mut out = Vec::new();

        let answered = run(&engine, &cache, 5, input, &mut out).await.unwrap();
        let out = String::from_utf8(out).unwrap();

        assert_eq!(answered, 1);
        assert!(out.contains("Example queries:"));
        assert!(out.contains("Attention weights inputs."));
        assert!(out.contains("(Page 3)"));
        assert!(out.contains("Cache cleared (1 entries)"));
        assert!(out.contains("No cache to clear."));
        assert!(out.contains("Goodbye!"));
        assert!(cache.is_empty().await);
    }

    #[tokio::test]
    async fn end_of_input_ends_session() {
        let tmp = TempDir::new().unwrap();
        let pool = db::connect_path(&tmp.path().join("r.sqlite")).await.unwrap();
        let cache = SummaryCache::with_pool(pool.clone()).await;
        let index = VectorIndex::open(pool).await.unwrap();
        let engine = QueryEngine::new(&index, &Flat, &CitesFirst, &Config::minimal());

        let mut out = Vec::new();
        let answered = run(&engine, &cache, 5, Cursor::new(""), &mut out)
            .await
            .unwrap();
        assert_eq!(answered, 0);
    }
}
