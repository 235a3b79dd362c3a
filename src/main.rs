//! # mmrag CLI
//!
//! Command-line interface for multimodal question answering over a PDF.
//!
//! ## Usage
//!
//! ```bash
//! mmrag init                           # create the database
//! mmrag ingest paper.pdf               # extract, summarize and index a PDF
//! mmrag ask "What is attention?"       # answer one question
//! mmrag ask "..." --kind table --json  # only tables, JSON output
//! mmrag chat [paper.pdf]               # interactive session
//! mmrag cache stats | cache clear      # inspect or empty the summary cache
//! mmrag index clear                    # drop every indexed document
//! mmrag stats                          # database overview
//! ```
//!
//! Every command accepts `--config <path>`; when the file is missing the
//! built-in defaults are used. API keys are read from `GROQ_API_KEY` and
//! `GEMINI_API_KEY` (a `.env` file in the working directory is honored).
//! Log verbosity follows `RUST_LOG` and defaults to `mmrag=info`.

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use multimodal_rag::config;
use multimodal_rag::db;
use multimodal_rag::index::VectorIndex;
use multimodal_rag::migrate;
use multimodal_rag::models::ElementKind;
use multimodal_rag::pipeline;
use multimodal_rag::progress::ProgressMode;
use multimodal_rag::query;
use multimodal_rag::repl;
use multimodal_rag::stats;

/// Multimodal RAG CLI: ask questions about a PDF's text, tables and images.
#[derive(Parser)]
#[command(
    name = "mmrag",
    about = "Multimodal RAG: question answering over a PDF's text, tables and images",
    version,
    long_about = "mmrag extracts text blocks, tables and images from a PDF, summarizes each \
    element with a text or vision model, indexes the summaries as embeddings in SQLite, and \
    answers questions from the most relevant summaries with page-level citations."
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./config/mmrag.toml`. Built-in defaults apply when the
    /// file does not exist.
    #[arg(long, global = true, default_value = "./config/mmrag.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite file with the summary cache and index tables.
    /// Safe to run repeatedly.
    Init,

    /// Ingest a PDF: extract, summarize and index its elements.
    ///
    /// Requires GROQ_API_KEY and GEMINI_API_KEY. Re-ingesting an unchanged
    /// PDF makes no model calls.
    Ingest {
        /// Path to the PDF.
        pdf: PathBuf,

        /// Progress output on stderr.
        #[arg(long, value_enum)]
        progress: Option<ProgressArg>,
    },

    /// Answer a single question from the indexed PDF.
    Ask {
        /// The question.
        question: String,

        /// Number of documents to retrieve (defaults to `retrieval.top_k`).
        #[arg(long)]
        k: Option<usize>,

        /// Only retrieve one element kind: `text`, `table` or `image`.
        #[arg(long)]
        kind: Option<ElementKind>,

        /// Print the result as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Interactive question loop, optionally ingesting a PDF first.
    ///
    /// Type `clear` to empty the summary cache, `quit` to leave.
    Chat {
        /// PDF to ingest before the session starts.
        pdf: Option<PathBuf>,
    },

    /// Inspect or empty the summary cache.
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },

    /// Manage the vector index.
    Index {
        #[command(subcommand)]
        action: IndexAction,
    },

    /// Show cache and index statistics.
    Stats,
}

#[derive(Subcommand)]
enum CacheAction {
    /// Delete every cached summary. The next ingest re-summarizes everything.
    Clear,
    /// Show cache size and age.
    Stats,
}

#[derive(Subcommand)]
enum IndexAction {
    /// Delete every indexed document and unpin the embedding model.
    ///
    /// Needed after changing `embedding.model`. Cached summaries are kept,
    /// so the next ingest only pays for embeddings.
    Clear,
}

#[derive(Clone, Copy, ValueEnum)]
enum ProgressArg {
    Off,
    Human,
    Json,
}

impl From<ProgressArg> for ProgressMode {
    fn from(arg: ProgressArg) -> Self {
        match arg {
            ProgressArg::Off => ProgressMode::Off,
            ProgressArg::Human => ProgressMode::Human,
            ProgressArg::Json => ProgressMode::Json,
        }
    }
}

fn progress_mode(arg: Option<ProgressArg>) -> ProgressMode {
    arg.map(ProgressMode::from)
        .unwrap_or_else(ProgressMode::default_for_tty)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("mmrag=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = config::load_or_default(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Ingest { pdf, progress } => {
            pipeline::run_ingest(&cfg, &pdf, progress_mode(progress)).await?;
        }
        Commands::Ask {
            question,
            k,
            kind,
            json,
        } => {
            query::run_ask(&cfg, &question, k, kind, json).await?;
        }
        Commands::Chat { pdf } => {
            repl::run_chat(&cfg, pdf.as_deref(), progress_mode(None)).await?;
        }
        Commands::Cache { action } => match action {
            CacheAction::Clear => {
                let (cache, _) = pipeline::open_stores(&cfg).await?;
                let removed = cache.clear().await?;
                if removed == 0 {
                    println!("No cache to clear.");
                } else {
                    println!("Cache cleared ({} entries).", removed);
                }
            }
            CacheAction::Stats => stats::run_cache_stats(&cfg).await?,
        },
        Commands::Index { action } => match action {
            IndexAction::Clear => {
                let pool = db::connect(&cfg).await?;
                let index = VectorIndex::open(pool.clone()).await?;
                let removed = index.clear().await?;
                println!("Index cleared ({} documents).", removed);
                pool.close().await;
            }
        },
        Commands::Stats => stats::run_stats(&cfg).await?,
    }

    Ok(())
}
