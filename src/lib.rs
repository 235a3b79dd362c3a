//! # Multimodal RAG
//!
//! Question answering over a single PDF, including its tables and images.
//!
//! Every page is split into text blocks, tables and embedded images. Each
//! element is summarized (text and tables by a chat model, images by a vision
//! model), the summaries are embedded into a local vector index, and questions
//! are answered by a chat model from the top retrieved summaries with
//! citations back to the originating page and element.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌────────────┐   ┌───────────┐   ┌──────────────┐
//! │   PDF    │──▶│  Extract   │──▶│ Summarize │──▶│ Vector index │
//! │          │   │ text/table │   │  (cached) │   │   (SQLite)   │
//! └──────────┘   │   /image   │   └───────────┘   └──────┬───────┘
//!                └────────────┘                          │
//!                                                        ▼
//!                                   ┌──────────┐   ┌───────────┐
//!                                   │ CLI/REPL │◀──│   Query   │
//!                                   │ (mmrag)  │   │ + answer  │
//!                                   └──────────┘   └───────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! export GROQ_API_KEY=... GEMINI_API_KEY=...
//! mmrag init
//! mmrag ingest paper.pdf
//! mmrag ask "What is attention?"
//! mmrag chat
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration and API credentials |
//! | [`models`] | Core data types |
//! | [`extract`] | PDF element extraction |
//! | [`llm`] | Text and vision model clients |
//! | [`summarize`] | Cache-gated element summarization |
//! | [`cache`] | Content-addressed summary cache |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`index`] | Vector index and incremental builder |
//! | [`query`] | Retrieval and cited answer generation |
//! | [`pipeline`] | Ingest orchestration |
//! | [`repl`] | Interactive question loop |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod cache;
pub mod config;
pub mod db;
pub mod embedding;
pub mod extract;
pub mod index;
pub mod llm;
pub mod migrate;
pub mod models;
pub mod pipeline;
pub mod progress;
pub mod query;
pub mod repl;
pub mod retry;
pub mod stats;
pub mod summarize;
