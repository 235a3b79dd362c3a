//! TOML configuration and API credentials.
//!
//! All settings have defaults, so an empty file (or [`Config::minimal`]) is a
//! working configuration. Credentials never live in the file: they come from
//! the environment, optionally seeded from a `.env` file.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub db: DbConfig,
    #[serde(default)]
    pub extraction: ExtractionConfig,
    #[serde(default)]
    pub summarization: SummarizationConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub confidence: ConfidenceConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("./data/mmrag.sqlite")
}

#[derive(Debug, Deserialize, Clone)]
pub struct ExtractionConfig {
    #[serde(default = "default_min_text_chars")]
    pub min_text_chars: usize,
    #[serde(default = "default_min_table_chars")]
    pub min_table_chars: usize,
    #[serde(default = "default_min_image_px")]
    pub min_image_px: u32,
    /// Where extracted images are written. `None` keeps them in memory only.
    #[serde(default = "default_image_dir")]
    pub image_dir: Option<PathBuf>,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            min_text_chars: default_min_text_chars(),
            min_table_chars: default_min_table_chars(),
            min_image_px: default_min_image_px(),
            image_dir: default_image_dir(),
        }
    }
}

fn default_min_text_chars() -> usize {
    20
}
fn default_min_table_chars() -> usize {
    20
}
fn default_min_image_px() -> u32 {
    50
}
fn default_image_dir() -> Option<PathBuf> {
    Some(PathBuf::from("./data/extracted_images"))
}

#[derive(Debug, Deserialize, Clone)]
pub struct SummarizationConfig {
    #[serde(default = "default_text_model")]
    pub text_model: String,
    #[serde(default = "default_vision_model")]
    pub vision_model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_text_max_tokens")]
    pub text_max_tokens: u32,
    #[serde(default = "default_table_max_tokens")]
    pub table_max_tokens: u32,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
    #[serde(default = "default_llm_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub groq_base_url: Option<String>,
    #[serde(default)]
    pub gemini_base_url: Option<String>,
}

impl Default for SummarizationConfig {
    fn default() -> Self {
        Self {
            text_model: default_text_model(),
            vision_model: default_vision_model(),
            temperature: default_temperature(),
            text_max_tokens: default_text_max_tokens(),
            table_max_tokens: default_table_max_tokens(),
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            timeout_secs: default_llm_timeout_secs(),
            groq_base_url: None,
            gemini_base_url: None,
        }
    }
}

fn default_text_model() -> String {
    "llama-3.1-8b-instant".to_string()
}
fn default_vision_model() -> String {
    "gemini-2.5-flash".to_string()
}
fn default_temperature() -> f32 {
    0.3
}
fn default_text_max_tokens() -> u32 {
    200
}
fn default_table_max_tokens() -> u32 {
    250
}
fn default_max_attempts() -> u32 {
    3
}
fn default_initial_backoff_ms() -> u64 {
    1000
}
fn default_max_backoff_ms() -> u64 {
    16_000
}
fn default_llm_timeout_secs() -> u64 {
    60
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Base URL for the ollama provider.
    #[serde(default)]
    pub url: Option<String>,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            dims: None,
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
            url: None,
        }
    }
}

fn default_provider() -> String {
    "local".to_string()
}
fn default_batch_size() -> usize {
    32
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    /// Characters of original content kept as the source preview.
    #[serde(default = "default_preview_chars")]
    pub preview_chars: usize,
    /// Characters of original content stored alongside each indexed summary.
    #[serde(default = "default_context_preview_chars")]
    pub context_preview_chars: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            preview_chars: default_preview_chars(),
            context_preview_chars: default_context_preview_chars(),
        }
    }
}

fn default_top_k() -> usize {
    5
}
fn default_preview_chars() -> usize {
    150
}
fn default_context_preview_chars() -> usize {
    500
}

#[derive(Debug, Deserialize, Clone)]
pub struct GenerationConfig {
    #[serde(default = "default_text_model")]
    pub model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_generation_max_tokens")]
    pub max_tokens: u32,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            model: default_text_model(),
            temperature: default_temperature(),
            max_tokens: default_generation_max_tokens(),
        }
    }
}

fn default_generation_max_tokens() -> u32 {
    500
}

/// Thresholds for the answer confidence heuristic.
///
/// A level is reached when at least `*_min_sources` of the documents the
/// answer cites score `*_min_similarity` or better at retrieval.
#[derive(Debug, Deserialize, Clone)]
pub struct ConfidenceConfig {
    #[serde(default = "default_high_min_sources")]
    pub high_min_sources: usize,
    #[serde(default = "default_high_min_similarity")]
    pub high_min_similarity: f32,
    #[serde(default = "default_medium_min_sources")]
    pub medium_min_sources: usize,
    #[serde(default = "default_medium_min_similarity")]
    pub medium_min_similarity: f32,
}

impl Default for ConfidenceConfig {
    fn default() -> Self {
        Self {
            high_min_sources: default_high_min_sources(),
            high_min_similarity: default_high_min_similarity(),
            medium_min_sources: default_medium_min_sources(),
            medium_min_similarity: default_medium_min_similarity(),
        }
    }
}

fn default_high_min_sources() -> usize {
    2
}
fn default_high_min_similarity() -> f32 {
    0.5
}
fn default_medium_min_sources() -> usize {
    1
}
fn default_medium_min_similarity() -> f32 {
    0.3
}

impl Config {
    /// All defaults. Used when no config file exists.
    pub fn minimal() -> Self {
        Self::default()
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

/// Load the config file if it exists, otherwise fall back to defaults.
pub fn load_or_default(path: &Path) -> Result<Config> {
    if path.exists() {
        load_config(path)
    } else {
        tracing::debug!(path = %path.display(), "config file not found, using defaults");
        Ok(Config::minimal())
    }
}

pub fn validate(config: &Config) -> Result<()> {
    if config.retrieval.top_k == 0 {
        bail!("retrieval.top_k must be >= 1");
    }
    if config.summarization.max_attempts == 0 {
        bail!("summarization.max_attempts must be >= 1");
    }
    if config.embedding.batch_size == 0 {
        bail!("embedding.batch_size must be >= 1");
    }

    let c = &config.confidence;
    if c.high_min_sources < c.medium_min_sources {
        bail!("confidence.high_min_sources must be >= confidence.medium_min_sources");
    }
    if c.high_min_similarity < c.medium_min_similarity {
        bail!("confidence.high_min_similarity must be >= confidence.medium_min_similarity");
    }

    match config.embedding.provider.as_str() {
        "disabled" | "local" => {}
        "openai" | "ollama" => {
            if config.embedding.model.is_none() {
                bail!(
                    "embedding.model must be specified when provider is '{}'",
                    config.embedding.provider
                );
            }
            if config.embedding.dims.is_none() || config.embedding.dims == Some(0) {
                bail!(
                    "embedding.dims must be > 0 when provider is '{}'",
                    config.embedding.provider
                );
            }
        }
        other => bail!(
            "Unknown embedding provider: '{}'. Must be disabled, local, openai, or ollama.",
            other
        ),
    }

    Ok(())
}

// ============ Credentials ============

pub const GROQ_API_KEY: &str = "GROQ_API_KEY";
pub const GEMINI_API_KEY: &str = "GEMINI_API_KEY";

/// API keys for the hosted models.
///
/// Absence is only fatal for the capability that needs the key; see
/// [`Credentials::require_text`] and [`Credentials::require_vision`].
#[derive(Clone, Default)]
pub struct Credentials {
    pub groq_api_key: Option<String>,
    pub gemini_api_key: Option<String>,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("groq_api_key", &self.groq_api_key.as_ref().map(|_| "<set>"))
            .field(
                "gemini_api_key",
                &self.gemini_api_key.as_ref().map(|_| "<set>"),
            )
            .finish()
    }
}

impl Credentials {
    /// Read keys from the process environment, after loading `.env` if present.
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv();
        Self {
            groq_api_key: non_empty_var(GROQ_API_KEY),
            gemini_api_key: non_empty_var(GEMINI_API_KEY),
        }
    }

    /// Key for text/table summarization and answer generation.
    pub fn require_text(&self) -> Result<&str> {
        match self.groq_api_key.as_deref() {
            Some(k) => Ok(k),
            None => bail!(
                "text summarization and answer generation unavailable: {} not set",
                GROQ_API_KEY
            ),
        }
    }

    /// Key for image description.
    pub fn require_vision(&self) -> Result<&str> {
        match self.gemini_api_key.as_deref() {
            Some(k) => Ok(k),
            None => bail!("image description unavailable: {} not set", GEMINI_API_KEY),
        }
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}
