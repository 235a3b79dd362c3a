//! Cache-gated element summarization.
//!
//! [`Summarizer::summarize`] looks an element up in the [`SummaryCache`] by
//! content hash; only on a miss does it build a kind-specific prompt and
//! call the text or vision model, under the configured [`RetryPolicy`].
//!
//! A model that keeps failing never aborts ingest. The element gets a
//! placeholder summary (marked with [`PLACEHOLDER_MODEL`]) that is returned
//! but not cached, so the next run tries the model again.

use std::sync::Arc;

use crate::cache::SummaryCache;
use crate::config::SummarizationConfig;
use crate::llm::{CompletionRequest, ProviderError, TextModel, VisionModel};
use crate::models::{
    truncate_chars, Element, ElementContent, ElementKind, ImageData, Summary, PLACEHOLDER_MODEL,
};
use crate::retry::{self, RetryPolicy};

const TEXT_SYSTEM: &str = "You are a helpful assistant that creates concise, accurate summaries.";
const TABLE_SYSTEM: &str =
    "You are a helpful assistant that analyzes tables and extracts key insights.";
const IMAGE_PROMPT: &str = "Describe this image in detail. Focus on important visual elements, \
diagrams, charts, or any text present. Be specific and informative about what you see.";

/// Characters of raw text kept in a text or table placeholder.
const PLACEHOLDER_TEXT_CHARS: usize = 200;
/// Characters of the error message kept in an image placeholder.
const PLACEHOLDER_ERROR_CHARS: usize = 50;

/// Where a summary came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SummarySource {
    Cache,
    Model,
    Placeholder,
}

#[derive(Debug, Clone)]
pub struct SummaryOutcome {
    pub summary: Summary,
    pub source: SummarySource,
}

pub struct Summarizer {
    cache: Arc<SummaryCache>,
    text_model: Arc<dyn TextModel>,
    vision_model: Arc<dyn VisionModel>,
    policy: RetryPolicy,
    config: SummarizationConfig,
}

impl Summarizer {
    pub fn new(
        cache: Arc<SummaryCache>,
        text_model: Arc<dyn TextModel>,
        vision_model: Arc<dyn VisionModel>,
        config: &SummarizationConfig,
    ) -> Self {
        Self {
            cache,
            text_model,
            vision_model,
            policy: RetryPolicy::from_config(config),
            config: config.clone(),
        }
    }

    /// Override the retry policy derived from config.
    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn cache(&self) -> &SummaryCache {
        &self.cache
    }

    /// Summarize one element, consulting the cache first.
    pub async fn summarize(&self, element: &Element) -> SummaryOutcome {
        if let Some(mut cached) = self.cache.get(&element.content_hash).await {
            tracing::debug!(element = %element.id, "summary cache hit");
            // Same content may appear under another id (page or file).
            cached.element_id = element.id.clone();
            return SummaryOutcome {
                summary: cached,
                source: SummarySource::Cache,
            };
        }

        let result = match &element.content {
            ElementContent::Text(text) => self.summarize_text(element.kind, text).await,
            ElementContent::Image(image) => self.describe_image(image).await,
        };

        match result {
            Ok((text, model_used)) => {
                let summary = Summary {
                    element_id: element.id.clone(),
                    text,
                    model_used,
                };
                self.cache.put(&element.content_hash, &summary).await;
                SummaryOutcome {
                    summary,
                    source: SummarySource::Model,
                }
            }
            Err(e) => {
                tracing::warn!(element = %element.id, error = %e, "summarization failed, using placeholder");
                SummaryOutcome {
                    summary: placeholder(element, &e),
                    source: SummarySource::Placeholder,
                }
            }
        }
    }

    async fn summarize_text(
        &self,
        kind: ElementKind,
        text: &str,
    ) -> Result<(String, String), ProviderError> {
        let request = &text_request(kind, text, &self.config);
        let model = self.text_model.as_ref();

        let summary = retry::retry(&self.policy, "text summary", |_| async move {
            non_empty("text model", model.complete(request).await?)
        })
        .await?;

        Ok((summary, model.model_name().to_string()))
    }

    async fn describe_image(&self, image: &ImageData) -> Result<(String, String), ProviderError> {
        let model = self.vision_model.as_ref();

        let description = retry::retry(&self.policy, "image description", |_| async move {
            non_empty("vision model", model.describe_image(image, IMAGE_PROMPT).await?)
        })
        .await?;

        Ok((description, model.model_name().to_string()))
    }
}

fn non_empty(provider: &'static str, text: String) -> Result<String, ProviderError> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(ProviderError::EmptyResponse { provider });
    }
    Ok(trimmed.to_string())
}

/// Chat request for a text block or a table.
pub fn text_request(
    kind: ElementKind,
    text: &str,
    config: &SummarizationConfig,
) -> CompletionRequest {
    let (system, prompt, max_tokens) = match kind {
        ElementKind::Table => (
            TABLE_SYSTEM,
            format!(
                "Analyze and summarize the following table, highlighting key data points and relationships:\n\n\
                 Table:\n{}\n\n\
                 Provide a summary that captures the table's structure and main findings.",
                text
            ),
            config.table_max_tokens,
        ),
        _ => (
            TEXT_SYSTEM,
            format!(
                "Summarize the following text concisely while preserving key information and context:\n\n\
                 Text: {}\n\n\
                 Provide a clear, informative summary in 2-3 sentences.",
                text
            ),
            config.text_max_tokens,
        ),
    };

    CompletionRequest {
        system: system.to_string(),
        prompt,
        temperature: config.temperature,
        max_tokens,
        json_output: false,
    }
}

/// Stand-in summary used when every attempt failed.
fn placeholder(element: &Element, error: &ProviderError) -> Summary {
    let text = match &element.content {
        ElementContent::Text(t) => format!(
            "(summary unavailable) {}",
            truncate_chars(t, PLACEHOLDER_TEXT_CHARS)
        ),
        ElementContent::Image(img) => format!(
            "Image {}: {}x{} pixels. (Note: AI description failed: {})",
            element.id,
            img.width,
            img.height,
            truncate_chars(&error.to_string(), PLACEHOLDER_ERROR_CHARS)
        ),
    };
    Summary {
        element_id: element.id.clone(),
        text,
        model_used: PLACEHOLDER_MODEL.to_string(),
    }
}
