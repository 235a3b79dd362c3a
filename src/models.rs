//! Core data models that flow through ingest and query.
//!
//! Elements are extracted once and never mutated. Summaries are keyed by the
//! element's content hash, indexed documents by element id.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// The three kinds of content pulled out of a PDF.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ElementKind {
    Text,
    Table,
    Image,
}

impl ElementKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ElementKind::Text => "text",
            ElementKind::Table => "table",
            ElementKind::Image => "image",
        }
    }
}

impl std::fmt::Display for ElementKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ElementKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "text" => Ok(ElementKind::Text),
            "table" | "tables" => Ok(ElementKind::Table),
            "image" | "images" => Ok(ElementKind::Image),
            other => Err(format!(
                "unknown element kind '{}': expected text, table, or image",
                other
            )),
        }
    }
}

/// Raw payload of an element.
#[derive(Debug, Clone, PartialEq)]
pub enum ElementContent {
    /// Text block or table rendered as text.
    Text(String),
    /// Encoded image bytes as found in the PDF.
    Image(ImageData),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ImageData {
    pub bytes: Vec<u8>,
    /// MIME type of `bytes` (e.g. `image/jpeg`).
    pub mime: String,
    pub width: u32,
    pub height: u32,
}

impl ElementContent {
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            ElementContent::Text(t) => t.as_bytes(),
            ElementContent::Image(img) => &img.bytes,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            ElementContent::Text(t) => Some(t),
            ElementContent::Image(_) => None,
        }
    }
}

/// One extracted unit of a PDF.
#[derive(Debug, Clone, PartialEq)]
pub struct Element {
    /// Stable id derived from kind, page, and content hash.
    pub id: String,
    pub kind: ElementKind,
    /// 1-based page number.
    pub page: u32,
    pub content: ElementContent,
    /// Hex SHA-256 over kind and raw content. The summary cache key.
    pub content_hash: String,
}

impl Element {
    /// Build an element, deriving its content hash and id.
    pub fn new(kind: ElementKind, page: u32, content: ElementContent) -> Self {
        let content_hash = content_hash(kind, content.as_bytes());
        let id = element_id(kind, page, &content_hash);
        Self {
            id,
            kind,
            page,
            content,
            content_hash,
        }
    }

    /// First `max_chars` characters of the original content, for display.
    ///
    /// Images have no text; their preview is a dimension note.
    pub fn preview(&self, max_chars: usize) -> String {
        match &self.content {
            ElementContent::Text(t) => truncate_chars(t, max_chars),
            ElementContent::Image(img) => {
                format!("image {}x{} px ({})", img.width, img.height, img.mime)
            }
        }
    }
}

/// Hash of an element's content. Identical content yields identical keys
/// regardless of which file or page it came from.
pub fn content_hash(kind: ElementKind, raw: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(kind.as_str().as_bytes());
    hasher.update([0u8]);
    hasher.update(raw);
    hex::encode(hasher.finalize())
}

fn element_id(kind: ElementKind, page: u32, content_hash: &str) -> String {
    format!("{}_p{}_{}", kind, page, &content_hash[..12])
}

/// A condensed description of an element produced by a hosted model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Summary {
    pub element_id: String,
    pub text: String,
    pub model_used: String,
}

/// Marker stored in [`Summary::model_used`] for failure placeholders.
pub const PLACEHOLDER_MODEL: &str = "placeholder";

impl Summary {
    pub fn is_placeholder(&self) -> bool {
        self.model_used == PLACEHOLDER_MODEL
    }
}

/// A cached summary row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub key: String,
    pub value: Summary,
    /// Unix seconds when the entry was written.
    pub timestamp: i64,
}

/// An element together with its summary, ready for indexing.
#[derive(Debug, Clone)]
pub struct SummarizedElement {
    pub element_id: String,
    pub kind: ElementKind,
    pub page: u32,
    pub content_hash: String,
    /// Original content preview kept with the indexed document.
    pub preview: String,
    pub summary: Summary,
}

/// Metadata carried by every indexed document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentMetadata {
    pub kind: ElementKind,
    pub page: u32,
    pub preview: String,
    pub element_id: String,
}

/// The persisted, embedded form of a summary.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexedDocument {
    pub vector: Vec<f32>,
    pub metadata: DocumentMetadata,
    /// Summary text that was embedded.
    pub text: String,
}

/// A retrieval hit.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredDocument {
    pub metadata: DocumentMetadata,
    pub text: String,
    /// Cosine similarity to the query vector.
    pub score: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    Low,
    Medium,
    High,
}

impl Confidence {
    pub fn as_str(&self) -> &'static str {
        match self {
            Confidence::Low => "low",
            Confidence::Medium => "medium",
            Confidence::High => "high",
        }
    }
}

impl std::fmt::Display for Confidence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A source cited in an answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceRef {
    #[serde(rename = "type")]
    pub kind: ElementKind,
    pub page: u32,
    pub preview: String,
    pub element_id: String,
}

/// The answer to a question.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    pub answer: String,
    pub sources: Vec<SourceRef>,
    pub confidence: Confidence,
}

pub fn truncate_chars(s: &str, max_chars: usize) -> String {
    s.chars().take(max_chars).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_depends_on_content_not_page() {
        let a = Element::new(ElementKind::Text, 1, ElementContent::Text("same".into()));
        let b = Element::new(ElementKind::Text, 7, ElementContent::Text("same".into()));
        assert_eq!(a.content_hash, b.content_hash);
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn hash_depends_on_kind() {
        let t = content_hash(ElementKind::Text, b"a | b");
        let tb = content_hash(ElementKind::Table, b"a | b");
        assert_ne!(t, tb);
    }

    #[test]
    fn element_id_is_stable() {
        let a = Element::new(ElementKind::Table, 2, ElementContent::Text("x y z".into()));
        let b = Element::new(ElementKind::Table, 2, ElementContent::Text("x y z".into()));
        assert_eq!(a.id, b.id);
        assert!(a.id.starts_with("table_p2_"));
    }

    #[test]
    fn preview_is_char_bounded() {
        let e = Element::new(ElementKind::Text, 1, ElementContent::Text("héllo wörld".into()));
        assert_eq!(e.preview(5), "héllo");
    }

    #[test]
    fn kind_parses_plurals() {
        assert_eq!("tables".parse::<ElementKind>().unwrap(), ElementKind::Table);
        assert!("chart".parse::<ElementKind>().is_err());
    }

    #[test]
    fn confidence_orders_low_to_high() {
        assert!(Confidence::Low < Confidence::Medium);
        assert!(Confidence::Medium < Confidence::High);
    }

    #[test]
    fn source_ref_serializes_kind_as_type() {
        let s = SourceRef {
            kind: ElementKind::Image,
            page: 4,
            preview: "p".into(),
            element_id: "image_p4_x".into(),
        };
        let json = serde_json::to_value(&s).unwrap();
        assert_eq!(json["type"], "image");
        assert_eq!(json["page"], 4);
    }
}
