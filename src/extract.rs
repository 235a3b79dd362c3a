//! PDF element extraction.
//!
//! Splits a PDF into typed [`Element`]s: text blocks, tables and embedded
//! images, each tagged with its 1-based page number.
//!
//! Text comes from `pdf-extract` page by page, falling back to lopdf's own
//! text extraction for any page `pdf-extract` cannot handle. Each page's text
//! is split on blank lines into blocks; a block whose lines mostly break into
//! two or more columns is classified as a table. Images are read straight
//! from the page resources with lopdf.
//!
//! Failures are per element: a bad page or image is logged, recorded in
//! [`Extraction::warnings`], and skipped. Only a file that cannot be opened
//! at all is an error.

use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::config::ExtractionConfig;
use crate::models::{Element, ElementContent, ElementKind, ImageData};

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("cannot open PDF {path}: {message}")]
    Open { path: String, message: String },

    #[error("page {page}: {message}")]
    Page { page: u32, message: String },

    #[error("image {index} on page {page}: {message}")]
    Image {
        page: u32,
        index: usize,
        message: String,
    },
}

/// Elements pulled from one PDF plus anything that had to be skipped.
#[derive(Debug, Default)]
pub struct Extraction {
    pub elements: Vec<Element>,
    pub warnings: Vec<ExtractError>,
}

/// Per-kind element counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExtractionCounts {
    pub text: usize,
    pub tables: usize,
    pub images: usize,
}

impl ExtractionCounts {
    pub fn total(&self) -> usize {
        self.text + self.tables + self.images
    }
}

impl Extraction {
    pub fn counts(&self) -> ExtractionCounts {
        let mut counts = ExtractionCounts::default();
        for e in &self.elements {
            match e.kind {
                ElementKind::Text => counts.text += 1,
                ElementKind::Table => counts.tables += 1,
                ElementKind::Image => counts.images += 1,
            }
        }
        counts
    }
}

/// Produces the elements of a document.
pub trait Extractor: Send + Sync {
    fn extract(&self, path: &Path) -> Result<Extraction, ExtractError>;
}

pub struct PdfExtractor {
    config: ExtractionConfig,
}

impl PdfExtractor {
    pub fn new(config: ExtractionConfig) -> Self {
        Self { config }
    }

    fn page_elements(&self, page: u32, text: &str, out: &mut Vec<Element>) {
        for block in split_blocks(text) {
            if is_table(&block) {
                let table = block
                    .iter()
                    .map(|l| l.trim())
                    .collect::<Vec<_>>()
                    .join("\n");
                if table.chars().count() >= self.config.min_table_chars {
                    out.push(Element::new(
                        ElementKind::Table,
                        page,
                        ElementContent::Text(table),
                    ));
                }
            } else {
                let paragraph = block
                    .iter()
                    .map(|l| l.trim())
                    .collect::<Vec<_>>()
                    .join(" ");
                if paragraph.chars().count() >= self.config.min_text_chars {
                    out.push(Element::new(
                        ElementKind::Text,
                        page,
                        ElementContent::Text(paragraph),
                    ));
                }
            }
        }
    }

    fn page_images(
        &self,
        doc: &lopdf::Document,
        page: u32,
        page_id: lopdf::ObjectId,
        extraction: &mut Extraction,
    ) {
        let images = match doc.get_page_images(page_id) {
            Ok(images) => images,
            Err(e) => {
                warn_skip(
                    extraction,
                    ExtractError::Page {
                        page,
                        message: format!("cannot read images: {}", e),
                    },
                );
                return;
            }
        };

        for (index, image) in images.iter().enumerate() {
            let width = image.width.max(0) as u32;
            let height = image.height.max(0) as u32;
            let min = self.config.min_image_px;
            if width < min || height < min {
                tracing::debug!(page, index, width, height, "skipping small image");
                continue;
            }

            let filters = image.filters.clone().unwrap_or_default();
            let Some((mime, ext)) = image_encoding(&filters) else {
                warn_skip(
                    extraction,
                    ExtractError::Image {
                        page,
                        index,
                        message: format!("unsupported image encoding {:?}", filters),
                    },
                );
                continue;
            };

            let data = ImageData {
                bytes: image.content.to_vec(),
                mime: mime.to_string(),
                width,
                height,
            };

            if let Some(dir) = &self.config.image_dir {
                let file = image_file_path(dir, page, index, ext);
                if let Err(e) = write_image(&file, &data.bytes) {
                    tracing::warn!(path = %file.display(), error = %e, "could not save extracted image");
                }
            }

            extraction.elements.push(Element::new(
                ElementKind::Image,
                page,
                ElementContent::Image(data),
            ));
        }
    }
}

impl Extractor for PdfExtractor {
    fn extract(&self, path: &Path) -> Result<Extraction, ExtractError> {
        let open_err = |message: String| ExtractError::Open {
            path: path.display().to_string(),
            message,
        };

        let bytes = std::fs::read(path).map_err(|e| open_err(e.to_string()))?;
        let doc = lopdf::Document::load_mem(&bytes).map_err(|e| open_err(e.to_string()))?;

        let page_texts = match pdf_extract::extract_text_from_mem_by_pages(&bytes) {
            Ok(texts) => texts,
            Err(e) => {
                tracing::warn!(error = %e, "pdf-extract failed, using fallback text extraction");
                Vec::new()
            }
        };

        let mut extraction = Extraction::default();

        for (page, page_id) in doc.get_pages() {
            let text = match page_texts.get(page as usize - 1) {
                Some(t) => Some(t.clone()),
                None => match doc.extract_text(&[page]) {
                    Ok(t) => Some(t),
                    Err(e) => {
                        warn_skip(
                            &mut extraction,
                            ExtractError::Page {
                                page,
                                message: e.to_string(),
                            },
                        );
                        None
                    }
                },
            };

            if let Some(text) = text {
                self.page_elements(page, &text, &mut extraction.elements);
            }
            self.page_images(&doc, page, page_id, &mut extraction);
        }

        let counts = extraction.counts();
        tracing::info!(
            path = %path.display(),
            text = counts.text,
            tables = counts.tables,
            images = counts.images,
            skipped = extraction.warnings.len(),
            "extraction complete"
        );

        Ok(extraction)
    }
}

fn warn_skip(extraction: &mut Extraction, err: ExtractError) {
    tracing::warn!(error = %err, "skipping element");
    extraction.warnings.push(err);
}

/// Split page text into blocks separated by blank lines.
fn split_blocks(text: &str) -> Vec<Vec<&str>> {
    let mut blocks = Vec::new();
    let mut current = Vec::new();
    for line in text.lines() {
        if line.trim().is_empty() {
            if !current.is_empty() {
                blocks.push(std::mem::take(&mut current));
            }
        } else {
            current.push(line);
        }
    }
    if !current.is_empty() {
        blocks.push(current);
    }
    blocks
}

/// Cells of a line, split on tabs, pipes, or runs of two or more spaces.
fn cells(line: &str) -> Vec<&str> {
    let mut out = Vec::new();
    for part in line.split(['\t', '|']) {
        for cell in part.split("  ") {
            let cell = cell.trim();
            if !cell.is_empty() {
                out.push(cell);
            }
        }
    }
    out
}

/// A block is a table when it has at least two lines and a strict majority
/// of them hold two or more cells.
fn is_table(block: &[&str]) -> bool {
    if block.len() < 2 {
        return false;
    }
    let columnar = block.iter().filter(|l| cells(l).len() >= 2).count();
    columnar * 2 > block.len()
}

/// MIME type and file extension for the image encodings a vision model accepts.
fn image_encoding(filters: &[String]) -> Option<(&'static str, &'static str)> {
    match filters.last().map(String::as_str) {
        Some("DCTDecode") => Some(("image/jpeg", "jpg")),
        _ => None,
    }
}

pub fn image_file_path(dir: &Path, page: u32, index: usize, ext: &str) -> PathBuf {
    dir.join(format!("image_p{}_{}.{}", page, index, ext))
}

fn write_image(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, bytes)
}
