//! Ingest progress reporting.
//!
//! Reports what `mmrag ingest` is doing while it walks a PDF: extraction,
//! per-element summarization, then indexing. Progress is emitted on
//! **stderr** so stdout remains parseable for scripts.

use std::io::Write;

/// A single progress event for ingest.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum IngestProgressEvent {
    /// Reading and splitting the PDF. Element count not yet known.
    Extracting { source: String },
    /// `n` of `total` elements summarized; `cached` of those came from the cache.
    Summarizing { n: u64, total: u64, cached: u64 },
    /// Embedding and writing `total` summaries to the index.
    Indexing { total: u64 },
}

/// Reports ingest progress. Implementations write to stderr (human or JSON).
pub trait IngestProgressReporter: Send + Sync {
    fn report(&self, event: IngestProgressEvent);
}

/// Human-friendly progress on stderr: "ingest  summarizing  12 / 40 elements (9 cached)".
pub struct StderrProgress;

impl IngestProgressReporter for StderrProgress {
    fn report(&self, event: IngestProgressEvent) {
        let line = human_line(&event);
        let mut err = std::io::stderr().lock();
        let _ = err.write_all(line.as_bytes());
        let _ = err.flush();
    }
}

fn human_line(event: &IngestProgressEvent) -> String {
    match event {
        IngestProgressEvent::Extracting { source } => {
            format!("ingest {}  extracting...\n", source)
        }
        IngestProgressEvent::Summarizing { n, total, cached } => format!(
            "ingest  summarizing  {} / {} elements ({} cached)\n",
            format_number(*n),
            format_number(*total),
            format_number(*cached)
        ),
        IngestProgressEvent::Indexing { total } => {
            format!("ingest  indexing  {} summaries\n", format_number(*total))
        }
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl IngestProgressReporter for JsonProgress {
    fn report(&self, event: IngestProgressEvent) {
        if let Ok(line) = serde_json::to_string(&json_event(&event)) {
            let mut err = std::io::stderr().lock();
            let _ = writeln!(err, "{}", line);
            let _ = err.flush();
        }
    }
}

fn json_event(event: &IngestProgressEvent) -> serde_json::Value {
    match event {
        IngestProgressEvent::Extracting { source } => serde_json::json!({
            "event": "progress",
            "phase": "extracting",
            "source": source
        }),
        IngestProgressEvent::Summarizing { n, total, cached } => serde_json::json!({
            "event": "progress",
            "phase": "summarizing",
            "n": n,
            "total": total,
            "cached": cached
        }),
        IngestProgressEvent::Indexing { total } => serde_json::json!({
            "event": "progress",
            "phase": "indexing",
            "total": total
        }),
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl IngestProgressReporter for NoProgress {
    fn report(&self, _event: IngestProgressEvent) {}
}

fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + (s.len() - 1) / 3);
    for (i, c) in s.chars().rev().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(c);
    }
    result.chars().rev().collect()
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Default: human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    pub fn reporter(&self) -> Box<dyn IngestProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_number_comma() {
        assert_eq!(format_number(0), "0");
        assert_eq!(format_number(999), "999");
        assert_eq!(format_number(1000), "1,000");
        assert_eq!(format_number(1_234_567), "1,234,567");
    }

    #[test]
    fn human_summarizing_line() {
        let line = human_line(&IngestProgressEvent::Summarizing {
            n: 12,
            total: 1500,
            cached: 9,
        });
        assert_eq!(line, "ingest  summarizing  12 / 1,500 elements (9 cached)\n");
    }

    #[test]
    fn json_event_has_phase() {
        let v = json_event(&IngestProgressEvent::Indexing { total: 3 });
        assert_eq!(v["phase"], "indexing");
        assert_eq!(v["total"], 3);
    }
}
