//! Result types returned by the extraction entry points.

use crate::error::ChunkError;
use crate::question::Question;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// How a document was processed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "mode")]
pub enum ExtractionPlan {
    /// One completion call for the whole document.
    Direct,
    /// Split into `chunks` calls, processed in order.
    Chunked { chunks: usize },
}

impl ExtractionPlan {
    pub fn chunk_count(&self) -> usize {
        match self {
            ExtractionPlan::Direct => 1,
            ExtractionPlan::Chunked { chunks } => *chunks,
        }
    }
}

/// The outcome of one completion call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkResult {
    /// 1-based chunk index.
    pub index: usize,
    pub total: usize,
    /// Text records sent to the model.
    pub record_count: usize,
    /// Normalised questions, in reply order. `order` is not yet assigned.
    pub questions: Vec<Question>,
    /// Objects the model returned before normalisation.
    pub raw_count: usize,
    /// Objects the normaliser rejected.
    pub rejected: usize,
    pub duration_ms: u64,
    /// Set when the call failed; `questions` is then empty.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ChunkError>,
}

/// Per-document summary.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DocumentResult {
    /// File stem, or the caller-supplied name.
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan: Option<ExtractionPlan>,
    pub record_count: usize,
    /// Records with non-blank text.
    pub valid_lines: usize,
    /// Characters of non-blank text.
    pub char_count: usize,
    pub chunks_total: usize,
    pub chunks_failed: usize,
    /// Chunks that succeeded but yielded no question.
    pub chunks_empty: usize,
    pub questions_raw: usize,
    pub questions_rejected: usize,
    /// Questions contributed before the final filter.
    pub question_count: usize,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub chunk_errors: Vec<ChunkError>,
    /// Set when the whole document failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub duration_ms: u64,
}

impl DocumentResult {
    pub fn failed(&self) -> bool {
        self.error.is_some()
    }
}

/// Run-level counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractionStats {
    pub documents: usize,
    pub documents_failed: usize,
    pub chunks_total: usize,
    pub chunks_failed: usize,
    pub chunks_empty: usize,
    /// Objects returned by the model across all calls.
    pub questions_raw: usize,
    /// Objects rejected by the normaliser.
    pub questions_rejected: usize,
    /// Normalised questions dropped by the final filter.
    pub questions_removed: usize,
    pub explanations_backfilled: usize,
    pub total_duration_ms: u64,
}

impl ExtractionStats {
    /// Fold one document's counters in.
    pub fn add_document(&mut self, doc: &DocumentResult) {
        self.documents += 1;
        if doc.failed() {
            self.documents_failed += 1;
        }
        self.chunks_total += doc.chunks_total;
        self.chunks_failed += doc.chunks_failed;
        self.chunks_empty += doc.chunks_empty;
        self.questions_raw += doc.questions_raw;
        self.questions_rejected += doc.questions_rejected;
    }
}

/// Everything a run produced.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExtractionOutput {
    /// Final questions: choice types only, `order` dense from 0.
    pub questions: Vec<Question>,
    pub documents: Vec<DocumentResult>,
    pub stats: ExtractionStats,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plan_serialises_tagged() {
        let v = serde_json::to_value(ExtractionPlan::Chunked { chunks: 3 }).unwrap();
        assert_eq!(v["mode"], "chunked");
        assert_eq!(v["chunks"], 3);
        assert_eq!(ExtractionPlan::Direct.chunk_count(), 1);
    }

    #[test]
    fn stats_fold_documents() {
        let mut stats = ExtractionStats::default();
        stats.add_document(&DocumentResult {
            name: "a".into(),
            chunks_total: 2,
            chunks_failed: 1,
            questions_raw: 10,
            questions_rejected: 2,
            ..Default::default()
        });
        stats.add_document(&DocumentResult {
            name: "b".into(),
            error: Some("HTTP 401".into()),
            ..Default::default()
        });
        assert_eq!(stats.documents, 2);
        assert_eq!(stats.documents_failed, 1);
        assert_eq!(stats.chunks_failed, 1);
        assert_eq!(stats.questions_raw, 10);
    }
}
