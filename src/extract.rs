//! Extraction entry points: the per-document chunk orchestrator and the
//! multi-document runs built on it.
//!
//! ## Direct vs. chunked
//!
//! A document whose non-blank text fits in `direct_max_lines` lines and
//! `direct_max_chars` characters goes to the model in one call. Anything
//! larger is split into chunks of `chunk_size` records, written to a
//! [`ChunkWorkspace`], and sent one chunk at a time with `chunk_delay_ms`
//! between calls. Chunks are never sent concurrently: the delay is the
//! throttle that keeps a long paper under the API's rate limit.
//!
//! A failed chunk contributes nothing and the document carries on. A failed
//! direct call fails the document. Either way the final filter only runs
//! once, over the merged questions of every document in the run.

use crate::config::ExtractionConfig;
use crate::error::{ChunkError, ExtractError};
use crate::output::{ChunkResult, DocumentResult, ExtractionOutput, ExtractionPlan, ExtractionStats};
use crate::pipeline::chunk::{split_into_chunks, ChunkWorkspace};
use crate::pipeline::filter::finalize;
use crate::pipeline::input::{document_name, load_text_records};
use crate::pipeline::llm::ExtractionClient;
use crate::pipeline::normalize::normalize_batch;
use crate::pipeline::pdf::convert_pdf;
use crate::question::{Question, TextRecord};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

/// Non-blank line and character counts used to pick a plan.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TextSize {
    pub valid_lines: usize,
    pub chars: usize,
}

/// Count records with non-blank text and the characters in them.
pub fn measure(records: &[TextRecord]) -> TextSize {
    records
        .iter()
        .filter(|r| r.has_text())
        .fold(TextSize::default(), |acc, r| TextSize {
            valid_lines: acc.valid_lines + 1,
            chars: acc.chars + r.text.chars().count(),
        })
}

/// Decide how a document of `records` is processed.
pub fn plan_for(records: &[TextRecord], config: &ExtractionConfig) -> ExtractionPlan {
    let size = measure(records);
    if size.valid_lines <= config.direct_max_lines && size.chars <= config.direct_max_chars {
        ExtractionPlan::Direct
    } else {
        ExtractionPlan::Chunked {
            chunks: records.len().div_ceil(config.chunk_size.max(1)),
        }
    }
}

// ── Single document ──────────────────────────────────────────────────────

/// Extract questions from one in-memory document.
///
/// Returns the document's questions in chunk order, before the final
/// filter (non-choice types are still present and `order` is unset), plus
/// its summary.
///
/// # Errors
/// Fails when the API key is missing, when the chunk workspace cannot be
/// created, or when the single call of a direct-path document fails.
/// Chunk failures are recorded in the returned [`DocumentResult`] instead.
pub async fn extract_records(
    name: &str,
    records: &[TextRecord],
    config: &ExtractionConfig,
) -> Result<(Vec<Question>, DocumentResult), ExtractError> {
    let client = ExtractionClient::new(config)?;
    run_document(&client, name, records, config).await
}

async fn run_document(
    client: &ExtractionClient,
    name: &str,
    records: &[TextRecord],
    config: &ExtractionConfig,
) -> Result<(Vec<Question>, DocumentResult), ExtractError> {
    let start = Instant::now();
    let size = measure(records);
    let mut doc = DocumentResult {
        name: name.to_string(),
        record_count: records.len(),
        valid_lines: size.valid_lines,
        char_count: size.chars,
        ..Default::default()
    };

    if size.valid_lines == 0 {
        info!("'{}': no text to extract ({} records)", name, records.len());
        if let Some(ref cb) = config.progress_callback {
            cb.on_document_start(name, 0);
            cb.on_document_complete(name, 0);
        }
        doc.duration_ms = start.elapsed().as_millis() as u64;
        return Ok((Vec::new(), doc));
    }

    let plan = plan_for(records, config);
    doc.plan = Some(plan);
    doc.chunks_total = plan.chunk_count();
    info!(
        "'{}': {} lines, {} chars → {:?}",
        name, size.valid_lines, size.chars, plan
    );
    if let Some(ref cb) = config.progress_callback {
        cb.on_document_start(name, plan.chunk_count());
    }

    let questions = match plan {
        ExtractionPlan::Direct => {
            let (result, failure) = extract_chunk(client, name, 1, 1, records, config).await;
            if let Some(e) = failure {
                error!("'{}': extraction failed: {}", name, e);
                return Err(e);
            }
            record_chunk(&mut doc, &result);
            result.questions
        }
        ExtractionPlan::Chunked { .. } => run_chunked(client, name, records, config, &mut doc).await?,
    };

    doc.question_count = questions.len();
    doc.duration_ms = start.elapsed().as_millis() as u64;
    info!(
        "'{}': {} questions ({} of {} chunks failed) in {}ms",
        name, doc.question_count, doc.chunks_failed, doc.chunks_total, doc.duration_ms
    );
    if let Some(ref cb) = config.progress_callback {
        cb.on_document_complete(name, doc.question_count);
    }
    Ok((questions, doc))
}

/// Split, call each chunk in order, persist, then merge by chunk index.
async fn run_chunked(
    client: &ExtractionClient,
    name: &str,
    records: &[TextRecord],
    config: &ExtractionConfig,
    doc: &mut DocumentResult,
) -> Result<Vec<Question>, ExtractError> {
    // Dropping the workspace removes it, on every return path.
    let workspace = ChunkWorkspace::create(name, config).await?;
    let handles = split_into_chunks(records, config.chunk_size, &workspace.chunks_dir()).await?;
    let total = handles.len();

    for (i, handle) in handles.iter().enumerate() {
        if i > 0 && config.chunk_delay_ms > 0 {
            debug!("Inter-chunk delay {}ms", config.chunk_delay_ms);
            sleep(Duration::from_millis(config.chunk_delay_ms)).await;
        }

        let chunk_records = match handle.load().await {
            Ok(r) => r,
            Err(e) => {
                warn!("'{}': {}", name, e);
                fail_chunk(config, name, total, doc, e);
                continue;
            }
        };

        let (result, failure) =
            extract_chunk(client, name, handle.index, total, &chunk_records, config).await;
        record_chunk(doc, &result);

        if let Some(e) = failure {
            if e.is_transport() && config.network_error_delay_ms > 0 {
                warn!(
                    "'{}': network failure on chunk {}; waiting {}ms",
                    name, handle.index, config.network_error_delay_ms
                );
                sleep(Duration::from_millis(config.network_error_delay_ms)).await;
            }
            continue;
        }

        if let Err(e) = workspace
            .save_result(handle.index, total, &result.questions)
            .await
        {
            warn!("'{}': {}", name, e);
            doc.chunk_errors.push(e);
        }
    }

    let (merged, merge_errors) = workspace.merge_results().await?;
    for e in merge_errors {
        warn!("'{}': {}", name, e);
        doc.chunk_errors.push(e);
    }
    Ok(merged)
}

fn fail_chunk(
    config: &ExtractionConfig,
    name: &str,
    total: usize,
    doc: &mut DocumentResult,
    e: ChunkError,
) {
    if let Some(ref cb) = config.progress_callback {
        cb.on_chunk_error(name, e.chunk(), total, &e.to_string());
    }
    doc.chunks_failed += 1;
    doc.chunk_errors.push(e);
}

fn record_chunk(doc: &mut DocumentResult, result: &ChunkResult) {
    doc.questions_raw += result.raw_count;
    doc.questions_rejected += result.rejected;
    match &result.error {
        Some(e) => {
            doc.chunks_failed += 1;
            doc.chunk_errors.push(e.clone());
        }
        None if result.questions.is_empty() => doc.chunks_empty += 1,
        None => {}
    }
}

/// Run one completion call and normalise its reply.
///
/// Never fails: an API error is folded into [`ChunkResult::error`] and also
/// handed back so the caller can decide whether the document survives it.
pub(crate) async fn extract_chunk(
    client: &ExtractionClient,
    document: &str,
    index: usize,
    total: usize,
    records: &[TextRecord],
    config: &ExtractionConfig,
) -> (ChunkResult, Option<ExtractError>) {
    let start = Instant::now();
    if let Some(ref cb) = config.progress_callback {
        cb.on_chunk_start(document, index, total);
    }
    info!("'{}': chunk {}/{} ({} records)", document, index, total, records.len());

    let mut result = ChunkResult {
        index,
        total,
        record_count: records.len(),
        questions: Vec::new(),
        raw_count: 0,
        rejected: 0,
        duration_ms: 0,
        error: None,
    };

    let failure = match client.extract(records).await {
        Ok(raws) => {
            result.raw_count = raws.len();
            let batch = normalize_batch(raws, config);
            result.rejected = batch.rejected;
            result.questions = batch.questions;
            if result.questions.is_empty() {
                warn!("'{}': chunk {} yielded no valid questions", document, index);
            } else {
                info!(
                    "'{}': chunk {} → {} questions ({} rejected)",
                    document,
                    index,
                    result.questions.len(),
                    result.rejected
                );
            }
            if let Some(ref cb) = config.progress_callback {
                cb.on_chunk_complete(document, index, total, result.questions.len());
            }
            None
        }
        Err(e) => {
            warn!("'{}': chunk {} failed: {}", document, index, e);
            let chunk_error = ChunkError::ExtractionFailed {
                chunk: index,
                detail: e.to_string(),
            };
            if let Some(ref cb) = config.progress_callback {
                cb.on_chunk_error(document, index, total, &chunk_error.to_string());
            }
            result.error = Some(chunk_error);
            Some(e)
        }
    };

    result.duration_ms = start.elapsed().as_millis() as u64;
    (result, failure)
}

// ── Multi-document runs ──────────────────────────────────────────────────

/// Extract questions from converter JSON dumps, one document per file.
///
/// Documents run in the given order. A document that fails is recorded in
/// [`ExtractionOutput::documents`] and the run continues; only a missing
/// API key stops it. The final filter runs once over everything.
pub async fn extract_files(
    paths: &[PathBuf],
    config: &ExtractionConfig,
) -> Result<ExtractionOutput, ExtractError> {
    let start = Instant::now();
    let client = ExtractionClient::new(config)?;
    info!("Extracting from {} files", paths.len());

    let mut all_questions = Vec::new();
    let mut documents = Vec::with_capacity(paths.len());
    let mut stats = ExtractionStats::default();

    for path in paths {
        let name = document_name(path);
        let records = load_text_records(path).await;
        let doc = match run_document(&client, &name, &records, config).await {
            Ok((mut questions, mut doc)) => {
                all_questions.append(&mut questions);
                doc.source = Some(path.clone());
                doc
            }
            Err(e) => {
                error!("Document '{}' failed: {}", name, e);
                DocumentResult {
                    name,
                    source: Some(path.clone()),
                    record_count: records.len(),
                    error: Some(e.to_string()),
                    ..Default::default()
                }
            }
        };
        stats.add_document(&doc);
        documents.push(doc);
    }

    let (questions, counts) = finalize(all_questions);
    stats.questions_removed = counts.removed;
    stats.explanations_backfilled = counts.explanations_backfilled;
    stats.total_duration_ms = start.elapsed().as_millis() as u64;

    info!(
        "Extraction complete: {} questions from {} documents ({} failed), {}ms",
        questions.len(),
        stats.documents,
        stats.documents_failed,
        stats.total_duration_ms
    );

    Ok(ExtractionOutput {
        questions,
        documents,
        stats,
    })
}

/// Run [`extract_files`] and write the questions to `output_path`.
///
/// Uses atomic write (temp file + rename) to prevent partial files.
pub async fn extract_to_file(
    paths: &[PathBuf],
    output_path: impl AsRef<Path>,
    config: &ExtractionConfig,
) -> Result<ExtractionOutput, ExtractError> {
    let output = extract_files(paths, config).await?;
    write_questions(&output.questions, output_path.as_ref()).await?;
    Ok(output)
}

/// Write `questions` as a pretty-printed UTF-8 JSON array.
pub async fn write_questions(questions: &[Question], path: &Path) -> Result<(), ExtractError> {
    let write_err = |e: std::io::Error| ExtractError::OutputWriteFailed {
        path: path.to_path_buf(),
        source: e,
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await.map_err(write_err)?;
    }

    let body = serde_json::to_vec_pretty(questions)
        .map_err(|e| ExtractError::Internal(format!("serialise questions: {e}")))?;

    let tmp_path = path.with_extension("json.tmp");
    tokio::fs::write(&tmp_path, &body).await.map_err(write_err)?;
    tokio::fs::rename(&tmp_path, path).await.map_err(write_err)?;

    info!("Wrote {} questions to {}", questions.len(), path.display());
    Ok(())
}

/// Convert a PDF with the external converter, then extract from its output.
///
/// Converter output goes to `keep_dir` when given (and stays there), or to
/// a temporary directory removed before returning.
pub async fn extract_pdf(
    pdf: &Path,
    keep_dir: Option<&Path>,
    config: &ExtractionConfig,
) -> Result<ExtractionOutput, ExtractError> {
    // Fail before the converter runs if the run cannot call the API anyway.
    ExtractionClient::new(config)?;

    let scratch;
    let out_dir = match keep_dir {
        Some(dir) => dir.join(document_name(pdf)),
        None => {
            scratch = tempfile::Builder::new()
                .prefix("pdf2questions_")
                .tempdir()
                .map_err(|e| ExtractError::Internal(format!("tempdir: {e}")))?;
            scratch.path().to_path_buf()
        }
    };

    let json_files = convert_pdf(pdf, &out_dir, config).await?;
    extract_files(&json_files, config).await
}

/// Synchronous wrapper around [`extract_files`].
///
/// Creates a temporary tokio runtime internally.
pub fn extract_files_sync(
    paths: &[PathBuf],
    config: &ExtractionConfig,
) -> Result<ExtractionOutput, ExtractError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| ExtractError::Internal(format!("Failed to create tokio runtime: {}", e)))?
        .block_on(extract_files(paths, config))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines(n: usize, text: &str) -> Vec<TextRecord> {
        (0..n).map(|i| TextRecord::text(format!("{text} {i}"))).collect()
    }

    #[test]
    fn measure_skips_blank_text() {
        let mut records = lines(3, "题");
        records.push(TextRecord::text("   "));
        records.push(TextRecord::text(""));
        let size = measure(&records);
        assert_eq!(size.valid_lines, 3);
        // "题 0" is three characters, not five bytes.
        assert_eq!(size.chars, 9);
    }

    #[test]
    fn small_documents_go_direct() {
        let config = ExtractionConfig::default();
        assert_eq!(plan_for(&lines(50, "q"), &config), ExtractionPlan::Direct);
    }

    #[test]
    fn sixty_lines_are_chunked_in_two() {
        let config = ExtractionConfig::default();
        assert_eq!(
            plan_for(&lines(60, "q"), &config),
            ExtractionPlan::Chunked { chunks: 2 }
        );
    }

    #[test]
    fn long_text_is_chunked_even_with_few_lines() {
        let config = ExtractionConfig::default();
        let records = vec![TextRecord::text("字".repeat(15_001))];
        assert_eq!(
            plan_for(&records, &config),
            ExtractionPlan::Chunked { chunks: 1 }
        );
    }

    #[tokio::test]
    async fn blank_document_makes_no_call() {
        let config = ExtractionConfig::builder()
            .api_key("k")
            .api_base("http://127.0.0.1:9")
            .build()
            .unwrap();
        let records = vec![TextRecord::text(" "), TextRecord::text("")];
        let (questions, doc) = extract_records("blank", &records, &config).await.unwrap();
        assert!(questions.is_empty());
        assert_eq!(doc.plan, None);
        assert_eq!(doc.record_count, 2);
    }

    #[tokio::test]
    async fn missing_key_stops_the_run() {
        let config = ExtractionConfig::default();
        let err = extract_files(&[PathBuf::from("a.json")], &config)
            .await
            .unwrap_err();
        assert!(matches!(err, ExtractError::ApiKeyMissing));
    }

    #[tokio::test]
    async fn write_questions_is_atomic_and_pretty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/out.json");
        write_questions(&[], &path).await.unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "[]");
        assert!(!path.with_extension("json.tmp").exists());
    }
}
