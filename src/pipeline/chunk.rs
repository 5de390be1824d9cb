//! Chunk splitting and per-document chunk workspaces.
//!
//! ## Why write chunks to disk?
//!
//! A 2 000-line exam paper becomes 40 chunks and, at the default inter-chunk
//! delay, several minutes of API calls. Each chunk and each chunk's result
//! is an ordinary JSON file, so a run can be inspected (or a single chunk
//! replayed) while it is still going. The workspace is a [`TempDir`] owned
//! by [`ChunkWorkspace`]; dropping it removes every file on all exit paths,
//! including cancellation of the owning future.
//!
//! ## Naming
//!
//! Files are `chunk_0001.json` / `chunk_0001_result.json`. The index is
//! padded to `max(4, digits(total))` so lexicographic order equals numeric
//! order, and merging by sorted file name is merging by chunk index.

use crate::config::ExtractionConfig;
use crate::error::{ChunkError, ExtractError};
use crate::question::{Question, TextRecord};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::debug;

const CHUNKS_DIR: &str = "chunks";
const RESULTS_DIR: &str = "results";

/// Isolated scratch directory for one document's chunks and results.
pub struct ChunkWorkspace {
    dir: TempDir,
}

impl ChunkWorkspace {
    /// Create a workspace named after `document` under `config.work_dir`
    /// (or the system temp directory).
    pub async fn create(document: &str, config: &ExtractionConfig) -> Result<Self, ExtractError> {
        let prefix = format!("{}_", safe_prefix(document));
        let mut builder = tempfile::Builder::new();
        builder.prefix(&prefix);

        let dir = match &config.work_dir {
            Some(parent) => {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| ExtractError::Io {
                        path: parent.clone(),
                        source: e,
                    })?;
                builder.tempdir_in(parent)
            }
            None => builder.tempdir(),
        }
        .map_err(|e| ExtractError::Internal(format!("chunk workspace: {e}")))?;

        for sub in [CHUNKS_DIR, RESULTS_DIR] {
            let path = dir.path().join(sub);
            tokio::fs::create_dir_all(&path)
                .await
                .map_err(|e| ExtractError::Io { path, source: e })?;
        }

        debug!("Chunk workspace for '{}': {}", document, dir.path().display());
        Ok(Self { dir })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn chunks_dir(&self) -> PathBuf {
        self.dir.path().join(CHUNKS_DIR)
    }

    pub fn results_dir(&self) -> PathBuf {
        self.dir.path().join(RESULTS_DIR)
    }

    /// Persist one chunk's normalised questions.
    pub async fn save_result(
        &self,
        index: usize,
        total: usize,
        questions: &[Question],
    ) -> Result<PathBuf, ChunkError> {
        let path = self.results_dir().join(result_file_name(index, total));
        write_json(&path, questions)
            .await
            .map_err(|e| ChunkError::ArtifactIo {
                chunk: index,
                detail: e.to_string(),
            })?;
        Ok(path)
    }

    /// Load every persisted result in chunk-index order and concatenate.
    ///
    /// A result file that cannot be read is reported and skipped.
    pub async fn merge_results(&self) -> Result<(Vec<Question>, Vec<ChunkError>), ExtractError> {
        let dir = self.results_dir();
        let mut names = Vec::new();
        let mut entries = tokio::fs::read_dir(&dir).await.map_err(|e| ExtractError::Io {
            path: dir.clone(),
            source: e,
        })?;
        while let Some(entry) = entries.next_entry().await.map_err(|e| ExtractError::Io {
            path: dir.clone(),
            source: e,
        })? {
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.ends_with("_result.json") {
                names.push(name);
            }
        }
        names.sort();

        let mut merged = Vec::new();
        let mut errors = Vec::new();
        for name in names {
            let index = parse_index(&name).unwrap_or(0);
            let path = dir.join(&name);
            match read_questions(&path).await {
                Ok(mut qs) => merged.append(&mut qs),
                Err(detail) => errors.push(ChunkError::ArtifactIo {
                    chunk: index,
                    detail,
                }),
            }
        }
        Ok((merged, errors))
    }
}

/// A chunk written to disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkHandle {
    /// 1-based chunk index.
    pub index: usize,
    pub path: PathBuf,
}

impl ChunkHandle {
    /// Read the chunk's records back.
    pub async fn load(&self) -> Result<Vec<TextRecord>, ChunkError> {
        let unreadable = |detail: String| ChunkError::ArtifactIo {
            chunk: self.index,
            detail,
        };
        let bytes = tokio::fs::read(&self.path)
            .await
            .map_err(|e| unreadable(e.to_string()))?;
        serde_json::from_slice(&bytes).map_err(|e| unreadable(e.to_string()))
    }
}

/// Split `records` into contiguous slices of at most `chunk_size` items.
///
/// Returns no slices for empty input. `chunk_size == 0` is treated as 1.
pub fn partition(records: &[TextRecord], chunk_size: usize) -> Vec<&[TextRecord]> {
    records.chunks(chunk_size.max(1)).collect()
}

/// Write each partition as `chunk_NNNN.json` under `dir`.
pub async fn split_into_chunks(
    records: &[TextRecord],
    chunk_size: usize,
    dir: &Path,
) -> Result<Vec<ChunkHandle>, ExtractError> {
    let parts = partition(records, chunk_size);
    let total = parts.len();
    let mut handles = Vec::with_capacity(total);

    for (i, part) in parts.into_iter().enumerate() {
        let index = i + 1;
        let path = dir.join(chunk_file_name(index, total));
        write_json(&path, part).await?;
        debug!("Wrote chunk {}/{} ({} records)", index, total, part.len());
        handles.push(ChunkHandle { index, path });
    }
    Ok(handles)
}

/// `chunk_0001.json` style name for chunk `index` of `total`.
pub fn chunk_file_name(index: usize, total: usize) -> String {
    format!("chunk_{:0width$}.json", index, width = index_width(total))
}

/// `chunk_0001_result.json` style name for chunk `index` of `total`.
pub fn result_file_name(index: usize, total: usize) -> String {
    format!("chunk_{:0width$}_result.json", index, width = index_width(total))
}

fn index_width(total: usize) -> usize {
    total.to_string().len().max(4)
}

fn parse_index(name: &str) -> Option<usize> {
    name.strip_prefix("chunk_")?
        .split(|c: char| !c.is_ascii_digit())
        .next()?
        .parse()
        .ok()
}

/// Keep workspace prefixes to characters every file system accepts.
fn safe_prefix(document: &str) -> String {
    let s: String = document
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .take(64)
        .collect();
    if s.is_empty() {
        "document".into()
    } else {
        s
    }
}

async fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<(), ExtractError> {
    let bytes = serde_json::to_vec_pretty(value)
        .map_err(|e| ExtractError::Internal(format!("serialise {}: {e}", path.display())))?;
    tokio::fs::write(path, bytes)
        .await
        .map_err(|e| ExtractError::OutputWriteFailed {
            path: path.to_path_buf(),
            source: e,
        })
}

async fn read_questions(path: &Path) -> Result<Vec<Question>, String> {
    let bytes = tokio::fs::read(path).await.map_err(|e| e.to_string())?;
    serde_json::from_slice(&bytes).map_err(|e| e.to_string())
}
