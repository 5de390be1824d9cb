//! Input resolution: classify a user-supplied path and load text records.
//!
//! A run starts from one of four shapes: a PDF, a converter JSON dump, or a
//! folder of either. Folders mixing the two are rejected up front because
//! PDFs need the external converter and a different output layout; guessing
//! which half the user meant is worse than asking.
//!
//! Loading never fails: converter dumps that were edited by hand are often
//! not valid JSON, so decoding falls through to
//! [`crate::pipeline::recover`]. A file that cannot be read at all is logged
//! and treated as an empty document so the rest of a batch still runs.

use super::recover::recover_records;
use crate::error::ExtractError;
use crate::question::TextRecord;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// What a user-supplied input path points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputKind {
    PdfFile,
    JsonFile,
    PdfFolder,
    JsonFolder,
}

impl InputKind {
    pub fn is_pdf(&self) -> bool {
        matches!(self, InputKind::PdfFile | InputKind::PdfFolder)
    }

    pub fn is_folder(&self) -> bool {
        matches!(self, InputKind::PdfFolder | InputKind::JsonFolder)
    }
}

/// Classify `path` by extension, walking folders recursively.
pub fn detect_input_kind(path: &Path) -> Result<InputKind, ExtractError> {
    if !path.exists() {
        return Err(ExtractError::InputNotFound {
            path: path.to_path_buf(),
        });
    }

    if path.is_file() {
        return if has_extension(path, "pdf") {
            Ok(InputKind::PdfFile)
        } else if has_extension(path, "json") {
            Ok(InputKind::JsonFile)
        } else {
            Err(ExtractError::UnsupportedInput {
                path: path.to_path_buf(),
            })
        };
    }

    let files = walk_files(path)?;
    let has_pdf = files.iter().any(|f| has_extension(f, "pdf"));
    let has_json = files.iter().any(|f| has_extension(f, "json"));
    match (has_pdf, has_json) {
        (true, true) => Err(ExtractError::MixedInputFolder {
            path: path.to_path_buf(),
        }),
        (true, false) => Ok(InputKind::PdfFolder),
        (false, true) => Ok(InputKind::JsonFolder),
        (false, false) => Err(ExtractError::NoInputFiles {
            path: path.to_path_buf(),
        }),
    }
}

/// The file itself, or every `.json` file under a folder, sorted.
pub fn collect_json_files(path: &Path) -> Result<Vec<PathBuf>, ExtractError> {
    collect_with_extension(path, "json")
}

/// The file itself, or every `.pdf` file under a folder, sorted.
pub fn collect_pdf_files(path: &Path) -> Result<Vec<PathBuf>, ExtractError> {
    collect_with_extension(path, "pdf")
}

fn collect_with_extension(path: &Path, ext: &str) -> Result<Vec<PathBuf>, ExtractError> {
    if !path.exists() {
        return Err(ExtractError::InputNotFound {
            path: path.to_path_buf(),
        });
    }
    let mut files: Vec<PathBuf> = if path.is_file() {
        vec![path.to_path_buf()]
    } else {
        walk_files(path)?
            .into_iter()
            .filter(|f| has_extension(f, ext))
            .collect()
    };
    files.sort();
    if files.is_empty() {
        return Err(ExtractError::NoInputFiles {
            path: path.to_path_buf(),
        });
    }
    debug!("Collected {} .{} files under {}", files.len(), ext, path.display());
    Ok(files)
}

/// Load a converter dump. Unreadable files yield an empty document.
pub async fn load_text_records(path: &Path) -> Vec<TextRecord> {
    let content = match tokio::fs::read_to_string(path).await {
        Ok(c) => c,
        Err(e) => {
            warn!("Cannot read '{}': {}; treating as empty", path.display(), e);
            return Vec::new();
        }
    };
    let records = recover_records(content.trim());
    info!("Loaded {} text records from {}", records.len(), path.display());
    records
}

/// Document name used for logs, workspaces and output files: the file stem.
pub fn document_name(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "document".to_string())
}

pub(crate) fn has_extension(path: &Path, ext: &str) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case(ext))
}

/// Every regular file under `dir`, recursively.
pub(crate) fn walk_files(dir: &Path) -> Result<Vec<PathBuf>, ExtractError> {
    let mut out = Vec::new();
    let mut pending = vec![dir.to_path_buf()];
    while let Some(current) = pending.pop() {
        let entries = std::fs::read_dir(&current).map_err(|e| ExtractError::Io {
            path: current.clone(),
            source: e,
        })?;
        for entry in entries {
            let entry = entry.map_err(|e| ExtractError::Io {
                path: current.clone(),
                source: e,
            })?;
            let path = entry.path();
            if path.is_dir() {
                pending.push(path);
            } else if path.is_file() {
                out.push(path);
            }
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn missing_path_is_not_found() {
        let err = detect_input_kind(Path::new("/definitely/not/here.json")).unwrap_err();
        assert!(matches!(err, ExtractError::InputNotFound { .. }));
    }

    #[test]
    fn files_are_classified_by_extension() {
        let dir = tempfile::tempdir().unwrap();
        let pdf = dir.path().join("a.PDF");
        let json = dir.path().join("b.json");
        let txt = dir.path().join("c.txt");
        for p in [&pdf, &json, &txt] {
            fs::write(p, b"x").unwrap();
        }
        assert_eq!(detect_input_kind(&pdf).unwrap(), InputKind::PdfFile);
        assert_eq!(detect_input_kind(&json).unwrap(), InputKind::JsonFile);
        assert!(matches!(
            detect_input_kind(&txt),
            Err(ExtractError::UnsupportedInput { .. })
        ));
    }

    #[test]
    fn folders_are_walked_recursively() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("nested/deeper")).unwrap();
        fs::write(dir.path().join("nested/deeper/z.json"), b"[]").unwrap();
        fs::write(dir.path().join("a.json"), b"[]").unwrap();
        fs::write(dir.path().join("notes.txt"), b"").unwrap();

        assert_eq!(detect_input_kind(dir.path()).unwrap(), InputKind::JsonFolder);
        let files = collect_json_files(dir.path()).unwrap();
        assert_eq!(files.len(), 2);
        assert!(files[0].ends_with("a.json"));
    }

    #[test]
    fn mixed_folder_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.json"), b"[]").unwrap();
        fs::write(dir.path().join("b.pdf"), b"%PDF").unwrap();
        assert!(matches!(
            detect_input_kind(dir.path()),
            Err(ExtractError::MixedInputFolder { .. })
        ));
    }

    #[test]
    fn empty_folder_has_no_inputs() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            detect_input_kind(dir.path()),
            Err(ExtractError::NoInputFiles { .. })
        ));
        assert!(matches!(
            collect_pdf_files(dir.path()),
            Err(ExtractError::NoInputFiles { .. })
        ));
    }

    #[test]
    fn document_name_is_stem() {
        assert_eq!(document_name(Path::new("/x/2024真题.json")), "2024真题");
    }

    #[tokio::test]
    async fn load_falls_back_to_recovery() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.json");
        fs::write(&path, "1\t{ type: \"text\", text: \"第一题\" }\n2\t{ type: \"text\", text: \"第二题\" }\n").unwrap();
        let records = load_text_records(&path).await;
        let texts: Vec<_> = records.iter().map(|r| r.text.as_str()).collect();
        assert_eq!(texts, vec!["第一题", "第二题"]);
    }

    #[tokio::test]
    async fn unreadable_file_is_empty_document() {
        let records = load_text_records(Path::new("/definitely/not/here.json")).await;
        assert!(records.is_empty());
    }
}
