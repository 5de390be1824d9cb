//! PDF conversion: run the external PDF→JSON converter.
//!
//! Text extraction and OCR are delegated to a separate program (by default
//! `magic-pdf`) invoked as `<program> -p <pdf> -o <out_dir> -m <mode>`. The
//! converter writes a tree of files; only its `*_content_list.json` output
//! (an array of `{type, text, text_level?, page_idx?}`) is consumed here.

use super::input::{has_extension, walk_files};
use crate::config::ExtractionConfig;
use crate::error::ExtractError;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Suffix of the converter output that holds the flat text-record list.
const CONTENT_LIST_SUFFIX: &str = "_content_list.json";

/// Longest tail of converter stderr kept in [`ExtractError::ConverterFailed`].
const STDERR_TAIL: usize = 2000;

/// Convert `pdf` into JSON under `out_dir` and return the text-record files.
///
/// Returns the `*_content_list.json` files the converter produced, sorted;
/// if there are none, every `.json` file it produced.
pub async fn convert_pdf(
    pdf: &Path,
    out_dir: &Path,
    config: &ExtractionConfig,
) -> Result<Vec<PathBuf>, ExtractError> {
    tokio::fs::create_dir_all(out_dir)
        .await
        .map_err(|e| ExtractError::Io {
            path: out_dir.to_path_buf(),
            source: e,
        })?;

    info!(
        "Converting {} with {} (mode {})",
        pdf.display(),
        config.converter_program,
        config.pdf_mode.as_str()
    );

    let output = Command::new(&config.converter_program)
        .arg("-p")
        .arg(pdf)
        .arg("-o")
        .arg(out_dir)
        .arg("-m")
        .arg(config.pdf_mode.as_str())
        .stdin(Stdio::null())
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|e| ExtractError::ConverterNotFound {
            program: config.converter_program.clone(),
            detail: e.to_string(),
        })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let tail: String = {
            let chars: Vec<char> = stderr.trim().chars().collect();
            chars[chars.len().saturating_sub(STDERR_TAIL)..].iter().collect()
        };
        return Err(ExtractError::ConverterFailed {
            path: pdf.to_path_buf(),
            code: output.status.code(),
            stderr: tail,
        });
    }

    let mut produced: Vec<PathBuf> = walk_files(out_dir)?
        .into_iter()
        .filter(|p| has_extension(p, "json"))
        .collect();
    produced.sort();

    let content_lists: Vec<PathBuf> = produced
        .iter()
        .filter(|p| {
            p.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.ends_with(CONTENT_LIST_SUFFIX))
        })
        .cloned()
        .collect();

    let files = if content_lists.is_empty() {
        if !produced.is_empty() {
            warn!(
                "No *{} output for {}; using all {} JSON files",
                CONTENT_LIST_SUFFIX,
                pdf.display(),
                produced.len()
            );
        }
        produced
    } else {
        content_lists
    };

    if files.is_empty() {
        return Err(ExtractError::NoInputFiles {
            path: out_dir.to_path_buf(),
        });
    }
    debug!("Converter produced {} usable files", files.len());
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_converter_is_reported() {
        let out = tempfile::tempdir().unwrap();
        let config = ExtractionConfig::builder()
            .converter_program("pdf2questions-no-such-converter")
            .build()
            .unwrap();
        let err = convert_pdf(Path::new("x.pdf"), out.path(), &config)
            .await
            .unwrap_err();
        assert!(matches!(err, ExtractError::ConverterNotFound { .. }));
    }

    #[cfg(unix)]
    fn script(dir: &Path, body: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;
        let path = dir.join("fake-converter.sh");
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn content_list_outputs_are_preferred() {
        let bin = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        let program = script(
            bin.path(),
            r#"mkdir -p "$4/doc/auto"
echo '[{"type":"text","text":"1. 题"}]' > "$4/doc/auto/doc_content_list.json"
echo '{}' > "$4/doc/auto/doc_middle.json""#,
        );
        let config = ExtractionConfig::builder()
            .converter_program(program.to_string_lossy())
            .build()
            .unwrap();

        let files = convert_pdf(Path::new("doc.pdf"), out.path(), &config).await.unwrap();
        assert_eq!(files.len(), 1);
        assert!(files[0].ends_with("doc/auto/doc_content_list.json"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn failing_converter_reports_exit_code() {
        let bin = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        let program = script(bin.path(), "echo 'model weights missing' >&2\nexit 3");
        let config = ExtractionConfig::builder()
            .converter_program(program.to_string_lossy())
            .build()
            .unwrap();

        match convert_pdf(Path::new("doc.pdf"), out.path(), &config).await {
            Err(ExtractError::ConverterFailed { code, stderr, .. }) => {
                assert_eq!(code, Some(3));
                assert!(stderr.contains("weights"));
            }
            other => panic!("expected ConverterFailed, got {other:?}"),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn converter_without_output_is_an_error() {
        let bin = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        let program = script(bin.path(), "exit 0");
        let config = ExtractionConfig::builder()
            .converter_program(program.to_string_lossy())
            .build()
            .unwrap();
        let err = convert_pdf(Path::new("doc.pdf"), out.path(), &config)
            .await
            .unwrap_err();
        assert!(matches!(err, ExtractError::NoInputFiles { .. }));
    }
}
