//! Error types for the pdf2questions library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`ExtractError`]: **Fatal** for the unit of work it is returned from:
//!   bad input path, converter crash, missing API key, or a completion call
//!   that exhausted every retry on the single-call path of a small document.
//!
//! * [`ChunkError`]: **Non-fatal**: one chunk of a large document produced
//!   nothing usable, but its siblings are fine. Stored inside
//!   [`crate::output::ChunkResult`] so callers can see partial success
//!   instead of losing a whole document to one stalled request.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Which kind of network failure ended a completion call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransportKind {
    /// TCP/TLS connection could not be established.
    Connect,
    /// The connection was established but reading the response stalled or broke.
    Read,
    /// A configured timeout elapsed.
    Timeout,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TransportKind::Connect => "connect",
            TransportKind::Read => "read",
            TransportKind::Timeout => "timeout",
        };
        f.write_str(s)
    }
}

/// All fatal errors returned by the pdf2questions library.
#[derive(Debug, Error)]
pub enum ExtractError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// Input path does not exist.
    #[error("Input not found: '{path}'")]
    InputNotFound { path: PathBuf },

    /// Input file has an extension we cannot process.
    #[error("Unsupported input '{path}': expected a .pdf or .json file")]
    UnsupportedInput { path: PathBuf },

    /// A folder mixes PDF and JSON inputs; they must be processed separately.
    #[error("Folder '{path}' contains both PDF and JSON files; process them separately")]
    MixedInputFolder { path: PathBuf },

    /// A folder (or converter output) contains nothing to process.
    #[error("No PDF or JSON files found under '{path}'")]
    NoInputFiles { path: PathBuf },

    /// Reading an input or intermediate file failed.
    #[error("Failed to read '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Converter errors ──────────────────────────────────────────────────
    /// The PDF converter program could not be started.
    #[error("PDF converter '{program}' could not be started: {detail}\nInstall it or pass --converter <PATH>.")]
    ConverterNotFound { program: String, detail: String },

    /// The PDF converter ran but exited with a failure status.
    #[error("PDF converter failed on '{path}' (exit code {code:?}): {stderr}")]
    ConverterFailed {
        path: PathBuf,
        code: Option<i32>,
        stderr: String,
    },

    // ── API errors ────────────────────────────────────────────────────────
    /// No usable API key was configured.
    #[error("No API key configured.\nSet SILICONFLOW_API_KEY or pass --api-key.")]
    ApiKeyMissing,

    /// Network-level failure persisted through every retry.
    #[error("Transport failure ({kind}) after {attempts} attempts: {detail}")]
    Transport {
        kind: TransportKind,
        attempts: u32,
        detail: String,
    },

    /// HTTP 429 persisted through every retry.
    #[error("Rate limit (HTTP 429) persisted after {attempts} attempts")]
    RateLimited { attempts: u32 },

    /// Non-retryable HTTP status from the completion endpoint.
    #[error("Completion API returned HTTP {status}: {body}")]
    ApiStatus { status: u16, body: String },

    /// Any other failure (bad envelope, decode error) after every retry.
    #[error("Completion API call failed after {attempts} attempts: {detail}")]
    ApiFailed { attempts: u32, detail: String },

    // ── Output errors ─────────────────────────────────────────────────────
    /// Could not create or write the output JSON file.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ExtractError {
    /// True for connection/read/timeout failures.
    ///
    /// The orchestrator waits an extra network-error delay after a chunk
    /// fails this way before moving on to the next chunk.
    pub fn is_transport(&self) -> bool {
        matches!(self, ExtractError::Transport { .. })
    }

    /// True when the failure came from the remote API rather than local input.
    pub fn is_api(&self) -> bool {
        matches!(
            self,
            ExtractError::Transport { .. }
                | ExtractError::RateLimited { .. }
                | ExtractError::ApiStatus { .. }
                | ExtractError::ApiFailed { .. }
        )
    }
}

/// A non-fatal error for a single chunk.
///
/// The document keeps going; the chunk contributes zero questions.
#[derive(Debug, Clone, Error, Serialize, Deserialize)]
pub enum ChunkError {
    /// The completion call failed for this chunk.
    #[error("Chunk {chunk}: extraction failed: {detail}")]
    ExtractionFailed { chunk: usize, detail: String },

    /// Writing or reading back a chunk's persisted result failed.
    #[error("Chunk {chunk}: artifact I/O failed: {detail}")]
    ArtifactIo { chunk: usize, detail: String },
}

impl ChunkError {
    /// 1-based index of the chunk this error belongs to.
    pub fn chunk(&self) -> usize {
        match self {
            ChunkError::ExtractionFailed { chunk, .. } => *chunk,
            ChunkError::ArtifactIo { chunk, .. } => *chunk,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_display_names_kind() {
        let e = ExtractError::Transport {
            kind: TransportKind::Read,
            attempts: 7,
            detail: "connection reset".into(),
        };
        let msg = e.to_string();
        assert!(msg.contains("read"), "got: {msg}");
        assert!(msg.contains("7 attempts"), "got: {msg}");
        assert!(e.is_transport());
        assert!(e.is_api());
    }

    #[test]
    fn api_status_is_not_transport() {
        let e = ExtractError::ApiStatus {
            status: 401,
            body: "invalid key".into(),
        };
        assert!(!e.is_transport());
        assert!(e.is_api());
        assert!(e.to_string().contains("401"));
    }

    #[test]
    fn input_errors_are_not_api() {
        let e = ExtractError::InputNotFound {
            path: PathBuf::from("/nope.json"),
        };
        assert!(!e.is_api());
    }

    #[test]
    fn chunk_error_reports_index() {
        let e = ChunkError::ExtractionFailed {
            chunk: 3,
            detail: "HTTP 500".into(),
        };
        assert_eq!(e.chunk(), 3);
        assert!(e.to_string().starts_with("Chunk 3"));
    }
}
