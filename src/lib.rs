//! # pdf2questions
//!
//! Extract structured exam questions from PDF text dumps with an
//! OpenAI-compatible completion API.
//!
//! ## Why this crate?
//!
//! Exam papers come out of PDF converters as a flat list of text lines:
//! question stems, options, answers and explanations interleaved with page
//! headers and OCR noise. Splitting that into questions with rules breaks on
//! every new paper layout. Instead this crate hands the lines to a language
//! model in bounded chunks, then repairs, validates and normalises whatever
//! JSON comes back into one canonical question schema.
//!
//! ## Pipeline Overview
//!
//! ```text
//! PDF / converter JSON
//!  │
//!  ├─ 1. Input      run the PDF converter, load {type, text} records
//!  ├─ 2. Plan       one call for small documents, 50-record chunks otherwise
//!  ├─ 3. Extract    sequential completion calls with retry and backoff
//!  ├─ 4. Repair     strip fences, staged JSON repair
//!  ├─ 5. Normalise  answers, type inference, defaults, schema validation
//!  └─ 6. Filter     keep single/multiple choice, number 0..K-1
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use pdf2questions::{extract_to_file, ExtractionConfig};
//! use std::path::PathBuf;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ExtractionConfig::builder()
//!         .api_key(std::env::var("SILICONFLOW_API_KEY")?)
//!         .build()?;
//!     let files = vec![PathBuf::from("paper_content_list.json")];
//!     let output = extract_to_file(&files, "paper_questions.json", &config).await?;
//!     eprintln!(
//!         "{} questions, {} chunks failed",
//!         output.questions.len(),
//!         output.stats.chunks_failed
//!     );
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `pdf2questions` binary (clap + anyhow + tracing-subscriber + indicatif + dotenvy) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! pdf2questions = { version = "0.3", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod error;
pub mod extract;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod question;
pub mod stream;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{ExtractionConfig, ExtractionConfigBuilder, HttpTimeouts, PdfMode, QuestionDefaults};
pub use error::{ChunkError, ExtractError, TransportKind};
pub use extract::{
    extract_files, extract_files_sync, extract_pdf, extract_records, extract_to_file,
    write_questions,
};
pub use output::{ChunkResult, DocumentResult, ExtractionOutput, ExtractionPlan, ExtractionStats};
pub use pipeline::input::{collect_json_files, collect_pdf_files, detect_input_kind, InputKind};
pub use progress::{ExtractionProgressCallback, NoopProgressCallback, ProgressCallback};
pub use question::{Difficulty, Question, QuestionOption, QuestionStats, QuestionType, TextRecord};
pub use stream::{extract_stream, ChunkStream};
