//! Pipeline stages for text-to-question extraction.
//!
//! Each submodule implements one transformation step and is tested on its
//! own. The orchestration (which stage runs when, chunk delays, merging)
//! lives in [`crate::extract`].
//!
//! ## Data Flow
//!
//! ```text
//! pdf ──▶ input ──▶ chunk ──▶ llm ──▶ sanitize ──▶ normalize ──▶ filter
//! (magic-pdf) (records) (split) (HTTP)  (fences)    (schema)      (choice only)
//!                                  │         │
//!                                retry     recover
//! ```
//!
//! 1. [`pdf`]      : run the external converter, collect its JSON dumps
//! 2. [`input`]    : classify inputs and load text records; malformed dumps
//!    go through [`recover`]
//! 3. [`chunk`]    : split large documents into per-call slices on disk
//! 4. [`llm`]      : one completion call per slice; the only stage with
//!    network I/O. Wait times come from [`retry`]
//! 5. [`sanitize`] : strip markdown fences from the reply
//! 6. [`recover`]  : staged JSON repair when the reply does not decode
//! 7. [`normalize`]: map raw objects onto the canonical question schema
//! 8. [`filter`]   : keep choice questions and number them

pub mod chunk;
pub mod filter;
pub mod input;
pub mod llm;
pub mod normalize;
pub mod pdf;
pub mod recover;
pub mod retry;
pub mod sanitize;
