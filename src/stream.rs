//! Streaming extraction API: emit chunk results as they complete.
//!
//! A chunked document takes minutes: every chunk is one completion call
//! plus the inter-chunk delay. [`extract_stream`] yields each
//! [`ChunkResult`] as soon as its call returns, so callers can show partial
//! results or write them out incrementally.
//!
//! Chunks run one at a time, in index order, with the same delays as
//! [`crate::extract::extract_records`]. Nothing is written to disk and the
//! final filter is not applied: each item carries the chunk's normalised
//! questions as the model produced them.

use crate::config::ExtractionConfig;
use crate::error::{ChunkError, ExtractError};
use crate::extract::{extract_chunk, plan_for};
use crate::output::{ChunkResult, ExtractionPlan};
use crate::pipeline::chunk::partition;
use crate::pipeline::llm::ExtractionClient;
use crate::question::TextRecord;
use futures::stream::{self, StreamExt};
use std::pin::Pin;
use std::time::Duration;
use tokio_stream::Stream;
use tracing::{debug, info};

/// A boxed stream of chunk results.
pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<ChunkResult, ChunkError>> + Send>>;

/// Extract questions from one document, streaming chunk results in order.
///
/// A document that fits the direct path yields exactly one item; a document
/// with no text yields none.
///
/// # Returns
/// - `Ok(ChunkStream)`: a stream of `Result<ChunkResult, ChunkError>`
/// - `Err(ExtractError)`: fatal error (missing API key)
///
/// # Example
/// ```rust,no_run
/// use pdf2questions::{extract_stream, ExtractionConfig, TextRecord};
/// use futures::StreamExt;
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let config = ExtractionConfig::builder().api_key("sk-...").build()?;
/// let records = vec![TextRecord::text("1. 下列说法正确的是（ ）")];
/// let mut stream = extract_stream("paper", records, &config).await?;
/// while let Some(chunk) = stream.next().await {
///     match chunk {
///         Ok(c) => println!("chunk {}: {} questions", c.index, c.questions.len()),
///         Err(e) => eprintln!("{e}"),
///     }
/// }
/// # Ok(())
/// # }
/// ```
pub async fn extract_stream(
    name: impl Into<String>,
    records: Vec<TextRecord>,
    config: &ExtractionConfig,
) -> Result<ChunkStream, ExtractError> {
    let name = name.into();
    let client = ExtractionClient::new(config)?;

    if !records.iter().any(|r| r.has_text()) {
        info!("'{}': no text to extract", name);
        return Ok(Box::pin(stream::empty()));
    }

    let parts: Vec<Vec<TextRecord>> = match plan_for(&records, config) {
        ExtractionPlan::Direct => vec![records],
        ExtractionPlan::Chunked { .. } => partition(&records, config.chunk_size)
            .into_iter()
            .map(<[TextRecord]>::to_vec)
            .collect(),
    };
    let total = parts.len();
    info!("Streaming '{}' in {} chunk(s)", name, total);

    let config_clone = config.clone();
    let s = stream::iter(parts.into_iter().enumerate()).then(move |(i, part)| {
        let client = client.clone();
        let cfg = config_clone.clone();
        let name = name.clone();
        async move {
            if i > 0 && cfg.chunk_delay_ms > 0 {
                debug!("Inter-chunk delay {}ms", cfg.chunk_delay_ms);
                tokio::time::sleep(Duration::from_millis(cfg.chunk_delay_ms)).await;
            }
            let (mut result, failure) = extract_chunk(&client, &name, i + 1, total, &part, &cfg).await;
            match result.error.take() {
                None => Ok(result),
                Some(err) => {
                    if failure.is_some_and(|e| e.is_transport()) && cfg.network_error_delay_ms > 0 {
                        tokio::time::sleep(Duration::from_millis(cfg.network_error_delay_ms)).await;
                    }
                    Err(err)
                }
            }
        }
    });

    Ok(Box::pin(s))
}
