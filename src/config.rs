//! Configuration types for question extraction.
//!
//! All extraction behaviour is controlled through [`ExtractionConfig`], built
//! via its [`ExtractionConfigBuilder`]. The value is immutable once built and
//! is passed by reference into every pipeline stage; nothing in the crate
//! reads ambient global state or environment variables on its own.
//!
//! # Design choice: builder over constructor
//! The completion API alone needs a dozen knobs (timeouts, delays, sampling
//! parameters). The builder lets callers set only what they care about and
//! rely on documented defaults for the rest.

use crate::error::ExtractError;
use crate::progress::ProgressCallback;
use crate::question::Difficulty;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Default completion endpoint base URL.
pub const DEFAULT_API_BASE: &str = "https://api.qnaigc.com/v1";

/// Default model identifier.
pub const DEFAULT_MODEL: &str = "deepseek-v3-0324";

/// Configuration for a question-extraction run.
///
/// Built via [`ExtractionConfig::builder()`] or using
/// [`ExtractionConfig::default()`].
///
/// # Example
/// ```rust
/// use pdf2questions::ExtractionConfig;
///
/// let config = ExtractionConfig::builder()
///     .api_key("sk-test")
///     .model("deepseek-v3-0324")
///     .chunk_size(40)
///     .build()
///     .unwrap();
/// assert_eq!(config.chunk_size, 40);
/// ```
#[derive(Clone)]
pub struct ExtractionConfig {
    /// Base URL of the OpenAI-compatible API; `/chat/completions` is appended.
    pub api_base: String,

    /// Model identifier sent with every request.
    pub model: String,

    /// Bearer token. Required before any completion call is made.
    pub api_key: Option<String>,

    /// Maximum tokens the model may generate per call. Default: 8192.
    ///
    /// A 50-record chunk of a dense exam paper can yield 20+ questions with
    /// explanations; 8 192 tokens keeps the JSON from being cut mid-object.
    pub max_tokens: u32,

    /// Sampling temperature. Default: 0.1.
    pub temperature: f32,

    /// Nucleus sampling cut-off. Default: 0.9.
    pub top_p: f32,

    /// Maximum characters of numbered chunk text embedded in one prompt.
    /// Default: 20 000. Text beyond the limit is dropped silently.
    pub max_text_length: usize,

    /// Total completion attempts per call (not re-tries on top). Default: 7.
    pub max_retries: u32,

    /// Base delay for exponential backoff, in ms. Default: 5 000.
    ///
    /// Attempt `n` (0-based) waits `retry_delay_ms * 2^n` after a transport
    /// or rate-limit failure; other failures wait exactly `retry_delay_ms`.
    pub retry_delay_ms: u64,

    /// Extra fixed penalty added to the backoff after HTTP 429, in ms. Default: 5 000.
    pub rate_limit_penalty_ms: u64,

    /// Extra delay after a read-stall failure, in ms. Default: 15 000.
    ///
    /// Read stalls on long-haul links tend to last longer than connect
    /// failures, so they get a longer pause before the next attempt. The
    /// orchestrator also waits this long after a chunk fails on transport.
    pub network_error_delay_ms: u64,

    /// Pause before the very first attempt of every call, in ms. Default: 2 000.
    pub warmup_delay_ms: u64,

    /// Pause between successive chunks of one document, in ms. Default: 8 000.
    ///
    /// This is the throttle that keeps a large document under the API's rate
    /// limit; it is why chunks are never processed concurrently.
    pub chunk_delay_ms: u64,

    /// HTTP timeouts for each completion call.
    pub timeouts: HttpTimeouts,

    /// Maximum concurrent in-flight completion requests per client. Default: 1.
    pub max_connections: usize,

    /// Idle connections kept for reuse. Default: 0 (fresh connection per attempt).
    ///
    /// Reusing a connection that stalled once tends to stall again on some
    /// network paths; with no idle pool every retry opens a new one.
    pub max_keepalive: usize,

    /// Maximum text records per chunk. Default: 50.
    pub chunk_size: usize,

    /// Largest non-blank record count processed in a single call. Default: 50.
    pub direct_max_lines: usize,

    /// Largest total character count processed in a single call. Default: 15 000.
    pub direct_max_chars: usize,

    /// Content marker for true/false ("judgment") questions. Default: `【判断】`.
    pub judgment_marker: String,

    /// Content marker forcing the multiple-choice type. Default: `【多选】`.
    pub multiple_marker: String,

    /// Option texts synthesised for true/false questions. Default: `正确` / `错误`.
    pub true_label: String,
    pub false_label: String,

    /// Values injected into empty fields of every question.
    pub defaults: QuestionDefaults,

    /// Parent directory for per-document chunk workspaces.
    /// If None, the system temp directory is used.
    pub work_dir: Option<PathBuf>,

    /// Custom system prompt. If None, uses built-in default.
    pub system_prompt: Option<String>,

    /// External PDF→JSON converter executable. Default: `magic-pdf`.
    pub converter_program: String,

    /// Converter parsing mode.
    pub pdf_mode: PdfMode,

    /// Optional progress observer.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            api_base: DEFAULT_API_BASE.to_string(),
            model: DEFAULT_MODEL.to_string(),
            api_key: None,
            max_tokens: 8192,
            temperature: 0.1,
            top_p: 0.9,
            max_text_length: 20_000,
            max_retries: 7,
            retry_delay_ms: 5_000,
            rate_limit_penalty_ms: 5_000,
            network_error_delay_ms: 15_000,
            warmup_delay_ms: 2_000,
            chunk_delay_ms: 8_000,
            timeouts: HttpTimeouts::default(),
            max_connections: 1,
            max_keepalive: 0,
            chunk_size: 50,
            direct_max_lines: 50,
            direct_max_chars: 15_000,
            judgment_marker: "【判断】".to_string(),
            multiple_marker: "【多选】".to_string(),
            true_label: "正确".to_string(),
            false_label: "错误".to_string(),
            defaults: QuestionDefaults::default(),
            work_dir: None,
            system_prompt: None,
            converter_program: "magic-pdf".to_string(),
            pdf_mode: PdfMode::default(),
            progress_callback: None,
        }
    }
}

impl fmt::Debug for ExtractionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtractionConfig")
            .field("api_base", &self.api_base)
            .field("model", &self.model)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("max_tokens", &self.max_tokens)
            .field("temperature", &self.temperature)
            .field("top_p", &self.top_p)
            .field("max_text_length", &self.max_text_length)
            .field("max_retries", &self.max_retries)
            .field("retry_delay_ms", &self.retry_delay_ms)
            .field("chunk_delay_ms", &self.chunk_delay_ms)
            .field("timeouts", &self.timeouts)
            .field("max_connections", &self.max_connections)
            .field("chunk_size", &self.chunk_size)
            .field("defaults", &self.defaults)
            .field("work_dir", &self.work_dir)
            .field("pdf_mode", &self.pdf_mode)
            .field(
                "progress_callback",
                &self.progress_callback.as_ref().map(|_| "<dyn ExtractionProgressCallback>"),
            )
            .finish()
    }
}

impl ExtractionConfig {
    /// Create a new builder for `ExtractionConfig`.
    pub fn builder() -> ExtractionConfigBuilder {
        ExtractionConfigBuilder {
            config: Self::default(),
        }
    }

    /// The API key, if one is set and non-blank.
    pub fn api_key(&self) -> Option<&str> {
        self.api_key.as_deref().filter(|k| !k.trim().is_empty())
    }

    /// Full URL of the chat-completions endpoint.
    pub fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.api_base.trim_end_matches('/'))
    }
}

/// Builder for [`ExtractionConfig`].
#[derive(Debug)]
pub struct ExtractionConfigBuilder {
    config: ExtractionConfig,
}

impl ExtractionConfigBuilder {
    pub fn api_base(mut self, url: impl Into<String>) -> Self {
        self.config.api_base = url.into();
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = model.into();
        self
    }

    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.config.api_key = Some(key.into());
        self
    }

    pub fn max_tokens(mut self, n: u32) -> Self {
        self.config.max_tokens = n;
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn top_p(mut self, p: f32) -> Self {
        self.config.top_p = p.clamp(0.0, 1.0);
        self
    }

    pub fn max_text_length(mut self, n: usize) -> Self {
        self.config.max_text_length = n;
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.config.max_retries = n;
        self
    }

    pub fn retry_delay_ms(mut self, ms: u64) -> Self {
        self.config.retry_delay_ms = ms;
        self
    }

    pub fn rate_limit_penalty_ms(mut self, ms: u64) -> Self {
        self.config.rate_limit_penalty_ms = ms;
        self
    }

    pub fn network_error_delay_ms(mut self, ms: u64) -> Self {
        self.config.network_error_delay_ms = ms;
        self
    }

    pub fn warmup_delay_ms(mut self, ms: u64) -> Self {
        self.config.warmup_delay_ms = ms;
        self
    }

    pub fn chunk_delay_ms(mut self, ms: u64) -> Self {
        self.config.chunk_delay_ms = ms;
        self
    }

    /// Zero every delay. Intended for tests and local mock servers.
    pub fn no_delays(mut self) -> Self {
        self.config.retry_delay_ms = 0;
        self.config.rate_limit_penalty_ms = 0;
        self.config.network_error_delay_ms = 0;
        self.config.warmup_delay_ms = 0;
        self.config.chunk_delay_ms = 0;
        self
    }

    pub fn timeouts(mut self, timeouts: HttpTimeouts) -> Self {
        self.config.timeouts = timeouts;
        self
    }

    pub fn max_connections(mut self, n: usize) -> Self {
        self.config.max_connections = n;
        self
    }

    pub fn max_keepalive(mut self, n: usize) -> Self {
        self.config.max_keepalive = n;
        self
    }

    pub fn chunk_size(mut self, n: usize) -> Self {
        self.config.chunk_size = n;
        self
    }

    pub fn direct_limits(mut self, max_lines: usize, max_chars: usize) -> Self {
        self.config.direct_max_lines = max_lines;
        self.config.direct_max_chars = max_chars;
        self
    }

    pub fn judgment_marker(mut self, marker: impl Into<String>) -> Self {
        self.config.judgment_marker = marker.into();
        self
    }

    pub fn multiple_marker(mut self, marker: impl Into<String>) -> Self {
        self.config.multiple_marker = marker.into();
        self
    }

    pub fn true_false_labels(mut self, yes: impl Into<String>, no: impl Into<String>) -> Self {
        self.config.true_label = yes.into();
        self.config.false_label = no.into();
        self
    }

    pub fn defaults(mut self, defaults: QuestionDefaults) -> Self {
        self.config.defaults = defaults;
        self
    }

    pub fn work_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.work_dir = Some(dir.into());
        self
    }

    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.system_prompt = Some(prompt.into());
        self
    }

    pub fn converter_program(mut self, program: impl Into<String>) -> Self {
        self.config.converter_program = program.into();
        self
    }

    pub fn pdf_mode(mut self, mode: PdfMode) -> Self {
        self.config.pdf_mode = mode;
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ExtractionConfig, ExtractError> {
        let c = &self.config;
        if c.api_base.trim().is_empty() {
            return Err(ExtractError::InvalidConfig("API base URL must not be empty".into()));
        }
        if c.model.trim().is_empty() {
            return Err(ExtractError::InvalidConfig("Model name must not be empty".into()));
        }
        if c.max_retries == 0 {
            return Err(ExtractError::InvalidConfig("max_retries must be ≥ 1".into()));
        }
        if c.chunk_size == 0 {
            return Err(ExtractError::InvalidConfig("chunk_size must be ≥ 1".into()));
        }
        if c.max_connections == 0 {
            return Err(ExtractError::InvalidConfig("max_connections must be ≥ 1".into()));
        }
        if c.max_text_length == 0 {
            return Err(ExtractError::InvalidConfig("max_text_length must be ≥ 1".into()));
        }
        let t = &c.timeouts;
        if [t.connect_secs, t.read_secs, t.write_secs, t.pool_secs]
            .iter()
            .any(|s| s.is_nan() || *s < 0.0)
        {
            return Err(ExtractError::InvalidConfig(
                "timeouts must be non-negative numbers of seconds".into(),
            ));
        }
        Ok(self.config)
    }
}

// ── Nested settings ──────────────────────────────────────────────────────

/// Per-call HTTP timeouts, in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HttpTimeouts {
    pub connect_secs: f64,
    pub read_secs: f64,
    pub write_secs: f64,
    pub pool_secs: f64,
}

impl Default for HttpTimeouts {
    fn default() -> Self {
        Self {
            connect_secs: 60.0,
            read_secs: 180.0,
            write_secs: 60.0,
            pool_secs: 300.0,
        }
    }
}

impl HttpTimeouts {
    pub fn connect(&self) -> Duration {
        secs(self.connect_secs)
    }

    pub fn read(&self) -> Duration {
        secs(self.read_secs)
    }

    pub fn pool(&self) -> Duration {
        secs(self.pool_secs)
    }

    /// Whole-request ceiling: connect, send the body, then read the reply.
    pub fn total(&self) -> Duration {
        secs(self.connect_secs + self.write_secs + self.read_secs)
    }
}

/// Negative and NaN values mean zero; values too large for a `Duration`
/// (including infinity) saturate.
fn secs(s: f64) -> Duration {
    if s.is_nan() || s <= 0.0 {
        return Duration::ZERO;
    }
    Duration::try_from_secs_f64(s).unwrap_or(Duration::MAX)
}

/// Values injected into empty fields of every normalised question.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestionDefaults {
    pub title: String,
    pub subject: String,
    pub module: String,
    pub sub_module: String,
    pub difficulty: Difficulty,
    pub tags: Vec<String>,
    pub is_active: bool,
}

impl Default for QuestionDefaults {
    fn default() -> Self {
        Self {
            title: "法律刷题课".to_string(),
            subject: "gongji".to_string(),
            module: "law".to_string(),
            sub_module: String::new(),
            difficulty: Difficulty::Medium,
            tags: vec!["法律".to_string()],
            is_active: true,
        }
    }
}

/// Parsing mode passed to the PDF converter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PdfMode {
    /// Let the converter choose between text extraction and OCR. (default)
    #[default]
    Auto,
    /// Embedded text layer only.
    Txt,
    /// Force OCR.
    Ocr,
}

impl PdfMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            PdfMode::Auto => "auto",
            PdfMode::Txt => "txt",
            PdfMode::Ocr => "ocr",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_deployment() {
        let c = ExtractionConfig::default();
        assert_eq!(c.max_retries, 7);
        assert_eq!(c.chunk_size, 50);
        assert_eq!(c.max_text_length, 20_000);
        assert_eq!(c.max_connections, 1);
        assert_eq!(c.max_keepalive, 0);
        assert_eq!(c.defaults.tags, vec!["法律".to_string()]);
    }

    #[test]
    fn build_rejects_zero_retries() {
        let err = ExtractionConfig::builder().max_retries(0).build().unwrap_err();
        assert!(err.to_string().contains("max_retries"));
    }

    #[test]
    fn build_rejects_zero_chunk_size() {
        assert!(ExtractionConfig::builder().chunk_size(0).build().is_err());
    }

    #[test]
    fn sampling_params_are_clamped() {
        let c = ExtractionConfig::builder()
            .temperature(5.0)
            .top_p(-1.0)
            .build()
            .unwrap();
        assert_eq!(c.temperature, 2.0);
        assert_eq!(c.top_p, 0.0);
    }

    #[test]
    fn completions_url_tolerates_trailing_slash() {
        let c = ExtractionConfig::builder()
            .api_base("http://localhost:8080/v1/")
            .build()
            .unwrap();
        assert_eq!(c.completions_url(), "http://localhost:8080/v1/chat/completions");
    }

    #[test]
    fn blank_api_key_counts_as_missing() {
        let c = ExtractionConfig::builder().api_key("   ").build().unwrap();
        assert!(c.api_key().is_none());
    }

    #[test]
    fn debug_redacts_api_key() {
        let c = ExtractionConfig::builder().api_key("sk-secret").build().unwrap();
        let dbg = format!("{c:?}");
        assert!(!dbg.contains("sk-secret"));
        assert!(dbg.contains("<redacted>"));
    }

    #[test]
    fn no_delays_zeroes_everything() {
        let c = ExtractionConfig::builder().no_delays().build().unwrap();
        assert_eq!(c.retry_delay_ms + c.rate_limit_penalty_ms + c.network_error_delay_ms, 0);
        assert_eq!(c.warmup_delay_ms + c.chunk_delay_ms, 0);
    }

    #[test]
    fn infinite_timeouts_saturate() {
        let t = HttpTimeouts {
            read_secs: f64::INFINITY,
            write_secs: f64::MAX,
            ..HttpTimeouts::default()
        };
        assert_eq!(t.read(), Duration::MAX);
        assert_eq!(t.total(), Duration::MAX);
        assert_eq!(t.connect(), Duration::from_secs(60));

        let config = ExtractionConfig::builder().timeouts(t).build().unwrap();
        assert_eq!(config.timeouts.read(), Duration::MAX);
    }

    #[test]
    fn nan_or_negative_timeouts_are_rejected() {
        for bad in [f64::NAN, -1.0] {
            let t = HttpTimeouts {
                connect_secs: bad,
                ..HttpTimeouts::default()
            };
            assert!(matches!(
                ExtractionConfig::builder().timeouts(t).build(),
                Err(ExtractError::InvalidConfig(_))
            ));
        }
    }

    #[test]
    fn total_timeout_sums_phases() {
        let t = HttpTimeouts::default();
        assert_eq!(t.total(), Duration::from_secs(300));
    }
}
