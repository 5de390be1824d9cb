//! Completion API interaction: prompt a chunk and parse the reply.
//!
//! This module turns a slice of [`TextRecord`]s into one `POST
//! {api_base}/chat/completions` call and the reply into raw question
//! objects. Prompt text lives in [`crate::prompts`]; retry timing lives in
//! [`super::retry`]. What stays here is the attempt loop and the mapping from
//! HTTP outcomes to failure classes.
//!
//! ## Connection Handling
//!
//! Every attempt builds a fresh `reqwest::Client` with at most
//! `max_keepalive` idle connections (default 0). A connection that stalled
//! once is never handed to the next attempt. A semaphore with
//! `max_connections` permits (default 1) bounds in-flight requests per
//! client.
//!
//! ## Failure Classes
//!
//! | Outcome                         | Handling                          |
//! |---------------------------------|-----------------------------------|
//! | connect / timeout / read error  | retried, exponential backoff      |
//! | HTTP 429                        | retried, backoff + penalty        |
//! | other non-2xx status            | returned at once as `ApiStatus`   |
//! | bad envelope                    | retried, fixed delay              |

use super::recover::repair_json;
use super::retry::{FailureClass, RetryPolicy};
use super::sanitize::sanitize;
use crate::config::ExtractionConfig;
use crate::error::{ExtractError, TransportKind};
use crate::prompts::{numbered_text, user_prompt, DEFAULT_SYSTEM_PROMPT};
use crate::question::{RawQuestion, TextRecord};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::time::sleep;
use tracing::{debug, info, warn};

/// Longest slice of an error body kept in [`ExtractError::ApiStatus`].
const ERROR_BODY_EXCERPT: usize = 200;

// ── Wire types ───────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 2],
    stream: bool,
    max_tokens: u32,
    temperature: f32,
    top_p: f32,
    response_format: ResponseFormat,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ReplyMessage,
}

#[derive(Debug, Deserialize)]
struct ReplyMessage {
    content: Option<String>,
}

/// Why a single attempt ended without content.
enum AttemptError {
    /// Worth another attempt after the policy's delay.
    Retry { class: FailureClass, detail: String },
    /// Give up immediately.
    Fatal(ExtractError),
}

// ── Client ───────────────────────────────────────────────────────────────────

/// Calls the completion endpoint with retries.
///
/// Cheap to clone; clones share the connection semaphore.
#[derive(Clone)]
pub struct ExtractionClient {
    config: ExtractionConfig,
    api_key: String,
    url: String,
    policy: RetryPolicy,
    permits: Arc<Semaphore>,
}

impl ExtractionClient {
    /// Create a client. Fails with [`ExtractError::ApiKeyMissing`] when no
    /// key is configured.
    pub fn new(config: &ExtractionConfig) -> Result<Self, ExtractError> {
        let api_key = config.api_key().ok_or(ExtractError::ApiKeyMissing)?.to_string();
        Ok(Self {
            url: config.completions_url(),
            policy: RetryPolicy::from_config(config),
            permits: Arc::new(Semaphore::new(config.max_connections.max(1))),
            api_key,
            config: config.clone(),
        })
    }

    /// Extract raw question objects from one chunk of records.
    ///
    /// A reply that cannot be decoded even after repair yields an empty
    /// list, not an error.
    pub async fn extract(&self, records: &[TextRecord]) -> Result<Vec<RawQuestion>, ExtractError> {
        match self.complete(records).await? {
            Some(content) => Ok(parse_reply(&content)),
            None => Ok(Vec::new()),
        }
    }

    /// Send the prompt for `records` and return the model's text.
    ///
    /// `Ok(None)` means the call finished without content: either the model
    /// returned a null message or no attempt was configured to run.
    pub async fn complete(&self, records: &[TextRecord]) -> Result<Option<String>, ExtractError> {
        let (numbered, truncated) = numbered_text(records, self.config.max_text_length);
        if truncated {
            warn!(
                "Prompt text exceeds {} characters; the tail is dropped",
                self.config.max_text_length
            );
        }
        let user = user_prompt(&numbered);
        let system = self
            .config
            .system_prompt
            .as_deref()
            .unwrap_or(DEFAULT_SYSTEM_PROMPT);
        let request = build_request(&self.config, system, &user);

        if self.config.warmup_delay_ms > 0 {
            debug!("Warm-up delay {}ms", self.config.warmup_delay_ms);
            sleep(std::time::Duration::from_millis(self.config.warmup_delay_ms)).await;
        }

        for attempt in 0..self.policy.max_attempts {
            debug!(
                "Completion attempt {}/{} ({} records)",
                attempt + 1,
                self.policy.max_attempts,
                records.len()
            );
            match self.attempt(&request).await {
                Ok(content) => {
                    if attempt > 0 {
                        info!("Completion succeeded on attempt {}", attempt + 1);
                    }
                    return Ok(content);
                }
                Err(AttemptError::Fatal(e)) => return Err(e),
                Err(AttemptError::Retry { class, detail }) => {
                    warn!(
                        "Attempt {}/{} failed ({:?}): {}",
                        attempt + 1,
                        self.policy.max_attempts,
                        class,
                        detail
                    );
                    match self.policy.delay_for(attempt, class) {
                        Some(delay) => {
                            warn!(
                                "Retry {}/{} after {}ms",
                                attempt + 2,
                                self.policy.max_attempts,
                                delay.as_millis()
                            );
                            sleep(delay).await;
                        }
                        None => return Err(terminal_error(class, attempt + 1, detail)),
                    }
                }
            }
        }

        warn!("No completion attempt was made; treating the chunk as empty");
        Ok(None)
    }

    async fn attempt(&self, request: &ChatRequest<'_>) -> Result<Option<String>, AttemptError> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|e| AttemptError::Fatal(ExtractError::Internal(e.to_string())))?;

        let timeouts = &self.config.timeouts;
        let client = reqwest::Client::builder()
            .connect_timeout(timeouts.connect())
            .read_timeout(timeouts.read())
            .timeout(timeouts.total())
            .pool_idle_timeout(timeouts.pool())
            .pool_max_idle_per_host(self.config.max_keepalive)
            .build()
            .map_err(|e| AttemptError::Retry {
                class: FailureClass::Other,
                detail: format!("HTTP client setup failed: {e}"),
            })?;

        let response = client
            .post(&self.url)
            .bearer_auth(&self.api_key)
            .json(request)
            .send()
            .await
            .map_err(|e| AttemptError::Retry {
                class: classify(&e),
                detail: e.to_string(),
            })?;

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(AttemptError::Retry {
                class: FailureClass::RateLimited,
                detail: "HTTP 429".into(),
            });
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AttemptError::Fatal(ExtractError::ApiStatus {
                status: status.as_u16(),
                body: body.chars().take(ERROR_BODY_EXCERPT).collect(),
            }));
        }

        let body = response.text().await.map_err(|e| AttemptError::Retry {
            class: if e.is_timeout() {
                FailureClass::Transport(TransportKind::Timeout)
            } else {
                FailureClass::Transport(TransportKind::Read)
            },
            detail: e.to_string(),
        })?;

        let envelope: ChatResponse =
            serde_json::from_str(&body).map_err(|e| AttemptError::Retry {
                class: FailureClass::Other,
                detail: format!("unreadable response envelope: {e}"),
            })?;
        let choice = envelope.choices.into_iter().next().ok_or_else(|| AttemptError::Retry {
            class: FailureClass::Other,
            detail: "response has no choices".into(),
        })?;

        match choice.message.content {
            Some(content) => {
                debug!("Reply: {} chars", content.chars().count());
                Ok(Some(content))
            }
            None => {
                warn!("Model returned a null message");
                Ok(None)
            }
        }
    }
}

fn build_request<'a>(config: &'a ExtractionConfig, system: &'a str, user: &'a str) -> ChatRequest<'a> {
    ChatRequest {
        model: &config.model,
        messages: [
            ChatMessage {
                role: "system",
                content: system,
            },
            ChatMessage {
                role: "user",
                content: user,
            },
        ],
        stream: false,
        max_tokens: config.max_tokens,
        temperature: config.temperature,
        top_p: config.top_p,
        response_format: ResponseFormat {
            kind: "json_object",
        },
    }
}

/// Map a send error onto a failure class.
fn classify(e: &reqwest::Error) -> FailureClass {
    if e.is_timeout() {
        FailureClass::Transport(TransportKind::Timeout)
    } else if e.is_connect() {
        FailureClass::Transport(TransportKind::Connect)
    } else if e.is_request() || e.is_body() {
        FailureClass::Transport(TransportKind::Read)
    } else {
        FailureClass::Other
    }
}

fn terminal_error(class: FailureClass, attempts: u32, detail: String) -> ExtractError {
    match class {
        FailureClass::Transport(kind) => ExtractError::Transport {
            kind,
            attempts,
            detail,
        },
        FailureClass::RateLimited => ExtractError::RateLimited { attempts },
        FailureClass::Other => ExtractError::ApiFailed { attempts, detail },
    }
}

// ── Reply parsing ────────────────────────────────────────────────────────────

/// Turn a model reply into raw question objects.
///
/// Accepts `{"questions": [...]}` or a bare array. Anything else, including
/// text that stays undecodable after repair, yields an empty list.
pub fn parse_reply(content: &str) -> Vec<RawQuestion> {
    let cleaned = sanitize(content);
    if cleaned.is_empty() {
        warn!("Model reply is empty after sanitising");
        return Vec::new();
    }
    let excerpt: String = cleaned.chars().take(500).collect();
    debug!("Sanitised reply ({} chars): {}", cleaned.chars().count(), excerpt);

    let value = match serde_json::from_str::<Value>(&cleaned) {
        Ok(v) => v,
        Err(e) => {
            warn!("Reply is not valid JSON ({}); attempting repair", e);
            match repair_json(&cleaned) {
                Some(v) => v,
                None => {
                    warn!("Reply could not be repaired; no questions extracted");
                    return Vec::new();
                }
            }
        }
    };

    let items = match value {
        Value::Object(mut map) if map.contains_key("questions") => match map.remove("questions") {
            Some(Value::Array(items)) => items,
            _ => {
                warn!("'questions' field is not an array");
                return Vec::new();
            }
        },
        Value::Array(items) => items,
        _ => {
            warn!("Reply has neither a 'questions' array nor a top-level array");
            return Vec::new();
        }
    };

    items
        .into_iter()
        .enumerate()
        .filter_map(|(i, item)| match item {
            Value::Object(map) => Some(map),
            _ => {
                warn!("Reply item {} is not an object; skipped", i + 1);
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn questions_wrapper_is_unwrapped() {
        let raws = parse_reply(r#"{"questions": [{"content": "a"}, {"content": "b"}]}"#);
        assert_eq!(raws.len(), 2);
        assert_eq!(raws[1]["content"], "b");
    }

    #[test]
    fn top_level_array_is_accepted() {
        let raws = parse_reply("```json\n[{\"content\": \"a\"}]\n```");
        assert_eq!(raws.len(), 1);
    }

    #[test]
    fn non_object_items_are_skipped() {
        let raws = parse_reply(r#"[{"content": "a"}, "stray", 3]"#);
        assert_eq!(raws.len(), 1);
    }

    #[test]
    fn repairable_reply_is_repaired() {
        let raws = parse_reply(r#"{questions: [{content: "1. 题干", correctAnswer: "A"}]}"#);
        assert_eq!(raws.len(), 1);
        assert_eq!(raws[0]["correctAnswer"], "A");
    }

    #[test]
    fn pretty_printed_reply_with_bare_keys_is_repaired() {
        let reply = "```json\n{\n  questions: [\n    {\n      content: \"1. 题干\",\n      correctAnswer: \"A\"\n    },\n    {\n      content: \"2. 题干\",\n      correctAnswer: \"B\"\n    }\n  ]\n}\n```";
        let raws = parse_reply(reply);
        assert_eq!(raws.len(), 2);
        assert_eq!(raws[0]["content"], "1. 题干");
        assert_eq!(raws[1]["correctAnswer"], "B");
    }

    #[test]
    fn garbage_reply_is_empty() {
        assert!(parse_reply("抱歉，我无法完成").is_empty());
        assert!(parse_reply("```json\n```").is_empty());
        assert!(parse_reply(r#"{"questions": "none"}"#).is_empty());
        assert!(parse_reply(r#"{"answer": 42}"#).is_empty());
    }

    #[test]
    fn request_body_shape() {
        let config = ExtractionConfig::default();
        let req = build_request(&config, "sys", "usr");
        let v = serde_json::to_value(&req).unwrap();
        assert_eq!(v["model"], "deepseek-v3-0324");
        assert_eq!(v["messages"][0]["role"], "system");
        assert_eq!(v["messages"][1]["content"], "usr");
        assert_eq!(v["stream"], false);
        assert_eq!(v["max_tokens"], 8192);
        assert_eq!(v["response_format"]["type"], "json_object");
    }

    #[test]
    fn terminal_errors_keep_class() {
        let e = terminal_error(FailureClass::Transport(TransportKind::Read), 7, "reset".into());
        assert!(e.is_transport());
        assert!(matches!(
            terminal_error(FailureClass::RateLimited, 7, String::new()),
            ExtractError::RateLimited { attempts: 7 }
        ));
        assert!(matches!(
            terminal_error(FailureClass::Other, 2, "bad".into()),
            ExtractError::ApiFailed { attempts: 2, .. }
        ));
    }

    #[test]
    fn client_requires_api_key() {
        let config = ExtractionConfig::default();
        assert!(matches!(
            ExtractionClient::new(&config),
            Err(ExtractError::ApiKeyMissing)
        ));
        let config = ExtractionConfig::builder().api_key("sk-x").build().unwrap();
        assert!(ExtractionClient::new(&config).is_ok());
    }
}
