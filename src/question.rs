//! Question data model: converter input records and canonical output records.
//!
//! [`TextRecord`] is what the PDF converter emits (one per text block).
//! [`RawQuestion`] is whatever the model returned for one question candidate,
//! deliberately untyped. [`Question`] is the validated record this crate
//! emits; every free-form string the model produced has been mapped onto
//! [`QuestionType`] / [`Difficulty`] by the time a `Question` exists.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// One text block of a converted document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextRecord {
    #[serde(rename = "type", default = "default_record_type")]
    pub kind: String,
    pub text: String,
    #[serde(
        rename = "text_level",
        alias = "level",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub level: Option<i64>,
    #[serde(
        rename = "page_idx",
        alias = "pageIndex",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub page_index: Option<i64>,
}

fn default_record_type() -> String {
    "text".to_string()
}

impl TextRecord {
    /// A plain `{type: "text", text}` record.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            kind: default_record_type(),
            text: text.into(),
            level: None,
            page_index: None,
        }
    }

    /// Whether the record carries any non-whitespace text.
    pub fn has_text(&self) -> bool {
        !self.text.trim().is_empty()
    }
}

/// One question candidate exactly as the model produced it.
pub type RawQuestion = serde_json::Map<String, serde_json::Value>;

/// Canonical question type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuestionType {
    Single,
    Multiple,
    TrueFalse,
    FillInTheBlank,
    ShortAnswer,
    Calculation,
    Unknown,
}

impl QuestionType {
    /// Translate a free-form type label (Chinese or canonical English).
    ///
    /// Anything unrecognised maps to [`QuestionType::Unknown`].
    pub fn from_label(label: &str) -> Self {
        match label.trim() {
            "单选" | "单选题" | "single" => QuestionType::Single,
            "多选" | "多选题" | "multiple" => QuestionType::Multiple,
            "判断" | "判断题" | "true_false" => QuestionType::TrueFalse,
            "填空题" | "fill_in_the_blank" => QuestionType::FillInTheBlank,
            "简答题" | "short_answer" => QuestionType::ShortAnswer,
            "计算题" | "calculation" => QuestionType::Calculation,
            _ => QuestionType::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            QuestionType::Single => "single",
            QuestionType::Multiple => "multiple",
            QuestionType::TrueFalse => "true_false",
            QuestionType::FillInTheBlank => "fill_in_the_blank",
            QuestionType::ShortAnswer => "short_answer",
            QuestionType::Calculation => "calculation",
            QuestionType::Unknown => "unknown",
        }
    }

    /// Types whose records carry no option list.
    pub fn is_open_ended(&self) -> bool {
        matches!(self, QuestionType::FillInTheBlank | QuestionType::ShortAnswer)
    }

    /// Types the final filter keeps.
    pub fn is_choice(&self) -> bool {
        matches!(self, QuestionType::Single | QuestionType::Multiple)
    }
}

impl fmt::Display for QuestionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Canonical difficulty.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Difficulty {
    Easy,
    #[default]
    Medium,
    Hard,
}

impl Difficulty {
    /// Translate a free-form difficulty label; unrecognised labels are `Medium`.
    pub fn from_label(label: &str) -> Self {
        match label.trim() {
            "简单" | "easy" => Difficulty::Easy,
            "困难" | "hard" => Difficulty::Hard,
            _ => Difficulty::Medium,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Difficulty::Easy => "easy",
            Difficulty::Medium => "medium",
            Difficulty::Hard => "hard",
        }
    }
}

/// One answer option.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestionOption {
    #[serde(alias = "label")]
    pub key: String,
    pub content: String,
}

impl QuestionOption {
    pub fn new(key: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            content: content.into(),
        }
    }
}

/// Attempt counters; always zero at creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionStats {
    #[serde(default)]
    pub total_attempts: u64,
    #[serde(default)]
    pub correct_attempts: u64,
    #[serde(default)]
    pub accuracy: u64,
}

/// A validated question record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Question {
    #[serde(default)]
    pub title: String,
    pub content: String,
    #[serde(rename = "type")]
    pub question_type: QuestionType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<Vec<QuestionOption>>,
    #[serde(default)]
    pub correct_answer: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub explanation: Option<String>,
    #[serde(default)]
    pub difficulty: Difficulty,
    #[serde(default)]
    pub subject: String,
    #[serde(default)]
    pub module: String,
    #[serde(default)]
    pub sub_module: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub order: usize,
    #[serde(default = "default_active")]
    pub is_active: bool,
    #[serde(default)]
    pub stats: QuestionStats,
    #[serde(with = "timestamp")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "timestamp")]
    pub updated_at: DateTime<Utc>,
}

fn default_active() -> bool {
    true
}

/// RFC 3339, UTC, millisecond precision, `Z` suffix.
mod timestamp {
    use chrono::{DateTime, SecondsFormat, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(dt: &DateTime<Utc>, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&dt.to_rfc3339_opts(SecondsFormat::Millis, true))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(d)?;
        DateTime::parse_from_rfc3339(&raw)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(serde::de::Error::custom)
    }
}
