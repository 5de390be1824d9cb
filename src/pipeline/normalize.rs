//! Question normalisation: map raw model output onto the canonical schema.
//!
//! The model is asked for a fixed JSON shape but answers with whatever it
//! likes: a bare string where a list belongs, Chinese type names, `isActive:
//! false` on every record, invented attempt counts in `stats`. [`normalize`] fixes all of
//! that in a fixed order, then lets serde validate the result against
//! [`Question`].
//!
//! ## Step Order
//!
//! Later steps read values earlier steps produced, so the order is fixed:
//! 1. Timestamps
//! 2. `correctAnswer` coercion
//! 3. Type/difficulty vocabulary translation
//! 4. Marker-driven type inference (reads the coerced answers)
//! 5. Open-ended types drop their options (reads the inferred type)
//! 6. Defaults for falsy fields
//! 7. Schema validation

use crate::config::ExtractionConfig;
use crate::question::{Difficulty, Question, QuestionType, RawQuestion};
use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{debug, warn};

/// Why a raw record was dropped.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Rejection {
    /// `content` is missing, not a string, or blank.
    #[error("missing or empty content")]
    MissingContent,

    /// A field has the wrong shape for the canonical schema.
    #[error("schema validation failed: {0}")]
    Schema(String),
}

/// Outcome of normalising one model reply.
#[derive(Debug, Clone, Default)]
pub struct NormalizedBatch {
    pub questions: Vec<Question>,
    pub rejected: usize,
}

/// Normalise every record of one reply, dropping the ones that fail.
///
/// All accepted records share one creation timestamp.
pub fn normalize_batch(raws: Vec<RawQuestion>, config: &ExtractionConfig) -> NormalizedBatch {
    let now = Utc::now();
    let mut batch = NormalizedBatch::default();
    for (i, raw) in raws.into_iter().enumerate() {
        match normalize(raw, config, now) {
            Ok(q) => batch.questions.push(q),
            Err(e) => {
                warn!("Record {}: rejected ({})", i + 1, e);
                batch.rejected += 1;
            }
        }
    }
    batch
}

/// Normalise one raw record.
///
/// `now` stamps records whose timestamps are missing or unparseable.
pub fn normalize(
    mut raw: RawQuestion,
    config: &ExtractionConfig,
    now: DateTime<Utc>,
) -> Result<Question, Rejection> {
    let content = match raw.get("content") {
        Some(Value::String(s)) if !s.trim().is_empty() => s.clone(),
        _ => return Err(Rejection::MissingContent),
    };

    // ── Step 1: timestamps ───────────────────────────────────────────────────
    for key in ["createdAt", "updatedAt"] {
        let ts = parse_timestamp(raw.get(key)).unwrap_or(now);
        raw.insert(
            key.into(),
            Value::String(ts.to_rfc3339_opts(SecondsFormat::Millis, true)),
        );
    }

    // ── Step 2: correctAnswer is always a list ───────────────────────────────
    if let Some(answer) = raw.get_mut("correctAnswer") {
        *answer = coerce_answer(answer.take());
    }

    // ── Step 3: vocabulary translation ───────────────────────────────────────
    if let Some(t) = raw.get_mut("type") {
        let mapped = t.as_str().map(QuestionType::from_label).unwrap_or(QuestionType::Unknown);
        *t = Value::String(mapped.as_str().into());
    }
    if let Some(d) = raw.get_mut("difficulty") {
        let mapped = d.as_str().map(Difficulty::from_label).unwrap_or_default();
        *d = Value::String(mapped.as_str().into());
    }

    // ── Step 4: content markers and answer count decide the type ─────────────
    if content.contains(&config.judgment_marker) && !has_true_false_options(&raw, config) {
        debug!("Synthesising true/false options");
        raw.insert(
            "options".into(),
            json!([
                {"key": "A", "content": config.true_label},
                {"key": "B", "content": config.false_label},
            ]),
        );
    }
    let inferred = infer_type(&raw, &content, config);
    raw.insert("type".into(), Value::String(inferred.as_str().into()));

    // ── Step 5: open-ended types carry no options ────────────────────────────
    if inferred.is_open_ended() {
        raw.insert("options".into(), Value::Null);
        let unanswered = raw
            .get("correctAnswer")
            .and_then(Value::as_array)
            .is_some_and(Vec::is_empty);
        if unanswered {
            let excerpt: String = content.chars().take(50).collect();
            warn!("Question '{}…' has no correct answer", excerpt);
        }
    }

    // ── Step 6: defaults ─────────────────────────────────────────────────────
    apply_defaults(&mut raw, config);
    reset_stats(&mut raw);

    // ── Step 7: schema validation ────────────────────────────────────────────
    // Position is assigned by the final filter.
    raw.remove("order");
    serde_json::from_value::<Question>(Value::Object(raw))
        .map_err(|e| Rejection::Schema(e.to_string()))
}

/// Parse an ISO-8601 timestamp; naive values are taken as UTC.
fn parse_timestamp(value: Option<&Value>) -> Option<DateTime<Utc>> {
    let s = value?.as_str()?.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
        .map(|naive| naive.and_utc())
}

/// A bare string becomes a one-element list; any other non-list is empty.
pub fn coerce_answer(value: Value) -> Value {
    match value {
        Value::Array(items) => Value::Array(items),
        Value::String(s) => Value::Array(vec![Value::String(s)]),
        _ => Value::Array(Vec::new()),
    }
}

fn has_true_false_options(raw: &RawQuestion, config: &ExtractionConfig) -> bool {
    let Some(options) = raw.get("options").and_then(Value::as_array) else {
        return false;
    };
    let contains = |label: &str| {
        options.iter().any(|opt| {
            opt.get("content")
                .and_then(Value::as_str)
                .is_some_and(|c| c.contains(label))
        })
    };
    contains(config.true_label.as_str()) && contains(config.false_label.as_str())
}

fn infer_type(raw: &RawQuestion, content: &str, config: &ExtractionConfig) -> QuestionType {
    if content.contains(&config.multiple_marker) {
        return QuestionType::Multiple;
    }
    let answers = raw
        .get("correctAnswer")
        .and_then(Value::as_array)
        .map_or(0, Vec::len);
    if answers > 1 {
        return QuestionType::Multiple;
    }
    let has_options = raw
        .get("options")
        .and_then(Value::as_array)
        .is_some_and(|o| !o.is_empty());
    if has_options {
        QuestionType::Single
    } else {
        QuestionType::ShortAnswer
    }
}

fn is_falsy(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => true,
        Some(Value::Bool(b)) => !b,
        Some(Value::Number(n)) => n.as_f64() == Some(0.0),
        Some(Value::String(s)) => s.is_empty(),
        Some(Value::Array(a)) => a.is_empty(),
        Some(Value::Object(o)) => o.is_empty(),
    }
}

fn apply_defaults(raw: &mut RawQuestion, config: &ExtractionConfig) {
    let d = &config.defaults;
    let defaults: [(&str, Value); 8] = [
        ("title", json!(d.title)),
        ("subject", json!(d.subject)),
        ("module", json!(d.module)),
        ("subModule", json!(d.sub_module)),
        ("difficulty", json!(d.difficulty.as_str())),
        ("tags", json!(d.tags)),
        ("isActive", json!(d.is_active)),
        ("stats", json!({"totalAttempts": 0, "correctAttempts": 0, "accuracy": 0})),
    ];
    for (key, value) in defaults {
        if is_falsy(raw.get(key)) {
            raw.insert(key.into(), value);
        }
    }
}

/// A new question has never been attempted; whatever the model put in
/// `stats` is discarded.
fn reset_stats(raw: &mut RawQuestion) {
    raw.insert(
        "stats".into(),
        json!({"totalAttempts": 0, "correctAttempts": 0, "accuracy": 0}),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::question::{QuestionOption, QuestionStats};
    use chrono::TimeZone;

    fn raw(v: Value) -> RawQuestion {
        match v {
            Value::Object(m) => m,
            _ => panic!("test fixture must be an object"),
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap()
    }

    fn run(v: Value) -> Result<Question, Rejection> {
        normalize(raw(v), &ExtractionConfig::default(), now())
    }

    #[test]
    fn answer_coercion() {
        assert_eq!(coerce_answer(json!("X")), json!(["X"]));
        assert_eq!(coerce_answer(json!(["X", "Y"])), json!(["X", "Y"]));
        assert_eq!(coerce_answer(Value::Null), json!([]));
        assert_eq!(coerce_answer(json!(3)), json!([]));
    }

    #[test]
    fn bare_string_answer_becomes_list() {
        let q = run(json!({
            "content": "1. 下列哪项正确",
            "options": [{"key": "A", "content": "甲"}, {"key": "B", "content": "乙"}],
            "correctAnswer": "B"
        }))
        .unwrap();
        assert_eq!(q.correct_answer, vec!["B".to_string()]);
        assert_eq!(q.question_type, QuestionType::Single);
    }

    #[test]
    fn judgment_marker_synthesises_options() {
        let q = run(json!({
            "content": "【判断】合同自成立时生效。",
            "correctAnswer": ["A"]
        }))
        .unwrap();
        assert_eq!(
            q.options,
            Some(vec![QuestionOption::new("A", "正确"), QuestionOption::new("B", "错误")])
        );
        assert_eq!(q.question_type, QuestionType::Single);
    }

    #[test]
    fn judgment_options_kept_when_both_labels_present() {
        let q = run(json!({
            "content": "【判断】题干",
            "options": [{"key": "A", "content": "说法正确"}, {"key": "B", "content": "说法错误"}],
            "correctAnswer": ["B"]
        }))
        .unwrap();
        assert_eq!(q.options.unwrap()[0].content, "说法正确");
    }

    #[test]
    fn judgment_options_rebuilt_when_one_label_missing() {
        let q = run(json!({
            "content": "【判断】题干",
            "options": [{"key": "A", "content": "正确"}, {"key": "B", "content": "不对"}],
        }))
        .unwrap();
        assert_eq!(q.options.unwrap()[1].content, "错误");
    }

    #[test]
    fn multiple_marker_wins_over_answer_count() {
        let q = run(json!({
            "content": "【多选】以下哪些属于物权",
            "options": [{"key": "A", "content": "所有权"}],
            "correctAnswer": ["A"],
            "type": "单选"
        }))
        .unwrap();
        assert_eq!(q.question_type, QuestionType::Multiple);
    }

    #[test]
    fn several_answers_force_multiple() {
        let q = run(json!({
            "content": "以下哪些正确",
            "options": [{"key": "A", "content": "a"}, {"key": "B", "content": "b"}],
            "correctAnswer": ["A", "B"]
        }))
        .unwrap();
        assert_eq!(q.question_type, QuestionType::Multiple);
    }

    #[test]
    fn no_options_downgrades_to_short_answer() {
        let q = run(json!({"content": "简述物权法定原则", "options": [], "correctAnswer": []})).unwrap();
        assert_eq!(q.question_type, QuestionType::ShortAnswer);
        assert_eq!(q.options, None);
    }

    #[test]
    fn defaults_replace_falsy_fields() {
        let q = run(json!({
            "content": "题干",
            "options": [{"key": "A", "content": "a"}],
            "title": "",
            "isActive": false,
            "tags": [],
            "difficulty": "很难"
        }))
        .unwrap();
        assert_eq!(q.title, "法律刷题课");
        assert_eq!(q.subject, "gongji");
        assert_eq!(q.module, "law");
        assert!(q.is_active);
        assert_eq!(q.tags, vec!["法律".to_string()]);
        assert_eq!(q.difficulty, Difficulty::Medium);
    }

    #[test]
    fn difficulty_label_is_translated() {
        let q = run(json!({"content": "题干", "options": [{"key": "A", "content": "a"}], "difficulty": "困难"}))
            .unwrap();
        assert_eq!(q.difficulty, Difficulty::Hard);
    }

    #[test]
    fn timestamps_parse_or_fall_back() {
        let q = run(json!({
            "content": "题干",
            "options": [{"key": "A", "content": "a"}],
            "createdAt": "2024-01-02T03:04:05Z",
            "updatedAt": "not a date"
        }))
        .unwrap();
        assert_eq!(q.created_at, Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap());
        assert_eq!(q.updated_at, now());
    }

    #[test]
    fn naive_timestamp_is_utc() {
        let parsed = parse_timestamp(Some(&json!("2024-01-02T03:04:05.250"))).unwrap();
        assert_eq!(parsed.timestamp_millis() % 1000, 250);
    }

    #[test]
    fn model_supplied_stats_are_zeroed() {
        let q = run(json!({
            "content": "题干",
            "options": [{"key": "A", "content": "a"}],
            "stats": {"totalAttempts": 3.0, "correctAttempts": 2, "accuracy": 66.7}
        }))
        .unwrap();
        assert_eq!(q.stats, QuestionStats::default());

        let q = run(json!({"content": "题干", "options": [{"key": "A", "content": "a"}], "stats": "n/a"})).unwrap();
        assert_eq!(q.stats.accuracy, 0);
    }

    #[test]
    fn missing_content_is_rejected() {
        assert_eq!(run(json!({"content": ""})).unwrap_err(), Rejection::MissingContent);
        assert_eq!(run(json!({"options": []})).unwrap_err(), Rejection::MissingContent);
        assert_eq!(run(json!({"content": 5})).unwrap_err(), Rejection::MissingContent);
    }

    #[test]
    fn wrong_field_shape_is_rejected() {
        let err = run(json!({"content": "题干", "options": [{"key": "A"}]})).unwrap_err();
        assert!(matches!(err, Rejection::Schema(_)));
    }

    #[test]
    fn batch_counts_rejections() {
        let raws = vec![
            raw(json!({"content": "好题", "options": [{"key": "A", "content": "a"}]})),
            raw(json!({"content": "  "})),
        ];
        let batch = normalize_batch(raws, &ExtractionConfig::default());
        assert_eq!(batch.questions.len(), 1);
        assert_eq!(batch.rejected, 1);
    }
}
