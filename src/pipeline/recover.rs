//! Malformed-JSON recovery: salvage records from text that is only
//! *probably* JSON.
//!
//! Converter dumps that were hand-edited, pasted from a browser console, or
//! truncated mid-write arrive as quasi-JavaScript (`{ type: "text", ... }`),
//! with stray line numbers, or with `…` where the rest of an object used to
//! be. Model replies occasionally show the same damage.
//!
//! Recovery is an ordered list of pure stages. Each stage is a
//! `fn(&str) -> Option<Value>` that either produces a value or declines;
//! [`first_success`] runs them in order and stops at the first that
//! succeeds. Nothing in here returns an error: the worst outcome is an
//! empty list.
//!
//! | Stage            | Input shape                                          |
//! |------------------|------------------------------------------------------|
//! | `decode_direct`  | valid JSON                                           |
//! | `repair_whole`   | one JSON value with bare keys / ellipsis, any layout |
//! | `decode_lines`   | one object per line                                  |
//! | `recover_manual` | anything; per-line salvage                           |

use crate::question::TextRecord;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};
use tracing::{debug, warn};

/// One recovery stage.
type Stage = fn(&str) -> Option<Value>;

/// Stages that repair structure without inventing records. Used for model
/// replies, where manual line salvage would fabricate `{type, text}` objects
/// that are not questions.
const STRUCTURAL_STAGES: &[(&str, Stage)] = &[
    ("direct", decode_direct),
    ("repair", repair_whole),
    ("lines", decode_lines),
];

/// Every stage, including manual per-line salvage.
const ALL_STAGES: &[(&str, Stage)] = &[
    ("direct", decode_direct),
    ("repair", repair_whole),
    ("lines", decode_lines),
    ("manual", recover_manual),
];

/// Run `stages` in order and return the first produced value.
pub fn first_success(input: &str, stages: &[(&str, Stage)]) -> Option<Value> {
    for (name, stage) in stages {
        if let Some(value) = stage(input) {
            debug!("Recovery stage '{}' succeeded", name);
            return Some(value);
        }
        debug!("Recovery stage '{}' declined", name);
    }
    None
}

/// Decode `input`, falling back to structural repair. `None` when nothing
/// parseable remains.
pub fn repair_json(input: &str) -> Option<Value> {
    first_success(input, STRUCTURAL_STAGES)
}

/// Best-effort list of text records from arbitrary text. Never fails.
pub fn recover_records(input: &str) -> Vec<TextRecord> {
    match first_success(input, ALL_STAGES) {
        Some(value) => records_from_value(value),
        None => {
            warn!("No records could be recovered from {} bytes of input", input.len());
            Vec::new()
        }
    }
}

/// Flatten a decoded value into text records.
///
/// * array → object items with a `text` field, plus bare strings
/// * a single object with a `text` field → that record
/// * anything else → one record holding its string form
pub fn records_from_value(value: Value) -> Vec<TextRecord> {
    match value {
        Value::Array(items) => items.into_iter().filter_map(record_from_item).collect(),
        Value::String(s) => vec![TextRecord::text(s)],
        Value::Object(map) if map.contains_key("text") => {
            record_from_item(Value::Object(map)).into_iter().collect()
        }
        other => vec![TextRecord::text(other.to_string())],
    }
}

fn record_from_item(item: Value) -> Option<TextRecord> {
    match item {
        Value::String(s) => Some(TextRecord::text(s)),
        Value::Object(map) => {
            let text = match map.get("text")? {
                Value::String(s) => s.clone(),
                Value::Null => String::new(),
                other => other.to_string(),
            };
            let kind = map
                .get("type")
                .and_then(Value::as_str)
                .unwrap_or("text")
                .to_string();
            let level = map
                .get("text_level")
                .or_else(|| map.get("level"))
                .and_then(Value::as_i64);
            let page_index = map
                .get("page_idx")
                .or_else(|| map.get("pageIndex"))
                .and_then(Value::as_i64);
            Some(TextRecord {
                kind,
                text,
                level,
                page_index,
            })
        }
        _ => None,
    }
}

// ── Stage 1: direct decode ───────────────────────────────────────────────────

fn decode_direct(input: &str) -> Option<Value> {
    serde_json::from_str(input.trim()).ok()
}

// ── Stage 2: whole-payload structural repair ─────────────────────────────────

/// Declines when the repaired text is still not a single JSON value, which
/// is the case for one-object-per-line dumps.
fn repair_whole(input: &str) -> Option<Value> {
    serde_json::from_str(&repair_structure(input.trim())).ok()
}

// ── Stage 3: one object per line ─────────────────────────────────────────────

fn decode_lines(input: &str) -> Option<Value> {
    if !looks_line_delimited(input) {
        return None;
    }
    let objects: Vec<Value> = input
        .lines()
        .filter_map(strip_line_index)
        .filter_map(|line| {
            serde_json::from_str::<Value>(line)
                .ok()
                .or_else(|| serde_json::from_str(&repair_structure(line)).ok())
        })
        .filter(Value::is_object)
        .collect();
    if objects.is_empty() {
        None
    } else {
        Some(Value::Array(objects))
    }
}

/// Multiple lines and not an array literal.
fn looks_line_delimited(input: &str) -> bool {
    let trimmed = input.trim();
    trimmed.contains('\n') && !trimmed.starts_with('[')
}

// ── Stage 4: manual per-line salvage ─────────────────────────────────────────

static RE_RECORD_KEY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"\b(?:type|text)"?\s*:"#).unwrap());

static RE_QUOTED_TEXT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#""text":\s*"([^"]*)""#).unwrap());

static RE_BARE_TEXT: Lazy<Regex> = Lazy::new(|| Regex::new(r#"text:\s*"([^"]*)""#).unwrap());

fn recover_manual(input: &str) -> Option<Value> {
    let mut records = Vec::new();

    for (line_no, raw_line) in input.lines().enumerate() {
        let Some(line) = strip_line_index(raw_line) else {
            continue;
        };
        if !line.starts_with('{') || !RE_RECORD_KEY.is_match(line) {
            continue;
        }

        if let Some(record) = decode_record_line(line) {
            records.push(record);
            continue;
        }

        let captured = RE_QUOTED_TEXT
            .captures(line)
            .or_else(|| RE_BARE_TEXT.captures(line))
            .map(|caps| caps[1].to_string());
        match captured {
            Some(text) if !text.trim().is_empty() => records.push(text_object(text)),
            Some(_) => {}
            None => {
                let excerpt: String = line.chars().take(50).collect();
                warn!("Skipping unrecoverable line {}: {}…", line_no + 1, excerpt);
            }
        }
    }

    if records.is_empty() {
        None
    } else {
        debug!("Manual line recovery salvaged {} records", records.len());
        Some(Value::Array(records))
    }
}

fn decode_record_line(line: &str) -> Option<Value> {
    let mut obj = match serde_json::from_str::<Value>(&repair_structure(line)).ok()? {
        Value::Object(map) => map,
        _ => return None,
    };
    let has_text = obj
        .get("text")
        .and_then(Value::as_str)
        .is_some_and(|t| !t.trim().is_empty());
    if !has_text {
        return None;
    }
    obj.entry("type").or_insert_with(|| Value::String("text".into()));
    Some(Value::Object(obj))
}

fn text_object(text: String) -> Value {
    let mut map = Map::new();
    map.insert("type".into(), Value::String("text".into()));
    map.insert("text".into(), Value::String(text));
    Value::Object(map)
}

/// Trim a line, drop it if blank or a bare index, and strip a leading
/// `N\t` index token.
fn strip_line_index(line: &str) -> Option<&str> {
    let line = line.trim();
    if line.is_empty() || line.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    if let Some((head, rest)) = line.split_once('\t') {
        if !head.is_empty() && head.chars().all(|c| c.is_ascii_digit()) {
            let rest = rest.trim();
            return if rest.is_empty() { None } else { Some(rest) };
        }
    }
    Some(line)
}

// ── Repair rules ─────────────────────────────────────────────────────────────

/// Apply every textual repair rule, in order.
///
/// 1. Quote bare identifier keys after `{` or `,`
/// 2. Drop ellipsis tokens (`…` or `...`) before a closing brace
/// 3. Drop keys whose value is missing
/// 4. Close a string left open before the final `}`
pub fn repair_structure(input: &str) -> String {
    let s = quote_bare_keys(input);
    let s = strip_trailing_ellipsis(&s);
    let s = drop_empty_values(&s);
    close_unterminated_string(&s)
}

static RE_BARE_KEY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"([{,]\s*)([A-Za-z_][A-Za-z0-9_]*)\s*:").unwrap());

fn quote_bare_keys(input: &str) -> String {
    RE_BARE_KEY.replace_all(input, r#"$1"$2":"#).into_owned()
}

static RE_COMMA_ELLIPSIS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r",\s*(?:…|\.\.\.)\s*\}").unwrap());

static RE_ELLIPSIS: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?:…|\.\.\.)\s*\}").unwrap());

fn strip_trailing_ellipsis(input: &str) -> String {
    let s = RE_COMMA_ELLIPSIS.replace_all(input, "}");
    RE_ELLIPSIS.replace_all(&s, "}").into_owned()
}

static RE_EMPTY_MID: Lazy<Regex> = Lazy::new(|| Regex::new(r#",\s*"[^"]*":\s*,"#).unwrap());

static RE_EMPTY_END: Lazy<Regex> = Lazy::new(|| Regex::new(r#",\s*"[^"]*":\s*\}"#).unwrap());

fn drop_empty_values(input: &str) -> String {
    let s = RE_EMPTY_MID.replace_all(input, ",");
    RE_EMPTY_END.replace_all(&s, "}").into_owned()
}

fn close_unterminated_string(input: &str) -> String {
    let trimmed = input.trim_end();
    let Some(body) = trimmed.strip_suffix('}') else {
        return input.to_string();
    };
    let mut quotes = 0usize;
    let mut escaped = false;
    for c in body.chars() {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' => escaped = true,
            '"' => quotes += 1,
            _ => {}
        }
    }
    if quotes % 2 == 1 {
        format!("{}\"}}", body)
    } else {
        input.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn valid_array_decodes_directly() {
        let input = r#"[{"type": "text", "text": "1. 题目"}, "裸字符串"]"#;
        let records = recover_records(input);
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].text, "1. 题目");
        assert_eq!(records[1].kind, "text");
    }

    #[test]
    fn object_items_without_text_are_dropped() {
        let records = records_from_value(json!([{"type": "image"}, {"text": "x"}, 42]));
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].text, "x");
    }

    #[test]
    fn non_array_top_level_becomes_one_record() {
        let records = records_from_value(json!({"k": 1}));
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].text, r#"{"k":1}"#);
    }

    #[test]
    fn single_object_with_text_is_its_own_record() {
        let records = records_from_value(json!({"type": "title", "text": "第一章", "page_idx": 0}));
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].kind, "title");
        assert_eq!(records[0].text, "第一章");
        assert_eq!(records[0].page_index, Some(0));

        let records = records_from_value(json!(17));
        assert_eq!(records, vec![TextRecord::text("17")]);
    }

    #[test]
    fn converter_fields_are_kept() {
        let records = records_from_value(json!([{"type": "text", "text": "t", "text_level": 1, "page_idx": 3}]));
        assert_eq!(records[0].level, Some(1));
        assert_eq!(records[0].page_index, Some(3));
    }

    #[test]
    fn ellipsis_truncated_object_is_repaired() {
        let records = recover_records(r#"{type: "text", text: "Q1…}"#);
        assert_eq!(records, vec![TextRecord::text("Q1")]);
    }

    #[test]
    fn ascii_ellipsis_is_repaired_too() {
        let v = repair_json(r#"{type: "text", text: "Q2"...}"#).unwrap();
        assert_eq!(v, json!({"type": "text", "text": "Q2"}));
    }

    #[test]
    fn bare_keys_array_is_repaired_whole() {
        let v = repair_json(r#"[{type: "text", text: "a"}, {type: "text", text: "b"}]"#).unwrap();
        assert_eq!(v.as_array().map(Vec::len), Some(2));
    }

    #[test]
    fn pretty_printed_bare_keys_are_repaired_whole() {
        let input = "{\n  questions: [\n    {\n      content: \"1. 题干\",\n      correctAnswer: \"A\"\n    }\n  ]\n}";
        let v = repair_json(input).unwrap();
        assert_eq!(v, json!({"questions": [{"content": "1. 题干", "correctAnswer": "A"}]}));
    }

    #[test]
    fn multi_line_object_with_ellipsis_is_repaired_whole() {
        let records = recover_records("{\n  type: \"text\",\n  text: \"Q3\"\n  …}");
        assert_eq!(records, vec![TextRecord::text("Q3")]);
    }

    #[test]
    fn line_delimited_objects_are_collected() {
        let input = "{\"type\": \"text\", \"text\": \"one\"}\n{type: \"text\", text: \"two\"}\nnot json";
        let records = recover_records(input);
        let texts: Vec<_> = records.iter().map(|r| r.text.as_str()).collect();
        assert_eq!(texts, vec!["one", "two"]);
    }

    #[test]
    fn manual_recovery_skips_indices_and_captures_text() {
        let input = "1\n2\t{ type: \"text\", text: \"第一题\" }\n3\t{ type: \"text\", text: \"坏行 \"引号\" }\n\n{ junk";
        let records = records_from_value(recover_manual(input).unwrap());
        let texts: Vec<_> = records.iter().map(|r| r.text.as_str()).collect();
        assert_eq!(texts, vec!["第一题", "坏行 "]);
    }

    #[test]
    fn manual_recovery_runs_when_no_line_decodes() {
        let input = "7\n8\t{ type: \"text\", text: \"坏行 \"引号\" }\n{ junk";
        let records = recover_records(input);
        assert_eq!(records, vec![TextRecord::text("坏行 ")]);
    }

    #[test]
    fn missing_value_keys_are_dropped() {
        let fixed = repair_structure(r#"{"type": "text", "level": , "text": "x", "page":}"#);
        let v: Value = serde_json::from_str(&fixed).unwrap();
        assert_eq!(v, json!({"type": "text", "text": "x"}));
    }

    #[test]
    fn hopeless_input_yields_empty() {
        assert!(recover_records("完全不是JSON\n也没有对象").is_empty());
        assert!(recover_records("").is_empty());
        assert!(repair_json("<html>").is_none());
    }

    #[test]
    fn quoted_keys_are_not_double_quoted() {
        assert_eq!(quote_bare_keys(r#"{"a": 1, b: 2}"#), r#"{"a": 1, "b": 2}"#);
    }

    #[test]
    fn balanced_strings_are_not_closed() {
        assert_eq!(close_unterminated_string(r#"{"a": "b"}"#), r#"{"a": "b"}"#);
        assert_eq!(close_unterminated_string(r#"{"a": "b\"}"#), "{\"a\": \"b\\\"\"}");
    }
}
