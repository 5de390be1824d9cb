//! Response sanitising: isolate the JSON payload in a model reply.
//!
//! The system prompt asks for bare JSON, and `response_format: json_object`
//! is requested, yet replies still arrive wrapped in ```` ```json ```` fences
//! or with a stray `json` language tag on its own line. This module removes
//! that wrapping without touching the payload.
//!
//! ## Idempotence
//!
//! One cleaning pass can expose a new fence (a line such as `}```` keeps its
//! fence after the line filter, and only the next pass's suffix rule removes
//! it). [`sanitize`] therefore repeats the pass until the text stops
//! changing. Every pass either returns its input unchanged or strictly
//! shortens it, so the loop terminates.

/// Strip code fences and language tags from a raw model reply.
///
/// Applied repeatedly until a fixpoint:
/// 1. Trim, then drop a leading ```` ```json ```` or ```` ``` ```` marker
/// 2. Drop a trailing ```` ``` ```` marker
/// 3. Trim every line; drop blank lines, fence lines and bare `json` lines
/// 4. Rejoin with `\n` and trim
///
/// An empty result means the reply had no extractable content.
pub fn sanitize(raw: &str) -> String {
    let mut current = sanitize_once(raw);
    loop {
        let next = sanitize_once(&current);
        if next == current {
            return current;
        }
        current = next;
    }
}

fn sanitize_once(raw: &str) -> String {
    let mut content = raw.trim();

    // ── Rule 1: leading fence ────────────────────────────────────────────────
    if let Some(rest) = content.strip_prefix("```json") {
        content = rest;
    } else if let Some(rest) = content.strip_prefix("```") {
        content = rest;
    }

    // ── Rule 2: trailing fence ───────────────────────────────────────────────
    if let Some(rest) = content.strip_suffix("```") {
        content = rest;
    }

    // ── Rule 3: per-line filter ──────────────────────────────────────────────
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with("```") && *line != "json")
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_json_fence() {
        let raw = "```json\n{\"questions\": []}\n```";
        assert_eq!(sanitize(raw), "{\"questions\": []}");
    }

    #[test]
    fn strips_bare_fence_and_language_line() {
        let raw = "```\njson\n[1, 2]\n```\n";
        assert_eq!(sanitize(raw), "[1, 2]");
    }

    #[test]
    fn clean_json_is_untouched() {
        let raw = "{\"questions\": [{\"content\": \"1. 下列说法正确的是\"}]}";
        assert_eq!(sanitize(raw), raw);
    }

    #[test]
    fn blank_lines_and_indentation_are_removed() {
        let raw = "{\n\n    \"a\": 1\n\n}";
        assert_eq!(sanitize(raw), "{\n\"a\": 1\n}");
    }

    #[test]
    fn fence_only_reply_is_empty() {
        assert_eq!(sanitize("```json\n```"), "");
        assert_eq!(sanitize("   "), "");
    }

    #[test]
    fn trailing_fence_glued_to_payload_is_removed() {
        // First pass keeps `}```` as a line; the second strips the suffix.
        let raw = "```json\n{\"a\": 1}```\n```";
        assert_eq!(sanitize(raw), "{\"a\": 1}");
    }

    #[test]
    fn sanitize_is_idempotent() {
        let samples = [
            "",
            "json",
            "```json\n{\"a\": 1}\n```",
            "``````",
            "```json```json\n[]",
            "  x  \n\n ``` \n y```",
            "{\"q\": \"```\"}",
            "json\n```\njson\n```json\n{}",
        ];
        for s in samples {
            let once = sanitize(s);
            assert_eq!(sanitize(&once), once, "not idempotent for {s:?}");
        }
    }
}
