//! Prompts for question extraction.
//!
//! Centralising every prompt here serves two purposes:
//!
//! 1. **Single source of truth**: changing what the model is asked to
//!    produce requires editing exactly one place.
//!
//! 2. **Testability**: unit tests can import and inspect prompts directly
//!    without a live API, making prompt regressions easy to catch.
//!
//! Callers can override the system prompt via
//! [`crate::config::ExtractionConfig::system_prompt`]; the user prompt is
//! always built here because its layout (numbered lines) is what the system
//! prompt's recognition rules refer to.

use crate::question::TextRecord;

/// Default system prompt.
///
/// The model is told not to classify question types: type inference is
/// done deterministically by the normaliser from content markers and the
/// answer count.
pub const DEFAULT_SYSTEM_PROMPT: &str = r#"你是一个题目提取专家。从文本中识别完整的题目并转换为JSON格式。

识别规则：
- 题目以数字开头（如"1."、"2."）
- 题型标识：【多选】、【判断】、【单选】
- 选项以A、B、C、D开头
- 跳过残缺题目、页眉页脚、目录等无关内容

输出要求：
- 只输出标准JSON格式，不要markdown标记
- 每个题目必须有完整的题干和选项
- 如果没有找到完整题目，返回空数组
- 不需要判断题目类型，程序会自动处理

输出格式：
{
  "questions": [
    {
      "content": "题目题干",
      "options": [
        {"key": "A", "content": "选项内容"},
        {"key": "B", "content": "选项内容"}
      ],
      "correctAnswer": ["A"],
      "explanation": "解析",
      "difficulty": "medium",
      "subject": "gongji",
      "module": "law",
      "tags": ["法律"],
      "isActive": true
    }
  ]
}"#;

/// Numbered chunk text, cut to `max_chars` characters.
///
/// Returns the text and whether anything was cut. Truncation counts
/// characters, not bytes, so a multi-byte character is never split.
pub fn numbered_text(records: &[TextRecord], max_chars: usize) -> (String, bool) {
    let full = records
        .iter()
        .enumerate()
        .map(|(i, r)| format!("{}. {}", i + 1, r.text))
        .collect::<Vec<_>>()
        .join("\n");

    match full.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => (full[..byte_idx].to_string(), true),
        None => (full, false),
    }
}

/// Build the user message around already-numbered text.
pub fn user_prompt(numbered: &str) -> String {
    format!(
        "请从以下文本中提取完整的题目。只处理有明确题干和选项的题目，跳过残缺内容。

文本内容：
{numbered}

要求：
1. 识别完整题目（有题干+选项）
2. 推断正确答案和解析
3. 不需要判断题目类型，程序会自动处理
4. 只输出纯JSON格式，不要markdown
5. 没有题目时返回空数组

直接输出JSON："
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lines_are_numbered_from_one() {
        let records = vec![TextRecord::text("甲"), TextRecord::text("乙")];
        let (text, cut) = numbered_text(&records, 100);
        assert_eq!(text, "1. 甲\n2. 乙");
        assert!(!cut);
    }

    #[test]
    fn truncation_counts_characters() {
        let records = vec![TextRecord::text("一二三四五")];
        let (text, cut) = numbered_text(&records, 5);
        assert_eq!(text, "1. 一二");
        assert!(cut);
    }

    #[test]
    fn exact_length_is_not_truncated() {
        let records = vec![TextRecord::text("ab")];
        let (text, cut) = numbered_text(&records, 5);
        assert_eq!(text, "1. ab");
        assert!(!cut);
    }

    #[test]
    fn user_prompt_embeds_text() {
        let prompt = user_prompt("1. 题干");
        assert!(prompt.contains("文本内容：\n1. 题干\n"));
        assert!(prompt.ends_with("直接输出JSON："));
    }

    #[test]
    fn system_prompt_names_markers() {
        assert!(DEFAULT_SYSTEM_PROMPT.contains("【多选】"));
        assert!(DEFAULT_SYSTEM_PROMPT.contains("\"questions\""));
    }
}
