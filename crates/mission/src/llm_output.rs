//! Helpers for pulling structured data out of free-form LLM replies.

use serde_json::Value;

/// Remove a surrounding markdown code fence (```` ```json ```` or bare
/// ```` ``` ````), if any.
pub fn strip_code_fences(raw: &str) -> &str {
    let mut text = raw.trim();
    if let Some(rest) = text.strip_prefix("```") {
        // Drop the info string (`json`, `python`, ...) on the opening line.
        text = match rest.split_once('\n') {
            Some((info, body))
                if info
                    .trim()
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_') =>
            {
                body
            }
            _ => rest,
        };
    }
    if let Some(rest) = text.trim_end().strip_suffix("```") {
        text = rest;
    }
    text.trim()
}

/// Parse a reply as JSON after stripping code fences.
pub fn parse_json(raw: &str) -> Result<Value, serde_json::Error> {
    serde_json::from_str(strip_code_fences(raw))
}

/// The last non-empty line of a reply, trimmed.
pub fn last_line(raw: &str) -> &str {
    raw.lines()
        .map(str::trim)
        .rev()
        .find(|l| !l.is_empty())
        .unwrap_or("")
}

/// Shorten `text` to at most `max` characters for log output.
pub fn preview(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}

/// Pretty JSON for prompts. Serializing a `Value` cannot fail.
pub fn pretty(value: &impl serde::Serialize) -> String {
    serde_json::to_string_pretty(value).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_strip_code_fences() {
        assert_eq!(strip_code_fences("```json\n[1, 2]\n```"), "[1, 2]");
        assert_eq!(strip_code_fences("```\n{\"a\": 1}\n```\n"), "{\"a\": 1}");
        assert_eq!(strip_code_fences("```[3]```"), "[3]");
        assert_eq!(strip_code_fences("  [4]  "), "[4]");
        assert_eq!(
            strip_code_fences("```python\ndef f():\n    pass\n```"),
            "def f():\n    pass"
        );
    }

    #[test]
    fn test_parse_json() {
        assert_eq!(parse_json("```json\n{\"ok\": true}\n```").unwrap(), json!({"ok": true}));
        assert!(parse_json("not json").is_err());
    }

    #[test]
    fn test_last_line() {
        assert_eq!(last_line("reasoning\n\nFINAL_SUCCESS\n\n"), "FINAL_SUCCESS");
        assert_eq!(last_line(""), "");
    }

    #[test]
    fn test_preview() {
        assert_eq!(preview("abcdef", 3), "abc...");
        assert_eq!(preview("ab", 3), "ab");
        assert_eq!(preview("héllo", 2), "hé...");
    }
}
