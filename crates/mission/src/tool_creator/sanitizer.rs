//! Line-level rewrite of restricted operations in generated source.
//!
//! Each matching line is replaced by a `raise SecurityError(...)` at the
//! same indentation, so the offending statement can never run even if the
//! rewritten source were loaded.

use once_cell::sync::Lazy;
use regex::Regex;

struct Rule {
    pattern: Regex,
    message: &'static str,
}

static RULES: Lazy<Vec<Rule>> = Lazy::new(|| {
    [
        (r"\bimport\s+(os|subprocess|sys|shutil)\b", "Unauthorized import"),
        (r"__import__\s*\(", "Dynamic imports not allowed"),
        (r"\b(exec|eval)\s*\(", "Code execution not allowed"),
        (r"\bopen\s*\(", "File operations not allowed"),
        (r"\bsocket\.", "Network operations not allowed"),
        (r"\bsubprocess\.", "Process execution not allowed"),
    ]
    .into_iter()
    .filter_map(|(pattern, message)| {
        Regex::new(pattern)
            .ok()
            .map(|pattern| Rule { pattern, message })
    })
    .collect()
});

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    /// 1-based source line.
    pub line: usize,
    pub message: &'static str,
}

impl std::fmt::Display for Violation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} (line {})", self.message, self.line)
    }
}

/// Rewrite every line that matches a restricted pattern. Returns the new
/// source and what was rewritten.
pub fn sanitize(code: &str) -> (String, Vec<Violation>) {
    let mut violations = Vec::new();
    let lines: Vec<String> = code
        .lines()
        .enumerate()
        .map(|(idx, line)| {
            let Some(rule) = RULES.iter().find(|r| r.pattern.is_match(line)) else {
                return line.to_string();
            };
            violations.push(Violation {
                line: idx + 1,
                message: rule.message,
            });
            let indent = &line[..line.len() - line.trim_start().len()];
            format!("{indent}raise SecurityError(\"{}\")", rule.message)
        })
        .collect();
    (lines.join("\n"), violations)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_code_untouched() {
        let code = "import re\n\ndef f(text: str) -> str:\n    return re.sub(r\"\\s+\", \" \", text)";
        let (out, violations) = sanitize(code);
        assert_eq!(out, code);
        assert!(violations.is_empty());
    }

    #[test]
    fn test_rewrites_keep_indentation() {
        let code = "import os\n\ndef f(cmd: str) -> str:\n    data = open(cmd).read()\n    return eval(data)";
        let (out, violations) = sanitize(code);
        assert_eq!(
            out,
            "raise SecurityError(\"Unauthorized import\")\n\n\
             def f(cmd: str) -> str:\n    \
             raise SecurityError(\"File operations not allowed\")\n    \
             raise SecurityError(\"Code execution not allowed\")"
        );
        assert_eq!(
            violations.iter().map(|v| v.line).collect::<Vec<_>>(),
            vec![1, 4, 5]
        );
        assert_eq!(violations[0].to_string(), "Unauthorized import (line 1)");
    }

    #[test]
    fn test_word_boundaries() {
        let (_, violations) = sanitize("def f(reopen_count: str) -> str:\n    return reopen_count");
        assert!(violations.is_empty());
        let (_, violations) = sanitize("def f(x):\n    return socket.connect(x)");
        assert_eq!(violations.len(), 1);
    }
}
