//! Text processing utilities.

use regex::Regex;
use std::sync::OnceLock;

static WHITESPACE_RE: OnceLock<Regex> = OnceLock::new();

fn whitespace_re() -> &'static Regex {
    WHITESPACE_RE.get_or_init(|| Regex::new(r"\s+").expect("static regex is valid"))
}

/// Collapse runs of whitespace into a single space and trim both ends.
pub fn normalize_whitespace(s: &str) -> String {
    if s.is_empty() {
        return String::new();
    }
    whitespace_re().replace_all(s, " ").trim().to_string()
}

/// Truncate `s` to at most `max_len` characters, ending in `"..."` when cut.
///
/// Counts Unicode scalar values, not bytes. For `max_len <= 3` the result is
/// `max_len` dots.
pub fn truncate_with_ellipsis(s: &str, max_len: usize) -> String {
    if max_len == 0 {
        return String::new();
    }
    if s.chars().count() <= max_len {
        return s.to_string();
    }
    if max_len <= 3 {
        return ".".repeat(max_len);
    }

    let keep_chars = max_len - 3;
    let byte_offset = s
        .char_indices()
        .nth(keep_chars)
        .map(|(i, _)| i)
        .unwrap_or(s.len());

    format!("{}...", &s[..byte_offset])
}

/// Whitespace-normalized, length-capped excerpt for prompt payloads.
pub fn excerpt(s: &str, max_len: usize) -> String {
    truncate_with_ellipsis(&normalize_whitespace(s), max_len)
}

/// Extract the JSON payload from a possibly markdown-wrapped LLM response.
///
/// Tries a ```` ```json ```` fence, then a plain ```` ``` ```` fence, then the
/// outermost `{...}` and finally the outermost `[...]`.
pub fn extract_json_from_response(s: &str) -> Option<&str> {
    if let Some(inner) = extract_fenced_block(s, "```json") {
        return Some(inner);
    }
    if let Some(inner) = extract_fenced_block(s, "```") {
        return Some(inner);
    }
    delimited(s, '{', '}').or_else(|| delimited(s, '[', ']'))
}

fn delimited(s: &str, open: char, close: char) -> Option<&str> {
    let start = s.find(open)?;
    let end = s.rfind(close)?;
    (end > start).then(|| &s[start..=end])
}

fn extract_fenced_block<'a>(s: &'a str, fence: &str) -> Option<&'a str> {
    let start = s.find(fence)?;
    let after_fence = start + fence.len();

    let newline = s[after_fence..].find('\n')?;
    let content_start = after_fence + newline + 1;

    let close = s[content_start..].find("```")?;
    let content = s[content_start..content_start + close].trim();

    if content.is_empty() {
        return None;
    }
    Some(content)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_whitespace_collapses_runs() {
        assert_eq!(normalize_whitespace("  virtue \n\n is\tits own  reward "), "virtue is its own reward");
        assert_eq!(normalize_whitespace("   \t\n  "), "");
        assert_eq!(normalize_whitespace("hello\u{00A0}world"), "hello world");
    }

    #[test]
    fn truncate_counts_characters() {
        assert_eq!(truncate_with_ellipsis("hello world", 8), "hello...");
        assert_eq!(truncate_with_ellipsis("hello", 5), "hello");
        assert_eq!(truncate_with_ellipsis("你好世界测试", 5), "你好...");
        assert_eq!(truncate_with_ellipsis("hello", 2), "..");
        assert_eq!(truncate_with_ellipsis("hello", 0), "");
    }

    #[test]
    fn excerpt_normalizes_then_truncates() {
        assert_eq!(excerpt("a   b   c   d", 5), "a ...");
    }

    #[test]
    fn extract_json_from_fences_and_bare_text() {
        let fenced = "Here you go:\n```json\n{\"concepts\": []}\n```\nDone.";
        assert_eq!(extract_json_from_response(fenced), Some("{\"concepts\": []}"));

        let plain = "Result:\n```\n[1, 2, 3]\n```";
        assert_eq!(extract_json_from_response(plain), Some("[1, 2, 3]"));

        let bare = "The verdict is {\"is_duplicate\": false} as shown.";
        assert_eq!(extract_json_from_response(bare), Some("{\"is_duplicate\": false}"));

        let nested = r#"{"outer": {"inner": 1}}"#;
        assert_eq!(extract_json_from_response(nested), Some(nested));
    }

    #[test]
    fn extract_json_none_when_absent() {
        assert_eq!(extract_json_from_response("No JSON here."), None);
        assert_eq!(extract_json_from_response(""), None);
        assert_eq!(extract_json_from_response("```json\n\n```"), None);
    }
}
