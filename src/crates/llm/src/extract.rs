//! Robust JSON extraction from chat-model replies.
//!
//! Models asked for JSON still wrap it in markdown fences, prepend prose,
//! emit trailing commas, drop quotes around keys, or over-escape newlines.
//! This module owns the salvage pipeline the agents run every reply
//! through: accept raw JSON, strip fences, slice the outermost object,
//! repair the common defects, and as a last resort translate
//! Python-literal output (`True`/`False`/`None`, single-quoted strings)
//! into JSON.
//!
//! After a successful parse, over-escaped `\n`/`\t`/`\r` sequences in
//! string values are normalised back into real control characters —
//! except under the keys where `\n` is meaningful source text.

use regex::Regex;
use serde_json::Value;
use std::sync::OnceLock;
use tracing::debug;

/// Keys whose string values carry source code; escape sequences inside
/// them must survive verbatim.
const RAW_TEXT_KEYS: [&str; 3] = ["code", "fixed_code", "revised_content"];

/// Parse a chat reply into JSON, trying progressively harder salvage
/// strategies. Returns `None` only when nothing object-shaped can be
/// recovered.
pub fn parse_json_response(response: &str) -> Option<Value> {
    // 1. Direct parse (with repairs on failure).
    if let Some(value) = try_parse(response) {
        debug!("direct JSON parse succeeded");
        return Some(normalize_escapes(value, None));
    }

    // 2. Fenced code block.
    if let Some(block) = extract_fenced_block(response) {
        if let Some(value) = try_parse(&block) {
            debug!("extracted JSON from code block");
            return Some(normalize_escapes(value, None));
        }
    }

    // 3. Outermost `{…}` slice.
    if let Some(slice) = outermost_object(response) {
        if let Some(value) = try_parse(slice) {
            debug!("extracted JSON from braces");
            return Some(normalize_escapes(value, None));
        }
    }

    // 4. Python-literal fallback.
    if let Some(value) = literal_fallback(response) {
        debug!("parsed via python-literal fallback");
        return Some(normalize_escapes(value, None));
    }

    None
}

/// Attempt to parse `s`, applying the defect repairs when the raw text is
/// rejected.
fn try_parse(s: &str) -> Option<Value> {
    let s = s.trim().trim_start_matches('\u{feff}');
    if s.is_empty() {
        return None;
    }

    if let Ok(value) = serde_json::from_str::<Value>(s) {
        return value.is_object().then_some(value);
    }

    let repaired = repair_json(s);
    match serde_json::from_str::<Value>(&repaired) {
        Ok(value) if value.is_object() => Some(value),
        _ => None,
    }
}

/// Repair the defects models emit most often: invalid escape sequences,
/// trailing commas, missing commas between closing and opening brackets,
/// and unquoted object keys.
fn repair_json(s: &str) -> String {
    static TRAILING_COMMA: OnceLock<Regex> = OnceLock::new();
    static MISSING_COMMA: OnceLock<Regex> = OnceLock::new();
    static UNQUOTED_KEY: OnceLock<Regex> = OnceLock::new();

    let s = strip_invalid_escapes(s);

    let s = TRAILING_COMMA
        .get_or_init(|| Regex::new(r",(\s*[}\]])").unwrap())
        .replace_all(&s, "$1");

    let s = MISSING_COMMA
        .get_or_init(|| Regex::new(r"([}\]])(\s*)([{\[])").unwrap())
        .replace_all(&s, "$1,$2$3");

    let s = UNQUOTED_KEY
        .get_or_init(|| Regex::new(r#"([{,]\s*)([A-Za-z_][A-Za-z0-9_]*)\s*:"#).unwrap())
        .replace_all(&s, "$1\"$2\":");

    s.into_owned()
}

/// Drop backslashes that do not start a valid JSON escape (`\[`, `\#`,
/// …). A preceding backslash keeps the pair intact.
fn strip_invalid_escapes(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.peek() {
            Some(&next) if matches!(next, '"' | '\\' | '/' | 'b' | 'f' | 'n' | 'r' | 't' | 'u') => {
                out.push('\\');
                out.push(next);
                chars.next();
            }
            // Invalid escape: drop the backslash, keep the character.
            Some(_) => {}
            None => {}
        }
    }

    out
}

/// Extract the body of the first ``` / ```json fenced block.
fn extract_fenced_block(s: &str) -> Option<String> {
    static FENCE: OnceLock<Regex> = OnceLock::new();
    FENCE
        .get_or_init(|| Regex::new(r"(?s)```(?:json)?\s*(.*?)\s*```").unwrap())
        .captures(s)
        .map(|caps| caps[1].to_string())
}

/// Slice out the outermost `{…}` region.
fn outermost_object(s: &str) -> Option<&str> {
    let start = s.find('{')?;
    let end = s.rfind('}')?;
    (end > start).then(|| &s[start..=end])
}

/// Translate Python-literal output into JSON and retry: `True`/`False`/
/// `None` keywords and single-quoted strings.
fn literal_fallback(s: &str) -> Option<Value> {
    static TRUE_RE: OnceLock<Regex> = OnceLock::new();
    static FALSE_RE: OnceLock<Regex> = OnceLock::new();
    static NONE_RE: OnceLock<Regex> = OnceLock::new();

    let slice = outermost_object(s)?;
    let converted = requote_single_quoted(slice);

    let converted = TRUE_RE
        .get_or_init(|| Regex::new(r"\bTrue\b").unwrap())
        .replace_all(&converted, "true");
    let converted = FALSE_RE
        .get_or_init(|| Regex::new(r"\bFalse\b").unwrap())
        .replace_all(&converted, "false");
    let converted = NONE_RE
        .get_or_init(|| Regex::new(r"\bNone\b").unwrap())
        .replace_all(&converted, "null");

    try_parse(&converted)
}

/// Rewrite single-quoted strings as double-quoted JSON strings, leaving
/// genuine double-quoted strings untouched.
fn requote_single_quoted(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars().peekable();
    let mut in_double = false;

    while let Some(c) = chars.next() {
        match c {
            '"' if !in_double => {
                in_double = true;
                out.push(c);
            }
            '"' if in_double => {
                in_double = false;
                out.push(c);
            }
            '\\' if in_double => {
                out.push(c);
                if let Some(next) = chars.next() {
                    out.push(next);
                }
            }
            '\'' if !in_double => {
                out.push('"');
                while let Some(inner) = chars.next() {
                    match inner {
                        '\'' => break,
                        '"' => out.push_str("\\\""),
                        '\\' => {
                            out.push('\\');
                            if let Some(next) = chars.next() {
                                out.push(next);
                            }
                        }
                        other => out.push(other),
                    }
                }
                out.push('"');
            }
            _ => out.push(c),
        }
    }

    out
}

/// Recursively convert over-escaped `\n`/`\r`/`\t` sequences in string
/// values back into real control characters. Values under
/// [`RAW_TEXT_KEYS`] are left untouched: a `\n` inside generated code is
/// two meaningful characters, not a line break.
pub fn normalize_escapes(value: Value, key: Option<&str>) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(k, v)| {
                    let normalized = normalize_escapes(v, Some(k.as_str()));
                    (k, normalized)
                })
                .collect(),
        ),
        Value::Array(items) => Value::Array(
            items
                .into_iter()
                .map(|item| normalize_escapes(item, key))
                .collect(),
        ),
        Value::String(s) => {
            if key.is_some_and(|k| RAW_TEXT_KEYS.contains(&k)) {
                return Value::String(s);
            }
            let s = s
                .replace("\\\\n", "\n")
                .replace("\\n", "\n")
                .replace("\\\\r", "\r")
                .replace("\\r", "\r")
                .replace("\\\\t", "\t")
                .replace("\\t", "\t");
            Value::String(s)
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_direct_parse() {
        let value = parse_json_response(r#"{"outline": [], "score": 7}"#).unwrap();
        assert_eq!(value["score"], 7);
    }

    #[test]
    fn test_fenced_block() {
        let reply = "Here is the plan:\n```json\n{\"outline\": [1, 2, 3]}\n```\nDone.";
        let value = parse_json_response(reply).unwrap();
        assert_eq!(value["outline"], json!([1, 2, 3]));
    }

    #[test]
    fn test_fenced_block_without_language() {
        let reply = "```\n{\"a\": 1}\n```";
        assert_eq!(parse_json_response(reply).unwrap()["a"], 1);
    }

    #[test]
    fn test_outermost_braces() {
        let reply = "Sure! The result is {\"verdict\": \"pass\"} — let me know.";
        let value = parse_json_response(reply).unwrap();
        assert_eq!(value["verdict"], "pass");
    }

    #[test]
    fn test_trailing_comma_repair() {
        let value = parse_json_response(r#"{"items": [1, 2, 3,], "done": true,}"#).unwrap();
        assert_eq!(value["items"], json!([1, 2, 3]));
        assert_eq!(value["done"], true);
    }

    #[test]
    fn test_missing_comma_repair() {
        let value = parse_json_response(r#"{"a": [1] "b": {"c": 2}}"#);
        // A missing comma between a value and a key is out of scope; the
        // bracket-to-bracket case must repair.
        let bracket_case = parse_json_response(r#"{"a": [[1] [2]]}"#).unwrap();
        assert_eq!(bracket_case["a"], json!([[1], [2]]));
        assert!(value.is_none());
    }

    #[test]
    fn test_unquoted_keys_repair() {
        let value = parse_json_response(r#"{outline: [], verdict: "pass"}"#).unwrap();
        assert_eq!(value["verdict"], "pass");
    }

    #[test]
    fn test_invalid_escape_repair() {
        let value = parse_json_response(r#"{"text": "see \[source\] here"}"#).unwrap();
        assert_eq!(value["text"], "see [source] here");
    }

    #[test]
    fn test_python_literal_fallback() {
        let reply = "{'verdict': 'pass', 'ok': True, 'missing': None, 'bad': False}";
        let value = parse_json_response(reply).unwrap();
        assert_eq!(value["verdict"], "pass");
        assert_eq!(value["ok"], true);
        assert_eq!(value["missing"], Value::Null);
        assert_eq!(value["bad"], false);
    }

    #[test]
    fn test_escape_normalization() {
        let value = parse_json_response(r#"{"summary": "line one\\nline two"}"#).unwrap();
        assert_eq!(value["summary"], "line one\nline two");
    }

    #[test]
    fn test_code_field_escapes_preserved() {
        let reply = r#"{"code": "print('a')\ndf = 1", "summary": "uses\\nnewlines"}"#;
        let value = parse_json_response(reply).unwrap();
        // Inside `code`, the parsed newline stays a newline and no further
        // rewriting happens.
        assert_eq!(value["code"], "print('a')\ndf = 1");
        assert_eq!(value["summary"], "uses\nnewlines");
    }

    #[test]
    fn test_fixed_code_field_preserved() {
        let parsed = parse_json_response(r#"{"fixed_code": "a\\nb"}"#).unwrap();
        // Raw-text keys keep the literal backslash-n sequence.
        assert_eq!(parsed["fixed_code"], "a\\nb");
    }

    #[test]
    fn test_nested_arrays_under_code_key() {
        let parsed = parse_json_response(r#"{"code": ["x\\ny", "z"]}"#).unwrap();
        assert_eq!(parsed["code"][0], "x\\ny");
    }

    #[test]
    fn test_non_ascii_preserved() {
        let value = parse_json_response(r#"{"title": "中国新能源汽车2024市场"}"#).unwrap();
        assert_eq!(value["title"], "中国新能源汽车2024市场");
    }

    #[test]
    fn test_bom_stripped() {
        let value = parse_json_response("\u{feff}{\"a\": 1}").unwrap();
        assert_eq!(value["a"], 1);
    }

    #[test]
    fn test_garbage_returns_none() {
        assert!(parse_json_response("no json here at all").is_none());
        assert!(parse_json_response("").is_none());
        assert!(parse_json_response("[1, 2, 3]").is_none());
    }
}
