//! Normalisation of LLM-generated Python before execution.
//!
//! Models deliver code wrapped in markdown fences, JSON-escaped into a
//! single line, with stray line-continuation backslashes inside dict
//! literals, and with imports the sandbox already preseeds. The cleaning
//! pass undoes all of that:
//!
//! 1. strip markdown fences;
//! 2. convert JSON-escaped newlines back into real newlines, preserving
//!    `\n` *inside string literals* (a character walk tracking quote
//!    state — a blanket replace would corrupt `print("a\nb")`);
//! 3. remove trailing line-continuation backslashes;
//! 4. drop `import`/`from` lines and `plt.rcParams` lines, both
//!    preseeded by the harness.

use regex::Regex;
use std::sync::OnceLock;

/// Placeholder that survives the newline substitution.
const NEWLINE_SENTINEL: &str = "\u{1}NL\u{1}";

/// Clean generated code into executable shape.
pub fn clean_code(code: &str) -> String {
    let code = strip_fences(code);

    // Already multi-line with no escaped newlines: only the per-line
    // pass is needed.
    let code = if code.contains('\n') && !code.contains("\\n") {
        code
    } else {
        unescape_newlines(&code)
    };

    let mut lines = Vec::new();
    for raw_line in code.split('\n') {
        let line = raw_line.trim_end();
        let stripped = line.trim_start();

        if stripped.starts_with("import ") || stripped.starts_with("from ") {
            continue;
        }
        if stripped.contains("plt.rcParams") {
            continue;
        }

        // Stray continuation backslash: bracket continuation makes it
        // redundant and a following character makes it a syntax error.
        let line = line.trim_end_matches('\\').trim_end();
        lines.push(line.to_string());
    }

    lines.join("\n").trim().to_string()
}

fn strip_fences(code: &str) -> String {
    static OPEN_FENCE: OnceLock<Regex> = OnceLock::new();
    static CLOSE_FENCE: OnceLock<Regex> = OnceLock::new();

    let code = OPEN_FENCE
        .get_or_init(|| Regex::new(r"(?m)^```(?:python|json)?\s*").unwrap())
        .replace_all(code, "");
    let code = CLOSE_FENCE
        .get_or_init(|| Regex::new(r"```\s*$").unwrap())
        .replace_all(&code, "");

    code.trim().to_string()
}

/// Turn `\n` sequences that separate statements into real newlines while
/// keeping `\n` inside string literals intact.
fn unescape_newlines(code: &str) -> String {
    let protected = shield_string_literals(code);

    let unescaped = protected
        .replace("\\\\n", "\n")
        .replace("\\n", "\n")
        .replace("\\\\r", "")
        .replace("\\r", "");

    // Escaped brackets are a JSON-transport artifact, not Python.
    let unescaped = unescaped.replace("\\[", "[").replace("\\]", "]");

    unescaped.replace(NEWLINE_SENTINEL, "\\n")
}

/// Replace `\n` occurrences inside quoted strings with a sentinel so the
/// statement-separator substitution cannot touch them.
fn shield_string_literals(code: &str) -> String {
    let mut out = String::with_capacity(code.len());
    let mut chars = code.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '"' && c != '\'' {
            out.push(c);
            continue;
        }

        let quote = c;
        out.push(quote);
        while let Some(inner) = chars.next() {
            if inner == '\\' {
                match chars.peek() {
                    Some('n') => {
                        out.push_str(NEWLINE_SENTINEL);
                        chars.next();
                    }
                    Some(&next) if next == quote || next == '\\' => {
                        out.push('\\');
                        out.push(next);
                        chars.next();
                    }
                    _ => out.push('\\'),
                }
            } else if inner == quote {
                out.push(quote);
                break;
            } else {
                out.push(inner);
            }
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_python_fence() {
        let code = "```python\nprint(1)\n```";
        assert_eq!(clean_code(code), "print(1)");
    }

    #[test]
    fn test_strip_bare_fence() {
        let code = "```\nx = 1\n```";
        assert_eq!(clean_code(code), "x = 1");
    }

    #[test]
    fn test_escaped_newlines_become_statements() {
        let code = r"x = 1\ny = 2\nprint(x + y)";
        assert_eq!(clean_code(code), "x = 1\ny = 2\nprint(x + y)");
    }

    #[test]
    fn test_newlines_inside_strings_survive() {
        let code = r#"sep = "a\nb"\nprint(sep)"#;
        let cleaned = clean_code(code);
        assert_eq!(cleaned, "sep = \"a\\nb\"\nprint(sep)");
    }

    #[test]
    fn test_single_quoted_strings_shielded() {
        let code = r"msg = 'line\nbreak'\nprint(msg)";
        let cleaned = clean_code(code);
        assert_eq!(cleaned, "msg = 'line\\nbreak'\nprint(msg)");
    }

    #[test]
    fn test_import_lines_dropped() {
        let code = "import pandas as pd\nfrom math import sqrt\nx = sqrt(4)";
        assert_eq!(clean_code(code), "x = sqrt(4)");
    }

    #[test]
    fn test_rcparams_lines_dropped() {
        let code = "plt.rcParams['font.size'] = 12\nplt.plot([1, 2])";
        assert_eq!(clean_code(code), "plt.plot([1, 2])");
    }

    #[test]
    fn test_trailing_continuation_backslash_removed() {
        let code = "data = { \\\n    'Year': [2020, 2021] \\\n}";
        assert_eq!(clean_code(code), "data = {\n    'Year': [2020, 2021]\n}");
    }

    #[test]
    fn test_escaped_brackets_restored() {
        let code = r"values = \[1, 2, 3\]\nprint(values)";
        assert_eq!(clean_code(code), "values = [1, 2, 3]\nprint(values)");
    }

    #[test]
    fn test_multiline_code_passes_through() {
        let code = "data = {\n    'Year': [2020],\n}\ndf = pd.DataFrame(data)";
        assert_eq!(clean_code(code), code);
    }

    #[test]
    fn test_double_escaped_newlines() {
        let code = r"x = 1\\ny = 2";
        assert_eq!(clean_code(code), "x = 1\ny = 2");
    }
}
