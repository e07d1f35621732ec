//! Recovery of a JSON object from a raw model completion.
//!
//! Hosted models wrap their JSON in code fences, prefix it with chatter,
//! double-escape it, or sprinkle control characters through it. [`normalize`]
//! runs a fixed sequence of textual repairs and returns the candidate object
//! text, still unparsed. The order matters: characters are filtered before
//! the brace span is located, and the span is always the last step.
//!
//! Dropping backslashes or control characters can splice new noise together
//! (a backtick, a BEL, two backticks becomes a fence), so the repairs are
//! repeated until the text stops changing.

use once_cell::sync::Lazy;
use regex::{Captures, Regex};

use crate::error::AppError;
use crate::script::ScriptRanges;

static CODE_FENCE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)`{3,}[ \t]*(?:json5?|javascript|js)?").expect("code fence regex")
});
static BARE_LANGUAGE_LINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?im)^[ \t]*json[ \t]*$").expect("language line regex"));
static LEADING_LANGUAGE_TOKEN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^\s*json\s*(\{)").expect("leading language regex"));
static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("whitespace regex"));
static UNICODE_ESCAPE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\\u([0-9a-fA-F]{4})").expect("unicode escape regex"));
static ESCAPED_WHITESPACE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\\[nrt]").expect("escaped whitespace regex"));
static EMPTY_GAP_QUOTES: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#""\s+""#).expect("gap quotes regex"));
static SPACE_BEFORE_PUNCT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#""\s+([,:\]}])"#).expect("quote punctuation regex"));

/// Extracts the candidate JSON object text from a raw completion.
///
/// Fails with [`AppError::UnparsableResponse`] when no `{` survives repair.
pub fn normalize(raw: &str, script: &ScriptRanges) -> Result<String, AppError> {
    let mut current = repair(raw, script);
    loop {
        let next = repair(&current, script);
        if next == current {
            break;
        }
        current = next;
    }
    extract_object_span(&current).map(ToOwned::to_owned)
}

/// One pass of every textual repair, in order. Never lengthens the text.
fn repair(raw: &str, script: &ScriptRanges) -> String {
    let text = strip_noise_tokens(raw);
    let text = collapse_whitespace(&text);
    let text = remove_escape_artifacts(&text);
    let text = filter_characters(&text, script);
    fix_quote_spacing(&text)
}

/// Removes code fences and language identifiers leaking from them.
fn strip_noise_tokens(raw: &str) -> String {
    let text = CODE_FENCE.replace_all(raw, "");
    let text = BARE_LANGUAGE_LINE.replace_all(&text, "");
    LEADING_LANGUAGE_TOKEN.replace(&text, "$1").into_owned()
}

fn collapse_whitespace(text: &str) -> String {
    WHITESPACE.replace_all(text, " ").trim().to_string()
}

/// Undoes double encoding: `\uXXXX` is decoded, escaped whitespace becomes a
/// space, and every other backslash is dropped.
///
/// Escapes for `"`, `\` and control characters decode to nothing; a raw quote
/// in the middle of a string value would end it early.
fn remove_escape_artifacts(text: &str) -> String {
    let text = UNICODE_ESCAPE.replace_all(text, |caps: &Captures<'_>| {
        u32::from_str_radix(&caps[1], 16)
            .ok()
            .and_then(char::from_u32)
            .filter(|&ch| !matches!(ch, '"' | '\\') && !ch.is_control())
            .map(String::from)
            .unwrap_or_default()
    });
    let text = ESCAPED_WHITESPACE.replace_all(&text, " ");
    text.replace("\\*", "*")
        .replace("\\\"", "\"")
        .replace('\\', "")
}

fn filter_characters(text: &str, script: &ScriptRanges) -> String {
    text.chars()
        .filter(|&ch| script.allows_in_completion(ch))
        .collect()
}

/// Repairs spacing left around quotes once characters were dropped.
///
/// Runs to a fixpoint so a second pass over its own output is a no-op.
fn fix_quote_spacing(text: &str) -> String {
    let mut current = collapse_whitespace(text);
    loop {
        let next = {
            let gaps_closed = EMPTY_GAP_QUOTES.replace_all(&current, "\"\"");
            SPACE_BEFORE_PUNCT
                .replace_all(&gaps_closed, "\"$1")
                .into_owned()
        };
        if next == current {
            return current;
        }
        current = next;
    }
}

/// Returns the text from the first `{` to the last `}`.
///
/// Without any closing brace the tail from the first `{` is returned, so a
/// truncated completion is reported by the parser rather than here.
fn extract_object_span(text: &str) -> Result<&str, AppError> {
    let start = text
        .find('{')
        .ok_or_else(|| AppError::unparsable("completion contains no JSON object"))?;
    match text.rfind('}') {
        Some(end) if end > start => Ok(&text[start..=end]),
        _ => Ok(&text[start..]),
    }
}
