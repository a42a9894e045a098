//! Provenance trailer grammar.
//!
//! A trailer binds a downstream commit to the upstream commit it was derived
//! from. The grammar is one line:
//!
//! ```text
//! [bullets] <key>:<whitespace><7..40 lowercase hex digits>
//! ```
//!
//! Leading whitespace and list bullets (`*`, `-`) are accepted so that the
//! nested list a squash-merge copies out of a PR body still parses:
//!
//! ```text
//! * Fix the thing
//!   * Upstream-Commit: 0123456789abcdef0123456789abcdef01234567
//! ```
//!
//! The key is anchored to the start of the line, so `Upstream-Commit` never
//! matches a `pd_Upstream-Commit` line.

use regex_lite::Regex;

fn pattern(key: &str) -> Regex {
    let source = format!(
        r"(?m)^[ \t]*(?:[*-][ \t]*)*{}:[ \t]*([0-9a-f]{{7,40}})\b",
        regex_lite::escape(key)
    );
    Regex::new(&source).expect("trailer pattern is built from an escaped literal")
}

/// Every trailer value for `key` in `text`, in order of appearance.
pub fn extract(text: &str, key: &str) -> Vec<String> {
    pattern(key)
        .captures_iter(text)
        .filter_map(|c| c.get(1).map(|m| m.as_str().to_string()))
        .collect()
}

/// The first trailer value for `key` in `text`.
pub fn first(text: &str, key: &str) -> Option<String> {
    pattern(key)
        .captures(text)
        .and_then(|c| c.get(1).map(|m| m.as_str().to_string()))
}

/// Whether `text` already carries a trailer line for `key`.
pub fn has_key(text: &str, key: &str) -> bool {
    pattern(key).is_match(text)
}

/// Render a single trailer line.
pub fn format(key: &str, sha: &str) -> String {
    format!("{key}: {sha}")
}

/// Append a trailer to a commit message unless one for `key` is present.
pub fn append(message: &str, key: &str, sha: &str) -> String {
    if has_key(message, key) {
        return message.to_string();
    }
    format!("{}\n\n{}\n", message.trim_end(), format(key, sha))
}

/// First eight characters of a commit id, for titles and log lines.
pub fn short(sha: &str) -> &str {
    &sha[..sha.len().min(8)]
}
