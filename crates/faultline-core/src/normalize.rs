//! Message normalisation for fingerprinting.
//!
//! Dynamic fragments (URLs, paths, ids, timestamps, addresses) are replaced
//! with fixed placeholders so that structurally identical failures collapse
//! onto one fingerprint.

use regex::Regex;
use std::sync::OnceLock;

/// Normalised messages are cut to this many chars.
pub const MAX_NORMALIZED_CHARS: usize = 200;

const EMPTY_MESSAGE: &str = "unknown error";

struct Substitution {
    pattern: Regex,
    replacement: &'static str,
}

fn build_substitutions() -> Option<Vec<Substitution>> {
    // Order matters: URLs and paths swallow digits that later rules would
    // otherwise rewrite piecemeal.
    let table: [(&str, &str); 11] = [
        (r"(?i)\b(?:https?|sftp|ssh|mongodb(?:\+srv)?)://\S+", "<URL>"),
        (r#"(^|[\s'"(=:])(?:/[\w.\-~]+)+/?"#, "${1}<PATH>"),
        (r"\b[A-Za-z]:\\[^\s'\x22]+", "<PATH>"),
        (
            r"\b[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}\b",
            "<UUID>",
        ),
        (
            r"\b\d{4}-\d{2}-\d{2}[T ]\d{2}:\d{2}:\d{2}(?:\.\d+)?(?:Z|[+-]\d{2}:?\d{2})?",
            "<TIMESTAMP>",
        ),
        (r"\b\d{4}-\d{2}-\d{2}\b", "<DATE>"),
        (r"\b\d{2}:\d{2}:\d{2}(?:\.\d+)?\b", "<TIME>"),
        (r"\b\d{1,3}(?:\.\d{1,3}){3}(?::\d{1,5})?\b", "<IP>"),
        (r"\b0x[0-9a-fA-F]+\b", "<ADDR>"),
        (r"(?i)\b((?:[a-z]+_)?id\s*[=:#]\s*|id\s+)\d+\b", "${1}<ID>"),
        (r"(#)?\b\d{4,}\b", "${1}<ID>"),
    ];

    let mut substitutions = Vec::with_capacity(table.len());
    for (pattern, replacement) in table {
        substitutions.push(Substitution {
            pattern: Regex::new(pattern).ok()?,
            replacement,
        });
    }
    Some(substitutions)
}

fn substitutions() -> Option<&'static [Substitution]> {
    static SUBSTITUTIONS: OnceLock<Option<Vec<Substitution>>> = OnceLock::new();
    SUBSTITUTIONS.get_or_init(build_substitutions).as_deref()
}

/// Normalise an error message by replacing variable data with placeholders.
///
/// Never fails: if the pattern table cannot be compiled the trimmed message
/// is returned as-is.
pub fn normalize_message(message: &str) -> String {
    let trimmed = message.trim();
    if trimmed.is_empty() {
        return EMPTY_MESSAGE.to_string();
    }

    let mut normalized = trimmed.to_string();
    if let Some(table) = substitutions() {
        for substitution in table {
            normalized = substitution
                .pattern
                .replace_all(&normalized, substitution.replacement)
                .into_owned();
        }
    }

    // Cut after substitution, never before.
    collapse_whitespace(&normalized)
        .chars()
        .take(MAX_NORMALIZED_CHARS)
        .collect()
}

fn collapse_whitespace(value: &str) -> String {
    value.split_whitespace().collect::<Vec<_>>().join(" ")
}
