use crate::Category;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::OnceLock;

/// Key set on a context that lost entries to the limits.
pub const TRUNCATED_MARKER: &str = "_truncated";

const DEFAULT_MAX_KEYS: usize = 32;
const DEFAULT_MAX_VALUE_CHARS: usize = 1_000;
const DEFAULT_MAX_TOTAL_BYTES: usize = 10_240;
const ELLIPSIS: &str = "...";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextLimits {
    pub max_keys: usize,
    pub max_value_chars: usize,
    pub max_total_bytes: usize,
}

impl Default for ContextLimits {
    fn default() -> Self {
        Self {
            max_keys: DEFAULT_MAX_KEYS,
            max_value_chars: DEFAULT_MAX_VALUE_CHARS,
            max_total_bytes: DEFAULT_MAX_TOTAL_BYTES,
        }
    }
}

/// Bounded string map of diagnostic context attached to an error.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ErrorContext(BTreeMap<String, String>);

impl ErrorContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a context from arbitrary JSON values, keeping entries in
    /// iteration order until one of the limits is hit.
    pub fn bounded<I, K>(entries: I, limits: &ContextLimits) -> Self
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        let mut values = BTreeMap::new();
        let mut total_bytes = 0usize;
        let mut truncated = false;

        for (key, value) in entries {
            let key = key.into();
            if key.trim().is_empty() || key == TRUNCATED_MARKER {
                continue;
            }
            let Some(rendered) = render_value(value) else {
                continue;
            };
            if values.len() >= limits.max_keys {
                truncated = true;
                break;
            }

            let rendered = truncate_chars(rendered, limits.max_value_chars);
            let entry_bytes = key.len() + rendered.len();
            if total_bytes + entry_bytes > limits.max_total_bytes {
                truncated = true;
                break;
            }
            total_bytes += entry_bytes;
            values.insert(key, rendered);
        }

        if truncated {
            values.insert(TRUNCATED_MARKER.to_string(), "true".to_string());
        }
        Self(values)
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn is_truncated(&self) -> bool {
        self.0.contains_key(TRUNCATED_MARKER)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn as_map(&self) -> &BTreeMap<String, String> {
        &self.0
    }
}

impl From<BTreeMap<String, String>> for ErrorContext {
    fn from(values: BTreeMap<String, String>) -> Self {
        Self(values)
    }
}

fn render_value(value: Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(text) => Some(text),
        other => Some(other.to_string()),
    }
}

fn truncate_chars(value: String, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value;
    }
    let mut truncated: String = value.chars().take(max_chars).collect();
    truncated.push_str(ELLIPSIS);
    truncated
}

fn database_code_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"(?i)\bcode\s*[:=]\s*(\d+)").ok())
        .as_ref()
}

/// Add category-specific fields derived from the caller's context and the
/// message. Caller-supplied keys always win over derived ones.
pub fn enrich_context(
    category: Category,
    message: &str,
    context: &BTreeMap<String, Value>,
) -> BTreeMap<String, Value> {
    let mut merged = BTreeMap::new();

    match category {
        Category::Sftp => {
            for (source, target) in [
                ("sftp_host", "host"),
                ("sftp_operation", "operation"),
                ("sftp_path", "path"),
            ] {
                if let Some(value) = context.get(source) {
                    merged.insert(target.to_string(), value.clone());
                }
            }
        }
        Category::Database => {
            let code = database_code_pattern()
                .and_then(|pattern| pattern.captures(message))
                .and_then(|captures| captures.get(1))
                .and_then(|code| code.as_str().parse::<i64>().ok());
            if let Some(code) = code {
                merged.insert("error_code".to_string(), Value::from(code));
            }
        }
        _ => {}
    }

    for (key, value) in context {
        merged.insert(key.clone(), value.clone());
    }
    merged
}
