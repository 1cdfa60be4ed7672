//! Rule-based error categorisation.
//!
//! Rules are evaluated in order against `"{kind}: {message}"`; the first
//! matching rule decides the category and `unknown` is the fallback.

use crate::{Category, CoreError};
use regex::Regex;
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::warn;

/// Context key that pins the category explicitly.
pub const CATEGORY_CONTEXT_KEY: &str = "category";

const SFTP_CONTEXT_KEYS: &[&str] = &["sftp_host", "sftp_operation", "sftp_path"];
const DATABASE_CONTEXT_KEYS: &[&str] = &["collection", "operation"];
const COMMAND_CONTEXT_KEYS: &[&str] = &["command", "command_name"];

/// (category, pattern, context keys gating the rule)
const DEFAULT_RULES: &[(Category, &str, &[&str])] = &[
    (
        Category::Sftp,
        r"(?i)connect|timeout|timed\s*out|refused|reset|eof|auth",
        SFTP_CONTEXT_KEYS,
    ),
    (Category::Sftp, r"(?i)\b(sftp|ssh|paramiko|asyncssh)", &[]),
    (Category::Database, r"(?s).", DATABASE_CONTEXT_KEYS),
    (
        Category::Database,
        r"(?i)mongo|database|sqlite|duplicate\s+key|connection\s+refused|\bdb\b",
        &[],
    ),
    (
        Category::Permission,
        r"(?i)permission.*denied|missing.*permission|not.*authori[sz]ed|forbidden|access\s+denied",
        &[],
    ),
    (
        Category::DiscordApi,
        r"(?i)discord|interaction.*(failed|expired)|unknown\s+interaction|webhook.*failed",
        &[],
    ),
    (
        Category::Validation,
        r"(?i)invalid.*(format|parameter|argument|value)|validation.*failed|valueerror",
        &[],
    ),
    (
        Category::FileSystem,
        r"(?i)(file|directory).*not.*found|no\s+such\s+file|filenotfound|is\s+a\s+directory",
        &[],
    ),
    (
        Category::RateLimit,
        r"(?i)rate.*limit|too.*many.*requests|slow.*down",
        &[],
    ),
    (
        Category::Timeout,
        r"(?i)timeout|timed.*out|took.*too.*long|deadline\s+exceeded",
        &[],
    ),
    (
        Category::ApiError,
        r"(?i)api.*error|request.*failed|status.*code.*[45]\d{2}",
        &[],
    ),
    (
        Category::Command,
        r"(?i)command.*(error|failed|not\s+found)|commandinvoke|checkfailure|missingrequiredargument",
        &[],
    ),
    (Category::Command, r"(?s).", COMMAND_CONTEXT_KEYS),
];

#[derive(Debug, Clone)]
pub struct ClassificationRule {
    category: Category,
    pattern: Regex,
    context_keys: Vec<String>,
}

impl ClassificationRule {
    pub fn new(category: Category, pattern: &str) -> Result<Self, CoreError> {
        let pattern = Regex::new(pattern).map_err(|err| CoreError::InvalidPattern {
            category,
            reason: err.to_string(),
        })?;
        Ok(Self {
            category,
            pattern,
            context_keys: Vec::new(),
        })
    }

    /// Only apply this rule when at least one of `keys` is present in the
    /// error context.
    pub fn with_context_keys(mut self, keys: &[&str]) -> Self {
        self.context_keys = keys.iter().map(|key| key.to_string()).collect();
        self
    }

    pub fn category(&self) -> Category {
        self.category
    }

    pub fn matches(&self, subject: &str, context: &BTreeMap<String, Value>) -> bool {
        let gated_in = self.context_keys.is_empty()
            || self
                .context_keys
                .iter()
                .any(|key| context.get(key).is_some_and(|value| !value.is_null()));
        gated_in && self.pattern.is_match(subject)
    }
}

pub fn default_rules() -> Vec<ClassificationRule> {
    DEFAULT_RULES
        .iter()
        .filter_map(|(category, pattern, keys)| {
            match ClassificationRule::new(*category, pattern) {
                Ok(rule) => Some(rule.with_context_keys(keys)),
                Err(err) => {
                    warn!(event = "classifier_rule_invalid", error = %err, "skipping rule");
                    None
                }
            }
        })
        .collect()
}

#[derive(Debug, Clone)]
pub struct Classifier {
    rules: Vec<ClassificationRule>,
}

impl Default for Classifier {
    fn default() -> Self {
        Self::new(default_rules())
    }
}

impl Classifier {
    pub fn new(rules: Vec<ClassificationRule>) -> Self {
        Self { rules }
    }

    pub fn rules(&self) -> &[ClassificationRule] {
        &self.rules
    }

    pub fn classify(
        &self,
        error_kind: &str,
        message: &str,
        context: &BTreeMap<String, Value>,
    ) -> Category {
        if let Some(explicit) = explicit_category(context) {
            return explicit;
        }

        let subject = format!("{}: {}", error_kind.trim(), message.trim());
        self.rules
            .iter()
            .find(|rule| rule.matches(&subject, context))
            .map(ClassificationRule::category)
            .unwrap_or(Category::Unknown)
    }
}

fn explicit_category(context: &BTreeMap<String, Value>) -> Option<Category> {
    context
        .get(CATEGORY_CONTEXT_KEY)
        .and_then(Value::as_str)
        .and_then(|tag| tag.parse().ok())
}
