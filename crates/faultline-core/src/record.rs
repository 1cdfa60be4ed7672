use crate::context::ErrorContext;
use crate::fingerprint::CallSite;
use crate::Category;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Context keys that describe the call site of an error.
pub const FUNCTION_CONTEXT_KEY: &str = "function";
pub const MODULE_CONTEXT_KEY: &str = "module";

/// An error as handed over by an exception boundary in the host application.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrackedError {
    pub kind: String,
    pub message: String,
    pub context: BTreeMap<String, Value>,
    pub traceback: Option<String>,
    pub category: Option<Category>,
}

impl TrackedError {
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
            ..Self::default()
        }
    }

    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    pub fn with_traceback(mut self, traceback: impl Into<String>) -> Self {
        self.traceback = Some(traceback.into());
        self
    }

    pub fn with_category(mut self, category: Category) -> Self {
        self.category = Some(category);
        self
    }

    pub fn call_site(&self) -> Option<CallSite> {
        let function = self
            .context
            .get(FUNCTION_CONTEXT_KEY)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|value| !value.is_empty())?;
        let site = CallSite::new(function);
        Some(
            match self.context.get(MODULE_CONTEXT_KEY).and_then(Value::as_str) {
                Some(module) => site.in_module(module),
                None => site,
            },
        )
    }
}

/// A classified, fingerprinted occurrence ready to be merged into the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Occurrence {
    pub occurrence_id: String,
    pub fingerprint: String,
    pub category: Category,
    pub error_type: String,
    pub message: String,
    pub normalized_message: String,
    pub context: ErrorContext,
    pub traceback: Option<String>,
    pub ts: DateTime<Utc>,
}

/// Aggregate kept per fingerprint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorRecord {
    pub fingerprint: String,
    pub category: Category,
    pub error_type: String,
    pub error_message: String,
    pub normalized_message: String,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub occurrence_count: u64,
    pub last_message: String,
    pub last_context: ErrorContext,
    pub last_traceback: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorOccurrence {
    pub occurrence_id: String,
    pub fingerprint: String,
    pub ts: DateTime<Utc>,
    pub context: ErrorContext,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorDetails {
    pub record: ErrorRecord,
    pub recent_occurrences: Vec<ErrorOccurrence>,
}

/// Compact row used in statistics listings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorSummary {
    pub fingerprint: String,
    pub category: Category,
    pub error_type: String,
    pub message: String,
    pub count: u64,
    pub last_seen: DateTime<Utc>,
}

impl From<&ErrorRecord> for ErrorSummary {
    fn from(record: &ErrorRecord) -> Self {
        Self {
            fingerprint: record.fingerprint.clone(),
            category: record.category,
            error_type: record.error_type.clone(),
            message: record.normalized_message.clone(),
            count: record.occurrence_count,
            last_seen: record.last_seen,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CategoryCount {
    pub category: Category,
    pub count: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorStatistics {
    pub window_days: u32,
    pub since: DateTime<Utc>,
    /// Distinct fingerprints seen inside the window.
    pub total: u64,
    pub categories: Vec<CategoryCount>,
    pub most_frequent: Vec<ErrorSummary>,
    pub recent: Vec<ErrorSummary>,
}

impl ErrorStatistics {
    pub fn category_count(&self, category: Category) -> u64 {
        self.categories
            .iter()
            .find(|entry| entry.category == category)
            .map_or(0, |entry| entry.count)
    }
}

/// Match records whose `last_context[key] == value`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextFilter {
    pub key: String,
    pub value: String,
}

impl ContextFilter {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}
