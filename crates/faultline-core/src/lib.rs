pub mod classify;
pub mod context;
pub mod fingerprint;
pub mod normalize;
pub mod record;

pub use classify::{default_rules, ClassificationRule, Classifier, CATEGORY_CONTEXT_KEY};
pub use context::{enrich_context, ContextLimits, ErrorContext, TRUNCATED_MARKER};
pub use fingerprint::{CallSite, FingerprintConfig, Fingerprinter};
pub use normalize::normalize_message;
pub use record::{
    CategoryCount, ContextFilter, ErrorDetails, ErrorOccurrence, ErrorRecord, ErrorStatistics,
    ErrorSummary, Occurrence, TrackedError, FUNCTION_CONTEXT_KEY, MODULE_CONTEXT_KEY,
};

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("unknown category: {0}")]
    UnknownCategory(String),
    #[error("invalid classification pattern for {category}: {reason}")]
    InvalidPattern { category: Category, reason: String },
}

/// Coarse grouping tag assigned to every tracked error.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Sftp,
    Database,
    Command,
    Permission,
    DiscordApi,
    Validation,
    FileSystem,
    Timeout,
    RateLimit,
    ApiError,
    Unknown,
}

impl Default for Category {
    fn default() -> Self {
        Self::Unknown
    }
}

impl Category {
    pub const ALL: [Category; 11] = [
        Category::Sftp,
        Category::Database,
        Category::Command,
        Category::Permission,
        Category::DiscordApi,
        Category::Validation,
        Category::FileSystem,
        Category::Timeout,
        Category::RateLimit,
        Category::ApiError,
        Category::Unknown,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Category::Sftp => "sftp",
            Category::Database => "database",
            Category::Command => "command",
            Category::Permission => "permission",
            Category::DiscordApi => "discord_api",
            Category::Validation => "validation",
            Category::FileSystem => "file_system",
            Category::Timeout => "timeout",
            Category::RateLimit => "rate_limit",
            Category::ApiError => "api_error",
            Category::Unknown => "unknown",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = CoreError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let normalized = input.trim().to_lowercase().replace('-', "_");
        match normalized.as_str() {
            "sftp" => Ok(Category::Sftp),
            "database" | "db" => Ok(Category::Database),
            "command" => Ok(Category::Command),
            "permission" => Ok(Category::Permission),
            "discord_api" | "discord" => Ok(Category::DiscordApi),
            "validation" => Ok(Category::Validation),
            "file_system" | "filesystem" => Ok(Category::FileSystem),
            "timeout" => Ok(Category::Timeout),
            "rate_limit" => Ok(Category::RateLimit),
            "api_error" => Ok(Category::ApiError),
            "unknown" | "uncategorized" => Ok(Category::Unknown),
            _ => Err(CoreError::UnknownCategory(input.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn category_tags_round_trip_through_from_str() {
        for category in Category::ALL {
            let parsed: Category = category.as_str().parse().expect("known tag");
            assert_eq!(parsed, category);
        }
    }

    #[test]
    fn category_aliases_are_accepted() {
        assert_eq!("uncategorized".parse::<Category>().ok(), Some(Category::Unknown));
        assert_eq!(" Discord-API ".parse::<Category>().ok(), Some(Category::DiscordApi));
        assert!("gateway".parse::<Category>().is_err());
    }

    #[test]
    fn category_serializes_as_snake_case_tag() {
        let json = serde_json::to_string(&Category::FileSystem).expect("serialize");
        assert_eq!(json, "\"file_system\"");
    }
}
