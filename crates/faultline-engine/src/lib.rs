pub mod alerts;
pub mod config;
mod engine;

pub use alerts::AlertGate;
pub use config::EngineConfig;
pub use engine::{TelemetryEngine, DEFAULT_RECENT_LIMIT, DETAILS_OCCURRENCE_LIMIT, MAX_RECENT_LIMIT};

use faultline_core::Category;
use faultline_storage::StorageError;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("store error: {0}")]
    Store(#[from] StorageError),
    #[error("store call exceeded {0:?}")]
    Timeout(Duration),
    #[error("store task failed: {0}")]
    Join(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrackStatus {
    Recorded,
    /// The occurrence was fingerprinted but could not be persisted.
    Degraded { reason: String },
    Disabled,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackOutcome {
    pub fingerprint: String,
    pub category: Category,
    pub status: TrackStatus,
    /// Whether the alert gate lets a notification through for this occurrence.
    pub notify: bool,
}

impl TrackOutcome {
    pub fn is_recorded(&self) -> bool {
        self.status == TrackStatus::Recorded
    }

    pub fn is_degraded(&self) -> bool {
        matches!(self.status, TrackStatus::Degraded { .. })
    }
}

/// Result of a read against the store. `NotFound` and `Unavailable` are
/// distinct so callers can tell "no such error" from "store is down".
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryOutcome<T> {
    Found(T),
    NotFound,
    Unavailable { reason: String },
}

impl<T> QueryOutcome<T> {
    pub fn found(self) -> Option<T> {
        match self {
            QueryOutcome::Found(value) => Some(value),
            _ => None,
        }
    }

    pub fn is_found(&self) -> bool {
        matches!(self, QueryOutcome::Found(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, QueryOutcome::NotFound)
    }

    pub fn is_unavailable(&self) -> bool {
        matches!(self, QueryOutcome::Unavailable { .. })
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> QueryOutcome<U> {
        match self {
            QueryOutcome::Found(value) => QueryOutcome::Found(f(value)),
            QueryOutcome::NotFound => QueryOutcome::NotFound,
            QueryOutcome::Unavailable { reason } => QueryOutcome::Unavailable { reason },
        }
    }
}
