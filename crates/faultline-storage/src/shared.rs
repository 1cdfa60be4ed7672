use crate::{ErrorStore, StatisticsQuery, StorageError, UpsertOutcome};
use chrono::{DateTime, Utc};
use faultline_core::{ContextFilter, ErrorDetails, ErrorRecord, ErrorStatistics, Occurrence};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

/// Persistence seam used by the telemetry engine.
///
/// Implementations must make `record_occurrence` an atomic merge: concurrent
/// calls for one fingerprint must never lose increments.
pub trait TelemetryStore: Send + Sync {
    fn record_occurrence(&self, occurrence: &Occurrence) -> Result<UpsertOutcome, StorageError>;

    fn get(&self, fingerprint: &str) -> Result<Option<ErrorRecord>, StorageError>;

    fn find_by_fragment(&self, fragment: &str) -> Result<Option<ErrorRecord>, StorageError>;

    fn details(
        &self,
        fingerprint: &str,
        occurrence_limit: usize,
    ) -> Result<Option<ErrorDetails>, StorageError>;

    fn recent_for_context(
        &self,
        filter: &ContextFilter,
        limit: usize,
    ) -> Result<Vec<ErrorRecord>, StorageError>;

    fn recent(&self, limit: usize) -> Result<Vec<ErrorRecord>, StorageError>;

    fn statistics(&self, query: &StatisticsQuery) -> Result<ErrorStatistics, StorageError>;

    fn prune_older_than(&self, cutoff: DateTime<Utc>) -> Result<usize, StorageError>;
}

/// Thread-safe wrapper that serialises access to one SQLite connection.
pub struct SqliteTelemetryStore {
    inner: Mutex<ErrorStore>,
}

impl SqliteTelemetryStore {
    pub fn new(store: ErrorStore) -> Self {
        Self {
            inner: Mutex::new(store),
        }
    }

    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        ErrorStore::open(path).map(Self::new)
    }

    pub fn open_in_memory() -> Result<Self, StorageError> {
        ErrorStore::open_in_memory().map(Self::new)
    }

    pub fn with_history_limit(self, limit: usize) -> Self {
        if let Ok(mut store) = self.inner.lock() {
            store.set_history_limit(limit);
        }
        self
    }

    pub fn record_count(&self) -> Result<i64, StorageError> {
        self.lock()?.record_count()
    }

    fn lock(&self) -> Result<MutexGuard<'_, ErrorStore>, StorageError> {
        self.inner.lock().map_err(|_| StorageError::LockPoisoned)
    }
}

impl TelemetryStore for SqliteTelemetryStore {
    fn record_occurrence(&self, occurrence: &Occurrence) -> Result<UpsertOutcome, StorageError> {
        self.lock()?.record_occurrence(occurrence)
    }

    fn get(&self, fingerprint: &str) -> Result<Option<ErrorRecord>, StorageError> {
        self.lock()?.record(fingerprint)
    }

    fn find_by_fragment(&self, fragment: &str) -> Result<Option<ErrorRecord>, StorageError> {
        self.lock()?.find_by_fingerprint_fragment(fragment)
    }

    fn details(
        &self,
        fingerprint: &str,
        occurrence_limit: usize,
    ) -> Result<Option<ErrorDetails>, StorageError> {
        self.lock()?.details(fingerprint, occurrence_limit)
    }

    fn recent_for_context(
        &self,
        filter: &ContextFilter,
        limit: usize,
    ) -> Result<Vec<ErrorRecord>, StorageError> {
        self.lock()?.recent_for_context(filter, limit)
    }

    fn recent(&self, limit: usize) -> Result<Vec<ErrorRecord>, StorageError> {
        self.lock()?.recent(limit)
    }

    fn statistics(&self, query: &StatisticsQuery) -> Result<ErrorStatistics, StorageError> {
        self.lock()?.statistics(query)
    }

    fn prune_older_than(&self, cutoff: DateTime<Utc>) -> Result<usize, StorageError> {
        self.lock()?.prune_older_than(cutoff)
    }
}
