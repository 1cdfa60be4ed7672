use crate::alerts::AlertGate;
use crate::config::EngineConfig;
use crate::{EngineError, QueryOutcome, TrackOutcome, TrackStatus};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use faultline_core::{
    enrich_context, normalize_message, CallSite, Category, Classifier, ContextFilter,
    ErrorContext, ErrorDetails, ErrorRecord, ErrorStatistics, Fingerprinter, Occurrence,
    TrackedError, FUNCTION_CONTEXT_KEY, MODULE_CONTEXT_KEY,
};
use faultline_storage::{StatisticsQuery, StorageError, TelemetryStore, UpsertOutcome};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt::Display;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub const DEFAULT_RECENT_LIMIT: usize = 10;
pub const MAX_RECENT_LIMIT: usize = 100;
pub const DETAILS_OCCURRENCE_LIMIT: usize = 10;

const UNKNOWN_KIND: &str = "Unknown";
const MIN_MAINTENANCE_TICK: Duration = Duration::from_millis(10);

pub struct TelemetryEngine {
    store: Arc<dyn TelemetryStore>,
    config: EngineConfig,
    enabled: AtomicBool,
    classifier: Classifier,
    fingerprinter: Fingerprinter,
    alerts: Mutex<AlertGate>,
}

impl TelemetryEngine {
    pub fn new(store: Arc<dyn TelemetryStore>, config: EngineConfig) -> Self {
        let alerts = AlertGate::new(config.alert_interval, config.max_tracked_alerts);
        Self {
            store,
            enabled: AtomicBool::new(config.enabled),
            classifier: Classifier::default(),
            fingerprinter: Fingerprinter::new(config.fingerprint.clone()),
            alerts: Mutex::new(alerts),
            config,
        }
    }

    pub fn with_classifier(mut self, classifier: Classifier) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn enable(&self) {
        if !self.enabled.swap(true, Ordering::SeqCst) {
            info!(event = "telemetry_enabled");
        }
    }

    pub fn disable(&self) {
        if self.enabled.swap(false, Ordering::SeqCst) {
            info!(event = "telemetry_disabled");
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    /// Classify, enrich and fingerprint an error without touching the store.
    pub fn prepare(&self, error: &TrackedError, now: DateTime<Utc>) -> Occurrence {
        let kind = error.kind.trim();
        let kind = if kind.is_empty() { UNKNOWN_KIND } else { kind };
        let category = error
            .category
            .unwrap_or_else(|| self.classifier.classify(kind, &error.message, &error.context));
        let enriched = enrich_context(category, &error.message, &error.context);
        let call_site = error.call_site();
        let fingerprint =
            self.fingerprinter
                .compute(kind, &error.message, category, call_site.as_ref());

        Occurrence {
            occurrence_id: uuid::Uuid::new_v4().to_string(),
            fingerprint,
            category,
            error_type: kind.to_string(),
            message: error.message.trim().to_string(),
            normalized_message: normalize_message(&error.message),
            context: ErrorContext::bounded(enriched, &self.config.context_limits),
            traceback: error
                .traceback
                .as_deref()
                .map(|trace| truncate_chars(trace, self.config.max_traceback_chars)),
            ts: now,
        }
    }

    /// Record one error occurrence. Never fails: store problems surface as
    /// `TrackStatus::Degraded` and a disabled engine performs no store calls.
    pub async fn track_error(&self, error: TrackedError) -> TrackOutcome {
        let occurrence = self.prepare(&error, Utc::now());
        let fingerprint = occurrence.fingerprint.clone();
        let category = occurrence.category;

        if !self.is_enabled() {
            return TrackOutcome {
                fingerprint,
                category,
                status: TrackStatus::Disabled,
                notify: false,
            };
        }

        let notify = self.should_notify(&fingerprint, occurrence.ts);
        let status = match self.write(occurrence).await {
            Ok(outcome) => {
                debug!(
                    event = "telemetry_recorded",
                    fingerprint = %fingerprint,
                    category = %category,
                    occurrence_count = outcome.occurrence_count,
                    created = outcome.created,
                );
                TrackStatus::Recorded
            }
            Err(err) => {
                warn!(
                    event = "telemetry_store_degraded",
                    fingerprint = %fingerprint,
                    category = %category,
                    error = %err,
                );
                TrackStatus::Degraded {
                    reason: err.to_string(),
                }
            }
        };

        TrackOutcome {
            fingerprint,
            category,
            status,
            notify,
        }
    }

    /// Convenience entry point returning only the fingerprint.
    pub async fn track(
        &self,
        kind: &str,
        message: &str,
        context: BTreeMap<String, Value>,
    ) -> String {
        let error = TrackedError {
            kind: kind.to_string(),
            message: message.to_string(),
            context,
            ..TrackedError::default()
        };
        self.track_error(error).await.fingerprint
    }

    /// Await `fut` and track its error, if any, against `site`.
    pub async fn capture<T, E, F>(&self, site: CallSite, fut: F) -> Result<T, E>
    where
        F: Future<Output = Result<T, E>>,
        E: Display,
    {
        let result = fut.await;
        if let Err(err) = &result {
            let mut error = TrackedError::new(short_type_name::<E>(), err.to_string())
                .with_context(FUNCTION_CONTEXT_KEY, site.function.clone());
            if let Some(module) = &site.module {
                error = error.with_context(MODULE_CONTEXT_KEY, module.clone());
            }
            self.track_error(error).await;
        }
        result
    }

    pub async fn get_by_fingerprint(&self, fingerprint: &str) -> QueryOutcome<ErrorRecord> {
        let fingerprint = fingerprint.trim().to_string();
        if fingerprint.is_empty() {
            return QueryOutcome::NotFound;
        }
        self.query_optional("get_by_fingerprint", move |store| store.get(&fingerprint))
            .await
    }

    /// First record whose fingerprint contains `fragment`.
    pub async fn search_by_fingerprint_prefix(&self, fragment: &str) -> QueryOutcome<ErrorRecord> {
        let fragment = fragment.trim().to_string();
        if fragment.is_empty() {
            return QueryOutcome::NotFound;
        }
        self.query_optional("search_by_fingerprint_prefix", move |store| {
            store.find_by_fragment(&fragment)
        })
        .await
    }

    /// Exact match first, then fragment search.
    pub async fn lookup(&self, id: &str) -> QueryOutcome<ErrorRecord> {
        match self.get_by_fingerprint(id).await {
            QueryOutcome::NotFound => self.search_by_fingerprint_prefix(id).await,
            other => other,
        }
    }

    pub async fn get_error_details(&self, id: &str) -> QueryOutcome<ErrorDetails> {
        let fingerprint = match self.lookup(id).await {
            QueryOutcome::Found(record) => record.fingerprint,
            QueryOutcome::NotFound => return QueryOutcome::NotFound,
            QueryOutcome::Unavailable { reason } => return QueryOutcome::Unavailable { reason },
        };
        self.query_optional("get_error_details", move |store| {
            store.details(&fingerprint, DETAILS_OCCURRENCE_LIMIT)
        })
        .await
    }

    pub async fn recent_for_context(
        &self,
        filter: ContextFilter,
        limit: usize,
    ) -> QueryOutcome<Vec<ErrorRecord>> {
        let limit = clamp_limit(limit);
        self.query("recent_for_context", move |store| {
            store.recent_for_context(&filter, limit)
        })
        .await
    }

    pub async fn recent_errors(&self, limit: usize) -> QueryOutcome<Vec<ErrorRecord>> {
        let limit = clamp_limit(limit);
        self.query("recent_errors", move |store| store.recent(limit))
            .await
    }

    pub async fn statistics(&self, window_days: u32) -> QueryOutcome<ErrorStatistics> {
        self.statistics_query(window_days, None).await
    }

    pub async fn statistics_for_category(
        &self,
        window_days: u32,
        category: Category,
    ) -> QueryOutcome<ErrorStatistics> {
        self.statistics_query(window_days, Some(category)).await
    }

    async fn statistics_query(
        &self,
        window_days: u32,
        category: Option<Category>,
    ) -> QueryOutcome<ErrorStatistics> {
        let query = StatisticsQuery {
            since: days_before(Utc::now(), window_days),
            window_days,
            category,
            top_n: self.config.top_n,
        };
        self.query("statistics", move |store| store.statistics(&query))
            .await
    }

    /// Delete records not seen within `retention_days`.
    pub async fn prune(&self, retention_days: u32) -> Result<usize, EngineError> {
        let cutoff = days_before(Utc::now(), retention_days);
        let removed = self
            .run_store(move |store| store.prune_older_than(cutoff))
            .await?;
        if removed > 0 {
            info!(event = "telemetry_pruned", removed, retention_days);
        }
        Ok(removed)
    }

    /// Periodically prune old records until `shutdown` flips to `true`.
    pub fn spawn_maintenance(
        self: &Arc<Self>,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        let engine = Arc::clone(self);
        let tick = engine.config.maintenance_interval.max(MIN_MAINTENANCE_TICK);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(tick);
            loop {
                tokio::select! {
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                    _ = ticker.tick() => {
                        if !engine.is_enabled() {
                            continue;
                        }
                        if let Err(err) = engine.prune(engine.config.retention_days).await {
                            warn!(event = "telemetry_maintenance_error", error = %err);
                        }
                    }
                }
            }
        })
    }

    fn should_notify(&self, fingerprint: &str, now: DateTime<Utc>) -> bool {
        match self.alerts.lock() {
            Ok(mut gate) => gate.should_notify(fingerprint, now),
            Err(poisoned) => poisoned.into_inner().should_notify(fingerprint, now),
        }
    }

    async fn write(&self, occurrence: Occurrence) -> Result<UpsertOutcome, EngineError> {
        let mut attempt: u32 = 0;
        loop {
            let pending = occurrence.clone();
            match self
                .run_store(move |store| store.record_occurrence(&pending))
                .await
            {
                Err(EngineError::Store(err))
                    if err.is_transient() && attempt < self.config.max_write_retries =>
                {
                    attempt += 1;
                    warn!(
                        event = "telemetry_store_retry",
                        fingerprint = %occurrence.fingerprint,
                        attempt,
                        error = %err,
                    );
                    tokio::time::sleep(self.config.retry_backoff * attempt).await;
                }
                result => return result,
            }
        }
    }

    async fn run_store<T, F>(&self, op: F) -> Result<T, EngineError>
    where
        T: Send + 'static,
        F: FnOnce(&dyn TelemetryStore) -> Result<T, StorageError> + Send + 'static,
    {
        let store = Arc::clone(&self.store);
        let task = tokio::task::spawn_blocking(move || op(store.as_ref()));
        match tokio::time::timeout(self.config.store_timeout, task).await {
            Err(_) => Err(EngineError::Timeout(self.config.store_timeout)),
            Ok(Err(join)) => Err(EngineError::Join(join.to_string())),
            Ok(Ok(result)) => result.map_err(EngineError::from),
        }
    }

    async fn query<T, F>(&self, operation: &'static str, op: F) -> QueryOutcome<T>
    where
        T: Send + 'static,
        F: FnOnce(&dyn TelemetryStore) -> Result<T, StorageError> + Send + 'static,
    {
        match self.run_store(op).await {
            Ok(value) => QueryOutcome::Found(value),
            Err(err) => unavailable(operation, err),
        }
    }

    async fn query_optional<T, F>(&self, operation: &'static str, op: F) -> QueryOutcome<T>
    where
        T: Send + 'static,
        F: FnOnce(&dyn TelemetryStore) -> Result<Option<T>, StorageError> + Send + 'static,
    {
        match self.run_store(op).await {
            Ok(Some(value)) => QueryOutcome::Found(value),
            Ok(None) => QueryOutcome::NotFound,
            Err(err) => unavailable(operation, err),
        }
    }
}

fn unavailable<T>(operation: &'static str, err: EngineError) -> QueryOutcome<T> {
    warn!(event = "telemetry_query_unavailable", operation, error = %err);
    QueryOutcome::Unavailable {
        reason: err.to_string(),
    }
}

fn days_before(now: DateTime<Utc>, days: u32) -> DateTime<Utc> {
    now.checked_sub_signed(ChronoDuration::days(i64::from(days)))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

fn clamp_limit(limit: usize) -> usize {
    limit.clamp(1, MAX_RECENT_LIMIT)
}

fn truncate_chars(value: &str, max_chars: usize) -> String {
    match value.char_indices().nth(max_chars) {
        Some((cut, _)) => value[..cut].to_string(),
        None => value.to_string(),
    }
}

// `anyhow::Error` -> "Error", `std::io::Error` -> "Error", `my::Failure<T>` -> "Failure"
fn short_type_name<E>() -> &'static str {
    let full = std::any::type_name::<E>();
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base)
}

#[cfg(test)]
mod tests {
    use super::*;
    use faultline_storage::SqliteTelemetryStore;
    use serde_json::json;

    fn engine_with(config: EngineConfig) -> (Arc<SqliteTelemetryStore>, TelemetryEngine) {
        let store = Arc::new(SqliteTelemetryStore::open_in_memory().expect("open store"));
        let engine = TelemetryEngine::new(store.clone(), config);
        (store, engine)
    }

    #[test]
    fn prepare_classifies_enriches_and_bounds() {
        let (_store, engine) = engine_with(EngineConfig {
            max_traceback_chars: 5,
            ..EngineConfig::default()
        });
        let error = TrackedError::new("TimeoutError", "read timed out on /logs/a.csv")
            .with_context("sftp_host", "10.0.0.4")
            .with_context("guild_id", json!(42))
            .with_traceback("Traceback (most recent call last)");
        let occurrence = engine.prepare(&error, Utc::now());

        assert_eq!(occurrence.category, Category::Sftp);
        assert_eq!(occurrence.context.get("host"), Some("10.0.0.4"));
        assert_eq!(occurrence.context.get("guild_id"), Some("42"));
        assert_eq!(occurrence.traceback.as_deref(), Some("Trace"));
        assert_eq!(occurrence.normalized_message, "read timed out on <PATH>");
        assert_eq!(occurrence.fingerprint.len(), 64);
    }

    #[test]
    fn explicit_category_and_blank_kind() {
        let (_store, engine) = engine_with(EngineConfig::default());
        let error = TrackedError::new("  ", "boom").with_category(Category::Command);
        let occurrence = engine.prepare(&error, Utc::now());
        assert_eq!(occurrence.category, Category::Command);
        assert_eq!(occurrence.error_type, "Unknown");
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate_chars("héllo", 2), "hé");
        assert_eq!(truncate_chars("abc", 10), "abc");
    }

    #[test]
    fn short_type_names() {
        assert_eq!(short_type_name::<std::io::Error>(), "Error");
        assert_eq!(short_type_name::<String>(), "String");
    }

    #[test]
    fn limits_are_clamped() {
        assert_eq!(clamp_limit(0), 1);
        assert_eq!(clamp_limit(50), 50);
        assert_eq!(clamp_limit(5_000), MAX_RECENT_LIMIT);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn toggle_switches_between_recorded_and_disabled() {
        let (store, engine) = engine_with(EngineConfig::default());
        assert!(engine.is_enabled());

        engine.disable();
        let outcome = engine
            .track_error(TrackedError::new("KeyError", "'kills'"))
            .await;
        assert_eq!(outcome.status, TrackStatus::Disabled);
        assert!(!outcome.notify);
        assert_eq!(store.record_count().expect("count"), 0);

        engine.enable();
        let outcome = engine
            .track_error(TrackedError::new("KeyError", "'kills'"))
            .await;
        assert!(outcome.is_recorded());
        assert!(outcome.notify);
        assert_eq!(store.record_count().expect("count"), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn repeated_errors_notify_once_per_interval() {
        let (_store, engine) = engine_with(EngineConfig::default());
        let first = engine
            .track_error(TrackedError::new("KeyError", "'kills'"))
            .await;
        let second = engine
            .track_error(TrackedError::new("KeyError", "'kills'"))
            .await;
        assert!(first.notify);
        assert!(!second.notify);
        assert!(second.is_recorded());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn capture_tracks_errors_with_call_site() {
        let (_store, engine) = engine_with(EngineConfig::default());
        let site = CallSite::new("leaderboard").in_module("cogs.stats");

        let ok: Result<u32, String> = engine.capture(site.clone(), async { Ok(7) }).await;
        assert_eq!(ok, Ok(7));

        let failed: Result<u32, String> = engine
            .capture(site, async { Err("missing key 'kills'".to_string()) })
            .await;
        assert_eq!(failed, Err("missing key 'kills'".to_string()));

        let recent = engine.recent_errors(10).await.found().expect("recent");
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].error_type, "String");
        assert_eq!(recent[0].last_context.get("function"), Some("leaderboard"));
        assert_eq!(recent[0].last_context.get("module"), Some("cogs.stats"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn lookup_falls_back_to_fragment_search() {
        let (_store, engine) = engine_with(EngineConfig::default());
        let fingerprint = engine.track("KeyError", "'kills'", BTreeMap::new()).await;

        let exact = engine.lookup(&fingerprint).await.found().expect("exact");
        assert_eq!(exact.fingerprint, fingerprint);
        let partial = engine.lookup(&fingerprint[10..20]).await.found().expect("partial");
        assert_eq!(partial.fingerprint, fingerprint);
        assert!(engine.lookup("not-a-fingerprint").await.is_not_found());
        assert!(engine.search_by_fingerprint_prefix("").await.is_not_found());

        let details = engine
            .get_error_details(&fingerprint[..12])
            .await
            .found()
            .expect("details");
        assert_eq!(details.record.fingerprint, fingerprint);
        assert_eq!(details.recent_occurrences.len(), 1);
    }
}
