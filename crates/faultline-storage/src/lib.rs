mod shared;

pub use shared::{SqliteTelemetryStore, TelemetryStore};

use chrono::{DateTime, SecondsFormat, Utc};
use faultline_core::{
    Category, CategoryCount, ContextFilter, ErrorContext, ErrorDetails, ErrorOccurrence,
    ErrorRecord, ErrorStatistics, ErrorSummary, Occurrence,
};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, Row};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

pub const TELEMETRY_SCHEMA_VERSION: i64 = 2;
pub const DEFAULT_HISTORY_LIMIT: usize = 20;

const BUSY_TIMEOUT: Duration = Duration::from_millis(250);

const RECORD_COLUMNS: &str = "
    fingerprint,
    category,
    error_type,
    error_message,
    normalized_message,
    first_seen,
    last_seen,
    occurrence_count,
    last_message,
    last_context_json,
    last_traceback
";

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("timestamp parse error: {0}")]
    Timestamp(String),
    #[error("unsupported schema version {found}, max supported {supported}")]
    UnsupportedSchemaVersion { found: i64, supported: i64 },
    #[error("store lock poisoned")]
    LockPoisoned,
}

impl StorageError {
    /// Busy/locked conditions that are worth retrying.
    pub fn is_transient(&self) -> bool {
        match self {
            StorageError::Sqlite(rusqlite::Error::SqliteFailure(err, _)) => matches!(
                err.code,
                ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked
            ),
            _ => false,
        }
    }
}

/// Result of merging one occurrence into its aggregate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpsertOutcome {
    pub occurrence_count: u64,
    pub created: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatisticsQuery {
    pub since: DateTime<Utc>,
    pub window_days: u32,
    pub category: Option<Category>,
    pub top_n: usize,
}

pub struct ErrorStore {
    conn: Connection,
    history_limit: usize,
}

impl ErrorStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        Self::with_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self, StorageError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, StorageError> {
        let store = Self {
            conn,
            history_limit: DEFAULT_HISTORY_LIMIT,
        };
        store.migrate()?;
        Ok(store)
    }

    /// Maximum number of occurrence rows kept per fingerprint.
    pub fn set_history_limit(&mut self, limit: usize) {
        self.history_limit = limit.max(1);
    }

    pub fn schema_version(&self) -> Result<i64, StorageError> {
        Ok(self
            .conn
            .query_row("PRAGMA user_version", [], |row| row.get(0))?)
    }

    pub fn migrate(&self) -> Result<(), StorageError> {
        let mut current = self.schema_version()?;
        if current > TELEMETRY_SCHEMA_VERSION {
            return Err(StorageError::UnsupportedSchemaVersion {
                found: current,
                supported: TELEMETRY_SCHEMA_VERSION,
            });
        }

        if current < 1 {
            let sql = include_str!("../migrations/0001_error_records.sql");
            self.conn.execute_batch(sql)?;
            self.conn.execute_batch("PRAGMA user_version = 1")?;
            current = 1;
        }

        if current < 2 {
            let sql = include_str!("../migrations/0002_error_occurrences.sql");
            self.conn.execute_batch(sql)?;
            self.conn.execute_batch("PRAGMA user_version = 2")?;
        }

        Ok(())
    }

    /// Merge an occurrence into the aggregate for its fingerprint.
    ///
    /// The increment happens inside a single `INSERT .. ON CONFLICT` statement,
    /// so concurrent writers never lose counts. `last_seen` only moves forward
    /// and the `last_*` snapshot is only replaced by a fresher occurrence.
    pub fn record_occurrence(&self, occurrence: &Occurrence) -> Result<UpsertOutcome, StorageError> {
        let context_json = serde_json::to_string(&occurrence.context)
            .map_err(|err| StorageError::Serialization(err.to_string()))?;
        let ts = format_timestamp(occurrence.ts);

        let tx = self.conn.unchecked_transaction()?;
        let occurrence_count: i64 = tx.query_row(
            "
            INSERT INTO error_records (
                fingerprint,
                category,
                error_type,
                error_message,
                normalized_message,
                first_seen,
                last_seen,
                occurrence_count,
                last_message,
                last_context_json,
                last_traceback
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6, 1, ?4, ?7, ?8)
            ON CONFLICT(fingerprint) DO UPDATE SET
                occurrence_count = occurrence_count + 1,
                first_seen = MIN(first_seen, excluded.first_seen),
                last_seen = MAX(last_seen, excluded.last_seen),
                last_message = CASE WHEN excluded.last_seen >= last_seen
                    THEN excluded.last_message ELSE last_message END,
                last_context_json = CASE WHEN excluded.last_seen >= last_seen
                    THEN excluded.last_context_json ELSE last_context_json END,
                last_traceback = CASE WHEN excluded.last_seen >= last_seen
                    THEN excluded.last_traceback ELSE last_traceback END
            RETURNING occurrence_count
            ",
            params![
                occurrence.fingerprint,
                occurrence.category.as_str(),
                occurrence.error_type,
                occurrence.message,
                occurrence.normalized_message,
                ts,
                context_json,
                occurrence.traceback,
            ],
            |row| row.get(0),
        )?;

        tx.execute(
            "
            INSERT OR IGNORE INTO error_occurrences (occurrence_id, fingerprint, ts, context_json)
            VALUES (?1, ?2, ?3, ?4)
            ",
            params![occurrence.occurrence_id, occurrence.fingerprint, ts, context_json],
        )?;
        tx.execute(
            "
            DELETE FROM error_occurrences
            WHERE fingerprint = ?1
              AND occurrence_id NOT IN (
                SELECT occurrence_id
                FROM error_occurrences
                WHERE fingerprint = ?1
                ORDER BY ts DESC, rowid DESC
                LIMIT ?2
              )
            ",
            params![occurrence.fingerprint, self.history_limit as i64],
        )?;
        tx.commit()?;

        Ok(UpsertOutcome {
            occurrence_count: occurrence_count as u64,
            created: occurrence_count == 1,
        })
    }

    pub fn record(&self, fingerprint: &str) -> Result<Option<ErrorRecord>, StorageError> {
        let sql = format!("SELECT {RECORD_COLUMNS} FROM error_records WHERE fingerprint = ?1");
        Ok(self
            .conn
            .query_row(&sql, [fingerprint], record_from_row)
            .optional()?)
    }

    /// First record whose fingerprint contains `fragment`, in table order.
    pub fn find_by_fingerprint_fragment(
        &self,
        fragment: &str,
    ) -> Result<Option<ErrorRecord>, StorageError> {
        let fragment = fragment.trim();
        if fragment.is_empty() {
            return Ok(None);
        }
        let sql = format!(
            "SELECT {RECORD_COLUMNS} FROM error_records WHERE fingerprint LIKE ?1 ESCAPE '\\' LIMIT 1"
        );
        let pattern = format!("%{}%", escape_like(fragment));
        Ok(self
            .conn
            .query_row(&sql, [pattern], record_from_row)
            .optional()?)
    }

    pub fn details(
        &self,
        fingerprint: &str,
        occurrence_limit: usize,
    ) -> Result<Option<ErrorDetails>, StorageError> {
        let Some(record) = self.record(fingerprint)? else {
            return Ok(None);
        };
        let recent_occurrences = self.occurrences(fingerprint, occurrence_limit)?;
        Ok(Some(ErrorDetails {
            record,
            recent_occurrences,
        }))
    }

    pub fn occurrences(
        &self,
        fingerprint: &str,
        limit: usize,
    ) -> Result<Vec<ErrorOccurrence>, StorageError> {
        let mut stmt = self.conn.prepare(
            "
            SELECT occurrence_id, fingerprint, ts, context_json
            FROM error_occurrences
            WHERE fingerprint = ?1
            ORDER BY ts DESC, rowid DESC
            LIMIT ?2
            ",
        )?;
        let rows = stmt.query_map(params![fingerprint, limit as i64], |row| {
            Ok(ErrorOccurrence {
                occurrence_id: row.get(0)?,
                fingerprint: row.get(1)?,
                ts: timestamp_column(row, 2)?,
                context: context_column(row, 3)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Records whose `last_context` carries `filter.key == filter.value`,
    /// most recently seen first.
    pub fn recent_for_context(
        &self,
        filter: &ContextFilter,
        limit: usize,
    ) -> Result<Vec<ErrorRecord>, StorageError> {
        let Some(path) = json_key_path(&filter.key) else {
            return Ok(Vec::new());
        };
        let sql = format!(
            "
            SELECT {RECORD_COLUMNS}
            FROM error_records
            WHERE json_extract(last_context_json, ?1) = ?2
            ORDER BY last_seen DESC
            LIMIT ?3
            "
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params![path, filter.value, limit as i64], record_from_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn recent(&self, limit: usize) -> Result<Vec<ErrorRecord>, StorageError> {
        let sql = format!(
            "SELECT {RECORD_COLUMNS} FROM error_records ORDER BY last_seen DESC LIMIT ?1"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map([limit as i64], record_from_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Aggregate view over records with `last_seen >= query.since`.
    pub fn statistics(&self, query: &StatisticsQuery) -> Result<ErrorStatistics, StorageError> {
        let since = format_timestamp(query.since);
        let category = query.category.map(Category::as_str);
        let top_n = query.top_n as i64;

        let total: i64 = self.conn.query_row(
            "
            SELECT COUNT(*)
            FROM error_records
            WHERE last_seen >= ?1 AND (?2 IS NULL OR category = ?2)
            ",
            params![since, category],
            |row| row.get(0),
        )?;

        let mut stmt = self.conn.prepare(
            "
            SELECT category, COUNT(*) AS hits
            FROM error_records
            WHERE last_seen >= ?1 AND (?2 IS NULL OR category = ?2)
            GROUP BY category
            ORDER BY hits DESC, category ASC
            ",
        )?;
        let categories = stmt
            .query_map(params![since, category], |row| {
                let tag: String = row.get(0)?;
                let count: i64 = row.get(1)?;
                Ok(CategoryCount {
                    category: parse_category(&tag),
                    count: count as u64,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let most_frequent = self.summaries(
            "occurrence_count DESC, last_seen DESC",
            &since,
            category,
            top_n,
        )?;
        let recent = self.summaries("last_seen DESC", &since, category, top_n)?;

        Ok(ErrorStatistics {
            window_days: query.window_days,
            since: query.since,
            total: total as u64,
            categories,
            most_frequent,
            recent,
        })
    }

    fn summaries(
        &self,
        order_by: &str,
        since: &str,
        category: Option<&str>,
        limit: i64,
    ) -> Result<Vec<ErrorSummary>, StorageError> {
        let sql = format!(
            "
            SELECT {RECORD_COLUMNS}
            FROM error_records
            WHERE last_seen >= ?1 AND (?2 IS NULL OR category = ?2)
            ORDER BY {order_by}
            LIMIT ?3
            "
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params![since, category, limit], record_from_row)?;
        let mut summaries = Vec::new();
        for record in rows {
            summaries.push(ErrorSummary::from(&record?));
        }
        Ok(summaries)
    }

    /// Delete records last seen before `cutoff` together with their history.
    pub fn prune_older_than(&self, cutoff: DateTime<Utc>) -> Result<usize, StorageError> {
        let cutoff = format_timestamp(cutoff);
        let tx = self.conn.unchecked_transaction()?;
        tx.execute(
            "
            DELETE FROM error_occurrences
            WHERE fingerprint IN (
                SELECT fingerprint FROM error_records WHERE last_seen < ?1
            )
            ",
            [&cutoff],
        )?;
        let removed = tx.execute("DELETE FROM error_records WHERE last_seen < ?1", [&cutoff])?;
        tx.commit()?;
        Ok(removed)
    }

    pub fn record_count(&self) -> Result<i64, StorageError> {
        Ok(self
            .conn
            .query_row("SELECT COUNT(*) FROM error_records", [], |row| row.get(0))?)
    }

    pub fn occurrence_row_count(&self, fingerprint: &str) -> Result<i64, StorageError> {
        Ok(self.conn.query_row(
            "SELECT COUNT(*) FROM error_occurrences WHERE fingerprint = ?1",
            [fingerprint],
            |row| row.get(0),
        )?)
    }

    pub fn table_exists(&self, table_name: &str) -> Result<bool, StorageError> {
        let exists = self
            .conn
            .query_row(
                "
                SELECT 1
                FROM sqlite_master
                WHERE type='table' AND name = ?1
                LIMIT 1
                ",
                [table_name],
                |_| Ok(()),
            )
            .optional()?;
        Ok(exists.is_some())
    }
}

fn record_from_row(row: &Row<'_>) -> rusqlite::Result<ErrorRecord> {
    let category: String = row.get(1)?;
    let occurrence_count: i64 = row.get(7)?;
    Ok(ErrorRecord {
        fingerprint: row.get(0)?,
        category: parse_category(&category),
        error_type: row.get(2)?,
        error_message: row.get(3)?,
        normalized_message: row.get(4)?,
        first_seen: timestamp_column(row, 5)?,
        last_seen: timestamp_column(row, 6)?,
        occurrence_count: occurrence_count as u64,
        last_message: row.get(8)?,
        last_context: context_column(row, 9)?,
        last_traceback: row.get(10)?,
    })
}

fn timestamp_column(row: &Row<'_>, index: usize) -> rusqlite::Result<DateTime<Utc>> {
    let value: String = row.get(index)?;
    parse_timestamp(value).map_err(|err| {
        rusqlite::Error::FromSqlConversionFailure(
            index,
            rusqlite::types::Type::Text,
            Box::new(err),
        )
    })
}

fn context_column(row: &Row<'_>, index: usize) -> rusqlite::Result<ErrorContext> {
    let value: String = row.get(index)?;
    serde_json::from_str(&value).map_err(|err| {
        rusqlite::Error::FromSqlConversionFailure(
            index,
            rusqlite::types::Type::Text,
            Box::new(err),
        )
    })
}

// Unknown tags from older writers degrade to `unknown` instead of failing the read.
fn parse_category(tag: &str) -> Category {
    tag.parse().unwrap_or(Category::Unknown)
}

/// Fixed-width RFC 3339 so that text comparison orders instants correctly.
fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(value: String) -> Result<DateTime<Utc>, StorageError> {
    DateTime::parse_from_rfc3339(&value)
        .map(|timestamp| timestamp.with_timezone(&Utc))
        .map_err(|err| StorageError::Timestamp(err.to_string()))
}

fn escape_like(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for ch in value.chars() {
        if matches!(ch, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped
}

fn json_key_path(key: &str) -> Option<String> {
    let key = key.trim();
    if key.is_empty() || key.contains('"') {
        return None;
    }
    Some(format!("$.\"{key}\""))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration as ChronoDuration, TimeZone};
    use tempfile::NamedTempFile;

    fn ts(hour: u32, min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 2, 23, hour, min, 0)
            .single()
            .expect("valid timestamp")
    }

    fn context(pairs: &[(&str, &str)]) -> ErrorContext {
        ErrorContext::from(
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect::<std::collections::BTreeMap<_, _>>(),
        )
    }

    fn occurrence(id: &str, fingerprint: &str, at: DateTime<Utc>) -> Occurrence {
        Occurrence {
            occurrence_id: id.to_string(),
            fingerprint: fingerprint.to_string(),
            category: Category::Sftp,
            error_type: "TimeoutError".to_string(),
            message: format!("timed out reading /logs/{id}.csv"),
            normalized_message: "timed out reading <PATH>".to_string(),
            context: context(&[("guild_id", "100"), ("occurrence", id)]),
            traceback: Some(format!("trace {id}")),
            ts: at,
        }
    }

    #[test]
    fn migration_creates_telemetry_tables() {
        let db = ErrorStore::open_in_memory().expect("open db");
        for table in ["error_records", "error_occurrences"] {
            assert!(db.table_exists(table).expect("table check"));
        }
        assert_eq!(
            db.schema_version().expect("schema version"),
            TELEMETRY_SCHEMA_VERSION
        );
    }

    #[test]
    fn reopening_a_file_store_keeps_records_and_schema() {
        let file = NamedTempFile::new().expect("temp file");
        {
            let db = ErrorStore::open(file.path()).expect("open db");
            db.record_occurrence(&occurrence("o1", "fp-a", ts(10, 0)))
                .expect("record");
        }
        let db = ErrorStore::open(file.path()).expect("reopen db");
        assert_eq!(db.schema_version().expect("schema"), TELEMETRY_SCHEMA_VERSION);
        assert_eq!(db.record_count().expect("count"), 1);
    }

    #[test]
    fn newer_schema_is_rejected() {
        let file = NamedTempFile::new().expect("temp file");
        {
            let conn = Connection::open(file.path()).expect("open raw");
            conn.execute("PRAGMA user_version = 9", []).expect("bump version");
        }
        let err = ErrorStore::open(file.path()).err().expect("should fail");
        assert!(matches!(
            err,
            StorageError::UnsupportedSchemaVersion { found: 9, .. }
        ));
    }

    #[test]
    fn first_occurrence_creates_and_later_ones_merge() {
        let db = ErrorStore::open_in_memory().expect("open db");
        let first = db
            .record_occurrence(&occurrence("o1", "fp-a", ts(10, 0)))
            .expect("first");
        assert_eq!(
            first,
            UpsertOutcome {
                occurrence_count: 1,
                created: true
            }
        );

        db.record_occurrence(&occurrence("o2", "fp-a", ts(10, 5)))
            .expect("second");
        let third = db
            .record_occurrence(&occurrence("o3", "fp-a", ts(10, 9)))
            .expect("third");
        assert_eq!(third.occurrence_count, 3);
        assert!(!third.created);

        let record = db.record("fp-a").expect("load").expect("exists");
        assert_eq!(record.occurrence_count, 3);
        assert_eq!(record.first_seen, ts(10, 0));
        assert_eq!(record.last_seen, ts(10, 9));
        assert_eq!(record.error_message, "timed out reading /logs/o1.csv");
        assert_eq!(record.last_message, "timed out reading /logs/o3.csv");
        assert_eq!(record.last_context.get("occurrence"), Some("o3"));
        assert_eq!(record.last_traceback.as_deref(), Some("trace o3"));
        assert_eq!(record.category, Category::Sftp);
        assert_eq!(db.record_count().expect("count"), 1);
    }

    #[test]
    fn late_arriving_occurrence_does_not_move_last_seen_backwards() {
        let db = ErrorStore::open_in_memory().expect("open db");
        db.record_occurrence(&occurrence("o1", "fp-a", ts(10, 0)))
            .expect("first");
        db.record_occurrence(&occurrence("o2", "fp-a", ts(12, 0)))
            .expect("newer");
        db.record_occurrence(&occurrence("o3", "fp-a", ts(9, 0)))
            .expect("older");

        let record = db.record("fp-a").expect("load").expect("exists");
        assert_eq!(record.occurrence_count, 3);
        assert_eq!(record.first_seen, ts(9, 0));
        assert_eq!(record.last_seen, ts(12, 0));
        assert_eq!(record.last_context.get("occurrence"), Some("o2"));
    }

    #[test]
    fn occurrence_history_is_bounded_and_newest_first() {
        let mut db = ErrorStore::open_in_memory().expect("open db");
        db.set_history_limit(3);
        for minute in 0..6 {
            db.record_occurrence(&occurrence(&format!("o{minute}"), "fp-a", ts(10, minute)))
                .expect("record");
        }
        assert_eq!(db.occurrence_row_count("fp-a").expect("rows"), 3);

        let details = db.details("fp-a", 10).expect("details").expect("exists");
        let ids = details
            .recent_occurrences
            .iter()
            .map(|o| o.occurrence_id.as_str())
            .collect::<Vec<_>>();
        assert_eq!(ids, vec!["o5", "o4", "o3"]);
        assert_eq!(details.record.occurrence_count, 6);
        assert!(db.details("missing", 10).expect("details").is_none());
    }

    #[test]
    fn fragment_lookup_escapes_like_wildcards() {
        let db = ErrorStore::open_in_memory().expect("open db");
        db.record_occurrence(&occurrence("o1", "abc123def", ts(10, 0)))
            .expect("record");

        let found = db
            .find_by_fingerprint_fragment("123")
            .expect("search")
            .expect("match");
        assert_eq!(found.fingerprint, "abc123def");
        assert!(db.find_by_fingerprint_fragment("%").expect("search").is_none());
        assert!(db.find_by_fingerprint_fragment("_").expect("search").is_none());
        assert!(db.find_by_fingerprint_fragment("  ").expect("search").is_none());
        assert!(db.find_by_fingerprint_fragment("zzz").expect("search").is_none());
    }

    #[test]
    fn recent_for_context_filters_and_orders_by_last_seen() {
        let db = ErrorStore::open_in_memory().expect("open db");
        let mut a = occurrence("o1", "fp-a", ts(10, 0));
        a.context = context(&[("guild_id", "100")]);
        let mut b = occurrence("o2", "fp-b", ts(11, 0));
        b.context = context(&[("guild_id", "100")]);
        let mut c = occurrence("o3", "fp-c", ts(12, 0));
        c.context = context(&[("guild_id", "200")]);
        for occ in [&a, &b, &c] {
            db.record_occurrence(occ).expect("record");
        }

        let filter = ContextFilter::new("guild_id", "100");
        let rows = db.recent_for_context(&filter, 10).expect("query");
        let fingerprints = rows.iter().map(|r| r.fingerprint.as_str()).collect::<Vec<_>>();
        assert_eq!(fingerprints, vec!["fp-b", "fp-a"]);

        assert_eq!(db.recent_for_context(&filter, 1).expect("query").len(), 1);
        assert!(db
            .recent_for_context(&ContextFilter::new("bad\"key", "100"), 10)
            .expect("query")
            .is_empty());
        assert_eq!(db.recent(2).expect("recent")[0].fingerprint, "fp-c");
    }

    #[test]
    fn statistics_window_is_inclusive_at_the_boundary() {
        let db = ErrorStore::open_in_memory().expect("open db");
        let now = ts(12, 0);
        let since = now - ChronoDuration::days(7);

        let mut on_boundary = occurrence("o1", "fp-boundary", since);
        on_boundary.category = Category::Database;
        let mut too_old = occurrence("o2", "fp-old", since - ChronoDuration::days(1));
        too_old.category = Category::Database;
        db.record_occurrence(&on_boundary).expect("record");
        db.record_occurrence(&too_old).expect("record");
        for minute in 0..3 {
            db.record_occurrence(&occurrence(&format!("s{minute}"), "fp-sftp", ts(11, minute)))
                .expect("record");
        }

        let stats = db
            .statistics(&StatisticsQuery {
                since,
                window_days: 7,
                category: None,
                top_n: 10,
            })
            .expect("stats");
        assert_eq!(stats.total, 2);
        assert_eq!(stats.category_count(Category::Sftp), 1);
        assert_eq!(stats.category_count(Category::Database), 1);
        assert_eq!(stats.most_frequent[0].fingerprint, "fp-sftp");
        assert_eq!(stats.most_frequent[0].count, 3);
        assert_eq!(stats.recent[0].fingerprint, "fp-sftp");
        assert!(stats
            .most_frequent
            .iter()
            .all(|summary| summary.fingerprint != "fp-old"));
    }

    #[test]
    fn statistics_can_be_scoped_to_a_category_and_top_n() {
        let db = ErrorStore::open_in_memory().expect("open db");
        for (idx, fingerprint) in ["fp-1", "fp-2", "fp-3"].iter().enumerate() {
            db.record_occurrence(&occurrence(&format!("o{idx}"), fingerprint, ts(10, idx as u32)))
                .expect("record");
        }
        let mut other = occurrence("x", "fp-db", ts(10, 30));
        other.category = Category::Database;
        db.record_occurrence(&other).expect("record");

        let stats = db
            .statistics(&StatisticsQuery {
                since: ts(0, 0),
                window_days: 1,
                category: Some(Category::Sftp),
                top_n: 2,
            })
            .expect("stats");
        assert_eq!(stats.total, 3);
        assert_eq!(stats.categories.len(), 1);
        assert_eq!(stats.most_frequent.len(), 2);
    }

    #[test]
    fn empty_store_statistics_are_zero_not_errors() {
        let db = ErrorStore::open_in_memory().expect("open db");
        let stats = db
            .statistics(&StatisticsQuery {
                since: ts(0, 0),
                window_days: 7,
                category: None,
                top_n: 10,
            })
            .expect("stats");
        assert_eq!(stats.total, 0);
        assert!(stats.categories.is_empty());
        assert!(stats.most_frequent.is_empty());
    }

    #[test]
    fn prune_removes_stale_records_and_history() {
        let db = ErrorStore::open_in_memory().expect("open db");
        db.record_occurrence(&occurrence("o1", "fp-old", ts(1, 0)))
            .expect("record");
        db.record_occurrence(&occurrence("o2", "fp-new", ts(20, 0)))
            .expect("record");

        let removed = db.prune_older_than(ts(12, 0)).expect("prune");
        assert_eq!(removed, 1);
        assert!(db.record("fp-old").expect("load").is_none());
        assert_eq!(db.occurrence_row_count("fp-old").expect("rows"), 0);
        assert!(db.record("fp-new").expect("load").is_some());
    }

    #[test]
    fn unknown_category_tags_degrade_to_unknown() {
        let db = ErrorStore::open_in_memory().expect("open db");
        db.record_occurrence(&occurrence("o1", "fp-a", ts(10, 0)))
            .expect("record");
        db.conn
            .execute(
                "UPDATE error_records SET category = 'legacy_tag' WHERE fingerprint = 'fp-a'",
                [],
            )
            .expect("update");
        let record = db.record("fp-a").expect("load").expect("exists");
        assert_eq!(record.category, Category::Unknown);
    }

    #[test]
    fn busy_errors_are_transient() {
        let busy = StorageError::Sqlite(rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_BUSY),
            None,
        ));
        assert!(busy.is_transient());
        assert!(!StorageError::Serialization("bad".to_string()).is_transient());
    }
}
