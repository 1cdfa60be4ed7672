use chrono::{DateTime, SecondsFormat, Utc};
use faultline_core::{ErrorDetails, ErrorRecord, ErrorStatistics, ErrorSummary};
use std::fmt::Write;

const SHORT_FINGERPRINT: usize = 12;
const MESSAGE_PREVIEW_CHARS: usize = 80;

pub fn statistics(stats: &ErrorStatistics) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "Errors in the last {} day(s) (since {}): {}",
        stats.window_days,
        timestamp(stats.since),
        stats.total
    );
    if stats.total == 0 {
        return out;
    }

    let _ = writeln!(out, "\nBy category:");
    for entry in &stats.categories {
        let _ = writeln!(out, "  {:<12} {}", entry.category.as_str(), entry.count);
    }

    let _ = writeln!(out, "\nMost frequent:");
    for summary in &stats.most_frequent {
        out.push_str(&summary_line(summary));
    }

    let _ = writeln!(out, "\nMost recent:");
    for summary in &stats.recent {
        out.push_str(&summary_line(summary));
    }
    out
}

pub fn details(details: &ErrorDetails) -> String {
    let record = &details.record;
    let mut out = String::new();
    let _ = writeln!(out, "Fingerprint: {}", record.fingerprint);
    let _ = writeln!(out, "Category:    {}", record.category);
    let _ = writeln!(out, "Type:        {}", record.error_type);
    let _ = writeln!(out, "Count:       {}", record.occurrence_count);
    let _ = writeln!(out, "First seen:  {}", timestamp(record.first_seen));
    let _ = writeln!(out, "Last seen:   {}", timestamp(record.last_seen));
    let _ = writeln!(out, "Message:     {}", record.error_message);
    if record.last_message != record.error_message {
        let _ = writeln!(out, "Last:        {}", record.last_message);
    }

    if !record.last_context.is_empty() {
        let _ = writeln!(out, "\nContext:");
        for (key, value) in record.last_context.iter() {
            let _ = writeln!(out, "  {key} = {value}");
        }
    }

    if !details.recent_occurrences.is_empty() {
        let _ = writeln!(out, "\nRecent occurrences:");
        for occurrence in &details.recent_occurrences {
            let _ = writeln!(
                out,
                "  {}  {}",
                timestamp(occurrence.ts),
                occurrence.occurrence_id
            );
        }
    }

    if let Some(traceback) = &record.last_traceback {
        let _ = writeln!(out, "\nTraceback:\n{traceback}");
    }
    out
}

pub fn records(records: &[ErrorRecord]) -> String {
    if records.is_empty() {
        return "No matching errors.\n".to_string();
    }
    let mut out = String::new();
    for record in records {
        out.push_str(&summary_line(&ErrorSummary::from(record)));
    }
    out
}

fn summary_line(summary: &ErrorSummary) -> String {
    format!(
        "  {}  {:<12} x{:<5} {}  {}: {}\n",
        short(&summary.fingerprint),
        summary.category.as_str(),
        summary.count,
        timestamp(summary.last_seen),
        summary.error_type,
        preview(&summary.message)
    )
}

fn short(fingerprint: &str) -> &str {
    fingerprint
        .char_indices()
        .nth(SHORT_FINGERPRINT)
        .map_or(fingerprint, |(cut, _)| &fingerprint[..cut])
}

fn preview(message: &str) -> String {
    if message.chars().count() <= MESSAGE_PREVIEW_CHARS {
        return message.to_string();
    }
    let mut text: String = message.chars().take(MESSAGE_PREVIEW_CHARS).collect();
    text.push_str("...");
    text
}

fn timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Secs, true)
}
