mod render;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use faultline_core::{Category, ContextFilter, TrackedError};
use faultline_engine::{
    EngineConfig, QueryOutcome, TelemetryEngine, TrackStatus, DEFAULT_RECENT_LIMIT,
};
use faultline_storage::SqliteTelemetryStore;
use serde::Serialize;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

const DEFAULT_DB_PATH: &str = ".faultline/telemetry.db";
const DEFAULT_STATS_DAYS: u32 = 7;

#[derive(Parser)]
#[command(name = "faultline")]
#[command(about = "Inspect and manage captured error telemetry", long_about = None)]
struct Cli {
    /// SQLite database path (defaults to $FAULTLINE_DB or .faultline/telemetry.db)
    #[arg(long, global = true)]
    db: Option<PathBuf>,
    #[arg(long, global = true, default_value_t = false)]
    debug: bool,
    /// Print results as JSON
    #[arg(long, global = true, default_value_t = false)]
    json: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Aggregate statistics over a time window
    Stats {
        #[arg(long, default_value_t = DEFAULT_STATS_DAYS)]
        days: u32,
        #[arg(long)]
        category: Option<Category>,
    },
    /// Show one error by full or partial fingerprint
    Show { fingerprint: String },
    /// List recently seen errors, optionally filtered by a context key
    Recent {
        #[arg(long, requires = "value")]
        key: Option<String>,
        #[arg(long, requires = "key")]
        value: Option<String>,
        #[arg(long, default_value_t = DEFAULT_RECENT_LIMIT)]
        limit: usize,
    },
    /// Record an error occurrence by hand
    Track {
        #[arg(long)]
        kind: String,
        #[arg(long)]
        message: String,
        #[arg(long = "context", value_parser = parse_context_pair)]
        context: Vec<(String, String)>,
    },
    /// Delete errors not seen within the retention window
    Prune {
        #[arg(long)]
        days: Option<u32>,
    },
}

#[derive(Serialize)]
struct TrackReport<'a> {
    fingerprint: &'a str,
    category: Category,
    status: &'a str,
    reason: Option<&'a str>,
    notify: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.debug);

    let config = EngineConfig::from_env();
    let db_path = resolve_db_path(cli.db.clone(), |key| std::env::var(key).ok());
    if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let store = SqliteTelemetryStore::open(&db_path)
        .with_context(|| format!("Failed to open telemetry database {}", db_path.display()))?
        .with_history_limit(config.max_recent_occurrences);
    let engine = TelemetryEngine::new(Arc::new(store), config);

    match cli.command {
        Commands::Stats { days, category } => {
            let outcome = match category {
                Some(category) => engine.statistics_for_category(days, category).await,
                None => engine.statistics(days).await,
            };
            match outcome {
                QueryOutcome::Found(stats) if cli.json => print_json(&stats)?,
                QueryOutcome::Found(stats) => print!("{}", render::statistics(&stats)),
                QueryOutcome::NotFound => println!("No errors recorded."),
                QueryOutcome::Unavailable { reason } => {
                    println!("Statistics unavailable: {reason}")
                }
            }
        }
        Commands::Show { fingerprint } => match engine.get_error_details(&fingerprint).await {
            QueryOutcome::Found(details) if cli.json => print_json(&details)?,
            QueryOutcome::Found(details) => print!("{}", render::details(&details)),
            QueryOutcome::NotFound => println!("No error found matching '{fingerprint}'."),
            QueryOutcome::Unavailable { reason } => println!("Error lookup unavailable: {reason}"),
        },
        Commands::Recent { key, value, limit } => {
            let outcome = match (key, value) {
                (Some(key), Some(value)) => {
                    engine
                        .recent_for_context(ContextFilter::new(key, value), limit)
                        .await
                }
                _ => engine.recent_errors(limit).await,
            };
            match outcome {
                QueryOutcome::Found(records) if cli.json => print_json(&records)?,
                QueryOutcome::Found(records) => print!("{}", render::records(&records)),
                QueryOutcome::NotFound => println!("No matching errors."),
                QueryOutcome::Unavailable { reason } => {
                    println!("Recent errors unavailable: {reason}")
                }
            }
        }
        Commands::Track {
            kind,
            message,
            context,
        } => {
            let mut error = TrackedError::new(kind, message);
            for (key, value) in context {
                error = error.with_context(key, value);
            }
            let outcome = engine.track_error(error).await;
            let (status, reason) = match &outcome.status {
                TrackStatus::Recorded => ("recorded", None),
                TrackStatus::Degraded { reason } => ("degraded", Some(reason.as_str())),
                TrackStatus::Disabled => ("disabled", None),
            };
            if cli.json {
                print_json(&TrackReport {
                    fingerprint: &outcome.fingerprint,
                    category: outcome.category,
                    status,
                    reason,
                    notify: outcome.notify,
                })?;
            } else {
                println!("{} {} ({status})", outcome.fingerprint, outcome.category);
                if let Some(reason) = reason {
                    println!("Store unavailable: {reason}");
                }
            }
        }
        Commands::Prune { days } => {
            let days = days.unwrap_or(engine.config().retention_days);
            match engine.prune(days).await {
                Ok(removed) => println!("Removed {removed} error(s) not seen in {days} day(s)."),
                Err(err) => println!("Prune unavailable: {err}"),
            }
        }
    }

    Ok(())
}

fn init_logging(debug: bool) {
    let level = if debug {
        "debug".to_string()
    } else if let Ok(level) = std::env::var("FAULTLINE_LOG_LEVEL") {
        level
    } else {
        "info".to_string()
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);
}

fn resolve_db_path<F>(arg: Option<PathBuf>, lookup: F) -> PathBuf
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(path) = arg {
        return path;
    }
    match lookup("FAULTLINE_DB") {
        Some(value) if !value.trim().is_empty() => PathBuf::from(value.trim()),
        _ => PathBuf::from(DEFAULT_DB_PATH),
    }
}

fn parse_context_pair(raw: &str) -> Result<(String, String), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got '{raw}'"))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("empty context key in '{raw}'"));
    }
    Ok((key.to_string(), value.to_string()))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let text = serde_json::to_string_pretty(value).context("Failed to encode JSON output")?;
    println!("{text}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn db_path_prefers_flag_then_env_then_default() {
        let flag = resolve_db_path(Some(PathBuf::from("/tmp/a.db")), |_| {
            Some("/tmp/b.db".to_string())
        });
        assert_eq!(flag, PathBuf::from("/tmp/a.db"));

        let env = resolve_db_path(None, |_| Some(" /tmp/b.db ".to_string()));
        assert_eq!(env, PathBuf::from("/tmp/b.db"));

        let fallback = resolve_db_path(None, |_| Some("  ".to_string()));
        assert_eq!(fallback, PathBuf::from(DEFAULT_DB_PATH));
    }

    #[test]
    fn context_pairs_split_on_first_equals() {
        assert_eq!(
            parse_context_pair("query=a=b"),
            Ok(("query".to_string(), "a=b".to_string()))
        );
        assert!(parse_context_pair("novalue").is_err());
        assert!(parse_context_pair("=x").is_err());
    }

    #[test]
    fn subcommands_parse() {
        let cli = Cli::try_parse_from([
            "faultline",
            "--db",
            "x.db",
            "stats",
            "--days",
            "3",
            "--category",
            "sftp",
        ])
        .expect("parse stats");
        assert_eq!(cli.db, Some(PathBuf::from("x.db")));
        assert!(matches!(
            cli.command,
            Commands::Stats {
                days: 3,
                category: Some(Category::Sftp)
            }
        ));

        let cli = Cli::try_parse_from([
            "faultline",
            "track",
            "--kind",
            "KeyError",
            "--message",
            "'kills'",
            "--context",
            "guild_id=1",
            "--context",
            "command=stats",
        ])
        .expect("parse track");
        match cli.command {
            Commands::Track { context, .. } => assert_eq!(context.len(), 2),
            _ => panic!("expected track"),
        }

        assert!(Cli::try_parse_from(["faultline", "recent", "--key", "guild_id"]).is_err());
        assert!(Cli::try_parse_from(["faultline", "stats", "--category", "bogus"]).is_err());
    }
}
