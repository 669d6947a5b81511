//! Storage layer: the conversion ledger on SQLite.
//!
//! Holds pool setup, the additive schema migration, and the ledger, report and
//! maintenance queries built on top of it.

use anyhow::Context;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Row, SqlitePool};
use std::collections::HashSet;
use std::path::Path;
use std::str::FromStr;
use tracing::{debug, info};

pub mod ledger;
pub mod maintenance;
pub mod models;
pub mod report;

pub use ledger::{Ledger, Recorded};
pub use models::{ConversionStatus, HistoryEntry, LedgerStats, NewConversion, Page};

/// How a ledger database is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    /// Used by the conversion run: creates the file, migrates, writes.
    ReadWrite,
    /// Used by reporting: never creates, never migrates, never writes.
    ReadOnly,
}

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS conversions (
        id INTEGER PRIMARY KEY,
        converted_at INTEGER NOT NULL,
        status TEXT NOT NULL,
        src_name TEXT NOT NULL,
        src_ext TEXT NOT NULL,
        src_fullpath TEXT NOT NULL,
        dst_fullpath TEXT,
        src_hash TEXT,
        orig_width INTEGER,
        orig_height INTEGER,
        new_width INTEGER,
        new_height INTEGER,
        out_size_bytes INTEGER,
        duration_ms INTEGER,
        conversion_mode TEXT,
        conversion_args TEXT,
        error TEXT,
        src_size INTEGER,
        src_mtime INTEGER,
        saved_percent INTEGER,
        saved_mb REAL,
        last_checked_at INTEGER
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_conversions_src_hash ON conversions(src_hash)",
    "CREATE INDEX IF NOT EXISTS idx_conversions_src_path ON conversions(src_fullpath)",
    "CREATE INDEX IF NOT EXISTS idx_conversions_when ON conversions(converted_at)",
    "CREATE INDEX IF NOT EXISTS idx_hash_dst ON conversions(src_hash, dst_fullpath)",
];

/// Columns added after the first schema shipped. Older databases get them on open.
const ADDITIVE_COLUMNS: &[(&str, &str)] = &[
    ("conversion_mode", "TEXT"),
    ("conversion_args", "TEXT"),
    ("last_checked_at", "INTEGER"),
];

pub async fn connect(database_url: &str, mode: OpenMode) -> anyhow::Result<SqlitePool> {
    let opts = if database_url.starts_with("sqlite:") {
        SqliteConnectOptions::from_str(database_url)?
    } else {
        let path = Path::new(database_url);
        if mode == OpenMode::ReadWrite {
            if let Some(parent) = path.parent() {
                let _ = std::fs::create_dir_all(parent);
            }
        }
        SqliteConnectOptions::new().filename(path)
    };

    let opts = match mode {
        OpenMode::ReadWrite => opts
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal),
        OpenMode::ReadOnly => opts.read_only(true),
    };

    // One writer connection keeps the run's check-then-insert sequence serial.
    let max_connections = match mode {
        OpenMode::ReadWrite => 1,
        OpenMode::ReadOnly => 5,
    };

    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections)
        .connect_with(opts)
        .await
        .with_context(|| format!("open ledger {database_url} ({mode:?})"))?;
    debug!(database = database_url, ?mode, "ledger connected");
    Ok(pool)
}

/// Creates the schema if absent and adds any missing additive column.
///
/// Safe to run on every write-mode open. Existing rows are never touched.
pub async fn migrate(pool: &SqlitePool) -> anyhow::Result<()> {
    for stmt in SCHEMA {
        sqlx::query(stmt).execute(pool).await.context("apply schema")?;
    }
    ensure_columns(pool).await
}

async fn ensure_columns(pool: &SqlitePool) -> anyhow::Result<()> {
    let rows = sqlx::query("PRAGMA table_info(conversions)")
        .fetch_all(pool)
        .await?;
    let present: HashSet<String> = rows
        .iter()
        .filter_map(|r| r.try_get::<String, _>("name").ok())
        .collect();

    for (name, ty) in ADDITIVE_COLUMNS {
        if present.contains(*name) {
            continue;
        }
        sqlx::query(&format!("ALTER TABLE conversions ADD COLUMN {name} {ty}"))
            .execute(pool)
            .await
            .with_context(|| format!("add column {name}"))?;
        info!(column = name, "ledger schema patched");
    }
    Ok(())
}
