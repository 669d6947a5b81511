//! Read-only aggregate and history queries over the ledger.
//!
//! `filter` is a destination-path substring, which in practice selects one
//! location's output directory.

use crate::models::{ConversionStatus, HistoryEntry, LedgerStats, Page};
use sqlx::{Row, SqlitePool};

const RECENT_WINDOW: i64 = 100;

const FILTER: &str = "(?1 IS NULL OR dst_fullpath LIKE '%' || ?1 || '%')";

pub async fn stats(pool: &SqlitePool, filter: Option<&str>) -> anyhow::Result<LedgerStats> {
    let row = sqlx::query(&format!(
        "SELECT COUNT(*) AS total, SUM(saved_mb) AS saved FROM conversions WHERE status = 'SUCCESS' AND {FILTER}"
    ))
    .bind(filter)
    .fetch_one(pool)
    .await?;
    let total_files: i64 = row.get("total");
    let saved: Option<f64> = row.get("saved");

    let recent: Vec<String> = sqlx::query_scalar(&format!(
        "SELECT status FROM conversions WHERE {FILTER} ORDER BY converted_at DESC, id DESC LIMIT ?2"
    ))
    .bind(filter)
    .bind(RECENT_WINDOW)
    .fetch_all(pool)
    .await?;
    let success_rate = if recent.is_empty() {
        0.0
    } else {
        let ok = recent
            .iter()
            .filter(|s| s.as_str() == ConversionStatus::Success.as_str())
            .count();
        round_to(ok as f64 / recent.len() as f64 * 100.0, 1)
    };

    let last_run: Option<i64> = sqlx::query_scalar(&format!(
        "SELECT MAX(converted_at) FROM conversions WHERE {FILTER}"
    ))
    .bind(filter)
    .fetch_one(pool)
    .await?;

    Ok(LedgerStats {
        total_files,
        total_saved_mb: saved.map(|mb| round_to(mb, 2)).unwrap_or(0.0),
        success_rate,
        last_run,
    })
}

/// Newest-first attempts. Rows that recorded no dimensions of their own
/// (SKIPPED_DUP, ALREADY_DONE) borrow them from the latest SUCCESS row with
/// the same fingerprint.
pub async fn history(
    pool: &SqlitePool,
    page: Page,
    filter: Option<&str>,
) -> anyhow::Result<Vec<HistoryEntry>> {
    let rows = sqlx::query(
        r#"
        SELECT c.id, c.converted_at, c.src_name, c.dst_fullpath, c.status,
               COALESCE(c.orig_width, s.orig_width) AS orig_width,
               COALESCE(c.orig_height, s.orig_height) AS orig_height,
               COALESCE(c.new_width, s.new_width) AS new_width,
               COALESCE(c.new_height, s.new_height) AS new_height,
               c.saved_mb, c.duration_ms
        FROM conversions c
        LEFT JOIN conversions s ON s.id = (
            SELECT s2.id FROM conversions s2
            WHERE s2.src_hash = c.src_hash AND s2.status = 'SUCCESS'
            ORDER BY s2.converted_at DESC, s2.id DESC
            LIMIT 1
        )
        WHERE (?1 IS NULL OR c.dst_fullpath LIKE '%' || ?1 || '%')
        ORDER BY c.converted_at DESC, c.id DESC
        LIMIT ?2 OFFSET ?3
        "#,
    )
    .bind(filter)
    .bind(i64::from(page.per_page))
    .bind(page.offset())
    .fetch_all(pool)
    .await?;

    let mut out = Vec::with_capacity(rows.len());
    for row in rows {
        let status: String = row.get("status");
        out.push(HistoryEntry {
            id: row.get("id"),
            converted_at: row.get("converted_at"),
            src_name: row.get("src_name"),
            dst_fullpath: row.get("dst_fullpath"),
            status: status.parse()?,
            orig_width: row.get("orig_width"),
            orig_height: row.get("orig_height"),
            new_width: row.get("new_width"),
            new_height: row.get("new_height"),
            saved_mb: row.get::<Option<f64>, _>("saved_mb").unwrap_or(0.0),
            duration_ms: row.get("duration_ms"),
        });
    }
    Ok(out)
}

fn round_to(v: f64, places: i32) -> f64 {
    let f = 10f64.powi(places);
    (v * f).round() / f
}
