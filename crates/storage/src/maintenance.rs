//! Offline compaction. Never invoked by a conversion run.

use serde::Serialize;
use sqlx::{Row, SqlitePool};
use tracing::info;

#[derive(Debug, Clone, Default, Serialize)]
pub struct CompactSummary {
    pub groups: usize,
    pub deleted: u64,
}

/// Collapses every `(src_hash, dst_fullpath)` group with more than one row
/// into a single primary row: the earliest SUCCESS, or the earliest row when
/// none succeeded. The primary's `last_checked_at` becomes the newest
/// `converted_at` in the group. Ends with a VACUUM.
pub async fn compact(pool: &SqlitePool) -> anyhow::Result<CompactSummary> {
    let groups = sqlx::query(
        r#"
        SELECT src_hash, dst_fullpath
        FROM conversions
        WHERE src_hash IS NOT NULL AND dst_fullpath IS NOT NULL
        GROUP BY src_hash, dst_fullpath
        HAVING COUNT(*) > 1
        "#,
    )
    .fetch_all(pool)
    .await?;

    let mut summary = CompactSummary {
        groups: groups.len(),
        deleted: 0,
    };
    info!(groups = summary.groups, "compacting duplicate ledger rows");

    let mut tx = pool.begin().await?;
    for group in &groups {
        let hash: String = group.get(0);
        let dst: String = group.get(1);
        let rows = sqlx::query(
            "SELECT id, status, converted_at FROM conversions WHERE src_hash = ?1 AND dst_fullpath = ?2 ORDER BY converted_at ASC, id ASC",
        )
        .bind(&hash)
        .bind(&dst)
        .fetch_all(&mut *tx)
        .await?;

        let rows: Vec<(i64, String, i64)> = rows
            .iter()
            .map(|r| (r.get(0), r.get(1), r.get(2)))
            .collect();
        let Some(primary) = rows
            .iter()
            .find(|(_, status, _)| status == "SUCCESS")
            .or_else(|| rows.first())
            .map(|(id, _, _)| *id)
        else {
            continue;
        };
        let latest = rows.iter().map(|(_, _, at)| *at).max().unwrap_or_default();

        sqlx::query("UPDATE conversions SET last_checked_at = ?1 WHERE id = ?2")
            .bind(latest)
            .bind(primary)
            .execute(&mut *tx)
            .await?;
        let res = sqlx::query(
            "DELETE FROM conversions WHERE src_hash = ?1 AND dst_fullpath = ?2 AND id != ?3",
        )
        .bind(&hash)
        .bind(&dst)
        .bind(primary)
        .execute(&mut *tx)
        .await?;
        summary.deleted += res.rows_affected();
    }
    tx.commit().await?;

    sqlx::query("VACUUM").execute(pool).await?;
    info!(deleted = summary.deleted, "ledger compacted");
    Ok(summary)
}
