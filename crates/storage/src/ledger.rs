//! The conversion ledger: an append-mostly log of attempts that doubles as a
//! content-addressed cache keyed by `(src_hash, dst_fullpath)`.

use crate::models::NewConversion;
use crate::{connect, migrate, OpenMode};
use anyhow::{bail, Context};
use sqlx::SqlitePool;
use std::path::PathBuf;
use tracing::debug;

/// How many recent SUCCESS rows are inspected when looking for a reusable output.
const DUPLICATE_LOOKBACK: i64 = 10;

// A SUCCESS row is only inserted when the (hash, destination) pair has none yet.
// Doing the check inside the INSERT makes the invariant hold at the store level.
const INSERT_SQL: &str = r#"
INSERT INTO conversions (
    converted_at, status, src_name, src_ext, src_fullpath, dst_fullpath,
    src_hash, orig_width, orig_height, new_width, new_height, out_size_bytes,
    duration_ms, conversion_mode, conversion_args, error, src_size, src_mtime,
    saved_percent, saved_mb
)
SELECT ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20
WHERE NOT (
    ?2 = 'SUCCESS' AND EXISTS (
        SELECT 1 FROM conversions
        WHERE src_hash = ?7 AND dst_fullpath = ?6 AND status = 'SUCCESS'
    )
)
"#;

const SELECT_EXISTING: &str = r#"
SELECT dst_fullpath
FROM conversions
WHERE src_hash = ?1 AND status = 'SUCCESS' AND dst_fullpath IS NOT NULL
ORDER BY converted_at DESC, id DESC
LIMIT ?2
"#;

/// What `record_outcome` did with the row it was given.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recorded {
    /// A new row was appended with this id.
    Inserted(i64),
    /// The pair already had an authoritative SUCCESS row; only its
    /// `last_checked_at` advanced.
    Refreshed,
}

#[derive(Debug, Clone)]
pub struct Ledger {
    pool: SqlitePool,
    mode: OpenMode,
}

impl Ledger {
    /// Opens for writing: creates the file if needed and runs the additive migration.
    pub async fn open(database: &str) -> anyhow::Result<Self> {
        let pool = connect(database, OpenMode::ReadWrite).await?;
        migrate(&pool).await.context("ledger migrate")?;
        Ok(Self {
            pool,
            mode: OpenMode::ReadWrite,
        })
    }

    /// Opens an existing ledger for reporting. Never migrates.
    pub async fn open_read_only(database: &str) -> anyhow::Result<Self> {
        let pool = connect(database, OpenMode::ReadOnly).await?;
        Ok(Self {
            pool,
            mode: OpenMode::ReadOnly,
        })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn mode(&self) -> OpenMode {
        self.mode
    }

    pub async fn close(self) {
        self.pool.close().await;
    }

    fn ensure_writable(&self) -> anyhow::Result<()> {
        if self.mode == OpenMode::ReadOnly {
            bail!("ledger is open read-only");
        }
        Ok(())
    }

    /// Appends one attempt row, deriving the savings columns.
    pub async fn record_outcome(&self, rec: &NewConversion) -> anyhow::Result<Recorded> {
        self.ensure_writable()?;
        let (saved_percent, saved_mb) = rec.savings();

        let res = sqlx::query(INSERT_SQL)
            .bind(rec.converted_at)
            .bind(rec.status.as_str())
            .bind(&rec.src_name)
            .bind(&rec.src_ext)
            .bind(&rec.src_fullpath)
            .bind(&rec.dst_fullpath)
            .bind(&rec.src_hash)
            .bind(rec.orig_width)
            .bind(rec.orig_height)
            .bind(rec.new_width)
            .bind(rec.new_height)
            .bind(rec.out_size_bytes)
            .bind(rec.duration_ms)
            .bind(&rec.conversion_mode)
            .bind(&rec.conversion_args)
            .bind(&rec.error)
            .bind(rec.src_size)
            .bind(rec.src_mtime)
            .bind(saved_percent)
            .bind(saved_mb)
            .execute(&self.pool)
            .await
            .with_context(|| format!("record outcome for {}", rec.src_fullpath))?;

        if res.rows_affected() > 0 {
            return Ok(Recorded::Inserted(res.last_insert_rowid()));
        }

        // Only a SUCCESS on an already-authoritative pair is filtered out, so both are Some.
        if let (Some(hash), Some(dst)) = (&rec.src_hash, &rec.dst_fullpath) {
            self.touch_last_checked(hash, dst, rec.converted_at).await?;
        }
        debug!(src = %rec.src_fullpath, "authoritative SUCCESS row kept; refreshed last_checked_at");
        Ok(Recorded::Refreshed)
    }

    /// True iff a SUCCESS row exists for exactly this fingerprint and destination.
    pub async fn already_done_at(&self, src_hash: &str, dst: &str) -> anyhow::Result<bool> {
        let hit: Option<i64> = sqlx::query_scalar(
            "SELECT 1 FROM conversions WHERE src_hash = ?1 AND dst_fullpath = ?2 AND status = 'SUCCESS' LIMIT 1",
        )
        .bind(src_hash)
        .bind(dst)
        .fetch_optional(&self.pool)
        .await?;
        Ok(hit.is_some())
    }

    /// Most recent successful output for this fingerprint that still exists on disk.
    pub async fn find_existing_output(&self, src_hash: &str) -> anyhow::Result<Option<PathBuf>> {
        let rows: Vec<String> = sqlx::query_scalar(SELECT_EXISTING)
            .bind(src_hash)
            .bind(DUPLICATE_LOOKBACK)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows
            .into_iter()
            .map(PathBuf::from)
            .find(|p| p.exists()))
    }

    /// Advances `last_checked_at` on the authoritative row. Returns rows touched.
    pub async fn touch_last_checked(
        &self,
        src_hash: &str,
        dst: &str,
        ts: i64,
    ) -> anyhow::Result<u64> {
        self.ensure_writable()?;
        let res = sqlx::query(
            "UPDATE conversions SET last_checked_at = ?1 WHERE src_hash = ?2 AND dst_fullpath = ?3 AND status = 'SUCCESS'",
        )
        .bind(ts)
        .bind(src_hash)
        .bind(dst)
        .execute(&self.pool)
        .await?;
        Ok(res.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ConversionStatus;

    fn row(status: ConversionStatus, hash: Option<&str>, dst: &str, at: i64) -> NewConversion {
        NewConversion {
            converted_at: at,
            status,
            src_name: "IMG_1.jpg".into(),
            src_ext: ".jpg".into(),
            src_fullpath: "/src/IMG_1.jpg".into(),
            dst_fullpath: Some(dst.to_string()),
            src_hash: hash.map(str::to_string),
            orig_width: Some(4000),
            orig_height: Some(3000),
            new_width: Some(1400),
            new_height: Some(1050),
            out_size_bytes: Some(500_000),
            duration_ms: 12,
            conversion_mode: "convert".into(),
            conversion_args: "-resize 35.00% -quality 95".into(),
            error: None,
            src_size: Some(5_000_000),
            src_mtime: Some(1),
        }
    }

    async fn ledger(dir: &tempfile::TempDir) -> Ledger {
        Ledger::open(&dir.path().join("ledger.db").to_string_lossy())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn second_success_for_same_pair_only_refreshes() {
        let temp = tempfile::tempdir().unwrap();
        let ledger = ledger(&temp).await;

        let first = ledger
            .record_outcome(&row(ConversionStatus::Success, Some("h1"), "/out/a.jpg", 100))
            .await
            .unwrap();
        assert!(matches!(first, Recorded::Inserted(_)));

        let second = ledger
            .record_outcome(&row(ConversionStatus::Success, Some("h1"), "/out/a.jpg", 200))
            .await
            .unwrap();
        assert_eq!(second, Recorded::Refreshed);

        let (count, checked): (i64, Option<i64>) = sqlx::query_as(
            "SELECT COUNT(*), MAX(last_checked_at) FROM conversions WHERE status = 'SUCCESS'",
        )
        .fetch_one(ledger.pool())
        .await
        .unwrap();
        assert_eq!(count, 1);
        assert_eq!(checked, Some(200));
    }

    #[tokio::test]
    async fn failures_and_hashless_rows_always_append() {
        let temp = tempfile::tempdir().unwrap();
        let ledger = ledger(&temp).await;

        for at in 0..2 {
            ledger
                .record_outcome(&row(ConversionStatus::Failed, Some("h1"), "/out/a.jpg", at))
                .await
                .unwrap();
            ledger
                .record_outcome(&row(ConversionStatus::Success, None, "/out/a.jpg", at))
                .await
                .unwrap();
        }
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM conversions")
            .fetch_one(ledger.pool())
            .await
            .unwrap();
        assert_eq!(count, 4);
    }

    #[tokio::test]
    async fn already_done_requires_success_on_exact_pair() {
        let temp = tempfile::tempdir().unwrap();
        let ledger = ledger(&temp).await;
        ledger
            .record_outcome(&row(ConversionStatus::Failed, Some("h1"), "/out/a.jpg", 1))
            .await
            .unwrap();
        assert!(!ledger.already_done_at("h1", "/out/a.jpg").await.unwrap());

        ledger
            .record_outcome(&row(ConversionStatus::Success, Some("h1"), "/out/a.jpg", 2))
            .await
            .unwrap();
        assert!(ledger.already_done_at("h1", "/out/a.jpg").await.unwrap());
        assert!(!ledger.already_done_at("h1", "/out/b.jpg").await.unwrap());
        assert!(!ledger.already_done_at("h2", "/out/a.jpg").await.unwrap());
    }

    #[tokio::test]
    async fn existing_output_skips_vanished_destinations() {
        let temp = tempfile::tempdir().unwrap();
        let ledger = ledger(&temp).await;
        let kept = temp.path().join("kept.jpg");
        std::fs::write(&kept, b"x").unwrap();
        let gone = temp.path().join("gone.jpg");

        ledger
            .record_outcome(&row(ConversionStatus::Success, Some("h1"), &kept.to_string_lossy(), 1))
            .await
            .unwrap();
        ledger
            .record_outcome(&row(ConversionStatus::Success, Some("h1"), &gone.to_string_lossy(), 2))
            .await
            .unwrap();

        assert_eq!(ledger.find_existing_output("h1").await.unwrap(), Some(kept));
        assert_eq!(ledger.find_existing_output("h2").await.unwrap(), None);
    }

    #[tokio::test]
    async fn read_only_ledger_refuses_writes() {
        let temp = tempfile::tempdir().unwrap();
        let db = temp.path().join("ledger.db").to_string_lossy().into_owned();
        Ledger::open(&db).await.unwrap().close().await;

        let ro = Ledger::open_read_only(&db).await.unwrap();
        assert!(ro
            .record_outcome(&row(ConversionStatus::Success, Some("h"), "/o", 1))
            .await
            .is_err());
        assert!(ro.touch_last_checked("h", "/o", 1).await.is_err());
        assert!(!ro.already_done_at("h", "/o").await.unwrap());
    }
}
