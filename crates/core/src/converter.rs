//! The per-file decision state machine and the whole-location run loop.

use crate::config::AppConfig;
use crate::error::{ConvertError, Step};
use crate::placement::{copy_into_place, copy_preserving, file_size, place, remove_best_effort, TempGuard};
use crate::planner::{dotted_extension, ExpectedPaths, Planner};
use crate::resize::{self, ResizeBounds};
use crate::sweep::{sweep_staging_files, sweep_temp_files, SweepSummary};
use anyhow::{bail, Context};
use engine::{Dimensions, ImageEngine};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Instant, UNIX_EPOCH};
use storage::{ConversionStatus, Ledger, NewConversion};
use tracing::{debug, error, info, warn};

/// Descriptor stored for images that already fit the frame.
pub const COPY_DESCRIPTOR: &str = "(copy without resize)";

/// Terminal state of one candidate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    AlreadyDone,
    SkippedDup { origin: PathBuf },
    Converted { resized: bool, dims: Dimensions },
    Failed { step: Step, message: String },
}

impl Outcome {
    pub fn status(&self) -> ConversionStatus {
        match self {
            Outcome::AlreadyDone => ConversionStatus::AlreadyDone,
            Outcome::SkippedDup { .. } => ConversionStatus::SkippedDup,
            Outcome::Converted { .. } => ConversionStatus::Success,
            Outcome::Failed { .. } => ConversionStatus::Failed,
        }
    }
}

#[derive(Debug, Default, Clone, Serialize)]
pub struct RunSummary {
    pub location: String,
    pub candidates: usize,
    pub already_done: usize,
    pub skipped_dup: usize,
    pub converted: usize,
    pub failed: usize,
    pub swept: usize,
    pub elapsed_ms: u64,
}

impl RunSummary {
    fn tally(&mut self, outcome: &Outcome) {
        match outcome.status() {
            ConversionStatus::AlreadyDone => self.already_done += 1,
            ConversionStatus::SkippedDup => self.skipped_dup += 1,
            ConversionStatus::Success => self.converted += 1,
            ConversionStatus::Failed => self.failed += 1,
        }
    }
}

/// Everything known about a source before any branch is taken.
struct Attempt<'a> {
    src: &'a Path,
    started: Instant,
    src_ext: String,
    src_size: Option<i64>,
    src_mtime: Option<i64>,
    hash: Option<String>,
    paths: ExpectedPaths,
    mode: &'a str,
}

impl Attempt<'_> {
    fn row(&self, status: ConversionStatus, args: impl Into<String>) -> NewConversion {
        NewConversion {
            converted_at: chrono::Utc::now().timestamp(),
            status,
            src_name: self
                .src
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            src_ext: self.src_ext.clone(),
            src_fullpath: path_string(self.src),
            dst_fullpath: Some(path_string(&self.paths.output)),
            src_hash: self.hash.clone(),
            orig_width: None,
            orig_height: None,
            new_width: None,
            new_height: None,
            out_size_bytes: None,
            duration_ms: self.started.elapsed().as_millis() as i64,
            conversion_mode: self.mode.to_string(),
            conversion_args: args.into(),
            error: None,
            src_size: self.src_size,
            src_mtime: self.src_mtime,
        }
    }
}

struct Produced {
    dims: Dimensions,
    args: String,
    resized: bool,
}

pub struct Converter {
    planner: Planner,
    engine: Arc<dyn ImageEngine>,
    ledger: Ledger,
    bounds: ResizeBounds,
    quality: u8,
    mode: String,
}

impl Converter {
    pub fn new(config: &AppConfig, engine: Arc<dyn ImageEngine>, ledger: Ledger) -> Self {
        Self {
            planner: Planner::new(&config.library),
            engine,
            ledger,
            bounds: ResizeBounds {
                max_width: config.resize.max_width,
                max_height: config.resize.max_height,
            },
            quality: config.resize.quality,
            mode: config.engine.mode.clone(),
        }
    }

    pub fn planner(&self) -> &Planner {
        &self.planner
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    /// Sweeps, lists and processes every candidate of one location in order.
    pub async fn run(&self, location: &str) -> anyhow::Result<RunSummary> {
        let started = Instant::now();
        let (source_root, dest_root) = self.planner.roots_for(location)?;
        info!(
            location,
            source = %source_root.display(),
            dest = %dest_root.display(),
            "starting run"
        );

        let swept = self.sweep(&source_root, &dest_root).await?;
        let planner = self.planner.clone();
        let root = source_root.clone();
        let candidates = tokio::task::spawn_blocking(move || planner.list_candidates(&root))
            .await
            .context("candidate listing panicked")??;

        let total = candidates.len();
        let mut summary = RunSummary {
            location: location.to_string(),
            candidates: total,
            swept: swept.removed,
            ..Default::default()
        };
        for (idx, src) in candidates.iter().enumerate() {
            debug!(n = idx + 1, total, src = %src.display(), "processing");
            let outcome = self.process_one(src, &source_root, &dest_root).await?;
            summary.tally(&outcome);
        }
        summary.elapsed_ms = started.elapsed().as_millis() as u64;
        info!(
            location,
            candidates = summary.candidates,
            converted = summary.converted,
            already_done = summary.already_done,
            skipped_dup = summary.skipped_dup,
            failed = summary.failed,
            elapsed_ms = summary.elapsed_ms,
            "run complete"
        );
        Ok(summary)
    }

    /// Runs the state machine once for an explicit file.
    pub async fn retry_file(&self, path: &Path) -> anyhow::Result<Outcome> {
        let key = self
            .planner
            .location_for(path)
            .ok_or_else(|| ConvertError::OutsideLocations(path.to_path_buf()))?
            .to_string();
        if !path.is_file() {
            bail!("{} is not a file", path.display());
        }
        let (source_root, dest_root) = self.planner.roots_for(&key)?;
        info!(location = %key, src = %path.display(), "manual retry");
        self.process_one(path, &source_root, &dest_root).await
    }

    /// Removes orphaned temps under the source root and interrupted staging
    /// files under the destination root.
    pub async fn sweep(&self, source_root: &Path, dest_root: &Path) -> anyhow::Result<SweepSummary> {
        let source_root = source_root.to_path_buf();
        let dest_root = dest_root.to_path_buf();
        let extensions = self.planner.extensions().clone();
        let summary = tokio::task::spawn_blocking(move || {
            sweep_temp_files(&source_root, &extensions).merge(sweep_staging_files(&dest_root))
        })
        .await
        .context("temp sweep panicked")?;
        if summary.removed > 0 || summary.failed > 0 {
            info!(removed = summary.removed, failed = summary.failed, "temp sweep finished");
        }
        Ok(summary)
    }

    /// Classifies and handles one source. Per-file problems end up as ledger
    /// rows; only ledger errors are returned.
    pub async fn process_one(
        &self,
        src: &Path,
        source_root: &Path,
        dest_root: &Path,
    ) -> anyhow::Result<Outcome> {
        let started = Instant::now();
        let meta = tokio::fs::metadata(src).await.ok();
        let src_ext = dotted_extension(src);
        let out_ext = Planner::map_extension(&src_ext);

        let hash = match self.engine.fingerprint(src).await {
            Ok(h) => Some(h),
            Err(err) => {
                warn!(src = %src.display(), error = %err, "fingerprint unavailable; dedup disabled for this file");
                None
            }
        };

        let attempt = Attempt {
            src,
            started,
            src_size: meta.as_ref().map(|m| m.len() as i64),
            src_mtime: meta
                .as_ref()
                .and_then(|m| m.modified().ok())
                .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
                .map(|d| d.as_secs() as i64),
            paths: Planner::expected_paths(src, source_root, dest_root, &out_ext),
            src_ext,
            hash,
            mode: &self.mode,
        };

        if let Some(hash) = attempt.hash.as_deref() {
            if let Some(outcome) = self.try_reuse(&attempt, hash).await? {
                return Ok(outcome);
            }
        }
        self.full_convert(&attempt).await
    }

    /// ALREADY_DONE and DUPLICATE_CHECK. `None` means a full conversion is needed.
    async fn try_reuse(&self, attempt: &Attempt<'_>, hash: &str) -> anyhow::Result<Option<Outcome>> {
        let output = &attempt.paths.output;
        let dst = path_string(output);
        if self.ledger.already_done_at(hash, &dst).await? && output.exists() {
            self.ledger
                .touch_last_checked(hash, &dst, chrono::Utc::now().timestamp())
                .await?;
            info!(src = %attempt.src.display(), "already done");
            return Ok(Some(Outcome::AlreadyDone));
        }

        let Some(existing) = self.ledger.find_existing_output(hash).await? else {
            return Ok(None);
        };
        if same_file(&existing, output) || self.same_contents(&existing, output).await {
            self.ledger
                .touch_last_checked(hash, &path_string(&existing), chrono::Utc::now().timestamp())
                .await?;
            info!(src = %attempt.src.display(), "already done (matches existing output)");
            return Ok(Some(Outcome::AlreadyDone));
        }

        if let Err(err) = copy_into_place(&existing, output) {
            warn!(
                src = %attempt.src.display(),
                origin = %existing.display(),
                error = %err,
                "copying existing output failed; converting instead"
            );
            return Ok(None);
        }
        let mut row = attempt.row(
            ConversionStatus::SkippedDup,
            format!("(copied from {})", existing.display()),
        );
        row.out_size_bytes = file_size(output);
        self.ledger.record_outcome(&row).await?;
        info!(src = %attempt.src.display(), origin = %existing.display(), "duplicate; copied existing output");
        Ok(Some(Outcome::SkippedDup { origin: existing }))
    }

    /// A duplicate copied on an earlier run is still in place.
    async fn same_contents(&self, a: &Path, b: &Path) -> bool {
        match (tokio::fs::metadata(a).await, tokio::fs::metadata(b).await) {
            (Ok(ma), Ok(mb)) if ma.len() == mb.len() => {}
            _ => return false,
        }
        match (self.engine.fingerprint(a).await, self.engine.fingerprint(b).await) {
            (Ok(ha), Ok(hb)) => ha == hb,
            _ => false,
        }
    }

    async fn full_convert(&self, attempt: &Attempt<'_>) -> anyhow::Result<Outcome> {
        let paths = &attempt.paths;
        let oriented = TempGuard::new(paths.oriented_temp.clone());

        if let Err(err) = self.engine.auto_orient(attempt.src, oriented.path()).await {
            return self.fail(attempt, Step::AutoOrient, err.to_string(), None).await;
        }
        let orig = match self.engine.probe_dimensions(oriented.path()).await {
            Ok(d) if d.width > 0 && d.height > 0 => d,
            Ok(d) => {
                let message = format!("reported zero size {}x{}", d.width, d.height);
                return self.fail(attempt, Step::Identify, message, None).await;
            }
            Err(err) => return self.fail(attempt, Step::Identify, err.to_string(), None).await,
        };
        debug!(src = %attempt.src.display(), width = orig.width, height = orig.height, "probed");

        let produced = self.resize_or_copy(oriented.path(), paths, orig).await;
        drop(oriented);

        match produced {
            Ok(p) => {
                let mut row = attempt.row(ConversionStatus::Success, p.args);
                set_dims(&mut row, Some(orig), Some(p.dims));
                row.out_size_bytes = file_size(&paths.output);
                self.ledger.record_outcome(&row).await?;
                info!(
                    src = %attempt.src.display(),
                    dst = %paths.output.display(),
                    width = p.dims.width,
                    height = p.dims.height,
                    resized = p.resized,
                    "converted"
                );
                Ok(Outcome::Converted {
                    resized: p.resized,
                    dims: p.dims,
                })
            }
            Err(err) => {
                remove_best_effort(&paths.resized_temp);
                self.fail(attempt, Step::ResizeOrCopy, format!("{err:#}"), Some(orig))
                    .await
            }
        }
    }

    async fn resize_or_copy(
        &self,
        oriented: &Path,
        paths: &ExpectedPaths,
        orig: Dimensions,
    ) -> anyhow::Result<Produced> {
        match resize::plan(orig, self.bounds) {
            Some(plan) => {
                debug!(percent = %plan.percent, width = plan.new.width, height = plan.new.height, "resizing");
                let args = self
                    .engine
                    .resize_by_percentage(oriented, &paths.resized_temp, plan.percent, self.quality)
                    .await?;
                place(&paths.resized_temp, &paths.output)?;
                Ok(Produced {
                    dims: plan.new,
                    args,
                    resized: true,
                })
            }
            None => {
                copy_preserving(oriented, &paths.resized_temp)?;
                place(&paths.resized_temp, &paths.output)?;
                Ok(Produced {
                    dims: orig,
                    args: COPY_DESCRIPTOR.to_string(),
                    resized: false,
                })
            }
        }
    }

    async fn fail(
        &self,
        attempt: &Attempt<'_>,
        step: Step,
        message: String,
        orig: Option<Dimensions>,
    ) -> anyhow::Result<Outcome> {
        let failure = ConvertError::StepFailure {
            step,
            message: message.clone(),
        };
        error!(src = %attempt.src.display(), error = %failure, "conversion failed");
        let mut row = attempt.row(ConversionStatus::Failed, step.tag());
        set_dims(&mut row, orig, None);
        row.out_size_bytes = file_size(&attempt.paths.output);
        row.error = Some(message.clone());
        self.ledger.record_outcome(&row).await?;
        Ok(Outcome::Failed { step, message })
    }
}

fn set_dims(row: &mut NewConversion, orig: Option<Dimensions>, new: Option<Dimensions>) {
    row.orig_width = orig.map(|d| i64::from(d.width));
    row.orig_height = orig.map(|d| i64::from(d.height));
    row.new_width = new.map(|d| i64::from(d.width));
    row.new_height = new.map(|d| i64::from(d.height));
}

fn path_string(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

fn same_file(a: &Path, b: &Path) -> bool {
    if a == b {
        return true;
    }
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outcome_maps_to_status() {
        assert_eq!(Outcome::AlreadyDone.status(), ConversionStatus::AlreadyDone);
        assert_eq!(
            Outcome::Failed {
                step: Step::Identify,
                message: "x".into()
            }
            .status(),
            ConversionStatus::Failed
        );
    }

    #[test]
    fn summary_tallies_each_outcome() {
        let mut summary = RunSummary::default();
        summary.tally(&Outcome::AlreadyDone);
        summary.tally(&Outcome::Converted {
            resized: true,
            dims: Dimensions::new(10, 10),
        });
        summary.tally(&Outcome::SkippedDup {
            origin: PathBuf::from("/a.jpg"),
        });
        summary.tally(&Outcome::Converted {
            resized: false,
            dims: Dimensions::new(10, 10),
        });
        assert_eq!(
            (summary.already_done, summary.converted, summary.skipped_dup, summary.failed),
            (1, 2, 1, 0)
        );
    }

    #[test]
    fn same_file_compares_resolved_paths() {
        let temp = tempfile::tempdir().unwrap();
        let file = temp.path().join("a.jpg");
        std::fs::write(&file, b"x").unwrap();
        let dotted = temp.path().join(".").join("a.jpg");
        assert!(same_file(&file, &dotted));
        assert!(!same_file(&file, &temp.path().join("b.jpg")));
    }
}
