use crate::placement::is_staging_name;
use crate::planner::{is_hidden_dir, temp_source_stem};
use serde::Serialize;
use std::collections::BTreeSet;
use std::fs;
use std::path::Path;
use tracing::{info, warn};
use walkdir::WalkDir;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SweepSummary {
    pub removed: usize,
    pub failed: usize,
}

impl SweepSummary {
    pub fn merge(self, other: SweepSummary) -> SweepSummary {
        SweepSummary {
            removed: self.removed + other.removed,
            failed: self.failed + other.failed,
        }
    }
}

/// Deletes temp artifacts under `root` left behind by a killed run. A temp
/// file survives only while a recognized original with the same stem sits in
/// its directory. `extensions` are lower-case with a leading dot.
pub fn sweep_temp_files(root: &Path, extensions: &BTreeSet<String>) -> SweepSummary {
    let mut summary = SweepSummary::default();
    let entries = WalkDir::new(root)
        .into_iter()
        .filter_entry(|e| !is_hidden_dir(e))
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file());

    for entry in entries {
        let name = entry.file_name().to_string_lossy();
        let Some(stem) = temp_source_stem(&name) else {
            continue;
        };
        let dir = entry.path().parent().unwrap_or(root);
        if has_original(dir, stem, extensions) {
            continue;
        }
        remove_counted(entry.path(), &mut summary);
    }
    summary
}

/// Deletes staging files under an output root left by an interrupted
/// placement. They are never valid outputs.
pub fn sweep_staging_files(root: &Path) -> SweepSummary {
    let mut summary = SweepSummary::default();
    let entries = WalkDir::new(root)
        .into_iter()
        .filter_entry(|e| !is_hidden_dir(e))
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file())
        .filter(|e| is_staging_name(&e.file_name().to_string_lossy()));
    for entry in entries {
        remove_counted(entry.path(), &mut summary);
    }
    summary
}

fn remove_counted(path: &Path, summary: &mut SweepSummary) {
    match fs::remove_file(path) {
        Ok(()) => {
            info!(path = %path.display(), "removed leftover temp file");
            summary.removed += 1;
        }
        Err(err) => {
            warn!(path = %path.display(), error = %err, "could not remove leftover temp file");
            summary.failed += 1;
        }
    }
}

fn has_original(dir: &Path, stem: &str, extensions: &BTreeSet<String>) -> bool {
    let Ok(read) = fs::read_dir(dir) else {
        return false;
    };
    read.filter_map(Result::ok).any(|e| {
        let path = e.path();
        path.file_stem().map(|s| s == stem).unwrap_or(false)
            && path
                .extension()
                .map(|ext| extensions.contains(&format!(".{}", ext.to_string_lossy().to_lowercase())))
                .unwrap_or(false)
            && path.is_file()
    })
}
