//! Moving finished files into the output tree without ever exposing a
//! half-written destination.

use anyhow::{Context, Result};
use filetime::FileTime;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Replaces `dest` with `temp`. The old destination is removed first; when a
/// plain rename is impossible (different filesystem) the bytes are staged
/// beside `dest` and renamed from there.
pub fn place(temp: &Path, dest: &Path) -> Result<()> {
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("creating output directory {}", parent.display()))?;
    }
    remove_if_exists(dest)?;
    match fs::rename(temp, dest) {
        Ok(()) => Ok(()),
        Err(err) => {
            debug!(error = %err, from = %temp.display(), "rename failed; staging a copy");
            let staged = staging_path(dest);
            copy_preserving(temp, &staged)?;
            fs::rename(&staged, dest).with_context(|| {
                format!("moving {} into {}", staged.display(), dest.display())
            })?;
            remove_best_effort(temp);
            Ok(())
        }
    }
}

/// Copies an existing output into `dest` through a staging file, keeping
/// the source timestamps.
pub fn copy_into_place(src: &Path, dest: &Path) -> Result<()> {
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("creating output directory {}", parent.display()))?;
    }
    let staged = staging_path(dest);
    if let Err(err) = copy_preserving(src, &staged) {
        remove_best_effort(&staged);
        return Err(err);
    }
    remove_if_exists(dest)?;
    fs::rename(&staged, dest)
        .with_context(|| format!("moving {} into {}", staged.display(), dest.display()))
}

pub fn copy_preserving(src: &Path, dst: &Path) -> Result<()> {
    fs::copy(src, dst)
        .with_context(|| format!("copying {} to {}", src.display(), dst.display()))?;
    let meta = fs::metadata(src).with_context(|| format!("stat {}", src.display()))?;
    filetime::set_file_times(
        dst,
        FileTime::from_last_access_time(&meta),
        FileTime::from_last_modification_time(&meta),
    )
    .with_context(|| format!("setting times on {}", dst.display()))?;
    Ok(())
}

pub fn remove_if_exists(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e).with_context(|| format!("removing {}", path.display())),
    }
}

pub fn remove_best_effort(path: &Path) {
    if let Err(err) = remove_if_exists(path) {
        warn!(path = %path.display(), error = %err, "could not remove temp file");
    }
}

pub fn file_size(path: &Path) -> Option<i64> {
    fs::metadata(path).ok().map(|m| m.len() as i64)
}

const STAGING_SUFFIX: &str = ".partial";

fn staging_path(dest: &Path) -> PathBuf {
    let name = dest
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    dest.with_file_name(format!(".{name}{STAGING_SUFFIX}"))
}

/// Whether `name` is a staging file written beside an output.
pub fn is_staging_name(name: &str) -> bool {
    name.len() > 1 + STAGING_SUFFIX.len()
        && name.starts_with('.')
        && name.ends_with(STAGING_SUFFIX)
}

/// Removes the wrapped path when dropped, on every exit path.
pub struct TempGuard(PathBuf);

impl TempGuard {
    pub fn new(path: PathBuf) -> Self {
        Self(path)
    }

    pub fn path(&self) -> &Path {
        &self.0
    }
}

impl Drop for TempGuard {
    fn drop(&mut self) {
        remove_best_effort(&self.0);
    }
}
