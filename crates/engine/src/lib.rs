//! Image engine abstraction: the capabilities the converter needs from an
//! external image tool, plus content fingerprinting.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

pub mod magick;

pub use magick::MagickEngine;

/// Fingerprints are streamed in chunks of this size.
pub const HASH_CHUNK: usize = 1 << 20;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("image tool not found: {0}")]
    ToolUnavailable(String),
    #[error("{program} timed out after {after:?}")]
    Timeout { program: String, after: Duration },
    #[error("{program} exited with {status}: {stderr}")]
    CommandFailed {
        program: String,
        status: String,
        stderr: String,
    },
    #[error("unexpected tool output: {0}")]
    Parse(String),
    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
}

impl Dimensions {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

#[async_trait::async_trait]
pub trait ImageEngine: Send + Sync {
    /// Whole-file content digest used as the dedup key.
    async fn fingerprint(&self, path: &Path) -> Result<String, EngineError> {
        let path = path.to_path_buf();
        let p = path.clone();
        tokio::task::spawn_blocking(move || hash_file(&p))
            .await
            .map_err(|e| EngineError::Io {
                path,
                source: std::io::Error::new(std::io::ErrorKind::Other, e),
            })?
    }

    /// Applies EXIF orientation, writing the result to `dst`.
    async fn auto_orient(&self, src: &Path, dst: &Path) -> Result<(), EngineError>;

    async fn probe_dimensions(&self, path: &Path) -> Result<Dimensions, EngineError>;

    /// Scales `src` by `percent` into `dst` and returns the argument descriptor
    /// that was actually used, for the audit column.
    async fn resize_by_percentage(
        &self,
        src: &Path,
        dst: &Path,
        percent: Decimal,
        quality: u8,
    ) -> Result<String, EngineError>;
}

/// Streams the full file through BLAKE3 and returns the hex digest.
pub fn hash_file(path: &Path) -> Result<String, EngineError> {
    let io_err = |source| EngineError::Io {
        path: path.to_path_buf(),
        source,
    };
    let mut file = fs::File::open(path).map_err(io_err)?;
    let mut hasher = blake3::Hasher::new();
    let mut buf = vec![0u8; HASH_CHUNK];
    loop {
        let n = file.read(&mut buf).map_err(io_err)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hasher.finalize().to_hex().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_file_matches_one_shot_digest() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("big.bin");
        let data: Vec<u8> = (0..(HASH_CHUNK * 2 + 17)).map(|i| (i % 251) as u8).collect();
        fs::write(&path, &data).unwrap();

        let streamed = hash_file(&path).unwrap();
        assert_eq!(streamed, blake3::hash(&data).to_hex().to_string());
    }

    #[test]
    fn hash_file_reports_missing_file() {
        let err = hash_file(Path::new("/nonexistent/file.jpg")).unwrap_err();
        assert!(matches!(err, EngineError::Io { .. }));
    }
}
