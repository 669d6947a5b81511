#![allow(dead_code)]

use async_trait::async_trait;
use engine::magick::{parse_dimensions, resize_descriptor};
use engine::{Dimensions, EngineError, ImageEngine};
use photo_core::config::{AppConfig, DatabaseConfig, EngineConfig, LibraryConfig, ResizeConfig};
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use storage::Ledger;

/// Stands in for ImageMagick. A test "image" is a text file whose first line
/// is `W H`; anything starting with `corrupt` cannot be oriented.
#[derive(Default)]
pub struct FakeEngine {
    pub fail_fingerprint: AtomicBool,
    pub fail_resize: AtomicBool,
    pub fingerprint_calls: AtomicUsize,
    pub orient_calls: AtomicUsize,
    pub resize_calls: AtomicUsize,
}

fn io_err(path: &Path, source: std::io::Error) -> EngineError {
    EngineError::Io {
        path: path.to_path_buf(),
        source,
    }
}

#[async_trait]
impl ImageEngine for FakeEngine {
    async fn fingerprint(&self, path: &Path) -> Result<String, EngineError> {
        self.fingerprint_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_fingerprint.load(Ordering::SeqCst) {
            return Err(EngineError::Timeout {
                program: "hash".into(),
                after: std::time::Duration::from_secs(1),
            });
        }
        engine::hash_file(path)
    }

    async fn auto_orient(&self, src: &Path, dst: &Path) -> Result<(), EngineError> {
        self.orient_calls.fetch_add(1, Ordering::SeqCst);
        let bytes = fs::read(src).map_err(|e| io_err(src, e))?;
        if bytes.starts_with(b"corrupt") {
            return Err(EngineError::CommandFailed {
                program: "convert".into(),
                status: "exit status: 1".into(),
                stderr: "improper image header".into(),
            });
        }
        fs::write(dst, bytes).map_err(|e| io_err(dst, e))
    }

    async fn probe_dimensions(&self, path: &Path) -> Result<Dimensions, EngineError> {
        let text = fs::read_to_string(path).map_err(|e| io_err(path, e))?;
        parse_dimensions(text.lines().next().unwrap_or_default())
    }

    async fn resize_by_percentage(
        &self,
        src: &Path,
        dst: &Path,
        percent: Decimal,
        quality: u8,
    ) -> Result<String, EngineError> {
        self.resize_calls.fetch_add(1, Ordering::SeqCst);
        fs::write(dst, format!("resized {}\n", src.display())).map_err(|e| io_err(dst, e))?;
        if self.fail_resize.load(Ordering::SeqCst) {
            return Err(EngineError::CommandFailed {
                program: "convert".into(),
                status: "signal: 9 (SIGKILL)".into(),
                stderr: String::new(),
            });
        }
        Ok(resize_descriptor(percent, quality))
    }
}

pub struct Fixture {
    pub dir: tempfile::TempDir,
    pub config: AppConfig,
    pub engine: Arc<FakeEngine>,
}

impl Fixture {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let config = AppConfig {
            database: DatabaseConfig {
                path: dir.path().join("ledger.db").to_string_lossy().into_owned(),
            },
            library: LibraryConfig {
                base: dir.path().join("frames"),
                source_dir: "Original".into(),
                output_dir: "Resized".into(),
                extensions: [".jpg", ".jpeg", ".png", ".heic", ".tif", ".tiff"]
                    .into_iter()
                    .map(String::from)
                    .collect(),
                locations: BTreeMap::from([
                    ("home".to_string(), "Home".to_string()),
                    ("lake".to_string(), "Lake".to_string()),
                ]),
            },
            resize: ResizeConfig::default(),
            engine: EngineConfig::default(),
        };
        fs::create_dir_all(config.library.base.join("Home").join("Original")).unwrap();
        fs::create_dir_all(config.library.base.join("Lake").join("Original")).unwrap();
        Self {
            dir,
            config,
            engine: Arc::new(FakeEngine::default()),
        }
    }

    pub fn source_root(&self, name: &str) -> PathBuf {
        self.config.library.base.join(name).join("Original")
    }

    pub fn dest_root(&self, name: &str) -> PathBuf {
        self.config.library.base.join(name).join("Resized")
    }

    /// Writes a fake image with the given dimensions and padding so sizes differ.
    pub fn image(&self, location: &str, rel: &str, width: u32, height: u32) -> PathBuf {
        let path = self.source_root(location).join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        let body = format!("{width} {height}\n{}\n", "x".repeat(4096));
        fs::write(&path, body).unwrap();
        path
    }

    pub async fn converter(&self) -> photo_core::Converter {
        let ledger = Ledger::open(&self.config.database.path).await.unwrap();
        photo_core::Converter::new(&self.config, self.engine.clone(), ledger)
    }
}

pub async fn count_rows(ledger: &Ledger, status: Option<&str>) -> i64 {
    sqlx::query_scalar("SELECT COUNT(*) FROM conversions WHERE (?1 IS NULL OR status = ?1)")
        .bind(status)
        .fetch_one(ledger.pool())
        .await
        .unwrap()
}
