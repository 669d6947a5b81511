use crate::error::ConvertError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub library: LibraryConfig,
    #[serde(default)]
    pub resize: ResizeConfig,
    #[serde(default)]
    pub engine: EngineConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub path: String,
}

/// Where photo collections live. Each location `key = "Name"` resolves to
/// `<base>/<Name>/<source_dir>` and `<base>/<Name>/<output_dir>`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LibraryConfig {
    pub base: PathBuf,
    #[serde(default = "default_source_dir")]
    pub source_dir: String,
    #[serde(default = "default_output_dir")]
    pub output_dir: String,
    #[serde(default = "default_extensions")]
    pub extensions: Vec<String>,
    pub locations: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResizeConfig {
    pub max_width: u32,
    pub max_height: u32,
    pub quality: u8,
}

impl Default for ResizeConfig {
    fn default() -> Self {
        Self {
            max_width: 1280,
            max_height: 1024,
            quality: 95,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    pub timeout_secs: u64,
    /// Recorded verbatim in the ledger's `conversion_mode` column.
    pub mode: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 600,
            mode: "convert".to_string(),
        }
    }
}

impl EngineConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

fn default_source_dir() -> String {
    "Original".to_string()
}

fn default_output_dir() -> String {
    "Resized".to_string()
}

fn default_extensions() -> Vec<String> {
    [".jpg", ".jpeg", ".png", ".heic", ".tif", ".tiff"]
        .into_iter()
        .map(String::from)
        .collect()
}

impl AppConfig {
    pub fn validate(&self) -> Result<(), ConvertError> {
        let bad = |msg: &str| Err(ConvertError::Config(msg.to_string()));
        if self.resize.max_width == 0 || self.resize.max_height == 0 {
            return bad("resize.max_width and resize.max_height must be positive");
        }
        if !(1..=100).contains(&self.resize.quality) {
            return bad("resize.quality must be within 1..=100");
        }
        if self.library.extensions.is_empty() {
            return bad("library.extensions must not be empty");
        }
        if self.library.locations.is_empty() {
            return bad("library.locations must name at least one location");
        }
        if self.engine.timeout_secs == 0 {
            return bad("engine.timeout_secs must be positive");
        }
        Ok(())
    }
}

/// Loads `path` (or `config/default` when absent) and applies
/// `PHOTO_RESIZER__SECTION__KEY` environment overrides.
pub fn load(path: Option<&str>) -> anyhow::Result<AppConfig> {
    let mut settings = config::Config::builder();
    if let Some(p) = path {
        settings = settings.add_source(config::File::with_name(p));
    } else {
        settings = settings.add_source(config::File::with_name("config/default").required(false));
    }
    settings = settings.add_source(
        config::Environment::with_prefix("PHOTO_RESIZER")
            .prefix_separator("__")
            .separator("__"),
    );
    let cfg: AppConfig = settings.build()?.try_deserialize()?;
    cfg.validate()?;
    Ok(cfg)
}
