//! Maps locations to directories, discovers candidate images, and names the
//! temp and output files for each one.

use crate::config::LibraryConfig;
use crate::error::ConvertError;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::{DirEntry, WalkDir};

/// Marker in the name of the auto-oriented intermediate file.
pub const ORIENT_MARKER: &str = "_auto_oriented";
/// Marker in the name of the resized (or copied) file before it is moved out.
pub const RESIZE_MARKER: &str = "_resized";

/// Source formats that are always re-encoded as JPEG.
const TRANSCODED: &[&str] = &[".heic", ".tif", ".tiff"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpectedPaths {
    pub resized_temp: PathBuf,
    pub output: PathBuf,
    pub oriented_temp: PathBuf,
}

#[derive(Debug, Clone)]
pub struct Planner {
    base: PathBuf,
    source_dir: String,
    output_dir: String,
    locations: BTreeMap<String, String>,
    extensions: BTreeSet<String>,
}

impl Planner {
    pub fn new(library: &LibraryConfig) -> Self {
        let extensions = library
            .extensions
            .iter()
            .map(|e| normalize_ext(e))
            .collect();
        Self {
            base: library.base.clone(),
            source_dir: library.source_dir.clone(),
            output_dir: library.output_dir.clone(),
            locations: library.locations.clone(),
            extensions,
        }
    }

    /// Recognized extensions, lower-case with a leading dot.
    pub fn extensions(&self) -> &BTreeSet<String> {
        &self.extensions
    }

    pub fn is_recognized(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .map(|e| self.extensions.contains(&normalize_ext(e)))
            .unwrap_or(false)
    }

    fn location_dirs(&self, name: &str) -> (PathBuf, PathBuf) {
        let loc = self.base.join(name);
        (loc.join(&self.source_dir), loc.join(&self.output_dir))
    }

    /// Source and destination roots for a location. The destination is created.
    pub fn roots_for(&self, key: &str) -> Result<(PathBuf, PathBuf), ConvertError> {
        let name = self
            .locations
            .get(key)
            .ok_or_else(|| ConvertError::UnknownLocation(key.to_string()))?;
        let (source, dest) = self.location_dirs(name);
        fs::create_dir_all(&dest).map_err(|source| ConvertError::Io {
            path: dest.clone(),
            source,
        })?;
        Ok((source, dest))
    }

    /// Destination root of a location, without touching the filesystem.
    pub fn output_root(&self, key: &str) -> Result<PathBuf, ConvertError> {
        self.locations
            .get(key)
            .map(|name| self.location_dirs(name).1)
            .ok_or_else(|| ConvertError::UnknownLocation(key.to_string()))
    }

    /// The configured location whose source root contains `path`.
    pub fn location_for(&self, path: &Path) -> Option<&str> {
        self.locations
            .iter()
            .find(|(_, name)| path.starts_with(self.location_dirs(name).0))
            .map(|(key, _)| key.as_str())
    }

    /// Every recognized image under `root`, sorted. Hidden directories and our
    /// own temp artifacts are skipped.
    pub fn list_candidates(&self, root: &Path) -> Result<Vec<PathBuf>, ConvertError> {
        fs::read_dir(root).map_err(|source| ConvertError::SourceRootUnreadable {
            path: root.to_path_buf(),
            source,
        })?;

        let mut out: Vec<PathBuf> = WalkDir::new(root)
            .into_iter()
            .filter_entry(|e| !is_hidden_dir(e))
            .filter_map(Result::ok)
            .filter(|e| e.file_type().is_file())
            .filter(|e| !has_temp_marker(&e.file_name().to_string_lossy()))
            .map(DirEntry::into_path)
            .filter(|p| self.is_recognized(p))
            .collect();
        out.sort();
        Ok(out)
    }

    /// Output extension for a source extension (with leading dot). Transcoded
    /// formats become `.jpg`, or `.JPG` when the source used any upper case.
    pub fn map_extension(ext: &str) -> String {
        if TRANSCODED.contains(&ext.to_lowercase().as_str()) {
            if ext.chars().any(|c| c.is_uppercase()) {
                ".JPG".to_string()
            } else {
                ".jpg".to_string()
            }
        } else {
            ext.to_string()
        }
    }

    /// The three paths derived from the source stem. Stable across runs.
    pub fn expected_paths(
        src: &Path,
        source_root: &Path,
        dest_root: &Path,
        out_ext: &str,
    ) -> ExpectedPaths {
        let stem = src
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        ExpectedPaths {
            resized_temp: source_root.join(format!("{stem}{RESIZE_MARKER}{out_ext}")),
            output: dest_root.join(format!("{stem}{out_ext}")),
            oriented_temp: source_root.join(format!("{stem}{ORIENT_MARKER}{out_ext}")),
        }
    }
}

/// Extension of `path` with its leading dot, case preserved. Empty when absent.
pub fn dotted_extension(path: &Path) -> String {
    path.extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default()
}

/// Stem of the source a temp file was named after. Only names shaped like
/// `<stem><marker>.<ext>` qualify; a marker elsewhere in a name is ordinary text.
pub fn temp_source_stem(name: &str) -> Option<&str> {
    let (base, _ext) = name.rsplit_once('.')?;
    base.strip_suffix(ORIENT_MARKER)
        .or_else(|| base.strip_suffix(RESIZE_MARKER))
        .filter(|stem| !stem.is_empty())
}

pub fn has_temp_marker(name: &str) -> bool {
    temp_source_stem(name).is_some()
}

pub(crate) fn is_hidden_dir(entry: &DirEntry) -> bool {
    entry.depth() > 0
        && entry.file_type().is_dir()
        && entry
            .file_name()
            .to_str()
            .map(|s| s.starts_with('.'))
            .unwrap_or(false)
}

fn normalize_ext(ext: &str) -> String {
    let lower = ext.to_lowercase();
    if lower.starts_with('.') {
        lower
    } else {
        format!(".{lower}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn planner(base: &Path) -> Planner {
        Planner::new(&LibraryConfig {
            base: base.to_path_buf(),
            source_dir: "Original".into(),
            output_dir: "Resized".into(),
            extensions: vec![".jpg".into(), ".jpeg".into(), ".png".into(), "heic".into()],
            locations: BTreeMap::from([
                ("home".to_string(), "Home".to_string()),
                ("lake".to_string(), "Lake".to_string()),
            ]),
        })
    }

    #[test]
    fn roots_for_creates_destination() {
        let temp = tempfile::tempdir().unwrap();
        let p = planner(temp.path());
        let (src, dst) = p.roots_for("home").unwrap();
        assert_eq!(src, temp.path().join("Home").join("Original"));
        assert_eq!(dst, temp.path().join("Home").join("Resized"));
        assert!(dst.is_dir());
        assert_eq!(p.output_root("home").unwrap(), dst);
    }

    #[test]
    fn roots_for_unknown_key_is_config_error() {
        let temp = tempfile::tempdir().unwrap();
        let err = planner(temp.path()).roots_for("attic").unwrap_err();
        assert!(matches!(err, ConvertError::UnknownLocation(k) if k == "attic"));
    }

    #[test]
    fn candidates_are_filtered_and_sorted() {
        let temp = tempfile::tempdir().unwrap();
        let root = temp.path();
        for rel in [
            "b.JPG",
            "a.heic",
            "notes.txt",
            "sub/c.png",
            "sub/c_auto_oriented.png",
            "d_resized.jpg",
            "beach_resized_v2.jpg",
            ".cache/e.jpg",
            "sub/.hidden/f.jpg",
        ] {
            let path = root.join(rel);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(&path, b"x").unwrap();
        }

        let found = planner(root).list_candidates(root).unwrap();
        let rel: Vec<String> = found
            .iter()
            .map(|p| p.strip_prefix(root).unwrap().to_string_lossy().replace('\\', "/"))
            .collect();
        assert_eq!(rel, vec!["a.heic", "b.JPG", "beach_resized_v2.jpg", "sub/c.png"]);
    }

    #[test]
    fn missing_source_root_is_reported() {
        let temp = tempfile::tempdir().unwrap();
        let err = planner(temp.path())
            .list_candidates(&temp.path().join("nope"))
            .unwrap_err();
        assert!(matches!(err, ConvertError::SourceRootUnreadable { .. }));
    }

    #[test]
    fn map_extension_transcodes_and_keeps_case_convention() {
        assert_eq!(Planner::map_extension(".heic"), ".jpg");
        assert_eq!(Planner::map_extension(".HEIC"), ".JPG");
        assert_eq!(Planner::map_extension(".Tif"), ".JPG");
        assert_eq!(Planner::map_extension(".tiff"), ".jpg");
        assert_eq!(Planner::map_extension(".PNG"), ".PNG");
        assert_eq!(Planner::map_extension(".jpeg"), ".jpeg");
    }

    #[test]
    fn expected_paths_follow_stem() {
        let src = Path::new("/lib/Home/Original/2023/IMG_0001.heic");
        let paths = Planner::expected_paths(
            src,
            Path::new("/lib/Home/Original"),
            Path::new("/lib/Home/Resized"),
            ".jpg",
        );
        assert_eq!(
            paths,
            ExpectedPaths {
                resized_temp: PathBuf::from("/lib/Home/Original/IMG_0001_resized.jpg"),
                output: PathBuf::from("/lib/Home/Resized/IMG_0001.jpg"),
                oriented_temp: PathBuf::from("/lib/Home/Original/IMG_0001_auto_oriented.jpg"),
            }
        );
    }

    #[test]
    fn temp_marker_must_sit_before_extension() {
        assert_eq!(temp_source_stem("IMG_1_resized.jpg"), Some("IMG_1"));
        assert_eq!(temp_source_stem("IMG_1_auto_oriented.JPG"), Some("IMG_1"));
        assert_eq!(temp_source_stem("my.trip_resized.png"), Some("my.trip"));
        assert_eq!(temp_source_stem("beach_resized_v2.jpg"), None);
        assert_eq!(temp_source_stem("me_auto_oriented_by_phone.heic"), None);
        assert_eq!(temp_source_stem("_resized.jpg"), None);
        assert_eq!(temp_source_stem("IMG_1_resized"), None);
        assert!(!has_temp_marker("IMG_1.jpg"));
    }

    #[test]
    fn location_for_matches_source_roots_only() {
        let p = planner(Path::new("/lib"));
        assert_eq!(p.location_for(Path::new("/lib/Lake/Original/x.jpg")), Some("lake"));
        assert_eq!(p.location_for(Path::new("/lib/Lake/Resized/x.jpg")), None);
        assert_eq!(p.location_for(Path::new("/elsewhere/x.jpg")), None);
    }
}
