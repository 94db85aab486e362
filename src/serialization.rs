use crate::position::WidgetPosition;
use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};

/// Newest dashboard file version this crate reads and the one it writes
pub const DASHBOARD_VERSION: u32 = 1;

/// Dashboard-level metadata stored in the file
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DashboardMetadata {
    pub name: String,
    pub dashboard_width: i64,
    pub dashboard_height: i64,
}

/// One placed output, keyed by notebook in [`DashboardContent::outputs`]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct OutputInfo {
    pub cell_id: String,
    pub pos: WidgetPosition,
}

/// On-disk dashboard document.
///
/// `paths` maps a notebook path, relative to the dashboard file's directory,
/// to the notebook id; `outputs` groups placed cells by notebook id.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DashboardContent {
    pub version: u32,
    pub metadata: DashboardMetadata,
    #[serde(default)]
    pub paths: BTreeMap<String, String>,
    #[serde(default)]
    pub outputs: BTreeMap<String, Vec<OutputInfo>>,
}

impl DashboardContent {
    pub fn new(metadata: DashboardMetadata) -> Self {
        Self {
            version: DASHBOARD_VERSION,
            metadata,
            paths: BTreeMap::new(),
            outputs: BTreeMap::new(),
        }
    }

    /// Number of outputs across all notebooks
    pub fn output_count(&self) -> usize {
        self.outputs.values().map(Vec::len).sum()
    }

    pub fn to_json_string(&self) -> Result<String> {
        serde_json::to_string_pretty(self).context("Failed to serialize dashboard")
    }

    pub fn from_json_str(s: &str) -> Result<Self> {
        serde_json::from_str(s).context("Failed to parse dashboard")
    }
}

/// Load/save collaborator for dashboard and notebook files.
///
/// Paths are '/'-separated and relative to the store's root.
pub trait ContentStore {
    fn load(&self, path: &str) -> Result<String>;

    fn save(&mut self, path: &str, content: &str) -> Result<()>;

    fn exists(&self, path: &str) -> bool;
}

/// Content store backed by a directory on disk
#[derive(Debug, Clone)]
pub struct FsContentStore {
    root_dir: PathBuf,
}

impl FsContentStore {
    /// Open a content root; the directory has to exist
    pub fn open(root_dir: &Path) -> Result<Self> {
        if !root_dir.is_dir() {
            return Err(anyhow!(
                "Content directory does not exist: {}",
                root_dir.display()
            ));
        }
        Ok(Self {
            root_dir: root_dir.to_path_buf(),
        })
    }

    pub fn root_dir(&self) -> &Path {
        &self.root_dir
    }

    /// Full path of a content path
    pub fn resolve(&self, path: &str) -> PathBuf {
        self.root_dir.join(normalize(path))
    }
}

impl ContentStore for FsContentStore {
    fn load(&self, path: &str) -> Result<String> {
        let full = self.resolve(path);
        fs::read_to_string(&full)
            .with_context(|| format!("Failed to read content file: {}", full.display()))
    }

    fn save(&mut self, path: &str, content: &str) -> Result<()> {
        let full = self.resolve(path);
        if let Some(dir) = full.parent() {
            fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create directory: {}", dir.display()))?;
        }
        fs::write(&full, content)
            .with_context(|| format!("Failed to write content file: {}", full.display()))
    }

    fn exists(&self, path: &str) -> bool {
        self.resolve(path).is_file()
    }
}

/// Content store kept in memory
#[derive(Debug, Clone, Default)]
pub struct MemoryContentStore {
    files: HashMap<String, String>,
}

impl MemoryContentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, path: &str, content: impl Into<String>) {
        self.files.insert(normalize(path), content.into());
    }

    pub fn get(&self, path: &str) -> Option<&str> {
        self.files.get(&normalize(path)).map(String::as_str)
    }
}

impl ContentStore for MemoryContentStore {
    fn load(&self, path: &str) -> Result<String> {
        self.get(path)
            .map(str::to_string)
            .ok_or_else(|| anyhow!("No such content file: {}", path))
    }

    fn save(&mut self, path: &str, content: &str) -> Result<()> {
        self.insert(path, content);
        Ok(())
    }

    fn exists(&self, path: &str) -> bool {
        self.files.contains_key(&normalize(path))
    }
}

// ========== Path helpers ==========

/// Collapse `.`, `..` and repeated separators. Leading `..` that cannot be
/// collapsed are kept.
pub fn normalize(path: &str) -> String {
    let mut parts: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                if matches!(parts.last(), Some(last) if *last != "..") {
                    parts.pop();
                } else {
                    parts.push("..");
                }
            }
            other => parts.push(other),
        }
    }
    parts.join("/")
}

/// Directory part of a path; empty for top-level files
pub fn dirname(path: &str) -> String {
    let path = normalize(path);
    match path.rsplit_once('/') {
        Some((dir, _)) => dir.to_string(),
        None => String::new(),
    }
}

/// Resolve `relative` against `dir`
pub fn join(dir: &str, relative: &str) -> String {
    normalize(&format!("{}/{}", dir, relative))
}

/// Path of `target` as seen from directory `from_dir`
pub fn relative_to(from_dir: &str, target: &str) -> String {
    let from = normalize(from_dir);
    let target = normalize(target);
    let from: Vec<&str> = from.split('/').filter(|s| !s.is_empty()).collect();
    let target: Vec<&str> = target.split('/').filter(|s| !s.is_empty()).collect();

    let common = from
        .iter()
        .zip(target.iter())
        .take_while(|(a, b)| a == b)
        .count();

    let mut parts: Vec<&str> = vec![".."; from.len() - common];
    parts.extend_from_slice(&target[common..]);
    parts.join("/")
}
