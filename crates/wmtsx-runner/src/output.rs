//! Output Path Resolver and the output store capability.
//!
//! Paths are namespaced by AOI identity and acquisition datetime, so writers
//! working on different features never collide. The existence check that
//! implements skip-unless-overwrite goes through [`OutputStore`], which lets the
//! pipeline run against an in-memory registry in tests.

use crate::config::DirLayout;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use wmtsx_catalog::{AreaOfInterest, CatalogueFeature};
use wmtsx_tiles::OutputFormat;

/// Directory name for features without a platform.
const UNKNOWN_PLATFORM: &str = "unknown";

/// Existence check and write, the only filesystem operations the pipeline needs.
pub trait OutputStore: Send + Sync {
    /// Whether `path` already holds an output.
    fn exists(&self, path: &Path) -> bool;

    /// Write `data` to `path`, creating parent directories as needed.
    fn write(&self, path: &Path, data: &[u8]) -> std::io::Result<()>;
}

/// Store backed by the local filesystem.
#[derive(Debug, Clone, Copy, Default)]
pub struct FsStore;

impl OutputStore for FsStore {
    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn write(&self, path: &Path, data: &[u8]) -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        // Write next to the target and rename, so an interrupted write never
        // leaves a file that a later run would skip.
        let partial = path.with_extension("partial");
        let written = fs::File::create(&partial)
            .and_then(|mut file| {
                file.write_all(data)?;
                file.sync_all()
            })
            .and_then(|()| fs::rename(&partial, path));
        if written.is_err() {
            // Best effort; the write error is what the caller needs.
            let _ = fs::remove_file(&partial);
        }
        written
    }
}

/// In-memory path registry.
#[derive(Debug, Default)]
pub struct MemoryStore {
    files: Mutex<HashMap<PathBuf, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pretend `path` already exists.
    pub fn insert(&self, path: impl Into<PathBuf>, data: Vec<u8>) {
        self.files.lock().insert(path.into(), data);
    }

    pub fn get(&self, path: &Path) -> Option<Vec<u8>> {
        self.files.lock().get(path).cloned()
    }

    /// All stored paths, sorted.
    pub fn paths(&self) -> Vec<PathBuf> {
        let mut paths: Vec<PathBuf> = self.files.lock().keys().cloned().collect();
        paths.sort();
        paths
    }

    pub fn len(&self) -> usize {
        self.files.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.lock().is_empty()
    }
}

impl OutputStore for MemoryStore {
    fn exists(&self, path: &Path) -> bool {
        self.files.lock().contains_key(path)
    }

    fn write(&self, path: &Path, data: &[u8]) -> std::io::Result<()> {
        self.insert(path, data.to_vec());
        Ok(())
    }
}

/// Derives destination paths. Pure string construction; never touches the store.
#[derive(Debug, Clone, PartialEq)]
pub struct OutputResolver {
    root: PathBuf,
    layout: DirLayout,
    format: OutputFormat,
    zoom: u8,
}

impl OutputResolver {
    pub fn new(root: impl Into<PathBuf>, layout: DirLayout, format: OutputFormat, zoom: u8) -> Self {
        Self {
            root: root.into(),
            layout,
            format,
            zoom,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory that holds the outputs of `aoi` for `feature`.
    pub fn directory(&self, aoi_id: &str, feature: &CatalogueFeature) -> PathBuf {
        let platform = path_component(feature.platform.as_deref().unwrap_or(UNKNOWN_PLATFORM));
        let mut dir = match self.layout {
            DirLayout::Aoi => self.root.join(aoi_id),
            DirLayout::Platform => self.root.join(aoi_id).join(platform),
            DirLayout::PlatformFirst => self.root.join(platform).join(aoi_id),
        };
        if let Some(acquired) = feature.acquired {
            dir.push(acquired.format("%Y%m%d_%H%M%S").to_string());
        }
        dir
    }

    /// File name for `feature` within its directory.
    pub fn file_name(&self, aoi_id: &str, distance: f64, feature: &CatalogueFeature) -> String {
        let mut name = aoi_id.to_string();
        if let Some(acquired) = feature.acquired {
            name.push('_');
            name.push_str(&acquired.format("%Y%m%d%H%M%S").to_string());
        }
        format!(
            "{}_{}_{}_{}.{}",
            name,
            self.zoom,
            distance,
            path_component(&feature.id),
            self.format.extension()
        )
    }

    /// Full destination path of the mosaic of `feature` over `aoi`.
    pub fn resolve(&self, aoi: &AreaOfInterest, feature: &CatalogueFeature) -> PathBuf {
        self.directory(&aoi.id, feature)
            .join(self.file_name(&aoi.id, aoi.distance, feature))
    }
}

/// Keep identifiers from escaping their directory.
fn path_component(raw: &str) -> String {
    raw.chars()
        .map(|c| if matches!(c, '/' | '\\' | ':') { '-' } else { c })
        .collect()
}

/// Output paths currently being produced in this run.
///
/// The existence check and the write for one path happen while the path is
/// claimed, so two workers never both decide to produce the same file.
#[derive(Debug, Default)]
pub struct ClaimRegistry {
    claimed: Mutex<HashSet<PathBuf>>,
}

impl ClaimRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim `path`. Returns `None` if another worker holds it.
    pub fn claim(&self, path: &Path) -> Option<Claim<'_>> {
        if self.claimed.lock().insert(path.to_path_buf()) {
            Some(Claim {
                registry: self,
                path: path.to_path_buf(),
            })
        } else {
            None
        }
    }

    pub fn is_claimed(&self, path: &Path) -> bool {
        self.claimed.lock().contains(path)
    }
}

/// Releases its path when dropped.
#[derive(Debug)]
pub struct Claim<'a> {
    registry: &'a ClaimRegistry,
    path: PathBuf,
}

impl Claim<'_> {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for Claim<'_> {
    fn drop(&mut self) {
        self.registry.claimed.lock().remove(&self.path);
    }
}
