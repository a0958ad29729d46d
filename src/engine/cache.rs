// On-disk cache store — the only component that writes into the cache tree.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use bytes::Bytes;
use tempfile::NamedTempFile;
use tracing::{debug, warn};

use crate::error::CacheError;

const RESOURCES_DIR: &str = "resources";
const BUNDLES_DIR: &str = "bundles";
const VERSIONS_FILE: &str = "installed_versions.json";

/// Prefix of in-progress temp files; anything carrying it is never a valid asset.
pub const PARTIAL_PREFIX: &str = ".partial-";

/// Reduce a logical id to the name it is cached under.
///
/// Any path information is dropped (`img/2020/q1.png` -> `q1.png`). Returns
/// `None` for ids that would not name a single file.
pub fn canonical_id(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    let name = trimmed
        .rsplit(|c: char| c == '/' || c == '\\')
        .next()
        .unwrap_or(trimmed)
        .trim();
    if name.is_empty() || name == "." || name == ".." || name.starts_with(PARTIAL_PREFIX) {
        return None;
    }
    Some(name.to_string())
}

pub struct CacheStore {
    root: PathBuf,
}

impl CacheStore {
    /// Open (creating if needed) the cache tree rooted at `root`.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, CacheError> {
        let store = Self { root: root.into() };
        store.ensure(&store.root)?;
        store.ensure(&store.root.join(RESOURCES_DIR))?;
        store.ensure(&store.root.join(BUNDLES_DIR))?;
        Ok(store)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn resources_dir(&self) -> PathBuf {
        self.root.join(RESOURCES_DIR)
    }

    /// Location of the persisted installed-version record.
    pub fn versions_path(&self) -> PathBuf {
        self.root.join(VERSIONS_FILE)
    }

    /// Canonical cache path for a resource id.
    pub fn resource_path(&self, resource_id: &str) -> Result<PathBuf, CacheError> {
        let name = canonical_id(resource_id)
            .ok_or_else(|| CacheError::InvalidId(resource_id.to_string()))?;
        Ok(self.resources_dir().join(name))
    }

    /// Install path for a bundle: `bundles/<id>/<file_name>`.
    pub fn bundle_path(&self, bundle_id: &str, file_name: &str) -> Result<PathBuf, CacheError> {
        let dir = canonical_id(bundle_id)
            .ok_or_else(|| CacheError::InvalidId(bundle_id.to_string()))?;
        let name = canonical_id(file_name)
            .ok_or_else(|| CacheError::InvalidId(file_name.to_string()))?;
        Ok(self.root.join(BUNDLES_DIR).join(dir).join(name))
    }

    /// Create `dir` and its parents.
    pub fn ensure(&self, dir: &Path) -> Result<(), CacheError> {
        fs::create_dir_all(dir).map_err(|e| CacheError::io(dir, e))
    }

    /// Whether a complete file is present at `path`.
    pub fn exists(&self, path: &Path) -> bool {
        path.is_file()
    }

    pub fn size_of(&self, path: &Path) -> Option<u64> {
        fs::metadata(path).ok().filter(|m| m.is_file()).map(|m| m.len())
    }

    /// Write `data` to a temp file beside `final_path`, then rename it into place.
    ///
    /// Readers of `final_path` see either the previous file or the complete new
    /// one, never a prefix.
    pub fn write_atomic(&self, data: &[u8], final_path: &Path) -> Result<(), CacheError> {
        let mut staged = self.stage(final_path)?;
        staged.write(data)?;
        staged.commit()?;
        Ok(())
    }

    /// Open a streaming atomic write targeting `final_path`.
    ///
    /// Nothing appears at `final_path` until [`StagedWrite::commit`]. Dropping
    /// the stage deletes its temp file.
    pub fn stage(&self, final_path: &Path) -> Result<StagedWrite, CacheError> {
        if !final_path.starts_with(&self.root) {
            return Err(CacheError::io(
                final_path,
                std::io::Error::new(
                    std::io::ErrorKind::PermissionDenied,
                    "path is outside the cache root",
                ),
            ));
        }
        let dir = final_path.parent().unwrap_or(&self.root);
        self.ensure(dir)?;
        let temp = tempfile::Builder::new()
            .prefix(PARTIAL_PREFIX)
            .tempfile_in(dir)
            .map_err(|e| CacheError::io(dir, e))?;
        Ok(StagedWrite {
            temp,
            final_path: final_path.to_path_buf(),
            written: 0,
        })
    }

    /// Delete a cached file. Missing files are not an error.
    pub fn remove(&self, path: &Path) -> Result<(), CacheError> {
        match fs::remove_file(path) {
            Ok(()) => {
                debug!("cache removed {}", path.display());
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(CacheError::io(path, e)),
        }
    }

    pub fn read(&self, path: &Path) -> Result<Bytes, CacheError> {
        fs::read(path)
            .map(Bytes::from)
            .map_err(|e| CacheError::io(path, e))
    }

    /// Names of all complete files in the resources directory, sorted.
    pub fn list_resources(&self) -> Result<Vec<String>, CacheError> {
        let dir = self.resources_dir();
        let mut names = Vec::new();
        for entry in fs::read_dir(&dir).map_err(|e| CacheError::io(&dir, e))? {
            let entry = entry.map_err(|e| CacheError::io(&dir, e))?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with(PARTIAL_PREFIX) {
                continue;
            }
            if entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
                names.push(name);
            }
        }
        names.sort();
        Ok(names)
    }

    /// Delete temp files left behind by a killed process. Returns how many were removed.
    pub fn sweep_partials(&self) -> Result<usize, CacheError> {
        let mut removed = 0;
        let mut pending = vec![self.root.clone()];
        while let Some(dir) = pending.pop() {
            for entry in fs::read_dir(&dir).map_err(|e| CacheError::io(&dir, e))? {
                let entry = entry.map_err(|e| CacheError::io(&dir, e))?;
                let path = entry.path();
                let file_type = entry.file_type().map_err(|e| CacheError::io(&path, e))?;
                if file_type.is_dir() {
                    pending.push(path);
                } else if entry.file_name().to_string_lossy().starts_with(PARTIAL_PREFIX) {
                    match fs::remove_file(&path) {
                        Ok(()) => removed += 1,
                        Err(e) => warn!("failed to sweep {}: {}", path.display(), e),
                    }
                }
            }
        }
        if removed > 0 {
            debug!("swept {} partial file(s) under {}", removed, self.root.display());
        }
        Ok(removed)
    }
}

/// An in-progress atomic write.
pub struct StagedWrite {
    temp: NamedTempFile,
    final_path: PathBuf,
    written: u64,
}

impl StagedWrite {
    pub fn write(&mut self, data: &[u8]) -> Result<(), CacheError> {
        self.temp
            .write_all(data)
            .map_err(|e| CacheError::io(self.temp.path(), e))?;
        self.written += data.len() as u64;
        Ok(())
    }

    /// Bytes written so far.
    pub fn len(&self) -> u64 {
        self.written
    }

    pub fn is_empty(&self) -> bool {
        self.written == 0
    }

    pub fn final_path(&self) -> &Path {
        &self.final_path
    }

    /// Flush to disk and rename into the final path in a single step.
    pub fn commit(mut self) -> Result<PathBuf, CacheError> {
        self.temp
            .flush()
            .and_then(|_| self.temp.as_file().sync_all())
            .map_err(|e| CacheError::io(self.temp.path(), e))?;
        let final_path = self.final_path;
        self.temp
            .persist(&final_path)
            .map_err(|e| CacheError::io(&final_path, e.error))?;
        Ok(final_path)
    }

    /// Drop the temp file without touching the final path.
    pub fn discard(self) {
        let path = self.temp.path().to_path_buf();
        if let Err(e) = self.temp.close() {
            warn!("failed to discard {}: {}", path.display(), e);
        }
    }
}
