// Filesystem-backed source for bundled app assets and plain paths.

use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use bytes::Bytes;
use tokio::fs::File;
use tokio::io::AsyncReadExt;

use super::traits::{is_network_location, AssetSource, SourceInfo, SourceReader};
use crate::config::READ_CHUNK_BYTES;

/// Reads `file://` URIs, bare paths, and mounted platform schemes such as
/// `asset:/` from the local filesystem.
pub struct LocalSource {
    /// (location prefix, directory it maps to), longest prefix first.
    mounts: Vec<(String, PathBuf)>,
}

impl LocalSource {
    pub fn new() -> Self {
        Self { mounts: Vec::new() }
    }

    /// Serve both Android asset schemes from the directory the shell extracted
    /// packaged assets into.
    pub fn with_asset_root(asset_root: impl Into<PathBuf>) -> Self {
        let root = asset_root.into();
        Self::new()
            .mount("file:///android_asset/", root.clone())
            .mount("asset:/", root)
    }

    /// Map every location starting with `prefix` onto `dir`.
    pub fn mount(mut self, prefix: impl Into<String>, dir: impl Into<PathBuf>) -> Self {
        self.mounts.push((prefix.into(), dir.into()));
        self.mounts.sort_by(|a, b| b.0.len().cmp(&a.0.len()));
        self
    }

    /// Translate a location into a filesystem path.
    pub fn to_path(&self, location: &str) -> Option<PathBuf> {
        for (prefix, dir) in &self.mounts {
            if let Some(rest) = location.strip_prefix(prefix.as_str()) {
                let rest = rest.trim_start_matches('/');
                if rest.split('/').any(|seg| seg == "..") {
                    return None;
                }
                return Some(dir.join(rest));
            }
        }
        if let Some(rest) = location.strip_prefix("file://") {
            return Some(PathBuf::from(rest));
        }
        if location.contains("://") || location.starts_with("asset:") {
            return None;
        }
        Some(PathBuf::from(location))
    }
}

impl Default for LocalSource {
    fn default() -> Self {
        Self::new()
    }
}

struct FileReader {
    info: SourceInfo,
    file: File,
    buf: Vec<u8>,
}

#[async_trait]
impl SourceReader for FileReader {
    fn info(&self) -> &SourceInfo {
        &self.info
    }

    async fn next_chunk(&mut self) -> Result<Option<Bytes>> {
        let n = self.file.read(&mut self.buf).await?;
        if n == 0 {
            return Ok(None);
        }
        Ok(Some(Bytes::copy_from_slice(&self.buf[..n])))
    }
}

#[async_trait]
impl AssetSource for LocalSource {
    fn handles(&self, location: &str) -> bool {
        !is_network_location(location) && self.to_path(location).is_some()
    }

    async fn open(&self, location: &str) -> Result<Box<dyn SourceReader>> {
        let path = self
            .to_path(location)
            .ok_or_else(|| anyhow!("unsupported location: {}", location))?;
        open_file(&path).await
    }
}

async fn open_file(path: &Path) -> Result<Box<dyn SourceReader>> {
    let file = File::open(path)
        .await
        .with_context(|| format!("open {}", path.display()))?;
    let meta = file.metadata().await?;
    if !meta.is_file() {
        return Err(anyhow!("not a file: {}", path.display()));
    }
    Ok(Box::new(FileReader {
        info: SourceInfo {
            content_length: Some(meta.len()),
            content_type: "application/octet-stream".to_string(),
        },
        file,
        buf: vec![0u8; READ_CHUNK_BYTES],
    }))
}
