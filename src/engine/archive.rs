// Image archive unpacking — spreads an installed tar(.gz) bundle into the resources tree.

use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::{Component, Path, PathBuf};

use flate2::read::GzDecoder;
use tar::Archive;
use tracing::{debug, warn};

use super::cache::{canonical_id, CacheStore};
use crate::error::CacheError;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Upper bound on buffer space reserved from an entry's declared size.
const MAX_PREALLOC_BYTES: u64 = 1024 * 1024;

/// Unpack every regular file of the archive at `archive_path` into the
/// resources directory, one atomic write per file. Entries are flattened to
/// their file name. Returns `(resource_id, path)` for each file written.
pub fn unpack_into_resources(
    store: &CacheStore,
    archive_path: &Path,
) -> Result<Vec<(String, PathBuf)>, CacheError> {
    let mut file = File::open(archive_path).map_err(|e| CacheError::io(archive_path, e))?;
    let mut magic = [0u8; 2];
    let gzipped = match file.read_exact(&mut magic) {
        Ok(()) => magic == GZIP_MAGIC,
        Err(_) => false,
    };
    file.seek(SeekFrom::Start(0))
        .map_err(|e| CacheError::io(archive_path, e))?;

    let reader = BufReader::new(file);
    if gzipped {
        unpack(store, archive_path, Archive::new(GzDecoder::new(reader)))
    } else {
        unpack(store, archive_path, Archive::new(reader))
    }
}

fn unpack<R: Read>(
    store: &CacheStore,
    archive_path: &Path,
    mut archive: Archive<R>,
) -> Result<Vec<(String, PathBuf)>, CacheError> {
    let io_err = |e: std::io::Error| CacheError::io(archive_path, e);
    let mut written = Vec::new();

    for entry in archive.entries().map_err(io_err)? {
        let mut entry = entry.map_err(io_err)?;
        if !entry.header().entry_type().is_file() {
            continue;
        }
        let entry_path = entry.path().map_err(io_err)?.into_owned();
        if !is_safe_entry(&entry_path) {
            warn!(
                "skipping unsafe archive entry {} in {}",
                entry_path.display(),
                archive_path.display()
            );
            continue;
        }
        let Some(id) = entry_path
            .file_name()
            .and_then(|n| n.to_str())
            .and_then(canonical_id)
        else {
            continue;
        };

        let mut data = Vec::with_capacity(entry.size().min(MAX_PREALLOC_BYTES) as usize);
        entry.read_to_end(&mut data).map_err(io_err)?;
        if (data.len() as u64) < entry.size() {
            return Err(io_err(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                format!("entry {} is truncated", entry_path.display()),
            )));
        }
        if data.is_empty() {
            continue;
        }

        let dest = store.resource_path(&id)?;
        store.write_atomic(&data, &dest)?;
        written.push((id, dest));
    }

    debug!(
        "unpacked {} file(s) from {}",
        written.len(),
        archive_path.display()
    );
    Ok(written)
}

fn is_safe_entry(path: &Path) -> bool {
    path.components()
        .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
}
