//! Error types surfaced by the engine.
//!
//! Sources and tier probes work with `anyhow::Result` internally; only the
//! types below cross a component boundary.

use std::path::PathBuf;

use thiserror::Error;

/// Cache Store failure. Always an I/O problem on the cache tree.
#[derive(Error, Debug)]
pub enum CacheError {
    /// I/O error on a specific path
    #[error("cache I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Resource id that cannot be mapped into the cache tree
    #[error("invalid resource id: {0:?}")]
    InvalidId(String),
}

impl CacheError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Manifest fetch failure.
#[derive(Error, Debug)]
pub enum ManifestError {
    /// Remote manifest could not be reached
    #[error("manifest unavailable: {0}")]
    Unavailable(String),

    /// Manifest body was not the expected JSON document
    #[error("malformed manifest: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Failure of a single bundle download attempt.
#[derive(Error, Debug)]
pub enum DownloadError {
    /// Remote unreachable or returned an error status
    #[error("network error: {0}")]
    Network(String),

    /// Staging or installing the file failed
    #[error(transparent)]
    Io(#[from] CacheError),

    /// Downloaded file did not match what the manifest declared
    #[error("verification failed for {bundle_id}: {reason}")]
    Verification { bundle_id: String, reason: String },

    /// The sync run was cancelled mid-download
    #[error("download cancelled")]
    Cancelled,
}

/// Failure of a whole synchronization run.
///
/// Per-bundle failures are not errors; they are reported in
/// [`SyncOutcome::PartialFailure`](crate::engine::sync::SyncOutcome).
#[derive(Error, Debug)]
pub enum SyncError {
    /// Another `synchronize()` is already in progress
    #[error("synchronization already running")]
    AlreadyRunning,

    /// The run was cancelled cooperatively
    #[error("synchronization cancelled")]
    Cancelled,

    /// Persisting the installed-version record failed
    #[error(transparent)]
    Io(#[from] CacheError),
}

/// Every candidate tier failed for a resource id.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("resource {resource_id:?} unresolved after {attempts} probe(s)")]
pub struct Unresolved {
    pub resource_id: String,
    pub attempts: usize,
}
