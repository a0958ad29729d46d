// Bundle downloader — streams one bundle into a staged file, verifies it, and commits it.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use sha2::{Digest, Sha256};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::cache::{CacheStore, StagedWrite};
use super::manifest::AssetBundle;
use super::stats::StatsCollector;
use crate::error::DownloadError;
use crate::source::traits::AssetSource;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadState {
    Pending,
    Fetching,
    Verifying,
    Installing,
    Done,
    Failed,
    Cancelled,
}

impl DownloadState {
    /// Legal moves of the per-bundle state machine. `Fetching -> Fetching` and
    /// `Verifying -> Fetching` are retries.
    pub fn can_advance_to(self, next: DownloadState) -> bool {
        use DownloadState::*;
        matches!(
            (self, next),
            (Pending, Fetching)
                | (Pending, Cancelled)
                | (Fetching, Fetching)
                | (Fetching, Verifying)
                | (Fetching, Failed)
                | (Fetching, Cancelled)
                | (Verifying, Installing)
                | (Verifying, Fetching)
                | (Verifying, Failed)
                | (Verifying, Cancelled)
                | (Installing, Done)
                | (Installing, Failed)
                | (Installing, Cancelled)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            DownloadState::Done | DownloadState::Failed | DownloadState::Cancelled
        )
    }
}

/// Progress of one bundle within a sync run. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadTask {
    pub bundle_id: String,
    pub state: DownloadState,
    pub bytes_expected: u64,
    pub bytes_received: u64,
    pub attempt: u32,
}

impl DownloadTask {
    pub fn new(bundle: &AssetBundle) -> Self {
        Self {
            bundle_id: bundle.id.clone(),
            state: DownloadState::Pending,
            bytes_expected: bundle.size_bytes,
            bytes_received: 0,
            attempt: 0,
        }
    }

    /// Move to `next` if the state machine allows it. Returns whether it moved.
    pub fn advance(&mut self, next: DownloadState) -> bool {
        if self.state.can_advance_to(next) {
            self.state = next;
            true
        } else {
            warn!(
                "bundle {} ignored illegal transition {:?} -> {:?}",
                self.bundle_id, self.state, next
            );
            false
        }
    }
}

pub type TaskObserver<'a> = dyn Fn(&DownloadTask) + Send + Sync + 'a;

pub struct BundleDownloader {
    source: Arc<dyn AssetSource>,
    store: Arc<CacheStore>,
    stats: Arc<StatsCollector>,
    max_attempts: u32,
    backoff: Duration,
}

impl BundleDownloader {
    pub fn new(
        source: Arc<dyn AssetSource>,
        store: Arc<CacheStore>,
        stats: Arc<StatsCollector>,
        max_attempts: u32,
        backoff: Duration,
    ) -> Self {
        Self {
            source,
            store,
            stats,
            max_attempts: max_attempts.max(1),
            backoff,
        }
    }

    /// Download, verify and atomically install `bundle`, retrying transient
    /// failures up to the attempt budget.
    ///
    /// On success the task is left in `Installing` with the file committed at
    /// the returned path; the caller finishes the install (version record,
    /// archive unpacking) and moves it to `Done`.
    pub async fn download(
        &self,
        bundle: &AssetBundle,
        task: &mut DownloadTask,
        token: &CancellationToken,
        observe: &TaskObserver<'_>,
    ) -> Result<PathBuf, DownloadError> {
        let final_path = self
            .store
            .bundle_path(&bundle.id, &bundle.install_file_name())?;

        for attempt in 1..=self.max_attempts {
            if token.is_cancelled() {
                return Err(DownloadError::Cancelled);
            }

            task.attempt = attempt;
            task.bytes_received = 0;
            task.advance(DownloadState::Fetching);
            observe(task);

            match self.attempt_once(bundle, task, token, observe, &final_path).await {
                Ok(path) => {
                    info!(
                        "bundle {}@{} installed at {} ({} bytes, attempt {})",
                        bundle.id,
                        bundle.version,
                        path.display(),
                        task.bytes_received,
                        attempt
                    );
                    return Ok(path);
                }
                Err(DownloadError::Cancelled) => {
                    debug!("bundle {} cancelled during attempt {}", bundle.id, attempt);
                    return Err(DownloadError::Cancelled);
                }
                // Disk problems are surfaced, not retried.
                Err(e @ DownloadError::Io(_)) => {
                    warn!("bundle {} install failed: {}", bundle.id, e);
                    return Err(e);
                }
                Err(e) if attempt < self.max_attempts => {
                    warn!(
                        "bundle {} attempt {} failed: {}",
                        bundle.id, attempt, e
                    );
                    let delay = self.backoff * attempt;
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = token.cancelled() => return Err(DownloadError::Cancelled),
                    }
                }
                Err(e) => {
                    warn!(
                        "bundle {} failed after {} attempts: {}",
                        bundle.id, self.max_attempts, e
                    );
                    return Err(e);
                }
            }
        }

        Err(DownloadError::Network(format!(
            "bundle {} exhausted its attempts",
            bundle.id
        )))
    }

    async fn attempt_once(
        &self,
        bundle: &AssetBundle,
        task: &mut DownloadTask,
        token: &CancellationToken,
        observe: &TaskObserver<'_>,
        final_path: &Path,
    ) -> Result<PathBuf, DownloadError> {
        let mut reader = tokio::select! {
            opened = self.source.open(&bundle.url) => {
                opened.map_err(|e| DownloadError::Network(e.to_string()))?
            }
            _ = token.cancelled() => return Err(DownloadError::Cancelled),
        };

        if task.bytes_expected == 0 {
            if let Some(len) = reader.info().content_length {
                task.bytes_expected = len;
            }
        }

        let mut staged = self.store.stage(final_path)?;
        let mut hasher = Sha256::new();

        loop {
            let chunk = tokio::select! {
                chunk = reader.next_chunk() => chunk,
                _ = token.cancelled() => {
                    staged.discard();
                    return Err(DownloadError::Cancelled);
                }
            };
            let chunk = match chunk {
                Ok(Some(chunk)) => chunk,
                Ok(None) => break,
                Err(e) => {
                    staged.discard();
                    return Err(DownloadError::Network(e.to_string()));
                }
            };
            staged.write(&chunk)?;
            hasher.update(&chunk);
            task.bytes_received += chunk.len() as u64;
            self.stats.record_downloaded(chunk.len() as u64);
            observe(task);
        }

        task.advance(DownloadState::Verifying);
        observe(task);
        let digest = format!("{:x}", hasher.finalize());
        if let Err(e) = verify(bundle, &staged, &digest) {
            staged.discard();
            return Err(e);
        }

        if token.is_cancelled() {
            staged.discard();
            return Err(DownloadError::Cancelled);
        }

        task.advance(DownloadState::Installing);
        observe(task);
        Ok(staged.commit()?)
    }
}

/// Check a fully staged download against what the manifest declared.
fn verify(bundle: &AssetBundle, staged: &StagedWrite, sha256_hex: &str) -> Result<(), DownloadError> {
    if staged.is_empty() {
        return Err(DownloadError::Verification {
            bundle_id: bundle.id.clone(),
            reason: "downloaded file is empty".to_string(),
        });
    }
    if bundle.size_bytes > 0 && staged.len() != bundle.size_bytes {
        return Err(DownloadError::Verification {
            bundle_id: bundle.id.clone(),
            reason: format!(
                "size mismatch: expected {} bytes, got {}",
                bundle.size_bytes,
                staged.len()
            ),
        });
    }
    if let Some(expected) = bundle.sha256.as_deref() {
        if !expected.eq_ignore_ascii_case(sha256_hex) {
            return Err(DownloadError::Verification {
                bundle_id: bundle.id.clone(),
                reason: format!("sha256 mismatch: expected {}, got {}", expected, sha256_hex),
            });
        }
    }
    Ok(())
}
