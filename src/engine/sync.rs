// Synchronization manager — installs stale bundles from the remote manifest, one at a time.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::archive::unpack_into_resources;
use super::cache::CacheStore;
use super::downloader::{BundleDownloader, DownloadState, DownloadTask};
use super::events::EventBus;
use super::index::{CacheEntry, CacheIndex, Tier};
use super::manifest::{needs_update, AssetBundle, BundleKind, Manifest, ManifestClient};
use super::versions::InstalledVersions;
use crate::error::{CacheError, DownloadError, SyncError};

/// User consent for large, optional downloads.
#[async_trait]
pub trait ConsentGate: Send + Sync {
    async fn confirm_large_download(&self, bundle_id: &str, size_bytes: u64) -> bool;
}

#[async_trait]
impl<F> ConsentGate for F
where
    F: Fn(&str, u64) -> bool + Send + Sync,
{
    async fn confirm_large_download(&self, bundle_id: &str, size_bytes: u64) -> bool {
        self(bundle_id, size_bytes)
    }
}

/// Per-run accounting of what happened to each stale bundle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub installed: Vec<String>,
    pub failed: Vec<String>,
    /// Bundles the user declined to download.
    pub declined: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    /// Everything in the manifest is already installed.
    UpToDate,
    /// Manifest unreachable; continuing with whatever is cached.
    Offline,
    /// Every bundle that was attempted got installed.
    Synced(SyncReport),
    /// At least one bundle failed; the others were still installed.
    PartialFailure(SyncReport),
}

impl SyncOutcome {
    pub fn failed_bundles(&self) -> &[String] {
        match self {
            SyncOutcome::PartialFailure(report) => &report.failed,
            _ => &[],
        }
    }

    pub fn report(&self) -> Option<&SyncReport> {
        match self {
            SyncOutcome::Synced(report) | SyncOutcome::PartialFailure(report) => Some(report),
            _ => None,
        }
    }
}

/// Paths of the installed language-model files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelFiles {
    pub model: PathBuf,
    pub tokenizer: PathBuf,
    pub config: PathBuf,
}

pub struct SyncManager {
    manifest: ManifestClient,
    downloader: BundleDownloader,
    store: Arc<CacheStore>,
    index: CacheIndex,
    events: EventBus,
    consent: Arc<dyn ConsentGate>,
    consent_threshold: u64,
    versions: Mutex<InstalledVersions>,
    tasks: Mutex<Vec<DownloadTask>>,
    running: AtomicBool,
    cancel: Mutex<CancellationToken>,
}

/// Ends a run however `synchronize` exits: arms a fresh cancel token for the
/// next run, then clears the running flag.
struct RunGuard<'a> {
    running: &'a AtomicBool,
    cancel: &'a Mutex<CancellationToken>,
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        *self.cancel.lock() = CancellationToken::new();
        self.running.store(false, Ordering::Release);
    }
}

impl SyncManager {
    pub fn new(
        manifest: ManifestClient,
        downloader: BundleDownloader,
        store: Arc<CacheStore>,
        index: CacheIndex,
        events: EventBus,
        consent: Arc<dyn ConsentGate>,
        consent_threshold: u64,
    ) -> Self {
        let versions = InstalledVersions::load(&store);
        let manager = Self {
            manifest,
            downloader,
            store,
            index,
            events,
            consent,
            consent_threshold,
            versions: Mutex::new(versions),
            tasks: Mutex::new(Vec::new()),
            running: AtomicBool::new(false),
            cancel: Mutex::new(CancellationToken::new()),
        };
        manager.index_installed_bundles();
        manager
    }

    /// Make previously installed bundles resolvable by id without a sync run.
    fn index_installed_bundles(&self) {
        let versions = self.versions.lock();
        for (id, _) in versions.iter() {
            let Some(path) = self.installed_path_locked(&versions, id) else {
                continue;
            };
            if self.store.exists(&path) {
                self.index.record(CacheEntry {
                    resource_id: id.to_string(),
                    physical_path: path,
                    tier: Tier::Cache,
                    candidate_index: 0,
                    resolved_at: Utc::now(),
                });
            }
        }
    }

    fn installed_path_locked(&self, versions: &InstalledVersions, bundle_id: &str) -> Option<PathBuf> {
        let details = versions.details_of(bundle_id)?;
        self.store.bundle_path(bundle_id, &details.file_name).ok()
    }

    /// Installed file of a bundle, if the record knows it.
    pub fn installed_path(&self, bundle_id: &str) -> Option<PathBuf> {
        let versions = self.versions.lock();
        self.installed_path_locked(&versions, bundle_id)
    }

    /// Snapshot of the installed-version record.
    pub fn installed(&self) -> InstalledVersions {
        self.versions.lock().clone()
    }

    /// Tasks of the current (or most recent) run.
    pub fn tasks(&self) -> Vec<DownloadTask> {
        self.tasks.lock().clone()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Ask the running synchronization to stop. The in-flight download is
    /// abandoned and its temp file discarded. Issued while no run is active,
    /// it cancels the next run as soon as it starts.
    pub fn cancel(&self) {
        self.cancel.lock().cancel();
    }

    /// Model, tokenizer and config paths once all three are installed on disk.
    pub fn model_files(&self) -> Option<ModelFiles> {
        let versions = self.versions.lock();
        let path_of = |kind: BundleKind| -> Option<PathBuf> {
            let (id, _) = versions.find_kind(kind)?;
            let path = self.installed_path_locked(&versions, id)?;
            self.store.exists(&path).then_some(path)
        };
        Some(ModelFiles {
            model: path_of(BundleKind::Model)?,
            tokenizer: path_of(BundleKind::Tokenizer)?,
            config: path_of(BundleKind::Config)?,
        })
    }

    /// Bring installed bundles in line with the remote manifest.
    pub async fn synchronize(&self) -> Result<SyncOutcome, SyncError> {
        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(SyncError::AlreadyRunning);
        }
        let _guard = RunGuard {
            running: &self.running,
            cancel: &self.cancel,
        };

        let token = self.cancel.lock().clone();
        if token.is_cancelled() {
            info!("sync cancelled before it started");
            self.events.emit_status("Download cancelled");
            return Err(SyncError::Cancelled);
        }

        self.events.emit_status("Checking for content updates...");
        let manifest = tokio::select! {
            fetched = self.manifest.fetch_manifest() => fetched,
            _ = token.cancelled() => return Err(SyncError::Cancelled),
        };
        let manifest = match manifest {
            Ok(manifest) => manifest,
            Err(e) => {
                info!("sync continuing offline: {}", e);
                self.events
                    .emit_status("Offline: using content already on this device");
                return Ok(SyncOutcome::Offline);
            }
        };

        let stale = self.stale_bundles(&manifest.bundles);
        if stale.is_empty() {
            debug!("all {} bundle(s) up to date", manifest.bundles.len());
            self.events.emit_status("All content is up to date");
            return Ok(SyncOutcome::UpToDate);
        }
        info!("sync: {} of {} bundle(s) stale", stale.len(), manifest.bundles.len());

        *self.tasks.lock() = stale.iter().map(DownloadTask::new).collect();
        let mut report = SyncReport::default();

        // All consent prompts happen before the first download.
        let mut to_fetch = Vec::with_capacity(stale.len());
        for bundle in stale {
            if bundle.size_bytes > self.consent_threshold {
                let confirmed = tokio::select! {
                    ok = self.consent.confirm_large_download(&bundle.id, bundle.size_bytes) => ok,
                    _ = token.cancelled() => return Err(SyncError::Cancelled),
                };
                if !confirmed {
                    info!("bundle {} declined by user ({} bytes)", bundle.id, bundle.size_bytes);
                    self.update_task(&bundle.id, |t| {
                        t.advance(DownloadState::Cancelled);
                    });
                    self.events
                        .emit_status(format!("Skipped {}: download declined", bundle.id));
                    report.declined.push(bundle.id.clone());
                    continue;
                }
            }
            to_fetch.push(bundle);
        }

        let total = to_fetch.len();
        for (i, bundle) in to_fetch.iter().enumerate() {
            self.events.emit_status(format!(
                "Downloading {} ({}/{})...",
                bundle.id,
                i + 1,
                total
            ));
            let mut task = DownloadTask::new(bundle);
            let observe = |t: &DownloadTask| self.on_task_update(t);

            match self
                .downloader
                .download(bundle, &mut task, &token, &observe)
                .await
            {
                Ok(path) => match self.finish_install(bundle, &path).await {
                    Ok(()) => {
                        task.advance(DownloadState::Done);
                        self.on_task_update(&task);
                        self.events
                            .emit_status(format!("Installed {} {}", bundle.id, bundle.version));
                        report.installed.push(bundle.id.clone());
                    }
                    Err(InstallError::Unpack(e)) => {
                        warn!("bundle {} unpack failed: {}", bundle.id, e);
                        task.advance(DownloadState::Failed);
                        self.on_task_update(&task);
                        self.events
                            .emit_status(format!("Failed to install {}: {}", bundle.id, e));
                        report.failed.push(bundle.id.clone());
                    }
                    Err(InstallError::Record(e)) => {
                        task.advance(DownloadState::Failed);
                        self.on_task_update(&task);
                        self.events
                            .emit_status(format!("Could not save installed versions: {}", e));
                        return Err(SyncError::Io(e));
                    }
                },
                Err(DownloadError::Cancelled) => {
                    task.advance(DownloadState::Cancelled);
                    self.on_task_update(&task);
                    self.events.emit_status("Download cancelled");
                    return Err(SyncError::Cancelled);
                }
                Err(e) => {
                    task.advance(DownloadState::Failed);
                    self.on_task_update(&task);
                    self.events
                        .emit_status(format!("Failed to download {}: {}", bundle.id, e));
                    report.failed.push(bundle.id.clone());
                }
            }
        }

        if report.failed.is_empty() {
            self.events.emit_status("Content download complete");
            Ok(SyncOutcome::Synced(report))
        } else {
            warn!("sync finished with failed bundle(s): {:?}", report.failed);
            self.events.emit_status(format!(
                "Download finished with {} failure(s)",
                report.failed.len()
            ));
            Ok(SyncOutcome::PartialFailure(report))
        }
    }

    /// Bundles needing a download: stale versions, plus current ones whose
    /// installed file has disappeared from disk.
    fn stale_bundles(&self, declared: &[AssetBundle]) -> Vec<AssetBundle> {
        let versions = self.versions.lock();
        let mut stale = needs_update(
            &Manifest {
                bundles: declared.to_vec(),
            },
            &versions,
        );
        for bundle in declared {
            if stale.iter().any(|b| b.id == bundle.id) {
                continue;
            }
            let missing = match self.installed_path_locked(&versions, &bundle.id) {
                Some(path) => !self.store.exists(&path),
                None => true,
            };
            if missing {
                debug!("bundle {} recorded as installed but missing on disk", bundle.id);
                stale.push(bundle.clone());
            }
        }
        // Keep manifest order.
        stale.sort_by_key(|b| declared.iter().position(|d| d.id == b.id));
        stale
    }

    async fn finish_install(&self, bundle: &AssetBundle, path: &Path) -> Result<(), InstallError> {
        if bundle.kind == BundleKind::ImageArchive {
            let store = self.store.clone();
            let archive = path.to_path_buf();
            let unpacked = tokio::task::spawn_blocking(move || unpack_into_resources(&store, &archive))
                .await
                .map_err(|e| InstallError::Unpack(CacheError::io(path, std::io::Error::other(e))))?
                .map_err(InstallError::Unpack)?;
            for (id, resource_path) in unpacked {
                self.index.record(CacheEntry {
                    resource_id: id,
                    physical_path: resource_path,
                    tier: Tier::Cache,
                    candidate_index: 0,
                    resolved_at: Utc::now(),
                });
            }
        }

        {
            let mut versions = self.versions.lock();
            let previous = versions.clone();
            versions.mark_installed(bundle);
            if let Err(e) = versions.save(&self.store) {
                *versions = previous;
                return Err(InstallError::Record(e));
            }
        }

        self.index.record(CacheEntry {
            resource_id: bundle.id.clone(),
            physical_path: path.to_path_buf(),
            tier: Tier::Cache,
            candidate_index: 0,
            resolved_at: Utc::now(),
        });
        Ok(())
    }

    fn update_task(&self, bundle_id: &str, f: impl FnOnce(&mut DownloadTask)) {
        let mut tasks = self.tasks.lock();
        if let Some(task) = tasks.iter_mut().find(|t| t.bundle_id == bundle_id) {
            f(task);
        }
    }

    /// Mirror `task` into the run table and publish byte-weighted progress.
    fn on_task_update(&self, task: &DownloadTask) {
        let percent = {
            let mut tasks = self.tasks.lock();
            if let Some(slot) = tasks.iter_mut().find(|t| t.bundle_id == task.bundle_id) {
                *slot = task.clone();
            }
            overall_percent(&tasks)
        };
        if let Some(percent) = percent {
            self.events.emit_progress(percent);
        }
    }
}

enum InstallError {
    Unpack(CacheError),
    Record(CacheError),
}

/// `sum(received) / sum(expected) * 100` over the run, ignoring declined and
/// failed bundles. `None` while no size is known yet.
pub fn overall_percent(tasks: &[DownloadTask]) -> Option<f64> {
    let (received, expected) = tasks
        .iter()
        .filter(|t| match t.state {
            DownloadState::Failed => false,
            DownloadState::Cancelled => t.bytes_received > 0,
            _ => true,
        })
        .fold((0u64, 0u64), |(r, e), t| {
            let expected = t.bytes_expected.max(t.bytes_received);
            (r + t.bytes_received.min(expected), e + expected)
        });
    if expected == 0 {
        return None;
    }
    Some(received as f64 / expected as f64 * 100.0)
}
