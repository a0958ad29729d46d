use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::config::EngineConfig;
use crate::engine::cache::CacheStore;
use crate::engine::downloader::{BundleDownloader, DownloadTask};
use crate::engine::events::{EngineEvent, EventBus, Subscription};
use crate::engine::index::CacheIndex;
use crate::engine::manifest::ManifestClient;
use crate::engine::resolver::{ResolvedPath, ResourceResolver};
use crate::engine::stats::{StatsCollector, StatsSnapshot};
use crate::engine::sync::{ConsentGate, ModelFiles, SyncManager, SyncOutcome};
use crate::engine::versions::InstalledVersions;
use crate::error::{CacheError, SyncError, Unresolved};
use crate::source::router::SourceRouter;
use crate::source::traits::AssetSource;

/// Handle the application shell builds once at start-up and shares.
///
/// Owns the cache store, the synchronization manager and the resolver; all of
/// them share one event bus and one cache index.
pub struct AssetEngine {
    store: Arc<CacheStore>,
    sync: SyncManager,
    resolver: ResourceResolver,
    events: EventBus,
    stats: Arc<StatsCollector>,
}

impl AssetEngine {
    /// Build an engine reading HTTP and local/bundled locations.
    pub fn new(config: EngineConfig, consent: Arc<dyn ConsentGate>) -> Result<Self, CacheError> {
        let source = Arc::new(SourceRouter::standard(&config.asset_root));
        Self::with_source(config, source, consent)
    }

    /// Build an engine over a caller-supplied source.
    pub fn with_source(
        config: EngineConfig,
        source: Arc<dyn AssetSource>,
        consent: Arc<dyn ConsentGate>,
    ) -> Result<Self, CacheError> {
        let store = Arc::new(CacheStore::open(&config.cache_dir)?);
        match store.sweep_partials() {
            Ok(0) => {}
            Ok(n) => info!("removed {} leftover partial file(s)", n),
            Err(e) => warn!("partial sweep failed: {}", e),
        }

        let events = EventBus::new();
        let index = CacheIndex::new();
        let stats = Arc::new(StatsCollector::new());
        let timeout = Duration::from_millis(config.remote_probe_timeout_ms);

        let manifest = ManifestClient::new(source.clone(), config.manifest_url.clone(), timeout);
        let downloader = BundleDownloader::new(
            source.clone(),
            store.clone(),
            stats.clone(),
            config.max_download_attempts,
            Duration::from_millis(config.retry_backoff_ms),
        );
        let sync = SyncManager::new(
            manifest,
            downloader,
            store.clone(),
            index.clone(),
            events.clone(),
            consent,
            config.consent_threshold_bytes,
        );
        let resolver = ResourceResolver::new(
            &config,
            store.clone(),
            source,
            index,
            events.clone(),
            stats.clone(),
        );

        info!(
            "asset engine ready at {} ({} bundle(s) installed)",
            store.root().display(),
            sync.installed().len()
        );
        Ok(Self {
            store,
            sync,
            resolver,
            events,
            stats,
        })
    }

    pub async fn synchronize(&self) -> Result<SyncOutcome, SyncError> {
        self.sync.synchronize().await
    }

    pub fn cancel_sync(&self) {
        self.sync.cancel();
    }

    pub fn is_syncing(&self) -> bool {
        self.sync.is_running()
    }

    pub fn download_tasks(&self) -> Vec<DownloadTask> {
        self.sync.tasks()
    }

    pub fn installed_versions(&self) -> InstalledVersions {
        self.sync.installed()
    }

    pub fn model_files(&self) -> Option<ModelFiles> {
        self.sync.model_files()
    }

    pub fn installed_bundle_path(&self, bundle_id: &str) -> Option<PathBuf> {
        self.sync.installed_path(bundle_id)
    }

    pub async fn resolve(&self, resource_id: &str) -> Result<ResolvedPath, Unresolved> {
        self.resolver.resolve(resource_id).await
    }

    pub fn invalidate(&self, resource_id: &str) -> bool {
        self.resolver.invalidate(resource_id)
    }

    pub async fn prefetch<I, S>(&self, ids: I) -> Vec<String>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.resolver.prefetch(ids).await
    }

    pub fn resolver(&self) -> &ResourceResolver {
        &self.resolver
    }

    #[must_use]
    pub fn on_progress(&self, f: impl Fn(f64) + Send + Sync + 'static) -> Subscription {
        self.events.on_progress(f)
    }

    #[must_use]
    pub fn on_status(&self, f: impl Fn(&str) + Send + Sync + 'static) -> Subscription {
        self.events.on_status(f)
    }

    /// Every progress and status event, as an async stream.
    pub fn events(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.stream()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    pub fn cache_root(&self) -> &std::path::Path {
        self.store.root()
    }

    /// Names currently held in the resource cache.
    pub fn cached_resources(&self) -> Result<Vec<String>, CacheError> {
        self.store.list_resources()
    }
}
