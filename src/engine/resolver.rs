// Resource resolver — logical id -> cached path, probing cache, bundled and remote tiers in order.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use bytes::Bytes;
use chrono::Utc;
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use super::cache::{canonical_id, CacheStore};
use super::events::EventBus;
use super::index::{CacheEntry, CacheIndex, Tier};
use super::stats::{StatsCollector, StatsSnapshot};
use crate::config::{EngineConfig, ID_PLACEHOLDER};
use crate::error::Unresolved;
use crate::source::traits::{is_network_location, AssetSource};

/// One place a resource might be found.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub tier: Tier,
    /// Cache path, bundled URI/path, or remote URL.
    pub location: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPath {
    pub resource_id: String,
    /// Always inside the cache store.
    pub path: PathBuf,
    /// Tier that produced the bytes for this request.
    pub tier: Tier,
}

type Outcome = Result<ResolvedPath, Unresolved>;

struct Inner {
    store: Arc<CacheStore>,
    source: Arc<dyn AssetSource>,
    index: CacheIndex,
    events: EventBus,
    stats: Arc<StatsCollector>,
    bundled_templates: Vec<String>,
    remote_base_url: String,
    probe_timeout: Duration,
    max_tier_attempts: usize,
    /// In-flight resolutions; later callers subscribe to the leader's result.
    inflight: Mutex<HashMap<String, watch::Sender<Option<Outcome>>>>,
    /// Candidate index to resume after, set by `invalidate` for the next request only.
    resume_after: Mutex<HashMap<String, usize>>,
}

/// Cheap to clone; clones share the in-flight table and cache index.
#[derive(Clone)]
pub struct ResourceResolver {
    inner: Arc<Inner>,
}

impl ResourceResolver {
    pub fn new(
        config: &EngineConfig,
        store: Arc<CacheStore>,
        source: Arc<dyn AssetSource>,
        index: CacheIndex,
        events: EventBus,
        stats: Arc<StatsCollector>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                source,
                index,
                events,
                stats,
                bundled_templates: config.bundled_templates.clone(),
                remote_base_url: config.remote_base_url.trim_end_matches('/').to_string(),
                probe_timeout: Duration::from_millis(config.remote_probe_timeout_ms),
                max_tier_attempts: config.max_tier_attempts.max(1),
                inflight: Mutex::new(HashMap::new()),
                resume_after: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Ordered candidate list for a canonical id: cache, bundled templates, remote.
    pub fn candidates(&self, resource_id: &str) -> Vec<Candidate> {
        self.inner.candidates(resource_id)
    }

    /// Resolve `resource_id` to a path in the cache store.
    ///
    /// Concurrent calls for the same id share one probe sequence. Once resolved,
    /// later calls are answered from the cache without probing other tiers.
    pub async fn resolve(&self, resource_id: &str) -> Outcome {
        let Some(id) = canonical_id(resource_id) else {
            debug!("rejecting unusable resource id {:?}", resource_id);
            self.inner.stats.record_unresolved();
            return Err(Unresolved {
                resource_id: resource_id.to_string(),
                attempts: 0,
            });
        };

        if let Some(hit) = self.inner.remembered(&id) {
            return Ok(hit);
        }

        let mut rx = {
            let mut inflight = self.inner.inflight.lock();
            match inflight.get(&id) {
                Some(tx) => {
                    debug!("resource {} already resolving, attaching", id);
                    tx.subscribe()
                }
                None => {
                    let (tx, rx) = watch::channel(None);
                    inflight.insert(id.clone(), tx);
                    let inner = self.inner.clone();
                    let leader_id = id.clone();
                    // Detached so a dropped caller cannot strand its waiters.
                    tokio::spawn(async move {
                        let outcome = inner.probe_sequence(&leader_id).await;
                        let mut inflight = inner.inflight.lock();
                        if let Some(tx) = inflight.remove(&leader_id) {
                            tx.send_replace(Some(outcome));
                        }
                    });
                    rx
                }
            }
        };

        let delivered = match rx.wait_for(Option::is_some).await {
            Ok(outcome) => outcome.clone(),
            Err(_) => None,
        };
        delivered.unwrap_or_else(|| {
            warn!("resolution of {} ended without a result", id);
            Err(Unresolved {
                resource_id: id,
                attempts: 0,
            })
        })
    }

    /// Drop the cached copy of `resource_id` after it proved unusable downstream.
    /// Returns whether anything was cached.
    ///
    /// The file removed is the one the index served. For entries in the
    /// resource tree the next `resolve` resumes after the tier that produced
    /// them; an installed bundle file is simply deleted and fetched again by the
    /// next synchronization.
    pub fn invalidate(&self, resource_id: &str) -> bool {
        let Some(id) = canonical_id(resource_id) else {
            return false;
        };
        let resource_path = self.inner.store.resource_path(&id).ok();
        let (served, produced_by) = match self.inner.index.remove(&id) {
            Some(entry) => (entry.physical_path, entry.candidate_index),
            None => match resource_path.clone().filter(|p| self.inner.store.exists(p)) {
                Some(path) => (path, 0),
                None => return false,
            },
        };

        if let Err(e) = self.inner.store.remove(&served) {
            warn!("failed to remove invalidated {}: {}", served.display(), e);
        }
        if resource_path.as_deref() == Some(served.as_path()) {
            self.inner.resume_after.lock().insert(id.clone(), produced_by);
            info!("invalidated {} (produced by candidate {})", id, produced_by);
        } else {
            info!("invalidated {} at {}", id, served.display());
        }
        true
    }

    /// Resolve a batch ahead of time, publishing `done / total` progress.
    /// Returns the ids that could not be resolved, in input order.
    pub async fn prefetch<I, S>(&self, ids: I) -> Vec<String>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut seen = HashSet::new();
        let ids: Vec<String> = ids
            .into_iter()
            .map(|s| s.as_ref().to_string())
            .filter(|s| seen.insert(s.clone()))
            .collect();
        let total = ids.len();
        if total == 0 {
            return Vec::new();
        }

        self.inner
            .events
            .emit_status(format!("Preparing {} resource(s)...", total));
        self.inner.events.emit_progress(0.0);

        let mut set = JoinSet::new();
        for (pos, id) in ids.iter().enumerate() {
            let resolver = self.clone();
            let id = id.clone();
            set.spawn(async move { (pos, resolver.resolve(&id).await.is_ok()) });
        }

        let mut done = 0usize;
        let mut failed = Vec::new();
        while let Some(joined) = set.join_next().await {
            done += 1;
            match joined {
                Ok((_, true)) => {}
                Ok((pos, false)) => failed.push(pos),
                Err(e) => warn!("prefetch task failed: {}", e),
            }
            self.inner
                .events
                .emit_progress(done as f64 / total as f64 * 100.0);
        }

        failed.sort_unstable();
        let unresolved: Vec<String> = failed.into_iter().map(|pos| ids[pos].clone()).collect();
        if unresolved.is_empty() {
            self.inner.events.emit_status("All resources available");
        } else {
            self.inner.events.emit_status(format!(
                "{} of {} resource(s) unavailable",
                unresolved.len(),
                total
            ));
        }
        unresolved
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.inner.stats.snapshot()
    }

    pub fn index(&self) -> &CacheIndex {
        &self.inner.index
    }
}

impl Inner {
    fn candidates(&self, id: &str) -> Vec<Candidate> {
        let mut out = Vec::with_capacity(self.bundled_templates.len() + 2);
        if let Ok(path) = self.store.resource_path(id) {
            out.push(Candidate {
                tier: Tier::Cache,
                location: path.to_string_lossy().into_owned(),
            });
        }
        out.extend(self.bundled_templates.iter().map(|t| Candidate {
            tier: Tier::Bundled,
            location: t.replace(ID_PLACEHOLDER, id),
        }));
        if !self.remote_base_url.is_empty() {
            out.push(Candidate {
                tier: Tier::Remote,
                location: format!("{}/{}", self.remote_base_url, id),
            });
        }
        out
    }

    /// Short-circuit through an index entry whose file is still on disk.
    fn remembered(&self, id: &str) -> Option<ResolvedPath> {
        let entry = self.index.get(id)?;
        if !self.store.exists(&entry.physical_path) {
            debug!("index entry for {} points at a missing file, dropping", id);
            self.index.remove(id);
            return None;
        }
        self.resume_after.lock().remove(id);
        self.stats.record_probe(Tier::Cache);
        self.stats.record_resolved(Tier::Cache);
        Some(ResolvedPath {
            resource_id: id.to_string(),
            path: entry.physical_path,
            tier: Tier::Cache,
        })
    }

    async fn probe_sequence(&self, id: &str) -> Outcome {
        let candidates = self.candidates(id);
        let (start, budget) = match self.resume_after.lock().remove(id) {
            Some(after) => (after + 1, self.max_tier_attempts),
            None => (0, candidates.len()),
        };

        let mut attempts = 0;
        for (index, candidate) in candidates.iter().enumerate().skip(start).take(budget) {
            attempts += 1;
            self.stats.record_probe(candidate.tier);
            let bytes = match self.probe(candidate).await {
                Ok(bytes) => bytes,
                Err(e) => {
                    debug!(
                        "probe {} [{}] {} failed: {}",
                        id,
                        candidate.tier.as_str(),
                        candidate.location,
                        e
                    );
                    continue;
                }
            };
            match self.settle(id, index, candidate, bytes).await {
                Ok(resolved) => {
                    debug!(
                        "resolved {} via {} after {} probe(s)",
                        id,
                        candidate.tier.as_str(),
                        attempts
                    );
                    return Ok(resolved);
                }
                Err(e) => warn!("could not cache {} from {}: {}", id, candidate.location, e),
            }
        }

        self.stats.record_unresolved();
        info!("resource {} unresolved after {} probe(s)", id, attempts);
        Err(Unresolved {
            resource_id: id.to_string(),
            attempts,
        })
    }

    /// Read the bytes at one candidate. Empty bodies count as a miss.
    async fn probe(&self, candidate: &Candidate) -> Result<Bytes> {
        let bytes = match candidate.tier {
            Tier::Cache => {
                let store = self.store.clone();
                let path = PathBuf::from(&candidate.location);
                tokio::task::spawn_blocking(move || -> Result<Bytes> {
                    if !store.exists(&path) {
                        return Err(anyhow!("not cached"));
                    }
                    Ok(store.read(&path)?)
                })
                .await??
            }
            _ if is_network_location(&candidate.location) => {
                tokio::time::timeout(self.probe_timeout, self.source.fetch(&candidate.location))
                    .await
                    .map_err(|_| anyhow!("timed out after {:?}", self.probe_timeout))??
            }
            _ => self.source.fetch(&candidate.location).await?,
        };
        if bytes.is_empty() {
            return Err(anyhow!("empty body"));
        }
        Ok(bytes)
    }

    /// Make the winning bytes available in the cache and remember where they came from.
    async fn settle(
        &self,
        id: &str,
        index: usize,
        candidate: &Candidate,
        bytes: Bytes,
    ) -> Result<ResolvedPath> {
        let path = self.store.resource_path(id)?;
        if candidate.tier != Tier::Cache {
            let store = self.store.clone();
            let dest = path.clone();
            tokio::task::spawn_blocking(move || store.write_atomic(&bytes, &dest)).await??;
        }
        self.index.record(CacheEntry {
            resource_id: id.to_string(),
            physical_path: path.clone(),
            tier: candidate.tier,
            candidate_index: index,
            resolved_at: Utc::now(),
        });
        self.stats.record_resolved(candidate.tier);
        Ok(ResolvedPath {
            resource_id: id.to_string(),
            path,
            tier: candidate.tier,
        })
    }
}
