// Engine statistics — per-tier probe counts and downloaded bytes.

use std::sync::atomic::{AtomicU64, Ordering};

use super::index::Tier;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatsSnapshot {
    pub cache_probes: u64,
    pub bundled_probes: u64,
    pub remote_probes: u64,
    /// Resolutions answered by the cache tier.
    pub cache_hits: u64,
    /// Non-cache wins copied into the cache.
    pub cache_copies: u64,
    pub unresolved: u64,
    pub downloaded_bytes: u64,
    pub cache_hit_rate: f64,
}

impl StatsSnapshot {
    pub fn total_probes(&self) -> u64 {
        self.cache_probes + self.bundled_probes + self.remote_probes
    }
}

pub struct StatsCollector {
    cache_probes: AtomicU64,
    bundled_probes: AtomicU64,
    remote_probes: AtomicU64,
    cache_hits: AtomicU64,
    cache_copies: AtomicU64,
    unresolved: AtomicU64,
    downloaded_bytes: AtomicU64,
}

impl StatsCollector {
    pub fn new() -> Self {
        Self {
            cache_probes: AtomicU64::new(0),
            bundled_probes: AtomicU64::new(0),
            remote_probes: AtomicU64::new(0),
            cache_hits: AtomicU64::new(0),
            cache_copies: AtomicU64::new(0),
            unresolved: AtomicU64::new(0),
            downloaded_bytes: AtomicU64::new(0),
        }
    }

    pub fn record_probe(&self, tier: Tier) {
        let counter = match tier {
            Tier::Cache => &self.cache_probes,
            Tier::Bundled => &self.bundled_probes,
            Tier::Remote => &self.remote_probes,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Record where a resolution ended up.
    pub fn record_resolved(&self, tier: Tier) {
        if tier == Tier::Cache {
            self.cache_hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.cache_copies.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_unresolved(&self) {
        self.unresolved.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_downloaded(&self, bytes: u64) {
        self.downloaded_bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let cache_hits = self.cache_hits.load(Ordering::Relaxed);
        let cache_copies = self.cache_copies.load(Ordering::Relaxed);
        let unresolved = self.unresolved.load(Ordering::Relaxed);
        let resolutions = cache_hits + cache_copies + unresolved;
        let cache_hit_rate = if resolutions > 0 {
            cache_hits as f64 / resolutions as f64
        } else {
            0.0
        };

        StatsSnapshot {
            cache_probes: self.cache_probes.load(Ordering::Relaxed),
            bundled_probes: self.bundled_probes.load(Ordering::Relaxed),
            remote_probes: self.remote_probes.load(Ordering::Relaxed),
            cache_hits,
            cache_copies,
            unresolved,
            downloaded_bytes: self.downloaded_bytes.load(Ordering::Relaxed),
            cache_hit_rate,
        }
    }

    pub fn total_downloaded(&self) -> u64 {
        self.downloaded_bytes.load(Ordering::Relaxed)
    }
}

impl Default for StatsCollector {
    fn default() -> Self {
        Self::new()
    }
}
