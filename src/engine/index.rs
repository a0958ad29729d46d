// Cache entry index — at most one resolved location per resource id.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;

/// Category of candidate location a resource was found in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tier {
    Cache,
    Bundled,
    Remote,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Cache => "cache",
            Tier::Bundled => "bundled",
            Tier::Remote => "remote",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub resource_id: String,
    pub physical_path: PathBuf,
    /// Tier the bytes originally came from.
    pub tier: Tier,
    /// Position of the winning candidate in the resolution order.
    pub candidate_index: usize,
    pub resolved_at: DateTime<Utc>,
}

/// Shared between the resolver and the sync manager.
#[derive(Clone, Default)]
pub struct CacheIndex {
    entries: Arc<RwLock<HashMap<String, CacheEntry>>>,
}

impl CacheIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, resource_id: &str) -> Option<CacheEntry> {
        self.entries.read().get(resource_id).cloned()
    }

    /// Insert or replace the entry for `entry.resource_id`.
    pub fn record(&self, entry: CacheEntry) {
        self.entries.write().insert(entry.resource_id.clone(), entry);
    }

    pub fn remove(&self, resource_id: &str) -> Option<CacheEntry> {
        self.entries.write().remove(resource_id)
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(id: &str, path: &str, tier: Tier) -> CacheEntry {
        CacheEntry {
            resource_id: id.to_string(),
            physical_path: PathBuf::from(path),
            tier,
            candidate_index: 0,
            resolved_at: Utc::now(),
        }
    }

    #[test]
    fn test_record_replaces_existing_entry() {
        let index = CacheIndex::new();
        index.record(entry("x.png", "/a/x.png", Tier::Bundled));
        index.record(entry("x.png", "/b/x.png", Tier::Remote));

        assert_eq!(index.len(), 1);
        let current = index.get("x.png").unwrap();
        assert_eq!(current.physical_path, PathBuf::from("/b/x.png"));
        assert_eq!(current.tier, Tier::Remote);
    }
}
