// Installed-version record — bundle id -> installed version, persisted as JSON.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use super::cache::CacheStore;
use super::manifest::{AssetBundle, BundleKind};
use crate::error::CacheError;

/// What was installed for a bundle, beyond its version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstalledBundle {
    pub kind: BundleKind,
    pub file_name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstalledVersions {
    versions: BTreeMap<String, String>,
    #[serde(default)]
    details: BTreeMap<String, InstalledBundle>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    updated_at: Option<DateTime<Utc>>,
}

impl InstalledVersions {
    /// Load the record from the store. A missing or unreadable record is
    /// treated as "nothing installed".
    pub fn load(store: &CacheStore) -> Self {
        let path = store.versions_path();
        if !store.exists(&path) {
            return Self::default();
        }
        let raw = match store.read(&path) {
            Ok(raw) => raw,
            Err(e) => {
                warn!("version record unreadable, starting empty: {}", e);
                return Self::default();
            }
        };
        match serde_json::from_slice(&raw) {
            Ok(record) => record,
            Err(e) => {
                warn!("version record corrupt at {}, starting empty: {}", path.display(), e);
                Self::default()
            }
        }
    }

    /// Persist atomically.
    pub fn save(&self, store: &CacheStore) -> Result<(), CacheError> {
        let path = store.versions_path();
        let raw = serde_json::to_vec_pretty(self).map_err(|e| {
            CacheError::io(&path, std::io::Error::new(std::io::ErrorKind::InvalidData, e))
        })?;
        store.write_atomic(&raw, &path)
    }

    pub fn version_of(&self, bundle_id: &str) -> Option<&str> {
        self.versions.get(bundle_id).map(String::as_str)
    }

    pub fn set(&mut self, bundle_id: impl Into<String>, version: impl Into<String>) {
        self.versions.insert(bundle_id.into(), version.into());
        self.updated_at = Some(Utc::now());
    }

    /// Record a completed install of `bundle`.
    pub fn mark_installed(&mut self, bundle: &AssetBundle) {
        self.details.insert(
            bundle.id.clone(),
            InstalledBundle {
                kind: bundle.kind,
                file_name: bundle.install_file_name(),
            },
        );
        self.set(bundle.id.clone(), bundle.version.clone());
    }

    pub fn details_of(&self, bundle_id: &str) -> Option<&InstalledBundle> {
        self.details.get(bundle_id)
    }

    /// First installed bundle of the given kind.
    pub fn find_kind(&self, kind: BundleKind) -> Option<(&str, &InstalledBundle)> {
        self.details
            .iter()
            .find(|(_, d)| d.kind == kind)
            .map(|(id, d)| (id.as_str(), d))
    }

    pub fn updated_at(&self) -> Option<DateTime<Utc>> {
        self.updated_at
    }

    pub fn len(&self) -> usize {
        self.versions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.versions.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.versions.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}
