// Remote manifest — which versions of which bundles exist upstream.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::versions::InstalledVersions;
use crate::error::ManifestError;
use crate::source::traits::AssetSource;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum BundleKind {
    Model,
    Tokenizer,
    Config,
    #[serde(alias = "image_archive", alias = "imagearchive")]
    ImageArchive,
}

/// One versioned unit of offline content, as declared by the manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetBundle {
    pub id: String,
    pub kind: BundleKind,
    pub url: String,
    pub version: String,
    /// Declared size; 0 means unknown.
    #[serde(default)]
    pub size_bytes: u64,
    /// Lowercase hex SHA-256 of the file, when published.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
    /// Name to install the file under; defaults to the last URL segment.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
}

impl AssetBundle {
    pub fn install_file_name(&self) -> String {
        if let Some(name) = self.file_name.as_deref().filter(|n| !n.trim().is_empty()) {
            return name.to_string();
        }
        let path = self
            .url
            .split(|c: char| c == '?' || c == '#')
            .next()
            .unwrap_or(&self.url);
        match path.rsplit('/').next() {
            Some(last) if !last.is_empty() => last.to_string(),
            _ => self.id.clone(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    pub bundles: Vec<AssetBundle>,
}

impl Manifest {
    pub fn from_json(raw: &[u8]) -> Result<Self, ManifestError> {
        Ok(serde_json::from_slice(raw)?)
    }
}

/// Bundles whose remote version differs from (or is missing in) the installed record.
pub fn needs_update(manifest: &Manifest, installed: &InstalledVersions) -> Vec<AssetBundle> {
    manifest
        .bundles
        .iter()
        .filter(|b| installed.version_of(&b.id) != Some(b.version.as_str()))
        .cloned()
        .collect()
}

pub struct ManifestClient {
    source: Arc<dyn AssetSource>,
    url: String,
    timeout: Duration,
}

impl ManifestClient {
    pub fn new(source: Arc<dyn AssetSource>, url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            source,
            url: url.into(),
            timeout,
        }
    }

    pub async fn fetch_manifest(&self) -> Result<Manifest, ManifestError> {
        if self.url.is_empty() {
            return Err(ManifestError::Unavailable("no manifest url configured".into()));
        }
        let body = match tokio::time::timeout(self.timeout, self.source.fetch(&self.url)).await {
            Ok(Ok(body)) => body,
            Ok(Err(e)) => {
                warn!("manifest fetch failed url={}: {}", self.url, e);
                return Err(ManifestError::Unavailable(e.to_string()));
            }
            Err(_) => {
                warn!("manifest fetch timed out url={}", self.url);
                return Err(ManifestError::Unavailable(format!(
                    "timed out after {} ms",
                    self.timeout.as_millis()
                )));
            }
        };
        let manifest = Manifest::from_json(&body)?;
        debug!("manifest fetched: {} bundle(s)", manifest.bundles.len());
        Ok(manifest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bundle(id: &str, version: &str) -> AssetBundle {
        AssetBundle {
            id: id.to_string(),
            kind: BundleKind::Model,
            url: format!("https://cdn.example.com/{}.bin", id),
            version: version.to_string(),
            size_bytes: 0,
            sha256: None,
            file_name: None,
        }
    }

    #[test]
    fn test_manifest_json_format() {
        let raw = br#"{"bundles":[
            {"id":"model","kind":"model","url":"https://h/model.onnx","version":"v2","sizeBytes":125},
            {"id":"imgs","kind":"imageArchive","url":"https://h/imgs.tar.gz","version":"3","sizeBytes":10}
        ]}"#;
        let manifest = Manifest::from_json(raw).unwrap();
        assert_eq!(manifest.bundles.len(), 2);
        assert_eq!(manifest.bundles[0].size_bytes, 125);
        assert_eq!(manifest.bundles[1].kind, BundleKind::ImageArchive);
        assert_eq!(manifest.bundles[0].install_file_name(), "model.onnx");
    }

    #[test]
    fn test_needs_update_is_plain_inequality() {
        let manifest = Manifest {
            bundles: vec![bundle("a", "v1"), bundle("b", "v2"), bundle("c", "v1")],
        };
        let mut installed = InstalledVersions::default();
        installed.set("a", "v1");
        // Older-looking remote versions still count as stale.
        installed.set("b", "v10");

        let stale: Vec<String> = needs_update(&manifest, &installed)
            .into_iter()
            .map(|b| b.id)
            .collect();
        assert_eq!(stale, vec!["b".to_string(), "c".to_string()]);
    }

    #[test]
    fn test_install_file_name_falls_back_to_id() {
        let mut b = bundle("tok", "1");
        b.url = "https://h/files/tokenizer.json?download=1".to_string();
        assert_eq!(b.install_file_name(), "tokenizer.json");
        b.url = "https://h/files/".to_string();
        assert_eq!(b.install_file_name(), "tok");
        b.file_name = Some("custom.bin".to_string());
        assert_eq!(b.install_file_name(), "custom.bin");
    }
}
