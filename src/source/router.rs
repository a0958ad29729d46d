use std::sync::Arc;

use anyhow::{anyhow, Result};
use async_trait::async_trait;

use super::http_source::HttpSource;
use super::local_source::LocalSource;
use super::traits::{AssetSource, SourceReader};

/// Dispatches a location to the first registered source that handles its scheme.
#[derive(Clone, Default)]
pub struct SourceRouter {
    sources: Vec<Arc<dyn AssetSource>>,
}

impl SourceRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// HTTP plus local files, with `asset:/` served from `asset_root`.
    pub fn standard(asset_root: &str) -> Self {
        let local = if asset_root.is_empty() {
            LocalSource::new()
        } else {
            LocalSource::with_asset_root(asset_root)
        };
        Self::new()
            .with(Arc::new(HttpSource::default()))
            .with(Arc::new(local))
    }

    pub fn with(mut self, source: Arc<dyn AssetSource>) -> Self {
        self.sources.push(source);
        self
    }

    fn pick(&self, location: &str) -> Option<&Arc<dyn AssetSource>> {
        self.sources.iter().find(|s| s.handles(location))
    }
}

#[async_trait]
impl AssetSource for SourceRouter {
    fn handles(&self, location: &str) -> bool {
        self.pick(location).is_some()
    }

    async fn open(&self, location: &str) -> Result<Box<dyn SourceReader>> {
        match self.pick(location) {
            Some(source) => source.open(location).await,
            None => Err(anyhow!("no source handles {}", location)),
        }
    }
}
