use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;
use reqwest::{Client, RequestBuilder, Response};
use tracing::{debug, warn};

use super::traits::{is_network_location, AssetSource, SourceInfo, SourceReader};

const CONNECT_TIMEOUT_SECS: u64 = 10;

pub struct HttpSource {
    client: Client,
    headers: Arc<RwLock<HashMap<String, String>>>,
}

impl HttpSource {
    pub fn new(headers: HashMap<String, String>) -> Self {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .build()
            .unwrap_or_else(|_| Client::new());
        Self {
            client,
            headers: Arc::new(RwLock::new(headers)),
        }
    }

    /// Replace the extra request headers (e.g. after a token refresh).
    pub fn update_headers(&self, new_headers: HashMap<String, String>) {
        *self.headers.write() = new_headers;
    }

    /// Build a GET request carrying the current custom headers.
    fn build_request(&self, url: &str) -> RequestBuilder {
        let headers = self.headers.read().clone();
        let mut req = self.client.get(url);
        for (k, v) in &headers {
            req = req.header(k.as_str(), v.as_str());
        }
        req
    }
}

impl Default for HttpSource {
    fn default() -> Self {
        Self::new(HashMap::new())
    }
}

struct HttpReader {
    info: SourceInfo,
    resp: Response,
}

#[async_trait]
impl SourceReader for HttpReader {
    fn info(&self) -> &SourceInfo {
        &self.info
    }

    async fn next_chunk(&mut self) -> Result<Option<Bytes>> {
        Ok(self.resp.chunk().await?)
    }
}

#[async_trait]
impl AssetSource for HttpSource {
    fn handles(&self, location: &str) -> bool {
        is_network_location(location)
    }

    async fn open(&self, location: &str) -> Result<Box<dyn SourceReader>> {
        let resp = self.build_request(location).send().await?;

        let status = resp.status();
        debug!("http open status={} url={}", status.as_u16(), location);
        if status.as_u16() == 401 || status.as_u16() == 403 {
            warn!("http open auth rejected status={} url={}", status.as_u16(), location);
            return Err(anyhow!("auth_rejected: HTTP {}", status.as_u16()));
        }
        if !status.is_success() {
            return Err(anyhow!("fetch failed: HTTP {} for {}", status.as_u16(), location));
        }

        let content_length = resp
            .headers()
            .get("content-length")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok());

        let content_type = resp
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("application/octet-stream")
            .to_string();

        Ok(Box::new(HttpReader {
            info: SourceInfo {
                content_length,
                content_type,
            },
            resp,
        }))
    }
}
