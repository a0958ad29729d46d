#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;

use asset_sync_engine::source::traits::{AssetSource, SourceInfo, SourceReader};

/// In-memory source that counts every open, keyed by location.
#[derive(Default)]
pub struct MockSource {
    files: Mutex<HashMap<String, Bytes>>,
    /// Locations that fail this many more times before serving.
    flaky: Mutex<HashMap<String, u32>>,
    delays: Mutex<HashMap<String, Duration>>,
    default_delay: Mutex<Duration>,
    /// Truncate the body after this many bytes (simulates a short read).
    truncate: Mutex<HashMap<String, usize>>,
    opens: Mutex<HashMap<String, usize>>,
    chunk_size: Mutex<Option<usize>>,
}

impl MockSource {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn put(&self, location: &str, data: impl Into<Bytes>) {
        self.files.lock().insert(location.to_string(), data.into());
    }

    pub fn fail_times(&self, location: &str, times: u32) {
        self.flaky.lock().insert(location.to_string(), times);
    }

    pub fn delay(&self, location: &str, delay: Duration) {
        self.delays.lock().insert(location.to_string(), delay);
    }

    pub fn delay_all(&self, delay: Duration) {
        *self.default_delay.lock() = delay;
    }

    pub fn truncate(&self, location: &str, len: usize) {
        self.truncate.lock().insert(location.to_string(), len);
    }

    pub fn chunk_size(&self, size: usize) {
        *self.chunk_size.lock() = Some(size);
    }

    pub fn opens_of(&self, location: &str) -> usize {
        self.opens.lock().get(location).copied().unwrap_or(0)
    }

    pub fn total_opens(&self) -> usize {
        self.opens.lock().values().sum()
    }
}

struct MemReader {
    info: SourceInfo,
    chunks: Vec<Bytes>,
}

#[async_trait]
impl SourceReader for MemReader {
    fn info(&self) -> &SourceInfo {
        &self.info
    }

    async fn next_chunk(&mut self) -> Result<Option<Bytes>> {
        if self.chunks.is_empty() {
            return Ok(None);
        }
        tokio::task::yield_now().await;
        Ok(Some(self.chunks.remove(0)))
    }
}

#[async_trait]
impl AssetSource for MockSource {
    fn handles(&self, _location: &str) -> bool {
        true
    }

    async fn open(&self, location: &str) -> Result<Box<dyn SourceReader>> {
        *self.opens.lock().entry(location.to_string()).or_insert(0) += 1;

        let delay = self
            .delays
            .lock()
            .get(location)
            .copied()
            .unwrap_or(*self.default_delay.lock());
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        {
            let mut flaky = self.flaky.lock();
            if let Some(left) = flaky.get_mut(location) {
                if *left > 0 {
                    *left -= 1;
                    return Err(anyhow!("transient failure for {}", location));
                }
            }
        }

        let data = self
            .files
            .lock()
            .get(location)
            .cloned()
            .ok_or_else(|| anyhow!("not found: {}", location))?;
        let declared = data.len() as u64;
        let data = match self.truncate.lock().get(location) {
            Some(&len) => data.slice(..len.min(data.len())),
            None => data,
        };

        let size = self.chunk_size.lock().unwrap_or(usize::MAX).max(1);
        let chunks = data
            .chunks(size)
            .map(Bytes::copy_from_slice)
            .collect::<Vec<_>>();
        Ok(Box::new(MemReader {
            info: SourceInfo {
                content_length: Some(declared),
                content_type: "application/octet-stream".to_string(),
            },
            chunks,
        }))
    }
}
