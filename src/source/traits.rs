use anyhow::Result;
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};

pub struct SourceInfo {
    /// Declared body length, when the source knows it up front.
    pub content_length: Option<u64>,
    pub content_type: String,
}

/// A chunked read over one location.
#[async_trait]
pub trait SourceReader: Send {
    fn info(&self) -> &SourceInfo;

    /// Next piece of the body, or `None` at end of stream.
    async fn next_chunk(&mut self) -> Result<Option<Bytes>>;
}

/// Something that can produce bytes for a location string (URL, URI or path).
#[async_trait]
pub trait AssetSource: Send + Sync {
    /// Whether this source understands the location's scheme.
    fn handles(&self, location: &str) -> bool;

    async fn open(&self, location: &str) -> Result<Box<dyn SourceReader>>;

    /// Read the whole body into memory.
    async fn fetch(&self, location: &str) -> Result<Bytes> {
        let mut reader = self.open(location).await?;
        let mut buf = match reader.info().content_length {
            Some(len) => BytesMut::with_capacity(len.min(16 * 1024 * 1024) as usize),
            None => BytesMut::new(),
        };
        while let Some(chunk) = reader.next_chunk().await? {
            buf.extend_from_slice(&chunk);
        }
        Ok(buf.freeze())
    }
}

/// Whether a location goes over the network.
pub fn is_network_location(location: &str) -> bool {
    location.starts_with("http://") || location.starts_with("https://")
}
