// Engine — cache store, bundle synchronization and resource resolution.

pub mod archive;
pub mod cache;
pub mod downloader;
pub mod events;
pub mod index;
pub mod manifest;
pub mod resolver;
pub mod stats;
pub mod sync;
pub mod versions;
