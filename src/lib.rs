//! Local asset synchronization and resolution.
//!
//! [`api::AssetEngine`] is the entry point: it keeps versioned bundles (model,
//! tokenizer, config, image archives) installed from a remote manifest, and
//! resolves logical resource ids to files in an on-disk cache, falling back
//! through bundled and remote locations.

pub mod api;
pub mod config;
pub mod engine;
pub mod error;
pub mod source;

pub use api::AssetEngine;
pub use config::{EngineConfig, Platform};
pub use engine::events::{EngineEvent, Subscription};
pub use engine::resolver::ResolvedPath;
pub use engine::sync::{ConsentGate, ModelFiles, SyncOutcome, SyncReport};
pub use error::{SyncError, Unresolved};
