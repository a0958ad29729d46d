pub mod engine_api;
pub mod logging;

pub use engine_api::AssetEngine;
pub use logging::init_tracing;
