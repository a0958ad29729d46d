// Byte sources — HTTP and local files behind one trait.

pub mod http_source;
pub mod local_source;
pub mod router;
pub mod traits;
