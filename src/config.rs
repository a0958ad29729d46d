use serde::Deserialize;

/// Bundles larger than this require user consent before download (50 MB).
pub const CONSENT_THRESHOLD_BYTES: u64 = 50 * 1024 * 1024;

/// Attempts per bundle download before it is marked failed.
pub const MAX_DOWNLOAD_ATTEMPTS: u32 = 3;

/// Upper bound on tier probes for a resolution that resumes after `invalidate`.
pub const MAX_TIER_ATTEMPTS: usize = 3;

/// Timeout for a single network tier probe, in milliseconds.
pub const REMOTE_PROBE_TIMEOUT_MS: u64 = 3_000;

/// Base delay between download attempts; multiplied by the attempt number.
pub const RETRY_BACKOFF_MS: u64 = 500;

/// Read size for local file sources (64 KB).
pub const READ_CHUNK_BYTES: usize = 64 * 1024;

/// Public image mirror used as the last resolution tier.
pub const DEFAULT_REMOTE_BASE_URL: &str = "https://enem.dev/assets/img";

/// Placeholder replaced by the canonical resource id in location templates.
pub const ID_PLACEHOLDER: &str = "{id}";

/// Where the app shell ships its bundled images, per platform.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Android,
    Ios {
        bundle_dir: String,
        document_dir: String,
    },
    Host {
        primary_dir: String,
        secondary_dir: String,
    },
}

impl Platform {
    /// The two bundled-tier location templates, in probe order.
    pub fn bundled_templates(&self) -> Vec<String> {
        match self {
            Platform::Android => vec![
                "file:///android_asset/assets/img/{id}".to_string(),
                "asset:/assets/img/{id}".to_string(),
            ],
            Platform::Ios {
                bundle_dir,
                document_dir,
            } => vec![
                format!("{}/assets/img/{}", bundle_dir.trim_end_matches('/'), ID_PLACEHOLDER),
                format!("{}/assets/img/{}", document_dir.trim_end_matches('/'), ID_PLACEHOLDER),
            ],
            Platform::Host {
                primary_dir,
                secondary_dir,
            } => vec![
                format!("{}/{}", primary_dir.trim_end_matches('/'), ID_PLACEHOLDER),
                format!("{}/{}", secondary_dir.trim_end_matches('/'), ID_PLACEHOLDER),
            ],
        }
    }
}

/// Top-level configuration for the asset engine.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Root of the on-disk cache tree.
    pub cache_dir: String,
    /// URL of the remote bundle manifest.
    pub manifest_url: String,
    /// Base URL of the remote fallback tier; the resource id is appended.
    pub remote_base_url: String,
    /// Bundled-tier location templates containing `{id}`, in probe order.
    pub bundled_templates: Vec<String>,
    /// Directory backing the `asset:/` scheme (where the shell exposes packaged assets).
    pub asset_root: String,
    /// Size above which a bundle needs explicit consent.
    pub consent_threshold_bytes: u64,
    /// Attempts per bundle before it is marked failed.
    pub max_download_attempts: u32,
    /// Probe bound for a resolution resumed after invalidation.
    pub max_tier_attempts: usize,
    /// Timeout for network tier probes and manifest requests.
    pub remote_probe_timeout_ms: u64,
    /// Base delay between download attempts.
    pub retry_backoff_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            cache_dir: String::new(),
            manifest_url: String::new(),
            remote_base_url: DEFAULT_REMOTE_BASE_URL.to_string(),
            bundled_templates: Platform::Android.bundled_templates(),
            asset_root: String::new(),
            consent_threshold_bytes: CONSENT_THRESHOLD_BYTES,
            max_download_attempts: MAX_DOWNLOAD_ATTEMPTS,
            max_tier_attempts: MAX_TIER_ATTEMPTS,
            remote_probe_timeout_ms: REMOTE_PROBE_TIMEOUT_MS,
            retry_backoff_ms: RETRY_BACKOFF_MS,
        }
    }
}

impl EngineConfig {
    /// Parse a config document; missing fields take their defaults.
    pub fn from_json(raw: &str) -> serde_json::Result<Self> {
        serde_json::from_str(raw)
    }

    /// Replace the bundled templates with the preset for `platform`.
    pub fn with_platform(mut self, platform: &Platform) -> Self {
        self.bundled_templates = platform.bundled_templates();
        self
    }
}
