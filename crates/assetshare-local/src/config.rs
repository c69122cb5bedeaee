use assetshare_api::ShareUrl;
use std::path::PathBuf;

/// Options for one mounted share. Immutable once the share is connected;
/// loading from files or the environment is the embedder's concern.
#[derive(Debug, Clone)]
pub struct ShareConfig {
    /// Remote host.
    pub host: String,
    /// Remote port.
    pub port: u16,
    /// Remote root path, e.g. `/api/assets`.
    pub path: String,
    /// Root directory of the local cache mirror.
    pub local_path: PathBuf,
    /// How long an in-memory folder listing stays fresh, in ms.
    pub content_cache_ttl: u64,
    /// Coalescing window: a queued request younger than this is not drained.
    pub modified_threshold: u64,
    /// Per-request retry budget.
    pub max_retries: u32,
    /// How long cached remote metadata stays fresh, in ms.
    pub cache_ttl: u64,
    /// Processor wakeup interval, in ms.
    pub tick_interval: u64,
}

impl ShareConfig {
    pub fn share_url(&self) -> ShareUrl {
        ShareUrl::new(self.host.clone(), self.port, self.path.clone())
    }
}

impl Default for ShareConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 4502,
            path: "/api/assets".to_string(),
            local_path: PathBuf::from("."),
            content_cache_ttl: 30_000,
            modified_threshold: 5_000,
            max_retries: 3,
            cache_ttl: 30_000,
            tick_interval: 5_000,
        }
    }
}
