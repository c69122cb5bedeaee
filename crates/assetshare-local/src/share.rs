use crate::cache::{queue_store_path, LocalCache, TEMP_SHADOW_DIR};
use crate::config::ShareConfig;
use crate::download::DownloadCoordinator;
use crate::error::Result;
use crate::events::{EventBus, ShareEvent};
use crate::overlay::OverlayTree;
use crate::path::{is_within, parent_of};
use crate::queue::RequestQueue;
use crate::temp::FsTree;
use crate::tree::TreeEntry;
use assetshare_api::{RemoteEntry, RemoteTreeClient};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, watch, Notify};
use tokio::task::JoinHandle;
use tracing::info;

/// Everything one mounted share owns: remote client, local mirror, queue,
/// coordinator tables and in-memory caches. Trees and files hold an `Arc`
/// to it.
pub(crate) struct ShareState {
    pub(crate) config: ShareConfig,
    pub(crate) client: RemoteTreeClient,
    pub(crate) cache: LocalCache,
    pub(crate) queue: RequestQueue,
    pub(crate) coordinator: DownloadCoordinator,
    pub(crate) events: EventBus,
    pub(crate) temp: FsTree,
    pub(crate) notify: Notify,
    /// Serializes drain passes: the background loop and inline flushes never
    /// contend for the same queue entry.
    pub(crate) drain_lock: tokio::sync::Mutex<()>,
    list_cache: Mutex<HashMap<String, (Instant, Vec<TreeEntry>)>>,
    meta_cache: Mutex<HashMap<String, (Instant, Option<RemoteEntry>)>>,
}

impl ShareState {
    /// Remote metadata for a path, cached for `cache_ttl`.
    pub(crate) async fn remote_entry(&self, path: &str) -> Result<Option<RemoteEntry>> {
        let ttl = Duration::from_millis(self.config.cache_ttl);
        if !ttl.is_zero() {
            let cache = self.meta_cache.lock().unwrap();
            if let Some((at, entry)) = cache.get(path) {
                if at.elapsed() < ttl {
                    return Ok(entry.clone());
                }
            }
        }

        let entry = self
            .client
            .get_listing(path, 1)
            .await?
            .map(|listing| listing.to_entry());

        if !ttl.is_zero() {
            self.meta_cache
                .lock()
                .unwrap()
                .insert(path.to_string(), (Instant::now(), entry.clone()));
        }
        Ok(entry)
    }

    pub(crate) fn cached_listing(&self, parent: &str) -> Option<Vec<TreeEntry>> {
        let ttl = Duration::from_millis(self.config.content_cache_ttl);
        if ttl.is_zero() {
            return None;
        }
        let cache = self.list_cache.lock().unwrap();
        cache
            .get(parent)
            .filter(|(at, _)| at.elapsed() < ttl)
            .map(|(_, entries)| entries.clone())
    }

    pub(crate) fn store_listing(&self, parent: &str, entries: &[TreeEntry]) {
        if Duration::from_millis(self.config.content_cache_ttl).is_zero() {
            return;
        }
        self.list_cache
            .lock()
            .unwrap()
            .insert(parent.to_string(), (Instant::now(), entries.to_vec()));
    }

    /// Drop cached views touching a single path.
    pub(crate) fn invalidate(&self, path: &str) {
        self.list_cache.lock().unwrap().remove(parent_of(path));
        self.meta_cache.lock().unwrap().remove(path);
    }

    /// Drop cached views touching a whole subtree.
    pub(crate) fn invalidate_subtree(&self, prefix: &str) {
        self.list_cache
            .lock()
            .unwrap()
            .retain(|parent, _| !is_within(prefix, parent) && parent != parent_of(prefix));
        self.meta_cache
            .lock()
            .unwrap()
            .retain(|path, _| !is_within(prefix, path));
    }

    pub(crate) fn clear_caches(&self) {
        self.list_cache.lock().unwrap().clear();
        self.meta_cache.lock().unwrap().clear();
    }
}

/// A connected share: owns the background processor and hands out overlay
/// trees. Queued requests survive a disconnect; they are persisted under
/// the local cache root.
pub struct Share {
    state: Arc<ShareState>,
    shutdown: watch::Sender<bool>,
    processor: Mutex<Option<JoinHandle<()>>>,
}

impl Share {
    /// Open the local mirror, load the persisted queue and start the
    /// background processor.
    pub async fn connect(config: ShareConfig) -> Result<Share> {
        let cache = LocalCache::new(&config.local_path)?;
        let swept = cache.sweep_orphans()?;
        if swept > 0 {
            info!(swept, "removed orphaned cache sidecars");
        }
        let queue = RequestQueue::new(queue_store_path(&config.local_path))?;
        let temp = FsTree::new(config.local_path.join(TEMP_SHADOW_DIR))?;
        let client = RemoteTreeClient::new(config.share_url());

        let state = Arc::new(ShareState {
            config,
            client,
            cache,
            queue,
            coordinator: DownloadCoordinator::new(),
            events: EventBus::new(),
            temp,
            notify: Notify::new(),
            drain_lock: tokio::sync::Mutex::new(()),
            list_cache: Mutex::new(HashMap::new()),
            meta_cache: Mutex::new(HashMap::new()),
        });

        let (shutdown, shutdown_rx) = watch::channel(false);
        let processor = tokio::spawn(crate::processor::run(state.clone(), shutdown_rx));
        info!(url = %state.config.share_url(), pending = state.queue.len(), "share connected");

        Ok(Share {
            state,
            shutdown,
            processor: Mutex::new(Some(processor)),
        })
    }

    pub fn tree(&self) -> OverlayTree {
        OverlayTree::new(self.state.clone())
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ShareEvent> {
        self.state.events.subscribe()
    }

    /// Number of queued remote mutations.
    pub fn pending_requests(&self) -> usize {
        self.state.queue.len()
    }

    /// The queued mutation for a path, if any.
    pub fn pending_for(&self, path: &str) -> Option<crate::queue::QueuedRequest> {
        self.state.queue.pending_for(path)
    }

    /// Process everything queued right now, ignoring the coalescing window.
    /// The background processor applies the window on its own passes; this
    /// is for callers that need the remote caught up immediately.
    pub async fn flush(&self) -> Result<usize> {
        crate::processor::flush(&self.state).await
    }

    /// Stop the processor and return. Queued requests stay persisted and
    /// resume on the next connect.
    pub async fn disconnect(&self) -> Result<()> {
        let _ = self.shutdown.send(true);
        self.state.notify.notify_waiters();
        let handle = self.processor.lock().unwrap().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
        self.state.clear_caches();
        info!(pending = self.state.queue.len(), "share disconnected");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn config_for(dir: &TempDir) -> ShareConfig {
        ShareConfig {
            local_path: dir.path().to_path_buf(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_connect_and_disconnect() {
        let dir = TempDir::new().unwrap();
        let share = Share::connect(config_for(&dir)).await.unwrap();

        assert_eq!(share.pending_requests(), 0);
        share.disconnect().await.unwrap();
        // disconnect is idempotent
        share.disconnect().await.unwrap();
    }

    #[tokio::test]
    async fn test_queue_survives_reconnect() {
        let dir = TempDir::new().unwrap();

        let share = Share::connect(config_for(&dir)).await.unwrap();
        share
            .state
            .queue
            .enqueue(
                crate::queue::Method::Put,
                "/pending.txt",
                None,
                assetshare_api::EntryKind::File,
            )
            .unwrap();
        share.disconnect().await.unwrap();
        drop(share);

        let reconnected = Share::connect(config_for(&dir)).await.unwrap();
        assert_eq!(reconnected.pending_requests(), 1);
        reconnected.disconnect().await.unwrap();
    }
}
