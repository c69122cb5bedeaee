use crate::queue::Method;
use tokio::sync::broadcast;

/// Notifications emitted on a share while the background processor and the
/// overlay do their work. Conflicts are surfaced here, never as errors.
#[derive(Debug, Clone, PartialEq)]
pub enum ShareEvent {
    SyncConflict {
        path: String,
    },
    SyncError {
        path: String,
        method: Method,
        status: u16,
    },
    SyncDone {
        path: String,
        method: Method,
    },
    FolderList {
        parent: String,
        files: Vec<String>,
    },
    DownloadStart {
        path: String,
    },
    DownloadEnd {
        path: String,
    },
}

/// Fan-out of share events to any number of subscribers. Emitting with no
/// subscribers is fine.
pub struct EventBus {
    tx: broadcast::Sender<ShareEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(256);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ShareEvent> {
        self.tx.subscribe()
    }

    pub fn emit(&self, event: ShareEvent) {
        let _ = self.tx.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
