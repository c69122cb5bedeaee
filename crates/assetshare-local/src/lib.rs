pub mod cache;
pub mod config;
pub mod download;
pub mod error;
pub mod events;
pub mod overlay;
pub mod path;
pub mod queue;
pub mod share;
pub mod temp;
pub mod tree;

mod processor;

pub use cache::{CacheInfo, FileSnapshot, LocalCache, LocalEntry, RefreshOutcome};
pub use config::ShareConfig;
pub use download::{DownloadCoordinator, DownloadOutcome, DownloadTicket};
pub use error::{Error, Result};
pub use events::{EventBus, ShareEvent};
pub use overlay::{OverlayFile, OverlayTree};
pub use queue::{Method, QueuedRequest, RequestQueue};
pub use share::Share;
pub use temp::{FsTree, TempFileClassifier};
pub use tree::{AssetTree, TreeEntry};
