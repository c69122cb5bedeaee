use crate::error::Result;
use assetshare_api::{EntryKind, RemoteEntry};
use async_trait::async_trait;
use std::time::SystemTime;

/// Metadata for one file or folder as seen through a tree.
#[derive(Debug, Clone, PartialEq)]
pub struct TreeEntry {
    pub path: String,
    pub kind: EntryKind,
    pub size: u64,
    pub created: i64,
    pub last_modified: i64,
    pub read_only: bool,
}

impl TreeEntry {
    pub fn name(&self) -> &str {
        crate::path::name_of(&self.path)
    }

    pub fn is_directory(&self) -> bool {
        self.kind == EntryKind::Directory
    }

    pub fn from_remote(path: impl Into<String>, remote: &RemoteEntry) -> Self {
        Self {
            path: path.into(),
            kind: remote.kind,
            size: remote.size,
            created: remote.created,
            last_modified: remote.last_modified,
            read_only: remote.read_only,
        }
    }

    pub fn from_metadata(path: impl Into<String>, meta: &std::fs::Metadata) -> Self {
        Self {
            path: path.into(),
            kind: if meta.is_dir() {
                EntryKind::Directory
            } else {
                EntryKind::File
            },
            size: if meta.is_dir() { 0 } else { meta.len() },
            created: meta
                .created()
                .or_else(|_| meta.modified())
                .map(millis_of)
                .unwrap_or(0),
            last_modified: meta.modified().map(millis_of).unwrap_or(0),
            read_only: meta.permissions().readonly(),
        }
    }
}

pub(crate) fn millis_of(t: SystemTime) -> i64 {
    chrono::DateTime::<chrono::Utc>::from(t).timestamp_millis()
}

/// Capability interface shared by every tree variant: the remote-backed
/// overlay and plain local trees alike. Object-safe so callers can move
/// content between trees without knowing the backing.
#[async_trait]
pub trait AssetTree: Send + Sync {
    async fn exists(&self, path: &str) -> Result<bool>;

    /// Metadata for a path, `None` when absent.
    async fn entry(&self, path: &str) -> Result<Option<TreeEntry>>;

    async fn list(&self, parent: &str) -> Result<Vec<TreeEntry>>;

    async fn create_file(&self, path: &str) -> Result<()>;

    async fn create_directory(&self, path: &str) -> Result<()>;

    async fn read_file(&self, path: &str) -> Result<Vec<u8>>;

    async fn write_file(&self, path: &str, data: &[u8]) -> Result<()>;

    async fn delete(&self, path: &str) -> Result<()>;

    async fn rename(&self, from: &str, to: &str) -> Result<()>;

    async fn disconnect(&self) -> Result<()>;
}
