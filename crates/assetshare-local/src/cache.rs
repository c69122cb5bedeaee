use crate::error::{Error, Result};
use crate::tree::millis_of;
use assetshare_api::RemoteEntry;
use chrono::Utc;
use path_slash::PathBufExt;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::fs;
use tracing::{debug, warn};
use walkdir::WalkDir;

/// Directory under the cache root holding the CacheInfo sidecars and the
/// queue document. Mirrors the share namespace.
pub const CACHE_INFO_DIR: &str = ".aem";
/// Directory under the cache root backing the temp shadow tree.
pub const TEMP_SHADOW_DIR: &str = ".tmpfiles";
const QUEUE_DOC: &str = "request-queue.json";

pub fn queue_store_path(root: &Path) -> PathBuf {
    root.join(CACHE_INFO_DIR).join(QUEUE_DOC)
}

/// Local file timestamps captured at sync time, epoch ms.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FileSnapshot {
    pub last_modified: i64,
    pub last_changed: i64,
    pub created: i64,
    pub last_accessed: i64,
}

impl FileSnapshot {
    fn capture(meta: &std::fs::Metadata) -> Self {
        let modified = meta.modified().map(millis_of).unwrap_or(0);
        Self {
            last_modified: modified,
            last_changed: modified,
            created: meta
                .created()
                .map(millis_of)
                .unwrap_or(modified),
            last_accessed: meta.accessed().map(millis_of).unwrap_or(modified),
        }
    }
}

/// Sidecar record for one cached file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CacheInfo {
    /// True iff the file was created locally and has never successfully
    /// uploaded.
    pub created_locally: bool,
    /// Wall-clock ms of the last successful download or upload.
    pub synced_at: i64,
    /// Remote lastModified observed at the last successful download, 0 if
    /// never.
    pub downloaded_remote_last_modified: i64,
    pub local_snapshot: FileSnapshot,
}

impl CacheInfo {
    /// Cached but with no recorded remote modification time: the fetch never
    /// completed or the sidecar was lost.
    pub fn is_dangling(&self) -> bool {
        !self.created_locally && self.downloaded_remote_last_modified == 0
    }
}

/// A cached file on disk together with its sidecar and current metadata.
#[derive(Debug, Clone)]
pub struct LocalEntry {
    pub path: String,
    pub file_path: PathBuf,
    pub info: CacheInfo,
    pub size: u64,
    pub last_modified: i64,
    pub is_directory: bool,
}

impl LocalEntry {
    pub fn is_modified(&self) -> bool {
        self.last_modified > self.info.local_snapshot.last_modified
    }
}

/// What to do when asked to re-cache a path against fresh remote metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// Local copy is current; serve it.
    UpToDate,
    /// No usable local copy, or the local copy is clean and stale; download.
    Replace,
    /// Local edits win because a queued mutation covers them.
    KeepQueued,
    /// Local edits and remote edits diverged; keep local and surface it.
    Conflict,
}

/// The local filesystem mirror plus the sidecar store. One per share.
pub struct LocalCache {
    root: PathBuf,
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl LocalCache {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(root.join(CACHE_INFO_DIR))?;
        Ok(Self {
            root,
            locks: Mutex::new(HashMap::new()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Absolute location of the cached content for a share path.
    pub fn file_path(&self, path: &str) -> PathBuf {
        self.root
            .join(PathBuf::from_slash(path.trim_start_matches('/')))
    }

    fn info_path(&self, path: &str) -> PathBuf {
        self.root
            .join(CACHE_INFO_DIR)
            .join(PathBuf::from_slash(path.trim_start_matches('/')))
    }

    /// Per-path lock serializing concurrent writers.
    pub fn lock_for(&self, path: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().unwrap();
        locks
            .entry(path.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    pub async fn open(&self, path: &str) -> Result<Option<LocalEntry>> {
        let file_path = self.file_path(path);
        let meta = match fs::metadata(&file_path).await {
            Ok(meta) => meta,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let info = if meta.is_dir() {
            CacheInfo {
                created_locally: false,
                synced_at: 0,
                downloaded_remote_last_modified: 0,
                local_snapshot: FileSnapshot::default(),
            }
        } else {
            self.load_info(path).await?.unwrap_or(CacheInfo {
                // a file with no sidecar is dangling
                created_locally: false,
                synced_at: 0,
                downloaded_remote_last_modified: 0,
                local_snapshot: FileSnapshot::default(),
            })
        };

        Ok(Some(LocalEntry {
            path: path.to_string(),
            size: if meta.is_dir() { 0 } else { meta.len() },
            last_modified: meta.modified().map(millis_of).unwrap_or(0),
            is_directory: meta.is_dir(),
            file_path,
            info,
        }))
    }

    /// Create an empty local-only file pending upload.
    pub async fn create_local(&self, path: &str) -> Result<LocalEntry> {
        let file_path = self.file_path(path);
        if let Some(parent) = file_path.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::File::create(&file_path).await?;

        let meta = fs::metadata(&file_path).await?;
        let info = CacheInfo {
            created_locally: true,
            synced_at: Utc::now().timestamp_millis(),
            downloaded_remote_last_modified: 0,
            local_snapshot: FileSnapshot::capture(&meta),
        };
        self.save_info(path, &info).await?;
        debug!(path, "created locally");

        Ok(LocalEntry {
            path: path.to_string(),
            size: 0,
            last_modified: info.local_snapshot.last_modified,
            is_directory: false,
            file_path,
            info,
        })
    }

    /// Store a completed download and record the observed remote state.
    pub async fn store_downloaded(
        &self,
        path: &str,
        remote: &RemoteEntry,
        body: &[u8],
    ) -> Result<()> {
        let file_path = self.file_path(path);
        if let Some(parent) = file_path.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(&file_path, body).await?;

        let meta = fs::metadata(&file_path).await?;
        let info = CacheInfo {
            created_locally: false,
            synced_at: Utc::now().timestamp_millis(),
            downloaded_remote_last_modified: remote.last_modified,
            local_snapshot: FileSnapshot::capture(&meta),
        };
        self.save_info(path, &info).await?;
        debug!(path, len = body.len(), "stored download");
        Ok(())
    }

    /// Refresh the sidecar after a successful upload. Directories carry no
    /// sidecar.
    pub async fn mark_synced(&self, path: &str, remote_last_modified: i64) -> Result<()> {
        let file_path = self.file_path(path);
        let meta = match fs::metadata(&file_path).await {
            Ok(meta) if meta.is_dir() => return Ok(()),
            Ok(meta) => meta,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };

        let info = CacheInfo {
            created_locally: false,
            synced_at: Utc::now().timestamp_millis(),
            downloaded_remote_last_modified: remote_last_modified,
            local_snapshot: FileSnapshot::capture(&meta),
        };
        self.save_info(path, &info).await
    }

    /// Overwrite the snapshot's modification time, e.g. when a caller sets
    /// the file time explicitly.
    pub async fn set_snapshot_modified(&self, path: &str, ms: i64) -> Result<()> {
        if let Some(mut info) = self.load_info(path).await? {
            info.local_snapshot.last_modified = ms;
            self.save_info(path, &info).await?;
        }
        Ok(())
    }

    /// Remove the cached content and its sidecar.
    pub async fn discard(&self, path: &str) -> Result<()> {
        for target in [self.file_path(path), self.info_path(path)] {
            match fs::metadata(&target).await {
                Ok(meta) if meta.is_dir() => fs::remove_dir_all(&target).await?,
                Ok(_) => fs::remove_file(&target).await?,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    /// Whether the cached copy can be silently dropped or replaced: false
    /// for locally created, locally modified, temp-named and dangling files.
    /// Directories are always replaceable.
    pub async fn can_delete(&self, path: &str) -> Result<bool> {
        let Some(entry) = self.open(path).await? else {
            return Ok(true);
        };
        if entry.is_directory {
            return Ok(true);
        }
        if crate::temp::TempFileClassifier::is_temp_path(path) {
            return Ok(false);
        }
        Ok(!entry.is_modified() && !entry.info.created_locally && !entry.info.is_dangling())
    }

    pub async fn is_modified(&self, path: &str) -> Result<bool> {
        Ok(self
            .open(path)
            .await?
            .map(|e| e.is_modified())
            .unwrap_or(false))
    }

    pub async fn read_bytes(&self, path: &str) -> Result<Vec<u8>> {
        match fs::read(self.file_path(path)).await {
            Ok(data) => Ok(data),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(Error::NotFound(path.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Move a cached file or directory, sidecars included.
    pub async fn rename(&self, old: &str, new: &str) -> Result<()> {
        for (from, to) in [
            (self.file_path(old), self.file_path(new)),
            (self.info_path(old), self.info_path(new)),
        ] {
            if fs::try_exists(&from).await.unwrap_or(false) {
                if let Some(parent) = to.parent() {
                    fs::create_dir_all(parent).await?;
                }
                fs::rename(&from, &to).await?;
            }
        }
        Ok(())
    }

    /// Duplicate a cached file. The copy is a fresh local creation pending
    /// its own upload.
    pub async fn copy_file(&self, src: &str, dst: &str) -> Result<()> {
        let bytes = self.read_bytes(src).await?;
        let file_path = self.file_path(dst);
        if let Some(parent) = file_path.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(&file_path, &bytes).await?;

        let meta = fs::metadata(&file_path).await?;
        let info = CacheInfo {
            created_locally: true,
            synced_at: Utc::now().timestamp_millis(),
            downloaded_remote_last_modified: 0,
            local_snapshot: FileSnapshot::capture(&meta),
        };
        self.save_info(dst, &info).await
    }

    /// Drop a whole cached subtree, sidecars included.
    pub async fn remove_subtree(&self, prefix: &str) -> Result<()> {
        for target in [self.file_path(prefix), self.info_path(prefix)] {
            match fs::remove_dir_all(&target).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    /// Decide how to serve a read against fresh remote metadata, applying
    /// the conflict rules. `remote_last_modified` is `None` when the remote
    /// does not have the path; `has_pending` reports a queued mutation for
    /// it.
    pub async fn refresh_outcome(
        &self,
        path: &str,
        remote_last_modified: Option<i64>,
        has_pending: bool,
    ) -> Result<RefreshOutcome> {
        let Some(entry) = self.open(path).await? else {
            return Ok(RefreshOutcome::Replace);
        };

        let Some(remote_lm) = remote_last_modified else {
            return Ok(RefreshOutcome::UpToDate);
        };
        if remote_lm <= entry.info.downloaded_remote_last_modified {
            return Ok(RefreshOutcome::UpToDate);
        }

        // stale: the remote moved past what we downloaded
        if entry.is_modified() || entry.info.created_locally {
            if has_pending {
                Ok(RefreshOutcome::KeepQueued)
            } else {
                Ok(RefreshOutcome::Conflict)
            }
        } else {
            Ok(RefreshOutcome::Replace)
        }
    }

    /// Drop sidecars whose cached file disappeared, e.g. removed while the
    /// share was not mounted. Called once at connect.
    pub fn sweep_orphans(&self) -> Result<usize> {
        let info_root = self.root.join(CACHE_INFO_DIR);
        let mut swept = 0;
        for item in WalkDir::new(&info_root).into_iter().filter_map(|r| r.ok()) {
            if !item.file_type().is_file() || item.file_name().to_string_lossy() == QUEUE_DOC {
                continue;
            }
            let relative = match item.path().strip_prefix(&info_root) {
                Ok(rel) => rel,
                Err(_) => continue,
            };
            if !self.root.join(relative).exists() {
                if let Err(e) = std::fs::remove_file(item.path()) {
                    warn!(path = %item.path().display(), error = %e, "orphan sidecar not removed");
                } else {
                    swept += 1;
                }
            }
        }
        Ok(swept)
    }

    async fn load_info(&self, path: &str) -> Result<Option<CacheInfo>> {
        match fs::read_to_string(self.info_path(path)).await {
            Ok(data) => Ok(Some(serde_json::from_str(&data).map_err(|e| {
                Error::Storage(format!("corrupt cache info for {}: {}", path, e))
            })?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn save_info(&self, path: &str, info: &CacheInfo) -> Result<()> {
        let info_path = self.info_path(path);
        if let Some(parent) = info_path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let data = serde_json::to_string_pretty(info)
            .map_err(|e| Error::Storage(format!("failed to serialize cache info: {}", e)))?;
        fs::write(&info_path, data).await?;
        Ok(())
    }
}
