use crate::cache::RefreshOutcome;
use crate::download::{DownloadOutcome, DownloadTicket};
use crate::error::{Error, Result};
use crate::events::ShareEvent;
use crate::path::{join_path, name_of};
use crate::queue::Method;
use crate::share::ShareState;
use crate::temp::TempFileClassifier;
use crate::tree::{AssetTree, TreeEntry};
use assetshare_api::{EntryKind, RemoteEntry};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tracing::{debug, warn};

/// The merged remote + local view of one share. Reads are served from the
/// local cache, fetching on miss; mutations apply locally and enqueue their
/// remote counterpart.
pub struct OverlayTree {
    state: Arc<ShareState>,
}

impl OverlayTree {
    pub(crate) fn new(state: Arc<ShareState>) -> Self {
        Self { state }
    }

    pub async fn exists(&self, path: &str) -> Result<bool> {
        if TempFileClassifier::is_temp_path(path) {
            return Ok(self.state.temp.exists(path).await.unwrap_or(false));
        }

        if let Some(pending) = self.state.queue.pending_for(path) {
            return Ok(pending.method != Method::Delete);
        }
        if self.state.cache.open(path).await?.is_some() {
            return Ok(true);
        }
        Ok(self.state.remote_entry(path).await?.is_some())
    }

    /// Open a file or folder for access. Content is fetched lazily on the
    /// first read.
    pub async fn open(&self, path: &str) -> Result<OverlayFile> {
        if TempFileClassifier::is_temp_path(path) {
            if !self.state.temp.exists(path).await.unwrap_or(false) {
                return Err(Error::NotFound(path.to_string()));
            }
            let kind = match self.state.temp.entry(path).await? {
                Some(entry) => entry.kind,
                None => EntryKind::File,
            };
            return Ok(OverlayFile::temp(self.state.clone(), path, kind));
        }

        let pending = self.state.queue.pending_for(path);
        if pending.as_ref().map(|p| p.method) == Some(Method::Delete) {
            return Err(Error::NotFound(path.to_string()));
        }

        let remote = self.state.remote_entry(path).await?;
        let local = self.state.cache.open(path).await?;
        if remote.is_none() && local.is_none() && pending.is_none() {
            return Err(Error::NotFound(path.to_string()));
        }

        let kind = match (&local, &remote, &pending) {
            (Some(l), _, _) if l.is_directory => EntryKind::Directory,
            (_, Some(r), _) if r.is_directory() => EntryKind::Directory,
            (_, _, Some(p)) if p.kind == EntryKind::Directory => EntryKind::Directory,
            _ => EntryKind::File,
        };

        Ok(OverlayFile::main(self.state.clone(), path, remote, kind))
    }

    /// Union listing: remote entries first (minus temp names and pending
    /// deletes), then pending local creations, then the temp shadow files.
    /// Results are cached per parent for `content_cache_ttl`.
    pub async fn list(&self, parent: &str) -> Result<Vec<TreeEntry>> {
        if TempFileClassifier::is_temp_path(parent) {
            return self.state.temp.list(parent).await;
        }

        if let Some(cached) = self.state.cached_listing(parent) {
            return Ok(cached);
        }

        let pending = self.state.queue.list_for_parent(parent);
        let mut entries: Vec<TreeEntry> = Vec::new();

        if let Some(listing) = self.state.client.get_listing(parent, 1).await? {
            for remote in &listing.entries {
                if TempFileClassifier::is_temp_name(&remote.name) {
                    continue;
                }
                if pending.get(&remote.name) == Some(&Method::Delete) {
                    continue;
                }
                entries.push(TreeEntry::from_remote(
                    join_path(parent, &remote.name),
                    remote,
                ));
            }
        }

        // files and folders created locally but not uploaded yet
        for request in self.state.queue.requests_for_parent(parent) {
            if request.method == Method::Delete {
                continue;
            }
            if entries.iter().any(|e| e.name() == request.name) {
                continue;
            }
            let path = request.path();
            let entry = match self.state.cache.open(&path).await? {
                Some(local) => TreeEntry {
                    path: path.clone(),
                    kind: request.kind,
                    size: local.size,
                    created: local.info.local_snapshot.created,
                    last_modified: local.last_modified,
                    read_only: false,
                },
                None => TreeEntry {
                    path: path.clone(),
                    kind: request.kind,
                    size: 0,
                    created: request.enqueued_at,
                    last_modified: request.enqueued_at,
                    read_only: false,
                },
            };
            entries.push(entry);
        }

        // the caller's own OS temp files
        if let Ok(shadow) = self.state.temp.list(parent).await {
            entries.extend(shadow);
        }

        self.state.store_listing(parent, &entries);
        self.state.events.emit(ShareEvent::FolderList {
            parent: parent.to_string(),
            files: entries.iter().map(|e| e.name().to_string()).collect(),
        });
        Ok(entries)
    }

    /// Create an empty file and queue its upload.
    pub async fn create_file(&self, path: &str) -> Result<OverlayFile> {
        if TempFileClassifier::is_temp_path(path) {
            self.state.temp.create_file(path).await?;
            return Ok(OverlayFile::temp(self.state.clone(), path, EntryKind::File));
        }

        if self.exists(path).await? {
            return Err(Error::NameCollision(path.to_string()));
        }

        self.state.cache.create_local(path).await?;
        self.state
            .queue
            .enqueue(Method::Put, path, None, EntryKind::File)?;
        self.state.invalidate(path);
        self.state.notify.notify_one();
        debug!(path, "created file");

        Ok(OverlayFile::main(
            self.state.clone(),
            path,
            None,
            EntryKind::File,
        ))
    }

    /// Queue a folder creation. Folders carry no local content.
    pub async fn create_directory(&self, path: &str) -> Result<()> {
        if TempFileClassifier::is_temp_path(path) {
            return self.state.temp.create_directory(path).await;
        }

        if self.exists(path).await? {
            return Err(Error::NameCollision(path.to_string()));
        }

        self.state
            .queue
            .enqueue(Method::Put, path, None, EntryKind::Directory)?;
        self.state.invalidate(path);
        self.state.notify.notify_one();
        debug!(path, "created directory");
        Ok(())
    }

    pub async fn delete(&self, path: &str) -> Result<()> {
        if TempFileClassifier::is_temp_path(path) {
            // best-effort cleanup of OS droppings
            if let Err(e) = self.state.temp.delete(path).await {
                debug!(path, error = %e, "temp delete ignored");
            }
            return Ok(());
        }

        let local = self.state.cache.open(path).await?;
        let pending = self.state.queue.pending_for(path);

        // a locally created file simply vanishes; fusion drops its PUT
        if let Some(entry) = &local {
            if entry.info.created_locally && !entry.is_directory {
                self.state.cache.discard(path).await?;
                self.state
                    .queue
                    .enqueue(Method::Delete, path, None, EntryKind::File)?;
                self.state.invalidate(path);
                return Ok(());
            }
        }

        let remote = self.state.remote_entry(path).await?;
        if local.is_none() && remote.is_none() && pending.is_none() {
            return Err(Error::NotFound(path.to_string()));
        }

        let is_directory = local.as_ref().map(|l| l.is_directory).unwrap_or(false)
            || remote.as_ref().map(|r| r.is_directory()).unwrap_or(false)
            || pending
                .as_ref()
                .map(|p| p.kind == EntryKind::Directory)
                .unwrap_or(false);

        if is_directory {
            self.state.cache.remove_subtree(path).await?;
            self.state.queue.remove_path(path)?;
            self.state
                .queue
                .enqueue(Method::Delete, path, None, EntryKind::Directory)?;
            self.state.invalidate_subtree(path);
        } else {
            if local.is_some() {
                self.state.cache.discard(path).await?;
            }
            self.state
                .queue
                .enqueue(Method::Delete, path, None, EntryKind::File)?;
            self.state.invalidate(path);
        }
        self.state.notify.notify_one();
        Ok(())
    }

    /// Rename within the share. Renames that cross the temp boundary copy
    /// content between the trees and delete the source.
    pub async fn rename(&self, old: &str, new: &str) -> Result<()> {
        let old_temp = TempFileClassifier::is_temp_path(old);
        let new_temp = TempFileClassifier::is_temp_path(new);

        match (old_temp, new_temp) {
            (true, true) => self.state.temp.rename(old, new).await,
            (true, false) => {
                let bytes = self.state.temp.read_file(old).await?;
                if self.exists(new).await? {
                    return Err(Error::NameCollision(new.to_string()));
                }
                self.state.cache.create_local(new).await?;
                tokio::fs::write(self.state.cache.file_path(new), &bytes).await?;
                self.state
                    .queue
                    .enqueue(Method::Put, new, None, EntryKind::File)?;
                self.state.invalidate(new);
                self.state.notify.notify_one();
                if let Err(e) = self.state.temp.delete(old).await {
                    debug!(path = old, error = %e, "temp cleanup ignored");
                }
                Ok(())
            }
            (false, true) => {
                let mut file = self.open(old).await?;
                let bytes = file.read_to_end().await?;
                self.state.temp.write_file(new, &bytes).await?;
                self.delete(old).await
            }
            (false, false) => self.rename_main(old, new).await,
        }
    }

    async fn rename_main(&self, old: &str, new: &str) -> Result<()> {
        if self.exists(new).await? {
            return Err(Error::NameCollision(new.to_string()));
        }

        let local = self.state.cache.open(old).await?;
        let remote = self.state.remote_entry(old).await?;
        let pending = self.state.queue.pending_for(old);
        if local.is_none() && remote.is_none() && pending.is_none() {
            return Err(Error::NotFound(old.to_string()));
        }

        let kind = if local.as_ref().map(|l| l.is_directory).unwrap_or(false)
            || remote.as_ref().map(|r| r.is_directory()).unwrap_or(false)
            || pending
                .as_ref()
                .map(|p| p.kind == EntryKind::Directory)
                .unwrap_or(false)
        {
            EntryKind::Directory
        } else {
            EntryKind::File
        };

        self.state.cache.rename(old, new).await?;
        // rewrite the queued subtree before the move pair lands, so the
        // pair's own origin links stay untouched
        if kind == EntryKind::Directory {
            self.state.queue.rename_path(old, new)?;
        }
        self.state.queue.enqueue(Method::Move, old, Some(new), kind)?;
        if kind == EntryKind::Directory {
            self.state.invalidate_subtree(old);
            self.state.invalidate_subtree(new);
        } else {
            self.state.invalidate(old);
            self.state.invalidate(new);
        }
        self.state.notify.notify_one();
        debug!(old, new, "renamed");
        Ok(())
    }

    /// Metadata for a path, merged across the views.
    pub async fn entry(&self, path: &str) -> Result<Option<TreeEntry>> {
        if TempFileClassifier::is_temp_path(path) {
            return self.state.temp.entry(path).await;
        }

        let pending = self.state.queue.pending_for(path);
        if pending.as_ref().map(|p| p.method) == Some(Method::Delete) {
            return Ok(None);
        }

        if let Some(local) = self.state.cache.open(path).await? {
            let read_only = self
                .state
                .remote_entry(path)
                .await
                .ok()
                .flatten()
                .map(|r| r.read_only)
                .unwrap_or(false);
            return Ok(Some(TreeEntry {
                path: path.to_string(),
                kind: if local.is_directory {
                    EntryKind::Directory
                } else {
                    EntryKind::File
                },
                size: local.size,
                created: local.info.local_snapshot.created,
                last_modified: local.last_modified,
                read_only,
            }));
        }

        if let Some(remote) = self.state.remote_entry(path).await? {
            return Ok(Some(TreeEntry::from_remote(path, &remote)));
        }

        Ok(pending.map(|p| TreeEntry {
            path: path.to_string(),
            kind: p.kind,
            size: 0,
            created: p.enqueued_at,
            last_modified: p.enqueued_at,
            read_only: false,
        }))
    }
}

#[async_trait]
impl AssetTree for OverlayTree {
    async fn exists(&self, path: &str) -> Result<bool> {
        OverlayTree::exists(self, path).await
    }

    async fn entry(&self, path: &str) -> Result<Option<TreeEntry>> {
        OverlayTree::entry(self, path).await
    }

    async fn list(&self, parent: &str) -> Result<Vec<TreeEntry>> {
        OverlayTree::list(self, parent).await
    }

    async fn create_file(&self, path: &str) -> Result<()> {
        OverlayTree::create_file(self, path).await.map(|_| ())
    }

    async fn create_directory(&self, path: &str) -> Result<()> {
        OverlayTree::create_directory(self, path).await
    }

    async fn read_file(&self, path: &str) -> Result<Vec<u8>> {
        let mut file = self.open(path).await?;
        file.read_to_end().await
    }

    async fn write_file(&self, path: &str, data: &[u8]) -> Result<()> {
        let mut file = match self.open(path).await {
            Ok(file) => file,
            Err(Error::NotFound(_)) => self.create_file(path).await?,
            Err(e) => return Err(e),
        };
        file.truncate(0).await?;
        file.write(0, data).await?;
        file.close().await
    }

    async fn delete(&self, path: &str) -> Result<()> {
        OverlayTree::delete(self, path).await
    }

    async fn rename(&self, from: &str, to: &str) -> Result<()> {
        OverlayTree::rename(self, from, to).await
    }

    async fn disconnect(&self) -> Result<()> {
        self.state.clear_caches();
        Ok(())
    }
}

/// An open handle on one overlay path. Writes land in the local cache and
/// are queued for upload when the handle closes.
pub struct OverlayFile {
    state: Arc<ShareState>,
    path: String,
    remote: Option<RemoteEntry>,
    kind: EntryKind,
    is_temp: bool,
    dirty: bool,
}

impl OverlayFile {
    fn main(
        state: Arc<ShareState>,
        path: &str,
        remote: Option<RemoteEntry>,
        kind: EntryKind,
    ) -> Self {
        Self {
            state,
            path: path.to_string(),
            remote,
            kind,
            is_temp: false,
            dirty: false,
        }
    }

    fn temp(state: Arc<ShareState>, path: &str, kind: EntryKind) -> Self {
        Self {
            state,
            path: path.to_string(),
            remote: None,
            kind,
            is_temp: true,
            dirty: false,
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn name(&self) -> &str {
        name_of(&self.path)
    }

    pub fn is_directory(&self) -> bool {
        self.kind == EntryKind::Directory
    }

    pub async fn size(&self) -> Result<u64> {
        if self.is_directory() {
            return Ok(0);
        }
        if self.is_temp {
            return Ok(self
                .state
                .temp
                .entry(&self.path)
                .await?
                .map(|e| e.size)
                .unwrap_or(0));
        }
        if let Some(local) = self.state.cache.open(&self.path).await? {
            return Ok(local.size);
        }
        if let Some(remote) = &self.remote {
            return Ok(remote.size);
        }
        Ok(0)
    }

    /// Make the content locally available, downloading through the
    /// coordinator when needed and applying the conflict rules.
    pub async fn ensure_cached(&self) -> Result<()> {
        if self.is_temp || self.is_directory() {
            return Ok(());
        }

        loop {
            let pending = self.state.queue.pending_for(&self.path);
            if pending.as_ref().map(|p| p.method) == Some(Method::Delete) {
                return Err(Error::NotFound(self.path.clone()));
            }
            let has_pending = pending.is_some();
            let remote_lm = self.remote.as_ref().map(|r| r.last_modified);

            match self
                .state
                .cache
                .refresh_outcome(&self.path, remote_lm, has_pending)
                .await?
            {
                RefreshOutcome::UpToDate | RefreshOutcome::KeepQueued => return Ok(()),
                RefreshOutcome::Conflict => {
                    warn!(path = %self.path, "local and remote both changed; keeping local");
                    self.state.events.emit(ShareEvent::SyncConflict {
                        path: self.path.clone(),
                    });
                    return Ok(());
                }
                RefreshOutcome::Replace => {
                    // resolve where the bytes come from: a pending move or
                    // copy reads its origin until the queue drains
                    let origin = pending
                        .as_ref()
                        .and_then(|p| p.moved_from.clone().or_else(|| p.copied_from.clone()));
                    let source_path = origin.unwrap_or_else(|| self.path.clone());
                    let source_meta = if source_path == self.path {
                        self.remote.clone()
                    } else {
                        self.state.remote_entry(&source_path).await?
                    };
                    let Some(meta) = source_meta else {
                        if self.state.cache.open(&self.path).await?.is_some() {
                            return Ok(());
                        }
                        return Err(Error::NotFound(self.path.clone()));
                    };
                    if meta.is_directory() {
                        return Ok(());
                    }

                    match self.state.coordinator.begin(&self.path) {
                        DownloadTicket::Go => {
                            self.state.events.emit(ShareEvent::DownloadStart {
                                path: self.path.clone(),
                            });
                            let result = self.download(&source_path, &meta).await;
                            self.state.coordinator.end(&self.path);
                            self.state.events.emit(ShareEvent::DownloadEnd {
                                path: self.path.clone(),
                            });
                            return result;
                        }
                        DownloadTicket::Wait(rx) => match rx.await {
                            Ok(DownloadOutcome::Done) | Err(_) => continue,
                            Ok(DownloadOutcome::Cancelled) => {
                                return Err(Error::Cancelled(self.path.clone()))
                            }
                        },
                    }
                }
            }
        }
    }

    async fn download(&self, source_path: &str, meta: &RemoteEntry) -> Result<()> {
        let expected = self.state.client.head_length(source_path).await?;
        let body = self.state.client.get_body(source_path).await?;
        if expected != body.len() as u64 {
            warn!(
                path = source_path,
                expected,
                actual = body.len(),
                "content length mismatch"
            );
        }
        self.state
            .cache
            .store_downloaded(&self.path, meta, &body)
            .await
    }

    pub async fn read(&self, offset: u64, len: usize) -> Result<Vec<u8>> {
        if self.is_directory() {
            return Err(Error::InvalidPath(format!("{} is a folder", self.path)));
        }
        if self.is_temp {
            let bytes = self.state.temp.read_file(&self.path).await?;
            let start = (offset as usize).min(bytes.len());
            let end = (start + len).min(bytes.len());
            return Ok(bytes[start..end].to_vec());
        }

        self.ensure_cached().await?;
        let mut file = tokio::fs::File::open(self.state.cache.file_path(&self.path)).await?;
        file.seek(std::io::SeekFrom::Start(offset)).await?;
        let mut buf = vec![0u8; len];
        let mut read = 0;
        while read < len {
            let n = file.read(&mut buf[read..]).await?;
            if n == 0 {
                break;
            }
            read += n;
        }
        buf.truncate(read);
        Ok(buf)
    }

    pub async fn read_to_end(&mut self) -> Result<Vec<u8>> {
        let size = self.size().await?;
        self.read(0, size as usize).await
    }

    pub async fn write(&mut self, offset: u64, data: &[u8]) -> Result<()> {
        if self.is_directory() {
            return Err(Error::InvalidPath(format!("{} is a folder", self.path)));
        }
        if self.is_temp {
            let mut bytes = match self.state.temp.read_file(&self.path).await {
                Ok(bytes) => bytes,
                Err(Error::NotFound(_)) => Vec::new(),
                Err(e) => return Err(e),
            };
            let end = offset as usize + data.len();
            if bytes.len() < end {
                bytes.resize(end, 0);
            }
            bytes[offset as usize..end].copy_from_slice(data);
            return self.state.temp.write_file(&self.path, &bytes).await;
        }

        self.ensure_cached().await?;
        let lock = self.state.cache.lock_for(&self.path);
        let _guard = lock.lock().await;

        let mut file = tokio::fs::OpenOptions::new()
            .write(true)
            .create(true)
            .open(self.state.cache.file_path(&self.path))
            .await?;
        file.seek(std::io::SeekFrom::Start(offset)).await?;
        file.write_all(data).await?;
        file.flush().await?;
        self.dirty = true;
        Ok(())
    }

    pub async fn truncate(&mut self, len: u64) -> Result<()> {
        if self.is_temp {
            let mut bytes = match self.state.temp.read_file(&self.path).await {
                Ok(bytes) => bytes,
                Err(Error::NotFound(_)) => Vec::new(),
                Err(e) => return Err(e),
            };
            bytes.truncate(len as usize);
            return self.state.temp.write_file(&self.path, &bytes).await;
        }

        self.ensure_cached().await?;
        let lock = self.state.cache.lock_for(&self.path);
        let _guard = lock.lock().await;
        let file = tokio::fs::OpenOptions::new()
            .write(true)
            .create(true)
            .open(self.state.cache.file_path(&self.path))
            .await?;
        file.set_len(len).await?;
        self.dirty = true;
        Ok(())
    }

    /// Record an explicit modification time in the sidecar snapshot.
    pub async fn set_last_modified(&self, ms: i64) -> Result<()> {
        if self.is_temp {
            return Ok(());
        }
        self.state.cache.set_snapshot_modified(&self.path, ms).await
    }

    /// Flush pending writes into the queue. Temp files never queue.
    pub async fn close(&mut self) -> Result<()> {
        // waiters for this path observe a cancellation
        self.state.coordinator.cancel(&self.path);

        if self.is_temp || !self.dirty {
            return Ok(());
        }
        self.dirty = false;

        let created = self
            .state
            .cache
            .open(&self.path)
            .await?
            .map(|e| e.info.created_locally)
            .unwrap_or(false);
        let method = if created { Method::Put } else { Method::Post };
        self.state
            .queue
            .enqueue(method, &self.path, None, EntryKind::File)?;
        self.state.invalidate(&self.path);
        self.state.notify.notify_one();
        debug!(path = %self.path, %method, "queued upload on close");
        Ok(())
    }
}
