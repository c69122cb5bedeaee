use crate::error::{Error, Result};
use crate::path::{is_within, join_path, rebase};
use assetshare_api::EntryKind;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::PathBuf;
use std::sync::Mutex;
use tracing::debug;

/// Queue operation. MOVE and COPY are accepted by `enqueue` but are stored
/// decomposed: a MOVE becomes a PUT at the destination (tagged `moved_from`)
/// plus a DELETE at the source, a COPY a single tagged PUT at the
/// destination. Stored entries therefore only ever carry PUT, POST or
/// DELETE.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    Put,
    Post,
    Delete,
    Move,
    Copy,
}

impl std::fmt::Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Method::Put => "PUT",
            Method::Post => "POST",
            Method::Delete => "DELETE",
            Method::Move => "MOVE",
            Method::Copy => "COPY",
        };
        write!(f, "{}", s)
    }
}

/// One pending remote mutation, keyed by (parent, name).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QueuedRequest {
    pub method: Method,
    pub parent: String,
    pub name: String,
    /// Destination of the counterpart PUT when this DELETE is the source
    /// half of a move pair.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dest_parent: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dest_name: Option<String>,
    pub kind: EntryKind,
    pub enqueued_at: i64,
    pub retries: u32,
    /// Remote path this PUT was moved from; set on the destination half of a
    /// move pair.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub moved_from: Option<String>,
    /// Remote path this PUT copies its content from when no local bytes
    /// exist at drain time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub copied_from: Option<String>,
}

impl QueuedRequest {
    pub fn path(&self) -> String {
        join_path(&self.parent, &self.name)
    }

    pub fn dest_path(&self) -> Option<String> {
        match (&self.dest_parent, &self.dest_name) {
            (Some(parent), Some(name)) => Some(join_path(parent, name)),
            _ => None,
        }
    }
}

const QUEUE_VERSION: u32 = 1;

#[derive(Serialize, Deserialize)]
struct QueueDocument {
    version: u32,
    requests: Vec<QueuedRequest>,
}

struct QueueState {
    entries: BTreeMap<String, QueuedRequest>,
    in_progress: HashSet<String>,
}

/// Persistent store of pending remote mutations with the fusion rules that
/// collapse interacting operations on the same source key. At most one entry
/// exists per key.
pub struct RequestQueue {
    store_path: PathBuf,
    state: Mutex<QueueState>,
}

impl RequestQueue {
    /// Open the queue document at `store_path`, creating an empty queue when
    /// the document does not exist yet.
    pub fn new(store_path: impl Into<PathBuf>) -> Result<Self> {
        let store_path = store_path.into();
        let mut entries = BTreeMap::new();

        if store_path.exists() {
            let data = fs::read_to_string(&store_path)?;
            let doc: QueueDocument = serde_json::from_str(&data)
                .map_err(|e| Error::Storage(format!("corrupt queue document: {}", e)))?;
            if doc.version != QUEUE_VERSION {
                return Err(Error::Storage(format!(
                    "unsupported queue version: {}",
                    doc.version
                )));
            }
            for request in doc.requests {
                entries.insert(request.path(), request);
            }
        }

        Ok(Self {
            store_path,
            state: Mutex::new(QueueState {
                entries,
                in_progress: HashSet::new(),
            }),
        })
    }

    /// Apply the fusion rules for a new operation and persist the result.
    /// `dest` is required for MOVE and COPY.
    pub fn enqueue(
        &self,
        method: Method,
        src: &str,
        dest: Option<&str>,
        kind: EntryKind,
    ) -> Result<()> {
        let now = Utc::now().timestamp_millis();
        let mut state = self.state.lock().unwrap();

        match method {
            Method::Put | Method::Post | Method::Delete => {
                let paired_dest = match state.entries.get(src) {
                    Some(e) if e.method == Method::Delete => e.dest_path(),
                    _ => None,
                };
                fuse_simple(&mut state.entries, method, src, kind, now);
                // content re-created over the source half of a pending move:
                // both halves become in-place updates and the pairing ends
                if method != Method::Delete {
                    if let Some(dest) = paired_dest {
                        unlink_move_destination(&mut state.entries, src, &dest);
                    }
                }
            }
            Method::Move => {
                let dest = dest
                    .ok_or_else(|| Error::InvalidPath("MOVE requires a destination".into()))?;
                fuse_move(&mut state.entries, src, dest, kind, now);
            }
            Method::Copy => {
                let dest = dest
                    .ok_or_else(|| Error::InvalidPath("COPY requires a destination".into()))?;
                fuse_copy(&mut state.entries, src, dest, kind, now);
            }
        }

        debug!(%method, src, ?dest, pending = state.entries.len(), "enqueued");
        self.persist(&state)
    }

    /// Pending methods for the direct children of `parent`, by name.
    pub fn list_for_parent(&self, parent: &str) -> BTreeMap<String, Method> {
        let state = self.state.lock().unwrap();
        state
            .entries
            .values()
            .filter(|e| e.parent == parent)
            .map(|e| (e.name.clone(), e.method))
            .collect()
    }

    /// Pending requests for the direct children of `parent`.
    pub fn requests_for_parent(&self, parent: &str) -> Vec<QueuedRequest> {
        let state = self.state.lock().unwrap();
        state
            .entries
            .values()
            .filter(|e| e.parent == parent)
            .cloned()
            .collect()
    }

    /// The stored entry for a path, if any.
    pub fn pending_for(&self, path: &str) -> Option<QueuedRequest> {
        let state = self.state.lock().unwrap();
        state.entries.get(path).cloned()
    }

    /// Oldest request enqueued at or before `older_than` with retry budget
    /// left, skipping entries currently being processed.
    pub fn next_due(&self, older_than: i64, max_retries: u32) -> Option<QueuedRequest> {
        let state = self.state.lock().unwrap();
        state
            .entries
            .values()
            .filter(|e| {
                e.enqueued_at <= older_than
                    && e.retries < max_retries
                    && !state.in_progress.contains(&e.path())
            })
            .min_by_key(|e| (e.enqueued_at, e.path()))
            .cloned()
    }

    pub fn mark_in_progress(&self, path: &str) {
        let mut state = self.state.lock().unwrap();
        state.in_progress.insert(path.to_string());
    }

    pub fn clear_in_progress(&self, path: &str) {
        let mut state = self.state.lock().unwrap();
        state.in_progress.remove(path);
    }

    pub fn remove(&self, parent: &str, name: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.entries.remove(&join_path(parent, name));
        self.persist(&state)
    }

    pub fn set_retries(&self, parent: &str, name: &str, retries: u32) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if let Some(entry) = state.entries.get_mut(&join_path(parent, name)) {
            entry.retries = retries;
        }
        self.persist(&state)
    }

    /// Rewrite all entries whose parent is `old_prefix` or lies beneath it.
    /// Origin and destination links inside the prefix move along.
    pub fn rename_path(&self, old_prefix: &str, new_prefix: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let entries = std::mem::take(&mut state.entries);
        state.entries = entries
            .into_values()
            .map(|mut e| {
                if is_within(old_prefix, &e.parent) {
                    e.parent = rebase(&e.parent, old_prefix, new_prefix).unwrap();
                }
                rebase_links(&mut e, old_prefix, new_prefix);
                (e.path(), e)
            })
            .collect();
        self.persist(&state)
    }

    /// Drop all entries whose parent is `prefix` or lies beneath it.
    pub fn remove_path(&self, prefix: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.entries.retain(|_, e| !is_within(prefix, &e.parent));
        self.persist(&state)
    }

    /// Duplicate the entries of a subtree under a new prefix, as freshly
    /// enqueued requests.
    pub fn copy_path(&self, src_prefix: &str, dst_prefix: &str) -> Result<()> {
        let now = Utc::now().timestamp_millis();
        let mut state = self.state.lock().unwrap();
        let copies: Vec<QueuedRequest> = state
            .entries
            .values()
            .filter(|e| is_within(src_prefix, &e.parent))
            .map(|e| {
                let mut copy = e.clone();
                copy.parent = rebase(&e.parent, src_prefix, dst_prefix).unwrap();
                copy.enqueued_at = now;
                copy.retries = 0;
                copy
            })
            .collect();
        for copy in copies {
            state.entries.insert(copy.path(), copy);
        }
        self.persist(&state)
    }

    pub fn len(&self) -> usize {
        self.state.lock().unwrap().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().unwrap().entries.is_empty()
    }

    fn persist(&self, state: &QueueState) -> Result<()> {
        if let Some(parent) = self.store_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let doc = QueueDocument {
            version: QUEUE_VERSION,
            requests: state.entries.values().cloned().collect(),
        };
        let data = serde_json::to_string_pretty(&doc)
            .map_err(|e| Error::Storage(format!("failed to serialize queue: {}", e)))?;
        fs::write(&self.store_path, data)?;
        Ok(())
    }
}

fn request(method: Method, path: &str, kind: EntryKind, now: i64) -> QueuedRequest {
    QueuedRequest {
        method,
        parent: crate::path::parent_of(path).to_string(),
        name: crate::path::name_of(path).to_string(),
        dest_parent: None,
        dest_name: None,
        kind,
        enqueued_at: now,
        retries: 0,
        moved_from: None,
        copied_from: None,
    }
}

/// Fusion of a PUT/POST/DELETE against the existing entry for the same key.
fn fuse_simple(
    entries: &mut BTreeMap<String, QueuedRequest>,
    new_method: Method,
    path: &str,
    kind: EntryKind,
    now: i64,
) {
    let Some(existing) = entries.get_mut(path) else {
        entries.insert(path.to_string(), request(new_method, path, kind, now));
        return;
    };

    match (existing.method, new_method) {
        // The local content is the newest content either way; restart the
        // coalescing window. A rewritten move/copy destination no longer
        // mirrors its origin.
        (Method::Put, Method::Put) | (Method::Put, Method::Post) => {
            existing.enqueued_at = now;
            existing.retries = 0;
            existing.moved_from = None;
            existing.copied_from = None;
        }
        (Method::Post, Method::Put) | (Method::Post, Method::Post) => {
            existing.enqueued_at = now;
            existing.retries = 0;
        }
        // Create-then-delete never reaches the remote.
        (Method::Put, Method::Delete) => {
            entries.remove(path);
        }
        (Method::Post, Method::Delete) => {
            *existing = request(Method::Delete, path, kind, now);
        }
        // Content re-created over a pending delete: the remote file still
        // exists, so update it in place.
        (Method::Delete, Method::Put) | (Method::Delete, Method::Post) => {
            *existing = request(Method::Post, path, kind, now);
        }
        (Method::Delete, Method::Delete) => {}
        (_, _) => {}
    }
}

/// A MOVE is a DELETE fused at the source plus a tagged PUT fused at the
/// destination; a source holding a pending POST keeps the POST instead of
/// the delete. The origin link chases through pending moves so that
/// `a -> b -> c` still points at `a`.
fn fuse_move(
    entries: &mut BTreeMap<String, QueuedRequest>,
    src: &str,
    dest: &str,
    kind: EntryKind,
    now: i64,
) {
    // a pending content update survives the move: the update stays at the
    // source and the destination gets a plain upload of the local bytes
    if matches!(entries.get(src), Some(e) if e.method == Method::Post) {
        fuse_put_at_dest(entries, dest, kind, None, None, now);
        return;
    }

    let (moved_link, copied_link) = match entries.get(src) {
        None => (Some(src.to_string()), None),
        Some(e) if e.method == Method::Put => (e.moved_from.clone(), e.copied_from.clone()),
        Some(_) => (None, None),
    };

    fuse_simple(entries, Method::Delete, src, kind, now);

    if let Some(origin) = &moved_link {
        if origin != src {
            // Chained move: the pending source-half delete lives at the
            // origin; repoint its pair marker at the new destination.
            if let Some(origin_delete) = entries.get_mut(origin.as_str()) {
                if origin_delete.method == Method::Delete
                    && origin_delete.dest_path().as_deref() == Some(src)
                {
                    origin_delete.dest_parent =
                        Some(crate::path::parent_of(dest).to_string());
                    origin_delete.dest_name = Some(crate::path::name_of(dest).to_string());
                }
            }
        } else if let Some(src_delete) = entries.get_mut(src) {
            if src_delete.method == Method::Delete {
                src_delete.dest_parent = Some(crate::path::parent_of(dest).to_string());
                src_delete.dest_name = Some(crate::path::name_of(dest).to_string());
            }
        }
    }

    fuse_put_at_dest(entries, dest, kind, moved_link, copied_link, now);
}

/// A COPY is a single tagged PUT fused at the destination; the source key is
/// untouched.
fn fuse_copy(
    entries: &mut BTreeMap<String, QueuedRequest>,
    src: &str,
    dest: &str,
    kind: EntryKind,
    now: i64,
) {
    let copied_link = match entries.get(src) {
        Some(e) if e.method == Method::Put => e
            .copied_from
            .clone()
            .or_else(|| e.moved_from.clone())
            .or_else(|| Some(src.to_string())),
        _ => Some(src.to_string()),
    };
    fuse_put_at_dest(entries, dest, kind, None, copied_link, now);
}

fn fuse_put_at_dest(
    entries: &mut BTreeMap<String, QueuedRequest>,
    dest: &str,
    kind: EntryKind,
    moved_from: Option<String>,
    copied_from: Option<String>,
    now: i64,
) {
    match entries.get_mut(dest) {
        None => {
            let mut entry = request(Method::Put, dest, kind, now);
            entry.moved_from = moved_from;
            entry.copied_from = copied_from;
            entries.insert(dest.to_string(), entry);
        }
        Some(existing) => {
            // Landing on a pending delete means the remote file still
            // exists there; update it in place.
            if existing.method == Method::Delete {
                existing.method = Method::Post;
                existing.dest_parent = None;
                existing.dest_name = None;
            }
            existing.kind = kind;
            existing.moved_from = moved_from;
            existing.copied_from = copied_from;
            existing.enqueued_at = now;
            existing.retries = 0;
        }
    }
}

/// Breaks a move pair when fresh content lands on its vacated source: the
/// destination keeps its local bytes but becomes an in-place update, and no
/// provenance link is left to chase a path that now holds other content.
fn unlink_move_destination(
    entries: &mut BTreeMap<String, QueuedRequest>,
    src: &str,
    dest: &str,
) {
    if let Some(dest_entry) = entries.get_mut(dest) {
        if dest_entry.method == Method::Put && dest_entry.moved_from.as_deref() == Some(src) {
            dest_entry.method = Method::Post;
            dest_entry.moved_from = None;
        }
    }
}

fn rebase_links(entry: &mut QueuedRequest, old_prefix: &str, new_prefix: &str) {
    for link in [&mut entry.moved_from, &mut entry.copied_from] {
        if let Some(path) = link {
            if is_within(old_prefix, path) {
                *link = rebase(path, old_prefix, new_prefix);
            }
        }
    }
    if let Some(dest) = entry.dest_path() {
        if is_within(old_prefix, &dest) {
            let rebased = rebase(&dest, old_prefix, new_prefix).unwrap();
            entry.dest_parent = Some(crate::path::parent_of(&rebased).to_string());
            entry.dest_name = Some(crate::path::name_of(&rebased).to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn queue(dir: &TempDir) -> RequestQueue {
        RequestQueue::new(dir.path().join("request-queue.json")).unwrap()
    }

    fn put(q: &RequestQueue, path: &str) {
        q.enqueue(Method::Put, path, None, EntryKind::File).unwrap();
    }

    fn post(q: &RequestQueue, path: &str) {
        q.enqueue(Method::Post, path, None, EntryKind::File).unwrap();
    }

    fn delete(q: &RequestQueue, path: &str) {
        q.enqueue(Method::Delete, path, None, EntryKind::File).unwrap();
    }

    fn mv(q: &RequestQueue, src: &str, dest: &str) {
        q.enqueue(Method::Move, src, Some(dest), EntryKind::File).unwrap();
    }

    fn method_at(q: &RequestQueue, path: &str) -> Option<Method> {
        q.pending_for(path).map(|e| e.method)
    }

    #[test]
    fn test_simple_enqueue() {
        let dir = TempDir::new().unwrap();
        let q = queue(&dir);
        put(&q, "/a.txt");
        assert_eq!(method_at(&q, "/a.txt"), Some(Method::Put));
        assert_eq!(q.len(), 1);
    }

    #[test]
    fn test_put_then_write_stays_put() {
        let dir = TempDir::new().unwrap();
        let q = queue(&dir);
        put(&q, "/a.txt");
        post(&q, "/a.txt");
        assert_eq!(method_at(&q, "/a.txt"), Some(Method::Put));
        assert_eq!(q.len(), 1);
    }

    #[test]
    fn test_create_then_delete_is_noop() {
        let dir = TempDir::new().unwrap();
        let q = queue(&dir);
        put(&q, "/a.txt");
        delete(&q, "/a.txt");
        assert!(q.is_empty());
    }

    #[test]
    fn test_post_then_delete_becomes_delete() {
        let dir = TempDir::new().unwrap();
        let q = queue(&dir);
        post(&q, "/a.txt");
        delete(&q, "/a.txt");
        assert_eq!(method_at(&q, "/a.txt"), Some(Method::Delete));
    }

    #[test]
    fn test_delete_then_put_becomes_post() {
        let dir = TempDir::new().unwrap();
        let q = queue(&dir);
        delete(&q, "/a.txt");
        put(&q, "/a.txt");
        assert_eq!(method_at(&q, "/a.txt"), Some(Method::Post));
        assert_eq!(q.len(), 1);
    }

    #[test]
    fn test_move_of_clean_file_expands_to_pair() {
        let dir = TempDir::new().unwrap();
        let q = queue(&dir);
        mv(&q, "/a", "/b");

        let dest = q.pending_for("/b").unwrap();
        assert_eq!(dest.method, Method::Put);
        assert_eq!(dest.moved_from.as_deref(), Some("/a"));

        let src = q.pending_for("/a").unwrap();
        assert_eq!(src.method, Method::Delete);
        assert_eq!(src.dest_path().as_deref(), Some("/b"));
    }

    #[test]
    fn test_chained_move_collapses() {
        let dir = TempDir::new().unwrap();
        let q = queue(&dir);
        mv(&q, "/a", "/b");
        mv(&q, "/b", "/c");

        assert_eq!(q.len(), 2);
        assert!(q.pending_for("/b").is_none());

        let dest = q.pending_for("/c").unwrap();
        assert_eq!(dest.method, Method::Put);
        assert_eq!(dest.moved_from.as_deref(), Some("/a"));

        let src = q.pending_for("/a").unwrap();
        assert_eq!(src.method, Method::Delete);
        assert_eq!(src.dest_path().as_deref(), Some("/c"));
    }

    #[test]
    fn test_move_of_locally_created_file_has_no_delete() {
        let dir = TempDir::new().unwrap();
        let q = queue(&dir);
        put(&q, "/new.txt");
        mv(&q, "/new.txt", "/renamed.txt");

        assert_eq!(q.len(), 1);
        let dest = q.pending_for("/renamed.txt").unwrap();
        assert_eq!(dest.method, Method::Put);
        assert_eq!(dest.moved_from, None);
    }

    #[test]
    fn test_move_of_modified_file_keeps_source_update() {
        let dir = TempDir::new().unwrap();
        let q = queue(&dir);
        post(&q, "/a");
        mv(&q, "/a", "/b");

        assert_eq!(q.len(), 2);
        let src = q.pending_for("/a").unwrap();
        assert_eq!(src.method, Method::Post);
        assert_eq!(src.dest_path(), None);

        let dest = q.pending_for("/b").unwrap();
        assert_eq!(dest.method, Method::Put);
        assert_eq!(dest.moved_from, None);
    }

    #[test]
    fn test_create_over_vacated_move_source_unlinks_destination() {
        let dir = TempDir::new().unwrap();
        let q = queue(&dir);
        mv(&q, "/a", "/b");
        put(&q, "/a");

        // the source is an in-place re-create, no longer half of a move
        let src = q.pending_for("/a").unwrap();
        assert_eq!(src.method, Method::Post);
        assert_eq!(src.dest_path(), None);

        // the destination keeps its bytes but stops pointing at the source
        let dest = q.pending_for("/b").unwrap();
        assert_eq!(dest.method, Method::Post);
        assert_eq!(dest.moved_from, None);
    }

    #[test]
    fn test_write_to_move_destination_clears_origin() {
        let dir = TempDir::new().unwrap();
        let q = queue(&dir);
        mv(&q, "/a", "/b");
        put(&q, "/b");

        let dest = q.pending_for("/b").unwrap();
        assert_eq!(dest.method, Method::Put);
        assert_eq!(dest.moved_from, None);
        // the source delete still drains on its own
        assert_eq!(method_at(&q, "/a"), Some(Method::Delete));
    }

    #[test]
    fn test_delete_of_move_destination() {
        let dir = TempDir::new().unwrap();
        let q = queue(&dir);
        mv(&q, "/a", "/b");
        delete(&q, "/b");

        assert!(q.pending_for("/b").is_none());
        assert_eq!(method_at(&q, "/a"), Some(Method::Delete));
    }

    #[test]
    fn test_move_onto_pending_delete_becomes_post() {
        let dir = TempDir::new().unwrap();
        let q = queue(&dir);
        delete(&q, "/b");
        mv(&q, "/a", "/b");

        let dest = q.pending_for("/b").unwrap();
        assert_eq!(dest.method, Method::Post);
        assert_eq!(dest.moved_from.as_deref(), Some("/a"));
        assert_eq!(method_at(&q, "/a"), Some(Method::Delete));
    }

    #[test]
    fn test_copy_expands_to_tagged_put() {
        let dir = TempDir::new().unwrap();
        let q = queue(&dir);
        q.enqueue(Method::Copy, "/a", Some("/b"), EntryKind::File).unwrap();

        assert_eq!(q.len(), 1);
        let dest = q.pending_for("/b").unwrap();
        assert_eq!(dest.method, Method::Put);
        assert_eq!(dest.copied_from.as_deref(), Some("/a"));
    }

    #[test]
    fn test_copy_keeps_source_entry() {
        let dir = TempDir::new().unwrap();
        let q = queue(&dir);
        post(&q, "/a");
        q.enqueue(Method::Copy, "/a", Some("/b"), EntryKind::File).unwrap();

        assert_eq!(method_at(&q, "/a"), Some(Method::Post));
        assert_eq!(method_at(&q, "/b"), Some(Method::Put));
    }

    #[test]
    fn test_move_requires_destination() {
        let dir = TempDir::new().unwrap();
        let q = queue(&dir);
        assert!(q.enqueue(Method::Move, "/a", None, EntryKind::File).is_err());
    }

    #[test]
    fn test_list_for_parent() {
        let dir = TempDir::new().unwrap();
        let q = queue(&dir);
        put(&q, "/docs/a.txt");
        delete(&q, "/docs/b.txt");
        put(&q, "/other/c.txt");

        let listed = q.list_for_parent("/docs");
        assert_eq!(listed.len(), 2);
        assert_eq!(listed["a.txt"], Method::Put);
        assert_eq!(listed["b.txt"], Method::Delete);
    }

    #[test]
    fn test_next_due_respects_age_and_retries() {
        let dir = TempDir::new().unwrap();
        let q = queue(&dir);
        put(&q, "/a.txt");

        let now = Utc::now().timestamp_millis();
        // entry is younger than the cutoff
        assert!(q.next_due(now - 60_000, 3).is_none());
        // entry is due
        let due = q.next_due(now + 1, 3).unwrap();
        assert_eq!(due.path(), "/a.txt");
        // retry budget exhausted
        q.set_retries("/", "a.txt", 3).unwrap();
        assert!(q.next_due(now + 1, 3).is_none());
    }

    #[test]
    fn test_next_due_skips_in_progress() {
        let dir = TempDir::new().unwrap();
        let q = queue(&dir);
        put(&q, "/a.txt");
        let now = Utc::now().timestamp_millis();

        q.mark_in_progress("/a.txt");
        assert!(q.next_due(now + 1, 3).is_none());
        q.clear_in_progress("/a.txt");
        assert!(q.next_due(now + 1, 3).is_some());
    }

    #[test]
    fn test_rename_path_rewrites_subtree() {
        let dir = TempDir::new().unwrap();
        let q = queue(&dir);
        put(&q, "/docs/a.txt");
        put(&q, "/docs/sub/b.txt");
        put(&q, "/other/c.txt");

        q.rename_path("/docs", "/archive").unwrap();

        assert!(q.pending_for("/archive/a.txt").is_some());
        assert!(q.pending_for("/archive/sub/b.txt").is_some());
        assert!(q.pending_for("/other/c.txt").is_some());
        assert!(q.pending_for("/docs/a.txt").is_none());
    }

    #[test]
    fn test_remove_path_drops_subtree() {
        let dir = TempDir::new().unwrap();
        let q = queue(&dir);
        put(&q, "/docs/a.txt");
        put(&q, "/docs/sub/b.txt");
        put(&q, "/other/c.txt");

        q.remove_path("/docs").unwrap();

        assert_eq!(q.len(), 1);
        assert!(q.pending_for("/other/c.txt").is_some());
    }

    #[test]
    fn test_copy_path_duplicates_subtree() {
        let dir = TempDir::new().unwrap();
        let q = queue(&dir);
        put(&q, "/docs/a.txt");
        put(&q, "/docs/sub/b.txt");

        q.copy_path("/docs", "/backup").unwrap();

        assert_eq!(q.len(), 4);
        assert_eq!(method_at(&q, "/backup/a.txt"), Some(Method::Put));
        assert_eq!(method_at(&q, "/backup/sub/b.txt"), Some(Method::Put));
    }

    #[test]
    fn test_persistence_round_trip() {
        let dir = TempDir::new().unwrap();
        let store = dir.path().join("request-queue.json");
        {
            let q = RequestQueue::new(&store).unwrap();
            q.enqueue(Method::Put, "/a.txt", None, EntryKind::File).unwrap();
            q.enqueue(Method::Move, "/b", Some("/c"), EntryKind::File).unwrap();
        }

        let reloaded = RequestQueue::new(&store).unwrap();
        assert_eq!(reloaded.len(), 3);
        assert_eq!(
            reloaded.pending_for("/c").unwrap().moved_from.as_deref(),
            Some("/b")
        );
    }

    #[test]
    fn test_single_entry_per_key_invariant() {
        let dir = TempDir::new().unwrap();
        let q = queue(&dir);
        for _ in 0..3 {
            put(&q, "/a.txt");
            post(&q, "/a.txt");
        }
        assert_eq!(q.len(), 1);
    }
}
