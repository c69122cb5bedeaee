use crate::error::{Error, Result};
use crate::events::ShareEvent;
use crate::path::{name_of, parent_of};
use crate::queue::{Method, QueuedRequest};
use crate::share::ShareState;
use assetshare_api::EntryKind;
use bytes::Bytes;
use chrono::Utc;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, warn};

/// Background loop draining the request queue against the remote. One per
/// share; wakes on enqueue notifications or on the tick interval.
pub(crate) async fn run(state: Arc<ShareState>, mut shutdown: watch::Receiver<bool>) {
    let tick = Duration::from_millis(state.config.tick_interval.max(10));
    debug!("processor started");
    loop {
        tokio::select! {
            _ = state.notify.notified() => {}
            _ = tokio::time::sleep(tick) => {}
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
        if *shutdown.borrow() {
            break;
        }
        if let Err(e) = drain(&state).await {
            warn!(error = %e, "drain pass failed");
        }
    }
    debug!("processor stopped");
}

/// One background drain pass. Requests younger than `modified_threshold`
/// stay queued so in-flight edits can settle.
pub(crate) async fn drain(state: &ShareState) -> Result<usize> {
    let cutoff = Utc::now().timestamp_millis() - state.config.modified_threshold as i64;
    drain_with_cutoff(state, cutoff).await
}

/// Process everything queued right now, coalescing window ignored.
pub(crate) async fn flush(state: &ShareState) -> Result<usize> {
    drain_with_cutoff(state, Utc::now().timestamp_millis()).await
}

/// Process every due request once; a request that fails is not retried
/// until a later pass. Passes are serialized per share.
async fn drain_with_cutoff(state: &ShareState, cutoff: i64) -> Result<usize> {
    let _guard = state.drain_lock.lock().await;
    let mut attempted: HashSet<String> = HashSet::new();
    let mut processed = 0;

    while let Some(request) = state.queue.next_due(cutoff, state.config.max_retries) {
        let path = request.path();
        state.queue.mark_in_progress(&path);
        let succeeded = process_one(state, &request).await;
        if succeeded {
            state.queue.clear_in_progress(&path);
        } else {
            // stays marked for the rest of this pass
            attempted.insert(path);
        }
        processed += 1;
    }

    for path in attempted {
        state.queue.clear_in_progress(&path);
    }
    Ok(processed)
}

/// Execute one request. Errors never propagate to callers: failures retry
/// until the budget is spent, then surface as a `syncerror` event and the
/// request is dropped.
async fn process_one(state: &ShareState, request: &QueuedRequest) -> bool {
    let path = request.path();
    debug!(%path, method = %request.method, retries = request.retries, "processing");

    let result = match request.method {
        Method::Put => upload(state, request, true).await,
        Method::Post => upload(state, request, false).await,
        Method::Delete => delete(state, request).await,
        // enqueue decomposes these; a stored one means a corrupt document
        Method::Move | Method::Copy => Err(Error::Storage(format!(
            "unexpected stored {} for {}",
            request.method, path
        ))),
    };

    match result {
        Ok(()) => {
            let _ = state.queue.remove(&request.parent, &request.name);
            state.invalidate(&path);
            state.events.emit(ShareEvent::SyncDone {
                path,
                method: request.method,
            });
            true
        }
        Err(e) => {
            let retries = request.retries + 1;
            warn!(%path, method = %request.method, retries, error = %e, "request failed");
            if retries >= state.config.max_retries {
                let _ = state.queue.remove(&request.parent, &request.name);
                state.events.emit(ShareEvent::SyncError {
                    path,
                    method: request.method,
                    status: e.remote_status(),
                });
            } else {
                let _ = state.queue.set_retries(&request.parent, &request.name, retries);
            }
            false
        }
    }
}

async fn upload(state: &ShareState, request: &QueuedRequest, create: bool) -> Result<()> {
    let path = request.path();

    // a still-intact move pair with an unmodified destination becomes one
    // remote MOVE instead of an upload plus a delete
    if create {
        if let Some(origin) = &request.moved_from {
            let unchanged = request.kind == EntryKind::Directory
                || !state.cache.is_modified(&path).await.unwrap_or(true);
            if pair_intact(state, origin, &path) && unchanged {
                state.client.move_to(origin, &path).await?;
                let _ = state.queue.remove(parent_of(origin), name_of(origin));
                state.invalidate(origin);
                refresh_synced(state, &path).await;
                return Ok(());
            }
        }
    }

    if request.kind == EntryKind::Directory {
        return state
            .client
            .create_directory(&path)
            .await
            .map_err(Error::from);
    }

    let bytes = match state.cache.read_bytes(&path).await {
        Ok(bytes) => bytes,
        Err(Error::NotFound(_)) => {
            // no local copy: a moved or copied file that was never cached
            let origin = request
                .moved_from
                .clone()
                .or_else(|| request.copied_from.clone())
                .ok_or_else(|| Error::NotFound(path.clone()))?;
            state.client.get_body(&origin).await?.to_vec()
        }
        Err(e) => return Err(e),
    };
    let body = Bytes::from(bytes);

    if create {
        match state.client.create_file(&path, body.clone()).await {
            Ok(()) => {}
            Err(assetshare_api::Error::NameCollision(_)) => {
                state.client.update_file(&path, body).await?;
            }
            Err(e) => return Err(e.into()),
        }
    } else {
        match state.client.update_file(&path, body.clone()).await {
            Ok(()) => {}
            Err(assetshare_api::Error::NotFound(_)) => {
                state.client.create_file(&path, body).await?;
            }
            Err(e) => return Err(e.into()),
        }
    }

    refresh_synced(state, &path).await;
    Ok(())
}

async fn delete(state: &ShareState, request: &QueuedRequest) -> Result<()> {
    let path = request.path();

    // source half of a move pair: run the MOVE here when it comes due first
    if let Some(dest) = request.dest_path() {
        if let Some(put_half) = state.queue.pending_for(&dest) {
            let unchanged = put_half.kind == EntryKind::Directory
                || !state.cache.is_modified(&dest).await.unwrap_or(true);
            if put_half.method == Method::Put
                && put_half.moved_from.as_deref() == Some(path.as_str())
                && unchanged
            {
                state.client.move_to(&path, &dest).await?;
                let _ = state.queue.remove(&put_half.parent, &put_half.name);
                state.invalidate(&dest);
                refresh_synced(state, &dest).await;
                return Ok(());
            }
        }
    }

    match state.client.delete(&path).await {
        Ok(()) => {}
        // someone beat us to it; the goal state holds
        Err(assetshare_api::Error::NotFound(_)) => {}
        Err(e) => return Err(e.into()),
    }
    let _ = state.cache.discard(&path).await;
    Ok(())
}

fn pair_intact(state: &ShareState, origin: &str, dest: &str) -> bool {
    state
        .queue
        .pending_for(origin)
        .map(|e| e.method == Method::Delete && e.dest_path().as_deref() == Some(dest))
        .unwrap_or(false)
}

/// After a successful upload or move, record the remote's new modification
/// time so the next refresh does not re-download.
async fn refresh_synced(state: &ShareState, path: &str) {
    let last_modified = match state.client.get_listing(path, 1).await {
        Ok(Some(listing)) => listing.last_modified,
        _ => Utc::now().timestamp_millis(),
    };
    if let Err(e) = state.cache.mark_synced(path, last_modified).await {
        warn!(path, error = %e, "sidecar not refreshed after sync");
    }
}
