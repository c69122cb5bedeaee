//! End-to-end scenarios driving a share against a wiremock remote.

use assetshare_local::cache::queue_store_path;
use assetshare_local::{LocalCache, Method, RequestQueue, Share, ShareConfig, ShareEvent};
use assetshare_test_utils::mock_remote::{
    empty_remote, file_json, folder_json, host_port, mount_accept_upload, mount_delete,
    mount_download, mount_failure, mount_listing, mount_move,
};
use tempfile::TempDir;
use wiremock::MockServer;

fn config_for(server: &MockServer, dir: &TempDir) -> ShareConfig {
    let (host, port) = host_port(server);
    ShareConfig {
        host,
        port,
        path: "/api/assets".to_string(),
        local_path: dir.path().to_path_buf(),
        // every test wants fresh remote state
        content_cache_ttl: 0,
        cache_ttl: 0,
        // keep the background loop dormant; tests flush inline
        modified_threshold: 60_000,
        max_retries: 3,
        tick_interval: 3_600_000,
    }
}

async fn mutating_requests(server: &MockServer) -> Vec<(String, String)> {
    server
        .received_requests()
        .await
        .expect("request recording enabled")
        .into_iter()
        .filter(|r| !matches!(r.method.to_string().as_str(), "GET" | "HEAD"))
        .map(|r| (r.method.to_string(), r.url.path().to_string()))
        .collect()
}

fn drain_events(rx: &mut tokio::sync::broadcast::Receiver<ShareEvent>) -> Vec<ShareEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

#[tokio::test]
async fn create_then_delete_is_a_noop() {
    let server = empty_remote().await;
    let dir = TempDir::new().unwrap();
    let share = Share::connect(config_for(&server, &dir)).await.unwrap();
    let tree = share.tree();

    let mut file = tree.create_file("/a.txt").await.unwrap();
    file.close().await.unwrap();
    tree.delete("/a.txt").await.unwrap();

    assert_eq!(share.pending_requests(), 0);
    assert_eq!(share.flush().await.unwrap(), 0);
    assert!(!tree.exists("/a.txt").await.unwrap());
    assert!(mutating_requests(&server).await.is_empty());

    share.disconnect().await.unwrap();
}

#[tokio::test]
async fn write_behind_upload() {
    let server = empty_remote().await;
    let dir = TempDir::new().unwrap();
    mount_accept_upload(&server, "/x.bin").await;

    let share = Share::connect(config_for(&server, &dir)).await.unwrap();
    let tree = share.tree();
    let mut events = share.subscribe();

    let mut file = tree.create_file("/x.bin").await.unwrap();
    file.write(0, b"hello").await.unwrap();
    file.close().await.unwrap();
    assert_eq!(share.pending_requests(), 1);

    // the upload succeeds, then the listing reports the new remote state
    mount_listing(&server, "/x.bin", file_json("x.bin", 5, 777)).await;
    assert_eq!(share.flush().await.unwrap(), 1);
    assert_eq!(share.pending_requests(), 0);

    let uploads: Vec<_> = server
        .received_requests()
        .await
        .unwrap()
        .into_iter()
        .filter(|r| r.method.to_string() == "POST")
        .collect();
    assert_eq!(uploads.len(), 1);
    assert_eq!(uploads[0].url.path(), "/api/assets/x.bin");
    assert_eq!(uploads[0].body, b"hello");

    // the sidecar now mirrors the remote
    let cache = LocalCache::new(dir.path()).unwrap();
    let entry = cache.open("/x.bin").await.unwrap().unwrap();
    assert!(!entry.info.created_locally);
    assert_eq!(entry.info.downloaded_remote_last_modified, 777);

    assert!(drain_events(&mut events)
        .iter()
        .any(|e| matches!(e, ShareEvent::SyncDone { path, method: Method::Put } if path == "/x.bin")));

    share.disconnect().await.unwrap();
}

#[tokio::test]
async fn chained_rename_fuses_and_issues_one_move() {
    let server = empty_remote().await;
    let dir = TempDir::new().unwrap();
    mount_listing(&server, "/a", file_json("a", 5, 100)).await;
    mount_move(&server, "/a").await;

    let share = Share::connect(config_for(&server, &dir)).await.unwrap();
    let tree = share.tree();

    tree.rename("/a", "/b").await.unwrap();
    let put = share.pending_for("/b").unwrap();
    assert_eq!(put.method, Method::Put);
    assert_eq!(put.moved_from.as_deref(), Some("/a"));
    assert_eq!(share.pending_for("/a").unwrap().method, Method::Delete);

    tree.rename("/b", "/c").await.unwrap();
    assert!(share.pending_for("/b").is_none());
    let put = share.pending_for("/c").unwrap();
    assert_eq!(put.moved_from.as_deref(), Some("/a"));
    assert_eq!(
        share.pending_for("/a").unwrap().dest_path().as_deref(),
        Some("/c")
    );

    share.flush().await.unwrap();
    assert_eq!(share.pending_requests(), 0);

    // the two renames collapsed into a single MOVE of the original source
    let mutations = mutating_requests(&server).await;
    assert_eq!(mutations, vec![("MOVE".to_string(), "/api/assets/a".to_string())]);

    share.disconnect().await.unwrap();
}

#[tokio::test]
async fn concurrent_cold_reads_download_once() {
    let server = empty_remote().await;
    let dir = TempDir::new().unwrap();
    mount_listing(&server, "/big", file_json("big", 9, 100)).await;
    mount_download(&server, "/big", b"cold data").await;

    let share = Share::connect(config_for(&server, &dir)).await.unwrap();
    let tree = share.tree();

    let (first, second) = tokio::join!(
        async {
            let mut f = tree.open("/big").await.unwrap();
            f.read_to_end().await.unwrap()
        },
        async {
            let mut f = tree.open("/big").await.unwrap();
            f.read_to_end().await.unwrap()
        }
    );
    assert_eq!(first, b"cold data");
    assert_eq!(second, first);

    let requests = server.received_requests().await.unwrap();
    let heads = requests
        .iter()
        .filter(|r| r.method.to_string() == "HEAD")
        .count();
    let body_gets = requests
        .iter()
        .filter(|r| r.method.to_string() == "GET" && r.url.path() == "/api/assets/big")
        .count();
    assert_eq!(heads, 1);
    assert_eq!(body_gets, 1);

    let cache = LocalCache::new(dir.path()).unwrap();
    let entry = cache.open("/big").await.unwrap().unwrap();
    assert_eq!(entry.info.downloaded_remote_last_modified, 100);

    share.disconnect().await.unwrap();
}

#[tokio::test]
async fn out_of_band_edit_with_stale_remote_surfaces_conflict() {
    let server = empty_remote().await;
    let dir = TempDir::new().unwrap();
    mount_listing(&server, "/f", file_json("f", 2, 100)).await;
    mount_download(&server, "/f", b"v1").await;

    let share = Share::connect(config_for(&server, &dir)).await.unwrap();
    let tree = share.tree();
    let mut events = share.subscribe();

    let mut file = tree.open("/f").await.unwrap();
    assert_eq!(file.read_to_end().await.unwrap(), b"v1");

    // edit the cached copy out of band, then move the remote forward
    let cache = LocalCache::new(dir.path()).unwrap();
    cache.set_snapshot_modified("/f", 1).await.unwrap();
    tokio::fs::write(cache.file_path("/f"), b"local edit")
        .await
        .unwrap();
    server.reset().await;
    mount_listing(&server, "/f", file_json("f", 2, 200)).await;

    let mut file = tree.open("/f").await.unwrap();
    assert_eq!(file.read_to_end().await.unwrap(), b"local edit");
    assert!(drain_events(&mut events)
        .iter()
        .any(|e| matches!(e, ShareEvent::SyncConflict { path } if path == "/f")));

    // a save through the share queues the local version for upload
    mount_accept_upload(&server, "/f").await;
    let mut file = tree.open("/f").await.unwrap();
    file.write(0, b"local edit").await.unwrap();
    file.close().await.unwrap();
    assert_eq!(share.pending_for("/f").unwrap().method, Method::Post);

    share.flush().await.unwrap();
    let mutations = mutating_requests(&server).await;
    assert_eq!(mutations, vec![("PUT".to_string(), "/api/assets/f".to_string())]);

    share.disconnect().await.unwrap();
}

#[tokio::test]
async fn retry_budget_then_syncerror() {
    let server = empty_remote().await;
    let dir = TempDir::new().unwrap();
    mount_failure(&server, "/r.txt", 500).await;

    let mut config = config_for(&server, &dir);
    config.max_retries = 2;
    let share = Share::connect(config).await.unwrap();
    let tree = share.tree();
    let mut events = share.subscribe();

    let mut file = tree.create_file("/r.txt").await.unwrap();
    file.write(0, b"x").await.unwrap();
    file.close().await.unwrap();

    share.flush().await.unwrap();
    assert_eq!(share.pending_for("/r.txt").unwrap().retries, 1);

    share.flush().await.unwrap();
    assert_eq!(share.pending_requests(), 0);
    assert!(drain_events(&mut events).iter().any(|e| matches!(
        e,
        ShareEvent::SyncError { path, status: 500, .. } if path == "/r.txt"
    )));

    assert_eq!(share.flush().await.unwrap(), 0);

    share.disconnect().await.unwrap();
}

#[tokio::test]
async fn temp_names_never_reach_the_queue() {
    let server = empty_remote().await;
    let dir = TempDir::new().unwrap();
    let share = Share::connect(config_for(&server, &dir)).await.unwrap();
    let tree = share.tree();

    let mut file = tree.create_file("/.DS_Store").await.unwrap();
    file.write(0, b"junk").await.unwrap();
    file.close().await.unwrap();

    assert!(tree.exists("/.DS_Store").await.unwrap());
    assert_eq!(share.pending_requests(), 0);

    let mut file = tree.open("/.DS_Store").await.unwrap();
    assert_eq!(file.read_to_end().await.unwrap(), b"junk");

    tree.delete("/.DS_Store").await.unwrap();
    assert!(!tree.exists("/.DS_Store").await.unwrap());
    assert_eq!(share.pending_requests(), 0);
    assert!(mutating_requests(&server).await.is_empty());

    share.disconnect().await.unwrap();
}

#[tokio::test]
async fn young_requests_wait_for_the_coalescing_window() {
    let server = empty_remote().await;
    let dir = TempDir::new().unwrap();
    let share = Share::connect(config_for(&server, &dir)).await.unwrap();
    let tree = share.tree();

    let mut file = tree.create_file("/young.txt").await.unwrap();
    file.close().await.unwrap();

    // the enqueue woke the background loop, but the request is younger than
    // the window, so it must stay queued with no remote traffic
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    assert_eq!(share.pending_requests(), 1);
    assert!(mutating_requests(&server).await.is_empty());

    share.disconnect().await.unwrap();
}

#[tokio::test]
async fn listing_unions_remote_pending_and_temp() {
    let server = empty_remote().await;
    let dir = TempDir::new().unwrap();
    mount_listing(
        &server,
        "/",
        folder_json(
            "assets",
            100,
            vec![
                file_json("a.txt", 3, 90),
                file_json("c.txt", 4, 95),
                file_json("Thumbs.db", 1, 80),
            ],
        ),
    )
    .await;
    mount_listing(&server, "/c.txt", file_json("c.txt", 4, 95)).await;

    let share = Share::connect(config_for(&server, &dir)).await.unwrap();
    let tree = share.tree();
    let mut events = share.subscribe();

    // a pending local create, a pending folder, a pending delete, OS junk
    let mut file = tree.create_file("/b.txt").await.unwrap();
    file.close().await.unwrap();
    tree.create_directory("/newdir").await.unwrap();
    tree.delete("/c.txt").await.unwrap();
    let mut junk = tree.create_file("/.DS_Store").await.unwrap();
    junk.close().await.unwrap();

    let listed = tree.list("/").await.unwrap();
    let names: Vec<&str> = listed.iter().map(|e| e.name()).collect();

    assert!(names.contains(&"a.txt"));
    assert!(names.contains(&"b.txt"));
    assert!(names.contains(&"newdir"));
    assert!(names.contains(&".DS_Store"));
    // hidden: the remote temp name and the pending delete
    assert!(!names.contains(&"Thumbs.db"));
    assert!(!names.contains(&"c.txt"));

    let newdir = listed.iter().find(|e| e.name() == "newdir").unwrap();
    assert!(newdir.is_directory());

    assert!(drain_events(&mut events)
        .iter()
        .any(|e| matches!(e, ShareEvent::FolderList { parent, .. } if parent == "/")));

    share.disconnect().await.unwrap();
}

#[tokio::test]
async fn rename_of_local_create_uploads_at_destination_only() {
    let server = empty_remote().await;
    let dir = TempDir::new().unwrap();
    mount_accept_upload(&server, "/final.txt").await;

    let share = Share::connect(config_for(&server, &dir)).await.unwrap();
    let tree = share.tree();

    let mut file = tree.create_file("/draft.txt").await.unwrap();
    file.write(0, b"body").await.unwrap();
    file.close().await.unwrap();
    tree.rename("/draft.txt", "/final.txt").await.unwrap();

    assert_eq!(share.pending_requests(), 1);
    let put = share.pending_for("/final.txt").unwrap();
    assert_eq!(put.method, Method::Put);
    assert_eq!(put.moved_from, None);

    share.flush().await.unwrap();
    let mutations = mutating_requests(&server).await;
    assert_eq!(
        mutations,
        vec![("POST".to_string(), "/api/assets/final.txt".to_string())]
    );

    share.disconnect().await.unwrap();
}

#[tokio::test]
async fn delete_of_remote_file_drains_to_http_delete() {
    let server = empty_remote().await;
    let dir = TempDir::new().unwrap();
    mount_listing(&server, "/gone.txt", file_json("gone.txt", 3, 50)).await;
    mount_delete(&server, "/gone.txt").await;

    let share = Share::connect(config_for(&server, &dir)).await.unwrap();
    let tree = share.tree();

    tree.delete("/gone.txt").await.unwrap();
    assert!(!tree.exists("/gone.txt").await.unwrap());

    share.flush().await.unwrap();
    let mutations = mutating_requests(&server).await;
    assert_eq!(
        mutations,
        vec![("DELETE".to_string(), "/api/assets/gone.txt".to_string())]
    );

    share.disconnect().await.unwrap();
}

#[tokio::test]
async fn queue_document_lives_under_the_sidecar_root() {
    let server = empty_remote().await;
    let dir = TempDir::new().unwrap();
    let share = Share::connect(config_for(&server, &dir)).await.unwrap();
    let tree = share.tree();

    let mut file = tree.create_file("/persist.txt").await.unwrap();
    file.close().await.unwrap();
    share.disconnect().await.unwrap();
    drop(share);

    // the persisted document is readable on its own
    let queue = RequestQueue::new(queue_store_path(dir.path())).unwrap();
    assert_eq!(queue.pending_for("/persist.txt").unwrap().method, Method::Put);
}
