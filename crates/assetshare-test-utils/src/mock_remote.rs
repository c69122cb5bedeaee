//! wiremock helpers shared by the integration tests: a fake assets remote
//! speaking the listing JSON and the per-resource HTTP methods. Unmatched
//! requests answer 404, which reads as "absent" to the client.

use assetshare_api::ShareUrl;
use serde_json::{json, Value};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Remote root used by all helpers.
pub const REMOTE_ROOT: &str = "/api/assets";

/// A remote that has nothing: every request 404s.
pub async fn empty_remote() -> MockServer {
    MockServer::start().await
}

/// Host and port of a mock server, for building a `ShareConfig`.
pub fn host_port(server: &MockServer) -> (String, u16) {
    let url: ShareUrl = format!("{}{}", server.uri(), REMOTE_ROOT)
        .parse()
        .expect("mock server uri");
    (url.host, url.port)
}

pub fn file_json(name: &str, size: u64, last_modified: i64) -> Value {
    json!({
        "name": name,
        "kind": "file",
        "size": size,
        "created": last_modified,
        "lastModified": last_modified,
        "readOnly": false,
    })
}

pub fn folder_json(name: &str, last_modified: i64, entries: Vec<Value>) -> Value {
    json!({
        "name": name,
        "kind": "directory",
        "size": 0,
        "created": last_modified,
        "lastModified": last_modified,
        "readOnly": false,
        "entries": entries,
    })
}

/// Serve a listing document for a share path (`"/"` for the root).
pub async fn mount_listing(server: &MockServer, share_path: &str, body: Value) {
    let resource = if share_path == "/" {
        REMOTE_ROOT.to_string()
    } else {
        format!("{}{}", REMOTE_ROOT, share_path)
    };
    Mock::given(method("GET"))
        .and(path(format!("{}.1.json", resource)))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .mount(server)
        .await;
}

/// Serve a file body for HEAD (length) and GET (content).
pub async fn mount_download(server: &MockServer, share_path: &str, body: &[u8]) {
    let resource = format!("{}{}", REMOTE_ROOT, share_path);
    Mock::given(method("HEAD"))
        .and(path(resource.clone()))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-length", body.len().to_string().as_str()),
        )
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path(resource))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(body.to_vec()))
        .mount(server)
        .await;
}

/// Accept create (POST) and update (PUT) for a file.
pub async fn mount_accept_upload(server: &MockServer, share_path: &str) {
    let resource = format!("{}{}", REMOTE_ROOT, share_path);
    Mock::given(method("POST"))
        .and(path(resource.clone()))
        .respond_with(ResponseTemplate::new(201))
        .mount(server)
        .await;
    Mock::given(method("PUT"))
        .and(path(resource))
        .respond_with(ResponseTemplate::new(200))
        .mount(server)
        .await;
}

/// Accept DELETE for a resource.
pub async fn mount_delete(server: &MockServer, share_path: &str) {
    Mock::given(method("DELETE"))
        .and(path(format!("{}{}", REMOTE_ROOT, share_path)))
        .respond_with(ResponseTemplate::new(200))
        .mount(server)
        .await;
}

/// Accept MOVE for a resource.
pub async fn mount_move(server: &MockServer, share_path: &str) {
    Mock::given(method("MOVE"))
        .and(path(format!("{}{}", REMOTE_ROOT, share_path)))
        .respond_with(ResponseTemplate::new(201))
        .mount(server)
        .await;
}

/// Reject every attempt for a resource with the given status.
pub async fn mount_failure(server: &MockServer, share_path: &str, status: u16) {
    Mock::given(path(format!("{}{}", REMOTE_ROOT, share_path)))
        .respond_with(ResponseTemplate::new(status))
        .mount(server)
        .await;
}
