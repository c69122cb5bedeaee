use crate::error::{Error, Result};
use crate::models::Listing;
use crate::url::ShareUrl;
use bytes::Bytes;
use reqwest::{Client, Method, Response, StatusCode};
use tracing::debug;

/// HTTP client for the remote asset tree. All paths are share-relative,
/// forward-slash, starting with `/`.
#[derive(Clone)]
pub struct RemoteTreeClient {
    client: Client,
    url: ShareUrl,
}

impl RemoteTreeClient {
    pub fn new(url: ShareUrl) -> Self {
        Self {
            client: Client::new(),
            url,
        }
    }

    pub fn with_client(client: Client, url: ShareUrl) -> Self {
        Self { client, url }
    }

    pub fn url(&self) -> &ShareUrl {
        &self.url
    }

    /// Fetch the JSON listing of a path. Returns `None` when the remote does
    /// not have the path.
    pub async fn get_listing(&self, path: &str, depth: u32) -> Result<Option<Listing>> {
        let url = self.url.listing(path, depth);
        debug!(%url, "fetching listing");
        let response = self.client.get(&url).send().await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = self.check_status(response, path).await?;
        Ok(Some(response.json().await?))
    }

    /// Content length of a remote file, from a HEAD request.
    pub async fn head_length(&self, path: &str) -> Result<u64> {
        let url = self.url.resource(path);
        let response = self.client.head(&url).send().await?;
        let response = self.check_status(response, path).await?;

        Ok(response
            .headers()
            .get(reqwest::header::CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok())
            .unwrap_or(0))
    }

    /// Download the body of a remote file.
    pub async fn get_body(&self, path: &str) -> Result<Bytes> {
        let url = self.url.resource(path);
        debug!(%url, "downloading");
        let response = self.client.get(&url).send().await?;
        let response = self.check_status(response, path).await?;
        Ok(response.bytes().await?)
    }

    /// Create a remote file. An empty body performs the initial create.
    pub async fn create_file(&self, path: &str, body: Bytes) -> Result<()> {
        let url = self.url.resource(path);
        debug!(%url, len = body.len(), "creating file");
        let response = self.client
            .post(&url)
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .body(body)
            .send()
            .await?;
        self.check_status(response, path).await?;
        Ok(())
    }

    /// Create a remote folder: form POST of `name=<n>` to `<parent>/*`.
    pub async fn create_directory(&self, path: &str) -> Result<()> {
        let (parent, name) = split_path(path);
        let url = format!("{}/*", self.url.resource(parent).trim_end_matches('/'));
        debug!(%url, name, "creating directory");
        let response = self.client
            .post(&url)
            .form(&[("name", name)])
            .send()
            .await?;
        self.check_status(response, path).await?;
        Ok(())
    }

    /// Replace the body of an existing remote file.
    pub async fn update_file(&self, path: &str, body: Bytes) -> Result<()> {
        let url = self.url.resource(path);
        debug!(%url, len = body.len(), "updating file");
        let response = self.client.put(&url).body(body).send().await?;
        self.check_status(response, path).await?;
        Ok(())
    }

    /// Delete a remote file or folder.
    pub async fn delete(&self, path: &str) -> Result<()> {
        let url = self.url.resource(path);
        debug!(%url, "deleting");
        let response = self.client.delete(&url).send().await?;
        self.check_status(response, path).await?;
        Ok(())
    }

    /// Rename or move a remote file or folder.
    pub async fn move_to(&self, src: &str, dest: &str) -> Result<()> {
        let url = self.url.resource(src);
        debug!(%url, dest, "moving");
        let response = self.client
            .request(Method::from_bytes(b"MOVE").unwrap(), &url)
            .header("X-Destination", self.url.server_path(dest))
            .header("X-Depth", "infinity")
            .header("X-Overwrite", "F")
            .send()
            .await?;
        self.check_status(response, src).await?;
        Ok(())
    }

    async fn check_status(&self, response: Response, path: &str) -> Result<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let message = response
            .text()
            .await
            .ok()
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| path.to_string());

        match status {
            StatusCode::NOT_FOUND => Err(Error::NotFound(message)),
            StatusCode::CONFLICT => Err(Error::NameCollision(message)),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(Error::AccessDenied(message)),
            _ => Err(Error::Api {
                status: status.as_u16(),
                message,
            }),
        }
    }
}

fn split_path(path: &str) -> (&str, &str) {
    match path.rfind('/') {
        Some(0) => ("/", &path[1..]),
        Some(idx) => (&path[..idx], &path[idx + 1..]),
        None => ("/", path),
    }
}
