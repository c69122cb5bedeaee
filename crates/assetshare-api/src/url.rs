use crate::error::{Error, Result};
use std::str::FromStr;
use url::Url;

/// Address of a remote share: host, port and the repository root path that
/// every share-relative path is appended to (e.g. `/api/assets`).
#[derive(Debug, Clone, PartialEq)]
pub struct ShareUrl {
    pub host: String,
    pub port: u16,
    pub root: String,
}

impl ShareUrl {
    pub fn new(host: impl Into<String>, port: u16, root: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port,
            root: normalize_root(&root.into()),
        }
    }

    /// `http://host:port`
    pub fn base(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }

    /// Absolute URL of a share-relative resource path.
    pub fn resource(&self, path: &str) -> String {
        if path == "/" {
            format!("{}{}", self.base(), self.root)
        } else {
            format!("{}{}{}", self.base(), self.root, path)
        }
    }

    /// Absolute URL of the JSON listing for a resource at the given depth.
    pub fn listing(&self, path: &str, depth: u32) -> String {
        format!("{}.{}.json", self.resource(path), depth)
    }

    /// Server-side destination path for a MOVE, relative to the server root.
    pub fn server_path(&self, path: &str) -> String {
        if path == "/" {
            self.root.clone()
        } else {
            format!("{}{}", self.root, path)
        }
    }
}

impl std::fmt::Display for ShareUrl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}{}", self.base(), self.root)
    }
}

impl FromStr for ShareUrl {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let url = Url::parse(s).map_err(|e| Error::InvalidUrl(e.to_string()))?;
        if url.scheme() != "http" {
            return Err(Error::InvalidUrl(format!(
                "unsupported scheme: {}",
                url.scheme()
            )));
        }
        let host = url
            .host_str()
            .ok_or_else(|| Error::InvalidUrl("missing host".into()))?
            .to_string();
        let port = url.port().unwrap_or(80);
        Ok(Self::new(host, port, url.path()))
    }
}

fn normalize_root(root: &str) -> String {
    let trimmed = root.trim_end_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{}", trimmed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resource_urls() {
        let url = ShareUrl::new("localhost", 4502, "/api/assets");
        assert_eq!(url.base(), "http://localhost:4502");
        assert_eq!(
            url.resource("/docs/a.txt"),
            "http://localhost:4502/api/assets/docs/a.txt"
        );
        assert_eq!(url.resource("/"), "http://localhost:4502/api/assets");
    }

    #[test]
    fn test_listing_url() {
        let url = ShareUrl::new("localhost", 4502, "/api/assets");
        assert_eq!(
            url.listing("/docs", 1),
            "http://localhost:4502/api/assets/docs.1.json"
        );
        assert_eq!(url.listing("/", 2), "http://localhost:4502/api/assets.2.json");
    }

    #[test]
    fn test_server_path() {
        let url = ShareUrl::new("localhost", 4502, "/api/assets");
        assert_eq!(url.server_path("/docs/b.txt"), "/api/assets/docs/b.txt");
        assert_eq!(url.server_path("/"), "/api/assets");
    }

    #[test]
    fn test_root_normalization() {
        assert_eq!(ShareUrl::new("h", 80, "api/assets/").root, "/api/assets");
        assert_eq!(ShareUrl::new("h", 80, "/").root, "");
    }

    #[test]
    fn test_from_str() {
        let url = ShareUrl::from_str("http://server:4502/content/dam").unwrap();
        assert_eq!(url.host, "server");
        assert_eq!(url.port, 4502);
        assert_eq!(url.root, "/content/dam");

        let default_port = ShareUrl::from_str("http://server/api/assets").unwrap();
        assert_eq!(default_port.port, 80);

        assert!(ShareUrl::from_str("ftp://server/x").is_err());
        assert!(ShareUrl::from_str("not a url").is_err());
    }

    #[test]
    fn test_display() {
        let url = ShareUrl::new("localhost", 4502, "/api/assets");
        assert_eq!(url.to_string(), "http://localhost:4502/api/assets");
    }
}
