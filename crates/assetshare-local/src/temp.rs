use crate::error::{Error, Result};
use crate::tree::{AssetTree, TreeEntry};
use async_trait::async_trait;
use path_slash::PathBufExt;
use std::path::PathBuf;
use tokio::fs;

/// Name patterns of OS-generated hidden, lock and metadata files. These
/// never reach the remote; the overlay routes them to a local shadow tree.
const TEMP_PATTERNS: &[&str] = &[
    "._*",
    ".DS_Store",
    ".metadata_never_index",
    ".metadata_never_index_unless_rootfs",
    ".ql_disablethumbnails",
    ".ql_disablecache",
    ".hidden",
    ".Spotlight-V100",
    ".TemporaryItems",
    ".Trashes",
    "desktop.ini",
    "Thumbs.db",
    "~lock.*#",
];

/// Matches path components against the temp-file pattern list.
#[derive(Debug, Clone, Copy, Default)]
pub struct TempFileClassifier;

impl TempFileClassifier {
    pub fn is_temp_name(name: &str) -> bool {
        TEMP_PATTERNS
            .iter()
            .any(|pattern| wildcard_match(name, pattern))
    }

    /// A path is temp when any of its components matches a pattern.
    pub fn is_temp_path(path: &str) -> bool {
        path.split('/')
            .filter(|c| !c.is_empty())
            .any(Self::is_temp_name)
    }
}

/// Glob-lite: `*` matches any run of characters, everything else is
/// literal.
fn wildcard_match(name: &str, pattern: &str) -> bool {
    let segments: Vec<&str> = pattern.split('*').collect();
    if segments.len() == 1 {
        return name == pattern;
    }

    let mut rest = name;
    let last = segments.len() - 1;
    for (i, segment) in segments.iter().enumerate() {
        if i == 0 {
            match rest.strip_prefix(segment) {
                Some(r) => rest = r,
                None => return false,
            }
        } else if i == last {
            return rest.ends_with(segment);
        } else if !segment.is_empty() {
            match rest.find(segment) {
                Some(idx) => rest = &rest[idx + segment.len()..],
                None => return false,
            }
        }
    }
    true
}

/// A plain local filesystem tree rooted at a directory. Serves as the temp
/// shadow tree and as the local peer in cross-tree renames.
pub struct FsTree {
    root: PathBuf,
}

impl FsTree {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    fn local_path(&self, path: &str) -> PathBuf {
        self.root
            .join(PathBuf::from_slash(path.trim_start_matches('/')))
    }
}

#[async_trait]
impl AssetTree for FsTree {
    async fn exists(&self, path: &str) -> Result<bool> {
        Ok(fs::try_exists(self.local_path(path)).await.unwrap_or(false))
    }

    async fn entry(&self, path: &str) -> Result<Option<TreeEntry>> {
        match fs::metadata(self.local_path(path)).await {
            Ok(meta) => Ok(Some(TreeEntry::from_metadata(path, &meta))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn list(&self, parent: &str) -> Result<Vec<TreeEntry>> {
        let dir = self.local_path(parent);
        let mut entries = Vec::new();
        let mut read_dir = match fs::read_dir(&dir).await {
            Ok(rd) => rd,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(entries),
            Err(e) => return Err(e.into()),
        };
        while let Some(item) = read_dir.next_entry().await? {
            let name = item.file_name().to_string_lossy().to_string();
            let meta = item.metadata().await?;
            entries.push(TreeEntry::from_metadata(
                crate::path::join_path(parent, &name),
                &meta,
            ));
        }
        entries.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(entries)
    }

    async fn create_file(&self, path: &str) -> Result<()> {
        let local = self.local_path(path);
        if let Some(parent) = local.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::File::create(&local).await?;
        Ok(())
    }

    async fn create_directory(&self, path: &str) -> Result<()> {
        fs::create_dir_all(self.local_path(path)).await?;
        Ok(())
    }

    async fn read_file(&self, path: &str) -> Result<Vec<u8>> {
        match fs::read(self.local_path(path)).await {
            Ok(data) => Ok(data),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(Error::NotFound(path.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn write_file(&self, path: &str, data: &[u8]) -> Result<()> {
        let local = self.local_path(path);
        if let Some(parent) = local.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(&local, data).await?;
        Ok(())
    }

    async fn delete(&self, path: &str) -> Result<()> {
        let local = self.local_path(path);
        let meta = match fs::metadata(&local).await {
            Ok(meta) => meta,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::NotFound(path.to_string()))
            }
            Err(e) => return Err(e.into()),
        };
        if meta.is_dir() {
            fs::remove_dir_all(&local).await?;
        } else {
            fs::remove_file(&local).await?;
        }
        Ok(())
    }

    async fn rename(&self, from: &str, to: &str) -> Result<()> {
        let dest = self.local_path(to);
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::rename(self.local_path(from), dest).await?;
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        Ok(())
    }
}
