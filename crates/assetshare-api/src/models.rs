use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    File,
    Directory,
}

impl std::fmt::Display for EntryKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EntryKind::File => write!(f, "file"),
            EntryKind::Directory => write!(f, "directory"),
        }
    }
}

/// Metadata for a single remote file or folder. Folders report size 0.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RemoteEntry {
    pub name: String,
    pub kind: EntryKind,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub created: i64,
    #[serde(default)]
    pub last_modified: i64,
    #[serde(default)]
    pub read_only: bool,
}

impl RemoteEntry {
    pub fn is_directory(&self) -> bool {
        self.kind == EntryKind::Directory
    }
}

/// A listing fetched from `<path>.<depth>.json`: the entry itself plus its
/// children when the entry is a folder.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Listing {
    pub name: String,
    pub kind: EntryKind,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub created: i64,
    #[serde(default)]
    pub last_modified: i64,
    #[serde(default)]
    pub read_only: bool,
    #[serde(default)]
    pub entries: Vec<RemoteEntry>,
}

impl Listing {
    /// The listed node's own metadata, without children.
    pub fn to_entry(&self) -> RemoteEntry {
        RemoteEntry {
            name: self.name.clone(),
            kind: self.kind,
            size: self.size,
            created: self.created,
            last_modified: self.last_modified,
            read_only: self.read_only,
        }
    }
}
