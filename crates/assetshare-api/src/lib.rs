pub mod client;
pub mod error;
pub mod models;
pub mod url;

pub use client::RemoteTreeClient;
pub use error::{Error, Result};
pub use url::ShareUrl;

// Re-export common types
pub use models::{EntryKind, Listing, RemoteEntry};
