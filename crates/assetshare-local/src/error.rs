use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Name collision: {0}")]
    NameCollision(String),

    #[error("Access denied: {0}")]
    AccessDenied(String),

    #[error("Remote operation unsuccessful (status {status}): {message}")]
    Unsuccessful { status: u16, message: String },

    #[error("Cancelled: {0}")]
    Cancelled(String),

    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("Storage error: {0}")]
    Storage(String),
}

impl From<assetshare_api::Error> for Error {
    fn from(err: assetshare_api::Error) -> Self {
        match err {
            assetshare_api::Error::NotFound(msg) => Error::NotFound(msg),
            assetshare_api::Error::NameCollision(msg) => Error::NameCollision(msg),
            assetshare_api::Error::AccessDenied(msg) => Error::AccessDenied(msg),
            assetshare_api::Error::Api { status, message } => {
                Error::Unsuccessful { status, message }
            }
            assetshare_api::Error::Http(e) => Error::Unsuccessful {
                status: e.status().map(|s| s.as_u16()).unwrap_or(0),
                message: e.to_string(),
            },
            assetshare_api::Error::InvalidUrl(msg) => Error::InvalidPath(msg),
        }
    }
}

impl Error {
    /// HTTP-ish status carried into `syncerror` events.
    pub fn remote_status(&self) -> u16 {
        match self {
            Error::NotFound(_) => 404,
            Error::NameCollision(_) => 409,
            Error::AccessDenied(_) => 403,
            Error::Unsuccessful { status, .. } => *status,
            _ => 0,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
