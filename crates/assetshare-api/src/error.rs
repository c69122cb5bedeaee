use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Invalid share URL: {0}")]
    InvalidUrl(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Name collision: {0}")]
    NameCollision(String),

    #[error("Access denied: {0}")]
    AccessDenied(String),

    #[error("Unexpected status {status}: {message}")]
    Api { status: u16, message: String },
}

pub type Result<T> = std::result::Result<T, Error>;
