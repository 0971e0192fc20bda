//! Error types for geopersist stores

use thiserror::Error;

pub type Result<T> = std::result::Result<T, StoreError>;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SQL error: {0}")]
    Sql(#[from] rusqlite::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Tile I/O error: {0}")]
    TileIo(String),

    #[error("Codec error: {0}")]
    Codec(String),

    #[error("Coordinate transformation error: {0}")]
    Transform(String),

    #[error("Filter evaluation error: {0}")]
    Filter(String),

    #[error("Contract violation: {0}")]
    ContractViolation(String),

    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    #[error("Feature locked: {0}")]
    Locked(String),

    #[error("Resource exhausted: {0}")]
    ResourceExhausted(String),

    #[error("Not found: {0}")]
    NotFound(String),
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Config(err.to_string())
    }
}

impl StoreError {
    /// True for failures caused by the backend rather than by the caller.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            StoreError::Io(_)
                | StoreError::Sql(_)
                | StoreError::Image(_)
                | StoreError::Unavailable(_)
                | StoreError::TileIo(_)
                | StoreError::ResourceExhausted(_)
        )
    }
}
