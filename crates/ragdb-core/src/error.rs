use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Provider request failed: {0}")]
    Provider(String),

    #[error("Remote vector store error: {0}")]
    Remote(String),

    #[error("Timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("Lexical index error: {0}")]
    Lexical(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Store is closed")]
    Closed,

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Serde(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
