use thiserror::Error;

/// Errors produced by the store layer.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Reading or writing the snapshot file failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The snapshot could not be encoded or decoded.
    #[error("Snapshot JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, StoreError>;
