use std::path::PathBuf;

use thiserror::Error;

/// Library error type for slideshow operations.
#[derive(Debug, Error)]
pub enum Error {
    /// The configured slideshow directory is unset, missing, or not a directory.
    #[error("slideshow directory does not exist: {}", .0.display())]
    DirectoryMissing(PathBuf),

    /// The directory exists but holds no usable images.
    #[error("slideshow directory contains no images: {}", .0.display())]
    DirectoryEmpty(PathBuf),

    /// Metadata for a single file could not be read.
    #[error("failed to stat {}: {source}", path.display())]
    FileStatFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The file exists but is not a displayable image.
    #[error("not a valid image: {}", .0.display())]
    InvalidImage(PathBuf),

    /// Writing a key to the durable store failed.
    #[error("failed to persist '{key}': {reason}")]
    PersistenceWriteFailed { key: String, reason: String },

    /// Underlying IO error.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// JSON (state store) serialization error.
    #[error(transparent)]
    Json(#[from] serde_json::Error),

    /// Directory watcher error.
    #[error(transparent)]
    Watch(#[from] notify::Error),
}
