//! Application-wide error types.
//!
//! Library modules define specific error enums via `thiserror`; this module
//! aggregates them into one hierarchy. CLI/main uses `anyhow` for convenient
//! propagation at the boundary.

use std::path::PathBuf;

/// Application-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level application error.
///
/// Aggregates errors from all subsystems for unified handling.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// File I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Track info cache error
    #[error("Cache error: {0}")]
    Cache(#[from] crate::cache::CacheError),

    /// Audio playback error
    #[error("Playback error: {0}")]
    Player(#[from] crate::player::PlayerError),

    /// Filter expression error
    #[error("Filter error: {0}")]
    Filter(#[from] crate::library::filter::FilterError),

    /// Playlist load/save error
    #[error("Playlist error for {path}: {message}")]
    Playlist { path: PathBuf, message: String },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// File not found
    #[error("File not found: {0}")]
    NotFound(PathBuf),
}

impl Error {
    /// Create a playlist error.
    pub fn playlist(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::Playlist {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Create a config error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create a not found error.
    pub fn not_found(path: impl Into<PathBuf>) -> Self {
        Self::NotFound(path.into())
    }
}
