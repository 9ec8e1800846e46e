// src/error.rs

use reqwest::Error as ReqwestError;
use serde_json::Error as SerdeError;
use std::io;
use thiserror::Error;

/// Custom error types for the application
#[derive(Error, Debug)]
pub enum AppError {
    /// A working directory could not be resolved or created
    #[error("Failed to resolve directory {path}: {reason}")]
    DirectoryResolution { path: String, reason: String },

    /// The cache directory could not be listed
    #[error("Failed to list cache files: {0}")]
    FileListing(String),

    /// The download backend reported a failure
    #[error("Download failed: {reason}")]
    DownloadFailed { reason: String },

    /// A downloaded file could not be moved into the cache directory
    #[error("Relocation error: {0}")]
    Relocation(String),

    /// A local path could not be turned into a URI
    #[error("URI conversion error: {0}")]
    UriConversion(String),

    /// A playlist index outside the playlist
    #[error("Invalid video index: {0}")]
    InvalidIndex(usize),

    /// Empty or whitespace-only input
    #[error("Please enter a valid video URL")]
    EmptyInput,

    /// The player refused to start
    #[error("Failed to play video: {0}")]
    PlaybackStart(String),

    /// Playback was requested for an entry that is not cached
    #[error("Video is not cached: {0}")]
    NotCached(String),

    /// Storage was never initialized (or initialization failed)
    #[error("Cache directory not initialized")]
    NotReady,

    /// A download for the same playlist entry is still running
    #[error("Download already in progress: {0}")]
    DownloadInProgress(String),

    /// Invalid configuration values
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// I/O related errors
    #[error("I/O error: {0}")]
    IoError(#[from] io::Error),

    /// HTTP client errors
    #[error("HTTP error: {0}")]
    HttpError(#[from] ReqwestError),

    /// JSON parsing errors
    #[error("JSON parsing error: {0}")]
    JsonError(#[from] SerdeError),

    /// General application errors
    #[error("Application error: {0}")]
    General(String),
}

impl AppError {
    /// Build a `DirectoryResolution` error from a path and the underlying cause
    pub fn directory(path: impl AsRef<std::path::Path>, reason: impl ToString) -> Self {
        AppError::DirectoryResolution {
            path: path.as_ref().display().to_string(),
            reason: reason.to_string(),
        }
    }
}

/// Convert a string error to AppError::General
impl From<String> for AppError {
    fn from(error: String) -> Self {
        AppError::General(error)
    }
}

/// Convert a &str error to AppError::General
impl From<&str> for AppError {
    fn from(error: &str) -> Self {
        AppError::General(error.to_string())
    }
}
