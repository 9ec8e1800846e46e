// src/scanner.rs
// Re-derive cache status from the files present in the cache directory

use crate::error::AppError;
use crate::playlist::Playlist;
use crate::storage::{DirHandle, Filesystem};
use log::{debug, warn};
use std::collections::HashMap;
use std::path::PathBuf;

/// Outcome of a cache status scan
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanReport {
    pub files_found: usize,
    pub cached: usize,
    pub total: usize,
}

/// Files currently in the cache directory, by name
pub async fn list_cached_files(
    fs: &dyn Filesystem,
    cache: &DirHandle,
) -> Result<HashMap<String, PathBuf>, AppError> {
    let files = fs
        .list_files(cache)
        .await
        .map_err(|e| AppError::FileListing(e.to_string()))?;
    Ok(files.into_iter().map(|f| (f.name, f.path)).collect())
}

/// Set every entry's `cached` flag from the files present.
///
/// A present entry points at its local file URI; an absent one goes back to
/// its source URL.
pub fn apply_cache_status(
    fs: &dyn Filesystem,
    playlist: &mut Playlist,
    files: &HashMap<String, PathBuf>,
) -> ScanReport {
    for entry in playlist.entries_mut() {
        let found = entry.file_name().and_then(|name| files.get(&name));

        match found {
            Some(path) => match fs.to_uri(path) {
                Ok(uri) => entry.mark_cached(uri),
                Err(e) => {
                    warn!("{}: {}", entry.title, e);
                    entry.cached = true;
                }
            },
            None => entry.mark_uncached(),
        }
        debug!("{} ({}) cached={}", entry.title, entry.id, entry.cached);
    }

    ScanReport {
        files_found: files.len(),
        cached: playlist.cached_count(),
        total: playlist.len(),
    }
}

/// List the cache directory and update the playlist in one go
pub async fn scan(
    fs: &dyn Filesystem,
    cache: &DirHandle,
    playlist: &mut Playlist,
) -> Result<ScanReport, AppError> {
    let files = list_cached_files(fs, cache).await?;
    Ok(apply_cache_status(fs, playlist, &files))
}
