// src/relocate.rs
// Move a finished download into the cache directory

use crate::error::AppError;
use crate::storage::{resolve_or_create, DirHandle, Filesystem};
use log::info;
use std::path::{Path, PathBuf};

/// Where a relocated file ended up
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Relocated {
    pub path: PathBuf,
    pub uri: String,
}

/// Resolve-or-create `root/cache_dir_name`, move `downloaded` into it as
/// `file_name` (replacing any previous copy) and return its local URI.
pub async fn relocate_to_cache(
    fs: &dyn Filesystem,
    downloaded: &Path,
    root: &DirHandle,
    cache_dir_name: &str,
    file_name: &str,
) -> Result<Relocated, AppError> {
    let cache = resolve_or_create(fs, &root.join(cache_dir_name)).await?;

    let path = fs
        .move_to(downloaded, &cache, file_name, true)
        .await
        .map_err(|e| {
            AppError::Relocation(format!(
                "moving {} into {}: {}",
                downloaded.display(),
                cache.full_path().display(),
                e
            ))
        })?;

    let uri = fs.to_uri(&path)?;
    info!("File moved to cache: {}", uri);

    Ok(Relocated { path, uri })
}
