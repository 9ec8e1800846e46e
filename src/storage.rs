// src/storage.rs
// Filesystem capability and the resolver for the working/cache directories

use crate::error::AppError;
use async_trait::async_trait;
use log::{debug, info, warn};
use std::io;
use std::path::{Path, PathBuf};

/// Handle to a resolved directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirHandle {
    path: PathBuf,
}

impl DirHandle {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn full_path(&self) -> &Path {
        &self.path
    }

    pub fn join(&self, name: &str) -> PathBuf {
        self.path.join(name)
    }
}

/// A regular file found while listing a directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    pub name: String,
    pub path: PathBuf,
}

/// Filesystem operations the cache needs from the platform
#[async_trait]
pub trait Filesystem: Send + Sync {
    /// Resolve an existing directory. `NotFound` means it does not exist.
    async fn resolve(&self, path: &Path) -> io::Result<DirHandle>;

    /// Create a directory (and missing parents)
    async fn create_directory(&self, path: &Path) -> io::Result<DirHandle>;

    /// List the regular files directly inside `dir`, sorted by name
    async fn list_files(&self, dir: &DirHandle) -> io::Result<Vec<FileEntry>>;

    async fn delete_file(&self, path: &Path) -> io::Result<()>;

    /// Move `source` into `target_dir` under `name`, returning the new path
    async fn move_to(
        &self,
        source: &Path,
        target_dir: &DirHandle,
        name: &str,
        overwrite: bool,
    ) -> io::Result<PathBuf>;

    fn to_uri(&self, path: &Path) -> Result<String, AppError>;
}

/// `Filesystem` backed by the local disk through `tokio::fs`
#[derive(Debug, Default, Clone)]
pub struct LocalFilesystem;

impl LocalFilesystem {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Filesystem for LocalFilesystem {
    async fn resolve(&self, path: &Path) -> io::Result<DirHandle> {
        let metadata = tokio::fs::metadata(path).await?;
        if !metadata.is_dir() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("{} is not a directory", path.display()),
            ));
        }
        let canonical = tokio::fs::canonicalize(path).await?;
        Ok(DirHandle::new(canonical))
    }

    async fn create_directory(&self, path: &Path) -> io::Result<DirHandle> {
        tokio::fs::create_dir_all(path).await?;
        let canonical = tokio::fs::canonicalize(path).await?;
        Ok(DirHandle::new(canonical))
    }

    async fn list_files(&self, dir: &DirHandle) -> io::Result<Vec<FileEntry>> {
        let mut reader = tokio::fs::read_dir(dir.full_path()).await?;
        let mut files = Vec::new();

        while let Some(entry) = reader.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }
            files.push(FileEntry {
                name: entry.file_name().to_string_lossy().to_string(),
                path: entry.path(),
            });
        }

        files.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(files)
    }

    async fn delete_file(&self, path: &Path) -> io::Result<()> {
        tokio::fs::remove_file(path).await
    }

    async fn move_to(
        &self,
        source: &Path,
        target_dir: &DirHandle,
        name: &str,
        overwrite: bool,
    ) -> io::Result<PathBuf> {
        let target = target_dir.join(name);

        if target == source {
            return Ok(target);
        }

        if !overwrite && tokio::fs::try_exists(&target).await? {
            return Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                format!("{} already exists", target.display()),
            ));
        }

        // rename replaces an existing target in one step; the old copy
        // survives any failure
        if let Err(rename_err) = tokio::fs::rename(source, &target).await {
            if !tokio::fs::try_exists(source).await.unwrap_or(false) {
                return Err(rename_err);
            }

            // rename cannot cross filesystems; fall back to copy + delete
            debug!(
                "rename {:?} -> {:?} failed ({}), copying instead",
                source, target, rename_err
            );
            copy_then_rename(source, &target).await?;
            if let Err(e) = tokio::fs::remove_file(source).await {
                warn!("Copied {:?} but could not remove the original: {}", source, e);
            }
        }

        Ok(target)
    }

    fn to_uri(&self, path: &Path) -> Result<String, AppError> {
        url::Url::from_file_path(path)
            .map(|uri| uri.to_string())
            .map_err(|_| AppError::UriConversion(format!("{} is not an absolute path", path.display())))
    }
}

/// Copy `source` next to `target` under a hidden temporary name, then rename
/// it over `target`.
///
/// `target` is either left untouched or fully replaced; the temporary file is
/// removed when any step fails.
pub async fn copy_then_rename(source: &Path, target: &Path) -> io::Result<()> {
    let name = target
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let temp = target.with_file_name(format!(".{}.{}.tmp", name, rand::random::<u32>()));

    let result = match tokio::fs::copy(source, &temp).await {
        Ok(_) => tokio::fs::rename(&temp, target).await,
        Err(e) => Err(e),
    };

    if let Err(e) = result {
        if let Err(cleanup) = tokio::fs::remove_file(&temp).await {
            if cleanup.kind() != io::ErrorKind::NotFound {
                warn!("Could not remove temporary copy {:?}: {}", temp, cleanup);
            }
        }
        return Err(e);
    }

    Ok(())
}

/// The two working directories: the download root and the cache inside it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheDirs {
    pub root: DirHandle,
    pub cache: DirHandle,
}

/// Resolve `path`, creating it only when it does not exist.
///
/// Any other resolution failure (permissions, not a directory) is returned
/// as `DirectoryResolution` instead of being papered over by a create.
pub async fn resolve_or_create(fs: &dyn Filesystem, path: &Path) -> Result<DirHandle, AppError> {
    match fs.resolve(path).await {
        Ok(handle) => {
            debug!("Directory already exists: {}", handle.full_path().display());
            Ok(handle)
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            let handle = fs
                .create_directory(path)
                .await
                .map_err(|e| AppError::directory(path, e))?;
            info!("Directory created: {}", handle.full_path().display());
            Ok(handle)
        }
        Err(e) => Err(AppError::directory(path, e)),
    }
}

/// Resolve (or create) the working root and its cache subdirectory
pub async fn initialize_storage(
    fs: &dyn Filesystem,
    root: &Path,
    cache_dir_name: &str,
) -> Result<CacheDirs, AppError> {
    let root = resolve_or_create(fs, root).await?;
    let cache = resolve_or_create(fs, &root.join(cache_dir_name)).await?;
    Ok(CacheDirs { root, cache })
}
