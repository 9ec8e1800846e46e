// src/manager.rs
// Cache manager: owns the playlist, the directory handles and all in-flight downloads

use crate::config::Config;
use crate::download::{
    describe_progress, DownloadBackend, DownloadEvent, DownloadId, DownloadRequest, HttpDownloader,
};
use crate::error::AppError;
use crate::notify::{Notification, ProgressUpdate, Reporter};
use crate::player::{CommandPlayer, MediaEnd, PlaybackController, Player};
use crate::playlist::{cache_file_name, EntryId, Playlist, VideoEntry};
use crate::relocate::relocate_to_cache;
use crate::scanner::{self, ScanReport};
use crate::storage::{initialize_storage, CacheDirs, Filesystem, LocalFilesystem};
use log::{debug, warn};
use once_cell::sync::OnceCell;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;

/// How a finished download ended, when it did not fail
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadOutcome {
    /// Relocated into the cache; the entry now points at `uri`
    Cached { uri: String },
    Canceled,
}

/// A running download started by `CacheManager::cache`
#[derive(Debug)]
pub struct DownloadHandle {
    pub id: DownloadId,
    pub entry_id: EntryId,
    task: JoinHandle<Result<DownloadOutcome, AppError>>,
}

impl DownloadHandle {
    /// Wait for the download to reach a terminal state
    pub async fn wait(self) -> Result<DownloadOutcome, AppError> {
        self.task
            .await
            .map_err(|e| AppError::General(format!("Download task failed: {}", e)))?
    }
}

/// Result of clearing the cache directory
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClearReport {
    pub deleted: Vec<String>,
    /// (file name, error) for every file that could not be deleted
    pub failures: Vec<(String, String)>,
}

pub struct CacheManager {
    config: Config,
    fs: Arc<dyn Filesystem>,
    backend: Arc<dyn DownloadBackend>,
    player: Arc<dyn Player>,
    dirs: OnceCell<CacheDirs>,
    playlist: RwLock<Playlist>,
    /// At most one download per entry
    in_flight: Mutex<HashMap<EntryId, DownloadId>>,
    /// Serializes scans, relocations and clears on the cache directory
    cache_lock: Mutex<()>,
    playback: Mutex<PlaybackController>,
    reporter: Reporter,
}

impl CacheManager {
    pub fn new(
        config: Config,
        fs: Arc<dyn Filesystem>,
        backend: Arc<dyn DownloadBackend>,
        player: Arc<dyn Player>,
    ) -> Arc<Self> {
        let reporter = Reporter::new(config.message_capacity);
        Arc::new(Self {
            config,
            fs,
            backend,
            player,
            dirs: OnceCell::new(),
            playlist: RwLock::new(Playlist::new()),
            in_flight: Mutex::new(HashMap::new()),
            cache_lock: Mutex::new(()),
            playback: Mutex::new(PlaybackController::new()),
            reporter,
        })
    }

    /// Manager on the local disk, HTTP downloads and the configured player program
    pub fn with_defaults(config: Config) -> Arc<Self> {
        let player = CommandPlayer::new(config.player_command.clone(), config.player_args.clone());
        Self::new(
            config,
            Arc::new(LocalFilesystem::new()),
            Arc::new(HttpDownloader::new()),
            Arc::new(player),
        )
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn reporter(&self) -> &Reporter {
        &self.reporter
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.reporter.subscribe()
    }

    /// Directory handles, or `NotReady` before a successful `initialize`
    pub fn dirs(&self) -> Result<&CacheDirs, AppError> {
        self.dirs.get().ok_or(AppError::NotReady)
    }

    pub fn is_ready(&self) -> bool {
        self.dirs.get().is_some()
    }

    /// Resolve or create the working directories, then scan the cache.
    ///
    /// Idempotent: later calls return the handles from the first success.
    pub async fn initialize(&self) -> Result<CacheDirs, AppError> {
        if let Some(dirs) = self.dirs.get() {
            return Ok(dirs.clone());
        }

        self.reporter.message("Initializing filesystem...");
        let dirs = self.report(
            initialize_storage(
                self.fs.as_ref(),
                &self.config.root_dir,
                &self.config.cache_dir_name,
            )
            .await,
        )?;

        // A concurrent initialize may have won; keep whichever was stored first
        let _ = self.dirs.set(dirs);
        let dirs = self.dirs()?.clone();
        self.reporter.message(format!(
            "Cache directory ready: {}",
            dirs.cache.full_path().display()
        ));

        // Scan failures are already reported; storage itself is usable
        let _ = self.refresh_cache_status().await;
        Ok(dirs)
    }

    /// Append a URL to the playlist and rescan the cache
    pub async fn append(&self, url: &str) -> Result<EntryId, AppError> {
        let (id, title) = {
            let mut playlist = self.playlist.write().await;
            let id = self.report(playlist.append(url))?;
            let title = playlist
                .entries()
                .last()
                .map(|e| e.title.clone())
                .unwrap_or_default();
            (id, title)
        };

        self.reporter
            .message(format!("Added video to playlist: {}", title));

        if self.is_ready() {
            let _ = self.refresh_cache_status().await;
        }
        Ok(id)
    }

    /// Ordered snapshot of the playlist
    pub async fn list(&self) -> Vec<VideoEntry> {
        self.playlist.read().await.list()
    }

    pub async fn entry(&self, index: usize) -> Option<VideoEntry> {
        self.playlist.read().await.get(index).cloned()
    }

    pub async fn len(&self) -> usize {
        self.playlist.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.playlist.read().await.is_empty()
    }

    /// Re-derive every entry's cached flag from the cache directory
    pub async fn refresh_cache_status(&self) -> Result<ScanReport, AppError> {
        let dirs = self.report(self.dirs().cloned())?;
        self.reporter.message("Refreshing cache status...");

        let _guard = self.cache_lock.lock().await;
        let files = self.report(scanner::list_cached_files(self.fs.as_ref(), &dirs.cache).await)?;
        self.reporter
            .message(format!("Found {} files in cache", files.len()));

        let report = {
            let mut playlist = self.playlist.write().await;
            scanner::apply_cache_status(self.fs.as_ref(), &mut playlist, &files)
        };
        self.reporter.message("Cache status updated");
        Ok(report)
    }

    /// Start caching the entry at `index`.
    ///
    /// The download lands in the working root and is moved into the cache
    /// directory when it completes. A second call for an entry whose download
    /// is still running is rejected with `DownloadInProgress`.
    pub async fn cache(self: &Arc<Self>, index: usize) -> Result<DownloadHandle, AppError> {
        let dirs = self.report(self.dirs().cloned())?;
        let entry = self.report(self.entry(index).await.ok_or(AppError::InvalidIndex(index)))?;
        let file_name = self.report(cache_file_name(&entry.source_url).ok_or_else(|| {
            AppError::DownloadFailed {
                reason: format!("no file name in {}", entry.source_url),
            }
        }))?;

        let mut in_flight = self.in_flight.lock().await;
        if let Some(existing) = in_flight.get(&entry.id) {
            return self.report(Err(AppError::DownloadInProgress(format!(
                "{} ({})",
                entry.title, existing
            ))));
        }

        self.reporter
            .message(format!("Starting to cache video: {}", entry.title));

        let (listener, events) = mpsc::unbounded_channel();
        let request = DownloadRequest {
            url: entry.source_url.clone(),
            target_dir: dirs.root.full_path().to_path_buf(),
            // Unique per entry so two entries sharing a file name never collide mid-download
            file_name: format!("{}-{}", entry.id, file_name),
        };
        let id = self.report(self.backend.start(request, listener).await)?;
        in_flight.insert(entry.id, id.clone());
        drop(in_flight);

        let state = self
            .backend
            .state(&id)
            .map(|s| s.to_string())
            .unwrap_or_else(|| "UNKNOWN".to_string());
        self.reporter
            .message(format!("Download {} initial state: {}", id, state));

        let entry_id = entry.id;
        let manager = Arc::clone(self);
        let task_id = id.clone();
        let task = tokio::spawn(async move {
            manager
                .track_download(entry, file_name, task_id, events)
                .await
        });

        Ok(DownloadHandle { id, entry_id, task })
    }

    /// Cancel the running download of the entry at `index`
    pub async fn cancel(&self, index: usize) -> Result<DownloadId, AppError> {
        let entry = self.report(self.entry(index).await.ok_or(AppError::InvalidIndex(index)))?;
        let id = self.report(
            self.in_flight
                .lock()
                .await
                .get(&entry.id)
                .cloned()
                .ok_or_else(|| {
                    AppError::General(format!("No download in progress for {}", entry.title))
                }),
        )?;

        self.report(self.backend.cancel(&id))?;
        self.reporter
            .message(format!("Cancel requested for download {}", id));
        Ok(id)
    }

    /// Whether the entry has a download running
    pub async fn is_downloading(&self, entry_id: EntryId) -> bool {
        self.in_flight.lock().await.contains_key(&entry_id)
    }

    async fn track_download(
        &self,
        entry: VideoEntry,
        file_name: String,
        id: DownloadId,
        mut events: mpsc::UnboundedReceiver<DownloadEvent>,
    ) -> Result<DownloadOutcome, AppError> {
        let result = loop {
            let Some(event) = events.recv().await else {
                break Err(AppError::DownloadFailed {
                    reason: "download ended without a final state".to_string(),
                });
            };

            match event {
                DownloadEvent::Progress {
                    received, total, ..
                } => {
                    debug!(
                        "Download {} progress: {}",
                        id,
                        describe_progress(received, total)
                    );
                    self.reporter.progress(ProgressUpdate {
                        download_id: id.clone(),
                        entry_id: entry.id,
                        received,
                        total,
                    });
                }
                DownloadEvent::Paused { .. } => {
                    self.reporter
                        .message(format!("Download paused: {}", entry.title));
                }
                DownloadEvent::Canceled { .. } => {
                    self.reporter
                        .message(format!("Download canceled: {}", entry.title));
                    break Ok(DownloadOutcome::Canceled);
                }
                DownloadEvent::Completed { path, .. } => {
                    self.reporter
                        .message(format!("Download completed: {}", path.display()));
                    break self
                        .complete_download(&entry, &path, &file_name)
                        .await
                        .map(|uri| DownloadOutcome::Cached { uri });
                }
                DownloadEvent::Failed { reason, .. } => {
                    break Err(AppError::DownloadFailed { reason });
                }
            }
        };

        {
            let mut in_flight = self.in_flight.lock().await;
            if in_flight.get(&entry.id) == Some(&id) {
                in_flight.remove(&entry.id);
            }
        }

        let success = matches!(result, Ok(DownloadOutcome::Cached { .. }));
        self.reporter.finished(id, entry.id, success);
        self.report(result)
    }

    /// Relocate a finished download and point its entry at the local copy
    async fn complete_download(
        &self,
        entry: &VideoEntry,
        downloaded: &Path,
        file_name: &str,
    ) -> Result<String, AppError> {
        let dirs = self.dirs()?.clone();

        let _guard = self.cache_lock.lock().await;
        let relocated = match relocate_to_cache(
            self.fs.as_ref(),
            downloaded,
            &dirs.root,
            &self.config.cache_dir_name,
            file_name,
        )
        .await
        {
            Ok(relocated) => relocated,
            Err(e) => {
                // Whatever is left in the cache decides the status, not the old flags
                match scanner::list_cached_files(self.fs.as_ref(), &dirs.cache).await {
                    Ok(files) => {
                        let mut playlist = self.playlist.write().await;
                        scanner::apply_cache_status(self.fs.as_ref(), &mut playlist, &files);
                    }
                    Err(scan_err) => {
                        warn!("Rescan after failed relocation failed: {}", scan_err);
                        if let Some(target) = self.playlist.write().await.get_by_id_mut(entry.id) {
                            target.mark_uncached();
                        }
                    }
                }
                return Err(e);
            }
        };

        let mut playlist = self.playlist.write().await;
        match playlist.get_by_id_mut(entry.id) {
            Some(target) => {
                target.mark_cached(relocated.uri.clone());
                self.reporter
                    .message(format!("Successfully cached video: {}", entry.title));
            }
            None => warn!(
                "{} is no longer in the playlist; cached file left at {}",
                entry.id, relocated.uri
            ),
        }

        Ok(relocated.uri)
    }

    /// Play the cached entry at `index`
    pub async fn play(&self, index: usize) -> Result<VideoEntry, AppError> {
        let entry = {
            let playlist = self.playlist.read().await;
            let mut playback = self.playback.lock().await;
            self.report(playback.select(&playlist, index))?
        };

        self.reporter
            .message(format!("Playing cached video: {}", entry.title));
        self.report(self.player.set_source(&entry.url).await.map_err(into_playback_error))?;
        self.report(self.player.start().await.map_err(into_playback_error))?;
        Ok(entry)
    }

    /// Natural end-of-media: advance to the next entry, wrapping to the first.
    ///
    /// Returns `Ok(None)` when there is nothing to advance to.
    pub async fn on_media_ended(&self) -> Result<Option<VideoEntry>, AppError> {
        let len = self.playlist.read().await.len();
        let next = self.playback.lock().await.next_index(len);

        match next {
            Some(index) => self.play(index).await.map(Some),
            None => {
                debug!("End of media with nothing to advance to");
                Ok(None)
            }
        }
    }

    pub async fn current_index(&self) -> Option<usize> {
        self.playback.lock().await.current_index()
    }

    /// Play from `start`, chaining to the next entry on every natural end
    /// until playback is stopped or an entry cannot be played.
    pub async fn run_playback(&self, start: usize) -> Result<(), AppError> {
        self.play(start).await?;

        loop {
            match self.player.wait_until_ended().await? {
                MediaEnd::Ended => {
                    if self.on_media_ended().await?.is_none() {
                        break;
                    }
                }
                MediaEnd::Stopped => {
                    self.reporter.message("Playback stopped");
                    break;
                }
            }
        }

        Ok(())
    }

    /// Delete every file in the cache directory and mark all entries uncached
    pub async fn clear_cache(&self) -> Result<ClearReport, AppError> {
        let dirs = self.report(self.dirs().cloned())?;
        self.reporter.message("Clearing video cache...");

        let _guard = self.cache_lock.lock().await;
        let files = self.report(
            self.fs
                .list_files(&dirs.cache)
                .await
                .map_err(|e| AppError::FileListing(e.to_string())),
        )?;

        let mut report = ClearReport::default();
        if files.is_empty() {
            self.reporter.message("Cache is already empty");
        }

        for file in files {
            match self.fs.delete_file(&file.path).await {
                Ok(()) => {
                    self.reporter
                        .message(format!("Deleted file: {}", file.name));
                    report.deleted.push(file.name);
                }
                Err(e) => {
                    self.reporter
                        .error(format!("Failed to delete file {}: {}", file.name, e));
                    report.failures.push((file.name, e.to_string()));
                }
            }
        }

        {
            let mut playlist = self.playlist.write().await;
            for entry in playlist.entries_mut() {
                entry.mark_uncached();
            }
        }

        if !report.deleted.is_empty() && report.failures.is_empty() {
            self.reporter.message("All cache files deleted successfully");
        }
        Ok(report)
    }

    /// Cancel every running download and stop the player
    pub async fn shutdown(&self) {
        let running: Vec<DownloadId> = self.in_flight.lock().await.values().cloned().collect();
        for id in running {
            if let Err(e) = self.backend.cancel(&id) {
                debug!("Could not cancel {} on shutdown: {}", id, e);
            }
        }
        if let Err(e) = self.player.stop().await {
            warn!("Failed to stop player: {}", e);
        }
    }

    /// Send an error to the message sink and pass the result through
    fn report<T>(&self, result: Result<T, AppError>) -> Result<T, AppError> {
        if let Err(e) = &result {
            self.reporter.error(e.to_string());
        }
        result
    }
}

fn into_playback_error(e: AppError) -> AppError {
    match e {
        AppError::PlaybackStart(_) => e,
        other => AppError::PlaybackStart(other.to_string()),
    }
}
