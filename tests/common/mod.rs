// tests/common/mod.rs
// Scripted download backend and player shared by the manager tests

#![allow(dead_code)]

use async_trait::async_trait;
use playcache::config::Config;
use playcache::download::{
    DownloadBackend, DownloadEvent, DownloadId, DownloadListener, DownloadRequest, DownloadState,
};
use playcache::error::AppError;
use playcache::notify::Notification;
use playcache::player::{MediaEnd, Player};
use playcache::storage::{DirHandle, FileEntry, Filesystem, LocalFilesystem};
use playcache::CacheManager;
use std::collections::{HashMap, VecDeque};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;

/// What the mock backend does when a download starts
#[derive(Debug, Clone)]
pub enum Script {
    /// Write these bytes to the target and complete
    Complete(Vec<u8>),
    /// Fail right away with this reason
    Fail(String),
    /// Stay in `Downloading` until canceled
    Hold,
    /// Report completion with a path that was never written
    CompleteMissing,
}

pub struct MockBackend {
    script: Mutex<Script>,
    counter: AtomicU64,
    pub requests: Mutex<Vec<DownloadRequest>>,
    sessions: Mutex<HashMap<DownloadId, (DownloadState, DownloadListener)>>,
}

impl MockBackend {
    pub fn new(script: Script) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script),
            counter: AtomicU64::new(0),
            requests: Mutex::new(Vec::new()),
            sessions: Mutex::new(HashMap::new()),
        })
    }

    pub fn set_script(&self, script: Script) {
        *self.script.lock().unwrap() = script;
    }

    pub fn started(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl DownloadBackend for MockBackend {
    async fn start(
        &self,
        request: DownloadRequest,
        listener: DownloadListener,
    ) -> Result<DownloadId, AppError> {
        let n = self.counter.fetch_add(1, Ordering::SeqCst);
        let id = DownloadId::new(format!("mock_{}", n));
        self.requests.lock().unwrap().push(request.clone());

        let script = self.script.lock().unwrap().clone();
        let state = match script {
            Script::Complete(bytes) => {
                let path = request.target_dir.join(&request.file_name);
                std::fs::write(&path, &bytes)?;
                let _ = listener.send(DownloadEvent::Progress {
                    id: id.clone(),
                    received: bytes.len() as u64,
                    total: Some(bytes.len() as u64),
                });
                let _ = listener.send(DownloadEvent::Completed {
                    id: id.clone(),
                    path,
                });
                DownloadState::Completed
            }
            Script::Fail(reason) => {
                let _ = listener.send(DownloadEvent::Failed {
                    id: id.clone(),
                    reason,
                });
                DownloadState::Failed
            }
            Script::Hold => DownloadState::Downloading,
            Script::CompleteMissing => {
                let _ = listener.send(DownloadEvent::Completed {
                    id: id.clone(),
                    path: request.target_dir.join(&request.file_name),
                });
                DownloadState::Completed
            }
        };

        self.sessions
            .lock()
            .unwrap()
            .insert(id.clone(), (state, listener));
        Ok(id)
    }

    fn state(&self, id: &DownloadId) -> Option<DownloadState> {
        self.sessions.lock().unwrap().get(id).map(|(state, _)| *state)
    }

    fn cancel(&self, id: &DownloadId) -> Result<(), AppError> {
        let mut sessions = self.sessions.lock().unwrap();
        match sessions.get_mut(id) {
            Some((state, listener)) if !state.is_terminal() => {
                *state = DownloadState::Canceled;
                let _ = listener.send(DownloadEvent::Canceled { id: id.clone() });
                Ok(())
            }
            _ => Err(AppError::General(format!("cannot cancel {}", id))),
        }
    }
}

#[derive(Default)]
pub struct MockPlayer {
    pub sources: Mutex<Vec<String>>,
    pub starts: AtomicU64,
    pub stops: AtomicU64,
    ends: Mutex<VecDeque<MediaEnd>>,
    fail_start: Mutex<bool>,
}

impl MockPlayer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Queue how the next media sessions end; `Stopped` once exhausted
    pub fn queue_ends(&self, ends: &[MediaEnd]) {
        self.ends.lock().unwrap().extend(ends.iter().copied());
    }

    pub fn fail_on_start(&self) {
        *self.fail_start.lock().unwrap() = true;
    }

    pub fn sources(&self) -> Vec<String> {
        self.sources.lock().unwrap().clone()
    }
}

#[async_trait]
impl Player for MockPlayer {
    async fn set_source(&self, uri: &str) -> Result<(), AppError> {
        self.sources.lock().unwrap().push(uri.to_string());
        Ok(())
    }

    async fn start(&self) -> Result<(), AppError> {
        if *self.fail_start.lock().unwrap() {
            return Err(AppError::General("codec not supported".to_string()));
        }
        self.starts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn wait_until_ended(&self) -> Result<MediaEnd, AppError> {
        Ok(self
            .ends
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(MediaEnd::Stopped))
    }

    async fn stop(&self) -> Result<(), AppError> {
        self.stops.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Local disk, except that deleting a file with the given name fails
pub struct UndeletableFilesystem {
    inner: LocalFilesystem,
    protected: String,
}

impl UndeletableFilesystem {
    pub fn new(protected: &str) -> Arc<Self> {
        Arc::new(Self {
            inner: LocalFilesystem::new(),
            protected: protected.to_string(),
        })
    }
}

#[async_trait]
impl Filesystem for UndeletableFilesystem {
    async fn resolve(&self, path: &Path) -> io::Result<DirHandle> {
        self.inner.resolve(path).await
    }

    async fn create_directory(&self, path: &Path) -> io::Result<DirHandle> {
        self.inner.create_directory(path).await
    }

    async fn list_files(&self, dir: &DirHandle) -> io::Result<Vec<FileEntry>> {
        self.inner.list_files(dir).await
    }

    async fn delete_file(&self, path: &Path) -> io::Result<()> {
        if path.file_name().and_then(|n| n.to_str()) == Some(self.protected.as_str()) {
            return Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                "file is locked",
            ));
        }
        self.inner.delete_file(path).await
    }

    async fn move_to(
        &self,
        source: &Path,
        target_dir: &DirHandle,
        name: &str,
        overwrite: bool,
    ) -> io::Result<PathBuf> {
        self.inner.move_to(source, target_dir, name, overwrite).await
    }

    fn to_uri(&self, path: &Path) -> Result<String, AppError> {
        self.inner.to_uri(path)
    }
}

pub struct Harness {
    pub manager: Arc<CacheManager>,
    pub backend: Arc<MockBackend>,
    pub player: Arc<MockPlayer>,
    pub messages: broadcast::Receiver<Notification>,
    pub temp: tempfile::TempDir,
}

impl Harness {
    pub fn new(script: Script) -> Self {
        Self::with_filesystem(script, Arc::new(LocalFilesystem::new()))
    }

    pub fn with_filesystem(script: Script, fs: Arc<dyn Filesystem>) -> Self {
        let temp = tempfile::tempdir().unwrap();
        let config = Config {
            root_dir: temp.path().join("videos"),
            ..Config::default()
        };

        let backend = MockBackend::new(script);
        let player = MockPlayer::new();
        let manager = CacheManager::new(
            config,
            fs,
            backend.clone(),
            player.clone(),
        );
        let messages = manager.subscribe();

        Self {
            manager,
            backend,
            player,
            messages,
            temp,
        }
    }

    pub fn root(&self) -> std::path::PathBuf {
        self.temp.path().join("videos")
    }

    pub fn cache_dir(&self) -> std::path::PathBuf {
        self.root().join("videoCache")
    }

    /// Put a file into the cache directory, creating it if needed
    pub fn seed_cache_file(&self, name: &str) {
        std::fs::create_dir_all(self.cache_dir()).unwrap();
        std::fs::write(self.cache_dir().join(name), b"cached video").unwrap();
    }

    /// Drain the message sink, returning (text, is_error) pairs
    pub fn drain_messages(&mut self) -> Vec<(String, bool)> {
        let mut out = Vec::new();
        loop {
            match self.messages.try_recv() {
                Ok(Notification::Message(message)) => out.push((message.text, message.is_error)),
                Ok(_) | Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                Err(_) => break,
            }
        }
        out
    }
}

pub fn file_count(dir: &Path) -> usize {
    std::fs::read_dir(dir)
        .map(|entries| {
            entries
                .filter_map(Result::ok)
                .filter(|e| e.path().is_file())
                .count()
        })
        .unwrap_or(0)
}
