// src/download.rs
// Download capability: request/event types, the backend trait and an HTTP backend

use crate::error::AppError;
use async_trait::async_trait;
use futures_util::StreamExt;
use humansize::{format_size, BINARY};
use log::{debug, error, info, warn};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::io::AsyncWriteExt;
use tokio::sync::{broadcast, mpsc};

/// Opaque id issued by a backend for one download session
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DownloadId(String);

impl DownloadId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DownloadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Current state of a download session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DownloadState {
    Queued,
    Downloading,
    Paused,
    Completed,
    Failed,
    Canceled,
}

impl DownloadState {
    /// No further events follow a terminal state
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Canceled)
    }
}

impl fmt::Display for DownloadState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Queued => "QUEUED",
            Self::Downloading => "DOWNLOADING",
            Self::Paused => "PAUSED",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
            Self::Canceled => "CANCELED",
        };
        f.write_str(s)
    }
}

/// What to download and where to put it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadRequest {
    pub url: String,
    pub target_dir: PathBuf,
    pub file_name: String,
}

/// Events delivered to a download's listener
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadEvent {
    Progress {
        id: DownloadId,
        received: u64,
        total: Option<u64>,
    },
    Paused {
        id: DownloadId,
    },
    Canceled {
        id: DownloadId,
    },
    Completed {
        id: DownloadId,
        path: PathBuf,
    },
    Failed {
        id: DownloadId,
        reason: String,
    },
}

impl DownloadEvent {
    pub fn id(&self) -> &DownloadId {
        match self {
            Self::Progress { id, .. }
            | Self::Paused { id }
            | Self::Canceled { id }
            | Self::Completed { id, .. }
            | Self::Failed { id, .. } => id,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Canceled { .. } | Self::Completed { .. } | Self::Failed { .. }
        )
    }
}

/// Listener half handed to the backend when a download starts
pub type DownloadListener = mpsc::UnboundedSender<DownloadEvent>;

/// Download operations the cache needs from the platform
#[async_trait]
pub trait DownloadBackend: Send + Sync {
    /// Start a download; events for it are sent to `listener`
    async fn start(
        &self,
        request: DownloadRequest,
        listener: DownloadListener,
    ) -> Result<DownloadId, AppError>;

    /// Current state, or `None` for an unknown id
    fn state(&self, id: &DownloadId) -> Option<DownloadState>;

    /// Cancel a running download; it ends with a `Canceled` event
    fn cancel(&self, id: &DownloadId) -> Result<(), AppError>;
}

/// Percentage of `total` received, when the total is known
pub fn progress_percentage(received: u64, total: Option<u64>) -> Option<u8> {
    match total {
        Some(total) if total > 0 => {
            let pct = (received as f64 / total as f64 * 100.0).min(100.0);
            Some(pct as u8)
        }
        _ => None,
    }
}

/// Human-readable progress, e.g. `42% (4.2 MiB / 10 MiB)` or `unknown (4.2 MiB)`
pub fn describe_progress(received: u64, total: Option<u64>) -> String {
    match (progress_percentage(received, total), total) {
        (Some(pct), Some(total)) => format!(
            "{}% ({} / {})",
            pct,
            format_size(received, BINARY),
            format_size(total, BINARY)
        ),
        _ => format!("unknown ({})", format_size(received, BINARY)),
    }
}

/// Generate a unique download ID
pub fn generate_download_id() -> DownloadId {
    use rand::Rng;
    let timestamp = chrono::Utc::now().timestamp_millis();
    let random = rand::thread_rng().gen::<u32>();
    DownloadId(format!("dl_{}_{}", timestamp, random))
}

/// Terminal downloads whose final state `state()` still reports
pub const FINISHED_SESSIONS_KEPT: usize = 32;

struct Session {
    state: DownloadState,
    cancel_token: broadcast::Sender<()>,
}

/// Running sessions, plus the final state of the most recent finished ones.
///
/// A session leaves `live` at its terminal event; only the last
/// `FINISHED_SESSIONS_KEPT` final states are remembered.
#[derive(Default)]
struct SessionTable {
    live: HashMap<DownloadId, Session>,
    finished: VecDeque<(DownloadId, DownloadState)>,
}

impl SessionTable {
    fn state(&self, id: &DownloadId) -> Option<DownloadState> {
        self.live.get(id).map(|s| s.state).or_else(|| {
            self.finished
                .iter()
                .find(|(finished_id, _)| finished_id == id)
                .map(|(_, state)| *state)
        })
    }

    fn set_state(&mut self, id: &DownloadId, state: DownloadState) {
        if !state.is_terminal() {
            if let Some(session) = self.live.get_mut(id) {
                session.state = state;
            }
            return;
        }

        if self.live.remove(id).is_some() {
            self.finished.push_back((id.clone(), state));
            while self.finished.len() > FINISHED_SESSIONS_KEPT {
                self.finished.pop_front();
            }
        }
    }
}

type Sessions = Arc<Mutex<SessionTable>>;

/// `DownloadBackend` that streams the body of an HTTP GET to disk
#[derive(Clone)]
pub struct HttpDownloader {
    client: Client,
    sessions: Sessions,
}

impl Default for HttpDownloader {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpDownloader {
    pub fn new() -> Self {
        Self::with_client(Client::new())
    }

    pub fn with_client(client: Client) -> Self {
        Self {
            client,
            sessions: Arc::new(Mutex::new(SessionTable::default())),
        }
    }
}

#[async_trait]
impl DownloadBackend for HttpDownloader {
    async fn start(
        &self,
        request: DownloadRequest,
        listener: DownloadListener,
    ) -> Result<DownloadId, AppError> {
        let id = generate_download_id();
        let (cancel_tx, cancel_rx) = broadcast::channel(1);

        {
            let mut sessions = self.sessions.lock().unwrap();
            sessions.live.insert(
                id.clone(),
                Session {
                    state: DownloadState::Queued,
                    cancel_token: cancel_tx,
                },
            );
        }

        info!("Download {} started for {}", id, request.url);

        let client = self.client.clone();
        let sessions = Arc::clone(&self.sessions);
        let task_id = id.clone();
        tokio::spawn(async move {
            execute_download(client, request, task_id, sessions, listener, cancel_rx).await;
        });

        Ok(id)
    }

    fn state(&self, id: &DownloadId) -> Option<DownloadState> {
        self.sessions.lock().unwrap().state(id)
    }

    fn cancel(&self, id: &DownloadId) -> Result<(), AppError> {
        let sessions = self.sessions.lock().unwrap();
        if let Some(session) = sessions.live.get(id) {
            let _ = session.cancel_token.send(());
            return Ok(());
        }
        match sessions.state(id) {
            Some(state) => Err(AppError::General(format!(
                "Download {} already {}",
                id, state
            ))),
            None => Err(AppError::General(format!("Unknown download {}", id))),
        }
    }
}

fn set_state(sessions: &Sessions, id: &DownloadId, state: DownloadState) {
    sessions.lock().unwrap().set_state(id, state);
}

/// Run one transfer to completion, failure or cancellation
async fn execute_download(
    client: Client,
    request: DownloadRequest,
    id: DownloadId,
    sessions: Sessions,
    listener: DownloadListener,
    mut cancel_rx: broadcast::Receiver<()>,
) {
    let target = request.target_dir.join(&request.file_name);

    let outcome = tokio::select! {
        result = transfer(&client, &request.url, &target, &id, &sessions, &listener) => Some(result),
        _ = cancel_rx.recv() => None,
    };

    let event = match outcome {
        Some(Ok(())) => {
            debug!("Download {} completed: {:?}", id, target);
            set_state(&sessions, &id, DownloadState::Completed);
            DownloadEvent::Completed {
                id: id.clone(),
                path: target,
            }
        }
        Some(Err(e)) => {
            error!("Download {} failed: {}", id, e);
            remove_partial(&target).await;
            set_state(&sessions, &id, DownloadState::Failed);
            DownloadEvent::Failed {
                id: id.clone(),
                reason: e.to_string(),
            }
        }
        None => {
            debug!("Download {} cancelled", id);
            remove_partial(&target).await;
            set_state(&sessions, &id, DownloadState::Canceled);
            DownloadEvent::Canceled { id: id.clone() }
        }
    };

    if listener.send(event).is_err() {
        warn!("Listener for download {} went away before the final event", id);
    }
}

async fn transfer(
    client: &Client,
    url: &str,
    target: &Path,
    id: &DownloadId,
    sessions: &Sessions,
    listener: &DownloadListener,
) -> Result<(), AppError> {
    let response = client.get(url).send().await?.error_for_status()?;
    let total = response.content_length();

    set_state(sessions, id, DownloadState::Downloading);

    let mut file = tokio::fs::File::create(target).await?;
    let mut stream = response.bytes_stream();
    let mut received = 0u64;

    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        file.write_all(&chunk).await?;
        received += chunk.len() as u64;

        let _ = listener.send(DownloadEvent::Progress {
            id: id.clone(),
            received,
            total,
        });
    }

    file.flush().await?;
    Ok(())
}

async fn remove_partial(target: &Path) {
    if let Err(e) = tokio::fs::remove_file(target).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!("Could not remove partial download {:?}: {}", target, e);
        }
    }
}
