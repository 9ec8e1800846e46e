// src/player.rs
// Media player capability and the sequential playback controller

use crate::error::AppError;
use crate::playlist::{Playlist, VideoEntry};
use async_trait::async_trait;
use log::{debug, info};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::{Child, Command};
use tokio::sync::Mutex;

const PLAYER_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// How a playback session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaEnd {
    /// The media played to its natural end
    Ended,
    /// Playback was stopped or the player exited abnormally
    Stopped,
}

/// Media player operations the playback controller needs
#[async_trait]
pub trait Player: Send + Sync {
    /// Set the source for the next `start`
    async fn set_source(&self, uri: &str) -> Result<(), AppError>;

    /// Begin playing the current source
    async fn start(&self) -> Result<(), AppError>;

    /// Resolve once the current media stops
    async fn wait_until_ended(&self) -> Result<MediaEnd, AppError>;

    /// Stop playback, if any
    async fn stop(&self) -> Result<(), AppError>;
}

/// Tracks the active playlist index and computes what plays next
#[derive(Debug, Default, Clone)]
pub struct PlaybackController {
    current: Option<usize>,
}

impl PlaybackController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current_index(&self) -> Option<usize> {
        self.current
    }

    /// Validate `index` for playback and make it the active entry.
    ///
    /// The active index is left untouched when the entry is missing or uncached.
    pub fn select(&mut self, playlist: &Playlist, index: usize) -> Result<VideoEntry, AppError> {
        let entry = playlist
            .get(index)
            .ok_or(AppError::InvalidIndex(index))?;

        if !entry.cached {
            return Err(AppError::NotCached(entry.title.clone()));
        }

        self.current = Some(index);
        Ok(entry.clone())
    }

    /// Index after the active one, wrapping to 0; `None` for an empty playlist
    pub fn next_index(&self, len: usize) -> Option<usize> {
        if len == 0 {
            return None;
        }
        self.current.map(|i| (i + 1) % len)
    }
}

/// `Player` that hands the URI to an external program, e.g. `mpv`.
///
/// The program exiting successfully counts as natural end-of-media.
pub struct CommandPlayer {
    program: String,
    args: Vec<String>,
    source: Mutex<Option<String>>,
    child: Mutex<Option<Child>>,
}

impl CommandPlayer {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            source: Mutex::new(None),
            child: Mutex::new(None),
        }
    }
}

#[async_trait]
impl Player for CommandPlayer {
    async fn set_source(&self, uri: &str) -> Result<(), AppError> {
        *self.source.lock().await = Some(uri.to_string());
        Ok(())
    }

    async fn start(&self) -> Result<(), AppError> {
        let source = self
            .source
            .lock()
            .await
            .clone()
            .ok_or_else(|| AppError::PlaybackStart("no source set".to_string()))?;

        // Only one media process at a time
        self.stop().await?;

        debug!("Launching {} {:?} {}", self.program, self.args, source);
        let child = Command::new(&self.program)
            .args(&self.args)
            .arg(&source)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| AppError::PlaybackStart(format!("{}: {}", self.program, e)))?;

        *self.child.lock().await = Some(child);
        Ok(())
    }

    async fn wait_until_ended(&self) -> Result<MediaEnd, AppError> {
        // Poll so `stop` can take the child while we wait
        loop {
            {
                let mut guard = self.child.lock().await;
                let Some(child) = guard.as_mut() else {
                    return Ok(MediaEnd::Stopped);
                };

                if let Some(status) = child.try_wait()? {
                    guard.take();
                    if status.success() {
                        return Ok(MediaEnd::Ended);
                    }
                    info!("Player exited with {}", status);
                    return Ok(MediaEnd::Stopped);
                }
            }
            tokio::time::sleep(PLAYER_POLL_INTERVAL).await;
        }
    }

    async fn stop(&self) -> Result<(), AppError> {
        if let Some(mut child) = self.child.lock().await.take() {
            if let Err(e) = child.kill().await {
                debug!("Player process already gone: {}", e);
            }
        }
        Ok(())
    }
}
