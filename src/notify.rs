// src/notify.rs
// Message sink: timestamped log lines and progress updates for the presentation layer

use crate::download::DownloadId;
use crate::playlist::EntryId;
use chrono::{DateTime, Local};
use log::debug;
use serde::Serialize;
use tokio::sync::broadcast;

/// One line for the user-facing console
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Message {
    pub timestamp: DateTime<Local>,
    pub text: String,
    pub is_error: bool,
}

/// Progress of one download, keyed by the backend's download id
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressUpdate {
    pub download_id: DownloadId,
    pub entry_id: EntryId,
    pub received: u64,
    pub total: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    Message(Message),
    Progress(ProgressUpdate),
    /// A download reached a terminal state
    DownloadFinished {
        download_id: DownloadId,
        entry_id: EntryId,
        success: bool,
    },
}

/// Log target the message mirror is written to; the console renderer
/// already prints these lines, so the binary turns this target off
pub const MESSAGE_LOG_TARGET: &str = "playcache::messages";

/// Broadcasts notifications and mirrors messages at debug level on `MESSAGE_LOG_TARGET`
#[derive(Debug, Clone)]
pub struct Reporter {
    tx: broadcast::Sender<Notification>,
}

impl Reporter {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.tx.subscribe()
    }

    pub fn message(&self, text: impl Into<String>) {
        let text = text.into();
        debug!(target: MESSAGE_LOG_TARGET, "{}", text);
        self.send_message(text, false);
    }

    pub fn error(&self, text: impl Into<String>) {
        let text = text.into();
        debug!(target: MESSAGE_LOG_TARGET, "error: {}", text);
        self.send_message(text, true);
    }

    pub fn progress(&self, update: ProgressUpdate) {
        let _ = self.tx.send(Notification::Progress(update));
    }

    pub fn finished(&self, download_id: DownloadId, entry_id: EntryId, success: bool) {
        let _ = self.tx.send(Notification::DownloadFinished {
            download_id,
            entry_id,
            success,
        });
    }

    fn send_message(&self, text: String, is_error: bool) {
        // No subscribers is fine; the log already has it
        let _ = self.tx.send(Notification::Message(Message {
            timestamp: Local::now(),
            text,
            is_error,
        }));
    }
}
