// src/lib.rs
// Playlist video cache: download, relocate and play back cached videos

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub mod cli;
pub mod config;
pub mod download;
pub mod error;
pub mod manager;
pub mod notify;
pub mod player;
pub mod playlist;
pub mod relocate;
pub mod scanner;
pub mod storage;

pub use config::Config;
pub use error::AppError;
pub use manager::{CacheManager, ClearReport, DownloadHandle, DownloadOutcome};
pub use notify::{Message, Notification};
pub use playlist::{EntryId, Playlist, VideoEntry};
