// src/playlist.rs
// In-memory, append-only playlist of video entries

use crate::error::AppError;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

/// Title used when the URL has no usable file name
pub const UNTITLED_VIDEO: &str = "Untitled Video";

/// Sample videos appended by `--samples`
pub const SAMPLE_VIDEOS: [&str; 3] = [
    "https://example.com/sample1.mp4",
    "https://example.com/sample2.mp4",
    "https://example.com/sample3.mp4",
];

static UNSAFE_FILE_CHARS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^A-Za-z0-9._-]").expect("valid file name pattern"));

/// Stable identifier assigned to an entry when it is appended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntryId(u64);

impl EntryId {
    pub fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "entry-{}", self.0)
    }
}

/// One playlist record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoEntry {
    pub id: EntryId,
    /// Remote URL, or the local file URI once cached
    pub url: String,
    /// URL the entry was appended with; never rewritten
    pub source_url: String,
    pub title: String,
    pub cached: bool,
}

impl VideoEntry {
    /// File name this entry is stored under in the cache directory
    pub fn file_name(&self) -> Option<String> {
        cache_file_name(&self.url)
    }

    pub fn mark_cached(&mut self, uri: String) {
        self.url = uri;
        self.cached = true;
    }

    /// Forget the local copy and point back at the remote URL
    pub fn mark_uncached(&mut self) {
        self.url = self.source_url.clone();
        self.cached = false;
    }
}

#[derive(Debug, Clone, Default)]
pub struct Playlist {
    entries: Vec<VideoEntry>,
    next_id: u64,
}

impl Playlist {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a URL, returning the id of the new entry.
    ///
    /// Empty or whitespace-only input is rejected without touching the playlist.
    pub fn append(&mut self, url: &str) -> Result<EntryId, AppError> {
        let url = url.trim();
        if url.is_empty() {
            return Err(AppError::EmptyInput);
        }

        let id = EntryId(self.next_id);
        self.next_id += 1;

        self.entries.push(VideoEntry {
            id,
            url: url.to_string(),
            source_url: url.to_string(),
            title: derive_title(url),
            cached: false,
        });

        Ok(id)
    }

    /// Ordered snapshot of all entries
    pub fn list(&self) -> Vec<VideoEntry> {
        self.entries.clone()
    }

    pub fn entries(&self) -> &[VideoEntry] {
        &self.entries
    }

    pub fn get(&self, index: usize) -> Option<&VideoEntry> {
        self.entries.get(index)
    }

    pub fn index_of(&self, id: EntryId) -> Option<usize> {
        self.entries.iter().position(|e| e.id == id)
    }

    pub fn get_by_id_mut(&mut self, id: EntryId) -> Option<&mut VideoEntry> {
        self.entries.iter_mut().find(|e| e.id == id)
    }

    pub fn entries_mut(&mut self) -> impl Iterator<Item = &mut VideoEntry> {
        self.entries.iter_mut()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn cached_count(&self) -> usize {
        self.entries.iter().filter(|e| e.cached).count()
    }
}

/// Last path segment of a URL, ignoring any query string or fragment
pub fn last_path_segment(url: &str) -> &str {
    let end = url.find(|c| c == '?' || c == '#').unwrap_or(url.len());
    url[..end].rsplit('/').next().unwrap_or("")
}

/// Title shown for a URL: its file name without the extension
pub fn derive_title(url: &str) -> String {
    let segment = last_path_segment(url);
    let stem = match segment.rsplit_once('.') {
        Some((stem, _ext)) => stem,
        None => segment,
    };

    if stem.trim().is_empty() {
        UNTITLED_VIDEO.to_string()
    } else {
        stem.to_string()
    }
}

/// Name a URL's video is stored under in the cache directory.
///
/// Characters outside `[A-Za-z0-9._-]` become `_`, so the name maps onto a
/// file URI segment unchanged and mapping it again is a no-op.
pub fn cache_file_name(url: &str) -> Option<String> {
    let segment = last_path_segment(url);
    if segment.is_empty() || segment == "." || segment == ".." {
        return None;
    }
    Some(UNSAFE_FILE_CHARS.replace_all(segment, "_").into_owned())
}

/// Parse playlist file contents.
///
/// Accepts a JSON array of URL strings, or plain text with one URL per line
/// where blank lines and `#` comments are skipped.
pub fn parse_playlist(contents: &str) -> Result<Vec<String>, AppError> {
    let trimmed = contents.trim_start();
    if trimmed.starts_with('[') {
        let urls: Vec<String> = serde_json::from_str(trimmed)?;
        return Ok(urls);
    }

    Ok(contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect())
}

/// Read and parse a playlist file
pub fn read_playlist_file(path: &Path) -> Result<Vec<String>, AppError> {
    let contents = std::fs::read_to_string(path)?;
    parse_playlist(&contents)
}
