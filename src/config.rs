// src/config.rs
// Runtime configuration: JSON file, then environment, then command-line overrides

use crate::error::AppError;
use dirs_next as dirs;
use log::debug;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Name of the cache subdirectory created under the working root
pub const DEFAULT_CACHE_DIR_NAME: &str = "videoCache";

/// Environment variable overriding the working root directory
pub const ENV_ROOT: &str = "PLAYCACHE_ROOT";
/// Environment variable overriding the cache subdirectory name
pub const ENV_CACHE_DIR: &str = "PLAYCACHE_CACHE_DIR";
/// Environment variable overriding the player program
pub const ENV_PLAYER: &str = "PLAYCACHE_PLAYER";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Working "videos" root; downloads land here before relocation
    pub root_dir: PathBuf,
    /// Name of the cache subdirectory inside `root_dir`
    pub cache_dir_name: String,
    /// External player program used for playback
    pub player_command: String,
    /// Extra arguments passed to the player before the media URI
    pub player_args: Vec<String>,
    /// Capacity of the notification broadcast channel
    pub message_capacity: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            root_dir: default_root_dir(),
            cache_dir_name: DEFAULT_CACHE_DIR_NAME.to_string(),
            player_command: "mpv".to_string(),
            player_args: vec!["--really-quiet".to_string()],
            message_capacity: 256,
        }
    }
}

impl Config {
    /// Load the configuration file at `path`, or the default location when `None`.
    ///
    /// A missing file yields the defaults; a malformed one is an error.
    pub fn load(path: Option<&Path>) -> Result<Self, AppError> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => default_config_path(),
        };

        if !path.exists() {
            debug!("No config file at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        Self::from_file(&path)
    }

    /// Parse a JSON configuration file
    pub fn from_file(path: &Path) -> Result<Self, AppError> {
        let contents = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&contents)?;
        debug!("Loaded config from {:?}", path);
        Ok(config)
    }

    /// Apply `PLAYCACHE_*` environment overrides from the process environment
    pub fn apply_env(&mut self) {
        self.apply_env_with(|key| std::env::var(key).ok());
    }

    /// Apply environment overrides using a custom lookup
    pub fn apply_env_with<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(root) = lookup(ENV_ROOT).filter(|v| !v.trim().is_empty()) {
            self.root_dir = PathBuf::from(root);
        }
        if let Some(name) = lookup(ENV_CACHE_DIR).filter(|v| !v.trim().is_empty()) {
            self.cache_dir_name = name;
        }
        if let Some(player) = lookup(ENV_PLAYER).filter(|v| !v.trim().is_empty()) {
            self.player_command = player;
        }
    }

    /// Apply command-line overrides
    pub fn apply_overrides(&mut self, root_dir: Option<&str>, cache_dir_name: Option<&str>) {
        if let Some(root) = root_dir {
            self.root_dir = PathBuf::from(root);
        }
        if let Some(name) = cache_dir_name {
            self.cache_dir_name = name.to_string();
        }
    }

    /// Reject values that would place the cache outside the root
    pub fn validate(&self) -> Result<(), AppError> {
        let name = self.cache_dir_name.trim();
        if name.is_empty() {
            return Err(AppError::ConfigError(
                "cache directory name cannot be empty".to_string(),
            ));
        }
        if name == "." || name == ".." || name.contains('/') || name.contains('\\') {
            return Err(AppError::ConfigError(format!(
                "cache directory name must be a single path component: {}",
                name
            )));
        }
        if self.player_command.trim().is_empty() {
            return Err(AppError::ConfigError(
                "player command cannot be empty".to_string(),
            ));
        }
        if self.message_capacity == 0 {
            return Err(AppError::ConfigError(
                "message capacity must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Default working root: `<data dir>/playcache/videos`
pub fn default_root_dir() -> PathBuf {
    let mut path = dirs::data_local_dir().unwrap_or_else(|| PathBuf::from("."));
    path.push("playcache");
    path.push("videos");
    path
}

/// Default config file location: `<config dir>/playcache/config.json`
pub fn default_config_path() -> PathBuf {
    let mut path = dirs::config_dir().unwrap_or_else(|| PathBuf::from("."));
    path.push("playcache");
    path.push("config.json");
    path
}
