//! Daemon-wide configuration: a single `DaemonSettings` value loaded once at
//! process start from a TOML file and passed by value into the session
//! supervisor's constructor.

#![forbid(unsafe_code)]
#![deny(
    warnings,
    dead_code,
    unused,
    unused_imports,
    unused_must_use,
    unreachable_pub,
    clippy::all,
    clippy::pedantic,
    clippy::cargo,
    clippy::nursery,
    rustdoc::broken_intra_doc_links,
    rustdoc::bare_urls,
    missing_docs
)]
#![allow(
    clippy::module_name_repetitions,
    unexpected_cfgs,
    clippy::multiple_crate_versions
)]

pub mod error;

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

pub use error::{ConfigError, Result};

fn default_extensions() -> Vec<String> {
    Vec::new()
}

fn default_stats_interval_secs() -> u64 {
    5
}

fn default_torrent_updates_interval_secs() -> u64 {
    1
}

fn default_mediainfo_extensions() -> BTreeSet<String> {
    ["mkv", "mp4", "avi"].into_iter().map(str::to_string).collect()
}

const fn default_mediainfo_file_min_size() -> u64 {
    10 * 1024 * 1024
}

const fn default_mediainfo_file_wanted_size() -> u64 {
    2 * 1024 * 1024
}

fn default_session_params_path() -> PathBuf {
    PathBuf::from("session_params.json")
}

fn default_database_path() -> PathBuf {
    PathBuf::from("torrentd.db")
}

const fn default_shutdown_save_chunk_size() -> usize {
    1000
}

/// Process-wide daemon configuration.
///
/// Every field has a default, so a missing or empty configuration file still
/// produces a usable value.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonSettings {
    /// Merged into the engine's settings pack at construction time.
    pub engine_settings: serde_json::Value,
    /// Override of the default extension trio (`ut_metadata`, `ut_pex`, `smart_ban`).
    /// Empty means "use the default trio".
    #[serde(default = "default_extensions")]
    pub extensions: Vec<String>,
    /// Interval between `post_dht_stats` requests. `0` disables the timer.
    #[serde(default = "default_stats_interval_secs")]
    pub dht_stats_interval_secs: u64,
    /// Interval between `post_session_stats` requests. `0` disables the timer.
    #[serde(default = "default_stats_interval_secs")]
    pub session_stats_interval_secs: u64,
    /// Interval between `post_torrent_updates` requests. `0` disables the timer.
    #[serde(default = "default_torrent_updates_interval_secs")]
    pub torrent_updates_interval_secs: u64,
    /// Daemon-wide switch gating media-info prefetch setup.
    pub mediainfo_enabled: bool,
    /// Lower-cased file extensions eligible for media-info prefetch.
    #[serde(default = "default_mediainfo_extensions")]
    pub mediainfo_extensions: BTreeSet<String>,
    /// Minimum file size, in bytes, considered for media-info prefetch.
    #[serde(default = "default_mediainfo_file_min_size")]
    pub mediainfo_file_min_size: u64,
    /// Bytes from the start of an eligible file to prioritize for prefetch.
    #[serde(default = "default_mediainfo_file_wanted_size")]
    pub mediainfo_file_wanted_size: u64,
    /// On-disk location of the persisted session parameters file.
    #[serde(default = "default_session_params_path")]
    pub session_params_path: PathBuf,
    /// On-disk location of the SQLite persistence store.
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,
    /// Chunk size used when saving resume data during shutdown.
    #[serde(default = "default_shutdown_save_chunk_size")]
    pub shutdown_save_chunk_size: usize,
}

impl Default for DaemonSettings {
    fn default() -> Self {
        Self {
            engine_settings: serde_json::Value::Object(serde_json::Map::new()),
            extensions: default_extensions(),
            dht_stats_interval_secs: default_stats_interval_secs(),
            session_stats_interval_secs: default_stats_interval_secs(),
            torrent_updates_interval_secs: default_torrent_updates_interval_secs(),
            mediainfo_enabled: false,
            mediainfo_extensions: default_mediainfo_extensions(),
            mediainfo_file_min_size: default_mediainfo_file_min_size(),
            mediainfo_file_wanted_size: default_mediainfo_file_wanted_size(),
            session_params_path: default_session_params_path(),
            database_path: default_database_path(),
            shutdown_save_chunk_size: default_shutdown_save_chunk_size(),
        }
    }
}

impl DaemonSettings {
    /// Loads settings from a TOML file on disk.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Read`] if the file cannot be read, or
    /// [`ConfigError::Parse`] if its contents are not valid TOML.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_settings_enable_every_timer() {
        let settings = DaemonSettings::default();
        assert!(settings.dht_stats_interval_secs > 0);
        assert!(settings.session_stats_interval_secs > 0);
        assert!(settings.torrent_updates_interval_secs > 0);
        assert_eq!(settings.shutdown_save_chunk_size, 1000);
    }

    #[test]
    fn load_missing_file_is_a_read_error() {
        let err = DaemonSettings::load("/nonexistent/torrentd.toml").unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn load_parses_partial_overrides_with_remaining_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("torrentd.toml");
        std::fs::write(&path, "mediainfo_enabled = true\ndht_stats_interval_secs = 0\n").unwrap();

        let settings = DaemonSettings::load(&path).unwrap();
        assert!(settings.mediainfo_enabled);
        assert_eq!(settings.dht_stats_interval_secs, 0);
        assert_eq!(settings.shutdown_save_chunk_size, 1000);
    }

    #[test]
    fn load_rejects_malformed_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("torrentd.toml");
        std::fs::write(&path, "not valid = [toml").unwrap();
        let err = DaemonSettings::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }
}
