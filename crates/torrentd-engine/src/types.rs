//! Wire-level types exchanged with the torrent engine.

use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

/// Dual v1/v2 identity of a torrent.
///
/// Equality, hashing, and the `Display` form all key off the same canonical
/// value: the v1 hash when present, otherwise the v2 hash. Keeping all three
/// derived from one value is what lets this type serve as a `HashMap` key
/// and as the persistence layer's primary key without the two disagreeing.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InfoHash {
    /// BitTorrent v1 SHA-1 info hash, hex-encoded, when present.
    pub v1: Option<String>,
    /// BitTorrent v2 SHA-256 info hash, hex-encoded, when present.
    pub v2: Option<String>,
}

impl InfoHash {
    #[must_use]
    /// Build an info hash from a v1 hex digest only.
    pub fn from_v1(hash: impl Into<String>) -> Self {
        Self {
            v1: Some(hash.into()),
            v2: None,
        }
    }

    #[must_use]
    /// Whether this info hash carries no hash at all.
    pub const fn is_empty(&self) -> bool {
        self.v1.is_none() && self.v2.is_none()
    }

    /// The value identity, hashing, and `Display` are all derived from: the
    /// v1 hash when present, otherwise the v2 hash, otherwise `None`.
    fn canonical_key(&self) -> Option<&str> {
        self.v1.as_deref().or(self.v2.as_deref())
    }
}

impl PartialEq for InfoHash {
    fn eq(&self, other: &Self) -> bool {
        self.canonical_key() == other.canonical_key()
    }
}

impl Eq for InfoHash {}

impl Hash for InfoHash {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.canonical_key().hash(state);
    }
}

impl fmt::Display for InfoHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.canonical_key() {
            Some(key) => write!(f, "{key}"),
            None => write!(f, "<empty>"),
        }
    }
}

/// Flags relevant to the recheck dance and status reporting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TorrentFlags {
    /// Whether the engine's queueing logic manages this torrent.
    pub auto_managed: bool,
    /// Whether the torrent is currently paused.
    pub paused: bool,
}

/// Flags controlling a `save_resume_data` request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SaveResumeFlags {
    /// Flush the disk cache before snapshotting.
    pub flush_disk_cache: bool,
    /// Include the torrent's info dictionary in the resume blob.
    pub save_info_dict: bool,
    /// Skip the save entirely if nothing changed since the last save.
    pub only_if_modified: bool,
}

impl SaveResumeFlags {
    #[must_use]
    /// The flag set used by every resume-save request in this daemon.
    pub const fn standard() -> Self {
        Self {
            flush_disk_cache: true,
            save_info_dict: true,
            only_if_modified: true,
        }
    }
}

/// Priority level applied to an individual piece or file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Priority {
    /// Do not download.
    DontDownload,
    /// Default engine priority.
    #[default]
    Default,
    /// Highest priority; used to pull in media-info prefetch pieces first.
    Top,
}

/// One file within a torrent's payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileEntry {
    /// Index of the file within the torrent.
    pub index: u32,
    /// Path relative to the torrent's save directory.
    pub path: String,
    /// Size of the file in bytes.
    pub size_bytes: u64,
}

/// Auxiliary per-torrent state the engine round-trips but does not interpret.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TorrentClientData {
    /// Extracted media metadata, once the prefetcher has produced it.
    pub mediainfo: Option<serde_json::Value>,
    /// Whether the media-info prefetch state machine is currently active.
    pub mediainfo_enabled: bool,
    /// Suppresses exactly one `torrent_finished` event after prefetch completion.
    pub mediainfo_enabled_staggered: bool,
    /// Per-file sets of piece indices needed for media-info extraction.
    pub pieces_wanted: Option<BTreeMap<u32, Vec<u32>>>,
    /// Per-file sets of piece indices already completed toward that need.
    pub pieces_completed: Option<BTreeMap<u32, Vec<u32>>>,
}

/// Parameters required to admit a torrent into the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TorrentParams {
    /// Torrent identity; may be incomplete before metadata is fetched.
    pub info_hash: InfoHash,
    /// Display name, when known ahead of metadata.
    pub name: Option<String>,
    /// Destination directory for downloaded data.
    pub save_path: String,
    /// Opaque resume data blob produced by a prior `save_resume_data`.
    pub resume_blob: Option<Vec<u8>>,
    /// Auxiliary client-owned state attached to the torrent.
    #[serde(default)]
    pub client_data: TorrentClientData,
}

/// Point-in-time snapshot of a torrent's engine-visible status.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TorrentStatus {
    /// Torrent identity.
    pub info_hash: InfoHash,
    /// Display name.
    pub name: Option<String>,
    /// Destination directory for downloaded data.
    pub save_path: String,
    /// Position in the download queue.
    pub queue_position: i32,
    /// Whether the engine believes unsaved resume state exists.
    pub need_save_resume: bool,
    /// Total bytes downloaded this session.
    pub total_download: u64,
    /// File listing, once metadata has been fetched.
    pub files: Option<Vec<FileEntry>>,
    /// Auxiliary client-owned state attached to the torrent.
    #[serde(default)]
    pub client_data: TorrentClientData,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn info_hash_equal_when_canonical_key_matches() {
        let a = InfoHash {
            v1: Some("aaaa".into()),
            v2: Some("bbbb".into()),
        };
        let b = InfoHash {
            v1: Some("aaaa".into()),
            v2: None,
        };
        let c = InfoHash {
            v1: Some("cccc".into()),
            v2: Some("bbbb".into()),
        };
        let d = InfoHash {
            v1: Some("zzzz".into()),
            v2: Some("yyyy".into()),
        };
        assert_eq!(a, b);
        assert_ne!(a, c, "a shared v2 does not make two hashes equal when v1 differs");
        assert_ne!(a, d);
    }

    #[test]
    fn info_hash_equality_is_transitive_and_hash_agrees() {
        use std::collections::HashMap;

        let full = InfoHash {
            v1: Some("aaaa".into()),
            v2: Some("bbbb".into()),
        };
        let v1_only = InfoHash {
            v1: Some("aaaa".into()),
            v2: None,
        };
        assert_eq!(full, v1_only);

        let mut map = HashMap::new();
        map.insert(full.clone(), "handle");
        assert_eq!(map.get(&v1_only), Some(&"handle"));
    }

    #[test]
    fn info_hash_is_empty_detects_absence() {
        assert!(InfoHash::default().is_empty());
        assert!(!InfoHash::from_v1("abcd").is_empty());
    }

    #[test]
    fn save_resume_flags_standard_sets_all_three() {
        let flags = SaveResumeFlags::standard();
        assert!(flags.flush_disk_cache && flags.save_info_dict && flags.only_if_modified);
    }
}
