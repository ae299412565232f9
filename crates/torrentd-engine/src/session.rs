//! The engine session and torrent-handle traits consumed by the daemon.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::EngineResult;
use crate::types::{InfoHash, Priority, SaveResumeFlags, TorrentClientData, TorrentFlags, TorrentParams, TorrentStatus};

/// One item drained from the engine's alert queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Alert {
    /// Metadata (the info-dict) became available for a magnet-sourced torrent.
    MetadataReceived {
        /// Torrent the alert concerns.
        info_hash: InfoHash,
    },
    /// A single piece finished downloading and passed its hash check.
    PieceFinished {
        /// Torrent the alert concerns.
        info_hash: InfoHash,
        /// Index of the completed piece.
        piece_index: u32,
    },
    /// A requested `save_resume_data` call produced a resume blob.
    SaveResumeData {
        /// Torrent the alert concerns.
        info_hash: InfoHash,
        /// Resume parameters as of this snapshot.
        params: TorrentParams,
    },
    /// A requested `save_resume_data` call failed.
    SaveResumeDataFailed {
        /// Torrent the alert concerns.
        info_hash: InfoHash,
        /// Engine-reported failure description.
        message: String,
    },
    /// Periodic session-wide statistics counters, ordered to match
    /// [`EngineSession::stats_metrics`].
    SessionStats {
        /// Counter values, one per descriptor in `stats_metrics()`.
        counters: Vec<i64>,
    },
    /// A batch of torrent status snapshots, refreshed on a timer.
    StateUpdate {
        /// Updated status snapshots.
        statuses: Vec<TorrentStatus>,
    },
    /// A torrent's storage location finished moving.
    StorageMoved {
        /// Torrent the alert concerns.
        info_hash: InfoHash,
    },
    /// A `force_recheck` completed.
    TorrentChecked {
        /// Torrent the alert concerns.
        info_hash: InfoHash,
    },
    /// A torrent finished downloading.
    TorrentFinished {
        /// Torrent the alert concerns.
        info_hash: InfoHash,
    },
    /// A torrent was paused.
    TorrentPaused {
        /// Torrent the alert concerns.
        info_hash: InfoHash,
    },
    /// A torrent was fully removed from the engine.
    TorrentRemoved {
        /// Torrent the alert concerns.
        info_hash: InfoHash,
    },
    /// A torrent resumed after being paused.
    TorrentResumed {
        /// Torrent the alert concerns.
        info_hash: InfoHash,
    },
}

impl Alert {
    #[must_use]
    /// The torrent this alert concerns, when it concerns exactly one.
    pub const fn info_hash(&self) -> Option<&InfoHash> {
        match self {
            Self::MetadataReceived { info_hash }
            | Self::PieceFinished { info_hash, .. }
            | Self::SaveResumeData { info_hash, .. }
            | Self::SaveResumeDataFailed { info_hash, .. }
            | Self::StorageMoved { info_hash }
            | Self::TorrentChecked { info_hash }
            | Self::TorrentFinished { info_hash }
            | Self::TorrentPaused { info_hash }
            | Self::TorrentRemoved { info_hash }
            | Self::TorrentResumed { info_hash } => Some(info_hash),
            Self::SessionStats { .. } | Self::StateUpdate { .. } => None,
        }
    }
}

/// Notify callback the session installs on the engine; fired from whatever
/// thread the engine uses internally when new alerts become available.
pub type AlertNotify = Box<dyn Fn() + Send + Sync>;

/// A live session against the BitTorrent engine.
///
/// Implementations must be safe to call from a single cooperative task; the
/// daemon never issues concurrent calls against one session.
#[async_trait]
pub trait EngineSession: Send + Sync {
    /// Admit a new torrent, returning its handle on success.
    async fn add_torrent(
        &self,
        params: TorrentParams,
    ) -> EngineResult<Box<dyn EngineTorrentHandle>>;

    /// Look up a previously admitted torrent's handle by info hash.
    fn find(&self, info_hash: &InfoHash) -> Option<Box<dyn EngineTorrentHandle>>;

    /// Remove a torrent, optionally deleting its on-disk data.
    async fn remove_torrent(&self, info_hash: &InfoHash, delete_files: bool) -> EngineResult<()>;

    /// Merge additional settings into the running session.
    async fn apply_settings(&self, settings: serde_json::Value) -> EngineResult<()>;

    /// Read back the currently applied settings.
    async fn get_settings(&self) -> EngineResult<serde_json::Value>;

    /// Request a `session_stats` alert on the next poll.
    fn post_session_stats(&self);

    /// Request a `state_update` alert covering every active torrent.
    fn post_torrent_updates(&self);

    /// Request the DHT subsystem publish its stats as a `session_stats`-like alert.
    fn post_dht_stats(&self);

    /// Serialize the session's DHT state for on-disk persistence.
    fn session_state(&self) -> EngineResult<Vec<u8>>;

    /// Install (or replace) the alert-ready notify callback.
    fn set_alert_notify(&self, notify: AlertNotify);

    /// Drain and return all currently queued alerts, in arrival order.
    fn pop_alerts(&self) -> Vec<Alert>;

    /// Block the calling task until an alert is ready or the timeout elapses.
    ///
    /// Returns `true` if an alert became available, `false` on timeout.
    async fn wait_for_alert(&self, timeout: Duration) -> bool;

    /// Load and enable an extension plugin by name (e.g. `ut_metadata`).
    fn add_extension(&self, name: &str) -> EngineResult<()>;

    /// Ordered descriptor names paired positionally with `SessionStats` counters.
    fn stats_metrics(&self) -> &[String];
}

/// A handle to one torrent owned by an [`EngineSession`].
#[async_trait]
pub trait EngineTorrentHandle: Send + Sync {
    /// Whether the engine still recognizes this handle.
    fn is_valid(&self) -> bool;

    /// Current status snapshot.
    fn status(&self) -> TorrentStatus;

    /// Currently set lifecycle flags.
    fn flags(&self) -> TorrentFlags;

    /// Set the given flags, leaving others unchanged.
    fn set_flags(&self, flags: TorrentFlags);

    /// Clear the given flags, leaving others unchanged.
    fn unset_flags(&self, flags: TorrentFlags);

    /// Pause this torrent.
    fn pause(&self);

    /// Resume this torrent.
    fn resume(&self);

    /// Request a full recheck of on-disk data against the torrent's pieces.
    fn force_recheck(&self);

    /// Request a resume-data snapshot; completion arrives as a `SaveResumeData`
    /// or `SaveResumeDataFailed` alert.
    fn save_resume_data(&self, flags: SaveResumeFlags);

    /// Set per-piece download priorities; length must equal the piece count.
    fn prioritize_pieces(&self, priorities: &[Priority]);

    /// Read back current per-piece priorities.
    fn get_piece_priorities(&self) -> Vec<Priority>;

    /// Index of the first piece belonging to the given file.
    fn piece_index_at_file(&self, file_index: u32) -> u32;

    /// Size, in bytes, of the given piece index.
    fn piece_size(&self, piece_index: u32) -> u64;

    /// Total number of pieces in this torrent.
    fn num_pieces(&self) -> u32;

    /// Read the auxiliary client-owned state attached to this torrent.
    fn client_data(&self) -> TorrentClientData;

    /// Replace the auxiliary client-owned state attached to this torrent.
    fn set_client_data(&self, data: TorrentClientData);
}
