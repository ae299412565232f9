//! One-shot callback registry keyed by torrent, used by `recheck` to restore
//! a torrent's flags once the engine's `torrent_checked` alert confirms the
//! recheck finished.

use std::collections::HashMap;
use std::sync::Mutex;

use torrentd_engine::{EngineTorrentHandle, InfoHash};

/// A closure invoked once, given the handle of the torrent it was registered for.
pub(crate) type RecheckCallback = Box<dyn FnOnce(&dyn EngineTorrentHandle) + Send>;

/// Callbacks waiting on a `torrent_checked` alert, keyed by info hash.
///
/// Callbacks registered for the same key fire in registration order, matching
/// the source behavior for torrents that receive overlapping recheck requests.
#[derive(Default)]
pub(crate) struct CallbackRegistry {
    torrent_checked: Mutex<HashMap<String, Vec<RecheckCallback>>>,
}

impl CallbackRegistry {
    pub(crate) fn register(&self, info_hash: &InfoHash, callback: RecheckCallback) {
        let mut guard = self
            .torrent_checked
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        guard.entry(info_hash.to_string()).or_default().push(callback);
    }

    pub(crate) fn take(&self, info_hash: &InfoHash) -> Vec<RecheckCallback> {
        let mut guard = self
            .torrent_checked
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        guard.remove(&info_hash.to_string()).unwrap_or_default()
    }
}
