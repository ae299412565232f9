//! Fixture builders: a default settings value, a stub engine handle, a
//! sample persisted record, and a disposable on-disk store.

use std::sync::Arc;

use tempfile::TempDir;
use torrentd_config::DaemonSettings;
use torrentd_engine::{InfoHash, StubEngine, TorrentClientData};
use torrentd_store::{TorrentRecord, TorrentStore};

/// Default daemon settings, suitable for any test that does not care about a
/// particular configuration value.
#[must_use]
pub fn sample_settings() -> DaemonSettings {
    DaemonSettings::default()
}

/// A fresh `StubEngine`, wrapped the way [`crate::TempStore`] and
/// `SessionSupervisor::construct` expect.
#[must_use]
pub fn stub_engine() -> Arc<StubEngine> {
    Arc::new(StubEngine::new())
}

/// A `TorrentRecord` with representative values, for store/supervisor tests
/// that need one persisted torrent without caring about its specifics.
#[must_use]
pub fn sample_torrent_record() -> TorrentRecord {
    TorrentRecord {
        info_hash: InfoHash::from_v1("sample-info-hash-0001"),
        name: Some("sample.iso".to_string()),
        save_path: "/data/downloads".to_string(),
        queue_position: 0,
        resume_blob: None,
        client_data: TorrentClientData::default(),
    }
}

/// A `TorrentStore` backed by a SQLite file in a temporary directory, kept
/// alive for as long as this value is. Replaces spinning up a disposable
/// database server: the store migrates the same way in tests as it does in
/// production, just against throwaway storage.
pub struct TempStore {
    _dir: TempDir,
    store: TorrentStore,
}

impl TempStore {
    /// Creates a new temporary directory and opens a store inside it.
    ///
    /// # Errors
    ///
    /// Returns an error if the temporary directory cannot be created or the
    /// store fails to open and migrate.
    pub async fn open() -> anyhow::Result<Self> {
        let dir = tempfile::tempdir()?;
        let store = TorrentStore::open(&dir.path().join("torrentd.db")).await?;
        Ok(Self { _dir: dir, store })
    }

    /// The underlying store handle.
    #[must_use]
    pub const fn store(&self) -> &TorrentStore {
        &self.store
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sample_settings_disables_mediainfo_by_default() {
        assert!(!sample_settings().mediainfo_enabled);
    }

    #[test]
    fn sample_torrent_record_has_stable_identity() {
        let first = sample_torrent_record();
        let second = sample_torrent_record();
        assert_eq!(first.info_hash, second.info_hash);
    }

    #[tokio::test]
    async fn stub_engine_constructs() {
        let engine = stub_engine();
        assert_eq!(Arc::strong_count(&engine), 1);
    }

    #[tokio::test]
    async fn temp_store_opens_and_counts_empty() {
        let temp = TempStore::open().await.unwrap();
        assert_eq!(temp.store().count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn temp_store_round_trips_sample_record() {
        let temp = TempStore::open().await.unwrap();
        let record = sample_torrent_record();
        temp.store().insert(&record).await.unwrap();
        let loaded = temp.store().load_all().await.unwrap();
        assert_eq!(loaded, vec![record]);
    }
}
