//! In-memory engine used by tests and by any build that has no native engine
//! wired in. Mirrors the shape of a real adapter closely enough that the
//! session supervisor cannot tell the two apart.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;

use crate::error::{EngineError, EngineResult};
use crate::session::{Alert, AlertNotify, EngineSession, EngineTorrentHandle};
use crate::types::{
    FileEntry, InfoHash, Priority, SaveResumeFlags, TorrentClientData, TorrentFlags, TorrentParams,
    TorrentStatus,
};

struct StubTorrentState {
    params: TorrentParams,
    flags: TorrentFlags,
    queue_position: i32,
    need_save_resume: bool,
    total_download: u64,
    files: Option<Vec<FileEntry>>,
    priorities: Vec<Priority>,
    valid: bool,
}

struct Inner {
    torrents: HashMap<String, StubTorrentState>,
    pending: Vec<Alert>,
    notify: Option<AlertNotify>,
    next_queue_position: i32,
}

impl Inner {
    fn key(info_hash: &InfoHash) -> String {
        info_hash.to_string()
    }

    fn push_alert(&mut self, alert: Alert) {
        self.pending.push(alert);
        if let Some(notify) = &self.notify {
            notify();
        }
    }
}

/// Test/default [`EngineSession`] implementation backed by an in-process map.
///
/// Set `files` on a torrent (via [`StubEngine::seed_files`]) before calling
/// [`EngineSession::add_torrent`] to simulate metadata already being known.
pub struct StubEngine {
    inner: Arc<Mutex<Inner>>,
    seeded_files: Arc<Mutex<HashMap<String, Vec<FileEntry>>>>,
    wake: Arc<Notify>,
    stats_metrics: Vec<String>,
}

impl Default for StubEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl StubEngine {
    #[must_use]
    /// Construct an empty stub engine.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                torrents: HashMap::new(),
                pending: Vec::new(),
                notify: None,
                next_queue_position: 0,
            })),
            seeded_files: Arc::new(Mutex::new(HashMap::new())),
            wake: Arc::new(Notify::new()),
            stats_metrics: vec!["peers".to_string(), "download_rate".to_string()],
        }
    }

    /// Pre-register a file listing so the next `add_torrent` for this info
    /// hash reports metadata as already present.
    pub fn seed_files(&self, info_hash: &InfoHash, files: Vec<FileEntry>) {
        self.seeded_files
            .lock()
            .unwrap_or_else(|poison| poison.into_inner())
            .insert(Inner::key(info_hash), files);
    }

    /// Directly inject an alert, as a real engine thread would via its
    /// internal machinery. Exposed for tests that drive specific sequences.
    pub fn inject_alert(&self, alert: Alert) {
        let mut inner = self.inner.lock().unwrap_or_else(|poison| poison.into_inner());
        inner.push_alert(alert);
        self.wake.notify_waiters();
    }
}

#[async_trait]
impl EngineSession for StubEngine {
    async fn add_torrent(
        &self,
        params: TorrentParams,
    ) -> EngineResult<Box<dyn EngineTorrentHandle>> {
        let key = Inner::key(&params.info_hash);
        let files = self
            .seeded_files
            .lock()
            .unwrap_or_else(|poison| poison.into_inner())
            .remove(&key);
        let mut inner = self.inner.lock().unwrap_or_else(|poison| poison.into_inner());
        if inner.torrents.contains_key(&key) {
            return Err(EngineError::AddRejected {
                info_hash: params.info_hash.clone(),
                reason: "duplicate torrent".to_string(),
            });
        }
        let queue_position = inner.next_queue_position;
        inner.next_queue_position += 1;
        let num_pieces = files
            .as_ref()
            .map_or(1, |files| files.len().max(1) as u32 * 4);
        inner.torrents.insert(
            key.clone(),
            StubTorrentState {
                params: params.clone(),
                flags: TorrentFlags {
                    auto_managed: true,
                    paused: false,
                },
                queue_position,
                need_save_resume: true,
                total_download: 0,
                files,
                priorities: vec![Priority::Default; num_pieces as usize],
                valid: true,
            },
        );
        drop(inner);
        Ok(Box::new(StubHandle {
            inner: Arc::clone(&self.inner),
            wake: Arc::clone(&self.wake),
            key,
        }))
    }

    fn find(&self, info_hash: &InfoHash) -> Option<Box<dyn EngineTorrentHandle>> {
        let key = Inner::key(info_hash);
        let inner = self.inner.lock().unwrap_or_else(|poison| poison.into_inner());
        if inner.torrents.contains_key(&key) {
            Some(Box::new(StubHandle {
                inner: Arc::clone(&self.inner),
                wake: Arc::clone(&self.wake),
                key,
            }))
        } else {
            None
        }
    }

    async fn remove_torrent(&self, info_hash: &InfoHash, _delete_files: bool) -> EngineResult<()> {
        let key = Inner::key(info_hash);
        let mut inner = self.inner.lock().unwrap_or_else(|poison| poison.into_inner());
        inner.torrents.remove(&key);
        inner.push_alert(Alert::TorrentRemoved {
            info_hash: info_hash.clone(),
        });
        drop(inner);
        self.wake.notify_waiters();
        Ok(())
    }

    async fn apply_settings(&self, _settings: serde_json::Value) -> EngineResult<()> {
        Ok(())
    }

    async fn get_settings(&self) -> EngineResult<serde_json::Value> {
        Ok(serde_json::json!({}))
    }

    fn post_session_stats(&self) {
        let counters = vec![0_i64; self.stats_metrics.len()];
        let mut inner = self.inner.lock().unwrap_or_else(|poison| poison.into_inner());
        inner.push_alert(Alert::SessionStats { counters });
        drop(inner);
        self.wake.notify_waiters();
    }

    fn post_torrent_updates(&self) {
        let mut inner = self.inner.lock().unwrap_or_else(|poison| poison.into_inner());
        let statuses = inner
            .torrents
            .values()
            .map(state_to_status)
            .collect::<Vec<_>>();
        inner.push_alert(Alert::StateUpdate { statuses });
        drop(inner);
        self.wake.notify_waiters();
    }

    fn post_dht_stats(&self) {}

    fn session_state(&self) -> EngineResult<Vec<u8>> {
        Ok(b"stub-session-params".to_vec())
    }

    fn set_alert_notify(&self, notify: AlertNotify) {
        self.inner.lock().unwrap_or_else(|poison| poison.into_inner()).notify = Some(notify);
    }

    fn pop_alerts(&self) -> Vec<Alert> {
        let mut inner = self.inner.lock().unwrap_or_else(|poison| poison.into_inner());
        std::mem::take(&mut inner.pending)
    }

    async fn wait_for_alert(&self, timeout: Duration) -> bool {
        let has_pending = {
            let inner = self.inner.lock().unwrap_or_else(|poison| poison.into_inner());
            !inner.pending.is_empty()
        };
        if has_pending {
            return true;
        }
        tokio::select! {
            () = self.wake.notified() => true,
            () = tokio::time::sleep(timeout) => false,
        }
    }

    fn add_extension(&self, _name: &str) -> EngineResult<()> {
        Ok(())
    }

    fn stats_metrics(&self) -> &[String] {
        &self.stats_metrics
    }
}

struct StubHandle {
    inner: Arc<Mutex<Inner>>,
    wake: Arc<Notify>,
    key: String,
}

fn state_to_status(state: &StubTorrentState) -> TorrentStatus {
    TorrentStatus {
        info_hash: state.params.info_hash.clone(),
        name: state.params.name.clone(),
        save_path: state.params.save_path.clone(),
        queue_position: state.queue_position,
        need_save_resume: state.need_save_resume,
        total_download: state.total_download,
        files: state.files.clone(),
        client_data: state.params.client_data.clone(),
    }
}

impl StubHandle {
    fn with_state<R>(&self, f: impl FnOnce(&StubTorrentState) -> R) -> Option<R> {
        let inner = self.inner.lock().unwrap_or_else(|poison| poison.into_inner());
        inner.torrents.get(&self.key).map(f)
    }

    fn with_state_mut<R>(&self, f: impl FnOnce(&mut StubTorrentState) -> R) -> Option<R> {
        let mut inner = self.inner.lock().unwrap_or_else(|poison| poison.into_inner());
        inner.torrents.get_mut(&self.key).map(f)
    }
}

#[async_trait]
impl EngineTorrentHandle for StubHandle {
    fn is_valid(&self) -> bool {
        self.with_state(|state| state.valid).unwrap_or(false)
    }

    fn status(&self) -> TorrentStatus {
        self.with_state(state_to_status).unwrap_or_else(|| TorrentStatus {
            info_hash: InfoHash::default(),
            name: None,
            save_path: String::new(),
            queue_position: 0,
            need_save_resume: false,
            total_download: 0,
            files: None,
            client_data: TorrentClientData::default(),
        })
    }

    fn flags(&self) -> TorrentFlags {
        self.with_state(|state| state.flags).unwrap_or_default()
    }

    fn set_flags(&self, flags: TorrentFlags) {
        self.with_state_mut(|state| {
            state.flags.auto_managed |= flags.auto_managed;
            state.flags.paused |= flags.paused;
        });
    }

    fn unset_flags(&self, flags: TorrentFlags) {
        self.with_state_mut(|state| {
            if flags.auto_managed {
                state.flags.auto_managed = false;
            }
            if flags.paused {
                state.flags.paused = false;
            }
        });
    }

    fn pause(&self) {
        self.with_state_mut(|state| state.flags.paused = true);
        let mut inner = self.inner.lock().unwrap_or_else(|poison| poison.into_inner());
        if let Some(state) = inner.torrents.get(&self.key) {
            inner.pending.push(Alert::TorrentPaused {
                info_hash: state.params.info_hash.clone(),
            });
        }
        drop(inner);
        self.wake.notify_waiters();
    }

    fn resume(&self) {
        self.with_state_mut(|state| state.flags.paused = false);
        let mut inner = self.inner.lock().unwrap_or_else(|poison| poison.into_inner());
        if let Some(state) = inner.torrents.get(&self.key) {
            inner.pending.push(Alert::TorrentResumed {
                info_hash: state.params.info_hash.clone(),
            });
        }
        drop(inner);
        self.wake.notify_waiters();
    }

    fn force_recheck(&self) {
        let mut inner = self.inner.lock().unwrap_or_else(|poison| poison.into_inner());
        if let Some(state) = inner.torrents.get(&self.key) {
            let info_hash = state.params.info_hash.clone();
            inner.push_alert(Alert::TorrentChecked { info_hash });
        }
        drop(inner);
        self.wake.notify_waiters();
    }

    fn save_resume_data(&self, _flags: SaveResumeFlags) {
        let mut inner = self.inner.lock().unwrap_or_else(|poison| poison.into_inner());
        if let Some(state) = inner.torrents.get_mut(&self.key) {
            state.need_save_resume = false;
            let info_hash = state.params.info_hash.clone();
            let params = state.params.clone();
            inner.push_alert(Alert::SaveResumeData { info_hash, params });
        }
        drop(inner);
        self.wake.notify_waiters();
    }

    fn prioritize_pieces(&self, priorities: &[Priority]) {
        self.with_state_mut(|state| state.priorities = priorities.to_vec());
    }

    fn get_piece_priorities(&self) -> Vec<Priority> {
        self.with_state(|state| state.priorities.clone())
            .unwrap_or_default()
    }

    fn piece_index_at_file(&self, file_index: u32) -> u32 {
        file_index * 4
    }

    fn piece_size(&self, _piece_index: u32) -> u64 {
        16 * 1024
    }

    fn num_pieces(&self) -> u32 {
        self.with_state(|state| state.priorities.len() as u32)
            .unwrap_or(0)
    }

    fn client_data(&self) -> TorrentClientData {
        self.with_state(|state| state.params.client_data.clone())
            .unwrap_or_default()
    }

    fn set_client_data(&self, data: TorrentClientData) {
        self.with_state_mut(|state| state.params.client_data = data);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn add_torrent_rejects_duplicates() {
        let engine = StubEngine::new();
        let params = TorrentParams {
            info_hash: InfoHash::from_v1("abc"),
            name: Some("demo".into()),
            save_path: "/data".into(),
            resume_blob: None,
            client_data: TorrentClientData::default(),
        };
        assert!(engine.add_torrent(params.clone()).await.is_ok());
        assert!(engine.add_torrent(params).await.is_err());
    }

    #[tokio::test]
    async fn pop_alerts_drains_in_order() {
        let engine = StubEngine::new();
        let hash = InfoHash::from_v1("abc");
        engine.inject_alert(Alert::TorrentPaused {
            info_hash: hash.clone(),
        });
        engine.inject_alert(Alert::TorrentResumed {
            info_hash: hash.clone(),
        });
        let alerts = engine.pop_alerts();
        assert_eq!(alerts.len(), 2);
        assert!(matches!(alerts[0], Alert::TorrentPaused { .. }));
        assert!(matches!(alerts[1], Alert::TorrentResumed { .. }));
        assert!(engine.pop_alerts().is_empty());
    }

    #[tokio::test]
    async fn wait_for_alert_returns_true_once_notified() {
        let engine = Arc::new(StubEngine::new());
        let clone = Arc::clone(&engine);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            clone.inject_alert(Alert::TorrentRemoved {
                info_hash: InfoHash::from_v1("x"),
            });
        });
        assert!(engine.wait_for_alert(Duration::from_secs(1)).await);
    }

    #[tokio::test]
    async fn recheck_round_trip_via_handle() {
        let engine = StubEngine::new();
        let hash = InfoHash::from_v1("abc");
        let handle = engine
            .add_torrent(TorrentParams {
                info_hash: hash.clone(),
                name: None,
                save_path: "/data".into(),
                resume_blob: None,
                client_data: TorrentClientData::default(),
            })
            .await
            .expect("add");
        handle.force_recheck();
        let alerts = engine.pop_alerts();
        assert!(matches!(alerts.as_slice(), [Alert::TorrentChecked { .. }]));
    }
}
