//! The session supervisor: owns the engine, the in-memory torrent handle
//! map, and the alert-driven event loop that keeps persistence and the
//! event bus in sync with it.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{error, info, trace, warn};

use torrentd_config::DaemonSettings;
use torrentd_engine::{
    Alert, EngineSession, EngineTorrentHandle, InfoHash, SaveResumeFlags, TorrentFlags,
    TorrentParams, TorrentStatus,
};
use torrentd_events::{Event, EventBus};
use torrentd_store::{TorrentRecord, TorrentStore};

use crate::callbacks::CallbackRegistry;
use crate::error::{SessionError, SessionResult};
use crate::mediainfo;

const DEFAULT_EXTENSIONS: [&str; 3] = ["ut_metadata", "ut_pex", "smart_ban"];

/// Coordinates the engine, persistence store, and event bus for one daemon
/// session. All public methods are safe to call from the single event-loop
/// task; see the crate's concurrency notes for why no internal locking
/// protects against concurrent *callers*.
pub struct SessionSupervisor<E: EngineSession + 'static> {
    engine: Arc<E>,
    store: TorrentStore,
    events: EventBus,
    settings: DaemonSettings,
    handles: RwLock<HashMap<InfoHash, Box<dyn EngineTorrentHandle>>>,
    callbacks: CallbackRegistry,
    timers: std::sync::Mutex<Vec<JoinHandle<()>>>,
}

impl<E: EngineSession + 'static> SessionSupervisor<E> {
    /// Builds a new session supervisor against an already-constructed engine.
    ///
    /// Reads the session params file (DHT state only), merges it with
    /// `settings.engine_settings`, applies the result to the engine, loads
    /// extensions, installs the alert notify callback, and starts the
    /// configured periodic timers.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Engine`] if applying settings fails.
    pub async fn construct(
        engine: Arc<E>,
        store: TorrentStore,
        events: EventBus,
        settings: DaemonSettings,
    ) -> SessionResult<Arc<Self>> {
        let dht_state = read_session_params_file(&settings.session_params_path);
        let merged = merge_engine_settings(&settings.engine_settings, dht_state.as_deref());
        engine
            .apply_settings(merged)
            .await
            .map_err(SessionError::Engine)?;

        let extensions: Vec<&str> = if settings.extensions.is_empty() {
            DEFAULT_EXTENSIONS.to_vec()
        } else {
            settings.extensions.iter().map(String::as_str).collect()
        };
        for extension in extensions {
            if let Err(err) = engine.add_extension(extension) {
                warn!(extension, error = %err, "failed to load engine extension");
            }
        }

        let supervisor = Arc::new(Self {
            engine,
            store,
            events,
            settings,
            handles: RwLock::new(HashMap::new()),
            callbacks: CallbackRegistry::default(),
            timers: std::sync::Mutex::new(Vec::new()),
        });
        install_notify(&supervisor);
        start_timers(&supervisor);
        Ok(supervisor)
    }

    async fn drain_alerts(&self) {
        for alert in self.engine.pop_alerts() {
            trace!(?alert, "draining alert");
            self.dispatch_alert(alert).await;
        }
    }

    async fn dispatch_alert(&self, alert: Alert) {
        match alert {
            Alert::MetadataReceived { info_hash } => self.handle_metadata_received(&info_hash).await,
            Alert::PieceFinished {
                info_hash,
                piece_index,
            } => self.handle_piece_finished(&info_hash, piece_index).await,
            Alert::SaveResumeData { info_hash, params } => {
                self.persist_resume_params(&info_hash, &params).await;
                info!(torrent = %info_hash, "resume data saved");
            }
            Alert::SaveResumeDataFailed { info_hash, message } => {
                warn!(torrent = %info_hash, error = %message, "resume data save failed");
            }
            Alert::SessionStats { counters } => self.handle_session_stats(&counters),
            Alert::StateUpdate { statuses } => {
                self.events.publish(Event::StateUpdate { statuses });
            }
            Alert::StorageMoved { info_hash } => self.handle_storage_moved(&info_hash).await,
            Alert::TorrentChecked { info_hash } => self.handle_torrent_checked(&info_hash).await,
            Alert::TorrentFinished { info_hash } => self.handle_torrent_finished(&info_hash).await,
            Alert::TorrentPaused { info_hash } => {
                self.publish_status_event(&info_hash, |status| Event::TorrentPaused { status })
                    .await;
            }
            Alert::TorrentRemoved { info_hash } => self.handle_torrent_removed(&info_hash).await,
            Alert::TorrentResumed { info_hash } => {
                self.publish_status_event(&info_hash, |status| Event::TorrentResumed { status })
                    .await;
            }
        }
    }

    async fn handle_metadata_received(&self, info_hash: &InfoHash) {
        let handles = self.handles.read().await;
        if let Some(handle) = handles.get(info_hash) {
            handle.save_resume_data(SaveResumeFlags::standard());
        }
    }

    async fn handle_piece_finished(&self, info_hash: &InfoHash, piece_index: u32) {
        let status = {
            let handles = self.handles.read().await;
            let Some(handle) = handles.get(info_hash) else {
                return;
            };
            if mediainfo::on_piece_finished(handle.as_ref(), piece_index).await {
                Some(handle.status())
            } else {
                None
            }
        };
        if let Some(status) = status {
            self.events.publish(Event::TorrentMediainfo { status });
        }
    }

    fn handle_session_stats(&self, counters: &[i64]) {
        let names = self.engine.stats_metrics();
        let metrics: BTreeMap<String, i64> = names
            .iter()
            .cloned()
            .zip(counters.iter().copied())
            .collect();
        self.events.publish(Event::SessionStats { metrics });
    }

    async fn handle_storage_moved(&self, info_hash: &InfoHash) {
        let handles = self.handles.read().await;
        let Some(handle) = handles.get(info_hash) else {
            return;
        };
        let status = handle.status();
        if status.need_save_resume {
            handle.save_resume_data(SaveResumeFlags::standard());
        }
        self.events.publish(Event::StorageMoved { status });
    }

    async fn handle_torrent_checked(&self, info_hash: &InfoHash) {
        let callbacks = self.callbacks.take(info_hash);
        if callbacks.is_empty() {
            return;
        }
        let handles = self.handles.read().await;
        let Some(handle) = handles.get(info_hash) else {
            return;
        };
        for callback in callbacks {
            callback(handle.as_ref());
        }
    }

    async fn handle_torrent_finished(&self, info_hash: &InfoHash) {
        let handles = self.handles.read().await;
        let Some(handle) = handles.get(info_hash) else {
            return;
        };
        let status = handle.status();
        if status.total_download > 0 {
            if status.client_data.mediainfo_enabled_staggered {
                let mut client_data = status.client_data.clone();
                client_data.mediainfo_enabled_staggered = false;
                handle.set_client_data(client_data);
            } else {
                self.events.publish(Event::TorrentFinished {
                    status: status.clone(),
                });
            }
        }
        if status.need_save_resume {
            handle.save_resume_data(SaveResumeFlags::standard());
        }
    }

    async fn handle_torrent_removed(&self, info_hash: &InfoHash) {
        {
            let mut handles = self.handles.write().await;
            handles.remove(info_hash);
        }
        if let Err(err) = self.store.remove(info_hash).await {
            warn!(torrent = %info_hash, error = %err, "failed to delete persisted torrent record");
        }
        self.events.publish(Event::TorrentRemoved {
            info_hash: info_hash.clone(),
        });
    }

    async fn publish_status_event(&self, info_hash: &InfoHash, build: impl FnOnce(TorrentStatus) -> Event) {
        let handles = self.handles.read().await;
        let Some(handle) = handles.get(info_hash) else {
            return;
        };
        self.events.publish(build(handle.status()));
    }

    async fn persist_resume_params(&self, info_hash: &InfoHash, params: &TorrentParams) {
        let status = {
            let handles = self.handles.read().await;
            handles.get(info_hash).map(|handle| handle.status())
        };
        let Some(status) = status else {
            return;
        };
        let record = TorrentRecord {
            info_hash: info_hash.clone(),
            name: status.name,
            save_path: status.save_path,
            queue_position: i64::from(status.queue_position),
            resume_blob: params.resume_blob.clone(),
            client_data: status.client_data,
        };
        if let Err(err) = self.store.update(&record).await {
            warn!(torrent = %info_hash, error = %err, "failed to persist resume data");
        }
    }

    /// Loads every persisted torrent into the engine, logging progress every
    /// 1000 additions.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Store`] if the persisted records cannot be read.
    pub async fn load(&self) -> SessionResult<()> {
        let count = self.store.count().await.map_err(SessionError::Store)?;
        info!(count, "loading persisted torrents");
        let records = self.store.load_all().await.map_err(SessionError::Store)?;

        for (index, record) in records.into_iter().enumerate() {
            let params = TorrentParams {
                info_hash: record.info_hash.clone(),
                name: record.name.clone(),
                save_path: record.save_path.clone(),
                resume_blob: record.resume_blob.clone(),
                client_data: record.client_data.clone(),
            };
            match self.engine.add_torrent(params).await {
                Ok(handle) => {
                    let key = handle.status().info_hash.clone();
                    self.handles.write().await.insert(key, handle);
                }
                Err(err) => {
                    error!(torrent = %record.info_hash, error = %err, "failed to re-add persisted torrent");
                }
            }
            if (index + 1) % 1000 == 0 {
                info!(loaded = index + 1, "load progress");
            }
        }
        Ok(())
    }

    /// Admits a new torrent, persists its resume record, requests an initial
    /// resume-data save, and (if enabled) sets up media-info prefetch.
    ///
    /// Returns an empty [`InfoHash`] if the engine rejected the torrent.
    pub async fn add_torrent(&self, params: TorrentParams) -> InfoHash {
        let requested_hash = params.info_hash.clone();
        let handle = match self.engine.add_torrent(params.clone()).await {
            Ok(handle) => handle,
            Err(err) => {
                error!(torrent = %requested_hash, error = %err, "engine rejected add_torrent");
                return InfoHash::default();
            }
        };

        let status = handle.status();
        let record = TorrentRecord {
            info_hash: status.info_hash.clone(),
            name: status.name.clone(),
            save_path: status.save_path.clone(),
            queue_position: i64::from(status.queue_position),
            resume_blob: params.resume_blob.clone(),
            client_data: status.client_data.clone(),
        };
        if let Err(err) = self.store.insert(&record).await {
            warn!(torrent = %status.info_hash, error = %err, "failed to persist new torrent record");
        }

        handle.save_resume_data(SaveResumeFlags::standard());

        if self.settings.mediainfo_enabled {
            mediainfo::setup_prefetch(handle.as_ref(), &self.settings);
        }

        let key = status.info_hash.clone();
        self.handles.write().await.insert(key, handle);
        self.events.publish(Event::TorrentAdded { status });
        requested_hash
    }

    /// Pauses a torrent. No-op if the torrent is unknown.
    pub async fn pause(&self, info_hash: &InfoHash) {
        let handles = self.handles.read().await;
        if let Some(handle) = handles.get(info_hash) {
            handle.pause();
        }
    }

    /// Resumes a torrent. No-op if the torrent is unknown.
    pub async fn resume(&self, info_hash: &InfoHash) {
        let handles = self.handles.read().await;
        if let Some(handle) = handles.get(info_hash) {
            handle.resume();
        }
    }

    /// Forces a full recheck, temporarily clearing `auto_managed`/`paused`
    /// and restoring them once the engine confirms the recheck completed.
    pub async fn recheck(&self, info_hash: &InfoHash) {
        let handles = self.handles.read().await;
        let Some(handle) = handles.get(info_hash) else {
            return;
        };

        let original_flags = handle.flags();
        if original_flags.auto_managed {
            handle.unset_flags(TorrentFlags {
                auto_managed: true,
                paused: false,
            });
        }
        if original_flags.paused {
            handle.resume();
        }

        self.callbacks.register(
            info_hash,
            Box::new(move |handle: &dyn EngineTorrentHandle| {
                if original_flags.auto_managed {
                    handle.set_flags(TorrentFlags {
                        auto_managed: true,
                        paused: false,
                    });
                }
                if original_flags.paused {
                    handle.pause();
                }
            }),
        );

        handle.force_recheck();
    }

    /// Forwards a remove request to the engine. Persistence cleanup happens
    /// when the engine later emits `torrent_removed`.
    pub async fn remove(&self, info_hash: &InfoHash, remove_data: bool) {
        if let Err(err) = self.engine.remove_torrent(info_hash, remove_data).await {
            warn!(torrent = %info_hash, error = %err, "engine rejected remove_torrent");
        }
    }

    /// Runs the crash-safe shutdown sequence: stop timers, persist DHT
    /// state, pause every torrent, and drain outstanding resume-data saves
    /// in chunks before returning.
    pub async fn shutdown(&self) {
        self.engine.set_alert_notify(Box::new(|| {}));

        let timers = std::mem::take(
            &mut *self
                .timers
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner),
        );
        for timer in timers {
            timer.abort();
        }

        if let Err(err) = self.write_session_params_file() {
            warn!(error = %err, "failed to persist session params file");
        }

        let torrent_ids: Vec<InfoHash> = {
            let handles = self.handles.read().await;
            for handle in handles.values() {
                handle.pause();
            }
            handles.keys().cloned().collect()
        };

        let chunk_size = self.settings.shutdown_save_chunk_size.max(1);
        for chunk in torrent_ids.chunks(chunk_size) {
            self.shutdown_save_chunk(chunk).await;
        }

        info!("session shutdown complete");
    }

    async fn shutdown_save_chunk(&self, chunk: &[InfoHash]) {
        let mut outstanding = 0_usize;
        {
            let handles = self.handles.read().await;
            for info_hash in chunk {
                let Some(handle) = handles.get(info_hash) else {
                    continue;
                };
                if !handle.is_valid() {
                    continue;
                }
                let status = handle.status();
                if status.files.is_none() || !status.need_save_resume {
                    continue;
                }
                handle.save_resume_data(SaveResumeFlags::standard());
                outstanding += 1;
            }
        }

        while outstanding > 0 {
            if !self.engine.wait_for_alert(Duration::from_secs(10)).await {
                continue;
            }
            for alert in self.engine.pop_alerts() {
                match alert {
                    Alert::TorrentPaused { .. } => {}
                    Alert::SaveResumeDataFailed { info_hash, message } => {
                        warn!(torrent = %info_hash, error = %message, "resume save failed during shutdown");
                        outstanding = outstanding.saturating_sub(1);
                    }
                    Alert::SaveResumeData { info_hash, params } => {
                        outstanding = outstanding.saturating_sub(1);
                        self.persist_resume_params(&info_hash, &params).await;
                    }
                    _ => {}
                }
            }
        }
    }

    fn write_session_params_file(&self) -> std::io::Result<()> {
        let bytes = self
            .engine
            .session_state()
            .map_err(|err| std::io::Error::other(err.to_string()))?;
        write_via_temp_rename(&self.settings.session_params_path, &bytes)
    }
}

/// Installs the alert-ready notify callback. A clone of the supervisor's
/// `Arc` is captured so the callback (invoked from whatever thread the
/// engine uses internally) can schedule a drain on the async runtime.
fn install_notify<E: EngineSession + 'static>(supervisor: &Arc<SessionSupervisor<E>>) {
    let supervisor = Arc::clone(supervisor);
    let runtime = tokio::runtime::Handle::current();
    supervisor.engine.set_alert_notify(Box::new(move || {
        let supervisor = Arc::clone(&supervisor);
        runtime.spawn(async move {
            supervisor.drain_alerts().await;
        });
    }));
}

/// Starts the configured periodic timers. Each timer only needs a clone of
/// the engine handle, not the whole supervisor.
fn start_timers<E: EngineSession + 'static>(supervisor: &Arc<SessionSupervisor<E>>) {
    let mut timers = Vec::new();
    let settings = &supervisor.settings;
    if settings.dht_stats_interval_secs > 0 {
        timers.push(spawn_timer(
            Arc::clone(&supervisor.engine),
            settings.dht_stats_interval_secs,
            E::post_dht_stats,
        ));
    }
    if settings.session_stats_interval_secs > 0 {
        timers.push(spawn_timer(
            Arc::clone(&supervisor.engine),
            settings.session_stats_interval_secs,
            E::post_session_stats,
        ));
    }
    if settings.torrent_updates_interval_secs > 0 {
        timers.push(spawn_timer(
            Arc::clone(&supervisor.engine),
            settings.torrent_updates_interval_secs,
            E::post_torrent_updates,
        ));
    }
    *supervisor
        .timers
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner) = timers;
}

fn spawn_timer<E: EngineSession + 'static>(
    engine: Arc<E>,
    interval_secs: u64,
    action: impl Fn(&E) + Send + 'static,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs));
        ticker.tick().await;
        loop {
            ticker.tick().await;
            action(&engine);
        }
    })
}

fn merge_engine_settings(base: &serde_json::Value, dht_state: Option<&[u8]>) -> serde_json::Value {
    let mut map = match base {
        serde_json::Value::Object(map) => map.clone(),
        _ => serde_json::Map::new(),
    };
    if let Some(bytes) = dht_state {
        map.insert("_dht_state".to_string(), serde_json::Value::from(bytes.to_vec()));
    }
    serde_json::Value::Object(map)
}

fn read_session_params_file(path: &Path) -> Option<Vec<u8>> {
    match std::fs::read(path) {
        Ok(bytes) => Some(bytes),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => None,
        Err(err) => {
            warn!(error = %err, path = %path.display(), "failed to read session params file");
            None
        }
    }
}

fn write_via_temp_rename(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let tmp_path: PathBuf = path.with_extension("tmp");
    std::fs::write(&tmp_path, bytes)?;
    std::fs::rename(&tmp_path, path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use torrentd_engine::{StubEngine, TorrentClientData};

    async fn test_supervisor() -> Arc<SessionSupervisor<StubEngine>> {
        let engine = Arc::new(StubEngine::new());
        let store = TorrentStore::open_in_memory().await.unwrap();
        let events = EventBus::with_capacity(32);
        let settings = DaemonSettings::default();
        SessionSupervisor::construct(engine, store, events, settings)
            .await
            .unwrap()
    }

    fn sample_params(hash: &str) -> TorrentParams {
        TorrentParams {
            info_hash: InfoHash::from_v1(hash),
            name: Some("demo".to_string()),
            save_path: "/data".to_string(),
            resume_blob: None,
            client_data: TorrentClientData::default(),
        }
    }

    #[tokio::test]
    async fn add_torrent_persists_and_publishes() {
        let supervisor = test_supervisor().await;
        let mut stream = supervisor.events.subscribe(None);

        let info_hash = supervisor.add_torrent(sample_params("abc")).await;
        assert!(!info_hash.is_empty());

        let envelope = stream.next().await.expect("torrent-added event");
        assert!(matches!(envelope.event, Event::TorrentAdded { .. }));

        assert_eq!(supervisor.store.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn add_duplicate_torrent_returns_empty_hash() {
        let supervisor = test_supervisor().await;
        supervisor.add_torrent(sample_params("dup")).await;
        let second = supervisor.add_torrent(sample_params("dup")).await;
        assert!(second.is_empty());
    }

    #[tokio::test]
    async fn remove_forwards_to_engine_and_event_follows() {
        let supervisor = test_supervisor().await;
        let mut stream = supervisor.events.subscribe(None);
        let info_hash = supervisor.add_torrent(sample_params("rem")).await;
        let _added = stream.next().await;

        supervisor.remove(&info_hash, false).await;

        let removed = stream.next().await.expect("torrent-removed event");
        assert!(matches!(removed.event, Event::TorrentRemoved { .. }));
        assert_eq!(supervisor.store.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn load_recovers_persisted_torrents() {
        let supervisor = test_supervisor().await;
        let record = TorrentRecord {
            info_hash: InfoHash::from_v1("preload"),
            name: Some("preload".to_string()),
            save_path: "/data".to_string(),
            queue_position: 0,
            resume_blob: None,
            client_data: TorrentClientData::default(),
        };
        supervisor.store.insert(&record).await.unwrap();

        supervisor.load().await.unwrap();

        let handles = supervisor.handles.read().await;
        assert!(handles.contains_key(&InfoHash::from_v1("preload")));
    }

    #[tokio::test]
    async fn shutdown_persists_outstanding_resume_data() {
        let supervisor = test_supervisor().await;
        supervisor.add_torrent(sample_params("shutdown")).await;

        supervisor.shutdown().await;

        let loaded = supervisor.store.load_all().await.unwrap();
        assert_eq!(loaded.len(), 1);
    }

    #[tokio::test]
    async fn recheck_restores_flags_after_torrent_checked() {
        let supervisor = test_supervisor().await;
        let info_hash = supervisor.add_torrent(sample_params("recheck")).await;
        supervisor.pause(&info_hash).await;

        supervisor.recheck(&info_hash).await;
        supervisor.drain_alerts().await;

        let handles = supervisor.handles.read().await;
        let handle = handles.get(&info_hash).unwrap();
        assert!(handle.flags().paused);
    }
}
