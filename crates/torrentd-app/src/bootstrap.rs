use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{info, warn};

use torrentd_config::DaemonSettings;
use torrentd_engine::StubEngine;
use torrentd_events::{Event, EventBus};
use torrentd_session::SessionSupervisor;
use torrentd_store::TorrentStore;
use torrentd_telemetry::{LoggingConfig, init_logging};
use torrentd_workflow::{ActionFactory, RenderContext, ValueProvider, WorkflowDocument, execute, should_execute};

use crate::actions::LogActionFactory;
use crate::error::{AppError, AppResult};

/// Dependencies required to bootstrap the daemon.
pub(crate) struct BootstrapDependencies {
    settings: DaemonSettings,
    store: TorrentStore,
    events: EventBus,
    engine: Arc<StubEngine>,
    workflows: Vec<WorkflowDocument>,
}

impl BootstrapDependencies {
    /// Construct production dependencies from the environment for the binary entrypoint.
    pub(crate) async fn from_env() -> AppResult<Self> {
        let config_path = std::env::var("TORRENTD_CONFIG_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("torrentd.toml"));
        let settings = if config_path.exists() {
            DaemonSettings::load(&config_path).map_err(|source| AppError::config("config.load", source))?
        } else {
            info!(path = %config_path.display(), "no configuration file found, using defaults");
            DaemonSettings::default()
        };

        let store = TorrentStore::open(&settings.database_path)
            .await
            .map_err(|source| AppError::store("store.open", source))?;

        let events = EventBus::with_capacity(1024);
        let engine = Arc::new(StubEngine::new());

        let workflows_dir = std::env::var("TORRENTD_WORKFLOWS_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("workflows"));
        let workflows = load_workflows(&workflows_dir);

        Ok(Self {
            settings,
            store,
            events,
            engine,
            workflows,
        })
    }
}

/// Entry point for the daemon boot sequence.
///
/// # Errors
///
/// Returns an error if dependency construction or the event loop fails.
pub async fn run_app() -> anyhow::Result<()> {
    let logging = LoggingConfig::default();
    init_logging(&logging)?;

    let dependencies = BootstrapDependencies::from_env().await?;
    run_app_with(dependencies).await
}

/// Boot sequence that relies entirely on injected dependencies to simplify testing.
pub(crate) async fn run_app_with(dependencies: BootstrapDependencies) -> anyhow::Result<()> {
    info!("torrentd bootstrap starting");

    let BootstrapDependencies {
        settings,
        store,
        events,
        engine,
        workflows,
    } = dependencies;

    info!(count = workflows.len(), "loaded workflow documents");

    let supervisor = SessionSupervisor::construct(engine, store, events.clone(), settings)
        .await
        .map_err(|source| AppError::session("supervisor.construct", source))?;
    supervisor
        .load()
        .await
        .map_err(|source| AppError::session("supervisor.load", source))?;
    info!("session supervisor ready");

    let factory = LogActionFactory;
    run_event_loop(&events, &workflows, &factory).await;

    supervisor.shutdown().await;
    info!("torrentd shutdown complete");
    Ok(())
}

/// Drains the event bus, running every workflow whose trigger and condition
/// match each event, until the bus closes or a shutdown signal arrives.
async fn run_event_loop(events: &EventBus, workflows: &[WorkflowDocument], factory: &dyn ActionFactory) {
    let mut stream = events.subscribe(None);
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            envelope = stream.next() => {
                let Some(envelope) = envelope else {
                    info!("event bus closed, stopping event loop");
                    break;
                };
                dispatch_to_workflows(workflows, factory, &envelope.event).await;
            }
            _ = &mut shutdown => {
                info!("received shutdown signal");
                break;
            }
        }
    }
}

async fn dispatch_to_workflows(workflows: &[WorkflowDocument], factory: &dyn ActionFactory, event: &Event) {
    let payload = serde_json::to_value(event).unwrap_or(serde_json::Value::Null);
    let mut context = RenderContext::new();
    context.bind("event", Arc::new(ValueProvider::new(payload)));

    for workflow in workflows {
        if !should_execute(workflow, event.kind(), &context) {
            continue;
        }
        if let Err(err) = execute(workflow, factory, &context).await {
            warn!(event = event.kind(), error = %err, "workflow failed to start");
        }
    }
}

/// Loads every `.yaml`/`.yml` file in `dir` as a workflow document. A
/// missing directory yields an empty workflow set rather than an error,
/// since running with no workflows configured is a valid deployment.
fn load_workflows(dir: &Path) -> Vec<WorkflowDocument> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) => {
            warn!(path = %dir.display(), error = %err, "no workflows directory, running without workflows");
            return Vec::new();
        }
    };

    let mut documents = Vec::new();
    for entry in entries.flatten() {
        let path = entry.path();
        let is_yaml = matches!(path.extension().and_then(|ext| ext.to_str()), Some("yaml" | "yml"));
        if !is_yaml {
            continue;
        }
        match std::fs::read_to_string(&path).map(|contents| WorkflowDocument::parse(&contents)) {
            Ok(Ok(document)) => documents.push(document),
            Ok(Err(err)) => warn!(path = %path.display(), error = %err, "failed to parse workflow document"),
            Err(err) => warn!(path = %path.display(), error = %err, "failed to read workflow document"),
        }
    }
    documents
}

#[cfg(test)]
mod tests {
    use super::*;
    use torrentd_engine::{FileEntry, InfoHash, TorrentClientData, TorrentStatus};

    fn sample_status() -> TorrentStatus {
        TorrentStatus {
            info_hash: InfoHash::from_v1("abc"),
            name: Some("demo".to_string()),
            save_path: "/data".to_string(),
            queue_position: 0,
            need_save_resume: false,
            total_download: 0,
            files: None::<Vec<FileEntry>>,
            client_data: TorrentClientData::default(),
        }
    }

    #[tokio::test]
    async fn dispatch_runs_matching_workflow_only() {
        let doc = WorkflowDocument::parse("on: torrent-added\nsteps:\n  - uses: log\n    with: \"event.name\"\n").unwrap();
        let other = WorkflowDocument::parse("on: torrent-removed\nsteps: []\n").unwrap();
        let factory = LogActionFactory;
        let event = Event::TorrentAdded { status: sample_status() };
        dispatch_to_workflows(&[doc, other], &factory, &event).await;
    }

    #[test]
    fn load_workflows_returns_empty_for_missing_directory() {
        let docs = load_workflows(Path::new("/nonexistent/torrentd-workflows-dir"));
        assert!(docs.is_empty());
    }

    #[test]
    fn load_workflows_parses_every_yaml_file_in_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.yaml"), "on: torrent-added\nsteps: []\n").unwrap();
        std::fs::write(dir.path().join("b.yml"), "on: torrent-removed\nsteps: []\n").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let docs = load_workflows(dir.path());
        assert_eq!(docs.len(), 2);
    }

    #[test]
    fn load_workflows_skips_unparsable_documents_and_keeps_others() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("bad.yaml"), "steps: []\n").unwrap();
        std::fs::write(dir.path().join("good.yaml"), "on: torrent-added\nsteps: []\n").unwrap();

        let docs = load_workflows(dir.path());
        assert_eq!(docs.len(), 1);
    }

    #[tokio::test]
    async fn supervisor_construct_load_shutdown_cycle_succeeds() {
        let store = TorrentStore::open_in_memory().await.unwrap();
        let events = EventBus::with_capacity(16);
        let engine = torrentd_test_support::stub_engine();
        let settings = torrentd_test_support::sample_settings();

        let supervisor = SessionSupervisor::construct(engine, store, events.clone(), settings)
            .await
            .unwrap();
        supervisor.load().await.unwrap();
        supervisor.shutdown().await;
    }
}
