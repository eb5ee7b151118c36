//! Composition root (§6): wires the memory store, event scheduler,
//! extractor, consolidation loop and per-key lock behind one handle a
//! process constructs exactly once. Grounded on the teacher's
//! `skynet-gateway/src/app.rs::AppState` — a struct of already-constructed
//! collaborator handles, built once and shared via `Arc`.

use std::path::Path;
use std::sync::Arc;

use rusqlite::Connection;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use vigil_concurrency::PerKeyLock;
use vigil_consolidate::ConsolidationLoop;
use vigil_core::config::VigilConfig;
use vigil_core::ids::ChatId;
use vigil_core::llm::{Embedder, LlmBackend};
use vigil_extractor::MemoryExtractor;
use vigil_memory::manager::MemoryStore;
use vigil_memory::mirror::{MirrorSink, NullMirrorSink};
use vigil_scheduler::engine::EventScheduler;

use crate::delivery::DeliveryLoop;
use crate::error::{Result, RuntimeError};
use crate::sink::{LoggingProactiveSink, ProactiveSink};

/// Everything a turn handler needs, constructed once per process and
/// shared behind `Arc<AppState>`.
pub struct AppState {
    pub config: VigilConfig,
    pub memory: Arc<MemoryStore>,
    pub scheduler: Arc<EventScheduler>,
    pub extractor: Arc<MemoryExtractor>,
    pub consolidation: Arc<ConsolidationLoop>,
    pub chat_locks: PerKeyLock<ChatId>,
}

/// Loads `vigil.toml` (plus `VIGIL_*` env overrides) and validates it,
/// per §6. The composition root owns config loading since it's the first
/// thing a process does before any collaborator can be constructed.
pub fn load_config(path: Option<&str>) -> Result<VigilConfig> {
    Ok(VigilConfig::load(path)?)
}

impl AppState {
    /// Opens both SQLite databases (§6: `<data_dir>/memory.db` and
    /// `<data_dir>/proactive.db`) and wires every collaborator. `mirror`
    /// and `embedder` are optional external concerns (markdown mirror
    /// writers and embedding providers are both out of scope here); pass
    /// `None`/`NullMirrorSink` for a core with no such integration.
    pub fn new(
        config: VigilConfig,
        llm: Arc<dyn LlmBackend>,
        embedder: Option<Arc<dyn Embedder>>,
        mirror: Option<Arc<dyn MirrorSink>>,
    ) -> Result<Self> {
        std::fs::create_dir_all(&config.database.data_dir)?;

        let memory_conn = open_db(&config.database.data_dir, "memory.db")?;
        let proactive_conn = open_db(&config.database.data_dir, "proactive.db")?;

        let mirror = mirror.unwrap_or_else(|| Arc::new(NullMirrorSink));
        let memory = Arc::new(MemoryStore::new(memory_conn, config.memory.clone(), embedder, mirror)?);
        let scheduler = Arc::new(EventScheduler::new(proactive_conn)?);
        let extractor = Arc::new(MemoryExtractor::new(memory.clone(), scheduler.clone(), llm.clone()));
        let consolidation =
            Arc::new(ConsolidationLoop::new(memory.clone(), extractor.clone(), llm, config.memory.consolidation.clone()));

        Ok(Self {
            config,
            memory,
            scheduler,
            extractor,
            consolidation,
            chat_locks: PerKeyLock::new(),
        })
    }

    /// Starts the consolidation ticker and the scheduler claim-and-deliver
    /// loop as long-lived tasks sharing one shutdown signal (§5: "a global
    /// cancellation signal ... reaches every long-lived task").
    pub fn spawn_background_tasks(
        self: &Arc<Self>,
        proactive_sink: Option<Arc<dyn ProactiveSink>>,
        shutdown: watch::Receiver<bool>,
    ) -> BackgroundHandles {
        let proactive_sink = proactive_sink.unwrap_or_else(|| Arc::new(LoggingProactiveSink));
        let consolidation = self.consolidation.clone().start(shutdown.clone());
        let delivery = Arc::new(DeliveryLoop::new(self.scheduler.clone(), proactive_sink)).start(shutdown);
        BackgroundHandles { consolidation, delivery }
    }
}

pub struct BackgroundHandles {
    pub consolidation: Option<JoinHandle<()>>,
    pub delivery: JoinHandle<()>,
}

impl BackgroundHandles {
    pub async fn join(self) {
        if let Some(handle) = self.consolidation {
            let _ = handle.await;
        }
        let _ = self.delivery.await;
    }
}

fn open_db(data_dir: &str, file_name: &str) -> Result<Connection> {
    let path = Path::new(data_dir).join(file_name);
    let conn = Connection::open(&path).map_err(|e| RuntimeError::Database { path: path.display().to_string(), source: e })?;
    conn.pragma_update(None, "journal_mode", "WAL").map_err(|e| RuntimeError::Database { path: path.display().to_string(), source: e })?;
    Ok(conn)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_util::sync::CancellationToken;
    use vigil_core::error::LlmError;
    use vigil_core::llm::{CompletionRequest, CompletionResponse};

    struct NeverCalledLlm;
    #[async_trait::async_trait]
    impl LlmBackend for NeverCalledLlm {
        async fn complete(&self, _req: CompletionRequest, _cancel: CancellationToken) -> std::result::Result<CompletionResponse, LlmError> {
            panic!("this LLM should never be invoked by wiring-only tests");
        }
    }

    fn unique_data_dir(label: &str) -> String {
        let dir = std::env::temp_dir().join(format!("vigil-runtime-test-{label}-{}", std::process::id()));
        dir.to_string_lossy().into_owned()
    }

    #[test]
    fn app_state_wires_every_collaborator() {
        let dir = unique_data_dir("wires");
        let mut config = VigilConfig::default();
        config.database.data_dir = dir.clone();

        let llm: Arc<dyn LlmBackend> = Arc::new(NeverCalledLlm);
        let app = AppState::new(config, llm, None, None).expect("app state should construct cleanly");

        assert_eq!(app.chat_locks.tracked_keys(), 0);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn disabled_consolidation_does_not_spawn_a_task() {
        let dir = unique_data_dir("disabled-consolidation");
        let mut config = VigilConfig::default();
        config.database.data_dir = dir.clone();
        config.memory.consolidation.enabled = false;

        let llm: Arc<dyn LlmBackend> = Arc::new(NeverCalledLlm);
        let app = Arc::new(AppState::new(config, llm, None, None).unwrap());
        let (_tx, rx) = watch::channel(false);
        let handles = app.spawn_background_tasks(None, rx);
        assert!(handles.consolidation.is_none());
        handles.delivery.abort();

        std::fs::remove_dir_all(&dir).ok();
    }
}
