//! [`MemoryEngine`] – the entry point embedding applications hold on to.
//!
//! Owns the store, the recognizer and the background [`TaskPool`]. The host
//! calls [`MemoryEngine::on_tool_executed`] once per completed action: the
//! execution is written synchronously, then a recognition cycle for that tool
//! is dispatched into the pool so the caller never waits on the analysis
//! step. [`MemoryEngine::shutdown`] waits for in-flight cycles.

use std::sync::Arc;
use std::time::Duration;

use habitus_memory::MemoryStore;
use habitus_types::{HabitusError, NewToolExecution};
use tracing::{debug, info};

use crate::analyzer::AnalysisBackend;
use crate::config::EngineConfig;
use crate::llm_driver::LlmDriver;
use crate::memory_tools::MemoryTools;
use crate::recognizer::{PatternRecognizer, RecognitionOutcome, TriggerContext};
use crate::task_pool::{DrainReport, TaskPool};

pub struct MemoryEngine {
    store: MemoryStore,
    recognizer: Arc<PatternRecognizer>,
    pool: TaskPool,
    tools: MemoryTools,
    drain_timeout: Duration,
}

impl MemoryEngine {
    pub fn new(store: MemoryStore, backend: Arc<dyn AnalysisBackend>, config: &EngineConfig) -> Self {
        let recognizer = PatternRecognizer::new(
            store.clone(),
            backend,
            config.effective_recognizer(),
            config.extractor.clone(),
        );
        Self {
            tools: MemoryTools::new(store.clone()),
            store,
            recognizer: Arc::new(recognizer),
            pool: TaskPool::new(config.max_in_flight),
            drain_timeout: Duration::from_secs(config.drain_timeout_secs),
        }
    }

    /// Open the database at `config.db_path` and analyze through an
    /// [`LlmDriver`] pointed at `config.llm_url`.
    pub fn from_config(config: &EngineConfig) -> Result<Self, HabitusError> {
        let store = MemoryStore::open(&config.db_path)?;
        let mut driver = LlmDriver::new(&config.llm_url, &config.model);
        if let Some(key) = &config.api_key {
            driver = driver.with_api_key(key.clone());
        }
        info!(db = %config.db_path.display(), model = %config.model, "memory engine ready");
        Ok(Self::new(store, Arc::new(driver), config))
    }

    pub fn store(&self) -> &MemoryStore {
        &self.store
    }

    pub fn tools(&self) -> &MemoryTools {
        &self.tools
    }

    pub fn recognizer(&self) -> &PatternRecognizer {
        &self.recognizer
    }

    /// Log `execution` and schedule a recognition cycle for its tool.
    ///
    /// Only the write is awaited. Outside a Tokio runtime, or when the pool is
    /// full, the cycle is simply not scheduled.
    pub fn on_tool_executed(&self, execution: NewToolExecution) -> Result<i64, HabitusError> {
        let (id, ordinal) = self.store.log_and_count_tool_execution(&execution)?;

        if tokio::runtime::Handle::try_current().is_err() {
            debug!(id, "no async runtime; recognition not scheduled");
            return Ok(id);
        }
        let recognizer = Arc::clone(&self.recognizer);
        let trigger = TriggerContext::for_tool(execution.tool).with_ordinal(ordinal);
        self.pool.spawn(async move {
            recognizer.recognize_patterns(&trigger).await;
        });
        Ok(id)
    }

    /// Run a cycle in the foreground and return its outcome.
    pub async fn recognize_now(&self, trigger: &TriggerContext) -> RecognitionOutcome {
        self.recognizer.recognize_patterns(trigger).await
    }

    pub fn in_flight(&self) -> usize {
        self.pool.in_flight()
    }

    /// Stop accepting cycles and wait for the running ones, aborting any still
    /// running after the drain timeout.
    pub async fn shutdown(&self) -> DrainReport {
        self.pool.drain(self.drain_timeout).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::tests::StubBackend;
    use crate::recognizer::Posture;
    use std::num::NonZeroU64;
    use serde_json::json;

    fn engine(backend: Arc<StubBackend>) -> MemoryEngine {
        MemoryEngine::new(MemoryStore::open_in_memory().unwrap(), backend, &EngineConfig::default())
    }

    fn song(artist: &str) -> NewToolExecution {
        NewToolExecution::new("play_song").with_arguments(json!({"artist": artist, "genre": "EDM"}))
    }

    async fn settle(engine: &MemoryEngine) {
        for _ in 0..1000 {
            if engine.in_flight() == 0 {
                return;
            }
            tokio::task::yield_now().await;
        }
        panic!("background cycles did not finish");
    }

    #[tokio::test]
    async fn third_execution_triggers_the_first_analysis() {
        let backend = StubBackend::replying(json!({
            "memory_modifications": [{"action": "create", "id": null, "text": "User likes EDM music"}]
        }));
        let engine = engine(backend.clone());

        for artist in ["Avicii", "Kygo"] {
            engine.on_tool_executed(song(artist)).unwrap();
            settle(&engine).await;
        }
        assert_eq!(backend.call_count(), 0);

        engine.on_tool_executed(song("Tiësto")).unwrap();
        settle(&engine).await;
        assert_eq!(backend.call_count(), 1);

        let stats = engine.store().get_memory_stats().unwrap();
        assert_eq!(stats.total_memories, 1);
        assert_eq!(engine.shutdown().await.aborted, 0);
    }

    #[tokio::test]
    async fn shutdown_waits_for_dispatched_cycles() {
        let backend = StubBackend::replying(json!({"memory_modifications": []}));
        let engine = engine(backend.clone());
        for artist in ["Avicii", "Kygo", "Tiësto"] {
            engine.on_tool_executed(song(artist)).unwrap();
        }
        let report = engine.shutdown().await;
        assert_eq!(report.completed, 3);
        assert_eq!(engine.in_flight(), 0);
    }

    #[tokio::test]
    async fn production_burst_runs_the_nth_cycle_once() {
        let backend = StubBackend::replying(json!({"memory_modifications": []}));
        let mut config = EngineConfig::default();
        config.recognizer.posture = Posture::Production {
            every_n: NonZeroU64::new(4).unwrap(),
        };
        let engine = MemoryEngine::new(MemoryStore::open_in_memory().unwrap(), backend.clone(), &config);

        for artist in ["Avicii", "Kygo", "Tiësto", "Kygo", "Avicii"] {
            engine.on_tool_executed(song(artist)).unwrap();
        }
        let report = engine.shutdown().await;
        assert_eq!(report.completed, 5);
        assert_eq!(backend.call_count(), 1);
    }

    #[test]
    fn logging_works_without_a_runtime() {
        let engine = engine(StubBackend::replying(json!({"memory_modifications": []})));
        let id = engine.on_tool_executed(song("Avicii")).unwrap();
        assert_eq!(id, 1);
        assert_eq!(engine.store().count_tool_executions().unwrap(), 1);
        assert_eq!(engine.in_flight(), 0);
    }

    #[test]
    fn empty_tool_name_is_rejected() {
        let engine = engine(StubBackend::replying(json!({"memory_modifications": []})));
        let err = engine.on_tool_executed(NewToolExecution::new("")).unwrap_err();
        assert!(matches!(err, HabitusError::Validation(_)));
    }

    #[tokio::test]
    async fn recognize_now_reports_skips() {
        let engine = engine(StubBackend::replying(json!({"memory_modifications": []})));
        let outcome = engine.recognize_now(&TriggerContext::for_tool("play_song")).await;
        assert!(matches!(outcome, RecognitionOutcome::Skipped { total_executions: 0, .. }));
    }

    #[test]
    fn from_config_opens_the_database_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = EngineConfig {
            db_path: dir.path().join("nested").join("habitus.db"),
            ..EngineConfig::default()
        };
        let engine = MemoryEngine::from_config(&config).unwrap();
        engine.tools().save_memory("User likes EDM music");
        assert!(config.db_path.exists());
    }
}
