//! `habitus-runtime` – The Reconciliation Pipeline
//!
//! Turns mined patterns into bounded, auditable mutations of the memory store
//! and runs that work in the background of the host application.
//!
//! # Modules
//!
//! - [`engine`] – [`MemoryEngine`][engine::MemoryEngine]: the entry point.
//!   Logs each tool execution synchronously and dispatches a recognition cycle
//!   into the [`TaskPool`][task_pool::TaskPool].
//! - [`recognizer`] – [`PatternRecognizer`][recognizer::PatternRecognizer]:
//!   the Gating → Extracting → Analyzing → Applying → Cleaning cycle, reported
//!   as a [`RecognitionOutcome`][recognizer::RecognitionOutcome].
//! - [`analyzer`] – [`ReconciliationAnalyzer`][analyzer::ReconciliationAnalyzer]:
//!   calls the injected [`AnalysisBackend`][analyzer::AnalysisBackend] under a
//!   hard timeout, parses the structured reply and passes every proposal
//!   through the [`EvidenceGate`][habitus_kernel::EvidenceGate].
//! - [`prompt`] – the system prompt and the
//!   [`EvidencePackage`][prompt::EvidencePackage] rendered into the user
//!   message.
//! - [`llm_driver`] – [`LlmDriver`][llm_driver::LlmDriver]: the production
//!   backend, an OpenAI-compatible chat-completions client that constrains the
//!   reply with `response_format: json_schema`.
//! - [`task_pool`] – [`TaskPool`][task_pool::TaskPool]: bounded, drainable set
//!   of background tasks.
//! - [`memory_tools`] – [`MemoryTools`][memory_tools::MemoryTools]: search,
//!   save, list, modify and delete, each answering with a serializable
//!   [`ToolResponse`][memory_tools::ToolResponse].
//! - [`config`] – [`EngineConfig`][config::EngineConfig].
//! - [`telemetry`] – [`init_tracing`][telemetry::init_tracing]: global
//!   `tracing` subscriber with an optional OTLP span exporter. Set
//!   `OTEL_EXPORTER_OTLP_ENDPOINT` to export `recognition_cycle` spans.
//!
//! # Example
//!
//! ```rust,no_run
//! use habitus_runtime::{EngineConfig, MemoryEngine};
//! use habitus_types::NewToolExecution;
//! use serde_json::json;
//!
//! # async fn run() -> Result<(), habitus_types::HabitusError> {
//! let engine = MemoryEngine::from_config(&EngineConfig::default())?;
//! engine.on_tool_executed(
//!     NewToolExecution::new("play_song").with_arguments(json!({"artist": "Avicii"})),
//! )?;
//! engine.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod analyzer;
pub mod config;
pub mod engine;
pub mod llm_driver;
pub mod memory_tools;
pub mod prompt;
pub mod recognizer;
pub mod task_pool;
pub mod telemetry;

pub use analyzer::{AnalysisBackend, AnalysisOutcome, AnalyzerConfig, ReconciliationAnalyzer, RejectedProposal};
pub use config::EngineConfig;
pub use engine::MemoryEngine;
pub use llm_driver::{ChatMessage, LlmDriver, LlmError, Role};
pub use memory_tools::{MemoryTools, ToolResponse, ToolStatus};
pub use prompt::{EvidencePackage, SYSTEM_PROMPT};
pub use recognizer::{
    AppliedKind, AppliedModification, FailedModification, PatternRecognizer, Posture,
    RecognitionOutcome, RecognitionSummary, RecognizerConfig, SkipReason, TriggerContext,
};
pub use task_pool::{DrainReport, TaskPool};
pub use telemetry::{TracerProviderGuard, init_tracing};
