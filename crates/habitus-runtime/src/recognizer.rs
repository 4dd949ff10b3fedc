//! Pattern Recognizer – one reconciliation cycle, end to end.
//!
//! ```text
//! Idle ─► Gating ─► Extracting ─► Analyzing ─► Applying ─► Cleaning ─► Idle
//!            │                        │
//!            └── Skipped              └── Failed (nothing applied)
//! ```
//!
//! | Stage      | Work                                                          |
//! |------------|---------------------------------------------------------------|
//! | Gating     | posture, relevant-evidence count, optional minimum interval   |
//! | Extracting | narrow similar-tool summary for the triggering tool           |
//! | Analyzing  | [`ReconciliationAnalyzer`] + evidence gate                    |
//! | Applying   | each accepted modification independently against the store    |
//! | Cleaning   | bulk sweep of memories below `cleanup_threshold`              |
//!
//! [`PatternRecognizer::recognize_patterns`] never returns an error: every
//! failure is folded into the [`RecognitionOutcome`].

use std::num::NonZeroU64;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use habitus_kernel::EvidenceContext;
use habitus_memory::{MemoryStore, StoreError, WeakenOutcome, store::DEFAULT_CONFIDENCE};
use habitus_patterns::{ExtractorConfig, PatternExtractor};
use habitus_types::{HabitusError, Memory, MemoryId, MemoryModification};
use serde::{Deserialize, Serialize};
use tracing::{Span, debug, field, info, instrument, warn};
use uuid::Uuid;

use crate::analyzer::{AnalysisBackend, AnalysisOutcome, AnalyzerConfig, ReconciliationAnalyzer, RejectedProposal};
use crate::prompt::EvidencePackage;

/// Memories below this confidence are not shown to the analysis step.
const MIN_CONTEXT_CONFIDENCE: f64 = 0.1;

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// How often a logged execution leads to a recognition cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum Posture {
    /// Every call runs.
    #[default]
    Development,
    /// Only for the executions whose position in the log is a multiple of
    /// `every_n`.
    Production { every_n: NonZeroU64 },
}

impl Posture {
    /// Production posture running every 10th execution.
    pub fn production() -> Self {
        Posture::Production {
            every_n: NonZeroU64::new(10).unwrap_or(NonZeroU64::MIN),
        }
    }

    fn admits(&self, total_executions: u64) -> bool {
        match self {
            Posture::Development => true,
            Posture::Production { every_n } => total_executions % every_n.get() == 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecognizerConfig {
    pub posture: Posture,
    /// Skip the cycle below this many relevant executions.
    pub min_relevant_executions: usize,
    /// Minimum seconds between two analyses; `None` disables the throttle.
    pub min_interval_secs: Option<u64>,
    /// Memories below this confidence are evicted after each cycle.
    pub cleanup_threshold: f64,
    pub days_to_analyze: i64,
    pub reinforce_factor: f64,
    pub weaken_factor: f64,
    /// Confidence given to memories created by a cycle.
    pub create_confidence: f64,
    pub analyzer: AnalyzerConfig,
}

impl Default for RecognizerConfig {
    fn default() -> Self {
        Self {
            posture: Posture::Development,
            min_relevant_executions: 3,
            min_interval_secs: None,
            cleanup_threshold: 0.1,
            days_to_analyze: 30,
            reinforce_factor: 0.1,
            weaken_factor: 0.2,
            create_confidence: DEFAULT_CONFIDENCE,
            analyzer: AnalyzerConfig::default(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Outcome types
// ─────────────────────────────────────────────────────────────────────────────

/// What caused the cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerContext {
    pub last_tool: Option<String>,
    /// Log size right after the triggering execution was written. Cycles
    /// started without one gate on the live count instead.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_ordinal: Option<u64>,
}

impl TriggerContext {
    pub fn for_tool(tool: impl Into<String>) -> Self {
        Self {
            last_tool: Some(tool.into()),
            execution_ordinal: None,
        }
    }

    pub fn with_ordinal(mut self, ordinal: u64) -> Self {
        self.execution_ordinal = Some(ordinal);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SkipReason {
    /// Production posture and this is not the Nth execution.
    Posture,
    NoTrigger,
    InsufficientEvidence { found: usize, needed: usize },
    Throttled,
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SkipReason::Posture => f.write_str("not scheduled under the current posture"),
            SkipReason::NoTrigger => f.write_str("no triggering tool"),
            SkipReason::InsufficientEvidence { found, needed } => {
                write!(f, "{found} relevant execution(s), need {needed}")
            }
            SkipReason::Throttled => f.write_str("minimum interval has not elapsed"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AppliedKind {
    Created,
    Reinforced,
    Weakened,
    /// Weakened below the cleanup threshold and evicted.
    Deleted,
    Updated,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppliedModification {
    pub kind: AppliedKind,
    pub id: MemoryId,
    pub text: Option<String>,
}

/// An accepted modification the store could not apply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailedModification {
    pub modification: MemoryModification,
    pub reason: HabitusError,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecognitionSummary {
    pub success: bool,
    pub cycle_id: String,
    pub analysis_timestamp: DateTime<Utc>,
    pub total_executions: u64,
    pub insights_saved_count: usize,
    pub memories_cleaned_up: usize,
    pub applied: Vec<AppliedModification>,
    pub failed: Vec<FailedModification>,
    pub rejected: Vec<RejectedProposal>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RecognitionOutcome {
    Skipped { reason: SkipReason, total_executions: u64 },
    Failed { error: String },
    Completed(RecognitionSummary),
}

impl RecognitionOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, RecognitionOutcome::Completed(_))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// PatternRecognizer
// ─────────────────────────────────────────────────────────────────────────────

pub struct PatternRecognizer {
    store: MemoryStore,
    extractor: PatternExtractor,
    analyzer: ReconciliationAnalyzer,
    throttle: Option<DefaultDirectRateLimiter>,
    config: RecognizerConfig,
}

impl PatternRecognizer {
    pub fn new(
        store: MemoryStore,
        backend: Arc<dyn AnalysisBackend>,
        config: RecognizerConfig,
        extractor_config: ExtractorConfig,
    ) -> Self {
        let throttle = config
            .min_interval_secs
            .and_then(|secs| Quota::with_period(Duration::from_secs(secs)))
            .map(RateLimiter::direct);
        Self {
            extractor: PatternExtractor::new(store.clone(), extractor_config),
            analyzer: ReconciliationAnalyzer::new(backend, config.analyzer.clone()),
            store,
            throttle,
            config,
        }
    }

    pub fn config(&self) -> &RecognizerConfig {
        &self.config
    }

    pub fn extractor(&self) -> &PatternExtractor {
        &self.extractor
    }

    /// Run one cycle for `trigger`.
    #[instrument(
        name = "recognition_cycle",
        skip_all,
        fields(cycle_id = field::Empty, tool = ?trigger.last_tool)
    )]
    pub async fn recognize_patterns(&self, trigger: &TriggerContext) -> RecognitionOutcome {
        let cycle_id = Uuid::new_v4().to_string();
        Span::current().record("cycle_id", cycle_id.as_str());

        // ── Gating ──────────────────────────────────────────────────────────
        let total_executions = match self.store.count_tool_executions() {
            Ok(n) => n,
            Err(e) => return failed(e),
        };
        let skip = |reason: SkipReason| {
            debug!(%reason, total_executions, "recognition skipped");
            RecognitionOutcome::Skipped {
                reason,
                total_executions,
            }
        };

        let ordinal = trigger.execution_ordinal.unwrap_or(total_executions);
        if !self.config.posture.admits(ordinal) {
            return skip(SkipReason::Posture);
        }
        let Some(tool) = trigger.last_tool.as_deref() else {
            return skip(SkipReason::NoTrigger);
        };

        // ── Extracting ──────────────────────────────────────────────────────
        let summary = match self
            .extractor
            .generate_similar_tool_summary(Some(tool), self.config.days_to_analyze)
        {
            Ok(summary) => summary,
            Err(e) => return failed(e),
        };
        let found = summary.relevant_count();
        if found < self.config.min_relevant_executions {
            return skip(SkipReason::InsufficientEvidence {
                found,
                needed: self.config.min_relevant_executions,
            });
        }
        // Only consume a throttle slot when the cycle is otherwise going ahead.
        if let Some(limiter) = &self.throttle {
            if limiter.check().is_err() {
                return skip(SkipReason::Throttled);
            }
        }

        let memories = match self.store.get_memories(MIN_CONTEXT_CONFIDENCE, None) {
            Ok(memories) => memories,
            Err(e) => return failed(e),
        };

        // ── Analyzing ───────────────────────────────────────────────────────
        let package = EvidencePackage::new(tool, summary.clone(), &memories);
        let relevance = &self.extractor.config().relevance;
        let evidence = EvidenceContext::new(tool, summary.relevant_executions(), &memories, relevance);
        let (accepted, rejected) = match self.analyzer.analyze(&package, &evidence).await {
            AnalysisOutcome::Proposed { accepted, rejected } => (accepted, rejected),
            AnalysisOutcome::Failed { error } => {
                warn!(%error, "recognition failed during analysis");
                return RecognitionOutcome::Failed { error };
            }
        };

        // ── Applying ────────────────────────────────────────────────────────
        let mut applied = Vec::new();
        let mut failures = Vec::new();
        for modification in accepted {
            match self.apply(&modification, &memories) {
                Ok(done) => {
                    debug!(kind = ?done.kind, id = done.id, "modification applied");
                    applied.push(done);
                }
                Err(reason) => {
                    warn!(%reason, action = %modification.action(), "modification not applied");
                    failures.push(FailedModification {
                        modification,
                        reason,
                    });
                }
            }
        }

        // ── Cleaning ────────────────────────────────────────────────────────
        let memories_cleaned_up = self
            .store
            .cleanup_low_confidence_memories(self.config.cleanup_threshold)
            .unwrap_or_else(|e| {
                warn!(error = %e, "cleanup failed");
                0
            });

        let summary = RecognitionSummary {
            success: true,
            cycle_id,
            analysis_timestamp: Utc::now(),
            total_executions,
            insights_saved_count: applied.len(),
            memories_cleaned_up,
            applied,
            failed: failures,
            rejected,
        };
        info!(
            applied = summary.insights_saved_count,
            failed = summary.failed.len(),
            rejected = summary.rejected.len(),
            cleaned_up = memories_cleaned_up,
            "recognition cycle complete"
        );
        RecognitionOutcome::Completed(summary)
    }

    fn apply(&self, modification: &MemoryModification, shown: &[Memory]) -> Result<AppliedModification, HabitusError> {
        let previous_text = |id| shown.iter().find(|m| m.id == id).map(|m| m.text.as_str());

        match modification {
            MemoryModification::Create { text } => {
                let id = self.store.add_memory(text, self.config.create_confidence)?;
                Ok(applied(AppliedKind::Created, id, Some(text.as_str())))
            }
            MemoryModification::Reinforce { id } => {
                if self.store.reinforce_memory(*id, self.config.reinforce_factor)? {
                    Ok(applied(AppliedKind::Reinforced, *id, previous_text(*id)))
                } else {
                    Err(HabitusError::NotFound(*id))
                }
            }
            MemoryModification::Weaken { id } => {
                match self
                    .store
                    .weaken_memory(*id, self.config.weaken_factor, self.config.cleanup_threshold)?
                {
                    WeakenOutcome::Weakened => Ok(applied(AppliedKind::Weakened, *id, previous_text(*id))),
                    WeakenOutcome::Deleted => Ok(applied(AppliedKind::Deleted, *id, previous_text(*id))),
                    WeakenOutcome::NotFound => Err(HabitusError::NotFound(*id)),
                }
            }
            MemoryModification::UpdateContent { id, text } => {
                if self.store.update_memory_content(*id, text)? {
                    Ok(applied(AppliedKind::Updated, *id, Some(text.as_str())))
                } else {
                    Err(HabitusError::NotFound(*id))
                }
            }
        }
    }
}

fn applied(kind: AppliedKind, id: MemoryId, text: Option<&str>) -> AppliedModification {
    AppliedModification {
        kind,
        id,
        text: text.map(str::to_string),
    }
}

fn failed(e: StoreError) -> RecognitionOutcome {
    let error = HabitusError::from(e).to_string();
    warn!(%error, "recognition failed");
    RecognitionOutcome::Failed { error }
}
