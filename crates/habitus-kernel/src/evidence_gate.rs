//! [`EvidenceGate`] – programmatic check between analysis and the store.
//!
//! The external analysis step is instructed to be conservative, but nothing
//! forces it to comply. Every proposed [`MemoryModification`] therefore passes
//! through [`EvidenceGate::review`] before it is applied. Each registered
//! [`EvidenceRule`] is evaluated in order; the first violation rejects the
//! modification and records the reason.
//!
//! # Example
//!
//! ```
//! use habitus_kernel::{EvidenceContext, EvidenceGate};
//! use habitus_patterns::RelevanceConfig;
//! use habitus_types::MemoryModification;
//!
//! let gate = EvidenceGate::with_default_rules();
//! let relevance = RelevanceConfig::default();
//! let ctx = EvidenceContext::new("play_song", &[], &[], &relevance);
//!
//! // No executions at all: a create cannot be supported.
//! let review = gate.review(
//!     vec![MemoryModification::Create { text: "User likes EDM music".into() }],
//!     &ctx,
//! );
//! assert!(review.accepted.is_empty());
//! assert_eq!(review.rejected.len(), 1);
//! ```

use habitus_patterns::RelevanceConfig;
use habitus_types::{HabitusError, Memory, MemoryId, MemoryModification, ToolExecution};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::rules::{KnownMemoryRule, ShapeRule, SupportRule};

// ────────────────────────────────────────────────────────────────────────────
// EvidenceContext
// ────────────────────────────────────────────────────────────────────────────

/// The evidence a batch of modifications is judged against: the same
/// relevance-filtered executions and memory list the analysis step saw.
pub struct EvidenceContext<'a> {
    pub trigger_tool: &'a str,
    pub relevant_executions: &'a [ToolExecution],
    pub memories: &'a [Memory],
    pub relevance: &'a RelevanceConfig,
}

impl<'a> EvidenceContext<'a> {
    pub fn new(
        trigger_tool: &'a str,
        relevant_executions: &'a [ToolExecution],
        memories: &'a [Memory],
        relevance: &'a RelevanceConfig,
    ) -> Self {
        Self {
            trigger_tool,
            relevant_executions,
            memories,
            relevance,
        }
    }

    pub fn memory(&self, id: MemoryId) -> Option<&Memory> {
        self.memories.iter().find(|m| m.id == id)
    }

    /// Number of relevant executions that back `modification`.
    ///
    /// An execution supports a modification when its argument keywords
    /// overlap the keywords of the memory text (the proposed text and, for
    /// existing memories, the stored text). A run of the trigger tool also
    /// counts when the memory text is about that tool's category.
    pub fn support_for(&self, modification: &MemoryModification) -> usize {
        let mut keywords = modification
            .text()
            .map(|t| self.relevance.keywords_in(t))
            .unwrap_or_default();
        if let Some(existing) = modification.id().and_then(|id| self.memory(id)) {
            keywords.extend(self.relevance.keywords_in(&existing.text));
        }
        let on_topic = !self
            .relevance
            .topic_terms(self.trigger_tool)
            .is_disjoint(&keywords);

        self.relevant_executions
            .iter()
            .filter(|exec| {
                (on_topic && exec.tool == self.trigger_tool)
                    || self
                        .relevance
                        .extract_keywords(exec.arguments.as_ref())
                        .iter()
                        .any(|k| keywords.contains(k))
            })
            .count()
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Rule trait
// ────────────────────────────────────────────────────────────────────────────

/// A single condition a proposed modification must satisfy.
///
/// Implement this trait to add custom checks and register them with
/// [`EvidenceGate::add_rule`].
pub trait EvidenceRule: Send + Sync {
    /// Human-readable name used in log lines.
    fn name(&self) -> &str;

    /// `Ok(())` when `modification` is acceptable under `ctx`.
    fn check(
        &self,
        modification: &MemoryModification,
        ctx: &EvidenceContext<'_>,
    ) -> Result<(), HabitusError>;
}

// ────────────────────────────────────────────────────────────────────────────
// EvidenceGate
// ────────────────────────────────────────────────────────────────────────────

/// A modification turned away by the gate, with the reason.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RejectedModification {
    pub modification: MemoryModification,
    pub reason: HabitusError,
}

/// Outcome of [`EvidenceGate::review`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GateReview {
    pub accepted: Vec<MemoryModification>,
    pub rejected: Vec<RejectedModification>,
}

/// Ordered rule engine over proposed modifications.
#[derive(Default)]
pub struct EvidenceGate {
    rules: Vec<Box<dyn EvidenceRule>>,
}

impl EvidenceGate {
    /// Create a gate with no rules; everything passes.
    pub fn new() -> Self {
        Self::default()
    }

    /// [`ShapeRule`], [`KnownMemoryRule`] and [`SupportRule`] with their
    /// default thresholds, in that order.
    pub fn with_default_rules() -> Self {
        let mut gate = Self::new();
        gate.add_rule(Box::new(ShapeRule::default()));
        gate.add_rule(Box::new(KnownMemoryRule));
        gate.add_rule(Box::new(SupportRule::default()));
        gate
    }

    /// Register a rule. Rules are evaluated in insertion order.
    pub fn add_rule(&mut self, rule: Box<dyn EvidenceRule>) {
        self.rules.push(rule);
    }

    /// Check one modification against every rule.
    pub fn verify(
        &self,
        modification: &MemoryModification,
        ctx: &EvidenceContext<'_>,
    ) -> Result<(), HabitusError> {
        for rule in &self.rules {
            if let Err(reason) = rule.check(modification, ctx) {
                debug!(rule = rule.name(), action = %modification.action(), %reason, "rule failed");
                return Err(reason);
            }
        }
        Ok(())
    }

    /// Split a batch into accepted and rejected modifications.
    pub fn review(
        &self,
        modifications: Vec<MemoryModification>,
        ctx: &EvidenceContext<'_>,
    ) -> GateReview {
        let mut review = GateReview::default();
        for modification in modifications {
            match self.verify(&modification, ctx) {
                Ok(()) => review.accepted.push(modification),
                Err(reason) => {
                    warn!(action = %modification.action(), id = ?modification.id(), %reason, "modification rejected");
                    review.rejected.push(RejectedModification {
                        modification,
                        reason,
                    });
                }
            }
        }
        review
    }
}
