//! Reconciliation Analyzer.
//!
//! Turns an [`EvidencePackage`] into a bounded list of typed memory
//! modifications:
//!
//! 1. render the package into [`SYSTEM_PROMPT`] + user message;
//! 2. call the injected [`AnalysisBackend`] under a hard timeout, asking for
//!    JSON matching [`response_schema`];
//! 3. parse the reply, convert each item into a
//!    [`MemoryModification`] and pass the batch through the [`EvidenceGate`].
//!
//! Any failure in steps 1–2 or an unparsable reply yields
//! [`AnalysisOutcome::Failed`] and no modifications at all. Individual items
//! that are malformed, over the limit or unsupported by evidence are reported
//! in [`AnalysisOutcome::Proposed::rejected`] and never applied.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use habitus_kernel::{EvidenceContext, EvidenceGate};
use habitus_types::{HabitusError, MemoryModification, ProposedModification};
use schemars::{JsonSchema, schema_for};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::llm_driver::LlmError;
use crate::prompt::{EvidencePackage, SYSTEM_PROMPT};

// ─────────────────────────────────────────────────────────────────────────────
// Backend seam
// ─────────────────────────────────────────────────────────────────────────────

/// The external judgment step: takes a system and user prompt plus a JSON
/// schema, returns the raw reply text.
#[async_trait]
pub trait AnalysisBackend: Send + Sync {
    async fn complete(&self, system: &str, user: &str, schema: &Value) -> Result<String, LlmError>;
}

// ─────────────────────────────────────────────────────────────────────────────
// Response contract
// ─────────────────────────────────────────────────────────────────────────────

/// Expected shape of the backend's reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct AnalysisResponse {
    pub memory_modifications: Vec<ProposedModification>,
}

/// Mark every declared property as required and forbid extras, recursively.
///
/// Optional fields must still be present (as `null`) on the wire, which is
/// also what strict structured-output modes demand.
fn require_all_properties(schema: &mut Value) {
    match schema {
        Value::Object(map) => {
            if let Some(Value::Object(props)) = map.get("properties") {
                let keys: Vec<Value> = props.keys().cloned().map(Value::String).collect();
                map.insert("required".into(), Value::Array(keys));
                map.insert("additionalProperties".into(), Value::Bool(false));
            }
            map.values_mut().for_each(require_all_properties);
        }
        Value::Array(items) => items.iter_mut().for_each(require_all_properties),
        _ => {}
    }
}

/// JSON schema of [`AnalysisResponse`] with every field required.
pub fn response_schema() -> Value {
    let mut schema = serde_json::to_value(schema_for!(AnalysisResponse)).unwrap_or(Value::Null);
    require_all_properties(&mut schema);
    schema
}

/// Remove a surrounding Markdown code fence, if any.
fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let body = rest.split_once('\n').map_or("", |(_, body)| body);
    body.trim_end().strip_suffix("```").unwrap_or(body).trim()
}

// ─────────────────────────────────────────────────────────────────────────────
// Outcome
// ─────────────────────────────────────────────────────────────────────────────

/// A proposal that will not be applied, and why.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RejectedProposal {
    pub proposal: ProposedModification,
    pub reason: HabitusError,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AnalysisOutcome {
    /// Backend error, timeout or unparsable reply. Nothing may be applied.
    Failed { error: String },
    Proposed {
        accepted: Vec<MemoryModification>,
        rejected: Vec<RejectedProposal>,
    },
}

// ─────────────────────────────────────────────────────────────────────────────
// Analyzer
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyzerConfig {
    /// Hard limit on one backend call.
    pub timeout_secs: u64,
    /// Proposals beyond this count are rejected unread.
    pub max_modifications: usize,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            max_modifications: 10,
        }
    }
}

pub struct ReconciliationAnalyzer {
    backend: Arc<dyn AnalysisBackend>,
    gate: EvidenceGate,
    config: AnalyzerConfig,
    schema: Value,
}

impl ReconciliationAnalyzer {
    /// Analyzer with the default evidence rules.
    pub fn new(backend: Arc<dyn AnalysisBackend>, config: AnalyzerConfig) -> Self {
        Self::with_gate(backend, EvidenceGate::with_default_rules(), config)
    }

    pub fn with_gate(backend: Arc<dyn AnalysisBackend>, gate: EvidenceGate, config: AnalyzerConfig) -> Self {
        Self {
            backend,
            gate,
            config,
            schema: response_schema(),
        }
    }

    /// Run one analysis over `package`, judging proposals against `evidence`.
    pub async fn analyze(&self, package: &EvidencePackage, evidence: &EvidenceContext<'_>) -> AnalysisOutcome {
        let user = match package.render() {
            Ok(user) => user,
            Err(e) => return failed(format!("cannot render evidence: {e}")),
        };

        let timeout = Duration::from_secs(self.config.timeout_secs);
        let call = self.backend.complete(SYSTEM_PROMPT, &user, &self.schema);
        let raw = match tokio::time::timeout(timeout, call).await {
            Ok(Ok(raw)) => raw,
            Ok(Err(e)) => return failed(e.to_string()),
            Err(_) => return failed(LlmError::Timeout(timeout).to_string()),
        };

        let response: AnalysisResponse = match serde_json::from_str(strip_code_fence(&raw)) {
            Ok(response) => response,
            Err(e) => return failed(format!("unparsable analysis response: {e}")),
        };
        debug!(proposed = response.memory_modifications.len(), "analysis response parsed");

        let mut rejected = Vec::new();
        let mut candidates = Vec::new();
        for (i, proposal) in response.memory_modifications.into_iter().enumerate() {
            if i >= self.config.max_modifications {
                rejected.push(RejectedProposal {
                    proposal,
                    reason: HabitusError::Validation(format!(
                        "more than {} modifications proposed",
                        self.config.max_modifications
                    )),
                });
                continue;
            }
            match MemoryModification::try_from(proposal.clone()) {
                Ok(m) => candidates.push(m),
                Err(reason) => {
                    warn!(%reason, "malformed modification");
                    rejected.push(RejectedProposal { proposal, reason });
                }
            }
        }

        let review = self.gate.review(candidates, evidence);
        rejected.extend(review.rejected.into_iter().map(|r| RejectedProposal {
            proposal: r.modification.into(),
            reason: r.reason,
        }));

        info!(accepted = review.accepted.len(), rejected = rejected.len(), "analysis complete");
        AnalysisOutcome::Proposed {
            accepted: review.accepted,
            rejected,
        }
    }
}

fn failed(error: String) -> AnalysisOutcome {
    warn!(%error, "analysis failed");
    AnalysisOutcome::Failed { error }
}
