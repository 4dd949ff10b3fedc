use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Identifier assigned by the store when a memory is created.
pub type MemoryId = i64;

/// A stored natural-language statement about the user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Memory {
    pub id: MemoryId,
    pub text: String,
    /// Always within `[0.0, 1.0]`.
    pub confidence: f64,
    pub last_updated: DateTime<Utc>,
}

/// One recorded invocation of an external action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolExecution {
    pub id: i64,
    /// e.g., "play_song", "google_search"
    pub tool: String,
    pub arguments: Option<serde_json::Value>,
    pub result: Option<serde_json::Value>,
    pub context: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl ToolExecution {
    /// Look up a string-valued argument by key.
    pub fn argument_str(&self, key: &str) -> Option<&str> {
        self.arguments.as_ref()?.get(key)?.as_str()
    }

    /// `true` unless the result explicitly reports `"success": false`.
    pub fn succeeded(&self) -> bool {
        self.result
            .as_ref()
            .and_then(|r| r.get("success"))
            .and_then(serde_json::Value::as_bool)
            .unwrap_or(true)
    }
}

/// Payload for appending a record to the execution log.
///
/// Leaving `timestamp` unset stamps the record with the current time; setting
/// it allows deterministic backfill and replay.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewToolExecution {
    pub tool: String,
    pub arguments: Option<serde_json::Value>,
    pub result: Option<serde_json::Value>,
    pub context: Option<String>,
    pub timestamp: Option<DateTime<Utc>>,
}

impl NewToolExecution {
    pub fn new(tool: impl Into<String>) -> Self {
        Self {
            tool: tool.into(),
            ..Self::default()
        }
    }

    pub fn with_arguments(mut self, arguments: serde_json::Value) -> Self {
        self.arguments = Some(arguments);
        self
    }

    pub fn with_result(mut self, result: serde_json::Value) -> Self {
        self.result = Some(result);
        self
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }
}

/// The four mutation kinds the reconciliation step may propose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum MemoryAction {
    /// Add a new memory (id must be null, text required).
    Create,
    /// Raise the confidence of an existing memory (text must be null).
    Reinforce,
    /// Lower the confidence of an existing memory, possibly deleting it.
    Weaken,
    /// Replace the text of an existing memory (id and text required).
    UpdateContent,
}

impl MemoryAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            MemoryAction::Create => "create",
            MemoryAction::Reinforce => "reinforce",
            MemoryAction::Weaken => "weaken",
            MemoryAction::UpdateContent => "update_content",
        }
    }
}

impl std::fmt::Display for MemoryAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Wire form of a proposed mutation, as produced by the external analysis
/// step. Every field is always present; unused ones are `null`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ProposedModification {
    pub action: MemoryAction,
    /// Memory id for reinforce/weaken/update_content, null for create.
    pub id: Option<MemoryId>,
    /// Memory text for create/update_content, null for reinforce/weaken.
    #[serde(alias = "memory")]
    pub text: Option<String>,
}

impl From<MemoryModification> for ProposedModification {
    fn from(m: MemoryModification) -> Self {
        let action = m.action();
        let id = m.id();
        let text = match m {
            MemoryModification::Create { text } | MemoryModification::UpdateContent { text, .. } => {
                Some(text)
            }
            _ => None,
        };
        Self { action, id, text }
    }
}

/// A validated mutation ready to be applied to the memory store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum MemoryModification {
    Create { text: String },
    Reinforce { id: MemoryId },
    Weaken { id: MemoryId },
    UpdateContent { id: MemoryId, text: String },
}

impl MemoryModification {
    pub fn action(&self) -> MemoryAction {
        match self {
            MemoryModification::Create { .. } => MemoryAction::Create,
            MemoryModification::Reinforce { .. } => MemoryAction::Reinforce,
            MemoryModification::Weaken { .. } => MemoryAction::Weaken,
            MemoryModification::UpdateContent { .. } => MemoryAction::UpdateContent,
        }
    }

    /// Target memory id; `None` only for [`MemoryModification::Create`].
    pub fn id(&self) -> Option<MemoryId> {
        match self {
            MemoryModification::Create { .. } => None,
            MemoryModification::Reinforce { id }
            | MemoryModification::Weaken { id }
            | MemoryModification::UpdateContent { id, .. } => Some(*id),
        }
    }

    pub fn text(&self) -> Option<&str> {
        match self {
            MemoryModification::Create { text } | MemoryModification::UpdateContent { text, .. } => {
                Some(text)
            }
            _ => None,
        }
    }
}

impl TryFrom<ProposedModification> for MemoryModification {
    type Error = HabitusError;

    fn try_from(raw: ProposedModification) -> Result<Self, Self::Error> {
        let text = raw.text.filter(|t| !t.trim().is_empty());
        match (raw.action, raw.id, text) {
            (MemoryAction::Create, None, Some(text)) => Ok(MemoryModification::Create { text }),
            (MemoryAction::Reinforce, Some(id), None) => Ok(MemoryModification::Reinforce { id }),
            (MemoryAction::Weaken, Some(id), None) => Ok(MemoryModification::Weaken { id }),
            (MemoryAction::UpdateContent, Some(id), Some(text)) => {
                Ok(MemoryModification::UpdateContent { id, text })
            }
            (action, id, text) => Err(HabitusError::Validation(format!(
                "malformed {action} modification (id: {id:?}, text present: {})",
                text.is_some()
            ))),
        }
    }
}

/// Aggregate figures over the memory table.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MemoryStats {
    pub total_memories: u64,
    /// Mean confidence rounded to three decimal places (0.0 when empty).
    pub average_confidence: f64,
    /// Memories with confidence >= 0.7.
    pub high_confidence_memories: u64,
}

/// Global error type spanning storage faults, rejected input, and failed
/// reconciliation.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum HabitusError {
    #[error("Memory not found: {0}")]
    NotFound(MemoryId),

    #[error("Validation Error: {0}")]
    Validation(String),

    #[error("Insufficient Evidence for {action}: {details}")]
    InsufficientEvidence { action: MemoryAction, details: String },

    #[error("Analysis Failed: {0}")]
    AnalysisFailed(String),

    #[error("Storage Error: {0}")]
    Storage(String),

    #[error("Serialization Error: {0}")]
    Serialization(String),
}
