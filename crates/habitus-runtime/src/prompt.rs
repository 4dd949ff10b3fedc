//! Prompt rendering for the reconciliation step.
//!
//! The analysis step receives two messages: [`SYSTEM_PROMPT`], a fixed set of
//! conservative analysis rules, and a user message rendered from an
//! [`EvidencePackage`]: the narrow pattern summary for the triggering tool and
//! the currently stored memories with their ids and confidence.

use habitus_patterns::SimilarToolSummary;
use habitus_types::{Memory, MemoryId};
use serde::{Deserialize, Serialize};

/// Standing instructions for the analysis step.
///
/// These are advisory. The evidence gate enforces the numeric thresholds
/// independently of whether the model follows them.
pub const SYSTEM_PROMPT: &str = "\
You maintain a small set of long-lived memories about a user, derived only \
from the tools they run. You are shown the executions relevant to the tool \
that was just run and the memories stored so far. Propose memory \
modifications only when the data shows a clear, repeated pattern.

## Evidence requirements
- create: 3 or more related executions showing the same preference or habit, \
or 2 or more identical actions at similar times.
- reinforce: at least 2 executions that directly support the existing memory.
- weaken: only when the executions clearly contradict the memory. Missing \
evidence is not a contradiction.
- update_content: only when the executions make an existing memory \
significantly more specific.

## Never modify memories for
- a single execution, unless it repeats an established pattern;
- loose correlations, guesses, or data with several plausible readings;
- memories unrelated to the executions shown;
- timing patterns with fewer than 3 occurrences at similar times.

## Writing memories
- State observed facts (\"User enjoys EDM music\"), not interpretations.
- Mention timing only with 3 or more consistent occurrences.
- Playing one song says nothing about taste; five EDM tracks in a week does.

## Output
Return an object with a `memory_modifications` array. Every item has \
exactly the fields `action`, `id` and `text`:
- create: `id` null, `text` the new memory.
- reinforce / weaken: `id` of the memory, `text` null.
- update_content: `id` of the memory and the new `text`.
Only use ids from the stored memory list. Most of the time the correct \
answer is an empty array. When in doubt, change nothing.";

/// A stored memory as shown to the analysis step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryView {
    pub id: MemoryId,
    pub confidence: f64,
    pub text: String,
}

impl From<&Memory> for MemoryView {
    fn from(m: &Memory) -> Self {
        Self {
            id: m.id,
            confidence: m.confidence,
            text: m.text.clone(),
        }
    }
}

/// Everything the analysis step is allowed to see for one cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvidencePackage {
    pub trigger_tool: String,
    pub patterns: SimilarToolSummary,
    pub stored_memories: Vec<MemoryView>,
}

impl EvidencePackage {
    pub fn new(trigger_tool: impl Into<String>, patterns: SimilarToolSummary, memories: &[Memory]) -> Self {
        Self {
            trigger_tool: trigger_tool.into(),
            patterns,
            stored_memories: memories.iter().map(MemoryView::from).collect(),
        }
    }

    /// Render the user message.
    pub fn render(&self) -> Result<String, serde_json::Error> {
        let patterns = serde_json::to_string_pretty(&self.patterns)?;

        let memories = if self.stored_memories.is_empty() {
            "No stored memories.".to_string()
        } else {
            self.stored_memories
                .iter()
                .map(|m| format!("ID {} (confidence: {:.2}): {}", m.id, m.confidence, m.text))
                .collect::<Vec<_>>()
                .join("\n")
        };

        Ok(format!(
            "The user just ran `{tool}`. These are the executions relevant to it:\n\n\
             {patterns}\n\n\
             Currently stored memories:\n{memories}\n",
            tool = self.trigger_tool,
        ))
    }
}
