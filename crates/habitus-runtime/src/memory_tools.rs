//! [`MemoryTools`] – the memory operations exposed to the assistant.
//!
//! Thin pass-throughs to the [`MemoryStore`] that always answer with a
//! serializable [`ToolResponse`]. Errors become `status: "error"` responses;
//! nothing here panics or propagates.

use habitus_memory::MemoryStore;
use habitus_memory::store::DEFAULT_CONFIDENCE;
use habitus_types::{HabitusError, Memory, MemoryId};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Minimum confidence for search hits.
const SEARCH_MIN_CONFIDENCE: f64 = 0.3;
/// Minimum confidence for the full listing.
const LIST_MIN_CONFIDENCE: f64 = 0.1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolStatus {
    Success,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResponse {
    pub status: ToolStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memories: Option<Vec<Memory>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<MemoryId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub count: Option<usize>,
}

impl ToolResponse {
    fn success() -> Self {
        Self {
            status: ToolStatus::Success,
            message: None,
            memories: None,
            id: None,
            count: None,
        }
    }

    fn error(err: impl Into<HabitusError>) -> Self {
        let err = err.into();
        warn!(error = %err, "memory tool failed");
        Self {
            message: Some(err.to_string()),
            status: ToolStatus::Error,
            ..Self::success()
        }
    }

    fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    fn with_memories(mut self, memories: Vec<Memory>) -> Self {
        self.count = Some(memories.len());
        self.memories = Some(memories);
        self
    }

    fn with_id(mut self, id: MemoryId) -> Self {
        self.id = Some(id);
        self
    }

    pub fn is_success(&self) -> bool {
        self.status == ToolStatus::Success
    }
}

#[derive(Clone)]
pub struct MemoryTools {
    store: MemoryStore,
}

impl MemoryTools {
    pub fn new(store: MemoryStore) -> Self {
        Self { store }
    }

    /// Memories matching any word of `query` with confidence >= 0.3.
    pub fn search_memory(&self, query: &str) -> ToolResponse {
        match self.store.search_similar_memories(query, SEARCH_MIN_CONFIDENCE) {
            Ok(memories) => {
                debug!(query, hits = memories.len(), "memory search");
                ToolResponse::success().with_memories(memories)
            }
            Err(e) => ToolResponse::error(e),
        }
    }

    /// Store `text` at the default confidence.
    pub fn save_memory(&self, text: &str) -> ToolResponse {
        if text.trim().is_empty() {
            return ToolResponse::error(HabitusError::Validation("memory text is empty".into()));
        }
        match self.store.add_memory(text.trim(), DEFAULT_CONFIDENCE) {
            Ok(id) => ToolResponse::success()
                .with_id(id)
                .with_message(format!("Memory saved with ID {id}")),
            Err(e) => ToolResponse::error(e),
        }
    }

    /// Every memory with confidence >= 0.1.
    pub fn get_all_memories(&self) -> ToolResponse {
        match self.store.get_memories(LIST_MIN_CONFIDENCE, None) {
            Ok(memories) => ToolResponse::success().with_memories(memories),
            Err(e) => ToolResponse::error(e),
        }
    }

    /// Replace the text and/or confidence of memory `id`.
    ///
    /// Both values are validated before anything is written.
    pub fn modify_memory(&self, id: MemoryId, text: Option<&str>, confidence: Option<f64>) -> ToolResponse {
        let text = text.map(str::trim);
        if text.is_none() && confidence.is_none() {
            return ToolResponse::error(HabitusError::Validation("nothing to modify".into()));
        }
        if text.is_some_and(str::is_empty) {
            return ToolResponse::error(HabitusError::Validation("memory text is empty".into()));
        }
        if let Some(c) = confidence {
            if !(0.0..=1.0).contains(&c) {
                return ToolResponse::error(HabitusError::Validation(format!(
                    "confidence {c} is outside [0, 1]"
                )));
            }
        }

        match self.store.get_memory(id) {
            Ok(Some(_)) => {}
            Ok(None) => return ToolResponse::error(HabitusError::NotFound(id)),
            Err(e) => return ToolResponse::error(e),
        }
        if let Some(text) = text {
            if let Err(e) = self.store.update_memory_content(id, text) {
                return ToolResponse::error(e);
            }
        }
        if let Some(c) = confidence {
            if let Err(e) = self.store.set_confidence(id, c) {
                return ToolResponse::error(e);
            }
        }
        ToolResponse::success()
            .with_id(id)
            .with_message(format!("Memory {id} updated"))
    }

    pub fn delete_memory(&self, id: MemoryId) -> ToolResponse {
        match self.store.delete_memory(id) {
            Ok(true) => ToolResponse::success()
                .with_id(id)
                .with_message(format!("Memory {id} deleted")),
            Ok(false) => ToolResponse::error(HabitusError::NotFound(id)),
            Err(e) => ToolResponse::error(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn tools() -> MemoryTools {
        MemoryTools::new(MemoryStore::open_in_memory().unwrap())
    }

    #[test]
    fn save_then_search() {
        let tools = tools();
        let saved = tools.save_memory("User likes EDM music");
        assert!(saved.is_success());
        assert_eq!(saved.id, Some(1));

        let found = tools.search_memory("edm");
        assert_eq!(found.count, Some(1));
        assert_eq!(found.memories.unwrap()[0].text, "User likes EDM music");
        assert_eq!(tools.search_memory("jazz").count, Some(0));
    }

    #[test]
    fn search_hides_low_confidence() {
        let tools = tools();
        let id = tools.save_memory("User likes EDM music").id.unwrap();
        assert!(tools.modify_memory(id, None, Some(0.2)).is_success());
        assert_eq!(tools.search_memory("EDM").count, Some(0));
        assert_eq!(tools.get_all_memories().count, Some(1));
    }

    #[test]
    fn modify_validates_before_writing() {
        let tools = tools();
        let id = tools.save_memory("User runs at dawn").id.unwrap();

        let bad = tools.modify_memory(id, Some("User runs at dusk"), Some(1.5));
        assert_eq!(bad.status, ToolStatus::Error);
        let listed = tools.get_all_memories().memories.unwrap();
        assert_eq!(listed[0].text, "User runs at dawn");

        assert!(tools.modify_memory(id, Some("User runs at dusk"), Some(0.8)).is_success());
        let listed = tools.get_all_memories().memories.unwrap();
        assert_eq!(listed[0].text, "User runs at dusk");
        assert!((listed[0].confidence - 0.8).abs() < 1e-9);
    }

    #[test]
    fn unknown_ids_are_errors_not_panics() {
        let tools = tools();
        let modified = tools.modify_memory(99, Some("x"), None);
        assert_eq!(modified.status, ToolStatus::Error);
        assert_eq!(modified.message.as_deref(), Some("Memory not found: 99"));
        assert_eq!(tools.delete_memory(99).status, ToolStatus::Error);
        assert_eq!(tools.modify_memory(1, None, None).status, ToolStatus::Error);
    }

    #[test]
    fn response_omits_absent_fields() {
        let tools = tools();
        let id = tools.save_memory("User likes tea").id.unwrap();
        let json = serde_json::to_value(tools.delete_memory(id)).unwrap();
        assert_eq!(
            json,
            json!({"status": "success", "message": "Memory 1 deleted", "id": 1})
        );
        assert_eq!(tools.save_memory("   ").status, ToolStatus::Error);
    }
}
