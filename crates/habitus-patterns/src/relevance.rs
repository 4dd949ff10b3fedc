//! Relevance filtering.
//!
//! Selects which past executions count as evidence for memories about a given
//! triggering tool. Given the most recent execution of the target tool, the
//! candidate set is the union of:
//!
//! 1. every in-window execution of the exact same tool;
//! 2. executions of tools in the same [`ToolCategory`] that either happened
//!    within [`RelevanceConfig::proximity_minutes`] of the target or share
//!    argument-level context with it (see [`has_similar_context`]);
//! 3. executions of any tool whose argument keywords share at least one
//!    meaningful term (longer than three characters) with the target's.
//!
//! The result is deduplicated, ordered newest first and capped at
//! [`RelevanceConfig::max_results`]. When the cap bites, executions of the
//! exact tool are kept before anything else.
//!
//! The category table and stop-word list live in [`RelevanceConfig`] so they
//! can be extended from configuration without touching the algorithm.

use std::collections::{BTreeSet, HashSet};

use chrono::{DateTime, Duration, Utc};
use habitus_types::ToolExecution;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::temporal::{DEFAULT_WINDOW_DAYS, window_cutoff};

/// Window around the target execution inside which any related tool counts.
pub const DEFAULT_PROXIMITY_MINUTES: i64 = 120;

/// A named group of tools that are considered related to each other.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCategory {
    pub name: String,
    pub tools: Vec<String>,
}

impl ToolCategory {
    fn new(name: &str, tools: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            tools: tools.iter().map(|t| t.to_string()).collect(),
        }
    }

    pub fn contains(&self, tool: &str) -> bool {
        self.tools.iter().any(|t| t == tool)
    }
}

/// Tables and limits driving [`filter_relevant_executions`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelevanceConfig {
    /// Ordered category table. A tool listed in several categories belongs to
    /// the first one that names it; an unlisted tool relates only to itself.
    pub categories: Vec<ToolCategory>,
    /// Words ignored by keyword extraction.
    pub stop_words: BTreeSet<String>,
    /// Argument fields compared by [`has_similar_context`].
    pub context_fields: Vec<String>,
    /// Lookback window in days.
    pub window_days: i64,
    /// Same-category executions this close to the target are always related.
    pub proximity_minutes: i64,
    /// Upper bound on the number of executions returned.
    pub max_results: usize,
}

const DEFAULT_STOP_WORDS: &[&str] = &[
    "the", "and", "for", "are", "but", "not", "you", "all", "can", "had", "her", "was", "one",
    "our", "out", "day", "get", "has", "him", "his", "how", "its", "may", "new", "now", "old",
    "see", "two", "who", "boy", "did", "man", "way", "where", "with", "this", "that", "they",
    "will", "from", "have", "been", "said", "each", "which", "what", "were", "when", "more",
    "than", "into", "very", "after", "first", "well", "just", "like", "over", "also", "back",
    "other", "many", "then", "them", "these", "some", "time", "would", "could", "should",
    "about", "there", "their", "only", "come", "work", "know", "take", "year", "good", "much",
    "make", "most", "long", "little", "great", "right", "still", "small", "large", "such",
    "here", "even", "both", "last", "next", "same", "find", "give", "place", "want", "need",
    "seem", "high", "every", "between", "never", "being", "again", "around", "through",
    "during", "before", "another", "too",
];

impl Default for RelevanceConfig {
    fn default() -> Self {
        Self {
            categories: vec![
                ToolCategory::new(
                    "media_playback",
                    &[
                        "play_song",
                        "pause_music",
                        "next_song",
                        "previous_song",
                        "set_volume",
                        "search_spotify",
                        "add_to_playlist",
                        "save_track",
                    ],
                ),
                ToolCategory::new(
                    "search",
                    &["google_search", "search_memory", "search_spotify", "search_notion"],
                ),
                ToolCategory::new(
                    "browsing",
                    &["open_url", "navigate_to", "click_element", "scroll_page"],
                ),
                ToolCategory::new(
                    "memory_management",
                    &["save_memory", "search_memory", "modify_memory", "delete_memory"],
                ),
                ToolCategory::new(
                    "file_ops",
                    &["read_file", "write_file", "create_document", "edit_document"],
                ),
                ToolCategory::new("communication", &["send_email", "send_message", "make_call"]),
            ],
            stop_words: DEFAULT_STOP_WORDS.iter().map(|w| w.to_string()).collect(),
            context_fields: ["query", "artist", "track", "song"]
                .iter()
                .map(|f| f.to_string())
                .collect(),
            window_days: DEFAULT_WINDOW_DAYS,
            proximity_minutes: DEFAULT_PROXIMITY_MINUTES,
            max_results: 20,
        }
    }
}

impl RelevanceConfig {
    /// Tools related to `target`: its first category, or just itself.
    pub fn related_tools<'a>(&'a self, target: &'a str) -> HashSet<&'a str> {
        match self.categories.iter().find(|c| c.contains(target)) {
            Some(category) => category.tools.iter().map(String::as_str).collect(),
            None => HashSet::from([target]),
        }
    }

    /// Vocabulary of `tool`'s first category: the words of its name and of
    /// every tool name in it. An unlisted tool contributes its own name.
    pub fn topic_terms(&self, tool: &str) -> BTreeSet<String> {
        let mut terms = BTreeSet::new();
        match self.categories.iter().find(|c| c.contains(tool)) {
            Some(category) => {
                self.collect_terms(&category.name.replace('_', " "), &mut terms);
                for name in &category.tools {
                    self.collect_terms(&name.replace('_', " "), &mut terms);
                }
            }
            None => self.collect_terms(&tool.replace('_', " "), &mut terms),
        }
        terms
    }

    /// Meaningful lower-cased terms from an argument object.
    ///
    /// String values and lists of strings are split on whitespace, trimmed of
    /// surrounding punctuation, and filtered against the stop-word list.
    /// Words of two characters or fewer are dropped.
    pub fn extract_keywords(&self, arguments: Option<&Value>) -> BTreeSet<String> {
        let mut terms = BTreeSet::new();
        let Some(Value::Object(map)) = arguments else {
            return terms;
        };
        for value in map.values() {
            match value {
                Value::String(s) => self.collect_terms(s, &mut terms),
                Value::Array(items) => items
                    .iter()
                    .filter_map(Value::as_str)
                    .for_each(|s| self.collect_terms(s, &mut terms)),
                _ => {}
            }
        }
        terms
    }

    /// Meaningful terms of free text, by the same rules as
    /// [`extract_keywords`](Self::extract_keywords).
    pub fn keywords_in(&self, text: &str) -> BTreeSet<String> {
        let mut terms = BTreeSet::new();
        self.collect_terms(text, &mut terms);
        terms
    }

    fn collect_terms(&self, text: &str, terms: &mut BTreeSet<String>) {
        for word in text.split_whitespace() {
            let word = word
                .trim_matches(|c: char| !c.is_alphanumeric())
                .to_lowercase();
            if word.chars().count() > 2 && !self.stop_words.contains(&word) {
                terms.insert(word);
            }
        }
    }
}

/// Lower-cased string form of an argument field, if present and non-empty.
fn field_text(exec: &ToolExecution, field: &str) -> Option<String> {
    let value = exec.arguments.as_ref()?.get(field)?;
    let text = match value {
        Value::String(s) => s.to_lowercase(),
        Value::Null => return None,
        other => other.to_string().to_lowercase(),
    };
    (!text.trim().is_empty()).then_some(text)
}

/// `true` when two executions carry similar argument context on any of the
/// configured fields: one value contains the other, or they share at least
/// two words.
pub fn has_similar_context(a: &ToolExecution, b: &ToolExecution, config: &RelevanceConfig) -> bool {
    config.context_fields.iter().any(|field| {
        let (Some(x), Some(y)) = (field_text(a, field), field_text(b, field)) else {
            return false;
        };
        if x.contains(&y) || y.contains(&x) {
            return true;
        }
        let xs: HashSet<&str> = x.split_whitespace().collect();
        let ys: HashSet<&str> = y.split_whitespace().collect();
        xs.intersection(&ys).count() >= 2
    })
}

fn newest_first(a: &ToolExecution, b: &ToolExecution) -> std::cmp::Ordering {
    b.timestamp.cmp(&a.timestamp).then(b.id.cmp(&a.id))
}

/// Select the executions relevant to the most recent run of `target_tool`.
///
/// Returns an empty list when `target_tool` never ran. Never returns more
/// than `config.max_results` items.
pub fn filter_relevant_executions(
    executions: &[ToolExecution],
    target_tool: &str,
    now: DateTime<Utc>,
    config: &RelevanceConfig,
) -> Vec<ToolExecution> {
    let Some(target) = executions
        .iter()
        .filter(|e| e.tool == target_tool)
        .max_by(|a, b| a.timestamp.cmp(&b.timestamp).then(a.id.cmp(&b.id)))
    else {
        return Vec::new();
    };

    let cutoff = window_cutoff(now, config.window_days);
    let proximity = Duration::try_minutes(config.proximity_minutes).unwrap_or_else(|| {
        warn!(minutes = config.proximity_minutes, "proximity out of range, using default");
        Duration::minutes(DEFAULT_PROXIMITY_MINUTES)
    });
    let related = config.related_tools(target_tool);
    let target_keywords = config.extract_keywords(target.arguments.as_ref());

    let mut seen = HashSet::new();
    let mut exact = Vec::new();
    let mut others = Vec::new();

    for exec in executions.iter().filter(|e| e.timestamp >= cutoff) {
        if !seen.insert(exec.id) {
            continue;
        }
        if exec.tool == target_tool {
            exact.push(exec.clone());
            continue;
        }

        let same_category = related.contains(exec.tool.as_str())
            && ((exec.timestamp - target.timestamp).abs() <= proximity
                || has_similar_context(exec, target, config));

        let shares_keyword = !target_keywords.is_empty()
            && config
                .extract_keywords(exec.arguments.as_ref())
                .iter()
                .any(|k| k.chars().count() > 3 && target_keywords.contains(k));

        if same_category || shares_keyword {
            others.push(exec.clone());
        }
    }

    exact.sort_by(newest_first);
    others.sort_by(newest_first);

    let mut relevant: Vec<ToolExecution> = exact.into_iter().take(config.max_results).collect();
    let room = config.max_results - relevant.len();
    relevant.extend(others.into_iter().take(room));
    relevant.sort_by(newest_first);
    relevant
}
