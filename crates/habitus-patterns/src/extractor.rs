//! Store-backed pattern extractor.
//!
//! [`PatternExtractor`] reads the latest `history_limit` executions from the
//! [`MemoryStore`] and hands them to the pure functions of the sibling
//! modules. It never writes.

use chrono::Utc;
use habitus_memory::{MemoryStore, StoreError};
use habitus_types::ToolExecution;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::relevance::{RelevanceConfig, filter_relevant_executions};
use crate::sequence::{SequencePatterns, extract_sequence_patterns};
use crate::summary::{
    PatternSummary, SimilarToolSummary, generate_pattern_summary, generate_similar_tool_summary,
};
use crate::temporal::{TemporalPatterns, bucket_offset, extract_temporal_patterns};
use crate::usage::{BehavioralPatterns, UsagePatterns, extract_behavioral_patterns, extract_tool_usage};

/// Tuning knobs for [`PatternExtractor`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractorConfig {
    /// How many of the newest executions are loaded per extraction.
    pub history_limit: usize,
    /// Fixed offset from UTC used for hour/weekday buckets.
    pub utc_offset_minutes: i32,
    /// Tool whose `query` argument is collected by behavioral extraction.
    pub search_tool: String,
    /// Below this many relevant executions the similar-tool summary is
    /// reported as insufficient.
    pub min_similar_executions: usize,
    pub relevance: RelevanceConfig,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            history_limit: 1000,
            utc_offset_minutes: 0,
            search_tool: "google_search".to_string(),
            min_similar_executions: 2,
            relevance: RelevanceConfig::default(),
        }
    }
}

/// Read-only analytics over the execution log.
#[derive(Clone)]
pub struct PatternExtractor {
    store: MemoryStore,
    config: ExtractorConfig,
}

impl PatternExtractor {
    pub fn new(store: MemoryStore, config: ExtractorConfig) -> Self {
        Self { store, config }
    }

    pub fn config(&self) -> &ExtractorConfig {
        &self.config
    }

    fn history(&self) -> Result<Vec<ToolExecution>, StoreError> {
        let executions = self.store.get_tool_executions(None, self.config.history_limit)?;
        debug!(loaded = executions.len(), "execution history loaded");
        Ok(executions)
    }

    pub fn extract_temporal_patterns(&self, days: i64) -> Result<Option<TemporalPatterns>, StoreError> {
        Ok(extract_temporal_patterns(
            &self.history()?,
            Utc::now(),
            days,
            bucket_offset(self.config.utc_offset_minutes),
        ))
    }

    pub fn extract_tool_usage(&self, days: i64) -> Result<UsagePatterns, StoreError> {
        Ok(extract_tool_usage(&self.history()?, Utc::now(), days))
    }

    pub fn extract_sequence_patterns(&self, days: i64) -> Result<SequencePatterns, StoreError> {
        Ok(extract_sequence_patterns(&self.history()?, Utc::now(), days))
    }

    pub fn extract_behavioral_patterns(&self, days: i64) -> Result<BehavioralPatterns, StoreError> {
        Ok(extract_behavioral_patterns(
            &self.history()?,
            Utc::now(),
            days,
            &self.config.search_tool,
        ))
    }

    /// Executions relevant to the latest run of `target_tool`, using the
    /// configured window.
    pub fn relevant_executions(&self, target_tool: &str) -> Result<Vec<ToolExecution>, StoreError> {
        Ok(filter_relevant_executions(
            &self.history()?,
            target_tool,
            Utc::now(),
            &self.config.relevance,
        ))
    }

    pub fn generate_pattern_summary(&self, days: i64) -> Result<PatternSummary, StoreError> {
        Ok(generate_pattern_summary(&self.history()?, Utc::now(), days, &self.config))
    }

    pub fn generate_similar_tool_summary(
        &self,
        target_tool: Option<&str>,
        days: i64,
    ) -> Result<SimilarToolSummary, StoreError> {
        Ok(generate_similar_tool_summary(
            &self.history()?,
            target_tool,
            Utc::now(),
            days,
            &self.config,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use habitus_types::NewToolExecution;
    use serde_json::json;

    fn seeded() -> PatternExtractor {
        let store = MemoryStore::open_in_memory().unwrap();
        let now = Utc::now();
        let log = [
            ("play_song", json!({"artist": "Avicii"}), 30),
            ("play_song", json!({"artist": "Kygo"}), 28),
            ("set_volume", json!({"level": 30}), 26),
            ("google_search", json!({"query": "avicii live"}), 60 * 24 * 3),
            ("play_song", json!({"artist": "Old"}), 60 * 24 * 60),
        ];
        for (tool, args, minutes_ago) in log {
            store
                .log_tool_execution(
                    &NewToolExecution::new(tool)
                        .with_arguments(args)
                        .at(now - Duration::minutes(minutes_ago)),
                )
                .unwrap();
        }
        PatternExtractor::new(store, ExtractorConfig::default())
    }

    #[test]
    fn windowed_extractions_ignore_old_rows() {
        let x = seeded();
        let usage = x.extract_tool_usage(30).unwrap();
        assert_eq!(usage.tool_statistics[0].tool, "play_song");
        assert_eq!(usage.tool_statistics[0].total_uses, 2);

        let temporal = x.extract_temporal_patterns(30).unwrap().unwrap();
        assert_eq!(temporal.total_executions, 4);

        let seq = x.extract_sequence_patterns(30).unwrap();
        assert_eq!(seq.session_count, 1);
        assert_eq!(seq.average_session_length, 3.0);

        let behavior = x.extract_behavioral_patterns(30).unwrap();
        assert_eq!(behavior.search_queries.len(), 1);
    }

    #[test]
    fn relevant_executions_follow_keywords_across_tools() {
        let x = seeded();
        let relevant = x.relevant_executions("play_song").unwrap();
        let tools: Vec<_> = relevant.iter().map(|e| e.tool.as_str()).collect();
        // Two recent songs, set_volume within two hours. The search shares no
        // keyword with the latest song (Kygo), and the oldest song is outside
        // the window.
        assert_eq!(tools, vec!["set_volume", "play_song", "play_song"]);
    }

    #[test]
    fn empty_store_is_not_an_error() {
        let x = PatternExtractor::new(MemoryStore::open_in_memory().unwrap(), ExtractorConfig::default());
        assert!(x.extract_temporal_patterns(30).unwrap().is_none());
        assert_eq!(x.generate_pattern_summary(30).unwrap().analysis_metadata.total_executions, 0);
        assert_eq!(
            x.generate_similar_tool_summary(Some("play_song"), 30).unwrap().relevant_count(),
            0
        );
    }

    #[test]
    fn history_respects_limit() {
        let store = MemoryStore::open_in_memory().unwrap();
        for _ in 0..5 {
            store.log_tool_execution(&NewToolExecution::new("ping")).unwrap();
        }
        let config = ExtractorConfig {
            history_limit: 3,
            ..ExtractorConfig::default()
        };
        let x = PatternExtractor::new(store, config);
        assert_eq!(x.extract_tool_usage(30).unwrap().tool_statistics[0].total_uses, 3);
    }
}
