//! Tool usage ranking and argument-level behavior.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use habitus_types::ToolExecution;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::temporal::within_window;

const MOST_USED: usize = 5;
const RECENT_QUERIES: usize = 20;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolUsage {
    pub tool: String,
    pub total_uses: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsagePatterns {
    /// Every tool seen in the window, most used first (ties by name).
    pub tool_statistics: Vec<ToolUsage>,
    /// The first five entries of `tool_statistics`.
    pub most_used_tools: Vec<ToolUsage>,
}

/// Count executions per tool over the trailing `days`.
pub fn extract_tool_usage(
    executions: &[ToolExecution],
    now: DateTime<Utc>,
    days: i64,
) -> UsagePatterns {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for exec in within_window(executions, now, days) {
        *counts.entry(exec.tool.as_str()).or_default() += 1;
    }

    let mut tool_statistics: Vec<ToolUsage> = counts
        .into_iter()
        .map(|(tool, total_uses)| ToolUsage {
            tool: tool.to_string(),
            total_uses,
        })
        .collect();
    tool_statistics.sort_by(|a, b| b.total_uses.cmp(&a.total_uses).then_with(|| a.tool.cmp(&b.tool)));
    let most_used_tools = tool_statistics.iter().take(MOST_USED).cloned().collect();

    UsagePatterns {
        tool_statistics,
        most_used_tools,
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchQuery {
    pub query: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BehavioralPatterns {
    /// Executions inspected, with or without arguments.
    pub total_analyzed_executions: usize,
    /// Tools that were called with arguments, sorted.
    pub tools_with_inputs: Vec<String>,
    /// Most recent queries of the search tool, newest first.
    pub search_queries: Vec<SearchQuery>,
    pub input_sample_size: BTreeMap<String, usize>,
}

fn has_arguments(exec: &ToolExecution) -> bool {
    match &exec.arguments {
        None | Some(Value::Null) => false,
        Some(Value::Object(map)) => !map.is_empty(),
        Some(_) => true,
    }
}

/// Inspect argument-bearing executions over the trailing `days` and collect
/// the queries issued to `search_tool`.
pub fn extract_behavioral_patterns(
    executions: &[ToolExecution],
    now: DateTime<Utc>,
    days: i64,
    search_tool: &str,
) -> BehavioralPatterns {
    let mut input_sample_size: BTreeMap<String, usize> = BTreeMap::new();
    let mut queries: Vec<(&ToolExecution, &str)> = Vec::new();

    for exec in within_window(executions, now, days).filter(|e| has_arguments(e)) {
        *input_sample_size.entry(exec.tool.clone()).or_default() += 1;
        if exec.tool == search_tool {
            if let Some(query) = exec.argument_str("query") {
                queries.push((exec, query));
            }
        }
    }

    queries.sort_by(|(a, _), (b, _)| b.timestamp.cmp(&a.timestamp).then(b.id.cmp(&a.id)));
    let search_queries = queries
        .into_iter()
        .take(RECENT_QUERIES)
        .map(|(exec, query)| SearchQuery {
            query: query.to_string(),
            timestamp: exec.timestamp,
        })
        .collect();

    BehavioralPatterns {
        total_analyzed_executions: executions.len(),
        tools_with_inputs: input_sample_size.keys().cloned().collect(),
        search_queries,
        input_sample_size,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use serde_json::json;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 6, 1, 12, 0, 0).unwrap()
    }

    fn exec(id: i64, tool: &str, minutes_ago: i64, args: Option<Value>) -> ToolExecution {
        ToolExecution {
            id,
            tool: tool.into(),
            arguments: args,
            result: None,
            context: None,
            timestamp: now() - Duration::minutes(minutes_ago),
        }
    }

    #[test]
    fn usage_ranks_descending_with_name_ties() {
        let execs = vec![
            exec(1, "play_song", 1, None),
            exec(2, "play_song", 2, None),
            exec(3, "get_weather", 3, None),
            exec(4, "alarm", 4, None),
        ];
        let u = extract_tool_usage(&execs, now(), 30);
        let order: Vec<_> = u.tool_statistics.iter().map(|t| t.tool.as_str()).collect();
        assert_eq!(order, vec!["play_song", "alarm", "get_weather"]);
        assert_eq!(u.tool_statistics[0].total_uses, 2);
    }

    #[test]
    fn most_used_is_capped_at_five() {
        let execs: Vec<_> = (0..8).map(|i| exec(i, &format!("tool_{i}"), i, None)).collect();
        let u = extract_tool_usage(&execs, now(), 30);
        assert_eq!(u.tool_statistics.len(), 8);
        assert_eq!(u.most_used_tools.len(), 5);
    }

    #[test]
    fn behavioral_keeps_twenty_newest_queries() {
        let mut execs: Vec<_> = (0..25)
            .map(|i| {
                exec(i, "google_search", i, Some(json!({"query": format!("query {i}")})))
            })
            .collect();
        execs.push(exec(99, "play_song", 1, Some(json!({"artist": "Kygo"}))));
        execs.push(exec(100, "get_time", 1, Some(json!({}))));

        let b = extract_behavioral_patterns(&execs, now(), 30, "google_search");
        assert_eq!(b.search_queries.len(), 20);
        assert_eq!(b.search_queries[0].query, "query 0");
        assert_eq!(b.search_queries[19].query, "query 19");
        assert_eq!(b.tools_with_inputs, vec!["google_search", "play_song"]);
        assert_eq!(b.input_sample_size.get("google_search"), Some(&25));
        assert_eq!(b.total_analyzed_executions, 27);
    }
}
