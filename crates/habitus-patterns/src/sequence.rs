//! Sequence mining.
//!
//! Executions sorted by time are split into "sessions": maximal runs where
//! each consecutive pair is at most [`SESSION_GAP_SECS`] apart. Inside every
//! session of two or more executions each adjacent pair `(A, B)` and triplet
//! `(A, B, C)` of tool names is counted.
//!
//! ```text
//! t(min):  0    2    4              40
//!          A -> B -> C              D
//!          └── session (len 3) ──┘  └─ singleton, ignored
//! pairs:   (A,B)=1 (B,C)=1   triplets: (A,B,C)=1
//! ```

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use habitus_types::ToolExecution;
use serde::{Deserialize, Serialize};

use crate::temporal::within_window;

/// Largest gap between consecutive executions of one session.
pub const SESSION_GAP_SECS: i64 = 300;

const TOP_PAIRS: usize = 10;
const TOP_TRIPLETS: usize = 5;

/// An ordered run of tool names and how often it occurred.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SequenceCount {
    pub tools: Vec<String>,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SequencePatterns {
    /// Sessions with at least two executions.
    pub session_count: usize,
    pub common_tool_pairs: Vec<SequenceCount>,
    pub common_tool_triplets: Vec<SequenceCount>,
    /// Mean length of the counted sessions, `0.0` when there are none.
    pub average_session_length: f64,
}

/// Partition executions into sessions of tool names, oldest first.
///
/// Only sessions of length two or more are returned.
pub fn split_sessions<'a, I>(executions: I) -> Vec<Vec<&'a str>>
where
    I: IntoIterator<Item = &'a ToolExecution>,
{
    let mut ordered: Vec<&ToolExecution> = executions.into_iter().collect();
    ordered.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then(a.id.cmp(&b.id)));

    let mut sessions = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    let mut previous: Option<DateTime<Utc>> = None;

    for exec in ordered {
        if let Some(prev) = previous {
            if exec.timestamp - prev > Duration::seconds(SESSION_GAP_SECS) {
                if current.len() > 1 {
                    sessions.push(std::mem::take(&mut current));
                } else {
                    current.clear();
                }
            }
        }
        current.push(exec.tool.as_str());
        previous = Some(exec.timestamp);
    }
    if current.len() > 1 {
        sessions.push(current);
    }
    sessions
}

fn ranked(counts: HashMap<Vec<&str>, usize>, top: usize) -> Vec<SequenceCount> {
    let mut ranked: Vec<SequenceCount> = counts
        .into_iter()
        .map(|(tools, count)| SequenceCount {
            tools: tools.into_iter().map(str::to_string).collect(),
            count,
        })
        .collect();
    ranked.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.tools.cmp(&b.tools)));
    ranked.truncate(top);
    ranked
}

/// Mine adjacent tool pairs and triplets over the trailing `days`.
pub fn extract_sequence_patterns(
    executions: &[ToolExecution],
    now: DateTime<Utc>,
    days: i64,
) -> SequencePatterns {
    let sessions = split_sessions(within_window(executions, now, days));

    let mut pairs: HashMap<Vec<&str>, usize> = HashMap::new();
    let mut triplets: HashMap<Vec<&str>, usize> = HashMap::new();
    for session in &sessions {
        for window in session.windows(2) {
            *pairs.entry(window.to_vec()).or_default() += 1;
        }
        for window in session.windows(3) {
            *triplets.entry(window.to_vec()).or_default() += 1;
        }
    }

    let average_session_length = if sessions.is_empty() {
        0.0
    } else {
        sessions.iter().map(Vec::len).sum::<usize>() as f64 / sessions.len() as f64
    };

    SequencePatterns {
        session_count: sessions.len(),
        common_tool_pairs: ranked(pairs, TOP_PAIRS),
        common_tool_triplets: ranked(triplets, TOP_TRIPLETS),
        average_session_length,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn base() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 6, 1, 12, 0, 0).unwrap()
    }

    fn at(id: i64, tool: &str, minute: i64) -> ToolExecution {
        ToolExecution {
            id,
            tool: tool.into(),
            arguments: None,
            result: None,
            context: None,
            timestamp: base() + Duration::minutes(minute),
        }
    }

    fn tools(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn abc_session_excludes_distant_d() {
        // Input order is irrelevant; the store hands executions newest first.
        let execs = vec![at(4, "D", 40), at(3, "C", 4), at(2, "B", 2), at(1, "A", 0)];
        let p = extract_sequence_patterns(&execs, base() + Duration::hours(1), 30);

        assert_eq!(p.session_count, 1);
        assert_eq!(p.average_session_length, 3.0);
        assert_eq!(p.common_tool_pairs.len(), 2);
        assert!(p.common_tool_pairs.contains(&SequenceCount { tools: tools(&["A", "B"]), count: 1 }));
        assert!(p.common_tool_pairs.contains(&SequenceCount { tools: tools(&["B", "C"]), count: 1 }));
        assert!(p.common_tool_pairs.iter().all(|pc| !pc.tools.contains(&"D".to_string())));
        assert_eq!(
            p.common_tool_triplets,
            vec![SequenceCount { tools: tools(&["A", "B", "C"]), count: 1 }]
        );
    }

    #[test]
    fn gap_of_exactly_five_minutes_stays_in_session() {
        let execs = vec![at(1, "A", 0), at(2, "B", 5), at(3, "C", 11)];
        let sessions = split_sessions(&execs);
        assert_eq!(sessions, vec![vec!["A", "B"]]);
    }

    #[test]
    fn gap_just_over_five_minutes_splits_session() {
        let mut late = at(2, "B", 5);
        late.timestamp += Duration::milliseconds(900);
        let execs = vec![at(1, "A", 0), late];
        assert!(split_sessions(&execs).is_empty());
    }

    #[test]
    fn repeated_pairs_rank_first_then_by_name() {
        let execs = vec![
            at(1, "search", 0),
            at(2, "play", 1),
            at(3, "search", 30),
            at(4, "play", 31),
            at(5, "alarm", 60),
            at(6, "weather", 61),
        ];
        let p = extract_sequence_patterns(&execs, base() + Duration::hours(2), 30);
        assert_eq!(p.session_count, 3);
        assert_eq!(
            p.common_tool_pairs[0],
            SequenceCount { tools: tools(&["search", "play"]), count: 2 }
        );
        assert_eq!(p.common_tool_pairs[1].tools, tools(&["alarm", "weather"]));
        assert!(p.common_tool_triplets.is_empty());
    }

    #[test]
    fn no_sessions_means_zero_average() {
        let execs = vec![at(1, "A", 0), at(2, "B", 30)];
        let p = extract_sequence_patterns(&execs, base() + Duration::hours(1), 30);
        assert_eq!(p.session_count, 0);
        assert_eq!(p.average_session_length, 0.0);
        assert!(p.common_tool_pairs.is_empty());
    }

    #[test]
    fn equal_timestamps_ordered_by_id() {
        let execs = vec![at(2, "second", 0), at(1, "first", 0)];
        assert_eq!(split_sessions(&execs), vec![vec!["first", "second"]]);
    }
}
