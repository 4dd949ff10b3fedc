//! Tool Execution Log.
//!
//! Append-only record of every external action the host performed on the
//! user's behalf. The pattern extractor and the recognizer read it back; only
//! [`MemoryStore::clear_all_data`] ever removes rows.
//!
//! Arguments and results are stored as JSON text. A stored value that no
//! longer parses as JSON is returned verbatim as a [`serde_json::Value::String`]
//! instead of failing the whole read.

use chrono::Utc;
use habitus_types::{NewToolExecution, ToolExecution};
use rusqlite::{Row, params};
use serde_json::Value;
use tracing::debug;

use crate::store::{MemoryStore, StoreError, decode_timestamp, encode_timestamp};

fn encode_json(value: Option<&Value>) -> Result<Option<String>, StoreError> {
    value.map(serde_json::to_string).transpose().map_err(StoreError::from)
}

fn decode_json(raw: Option<String>) -> Option<Value> {
    raw.map(|text| serde_json::from_str(&text).unwrap_or(Value::String(text)))
}

fn row_to_execution(row: &Row<'_>) -> rusqlite::Result<ToolExecution> {
    let ts: String = row.get(5)?;
    Ok(ToolExecution {
        id: row.get(0)?,
        tool: row.get(1)?,
        arguments: decode_json(row.get(2)?),
        result: decode_json(row.get(3)?),
        context: row.get(4)?,
        timestamp: decode_timestamp(5, &ts)?,
    })
}

impl MemoryStore {
    /// Append one execution to the log and return its id.
    ///
    /// `execution.timestamp` defaults to now when unset.
    pub fn log_tool_execution(&self, execution: &NewToolExecution) -> Result<i64, StoreError> {
        self.log_and_count_tool_execution(execution).map(|(id, _)| id)
    }

    /// Append one execution and return its id together with the log size
    /// right after the insert.
    ///
    /// Both are read under one connection lock, so concurrent callers each
    /// observe a distinct count.
    pub fn log_and_count_tool_execution(
        &self,
        execution: &NewToolExecution,
    ) -> Result<(i64, u64), StoreError> {
        if execution.tool.trim().is_empty() {
            return Err(StoreError::Validation("tool name must not be empty".into()));
        }
        let arguments = encode_json(execution.arguments.as_ref())?;
        let result = encode_json(execution.result.as_ref())?;
        let timestamp = execution.timestamp.unwrap_or_else(Utc::now);

        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO tool_executions (tool, arguments, result, context, timestamp)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                execution.tool,
                arguments,
                result,
                execution.context,
                encode_timestamp(&timestamp)
            ],
        )?;
        let id = conn.last_insert_rowid();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM tool_executions", [], |row| row.get(0))?;
        debug!(id, count, tool = %execution.tool, "tool execution logged");
        Ok((id, count as u64))
    }

    /// Return up to `limit` executions, newest first (ties broken by the
    /// later insertion). `tool` restricts the result to one tool name.
    pub fn get_tool_executions(
        &self,
        tool: Option<&str>,
        limit: usize,
    ) -> Result<Vec<ToolExecution>, StoreError> {
        let conn = self.conn()?;
        let limit = limit as i64;
        let executions = match tool {
            Some(tool) => {
                let mut stmt = conn.prepare(
                    "SELECT id, tool, arguments, result, context, timestamp
                     FROM tool_executions
                     WHERE tool = ?1
                     ORDER BY timestamp DESC, id DESC
                     LIMIT ?2",
                )?;
                let rows = stmt.query_map(params![tool, limit], row_to_execution)?;
                rows.collect::<Result<Vec<_>, _>>()?
            }
            None => {
                let mut stmt = conn.prepare(
                    "SELECT id, tool, arguments, result, context, timestamp
                     FROM tool_executions
                     ORDER BY timestamp DESC, id DESC
                     LIMIT ?1",
                )?;
                let rows = stmt.query_map(params![limit], row_to_execution)?;
                rows.collect::<Result<Vec<_>, _>>()?
            }
        };
        Ok(executions)
    }

    /// Total number of logged executions.
    pub fn count_tool_executions(&self) -> Result<u64, StoreError> {
        let count: i64 =
            self.conn()?
                .query_row("SELECT COUNT(*) FROM tool_executions", [], |row| row.get(0))?;
        Ok(count as u64)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use serde_json::json;

    fn store() -> MemoryStore {
        MemoryStore::open_in_memory().unwrap()
    }

    #[test]
    fn log_and_read_back() {
        let s = store();
        let exec = NewToolExecution::new("play_song")
            .with_arguments(json!({"artist": "Avicii", "track": "Levels"}))
            .with_result(json!({"success": true}))
            .with_context("evening session");
        let id = s.log_tool_execution(&exec).unwrap();

        let all = s.get_tool_executions(None, 10).unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].id, id);
        assert_eq!(all[0].argument_str("artist"), Some("Avicii"));
        assert_eq!(all[0].context.as_deref(), Some("evening session"));
        assert!(all[0].succeeded());
        assert_eq!(s.count_tool_executions().unwrap(), 1);
    }

    #[test]
    fn concurrent_logging_hands_out_distinct_counts() {
        let s = store();
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let s = s.clone();
                std::thread::spawn(move || {
                    (0..5)
                        .map(|_| s.log_and_count_tool_execution(&NewToolExecution::new("play_song")).unwrap().1)
                        .collect::<Vec<u64>>()
                })
            })
            .collect();
        let mut counts: Vec<u64> = handles.into_iter().flat_map(|h| h.join().unwrap()).collect();
        counts.sort_unstable();
        assert_eq!(counts, (1..=20).collect::<Vec<u64>>());
    }

    #[test]
    fn empty_tool_name_is_rejected() {
        let s = store();
        let err = s.log_tool_execution(&NewToolExecution::new("  ")).unwrap_err();
        assert!(matches!(err, StoreError::Validation(_)));
        assert_eq!(s.count_tool_executions().unwrap(), 0);
    }

    #[test]
    fn newest_first_with_tool_filter() {
        let s = store();
        let base = Utc.with_ymd_and_hms(2026, 5, 4, 18, 0, 0).unwrap();
        for (i, tool) in ["play_song", "get_weather", "play_song"].iter().enumerate() {
            s.log_tool_execution(&NewToolExecution::new(*tool).at(base + Duration::minutes(i as i64)))
                .unwrap();
        }

        let songs = s.get_tool_executions(Some("play_song"), 10).unwrap();
        assert_eq!(songs.len(), 2);
        assert!(songs[0].timestamp > songs[1].timestamp);

        let limited = s.get_tool_executions(None, 2).unwrap();
        assert_eq!(limited.len(), 2);
        assert_eq!(limited[0].tool, "play_song");
        assert_eq!(limited[1].tool, "get_weather");
    }

    #[test]
    fn equal_timestamps_break_ties_by_insertion() {
        let s = store();
        let ts = Utc.with_ymd_and_hms(2026, 5, 4, 18, 0, 0).unwrap();
        let first = s.log_tool_execution(&NewToolExecution::new("a").at(ts)).unwrap();
        let second = s.log_tool_execution(&NewToolExecution::new("b").at(ts)).unwrap();

        let ids: Vec<_> = s.get_tool_executions(None, 10).unwrap().iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![second, first]);
    }

    #[test]
    fn backfilled_rows_sort_chronologically() {
        let s = store();
        let late = Utc.with_ymd_and_hms(2026, 5, 4, 21, 0, 0).unwrap();
        let early = Utc.with_ymd_and_hms(2026, 5, 4, 9, 0, 0).unwrap();
        s.log_tool_execution(&NewToolExecution::new("late").at(late)).unwrap();
        s.log_tool_execution(&NewToolExecution::new("early").at(early)).unwrap();

        let all = s.get_tool_executions(None, 10).unwrap();
        assert_eq!(all[0].tool, "late");
        assert_eq!(all[1].timestamp, early);
    }

    #[test]
    fn unparseable_json_is_kept_as_string() {
        let s = store();
        {
            let conn = s.conn().unwrap();
            conn.execute(
                "INSERT INTO tool_executions (tool, arguments, timestamp) VALUES ('legacy', 'not json', ?1)",
                params![encode_timestamp(&Utc::now())],
            )
            .unwrap();
        }
        let all = s.get_tool_executions(None, 1).unwrap();
        assert_eq!(all[0].arguments, Some(Value::String("not json".into())));
        assert_eq!(all[0].result, None);
    }

    #[test]
    fn clear_all_data_empties_the_log() {
        let s = store();
        s.log_tool_execution(&NewToolExecution::new("play_song")).unwrap();
        s.clear_all_data().unwrap();
        assert_eq!(s.count_tool_executions().unwrap(), 0);
        assert_eq!(s.log_tool_execution(&NewToolExecution::new("x")).unwrap(), 1);
    }
}
