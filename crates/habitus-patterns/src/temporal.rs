//! Temporal analytics.
//!
//! Buckets executions by hour-of-day and weekday to find when the user is
//! active, and groups a relevant-execution set into 3-hour blocks per weekday
//! to surface recurring habits ("plays music on Friday evenings").
//!
//! All bucketing happens in a fixed UTC offset supplied by the caller, so the
//! same log yields the same buckets on every machine.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Datelike, Duration, FixedOffset, Offset, Timelike, Utc};
use habitus_types::ToolExecution;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Minimum executions in a block for it to count as a habit.
pub const CLUSTER_THRESHOLD: usize = 3;

/// Look-back used when a configured window cannot be represented.
pub const DEFAULT_WINDOW_DAYS: i64 = 30;

/// Build the offset used for bucketing, falling back to UTC when
/// `minutes` is out of range.
pub fn bucket_offset(minutes: i32) -> FixedOffset {
    FixedOffset::east_opt(minutes.saturating_mul(60)).unwrap_or_else(|| {
        warn!(minutes, "invalid UTC offset, bucketing in UTC");
        Utc.fix()
    })
}

/// `now - days`, or `now - DEFAULT_WINDOW_DAYS` when `days` overflows.
pub(crate) fn window_cutoff(now: DateTime<Utc>, days: i64) -> DateTime<Utc> {
    Duration::try_days(days)
        .and_then(|window| now.checked_sub_signed(window))
        .unwrap_or_else(|| {
            warn!(days, fallback = DEFAULT_WINDOW_DAYS, "analysis window out of range");
            now - Duration::days(DEFAULT_WINDOW_DAYS)
        })
}

/// Executions newer than `now - days`.
pub(crate) fn within_window(
    executions: &[ToolExecution],
    now: DateTime<Utc>,
    days: i64,
) -> impl Iterator<Item = &ToolExecution> {
    let cutoff = window_cutoff(now, days);
    executions.iter().filter(move |e| e.timestamp >= cutoff)
}

// ─────────────────────────────────────────────────────────────────────────────
// Distributions
// ─────────────────────────────────────────────────────────────────────────────

/// One entry of the peak-hour ranking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HourCount {
    pub hour: u32,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
}

/// Hourly and daily activity over the analysis window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemporalPatterns {
    pub total_executions: usize,
    pub date_range: DateRange,
    pub hourly_distribution: BTreeMap<u32, usize>,
    /// Keyed by English weekday name ("Monday", ...).
    pub daily_distribution: BTreeMap<String, usize>,
    /// Top three hours by count, ties broken by the earlier hour.
    pub peak_hours: Vec<HourCount>,
}

/// Hour/weekday distributions over the trailing `days`.
///
/// Returns `None` when no execution falls inside the window.
pub fn extract_temporal_patterns(
    executions: &[ToolExecution],
    now: DateTime<Utc>,
    days: i64,
    offset: FixedOffset,
) -> Option<TemporalPatterns> {
    let mut hourly: BTreeMap<u32, usize> = BTreeMap::new();
    let mut daily: BTreeMap<String, usize> = BTreeMap::new();
    let mut range: Option<DateRange> = None;
    let mut total = 0;

    for exec in within_window(executions, now, days) {
        let local = exec.timestamp.with_timezone(&offset);
        *hourly.entry(local.hour()).or_default() += 1;
        *daily.entry(local.format("%A").to_string()).or_default() += 1;
        total += 1;

        range = Some(match range {
            None => DateRange {
                from: exec.timestamp,
                to: exec.timestamp,
            },
            Some(r) => DateRange {
                from: r.from.min(exec.timestamp),
                to: r.to.max(exec.timestamp),
            },
        });
    }

    let date_range = range?;
    let mut peak_hours: Vec<HourCount> = hourly
        .iter()
        .map(|(&hour, &count)| HourCount { hour, count })
        .collect();
    peak_hours.sort_by(|a, b| b.count.cmp(&a.count).then(a.hour.cmp(&b.hour)));
    peak_hours.truncate(3);

    Some(TemporalPatterns {
        total_executions: total,
        date_range,
        hourly_distribution: hourly,
        daily_distribution: daily,
        peak_hours,
    })
}

/// Count executions per `"Weekday_HH"` key.
pub fn weekday_hour_distribution(
    executions: &[ToolExecution],
    offset: FixedOffset,
) -> BTreeMap<String, usize> {
    let mut dist = BTreeMap::new();
    for exec in executions {
        let local = exec.timestamp.with_timezone(&offset);
        *dist
            .entry(format!("{}_{:02}", local.format("%A"), local.hour()))
            .or_default() += 1;
    }
    dist
}

// ─────────────────────────────────────────────────────────────────────────────
// Clustering
// ─────────────────────────────────────────────────────────────────────────────

/// A weekday 3-hour block holding at least [`CLUSTER_THRESHOLD`] executions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeCluster {
    pub weekday: String,
    /// `hour / 3`, so `0..=7`.
    pub block: u32,
    pub execution_count: usize,
    /// Distinct tool names, sorted.
    pub tools_used: Vec<String>,
    /// e.g. `"18:00-21:00"`.
    pub time_range: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemporalClusters {
    /// Number of non-empty blocks.
    pub total_time_clusters: usize,
    /// Significant blocks, Monday first, earliest block first.
    pub significant_clusters: Vec<TimeCluster>,
    pub cluster_threshold: usize,
}

/// Group executions by `(weekday, hour / 3)` and report the blocks that hold
/// at least three executions.
///
/// Returns `None` when fewer than three executions are supplied.
pub fn extract_temporal_clusters(
    executions: &[ToolExecution],
    offset: FixedOffset,
) -> Option<TemporalClusters> {
    if executions.len() < CLUSTER_THRESHOLD {
        return None;
    }

    // Key: (weekday index from Monday, block) so iteration order is stable.
    let mut blocks: BTreeMap<(u32, u32), (String, Vec<&ToolExecution>)> = BTreeMap::new();
    for exec in executions {
        let local = exec.timestamp.with_timezone(&offset);
        let key = (local.weekday().num_days_from_monday(), local.hour() / 3);
        blocks
            .entry(key)
            .or_insert_with(|| (local.format("%A").to_string(), Vec::new()))
            .1
            .push(exec);
    }

    let significant_clusters = blocks
        .iter()
        .filter(|(_, (_, execs))| execs.len() >= CLUSTER_THRESHOLD)
        .map(|(&(_, block), (weekday, execs))| {
            let tools: BTreeSet<&str> = execs.iter().map(|e| e.tool.as_str()).collect();
            TimeCluster {
                weekday: weekday.clone(),
                block,
                execution_count: execs.len(),
                tools_used: tools.into_iter().map(str::to_string).collect(),
                time_range: format!("{:02}:00-{:02}:00", block * 3, block * 3 + 3),
            }
        })
        .collect();

    Some(TemporalClusters {
        total_time_clusters: blocks.len(),
        significant_clusters,
        cluster_threshold: CLUSTER_THRESHOLD,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(id: i64, tool: &str, ts: DateTime<Utc>) -> ToolExecution {
        ToolExecution {
            id,
            tool: tool.into(),
            arguments: None,
            result: None,
            context: None,
            timestamp: ts,
        }
    }

    fn utc() -> FixedOffset {
        bucket_offset(0)
    }

    // 2026-06-05 is a Friday.
    fn friday(hour: u32, min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 6, 5, hour, min, 0).unwrap()
    }

    #[test]
    fn empty_window_yields_none() {
        let now = friday(23, 0);
        let old = at(1, "play_song", now - Duration::days(40));
        assert!(extract_temporal_patterns(&[old], now, 30, utc()).is_none());
        assert!(extract_temporal_patterns(&[], now, 30, utc()).is_none());
    }

    #[test]
    fn oversized_window_falls_back_to_default() {
        let now = friday(23, 0);
        let recent = at(1, "play_song", now - Duration::days(2));
        let old = at(2, "play_song", now - Duration::days(40));
        let execs = [recent, old];
        let kept: Vec<i64> = within_window(&execs, now, i64::MAX).map(|e| e.id).collect();
        assert_eq!(kept, vec![1]);
        assert_eq!(window_cutoff(now, i64::MIN), now - Duration::days(DEFAULT_WINDOW_DAYS));
    }

    #[test]
    fn peak_hours_break_ties_by_earlier_hour() {
        let execs = vec![
            at(1, "a", friday(20, 0)),
            at(2, "a", friday(20, 5)),
            at(3, "a", friday(9, 0)),
            at(4, "a", friday(9, 30)),
            at(5, "a", friday(14, 0)),
            at(6, "a", friday(7, 0)),
        ];
        let p = extract_temporal_patterns(&execs, friday(23, 0), 30, utc()).unwrap();
        assert_eq!(p.total_executions, 6);
        assert_eq!(
            p.peak_hours,
            vec![
                HourCount { hour: 9, count: 2 },
                HourCount { hour: 20, count: 2 },
                HourCount { hour: 7, count: 1 },
            ]
        );
        assert_eq!(p.daily_distribution.get("Friday"), Some(&6));
        assert_eq!(p.date_range.from, friday(7, 0));
        assert_eq!(p.date_range.to, friday(20, 5));
    }

    #[test]
    fn offset_shifts_buckets() {
        let execs = vec![at(1, "a", friday(23, 30))];
        let p = extract_temporal_patterns(&execs, friday(23, 45), 30, bucket_offset(120)).unwrap();
        assert_eq!(p.hourly_distribution.get(&1), Some(&1));
        assert_eq!(p.daily_distribution.get("Saturday"), Some(&1));
    }

    #[test]
    fn invalid_offset_falls_back_to_utc() {
        assert_eq!(bucket_offset(100_000).local_minus_utc(), 0);
    }

    #[test]
    fn weekday_hour_keys() {
        let dist = weekday_hour_distribution(&[at(1, "a", friday(8, 10))], utc());
        assert_eq!(dist.get("Friday_08"), Some(&1));
    }

    #[test]
    fn clusters_need_three_executions_overall() {
        let execs = vec![at(1, "a", friday(19, 0)), at(2, "a", friday(19, 5))];
        assert!(extract_temporal_clusters(&execs, utc()).is_none());
    }

    #[test]
    fn significant_blocks_reported_with_range_and_tools() {
        let execs = vec![
            at(1, "play_song", friday(18, 10)),
            at(2, "set_volume", friday(19, 0)),
            at(3, "play_song", friday(20, 59)),
            at(4, "play_song", friday(9, 0)),
            // Same block, different weekday.
            at(5, "play_song", friday(19, 0) + Duration::days(1)),
        ];
        let c = extract_temporal_clusters(&execs, utc()).unwrap();
        assert_eq!(c.total_time_clusters, 3);
        assert_eq!(c.cluster_threshold, 3);
        assert_eq!(c.significant_clusters.len(), 1);

        let cluster = &c.significant_clusters[0];
        assert_eq!(cluster.weekday, "Friday");
        assert_eq!(cluster.block, 6);
        assert_eq!(cluster.execution_count, 3);
        assert_eq!(cluster.tools_used, vec!["play_song", "set_volume"]);
        assert_eq!(cluster.time_range, "18:00-21:00");
    }
}
