//! Pattern summaries.
//!
//! Two entry points over an execution slice:
//!
//! - [`generate_pattern_summary`] – broad view: temporal, usage, sequence and
//!   behavioral extraction over the whole window.
//! - [`generate_similar_tool_summary`] – narrow view keyed on one tool: the
//!   relevance-filtered set, its weekday/hour distribution, clusters, argument
//!   samples and success split. This is what reconciliation consumes.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use habitus_types::ToolExecution;
use serde::{Deserialize, Serialize};

use crate::extractor::ExtractorConfig;
use crate::relevance::{RelevanceConfig, filter_relevant_executions};
use crate::sequence::{SequencePatterns, extract_sequence_patterns};
use crate::temporal::{
    TemporalClusters, TemporalPatterns, bucket_offset, extract_temporal_clusters,
    extract_temporal_patterns, weekday_hour_distribution,
};
use crate::usage::{
    BehavioralPatterns, UsagePatterns, extract_behavioral_patterns, extract_tool_usage,
};

const RECENT_SUCCESSES: usize = 3;
const RECENT_FAILURES: usize = 2;

// ─────────────────────────────────────────────────────────────────────────────
// Broad summary
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryMetadata {
    pub days_analyzed: i64,
    pub generated_at: DateTime<Utc>,
    pub total_executions: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternSummary {
    pub analysis_metadata: SummaryMetadata,
    /// `None` when the window holds no executions.
    pub temporal_patterns: Option<TemporalPatterns>,
    pub tool_usage_patterns: UsagePatterns,
    pub sequence_patterns: SequencePatterns,
    pub behavioral_patterns: BehavioralPatterns,
}

pub fn generate_pattern_summary(
    executions: &[ToolExecution],
    now: DateTime<Utc>,
    days: i64,
    config: &ExtractorConfig,
) -> PatternSummary {
    let offset = bucket_offset(config.utc_offset_minutes);
    let temporal = extract_temporal_patterns(executions, now, days, offset);
    PatternSummary {
        analysis_metadata: SummaryMetadata {
            days_analyzed: days,
            generated_at: now,
            total_executions: temporal.as_ref().map_or(0, |t| t.total_executions),
        },
        temporal_patterns: temporal,
        tool_usage_patterns: extract_tool_usage(executions, now, days),
        sequence_patterns: extract_sequence_patterns(executions, now, days),
        behavioral_patterns: extract_behavioral_patterns(
            executions,
            now,
            days,
            &config.search_tool,
        ),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Similar-tool summary
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimilarToolMetadata {
    pub target_tool: String,
    pub days_analyzed: i64,
    pub generated_at: DateTime<Utc>,
    pub total_executions: usize,
}

/// Arguments of one relevant execution, grouped per tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArgumentSample {
    pub arguments: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSpecificPatterns {
    pub total_relevant_uses: usize,
    pub success_rate: f64,
    /// Executions per `"Weekday_HH"`.
    pub temporal_distribution: BTreeMap<String, usize>,
    /// `None` when fewer than three executions are relevant.
    pub behavioral_clusters: Option<TemporalClusters>,
    pub argument_patterns: BTreeMap<String, Vec<ArgumentSample>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuccessAnalysis {
    pub successful_executions: usize,
    pub failed_executions: usize,
    /// Newest three successful executions.
    pub recent_successes: Vec<ToolExecution>,
    /// Newest two failed executions.
    pub recent_failures: Vec<ToolExecution>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimilarToolPatterns {
    pub analysis_metadata: SimilarToolMetadata,
    pub tool_specific_patterns: ToolSpecificPatterns,
    pub success_analysis: SuccessAnalysis,
    /// The filtered set itself, newest first. Kept out of the serialized
    /// form; the fields above already describe it.
    #[serde(skip)]
    pub relevant_executions: Vec<ToolExecution>,
}

/// Narrow summary for one triggering tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SimilarToolSummary {
    /// Too few relevant executions to say anything.
    Insufficient {
        target_tool: Option<String>,
        relevant_executions_found: usize,
    },
    Found(Box<SimilarToolPatterns>),
}

impl SimilarToolSummary {
    pub fn relevant_count(&self) -> usize {
        match self {
            SimilarToolSummary::Insufficient {
                relevant_executions_found,
                ..
            } => *relevant_executions_found,
            SimilarToolSummary::Found(p) => p.relevant_executions.len(),
        }
    }

    pub fn relevant_executions(&self) -> &[ToolExecution] {
        match self {
            SimilarToolSummary::Insufficient { .. } => &[],
            SimilarToolSummary::Found(p) => &p.relevant_executions,
        }
    }
}

/// Relevance-filtered summary around `target_tool`.
///
/// With no target, the tool of the most recent execution is used.
pub fn generate_similar_tool_summary(
    executions: &[ToolExecution],
    target_tool: Option<&str>,
    now: DateTime<Utc>,
    days: i64,
    config: &ExtractorConfig,
) -> SimilarToolSummary {
    let target = match target_tool {
        Some(t) => t.to_string(),
        None => match executions
            .iter()
            .max_by(|a, b| a.timestamp.cmp(&b.timestamp).then(a.id.cmp(&b.id)))
        {
            Some(latest) => latest.tool.clone(),
            None => {
                return SimilarToolSummary::Insufficient {
                    target_tool: None,
                    relevant_executions_found: 0,
                };
            }
        },
    };

    let relevance = RelevanceConfig {
        window_days: days,
        ..config.relevance.clone()
    };
    let relevant = filter_relevant_executions(executions, &target, now, &relevance);
    if relevant.len() < config.min_similar_executions {
        return SimilarToolSummary::Insufficient {
            target_tool: Some(target),
            relevant_executions_found: relevant.len(),
        };
    }

    let offset = bucket_offset(config.utc_offset_minutes);
    let mut argument_patterns: BTreeMap<String, Vec<ArgumentSample>> = BTreeMap::new();
    for exec in &relevant {
        if let Some(arguments) = exec.arguments.clone() {
            argument_patterns
                .entry(exec.tool.clone())
                .or_default()
                .push(ArgumentSample {
                    arguments,
                    timestamp: exec.timestamp,
                });
        }
    }

    let (successful, failed): (Vec<&ToolExecution>, Vec<&ToolExecution>) =
        relevant.iter().partition(|e| e.succeeded());

    SimilarToolSummary::Found(Box::new(SimilarToolPatterns {
        analysis_metadata: SimilarToolMetadata {
            target_tool: target,
            days_analyzed: days,
            generated_at: now,
            total_executions: relevant.len(),
        },
        tool_specific_patterns: ToolSpecificPatterns {
            total_relevant_uses: relevant.len(),
            success_rate: successful.len() as f64 / relevant.len().max(1) as f64,
            temporal_distribution: weekday_hour_distribution(&relevant, offset),
            behavioral_clusters: extract_temporal_clusters(&relevant, offset),
            argument_patterns,
        },
        success_analysis: SuccessAnalysis {
            successful_executions: successful.len(),
            failed_executions: failed.len(),
            recent_successes: successful.iter().take(RECENT_SUCCESSES).map(|e| (*e).clone()).collect(),
            recent_failures: failed.iter().take(RECENT_FAILURES).map(|e| (*e).clone()).collect(),
        },
        relevant_executions: relevant,
    }))
}
