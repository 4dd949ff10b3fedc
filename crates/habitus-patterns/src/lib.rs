//! `habitus-patterns` – Pattern Extractor.
//!
//! Read-only analytics that mine the tool-execution log for signal about the
//! user: when they are active, which tools they reach for, which tools they
//! chain together, and which past executions bear on a given triggering tool.
//!
//! # Modules
//!
//! - [`temporal`] – hour/weekday distributions, peak hours and 3-hour
//!   weekday clusters.
//! - [`usage`] – per-tool usage ranking and argument-level behavior
//!   (recent search queries).
//! - [`sequence`] – session splitting and adjacent pair/triplet mining.
//! - [`relevance`] – [`RelevanceConfig`][relevance::RelevanceConfig] and the
//!   relevance filter that scopes evidence to one triggering tool.
//! - [`summary`] – broad [`PatternSummary`][summary::PatternSummary] and narrow
//!   [`SimilarToolSummary`][summary::SimilarToolSummary].
//! - [`extractor`] – [`PatternExtractor`][extractor::PatternExtractor]: runs the
//!   above against the latest rows of a
//!   [`MemoryStore`][habitus_memory::MemoryStore].
//!
//! Every function tolerates an empty log and reports "no data" through
//! `Option`, empty collections or [`SimilarToolSummary::Insufficient`][summary::SimilarToolSummary::Insufficient].

pub mod extractor;
pub mod relevance;
pub mod sequence;
pub mod summary;
pub mod temporal;
pub mod usage;

pub use extractor::{ExtractorConfig, PatternExtractor};
pub use relevance::{RelevanceConfig, ToolCategory, filter_relevant_executions};
pub use summary::{PatternSummary, SimilarToolPatterns, SimilarToolSummary};
