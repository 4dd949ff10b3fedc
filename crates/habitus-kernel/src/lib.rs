//! `habitus-kernel` – Evidence Gate
//!
//! Sits between the reconciliation analyzer and the memory store. It does not
//! judge patterns; it enforces that whatever the analysis step proposes is
//! backed by the executions it was shown.
//!
//! # Modules
//!
//! - [`evidence_gate`] – [`EvidenceGate`][evidence_gate::EvidenceGate]: an
//!   ordered rule engine that splits a batch of
//!   [`MemoryModification`][habitus_types::MemoryModification]s into accepted
//!   and rejected, and [`EvidenceContext`][evidence_gate::EvidenceContext],
//!   the evidence it judges against.
//! - [`rules`] – the built-in rules: [`ShapeRule`][rules::ShapeRule],
//!   [`KnownMemoryRule`][rules::KnownMemoryRule] and
//!   [`SupportRule`][rules::SupportRule].

pub mod evidence_gate;
pub mod rules;

pub use evidence_gate::{
    EvidenceContext, EvidenceGate, EvidenceRule, GateReview, RejectedModification,
};
pub use rules::{KnownMemoryRule, ShapeRule, SupportRule};
