//! Built-in [`EvidenceRule`]s.
//!
//! - [`ShapeRule`] – non-empty, bounded text for create/update; positive ids.
//! - [`KnownMemoryRule`] – id-based actions must target a memory the
//!   analysis step was shown.
//! - [`SupportRule`] – minimum number of supporting executions per action.

use habitus_types::{HabitusError, MemoryAction, MemoryModification};

use crate::evidence_gate::{EvidenceContext, EvidenceRule};

/// Rejects structurally unusable modifications.
pub struct ShapeRule {
    /// Longest memory text accepted, in characters.
    pub max_text_chars: usize,
}

impl Default for ShapeRule {
    fn default() -> Self {
        Self { max_text_chars: 500 }
    }
}

impl EvidenceRule for ShapeRule {
    fn name(&self) -> &str {
        "shape"
    }

    fn check(&self, m: &MemoryModification, _: &EvidenceContext<'_>) -> Result<(), HabitusError> {
        if let Some(id) = m.id() {
            if id <= 0 {
                return Err(HabitusError::Validation(format!(
                    "{} targets invalid id {id}",
                    m.action()
                )));
            }
        }
        if let Some(text) = m.text() {
            let len = text.trim().chars().count();
            if len == 0 {
                return Err(HabitusError::Validation(format!("{} has empty text", m.action())));
            }
            if len > self.max_text_chars {
                return Err(HabitusError::Validation(format!(
                    "{} text is {len} chars, limit {}",
                    m.action(),
                    self.max_text_chars
                )));
            }
        }
        Ok(())
    }
}

/// Rejects id-based actions on memories outside the evidence package.
pub struct KnownMemoryRule;

impl EvidenceRule for KnownMemoryRule {
    fn name(&self) -> &str {
        "known_memory"
    }

    fn check(&self, m: &MemoryModification, ctx: &EvidenceContext<'_>) -> Result<(), HabitusError> {
        match m.id() {
            Some(id) if ctx.memory(id).is_none() => Err(HabitusError::NotFound(id)),
            _ => Ok(()),
        }
    }
}

/// Minimum supporting executions per action.
///
/// Weakening needs no support: it is the response to evidence going stale.
pub struct SupportRule {
    pub create: usize,
    pub reinforce: usize,
    pub update_content: usize,
}

impl Default for SupportRule {
    fn default() -> Self {
        Self {
            create: 3,
            reinforce: 2,
            update_content: 2,
        }
    }
}

impl SupportRule {
    pub fn minimum(&self, action: MemoryAction) -> usize {
        match action {
            MemoryAction::Create => self.create,
            MemoryAction::Reinforce => self.reinforce,
            MemoryAction::UpdateContent => self.update_content,
            MemoryAction::Weaken => 0,
        }
    }
}

impl EvidenceRule for SupportRule {
    fn name(&self) -> &str {
        "support"
    }

    fn check(&self, m: &MemoryModification, ctx: &EvidenceContext<'_>) -> Result<(), HabitusError> {
        let needed = self.minimum(m.action());
        if needed == 0 {
            return Ok(());
        }
        let found = ctx.support_for(m);
        if found < needed {
            return Err(HabitusError::InsufficientEvidence {
                action: m.action(),
                details: format!("{found} supporting execution(s), need {needed}"),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use habitus_patterns::RelevanceConfig;
    use habitus_types::{Memory, ToolExecution};

    fn runs(n: i64, tool: &str) -> Vec<ToolExecution> {
        (1..=n)
            .map(|id| ToolExecution {
                id,
                tool: tool.into(),
                arguments: None,
                result: None,
                context: None,
                timestamp: Utc::now(),
            })
            .collect()
    }

    fn memories() -> Vec<Memory> {
        vec![Memory {
            id: 1,
            text: "User listens to music at night".into(),
            confidence: 0.6,
            last_updated: Utc::now(),
        }]
    }

    #[test]
    fn shape_rejects_blank_and_oversized_text() {
        let relevance = RelevanceConfig::default();
        let ctx = EvidenceContext::new("x", &[], &[], &relevance);
        let rule = ShapeRule { max_text_chars: 10 };

        let blank = MemoryModification::Create { text: "  ".into() };
        assert!(matches!(rule.check(&blank, &ctx), Err(HabitusError::Validation(_))));

        let long = MemoryModification::Create { text: "x".repeat(11) };
        assert!(rule.check(&long, &ctx).is_err());

        let bad_id = MemoryModification::Weaken { id: 0 };
        assert!(rule.check(&bad_id, &ctx).is_err());

        let ok = MemoryModification::UpdateContent { id: 3, text: "fine".into() };
        assert!(rule.check(&ok, &ctx).is_ok());
    }

    #[test]
    fn known_memory_rule_ignores_creates() {
        let relevance = RelevanceConfig::default();
        let mems = memories();
        let ctx = EvidenceContext::new("x", &[], &mems, &relevance);

        assert!(KnownMemoryRule.check(&MemoryModification::Create { text: "t".into() }, &ctx).is_ok());
        assert!(KnownMemoryRule.check(&MemoryModification::Weaken { id: 1 }, &ctx).is_ok());
        assert_eq!(
            KnownMemoryRule.check(&MemoryModification::Weaken { id: 2 }, &ctx),
            Err(HabitusError::NotFound(2))
        );
    }

    #[test]
    fn create_needs_three_reinforce_needs_two() {
        let relevance = RelevanceConfig::default();
        let mems = memories();
        let two = runs(2, "play_song");
        let ctx = EvidenceContext::new("play_song", &two, &mems, &relevance);
        let rule = SupportRule::default();

        let create = MemoryModification::Create { text: "User likes EDM music".into() };
        let err = rule.check(&create, &ctx).unwrap_err();
        assert!(matches!(
            err,
            HabitusError::InsufficientEvidence { action: MemoryAction::Create, .. }
        ));
        assert!(rule.check(&MemoryModification::Reinforce { id: 1 }, &ctx).is_ok());
        assert!(rule.check(&MemoryModification::UpdateContent { id: 1, text: "t".into() }, &ctx).is_ok());

        let three = runs(3, "play_song");
        let ctx = EvidenceContext::new("play_song", &three, &mems, &relevance);
        assert!(rule.check(&create, &ctx).is_ok());
    }

    #[test]
    fn trigger_runs_do_not_back_off_topic_text() {
        let relevance = RelevanceConfig::default();
        let three = runs(3, "play_song");
        let ctx = EvidenceContext::new("play_song", &three, &[], &relevance);
        let create = MemoryModification::Create { text: "User owns a cat".into() };
        assert!(SupportRule::default().check(&create, &ctx).is_err());
    }

    #[test]
    fn weaken_needs_no_support() {
        let relevance = RelevanceConfig::default();
        let mems = memories();
        let ctx = EvidenceContext::new("play_song", &[], &mems, &relevance);
        assert!(SupportRule::default().check(&MemoryModification::Weaken { id: 1 }, &ctx).is_ok());
        assert!(
            SupportRule::default()
                .check(&MemoryModification::Reinforce { id: 1 }, &ctx)
                .is_err()
        );
    }
}
