//! Verdict assembly: ranking, recommendation, alternatives and the immutable
//! result handed back to the caller.

use crate::assembly::AssemblyPlan;
use crate::clarification::ClarificationRequest;
use crate::resolver::{ActiveStressor, Resolution};
use crate::sizing::SizingArrangement;
use crate::veto::{compatible_materials, Advisory, BlockReason, CandidateStatus, CandidateVerdict};
use configurator_facts::{CompletenessWarning, FactSnapshot, FactValue, RequestContext};
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Recommendation {
    pub candidate: String,
    pub name: String,
    pub status: CandidateStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assembly: Option<AssemblyPlan>,
    pub score: f64,
}

impl Recommendation {
    /// Candidate ids making up the recommendation, protectors first.
    #[must_use]
    pub fn stage_ids(&self) -> Vec<String> {
        match &self.assembly {
            Some(plan) => plan.candidates().map(str::to_string).collect(),
            None => vec![self.candidate.clone()],
        }
    }
}

/// Suggestion offered when the requested (or every) candidate is blocked.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Alternative {
    pub candidate: String,
    pub name: String,
    pub status: CandidateStatus,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub remaining_blocks: Vec<BlockReason>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub compatible_materials: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleKind {
    Causal,
    Dependency,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AppliedRule {
    pub id: String,
    pub kind: RuleKind,
    pub stressor: String,
    #[serde(rename = "trait")]
    pub trait_id: String,
}

/// What the caller should persist for the next turn.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SessionUpdate {
    pub chosen_candidates: Vec<String>,
    pub assembly_stages: Vec<String>,
    pub resolved_parameters: BTreeMap<String, FactValue>,
}

/// Result of one evaluation. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Verdict {
    candidates: Vec<CandidateVerdict>,
    recommendation: Option<Recommendation>,
    assemblies: Vec<AssemblyPlan>,
    advisories: Vec<Advisory>,
    sizing: Option<SizingArrangement>,
    clarifications: Vec<ClarificationRequest>,
    alternatives: Vec<Alternative>,
    active_stressors: Vec<ActiveStressor>,
    applied_rules: Vec<AppliedRule>,
    completeness_warnings: Vec<CompletenessWarning>,
    resolved_defaults: BTreeMap<String, FactValue>,
    session: SessionUpdate,
}

/// Stage outputs the verdict is assembled from.
pub(crate) struct VerdictParts {
    pub candidates: Vec<CandidateVerdict>,
    pub recommendation: Option<Recommendation>,
    pub assemblies: Vec<AssemblyPlan>,
    pub sizing: Option<SizingArrangement>,
    pub sizing_advisories: Vec<Advisory>,
    pub clarifications: Vec<ClarificationRequest>,
    pub alternatives: Vec<Alternative>,
    pub resolved_defaults: BTreeMap<String, FactValue>,
}

impl Verdict {
    pub(crate) fn assemble(
        parts: VerdictParts,
        ctx: &RequestContext,
        snapshot: &FactSnapshot,
        resolution: Resolution,
    ) -> Self {
        let VerdictParts {
            candidates,
            recommendation,
            assemblies,
            sizing,
            sizing_advisories,
            clarifications,
            alternatives,
            resolved_defaults,
        } = parts;

        let mut advisories: Vec<Advisory> = candidates
            .iter()
            .flat_map(|c| c.advisories.iter().cloned())
            .collect();
        advisories.extend(sizing_advisories);

        let applied_rules = resolution
            .causal_rules
            .iter()
            .map(|rule| AppliedRule {
                id: rule.id.clone(),
                kind: RuleKind::Causal,
                stressor: rule.stressor.clone(),
                trait_id: rule.demanded_trait.clone(),
            })
            .chain(resolution.dependency_rules.iter().map(|rule| AppliedRule {
                id: rule.id.clone(),
                kind: RuleKind::Dependency,
                stressor: rule.stressor.clone(),
                trait_id: rule.provides_trait.clone(),
            }))
            .collect();

        let mut completeness_warnings: Vec<CompletenessWarning> = snapshot.warnings().to_vec();
        completeness_warnings.extend(resolution.warnings);

        let session = SessionUpdate {
            chosen_candidates: recommendation
                .as_ref()
                .map(|r| vec![r.candidate.clone()])
                .unwrap_or_default(),
            assembly_stages: recommendation
                .as_ref()
                .and_then(|r| r.assembly.as_ref())
                .map(|plan| plan.candidates().map(str::to_string).collect())
                .unwrap_or_default(),
            resolved_parameters: ctx
                .with_defaults(&resolved_defaults)
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        };

        Self {
            candidates,
            recommendation,
            assemblies,
            advisories,
            sizing,
            clarifications,
            alternatives,
            active_stressors: resolution.stressors.into_values().collect(),
            applied_rules,
            completeness_warnings,
            resolved_defaults,
            session,
        }
    }

    #[must_use]
    pub fn candidates(&self) -> &[CandidateVerdict] {
        &self.candidates
    }

    #[must_use]
    pub fn candidate(&self, id: &str) -> Option<&CandidateVerdict> {
        self.candidates.iter().find(|c| c.candidate == id)
    }

    #[must_use]
    pub const fn recommendation(&self) -> Option<&Recommendation> {
        self.recommendation.as_ref()
    }

    #[must_use]
    pub fn assemblies(&self) -> &[AssemblyPlan] {
        &self.assemblies
    }

    #[must_use]
    pub fn advisories(&self) -> &[Advisory] {
        &self.advisories
    }

    #[must_use]
    pub const fn sizing(&self) -> Option<&SizingArrangement> {
        self.sizing.as_ref()
    }

    #[must_use]
    pub fn clarifications(&self) -> &[ClarificationRequest] {
        &self.clarifications
    }

    #[must_use]
    pub fn alternatives(&self) -> &[Alternative] {
        &self.alternatives
    }

    #[must_use]
    pub fn active_stressors(&self) -> &[ActiveStressor] {
        &self.active_stressors
    }

    #[must_use]
    pub fn applied_rules(&self) -> &[AppliedRule] {
        &self.applied_rules
    }

    #[must_use]
    pub fn completeness_warnings(&self) -> &[CompletenessWarning] {
        &self.completeness_warnings
    }

    #[must_use]
    pub const fn resolved_defaults(&self) -> &BTreeMap<String, FactValue> {
        &self.resolved_defaults
    }

    #[must_use]
    pub const fn session(&self) -> &SessionUpdate {
        &self.session
    }

    /// True when no candidate is viable, even through an assembly.
    #[must_use]
    pub fn fully_blocked(&self) -> bool {
        self.recommendation.is_none()
    }
}

fn viability_tier(verdict: &CandidateVerdict) -> u8 {
    match verdict.status {
        CandidateStatus::Pass => 0,
        CandidateStatus::Warn => 1,
        _ if verdict.assembled => 2,
        _ => 3,
    }
}

/// Hinted first, then Pass, Warn, assembled; then score (descending),
/// selection priority and id.
pub(crate) fn rank(a: &CandidateVerdict, b: &CandidateVerdict) -> Ordering {
    b.hinted
        .cmp(&a.hinted)
        .then_with(|| viability_tier(a).cmp(&viability_tier(b)))
        .then_with(|| b.score.total_cmp(&a.score))
        .then_with(|| a.selection_priority.cmp(&b.selection_priority))
        .then_with(|| a.candidate.cmp(&b.candidate))
}

/// Best viable candidate, with its assembly plan when it needs one.
pub(crate) fn recommend(
    candidates: &[CandidateVerdict],
    assemblies: &[AssemblyPlan],
) -> Option<Recommendation> {
    let best = candidates
        .iter()
        .filter(|c| c.is_viable())
        .min_by(|a, b| rank(a, b))?;
    let assembly = best
        .assembled
        .then(|| assemblies.iter().find(|p| p.target == best.candidate).cloned())
        .flatten();
    Some(Recommendation {
        candidate: best.candidate.clone(),
        name: best.name.clone(),
        status: best.status,
        assembly,
        score: best.score,
    })
}

/// Candidates the clarification gate asks about.
pub(crate) fn focus(
    recommendation: Option<&Recommendation>,
    candidates: &[CandidateVerdict],
) -> Vec<String> {
    if let Some(recommendation) = recommendation {
        return recommendation.stage_ids();
    }
    let hinted: Vec<String> = candidates
        .iter()
        .filter(|c| c.hinted)
        .map(|c| c.candidate.clone())
        .collect();
    if hinted.is_empty() {
        candidates.iter().map(|c| c.candidate.clone()).collect()
    } else {
        hinted
    }
}

/// Sales recovery.
///
/// Triggers when every hinted candidate (or, without a hint, every candidate)
/// is blocked beyond recovery. Viable non-hinted candidates are offered
/// first; failing that, candidates whose blocks a different material or
/// installation could lift, with the materials that would pass.
pub(crate) fn alternatives(
    candidates: &[CandidateVerdict],
    snapshot: &FactSnapshot,
    resolution: &Resolution,
    max: usize,
) -> Vec<Alternative> {
    let hinted: Vec<&CandidateVerdict> = candidates.iter().filter(|c| c.hinted).collect();
    let triggered = if hinted.is_empty() {
        !candidates.is_empty() && candidates.iter().all(|c| !c.is_viable())
    } else {
        hinted.iter().all(|c| !c.is_viable())
    };
    if !triggered || max == 0 {
        return Vec::new();
    }

    let mut viable: Vec<&CandidateVerdict> = candidates
        .iter()
        .filter(|c| !c.hinted && c.is_viable())
        .collect();
    if !viable.is_empty() {
        viable.sort_by(|a, b| rank(a, b));
        return viable
            .into_iter()
            .take(max)
            .map(|c| Alternative {
                candidate: c.candidate.clone(),
                name: c.name.clone(),
                status: c.status,
                remaining_blocks: Vec::new(),
                compatible_materials: Vec::new(),
            })
            .collect();
    }

    let mut recoverable: Vec<&CandidateVerdict> = candidates
        .iter()
        .filter(|c| {
            !c.blocks.iter().any(|b| {
                matches!(
                    b.status(),
                    CandidateStatus::EnvironmentBlock | CandidateStatus::MissingTraitBlock
                )
            })
        })
        .collect();
    recoverable.sort_by(|a, b| {
        a.blocks
            .len()
            .cmp(&b.blocks.len())
            .then_with(|| a.selection_priority.cmp(&b.selection_priority))
            .then_with(|| a.candidate.cmp(&b.candidate))
    });

    recoverable
        .into_iter()
        .take(max)
        .map(|c| {
            let material_blocked = c
                .blocks
                .iter()
                .any(|b| b.status() == CandidateStatus::MaterialBlock);
            let compatible = match snapshot.candidate(&c.candidate) {
                Some(candidate) if material_blocked => {
                    compatible_materials(candidate, snapshot, resolution)
                }
                _ => Vec::new(),
            };
            Alternative {
                candidate: c.candidate.clone(),
                name: c.name.clone(),
                status: c.status,
                remaining_blocks: c.blocks.clone(),
                compatible_materials: compatible,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::veto::CandidateStatus;

    fn verdict(id: &str, status: CandidateStatus, score: f64, priority: u32) -> CandidateVerdict {
        CandidateVerdict {
            candidate: id.to_string(),
            name: id.to_string(),
            status,
            blocks: Vec::new(),
            violations: Vec::new(),
            advisories: Vec::new(),
            satisfied_traits: Vec::new(),
            missing_traits: Vec::new(),
            score,
            hinted: false,
            assembled: false,
            selection_priority: priority,
        }
    }

    #[test]
    fn ranking_prefers_hint_then_status_then_score() {
        let mut hinted = verdict("hinted", CandidateStatus::Warn, 0.0, 9);
        hinted.hinted = true;
        let pass_low = verdict("pass_low", CandidateStatus::Pass, 1.0, 1);
        let pass_high = verdict("pass_high", CandidateStatus::Pass, 6.0, 5);
        let mut assembled = verdict("assembled", CandidateStatus::NeutralizationBlock, 9.0, 0);
        assembled.assembled = true;

        let mut all = vec![assembled, pass_low, hinted, pass_high];
        all.sort_by(rank);
        let order: Vec<&str> = all.iter().map(|c| c.candidate.as_str()).collect();
        assert_eq!(order, vec!["hinted", "pass_high", "pass_low", "assembled"]);
    }

    #[test]
    fn no_recommendation_when_nothing_is_viable() {
        let blocked = verdict("a", CandidateStatus::MissingTraitBlock, 0.0, 1);
        assert!(recommend(&[blocked], &[]).is_none());
    }

    #[test]
    fn alternatives_only_when_hinted_candidate_is_blocked() {
        let snapshot = FactSnapshot::default();
        let resolution = Resolution::default();
        let mut hinted = verdict("hinted", CandidateStatus::Pass, 0.0, 1);
        hinted.hinted = true;
        let other = verdict("other", CandidateStatus::Pass, 0.0, 1);
        assert!(alternatives(&[hinted.clone(), other.clone()], &snapshot, &resolution, 3).is_empty());

        hinted.status = CandidateStatus::EnvironmentBlock;
        let offered = alternatives(&[hinted, other], &snapshot, &resolution, 3);
        assert_eq!(offered.len(), 1);
        assert_eq!(offered[0].candidate, "other");
    }

    #[test]
    fn recovery_pool_skips_environment_and_missing_trait_blocks() {
        let snapshot = FactSnapshot::default();
        let resolution = Resolution::default();
        let mut env = verdict("env", CandidateStatus::EnvironmentBlock, 0.0, 1);
        env.blocks.push(BlockReason::Environment {
            environment: "hospital".to_string(),
            allowed: vec!["office".to_string()],
        });
        let mut install = verdict("install", CandidateStatus::InstallationBlock, 0.0, 2);
        install.blocks.push(BlockReason::Installation {
            constraint: "clearance".to_string(),
            message: "too tight".to_string(),
        });
        let offered = alternatives(&[env, install], &snapshot, &resolution, 3);
        assert_eq!(offered.len(), 1);
        assert_eq!(offered[0].candidate, "install");
        assert_eq!(offered[0].remaining_blocks.len(), 1);
    }
}
