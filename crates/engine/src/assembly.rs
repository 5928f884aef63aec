//! Multi-stage assemblies: upstream protectors neutralizing a stressor for a
//! downstream target that lacks the demanded trait.

use crate::profile::EngineProfile;
use crate::resolver::{Demand, Resolution};
use crate::veto::{BlockReason, CandidateVerdict};
use configurator_facts::{Candidate, DependencyRule, FactSnapshot, FactValue, RequestContext};
use serde::Serialize;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StageRole {
    Protector,
    Target,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AssemblyStage {
    pub role: StageRole,
    pub candidate: String,
    /// Shared properties every stage of the assembly carries identically.
    pub synced: BTreeMap<String, FactValue>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AssemblyPlan {
    pub target: String,
    /// Protectors in priority order, then the target.
    pub stages: Vec<AssemblyStage>,
    pub rules: Vec<String>,
}

impl AssemblyPlan {
    pub fn candidates(&self) -> impl Iterator<Item = &str> {
        self.stages.iter().map(|stage| stage.candidate.as_str())
    }
}

pub(crate) struct Protection<'a> {
    pub protector: &'a Candidate,
    /// One neutralizing rule per demanding stressor, deduplicated.
    pub rules: Vec<&'a DependencyRule>,
}

/// Cheapest candidate able to neutralize `demand` for `target`.
///
/// Every stressor behind the demand needs an active dependency rule that
/// provides the missing trait; a stressor left uncovered keeps the target
/// exposed, so there is no protection. When a rule names a protected trait,
/// the target must carry it. The protector is the lowest selection priority
/// (then id) among other candidates carrying the trait; its own blocks are
/// not considered.
pub(crate) fn find_protector<'a>(
    demand: &Demand,
    target: &Candidate,
    resolution: &'a Resolution,
    candidates: &'a [Candidate],
) -> Option<Protection<'a>> {
    let applicable: Vec<&DependencyRule> = resolution
        .dependency_rules
        .iter()
        .filter(|rule| rule.provides_trait == demand.trait_id)
        .filter(|rule| {
            rule.protects_trait
                .as_deref()
                .map_or(true, |protected| target.has_trait(protected))
        })
        .collect();

    let mut rules: Vec<&DependencyRule> = Vec::new();
    for stressor in &demand.stressors {
        let rule = applicable
            .iter()
            .filter(|rule| &rule.stressor == stressor)
            .min_by(|a, b| a.id.cmp(&b.id))?;
        if !rules.iter().any(|r| r.id == rule.id) {
            rules.push(*rule);
        }
    }
    if rules.is_empty() {
        return None;
    }

    let protector = candidates
        .iter()
        .filter(|c| c.id != target.id && c.has_trait(&demand.trait_id))
        .min_by(|a, b| (a.selection_priority, &a.id).cmp(&(b.selection_priority, &b.id)))?;
    Some(Protection { protector, rules })
}

/// Builds a plan for every candidate whose blocks are all neutralizable and
/// marks those candidates assembled.
pub fn build(
    ctx: &RequestContext,
    snapshot: &FactSnapshot,
    profile: &EngineProfile,
    verdicts: &mut [CandidateVerdict],
) -> Vec<AssemblyPlan> {
    let synced: BTreeMap<String, FactValue> = profile
        .sync_properties()
        .iter()
        .filter_map(|key| ctx.get(key).map(|value| (key.clone(), value.clone())))
        .collect();

    let mut plans = Vec::new();
    for verdict in verdicts.iter_mut() {
        if !verdict.only_neutralization_blocks() {
            continue;
        }

        let mut protectors: Vec<(u32, String)> = Vec::new();
        let mut rules = Vec::new();
        for block in &verdict.blocks {
            if let BlockReason::Neutralization {
                protector,
                rules: neutralizing,
                ..
            } = block
            {
                let priority = snapshot
                    .candidate(protector)
                    .map_or(u32::MAX, |c| c.selection_priority);
                if !protectors.iter().any(|(_, id)| id == protector) {
                    protectors.push((priority, protector.clone()));
                }
                for rule in neutralizing {
                    if !rules.contains(rule) {
                        rules.push(rule.clone());
                    }
                }
            }
        }
        protectors.sort();

        let mut stages: Vec<AssemblyStage> = protectors
            .into_iter()
            .map(|(_, candidate)| AssemblyStage {
                role: StageRole::Protector,
                candidate,
                synced: synced.clone(),
            })
            .collect();
        stages.push(AssemblyStage {
            role: StageRole::Target,
            candidate: verdict.candidate.clone(),
            synced: synced.clone(),
        });

        log::debug!(
            "Assembly for '{}': {}",
            verdict.candidate,
            stages
                .iter()
                .map(|s| s.candidate.as_str())
                .collect::<Vec<_>>()
                .join(" -> ")
        );
        verdict.assembled = true;
        plans.push(AssemblyPlan {
            target: verdict.candidate.clone(),
            stages,
            rules,
        });
    }
    plans
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::resolve;
    use crate::veto::{self, CandidateStatus};
    use configurator_facts::{Accessory, Application, CausalRule, FactSet, Severity, Stressor};
    use pretty_assertions::assert_eq;

    fn candidate(id: &str, traits: &[&str], priority: u32) -> Candidate {
        Candidate {
            id: id.to_string(),
            traits: traits.iter().map(|t| t.to_string()).collect(),
            selection_priority: priority,
            ..Candidate::default()
        }
    }

    fn facts(protects: Option<&str>, candidates: Vec<Candidate>) -> FactSet {
        FactSet {
            applications: vec![Application {
                id: "kitchen".to_string(),
                stressors: vec!["grease".to_string()],
            }],
            stressors: vec![Stressor {
                id: "grease".to_string(),
                ..Stressor::default()
            }],
            causal_rules: vec![CausalRule {
                id: "grease-fouls".to_string(),
                stressor: "grease".to_string(),
                demanded_trait: "grease_resistance".to_string(),
                severity: Severity::Critical,
                explanation: String::new(),
            }],
            dependency_rules: vec![DependencyRule {
                id: "prefilter".to_string(),
                stressor: "grease".to_string(),
                provides_trait: "grease_resistance".to_string(),
                protects_trait: protects.map(str::to_string),
                explanation: String::new(),
            }],
            candidates,
            ..FactSet::default()
        }
    }

    fn run(ctx: &RequestContext, facts: FactSet) -> (Vec<CandidateVerdict>, Vec<AssemblyPlan>) {
        let snapshot = FactSnapshot::from_facts(facts);
        let profile = EngineProfile::default();
        let resolution = resolve(ctx, &snapshot, &profile);
        let mut verdicts = veto::evaluate(ctx, &snapshot, &resolution, &profile);
        let plans = build(ctx, &snapshot, &profile, &mut verdicts);
        (verdicts, plans)
    }

    #[test]
    fn protector_precedes_target_with_synced_properties() {
        let ctx = RequestContext::new()
            .with("application", "kitchen")
            .with("module_width", 600.0)
            .with("module_height", 600.0)
            .with("material", "galvanized");
        let (verdicts, plans) = run(
            &ctx,
            facts(
                None,
                vec![
                    candidate("carbon", &["grease_resistance", "odour_control"], 4),
                    candidate("filter", &["grease_resistance"], 1),
                    candidate("recovery", &["heat_recovery"], 5),
                ],
            ),
        );

        assert_eq!(plans.len(), 1);
        let plan = &plans[0];
        assert_eq!(plan.candidates().collect::<Vec<_>>(), vec!["filter", "recovery"]);
        assert_eq!(plan.stages[0].role, StageRole::Protector);
        assert_eq!(plan.stages[1].role, StageRole::Target);
        assert_eq!(plan.stages[0].synced, plan.stages[1].synced);
        assert_eq!(plan.stages[0].synced.len(), 2);

        let recovery = verdicts.iter().find(|v| v.candidate == "recovery").unwrap();
        assert!(recovery.assembled);
        assert_eq!(recovery.status, CandidateStatus::NeutralizationBlock);
    }

    #[test]
    fn protected_trait_must_be_carried_by_target() {
        let ctx = RequestContext::new().with("application", "kitchen");
        let (verdicts, plans) = run(
            &ctx,
            facts(
                Some("heat_exchanger"),
                vec![
                    candidate("filter", &["grease_resistance"], 1),
                    candidate("recovery", &["heat_recovery"], 5),
                ],
            ),
        );
        assert!(plans.is_empty());
        let recovery = verdicts.iter().find(|v| v.candidate == "recovery").unwrap();
        assert_eq!(recovery.status, CandidateStatus::MissingTraitBlock);
        assert!(!recovery.assembled);
    }

    #[test]
    fn candidates_with_other_blocks_are_not_assembled() {
        let ctx = RequestContext::new()
            .with("application", "kitchen")
            .with("environment", "marine");
        let mut recovery = candidate("recovery", &["heat_recovery"], 5);
        recovery.allowed_environments = vec!["indoor".to_string()];
        let (verdicts, plans) = run(
            &ctx,
            facts(None, vec![candidate("filter", &["grease_resistance"], 1), recovery]),
        );
        assert!(plans.is_empty());
        assert_eq!(verdicts[1].status, CandidateStatus::EnvironmentBlock);
    }

    /// Smoke (from the application) and steam (from the hood) both demand
    /// sealing; dependency rules exist only for the listed stressors.
    fn shared_demand_facts(rules_on: &[&str]) -> FactSet {
        let stressor = |id: &str| Stressor {
            id: id.to_string(),
            ..Stressor::default()
        };
        let demand = |id: &str| CausalRule {
            id: format!("{id}-needs-sealing"),
            stressor: id.to_string(),
            demanded_trait: "sealing".to_string(),
            severity: Severity::Critical,
            explanation: String::new(),
        };
        FactSet {
            applications: vec![Application {
                id: "grill".to_string(),
                stressors: vec!["smoke".to_string()],
            }],
            accessories: vec![Accessory {
                id: "steam_hood".to_string(),
                stressors: vec!["steam".to_string()],
            }],
            stressors: vec![stressor("smoke"), stressor("steam")],
            causal_rules: vec![demand("smoke"), demand("steam")],
            dependency_rules: rules_on
                .iter()
                .map(|id| DependencyRule {
                    id: format!("{id}-seal-stage"),
                    stressor: id.to_string(),
                    provides_trait: "sealing".to_string(),
                    protects_trait: None,
                    explanation: String::new(),
                })
                .collect(),
            candidates: vec![
                candidate("sealer", &["sealing"], 1),
                candidate("fan", &["airflow"], 2),
            ],
            ..FactSet::default()
        }
    }

    #[test]
    fn uncovered_stressor_keeps_missing_trait_when_another_is_added() {
        let base = RequestContext::new().with("application", "grill");
        let (before, _) = run(&base, shared_demand_facts(&["steam"]));
        assert_eq!(before[0].candidate, "fan");
        assert_eq!(before[0].status, CandidateStatus::MissingTraitBlock);

        let with_hood = base.with("accessories", "steam_hood");
        let (after, plans) = run(&with_hood, shared_demand_facts(&["steam"]));
        assert!(plans.is_empty());
        assert_eq!(after[0].status, CandidateStatus::MissingTraitBlock);
        assert!(!after[0].assembled);
        assert!(matches!(
            &after[0].blocks[0],
            BlockReason::MissingTrait { stressors, .. } if stressors.len() == 2
        ));
    }

    #[test]
    fn every_demanding_stressor_needs_a_rule() {
        let ctx = RequestContext::new()
            .with("application", "grill")
            .with("accessories", "steam_hood");
        let (verdicts, plans) = run(&ctx, shared_demand_facts(&["smoke", "steam"]));

        assert_eq!(verdicts[0].status, CandidateStatus::NeutralizationBlock);
        assert!(verdicts[0].assembled);
        assert_eq!(plans.len(), 1);
        assert_eq!(plans[0].candidates().collect::<Vec<_>>(), vec!["sealer", "fan"]);
        assert_eq!(
            plans[0].rules,
            vec!["smoke-seal-stage".to_string(), "steam-seal-stage".to_string()]
        );
    }
}
