//! Candidate scoring and veto evaluation.
//!
//! Every candidate is judged against the demanded traits, the detected
//! environment lineage and the requested material. A candidate collects every
//! block that applies; its status is the highest-precedence one.

use crate::assembly::find_protector;
use crate::installation::ConstraintViolation;
use crate::profile::EngineProfile;
use crate::resolver::{Resolution, SourcedRequirement};
use configurator_facts::{
    Candidate, Comparison, FactSnapshot, FactValue, Operator, RequestContext, Severity,
};
use serde::Serialize;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CandidateStatus {
    Pass,
    Warn,
    NeutralizationBlock,
    MissingTraitBlock,
    EnvironmentBlock,
    MaterialBlock,
    InstallationBlock,
}

impl CandidateStatus {
    /// Higher wins when several blocks apply.
    #[must_use]
    pub const fn precedence(self) -> u8 {
        match self {
            Self::Pass | Self::Warn => 0,
            Self::NeutralizationBlock => 1,
            Self::MissingTraitBlock => 2,
            Self::InstallationBlock => 3,
            Self::MaterialBlock => 4,
            Self::EnvironmentBlock => 5,
        }
    }

    #[must_use]
    pub const fn is_block(self) -> bool {
        !matches!(self, Self::Pass | Self::Warn)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "issue", rename_all = "snake_case")]
pub enum MaterialIssue {
    /// The candidate's material table does not list the requested code.
    NotOffered { offered: Vec<String> },
    /// A material property fails a requirement.
    RequirementFailed {
        property: String,
        operator: Operator,
        required: FactValue,
        actual: FactValue,
        source: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BlockReason {
    /// Missing trait that an upstream protector can supply.
    Neutralization {
        missing_trait: String,
        stressors: Vec<String>,
        protector: String,
        rules: Vec<String>,
    },
    MissingTrait {
        missing_trait: String,
        stressors: Vec<String>,
    },
    Environment {
        environment: String,
        allowed: Vec<String>,
    },
    Material {
        material: String,
        issue: MaterialIssue,
    },
    Installation {
        constraint: String,
        message: String,
    },
}

impl BlockReason {
    #[must_use]
    pub const fn status(&self) -> CandidateStatus {
        match self {
            Self::Neutralization { .. } => CandidateStatus::NeutralizationBlock,
            Self::MissingTrait { .. } => CandidateStatus::MissingTraitBlock,
            Self::Environment { .. } => CandidateStatus::EnvironmentBlock,
            Self::Material { .. } => CandidateStatus::MaterialBlock,
            Self::Installation { .. } => CandidateStatus::InstallationBlock,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AdvisorySource {
    Trait,
    Material,
    Installation,
    Sizing,
}

/// Non-blocking finding attached to a candidate (or to the request).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Advisory {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub candidate: Option<String>,
    pub source: AdvisorySource,
    pub severity: Severity,
    pub message: String,
}

impl Advisory {
    pub fn new(
        candidate: Option<&str>,
        source: AdvisorySource,
        severity: Severity,
        message: impl Into<String>,
    ) -> Self {
        Self {
            candidate: candidate.map(str::to_string),
            source,
            severity,
            message: message.into(),
        }
    }
}

/// Per-candidate outcome threaded through the remaining stages.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CandidateVerdict {
    pub candidate: String,
    pub name: String,
    pub status: CandidateStatus,
    pub blocks: Vec<BlockReason>,
    pub violations: Vec<ConstraintViolation>,
    pub advisories: Vec<Advisory>,
    pub satisfied_traits: Vec<String>,
    pub missing_traits: Vec<String>,
    pub score: f64,
    pub hinted: bool,
    pub assembled: bool,
    pub selection_priority: u32,
}

impl CandidateVerdict {
    fn new(candidate: &Candidate, hinted: bool) -> Self {
        Self {
            candidate: candidate.id.clone(),
            name: candidate.display_name().to_string(),
            status: CandidateStatus::Pass,
            blocks: Vec::new(),
            violations: Vec::new(),
            advisories: Vec::new(),
            satisfied_traits: Vec::new(),
            missing_traits: Vec::new(),
            score: 0.0,
            hinted,
            assembled: false,
            selection_priority: candidate.selection_priority,
        }
    }

    /// Recomputes `status` from the collected blocks and advisories.
    pub fn refresh_status(&mut self) {
        self.status = self
            .blocks
            .iter()
            .map(BlockReason::status)
            .max_by_key(|status| status.precedence())
            .unwrap_or_else(|| {
                if self
                    .advisories
                    .iter()
                    .any(|a| a.severity == Severity::Warning)
                {
                    CandidateStatus::Warn
                } else {
                    CandidateStatus::Pass
                }
            });
    }

    #[must_use]
    pub fn is_blocked(&self) -> bool {
        self.status.is_block()
    }

    /// Passes, warns, or is recovered by an assembly.
    #[must_use]
    pub fn is_viable(&self) -> bool {
        !self.is_blocked() || self.assembled
    }

    /// True when every block can be lifted by an upstream protector.
    #[must_use]
    pub fn only_neutralization_blocks(&self) -> bool {
        !self.blocks.is_empty()
            && self
                .blocks
                .iter()
                .all(|b| b.status() == CandidateStatus::NeutralizationBlock)
    }

    pub(crate) fn block(&mut self, reason: BlockReason) {
        self.blocks.push(reason);
    }

    pub(crate) fn advise(&mut self, source: AdvisorySource, severity: Severity, message: String) {
        let advisory = Advisory::new(Some(&self.candidate), source, severity, message);
        self.advisories.push(advisory);
    }
}

/// Scores and vetoes every candidate of the snapshot, in snapshot order.
pub fn evaluate(
    ctx: &RequestContext,
    snapshot: &FactSnapshot,
    resolution: &Resolution,
    profile: &EngineProfile,
) -> Vec<CandidateVerdict> {
    let keys = profile.keys();
    let hints = ctx.members(&keys.product_hint);
    let material = ctx.text(&keys.material);
    let candidates = snapshot.candidates();

    candidates
        .iter()
        .map(|candidate| {
            let hinted = hints.iter().any(|hint| candidate.matches_hint(hint));
            let mut verdict = CandidateVerdict::new(candidate, hinted);

            judge_traits(candidate, resolution, candidates, &mut verdict);
            judge_environment(candidate, resolution, &mut verdict);
            if let Some(code) = material.as_deref() {
                judge_material(candidate, code, snapshot, resolution, &mut verdict);
            }

            verdict.refresh_status();
            log::debug!(
                "Candidate '{}': {:?}, score {:.2}, {} block(s)",
                verdict.candidate,
                verdict.status,
                verdict.score,
                verdict.blocks.len()
            );
            verdict
        })
        .collect()
}

fn judge_traits(
    candidate: &Candidate,
    resolution: &Resolution,
    candidates: &[Candidate],
    verdict: &mut CandidateVerdict,
) {
    for demand in resolution.demands.values() {
        if candidate.has_trait(&demand.trait_id) {
            verdict.satisfied_traits.push(demand.trait_id.clone());
            verdict.score += demand.severity.weight() * demand.weight;
            continue;
        }

        verdict.missing_traits.push(demand.trait_id.clone());
        match demand.severity {
            Severity::Critical => {
                match find_protector(demand, candidate, resolution, candidates) {
                    Some(protection) => verdict.block(BlockReason::Neutralization {
                        missing_trait: demand.trait_id.clone(),
                        stressors: demand.stressors.clone(),
                        protector: protection.protector.id.clone(),
                        rules: protection.rules.iter().map(|r| r.id.clone()).collect(),
                    }),
                    None => verdict.block(BlockReason::MissingTrait {
                        missing_trait: demand.trait_id.clone(),
                        stressors: demand.stressors.clone(),
                    }),
                }
            }
            severity => verdict.advise(
                AdvisorySource::Trait,
                severity,
                missing_trait_message(&demand.trait_id, &demand.stressors, &demand.explanation),
            ),
        }
    }
}

fn missing_trait_message(trait_id: &str, stressors: &[String], explanation: &str) -> String {
    let mut message = format!(
        "lacks '{trait_id}' demanded by {}",
        stressors.join(", ")
    );
    if !explanation.trim().is_empty() {
        message.push_str(": ");
        message.push_str(explanation.trim());
    }
    message
}

fn judge_environment(candidate: &Candidate, resolution: &Resolution, verdict: &mut CandidateVerdict) {
    if resolution.environment_admitted_by(&candidate.allowed_environments) {
        return;
    }
    verdict.block(BlockReason::Environment {
        environment: resolution.environment.clone().unwrap_or_default(),
        allowed: candidate.allowed_environments.clone(),
    });
}

fn judge_material(
    candidate: &Candidate,
    code: &str,
    snapshot: &FactSnapshot,
    resolution: &Resolution,
    verdict: &mut CandidateVerdict,
) {
    let option = candidate.material(code);
    if candidate.restricts_materials() && option.is_none() {
        verdict.block(BlockReason::Material {
            material: code.to_string(),
            issue: MaterialIssue::NotOffered {
                offered: candidate.materials.iter().map(|m| m.code.clone()).collect(),
            },
        });
        return;
    }

    let own: Vec<SourcedRequirement> = candidate
        .material_requirements
        .iter()
        .map(|requirement| SourcedRequirement {
            source: format!("candidate:{}", candidate.id),
            requirement: requirement.clone(),
        })
        .collect();
    let requirements: Vec<&SourcedRequirement> =
        resolution.material_requirements.iter().chain(own.iter()).collect();
    if requirements.is_empty() {
        return;
    }

    let record = snapshot.material(code);
    if record.is_none() && option.is_none() {
        verdict.advise(
            AdvisorySource::Material,
            Severity::Warning,
            format!("cannot determine suitability of unknown material '{code}'"),
        );
        return;
    }

    let mut properties: BTreeMap<&str, &FactValue> = BTreeMap::new();
    for (key, value) in record.into_iter().flat_map(|m| m.properties.iter()) {
        properties.insert(key.as_str(), value);
    }
    for (key, value) in option.into_iter().flat_map(|m| m.properties.iter()) {
        properties.insert(key.as_str(), value);
    }

    for sourced in requirements {
        let requirement = &sourced.requirement;
        let Some(actual) = properties.get(requirement.property.as_str()) else {
            verdict.advise(
                AdvisorySource::Material,
                Severity::Warning,
                format!(
                    "cannot determine '{}' of material '{code}' required by {}",
                    requirement.property, sourced.source
                ),
            );
            continue;
        };
        match requirement.operator.compare(actual, &requirement.value) {
            Comparison::Holds => {}
            Comparison::Fails => verdict.block(BlockReason::Material {
                material: code.to_string(),
                issue: MaterialIssue::RequirementFailed {
                    property: requirement.property.clone(),
                    operator: requirement.operator,
                    required: requirement.value.clone(),
                    actual: (*actual).clone(),
                    source: sourced.source.clone(),
                },
            }),
            Comparison::Undetermined(reason) => verdict.advise(
                AdvisorySource::Material,
                Severity::Warning,
                format!(
                    "cannot determine '{}' of material '{code}': {reason}",
                    requirement.property
                ),
            ),
        }
    }
}

/// Materials of `candidate` that satisfy every sourced requirement.
pub(crate) fn compatible_materials(
    candidate: &Candidate,
    snapshot: &FactSnapshot,
    resolution: &Resolution,
) -> Vec<String> {
    candidate
        .materials
        .iter()
        .filter(|option| {
            let global = snapshot.material(&option.code);
            resolution
                .material_requirements
                .iter()
                .map(|s| &s.requirement)
                .chain(candidate.material_requirements.iter())
                .all(|requirement| {
                    let actual = option
                        .properties
                        .get(&requirement.property)
                        .or_else(|| global.and_then(|m| m.properties.get(&requirement.property)));
                    actual.is_some_and(|actual| {
                        requirement.operator.compare(actual, &requirement.value) == Comparison::Holds
                    })
                })
        })
        .map(|option| option.code.clone())
        .collect()
}
