//! Clarification gate: decides which missing parameters to ask for.

use crate::profile::EngineProfile;
use crate::veto::CandidateVerdict;
use configurator_facts::{FactSnapshot, FactValue, RequestContext};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClarificationRequest {
    pub key: String,
    pub prompt: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<String>,
    /// Candidate requiring the parameter; `None` for globally required ones.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub candidate: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClarificationOutcome {
    /// Feature defaults applied because the request left them open.
    pub resolved_defaults: BTreeMap<String, FactValue>,
    pub requests: Vec<ClarificationRequest>,
}

/// Runs the gate for the `focus` candidates.
///
/// Auto-resolvable feature defaults are applied first. A parameter is then
/// asked for only when neither its key nor any alias is resolved, its owning
/// candidate is not blocked beyond recovery, and the request has not been
/// marked concluded. Profile-wide parameters are owned by the focus and are
/// skipped once no focus candidate is viable.
pub fn gate(
    ctx: &RequestContext,
    snapshot: &FactSnapshot,
    profile: &EngineProfile,
    focus: &[String],
    verdicts: &[CandidateVerdict],
) -> ClarificationOutcome {
    let mut outcome = ClarificationOutcome::default();

    for candidate in focus.iter().filter_map(|id| snapshot.candidate(id)) {
        for feature in candidate.features.iter().filter(|f| f.auto_resolve) {
            let Some(default) = feature.default.as_ref().filter(|d| !d.is_blank()) else {
                continue;
            };
            if resolved(ctx, snapshot, &feature.key)
                || outcome.resolved_defaults.contains_key(&feature.key)
            {
                continue;
            }
            outcome
                .resolved_defaults
                .insert(feature.key.clone(), default.clone());
        }
    }
    let effective = ctx.with_defaults(&outcome.resolved_defaults);

    if effective.flag(&profile.keys().concluded) {
        log::debug!("Configuration concluded, no clarification");
        return outcome;
    }

    // Global parameters belong to the focus as a whole.
    let focus_viable = focus.iter().any(|id| {
        verdicts
            .iter()
            .find(|v| &v.candidate == id)
            .map_or(true, CandidateVerdict::is_viable)
    });
    let global: &[String] = if focus_viable {
        profile.required_parameters()
    } else {
        log::debug!("No viable candidate in focus, skipping global parameters");
        &[]
    };
    let global = global.iter().map(|key| (key.as_str(), None));
    let owned = focus.iter().filter_map(|id| snapshot.candidate(id)).flat_map(|candidate| {
        candidate
            .required_parameters
            .iter()
            .map(move |key| (key.as_str(), Some(candidate.id.as_str())))
    });

    let mut seen = BTreeSet::new();
    for (key, owner) in global.chain(owned) {
        if resolved(&effective, snapshot, key) {
            continue;
        }
        if let Some(owner) = owner {
            let unrecoverable = verdicts
                .iter()
                .find(|v| v.candidate == owner)
                .is_some_and(|v| !v.is_viable());
            if unrecoverable {
                continue;
            }
        }

        let spec = snapshot.canonical_parameter(key);
        let canonical = spec.map_or(key, |s| s.key.as_str());
        if !seen.insert(canonical.to_string()) {
            continue;
        }
        let prompt = spec
            .map(|s| s.prompt.trim())
            .filter(|p| !p.is_empty())
            .map_or_else(|| format!("Please provide {canonical}."), str::to_string);
        outcome.requests.push(ClarificationRequest {
            key: canonical.to_string(),
            prompt,
            options: spec.map(|s| s.options.clone()).unwrap_or_default(),
            candidate: owner.map(str::to_string),
        });
    }

    outcome
}

/// True when `key`, its canonical key, or any declared alias is resolved.
fn resolved(ctx: &RequestContext, snapshot: &FactSnapshot, key: &str) -> bool {
    match snapshot.canonical_parameter(key) {
        Some(spec) => ctx.contains(key) || ctx.contains_any(&spec.key, &spec.aliases),
        None => ctx.contains(key),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::resolve;
    use crate::veto;
    use configurator_facts::{Candidate, FactSet, ParameterSpec, VariableFeature};
    use pretty_assertions::assert_eq;

    fn snapshot() -> FactSnapshot {
        FactSnapshot::from_facts(FactSet {
            parameters: vec![ParameterSpec {
                key: "throughput".to_string(),
                aliases: vec!["airflow".to_string()],
                prompt: "What airflow do you need?".to_string(),
                options: Vec::new(),
            }],
            candidates: vec![
                Candidate {
                    id: "cabinet".to_string(),
                    required_parameters: vec!["throughput".to_string(), "door_side".to_string()],
                    features: vec![VariableFeature {
                        key: "housing".to_string(),
                        default: Some(FactValue::text("standard")),
                        auto_resolve: true,
                    }],
                    ..Candidate::default()
                },
                Candidate {
                    id: "roof_unit".to_string(),
                    required_parameters: vec!["roof_pitch".to_string()],
                    allowed_environments: vec!["outdoor".to_string()],
                    ..Candidate::default()
                },
            ],
            ..FactSet::default()
        })
    }

    fn run(ctx: &RequestContext, focus: &[&str]) -> ClarificationOutcome {
        run_with(&EngineProfile::default(), ctx, focus)
    }

    fn run_with(
        profile: &EngineProfile,
        ctx: &RequestContext,
        focus: &[&str],
    ) -> ClarificationOutcome {
        let snapshot = snapshot();
        let resolution = resolve(ctx, &snapshot, profile);
        let verdicts = veto::evaluate(ctx, &snapshot, &resolution, profile);
        let focus: Vec<String> = focus.iter().map(|s| s.to_string()).collect();
        gate(ctx, &snapshot, profile, &focus, &verdicts)
    }

    #[test]
    fn asks_for_missing_parameters_with_declared_prompt() {
        let outcome = run(&RequestContext::new(), &["cabinet"]);
        let keys: Vec<&str> = outcome.requests.iter().map(|r| r.key.as_str()).collect();
        assert_eq!(keys, vec!["throughput", "door_side"]);
        assert_eq!(outcome.requests[0].prompt, "What airflow do you need?");
        assert_eq!(outcome.requests[1].prompt, "Please provide door_side.");
        assert_eq!(
            outcome.resolved_defaults.get("housing"),
            Some(&FactValue::text("standard"))
        );
    }

    #[test]
    fn aliases_satisfy_the_parameter() {
        let ctx = RequestContext::new().with("airflow", 3000.0);
        let outcome = run(&ctx, &["cabinet"]);
        let keys: Vec<&str> = outcome.requests.iter().map(|r| r.key.as_str()).collect();
        assert_eq!(keys, vec!["door_side"]);
    }

    #[test]
    fn blocked_owner_is_not_asked_for() {
        let ctx = RequestContext::new().with("environment", "kitchen");
        let outcome = run(&ctx, &["roof_unit"]);
        assert!(outcome.requests.is_empty());
    }

    #[test]
    fn concluded_flag_silences_the_gate() {
        let ctx = RequestContext::new().with("configuration_concluded", true);
        let outcome = run(&ctx, &["cabinet"]);
        assert!(outcome.requests.is_empty());
        assert!(outcome.resolved_defaults.contains_key("housing"));
    }

    #[test]
    fn answering_every_request_leaves_nothing_to_ask() {
        let first = run(&RequestContext::new(), &["cabinet"]);
        let answered: RequestContext = first
            .requests
            .iter()
            .map(|r| (r.key.clone(), FactValue::text("x")))
            .collect();
        assert!(run(&answered, &["cabinet"]).requests.is_empty());
    }

    #[test]
    fn explicit_values_are_not_overridden_by_defaults() {
        let ctx = RequestContext::new().with("housing", "insulated");
        assert!(run(&ctx, &["cabinet"]).resolved_defaults.is_empty());
    }

    #[test]
    fn global_parameters_wait_for_a_viable_candidate() {
        let strict = EngineProfile::builtin("strict").expect("strict profile");
        let ctx = RequestContext::new().with("environment", "kitchen");

        let blocked = run_with(&strict, &ctx, &["roof_unit"]);
        assert!(blocked.requests.is_empty());

        let open = run_with(&strict, &ctx, &["cabinet"]);
        let keys: Vec<&str> = open.requests.iter().map(|r| r.key.as_str()).collect();
        assert!(keys.contains(&"material"));
        assert!(open.requests.iter().any(|r| r.candidate.is_none()));
    }
}
