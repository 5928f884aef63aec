//! Installation constraint evaluation.

use crate::profile::EngineProfile;
use crate::resolver::Resolution;
use crate::template::render;
use crate::veto::{AdvisorySource, BlockReason, CandidateVerdict};
use configurator_facts::{
    Candidate, Comparison, ConstraintKind, FactSnapshot, FactValue, InstallationConstraint,
    Operator, Relation, RequestContext, Severity, ValueSource,
};
use serde::Serialize;
use std::collections::BTreeMap;

const NUMERIC_EPSILON: f64 = 1e-9;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationOutcome {
    Failed,
    /// Inputs exist but could not be interpreted.
    Undetermined,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConstraintViolation {
    pub constraint: String,
    pub severity: Severity,
    pub outcome: ViolationOutcome,
    pub message: String,
}

enum Check {
    NotApplicable(String),
    Holds,
    Fails(Placeholders),
    Undetermined(String),
}

type Placeholders = BTreeMap<&'static str, String>;

/// Evaluates every constraint of every candidate and folds the outcome into
/// the matching verdict. `verdicts` must be in snapshot candidate order.
pub fn evaluate(
    ctx: &RequestContext,
    snapshot: &FactSnapshot,
    resolution: &Resolution,
    profile: &EngineProfile,
    verdicts: &mut [CandidateVerdict],
) {
    for (candidate, verdict) in snapshot.candidates().iter().zip(verdicts.iter_mut()) {
        debug_assert_eq!(candidate.id, verdict.candidate);
        for constraint in &candidate.constraints {
            match check(constraint, candidate, ctx, snapshot, resolution, profile) {
                Check::Holds => {}
                Check::NotApplicable(reason) => log::debug!(
                    "Constraint '{}' of '{}' not applicable: {reason}",
                    constraint.id,
                    candidate.id
                ),
                Check::Fails(values) => {
                    let message = failure_message(constraint, &values);
                    record_failure(constraint, message, verdict);
                }
                Check::Undetermined(reason) => {
                    let message = format!(
                        "cannot determine constraint '{}': {reason}",
                        constraint.id
                    );
                    verdict.violations.push(ConstraintViolation {
                        constraint: constraint.id.clone(),
                        severity: Severity::Warning,
                        outcome: ViolationOutcome::Undetermined,
                        message: message.clone(),
                    });
                    verdict.advise(AdvisorySource::Installation, Severity::Warning, message);
                }
            }
        }
        verdict.refresh_status();
    }
}

fn record_failure(constraint: &InstallationConstraint, message: String, verdict: &mut CandidateVerdict) {
    verdict.violations.push(ConstraintViolation {
        constraint: constraint.id.clone(),
        severity: constraint.severity,
        outcome: ViolationOutcome::Failed,
        message: message.clone(),
    });
    match constraint.severity {
        Severity::Critical => verdict.block(BlockReason::Installation {
            constraint: constraint.id.clone(),
            message,
        }),
        severity => verdict.advise(AdvisorySource::Installation, severity, message),
    }
}

fn failure_message(constraint: &InstallationConstraint, values: &Placeholders) -> String {
    let template = if constraint.message.trim().is_empty() {
        match constraint.kind {
            ConstraintKind::ComputedFormula { .. } => {
                "{candidate} requires {required} but only {available} is available"
            }
            ConstraintKind::SetMembership { .. } => "{key} = {value} is not one of {threshold}",
            ConstraintKind::CrossNodeThreshold { .. } => {
                "{property} of {key} is {value}, expected {operator} {threshold}"
            }
        }
    } else {
        constraint.message.as_str()
    };
    render(template, values)
}

fn check(
    constraint: &InstallationConstraint,
    candidate: &Candidate,
    ctx: &RequestContext,
    snapshot: &FactSnapshot,
    resolution: &Resolution,
    profile: &EngineProfile,
) -> Check {
    let mut values = Placeholders::new();
    values.insert("candidate", candidate.display_name().to_string());

    match &constraint.kind {
        ConstraintKind::ComputedFormula {
            factor,
            dimension,
            available,
            margin,
        } => {
            let Some(factor_value) = candidate.properties.get(factor) else {
                return Check::NotApplicable(format!("candidate has no '{factor}'"));
            };
            let Some(dimension_value) = source_value(dimension, candidate, ctx) else {
                return Check::NotApplicable(format!("{} is absent", describe(dimension)));
            };
            let Some(available_value) = source_value(available, candidate, ctx) else {
                return Check::NotApplicable(format!("{} is absent", describe(available)));
            };

            let (Some(f), Some(d), Some(a)) = (
                factor_value.to_number(),
                dimension_value.to_number(),
                available_value.to_number(),
            ) else {
                return Check::Undetermined(format!(
                    "non-numeric input ({factor} = {factor_value}, {} = {dimension_value}, {} = {available_value})",
                    describe(dimension),
                    describe(available)
                ));
            };

            let required = f * d + margin;
            if required <= a + NUMERIC_EPSILON {
                return Check::Holds;
            }
            values.insert("required", FactValue::Number(required).to_string());
            values.insert("available", FactValue::Number(a).to_string());
            values.insert("value", dimension_value.to_string());
            values.insert("property", factor.clone());
            Check::Fails(values)
        }
        ConstraintKind::SetMembership { key, allowed } => {
            let Some(value) = ctx.get(key) else {
                return Check::NotApplicable(format!("'{key}' is absent"));
            };
            let allowed = FactValue::List(allowed.clone());
            match Operator::In.compare(value, &allowed) {
                Comparison::Fails => {
                    values.insert("key", key.clone());
                    values.insert("value", value.to_string());
                    values.insert("threshold", allowed.to_string());
                    Check::Fails(values)
                }
                Comparison::Undetermined(reason) => Check::Undetermined(reason),
                Comparison::Holds => Check::Holds,
            }
        }
        ConstraintKind::CrossNodeThreshold {
            relation,
            property,
            operator,
            threshold,
        } => {
            let (record, actual) = match related_property(
                *relation, property, candidate, ctx, snapshot, resolution, profile,
            ) {
                Ok(related) => related,
                Err(check) => return check,
            };
            match operator.compare(&actual, threshold) {
                Comparison::Holds => Check::Holds,
                Comparison::Fails => {
                    values.insert("key", record);
                    values.insert("property", property.clone());
                    values.insert("value", actual.to_string());
                    values.insert("operator", operator.symbol().to_string());
                    values.insert("threshold", threshold.to_string());
                    Check::Fails(values)
                }
                Comparison::Undetermined(reason) => Check::Undetermined(reason),
            }
        }
    }
}

/// Looks up `property` on the record `relation` points at, returning the
/// record id and the value.
fn related_property(
    relation: Relation,
    property: &str,
    candidate: &Candidate,
    ctx: &RequestContext,
    snapshot: &FactSnapshot,
    resolution: &Resolution,
    profile: &EngineProfile,
) -> Result<(String, FactValue), Check> {
    match relation {
        Relation::Material => {
            let Some(code) = ctx.text(&profile.keys().material) else {
                return Err(Check::NotApplicable("no material requested".to_string()));
            };
            let option = candidate.material(&code);
            let record = snapshot.material(&code);
            if option.is_none() && record.is_none() {
                return Err(Check::Undetermined(format!("unknown material '{code}'")));
            }
            option
                .and_then(|o| o.properties.get(property))
                .or_else(|| record.and_then(|m| m.properties.get(property)))
                .map(|value| (code.clone(), value.clone()))
                .ok_or_else(|| {
                    Check::Undetermined(format!("material '{code}' has no '{property}'"))
                })
        }
        Relation::Environment => {
            let Some(env) = resolution.environment.as_deref() else {
                return Err(Check::NotApplicable("no environment detected".to_string()));
            };
            if snapshot.environment(env).is_none() {
                return Err(Check::Undetermined(format!("unknown environment '{env}'")));
            }
            resolution
                .environment_lineage
                .iter()
                .filter_map(|id| snapshot.environment(id))
                .find_map(|e| e.properties.get(property))
                .map(|value| (env.to_string(), value.clone()))
                .ok_or_else(|| {
                    Check::Undetermined(format!("environment '{env}' has no '{property}'"))
                })
        }
    }
}

fn source_value<'a>(
    source: &ValueSource,
    candidate: &'a Candidate,
    ctx: &'a RequestContext,
) -> Option<&'a FactValue> {
    match source {
        ValueSource::Context(key) => ctx.get(key),
        ValueSource::Candidate(property) => candidate
            .properties
            .get(property)
            .filter(|value| !value.is_blank()),
    }
}

fn describe(source: &ValueSource) -> String {
    match source {
        ValueSource::Context(key) => format!("request '{key}'"),
        ValueSource::Candidate(property) => format!("candidate '{property}'"),
    }
}
