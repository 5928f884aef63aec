use crate::profile::EngineProfile;
use configurator_facts::{
    CausalRule, CompletenessWarning, DependencyRule, FactSnapshot, PropertyRequirement,
    RequestContext, Severity,
};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

/// What exposed a stressor.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum StressorSource {
    Application(String),
    Environment(String),
    Accessory(String),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActiveStressor {
    pub id: String,
    pub category: String,
    pub severity_weight: f64,
    pub sources: Vec<StressorSource>,
}

/// A trait demanded by one or more active causal rules.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Demand {
    pub trait_id: String,
    /// Most severe severity across the demanding rules.
    pub severity: Severity,
    pub rules: Vec<String>,
    pub stressors: Vec<String>,
    /// Highest severity weight among the demanding stressors.
    pub weight: f64,
    pub explanation: String,
}

/// Material requirement together with the fact that imposed it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourcedRequirement {
    pub source: String,
    pub requirement: PropertyRequirement,
}

/// Output of the stressor & rule resolver.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Resolution {
    pub application: Option<String>,
    pub environment: Option<String>,
    /// Detected environment followed by its ancestors.
    pub environment_lineage: Vec<String>,
    pub stressors: BTreeMap<String, ActiveStressor>,
    pub causal_rules: Vec<CausalRule>,
    pub dependency_rules: Vec<DependencyRule>,
    pub demands: BTreeMap<String, Demand>,
    pub material_requirements: Vec<SourcedRequirement>,
    pub warnings: Vec<CompletenessWarning>,
}

impl Resolution {
    #[must_use]
    pub fn is_active(&self, stressor: &str) -> bool {
        self.stressors.contains_key(stressor)
    }

    /// True when the detected environment (or one of its ancestors) is listed.
    #[must_use]
    pub fn environment_admitted_by(&self, allowed: &[String]) -> bool {
        allowed.is_empty()
            || self.environment.is_none()
            || self
                .environment_lineage
                .iter()
                .any(|env| allowed.iter().any(|a| a == env))
    }
}

/// Maps the request's application, environment and accessories to active
/// stressors, then joins the causal and dependency rules on them.
pub fn resolve(ctx: &RequestContext, snapshot: &FactSnapshot, profile: &EngineProfile) -> Resolution {
    let keys = profile.keys();
    let mut resolution = Resolution {
        application: ctx.text(&keys.application),
        environment: ctx.text(&keys.environment),
        ..Resolution::default()
    };
    let mut exposures: BTreeMap<String, BTreeSet<StressorSource>> = BTreeMap::new();

    if let Some(app_id) = &resolution.application {
        match snapshot.application(app_id) {
            Some(app) => {
                for s in &app.stressors {
                    exposures
                        .entry(s.clone())
                        .or_default()
                        .insert(StressorSource::Application(app.id.clone()));
                }
            }
            None => resolution.warnings.push(CompletenessWarning::new(
                format!("request ({})", keys.application),
                format!("unknown application '{app_id}'"),
            )),
        }
    }

    if let Some(env_id) = resolution.environment.clone() {
        if snapshot.environment(&env_id).is_none() {
            resolution.warnings.push(CompletenessWarning::new(
                format!("request ({})", keys.environment),
                format!("unknown environment '{env_id}'"),
            ));
            resolution.environment_lineage.push(env_id);
        } else {
            walk_environment(&env_id, snapshot, profile, &mut resolution, &mut exposures);
        }
    }

    for accessory_id in ctx.members(&keys.accessories) {
        match snapshot.accessory(&accessory_id) {
            Some(accessory) => {
                for s in &accessory.stressors {
                    exposures
                        .entry(s.clone())
                        .or_default()
                        .insert(StressorSource::Accessory(accessory.id.clone()));
                }
            }
            None => resolution.warnings.push(CompletenessWarning::new(
                format!("request ({})", keys.accessories),
                format!("unknown accessory '{accessory_id}'"),
            )),
        }
    }

    for (stressor_id, sources) in exposures {
        let Some(stressor) = snapshot.stressor(&stressor_id) else {
            resolution.warnings.push(CompletenessWarning::new(
                format!("stressors ({stressor_id})"),
                "exposed but not defined",
            ));
            continue;
        };
        for requirement in &stressor.material_requirements {
            resolution.material_requirements.push(SourcedRequirement {
                source: format!("stressor:{}", stressor.id),
                requirement: requirement.clone(),
            });
        }
        resolution.stressors.insert(
            stressor_id,
            ActiveStressor {
                id: stressor.id.clone(),
                category: stressor.category.clone(),
                severity_weight: stressor.severity_weight,
                sources: sources.into_iter().collect(),
            },
        );
    }

    resolution.causal_rules = snapshot
        .causal_rules()
        .iter()
        .filter(|rule| resolution.is_active(&rule.stressor))
        .cloned()
        .collect();
    resolution.dependency_rules = snapshot
        .dependency_rules()
        .iter()
        .filter(|rule| resolution.is_active(&rule.stressor))
        .cloned()
        .collect();
    resolution.demands = collect_demands(&resolution);

    log::debug!(
        "Resolved {} stressors, {} causal rules, {} demanded traits",
        resolution.stressors.len(),
        resolution.causal_rules.len(),
        resolution.demands.len()
    );

    resolution
}

fn walk_environment(
    env_id: &str,
    snapshot: &FactSnapshot,
    profile: &EngineProfile,
    resolution: &mut Resolution,
    exposures: &mut BTreeMap<String, BTreeSet<StressorSource>>,
) {
    let mut visited = BTreeSet::new();
    let mut current = Some(env_id.to_string());
    let mut depth = 0;

    while let Some(id) = current.take() {
        if depth > profile.max_environment_depth() || !visited.insert(id.clone()) {
            break;
        }
        let Some(env) = snapshot.environment(&id) else {
            if depth > 0 {
                log::debug!("Environment lineage of '{env_id}' stops at missing '{id}'");
            }
            break;
        };

        resolution.environment_lineage.push(env.id.clone());
        for s in &env.stressors {
            exposures
                .entry(s.clone())
                .or_default()
                .insert(StressorSource::Environment(env.id.clone()));
        }
        for requirement in &env.material_requirements {
            resolution.material_requirements.push(SourcedRequirement {
                source: format!("environment:{}", env.id),
                requirement: requirement.clone(),
            });
        }

        current = env.parent.clone();
        depth += 1;
    }
}

fn collect_demands(resolution: &Resolution) -> BTreeMap<String, Demand> {
    let mut demands: BTreeMap<String, Demand> = BTreeMap::new();

    for rule in &resolution.causal_rules {
        let weight = resolution
            .stressors
            .get(&rule.stressor)
            .map_or(1.0, |s| s.severity_weight);
        let demand = demands
            .entry(rule.demanded_trait.clone())
            .or_insert_with(|| Demand {
                trait_id: rule.demanded_trait.clone(),
                severity: rule.severity,
                rules: Vec::new(),
                stressors: Vec::new(),
                weight,
                explanation: rule.explanation.clone(),
            });
        if rule.severity < demand.severity {
            demand.severity = rule.severity;
            if !rule.explanation.is_empty() {
                demand.explanation = rule.explanation.clone();
            }
        }
        demand.weight = demand.weight.max(weight);
        demand.rules.push(rule.id.clone());
        if !demand.stressors.contains(&rule.stressor) {
            demand.stressors.push(rule.stressor.clone());
        }
    }

    demands
}

#[cfg(test)]
mod tests {
    use super::*;
    use configurator_facts::{
        Accessory, Application, Environment, FactSet, Operator, Stressor,
    };

    fn rule(id: &str, stressor: &str, demanded: &str, severity: Severity) -> CausalRule {
        CausalRule {
            id: id.to_string(),
            stressor: stressor.to_string(),
            demanded_trait: demanded.to_string(),
            severity,
            explanation: String::new(),
        }
    }

    fn stressor(id: &str, weight: f64) -> Stressor {
        Stressor {
            id: id.to_string(),
            severity_weight: weight,
            ..Stressor::default()
        }
    }

    fn snapshot() -> FactSnapshot {
        FactSnapshot::from_facts(FactSet {
            applications: vec![Application {
                id: "kitchen".to_string(),
                stressors: vec!["grease".to_string()],
            }],
            environments: vec![
                Environment {
                    id: "hospital".to_string(),
                    parent: Some("healthcare".to_string()),
                    stressors: vec!["disinfectant".to_string()],
                    ..Environment::default()
                },
                Environment {
                    id: "healthcare".to_string(),
                    stressors: vec!["humidity".to_string()],
                    material_requirements: vec![PropertyRequirement {
                        property: "corrosion_class".to_string(),
                        operator: Operator::Ge,
                        value: 3.0.into(),
                    }],
                    ..Environment::default()
                },
            ],
            accessories: vec![Accessory {
                id: "rain_hood".to_string(),
                stressors: vec!["rain".to_string()],
            }],
            stressors: vec![
                stressor("grease", 2.0),
                stressor("disinfectant", 1.0),
                stressor("humidity", 1.5),
                stressor("rain", 1.0),
            ],
            causal_rules: vec![
                rule("r-grease", "grease", "grease_resistance", Severity::Critical),
                rule("r-humid", "humidity", "corrosion_resistance", Severity::Warning),
                rule("r-disinfect", "disinfectant", "corrosion_resistance", Severity::Critical),
                rule("r-rain", "rain", "weatherproof", Severity::Info),
            ],
            ..FactSet::default()
        })
    }

    #[test]
    fn child_environment_inherits_ancestor_stressors() {
        let ctx = RequestContext::new().with("environment", "hospital");
        let resolution = resolve(&ctx, &snapshot(), &EngineProfile::default());

        assert_eq!(resolution.environment_lineage, vec!["hospital", "healthcare"]);
        assert!(resolution.is_active("disinfectant"));
        assert!(resolution.is_active("humidity"));
        assert_eq!(resolution.material_requirements.len(), 1);
        assert_eq!(resolution.material_requirements[0].source, "environment:healthcare");
    }

    #[test]
    fn demands_keep_the_most_severe_rule() {
        let ctx = RequestContext::new().with("environment", "hospital");
        let resolution = resolve(&ctx, &snapshot(), &EngineProfile::default());
        let demand = &resolution.demands["corrosion_resistance"];
        assert_eq!(demand.severity, Severity::Critical);
        assert_eq!(demand.rules.len(), 2);
        assert!((demand.weight - 1.5).abs() < 1e-9);
    }

    #[test]
    fn no_detected_context_means_no_rules() {
        let resolution = resolve(&RequestContext::new(), &snapshot(), &EngineProfile::default());
        assert!(resolution.stressors.is_empty());
        assert!(resolution.causal_rules.is_empty());
        assert!(resolution.demands.is_empty());
    }

    #[test]
    fn accessories_expose_stressors_and_unknown_ids_warn() {
        let ctx = RequestContext::new()
            .with("application", "kitchen")
            .with("accessories", "rain_hood, heater");
        let resolution = resolve(&ctx, &snapshot(), &EngineProfile::default());
        assert!(resolution.is_active("grease"));
        assert!(resolution.is_active("rain"));
        assert_eq!(resolution.warnings.len(), 1);
        assert!(resolution.warnings[0].reason.contains("heater"));
    }

    #[test]
    fn lineage_depth_is_bounded() {
        let ctx = RequestContext::new().with("environment", "hospital");
        let profile = EngineProfile::from_bytes("shallow", br#"{"resolver": {"max_environment_depth": 1}}"#)
            .unwrap();
        let resolution = resolve(&ctx, &snapshot(), &profile);
        assert_eq!(resolution.environment_lineage.len(), 2);

        let mut facts = FactSet::default();
        facts.environments = vec![
            Environment {
                id: "a".to_string(),
                parent: Some("b".to_string()),
                ..Environment::default()
            },
            Environment {
                id: "b".to_string(),
                parent: Some("a".to_string()),
                ..Environment::default()
            },
        ];
        let cyclic = FactSnapshot::from_facts(facts);
        let ctx = RequestContext::new().with("environment", "a");
        let resolution = resolve(&ctx, &cyclic, &EngineProfile::default());
        assert_eq!(resolution.environment_lineage, vec!["a", "b"]);
    }
}
