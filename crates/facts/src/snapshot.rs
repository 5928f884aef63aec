use crate::bundle::FactSet;
use crate::types::{
    Accessory, Application, Candidate, CausalRule, CompletenessWarning, DependencyRule,
    Environment, Material, ParameterSpec, Stressor,
};
use serde::Serialize;
use std::collections::BTreeMap;

/// Immutable fact view handed to one engine invocation.
///
/// Keyed records live in ordered maps and rules/candidates are sorted by id,
/// so every traversal over a snapshot is deterministic.
#[derive(Debug, Clone, Default, Serialize)]
pub struct FactSnapshot {
    applications: BTreeMap<String, Application>,
    environments: BTreeMap<String, Environment>,
    accessories: BTreeMap<String, Accessory>,
    stressors: BTreeMap<String, Stressor>,
    materials: BTreeMap<String, Material>,
    parameters: BTreeMap<String, ParameterSpec>,
    causal_rules: Vec<CausalRule>,
    dependency_rules: Vec<DependencyRule>,
    candidates: Vec<Candidate>,
    warnings: Vec<CompletenessWarning>,
}

impl FactSnapshot {
    pub fn new(facts: FactSet, warnings: Vec<CompletenessWarning>) -> Self {
        let FactSet {
            applications,
            environments,
            accessories,
            stressors,
            causal_rules,
            dependency_rules,
            materials,
            candidates,
            parameters,
        } = facts;

        let mut causal_rules = causal_rules;
        causal_rules.sort_by(|a, b| a.id.cmp(&b.id));
        let mut dependency_rules = dependency_rules;
        dependency_rules.sort_by(|a, b| a.id.cmp(&b.id));
        let mut candidates = candidates;
        candidates.sort_by(|a, b| a.id.cmp(&b.id));

        Self {
            applications: keyed(applications, |a| a.id.clone()),
            environments: keyed(environments, |e| e.id.clone()),
            accessories: keyed(accessories, |a| a.id.clone()),
            stressors: keyed(stressors, |s| s.id.clone()),
            materials: keyed(materials, |m| m.code.clone()),
            parameters: keyed(parameters, |p| p.key.clone()),
            causal_rules,
            dependency_rules,
            candidates,
            warnings,
        }
    }

    /// Snapshot built straight from typed facts, without warnings.
    pub fn from_facts(facts: FactSet) -> Self {
        Self::new(facts, Vec::new())
    }

    #[must_use]
    pub fn application(&self, id: &str) -> Option<&Application> {
        self.applications.get(id)
    }

    #[must_use]
    pub fn environment(&self, id: &str) -> Option<&Environment> {
        self.environments.get(id)
    }

    #[must_use]
    pub fn accessory(&self, id: &str) -> Option<&Accessory> {
        self.accessories.get(id)
    }

    #[must_use]
    pub fn stressor(&self, id: &str) -> Option<&Stressor> {
        self.stressors.get(id)
    }

    #[must_use]
    pub fn material(&self, code: &str) -> Option<&Material> {
        self.materials.get(code)
    }

    #[must_use]
    pub fn parameter(&self, key: &str) -> Option<&ParameterSpec> {
        self.parameters.get(key)
    }

    #[must_use]
    pub fn candidate(&self, id: &str) -> Option<&Candidate> {
        self.candidates.iter().find(|c| c.id == id)
    }

    #[must_use]
    pub fn candidates(&self) -> &[Candidate] {
        &self.candidates
    }

    #[must_use]
    pub fn causal_rules(&self) -> &[CausalRule] {
        &self.causal_rules
    }

    #[must_use]
    pub fn dependency_rules(&self) -> &[DependencyRule] {
        &self.dependency_rules
    }

    pub fn parameters(&self) -> impl Iterator<Item = &ParameterSpec> {
        self.parameters.values()
    }

    #[must_use]
    pub fn warnings(&self) -> &[CompletenessWarning] {
        &self.warnings
    }

    /// Canonical parameter key for `key`, resolving declared aliases.
    #[must_use]
    pub fn canonical_parameter(&self, key: &str) -> Option<&ParameterSpec> {
        self.parameters.get(key).or_else(|| {
            self.parameters
                .values()
                .find(|spec| spec.aliases.iter().any(|alias| alias == key))
        })
    }
}

fn keyed<T>(records: Vec<T>, key: impl Fn(&T) -> String) -> BTreeMap<String, T> {
    let mut map = BTreeMap::new();
    for record in records {
        map.entry(key(&record)).or_insert(record);
    }
    map
}
