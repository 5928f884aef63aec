use crate::bundle::{FactSet, ValidatedFacts};
use crate::types::{
    Accessory, Application, Candidate, CausalRule, CompletenessWarning, DependencyRule,
    Environment, Material, ParameterSpec, Stressor,
};
use petgraph::algo::tarjan_scc;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::graphmap::DiGraphMap;
use petgraph::visit::EdgeRef;
use petgraph::Direction;
use std::collections::{BTreeSet, HashMap};

/// Kind of a node in the knowledge graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum NodeKind {
    Application,
    Environment,
    Accessory,
    Stressor,
    Trait,
    Candidate,
    Material,
    Parameter,
}

/// Node payload.
#[derive(Debug, Clone)]
pub enum FactNode {
    Application(Application),
    Environment(Environment),
    Accessory(Accessory),
    Stressor(Stressor),
    Trait(String),
    Candidate(Candidate),
    Material(Material),
    Parameter(ParameterSpec),
}

impl FactNode {
    #[must_use]
    pub const fn kind(&self) -> NodeKind {
        match self {
            Self::Application(_) => NodeKind::Application,
            Self::Environment(_) => NodeKind::Environment,
            Self::Accessory(_) => NodeKind::Accessory,
            Self::Stressor(_) => NodeKind::Stressor,
            Self::Trait(_) => NodeKind::Trait,
            Self::Candidate(_) => NodeKind::Candidate,
            Self::Material(_) => NodeKind::Material,
            Self::Parameter(_) => NodeKind::Parameter,
        }
    }

    #[must_use]
    pub fn id(&self) -> &str {
        match self {
            Self::Application(a) => &a.id,
            Self::Environment(e) => &e.id,
            Self::Accessory(a) => &a.id,
            Self::Stressor(s) => &s.id,
            Self::Trait(t) => t,
            Self::Candidate(c) => &c.id,
            Self::Material(m) => &m.code,
            Self::Parameter(p) => &p.key,
        }
    }
}

/// Relationship between facts.
#[derive(Debug, Clone)]
pub enum FactEdge {
    /// Application / environment / accessory exposes a stressor.
    Exposes,
    /// Environment inherits from its parent.
    ChildOf,
    /// Stressor demands a trait.
    Demands(CausalRule),
    /// Stressor can be neutralized upstream by a stage carrying the trait.
    Neutralizes(DependencyRule),
    /// Candidate carries a trait.
    Carries,
}

/// Knowledge base of typed facts stored as a directed graph.
pub struct KnowledgeGraph {
    graph: DiGraph<FactNode, FactEdge>,
    index: HashMap<(NodeKind, String), NodeIndex>,
    warnings: Vec<CompletenessWarning>,
}

impl KnowledgeGraph {
    /// Builds the graph; dangling references and environment cycles become
    /// completeness warnings and the offending edges are left out.
    #[must_use]
    pub fn build(validated: ValidatedFacts) -> Self {
        let ValidatedFacts { facts, warnings } = validated;
        let mut kg = Self {
            graph: DiGraph::new(),
            index: HashMap::new(),
            warnings,
        };

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

        for stressor in stressors {
            kg.add_node(FactNode::Stressor(stressor));
        }
        for material in materials {
            kg.add_node(FactNode::Material(material));
        }
        for parameter in parameters {
            kg.add_node(FactNode::Parameter(parameter));
        }

        for application in applications {
            let exposed = application.stressors.clone();
            let label = format!("applications ({})", application.id);
            let idx = kg.add_node(FactNode::Application(application));
            kg.link_exposures(idx, &label, &exposed);
        }
        for accessory in accessories {
            let exposed = accessory.stressors.clone();
            let label = format!("accessories ({})", accessory.id);
            let idx = kg.add_node(FactNode::Accessory(accessory));
            kg.link_exposures(idx, &label, &exposed);
        }

        let mut parents = Vec::new();
        for environment in environments {
            let exposed = environment.stressors.clone();
            let label = format!("environments ({})", environment.id);
            if let Some(parent) = &environment.parent {
                parents.push((environment.id.clone(), parent.clone()));
            }
            let idx = kg.add_node(FactNode::Environment(environment));
            kg.link_exposures(idx, &label, &exposed);
        }
        kg.link_environment_parents(&parents);

        for rule in causal_rules {
            let label = format!("causal_rules ({})", rule.id);
            let Some(stressor) = kg.find(NodeKind::Stressor, &rule.stressor) else {
                kg.warn(label, format!("unknown stressor '{}', rule skipped", rule.stressor));
                continue;
            };
            let target = kg.trait_node(&rule.demanded_trait);
            kg.graph.add_edge(stressor, target, FactEdge::Demands(rule));
        }
        for rule in dependency_rules {
            let label = format!("dependency_rules ({})", rule.id);
            let Some(stressor) = kg.find(NodeKind::Stressor, &rule.stressor) else {
                kg.warn(label, format!("unknown stressor '{}', rule skipped", rule.stressor));
                continue;
            };
            let target = kg.trait_node(&rule.provides_trait);
            kg.graph.add_edge(stressor, target, FactEdge::Neutralizes(rule));
        }

        for candidate in candidates {
            let traits = candidate.traits.clone();
            let idx = kg.add_node(FactNode::Candidate(candidate));
            for t in traits {
                let target = kg.trait_node(&t);
                kg.graph.add_edge(idx, target, FactEdge::Carries);
            }
        }

        log::info!(
            "Built knowledge graph: {} nodes, {} edges, {} completeness warnings",
            kg.node_count(),
            kg.edge_count(),
            kg.warnings.len()
        );

        kg
    }

    fn add_node(&mut self, node: FactNode) -> NodeIndex {
        let key = (node.kind(), node.id().to_string());
        let idx = self.graph.add_node(node);
        self.index.insert(key, idx);
        idx
    }

    fn trait_node(&mut self, trait_id: &str) -> NodeIndex {
        match self.find(NodeKind::Trait, trait_id) {
            Some(idx) => idx,
            None => self.add_node(FactNode::Trait(trait_id.to_string())),
        }
    }

    fn warn(&mut self, record: String, reason: String) {
        log::warn!("Fact {record}: {reason}");
        self.warnings.push(CompletenessWarning::new(record, reason));
    }

    fn link_exposures(&mut self, from: NodeIndex, label: &str, stressors: &[String]) {
        for stressor in stressors {
            match self.find(NodeKind::Stressor, stressor) {
                Some(to) => {
                    self.graph.add_edge(from, to, FactEdge::Exposes);
                }
                None => self.warn(
                    label.to_string(),
                    format!("exposes unknown stressor '{stressor}'"),
                ),
            }
        }
    }

    fn link_environment_parents(&mut self, parents: &[(String, String)]) {
        let mut hierarchy: DiGraphMap<&str, ()> = DiGraphMap::new();
        for (child, parent) in parents {
            hierarchy.add_edge(child.as_str(), parent.as_str(), ());
        }
        let cyclic: BTreeSet<String> = tarjan_scc(&hierarchy)
            .into_iter()
            .filter(|component| match component.as_slice() {
                [single] => hierarchy.contains_edge(*single, *single),
                _ => true,
            })
            .flatten()
            .map(str::to_string)
            .collect();

        for (child, parent) in parents {
            let label = format!("environments ({child})");
            if cyclic.contains(child) {
                self.warn(
                    label,
                    format!("parent link to '{parent}' forms a cycle and was ignored"),
                );
                continue;
            }
            let (Some(from), Some(to)) = (
                self.find(NodeKind::Environment, child),
                self.find(NodeKind::Environment, parent),
            ) else {
                self.warn(label, format!("unknown parent environment '{parent}'"));
                continue;
            };
            self.graph.add_edge(from, to, FactEdge::ChildOf);
        }
    }

    #[must_use]
    pub fn find(&self, kind: NodeKind, id: &str) -> Option<NodeIndex> {
        self.index.get(&(kind, id.to_string())).copied()
    }

    #[must_use]
    pub fn node(&self, idx: NodeIndex) -> Option<&FactNode> {
        self.graph.node_weight(idx)
    }

    /// Nodes of one kind, ordered by id.
    #[must_use]
    pub fn nodes_of(&self, kind: NodeKind) -> Vec<&FactNode> {
        let mut nodes: Vec<&FactNode> = self
            .graph
            .node_weights()
            .filter(|n| n.kind() == kind)
            .collect();
        nodes.sort_by(|a, b| a.id().cmp(b.id()));
        nodes
    }

    /// Environment plus its ancestors, nearest first, following at most
    /// `max_depth` parent links.
    #[must_use]
    pub fn environment_lineage(&self, environment: &str, max_depth: usize) -> Vec<&Environment> {
        let mut lineage = Vec::new();
        let Some(mut current) = self.find(NodeKind::Environment, environment) else {
            return lineage;
        };
        let mut visited = BTreeSet::new();

        for depth in 0..=max_depth {
            if !visited.insert(current) {
                break;
            }
            if let Some(FactNode::Environment(env)) = self.node(current) {
                lineage.push(env);
            }
            if depth == max_depth {
                break;
            }
            let parent = self
                .graph
                .edges_directed(current, Direction::Outgoing)
                .find(|e| matches!(e.weight(), FactEdge::ChildOf))
                .map(|e| e.target());
            match parent {
                Some(next) => current = next,
                None => break,
            }
        }

        lineage
    }

    /// Ids of stressors exposed by a node.
    #[must_use]
    pub fn exposed_stressors(&self, idx: NodeIndex) -> Vec<&str> {
        let mut out: Vec<&str> = self
            .graph
            .edges_directed(idx, Direction::Outgoing)
            .filter(|e| matches!(e.weight(), FactEdge::Exposes))
            .filter_map(|e| self.node(e.target()).map(FactNode::id))
            .collect();
        out.sort_unstable();
        out.dedup();
        out
    }

    /// Candidates carrying a trait, ordered by id.
    #[must_use]
    pub fn carriers_of(&self, trait_id: &str) -> Vec<&Candidate> {
        let Some(idx) = self.find(NodeKind::Trait, trait_id) else {
            return Vec::new();
        };
        let mut out: Vec<&Candidate> = self
            .graph
            .edges_directed(idx, Direction::Incoming)
            .filter(|e| matches!(e.weight(), FactEdge::Carries))
            .filter_map(|e| match self.node(e.source()) {
                Some(FactNode::Candidate(c)) => Some(c),
                _ => None,
            })
            .collect();
        out.sort_by(|a, b| a.id.cmp(&b.id));
        out
    }

    /// Causal rules, ordered by id.
    #[must_use]
    pub fn causal_rules(&self) -> Vec<&CausalRule> {
        let mut rules: Vec<&CausalRule> = self
            .graph
            .edge_references()
            .filter_map(|e| match e.weight() {
                FactEdge::Demands(rule) => Some(rule),
                _ => None,
            })
            .collect();
        rules.sort_by(|a, b| a.id.cmp(&b.id));
        rules
    }

    /// Dependency rules, ordered by id.
    #[must_use]
    pub fn dependency_rules(&self) -> Vec<&DependencyRule> {
        let mut rules: Vec<&DependencyRule> = self
            .graph
            .edge_references()
            .filter_map(|e| match e.weight() {
                FactEdge::Neutralizes(rule) => Some(rule),
                _ => None,
            })
            .collect();
        rules.sort_by(|a, b| a.id.cmp(&b.id));
        rules
    }

    #[must_use]
    pub fn warnings(&self) -> &[CompletenessWarning] {
        &self.warnings
    }

    #[must_use]
    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// Node counts per kind, for diagnostics.
    #[must_use]
    pub fn stats(&self) -> GraphStats {
        let count = |kind| self.graph.node_weights().filter(|n| n.kind() == kind).count();
        GraphStats {
            applications: count(NodeKind::Application),
            environments: count(NodeKind::Environment),
            accessories: count(NodeKind::Accessory),
            stressors: count(NodeKind::Stressor),
            traits: count(NodeKind::Trait),
            candidates: count(NodeKind::Candidate),
            materials: count(NodeKind::Material),
            parameters: count(NodeKind::Parameter),
            causal_rules: self.causal_rules().len(),
            dependency_rules: self.dependency_rules().len(),
            edges: self.edge_count(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct GraphStats {
    pub applications: usize,
    pub environments: usize,
    pub accessories: usize,
    pub stressors: usize,
    pub traits: usize,
    pub candidates: usize,
    pub materials: usize,
    pub parameters: usize,
    pub causal_rules: usize,
    pub dependency_rules: usize,
    pub edges: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bundle::FactBundle;

    fn graph(json: &str) -> KnowledgeGraph {
        KnowledgeGraph::build(FactBundle::from_bytes(json.as_bytes()).unwrap().validate())
    }

    #[test]
    fn lineage_walks_parents_nearest_first() {
        let kg = graph(
            r#"{"environments": [
                {"id": "hospital", "parent": "healthcare"},
                {"id": "healthcare", "parent": "indoor"},
                {"id": "indoor"}
            ]}"#,
        );
        let ids: Vec<&str> = kg
            .environment_lineage("hospital", 8)
            .iter()
            .map(|e| e.id.as_str())
            .collect();
        assert_eq!(ids, vec!["hospital", "healthcare", "indoor"]);

        let bounded: Vec<&str> = kg
            .environment_lineage("hospital", 1)
            .iter()
            .map(|e| e.id.as_str())
            .collect();
        assert_eq!(bounded, vec!["hospital", "healthcare"]);
    }

    #[test]
    fn environment_cycles_are_reported_and_cut() {
        let kg = graph(
            r#"{"environments": [
                {"id": "a", "parent": "b"},
                {"id": "b", "parent": "a"},
                {"id": "c", "parent": "a"}
            ]}"#,
        );
        let cycle_warnings = kg
            .warnings()
            .iter()
            .filter(|w| w.reason.contains("cycle"))
            .count();
        assert_eq!(cycle_warnings, 2);
        let ids: Vec<&str> = kg
            .environment_lineage("c", 8)
            .iter()
            .map(|e| e.id.as_str())
            .collect();
        assert_eq!(ids, vec!["c", "a"]);
    }

    #[test]
    fn every_disjoint_cycle_is_reported() {
        let kg = graph(
            r#"{"environments": [
                {"id": "a", "parent": "b"},
                {"id": "b", "parent": "a"},
                {"id": "x", "parent": "y"},
                {"id": "y", "parent": "z"},
                {"id": "z", "parent": "x"},
                {"id": "leaf", "parent": "x"}
            ]}"#,
        );
        let mut cyclic: Vec<&str> = kg
            .warnings()
            .iter()
            .filter(|w| w.reason.contains("cycle"))
            .map(|w| w.record.as_str())
            .collect();
        cyclic.sort_unstable();
        assert_eq!(
            cyclic,
            vec![
                "environments (a)",
                "environments (b)",
                "environments (x)",
                "environments (y)",
                "environments (z)",
            ]
        );
        let ids: Vec<&str> = kg
            .environment_lineage("leaf", 8)
            .iter()
            .map(|e| e.id.as_str())
            .collect();
        assert_eq!(ids, vec!["leaf", "x"]);
    }

    #[test]
    fn rules_with_unknown_stressors_are_skipped() {
        let kg = graph(
            r#"{
                "stressors": [{"id": "grease"}],
                "causal_rules": [
                    {"id": "r1", "stressor": "grease", "demanded_trait": "grease_resistance", "severity": "critical"},
                    {"id": "r2", "stressor": "smoke", "demanded_trait": "smoke_capture", "severity": "warning"}
                ]
            }"#,
        );
        assert_eq!(kg.causal_rules().len(), 1);
        assert!(kg.warnings().iter().any(|w| w.reason.contains("smoke")));
    }

    #[test]
    fn carriers_are_found_through_trait_nodes() {
        let kg = graph(
            r#"{"candidates": [
                {"id": "pre", "traits": ["grease_resistance"]},
                {"id": "carbon", "traits": ["odor_removal"]}
            ]}"#,
        );
        let carriers: Vec<&str> = kg
            .carriers_of("grease_resistance")
            .iter()
            .map(|c| c.id.as_str())
            .collect();
        assert_eq!(carriers, vec!["pre"]);
        assert_eq!(kg.stats().traits, 2);
    }
}
