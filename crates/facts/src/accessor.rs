use crate::bundle::{FactBundle, FactSet};
use crate::error::{FactError, Result};
use crate::graph::{FactNode, KnowledgeGraph, NodeKind};
use crate::snapshot::FactSnapshot;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// Which part of the knowledge base one request needs.
///
/// Candidates, rules, materials and parameters are always returned in full;
/// the scope only narrows applications, environments and accessories.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SnapshotScope {
    Full,
    Request {
        application: Option<String>,
        environment: Option<String>,
        accessories: Vec<String>,
        max_environment_depth: usize,
    },
}

/// Read-only access to the fact store. One call per invocation.
pub trait FactAccessor: Send + Sync {
    fn snapshot(&self, scope: &SnapshotScope) -> Result<FactSnapshot>;
}

/// [`FactAccessor`] over an in-memory [`KnowledgeGraph`].
#[derive(Clone)]
pub struct GraphFactAccessor {
    graph: Arc<KnowledgeGraph>,
}

impl GraphFactAccessor {
    pub fn new(graph: Arc<KnowledgeGraph>) -> Self {
        Self { graph }
    }

    /// Parses, validates and indexes a bundle in one go.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let bundle = FactBundle::from_bytes(bytes)?;
        Ok(Self::new(Arc::new(KnowledgeGraph::build(bundle.validate()))))
    }

    #[must_use]
    pub fn graph(&self) -> &KnowledgeGraph {
        &self.graph
    }
}

impl FactAccessor for GraphFactAccessor {
    fn snapshot(&self, scope: &SnapshotScope) -> Result<FactSnapshot> {
        let kg = self.graph.as_ref();
        let mut facts = FactSet::default();

        match scope {
            SnapshotScope::Full => {
                facts.applications = collect(kg, NodeKind::Application, |n| match n {
                    FactNode::Application(a) => Some(a.clone()),
                    _ => None,
                });
                facts.environments = collect(kg, NodeKind::Environment, |n| match n {
                    FactNode::Environment(e) => Some(e.clone()),
                    _ => None,
                });
                facts.accessories = collect(kg, NodeKind::Accessory, |n| match n {
                    FactNode::Accessory(a) => Some(a.clone()),
                    _ => None,
                });
            }
            SnapshotScope::Request {
                application,
                environment,
                accessories,
                max_environment_depth,
            } => {
                if let Some(id) = application {
                    facts.applications = lookup(kg, NodeKind::Application, id, |n| match n {
                        FactNode::Application(a) => Some(a.clone()),
                        _ => None,
                    });
                }
                if let Some(id) = environment {
                    facts.environments = kg
                        .environment_lineage(id, *max_environment_depth)
                        .into_iter()
                        .cloned()
                        .collect();
                }
                let wanted: BTreeSet<&String> = accessories.iter().collect();
                for id in wanted {
                    facts.accessories.extend(lookup(kg, NodeKind::Accessory, id, |n| match n {
                        FactNode::Accessory(a) => Some(a.clone()),
                        _ => None,
                    }));
                }
            }
        }

        facts.stressors = collect(kg, NodeKind::Stressor, |n| match n {
            FactNode::Stressor(s) => Some(s.clone()),
            _ => None,
        });
        facts.materials = collect(kg, NodeKind::Material, |n| match n {
            FactNode::Material(m) => Some(m.clone()),
            _ => None,
        });
        facts.parameters = collect(kg, NodeKind::Parameter, |n| match n {
            FactNode::Parameter(p) => Some(p.clone()),
            _ => None,
        });
        facts.candidates = collect(kg, NodeKind::Candidate, |n| match n {
            FactNode::Candidate(c) => Some(c.clone()),
            _ => None,
        });
        facts.causal_rules = kg.causal_rules().into_iter().cloned().collect();
        facts.dependency_rules = kg.dependency_rules().into_iter().cloned().collect();

        log::debug!(
            "Fact snapshot: {} candidates, {} causal rules, {} environments in scope",
            facts.candidates.len(),
            facts.causal_rules.len(),
            facts.environments.len()
        );

        Ok(FactSnapshot::new(facts, kg.warnings().to_vec()))
    }
}

fn collect<T>(kg: &KnowledgeGraph, kind: NodeKind, pick: impl Fn(&FactNode) -> Option<T>) -> Vec<T> {
    kg.nodes_of(kind).into_iter().filter_map(pick).collect()
}

fn lookup<T>(
    kg: &KnowledgeGraph,
    kind: NodeKind,
    id: &str,
    pick: impl Fn(&FactNode) -> Option<T>,
) -> Vec<T> {
    kg.find(kind, id)
        .and_then(|idx| kg.node(idx))
        .and_then(pick)
        .into_iter()
        .collect()
}

/// Connection factory for fact stores.
///
/// Loaded graphs are cached per source path behind a mutex and shared as
/// `Arc`, so accessors handed to concurrent invocations never reload or
/// mutate the store.
#[derive(Default)]
pub struct FactStoreFactory {
    cache: Mutex<BTreeMap<PathBuf, Arc<KnowledgeGraph>>>,
}

impl FactStoreFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accessor for the bundle at `path`, loading it on first use.
    pub fn connect(&self, path: &Path) -> Result<GraphFactAccessor> {
        let mut cache = self
            .cache
            .lock()
            .map_err(|_| FactError::Unavailable("fact store cache lock poisoned".to_string()))?;

        if let Some(graph) = cache.get(path) {
            return Ok(GraphFactAccessor::new(Arc::clone(graph)));
        }

        log::info!("Loading fact bundle {}", path.display());
        let bundle = FactBundle::from_path(path)?;
        let graph = Arc::new(KnowledgeGraph::build(bundle.validate()));
        cache.insert(path.to_path_buf(), Arc::clone(&graph));
        Ok(GraphFactAccessor::new(graph))
    }

    /// Drops a cached store so the next `connect` reloads it.
    pub fn invalidate(&self, path: &Path) -> Result<bool> {
        let mut cache = self
            .cache
            .lock()
            .map_err(|_| FactError::Unavailable("fact store cache lock poisoned".to_string()))?;
        Ok(cache.remove(path).is_some())
    }
}
