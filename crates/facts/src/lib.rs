//! # Configurator Facts
//!
//! Typed domain facts and the read-only accessor the decision engine pulls
//! them through.
//!
//! ## Architecture
//!
//! ```text
//! fact bundle (JSON / TOML)
//!     │
//!     ├──> FactBundle::validate
//!     │      ├─ map raw records into typed records
//!     │      └─ skip malformed records (CompletenessWarning)
//!     │
//!     ├──> KnowledgeGraph (petgraph)
//!     │      ├─ Nodes: applications, environments, stressors, traits, candidates, ...
//!     │      └─ Edges: exposes, child-of, demands, neutralizes, carries
//!     │
//!     └──> FactAccessor
//!            └─ one batched FactSnapshot per request
//! ```
//!
//! No domain vocabulary lives here: every stressor, trait and product name
//! comes from the bundle.

mod accessor;
mod bundle;
mod context;
mod error;
mod graph;
mod snapshot;
mod types;
mod value;

pub use accessor::{FactAccessor, FactStoreFactory, GraphFactAccessor, SnapshotScope};
pub use bundle::{FactBundle, FactSet, ValidatedFacts};
pub use context::RequestContext;
pub use error::{FactError, Result};
pub use graph::{FactEdge, FactNode, GraphStats, KnowledgeGraph, NodeKind};
pub use snapshot::FactSnapshot;
pub use types::{
    Accessory, Application, Candidate, CapacityRule, CausalRule, CompletenessWarning,
    ConstraintKind, DependencyRule, Environment, InstallationConstraint, Material,
    MaterialOption, ModuleSize, ParameterSpec, PropertyRequirement, Relation, Severity, Stressor,
    ValueSource, VariableFeature,
};
pub use value::{Comparison, FactValue, Operator};
