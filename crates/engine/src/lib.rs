//! # Configurator Engine
//!
//! Selects and configures a product, or a multi-stage assembly of products,
//! from a request context and a fact snapshot.
//!
//! ## Pipeline
//!
//! ```text
//! RequestContext + FactSnapshot
//!     │
//!     ├──> resolver      active stressors, causal & dependency rules
//!     ├──> veto          trait, environment and material judgement per candidate
//!     ├──> installation  space, whitelist and cross-record thresholds
//!     ├──> assembly      protector + target plans for neutralizable blocks
//!     ├──> verdict       ranking, recommendation
//!     ├──> sizing        module size, count and layout
//!     ├──> clarification missing parameters (triple guard)
//!     └──> Verdict       immutable, deterministic JSON
//! ```
//!
//! The engine is a pure function of `(RequestContext, FactSnapshot,
//! EngineProfile)`; all I/O happens in the [`FactAccessor`] before it runs.
//!
//! [`FactAccessor`]: configurator_facts::FactAccessor

mod assembly;
mod clarification;
mod engine;
mod error;
mod installation;
mod profile;
mod resolver;
mod sizing;
mod template;
mod verdict;
mod veto;

pub use assembly::{AssemblyPlan, AssemblyStage, StageRole};
pub use clarification::ClarificationRequest;
pub use engine::Engine;
pub use error::{EngineError, Result};
pub use installation::{ConstraintViolation, ViolationOutcome};
pub use profile::{ContextKeys, EngineProfile, PROFILE_ENV};
pub use resolver::{ActiveStressor, StressorSource};
pub use sizing::{ModuleDimensions, SizingArrangement, SizingSource};
pub use verdict::{Alternative, AppliedRule, Recommendation, RuleKind, SessionUpdate, Verdict};
pub use veto::{
    Advisory, AdvisorySource, BlockReason, CandidateStatus, CandidateVerdict, MaterialIssue,
};
