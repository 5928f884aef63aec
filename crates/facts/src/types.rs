use crate::value::{FactValue, Operator};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Severity shared by causal rules and installation constraints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    #[serde(alias = "CRITICAL", alias = "Critical")]
    Critical,
    #[serde(alias = "WARNING", alias = "Warning")]
    Warning,
    #[serde(alias = "INFO", alias = "Info")]
    Info,
}

impl Severity {
    /// Weight of a satisfied demand of this severity when scoring candidates.
    #[must_use]
    pub const fn weight(self) -> f64 {
        match self {
            Self::Critical => 3.0,
            Self::Warning => 2.0,
            Self::Info => 1.0,
        }
    }
}

/// Detected application exposing stressors.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Application {
    pub id: String,
    #[serde(default)]
    pub stressors: Vec<String>,
}

/// Installation environment; children inherit the stressors of ancestors.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Environment {
    pub id: String,
    #[serde(default)]
    pub parent: Option<String>,
    #[serde(default)]
    pub stressors: Vec<String>,
    #[serde(default)]
    pub material_requirements: Vec<PropertyRequirement>,
    #[serde(default)]
    pub properties: BTreeMap<String, FactValue>,
}

/// Optional accessory the request can switch on; may expose stressors of its own.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Accessory {
    pub id: String,
    #[serde(default)]
    pub stressors: Vec<String>,
}

/// Environmental or operational hazard.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stressor {
    pub id: String,
    #[serde(default)]
    pub category: String,
    #[serde(default = "default_severity_weight")]
    pub severity_weight: f64,
    #[serde(default)]
    pub material_requirements: Vec<PropertyRequirement>,
}

impl Default for Stressor {
    fn default() -> Self {
        Self {
            id: String::new(),
            category: String::new(),
            severity_weight: default_severity_weight(),
            material_requirements: Vec::new(),
        }
    }
}

pub(crate) const fn default_severity_weight() -> f64 {
    1.0
}

/// Stressor -> demanded trait.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CausalRule {
    pub id: String,
    pub stressor: String,
    pub demanded_trait: String,
    pub severity: Severity,
    #[serde(default)]
    pub explanation: String,
}

/// An upstream stage carrying `provides_trait` neutralizes `stressor` for a
/// downstream target lacking that trait.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DependencyRule {
    pub id: String,
    pub stressor: String,
    pub provides_trait: String,
    /// Trait of the target that the stressor would otherwise foul.
    #[serde(default)]
    pub protects_trait: Option<String>,
    #[serde(default)]
    pub explanation: String,
}

/// `property <operator> value`, evaluated against a material's properties.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyRequirement {
    pub property: String,
    pub operator: Operator,
    pub value: FactValue,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Material {
    pub code: String,
    #[serde(default)]
    pub properties: BTreeMap<String, FactValue>,
}

/// Row of a candidate's material table. Properties here override the
/// global [`Material`] record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MaterialOption {
    pub code: String,
    #[serde(default)]
    pub properties: BTreeMap<String, FactValue>,
}

/// Available module size. Effective dimensions default to nominal ones.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModuleSize {
    pub width: f64,
    pub height: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub effective_width: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub effective_height: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capacity: Option<f64>,
}

impl ModuleSize {
    pub fn new(width: f64, height: f64) -> Self {
        Self {
            width,
            height,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn effective_width(&self) -> f64 {
        self.effective_width.unwrap_or(self.width)
    }

    #[must_use]
    pub fn effective_height(&self) -> f64 {
        self.effective_height.unwrap_or(self.height)
    }

    #[must_use]
    pub fn area(&self) -> f64 {
        self.width * self.height
    }

    #[must_use]
    pub fn same_nominal(&self, width: f64, height: f64) -> bool {
        (self.width - width).abs() < 1e-6 && (self.height - height).abs() < 1e-6
    }
}

/// Throughput a module delivers, scaled by face area from a reference module.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapacityRule {
    pub reference_width: f64,
    pub reference_height: f64,
    pub reference_capacity: f64,
    #[serde(default = "default_derating")]
    pub derating: f64,
}

const fn default_derating() -> f64 {
    1.0
}

impl CapacityRule {
    /// Effective per-module capacity. An explicit module capacity wins over
    /// area scaling; derating applies to both.
    #[must_use]
    pub fn module_capacity(&self, module: &ModuleSize) -> f64 {
        let nominal = module.capacity.unwrap_or_else(|| {
            let reference_area = self.reference_width * self.reference_height;
            if reference_area <= 0.0 {
                self.reference_capacity
            } else {
                self.reference_capacity * module.area() / reference_area
            }
        });
        nominal * self.derating
    }
}

/// Where a constraint reads one of its numeric inputs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueSource {
    Context(String),
    Candidate(String),
}

/// Related fact a cross-node threshold looks up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Relation {
    Material,
    Environment,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ConstraintKind {
    /// `factor * dimension (+ margin)` must not exceed `available`.
    ComputedFormula {
        factor: String,
        dimension: ValueSource,
        available: ValueSource,
        #[serde(default)]
        margin: f64,
    },
    /// Context value at `key` must be one of `allowed`.
    SetMembership { key: String, allowed: Vec<FactValue> },
    /// Property of a related record compared against `threshold`.
    CrossNodeThreshold {
        relation: Relation,
        property: String,
        operator: Operator,
        threshold: FactValue,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstallationConstraint {
    pub id: String,
    pub severity: Severity,
    #[serde(default)]
    pub message: String,
    pub kind: ConstraintKind,
}

/// How a request parameter is asked for and which alias keys satisfy it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParameterSpec {
    pub key: String,
    #[serde(default)]
    pub aliases: Vec<String>,
    #[serde(default)]
    pub prompt: String,
    #[serde(default)]
    pub options: Vec<String>,
}

/// Configurable option of a candidate that may carry a default.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VariableFeature {
    pub key: String,
    #[serde(default)]
    pub default: Option<FactValue>,
    #[serde(default)]
    pub auto_resolve: bool,
}

/// Product family under evaluation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub traits: Vec<String>,
    #[serde(default)]
    pub materials: Vec<MaterialOption>,
    #[serde(default)]
    pub module_sizes: Vec<ModuleSize>,
    #[serde(default)]
    pub constraints: Vec<InstallationConstraint>,
    #[serde(default)]
    pub capacity: Option<CapacityRule>,
    #[serde(default)]
    pub selection_priority: u32,
    #[serde(default)]
    pub allowed_environments: Vec<String>,
    #[serde(default)]
    pub material_requirements: Vec<PropertyRequirement>,
    #[serde(default)]
    pub required_parameters: Vec<String>,
    #[serde(default)]
    pub features: Vec<VariableFeature>,
    #[serde(default)]
    pub properties: BTreeMap<String, FactValue>,
}

impl Candidate {
    #[must_use]
    pub fn has_trait(&self, trait_id: &str) -> bool {
        self.traits.iter().any(|t| t == trait_id)
    }

    #[must_use]
    pub fn material(&self, code: &str) -> Option<&MaterialOption> {
        self.materials.iter().find(|m| m.code == code)
    }

    /// A candidate without a material table accepts any material.
    #[must_use]
    pub fn restricts_materials(&self) -> bool {
        !self.materials.is_empty()
    }

    #[must_use]
    pub fn display_name(&self) -> &str {
        if self.name.trim().is_empty() {
            &self.id
        } else {
            &self.name
        }
    }

    /// True when `hint` names this candidate by id or name (case-insensitive).
    #[must_use]
    pub fn matches_hint(&self, hint: &str) -> bool {
        let hint = hint.trim();
        !hint.is_empty()
            && (self.id.eq_ignore_ascii_case(hint) || self.name.eq_ignore_ascii_case(hint))
    }
}

/// Record skipped or flagged while mapping raw facts into typed records.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CompletenessWarning {
    pub record: String,
    pub reason: String,
}

impl CompletenessWarning {
    pub fn new(record: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            record: record.into(),
            reason: reason.into(),
        }
    }
}

impl std::fmt::Display for CompletenessWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.record, self.reason)
    }
}
