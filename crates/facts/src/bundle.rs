use crate::error::{FactError, Result};
use crate::types::{
    Accessory, Application, Candidate, CausalRule, CompletenessWarning, DependencyRule,
    Environment, Material, ParameterSpec, Stressor,
};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::collections::BTreeSet;
use std::path::Path;

/// Fact bundle as ingested: every record is still untyped JSON so one bad
/// record cannot poison the whole load.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FactBundle {
    #[serde(default)]
    pub schema_version: Option<u32>,
    #[serde(default)]
    pub applications: Vec<serde_json::Value>,
    #[serde(default)]
    pub environments: Vec<serde_json::Value>,
    #[serde(default)]
    pub accessories: Vec<serde_json::Value>,
    #[serde(default)]
    pub stressors: Vec<serde_json::Value>,
    #[serde(default)]
    pub causal_rules: Vec<serde_json::Value>,
    #[serde(default)]
    pub dependency_rules: Vec<serde_json::Value>,
    #[serde(default)]
    pub materials: Vec<serde_json::Value>,
    #[serde(default)]
    pub candidates: Vec<serde_json::Value>,
    #[serde(default)]
    pub parameters: Vec<serde_json::Value>,
}

/// Typed facts after validation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FactSet {
    pub applications: Vec<Application>,
    pub environments: Vec<Environment>,
    pub accessories: Vec<Accessory>,
    pub stressors: Vec<Stressor>,
    pub causal_rules: Vec<CausalRule>,
    pub dependency_rules: Vec<DependencyRule>,
    pub materials: Vec<Material>,
    pub candidates: Vec<Candidate>,
    pub parameters: Vec<ParameterSpec>,
}

#[derive(Debug, Clone, Default)]
pub struct ValidatedFacts {
    pub facts: FactSet,
    pub warnings: Vec<CompletenessWarning>,
}

impl FactBundle {
    pub fn from_path(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path).map_err(|source| FactError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_bytes(&bytes)
    }

    /// Parses JSON, falling back to TOML.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let value: serde_json::Value = match serde_json::from_slice(bytes) {
            Ok(value) => value,
            Err(json_err) => {
                let utf8 = std::str::from_utf8(bytes)
                    .map_err(|err| FactError::Parse(format!("{json_err}; {err}")))?;
                let toml_value: toml::Value = toml::from_str(utf8).map_err(|toml_err| {
                    FactError::Parse(format!(
                        "Fact bundle is not valid JSON or TOML ({json_err}); TOML parse error: {toml_err}"
                    ))
                })?;
                serde_json::to_value(toml_value).map_err(|err| {
                    FactError::Parse(format!("Failed to convert TOML facts to JSON: {err}"))
                })?
            }
        };

        if !value.is_object() {
            return Err(FactError::Parse("Fact bundle must be an object".to_string()));
        }

        let bundle: Self =
            serde_json::from_value(value).map_err(|err| FactError::Parse(err.to_string()))?;
        if let Some(version) = bundle.schema_version {
            if version != 1 {
                return Err(FactError::UnsupportedSchema(version));
            }
        }
        Ok(bundle)
    }

    /// Maps raw records into typed ones, skipping malformed records.
    #[must_use]
    pub fn validate(self) -> ValidatedFacts {
        let mut warnings = Vec::new();

        let applications = typed_section::<Application>(
            "applications",
            self.applications,
            |a| &a.id,
            |_| Ok(()),
            &mut warnings,
        );
        let environments = typed_section::<Environment>(
            "environments",
            self.environments,
            |e| &e.id,
            |e| match &e.parent {
                Some(parent) if parent == &e.id => Err("environment is its own parent".to_string()),
                _ => Ok(()),
            },
            &mut warnings,
        );
        let accessories = typed_section::<Accessory>(
            "accessories",
            self.accessories,
            |a| &a.id,
            |_| Ok(()),
            &mut warnings,
        );
        let stressors = typed_section::<Stressor>(
            "stressors",
            self.stressors,
            |s| &s.id,
            |s| {
                if s.severity_weight.is_finite() && s.severity_weight >= 0.0 {
                    Ok(())
                } else {
                    Err(format!("invalid severity_weight {}", s.severity_weight))
                }
            },
            &mut warnings,
        );
        let causal_rules = typed_section::<CausalRule>(
            "causal_rules",
            self.causal_rules,
            |r| &r.id,
            |r| non_empty("demanded_trait", &r.demanded_trait),
            &mut warnings,
        );
        let dependency_rules = typed_section::<DependencyRule>(
            "dependency_rules",
            self.dependency_rules,
            |r| &r.id,
            |r| non_empty("provides_trait", &r.provides_trait),
            &mut warnings,
        );
        let materials = typed_section::<Material>(
            "materials",
            self.materials,
            |m| &m.code,
            |_| Ok(()),
            &mut warnings,
        );
        let mut candidates = typed_section::<Candidate>(
            "candidates",
            self.candidates,
            |c| &c.id,
            |_| Ok(()),
            &mut warnings,
        );
        for candidate in &mut candidates {
            sanitize_candidate(candidate, &mut warnings);
        }
        let parameters = typed_section::<ParameterSpec>(
            "parameters",
            self.parameters,
            |p| &p.key,
            |_| Ok(()),
            &mut warnings,
        );

        if !warnings.is_empty() {
            log::warn!("Fact bundle validation skipped or adjusted {} records", warnings.len());
        }

        ValidatedFacts {
            facts: FactSet {
                applications,
                environments,
                accessories,
                stressors,
                causal_rules,
                dependency_rules,
                materials,
                candidates,
                parameters,
            },
            warnings,
        }
    }
}

fn non_empty(field: &str, value: &str) -> std::result::Result<(), String> {
    if value.trim().is_empty() {
        Err(format!("{field} must not be empty"))
    } else {
        Ok(())
    }
}

fn record_label(section: &str, idx: usize, value: &serde_json::Value) -> String {
    let id = ["id", "code", "key"]
        .iter()
        .find_map(|field| value.get(field).and_then(serde_json::Value::as_str));
    match id {
        Some(id) => format!("{section}[{idx}] ({id})"),
        None => format!("{section}[{idx}]"),
    }
}

fn typed_section<T: DeserializeOwned>(
    section: &str,
    raw: Vec<serde_json::Value>,
    id_of: impl Fn(&T) -> &String,
    check: impl Fn(&T) -> std::result::Result<(), String>,
    warnings: &mut Vec<CompletenessWarning>,
) -> Vec<T> {
    let mut seen = BTreeSet::new();
    let mut out = Vec::with_capacity(raw.len());

    for (idx, value) in raw.into_iter().enumerate() {
        let label = record_label(section, idx, &value);
        let record: T = match serde_json::from_value(value) {
            Ok(record) => record,
            Err(err) => {
                log::warn!("Skipping malformed fact {label}: {err}");
                warnings.push(CompletenessWarning::new(label, err.to_string()));
                continue;
            }
        };

        let id = id_of(&record).trim().to_string();
        if id.is_empty() {
            warnings.push(CompletenessWarning::new(label, "identifier must not be empty"));
            continue;
        }
        if let Err(reason) = check(&record) {
            warnings.push(CompletenessWarning::new(label, reason));
            continue;
        }
        if !seen.insert(id.clone()) {
            warnings.push(CompletenessWarning::new(
                label,
                format!("duplicate identifier '{id}', keeping the first record"),
            ));
            continue;
        }
        out.push(record);
    }

    out
}

fn sanitize_candidate(candidate: &mut Candidate, warnings: &mut Vec<CompletenessWarning>) {
    let label = format!("candidates ({})", candidate.id);

    let before = candidate.module_sizes.len();
    candidate.module_sizes.retain(|m| {
        m.width > 0.0
            && m.height > 0.0
            && m.effective_width() > 0.0
            && m.effective_height() > 0.0
            && m.capacity.map_or(true, |c| c > 0.0)
    });
    let dropped = before - candidate.module_sizes.len();
    if dropped > 0 {
        warnings.push(CompletenessWarning::new(
            label.clone(),
            format!("dropped {dropped} module size(s) with non-positive dimensions or capacity"),
        ));
    }

    if let Some(rule) = &candidate.capacity {
        if rule.reference_capacity <= 0.0 || rule.derating <= 0.0 {
            warnings.push(CompletenessWarning::new(
                label.clone(),
                "capacity rule ignored: reference_capacity and derating must be positive",
            ));
            candidate.capacity = None;
        }
    }

    let mut seen = BTreeSet::new();
    candidate.constraints.retain(|c| {
        if seen.insert(c.id.clone()) {
            true
        } else {
            warnings.push(CompletenessWarning::new(
                label.clone(),
                format!("duplicate constraint '{}' ignored", c.id),
            ));
            false
        }
    });

    let mut seen = BTreeSet::new();
    candidate.traits.retain(|t| !t.trim().is_empty() && seen.insert(t.clone()));
}
