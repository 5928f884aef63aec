use std::path::Path;

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;

const BUILTIN_DEFAULT: &str = include_str!("../../../profiles/default.json");
const BUILTIN_STRICT: &str = include_str!("../../../profiles/strict.json");

/// Environment variable naming the profile (builtin name or file path).
pub const PROFILE_ENV: &str = "CONFIGURATOR_PROFILE";

/// Engine tuning plus the table telling the engine which request keys carry
/// which meaning. Domain vocabulary stays in data: only key names live here.
#[derive(Clone, Debug, PartialEq)]
pub struct EngineProfile {
    name: String,
    description: Option<String>,
    keys: ContextKeys,
    max_environment_depth: usize,
    sync_properties: Vec<String>,
    required_parameters: Vec<String>,
    max_alternatives: usize,
}

/// Request keys the engine reads.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ContextKeys {
    pub application: String,
    pub environment: String,
    pub material: String,
    pub throughput: String,
    pub max_width: String,
    pub max_height: String,
    pub module_width: String,
    pub module_height: String,
    pub product_hint: String,
    pub accessories: String,
    pub concluded: String,
}

impl Default for ContextKeys {
    fn default() -> Self {
        Self {
            application: "application".to_string(),
            environment: "environment".to_string(),
            material: "material".to_string(),
            throughput: "throughput".to_string(),
            max_width: "max_width".to_string(),
            max_height: "max_height".to_string(),
            module_width: "module_width".to_string(),
            module_height: "module_height".to_string(),
            product_hint: "product".to_string(),
            accessories: "accessories".to_string(),
            concluded: "configuration_concluded".to_string(),
        }
    }
}

impl Default for EngineProfile {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            description: None,
            keys: ContextKeys::default(),
            max_environment_depth: 8,
            sync_properties: vec![
                "module_width".to_string(),
                "module_height".to_string(),
                "throughput".to_string(),
            ],
            required_parameters: Vec::new(),
            max_alternatives: 3,
        }
    }
}

#[derive(Clone, Debug, Default, Deserialize)]
struct RawProfile {
    #[serde(default)]
    schema_version: Option<u32>,
    name: Option<String>,
    description: Option<String>,
    #[serde(default)]
    keys: Option<RawKeys>,
    #[serde(default)]
    resolver: Option<RawResolver>,
    #[serde(default)]
    assembly: Option<RawAssembly>,
    #[serde(default)]
    clarification: Option<RawClarification>,
    #[serde(default)]
    alternatives: Option<RawAlternatives>,
}

#[derive(Clone, Debug, Default, Deserialize)]
struct RawKeys {
    application: Option<String>,
    environment: Option<String>,
    material: Option<String>,
    throughput: Option<String>,
    max_width: Option<String>,
    max_height: Option<String>,
    module_width: Option<String>,
    module_height: Option<String>,
    product_hint: Option<String>,
    accessories: Option<String>,
    concluded: Option<String>,
}

#[derive(Clone, Copy, Debug, Default, Deserialize)]
struct RawResolver {
    max_environment_depth: Option<usize>,
}

#[derive(Clone, Debug, Default, Deserialize)]
struct RawAssembly {
    sync_properties: Option<Vec<String>>,
}

#[derive(Clone, Debug, Default, Deserialize)]
struct RawClarification {
    required_parameters: Option<Vec<String>>,
}

#[derive(Clone, Copy, Debug, Default, Deserialize)]
struct RawAlternatives {
    max: Option<usize>,
}

impl EngineProfile {
    #[must_use]
    pub fn builtin(name: &str) -> Option<Self> {
        match name {
            "default" => Self::from_bytes("default", BUILTIN_DEFAULT.as_bytes()).ok(),
            "strict" => Self::from_bytes("strict", BUILTIN_STRICT.as_bytes()).ok(),
            _ => None,
        }
    }

    /// Builtin profile name or path to a JSON/TOML profile file.
    pub fn resolve(spec: &str) -> Result<Self> {
        if let Some(profile) = Self::builtin(spec) {
            return Ok(profile);
        }
        let path = Path::new(spec);
        if path.exists() {
            let name = path
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or("custom")
                .to_string();
            return Self::from_file(&name, path);
        }
        Err(anyhow!(
            "Unknown profile '{spec}' (builtin: default, strict; or a path to a profile file)"
        ))
    }

    /// Profile named by `CONFIGURATOR_PROFILE`, or the default.
    pub fn from_env() -> Result<Self> {
        match std::env::var(PROFILE_ENV) {
            Ok(spec) if !spec.trim().is_empty() => Self::resolve(spec.trim())
                .with_context(|| format!("Invalid {PROFILE_ENV} value '{spec}'")),
            _ => Ok(Self::default()),
        }
    }

    pub fn from_file(profile_name: &str, path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)
            .with_context(|| format!("Failed to read profile file {}", path.display()))?;
        Self::from_bytes(profile_name, &bytes)
    }

    /// Parses a profile and overlays it on the defaults.
    pub fn from_bytes(profile_name: &str, bytes: &[u8]) -> Result<Self> {
        let raw = parse_raw(bytes).with_context(|| {
            format!("Profile '{profile_name}' is not valid JSON/TOML configuration")
        })?;
        Self::from_raw(raw, profile_name)
    }

    fn from_raw(raw: RawProfile, fallback_name: &str) -> Result<Self> {
        if let Some(schema_version) = raw.schema_version {
            if schema_version != 1 {
                return Err(anyhow!(
                    "profile.schema_version {schema_version} is not supported (expected 1)"
                ));
            }
        }

        let defaults = Self::default();
        let name = raw
            .name
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| fallback_name.to_string());
        let keys = merge_keys(raw.keys, defaults.keys);
        let max_environment_depth = raw
            .resolver
            .and_then(|r| r.max_environment_depth)
            .unwrap_or(defaults.max_environment_depth);
        let sync_properties = raw
            .assembly
            .and_then(|a| a.sync_properties)
            .unwrap_or(defaults.sync_properties);
        let required_parameters = raw
            .clarification
            .and_then(|c| c.required_parameters)
            .unwrap_or(defaults.required_parameters);
        let max_alternatives = raw
            .alternatives
            .and_then(|a| a.max)
            .unwrap_or(defaults.max_alternatives);

        let profile = Self {
            name,
            description: raw.description,
            keys,
            max_environment_depth,
            sync_properties,
            required_parameters,
            max_alternatives,
        };
        profile
            .validate()
            .with_context(|| format!("Invalid profile '{}'", profile.name))?;
        Ok(profile)
    }

    fn validate(&self) -> Result<()> {
        if self.max_environment_depth == 0 {
            return Err(anyhow!("resolver.max_environment_depth must be > 0"));
        }
        if self.max_environment_depth > 64 {
            return Err(anyhow!(
                "resolver.max_environment_depth {} exceeds the limit of 64",
                self.max_environment_depth
            ));
        }
        for (path, key) in self.keys.entries() {
            if key.trim().is_empty() {
                return Err(anyhow!("keys.{path} must not be empty"));
            }
        }
        for (idx, key) in self.sync_properties.iter().enumerate() {
            if key.trim().is_empty() {
                return Err(anyhow!("assembly.sync_properties[{idx}] must not be empty"));
            }
        }
        for (idx, key) in self.required_parameters.iter().enumerate() {
            if key.trim().is_empty() {
                return Err(anyhow!(
                    "clarification.required_parameters[{idx}] must not be empty"
                ));
            }
        }
        Ok(())
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    #[must_use]
    pub const fn keys(&self) -> &ContextKeys {
        &self.keys
    }

    #[must_use]
    pub const fn max_environment_depth(&self) -> usize {
        self.max_environment_depth
    }

    #[must_use]
    pub fn sync_properties(&self) -> &[String] {
        &self.sync_properties
    }

    #[must_use]
    pub fn required_parameters(&self) -> &[String] {
        &self.required_parameters
    }

    #[must_use]
    pub const fn max_alternatives(&self) -> usize {
        self.max_alternatives
    }
}

impl ContextKeys {
    fn entries(&self) -> [(&'static str, &str); 11] {
        [
            ("application", self.application.as_str()),
            ("environment", self.environment.as_str()),
            ("material", self.material.as_str()),
            ("throughput", self.throughput.as_str()),
            ("max_width", self.max_width.as_str()),
            ("max_height", self.max_height.as_str()),
            ("module_width", self.module_width.as_str()),
            ("module_height", self.module_height.as_str()),
            ("product_hint", self.product_hint.as_str()),
            ("accessories", self.accessories.as_str()),
            ("concluded", self.concluded.as_str()),
        ]
    }
}

fn merge_keys(raw: Option<RawKeys>, base: ContextKeys) -> ContextKeys {
    let raw = raw.unwrap_or_default();
    ContextKeys {
        application: raw.application.unwrap_or(base.application),
        environment: raw.environment.unwrap_or(base.environment),
        material: raw.material.unwrap_or(base.material),
        throughput: raw.throughput.unwrap_or(base.throughput),
        max_width: raw.max_width.unwrap_or(base.max_width),
        max_height: raw.max_height.unwrap_or(base.max_height),
        module_width: raw.module_width.unwrap_or(base.module_width),
        module_height: raw.module_height.unwrap_or(base.module_height),
        product_hint: raw.product_hint.unwrap_or(base.product_hint),
        accessories: raw.accessories.unwrap_or(base.accessories),
        concluded: raw.concluded.unwrap_or(base.concluded),
    }
}

fn parse_raw(bytes: &[u8]) -> Result<RawProfile> {
    let value: serde_json::Value = match serde_json::from_slice(bytes) {
        Ok(value) => value,
        Err(json_err) => {
            let utf8 = std::str::from_utf8(bytes).map_err(|err| anyhow!("{json_err}; {err}"))?;
            let toml_value: toml::Value = toml::from_str(utf8).map_err(|toml_err| {
                anyhow!(
                    "Profile is not valid JSON or TOML ({json_err}); TOML parse error: {toml_err}"
                )
            })?;
            serde_json::to_value(toml_value)
                .map_err(|err| anyhow!("Failed to convert TOML profile to JSON: {err}"))?
        }
    };

    validate_profile_value(&value)?;
    serde_json::from_value(value).map_err(|err| anyhow!("Profile parse error: {err}"))
}

fn validate_profile_value(value: &serde_json::Value) -> Result<()> {
    fn validate_object_keys(
        unknown: &mut Vec<String>,
        obj: &serde_json::Map<String, serde_json::Value>,
        base: &str,
        allowed: &[&str],
    ) {
        for key in obj.keys() {
            if !allowed.iter().any(|a| a == &key.as_str()) {
                if base.is_empty() {
                    unknown.push(key.to_string());
                } else {
                    unknown.push(format!("{base}.{key}"));
                }
            }
        }
    }

    let serde_json::Value::Object(root) = value else {
        return Err(anyhow!("Profile config must be a JSON object"));
    };

    let mut unknown = Vec::new();
    validate_object_keys(
        &mut unknown,
        root,
        "",
        &[
            "schema_version",
            "name",
            "description",
            "keys",
            "resolver",
            "assembly",
            "clarification",
            "alternatives",
        ],
    );

    let sections: [(&str, &[&str]); 5] = [
        (
            "keys",
            &[
                "application",
                "environment",
                "material",
                "throughput",
                "max_width",
                "max_height",
                "module_width",
                "module_height",
                "product_hint",
                "accessories",
                "concluded",
            ],
        ),
        ("resolver", &["max_environment_depth"]),
        ("assembly", &["sync_properties"]),
        ("clarification", &["required_parameters"]),
        ("alternatives", &["max"]),
    ];
    for (section, allowed) in sections {
        if let Some(serde_json::Value::Object(obj)) = root.get(section) {
            validate_object_keys(&mut unknown, obj, section, allowed);
        }
    }

    if unknown.is_empty() {
        Ok(())
    } else {
        Err(anyhow!("Unknown profile keys: {}", unknown.join(", ")))
    }
}
