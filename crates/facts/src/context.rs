use crate::types::ParameterSpec;
use crate::value::FactValue;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;

/// Resolved request parameters for one engine invocation.
///
/// Built by the caller from conversation state; the engine only reads it.
/// `null` values are dropped on deserialization so "unknown" and "absent"
/// mean the same thing.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct RequestContext {
    params: BTreeMap<String, FactValue>,
}

impl RequestContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert; blank values are ignored.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<FactValue>) -> Self {
        let value = value.into();
        if !value.is_blank() {
            self.params.insert(key.into(), value);
        }
        self
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&FactValue> {
        self.params.get(key).filter(|v| !v.is_blank())
    }

    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// True when `key` or any of `aliases` is resolved.
    #[must_use]
    pub fn contains_any<'a>(&self, key: &str, aliases: impl IntoIterator<Item = &'a String>) -> bool {
        self.contains(key) || aliases.into_iter().any(|alias| self.contains(alias))
    }

    /// Numeric value of `key`, `None` when absent or not coercible.
    #[must_use]
    pub fn number(&self, key: &str) -> Option<f64> {
        self.get(key).and_then(FactValue::to_number)
    }

    #[must_use]
    pub fn text(&self, key: &str) -> Option<String> {
        self.get(key).map(ToString::to_string)
    }

    #[must_use]
    pub fn flag(&self, key: &str) -> bool {
        self.get(key).is_some_and(FactValue::is_truthy)
    }

    /// Textual members of a list-like parameter (`["a","b"]` or `"a, b"`).
    #[must_use]
    pub fn members(&self, key: &str) -> Vec<String> {
        self.get(key).map(FactValue::members).unwrap_or_default()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &FactValue)> {
        self.params.iter().filter(|(_, v)| !v.is_blank())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.iter().count()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// New context where `defaults` fill keys this context leaves unresolved.
    #[must_use]
    pub fn with_defaults(&self, defaults: &BTreeMap<String, FactValue>) -> Self {
        let mut params = self.params.clone();
        for (key, value) in defaults {
            if !self.contains(key) && !value.is_blank() {
                params.insert(key.clone(), value.clone());
            }
        }
        Self { params }
    }

    /// New context where every declared parameter missing under its
    /// canonical key takes the value of its first present alias.
    #[must_use]
    pub fn with_aliases<'a>(&self, specs: impl IntoIterator<Item = &'a ParameterSpec>) -> Self {
        let mut params = self.params.clone();
        for spec in specs {
            if self.contains(&spec.key) {
                continue;
            }
            if let Some(value) = spec.aliases.iter().find_map(|alias| self.get(alias)) {
                params.insert(spec.key.clone(), value.clone());
            }
        }
        Self { params }
    }
}

impl<'de> Deserialize<'de> for RequestContext {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw: BTreeMap<String, Option<FactValue>> = BTreeMap::deserialize(deserializer)?;
        let params = raw
            .into_iter()
            .filter_map(|(key, value)| value.filter(|v| !v.is_blank()).map(|v| (key, v)))
            .collect();
        Ok(Self { params })
    }
}

impl FromIterator<(String, FactValue)> for RequestContext {
    fn from_iter<I: IntoIterator<Item = (String, FactValue)>>(iter: I) -> Self {
        iter.into_iter()
            .fold(Self::new(), |ctx, (key, value)| ctx.with(key, value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drops_null_and_blank_values() {
        let ctx: RequestContext =
            serde_json::from_str(r#"{"material": null, "width": "600", "notes": ""}"#).unwrap();
        assert!(!ctx.contains("material"));
        assert!(!ctx.contains("notes"));
        assert_eq!(ctx.number("width"), Some(600.0));
        assert_eq!(ctx.len(), 1);
    }

    #[test]
    fn aliases_count_as_resolved() {
        let ctx = RequestContext::new().with("duct_width", 600.0);
        let aliases = vec!["duct_width".to_string()];
        assert!(ctx.contains_any("width", &aliases));
        assert!(!ctx.contains_any("height", &Vec::new()));
    }

    #[test]
    fn defaults_never_override_resolved_values() {
        let ctx = RequestContext::new().with("housing", "standard");
        let mut defaults = BTreeMap::new();
        defaults.insert("housing".to_string(), FactValue::text("insulated"));
        defaults.insert("door_side".to_string(), FactValue::text("left"));
        let merged = ctx.with_defaults(&defaults);
        assert_eq!(merged.text("housing").as_deref(), Some("standard"));
        assert_eq!(merged.text("door_side").as_deref(), Some("left"));
    }

    #[test]
    fn aliases_fill_missing_canonical_keys() {
        let spec = ParameterSpec {
            key: "throughput".to_string(),
            aliases: vec!["airflow".to_string(), "flow".to_string()],
            ..ParameterSpec::default()
        };
        let ctx = RequestContext::new().with("flow", 900.0).with("airflow", "1_500");
        let canonical = ctx.with_aliases([&spec]);
        assert_eq!(canonical.number("throughput"), Some(1500.0));
        assert!(canonical.contains("airflow"));

        let explicit = ctx.with("throughput", 2000.0).with_aliases([&spec]);
        assert_eq!(explicit.number("throughput"), Some(2000.0));
    }

    #[test]
    fn members_split_text_lists() {
        let ctx = RequestContext::new().with("accessories", "rain_hood, silencer");
        assert_eq!(ctx.members("accessories"), vec!["rain_hood", "silencer"]);
    }
}
