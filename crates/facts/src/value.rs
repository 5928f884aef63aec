use serde::{Deserialize, Serialize};
use std::fmt;

const NUMERIC_EPSILON: f64 = 1e-9;

/// Loosely typed value carried by facts and request parameters.
///
/// Text that looks like a number is coerced at comparison time, so `"1300"`
/// and `1300` compare equal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FactValue {
    Bool(bool),
    Number(f64),
    Text(String),
    List(Vec<FactValue>),
}

impl FactValue {
    pub fn text(value: impl Into<String>) -> Self {
        Self::Text(value.into())
    }

    /// Numeric view of the value. Text is trimmed and `_` separators are
    /// dropped before parsing; booleans and lists never coerce.
    #[must_use]
    pub fn to_number(&self) -> Option<f64> {
        match self {
            Self::Number(n) if n.is_finite() => Some(*n),
            Self::Text(s) => {
                let cleaned: String = s.trim().chars().filter(|c| *c != '_').collect();
                cleaned.parse::<f64>().ok().filter(|n| n.is_finite())
            }
            _ => None,
        }
    }

    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s.as_str()),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_truthy(&self) -> bool {
        match self {
            Self::Bool(b) => *b,
            Self::Number(n) => n.abs() > NUMERIC_EPSILON,
            Self::Text(s) => matches!(
                s.trim().to_ascii_lowercase().as_str(),
                "true" | "yes" | "y" | "1" | "on"
            ),
            Self::List(items) => !items.is_empty(),
        }
    }

    /// Empty text and empty lists count as "not provided".
    #[must_use]
    pub fn is_blank(&self) -> bool {
        match self {
            Self::Text(s) => s.trim().is_empty(),
            Self::List(items) => items.is_empty(),
            _ => false,
        }
    }

    /// Flattens the value into its textual members.
    #[must_use]
    pub fn members(&self) -> Vec<String> {
        match self {
            Self::List(items) => items.iter().flat_map(Self::members).collect(),
            Self::Text(s) => s
                .split(',')
                .map(str::trim)
                .filter(|part| !part.is_empty())
                .map(str::to_string)
                .collect(),
            other => vec![other.to_string()],
        }
    }

    /// Equality with numeric coercion on both sides.
    #[must_use]
    pub fn loosely_equals(&self, other: &Self) -> bool {
        if let (Some(a), Some(b)) = (self.to_number(), other.to_number()) {
            return (a - b).abs() <= NUMERIC_EPSILON;
        }
        match (self, other) {
            (Self::List(a), Self::List(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.loosely_equals(y))
            }
            _ => self.to_string().trim() == other.to_string().trim(),
        }
    }
}

impl fmt::Display for FactValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{b}"),
            Self::Number(n) => {
                if n.fract() == 0.0 && n.abs() < 1e15 {
                    write!(f, "{}", *n as i64)
                } else {
                    write!(f, "{n}")
                }
            }
            Self::Text(s) => f.write_str(s),
            Self::List(items) => {
                let parts: Vec<String> = items.iter().map(ToString::to_string).collect();
                write!(f, "[{}]", parts.join(", "))
            }
        }
    }
}

impl From<f64> for FactValue {
    fn from(value: f64) -> Self {
        Self::Number(value)
    }
}

impl From<i64> for FactValue {
    fn from(value: i64) -> Self {
        Self::Number(value as f64)
    }
}

impl From<bool> for FactValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<&str> for FactValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for FactValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

/// Comparison operator used by thresholds and property requirements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operator {
    #[serde(rename = ">=", alias = "ge", alias = "gte")]
    Ge,
    #[serde(rename = "<=", alias = "le", alias = "lte")]
    Le,
    #[serde(rename = "=", alias = "==", alias = "eq")]
    Eq,
    #[serde(rename = "!=", alias = "ne")]
    Ne,
    #[serde(rename = "<", alias = "lt")]
    Lt,
    #[serde(rename = ">", alias = "gt")]
    Gt,
    #[serde(rename = "in")]
    In,
    #[serde(rename = "not_in", alias = "not in")]
    NotIn,
}

/// Outcome of applying an [`Operator`].
#[derive(Debug, Clone, PartialEq)]
pub enum Comparison {
    Holds,
    Fails,
    Undetermined(String),
}

impl Operator {
    #[must_use]
    pub const fn symbol(self) -> &'static str {
        match self {
            Self::Ge => ">=",
            Self::Le => "<=",
            Self::Eq => "=",
            Self::Ne => "!=",
            Self::Lt => "<",
            Self::Gt => ">",
            Self::In => "in",
            Self::NotIn => "not in",
        }
    }

    /// Applies `actual <op> threshold`.
    ///
    /// Ordering operators coerce both sides to numbers; a side that does not
    /// coerce makes the comparison undetermined instead of silently false.
    #[must_use]
    pub fn compare(self, actual: &FactValue, threshold: &FactValue) -> Comparison {
        match self {
            Self::Ge | Self::Le | Self::Lt | Self::Gt => {
                let Some(a) = actual.to_number() else {
                    return Comparison::Undetermined(format!("'{actual}' is not numeric"));
                };
                let Some(t) = threshold.to_number() else {
                    return Comparison::Undetermined(format!("threshold '{threshold}' is not numeric"));
                };
                let holds = match self {
                    Self::Ge => a + NUMERIC_EPSILON >= t,
                    Self::Le => a <= t + NUMERIC_EPSILON,
                    Self::Lt => a < t - NUMERIC_EPSILON,
                    _ => a > t + NUMERIC_EPSILON,
                };
                Comparison::from(holds)
            }
            Self::Eq => Comparison::from(actual.loosely_equals(threshold)),
            Self::Ne => Comparison::from(!actual.loosely_equals(threshold)),
            Self::In | Self::NotIn => {
                let member = match threshold {
                    FactValue::List(items) => items.iter().any(|item| item.loosely_equals(actual)),
                    single => single.loosely_equals(actual),
                };
                Comparison::from(member == matches!(self, Self::In))
            }
        }
    }
}

impl From<bool> for Comparison {
    fn from(holds: bool) -> Self {
        if holds {
            Self::Holds
        } else {
            Self::Fails
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coerces_numeric_text() {
        assert_eq!(FactValue::text(" 1_300 ").to_number(), Some(1300.0));
        assert_eq!(FactValue::text("wide").to_number(), None);
        assert_eq!(FactValue::Bool(true).to_number(), None);
    }

    #[test]
    fn ordering_operators_coerce_text() {
        let actual = FactValue::text("2");
        let threshold = FactValue::Number(3.0);
        assert_eq!(Operator::Lt.compare(&actual, &threshold), Comparison::Holds);
        assert_eq!(Operator::Ge.compare(&actual, &threshold), Comparison::Fails);
    }

    #[test]
    fn non_numeric_ordering_is_undetermined() {
        let outcome = Operator::Ge.compare(&FactValue::text("C4"), &FactValue::Number(3.0));
        assert!(matches!(outcome, Comparison::Undetermined(_)));
    }

    #[test]
    fn membership_uses_loose_equality() {
        let allowed = FactValue::List(vec![FactValue::Number(600.0), FactValue::text("900")]);
        assert_eq!(Operator::In.compare(&FactValue::text("600"), &allowed), Comparison::Holds);
        assert_eq!(Operator::NotIn.compare(&FactValue::Number(900.0), &allowed), Comparison::Fails);
    }

    #[test]
    fn integral_numbers_display_without_fraction() {
        assert_eq!(FactValue::Number(600.0).to_string(), "600");
        assert_eq!(FactValue::Number(1.5).to_string(), "1.5");
    }

    #[test]
    fn operator_deserializes_from_symbol_and_alias() {
        let op: Operator = serde_json::from_str("\">=\"").unwrap();
        assert_eq!(op, Operator::Ge);
        let op: Operator = serde_json::from_str("\"not_in\"").unwrap();
        assert_eq!(op, Operator::NotIn);
    }
}
