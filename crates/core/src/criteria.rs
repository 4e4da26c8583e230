//! Structured target criteria. Pure logic, no database access.
//!
//! A notification's `target_criteria` column is a JSON object mapping a user
//! attribute name to a constraint:
//!
//! | JSON shape                         | Constraint              |
//! |------------------------------------|-------------------------|
//! | `"sedan"`, `3`, `true`             | exact match             |
//! | `{"eq": "sedan"}`                  | exact match             |
//! | `["sedan", "suv"]`                 | one of the listed values|
//! | `{"in": ["sedan", "suv"]}`         | one of the listed values|
//! | `{"min": 18}`, `{"min": 2, "max": 4}` | inclusive numeric range |
//!
//! Anything else is malformed. Matching is fail-closed: a user missing a
//! constrained attribute never matches.

use serde_json::{Map, Value};

use crate::error::CoreError;

/// A single per-attribute constraint.
#[derive(Debug, Clone, PartialEq)]
pub enum Constraint {
    Exact(Value),
    OneOf(Vec<Value>),
    Range { min: Option<f64>, max: Option<f64> },
}

impl Constraint {
    /// Parse one constraint value.
    fn parse(field: &str, raw: &Value) -> Result<Self, CoreError> {
        match raw {
            Value::Null => Err(malformed(field, "null is not a constraint")),
            Value::Bool(_) | Value::Number(_) | Value::String(_) => Ok(Constraint::Exact(raw.clone())),
            Value::Array(items) => parse_list(field, items),
            Value::Object(obj) => parse_object(field, obj),
        }
    }

    /// Check a user attribute against this constraint.
    ///
    /// When the attribute itself is a list (e.g. a set of tags), the
    /// constraint is satisfied if any element satisfies it.
    pub fn is_satisfied_by(&self, attribute: &Value) -> bool {
        match attribute {
            Value::Null => false,
            Value::Array(items) => items.iter().any(|item| self.check_scalar(item)),
            scalar => self.check_scalar(scalar),
        }
    }

    fn check_scalar(&self, value: &Value) -> bool {
        match self {
            Constraint::Exact(expected) => values_equal(expected, value),
            Constraint::OneOf(options) => options.iter().any(|o| values_equal(o, value)),
            Constraint::Range { min, max } => match value.as_f64() {
                Some(n) => min.map_or(true, |m| n >= m) && max.map_or(true, |m| n <= m),
                None => false,
            },
        }
    }
}

/// Parsed `target_criteria` for a notification.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TargetCriteria {
    constraints: Vec<(String, Constraint)>,
}

impl TargetCriteria {
    /// Parse the stored JSON. `null` and `{}` both mean "no criteria".
    pub fn parse(raw: &Value) -> Result<Self, CoreError> {
        let obj = match raw {
            Value::Null => return Ok(Self::default()),
            Value::Object(obj) => obj,
            other => {
                return Err(CoreError::MalformedCriteria(format!(
                    "criteria must be an object, got {}",
                    json_kind(other)
                )))
            }
        };

        let constraints = obj
            .iter()
            .map(|(field, value)| Ok((field.clone(), Constraint::parse(field, value)?)))
            .collect::<Result<Vec<_>, CoreError>>()?;

        Ok(Self { constraints })
    }

    pub fn is_empty(&self) -> bool {
        self.constraints.is_empty()
    }

    pub fn len(&self) -> usize {
        self.constraints.len()
    }

    /// All constraints must hold; missing attributes fail the match.
    pub fn matches(&self, attributes: &Map<String, Value>) -> bool {
        self.constraints.iter().all(|(field, constraint)| {
            attributes
                .get(field)
                .is_some_and(|attr| constraint.is_satisfied_by(attr))
        })
    }
}

fn parse_list(field: &str, items: &[Value]) -> Result<Constraint, CoreError> {
    if items.is_empty() {
        return Err(malformed(field, "list constraint is empty"));
    }
    if items.iter().any(|v| v.is_array() || v.is_object() || v.is_null()) {
        return Err(malformed(field, "list constraint must contain only scalars"));
    }
    Ok(Constraint::OneOf(items.to_vec()))
}

fn parse_object(field: &str, obj: &Map<String, Value>) -> Result<Constraint, CoreError> {
    if let Some(unknown) = obj.keys().find(|k| !matches!(k.as_str(), "eq" | "in" | "min" | "max")) {
        return Err(malformed(field, &format!("unknown operator '{unknown}'")));
    }

    match (obj.get("eq"), obj.get("in")) {
        (Some(_), Some(_)) => return Err(malformed(field, "'eq' and 'in' are exclusive")),
        (Some(eq), None) if obj.len() == 1 => {
            return match eq {
                Value::Bool(_) | Value::Number(_) | Value::String(_) => {
                    Ok(Constraint::Exact(eq.clone()))
                }
                _ => Err(malformed(field, "'eq' must be a scalar")),
            }
        }
        (None, Some(Value::Array(items))) if obj.len() == 1 => return parse_list(field, items),
        (None, Some(_)) if obj.len() == 1 => return Err(malformed(field, "'in' must be a list")),
        (Some(_), None) | (None, Some(_)) => {
            return Err(malformed(field, "'eq'/'in' cannot be combined with a range"))
        }
        (None, None) => {}
    }

    let bound = |key: &str| -> Result<Option<f64>, CoreError> {
        match obj.get(key) {
            None => Ok(None),
            Some(v) => v
                .as_f64()
                .map(Some)
                .ok_or_else(|| malformed(field, &format!("'{key}' must be numeric"))),
        }
    };
    let min = bound("min")?;
    let max = bound("max")?;

    match (min, max) {
        (None, None) => Err(malformed(field, "empty constraint object")),
        (Some(lo), Some(hi)) if lo > hi => Err(malformed(field, "'min' is greater than 'max'")),
        _ => Ok(Constraint::Range { min, max }),
    }
}

/// Numeric values compare by value so `1` matches `1.0`.
fn values_equal(a: &Value, b: &Value) -> bool {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => x == y,
        _ => a == b,
    }
}

fn malformed(field: &str, reason: &str) -> CoreError {
    CoreError::MalformedCriteria(format!("{field}: {reason}"))
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use serde_json::json;

    fn attrs(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn null_and_empty_object_mean_no_criteria() {
        assert!(TargetCriteria::parse(&Value::Null).unwrap().is_empty());
        assert!(TargetCriteria::parse(&json!({})).unwrap().is_empty());
        assert!(TargetCriteria::default().matches(&Map::new()));
    }

    #[test]
    fn exact_match_on_scalar_and_eq() {
        let c = TargetCriteria::parse(&json!({"vehicle_type": "sedan", "seats": {"eq": 5}})).unwrap();
        assert_eq!(c.len(), 2);
        assert!(c.matches(&attrs(json!({"vehicle_type": "sedan", "seats": 5.0}))));
        assert!(!c.matches(&attrs(json!({"vehicle_type": "suv", "seats": 5}))));
    }

    #[test]
    fn one_of_list_and_in() {
        let c = TargetCriteria::parse(&json!({"city": ["Paris", "Lyon"]})).unwrap();
        assert!(c.matches(&attrs(json!({"city": "Lyon"}))));
        assert!(!c.matches(&attrs(json!({"city": "Nice"}))));

        let c = TargetCriteria::parse(&json!({"tier": {"in": [1, 2]}})).unwrap();
        assert!(c.matches(&attrs(json!({"tier": 2}))));
    }

    #[test]
    fn numeric_range_is_inclusive() {
        let c = TargetCriteria::parse(&json!({"age": {"min": 21, "max": 30}})).unwrap();
        assert!(c.matches(&attrs(json!({"age": 21}))));
        assert!(c.matches(&attrs(json!({"age": 30}))));
        assert!(!c.matches(&attrs(json!({"age": 31}))));
        assert!(!c.matches(&attrs(json!({"age": "twenty"}))));

        let open = TargetCriteria::parse(&json!({"rentals": {"min": 3}})).unwrap();
        assert!(open.matches(&attrs(json!({"rentals": 100}))));
    }

    #[test]
    fn missing_or_null_attribute_fails_closed() {
        let c = TargetCriteria::parse(&json!({"vehicle_type": "sedan"})).unwrap();
        assert!(!c.matches(&Map::new()));
        assert!(!c.matches(&attrs(json!({"vehicle_type": null}))));
    }

    #[test]
    fn list_attribute_matches_any_element() {
        let c = TargetCriteria::parse(&json!({"interests": "electric"})).unwrap();
        assert!(c.matches(&attrs(json!({"interests": ["luxury", "electric"]}))));
        assert!(!c.matches(&attrs(json!({"interests": []}))));
    }

    #[test]
    fn malformed_shapes_are_rejected() {
        let cases = [
            json!([1, 2]),
            json!("sedan"),
            json!({"a": null}),
            json!({"a": []}),
            json!({"a": [[1]]}),
            json!({"a": {}}),
            json!({"a": {"between": [1, 2]}}),
            json!({"a": {"min": "low"}}),
            json!({"a": {"min": 5, "max": 1}}),
            json!({"a": {"eq": 1, "in": [1]}}),
            json!({"a": {"in": 3}}),
            json!({"a": {"eq": 1, "min": 0}}),
        ];
        for raw in cases {
            assert_matches!(
                TargetCriteria::parse(&raw),
                Err(CoreError::MalformedCriteria(_)),
                "expected {} to be rejected",
                raw
            );
        }
    }
}
