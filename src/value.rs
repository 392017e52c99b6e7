//! Raw option values and function scrubbing.
//!
//! The module evaluator exports `default`, `example` and `type` as arbitrary
//! value trees. Most of the tree is plain data, but some leaves are functions,
//! which have no serialized form. The evaluator marks those leaves as
//! `{"_type": "function"}` objects:
//!
//! ```json
//! { "hook": { "_type": "function", "name": "mkHook" }, "retries": 3 }
//! ```
//!
//! [`RawValue`] is the closed set of node kinds the normalizer understands:
//! scalars, ordered sequences, keyed mappings and functions. [`RawValue::scrub`]
//! is the one tree walk that turns it into plain JSON, replacing every function
//! with [`FUNCTION_MARKER`]. Every value kind that needs the substitution goes
//! through it.

use serde::Deserialize;
use serde_json::{Map, Number, Value};
use std::collections::BTreeMap;

/// Literal written in place of a function value.
pub const FUNCTION_MARKER: &str = "<function>";

/// `_type` tag the evaluator uses for function leaves.
const FUNCTION_TYPE_TAG: &str = "function";

/// A value as exported by the module evaluator.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(from = "serde_json::Value")]
pub enum RawValue {
    Null,
    Bool(bool),
    Number(Number),
    String(String),
    List(Vec<RawValue>),
    Map(BTreeMap<String, RawValue>),
    /// A function leaf. `name` is informational only and never serialized.
    Function { name: Option<String> },
}

impl RawValue {
    /// Convert to plain JSON, replacing every function leaf with [`FUNCTION_MARKER`].
    ///
    /// Mappings and sequences are rebuilt structurally; scalars are copied.
    pub fn scrub(&self) -> Value {
        match self {
            RawValue::Null => Value::Null,
            RawValue::Bool(b) => Value::Bool(*b),
            RawValue::Number(n) => Value::Number(n.clone()),
            RawValue::String(s) => Value::String(s.clone()),
            RawValue::List(items) => Value::Array(items.iter().map(RawValue::scrub).collect()),
            RawValue::Map(entries) => Value::Object(
                entries
                    .iter()
                    .map(|(k, v)| (k.clone(), v.scrub()))
                    .collect::<Map<String, Value>>(),
            ),
            RawValue::Function { .. } => Value::String(FUNCTION_MARKER.to_string()),
        }
    }

    /// True if this value or anything below it is a function.
    pub fn contains_function(&self) -> bool {
        match self {
            RawValue::Function { .. } => true,
            RawValue::List(items) => items.iter().any(RawValue::contains_function),
            RawValue::Map(entries) => entries.values().any(RawValue::contains_function),
            _ => false,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            RawValue::String(s) => Some(s),
            _ => None,
        }
    }
}

impl From<Value> for RawValue {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => RawValue::Null,
            Value::Bool(b) => RawValue::Bool(b),
            Value::Number(n) => RawValue::Number(n),
            Value::String(s) => RawValue::String(s),
            Value::Array(items) => RawValue::List(items.into_iter().map(RawValue::from).collect()),
            Value::Object(mut entries) => {
                if entries.get("_type").and_then(Value::as_str) == Some(FUNCTION_TYPE_TAG) {
                    let name = match entries.remove("name") {
                        Some(Value::String(name)) => Some(name),
                        _ => None,
                    };
                    return RawValue::Function { name };
                }
                RawValue::Map(
                    entries
                        .into_iter()
                        .map(|(k, v)| (k, RawValue::from(v)))
                        .collect(),
                )
            }
        }
    }
}

impl From<&str> for RawValue {
    fn from(s: &str) -> Self {
        RawValue::String(s.to_string())
    }
}

impl From<bool> for RawValue {
    fn from(b: bool) -> Self {
        RawValue::Bool(b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn raw(value: Value) -> RawValue {
        RawValue::from(value)
    }

    #[test]
    fn scalars_pass_through() {
        assert_eq!(raw(json!(false)).scrub(), json!(false));
        assert_eq!(raw(json!(42)).scrub(), json!(42));
        assert_eq!(raw(json!("text")).scrub(), json!("text"));
        assert_eq!(raw(Value::Null).scrub(), Value::Null);
    }

    #[test]
    fn top_level_function_becomes_marker() {
        let value = raw(json!({ "_type": "function" }));
        assert!(matches!(value, RawValue::Function { name: None }));
        assert_eq!(value.scrub(), json!("<function>"));
    }

    #[test]
    fn function_name_is_kept_but_not_serialized() {
        let value = raw(json!({ "_type": "function", "name": "mkHook" }));
        assert_eq!(
            value,
            RawValue::Function {
                name: Some("mkHook".to_string())
            }
        );
        assert_eq!(value.scrub(), json!("<function>"));
    }

    #[test]
    fn nested_functions_are_replaced_structurally() {
        let value = raw(json!({
            "hooks": [1, { "_type": "function" }, { "inner": { "_type": "function" } }],
            "retries": 3
        }));
        assert_eq!(
            value.scrub(),
            json!({
                "hooks": [1, "<function>", { "inner": "<function>" }],
                "retries": 3
            })
        );
    }

    #[test]
    fn other_type_tags_stay_mappings() {
        let value = raw(json!({ "_type": "literalExpression", "text": "pkgs.hello" }));
        assert!(matches!(value, RawValue::Map(_)));
        assert!(!value.contains_function());
        assert_eq!(
            value.scrub(),
            json!({ "_type": "literalExpression", "text": "pkgs.hello" })
        );
    }

    #[test]
    fn contains_function_looks_through_containers() {
        assert!(raw(json!([[{ "_type": "function" }]])).contains_function());
        assert!(!raw(json!([[1, 2], { "a": "b" }])).contains_function());
    }

    #[test]
    fn deserializes_from_json_text() {
        let value: RawValue = serde_json::from_str(r#"{"f": {"_type": "function"}}"#).unwrap();
        assert_eq!(value.scrub().to_string(), r#"{"f":"<function>"}"#);
    }
}
