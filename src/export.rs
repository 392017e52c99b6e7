//! Canonical JSON export of a normalized option list.
//!
//! The export is an object keyed by dotted option path. Each value is the
//! option record without its `loc`:
//!
//! ```json
//! {
//!   "services.foo.enable": {
//!     "type": "boolean",
//!     "default": false,
//!     "description": "<para>Enable foo.</para>",
//!     "declarations": [
//!       { "path": "modules/services/foo.nix", "url": "…", "channelPath": "…" }
//!     ]
//!   }
//! }
//! ```
//!
//! Keys are sorted, so the same list always exports to the same bytes.

use crate::types::{Declaration, OptionDoc, PackageRef, SchemaError};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExportError {
    #[error(transparent)]
    Schema(#[from] SchemaError),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// An option record as it appears in the export.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportedOption<'a> {
    #[serde(rename = "type")]
    pub option_type: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<&'a Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub example: Option<&'a Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<&'a str>,
    pub declarations: &'a [Declaration],
    #[serde(skip_serializing_if = "Option::is_none")]
    pub related_packages: Option<&'a [PackageRef]>,
}

impl<'a> From<&'a OptionDoc> for ExportedOption<'a> {
    fn from(option: &'a OptionDoc) -> Self {
        Self {
            option_type: &option.option_type,
            default: option.default.as_ref(),
            example: option.example.as_ref(),
            description: option.description.as_deref(),
            declarations: &option.declarations,
            related_packages: option.related_packages.as_deref(),
        }
    }
}

/// Key the list by dotted path.
///
/// Fails when two records produce the same key, which happens when a segment
/// itself contains a dot (`["a.b"]` and `["a", "b"]`).
pub fn export(options: &[OptionDoc]) -> Result<BTreeMap<String, ExportedOption<'_>>, SchemaError> {
    let mut exported = BTreeMap::new();
    let mut owners: BTreeMap<String, &[String]> = BTreeMap::new();

    for option in options {
        let key = option.name();
        if let Some(first) = owners.insert(key.clone(), &option.loc) {
            return Err(SchemaError::DuplicateKey {
                key,
                first: first.to_vec(),
                second: option.loc.clone(),
            });
        }
        exported.insert(key, ExportedOption::from(option));
    }
    Ok(exported)
}

/// Export as pretty-printed JSON text with a trailing newline.
pub fn to_json(options: &[OptionDoc]) -> Result<String, ExportError> {
    let exported = export(options)?;
    let mut json = serde_json::to_string_pretty(&exported)?;
    json.push('\n');
    Ok(json)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::*;
    use serde_json::json;

    #[test]
    fn keys_are_dotted_paths_without_loc() {
        let options = vec![option_doc(&["services", "foo", "enable"], "boolean")];
        let exported = export(&options).unwrap();
        assert_eq!(exported.len(), 1);
        let value = serde_json::to_value(&exported).unwrap();
        assert_eq!(
            value,
            json!({
                "services.foo.enable": {
                    "type": "boolean",
                    "declarations": []
                }
            })
        );
    }

    #[test]
    fn key_set_matches_input_cardinality() {
        let options = vec![
            option_doc(&["a", "enable"], "boolean"),
            option_doc(&["a", "package"], "package"),
            option_doc(&["a", "port"], "int"),
        ];
        assert_eq!(export(&options).unwrap().len(), options.len());
    }

    #[test]
    fn dotted_segment_collision_is_a_schema_error() {
        let options = vec![option_doc(&["a.b"], "int"), option_doc(&["a", "b"], "int")];
        let err = export(&options).unwrap_err();
        assert_eq!(
            err,
            SchemaError::DuplicateKey {
                key: "a.b".to_string(),
                first: vec!["a.b".to_string()],
                second: vec!["a".to_string(), "b".to_string()],
            }
        );
    }

    #[test]
    fn function_default_exports_as_marker() {
        let mut option = option_doc(&["a", "hook"], "function");
        option.default = Some(json!("<function>"));
        let json = to_json(&[option]).unwrap();
        assert!(json.contains(r#""default": "<function>""#));
    }

    #[test]
    fn output_is_deterministic_and_keeps_unicode() {
        let mut option = option_doc(&["a"], "string");
        option.description = Some("Grüße".to_string());
        let first = to_json(std::slice::from_ref(&option)).unwrap();
        let second = to_json(&[option]).unwrap();
        assert_eq!(first, second);
        assert!(first.contains("Grüße"));
        assert!(first.ends_with("}\n"));
    }

    #[test]
    fn internal_flags_never_appear() {
        let json = to_json(&[option_doc(&["a"], "int")]).unwrap();
        assert!(!json.contains("loc"));
        assert!(!json.contains("visible"));
        assert!(!json.contains("internal"));
    }
}
