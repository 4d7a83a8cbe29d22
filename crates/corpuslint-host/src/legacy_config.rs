// Copyright (C) corpuslint contributors
// SPDX-License-Identifier: Apache-2.0

// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// 	http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Legacy-to-modern analyzer config conversion (supplemented, SPEC_FULL.md §2B): a pure
//! transformation with no IO of its own, so both the CLI's `convert-config` subcommand and unit
//! tests can drive it directly, matching the "interfaces only" framing this collaborator is given
//! in spec §1.

use serde_json::{json, Map, Value};

#[derive(Debug, thiserror::Error)]
pub enum ConversionError {
    #[error("legacy config is not a JSON object")]
    NotAnObject,
    #[error("legacy config's \"rules\" field is missing or not an array of rule-name strings")]
    InvalidRules,
    #[error("legacy config's \"ignore\" field is present but not an array of glob-pattern strings")]
    InvalidIgnore,
    #[error("malformed legacy config JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Converts a legacy analyzer config document, `{"rules": ["no-unused-vars", ...], "ignore":
/// [...]}`, to the modern shape the worker's `ProcessAnalyzer` passes via `--config`:
/// `{"version": 2, "rules": {"no-unused-vars": "error", ...}, "exclude": [...]}`. Every legacy
/// rule is enabled at `"error"` severity; the modern format has no equivalent of a bare rule list.
pub fn convert_legacy_config(legacy_text: &str) -> Result<String, ConversionError> {
    let legacy: Value = serde_json::from_str(legacy_text)?;
    let obj = legacy.as_object().ok_or(ConversionError::NotAnObject)?;

    let rules = obj.get("rules").and_then(Value::as_array).ok_or(ConversionError::InvalidRules)?;
    let mut modern_rules = Map::new();
    for rule in rules {
        let name = rule.as_str().ok_or(ConversionError::InvalidRules)?;
        modern_rules.insert(name.to_string(), json!("error"));
    }

    let exclude: Vec<String> = match obj.get("ignore") {
        None => Vec::new(),
        Some(Value::Array(items)) => items
            .iter()
            .map(|v| v.as_str().map(str::to_string).ok_or(ConversionError::InvalidIgnore))
            .collect::<Result<_, _>>()?,
        Some(_) => return Err(ConversionError::InvalidIgnore),
    };

    let modern = json!({
        "version": 2,
        "rules": modern_rules,
        "exclude": exclude,
    });
    Ok(serde_json::to_string_pretty(&modern)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn converts_rules_and_ignore_into_the_modern_shape() {
        let legacy = r#"{"rules": ["no-unused-vars", "no-console"], "ignore": ["dist/**"]}"#;
        let modern_text = convert_legacy_config(legacy).unwrap();
        let modern: Value = serde_json::from_str(&modern_text).unwrap();

        assert_eq!(modern["version"], 2);
        assert_eq!(modern["rules"]["no-unused-vars"], "error");
        assert_eq!(modern["rules"]["no-console"], "error");
        assert_eq!(modern["exclude"], json!(["dist/**"]));
    }

    #[test]
    fn ignore_is_optional() {
        let legacy = r#"{"rules": ["no-console"]}"#;
        let modern_text = convert_legacy_config(legacy).unwrap();
        let modern: Value = serde_json::from_str(&modern_text).unwrap();
        assert_eq!(modern["exclude"], json!([]));
    }

    #[test]
    fn rejects_a_non_object_document() {
        let err = convert_legacy_config("[1, 2, 3]").unwrap_err();
        assert!(matches!(err, ConversionError::NotAnObject));
    }

    #[test]
    fn rejects_a_missing_rules_field() {
        let err = convert_legacy_config(r#"{"ignore": []}"#).unwrap_err();
        assert!(matches!(err, ConversionError::InvalidRules));
    }

    #[test]
    fn rejects_malformed_json() {
        let err = convert_legacy_config("not json").unwrap_err();
        assert!(matches!(err, ConversionError::Json(_)));
    }
}
