//! Self-consistency checks over profile definitions.
//!
//! These scans look at a StructureDefinition itself, not at instances:
//!
//! - [`check_value_types`] - fixed/pattern/example/minValue/maxValue values must
//!   be of a type the element allows
//! - [`check_duplicate_invariant_keys`] - invariant keys declared by a profile
//!   must be unique per element path
//!
//! Both are shallow and stateless; neither follows references.

use std::collections::{BTreeSet, HashMap};

use crate::outcome::{Issue, IssueCode, OutcomeReport};
use crate::types::{ElementDefinition, StructureDefinition, TypedValue, type_code_from_suffix};

const VALUE_PREFIXES: [&str; 4] = ["fixed", "pattern", "minValue", "maxValue"];

/// Report values whose `[x]` type is not among the element's declared types.
pub fn check_value_types(definition: &StructureDefinition) -> OutcomeReport {
    let mut issues = Vec::new();
    for element in definition.elements() {
        // Without declared types there is nothing to compare against
        if element.types().is_empty() {
            continue;
        }
        for (property, typed) in typed_values(element) {
            if !allows_type(element, typed.type_code) {
                issues.push(Issue::error(
                    IssueCode::IncompatibleValueType,
                    format!(
                        "{property} has type {}, allowed types are {}",
                        typed.type_code,
                        declared_types(element)
                    ),
                    element.element_id(),
                ));
            }
        }
    }
    OutcomeReport::from_issues(issues, false)
}

/// Report invariant keys the profile declares at more than one element path.
///
/// Only constraints without a `source`, or whose source is the profile itself,
/// are considered. The same path repeated through slicing is a single path.
pub fn check_duplicate_invariant_keys(definition: &StructureDefinition) -> OutcomeReport {
    let mut paths_by_key: HashMap<&str, BTreeSet<&str>> = HashMap::new();
    let mut first_seen: Vec<&str> = Vec::new();

    for element in definition.elements() {
        for constraint in element.constraints() {
            let own = constraint
                .source
                .as_deref()
                .is_none_or(|source| source == definition.url);
            if !own {
                continue;
            }
            let paths = paths_by_key.entry(constraint.key.as_str()).or_default();
            if paths.is_empty() {
                first_seen.push(constraint.key.as_str());
            }
            paths.insert(element.path.as_str());
        }
    }

    let issues = first_seen.into_iter().filter_map(|key| {
        let paths = paths_by_key.get(key)?;
        if paths.len() < 2 {
            return None;
        }
        let paths: Vec<&str> = paths.iter().copied().collect();
        Some(Issue::error(
            IssueCode::DuplicateInvariantKey,
            format!("invariant key '{key}' is declared at {}", paths.join(", ")),
            definition.url.as_str(),
        ))
    });
    OutcomeReport::from_issues(issues, false)
}

/// Every `[x]`-typed value of an element, including example values.
fn typed_values(element: &ElementDefinition) -> Vec<(String, TypedValue<'_>)> {
    let mut values: Vec<(String, TypedValue<'_>)> = VALUE_PREFIXES
        .iter()
        .filter_map(|prefix| {
            let typed = element.typed_value(prefix)?;
            Some((format!("{prefix}[x]"), typed))
        })
        .collect();

    for (index, example) in element.example.iter().flatten().enumerate() {
        let Some(object) = example.as_object() else {
            continue;
        };
        for (key, value) in object {
            let Some(suffix) = key.strip_prefix("value") else {
                continue;
            };
            if suffix.starts_with(|c: char| c.is_ascii_uppercase()) {
                values.push((
                    format!("example[{index}].value[x]"),
                    TypedValue {
                        type_code: type_code_from_suffix(suffix),
                        value,
                    },
                ));
            }
        }
    }
    values
}

fn allows_type(element: &ElementDefinition, type_code: &str) -> bool {
    element.types().iter().any(|t| {
        t.code == type_code
            || (t.is_system_type() && t.code.ends_with(&format!(".{}", capitalize(type_code))))
    })
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
        None => String::new(),
    }
}

fn declared_types(element: &ElementDefinition) -> String {
    element
        .types()
        .iter()
        .map(|t| t.code.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Constraint, TypeRef};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    const URL: &str = "http://example.org/StructureDefinition/profile";

    fn typed(path: &str, codes: &[&str]) -> ElementDefinition {
        ElementDefinition {
            type_info: Some(codes.iter().map(|c| TypeRef::new(*c)).collect()),
            ..ElementDefinition::new(path)
        }
    }

    fn with_constraint(mut element: ElementDefinition, key: &str, source: Option<&str>) -> ElementDefinition {
        element.constraint.get_or_insert_with(Vec::new).push(Constraint {
            key: key.to_string(),
            requirements: None,
            severity: "error".to_string(),
            human: "must hold".to_string(),
            expression: Some("true".to_string()),
            source: source.map(str::to_string),
        });
        element
    }

    #[test]
    fn test_value_type_mismatch_is_flagged() {
        let mut status = typed("Observation.status", &["code"]);
        status
            .value_fields
            .insert("fixedString".to_string(), json!("final"));
        let mut value = typed("Observation.value[x]", &["Quantity", "string"]);
        value.value_fields.insert(
            "minValueQuantity".to_string(),
            json!({"value": 1, "unit": "mg"}),
        );
        value.example = Some(vec![json!({"label": "bad", "valueInteger": 3})]);

        let definition = StructureDefinition::new(
            URL,
            "Observation",
            vec![ElementDefinition::new("Observation"), status, value],
        );
        let report = check_value_types(&definition);

        assert!(!report.success);
        let locations: Vec<&str> = report.issues.iter().map(|i| i.location.as_str()).collect();
        assert_eq!(locations, vec!["Observation.status", "Observation.value[x]"]);
        assert!(report.issues[1].message.starts_with("example[0].value[x] has type integer"));
    }

    #[test]
    fn test_matching_value_types_pass() {
        let mut status = typed("Observation.status", &["code"]);
        status.value_fields.insert("fixedCode".to_string(), json!("final"));
        let definition = StructureDefinition::new(
            URL,
            "Observation",
            vec![ElementDefinition::new("Observation"), status],
        );
        assert!(check_value_types(&definition).success);
    }

    #[test]
    fn test_duplicate_keys_across_paths() {
        let definition = StructureDefinition::new(
            URL,
            "Patient",
            vec![
                with_constraint(ElementDefinition::new("Patient"), "abc-1", None),
                with_constraint(ElementDefinition::new("Patient.name"), "abc-1", Some(URL)),
                with_constraint(
                    ElementDefinition::new("Patient.contact"),
                    "ele-1",
                    Some("http://hl7.org/fhir/StructureDefinition/Element"),
                ),
                with_constraint(
                    ElementDefinition::new("Patient.link"),
                    "ele-1",
                    Some("http://hl7.org/fhir/StructureDefinition/Element"),
                ),
            ],
        );
        let report = check_duplicate_invariant_keys(&definition);
        assert_eq!(report.issues.len(), 1);
        assert_eq!(
            report.issues[0].message,
            "invariant key 'abc-1' is declared at Patient, Patient.name"
        );
    }

    #[test]
    fn test_same_path_through_slices_is_not_flagged() {
        let slice = ElementDefinition {
            id: Some("Patient.identifier:mrn".to_string()),
            slice_name: Some("mrn".to_string()),
            ..ElementDefinition::new("Patient.identifier")
        };
        let definition = StructureDefinition::new(
            URL,
            "Patient",
            vec![
                ElementDefinition::new("Patient"),
                with_constraint(ElementDefinition::new("Patient.identifier"), "abc-1", None),
                with_constraint(slice, "abc-1", None),
            ],
        );
        assert!(check_duplicate_invariant_keys(&definition).success);
    }
}
