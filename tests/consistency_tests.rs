use octofhir_fhirprofile::*;
use pretty_assertions::assert_eq;
use serde_json::json;

fn definition(elements: serde_json::Value) -> StructureDefinition {
    serde_json::from_value(json!({
        "resourceType": "StructureDefinition",
        "url": "http://example.org/StructureDefinition/vitals",
        "name": "Vitals",
        "kind": "resource",
        "type": "Observation",
        "snapshot": {"element": elements}
    }))
    .unwrap()
}

#[test]
fn test_profile_values_must_match_declared_types() {
    let profile = definition(json!([
        {"id": "Observation", "path": "Observation"},
        {
            "id": "Observation.status",
            "path": "Observation.status",
            "type": [{"code": "code"}],
            "fixedCode": "final"
        },
        {
            "id": "Observation.effective[x]",
            "path": "Observation.effective[x]",
            "type": [{"code": "dateTime"}, {"code": "Period"}],
            "minValueInteger": 3
        },
        {
            "id": "Observation.valueQuantity.value",
            "path": "Observation.valueQuantity.value",
            "type": [{"code": "decimal"}],
            "example": [{"label": "typical", "valueDecimal": 120.5}]
        }
    ]));

    let report = check_value_types(&profile);
    assert!(!report.success);
    assert_eq!(report.issues.len(), 1);
    assert_eq!(report.issues[0].code, IssueCode::IncompatibleValueType);
    assert_eq!(report.issues[0].location, "Observation.effective[x]");
    assert_eq!(
        report.issues[0].message,
        "minValue[x] has type integer, allowed types are dateTime, Period"
    );
}

#[test]
fn test_system_typed_elements_accept_matching_values() {
    let profile = definition(json!([
        {"id": "Observation", "path": "Observation"},
        {
            "id": "Observation.id",
            "path": "Observation.id",
            "type": [{"code": "http://hl7.org/fhirpath/System.String"}],
            "patternString": "abc"
        }
    ]));
    assert!(check_value_types(&profile).success);
}

#[test]
fn test_duplicate_invariant_keys_are_reported_once() {
    let constraint = |key: &str| {
        json!({
            "key": key,
            "severity": "error",
            "human": "must hold",
            "expression": "true"
        })
    };
    let profile = definition(json!([
        {"id": "Observation", "path": "Observation", "constraint": [constraint("vit-1")]},
        {"id": "Observation.code", "path": "Observation.code", "constraint": [constraint("vit-1"), constraint("vit-2")]},
        {"id": "Observation.value[x]", "path": "Observation.value[x]", "constraint": [constraint("vit-1")]},
        {"id": "Observation.note", "path": "Observation.note", "constraint": [constraint("vit-2")]}
    ]));

    let report = check_duplicate_invariant_keys(&profile);
    let messages: Vec<&str> = report.issues.iter().map(|i| i.message.as_str()).collect();
    assert_eq!(
        messages,
        vec![
            "invariant key 'vit-1' is declared at Observation, Observation.code, Observation.value[x]",
            "invariant key 'vit-2' is declared at Observation.code, Observation.note",
        ]
    );
    assert!(
        report
            .issues
            .iter()
            .all(|i| i.location == "http://example.org/StructureDefinition/vitals")
    );
}
