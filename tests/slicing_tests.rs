mod common;

use common::*;
use octofhir_fhirprofile::*;
use pretty_assertions::assert_eq;
use serde_json::{Value, json};

fn component(system: &str, code: &str) -> Value {
    json!({"code": {"coding": [{"system": system, "code": code}]}})
}

fn blood_pressure_instance(components: Vec<Value>) -> Value {
    json!({"resourceType": "Observation", "status": "final", "component": components})
}

#[tokio::test]
async fn test_matching_slice_passes() {
    let mut systolic = component("http://loinc.org", "8480-6");
    systolic["code"]["coding"][0]["display"] = json!("Systolic blood pressure");
    systolic["code"]["text"] = json!("Systolic");

    let outcome = validator()
        .validate_json(BP_PROFILE, blood_pressure_instance(vec![systolic]))
        .await;
    assert!(outcome.success, "unexpected issues: {:?}", outcome.issues);
}

#[tokio::test]
async fn test_closed_slicing_rejects_unmatched_items() {
    let outcome = validator()
        .validate_json(
            BP_PROFILE,
            blood_pressure_instance(vec![
                component("http://loinc.org", "8480-6"),
                component("http://loinc.org", "8462-4"),
            ]),
        )
        .await;
    assert!(!outcome.success);
    assert_eq!(codes(&outcome), vec![IssueCode::SlicingUnmatched]);
    assert_eq!(outcome.issues[0].location, "Observation.component[1]");
}

#[tokio::test]
async fn test_missing_required_slice() {
    let outcome = validator()
        .validate_json(BP_PROFILE, blood_pressure_instance(vec![]))
        .await;
    assert!(!outcome.success);
    assert_eq!(codes(&outcome), vec![IssueCode::SliceCardinality]);
    assert_eq!(outcome.issues[0].location, "Observation.component:systolic");
    assert_eq!(
        outcome.issues[0].message,
        "slice 'systolic' expects 1..1 items, found 0"
    );
}

#[tokio::test]
async fn test_repeated_slice_exceeds_maximum() {
    let outcome = validator()
        .validate_json(
            BP_PROFILE,
            blood_pressure_instance(vec![
                component("http://loinc.org", "8480-6"),
                component("http://loinc.org", "8480-6"),
            ]),
        )
        .await;
    assert_eq!(codes(&outcome), vec![IssueCode::SliceCardinality]);
    assert_eq!(
        outcome.issues[0].message,
        "slice 'systolic' expects 1..1 items, found 2"
    );
}
