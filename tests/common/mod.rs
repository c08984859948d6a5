#![allow(dead_code)]

use std::sync::Arc;

use octofhir_fhirprofile::types::{Binding, Constraint, Discriminator, Slicing, TypeRef};
use octofhir_fhirprofile::*;
use serde_json::{Value, json};

pub const PATIENT_PROFILE: &str = "http://example.org/StructureDefinition/test-patient";
pub const QUESTIONNAIRE: &str = "http://hl7.org/fhir/StructureDefinition/Questionnaire";
pub const BP_PROFILE: &str = "http://example.org/StructureDefinition/blood-pressure";
pub const OBSERVATION_PROFILE: &str = "http://example.org/StructureDefinition/test-observation";
pub const REFERENCE: &str = "http://hl7.org/fhir/StructureDefinition/Reference";
pub const GENDER_VS: &str = "http://hl7.org/fhir/ValueSet/administrative-gender";
pub const MARITAL_VS: &str = "http://example.org/ValueSet/marital-status";
pub const MARITAL_SYSTEM: &str = "http://terminology.hl7.org/CodeSystem/v3-MaritalStatus";

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn element(path: &str, min: u32, max: &str) -> ElementDefinition {
    ElementDefinition {
        min: Some(min),
        max: Some(max.to_string()),
        ..ElementDefinition::new(path)
    }
}

pub fn typed(path: &str, min: u32, max: &str, code: &str) -> ElementDefinition {
    ElementDefinition {
        type_info: Some(vec![TypeRef::new(code)]),
        ..element(path, min, max)
    }
}

pub fn bound(mut element: ElementDefinition, strength: &str, value_set: &str) -> ElementDefinition {
    element.binding = Some(Binding {
        strength: strength.to_string(),
        description: None,
        value_set: Some(value_set.to_string()),
    });
    element
}

pub fn constrained(mut element: ElementDefinition, key: &str, expression: &str) -> ElementDefinition {
    element.constraint.get_or_insert_with(Vec::new).push(Constraint {
        key: key.to_string(),
        requirements: None,
        severity: "error".to_string(),
        human: format!("{key} must hold"),
        expression: Some(expression.to_string()),
        source: None,
    });
    element
}

/// Patient profile: required gender (bound), optional names with a short
/// family name, a birth date floor and one root invariant.
pub fn patient_profile() -> StructureDefinition {
    let mut family = typed("Patient.name.family", 0, "1", "string");
    family.max_length = Some(10);
    let mut birth_date = typed("Patient.birthDate", 0, "1", "date");
    birth_date
        .value_fields
        .insert("minValueDate".to_string(), json!("1900-01-01"));

    StructureDefinition::new(
        PATIENT_PROFILE,
        "Patient",
        vec![
            constrained(element("Patient", 0, "*"), "pat-1", "name.exists()"),
            typed("Patient.id", 0, "1", "id"),
            typed("Patient.active", 0, "1", "boolean"),
            bound(typed("Patient.gender", 1, "1", "code"), "required", GENDER_VS),
            bound(element("Patient.maritalStatus", 0, "1"), "preferred", MARITAL_VS),
            element("Patient.name", 0, "*"),
            family,
            typed("Patient.name.given", 0, "*", "string"),
            birth_date,
            ElementDefinition {
                type_info: Some(vec![
                    TypeRef::new("BackboneElement")
                        .with_profiles(["http://example.org/StructureDefinition/missing"]),
                ]),
                ..element("Patient.contact", 0, "*")
            },
        ],
    )
}

/// Questionnaire with the recursive `item.item` content reference.
pub fn questionnaire() -> StructureDefinition {
    let mut nested = element("Questionnaire.item.item", 0, "*");
    nested.content_reference = Some("#Questionnaire.item".to_string());
    StructureDefinition::new(
        QUESTIONNAIRE,
        "Questionnaire",
        vec![
            element("Questionnaire", 0, "*"),
            typed("Questionnaire.status", 1, "1", "code"),
            element("Questionnaire.item", 0, "*"),
            typed("Questionnaire.item.linkId", 1, "1", "string"),
            nested,
        ],
    )
}

/// Blood pressure: components sliced (closed) by code pattern; one systolic required.
pub fn blood_pressure() -> StructureDefinition {
    let mut component = element("Observation.component", 0, "*");
    component.slicing = Some(Slicing {
        discriminator: Some(vec![Discriminator {
            type_name: "pattern".to_string(),
            path: "code".to_string(),
        }]),
        rules: Some("closed".to_string()),
        ordered: None,
    });

    let mut systolic = element("Observation.component", 1, "1");
    systolic.id = Some("Observation.component:systolic".to_string());
    systolic.slice_name = Some("systolic".to_string());

    let mut systolic_code = element("Observation.component.code", 1, "1");
    systolic_code.id = Some("Observation.component:systolic.code".to_string());
    systolic_code.value_fields.insert(
        "patternCodeableConcept".to_string(),
        json!({"coding": [{"system": "http://loinc.org", "code": "8480-6"}]}),
    );

    StructureDefinition::new(
        BP_PROFILE,
        "Observation",
        vec![
            element("Observation", 0, "*"),
            typed("Observation.status", 1, "1", "code"),
            component,
            element("Observation.component.code", 1, "1"),
            systolic,
            systolic_code,
        ],
    )
}

/// Observation whose subject must reference a conformant test patient.
pub fn observation_profile() -> StructureDefinition {
    StructureDefinition::new(
        OBSERVATION_PROFILE,
        "Observation",
        vec![
            element("Observation", 0, "*"),
            typed("Observation.status", 1, "1", "code"),
            ElementDefinition {
                type_info: Some(vec![
                    TypeRef::new("Reference").with_target_profiles([PATIENT_PROFILE]),
                ]),
                ..element("Observation.subject", 0, "1")
            },
        ],
    )
}

/// Minimal base Reference datatype.
pub fn reference_type() -> StructureDefinition {
    StructureDefinition::new(
        REFERENCE,
        "Reference",
        vec![
            element("Reference", 0, "*"),
            typed("Reference.reference", 0, "1", "string"),
            typed("Reference.display", 0, "1", "string"),
        ],
    )
}

pub fn all_profiles() -> Vec<StructureDefinition> {
    vec![
        patient_profile(),
        questionnaire(),
        blood_pressure(),
        observation_profile(),
        reference_type(),
    ]
}

pub fn source() -> Arc<InMemoryProfileSource> {
    Arc::new(InMemoryProfileSource::with_definitions(all_profiles()))
}

pub fn builder() -> ProfileValidatorBuilder {
    ProfileValidatorBuilder::new().with_source(source())
}

pub fn validator() -> ProfileValidator {
    builder().build().unwrap()
}

pub fn terminology() -> Arc<InMemoryTerminologyService> {
    Arc::new(
        InMemoryTerminologyService::new()
            .with_codes(
                GENDER_VS,
                &[("male", None), ("female", None), ("other", None), ("unknown", None)],
            )
            .with_codes(MARITAL_VS, &[("M", Some(MARITAL_SYSTEM)), ("S", Some(MARITAL_SYSTEM))]),
    )
}

pub fn valid_patient() -> Value {
    json!({
        "resourceType": "Patient",
        "id": "example",
        "active": true,
        "gender": "female",
        "name": [{"family": "Chalmers", "given": ["Peter", "James"]}],
        "birthDate": "1974-12-25"
    })
}

pub fn codes(outcome: &OutcomeReport) -> Vec<IssueCode> {
    outcome.issues.iter().map(|issue| issue.code).collect()
}
