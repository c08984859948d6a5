//! Schema Compiler - turns a StructureDefinition snapshot into a [`CompiledSchema`].
//!
//! Compilation is a synchronous walk over the snapshot tree. At every element
//! the builder extensions produce the element's own assertions; nested
//! elements become [`Assertion::Children`] members and slices become an
//! [`Assertion::Slicing`]. References to other profiles and content-reference
//! targets stay [`SchemaRef`] keys, so compiling one profile never compiles
//! another.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::config::CompilerOptions;
use crate::error::{ProfileError, Result};
use crate::navigator::ElementNavigator;
use crate::types::{Discriminator, StructureDefinition};

use super::builder::{ConversionMode, ElementNode, build_assertions};
use super::{
    Assertion, ChildMember, CompiledSchema, ElementSchema, SchemaRef, Slice, SliceCondition,
    SlicingRules,
};

/// Stateless compiler from profile definitions to assertion trees.
#[derive(Debug, Clone, Default)]
pub struct SchemaCompiler {
    options: CompilerOptions,
}

impl SchemaCompiler {
    pub fn new(options: CompilerOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &CompilerOptions {
        &self.options
    }

    /// Compile a definition into a schema with its anchor table.
    pub fn compile(&self, definition: &Arc<StructureDefinition>) -> Result<CompiledSchema> {
        let navigator = ElementNavigator::new(Arc::clone(definition)).ok_or_else(|| {
            ProfileError::malformed_profile(
                definition.url.as_str(),
                "definition has no snapshot elements",
            )
        })?;

        tracing::debug!(
            "Compiling {} ({} snapshot elements)",
            definition.url,
            definition.elements().len()
        );

        let root = self.compile_element(&navigator, ConversionMode::Full);
        let anchors = self.compile_anchors(&navigator);

        tracing::debug!(
            "Compiled {} with {} content-reference anchors",
            definition.url,
            anchors.len()
        );

        Ok(CompiledSchema {
            canonical: definition.url.clone(),
            type_name: definition.type_name.clone(),
            root: Arc::new(root),
            anchors,
        })
    }

    /// Compile every local content-reference target once, as a backbone type.
    ///
    /// A reference to an element the snapshot does not contain gets an anchor
    /// holding a single [`Assertion::Malformed`].
    fn compile_anchors(&self, navigator: &ElementNavigator) -> HashMap<String, Arc<ElementSchema>> {
        let definition = navigator.definition();
        let mut anchors = HashMap::new();
        let mut seen = HashSet::new();

        for element in definition.elements() {
            let Some(reference) = element.content_reference.as_deref() else {
                continue;
            };
            let target = SchemaRef::from_content_reference(&definition.url, reference);
            let Some(anchor) = target.anchor else {
                continue;
            };
            if target.canonical != definition.url || !seen.insert(anchor.clone()) {
                continue;
            }

            let mut cursor = navigator.clone();
            let schema = if cursor.jump_to_id(&anchor) {
                self.compile_element(&cursor, ConversionMode::BackboneType)
            } else {
                let e = ProfileError::unknown_content_reference(element.element_id(), reference);
                tracing::warn!(
                    "Cannot compile {} in {}: {}",
                    element.element_id(),
                    definition.url,
                    e
                );
                ElementSchema::new(
                    anchor.clone(),
                    vec![Assertion::Malformed {
                        element: element.element_id().to_string(),
                        reason: e.to_string(),
                    }],
                )
            };
            anchors.insert(anchor, Arc::new(schema));
        }
        anchors
    }

    fn compile_element(
        &self,
        navigator: &ElementNavigator,
        mode: ConversionMode,
    ) -> ElementSchema {
        let definition = navigator.definition();
        let element = navigator.current();
        let children = navigator.children();

        let mode = if mode == ConversionMode::Full
            && element.content_reference.is_some()
            && children.is_empty()
        {
            ConversionMode::ContentReference
        } else {
            mode
        };

        let node = ElementNode::new(element, &definition.url)
            .with_mode(mode)
            .with_children(!children.is_empty());
        let mut assertions = build_assertions(&node);

        if !children.is_empty() {
            let members = children
                .iter()
                .map(|child| ChildMember {
                    name: child.current().name().to_string(),
                    schema: Arc::new(self.compile_element(child, ConversionMode::Full)),
                })
                .collect();
            assertions.push(Assertion::Children {
                members,
                allow_additional: self.options.allow_unknown_elements,
            });
        }

        let slices = navigator.slices();
        if !slices.is_empty() {
            assertions.push(self.compile_slicing(navigator, &slices));
        }

        ElementSchema::new(element.element_id(), assertions)
    }

    fn compile_slicing(
        &self,
        navigator: &ElementNavigator,
        slice_navigators: &[ElementNavigator],
    ) -> Assertion {
        let slicing = navigator.current().slicing.as_ref();
        let discriminators: &[Discriminator] = slicing
            .and_then(|s| s.discriminator.as_deref())
            .unwrap_or_default();

        let mut slices = Vec::with_capacity(slice_navigators.len());
        for slice_navigator in slice_navigators {
            let element = slice_navigator.current();
            let mut conditions: Vec<SliceCondition> = Vec::new();
            let mut complete = !discriminators.is_empty();
            for discriminator in discriminators {
                match discriminator_condition(slice_navigator, discriminator) {
                    Some(condition) => conditions.push(condition),
                    None => complete = false,
                }
            }
            if !complete {
                conditions.push(SliceCondition::Conforms);
            }

            slices.push(Slice {
                name: element.slice_name.clone().unwrap_or_default(),
                conditions,
                min: element.min.unwrap_or(0),
                max: element.max_cardinality(),
                schema: Arc::new(self.compile_element(slice_navigator, ConversionMode::Full)),
            });
        }

        Assertion::Slicing {
            slices,
            rules: slicing
                .and_then(|s| s.rules.as_deref())
                .map(SlicingRules::parse)
                .unwrap_or_default(),
            ordered: slicing.and_then(|s| s.ordered).unwrap_or(false),
        }
    }
}

/// Derive the condition for one discriminator from the slice's constraints.
///
/// The discriminator path is followed through the slice's element tree as far
/// as it goes; any remaining segments are looked up inside the fixed or
/// pattern value of the last element reached.
fn discriminator_condition(
    slice: &ElementNavigator,
    discriminator: &Discriminator,
) -> Option<SliceCondition> {
    let path = discriminator.path.trim();
    if path.contains('(') {
        return None;
    }

    let mut cursor = slice.clone();
    let mut remaining: Vec<&str> = Vec::new();
    if path != "$this" {
        let segments: Vec<&str> = path.split('.').collect();
        for (i, segment) in segments.iter().enumerate() {
            if !cursor.move_to_child(segment) && !cursor.move_to_child(&format!("{segment}[x]")) {
                remaining = segments[i..].to_vec();
                break;
            }
        }
    }
    let element = cursor.current();
    let path = path.to_string();

    match discriminator.type_name.as_str() {
        "value" | "pattern" => {
            let (value, is_fixed) = match (element.fixed(), element.pattern()) {
                (Some(fixed), _) => (fixed.value, true),
                (None, Some(pattern)) => (pattern.value, false),
                (None, None) => return None,
            };
            let value = descend(value, &remaining)?.clone();
            if is_fixed && discriminator.type_name == "value" {
                Some(SliceCondition::Value { path, value })
            } else {
                Some(SliceCondition::Pattern { path, value })
            }
        }
        "exists" if remaining.is_empty() => {
            if element.min.unwrap_or(0) > 0 {
                Some(SliceCondition::Exists { path, exists: true })
            } else if element.max_cardinality() == Some(0) {
                Some(SliceCondition::Exists {
                    path,
                    exists: false,
                })
            } else {
                None
            }
        }
        "type" if remaining.is_empty() => match element.types() {
            [only] => Some(SliceCondition::Type {
                path,
                type_code: only.code.clone(),
            }),
            _ => None,
        },
        "profile" if remaining.is_empty() => element
            .types()
            .iter()
            .find_map(|t| t.profile.as_ref()?.first())
            .map(|profile| SliceCondition::Profile {
                path,
                reference: SchemaRef::new(profile.clone()),
            }),
        _ => None,
    }
}

fn descend<'a>(value: &'a serde_json::Value, segments: &[&str]) -> Option<&'a serde_json::Value> {
    let mut current = value;
    for segment in segments {
        if let Some(first) = current.as_array().and_then(|items| items.first()) {
            current = first;
        }
        current = current.get(*segment)?;
    }
    Some(current)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::AssertionKind;
    use crate::types::{ElementDefinition, Extension, Slicing, TypeRef};
    use serde_json::json;

    const BP: &str = "http://example.org/StructureDefinition/bp";

    fn element(path: &str, min: u32, max: &str) -> ElementDefinition {
        ElementDefinition {
            min: Some(min),
            max: Some(max.to_string()),
            ..ElementDefinition::new(path)
        }
    }

    fn slice_entry(path: &str, name: &str, min: u32, max: &str) -> ElementDefinition {
        ElementDefinition {
            id: Some(format!("{path}:{name}")),
            slice_name: Some(name.to_string()),
            ..element(path, min, max)
        }
    }

    fn blood_pressure(rules: &str) -> Arc<StructureDefinition> {
        let mut component = element("Observation.component", 0, "*");
        component.slicing = Some(Slicing {
            discriminator: Some(vec![Discriminator {
                type_name: "pattern".to_string(),
                path: "code".to_string(),
            }]),
            rules: Some(rules.to_string()),
            ordered: None,
        });

        let mut systolic_code = ElementDefinition {
            id: Some("Observation.component:systolic.code".to_string()),
            ..element("Observation.component.code", 1, "1")
        };
        systolic_code.value_fields.insert(
            "patternCodeableConcept".to_string(),
            json!({"coding": [{"system": "http://loinc.org", "code": "8480-6"}]}),
        );

        let mut status = element("Observation.status", 1, "1");
        status.type_info = Some(vec![TypeRef::new("code")]);

        Arc::new(StructureDefinition::new(
            BP,
            "Observation",
            vec![
                element("Observation", 0, "*"),
                status,
                component,
                element("Observation.component.code", 1, "1"),
                slice_entry("Observation.component", "systolic", 1, "1"),
                systolic_code,
            ],
        ))
    }

    fn member<'a>(schema: &'a ElementSchema, name: &str) -> &'a ElementSchema {
        schema
            .assertions
            .iter()
            .find_map(|a| match a {
                Assertion::Children { members, .. } => {
                    members.iter().find(|m| m.name == name).map(|m| &*m.schema)
                }
                _ => None,
            })
            .unwrap_or_else(|| panic!("no member {name}"))
    }

    #[test]
    fn test_compile_builds_children_and_slicing() {
        let schema = SchemaCompiler::default().compile(&blood_pressure("closed")).unwrap();
        assert_eq!(schema.canonical, BP);
        assert_eq!(schema.type_name, "Observation");
        assert!(schema.anchors.is_empty());

        let status = member(&schema.root, "status");
        let kinds: Vec<_> = status.assertions.iter().map(Assertion::kind).collect();
        assert_eq!(
            kinds,
            vec![AssertionKind::Cardinality, AssertionKind::PrimitiveType]
        );

        let component = member(&schema.root, "component");
        let slicing = component
            .assertions
            .iter()
            .find(|a| a.kind() == AssertionKind::Slicing)
            .unwrap();
        let Assertion::Slicing { slices, rules, .. } = slicing else {
            unreachable!()
        };
        assert_eq!(*rules, SlicingRules::Closed);
        assert_eq!(slices.len(), 1);
        assert_eq!(slices[0].name, "systolic");
        assert_eq!((slices[0].min, slices[0].max), (1, Some(1)));
        assert!(matches!(
            &slices[0].conditions[..],
            [SliceCondition::Pattern { path, .. }] if path == "code"
        ));
        // Slice entries carry no cardinality of their own
        assert!(
            !slices[0]
                .schema
                .assertions
                .iter()
                .any(|a| a.kind() == AssertionKind::Cardinality)
        );
    }

    #[test]
    fn test_discriminator_descends_into_pattern() {
        let definition = blood_pressure("open");
        let mut navigator = ElementNavigator::new(definition).unwrap();
        navigator.move_to_child("component");
        let slice = &navigator.slices()[0];

        let condition = discriminator_condition(
            slice,
            &Discriminator {
                type_name: "value".to_string(),
                path: "code.coding.code".to_string(),
            },
        );
        assert!(matches!(
            condition,
            Some(SliceCondition::Pattern { value, .. }) if value == json!("8480-6")
        ));

        let unusable = discriminator_condition(
            slice,
            &Discriminator {
                type_name: "value".to_string(),
                path: "resolve().code".to_string(),
            },
        );
        assert!(unusable.is_none());
    }

    #[test]
    fn test_content_reference_targets_become_anchors() {
        let mut nested = element("Questionnaire.item.item", 0, "*");
        nested.content_reference = Some("#Questionnaire.item".to_string());
        let mut item = element("Questionnaire.item", 0, "*");
        item.type_info = Some(vec![TypeRef::new("BackboneElement")]);

        let definition = Arc::new(StructureDefinition::new(
            "http://hl7.org/fhir/StructureDefinition/Questionnaire",
            "Questionnaire",
            vec![
                element("Questionnaire", 0, "*"),
                item,
                element("Questionnaire.item.linkId", 1, "1"),
                nested,
            ],
        ));

        let schema = SchemaCompiler::default().compile(&definition).unwrap();
        let anchor = schema.anchors.get("Questionnaire.item").unwrap();
        // Backbone compilation drops the referencing element's cardinality
        assert!(
            !anchor
                .assertions
                .iter()
                .any(|a| a.kind() == AssertionKind::Cardinality)
        );

        let nested = member(member(&schema.root, "item"), "item");
        assert!(matches!(
            nested.assertions.as_slice(),
            [Assertion::SchemaReference(r)] if r.anchor.as_deref() == Some("Questionnaire.item")
        ));
        assert_eq!(schema.references().len(), 1);
    }

    #[test]
    fn test_missing_snapshot_fails_and_dangling_reference_is_isolated() {
        let empty = Arc::new(StructureDefinition::new(
            "http://example.org/empty",
            "Patient",
            Vec::new(),
        ));
        assert!(matches!(
            SchemaCompiler::default().compile(&empty),
            Err(ProfileError::MalformedProfile { .. })
        ));

        let mut dangling = element("Questionnaire.item", 0, "*");
        dangling.content_reference = Some("#Questionnaire.missing".to_string());
        let definition = Arc::new(StructureDefinition::new(
            "http://example.org/q",
            "Questionnaire",
            vec![element("Questionnaire", 0, "*"), dangling],
        ));
        let schema = SchemaCompiler::default().compile(&definition).unwrap();
        assert!(matches!(
            schema.anchors["Questionnaire.missing"].assertions.as_slice(),
            [Assertion::Malformed { element, .. }] if element == "Questionnaire.item"
        ));
    }

    #[test]
    fn test_bad_rule_is_isolated_to_its_element() {
        let mut nickname = element("Patient.nickname", 0, "1");
        nickname.type_info = Some(vec![TypeRef::new("string")]);
        nickname.extension = Some(vec![Extension::regex("[unclosed")]);
        let definition = Arc::new(StructureDefinition::new(
            "http://example.org/p",
            "Patient",
            vec![
                element("Patient", 0, "*"),
                element("Patient.active", 1, "1"),
                nickname,
            ],
        ));

        let schema = SchemaCompiler::default().compile(&definition).unwrap();
        assert!(!schema.is_unresolvable());
        let kinds = |name: &str| -> Vec<AssertionKind> {
            member(&schema.root, name)
                .assertions
                .iter()
                .map(Assertion::kind)
                .collect()
        };
        assert_eq!(kinds("active"), vec![AssertionKind::Cardinality]);
        assert_eq!(
            kinds("nickname"),
            vec![
                AssertionKind::Cardinality,
                AssertionKind::Malformed,
                AssertionKind::PrimitiveType
            ]
        );
    }
}
