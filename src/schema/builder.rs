//! Builder extensions: the stateless rules that turn one element definition
//! into assertions.
//!
//! Every rule has the same signature and sees only the element it is given
//! plus the conversion mode. The compiler runs [`BUILDER_EXTENSIONS`] in
//! order at every node, so the order here is the order of assertions (and
//! therefore of issues) in the compiled schema.

use crate::error::{ProfileError, Result};
use crate::outcome::Severity;
use crate::terminology::BindingStrength;
use crate::types::{ElementDefinition, TypeRef};
use crate::validation::compare::ComparableValue;
use crate::validation::primitive::PrimitiveKind;

use super::{Assertion, MinMaxMode, RegexPattern, SchemaRef};

/// Which rule categories apply at a tree position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConversionMode {
    /// Everything applies
    #[default]
    Full,
    /// Element compiled as a backbone type owned by a referencing element:
    /// cardinality and inherited invariants belong to the referencing element
    BackboneType,
    /// Element declaring a content reference: value-shape rules belong to the target
    ContentReference,
}

/// One element as seen by the builder extensions.
#[derive(Debug, Clone, Copy)]
pub struct ElementNode<'a> {
    pub element: &'a ElementDefinition,
    /// Canonical URL of the structure being compiled
    pub structure_url: &'a str,
    pub mode: ConversionMode,
    pub is_root: bool,
    /// Slice entries get their cardinality checked by the slicing assertion
    pub is_slice: bool,
    /// Whether the element has nested element definitions in the snapshot
    pub has_children: bool,
}

impl<'a> ElementNode<'a> {
    pub fn new(element: &'a ElementDefinition, structure_url: &'a str) -> Self {
        Self {
            element,
            structure_url,
            mode: ConversionMode::Full,
            is_root: element.is_root(),
            is_slice: element.slice_name.is_some(),
            has_children: false,
        }
    }

    pub fn with_mode(mut self, mode: ConversionMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_children(mut self, has_children: bool) -> Self {
        self.has_children = has_children;
        self
    }

    fn value_shape_applies(&self) -> bool {
        self.mode != ConversionMode::ContentReference
    }
}

/// A constraint rule.
pub type BuilderExtension = fn(&ElementNode<'_>) -> Result<Vec<Assertion>>;

/// The registered rules, in evaluation order.
pub static BUILDER_EXTENSIONS: &[BuilderExtension] = &[
    cardinality,
    fixed_value,
    pattern_value,
    max_length,
    min_max_value,
    regex,
    primitive_type,
    canonical_shape,
    binding,
    invariants,
    content_reference,
    type_reference,
];

/// Run every registered rule against one element.
///
/// A rule that cannot compile the element contributes an
/// [`Assertion::Malformed`] in its place; the remaining rules still run.
pub fn build_assertions(node: &ElementNode<'_>) -> Vec<Assertion> {
    let mut assertions = Vec::new();
    for extension in BUILDER_EXTENSIONS {
        match extension(node) {
            Ok(emitted) => assertions.extend(emitted),
            Err(e) => {
                tracing::warn!(
                    "Cannot compile {} in {}: {}",
                    node.element.element_id(),
                    node.structure_url,
                    e
                );
                assertions.push(Assertion::Malformed {
                    element: node.element.element_id().to_string(),
                    reason: e.to_string(),
                });
            }
        }
    }
    assertions
}

fn cardinality(node: &ElementNode<'_>) -> Result<Vec<Assertion>> {
    if node.is_root || node.is_slice || node.mode == ConversionMode::BackboneType {
        return Ok(Vec::new());
    }
    let min = node.element.min.unwrap_or(0);
    let max = node.element.max_cardinality();
    if min == 0 && max.is_none() {
        return Ok(Vec::new());
    }
    Ok(vec![Assertion::Cardinality { min, max }])
}

fn fixed_value(node: &ElementNode<'_>) -> Result<Vec<Assertion>> {
    if !node.value_shape_applies() {
        return Ok(Vec::new());
    }
    Ok(node
        .element
        .fixed()
        .map(|fixed| Assertion::FixedValue(fixed.value.clone()))
        .into_iter()
        .collect())
}

fn pattern_value(node: &ElementNode<'_>) -> Result<Vec<Assertion>> {
    if !node.value_shape_applies() {
        return Ok(Vec::new());
    }
    Ok(node
        .element
        .pattern()
        .map(|pattern| Assertion::PatternValue(pattern.value.clone()))
        .into_iter()
        .collect())
}

fn max_length(node: &ElementNode<'_>) -> Result<Vec<Assertion>> {
    if !node.value_shape_applies() {
        return Ok(Vec::new());
    }
    Ok(node
        .element
        .max_length
        .filter(|&n| n > 0)
        .map(Assertion::MaxLength)
        .into_iter()
        .collect())
}

fn min_max_value(node: &ElementNode<'_>) -> Result<Vec<Assertion>> {
    if !node.value_shape_applies() {
        return Ok(Vec::new());
    }
    let mut assertions = Vec::new();
    let limits = [
        (node.element.min_value(), MinMaxMode::Minimum),
        (node.element.max_value(), MinMaxMode::Maximum),
    ];
    for (typed, mode) in limits {
        let Some(typed) = typed else { continue };
        let limit = ComparableValue::from_json(typed.value).ok_or_else(|| {
            ProfileError::malformed_profile(
                node.structure_url.to_string(),
                format!(
                    "{}: {} value {} is not comparable",
                    node.element.element_id(),
                    typed.type_code,
                    typed.value
                ),
            )
        })?;
        assertions.push(Assertion::MinMaxValue { limit, mode });
    }
    Ok(assertions)
}

fn regex(node: &ElementNode<'_>) -> Result<Vec<Assertion>> {
    if !node.value_shape_applies() {
        return Ok(Vec::new());
    }
    let Some(source) = node.element.regex() else {
        return Ok(Vec::new());
    };
    let pattern = RegexPattern::new(source).map_err(|e| {
        ProfileError::invalid_regex(
            node.element.element_id().to_string(),
            source.to_string(),
            e,
        )
    })?;
    Ok(vec![Assertion::Regex(pattern)])
}

fn single_type(element: &ElementDefinition) -> Option<&TypeRef> {
    match element.types() {
        [only] => Some(only),
        _ => None,
    }
}

fn primitive_type(node: &ElementNode<'_>) -> Result<Vec<Assertion>> {
    if !node.value_shape_applies() || node.has_children {
        return Ok(Vec::new());
    }
    Ok(single_type(node.element)
        .and_then(|t| PrimitiveKind::parse(&t.code))
        .map(Assertion::PrimitiveType)
        .into_iter()
        .collect())
}

fn canonical_shape(node: &ElementNode<'_>) -> Result<Vec<Assertion>> {
    if !node.value_shape_applies() {
        return Ok(Vec::new());
    }
    let is_canonical = single_type(node.element).is_some_and(|t| t.code == "canonical");
    Ok(if is_canonical {
        vec![Assertion::CanonicalShape]
    } else {
        Vec::new()
    })
}

fn binding(node: &ElementNode<'_>) -> Result<Vec<Assertion>> {
    let Some(binding) = &node.element.binding else {
        return Ok(Vec::new());
    };
    let (Some(value_set), Some(strength)) = (
        binding.value_set.as_ref(),
        BindingStrength::parse_str(&binding.strength),
    ) else {
        return Ok(Vec::new());
    };
    Ok(vec![Assertion::Binding {
        value_set: value_set.clone(),
        strength,
    }])
}

fn invariants(node: &ElementNode<'_>) -> Result<Vec<Assertion>> {
    let assertions = node
        .element
        .constraints()
        .iter()
        .filter(|c| {
            // Inherited invariants are checked by the structure that declares them
            node.mode != ConversionMode::BackboneType
                || c.source.as_deref().is_none_or(|s| s == node.structure_url)
        })
        .filter_map(|c| {
            let expression = c.expression.as_ref()?;
            Some(Assertion::Invariant {
                key: c.key.clone(),
                expression: expression.clone(),
                human: c.human.clone(),
                severity: if c.severity.eq_ignore_ascii_case("warning") {
                    Severity::Warning
                } else {
                    Severity::Error
                },
                source: c.source.clone(),
            })
        })
        .collect();
    Ok(assertions)
}

fn content_reference(node: &ElementNode<'_>) -> Result<Vec<Assertion>> {
    if node.has_children {
        return Ok(Vec::new());
    }
    Ok(node
        .element
        .content_reference
        .as_deref()
        .map(|reference| {
            Assertion::SchemaReference(SchemaRef::from_content_reference(
                node.structure_url,
                reference,
            ))
        })
        .into_iter()
        .collect())
}

/// Abstract resource types are validated against the instance's own type.
fn is_abstract_resource(code: &str) -> bool {
    matches!(code, "Resource" | "DomainResource")
}

fn type_candidate(type_ref: &TypeRef, guarded: bool) -> Option<Assertion> {
    let mut parts = Vec::new();
    if guarded {
        parts.push(Assertion::InstanceType(type_ref.code.clone()));
    }

    if let Some(kind) = PrimitiveKind::parse(&type_ref.code) {
        // Single primitive types are covered by the primitive rule
        if !guarded {
            return None;
        }
        parts.push(Assertion::PrimitiveType(kind));
    } else if is_abstract_resource(&type_ref.code) && type_ref.profile.is_none() {
        parts.push(Assertion::RuntimeTypeReference);
    } else {
        let profiles: Vec<Assertion> = match &type_ref.profile {
            Some(profiles) if !profiles.is_empty() => profiles
                .iter()
                .map(|p| Assertion::SchemaReference(SchemaRef::new(p.clone())))
                .collect(),
            _ => vec![Assertion::SchemaReference(SchemaRef::new(
                type_ref.default_profile(),
            ))],
        };
        parts.extend(Assertion::any_of(profiles));
    }

    if let Some(targets) = &type_ref.target_profile
        && !targets.is_empty()
    {
        parts.push(Assertion::ReferencedInstance {
            targets: targets.iter().map(|t| SchemaRef::new(t.clone())).collect(),
        });
    }

    Assertion::all_of(parts)
}

fn type_reference(node: &ElementNode<'_>) -> Result<Vec<Assertion>> {
    if node.is_root || node.has_children || node.element.content_reference.is_some() {
        return Ok(Vec::new());
    }
    let types: Vec<&TypeRef> = node
        .element
        .types()
        .iter()
        .filter(|t| !t.is_system_type())
        .collect();
    let guarded = types.len() > 1;
    let candidates = types
        .into_iter()
        .filter_map(|t| type_candidate(t, guarded))
        .collect();
    Ok(Assertion::any_of(candidates).into_iter().collect())
}
