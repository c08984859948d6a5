//! Compiled schemas: the executable assertion trees built from profiles.
//!
//! - **[`builder`]** - the ordered set of constraint rules applied per element
//! - **[`compiler`]** - walks a StructureDefinition snapshot into a [`CompiledSchema`]
//! - **[`resolver`]** - memoizing cache mapping canonical URLs to compiled schemas
//!
//! Schemas never point at each other directly. Cross-profile and
//! content-reference links are [`SchemaRef`] keys resolved through the
//! [`resolver::SchemaResolver`] at validation time, so cyclic profiles need no
//! cyclic ownership.

pub mod builder;
pub mod compiler;
pub mod resolver;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::outcome::Severity;
use crate::terminology::BindingStrength;
use crate::validation::compare::ComparableValue;
use crate::validation::primitive::PrimitiveKind;

pub use builder::{BUILDER_EXTENSIONS, BuilderExtension, ConversionMode, ElementNode};
pub use compiler::SchemaCompiler;
pub use resolver::SchemaResolver;

/// Reference to a compiled schema by key: a canonical URL plus an optional
/// anchor naming an element inside it (`canonical#Element.path`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SchemaRef {
    pub canonical: String,
    pub anchor: Option<String>,
}

impl SchemaRef {
    pub fn new(canonical: impl Into<String>) -> Self {
        Self {
            canonical: canonical.into(),
            anchor: None,
        }
    }

    pub fn anchored(canonical: impl Into<String>, anchor: impl Into<String>) -> Self {
        Self {
            canonical: canonical.into(),
            anchor: Some(anchor.into()),
        }
    }

    /// Parse a content reference (`#Questionnaire.item` or `url#Questionnaire.item`)
    /// relative to the structure that declares it.
    pub fn from_content_reference(structure_url: &str, reference: &str) -> Self {
        match reference.split_once('#') {
            Some(("", anchor)) => Self::anchored(structure_url, anchor),
            Some((canonical, anchor)) => Self::anchored(canonical, anchor),
            None => Self::anchored(structure_url, reference),
        }
    }
}

impl fmt::Display for SchemaRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.anchor {
            Some(anchor) => write!(f, "{}#{}", self.canonical, anchor),
            None => f.write_str(&self.canonical),
        }
    }
}

/// Direction of a minValue/maxValue assertion
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MinMaxMode {
    Minimum,
    Maximum,
}

/// Regex assertion payload, compiled once in both anchoring variants.
#[derive(Debug, Clone)]
pub struct RegexPattern {
    pub source: String,
    anchored: Regex,
    unanchored: Regex,
}

impl RegexPattern {
    pub fn new(source: &str) -> Result<Self, regex::Error> {
        Ok(Self {
            source: source.to_string(),
            anchored: Regex::new(&format!("^(?:{source})$"))?,
            unanchored: Regex::new(source)?,
        })
    }

    pub fn is_match(&self, value: &str, implicit_anchoring: bool) -> bool {
        if implicit_anchoring {
            self.anchored.is_match(value)
        } else {
            self.unanchored.is_match(value)
        }
    }
}

/// Slicing rules
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SlicingRules {
    #[default]
    Open,
    Closed,
    OpenAtEnd,
}

impl SlicingRules {
    pub fn parse(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "closed" => SlicingRules::Closed,
            "openatend" => SlicingRules::OpenAtEnd,
            _ => SlicingRules::Open,
        }
    }
}

/// Condition an item must satisfy to belong to a slice.
#[derive(Debug, Clone)]
pub enum SliceCondition {
    /// Value at `path` equals the fixed value
    Value { path: String, value: JsonValue },
    /// Value at `path` matches the pattern
    Pattern { path: String, value: JsonValue },
    /// Something exists (or not) at `path`
    Exists { path: String, exists: bool },
    /// Instance type at `path` is `type_code`
    Type { path: String, type_code: String },
    /// Node at `path` conforms to the referenced profile
    Profile { path: String, reference: SchemaRef },
    /// No usable discriminator: the item must conform to the slice schema
    Conforms,
}

/// One compiled slice.
#[derive(Debug, Clone)]
pub struct Slice {
    pub name: String,
    /// All conditions must hold for an item to belong to the slice
    pub conditions: Vec<SliceCondition>,
    pub min: u32,
    pub max: Option<u32>,
    pub schema: Arc<ElementSchema>,
}

/// A named structural member of an element.
#[derive(Debug, Clone)]
pub struct ChildMember {
    /// Member name as declared (`value[x]` for choices)
    pub name: String,
    pub schema: Arc<ElementSchema>,
}

/// An executable constraint.
#[derive(Debug, Clone)]
pub enum Assertion {
    AllOf(Vec<Assertion>),
    AnyOf(Vec<Assertion>),
    Cardinality {
        min: u32,
        max: Option<u32>,
    },
    FixedValue(JsonValue),
    PatternValue(JsonValue),
    MaxLength(u32),
    MinMaxValue {
        limit: ComparableValue,
        mode: MinMaxMode,
    },
    Regex(RegexPattern),
    PrimitiveType(PrimitiveKind),
    CanonicalShape,
    /// Guard used by choice-type candidates
    InstanceType(String),
    Binding {
        value_set: String,
        strength: BindingStrength,
    },
    Invariant {
        key: String,
        expression: String,
        human: String,
        severity: Severity,
        source: Option<String>,
    },
    SchemaReference(SchemaRef),
    /// Validate against the default profile of the node's own instance type
    /// (used for `Resource`-typed elements such as contained resources)
    RuntimeTypeReference,
    /// Resolve the referenced document and validate it against any of the targets
    ReferencedInstance {
        targets: Vec<SchemaRef>,
    },
    Children {
        members: Vec<ChildMember>,
        allow_additional: bool,
    },
    Slicing {
        slices: Vec<Slice>,
        rules: SlicingRules,
        ordered: bool,
    },
    Unresolvable {
        uri: String,
        reason: String,
    },
    /// An element whose constraints could not be compiled (bad regex,
    /// incomparable limit, dangling content reference)
    Malformed {
        element: String,
        reason: String,
    },
}

/// Assertion kinds, used by exclusion filters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AssertionKind {
    AllOf,
    AnyOf,
    Cardinality,
    FixedValue,
    PatternValue,
    MaxLength,
    MinMaxValue,
    Regex,
    PrimitiveType,
    CanonicalShape,
    InstanceType,
    Binding,
    Invariant,
    SchemaReference,
    ReferencedInstance,
    Children,
    Slicing,
    Unresolvable,
    Malformed,
}

impl Assertion {
    pub fn kind(&self) -> AssertionKind {
        match self {
            Assertion::AllOf(_) => AssertionKind::AllOf,
            Assertion::AnyOf(_) => AssertionKind::AnyOf,
            Assertion::Cardinality { .. } => AssertionKind::Cardinality,
            Assertion::FixedValue(_) => AssertionKind::FixedValue,
            Assertion::PatternValue(_) => AssertionKind::PatternValue,
            Assertion::MaxLength(_) => AssertionKind::MaxLength,
            Assertion::MinMaxValue { .. } => AssertionKind::MinMaxValue,
            Assertion::Regex(_) => AssertionKind::Regex,
            Assertion::PrimitiveType(_) => AssertionKind::PrimitiveType,
            Assertion::CanonicalShape => AssertionKind::CanonicalShape,
            Assertion::InstanceType(_) => AssertionKind::InstanceType,
            Assertion::Binding { .. } => AssertionKind::Binding,
            Assertion::Invariant { .. } => AssertionKind::Invariant,
            Assertion::SchemaReference(_) | Assertion::RuntimeTypeReference => {
                AssertionKind::SchemaReference
            }
            Assertion::ReferencedInstance { .. } => AssertionKind::ReferencedInstance,
            Assertion::Children { .. } => AssertionKind::Children,
            Assertion::Slicing { .. } => AssertionKind::Slicing,
            Assertion::Unresolvable { .. } => AssertionKind::Unresolvable,
            Assertion::Malformed { .. } => AssertionKind::Malformed,
        }
    }

    /// Collapse a list of assertions into one: empty lists become `None`,
    /// single items are returned as is, longer lists become `AllOf`.
    pub fn all_of(mut assertions: Vec<Assertion>) -> Option<Assertion> {
        match assertions.len() {
            0 => None,
            1 => assertions.pop(),
            _ => Some(Assertion::AllOf(assertions)),
        }
    }

    /// Like [`Assertion::all_of`] with any-of semantics.
    pub fn any_of(mut assertions: Vec<Assertion>) -> Option<Assertion> {
        match assertions.len() {
            0 => None,
            1 => assertions.pop(),
            _ => Some(Assertion::AnyOf(assertions)),
        }
    }

    /// Push every schema reference reachable from this assertion without
    /// following references.
    pub fn collect_references(&self, out: &mut Vec<SchemaRef>) {
        match self {
            Assertion::AllOf(items) | Assertion::AnyOf(items) => {
                items.iter().for_each(|a| a.collect_references(out));
            }
            Assertion::SchemaReference(reference) => out.push(reference.clone()),
            Assertion::ReferencedInstance { targets } => out.extend(targets.iter().cloned()),
            Assertion::Children { members, .. } => {
                for member in members {
                    member.schema.collect_references(out);
                }
            }
            Assertion::Slicing { slices, .. } => {
                for slice in slices {
                    for condition in &slice.conditions {
                        if let SliceCondition::Profile { reference, .. } = condition {
                            out.push(reference.clone());
                        }
                    }
                    slice.schema.collect_references(out);
                }
            }
            _ => {}
        }
    }
}

/// Assertions attached to one element position (evaluated with all-of semantics).
#[derive(Debug, Clone)]
pub struct ElementSchema {
    /// Element id the schema was compiled from
    pub id: String,
    pub assertions: Vec<Assertion>,
}

impl ElementSchema {
    pub fn new(id: impl Into<String>, assertions: Vec<Assertion>) -> Self {
        Self {
            id: id.into(),
            assertions,
        }
    }

    /// Element schema that fails (fatally) whenever it is exercised.
    pub fn unresolvable(uri: impl Into<String>, reason: impl Into<String>) -> Self {
        let uri = uri.into();
        Self {
            id: uri.clone(),
            assertions: vec![Assertion::Unresolvable {
                uri,
                reason: reason.into(),
            }],
        }
    }

    pub fn collect_references(&self, out: &mut Vec<SchemaRef>) {
        for assertion in &self.assertions {
            assertion.collect_references(out);
        }
    }
}

/// A compiled profile: the root element schema plus the anchor table used by
/// content references.
#[derive(Debug, Clone)]
pub struct CompiledSchema {
    pub canonical: String,
    /// Type constrained by the profile (e.g. `Patient`)
    pub type_name: String,
    pub root: Arc<ElementSchema>,
    pub anchors: HashMap<String, Arc<ElementSchema>>,
}

impl CompiledSchema {
    /// Distinguished schema for identifiers that could not be compiled.
    pub fn unresolvable(canonical: impl Into<String>, reason: impl Into<String>) -> Self {
        let canonical = canonical.into();
        Self {
            root: Arc::new(ElementSchema::unresolvable(canonical.clone(), reason)),
            type_name: String::new(),
            canonical,
            anchors: HashMap::new(),
        }
    }

    pub fn is_unresolvable(&self) -> bool {
        matches!(
            self.root.assertions.as_slice(),
            [Assertion::Unresolvable { .. }]
        )
    }

    /// Element schema for an anchor, or the root when `anchor` is `None`.
    pub fn element(&self, anchor: Option<&str>) -> Option<Arc<ElementSchema>> {
        match anchor {
            None => Some(Arc::clone(&self.root)),
            Some(anchor) => self.anchors.get(anchor).cloned(),
        }
    }

    /// All references held by this schema (root and anchors), deduplicated in
    /// first-seen order.
    pub fn references(&self) -> Vec<SchemaRef> {
        let mut out = Vec::new();
        self.root.collect_references(&mut out);
        let mut anchors: Vec<_> = self.anchors.iter().collect();
        anchors.sort_by(|a, b| a.0.cmp(b.0));
        for (_, schema) in anchors {
            schema.collect_references(&mut out);
        }
        let mut seen = std::collections::HashSet::new();
        out.retain(|r| seen.insert(r.clone()));
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_reference_parsing() {
        let local = SchemaRef::from_content_reference(
            "http://hl7.org/fhir/StructureDefinition/Questionnaire",
            "#Questionnaire.item",
        );
        assert_eq!(
            local.to_string(),
            "http://hl7.org/fhir/StructureDefinition/Questionnaire#Questionnaire.item"
        );

        let remote = SchemaRef::from_content_reference(
            "http://example.org/sd",
            "http://hl7.org/fhir/StructureDefinition/Bundle#Bundle.link",
        );
        assert_eq!(
            remote.canonical,
            "http://hl7.org/fhir/StructureDefinition/Bundle"
        );
        assert_eq!(remote.anchor.as_deref(), Some("Bundle.link"));
    }

    #[test]
    fn test_regex_anchoring() {
        let pattern = RegexPattern::new("[0-9]{3}").unwrap();
        assert!(pattern.is_match("123", true));
        assert!(!pattern.is_match("a123b", true));
        assert!(pattern.is_match("a123b", false));
        assert!(RegexPattern::new("[unclosed").is_err());
    }

    #[test]
    fn test_collect_references_dedupes() {
        let reference = SchemaRef::new("http://hl7.org/fhir/StructureDefinition/HumanName");
        let member = ChildMember {
            name: "name".into(),
            schema: Arc::new(ElementSchema::new(
                "Patient.name",
                vec![Assertion::SchemaReference(reference.clone())],
            )),
        };
        let root = ElementSchema::new(
            "Patient",
            vec![
                Assertion::Children {
                    members: vec![member.clone(), member],
                    allow_additional: false,
                },
                Assertion::SchemaReference(reference.clone()),
            ],
        );
        let schema = CompiledSchema {
            canonical: "http://example.org/p".into(),
            type_name: "Patient".into(),
            root: Arc::new(root),
            anchors: HashMap::new(),
        };
        assert_eq!(schema.references(), vec![reference]);
        assert!(!schema.is_unresolvable());
        assert!(CompiledSchema::unresolvable("x", "not found").is_unresolvable());
    }

    #[test]
    fn test_assertion_collapse() {
        assert!(Assertion::all_of(Vec::new()).is_none());
        assert!(matches!(
            Assertion::any_of(vec![Assertion::CanonicalShape]),
            Some(Assertion::CanonicalShape)
        ));
        assert_eq!(
            Assertion::all_of(vec![Assertion::CanonicalShape, Assertion::MaxLength(3)])
                .map(|a| a.kind()),
            Some(AssertionKind::AllOf)
        );
    }
}
