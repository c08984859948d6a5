//! StructureDefinition types consumed by the schema compiler.
//!
//! Only the parts of a StructureDefinition that drive compilation are modelled
//! explicitly. Choice-typed properties such as `fixed[x]`, `pattern[x]`,
//! `minValue[x]` and `maxValue[x]` are captured dynamically in
//! [`ElementDefinition::value_fields`].

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// URL of the extension carrying a regular expression on an element or type.
pub const REGEX_EXTENSION_URL: &str = "http://hl7.org/fhir/StructureDefinition/regex";

/// Base URL for the default profile of a FHIR type code.
pub const FHIR_STRUCTURE_DEFINITION_BASE: &str = "http://hl7.org/fhir/StructureDefinition/";

/// Prefix of FHIRPath system type codes (e.g. `http://hl7.org/fhirpath/System.String`).
pub const FHIRPATH_SYSTEM_TYPE_PREFIX: &str = "http://hl7.org/fhirpath/System.";

/// Type information within an element definition.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TypeRef {
    /// FHIR type code
    pub code: String,
    /// Profile URLs for this type
    #[serde(skip_serializing_if = "Option::is_none")]
    pub profile: Option<Vec<String>>,
    /// Target profile URLs for Reference/canonical types
    #[serde(rename = "targetProfile", skip_serializing_if = "Option::is_none")]
    pub target_profile: Option<Vec<String>>,
    /// Extensions on the type
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extension: Option<Vec<Extension>>,
}

impl TypeRef {
    /// Create a type reference with just a code.
    pub fn new(code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            profile: None,
            target_profile: None,
            extension: None,
        }
    }

    /// Attach profiles constraining this type.
    pub fn with_profiles<I, S>(mut self, profiles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.profile = Some(profiles.into_iter().map(Into::into).collect());
        self
    }

    /// Attach target profiles (for Reference/canonical types).
    pub fn with_target_profiles<I, S>(mut self, profiles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.target_profile = Some(profiles.into_iter().map(Into::into).collect());
        self
    }

    /// Whether this is a FHIRPath system type (used by primitive `value` elements).
    pub fn is_system_type(&self) -> bool {
        self.code.starts_with(FHIRPATH_SYSTEM_TYPE_PREFIX)
    }

    /// Canonical URL of the type's default structure definition.
    pub fn default_profile(&self) -> String {
        if self.code.contains("://") {
            self.code.clone()
        } else {
            format!("{FHIR_STRUCTURE_DEFINITION_BASE}{}", self.code)
        }
    }
}

/// Invariant declared on an element.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Constraint {
    /// Constraint key (e.g., "dom-1")
    pub key: String,
    /// Requirements text
    #[serde(skip_serializing_if = "Option::is_none")]
    pub requirements: Option<String>,
    /// Severity: error | warning
    pub severity: String,
    /// Human-readable description
    pub human: String,
    /// FHIRPath expression
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expression: Option<String>,
    /// Structure that originally declared the constraint
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

/// Value set binding of a coded element.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Binding {
    /// Binding strength: required | extensible | preferred | example
    pub strength: String,
    /// Binding description
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Value set URL
    #[serde(rename = "valueSet", skip_serializing_if = "Option::is_none")]
    pub value_set: Option<String>,
}

/// Slicing definition.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Slicing {
    /// Discriminators for slicing
    #[serde(skip_serializing_if = "Option::is_none")]
    pub discriminator: Option<Vec<Discriminator>>,
    /// Slicing rules: closed | open | openAtEnd
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rules: Option<String>,
    /// Whether order matters
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ordered: Option<bool>,
}

/// Slicing discriminator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Discriminator {
    /// Discriminator type: value | exists | pattern | type | profile
    #[serde(rename = "type")]
    pub type_name: String,
    /// Path to discriminating element
    pub path: String,
}

/// Extension within a StructureDefinition.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Extension {
    /// Extension URL
    pub url: String,
    /// String value
    #[serde(rename = "valueString", skip_serializing_if = "Option::is_none")]
    pub value_string: Option<String>,
    /// Canonical URL value
    #[serde(rename = "valueCanonical", skip_serializing_if = "Option::is_none")]
    pub value_canonical: Option<String>,
    /// URL value
    #[serde(rename = "valueUrl", skip_serializing_if = "Option::is_none")]
    pub value_url: Option<String>,
}

impl Extension {
    /// Regex extension carrying the given pattern.
    pub fn regex(pattern: impl Into<String>) -> Self {
        Self {
            url: REGEX_EXTENSION_URL.to_string(),
            value_string: Some(pattern.into()),
            value_canonical: None,
            value_url: None,
        }
    }
}

/// Base element definition reference.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ElementBase {
    /// Base element path
    pub path: String,
    /// Base minimum cardinality
    pub min: u32,
    /// Base maximum cardinality
    pub max: String,
}

/// A value typed through a `[x]` suffix, e.g. `fixedCode` → (`code`, value).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TypedValue<'a> {
    /// FHIR type code derived from the property suffix
    pub type_code: &'a str,
    /// The raw JSON value
    pub value: &'a serde_json::Value,
}

/// Element definition as found in a snapshot.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct ElementDefinition {
    /// Element ID (path with slice names)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Element path (e.g., "Patient.name")
    pub path: String,
    /// Slice name (for sliced elements)
    #[serde(rename = "sliceName", skip_serializing_if = "Option::is_none")]
    pub slice_name: Option<String>,
    /// Slicing definition
    #[serde(skip_serializing_if = "Option::is_none")]
    pub slicing: Option<Slicing>,
    /// Short description
    #[serde(skip_serializing_if = "Option::is_none")]
    pub short: Option<String>,
    /// Minimum cardinality
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min: Option<u32>,
    /// Maximum cardinality (as string, e.g., "1" or "*")
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max: Option<String>,
    /// Base element definition
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base: Option<ElementBase>,
    /// Content reference (for recursive elements)
    #[serde(rename = "contentReference", skip_serializing_if = "Option::is_none")]
    pub content_reference: Option<String>,
    /// Type information
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub type_info: Option<Vec<TypeRef>>,
    /// Maximum string length
    #[serde(rename = "maxLength", skip_serializing_if = "Option::is_none")]
    pub max_length: Option<u32>,
    /// Constraints
    #[serde(skip_serializing_if = "Option::is_none")]
    pub constraint: Option<Vec<Constraint>>,
    /// Must support flag
    #[serde(rename = "mustSupport", skip_serializing_if = "Option::is_none")]
    pub must_support: Option<bool>,
    /// Value set binding
    #[serde(skip_serializing_if = "Option::is_none")]
    pub binding: Option<Binding>,
    /// Examples (`{label, value[x]}` objects)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub example: Option<Vec<serde_json::Value>>,
    /// Extensions
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extension: Option<Vec<Extension>>,

    /// fixed\[x\], pattern\[x\], minValue\[x\] and maxValue\[x\] properties
    #[serde(flatten)]
    pub value_fields: HashMap<String, serde_json::Value>,
}

impl ElementDefinition {
    /// Create an element definition for a path.
    pub fn new(path: impl Into<String>) -> Self {
        let path = path.into();
        Self {
            id: Some(path.clone()),
            path,
            ..Default::default()
        }
    }

    /// Element id, falling back to the path.
    pub fn element_id(&self) -> &str {
        self.id.as_deref().unwrap_or(&self.path)
    }

    /// Last segment of the path (the member name).
    pub fn name(&self) -> &str {
        self.path.rsplit('.').next().unwrap_or(&self.path)
    }

    /// Whether this is the root element of the structure.
    pub fn is_root(&self) -> bool {
        !self.path.contains('.')
    }

    /// Declared types (empty if none).
    pub fn types(&self) -> &[TypeRef] {
        self.type_info.as_deref().unwrap_or_default()
    }

    /// Declared constraints (empty if none).
    pub fn constraints(&self) -> &[Constraint] {
        self.constraint.as_deref().unwrap_or_default()
    }

    /// Parsed maximum cardinality: `None` means unbounded.
    pub fn max_cardinality(&self) -> Option<u32> {
        match self.max.as_deref() {
            None | Some("*") => None,
            Some(max) => max.parse().ok(),
        }
    }

    /// The `fixed[x]` value, if any.
    pub fn fixed(&self) -> Option<TypedValue<'_>> {
        self.typed_value("fixed")
    }

    /// The `pattern[x]` value, if any.
    pub fn pattern(&self) -> Option<TypedValue<'_>> {
        self.typed_value("pattern")
    }

    /// The `minValue[x]` value, if any.
    pub fn min_value(&self) -> Option<TypedValue<'_>> {
        self.typed_value("minValue")
    }

    /// The `maxValue[x]` value, if any.
    pub fn max_value(&self) -> Option<TypedValue<'_>> {
        self.typed_value("maxValue")
    }

    /// Look up a `<prefix>[x]` property and derive its type code from the suffix.
    pub fn typed_value(&self, prefix: &str) -> Option<TypedValue<'_>> {
        self.value_fields.iter().find_map(|(key, value)| {
            let suffix = key.strip_prefix(prefix)?;
            if !suffix.starts_with(|c: char| c.is_ascii_uppercase()) {
                return None;
            }
            Some(TypedValue {
                type_code: type_code_from_suffix(suffix),
                value,
            })
        })
    }

    /// Regex declared through the regex extension on the element or its types.
    pub fn regex(&self) -> Option<&str> {
        let on_element = self.extension.iter().flatten();
        let on_types = self
            .types()
            .iter()
            .flat_map(|t| t.extension.iter().flatten());
        on_element
            .chain(on_types)
            .find(|ext| ext.url == REGEX_EXTENSION_URL)
            .and_then(|ext| ext.value_string.as_deref())
    }
}

/// Map a `[x]` property suffix back to a FHIR type code.
///
/// Primitive type codes start with a lowercase letter (`Code` → `code`,
/// `DateTime` → `dateTime`); complex types keep their capitalisation.
pub fn type_code_from_suffix(suffix: &str) -> &str {
    let known = crate::validation::primitive::PrimitiveKind::ALL
        .iter()
        .map(|kind| kind.as_str())
        .find(|code| code.eq_ignore_ascii_case(suffix));
    known.unwrap_or(suffix)
}

/// Snapshot view of a StructureDefinition.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Snapshot {
    /// Complete element list
    pub element: Vec<ElementDefinition>,
}

/// A profile definition: a StructureDefinition with a snapshot.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StructureDefinition {
    /// Resource type (always "StructureDefinition")
    #[serde(rename = "resourceType", default = "structure_definition_type")]
    pub resource_type: String,
    /// Resource ID
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Canonical URL
    pub url: String,
    /// Version
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Name
    pub name: String,
    /// Kind: resource | complex-type | primitive-type | logical
    pub kind: String,
    /// Type being defined
    #[serde(rename = "type")]
    pub type_name: String,
    /// Base definition URL
    #[serde(rename = "baseDefinition", skip_serializing_if = "Option::is_none")]
    pub base_definition: Option<String>,
    /// Derivation mode: specialization | constraint
    #[serde(skip_serializing_if = "Option::is_none")]
    pub derivation: Option<String>,
    /// Snapshot view
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snapshot: Option<Snapshot>,
}

fn structure_definition_type() -> String {
    "StructureDefinition".to_string()
}

impl StructureDefinition {
    /// Create a definition with the given canonical URL, type and snapshot elements.
    pub fn new(
        url: impl Into<String>,
        type_name: impl Into<String>,
        elements: Vec<ElementDefinition>,
    ) -> Self {
        let type_name = type_name.into();
        Self {
            resource_type: structure_definition_type(),
            id: None,
            url: url.into(),
            version: None,
            name: type_name.clone(),
            kind: "resource".to_string(),
            type_name,
            base_definition: None,
            derivation: None,
            snapshot: Some(Snapshot { element: elements }),
        }
    }

    /// Snapshot elements (empty if the definition has no snapshot).
    pub fn elements(&self) -> &[ElementDefinition] {
        self.snapshot
            .as_ref()
            .map(|s| s.element.as_slice())
            .unwrap_or_default()
    }
}

/// Check if a JSON value represents a StructureDefinition
pub fn is_structure_definition(obj: &serde_json::Value) -> bool {
    obj.get("resourceType")
        .and_then(|rt| rt.as_str())
        .map(|rt| rt == "StructureDefinition")
        .unwrap_or(false)
}
