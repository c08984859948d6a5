//! Read-only instance tree consumed by the validation engine.
//!
//! The engine only needs to navigate children by name, read an instance type
//! and a primitive value. [`JsonNode`] is the reference implementation over
//! FHIR JSON; other instance readers can implement [`InstanceNode`] directly.

use serde_json::Value as JsonValue;
use std::fmt;
use std::sync::Arc;

use crate::types::type_code_from_suffix;

/// Shared handle to an instance node.
pub type NodeRef = Arc<dyn InstanceNode>;

/// A node in a typed instance tree.
pub trait InstanceNode: Send + Sync + fmt::Debug {
    /// Member name of this node within its parent (`value[x]` nodes report the
    /// concrete name, e.g. `valueString`).
    fn name(&self) -> &str;

    /// Instance type name if known (e.g. `Patient`, `string`, `Quantity`).
    fn instance_type(&self) -> Option<&str>;

    /// Primitive value of the node, `None` for complex nodes.
    fn value(&self) -> Option<&JsonValue>;

    /// Ordered children, optionally restricted to a member name. Choice names
    /// ending in `[x]` match every concrete variant.
    fn children(&self, name: Option<&str>) -> Vec<NodeRef>;

    /// Location of the node within the instance, e.g. `Patient.name[0].given[1]`.
    fn location(&self) -> &str;

    /// JSON rendering of the node's content.
    fn to_json(&self) -> JsonValue;
}

/// Whether an instance member name is matched by a declared member name.
///
/// `value[x]` matches `valueString`, `valueQuantity`, ... but not `values`.
pub fn matches_member_name(declared: &str, actual: &str) -> bool {
    match declared.strip_suffix("[x]") {
        Some(prefix) => actual
            .strip_prefix(prefix)
            .and_then(|rest| rest.chars().next())
            .is_some_and(|c| c.is_ascii_uppercase()),
        None => declared == actual,
    }
}

/// Type code implied by a concrete choice member name, e.g. `valueDateTime` → `dateTime`.
pub fn choice_type_of<'a>(declared: &str, actual: &'a str) -> Option<&'a str> {
    let prefix = declared.strip_suffix("[x]")?;
    let suffix = actual.strip_prefix(prefix)?;
    Some(type_code_from_suffix(suffix))
}

/// [`InstanceNode`] over a FHIR JSON document.
///
/// Nodes share the parsed document and address their content through a JSON
/// pointer, so navigating children never copies the document.
#[derive(Clone)]
pub struct JsonNode {
    root: Arc<JsonValue>,
    pointer: String,
    name: String,
    location: String,
    instance_type: Option<String>,
}

impl JsonNode {
    /// Wrap a resource; the instance type is taken from `resourceType`.
    pub fn from_resource(resource: JsonValue) -> Self {
        let type_name = resource
            .get("resourceType")
            .and_then(|rt| rt.as_str())
            .map(str::to_string);
        let name = type_name.clone().unwrap_or_default();
        Self {
            root: Arc::new(resource),
            pointer: String::new(),
            location: name.clone(),
            name,
            instance_type: type_name,
        }
    }

    /// Wrap a value with an explicit instance type (e.g. a datatype instance).
    pub fn with_type(value: JsonValue, type_name: impl Into<String>) -> Self {
        let type_name = type_name.into();
        Self {
            root: Arc::new(value),
            pointer: String::new(),
            name: type_name.clone(),
            location: type_name.clone(),
            instance_type: Some(type_name),
        }
    }

    /// Convert into a shared node handle.
    pub fn into_ref(self) -> NodeRef {
        Arc::new(self)
    }

    fn json(&self) -> &JsonValue {
        if self.pointer.is_empty() {
            return &self.root;
        }
        self.root.pointer(&self.pointer).unwrap_or(&JsonValue::Null)
    }

    fn child(&self, key: &str, index: Option<usize>, instance_type: Option<String>) -> NodeRef {
        let mut pointer = format!("{}/{}", self.pointer, escape_pointer(key));
        let mut location = format!("{}.{}", self.location, key);
        if let Some(i) = index {
            pointer.push_str(&format!("/{i}"));
            location.push_str(&format!("[{i}]"));
        }
        Arc::new(JsonNode {
            root: Arc::clone(&self.root),
            pointer,
            name: key.to_string(),
            location,
            instance_type,
        })
    }
}

fn escape_pointer(key: &str) -> String {
    key.replace('~', "~0").replace('/', "~1")
}

fn child_type(declared: Option<&str>, key: &str, value: &JsonValue) -> Option<String> {
    if let Some(resource_type) = value.get("resourceType").and_then(|rt| rt.as_str()) {
        return Some(resource_type.to_string());
    }
    declared
        .and_then(|d| choice_type_of(d, key))
        .map(str::to_string)
}

impl InstanceNode for JsonNode {
    fn name(&self) -> &str {
        &self.name
    }

    fn instance_type(&self) -> Option<&str> {
        self.instance_type.as_deref()
    }

    fn value(&self) -> Option<&JsonValue> {
        match self.json() {
            v @ (JsonValue::String(_) | JsonValue::Number(_) | JsonValue::Bool(_)) => Some(v),
            _ => None,
        }
    }

    fn children(&self, name: Option<&str>) -> Vec<NodeRef> {
        let Some(object) = self.json().as_object() else {
            return Vec::new();
        };

        let mut children = Vec::new();
        for (key, value) in object {
            // resourceType and primitive extension siblings (`_birthDate`) are not members
            if key == "resourceType" || key.starts_with('_') {
                continue;
            }
            if let Some(declared) = name
                && !matches_member_name(declared, key)
            {
                continue;
            }
            match value {
                JsonValue::Array(items) => {
                    for (i, item) in items.iter().enumerate() {
                        children.push(self.child(key, Some(i), child_type(name, key, item)));
                    }
                }
                _ => children.push(self.child(key, None, child_type(name, key, value))),
            }
        }
        children
    }

    fn location(&self) -> &str {
        &self.location
    }

    fn to_json(&self) -> JsonValue {
        self.json().clone()
    }
}

impl fmt::Debug for JsonNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JsonNode")
            .field("location", &self.location)
            .field("instance_type", &self.instance_type)
            .finish()
    }
}
