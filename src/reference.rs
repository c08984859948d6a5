//! External reference resolution for referenced-instance assertions.
//!
//! When an element of type `Reference` declares target profiles, the validator
//! asks an [`ExternalReferenceResolver`] for the referenced document and
//! validates it against those profiles. Without a configured resolver the
//! assertion is skipped.

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use thiserror::Error;

use crate::instance::{JsonNode, NodeRef};

/// Error codes for reference resolution (rendered as `REF####`)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReferenceErrorCode {
    NonExistentResource = 1001,
    ServiceUnavailable = 1004,
    InvalidReferenceFormat = 1005,
    ContractViolation = 1006,
}

impl std::fmt::Display for ReferenceErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "REF{:04}", *self as u32)
    }
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ReferenceError {
    #[error("Referenced resource {reference} does not exist")]
    NonExistentResource { reference: String },

    #[error("Reference resolution service unavailable: {message}")]
    ServiceUnavailable { message: String },

    #[error("Invalid reference format: {reference}")]
    InvalidReferenceFormat { reference: String },

    /// The resolver broke its contract (e.g. returned a document of the wrong shape)
    #[error("Reference resolver contract violation: {message}")]
    ContractViolation { message: String },
}

impl ReferenceError {
    pub fn code(&self) -> ReferenceErrorCode {
        match self {
            ReferenceError::NonExistentResource { .. } => ReferenceErrorCode::NonExistentResource,
            ReferenceError::ServiceUnavailable { .. } => ReferenceErrorCode::ServiceUnavailable,
            ReferenceError::InvalidReferenceFormat { .. } => {
                ReferenceErrorCode::InvalidReferenceFormat
            }
            ReferenceError::ContractViolation { .. } => ReferenceErrorCode::ContractViolation,
        }
    }
}

pub type ReferenceResult<T> = Result<T, ReferenceError>;

/// Capability resolving a reference string to the referenced document.
///
/// # Example Implementation
///
/// ```ignore
/// struct StorageResolver {
///     storage: Arc<dyn FhirStorage>,
/// }
///
/// #[async_trait]
/// impl ExternalReferenceResolver for StorageResolver {
///     async fn resolve(&self, reference: &str) -> ReferenceResult<Option<NodeRef>> {
///         let (resource_type, id) = parse_reference(reference).ok_or_else(|| {
///             ReferenceError::InvalidReferenceFormat { reference: reference.to_string() }
///         })?;
///         match self.storage.read(resource_type, id).await {
///             Ok(found) => Ok(found.map(|r| JsonNode::from_resource(r).into_ref())),
///             Err(e) => Err(ReferenceError::ServiceUnavailable { message: e.to_string() }),
///         }
///     }
/// }
/// ```
#[async_trait]
pub trait ExternalReferenceResolver: Send + Sync {
    /// Resolve a reference (`Patient/123`, absolute URL, ...) to its root node.
    ///
    /// `Ok(None)` means the document does not exist.
    async fn resolve(&self, reference: &str) -> ReferenceResult<Option<NodeRef>>;
}

/// Split a relative or absolute literal reference into `(resource_type, id)`.
///
/// Contained (`#id`) and conditional references yield `None`.
pub fn parse_reference(reference: &str) -> Option<(&str, &str)> {
    if reference.starts_with('#') || reference.contains('?') {
        return None;
    }
    let path = reference.split("/_history/").next()?;
    let mut segments = path.rsplit('/');
    let id = segments.next().filter(|s| !s.is_empty())?;
    let resource_type = segments
        .next()
        .filter(|s| s.starts_with(|c: char| c.is_ascii_uppercase()))?;
    Some((resource_type, id))
}

/// In-memory resolver keyed by `Type/id`.
#[derive(Default)]
pub struct InMemoryReferenceResolver {
    resources: papaya::HashMap<String, JsonValue>,
}

impl InMemoryReferenceResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a resource under `resourceType/id`
    pub fn add(&self, resource: JsonValue) -> ReferenceResult<()> {
        let key = match (
            resource.get("resourceType").and_then(|v| v.as_str()),
            resource.get("id").and_then(|v| v.as_str()),
        ) {
            (Some(resource_type), Some(id)) => format!("{resource_type}/{id}"),
            _ => {
                return Err(ReferenceError::InvalidReferenceFormat {
                    reference: resource.to_string(),
                });
            }
        };
        self.resources.pin().insert(key, resource);
        Ok(())
    }
}

#[async_trait]
impl ExternalReferenceResolver for InMemoryReferenceResolver {
    async fn resolve(&self, reference: &str) -> ReferenceResult<Option<NodeRef>> {
        let (resource_type, id) =
            parse_reference(reference).ok_or_else(|| ReferenceError::InvalidReferenceFormat {
                reference: reference.to_string(),
            })?;
        let guard = self.resources.pin();
        Ok(guard
            .get(&format!("{resource_type}/{id}"))
            .map(|resource| JsonNode::from_resource(resource.clone()).into_ref()))
    }
}
