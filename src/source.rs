//! Profile definition sources.
//!
//! A [`ProfileSource`] resolves canonical URLs to StructureDefinitions. It is
//! async so implementations can sit on top of package stores or remote
//! registries; [`InMemoryProfileSource`] covers tests and callers that load
//! their profiles up front.

use async_trait::async_trait;
use std::sync::Arc;

use crate::types::StructureDefinition;

/// Trait for resolving profile definitions by canonical URL.
///
/// # Example Implementation
///
/// ```ignore
/// struct PackageProfileSource {
///     manager: Arc<CanonicalManager>,
/// }
///
/// #[async_trait]
/// impl ProfileSource for PackageProfileSource {
///     async fn resolve_by_canonical(&self, canonical: &str) -> Option<Arc<StructureDefinition>> {
///         let resource = self.manager.resolve(canonical).await.ok()?;
///         serde_json::from_value(resource.content).ok().map(Arc::new)
///     }
/// }
/// ```
#[async_trait]
pub trait ProfileSource: Send + Sync {
    /// Resolve a canonical URL (optionally `url|version`) to its definition.
    async fn resolve_by_canonical(&self, canonical: &str) -> Option<Arc<StructureDefinition>>;
}

/// Split `url|version` into its parts.
pub fn split_canonical(canonical: &str) -> (&str, Option<&str>) {
    match canonical.split_once('|') {
        Some((url, version)) => (url, Some(version)),
        None => (canonical, None),
    }
}

/// A simple in-memory profile source.
///
/// Definitions are stored by canonical URL and, when they carry a version, by
/// `url|version` as well.
#[derive(Default)]
pub struct InMemoryProfileSource {
    definitions: papaya::HashMap<String, Arc<StructureDefinition>>,
}

impl InMemoryProfileSource {
    /// Create a new empty source
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a source holding the given definitions
    pub fn with_definitions(definitions: impl IntoIterator<Item = StructureDefinition>) -> Self {
        let source = Self::new();
        for definition in definitions {
            source.add(definition);
        }
        source
    }

    /// Add (or replace) a definition
    pub fn add(&self, definition: StructureDefinition) {
        let guard = self.definitions.pin();
        let definition = Arc::new(definition);
        if let Some(version) = &definition.version {
            guard.insert(
                format!("{}|{}", definition.url, version),
                Arc::clone(&definition),
            );
        }
        tracing::debug!("Registered profile {}", definition.url);
        guard.insert(definition.url.clone(), definition);
    }

    /// Number of distinct canonical URLs known to the source
    pub fn len(&self) -> usize {
        let guard = self.definitions.pin();
        guard.keys().filter(|k| !k.contains('|')).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl ProfileSource for InMemoryProfileSource {
    async fn resolve_by_canonical(&self, canonical: &str) -> Option<Arc<StructureDefinition>> {
        let guard = self.definitions.pin();
        if let Some(definition) = guard.get(canonical) {
            return Some(Arc::clone(definition));
        }
        // Fall back to the unversioned URL
        let (url, version) = split_canonical(canonical);
        version?;
        guard.get(url).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn definition(url: &str, version: Option<&str>) -> StructureDefinition {
        let mut sd = StructureDefinition::new(url, "Patient", Vec::new());
        sd.version = version.map(str::to_string);
        sd
    }

    #[tokio::test]
    async fn test_resolve_by_url_and_version() {
        let source = InMemoryProfileSource::with_definitions([definition(
            "http://example.org/fhir/StructureDefinition/my-patient",
            Some("1.0.0"),
        )]);

        assert_eq!(source.len(), 1);
        assert!(
            source
                .resolve_by_canonical("http://example.org/fhir/StructureDefinition/my-patient")
                .await
                .is_some()
        );
        assert!(
            source
                .resolve_by_canonical(
                    "http://example.org/fhir/StructureDefinition/my-patient|1.0.0"
                )
                .await
                .is_some()
        );
        // Unknown version falls back to the latest registered definition
        assert!(
            source
                .resolve_by_canonical(
                    "http://example.org/fhir/StructureDefinition/my-patient|2.0.0"
                )
                .await
                .is_some()
        );
        assert!(
            source
                .resolve_by_canonical("http://example.org/fhir/StructureDefinition/other")
                .await
                .is_none()
        );
    }

    #[test]
    fn test_split_canonical() {
        assert_eq!(
            split_canonical("http://x.org/sd|1.2"),
            ("http://x.org/sd", Some("1.2"))
        );
        assert_eq!(split_canonical("http://x.org/sd"), ("http://x.org/sd", None));
    }
}
