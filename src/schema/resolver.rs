//! Schema Resolver - canonical URL → compiled schema, compiled at most once.
//!
//! The resolver sits between the validator and a [`ProfileSource`]. Lookups go
//! through a moka async cache whose `get_with` coalesces concurrent misses, so
//! any number of validations asking for the same profile at the same moment
//! trigger exactly one compilation.
//!
//! Failures are cached too: a canonical that cannot be found or compiled maps
//! to an unresolvable schema that reports a fatal issue only when a validation
//! actually reaches it.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use moka::future::Cache;

use crate::config::{CompilerOptions, ResolverConfig};
use crate::source::ProfileSource;

use super::compiler::SchemaCompiler;
use super::{CompiledSchema, ElementSchema, SchemaRef};

/// Memoizing resolver from canonical URLs to compiled schemas.
pub struct SchemaResolver {
    source: Arc<dyn ProfileSource>,
    compiler: SchemaCompiler,
    cache: Cache<String, Arc<CompiledSchema>>,
    compilations: AtomicUsize,
}

impl SchemaResolver {
    pub fn new(
        source: Arc<dyn ProfileSource>,
        options: CompilerOptions,
        config: ResolverConfig,
    ) -> Self {
        Self {
            source,
            compiler: SchemaCompiler::new(options),
            cache: Cache::builder().max_capacity(config.cache_capacity).build(),
            compilations: AtomicUsize::new(0),
        }
    }

    /// Resolver with default compiler options and cache size.
    pub fn with_source(source: Arc<dyn ProfileSource>) -> Self {
        Self::new(source, CompilerOptions::default(), ResolverConfig::default())
    }

    pub fn source(&self) -> &Arc<dyn ProfileSource> {
        &self.source
    }

    /// Number of compilations performed so far (cache misses that reached the compiler).
    pub fn compilations(&self) -> usize {
        self.compilations.load(Ordering::Relaxed)
    }

    /// Compiled schema for a canonical URL. Never fails: unknown or broken
    /// profiles yield an unresolvable schema.
    pub async fn resolve(&self, canonical: &str) -> Arc<CompiledSchema> {
        self.cache
            .get_with(canonical.to_string(), self.load(canonical))
            .await
    }

    /// Element schema a [`SchemaRef`] points at.
    pub async fn resolve_ref(&self, reference: &SchemaRef) -> Arc<ElementSchema> {
        let schema = self.resolve(&reference.canonical).await;
        if schema.is_unresolvable() {
            return Arc::clone(&schema.root);
        }
        match schema.element(reference.anchor.as_deref()) {
            Some(element) => element,
            None => Arc::new(ElementSchema::unresolvable(
                reference.to_string(),
                format!("anchor not found in {}", schema.canonical),
            )),
        }
    }

    /// Compile a profile and everything it references, breadth first.
    ///
    /// Returns the canonicals visited, in visiting order.
    pub async fn preload(&self, canonical: &str) -> Vec<String> {
        let mut visited: HashSet<String> = HashSet::new();
        let mut order = Vec::new();
        let mut queue = VecDeque::from([canonical.to_string()]);

        while let Some(next) = queue.pop_front() {
            if !visited.insert(next.clone()) {
                continue;
            }
            let schema = self.resolve(&next).await;
            for reference in schema.references() {
                if !visited.contains(&reference.canonical) {
                    queue.push_back(reference.canonical);
                }
            }
            order.push(next);
        }

        tracing::debug!("Preloaded {} schemas starting at {}", order.len(), canonical);
        order
    }

    /// Drop one cached schema so the next lookup recompiles it.
    pub async fn invalidate(&self, canonical: &str) {
        self.cache.invalidate(canonical).await;
    }

    pub fn clear(&self) {
        self.cache.invalidate_all();
    }

    async fn load(&self, canonical: &str) -> Arc<CompiledSchema> {
        let Some(definition) = self.source.resolve_by_canonical(canonical).await else {
            tracing::warn!("Profile not found: {}", canonical);
            return Arc::new(CompiledSchema::unresolvable(
                canonical,
                "profile not found",
            ));
        };

        self.compilations.fetch_add(1, Ordering::Relaxed);
        match self.compiler.compile(&definition) {
            Ok(schema) => Arc::new(schema),
            Err(e) => {
                tracing::warn!("Failed to compile {}: {}", canonical, e);
                Arc::new(CompiledSchema::unresolvable(canonical, e.to_string()))
            }
        }
    }
}

impl std::fmt::Debug for SchemaResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchemaResolver")
            .field("cached", &self.cache.entry_count())
            .field("compilations", &self.compilations())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::InMemoryProfileSource;
    use crate::types::{ElementDefinition, StructureDefinition, TypeRef};

    const PATIENT: &str = "http://example.org/StructureDefinition/patient";
    const NAME: &str = "http://example.org/StructureDefinition/name";

    fn definitions() -> Vec<StructureDefinition> {
        let name = ElementDefinition {
            type_info: Some(vec![TypeRef::new("HumanName").with_profiles([NAME])]),
            ..ElementDefinition::new("Patient.name")
        };
        vec![
            StructureDefinition::new(
                PATIENT,
                "Patient",
                vec![ElementDefinition::new("Patient"), name],
            ),
            StructureDefinition::new(
                NAME,
                "HumanName",
                vec![
                    ElementDefinition::new("HumanName"),
                    ElementDefinition::new("HumanName.family"),
                ],
            ),
        ]
    }

    fn resolver() -> SchemaResolver {
        let source = InMemoryProfileSource::with_definitions(definitions());
        SchemaResolver::with_source(Arc::new(source))
    }

    #[tokio::test]
    async fn test_resolve_is_memoized() {
        let resolver = resolver();
        let first = resolver.resolve(PATIENT).await;
        let second = resolver.resolve(PATIENT).await;
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(resolver.compilations(), 1);

        resolver.invalidate(PATIENT).await;
        resolver.resolve(PATIENT).await;
        assert_eq!(resolver.compilations(), 2);
    }

    #[tokio::test]
    async fn test_unknown_profile_is_unresolvable() {
        let resolver = resolver();
        let schema = resolver.resolve("http://example.org/missing").await;
        assert!(schema.is_unresolvable());
        assert_eq!(resolver.compilations(), 0);

        let anchored = resolver
            .resolve_ref(&SchemaRef::anchored(PATIENT, "Patient.missing"))
            .await;
        assert_eq!(anchored.assertions.len(), 1);
        assert_eq!(
            anchored.assertions[0].kind(),
            crate::schema::AssertionKind::Unresolvable
        );
    }

    #[tokio::test]
    async fn test_preload_follows_references() {
        let resolver = resolver();
        let visited = resolver.preload(PATIENT).await;
        assert_eq!(visited, vec![PATIENT.to_string(), NAME.to_string()]);
        assert_eq!(resolver.compilations(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_resolves_compile_once() {
        let resolver = Arc::new(resolver());
        let tasks: Vec<_> = (0..16)
            .map(|_| {
                let resolver = Arc::clone(&resolver);
                tokio::spawn(async move { resolver.resolve(PATIENT).await })
            })
            .collect();
        for result in futures::future::join_all(tasks).await {
            assert!(!result.unwrap().is_unresolvable());
        }
        assert_eq!(resolver.compilations(), 1);
    }
}
