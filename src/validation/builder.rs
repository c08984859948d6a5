//! Builder for [`ProfileValidator`] instances.
//!
//! # Example
//!
//! ```ignore
//! use octofhir_fhirprofile::{InMemoryProfileSource, ProfileValidatorBuilder};
//!
//! // Structural validation only
//! let validator = ProfileValidatorBuilder::new()
//!     .with_source(Arc::new(InMemoryProfileSource::with_definitions(profiles)))
//!     .build()?;
//!
//! // With bindings and invariants
//! let validator = ProfileValidatorBuilder::new()
//!     .with_source(source)
//!     .with_terminology(terminology)
//!     .with_invariant_evaluator(fhirpath)
//!     .build()?;
//! ```

use std::sync::Arc;

use crate::config::{CompilerOptions, ProfileConfig, ResolverConfig, ValidationSettings};
use crate::error::{ProfileError, Result};
use crate::invariant::InvariantEvaluator;
use crate::reference::ExternalReferenceResolver;
use crate::schema::SchemaResolver;
use crate::source::ProfileSource;
use crate::terminology::TerminologyService;

use super::ProfileValidator;

/// Fluent assembly of a [`ProfileValidator`]: profile source (or a shared
/// resolver), optional capabilities and default settings.
#[derive(Default)]
pub struct ProfileValidatorBuilder {
    source: Option<Arc<dyn ProfileSource>>,
    resolver: Option<Arc<SchemaResolver>>,
    terminology: Option<Arc<dyn TerminologyService>>,
    invariants: Option<Arc<dyn InvariantEvaluator>>,
    references: Option<Arc<dyn ExternalReferenceResolver>>,
    compiler: CompilerOptions,
    resolver_config: ResolverConfig,
    settings: ValidationSettings,
}

impl ProfileValidatorBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Where profile definitions come from. A new resolver (and cache) is
    /// created for this source on [`build`](Self::build).
    pub fn with_source(mut self, source: Arc<dyn ProfileSource>) -> Self {
        self.source = Some(source);
        self
    }

    /// Share an existing resolver, and its compiled-schema cache, with
    /// other validators. Takes precedence over [`with_source`](Self::with_source).
    pub fn with_resolver(mut self, resolver: Arc<SchemaResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    /// Terminology service for binding validation. Without one, bindings are skipped.
    pub fn with_terminology(mut self, service: Arc<dyn TerminologyService>) -> Self {
        self.terminology = Some(service);
        self
    }

    /// Expression evaluator for invariants. Without one, invariants are skipped.
    pub fn with_invariant_evaluator(mut self, evaluator: Arc<dyn InvariantEvaluator>) -> Self {
        self.invariants = Some(evaluator);
        self
    }

    /// Resolver for referenced documents checked against target profiles.
    pub fn with_reference_resolver(mut self, resolver: Arc<dyn ExternalReferenceResolver>) -> Self {
        self.references = Some(resolver);
        self
    }

    pub fn with_compiler_options(mut self, options: CompilerOptions) -> Self {
        self.compiler = options;
        self
    }

    pub fn with_settings(mut self, settings: ValidationSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Apply a complete configuration (compiler, cache and validation settings).
    pub fn with_config(mut self, config: ProfileConfig) -> Self {
        self.compiler = config.compiler;
        self.resolver_config = config.resolver;
        self.settings = config.validation;
        self
    }

    /// Build the validator.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if neither a source nor a resolver was given.
    pub fn build(self) -> Result<ProfileValidator> {
        let resolver = match (self.resolver, self.source) {
            (Some(resolver), _) => resolver,
            (None, Some(source)) => Arc::new(SchemaResolver::new(
                source,
                self.compiler,
                self.resolver_config,
            )),
            (None, None) => {
                return Err(ProfileError::configuration_error(
                    "No profile source provided. Call with_source() or with_resolver() before build()",
                ));
            }
        };

        Ok(ProfileValidator {
            resolver,
            terminology: self.terminology,
            invariants: self.invariants,
            references: self.references,
            settings: Arc::new(self.settings),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::InMemoryProfileSource;

    #[test]
    fn test_builder_requires_source() {
        let result = ProfileValidatorBuilder::new().build();
        assert!(matches!(result, Err(ProfileError::ConfigurationError { .. })));
    }

    #[test]
    fn test_builder_applies_config() {
        let mut config = ProfileConfig::default();
        config.validation.max_depth = 8;
        let validator = ProfileValidatorBuilder::new()
            .with_source(Arc::new(InMemoryProfileSource::new()))
            .with_config(config)
            .build()
            .unwrap();
        assert_eq!(validator.settings().max_depth, 8);
    }

    #[test]
    fn test_validators_share_resolver() {
        let resolver = Arc::new(SchemaResolver::with_source(Arc::new(
            InMemoryProfileSource::new(),
        )));
        let a = ProfileValidatorBuilder::new()
            .with_resolver(Arc::clone(&resolver))
            .build()
            .unwrap();
        let b = ProfileValidatorBuilder::new()
            .with_resolver(Arc::clone(&resolver))
            .build()
            .unwrap();
        assert!(Arc::ptr_eq(a.resolver(), b.resolver()));
    }
}
