//! octofhir-fhirprofile - FHIR profile compilation and validation.
//!
//! This crate provides:
//! - Compilation of StructureDefinition snapshots into executable assertion trees
//! - A memoizing schema resolver that compiles each profile at most once
//! - Async validation of instances with pluggable terminology, invariant and
//!   reference-resolution capabilities
//! - Self-consistency checks over profile definitions
//!
//! # Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use octofhir_fhirprofile::{InMemoryProfileSource, ProfileValidatorBuilder};
//!
//! let source = InMemoryProfileSource::with_definitions(profiles);
//! let validator = ProfileValidatorBuilder::new()
//!     .with_source(Arc::new(source))
//!     .build()?;
//!
//! let outcome = validator.validate_json(profile_url, resource).await;
//! assert!(outcome.success);
//! ```
//!
//! # Module Organization
//!
//! - [`types`] - StructureDefinition model consumed by the compiler
//! - [`navigator`] - tree navigation over snapshot elements
//! - [`schema`] - compiled assertion trees, the compiler and the resolver
//! - [`validation`] - the validation engine and [`ProfileValidatorBuilder`]
//! - [`outcome`] - issues, result reports and the outcome aggregator
//! - [`terminology`], [`invariant`], [`reference`] - external capabilities
//! - [`consistency`] - profile self-consistency checks

// Core modules
pub mod config;
pub mod error;
pub mod instance;
pub mod navigator;
pub mod outcome;
pub mod source;
pub mod types;

// Compilation and validation
pub mod consistency;
pub mod schema;
pub mod validation;

// Capabilities
pub mod invariant;
pub mod reference;
pub mod terminology;

// Error exports
pub use error::{EvaluationError, ProfileError, Result};

// Type exports
pub use types::{ElementDefinition, StructureDefinition};

pub use config::{AnyOfTieBreak, CompilerOptions, ProfileConfig, ResolverConfig, ValidationSettings};
pub use instance::{InstanceNode, JsonNode, NodeRef};
pub use navigator::ElementNavigator;
pub use outcome::{Issue, IssueCategory, IssueCode, Outcome, OutcomeReport, ResultReport, Severity};
pub use source::{InMemoryProfileSource, ProfileSource};

// Schema exports
pub use schema::{
    Assertion, AssertionKind, CompiledSchema, ElementSchema, SchemaCompiler, SchemaRef,
    SchemaResolver,
};

// Validation exports
pub use validation::{
    CancellationHandle, CancellationSignal, ProfileValidator, ProfileValidatorBuilder,
    ValidationState,
};

// Consistency exports
pub use consistency::{check_duplicate_invariant_keys, check_value_types};

// Capability exports
pub use invariant::{FnInvariantEvaluator, InvariantEvaluator};
pub use reference::{
    ExternalReferenceResolver, InMemoryReferenceResolver, ReferenceError, ReferenceErrorCode,
    ReferenceResult,
};
pub use terminology::{
    BindingStrength, CachedTerminologyService, CodeValidationResult, InMemoryTerminologyService,
    TerminologyCacheConfig, TerminologyError, TerminologyErrorCode, TerminologyResult,
    TerminologyService,
};
