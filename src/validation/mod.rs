//! Profile validation.
//!
//! [`ProfileValidator`] evaluates compiled schemas against instance trees.
//! Schemas are resolved (and compiled once) through the shared
//! [`SchemaResolver`]; everything else a validation needs travels in a
//! per-call [`ValidationState`].
//!
//! # Example
//!
//! ```ignore
//! use octofhir_fhirprofile::{JsonNode, ProfileValidatorBuilder};
//!
//! let validator = ProfileValidatorBuilder::new()
//!     .with_source(source)
//!     .with_terminology(terminology)
//!     .build()?;
//!
//! let outcome = validator
//!     .validate(profile_url, JsonNode::from_resource(resource).into_ref())
//!     .await;
//! for issue in outcome.errors() {
//!     println!("{issue}");
//! }
//! ```

pub mod builder;
pub mod compare;
mod engine;
pub mod primitive;
mod slicing;
pub mod state;

use std::sync::Arc;

use serde_json::Value as JsonValue;

use crate::config::ValidationSettings;
use crate::instance::{JsonNode, NodeRef};
use crate::invariant::InvariantEvaluator;
use crate::outcome::{Issue, IssueCode, OutcomeReport, ResultReport};
use crate::reference::ExternalReferenceResolver;
use crate::schema::{ElementSchema, SchemaRef, SchemaResolver};
use crate::terminology::TerminologyService;

pub use builder::ProfileValidatorBuilder;
pub use state::{CancellationHandle, CancellationSignal, ValidationState};

/// Validates instances against profiles.
///
/// Cheap to share: clone the `Arc` it lives in, or clone the validator itself
/// (all members are reference counted).
#[derive(Clone)]
pub struct ProfileValidator {
    resolver: Arc<SchemaResolver>,
    terminology: Option<Arc<dyn TerminologyService>>,
    invariants: Option<Arc<dyn InvariantEvaluator>>,
    references: Option<Arc<dyn ExternalReferenceResolver>>,
    settings: Arc<ValidationSettings>,
}

impl ProfileValidator {
    pub fn resolver(&self) -> &Arc<SchemaResolver> {
        &self.resolver
    }

    /// Settings used when a call does not provide its own.
    pub fn settings(&self) -> &ValidationSettings {
        &self.settings
    }

    /// Validate an instance against the profile with the given canonical URL.
    pub async fn validate(&self, canonical: &str, instance: NodeRef) -> OutcomeReport {
        self.validate_with_settings(canonical, instance, Arc::clone(&self.settings))
            .await
    }

    /// Validate a JSON resource (typed by its `resourceType`).
    pub async fn validate_json(&self, canonical: &str, resource: JsonValue) -> OutcomeReport {
        self.validate(canonical, JsonNode::from_resource(resource).into_ref())
            .await
    }

    /// Validate with per-call settings. Exclusion filters and other settings
    /// apply without recompiling any schema.
    pub async fn validate_with_settings(
        &self,
        canonical: &str,
        instance: NodeRef,
        settings: Arc<ValidationSettings>,
    ) -> OutcomeReport {
        let warnings_as_errors = settings.warnings_as_errors;
        let report = self.validate_report(canonical, &instance, settings).await;
        OutcomeReport::from_report(&report, warnings_as_errors)
    }

    /// Validate and stop early when `signal` fires. A cancelled validation
    /// reports exactly one cancellation issue; partial results are discarded.
    pub async fn validate_cancellable(
        &self,
        canonical: &str,
        instance: NodeRef,
        signal: &CancellationSignal,
    ) -> OutcomeReport {
        let location = instance.location().to_string();
        tokio::select! {
            biased;
            _ = signal.cancelled() => {
                tracing::info!("Validation of {} against {} cancelled", location, canonical);
                OutcomeReport::from_issues(
                    [Issue::fatal(IssueCode::Cancelled, "validation was cancelled", location)],
                    self.settings.warnings_as_errors,
                )
            }
            outcome = self.validate(canonical, Arc::clone(&instance)) => outcome,
        }
    }

    /// The full report tree for one validation.
    pub async fn validate_report(
        &self,
        canonical: &str,
        instance: &NodeRef,
        settings: Arc<ValidationSettings>,
    ) -> ResultReport {
        let state = ValidationState::new(settings);
        let schema = self.resolver.resolve(canonical).await;

        let mut reports = Vec::new();
        if !schema.is_unresolvable()
            && let Some(actual) = instance.instance_type()
            && actual != schema.type_name
        {
            reports.push(ResultReport::from_issue(Issue::error(
                IssueCode::WrongType,
                format!(
                    "profile {} constrains {}, instance is {}",
                    canonical, schema.type_name, actual
                ),
                instance.location(),
            )));
        }
        reports.push(
            self.validate_reference(&SchemaRef::new(canonical), instance, &state)
                .await,
        );
        ResultReport::combine(reports)
    }

    /// Evaluate one element schema against a single node.
    pub async fn evaluate(
        &self,
        schema: &ElementSchema,
        node: &NodeRef,
        state: &ValidationState,
    ) -> ResultReport {
        self.validate_element_group(schema, std::slice::from_ref(node), node.location(), state)
            .await
    }
}

impl std::fmt::Debug for ProfileValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProfileValidator")
            .field("resolver", &self.resolver)
            .field("terminology", &self.terminology.is_some())
            .field("invariants", &self.invariants.is_some())
            .field("references", &self.references.is_some())
            .field("settings", &self.settings)
            .finish()
    }
}
