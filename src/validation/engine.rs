//! Assertion evaluation.
//!
//! Element schemas are evaluated against the *group* of instance nodes that
//! share a member name: cardinality and slicing look at the whole group, every
//! other assertion runs once per node. Evaluation never short-circuits; every
//! assertion contributes a report in declaration order.

use async_recursion::async_recursion;
use serde_json::Value as JsonValue;

use crate::config::AnyOfTieBreak;
use crate::instance::{InstanceNode, NodeRef, matches_member_name};
use crate::outcome::{Evidence, Issue, IssueCode, Outcome, ResultReport, Severity};
use crate::reference::ReferenceError;
use crate::schema::{Assertion, ChildMember, ElementSchema, MinMaxMode, SchemaRef};
use crate::terminology::{BindingStrength, extract_codes};
use crate::types::FHIR_STRUCTURE_DEFINITION_BASE;

use super::compare::{ComparableValue, deep_partial_match, exact_match};
use super::primitive::{PrimitiveKind, json_type_name};
use super::{ProfileValidator, ValidationState};

impl ProfileValidator {
    /// Evaluate an element schema against the nodes found for one member.
    ///
    /// `location` names the member for issues raised when the group is empty.
    #[async_recursion]
    pub(crate) async fn validate_element_group(
        &self,
        schema: &ElementSchema,
        nodes: &[NodeRef],
        location: &str,
        state: &ValidationState,
    ) -> ResultReport {
        let mut reports = Vec::with_capacity(schema.assertions.len());
        for assertion in &schema.assertions {
            if state.settings().is_excluded(assertion.kind()) {
                continue;
            }
            match assertion {
                Assertion::Cardinality { min, max } => {
                    reports.push(check_cardinality(*min, *max, nodes.len(), location));
                }
                Assertion::Slicing {
                    slices,
                    rules,
                    ordered,
                } => {
                    reports.push(
                        self.validate_slicing(slices, *rules, *ordered, nodes, location, state)
                            .await,
                    );
                }
                _ => {
                    for node in nodes {
                        reports.push(self.validate_node(assertion, node, state).await);
                    }
                }
            }
        }
        ResultReport::combine(reports)
    }

    /// Evaluate one assertion against one node.
    #[async_recursion]
    pub(crate) async fn validate_node(
        &self,
        assertion: &Assertion,
        node: &NodeRef,
        state: &ValidationState,
    ) -> ResultReport {
        if state.settings().is_excluded(assertion.kind()) {
            return ResultReport::success();
        }
        let location = node.location();

        match assertion {
            Assertion::AllOf(items) => {
                let mut reports = Vec::with_capacity(items.len());
                for item in items {
                    reports.push(self.validate_node(item, node, state).await);
                }
                ResultReport::combine(reports)
            }
            Assertion::AnyOf(candidates) => self.validate_any_of(candidates, node, state).await,
            Assertion::Cardinality { .. } | Assertion::Slicing { .. } => {
                let single = ElementSchema::new(location, vec![assertion.clone()]);
                self.validate_element_group(&single, std::slice::from_ref(node), location, state)
                    .await
            }
            Assertion::FixedValue(fixed) => {
                let actual = node.to_json();
                if exact_match(&actual, fixed) {
                    ResultReport::success()
                } else {
                    error(
                        IssueCode::FixedValueMismatch,
                        format!("value {actual} does not equal fixed value {fixed}"),
                        location,
                    )
                }
            }
            Assertion::PatternValue(pattern) => {
                let actual = node.to_json();
                if deep_partial_match(&actual, pattern) {
                    ResultReport::success()
                } else {
                    error(
                        IssueCode::PatternMismatch,
                        format!("value {actual} does not match pattern {pattern}"),
                        location,
                    )
                }
            }
            Assertion::MaxLength(max) => match node.value().and_then(JsonValue::as_str) {
                Some(s) if s.chars().count() > *max as usize => error(
                    IssueCode::MaxLengthExceeded,
                    format!(
                        "value has {} characters, maximum is {max}",
                        s.chars().count()
                    ),
                    location,
                ),
                _ => ResultReport::success(),
            },
            Assertion::MinMaxValue { limit, mode } => check_min_max(limit, *mode, node.as_ref()),
            Assertion::Regex(pattern) => {
                let Some(text) = node.value().map(render_primitive) else {
                    return ResultReport::success();
                };
                if pattern.is_match(&text, state.settings().implicit_regex_anchoring) {
                    ResultReport::success()
                } else {
                    error(
                        IssueCode::RegexMismatch,
                        format!("value '{text}' does not match pattern '{}'", pattern.source),
                        location,
                    )
                }
            }
            Assertion::PrimitiveType(kind) => check_primitive(*kind, node.as_ref()),
            Assertion::CanonicalShape => match node.value().and_then(JsonValue::as_str) {
                Some(s) if !is_canonical_shape(s) => error(
                    IssueCode::InvalidCanonical,
                    format!("'{s}' is not a valid canonical reference"),
                    location,
                ),
                _ => ResultReport::success(),
            },
            Assertion::InstanceType(expected) => match node.instance_type() {
                Some(actual) if actual == expected.as_str() => ResultReport::success(),
                actual => error(
                    IssueCode::WrongType,
                    format!(
                        "expected type {expected}, found {}",
                        actual.unwrap_or("an untyped value")
                    ),
                    location,
                ),
            },
            Assertion::Binding {
                value_set,
                strength,
            } => self.validate_binding(value_set, *strength, node).await,
            Assertion::Invariant {
                key,
                expression,
                human,
                severity,
                ..
            } => {
                if state.settings().is_invariant_excluded(key) {
                    return ResultReport::success();
                }
                self.validate_invariant(key, expression, human, *severity, node)
                    .await
            }
            Assertion::SchemaReference(reference) => {
                self.validate_reference(reference, node, state).await
            }
            Assertion::RuntimeTypeReference => match node.instance_type() {
                Some(type_name) => {
                    let reference =
                        SchemaRef::new(format!("{FHIR_STRUCTURE_DEFINITION_BASE}{type_name}"));
                    self.validate_reference(&reference, node, state).await
                }
                None => error(
                    IssueCode::WrongType,
                    "resource has no resourceType",
                    location,
                ),
            },
            Assertion::ReferencedInstance { targets } => {
                self.validate_referenced_instance(targets, node, state)
                    .await
            }
            Assertion::Children {
                members,
                allow_additional,
            } => {
                self.validate_children(members, *allow_additional, node, state)
                    .await
            }
            Assertion::Unresolvable { uri, reason } => ResultReport::from_issue(Issue::fatal(
                IssueCode::UnresolvableSchema,
                format!("cannot resolve {uri}: {reason}"),
                location,
            )),
            Assertion::Malformed { element, reason } => ResultReport::from_issue(Issue::fatal(
                IssueCode::MalformedProfile,
                format!("element {element} could not be compiled: {reason}"),
                location,
            )),
        }
    }

    /// Any-of: all candidates are evaluated concurrently; results keep
    /// declaration order.
    async fn validate_any_of(
        &self,
        candidates: &[Assertion],
        node: &NodeRef,
        state: &ValidationState,
    ) -> ResultReport {
        let reports = futures::future::join_all(
            candidates
                .iter()
                .map(|candidate| self.validate_node(candidate, node, state)),
        )
        .await;

        if let Some(success) = reports.iter().position(ResultReport::is_success) {
            return reports.into_iter().nth(success).unwrap_or_default();
        }

        let chosen = match state.settings().any_of_tie_break {
            AnyOfTieBreak::FirstCandidate => reports.into_iter().next(),
            // min_by_key keeps the first of equal elements
            AnyOfTieBreak::FewestIssues => reports.into_iter().min_by_key(ResultReport::issue_count),
        };

        let mut evidence = vec![Evidence::Issue(Issue::error(
            IssueCode::NoMatchingOption,
            format!("none of the {} allowed options matched", candidates.len()),
            node.location(),
        ))];
        if let Some(chosen) = chosen
            && !chosen.evidence.is_empty()
        {
            evidence.push(Evidence::Report(chosen));
        }
        ResultReport {
            outcome: Outcome::Failure,
            evidence,
        }
    }

    /// Follow a schema reference, guarding against cycles.
    pub(crate) async fn validate_reference(
        &self,
        reference: &SchemaRef,
        node: &NodeRef,
        state: &ValidationState,
    ) -> ResultReport {
        let key = reference.to_string();
        let location = node.location();
        let max_depth = state.settings().max_depth;

        if state.depth() >= max_depth || state.is_active(&key, location) {
            tracing::warn!("Reference limit hit following {} at {}", key, location);
            return ResultReport::from_issue(Issue::fatal(
                IssueCode::CycleLimitExceeded,
                format!("stopped following {key}: reference depth limit {max_depth} or cycle"),
                location,
            ));
        }

        let schema = self.resolver.resolve_ref(reference).await;
        let inner = state.enter(key, location);
        self.validate_element_group(&schema, std::slice::from_ref(node), location, &inner)
            .await
    }

    async fn validate_children(
        &self,
        members: &[ChildMember],
        allow_additional: bool,
        node: &NodeRef,
        state: &ValidationState,
    ) -> ResultReport {
        let mut reports = Vec::with_capacity(members.len() + 1);
        for member in members {
            let group = node.children(Some(member.name.as_str()));
            let location = format!("{}.{}", node.location(), member.name);
            reports.push(
                self.validate_element_group(&member.schema, &group, &location, state)
                    .await,
            );
        }

        if !allow_additional {
            for child in node.children(None) {
                let known = members
                    .iter()
                    .any(|m| matches_member_name(&m.name, child.name()));
                if !known {
                    reports.push(error(
                        IssueCode::UnknownElement,
                        format!("unknown element '{}'", child.name()),
                        child.location(),
                    ));
                }
            }
        }
        ResultReport::combine(reports)
    }

    async fn validate_binding(
        &self,
        value_set: &str,
        strength: BindingStrength,
        node: &NodeRef,
    ) -> ResultReport {
        let Some(terminology) = &self.terminology else {
            tracing::trace!("No terminology service, skipping binding to {}", value_set);
            return ResultReport::success();
        };
        let severity = if strength.is_error_on_failure() {
            Severity::Error
        } else if strength.is_warning_on_failure() {
            Severity::Warning
        } else {
            return ResultReport::success();
        };

        let codes = extract_codes(&node.to_json());
        if codes.is_empty() {
            return ResultReport::success();
        }

        let mut failures = Vec::new();
        let mut messages = Vec::new();
        for code in &codes {
            match terminology
                .validate_code(value_set, &code.code, code.system.as_deref())
                .await
            {
                Ok(result) if result.valid => {
                    return match result.warning {
                        Some(warning) => ResultReport::from_issue(Issue::warning(
                            IssueCode::BindingViolation,
                            format!("code {} in {value_set}: {warning}", code.code),
                            node.location(),
                        )),
                        None => ResultReport::success(),
                    };
                }
                Ok(result) => {
                    failures.push(code.code.clone());
                    messages.extend(result.message);
                }
                Err(e) => {
                    tracing::warn!("Terminology lookup in {} failed: {}", value_set, e);
                    return ResultReport::from_issue(Issue::warning(
                        IssueCode::BindingViolation,
                        format!("could not check {} binding to {value_set}: {e}", strength.as_str()),
                        node.location(),
                    ));
                }
            }
        }

        let mut message = format!(
            "code {} not in {} value set {value_set}",
            failures.join(", "),
            strength.as_str()
        );
        if !messages.is_empty() {
            message = format!("{message} ({})", messages.join("; "));
        }
        ResultReport::from_issue(Issue::new(
            severity,
            IssueCode::BindingViolation,
            message,
            node.location(),
        ))
    }

    async fn validate_invariant(
        &self,
        key: &str,
        expression: &str,
        human: &str,
        severity: Severity,
        node: &NodeRef,
    ) -> ResultReport {
        let Some(evaluator) = &self.invariants else {
            tracing::trace!("No invariant evaluator, skipping {}", key);
            return ResultReport::success();
        };
        match evaluator.evaluate(expression, node.as_ref()).await {
            Ok(true) => ResultReport::success(),
            Ok(false) => ResultReport::from_issue(Issue::new(
                severity,
                IssueCode::InvariantViolation,
                format!("{key}: {human}"),
                node.location(),
            )),
            Err(e) => error(
                IssueCode::InvariantEvaluationFailed,
                format!("{key}: {e}"),
                node.location(),
            ),
        }
    }

    async fn validate_referenced_instance(
        &self,
        targets: &[SchemaRef],
        node: &NodeRef,
        state: &ValidationState,
    ) -> ResultReport {
        let Some(resolver) = &self.references else {
            return ResultReport::success();
        };
        let Some(reference) = reference_string(node.as_ref()) else {
            return ResultReport::success();
        };
        if reference.starts_with('#') {
            return ResultReport::success();
        }

        match resolver.resolve(&reference).await {
            Ok(Some(document)) => {
                let candidates: Vec<Assertion> = targets
                    .iter()
                    .cloned()
                    .map(Assertion::SchemaReference)
                    .collect();
                match Assertion::any_of(candidates) {
                    Some(assertion) => self.validate_node(&assertion, &document, state).await,
                    None => ResultReport::success(),
                }
            }
            Ok(None) => ResultReport::from_issue(Issue::warning(
                IssueCode::ExternalReferenceUnresolved,
                format!("referenced resource {reference} was not found"),
                node.location(),
            )),
            Err(ReferenceError::ContractViolation { message }) => {
                ResultReport::from_issue(Issue::fatal(
                    IssueCode::InternalContractViolation,
                    format!("reference resolver broke its contract for {reference}: {message}"),
                    node.location(),
                ))
            }
            Err(e) => ResultReport::from_issue(Issue::warning(
                IssueCode::ExternalReferenceUnresolved,
                format!("could not resolve {reference}: {e}"),
                node.location(),
            )),
        }
    }
}

fn error(code: IssueCode, message: impl Into<String>, location: &str) -> ResultReport {
    ResultReport::from_issue(Issue::error(code, message, location))
}

fn check_cardinality(min: u32, max: Option<u32>, count: usize, location: &str) -> ResultReport {
    let below = count < min as usize;
    let above = max.is_some_and(|max| count > max as usize);
    if !below && !above {
        return ResultReport::success();
    }
    let max = max.map_or_else(|| "*".to_string(), |m| m.to_string());
    error(
        IssueCode::CardinalityViolation,
        format!("expected {min}..{max} occurrences, found {count}"),
        location,
    )
}

fn check_min_max(limit: &ComparableValue, mode: MinMaxMode, node: &dyn InstanceNode) -> ResultReport {
    let raw = node.value().cloned().unwrap_or_else(|| node.to_json());
    let Some(actual) = ComparableValue::from_json(&raw) else {
        return error(
            IssueCode::IncomparableValue,
            format!("value {raw} cannot be compared with {} {limit}", limit.kind_name()),
            node.location(),
        );
    };
    let Some(ordering) = actual.compare(limit) else {
        return error(
            IssueCode::IncomparableValue,
            format!(
                "{} {actual} cannot be compared with {} {limit}",
                actual.kind_name(),
                limit.kind_name()
            ),
            node.location(),
        );
    };
    match (mode, ordering) {
        (MinMaxMode::Minimum, std::cmp::Ordering::Less) => error(
            IssueCode::MinValueViolation,
            format!("value {actual} is below the minimum {limit}"),
            node.location(),
        ),
        (MinMaxMode::Maximum, std::cmp::Ordering::Greater) => error(
            IssueCode::MaxValueViolation,
            format!("value {actual} is above the maximum {limit}"),
            node.location(),
        ),
        _ => ResultReport::success(),
    }
}

fn check_primitive(kind: PrimitiveKind, node: &dyn InstanceNode) -> ResultReport {
    let result = match node.value() {
        Some(value) => kind.check(value),
        None => Err(format!(
            "expected a {kind} value, found {}",
            json_type_name(&node.to_json())
        )),
    };
    match result {
        Ok(()) => ResultReport::success(),
        Err(reason) => error(IssueCode::WrongType, reason, node.location()),
    }
}

fn render_primitive(value: &JsonValue) -> String {
    match value {
        JsonValue::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// `url` or `url|version`, optionally with a `#fragment` on the url.
fn is_canonical_shape(value: &str) -> bool {
    let (url, version) = match value.split_once('|') {
        Some((url, version)) => (url, Some(version)),
        None => (value, None),
    };
    let url_ok = !url.is_empty() && !url.chars().any(char::is_whitespace);
    let version_ok = version.is_none_or(|v| !v.is_empty() && !v.contains('|'));
    url_ok && version_ok
}

/// Literal reference carried by a Reference value (or a bare reference string).
fn reference_string(node: &dyn InstanceNode) -> Option<String> {
    if let Some(value) = node.value().and_then(JsonValue::as_str) {
        return Some(value.to_string());
    }
    node.children(Some("reference"))
        .first()
        .and_then(|r| r.value())
        .and_then(JsonValue::as_str)
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cardinality_bounds() {
        assert!(check_cardinality(1, Some(1), 1, "Patient.gender").is_success());
        assert!(!check_cardinality(1, Some(1), 0, "Patient.gender").is_success());
        assert!(!check_cardinality(0, Some(1), 2, "Patient.gender").is_success());
        assert!(check_cardinality(1, None, 7, "Patient.name").is_success());

        let report = check_cardinality(1, None, 0, "Patient.name");
        let issue = report.issues().next().unwrap();
        assert_eq!(issue.message, "expected 1..* occurrences, found 0");
        assert_eq!(issue.location, "Patient.name");
    }

    #[test]
    fn test_canonical_shape() {
        assert!(is_canonical_shape("http://example.org/vs"));
        assert!(is_canonical_shape("http://example.org/vs|1.0.0"));
        assert!(!is_canonical_shape("http://example.org/vs|"));
        assert!(!is_canonical_shape("has space"));
        assert!(!is_canonical_shape("a|b|c"));
    }

    #[test]
    fn test_render_primitive() {
        assert_eq!(render_primitive(&JsonValue::from(42)), "42");
        assert_eq!(render_primitive(&JsonValue::from("abc")), "abc");
        assert_eq!(render_primitive(&JsonValue::from(true)), "true");
    }
}
