//! Slice classification and slicing rules.
//!
//! Every item of a sliced element is assigned to the first slice whose
//! conditions all hold. Each slice's schema is then evaluated against its
//! own group, followed by the slice cardinalities and the closed, ordered and
//! openAtEnd rules.

use async_recursion::async_recursion;

use crate::instance::NodeRef;
use crate::outcome::{Issue, IssueCode, ResultReport};
use crate::schema::{Slice, SliceCondition, SlicingRules};

use super::compare::{deep_partial_match, exact_match};
use super::{ProfileValidator, ValidationState};

impl ProfileValidator {
    #[async_recursion]
    pub(super) async fn validate_slicing(
        &self,
        slices: &[Slice],
        rules: SlicingRules,
        ordered: bool,
        nodes: &[NodeRef],
        location: &str,
        state: &ValidationState,
    ) -> ResultReport {
        let mut assignment: Vec<Option<usize>> = Vec::with_capacity(nodes.len());
        for node in nodes {
            assignment.push(self.classify(slices, node, state).await);
        }

        let mut reports = Vec::new();
        for (index, slice) in slices.iter().enumerate() {
            let group: Vec<NodeRef> = nodes
                .iter()
                .zip(&assignment)
                .filter(|(_, slot)| **slot == Some(index))
                .map(|(node, _)| NodeRef::clone(node))
                .collect();
            let slice_location = format!("{location}:{}", slice.name);

            reports.push(check_slice_cardinality(slice, group.len(), &slice_location));
            reports.push(
                self.validate_element_group(&slice.schema, &group, &slice_location, state)
                    .await,
            );
        }

        reports.extend(check_rules(nodes, &assignment, rules, ordered));
        ResultReport::combine(reports)
    }

    async fn classify(
        &self,
        slices: &[Slice],
        node: &NodeRef,
        state: &ValidationState,
    ) -> Option<usize> {
        for (index, slice) in slices.iter().enumerate() {
            if self.matches_slice(slice, node, state).await {
                return Some(index);
            }
        }
        None
    }

    async fn matches_slice(&self, slice: &Slice, node: &NodeRef, state: &ValidationState) -> bool {
        for condition in &slice.conditions {
            if !self.holds(condition, slice, node, state).await {
                return false;
            }
        }
        true
    }

    async fn holds(
        &self,
        condition: &SliceCondition,
        slice: &Slice,
        node: &NodeRef,
        state: &ValidationState,
    ) -> bool {
        match condition {
            SliceCondition::Value { path, value } => nodes_at(node, path)
                .iter()
                .any(|n| exact_match(&n.to_json(), value)),
            SliceCondition::Pattern { path, value } => nodes_at(node, path)
                .iter()
                .any(|n| deep_partial_match(&n.to_json(), value)),
            SliceCondition::Exists { path, exists } => {
                nodes_at(node, path).is_empty() != *exists
            }
            SliceCondition::Type { path, type_code } => nodes_at(node, path)
                .iter()
                .any(|n| n.instance_type() == Some(type_code.as_str())),
            SliceCondition::Profile { path, reference } => {
                for candidate in nodes_at(node, path) {
                    if self
                        .validate_reference(reference, &candidate, state)
                        .await
                        .is_success()
                    {
                        return true;
                    }
                }
                false
            }
            SliceCondition::Conforms => self
                .evaluate(&slice.schema, node, state)
                .await
                .is_success(),
        }
    }
}

/// Nodes reached from `node` by a dotted discriminator path (`$this` is the
/// node itself). Segments also match choice members (`value` → `valueQuantity`).
fn nodes_at(node: &NodeRef, path: &str) -> Vec<NodeRef> {
    let mut current = vec![NodeRef::clone(node)];
    if path == "$this" {
        return current;
    }
    for segment in path.split('.') {
        let choice = format!("{segment}[x]");
        current = current
            .iter()
            .flat_map(|n| {
                let exact = n.children(Some(segment));
                if exact.is_empty() {
                    n.children(Some(choice.as_str()))
                } else {
                    exact
                }
            })
            .collect();
        if current.is_empty() {
            break;
        }
    }
    current
}

fn check_slice_cardinality(slice: &Slice, count: usize, location: &str) -> ResultReport {
    let below = count < slice.min as usize;
    let above = slice.max.is_some_and(|max| count > max as usize);
    if !below && !above {
        return ResultReport::success();
    }
    let max = slice
        .max
        .map_or_else(|| "*".to_string(), |max| max.to_string());
    ResultReport::from_issue(Issue::error(
        IssueCode::SliceCardinality,
        format!(
            "slice '{}' expects {}..{max} items, found {count}",
            slice.name, slice.min
        ),
        location,
    ))
}

fn check_rules(
    nodes: &[NodeRef],
    assignment: &[Option<usize>],
    rules: SlicingRules,
    ordered: bool,
) -> Vec<ResultReport> {
    let mut reports = Vec::new();
    let last_matched = assignment.iter().rposition(Option::is_some);

    for (position, (node, slot)) in nodes.iter().zip(assignment).enumerate() {
        if slot.is_some() {
            continue;
        }
        match rules {
            SlicingRules::Closed => reports.push(ResultReport::from_issue(Issue::error(
                IssueCode::SlicingUnmatched,
                "item does not match any slice of a closed slicing",
                node.location(),
            ))),
            SlicingRules::OpenAtEnd if last_matched.is_some_and(|last| position < last) => {
                reports.push(ResultReport::from_issue(Issue::error(
                    IssueCode::SlicingOrder,
                    "unmatched items must come after all sliced items",
                    node.location(),
                )))
            }
            _ => {}
        }
    }

    if ordered {
        let mut highest = 0;
        for (node, slot) in nodes.iter().zip(assignment) {
            let Some(index) = *slot else { continue };
            if index < highest {
                reports.push(ResultReport::from_issue(Issue::error(
                    IssueCode::SlicingOrder,
                    "item appears out of slice order",
                    node.location(),
                )));
                break;
            }
            highest = index;
        }
    }
    reports
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instance::{InstanceNode, JsonNode};
    use crate::schema::ElementSchema;
    use serde_json::json;
    use std::sync::Arc;

    fn items() -> Vec<NodeRef> {
        JsonNode::from_resource(json!({
            "resourceType": "Observation",
            "component": [
                {"code": {"text": "a"}},
                {"code": {"text": "b"}},
                {"code": {"text": "c"}}
            ]
        }))
        .children(Some("component"))
    }

    #[test]
    fn test_nodes_at_follows_paths_and_choices() {
        let node = JsonNode::from_resource(json!({
            "resourceType": "Observation",
            "code": {"coding": [{"code": "x"}, {"code": "y"}]},
            "valueQuantity": {"value": 1}
        }))
        .into_ref();
        assert_eq!(nodes_at(&node, "code.coding.code").len(), 2);
        assert_eq!(nodes_at(&node, "value").len(), 1);
        assert_eq!(nodes_at(&node, "$this").len(), 1);
        assert!(nodes_at(&node, "code.missing.code").is_empty());
    }

    #[test]
    fn test_closed_and_open_at_end_rules() {
        let nodes = items();
        let assignment = [Some(0), None, Some(1)];

        let closed = check_rules(&nodes, &assignment, SlicingRules::Closed, false);
        assert_eq!(closed.len(), 1);
        assert_eq!(
            closed[0].issues().next().unwrap().code,
            IssueCode::SlicingUnmatched
        );

        let at_end = check_rules(&nodes, &assignment, SlicingRules::OpenAtEnd, false);
        assert_eq!(at_end[0].issues().next().unwrap().code, IssueCode::SlicingOrder);

        assert!(check_rules(&nodes, &assignment, SlicingRules::Open, false).is_empty());
        assert!(check_rules(&nodes, &[Some(0), Some(1), None], SlicingRules::OpenAtEnd, false).is_empty());
    }

    #[test]
    fn test_ordered_slices() {
        let nodes = items();
        let reports = check_rules(&nodes, &[Some(1), Some(0), Some(1)], SlicingRules::Open, true);
        assert_eq!(reports.len(), 1);
        assert_eq!(
            reports[0].issues().next().unwrap().location,
            "Observation.component[1]"
        );
        assert!(check_rules(&nodes, &[Some(0), Some(0), Some(1)], SlicingRules::Open, true).is_empty());
    }

    #[test]
    fn test_slice_cardinality() {
        let slice = Slice {
            name: "systolic".to_string(),
            conditions: Vec::new(),
            min: 1,
            max: Some(1),
            schema: Arc::new(ElementSchema::new("Observation.component:systolic", Vec::new())),
        };
        assert!(check_slice_cardinality(&slice, 1, "x").is_success());
        let report = check_slice_cardinality(&slice, 0, "Observation.component:systolic");
        assert_eq!(
            report.issues().next().unwrap().message,
            "slice 'systolic' expects 1..1 items, found 0"
        );
    }
}
