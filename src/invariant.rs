//! Invariant evaluation capability.
//!
//! The engine does not ship an expression language. Invariants are handed to
//! an [`InvariantEvaluator`] supplied by the caller (typically a FHIRPath
//! engine); without one, invariant assertions are skipped.

use async_trait::async_trait;

use crate::error::EvaluationError;
use crate::instance::InstanceNode;

/// Boolean expression evaluation against an instance node.
#[async_trait]
pub trait InvariantEvaluator: Send + Sync {
    async fn evaluate(
        &self,
        expression: &str,
        node: &dyn InstanceNode,
    ) -> Result<bool, EvaluationError>;
}

/// Evaluator backed by a plain function.
///
/// ```ignore
/// let evaluator = FnInvariantEvaluator::new(|expression, node| {
///     Ok(expression != "name.exists()" || !node.children(Some("name")).is_empty())
/// });
/// ```
pub struct FnInvariantEvaluator<F> {
    evaluate: F,
}

impl<F> FnInvariantEvaluator<F>
where
    F: Fn(&str, &dyn InstanceNode) -> Result<bool, EvaluationError> + Send + Sync,
{
    pub fn new(evaluate: F) -> Self {
        Self { evaluate }
    }
}

#[async_trait]
impl<F> InvariantEvaluator for FnInvariantEvaluator<F>
where
    F: Fn(&str, &dyn InstanceNode) -> Result<bool, EvaluationError> + Send + Sync,
{
    async fn evaluate(
        &self,
        expression: &str,
        node: &dyn InstanceNode,
    ) -> Result<bool, EvaluationError> {
        (self.evaluate)(expression, node)
    }
}
