//! Recursive evaluation of condition trees against the device UI

use std::sync::Arc;

use async_recursion::async_recursion;
use mobisync_core_types::{ElementHandle, ElementLocator, SyncError};
use tracing::debug;

use crate::conditions::{ComparisonKind, ConditionNode, ElementCondition, LogicalOperator};
use crate::errors::WaitError;

/// Evaluates [`ConditionNode`] trees with short-circuit semantics.
///
/// Leaf failures (missing or stale elements, driver errors) evaluate to
/// `false`; only malformed trees produce an error.
pub struct CompoundConditionEvaluator {
    locator: Arc<dyn ElementLocator>,
}

impl CompoundConditionEvaluator {
    pub fn new(locator: Arc<dyn ElementLocator>) -> Self {
        Self { locator }
    }

    #[async_recursion]
    pub async fn evaluate(&self, node: &ConditionNode) -> Result<bool, WaitError> {
        match node {
            ConditionNode::Leaf(leaf) => Ok(self.evaluate_leaf(leaf).await),
            ConditionNode::Compound(compound) => match compound.kind {
                LogicalOperator::And => {
                    for child in &compound.conditions {
                        if !self.evaluate(child).await? {
                            return Ok(false);
                        }
                    }
                    Ok(true)
                }
                LogicalOperator::Or => {
                    for child in &compound.conditions {
                        if self.evaluate(child).await? {
                            return Ok(true);
                        }
                    }
                    Ok(false)
                }
                LogicalOperator::Not => match compound.conditions.as_slice() {
                    [child] => Ok(!self.evaluate(child).await?),
                    children => Err(WaitError::InvalidCondition(format!(
                        "'not' requires exactly one child, got {}",
                        children.len()
                    ))),
                },
            },
        }
    }

    pub async fn evaluate_leaf(&self, condition: &ElementCondition) -> bool {
        match self.try_evaluate_leaf(condition).await {
            Ok(result) => result,
            Err(err) => {
                debug!(
                    strategy = %condition.strategy,
                    selector = %condition.selector,
                    error = %err,
                    "Leaf condition failed, treating as false"
                );
                false
            }
        }
    }

    async fn try_evaluate_leaf(&self, condition: &ElementCondition) -> Result<bool, SyncError> {
        match condition.condition {
            ComparisonKind::Exists => Ok(self.count(condition).await? > 0),
            ComparisonKind::NotExists => Ok(self.count(condition).await? == 0),
            kind => {
                let element = self.locate(condition).await?;
                let actual = match &condition.attribute {
                    Some(name) => match element.attribute(name).await? {
                        Some(value) => value,
                        None => return Ok(false),
                    },
                    None => element.is_displayed().await?.to_string(),
                };
                Ok(kind.compare(&actual, condition.expected()))
            }
        }
    }

    async fn count(&self, condition: &ElementCondition) -> Result<usize, SyncError> {
        Ok(self
            .locator
            .find_elements(condition.strategy, &condition.selector)
            .await?
            .len())
    }

    async fn locate(&self, condition: &ElementCondition) -> Result<ElementHandle, SyncError> {
        match condition.index {
            Some(index) => self
                .locator
                .find_elements(condition.strategy, &condition.selector)
                .await?
                .into_iter()
                .nth(index)
                .ok_or_else(|| {
                    SyncError::NotFound(format!(
                        "{}={}[{index}]",
                        condition.strategy, condition.selector
                    ))
                }),
            None => {
                self.locator
                    .find_element(condition.strategy, &condition.selector, None)
                    .await
            }
        }
    }
}
