//! Compound condition trees over element conditions

use std::fmt;
use std::str::FromStr;

use mobisync_core_types::LocatorStrategy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::errors::WaitError;

/// Leaf comparison kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ComparisonKind {
    Exists,
    NotExists,
    Equals,
    Contains,
    StartsWith,
    EndsWith,
    /// Expected value is a regular expression
    Matches,
}

impl ComparisonKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ComparisonKind::Exists => "exists",
            ComparisonKind::NotExists => "notExists",
            ComparisonKind::Equals => "equals",
            ComparisonKind::Contains => "contains",
            ComparisonKind::StartsWith => "startsWith",
            ComparisonKind::EndsWith => "endsWith",
            ComparisonKind::Matches => "matches",
        }
    }

    /// Existence checks only count matches and never read an element
    pub fn is_existence(&self) -> bool {
        matches!(self, ComparisonKind::Exists | ComparisonKind::NotExists)
    }

    /// Compare an observed value; an invalid pattern never matches
    pub fn compare(&self, actual: &str, expected: &str) -> bool {
        match self {
            ComparisonKind::Equals => actual == expected,
            ComparisonKind::Contains => actual.contains(expected),
            ComparisonKind::StartsWith => actual.starts_with(expected),
            ComparisonKind::EndsWith => actual.ends_with(expected),
            ComparisonKind::Matches => Regex::new(expected)
                .map(|pattern| pattern.is_match(actual))
                .unwrap_or(false),
            ComparisonKind::Exists | ComparisonKind::NotExists => false,
        }
    }
}

impl fmt::Display for ComparisonKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ComparisonKind {
    type Err = WaitError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "exists" => Ok(ComparisonKind::Exists),
            "notExists" => Ok(ComparisonKind::NotExists),
            "equals" => Ok(ComparisonKind::Equals),
            "contains" => Ok(ComparisonKind::Contains),
            "startsWith" => Ok(ComparisonKind::StartsWith),
            "endsWith" => Ok(ComparisonKind::EndsWith),
            "matches" => Ok(ComparisonKind::Matches),
            other => Err(WaitError::UnknownConditionKind(other.to_string())),
        }
    }
}

impl TryFrom<String> for ComparisonKind {
    type Error = WaitError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ComparisonKind> for String {
    fn from(kind: ComparisonKind) -> Self {
        kind.as_str().to_string()
    }
}

/// Leaf: one locator plus one comparison
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElementCondition {
    pub strategy: LocatorStrategy,
    pub selector: String,
    /// Attribute to compare; visibility is compared when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attribute: Option<String>,
    pub condition: ComparisonKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    /// Pick one element out of a multi-match result
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<usize>,
}

impl ElementCondition {
    pub fn new(strategy: LocatorStrategy, selector: impl Into<String>, condition: ComparisonKind) -> Self {
        Self {
            strategy,
            selector: selector.into(),
            attribute: None,
            condition,
            value: None,
            index: None,
        }
    }

    pub fn exists(strategy: LocatorStrategy, selector: impl Into<String>) -> Self {
        Self::new(strategy, selector, ComparisonKind::Exists)
    }

    pub fn not_exists(strategy: LocatorStrategy, selector: impl Into<String>) -> Self {
        Self::new(strategy, selector, ComparisonKind::NotExists)
    }

    pub fn with_attribute(mut self, attribute: impl Into<String>) -> Self {
        self.attribute = Some(attribute.into());
        self
    }

    pub fn with_value(mut self, value: impl Into<String>) -> Self {
        self.value = Some(value.into());
        self
    }

    pub fn with_index(mut self, index: usize) -> Self {
        self.index = Some(index);
        self
    }

    /// Value compared against; visibility checks default to `"true"`
    pub fn expected(&self) -> &str {
        self.value.as_deref().unwrap_or("true")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogicalOperator {
    And,
    Or,
    Not,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompoundCondition {
    #[serde(rename = "type")]
    pub kind: LogicalOperator,
    pub conditions: Vec<ConditionNode>,
}

/// Boolean tree of element conditions, depth unbounded
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConditionNode {
    Compound(CompoundCondition),
    Leaf(ElementCondition),
}

impl From<ElementCondition> for ConditionNode {
    fn from(condition: ElementCondition) -> Self {
        ConditionNode::Leaf(condition)
    }
}

impl ConditionNode {
    pub fn and(conditions: Vec<ConditionNode>) -> Self {
        Self::compound(LogicalOperator::And, conditions)
    }

    pub fn or(conditions: Vec<ConditionNode>) -> Self {
        Self::compound(LogicalOperator::Or, conditions)
    }

    pub fn not(condition: ConditionNode) -> Self {
        Self::compound(LogicalOperator::Not, vec![condition])
    }

    fn compound(kind: LogicalOperator, conditions: Vec<ConditionNode>) -> Self {
        ConditionNode::Compound(CompoundCondition { kind, conditions })
    }

    /// Parse a JSON tree, reporting unknown comparison kinds as such
    pub fn from_json(value: serde_json::Value) -> Result<Self, WaitError> {
        find_unknown_kind(&value)?;
        let node: ConditionNode = serde_json::from_value(value)
            .map_err(|err| WaitError::InvalidCondition(err.to_string()))?;
        node.validate()?;
        Ok(node)
    }

    /// Reject malformed trees before any evaluation starts
    pub fn validate(&self) -> Result<(), WaitError> {
        match self {
            ConditionNode::Leaf(leaf) => {
                if leaf.condition == ComparisonKind::Matches {
                    Regex::new(leaf.expected()).map_err(|err| {
                        WaitError::InvalidCondition(format!(
                            "invalid pattern for {}: {err}",
                            leaf.selector
                        ))
                    })?;
                }
                Ok(())
            }
            ConditionNode::Compound(node) => {
                if node.kind == LogicalOperator::Not && node.conditions.len() != 1 {
                    return Err(WaitError::InvalidCondition(format!(
                        "'not' requires exactly one child, got {}",
                        node.conditions.len()
                    )));
                }
                node.conditions.iter().try_for_each(ConditionNode::validate)
            }
        }
    }

    pub fn leaf_count(&self) -> usize {
        match self {
            ConditionNode::Leaf(_) => 1,
            ConditionNode::Compound(node) => node.conditions.iter().map(Self::leaf_count).sum(),
        }
    }
}

// Untagged deserialization hides the offending kind, so look for it first.
fn find_unknown_kind(value: &serde_json::Value) -> Result<(), WaitError> {
    let Some(object) = value.as_object() else {
        return Ok(());
    };
    if let Some(kind) = object.get("condition").and_then(|kind| kind.as_str()) {
        kind.parse::<ComparisonKind>()?;
    }
    if let Some(children) = object.get("conditions").and_then(|c| c.as_array()) {
        children.iter().try_for_each(find_unknown_kind)?;
    }
    Ok(())
}
