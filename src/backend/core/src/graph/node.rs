//! Node declarations.

use serde::{Deserialize, Serialize};
use std::borrow::Borrow;

use crate::action::ActionSpec;
use crate::probe::ProbeSpec;
use crate::retry::RetryPolicy;

/// Identifier of a service node (e.g. `database`, `app`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(String);

impl NodeId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for NodeId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl AsRef<str> for NodeId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for NodeId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// A service in the stack: how to tell it is ready, what to run once it is,
/// and which services must be ready first.
///
/// Nodes are read-only once the graph is built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    /// Unique identifier
    pub id: NodeId,

    /// Readiness check descriptor
    pub probe: ProbeSpec,

    /// One-shot action executed once the node is ready
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<ActionSpec>,

    /// Nodes that must be ready before this one is probed
    #[serde(default)]
    pub depends_on: Vec<NodeId>,

    /// Per-node override of the run-wide retry policy
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry: Option<RetryPolicy>,

    /// Free-form description shown by `stackup graph`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl Node {
    /// Create a node with no dependencies and no action.
    pub fn new(id: impl Into<NodeId>, probe: ProbeSpec) -> Self {
        Self {
            id: id.into(),
            probe,
            action: None,
            depends_on: Vec::new(),
            retry: None,
            description: None,
        }
    }

    /// Add a dependency.
    pub fn depends_on(mut self, dependency: impl Into<NodeId>) -> Self {
        self.depends_on.push(dependency.into());
        self
    }

    /// Attach a one-shot action.
    pub fn with_action(mut self, action: ActionSpec) -> Self {
        self.action = Some(action);
        self
    }

    /// Override the retry policy for this node.
    pub fn with_retry(mut self, policy: RetryPolicy) -> Self {
        self.retry = Some(policy);
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Retry policy for this node, falling back to `default`.
    pub fn policy<'a>(&'a self, default: &'a RetryPolicy) -> &'a RetryPolicy {
        self.retry.as_ref().unwrap_or(default)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_builder() {
        let node = Node::new("app", ProbeSpec::tcp("localhost", 8000))
            .depends_on("database")
            .depends_on("cache")
            .with_description("web application");

        assert_eq!(node.id.as_str(), "app");
        assert_eq!(node.depends_on, vec![NodeId::from("database"), NodeId::from("cache")]);
        assert!(node.action.is_none());
        assert_eq!(node.description.as_deref(), Some("web application"));
    }

    #[test]
    fn test_policy_override() {
        let default = RetryPolicy::default();
        let node = Node::new("cache", ProbeSpec::tcp("localhost", 6379));
        assert_eq!(node.policy(&default), &default);

        let custom = RetryPolicy::new(3, std::time::Duration::from_millis(10));
        let node = node.with_retry(custom.clone());
        assert_eq!(node.policy(&default), &custom);
    }

    #[test]
    fn test_node_deserializes_from_toml_shape() {
        let json = serde_json::json!({
            "id": "node-exporter",
            "probe": { "kind": "tcp", "host": "localhost", "port": 9100 },
            "depends_on": []
        });
        let node: Node = serde_json::from_value(json).unwrap();
        assert_eq!(node.id.as_str(), "node-exporter");
        assert_eq!(node.probe, ProbeSpec::tcp("localhost", 9100));
    }
}
