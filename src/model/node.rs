//! # Per-node data: roster entries, node messages and the node record.
//!
//! A [`NodeRecord`] is owned by exactly one node aggregator task while a spec is
//! running. Everything that leaves the aggregator is a clone, so a snapshot can
//! never observe later writes.
//!
//! ## Rules
//! - `put` is append-only; the event stream keeps arrival order
//! - `Passed`/`Failed` messages are completion events and also land in `results`
//! - a failure is sticky: a later `Passed` never flips the node back to passing
//! - messages addressed to another node index are dropped

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Static description of one participant of a spec.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeTest {
    /// Position of the node in the 0..N roster.
    pub index: usize,
    /// Role name given to the node by the spec.
    pub role: String,
    /// Name of the class (or module) that contains the spec.
    pub test_name: String,
    /// Name of the spec method.
    pub method_name: String,
}

impl NodeTest {
    pub fn new(
        index: usize,
        role: impl Into<String>,
        test_name: impl Into<String>,
        method_name: impl Into<String>,
    ) -> Self {
        Self {
            index,
            role: role.into(),
            test_name: test_name.into(),
            method_name: method_name.into(),
        }
    }
}

/// Classification of a [`NodeMessage`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeMessageKind {
    /// A piece of log output captured from the node.
    Fragment,
    /// The node reported that it completed the spec successfully.
    Passed,
    /// The node reported that it failed the spec.
    Failed,
}

/// One timestamped message produced by a node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeMessage {
    pub node_index: usize,
    #[serde(default)]
    pub role: String,
    pub at: DateTime<Utc>,
    #[serde(default)]
    pub text: String,
    pub kind: NodeMessageKind,
}

impl NodeMessage {
    /// Creates a log fragment stamped with `at`.
    pub fn fragment(
        node_index: usize,
        role: impl Into<String>,
        text: impl Into<String>,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            node_index,
            role: role.into(),
            at,
            text: text.into(),
            kind: NodeMessageKind::Fragment,
        }
    }

    /// Creates a completion message (`Passed` or `Failed`) stamped with `at`.
    pub fn outcome(
        node_index: usize,
        role: impl Into<String>,
        text: impl Into<String>,
        passed: bool,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            node_index,
            role: role.into(),
            at,
            text: text.into(),
            kind: if passed {
                NodeMessageKind::Passed
            } else {
                NodeMessageKind::Failed
            },
        }
    }

    /// Returns the reported outcome for completion messages.
    pub fn passed(&self) -> Option<bool> {
        match self.kind {
            NodeMessageKind::Fragment => None,
            NodeMessageKind::Passed => Some(true),
            NodeMessageKind::Failed => Some(false),
        }
    }
}

impl fmt::Display for NodeMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[NODE{}:{}][{}]: {}",
            self.node_index,
            self.role,
            self.at.format("%H:%M:%S%.3f"),
            self.text
        )
    }
}

/// Aggregated data of one node for one spec.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeRecord {
    node_index: usize,
    #[serde(default)]
    node_role: String,
    #[serde(default)]
    events: Vec<NodeMessage>,
    #[serde(default)]
    results: Vec<NodeMessage>,
    #[serde(default)]
    passed: Option<bool>,
    started_at: DateTime<Utc>,
    #[serde(default)]
    ended_at: Option<DateTime<Utc>>,
}

impl NodeRecord {
    /// Creates an empty record that started now.
    pub fn new(node_index: usize, node_role: impl Into<String>) -> Self {
        Self::with_start(node_index, node_role, Utc::now())
    }

    /// Creates an empty record with an explicit start time.
    pub fn with_start(node_index: usize, node_role: impl Into<String>, at: DateTime<Utc>) -> Self {
        Self {
            node_index,
            node_role: node_role.into(),
            events: Vec::new(),
            results: Vec::new(),
            passed: None,
            started_at: at,
            ended_at: None,
        }
    }

    /// Appends a message, returning `false` when it was dropped as malformed.
    pub(crate) fn put(&mut self, message: NodeMessage) -> bool {
        if message.node_index != self.node_index {
            return false;
        }
        if let Some(outcome) = message.passed() {
            self.passed = Some(self.passed.unwrap_or(true) && outcome);
            self.ended_at = Some(match self.ended_at {
                Some(prev) => prev.max(message.at),
                None => message.at,
            });
            self.results.push(message.clone());
        }
        self.events.push(message);
        true
    }

    pub fn node_index(&self) -> usize {
        self.node_index
    }

    pub fn node_role(&self) -> &str {
        &self.node_role
    }

    /// Every message in arrival order.
    pub fn events(&self) -> &[NodeMessage] {
        &self.events
    }

    /// Completion messages in arrival order.
    pub fn results(&self) -> &[NodeMessage] {
        &self.results
    }

    /// Reported outcome; `None` when the node never completed.
    pub fn passed(&self) -> Option<bool> {
        self.passed
    }

    /// Outcome with "never completed" treated as a failure.
    pub fn is_passed(&self) -> bool {
        self.passed.unwrap_or(false)
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn ended_at(&self) -> Option<DateTime<Utc>> {
        self.ended_at
    }

    /// Time between start and the last completion message.
    pub fn elapsed(&self) -> Option<Duration> {
        self.ended_at
            .and_then(|end| (end - self.started_at).to_std().ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(secs, 0).expect("valid timestamp")
    }

    #[test]
    fn test_fragments_do_not_complete_the_node() {
        let mut rec = NodeRecord::with_start(0, "first", at(0));
        assert!(rec.put(NodeMessage::fragment(0, "first", "hello", at(1))));
        assert!(rec.put(NodeMessage::fragment(0, "first", "world", at(2))));

        assert_eq!(rec.events().len(), 2);
        assert!(rec.results().is_empty());
        assert_eq!(rec.passed(), None);
        assert!(!rec.is_passed());
        assert_eq!(rec.elapsed(), None);
    }

    #[test]
    fn test_success_sets_passed_and_end_time() {
        let mut rec = NodeRecord::with_start(1, "second", at(10));
        rec.put(NodeMessage::outcome(1, "second", "done", true, at(15)));

        assert_eq!(rec.passed(), Some(true));
        assert_eq!(rec.ended_at(), Some(at(15)));
        assert_eq!(rec.elapsed(), Some(Duration::from_secs(5)));
        assert_eq!(rec.results().len(), 1);
    }

    #[test]
    fn test_failure_is_sticky() {
        let mut rec = NodeRecord::with_start(0, "first", at(0));
        rec.put(NodeMessage::outcome(0, "first", "boom", false, at(3)));
        rec.put(NodeMessage::outcome(0, "first", "late pass", true, at(2)));

        assert_eq!(rec.passed(), Some(false));
        assert_eq!(rec.ended_at(), Some(at(3)));
        assert_eq!(rec.results().len(), 2);
    }

    #[test]
    fn test_foreign_node_index_is_dropped() {
        let mut rec = NodeRecord::with_start(0, "first", at(0));
        assert!(!rec.put(NodeMessage::outcome(3, "other", "nope", true, at(1))));
        assert!(rec.events().is_empty());
        assert_eq!(rec.passed(), None);
    }

    #[test]
    fn test_display_includes_node_and_role() {
        let msg = NodeMessage::fragment(2, "seed", "joined cluster", at(0));
        let line = msg.to_string();
        assert!(line.starts_with("[NODE2:seed]["), "{line}");
        assert!(line.ends_with("]: joined cluster"), "{line}");
    }
}
