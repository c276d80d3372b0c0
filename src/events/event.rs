//! # Inbound events of a multi-node test run.
//!
//! [`Event`] is the closed vocabulary accepted by the [`SinkHub`](crate::SinkHub)
//! and every sink:
//! - **Spec lifecycle**: [`BeginSpec`], [`EndSpec`]
//! - **Node-scoped**: node log fragments, node pass, node fail (each carries `node_index`)
//! - **Runner-scoped**: runner log messages
//! - **Run lifecycle**: end of run
//! - **Raw**: an unparsed text line, handed to the configured line parser
//!
//! ## Example
//! ```rust
//! use multinode_reporter::{BeginSpec, Event, NodeTest};
//!
//! let begin = BeginSpec::new(
//!     "ClusterSpec",
//!     "must_form_cluster",
//!     vec![NodeTest::new(0, "seed", "ClusterSpec", "must_form_cluster")],
//! );
//! assert_eq!(begin.fact_name(), "ClusterSpec.must_form_cluster");
//!
//! let ev = Event::node_pass(0, "seed", "ok");
//! assert_eq!(ev.node_index(), Some(0));
//! assert_eq!(ev.as_label(), "node_pass");
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::{LogLevel, NodeMessage, NodeTest, RunnerMessage, SpecRecord};

/// A spec is starting on the listed nodes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BeginSpec {
    pub class_name: String,
    pub method_name: String,
    #[serde(default)]
    pub nodes: Vec<NodeTest>,
}

impl BeginSpec {
    pub fn new(
        class_name: impl Into<String>,
        method_name: impl Into<String>,
        nodes: Vec<NodeTest>,
    ) -> Self {
        Self {
            class_name: class_name.into(),
            method_name: method_name.into(),
            nodes,
        }
    }

    /// `Class.method` name of the spec.
    pub fn fact_name(&self) -> String {
        SpecRecord::fact_name_of(&self.class_name, &self.method_name)
    }
}

/// The active spec has finished.
///
/// The names are informational only; the coordinator always ends the active spec.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndSpec {
    #[serde(default)]
    pub class_name: Option<String>,
    #[serde(default)]
    pub method_name: Option<String>,
}

/// A piece of log output captured from a node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeLogFragment {
    pub node_index: usize,
    #[serde(default)]
    pub role: String,
    pub at: DateTime<Utc>,
    #[serde(default)]
    pub text: String,
}

impl NodeLogFragment {
    pub fn to_node_message(&self) -> NodeMessage {
        NodeMessage::fragment(self.node_index, self.role.clone(), self.text.clone(), self.at)
    }
}

/// A node reported its outcome for the active spec.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeResult {
    pub node_index: usize,
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub text: String,
    pub at: DateTime<Utc>,
}

impl NodeResult {
    pub fn to_node_message(&self, passed: bool) -> NodeMessage {
        NodeMessage::outcome(
            self.node_index,
            self.role.clone(),
            self.text.clone(),
            passed,
            self.at,
        )
    }
}

/// Every inbound event kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    BeginSpec(BeginSpec),
    EndSpec(EndSpec),
    NodeLog(NodeLogFragment),
    RunnerLog(RunnerMessage),
    NodePass(NodeResult),
    NodeFail(NodeResult),
    EndRun,
    /// A text line that has not been parsed yet.
    Raw(String),
}

impl Event {
    /// Node log fragment stamped now.
    pub fn node_log(node_index: usize, role: impl Into<String>, text: impl Into<String>) -> Self {
        Event::NodeLog(NodeLogFragment {
            node_index,
            role: role.into(),
            at: Utc::now(),
            text: text.into(),
        })
    }

    /// Node success stamped now.
    pub fn node_pass(node_index: usize, role: impl Into<String>, text: impl Into<String>) -> Self {
        Event::NodePass(NodeResult {
            node_index,
            role: role.into(),
            text: text.into(),
            at: Utc::now(),
        })
    }

    /// Node failure stamped now.
    pub fn node_fail(node_index: usize, role: impl Into<String>, text: impl Into<String>) -> Self {
        Event::NodeFail(NodeResult {
            node_index,
            role: role.into(),
            text: text.into(),
            at: Utc::now(),
        })
    }

    /// Runner log message stamped now.
    pub fn runner_log(text: impl Into<String>, source: impl Into<String>, level: LogLevel) -> Self {
        Event::RunnerLog(RunnerMessage::now(text, source, level))
    }

    /// Index of the addressed node for node-scoped events.
    pub fn node_index(&self) -> Option<usize> {
        match self {
            Event::NodeLog(f) => Some(f.node_index),
            Event::NodePass(r) | Event::NodeFail(r) => Some(r.node_index),
            _ => None,
        }
    }

    /// Node message carried by node-scoped events.
    pub fn to_node_message(&self) -> Option<NodeMessage> {
        match self {
            Event::NodeLog(f) => Some(f.to_node_message()),
            Event::NodePass(r) => Some(r.to_node_message(true)),
            Event::NodeFail(r) => Some(r.to_node_message(false)),
            _ => None,
        }
    }

    /// Returns a short stable label (snake_case) for use in logs.
    pub fn as_label(&self) -> &'static str {
        match self {
            Event::BeginSpec(_) => "begin_spec",
            Event::EndSpec(_) => "end_spec",
            Event::NodeLog(_) => "node_log",
            Event::RunnerLog(_) => "runner_log",
            Event::NodePass(_) => "node_pass",
            Event::NodeFail(_) => "node_fail",
            Event::EndRun => "end_run",
            Event::Raw(_) => "raw",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::NodeMessageKind;

    #[test]
    fn test_node_scoped_events_carry_index() {
        assert_eq!(Event::node_log(3, "r", "x").node_index(), Some(3));
        assert_eq!(Event::node_fail(1, "r", "x").node_index(), Some(1));
        assert_eq!(Event::EndRun.node_index(), None);
        assert_eq!(Event::Raw("line".into()).node_index(), None);
    }

    #[test]
    fn test_node_messages_keep_kind() {
        let pass = Event::node_pass(0, "seed", "ok").to_node_message();
        let fail = Event::node_fail(0, "seed", "no").to_node_message();
        let log = Event::node_log(0, "seed", "..").to_node_message();

        assert_eq!(pass.map(|m| m.kind), Some(NodeMessageKind::Passed));
        assert_eq!(fail.map(|m| m.kind), Some(NodeMessageKind::Failed));
        assert_eq!(log.map(|m| m.kind), Some(NodeMessageKind::Fragment));
        assert_eq!(Event::EndRun.to_node_message(), None);
    }
}
