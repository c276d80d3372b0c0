//! # Spec-level data: runner messages and the spec record.
//!
//! A [`SpecRecord`] is created when a spec begins and sealed exactly once when
//! it ends. Sealing stamps the end time and computes `passed` as the AND over
//! every node record (vacuously `true` for an empty roster). After sealing the
//! record refuses further writes.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::node::{NodeRecord, NodeTest};

/// Severity of a runner log message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Debug,
    #[default]
    Info,
    Warning,
    Error,
}

impl LogLevel {
    /// Upper-case label used in log lines.
    pub fn as_label(&self) -> &'static str {
        match self {
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Warning => "WARNING",
            LogLevel::Error => "ERROR",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_label())
    }
}

/// A log message emitted by the test runner itself (not by a node).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunnerMessage {
    pub at: DateTime<Utc>,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub level: LogLevel,
}

impl RunnerMessage {
    /// Creates a runner message stamped with the current time.
    pub fn now(text: impl Into<String>, source: impl Into<String>, level: LogLevel) -> Self {
        Self {
            at: Utc::now(),
            text: text.into(),
            source: source.into(),
            level,
        }
    }
}

impl fmt::Display for RunnerMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[RUNNER][{}][{}][{}]: {}",
            self.at.format("%H:%M:%S%.3f"),
            self.level,
            self.source,
            self.text
        )
    }
}

/// All data collected for one spec.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpecRecord {
    fact_name: String,
    started_at: DateTime<Utc>,
    #[serde(default)]
    ended_at: Option<DateTime<Utc>>,
    #[serde(default)]
    passed: Option<bool>,
    #[serde(default)]
    nodes: BTreeMap<usize, NodeRecord>,
    #[serde(default)]
    runner_messages: Vec<RunnerMessage>,
    #[serde(default)]
    failure: Option<String>,
}

impl SpecRecord {
    /// Creates an open record.
    pub fn new(fact_name: impl Into<String>, started_at: DateTime<Utc>) -> Self {
        Self {
            fact_name: fact_name.into(),
            started_at,
            ended_at: None,
            passed: None,
            nodes: BTreeMap::new(),
            runner_messages: Vec::new(),
            failure: None,
        }
    }

    /// Builds the sealed, failed record of a spec that could not be collected.
    ///
    /// Every roster entry gets a placeholder node record without an outcome,
    /// so the node map still matches the roster.
    pub(crate) fn aborted(
        fact_name: impl Into<String>,
        roster: &[NodeTest],
        started_at: DateTime<Utc>,
        reason: impl Into<String>,
    ) -> Self {
        let mut record = Self::new(fact_name, started_at);
        record.add_nodes(
            roster
                .iter()
                .map(|n| NodeRecord::with_start(n.index, n.role.clone(), started_at)),
        );
        record.failure = Some(reason.into());
        record.seal(Utc::now());
        record
    }

    /// Formats the canonical `Class.method` spec name.
    pub fn fact_name_of(class_name: &str, method_name: &str) -> String {
        format!("{class_name}.{method_name}")
    }

    /// Appends a runner message; refused once sealed.
    pub(crate) fn put_runner_message(&mut self, message: RunnerMessage) -> bool {
        if self.is_sealed() {
            return false;
        }
        self.runner_messages.push(message);
        true
    }

    /// Merges node snapshots, keyed by node index; refused once sealed.
    pub(crate) fn add_nodes(&mut self, nodes: impl IntoIterator<Item = NodeRecord>) -> bool {
        if self.is_sealed() {
            return false;
        }
        for node in nodes {
            self.nodes.insert(node.node_index(), node);
        }
        true
    }

    /// Stamps the end time and computes `passed`. Only the first call has any effect.
    pub(crate) fn seal(&mut self, at: DateTime<Utc>) -> bool {
        if self.is_sealed() {
            return false;
        }
        let nodes_passed = self.nodes.values().all(NodeRecord::is_passed);
        self.passed = Some(self.failure.is_none() && nodes_passed);
        self.ended_at = Some(at);
        true
    }

    pub fn is_sealed(&self) -> bool {
        self.ended_at.is_some()
    }

    pub fn fact_name(&self) -> &str {
        &self.fact_name
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn ended_at(&self) -> Option<DateTime<Utc>> {
        self.ended_at
    }

    /// Computed outcome; `None` until sealed.
    pub fn passed(&self) -> Option<bool> {
        self.passed
    }

    /// Outcome with "not sealed" treated as a failure.
    pub fn is_passed(&self) -> bool {
        self.passed.unwrap_or(false)
    }

    pub fn nodes(&self) -> &BTreeMap<usize, NodeRecord> {
        &self.nodes
    }

    pub fn runner_messages(&self) -> &[RunnerMessage] {
        &self.runner_messages
    }

    /// Why the spec was aborted, if it was.
    pub fn failure(&self) -> Option<&str> {
        self.failure.as_deref()
    }

    pub fn elapsed(&self) -> Option<Duration> {
        self.ended_at
            .and_then(|end| (end - self.started_at).to_std().ok())
    }
}
