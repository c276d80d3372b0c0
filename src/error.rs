//! Error types used by the coordinators, sinks and stores.
//!
//! - [`CoordinatorError`]: errors raised by the run/spec coordination protocol.
//! - [`SinkError`]: errors raised while talking to a sink pipeline.
//! - [`StoreError`]: errors raised by a [`TestRunStore`](crate::TestRunStore).
//!
//! Every type provides `as_label` (stable snake_case label for logs).

use std::time::Duration;
use thiserror::Error;

/// # Errors produced by the coordination protocol.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoordinatorError {
    /// A spec was begun while another one was still active.
    ///
    /// The active spec is left untouched; the run is marked aborted.
    #[error("cannot begin spec {requested:?}: spec {active:?} is still active")]
    ProtocolViolation {
        /// Name of the spec that is active.
        active: String,
        /// Name of the spec that was requested.
        requested: String,
    },

    /// A node message addressed an index that is not in the spec roster.
    #[error("spec {spec:?} has no node with index {index}")]
    UnknownNodeIndex { spec: String, index: usize },

    /// The roster of a spec listed the same node index twice.
    #[error("spec {spec:?} lists node index {index} more than once")]
    DuplicateNodeIndex { spec: String, index: usize },

    /// Not every participant answered a snapshot request within the deadline.
    #[error("{scope} snapshot timed out after {timeout:?}; missing nodes: {missing:?}")]
    SnapshotTimeout {
        /// What was being collected (a spec name).
        scope: String,
        /// The deadline that elapsed.
        timeout: Duration,
        /// Node indices that did not reply (empty when the spec itself did not).
        missing: Vec<usize>,
    },

    /// The run was aborted earlier; no more specs are accepted.
    #[error("run aborted: {reason}")]
    RunAborted { reason: String },

    /// The coordinator has already exited.
    #[error("coordinator closed")]
    Closed,
}

impl CoordinatorError {
    /// Returns a short stable label (snake_case) for use in logs.
    ///
    /// # Example
    /// ```
    /// use multinode_reporter::CoordinatorError;
    ///
    /// let err = CoordinatorError::UnknownNodeIndex { spec: "A.b".into(), index: 7 };
    /// assert_eq!(err.as_label(), "coordinator_unknown_node_index");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            CoordinatorError::ProtocolViolation { .. } => "coordinator_protocol_violation",
            CoordinatorError::UnknownNodeIndex { .. } => "coordinator_unknown_node_index",
            CoordinatorError::DuplicateNodeIndex { .. } => "coordinator_duplicate_node_index",
            CoordinatorError::SnapshotTimeout { .. } => "coordinator_snapshot_timeout",
            CoordinatorError::RunAborted { .. } => "coordinator_run_aborted",
            CoordinatorError::Closed => "coordinator_closed",
        }
    }
}

/// # Errors produced while driving a sink.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SinkError {
    /// The sink worker is gone (closed or crashed).
    #[error("sink {sink:?} is closed")]
    Closed { sink: String },

    /// The sink dropped a request without answering.
    #[error("sink {sink:?} dropped the request without replying")]
    NoReply { sink: String },

    /// The sink did not acknowledge within the bound.
    #[error("sink {sink:?} did not acknowledge within {timeout:?}")]
    CloseTimeout { sink: String, timeout: Duration },
}

impl SinkError {
    /// Returns a short stable label (snake_case) for use in logs.
    pub fn as_label(&self) -> &'static str {
        match self {
            SinkError::Closed { .. } => "sink_closed",
            SinkError::NoReply { .. } => "sink_no_reply",
            SinkError::CloseTimeout { .. } => "sink_close_timeout",
        }
    }
}

/// # Errors produced by result stores.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("store i/o failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("store encoding failed: {0}")]
    Json(#[from] serde_json::Error),

    /// The locator was empty.
    #[error("empty store locator")]
    EmptyLocator,
}

impl StoreError {
    /// Returns a short stable label (snake_case) for use in logs.
    pub fn as_label(&self) -> &'static str {
        match self {
            StoreError::Io(_) => "store_io",
            StoreError::Json(_) => "store_json",
            StoreError::EmptyLocator => "store_empty_locator",
        }
    }
}
