//! # Spec coordinator: one task per active spec.
//!
//! Owns the [`SpecRecord`] of the active spec and one node aggregator per
//! roster entry.
//!
//! ## Architecture
//! ```text
//! RunCoordinator ── SpecCommand ──► SpecCoordinator
//!                                     ├─► Node{0} ──► NodeAggregator #0
//!                                     ├─► Node{1} ──► NodeAggregator #1
//!                                     └─► Runner  ──► record.runner_messages
//!
//! End(reply):
//!   snapshot every aggregator concurrently (one shared deadline)
//!     ├─ all replied ─► merge ─► seal ─► reply Ok(record)
//!     └─ missing     ─► reply Err(SnapshotTimeout{missing})
//!   stop aggregators (grace) ─► exit
//! ```
//!
//! ## Rules
//! - the roster is validated before anything is spawned (no duplicate indices)
//! - aggregators are spawned eagerly, so silent nodes still show up (and fail)
//! - a message for an index outside the roster is fatal: aggregators are stopped,
//!   further traffic is dropped and the end request is answered with the error

use std::collections::{BTreeMap, HashSet};
use std::time::Duration;

use chrono::Utc;
use futures::future::join_all;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tracing::{debug, error};

use crate::config::Config;
use crate::core::child::{self, Child};
use crate::core::node::{self, NodeCommand};
use crate::error::CoordinatorError;
use crate::events::BeginSpec;
use crate::model::{NodeMessage, RunnerMessage, SpecRecord};

pub(crate) type EndReply = oneshot::Sender<Result<SpecRecord, CoordinatorError>>;

pub(crate) enum SpecCommand {
    Node { index: usize, message: NodeMessage },
    Runner(RunnerMessage),
    End(EndReply),
    /// Makes one aggregator stop answering.
    #[cfg(test)]
    StallNode(usize),
}

/// Validates the roster and starts the coordinator with its aggregators.
pub(crate) fn spawn(begin: &BeginSpec, cfg: &Config) -> Result<Child<SpecCommand>, CoordinatorError> {
    let fact_name = begin.fact_name();

    let mut seen = HashSet::with_capacity(begin.nodes.len());
    for node in &begin.nodes {
        if !seen.insert(node.index) {
            return Err(CoordinatorError::DuplicateNodeIndex {
                spec: fact_name,
                index: node.index,
            });
        }
    }

    let nodes = begin
        .nodes
        .iter()
        .map(|n| (n.index, node::spawn(n)))
        .collect();

    let actor = SpecActor {
        record: SpecRecord::new(fact_name, Utc::now()),
        nodes,
        fault: None,
        node_timeout: cfg.node_snapshot_timeout,
        grace: cfg.grace,
    };
    Ok(Child::spawn(move |rx| actor.run(rx)))
}

struct SpecActor {
    record: SpecRecord,
    nodes: BTreeMap<usize, Child<NodeCommand>>,
    fault: Option<CoordinatorError>,
    node_timeout: Duration,
    grace: Duration,
}

impl SpecActor {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<SpecCommand>) {
        while let Some(cmd) = rx.recv().await {
            match cmd {
                SpecCommand::Node { index, message } => self.route(index, message),
                SpecCommand::Runner(message) => {
                    if self.fault.is_none() {
                        self.record.put_runner_message(message);
                    }
                }
                SpecCommand::End(reply) => {
                    let result = self.end().await;
                    let _ = reply.send(result);
                    let nodes = std::mem::take(&mut self.nodes);
                    child::stop_all(nodes.into_values(), self.grace).await;
                    break;
                }
                #[cfg(test)]
                SpecCommand::StallNode(index) => {
                    if let Some(node) = self.nodes.get(&index) {
                        node.send(NodeCommand::Stall);
                    }
                }
            }
        }
    }

    fn route(&mut self, index: usize, message: NodeMessage) {
        if self.fault.is_some() {
            return;
        }
        if let Some(node) = self.nodes.get(&index) {
            node.send(NodeCommand::Put(message));
            return;
        }

        let err = CoordinatorError::UnknownNodeIndex {
            spec: self.record.fact_name().to_string(),
            index,
        };
        error!(spec = self.record.fact_name(), index, label = err.as_label(), "message for unregistered node");
        self.fault = Some(err);

        let nodes = std::mem::take(&mut self.nodes);
        let grace = self.grace;
        tokio::spawn(async move {
            child::stop_all(nodes.into_values(), grace).await;
        });
    }

    async fn end(&mut self) -> Result<SpecRecord, CoordinatorError> {
        if let Some(fault) = self.fault.clone() {
            return Err(fault);
        }

        let deadline = Instant::now() + self.node_timeout;
        let replies = join_all(self.nodes.iter().map(|(&index, node)| async move {
            (index, node.request(NodeCommand::Snapshot, deadline).await)
        }))
        .await;

        let mut snapshots = Vec::with_capacity(replies.len());
        let mut missing = Vec::new();
        for (index, reply) in replies {
            match reply {
                Ok(record) => snapshots.push(record),
                Err(_) => missing.push(index),
            }
        }

        if !missing.is_empty() {
            debug!(spec = self.record.fact_name(), ?missing, "node snapshots missing");
            return Err(CoordinatorError::SnapshotTimeout {
                scope: self.record.fact_name().to_string(),
                timeout: self.node_timeout,
                missing,
            });
        }

        self.record.add_nodes(snapshots);
        self.record.seal(Utc::now());
        Ok(self.record.clone())
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::core::child::RequestError;
    use crate::model::{LogLevel, NodeTest};

    fn begin(name: &str, roles: &[&str]) -> BeginSpec {
        let nodes = roles
            .iter()
            .enumerate()
            .map(|(i, role)| NodeTest::new(i, *role, "Spec", name))
            .collect();
        BeginSpec::new("Spec", name, nodes)
    }

    fn put(child: &Child<SpecCommand>, index: usize, text: &str, outcome: Option<bool>) {
        let message = match outcome {
            Some(passed) => NodeMessage::outcome(index, "", text, passed, Utc::now()),
            None => NodeMessage::fragment(index, "", text, Utc::now()),
        };
        child.send(SpecCommand::Node { index, message });
    }

    async fn end(child: &Child<SpecCommand>) -> Result<SpecRecord, CoordinatorError> {
        let deadline = Instant::now() + Duration::from_secs(5);
        match child.request(SpecCommand::End, deadline).await {
            Ok(result) => result,
            Err(RequestError::Timeout) => panic!("end timed out"),
            Err(RequestError::Closed) => Err(CoordinatorError::Closed),
        }
    }

    #[tokio::test]
    async fn test_all_nodes_pass() {
        let cfg = Config::default();
        let child = spawn(&begin("a", &["first", "second"]), &cfg).expect("spawn");
        put(&child, 0, "warming up", None);
        put(&child, 0, "ok", Some(true));
        put(&child, 1, "ok", Some(true));

        let rec = end(&child).await.expect("sealed");
        assert_eq!(rec.fact_name(), "Spec.a");
        assert_eq!(rec.passed(), Some(true));
        assert_eq!(rec.nodes().len(), 2);
        assert_eq!(rec.nodes()[&0].events().len(), 2);
    }

    #[tokio::test]
    async fn test_one_failure_fails_the_spec() {
        let cfg = Config::default();
        let child = spawn(&begin("b", &["first", "second"]), &cfg).expect("spawn");
        put(&child, 0, "ok", Some(true));
        put(&child, 1, "boom", Some(false));

        let rec = end(&child).await.expect("sealed");
        assert_eq!(rec.passed(), Some(false));
        assert_eq!(rec.nodes()[&1].passed(), Some(false));
    }

    #[tokio::test]
    async fn test_silent_node_fails_the_spec() {
        let cfg = Config::default();
        let child = spawn(&begin("d", &["first", "second", "third"]), &cfg).expect("spawn");
        put(&child, 0, "ok", Some(true));
        put(&child, 2, "ok", Some(true));

        let rec = end(&child).await.expect("sealed");
        assert_eq!(rec.passed(), Some(false));
        assert_eq!(rec.nodes()[&1].passed(), None);
        assert_eq!(rec.nodes().keys().copied().collect::<Vec<_>>(), vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn test_runner_messages_are_attached() {
        let cfg = Config::default();
        let child = spawn(&begin("r", &[]), &cfg).expect("spawn");
        child.send(SpecCommand::Runner(RunnerMessage::now("hello", "runner", LogLevel::Info)));

        let rec = end(&child).await.expect("sealed");
        assert_eq!(rec.runner_messages().len(), 1);
        assert_eq!(rec.passed(), Some(true));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_node_times_out() {
        let cfg = Config::default();
        let child = spawn(&begin("slow", &["first", "second"]), &cfg).expect("spawn");
        put(&child, 0, "ok", Some(true));
        child.send(SpecCommand::StallNode(1));

        let started = Instant::now();
        let err = end(&child).await.expect_err("timeout");
        assert_eq!(
            err,
            CoordinatorError::SnapshotTimeout {
                scope: "Spec.slow".into(),
                timeout: cfg.node_snapshot_timeout,
                missing: vec![1],
            }
        );
        assert!(started.elapsed() >= cfg.node_snapshot_timeout);
    }

    #[tokio::test]
    async fn test_duplicate_roster_index_is_rejected() {
        let mut spec = begin("dup", &["first", "second"]);
        spec.nodes[1].index = 0;

        let err = spawn(&spec, &Config::default()).err();
        assert_eq!(
            err,
            Some(CoordinatorError::DuplicateNodeIndex {
                spec: "Spec.dup".into(),
                index: 0,
            })
        );
    }

    #[tokio::test]
    async fn test_unknown_index_is_fatal() {
        let cfg = Config::default();
        let child = spawn(&begin("u", &["first"]), &cfg).expect("spawn");
        put(&child, 0, "ok", Some(true));
        put(&child, 7, "stray", Some(true));
        put(&child, 0, "after the fault", None);

        let err = end(&child).await.expect_err("fault");
        assert_eq!(
            err,
            CoordinatorError::UnknownNodeIndex {
                spec: "Spec.u".into(),
                index: 7,
            }
        );
    }
}
