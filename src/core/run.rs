//! # Run coordinator: one task per test run.
//!
//! [`RunCoordinator`] is a cloneable handle; every operation is a message to the
//! coordinator task, which owns the [`RunTree`] and at most one active spec.
//!
//! ## States
//! ```text
//!            begin_spec                 end_spec
//!   ┌──────┐ ─────────► ┌────────────┐ ─────────► ┌──────┐
//!   │ Idle │            │ SpecActive │            │ Idle │ ...
//!   └──┬───┘ ◄───────── └─────┬──────┘            └──┬───┘
//!      │                      │ end_run (implicit end_spec)
//!      └──────────────────────┴──────────────────► Closed
//! ```
//!
//! ## Rules
//! - `begin_spec` while a spec is active is a protocol violation: the active spec
//!   is untouched, the run is marked aborted, later specs are rejected
//! - once the run is aborted, node and runner traffic is dropped; it cannot be
//!   attributed to a spec
//! - a rejected roster (duplicate node indices) is recorded as a failed spec
//! - node messages while idle are dropped with a warning
//! - a spec that cannot be collected is recorded as failed (see
//!   [`SnapshotTimeoutPolicy`](crate::SnapshotTimeoutPolicy))
//! - completed specs are published to subscribers synchronously, in registration order
//! - `request_state` never waits on an in-flight spec

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::config::Config;
use crate::core::child::{Child, RequestError};
use crate::core::spec::{self, SpecCommand};
use crate::error::CoordinatorError;
use crate::events::BeginSpec;
use crate::model::{NodeMessage, NodeTest, RunTree, RunnerMessage, SpecRecord};

/// Receives every completed spec of a run.
pub trait SpecListener: Send + Sync + 'static {
    fn on_spec_completed(&self, spec: &SpecRecord);
}

impl SpecListener for mpsc::UnboundedSender<SpecRecord> {
    fn on_spec_completed(&self, spec: &SpecRecord) {
        let _ = self.send(spec.clone());
    }
}

enum RunCommand {
    BeginSpec(BeginSpec, oneshot::Sender<Result<(), CoordinatorError>>),
    Node { index: usize, message: NodeMessage },
    Runner(RunnerMessage),
    EndSpec(oneshot::Sender<Option<SpecRecord>>),
    RequestState(oneshot::Sender<RunTree>),
    Subscribe(Arc<dyn SpecListener>),
    Unsubscribe(Arc<dyn SpecListener>),
    EndRun(oneshot::Sender<RunTree>),
    #[cfg(test)]
    StallNode(usize),
}

/// Handle to a run coordinator task.
#[derive(Clone)]
pub struct RunCoordinator {
    tx: mpsc::UnboundedSender<RunCommand>,
}

impl RunCoordinator {
    /// Starts a new run. The task exits on [`end_run`](Self::end_run) or when
    /// every handle is dropped.
    pub fn spawn(cfg: Config) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let actor = RunActor {
            tree: RunTree::new(Utc::now()),
            active: None,
            listeners: Vec::new(),
            cfg,
        };
        tokio::spawn(actor.run(rx));
        Self { tx }
    }

    /// Starts a spec and its node aggregators.
    pub async fn begin_spec(&self, spec: BeginSpec) -> Result<(), CoordinatorError> {
        self.ask(|reply| RunCommand::BeginSpec(spec, reply)).await?
    }

    /// Routes a node message to the active spec.
    pub fn route_node_message(&self, index: usize, message: NodeMessage) {
        let _ = self.tx.send(RunCommand::Node { index, message });
    }

    /// Attaches a runner message to the active spec.
    pub fn runner_message(&self, message: RunnerMessage) {
        let _ = self.tx.send(RunCommand::Runner(message));
    }

    /// Ends the active spec and returns its sealed record (`None` when idle).
    pub async fn end_spec(&self) -> Result<Option<SpecRecord>, CoordinatorError> {
        self.ask(RunCommand::EndSpec).await
    }

    /// Returns a copy of the current run tree.
    pub async fn request_state(&self) -> Result<RunTree, CoordinatorError> {
        self.ask(RunCommand::RequestState).await
    }

    /// Registers a completed-spec listener; registering the same listener twice is a no-op.
    pub fn subscribe(&self, listener: Arc<dyn SpecListener>) {
        let _ = self.tx.send(RunCommand::Subscribe(listener));
    }

    pub fn unsubscribe(&self, listener: Arc<dyn SpecListener>) {
        let _ = self.tx.send(RunCommand::Unsubscribe(listener));
    }

    /// Ends the run (and the active spec, if any) and returns the sealed tree.
    pub async fn end_run(&self) -> Result<RunTree, CoordinatorError> {
        self.ask(RunCommand::EndRun).await
    }

    #[cfg(test)]
    pub(crate) fn stall_node(&self, index: usize) {
        let _ = self.tx.send(RunCommand::StallNode(index));
    }

    async fn ask<R>(
        &self,
        make: impl FnOnce(oneshot::Sender<R>) -> RunCommand,
    ) -> Result<R, CoordinatorError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(make(reply_tx))
            .map_err(|_| CoordinatorError::Closed)?;
        reply_rx.await.map_err(|_| CoordinatorError::Closed)
    }
}

struct ActiveSpec {
    name: String,
    roster: Vec<NodeTest>,
    started_at: DateTime<Utc>,
    child: Child<SpecCommand>,
}

struct RunActor {
    tree: RunTree,
    active: Option<ActiveSpec>,
    listeners: Vec<Arc<dyn SpecListener>>,
    cfg: Config,
}

impl RunActor {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<RunCommand>) {
        while let Some(cmd) = rx.recv().await {
            match cmd {
                RunCommand::BeginSpec(begin, reply) => {
                    let _ = reply.send(self.begin_spec(begin));
                }
                RunCommand::Node { index, .. } if self.tree.aborted().is_some() => {
                    debug!(index, "node message after run abort; dropped");
                }
                RunCommand::Runner(_) if self.tree.aborted().is_some() => {
                    debug!("runner message after run abort; dropped");
                }
                RunCommand::Node { index, message } => match &self.active {
                    Some(active) => {
                        active.child.send(SpecCommand::Node { index, message });
                    }
                    None => warn!(index, "node message while no spec is active; dropped"),
                },
                RunCommand::Runner(message) => match &self.active {
                    Some(active) => {
                        active.child.send(SpecCommand::Runner(message));
                    }
                    None => debug!("runner message while no spec is active; dropped"),
                },
                RunCommand::EndSpec(reply) => {
                    let record = self.end_spec().await;
                    let _ = reply.send(record);
                }
                RunCommand::RequestState(reply) => {
                    let _ = reply.send(self.tree.clone());
                }
                RunCommand::Subscribe(listener) => {
                    if !self.listeners.iter().any(|l| same_listener(l, &listener)) {
                        self.listeners.push(listener);
                    }
                }
                RunCommand::Unsubscribe(listener) => {
                    self.listeners.retain(|l| !same_listener(l, &listener));
                }
                RunCommand::EndRun(reply) => {
                    self.end_spec().await;
                    self.tree.seal(Utc::now());
                    let _ = reply.send(self.tree.clone());
                    break;
                }
                #[cfg(test)]
                RunCommand::StallNode(index) => {
                    if let Some(active) = &self.active {
                        active.child.send(SpecCommand::StallNode(index));
                    }
                }
            }
        }
    }

    fn begin_spec(&mut self, begin: BeginSpec) -> Result<(), CoordinatorError> {
        let requested = begin.fact_name();

        if let Some(reason) = self.tree.aborted() {
            return Err(CoordinatorError::RunAborted {
                reason: reason.to_string(),
            });
        }
        if let Some(active) = &self.active {
            let err = CoordinatorError::ProtocolViolation {
                active: active.name.clone(),
                requested,
            };
            warn!(label = err.as_label(), error = %err, "run aborted");
            self.tree.abort(err.to_string());
            return Err(err);
        }

        let child = match spec::spawn(&begin, &self.cfg) {
            Ok(child) => child,
            Err(err) => {
                warn!(spec = %requested, label = err.as_label(), error = %err, "roster rejected; spec recorded as failed");
                self.complete(SpecRecord::aborted(requested, &begin.nodes, Utc::now(), err.to_string()));
                return Err(err);
            }
        };
        debug!(spec = %requested, nodes = begin.nodes.len(), "spec started");
        self.active = Some(ActiveSpec {
            name: requested,
            roster: begin.nodes,
            started_at: Utc::now(),
            child,
        });
        Ok(())
    }

    async fn end_spec(&mut self) -> Option<SpecRecord> {
        let active = self.active.take()?;

        let deadline = Instant::now() + self.cfg.spec_snapshot_timeout;
        let outcome = match active.child.request(SpecCommand::End, deadline).await {
            Ok(result) => result,
            Err(RequestError::Timeout) => Err(CoordinatorError::SnapshotTimeout {
                scope: active.name.clone(),
                timeout: self.cfg.spec_snapshot_timeout,
                missing: Vec::new(),
            }),
            Err(RequestError::Closed) => Err(CoordinatorError::Closed),
        };

        let record = match outcome {
            Ok(record) => record,
            Err(err) => {
                warn!(spec = %active.name, label = err.as_label(), error = %err, "spec recorded as failed");
                if self.cfg.aborts_run_on_timeout() {
                    self.tree.abort(err.to_string());
                }
                SpecRecord::aborted(active.name, &active.roster, active.started_at, err.to_string())
            }
        };

        self.complete(record.clone());

        let grace = self.cfg.grace;
        let child = active.child;
        tokio::spawn(async move {
            child.stop(grace).await;
        });
        Some(record)
    }

    /// Appends a sealed record and publishes it to every listener.
    fn complete(&mut self, record: SpecRecord) {
        for listener in &self.listeners {
            listener.on_spec_completed(&record);
        }
        self.tree.add_spec(record);
    }
}

fn same_listener(a: &Arc<dyn SpecListener>, b: &Arc<dyn SpecListener>) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use pretty_assertions::assert_eq;

    use super::*;
    use crate::config::SnapshotTimeoutPolicy;

    fn begin(name: &str, nodes: usize) -> BeginSpec {
        let roster = (0..nodes)
            .map(|i| NodeTest::new(i, format!("node-{i}"), "Spec", name))
            .collect();
        BeginSpec::new("Spec", name, roster)
    }

    fn outcome(run: &RunCoordinator, index: usize, passed: bool) {
        run.route_node_message(
            index,
            NodeMessage::outcome(index, format!("node-{index}"), "done", passed, Utc::now()),
        );
    }

    struct Recorder {
        tag: &'static str,
        seen: Arc<Mutex<Vec<(&'static str, String)>>>,
    }

    impl SpecListener for Recorder {
        fn on_spec_completed(&self, spec: &SpecRecord) {
            if let Ok(mut seen) = self.seen.lock() {
                seen.push((self.tag, spec.fact_name().to_string()));
            }
        }
    }

    #[tokio::test]
    async fn test_passing_run() {
        let run = RunCoordinator::spawn(Config::default());
        run.begin_spec(begin("a", 2)).await.expect("begin");
        outcome(&run, 0, true);
        outcome(&run, 1, true);
        let spec = run.end_spec().await.expect("end").expect("record");
        assert_eq!(spec.passed(), Some(true));

        let tree = run.end_run().await.expect("end run");
        assert!(tree.is_sealed());
        assert_eq!(tree.specs().len(), 1);
        assert_eq!(tree.exit_code(), 0);
    }

    #[tokio::test]
    async fn test_run_without_specs_passes() {
        let run = RunCoordinator::spawn(Config::default());
        let tree = run.end_run().await.expect("end run");
        assert!(tree.passed());
        assert_eq!(tree.exit_code(), 0);
        assert_eq!(run.end_run().await.err(), Some(CoordinatorError::Closed));
    }

    #[tokio::test]
    async fn test_begin_while_active_is_protocol_violation() {
        let run = RunCoordinator::spawn(Config::default());
        run.begin_spec(begin("first", 1)).await.expect("begin");
        outcome(&run, 0, true);

        let err = run.begin_spec(begin("second", 1)).await.expect_err("violation");
        assert_eq!(
            err,
            CoordinatorError::ProtocolViolation {
                active: "Spec.first".into(),
                requested: "Spec.second".into(),
            }
        );

        let spec = run.end_spec().await.expect("end").expect("record");
        assert_eq!(spec.fact_name(), "Spec.first");
        assert_eq!(spec.passed(), Some(true));

        let later = run.begin_spec(begin("third", 1)).await;
        assert!(matches!(later, Err(CoordinatorError::RunAborted { .. })));

        let tree = run.end_run().await.expect("end run");
        assert!(tree.aborted().is_some());
        assert_eq!(tree.exit_code(), 1);
    }

    #[tokio::test]
    async fn test_request_state_is_a_copy() {
        let run = RunCoordinator::spawn(Config::default());
        run.begin_spec(begin("a", 0)).await.expect("begin");
        run.end_spec().await.expect("end");

        let mut copy = run.request_state().await.expect("state");
        copy.add_spec(SpecRecord::new("Local.only", Utc::now()));
        copy.abort("local");

        let fresh = run.request_state().await.expect("state");
        assert_eq!(fresh.specs().len(), 1);
        assert_eq!(fresh.aborted(), None);
    }

    #[tokio::test]
    async fn test_earlier_state_is_unaffected_by_later_progress() {
        let run = RunCoordinator::spawn(Config::default());
        run.begin_spec(begin("a", 0)).await.expect("begin");
        run.end_spec().await.expect("end");

        let before = run.request_state().await.expect("state");

        run.begin_spec(begin("b", 1)).await.expect("begin");
        outcome(&run, 0, false);
        run.end_spec().await.expect("end");
        let after = run.end_run().await.expect("end run");

        assert_eq!(before.specs().len(), 1);
        assert!(!before.is_sealed());
        assert!(before.passed());
        assert_eq!(after.specs().len(), 2);
        assert!(after.is_sealed());
    }

    #[tokio::test]
    async fn test_duplicate_roster_is_recorded_as_failed_spec() {
        let (tx, mut rx) = mpsc::unbounded_channel::<SpecRecord>();
        let run = RunCoordinator::spawn(Config::default());
        run.subscribe(Arc::new(tx));

        let roster = vec![
            NodeTest::new(0, "x", "Spec", "dup"),
            NodeTest::new(0, "y", "Spec", "dup"),
        ];
        let err = run
            .begin_spec(BeginSpec::new("Spec", "dup", roster))
            .await
            .expect_err("duplicate index");
        assert!(matches!(err, CoordinatorError::DuplicateNodeIndex { index: 0, .. }));

        outcome(&run, 0, false);
        assert_eq!(run.end_spec().await, Ok(None));

        let notified = rx.recv().await.expect("record");
        assert_eq!(notified.fact_name(), "Spec.dup");
        assert_eq!(notified.passed(), Some(false));

        let tree = run.end_run().await.expect("end run");
        assert_eq!(tree.specs().len(), 1);
        assert!(!tree.passed());
        assert_eq!(tree.exit_code(), 1);
    }

    #[tokio::test]
    async fn test_traffic_after_violation_is_not_misattributed() {
        let run = RunCoordinator::spawn(Config::default());
        run.begin_spec(begin("first", 1)).await.expect("begin");
        outcome(&run, 0, true);
        run.begin_spec(begin("second", 1)).await.expect_err("violation");

        outcome(&run, 0, false);
        run.runner_message(RunnerMessage::now("for second", "runner", crate::model::LogLevel::Info));

        let spec = run.end_spec().await.expect("end").expect("record");
        assert_eq!(spec.fact_name(), "Spec.first");
        assert_eq!(spec.nodes()[&0].events().len(), 1);
        assert_eq!(spec.passed(), Some(true));
        assert!(spec.runner_messages().is_empty());
    }

    #[tokio::test]
    async fn test_request_state_does_not_wait_for_active_spec() {
        let run = RunCoordinator::spawn(Config::default());
        run.begin_spec(begin("open", 1)).await.expect("begin");

        let tree = run.request_state().await.expect("state");
        assert!(tree.specs().is_empty());
        assert!(!tree.is_sealed());
    }

    #[tokio::test]
    async fn test_subscribers_notified_in_order_once() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let first: Arc<dyn SpecListener> = Arc::new(Recorder { tag: "first", seen: seen.clone() });
        let second: Arc<dyn SpecListener> = Arc::new(Recorder { tag: "second", seen: seen.clone() });

        let run = RunCoordinator::spawn(Config::default());
        run.subscribe(first.clone());
        run.subscribe(second.clone());
        run.subscribe(first.clone());

        run.begin_spec(begin("a", 0)).await.expect("begin");
        run.end_spec().await.expect("end");

        run.unsubscribe(second);
        run.begin_spec(begin("b", 0)).await.expect("begin");
        run.end_spec().await.expect("end");

        let seen = seen.lock().expect("lock").clone();
        assert_eq!(
            seen,
            vec![
                ("first", "Spec.a".to_string()),
                ("second", "Spec.a".to_string()),
                ("first", "Spec.b".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_channel_listener_receives_records() {
        let (tx, mut rx) = mpsc::unbounded_channel::<SpecRecord>();
        let run = RunCoordinator::spawn(Config::default());
        run.subscribe(Arc::new(tx));

        run.begin_spec(begin("a", 1)).await.expect("begin");
        outcome(&run, 0, false);
        run.end_spec().await.expect("end");

        let got = rx.recv().await.expect("record");
        assert_eq!(got.fact_name(), "Spec.a");
        assert_eq!(got.passed(), Some(false));
    }

    #[tokio::test]
    async fn test_specs_in_completion_order() {
        let run = RunCoordinator::spawn(Config::default());
        for (name, passed) in [("a", true), ("b", false), ("c", true)] {
            run.begin_spec(begin(name, 1)).await.expect("begin");
            outcome(&run, 0, passed);
            run.end_spec().await.expect("end");
        }

        let tree = run.end_run().await.expect("end run");
        let names: Vec<_> = tree.specs().iter().map(|s| s.fact_name()).collect();
        assert_eq!(names, vec!["Spec.a", "Spec.b", "Spec.c"]);
        assert!(!tree.passed());
    }

    #[tokio::test]
    async fn test_idle_node_messages_are_dropped() {
        let run = RunCoordinator::spawn(Config::default());
        outcome(&run, 0, false);

        run.begin_spec(begin("a", 1)).await.expect("begin");
        outcome(&run, 0, true);
        let spec = run.end_spec().await.expect("end").expect("record");

        assert_eq!(spec.nodes()[&0].events().len(), 1);
        assert_eq!(spec.passed(), Some(true));
    }

    #[tokio::test]
    async fn test_end_spec_when_idle_returns_none() {
        let run = RunCoordinator::spawn(Config::default());
        assert_eq!(run.end_spec().await, Ok(None));
    }

    #[tokio::test]
    async fn test_end_run_ends_active_spec_and_closes() {
        let run = RunCoordinator::spawn(Config::default());
        run.begin_spec(begin("open", 1)).await.expect("begin");
        outcome(&run, 0, true);

        let tree = run.end_run().await.expect("end run");
        assert_eq!(tree.specs().len(), 1);
        assert_eq!(tree.specs()[0].passed(), Some(true));

        assert_eq!(run.request_state().await, Err(CoordinatorError::Closed));
        assert_eq!(run.end_run().await, Err(CoordinatorError::Closed));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_node_fails_spec_and_run_continues() {
        let run = RunCoordinator::spawn(Config::default());
        run.begin_spec(begin("slow", 2)).await.expect("begin");
        outcome(&run, 0, true);
        run.stall_node(1);

        let spec = run.end_spec().await.expect("end").expect("record");
        assert_eq!(spec.passed(), Some(false));
        assert!(spec.failure().is_some());
        assert_eq!(spec.nodes().len(), 2);

        run.begin_spec(begin("next", 0)).await.expect("run continues");
        run.end_spec().await.expect("end");

        let tree = run.end_run().await.expect("end run");
        assert_eq!(tree.aborted(), None);
        assert_eq!(tree.passed_count(), 1);
        assert_eq!(tree.exit_code(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_node_can_abort_the_run() {
        let cfg = Config {
            on_snapshot_timeout: SnapshotTimeoutPolicy::AbortRun,
            ..Config::default()
        };
        let run = RunCoordinator::spawn(cfg);
        run.begin_spec(begin("slow", 1)).await.expect("begin");
        run.stall_node(0);
        run.end_spec().await.expect("end");

        let later = run.begin_spec(begin("next", 0)).await;
        assert!(matches!(later, Err(CoordinatorError::RunAborted { .. })));

        let tree = run.end_run().await.expect("end run");
        assert!(tree.aborted().is_some());
        assert_eq!(tree.specs().len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_node_index_fails_spec() {
        let run = RunCoordinator::spawn(Config::default());
        run.begin_spec(begin("u", 1)).await.expect("begin");
        outcome(&run, 0, true);
        outcome(&run, 5, true);

        let spec = run.end_spec().await.expect("end").expect("record");
        assert_eq!(spec.passed(), Some(false));
        assert!(spec.failure().is_some_and(|f| f.contains("index 5")));
    }
}
