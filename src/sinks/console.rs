//! # Plain-text console sink.
//!
//! [`ConsoleSink`] prints every event as one human-readable line, and a result
//! block for every completed spec and for the whole run.
//!
//! ## Output format
//! ```text
//! [RUNNER][12:00]: Beginning spec ClusterSpec.must_form on 2 nodes
//! [NODE0:seed][12:00:01.250]: joining
//! [NODE0:seed][12:00]: SPEC PASSED: ok
//! [NODE1:member][12:00]: SPEC FAILED: timeout
//! [RUNNER][12:00]: Spec completed.
//! [RUNNER][12:00]: Results for ClusterSpec.must_form
//! [RUNNER][12:00]:  --> Node 0:seed : PASS [1.250s elapsed]
//! [RUNNER][12:00]: FINAL RESULT: FAIL after 2.000s.
//! ```

use std::io::Write;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::events::{BeginSpec, EndSpec, NodeLogFragment, NodeResult};
use crate::model::{RunTree, RunnerMessage, SpecRecord};
use crate::sinks::sink::{Coordination, Sink};

/// Sink that writes plain lines to stdout (or any writer).
///
/// Uses the embedded run coordinator for the per-spec and end-of-run reports.
pub struct ConsoleSink<W: Write + Send + 'static> {
    out: W,
}

impl ConsoleSink<std::io::Stdout> {
    pub fn stdout() -> Self {
        Self {
            out: std::io::stdout(),
        }
    }
}

impl Default for ConsoleSink<std::io::Stdout> {
    fn default() -> Self {
        Self::stdout()
    }
}

impl<W: Write + Send + 'static> ConsoleSink<W> {
    pub fn with_writer(out: W) -> Self {
        Self { out }
    }

    fn line(&mut self, text: std::fmt::Arguments<'_>) {
        let _ = writeln!(self.out, "{text}");
    }

    fn runner(&mut self, text: std::fmt::Arguments<'_>) {
        let now = Utc::now().format("%H:%M");
        self.line(format_args!("[RUNNER][{now}]: {text}"));
    }

    fn node_outcome(&mut self, result: &NodeResult, verdict: &str) {
        let now = Utc::now().format("%H:%M");
        self.line(format_args!(
            "[NODE{}:{}][{now}]: {verdict}: {}",
            result.node_index, result.role, result.text
        ));
    }

    fn spec_results(&mut self, spec: &SpecRecord) {
        self.runner(format_args!("Results for {}", spec.fact_name()));
        self.runner(format_args!("Start time: {}", timestamp(spec.started_at())));
        for node in spec.nodes().values() {
            self.runner(format_args!(
                " --> Node {}:{} : {} [{} elapsed]",
                node.node_index(),
                node.node_role(),
                verdict(node.is_passed()),
                elapsed(node.elapsed())
            ));
        }
        let ended = spec.ended_at().unwrap_or_else(Utc::now);
        self.runner(format_args!("End time: {}", timestamp(ended)));
        self.runner(format_args!(
            "FINAL RESULT: {} after {}.",
            verdict(spec.is_passed()),
            elapsed(spec.elapsed())
        ));

        if spec.is_passed() {
            return;
        }
        if let Some(reason) = spec.failure() {
            self.runner(format_args!("Spec aborted: {reason}"));
        }
        self.runner(format_args!("Failure messages by Node"));
        for (index, node) in spec.nodes() {
            if node.is_passed() {
                continue;
            }
            self.runner(format_args!(
                "<----------- BEGIN NODE {index}:{} ----------->",
                node.node_role()
            ));
            for result in node.results() {
                self.runner(format_args!(" --> {}", result.text));
            }
            if node.results().is_empty() {
                self.runner(format_args!("[received no messages - SILENT FAILURE]."));
            }
            self.runner(format_args!(
                "<----------- END NODE {index}:{} ----------->",
                node.node_role()
            ));
        }
    }
}

fn verdict(passed: bool) -> &'static str {
    if passed { "PASS" } else { "FAIL" }
}

fn elapsed(d: Option<Duration>) -> String {
    match d {
        Some(d) => format!("{:.3}s", d.as_secs_f64()),
        None => "n/a".to_string(),
    }
}

fn timestamp(at: DateTime<Utc>) -> String {
    at.format("%Y-%m-%d %H:%M:%S%.3f UTC").to_string()
}

#[async_trait]
impl<W: Write + Send + 'static> Sink for ConsoleSink<W> {
    fn name(&self) -> &'static str {
        "console"
    }

    fn coordination(&self) -> Coordination {
        Coordination::Embedded
    }

    async fn on_begin_spec(&mut self, spec: &BeginSpec) {
        self.runner(format_args!(
            "Beginning spec {}.{} on {} nodes",
            spec.class_name,
            spec.method_name,
            spec.nodes.len()
        ));
    }

    async fn on_end_spec(&mut self, _spec: &EndSpec) {
        self.runner(format_args!("Spec completed."));
    }

    async fn on_node_log(&mut self, fragment: &NodeLogFragment) {
        let message = fragment.to_node_message();
        self.line(format_args!("{message}"));
    }

    async fn on_runner_log(&mut self, message: &RunnerMessage) {
        self.line(format_args!("{message}"));
    }

    async fn on_node_pass(&mut self, result: &NodeResult) {
        self.node_outcome(result, "SPEC PASSED");
    }

    async fn on_node_fail(&mut self, result: &NodeResult) {
        self.node_outcome(result, "SPEC FAILED");
    }

    async fn on_end_run(&mut self) {
        self.runner(format_args!("Test run complete."));
    }

    async fn on_tree_summary(&mut self, tree: &RunTree) {
        self.runner(format_args!(
            "Test run completed in [{}] with {}/{} specs passed.",
            elapsed(Some(tree.elapsed())),
            tree.passed_count(),
            tree.specs().len()
        ));
        if let Some(reason) = tree.aborted() {
            self.runner(format_args!("Test run aborted: {reason}"));
        }
        for spec in tree.specs() {
            self.spec_results(spec);
        }
    }

    async fn on_unrecognized(&mut self, line: &str) {
        self.line(format_args!("Unknown message: {line}"));
    }

    async fn on_spec_completed(&mut self, spec: &SpecRecord) {
        self.spec_results(spec);
    }

    async fn on_close(&mut self) {
        let _ = self.out.flush();
    }
}
