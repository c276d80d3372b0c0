//! Sink that records every callback as a short string.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::events::{BeginSpec, EndSpec, NodeLogFragment, NodeResult};
use crate::model::{RunTree, RunnerMessage, SpecRecord};
use crate::sinks::sink::{Coordination, Sink};

#[derive(Clone, Default)]
pub(crate) struct Log(Arc<Mutex<Vec<String>>>);

impl Log {
    pub(crate) fn push(&self, entry: String) {
        self.0.lock().expect("log lock").push(entry);
    }

    pub(crate) fn entries(&self) -> Vec<String> {
        self.0.lock().expect("log lock").clone()
    }
}

pub(crate) struct RecordingSink {
    tag: &'static str,
    coordination: Coordination,
    log: Log,
    pub(crate) panic_on_unrecognized: bool,
}

impl RecordingSink {
    pub(crate) fn standalone(tag: &'static str) -> (Self, Log) {
        Self::with(tag, Coordination::Standalone, Log::default())
    }

    pub(crate) fn embedded(tag: &'static str) -> (Self, Log) {
        Self::with(tag, Coordination::Embedded, Log::default())
    }

    fn with(tag: &'static str, coordination: Coordination, log: Log) -> (Self, Log) {
        let sink = Self {
            tag,
            coordination,
            log: log.clone(),
            panic_on_unrecognized: false,
        };
        (sink, log)
    }
}

#[async_trait]
impl Sink for RecordingSink {
    fn name(&self) -> &'static str {
        self.tag
    }

    fn coordination(&self) -> Coordination {
        self.coordination
    }

    async fn on_begin_spec(&mut self, spec: &BeginSpec) {
        self.log.push(format!("begin:{}", spec.fact_name()));
    }

    async fn on_end_spec(&mut self, _spec: &EndSpec) {
        self.log.push("end_spec".into());
    }

    async fn on_node_log(&mut self, fragment: &NodeLogFragment) {
        self.log.push(format!("log:{}", fragment.node_index));
    }

    async fn on_runner_log(&mut self, message: &RunnerMessage) {
        self.log.push(format!("runner:{}", message.text));
    }

    async fn on_node_pass(&mut self, result: &NodeResult) {
        self.log.push(format!("pass:{}", result.node_index));
    }

    async fn on_node_fail(&mut self, result: &NodeResult) {
        self.log.push(format!("fail:{}", result.node_index));
    }

    async fn on_end_run(&mut self) {
        self.log.push("end_run".into());
    }

    async fn on_tree_summary(&mut self, tree: &RunTree) {
        self.log
            .push(format!("summary:{}/{}", tree.passed_count(), tree.specs().len()));
    }

    async fn on_unrecognized(&mut self, line: &str) {
        if self.panic_on_unrecognized {
            panic!("cannot handle {line}");
        }
        self.log.push(format!("unrecognized:{line}"));
    }

    async fn on_spec_completed(&mut self, spec: &SpecRecord) {
        self.log
            .push(format!("completed:{}:{}", spec.fact_name(), spec.is_passed()));
    }

    async fn on_close(&mut self) {
        self.log.push("close".into());
    }
}
