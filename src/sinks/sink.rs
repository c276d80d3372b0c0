//! # Sink trait
//!
//! `Sink` is the extension point for consuming the event stream of a run. Each
//! opened sink is driven by a dedicated worker task (see
//! [`SinkHandle`](crate::SinkHandle)), so handlers may take `&mut self` and be
//! slow without blocking the hub or other sinks.
//!
//! ## Contract
//! - every vocabulary entry has a required handler; events arrive in hub order
//! - a sink that returns [`Coordination::Embedded`] gets a private
//!   [`RunCoordinator`](crate::RunCoordinator): spec and node events are mirrored
//!   into it, completed specs arrive through [`Sink::on_spec_completed`] and the
//!   sealed tree through [`Sink::on_tree_summary`]
//! - every sink sees [`Sink::on_close`] once on terminate; standalone sinks
//!   report exit code `0`

use async_trait::async_trait;

use crate::events::{BeginSpec, EndSpec, NodeLogFragment, NodeResult};
use crate::model::{RunTree, RunnerMessage, SpecRecord};

/// Whether a sink aggregates results through its own run coordinator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Coordination {
    #[default]
    Standalone,
    Embedded,
}

/// Contract for result consumers.
#[async_trait]
pub trait Sink: Send + 'static {
    /// Human-readable name (for logs).
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }

    /// Opt-in for the embedded run coordinator.
    fn coordination(&self) -> Coordination {
        Coordination::Standalone
    }

    async fn on_begin_spec(&mut self, spec: &BeginSpec);

    async fn on_end_spec(&mut self, spec: &EndSpec);

    async fn on_node_log(&mut self, fragment: &NodeLogFragment);

    async fn on_runner_log(&mut self, message: &RunnerMessage);

    async fn on_node_pass(&mut self, result: &NodeResult);

    async fn on_node_fail(&mut self, result: &NodeResult);

    async fn on_end_run(&mut self);

    /// The sealed tree of the embedded run (embedded sinks only).
    async fn on_tree_summary(&mut self, tree: &RunTree);

    /// A raw line the parser did not recognize.
    async fn on_unrecognized(&mut self, line: &str);

    /// A spec completed in the embedded run.
    async fn on_spec_completed(&mut self, _spec: &SpecRecord) {}

    /// Called once before the worker exits.
    async fn on_close(&mut self) {}
}
