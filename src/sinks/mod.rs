//! # Result sinks.
//!
//! This module provides the [`Sink`] trait, the per-sink pipeline
//! ([`SinkHandle`]), the [`SinkHub`] that broadcasts to every sink, and the
//! built-in sinks.
//!
//! ## Architecture
//! ```text
//!   SinkHub ──► SinkHandle ──► worker ──► Sink::on_*()
//!                                │
//!                                └─► RunCoordinator (Coordination::Embedded)
//!                                        └─► on_spec_completed / on_tree_summary
//! ```
//!
//! ## Built-in sinks
//! - [`ConsoleSink`]: plain text lines on stdout (or any writer)
//! - [`FileSystemSink`]: persists the final tree through a [`TestRunStore`](crate::TestRunStore)
//!
//! ## Implementing custom sinks
//! ```no_run
//! use async_trait::async_trait;
//! use multinode_reporter::{
//!     BeginSpec, EndSpec, NodeLogFragment, NodeResult, RunTree, RunnerMessage, Sink,
//! };
//!
//! struct FailureCounter(usize);
//!
//! #[async_trait]
//! impl Sink for FailureCounter {
//!     async fn on_begin_spec(&mut self, _spec: &BeginSpec) {}
//!     async fn on_end_spec(&mut self, _spec: &EndSpec) {}
//!     async fn on_node_log(&mut self, _fragment: &NodeLogFragment) {}
//!     async fn on_runner_log(&mut self, _message: &RunnerMessage) {}
//!     async fn on_node_pass(&mut self, _result: &NodeResult) {}
//!     async fn on_node_fail(&mut self, _result: &NodeResult) {
//!         self.0 += 1;
//!     }
//!     async fn on_end_run(&mut self) {}
//!     async fn on_tree_summary(&mut self, _tree: &RunTree) {}
//!     async fn on_unrecognized(&mut self, _line: &str) {}
//! }
//! ```

mod console;
mod file;
mod hub;
mod pipeline;
mod sink;

#[cfg(test)]
pub(crate) mod testing;

pub use console::ConsoleSink;
pub use file::FileSystemSink;
pub use hub::{SinkHub, SinkHubBuilder};
pub use pipeline::{SinkBuilder, SinkHandle};
pub use sink::{Coordination, Sink};
