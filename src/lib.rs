//! # multinode-reporter
//!
//! **multinode-reporter** collects the output of multi-node test specs and
//! reports it through pluggable sinks.
//!
//! A multi-node spec runs the same test on several nodes at once. Every node
//! streams log fragments and finally a pass/fail verdict; the runner adds its
//! own log lines. This crate aggregates all of it into one result tree per run
//! and hands that tree to every sink (console, JSON file, custom).
//!
//! ## Architecture
//! ### Overview
//! ```text
//!   test runner / parsed lines
//!            │
//!            ▼
//! ┌────────────────────────────────────────────────────────────┐
//! │ SinkHub (broadcast, close-all, aggregate exit code)        │
//! └──────┬───────────────────┬───────────────────┬─────────────┘
//!        ▼                   ▼                   ▼
//!   SinkHandle          SinkHandle          SinkHandle
//!   (worker task)       (worker task)       (worker task)
//!        │                   │                   │
//!        │ Sink::on_*()      │                   │
//!        ▼                   ▼                   ▼
//!   ConsoleSink        FileSystemSink        custom Sink
//!        │
//!        └─► RunCoordinator (one per embedded sink)
//!                 └─► spec aggregator (one per active spec)
//!                          └─► node aggregators (one per roster entry)
//! ```
//!
//! ### Lifecycle
//! ```text
//! BeginSpec ──► spawn spec + node aggregators
//!   NodeLog / NodePass / NodeFail ──► routed by node index
//!   RunnerLog ──► attached to the active spec
//! EndSpec ──► snapshot nodes (bounded) ──► SpecRecord sealed
//!            ──► listeners notified ──► aggregators stopped
//! EndRun ──► RunTree sealed ──► Sink::on_tree_summary ──► exit code
//! ```
//!
//! ## Features
//! | Area             | Description                                                  | Key types / traits                          |
//! |------------------|--------------------------------------------------------------|---------------------------------------------|
//! | **Model**        | Immutable-after-seal result tree for nodes, specs and runs.  | [`RunTree`], [`SpecRecord`], [`NodeRecord`] |
//! | **Events**       | Structured protocol events and the line-parser seam.         | [`Event`], [`LineParser`]                   |
//! | **Coordination** | Per-run aggregation with bounded snapshot waits.             | [`RunCoordinator`], [`SpecListener`]        |
//! | **Sinks**        | Pluggable outputs, each isolated in its own worker task.     | [`Sink`], [`SinkHandle`], [`SinkHub`]       |
//! | **Persistence**  | Save and load finished run trees.                            | [`TestRunStore`], [`JsonTestRunStore`]      |
//! | **Errors**       | Typed errors for coordination, sinks and storage.            | [`CoordinatorError`], [`SinkError`]         |
//! | **Configuration**| Timeouts and snapshot-timeout policy.                        | [`Config`], [`SnapshotTimeoutPolicy`]       |
//!
//! ## Example
//! ```no_run
//! use multinode_reporter::{
//!     BeginSpec, Config, ConsoleSink, EndSpec, FileSystemSink, JsonTestRunStore, LogLevel,
//!     NodeTest, SinkHub,
//! };
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() {
//!     let hub = SinkHub::builder(Config::default())
//!         .with_sink(ConsoleSink::stdout())
//!         .with_sink(FileSystemSink::timestamped(JsonTestRunStore, "reports", "cluster"))
//!         .build();
//!
//!     hub.begin_spec(BeginSpec::new(
//!         "ClusterSpec",
//!         "must_form",
//!         vec![
//!             NodeTest::new(0, "seed", "ClusterSpec", "must_form"),
//!             NodeTest::new(1, "member", "ClusterSpec", "must_form"),
//!         ],
//!     ));
//!     hub.runner_message("nodes spawned", LogLevel::Info);
//!     hub.node_log(0, "seed", "cluster formed");
//!     hub.node_pass(0, "seed", "ok");
//!     hub.node_pass(1, "member", "ok");
//!     hub.end_spec(EndSpec::default());
//!     hub.end_run();
//!
//!     hub.close_all();
//!     std::process::exit(hub.closed().await);
//! }
//! ```

mod config;
mod core;
mod error;
mod events;
mod model;
mod sinks;
mod store;

// ---- Public re-exports ----

pub use config::{Config, SnapshotTimeoutPolicy};
pub use core::{RunCoordinator, SpecListener};
pub use error::{CoordinatorError, SinkError, StoreError};
pub use events::{BeginSpec, EndSpec, Event, LineParser, NodeLogFragment, NodeResult};
pub use model::{LogLevel, NodeMessage, NodeMessageKind, NodeRecord, NodeTest, RunTree, RunnerMessage, SpecRecord};
pub use sinks::{ConsoleSink, Coordination, FileSystemSink, Sink, SinkBuilder, SinkHandle, SinkHub, SinkHubBuilder};
pub use store::{JsonTestRunStore, TestRunStore};
