//! Result model: passive aggregates collected during a run.
//!
//! ```text
//! RunTree
//!   └─ specs: [SpecRecord]            (completion order)
//!        ├─ runner_messages: [RunnerMessage]
//!        └─ nodes: {index → NodeRecord}
//!                     ├─ events:  [NodeMessage]
//!                     └─ results: [NodeMessage]   (Passed / Failed only)
//! ```
//!
//! Records are mutated only by the task that owns them; everything handed out
//! is an owned clone.

mod node;
mod run;
mod spec;

pub use node::{NodeMessage, NodeMessageKind, NodeRecord, NodeTest};
pub use run::RunTree;
pub use spec::{LogLevel, RunnerMessage, SpecRecord};
