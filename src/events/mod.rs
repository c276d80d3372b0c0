//! Inbound event vocabulary and the raw-line parser boundary.

mod event;
mod parse;

pub use event::{BeginSpec, EndSpec, Event, NodeLogFragment, NodeResult};
pub use parse::LineParser;
