//! Coordination core: the run → spec → node task hierarchy.
//!
//! The only public API from this module is [`RunCoordinator`] and the
//! [`SpecListener`] hook.
//!
//! Internal modules:
//! - [`child`]: parent-side handle (inbox, bounded requests, stop with grace);
//! - [`node`]: one aggregator per node per spec;
//! - [`spec`]: one coordinator per active spec, snapshot/merge at spec end;
//! - [`run`]: the run coordinator and its result tree;
//! - [`shutdown`]: termination signal handling.

mod child;
mod node;
mod run;
mod spec;

pub(crate) mod shutdown;

pub use run::{RunCoordinator, SpecListener};
