//! # Reporter configuration.
//!
//! Provides [`Config`], the settings shared by the coordinators, sink pipelines
//! and the sink hub.
//!
//! Config is used in three places:
//! 1. **Coordinators**: `RunCoordinator::spawn(config)` (snapshot deadlines, grace)
//! 2. **Sink pipelines**: `SinkHandle::open(sink, &config)` (close timeout)
//! 3. **Sink hub**: `SinkHub::builder(config)` (runner message source)
//!
//! ## Sentinel values
//! - `grace = 0s` → stopped children are aborted immediately

use std::time::Duration;

/// What to do when a spec cannot be collected in time (or at all).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SnapshotTimeoutPolicy {
    /// Record the spec as failed and keep the run going.
    #[default]
    FailSpec,
    /// Record the spec as failed and mark the whole run as aborted.
    ///
    /// Later `begin_spec` calls are rejected with `RunAborted`.
    AbortRun,
}

/// Configuration of the reporter runtime.
///
/// ## Field semantics
/// - `node_snapshot_timeout`: shared deadline for all node snapshots at spec end
/// - `spec_snapshot_timeout`: deadline for the sealed spec record at spec end
/// - `grace`: how long a stopped child may take to exit before it is aborted
/// - `sink_close_timeout`: bound on a sink's close acknowledgment
/// - `on_snapshot_timeout`: policy for specs that could not be collected
/// - `runner_source`: `source` stamped on runner messages published by the hub
///
/// ## Notes
/// All fields are public. Prefer the helper accessors over sentinel checks.
#[derive(Clone, Debug)]
pub struct Config {
    /// Deadline shared by every node snapshot request of one spec end.
    pub node_snapshot_timeout: Duration,

    /// Deadline for the spec coordinator to answer an end-spec request.
    ///
    /// Should be larger than `node_snapshot_timeout`, otherwise a slow node
    /// surfaces as a spec-level timeout instead of a node-level one.
    pub spec_snapshot_timeout: Duration,

    /// Maximum time a stopped child task may take to finish.
    ///
    /// - `Duration::ZERO` = abort immediately
    /// - `> 0` = wait for the task, then abort it
    pub grace: Duration,

    /// Maximum wait for a sink to acknowledge `close` (and an exit-code request).
    pub sink_close_timeout: Duration,

    /// Policy for specs whose results could not be collected.
    pub on_snapshot_timeout: SnapshotTimeoutPolicy,

    /// Source name attached to runner messages published through the hub.
    pub runner_source: String,
}

impl Config {
    /// Returns the grace window as an `Option`.
    ///
    /// - `None` → abort immediately
    /// - `Some(d)` → wait up to `d`
    #[inline]
    pub fn grace_window(&self) -> Option<Duration> {
        if self.grace == Duration::ZERO {
            None
        } else {
            Some(self.grace)
        }
    }

    /// Returns `true` when an uncollectable spec aborts the run.
    #[inline]
    pub fn aborts_run_on_timeout(&self) -> bool {
        self.on_snapshot_timeout == SnapshotTimeoutPolicy::AbortRun
    }
}

impl Default for Config {
    /// Default configuration:
    ///
    /// - `node_snapshot_timeout = 1s`
    /// - `spec_snapshot_timeout = 2s`
    /// - `grace = 1s`
    /// - `sink_close_timeout = 10s`
    /// - `on_snapshot_timeout = FailSpec`
    /// - `runner_source = "multinode-reporter"`
    fn default() -> Self {
        Self {
            node_snapshot_timeout: Duration::from_secs(1),
            spec_snapshot_timeout: Duration::from_secs(2),
            grace: Duration::from_secs(1),
            sink_close_timeout: Duration::from_secs(10),
            on_snapshot_timeout: SnapshotTimeoutPolicy::default(),
            runner_source: env!("CARGO_PKG_NAME").to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = Config::default();
        assert_eq!(cfg.node_snapshot_timeout, Duration::from_secs(1));
        assert_eq!(cfg.spec_snapshot_timeout, Duration::from_secs(2));
        assert_eq!(cfg.grace_window(), Some(Duration::from_secs(1)));
        assert_eq!(cfg.sink_close_timeout, Duration::from_secs(10));
        assert!(!cfg.aborts_run_on_timeout());
        assert_eq!(cfg.runner_source, "multinode-reporter");
    }

    #[test]
    fn test_zero_grace_means_abort_immediately() {
        let cfg = Config {
            grace: Duration::ZERO,
            ..Config::default()
        };
        assert_eq!(cfg.grace_window(), None);
    }
}
