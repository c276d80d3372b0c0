//! # Run-level data: the result tree of a whole test run.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::spec::SpecRecord;

/// Every spec completed in one run, in completion order.
///
/// `passed` is derived: the AND over all specs (vacuously `true` for an empty
/// run), forced to `false` once the run was aborted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunTree {
    started_at: DateTime<Utc>,
    #[serde(default)]
    ended_at: Option<DateTime<Utc>>,
    #[serde(default)]
    specs: Vec<SpecRecord>,
    #[serde(default)]
    aborted: Option<String>,
}

impl RunTree {
    pub fn new(started_at: DateTime<Utc>) -> Self {
        Self {
            started_at,
            ended_at: None,
            specs: Vec::new(),
            aborted: None,
        }
    }

    /// Appends a completed spec; refused once the run is sealed.
    pub(crate) fn add_spec(&mut self, spec: SpecRecord) -> bool {
        if self.is_sealed() {
            return false;
        }
        self.specs.push(spec);
        true
    }

    /// Marks the run as aborted. The first reason wins.
    pub(crate) fn abort(&mut self, reason: impl Into<String>) {
        if self.aborted.is_none() {
            self.aborted = Some(reason.into());
        }
    }

    /// Stamps the end time. Only the first call has any effect.
    pub(crate) fn seal(&mut self, at: DateTime<Utc>) -> bool {
        if self.is_sealed() {
            return false;
        }
        self.ended_at = Some(at);
        true
    }

    pub fn is_sealed(&self) -> bool {
        self.ended_at.is_some()
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn ended_at(&self) -> Option<DateTime<Utc>> {
        self.ended_at
    }

    pub fn specs(&self) -> &[SpecRecord] {
        &self.specs
    }

    pub fn aborted(&self) -> Option<&str> {
        self.aborted.as_deref()
    }

    pub fn passed(&self) -> bool {
        self.aborted.is_none() && self.specs.iter().all(SpecRecord::is_passed)
    }

    /// Number of specs that passed.
    pub fn passed_count(&self) -> usize {
        self.specs.iter().filter(|s| s.is_passed()).count()
    }

    /// Recommended process exit code: `0` when the run passed, `1` otherwise.
    pub fn exit_code(&self) -> i32 {
        if self.passed() { 0 } else { 1 }
    }

    /// Elapsed time; measured up to now while the run is still open.
    pub fn elapsed(&self) -> Duration {
        let end = self.ended_at.unwrap_or_else(Utc::now);
        (end - self.started_at).to_std().unwrap_or_default()
    }
}
