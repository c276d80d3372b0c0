//! # Result persistence.
//!
//! [`TestRunStore`] is the contract for saving and loading a sealed
//! [`RunTree`]. [`JsonTestRunStore`] is the reference implementation.

mod json;

use std::path::Path;

use crate::error::StoreError;
use crate::model::RunTree;

pub use json::JsonTestRunStore;

/// Persists run trees under a locator (a file path for file-based stores).
pub trait TestRunStore: Send + Sync + 'static {
    /// Writes `tree`; returns `true` when it was stored.
    fn save(&self, locator: &Path, tree: &RunTree) -> Result<bool, StoreError>;

    fn exists(&self, locator: &Path) -> bool;

    /// Loads a tree; `None` when the stored document is empty.
    fn fetch(&self, locator: &Path) -> Result<Option<RunTree>, StoreError>;
}
