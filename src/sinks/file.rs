//! # File-system sink.
//!
//! [`FileSystemSink`] stays quiet during the run and persists the sealed
//! [`RunTree`] through a [`TestRunStore`] when the run ends. Store failures are
//! logged and swallowed; they never affect the exit code.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, info, warn};

use crate::events::{BeginSpec, EndSpec, NodeLogFragment, NodeResult};
use crate::model::{RunTree, RunnerMessage};
use crate::sinks::sink::{Coordination, Sink};
use crate::store::TestRunStore;

pub struct FileSystemSink<S: TestRunStore> {
    store: Arc<S>,
    path: PathBuf,
}

impl<S: TestRunStore> FileSystemSink<S> {
    pub fn new(store: S, path: impl Into<PathBuf>) -> Self {
        Self {
            store: Arc::new(store),
            path: path.into(),
        }
    }

    /// Writes to `<dir>/<prefix>-<UTC timestamp>.json`.
    pub fn timestamped(store: S, dir: impl AsRef<Path>, prefix: &str) -> Self {
        let file = format!("{prefix}-{}.json", Utc::now().format("%Y%m%d-%H%M%S"));
        Self::new(store, dir.as_ref().join(file))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl<S: TestRunStore> Sink for FileSystemSink<S> {
    fn name(&self) -> &'static str {
        "file-system"
    }

    fn coordination(&self) -> Coordination {
        Coordination::Embedded
    }

    async fn on_begin_spec(&mut self, _spec: &BeginSpec) {}

    async fn on_end_spec(&mut self, _spec: &EndSpec) {}

    async fn on_node_log(&mut self, _fragment: &NodeLogFragment) {}

    async fn on_runner_log(&mut self, _message: &RunnerMessage) {}

    async fn on_node_pass(&mut self, _result: &NodeResult) {}

    async fn on_node_fail(&mut self, _result: &NodeResult) {}

    async fn on_end_run(&mut self) {}

    async fn on_tree_summary(&mut self, tree: &RunTree) {
        info!(path = %self.path.display(), "writing test run state");

        let store = Arc::clone(&self.store);
        let path = self.path.clone();
        let tree = tree.clone();
        let saved = tokio::task::spawn_blocking(move || store.save(&path, &tree)).await;

        match saved {
            Ok(Ok(_)) => info!(path = %self.path.display(), "test run state written"),
            Ok(Err(err)) => {
                warn!(path = %self.path.display(), label = err.as_label(), error = %err, "failed to write test run state")
            }
            Err(err) => warn!(path = %self.path.display(), error = %err, "store task failed"),
        }
    }

    async fn on_unrecognized(&mut self, line: &str) {
        debug!(line, "ignoring unrecognized line");
    }
}

#[cfg(test)]
mod tests {
    use camino_tempfile::Utf8TempDir;

    use super::*;
    use crate::config::Config;
    use crate::error::StoreError;
    use crate::events::Event;
    use crate::model::NodeTest;
    use crate::sinks::pipeline::SinkHandle;
    use crate::store::JsonTestRunStore;

    struct BrokenStore;

    impl TestRunStore for BrokenStore {
        fn save(&self, _locator: &Path, _tree: &RunTree) -> Result<bool, StoreError> {
            Err(std::io::Error::other("read-only").into())
        }

        fn exists(&self, _locator: &Path) -> bool {
            false
        }

        fn fetch(&self, _locator: &Path) -> Result<Option<RunTree>, StoreError> {
            Ok(None)
        }
    }

    #[tokio::test]
    async fn test_tree_is_saved_on_close() {
        let dir = Utf8TempDir::new().expect("tempdir");
        let path = dir.path().join("run.json");
        let sink = FileSystemSink::new(JsonTestRunStore, path.as_std_path());
        let handle = SinkHandle::open(sink, &Config::default());

        handle.begin_test(BeginSpec::new(
            "Spec",
            "saved",
            vec![NodeTest::new(0, "only", "Spec", "saved")],
        ));
        handle.send(Event::node_pass(0, "only", "ok"));
        handle.end_test(EndSpec::default());
        handle.close().await.expect("close");

        let tree = JsonTestRunStore
            .fetch(path.as_std_path())
            .expect("fetch")
            .expect("tree");
        assert!(tree.is_sealed());
        assert_eq!(tree.specs().len(), 1);
        assert_eq!(tree.specs()[0].fact_name(), "Spec.saved");
        assert!(tree.passed());
    }

    #[tokio::test]
    async fn test_store_failure_does_not_change_exit_code() {
        let handle = SinkHandle::open(FileSystemSink::new(BrokenStore, "unused.json"), &Config::default());
        handle.begin_test(BeginSpec::new("Spec", "empty", Vec::new()));
        handle.end_test(EndSpec::default());

        assert_eq!(handle.request_exit_code().await, Ok(0));
        handle.close().await.expect("close");
    }

    #[test]
    fn test_timestamped_path() {
        let sink = FileSystemSink::timestamped(JsonTestRunStore, "reports", "cluster-tests");
        let name = sink.path().file_name().and_then(|n| n.to_str()).expect("file name");
        assert!(sink.path().starts_with("reports"));
        assert!(name.starts_with("cluster-tests-"));
        assert!(name.ends_with(".json"));
    }
}
