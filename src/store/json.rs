use std::fs;
use std::path::Path;

use tracing::debug;

use super::TestRunStore;
use crate::error::StoreError;
use crate::model::RunTree;

/// Stores run trees as pretty-printed JSON files.
///
/// Missing fields are tolerated and unknown fields ignored when loading, so
/// reports written by other versions still load.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonTestRunStore;

impl JsonTestRunStore {
    pub fn new() -> Self {
        Self
    }
}

impl TestRunStore for JsonTestRunStore {
    fn save(&self, locator: &Path, tree: &RunTree) -> Result<bool, StoreError> {
        if locator.as_os_str().is_empty() {
            return Err(StoreError::EmptyLocator);
        }
        if let Some(parent) = locator.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let json = serde_json::to_string_pretty(tree)?;
        fs::write(locator, json)?;
        debug!(path = %locator.display(), specs = tree.specs().len(), "run tree saved");
        Ok(true)
    }

    fn exists(&self, locator: &Path) -> bool {
        !locator.as_os_str().is_empty() && locator.is_file()
    }

    fn fetch(&self, locator: &Path) -> Result<Option<RunTree>, StoreError> {
        if locator.as_os_str().is_empty() {
            return Err(StoreError::EmptyLocator);
        }
        let text = fs::read_to_string(locator)?;
        if text.trim().is_empty() {
            return Ok(None);
        }
        Ok(Some(serde_json::from_str(&text)?))
    }
}

#[cfg(test)]
mod tests {
    use camino_tempfile::Utf8TempDir;
    use chrono::{DateTime, Utc};
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::model::{NodeMessage, NodeRecord, SpecRecord};

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(secs, 0).expect("valid timestamp")
    }

    fn sample_tree() -> RunTree {
        let mut node = NodeRecord::with_start(0, "seed", at(0));
        node.put(NodeMessage::fragment(0, "seed", "joining", at(1)));
        node.put(NodeMessage::outcome(0, "seed", "ok", true, at(2)));

        let mut spec = SpecRecord::new("ClusterSpec.must_form", at(0));
        spec.add_nodes([node]);
        spec.seal(at(3));

        let mut tree = RunTree::new(at(0));
        tree.add_spec(spec);
        tree.seal(at(4));
        tree
    }

    #[test]
    fn test_save_then_fetch() {
        let dir = Utf8TempDir::new().expect("tempdir");
        let path = dir.path().join("reports").join("run.json");
        let store = JsonTestRunStore::new();

        assert!(!store.exists(path.as_std_path()));
        let tree = sample_tree();
        assert!(store.save(path.as_std_path(), &tree).expect("save"));
        assert!(store.exists(path.as_std_path()));

        let loaded = store.fetch(path.as_std_path()).expect("fetch");
        assert_eq!(loaded, Some(tree));
    }

    #[test]
    fn test_empty_file_is_absent() {
        let dir = Utf8TempDir::new().expect("tempdir");
        let path = dir.path().join("empty.json");
        fs::write(&path, "").expect("write");

        let loaded = JsonTestRunStore.fetch(path.as_std_path()).expect("fetch");
        assert_eq!(loaded, None);
    }

    #[test]
    fn test_missing_fields_are_tolerated() {
        let dir = Utf8TempDir::new().expect("tempdir");
        let path = dir.path().join("old.json");
        fs::write(
            &path,
            r#"{
                "started_at": "2020-01-01T00:00:00Z",
                "specs": [{ "fact_name": "Old.spec", "started_at": "2020-01-01T00:00:00Z" }],
                "reporter_version": 3
            }"#,
        )
        .expect("write");

        let tree = JsonTestRunStore
            .fetch(path.as_std_path())
            .expect("fetch")
            .expect("tree");
        assert_eq!(tree.specs().len(), 1);
        assert_eq!(tree.specs()[0].fact_name(), "Old.spec");
        assert!(tree.specs()[0].nodes().is_empty());
        assert_eq!(tree.ended_at(), None);
    }

    #[test]
    fn test_empty_locator_is_rejected() {
        let err = JsonTestRunStore
            .save(Path::new(""), &sample_tree())
            .expect_err("empty locator");
        assert_eq!(err.as_label(), "store_empty_locator");
        assert!(!JsonTestRunStore.exists(Path::new("")));
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let dir = Utf8TempDir::new().expect("tempdir");
        let err = JsonTestRunStore
            .fetch(dir.path().join("nope.json").as_std_path())
            .expect_err("missing");
        assert_eq!(err.as_label(), "store_io");
    }
}
