//! Merging an incremental re-index onto a stored bundle.

use std::collections::{BTreeMap, HashMap, HashSet};

use pretty_assertions::assert_eq;

use codeintel_patch::{patch_bundle, PatchError};
use codeintel_types::{
    hash_key, BundleData, DocumentData, DocumentIdRangeId, FileStatus, Meta, RangeData,
    ResultChunkData,
};

/// Builds bundles whose chunk document ids are derived from the path.
struct Fixture {
    bundle: BundleData,
}

impl Fixture {
    fn new(num_result_chunks: usize) -> Self {
        Self {
            bundle: BundleData {
                meta: Meta { num_result_chunks },
                ..Default::default()
            },
        }
    }

    fn range(
        mut self,
        path: &str,
        id: &str,
        line: u32,
        definition: &str,
        reference: &str,
    ) -> Self {
        let range = RangeData::new(line, 0, line, 3)
            .with_definition_result(definition)
            .with_reference_result(reference);
        self.bundle
            .documents
            .entry(path.to_string())
            .or_insert_with(DocumentData::default)
            .ranges
            .insert(id.to_string(), range);
        self
    }

    fn result(mut self, id: &str, targets: &[(&str, &str)]) -> Self {
        let index = hash_key(id, self.bundle.meta.num_result_chunks);
        let chunk = self
            .bundle
            .result_chunks
            .entry(index)
            .or_insert_with(ResultChunkData::default);
        let mut entries = Vec::new();
        for (path, range_id) in targets {
            let document_id = format!("doc:{}", path);
            chunk
                .document_paths
                .insert(document_id.clone(), path.to_string());
            entries.push(DocumentIdRangeId::new(document_id, *range_id));
        }
        chunk.document_id_range_ids.insert(id.to_string(), entries);
        self
    }

    fn build(self) -> BundleData {
        self.bundle
    }
}

/// Stored bundle: `Foo` defined in a.go and used in b.go, `Bar` defined in
/// b.go and used in c.go.
fn base_bundle() -> BundleData {
    Fixture::new(4)
        .range("a.go", "a1", 0, "d1", "r1")
        .range("a.go", "a2", 5, "d1", "r1")
        .range("b.go", "b1", 1, "d1", "r1")
        .range("b.go", "b2", 2, "d2", "r2")
        .range("c.go", "c1", 0, "d2", "r2")
        .result("d1", &[("a.go", "a1")])
        .result("r1", &[("a.go", "a1"), ("a.go", "a2"), ("b.go", "b1")])
        .result("d2", &[("b.go", "b2")])
        .result("r2", &[("b.go", "b2"), ("c.go", "c1")])
        .build()
}

/// Re-index after `Bar` moved within b.go, c.go was deleted and d.go added.
fn patch_bundle_data() -> BundleData {
    Fixture::new(1)
        .range("a.go", "pa1", 0, "pd1", "pr1")
        .range("a.go", "pa2", 5, "pd1", "pr1")
        .range("b.go", "pb1", 1, "pd1", "pr1")
        .range("b.go", "pb2", 3, "pd2", "pr2")
        .range("d.go", "pd", 0, "pd2", "pr2")
        .result("pd1", &[("a.go", "pa1")])
        .result("pr1", &[("a.go", "pa1"), ("a.go", "pa2"), ("b.go", "pb1")])
        .result("pd2", &[("b.go", "pb2")])
        .result("pr2", &[("b.go", "pb2"), ("d.go", "pd")])
        .build()
}

fn file_status() -> HashMap<String, FileStatus> {
    [
        ("b.go", FileStatus::Modified),
        ("c.go", FileStatus::Deleted),
        ("d.go", FileStatus::Added),
    ]
    .into_iter()
    .map(|(path, status)| (path.to_string(), status))
    .collect()
}

fn paths(paths: &[&str]) -> HashSet<String> {
    paths.iter().map(|p| p.to_string()).collect()
}

/// The range of `path` starting at `line`.
fn range_at<'a>(bundle: &'a BundleData, path: &str, line: u32) -> (&'a String, &'a RangeData) {
    bundle.documents[path]
        .ranges
        .iter()
        .find(|(_, range)| range.start_line == line)
        .unwrap()
}

/// Resolved targets of a result as sorted (path, start line) pairs.
fn targets(bundle: &BundleData, result_id: &str) -> Vec<(String, u32)> {
    let mut targets: Vec<(String, u32)> = bundle
        .resolve_result(result_id)
        .into_iter()
        .map(|(path, range_id)| (path.to_string(), bundle.documents[path].ranges[range_id].start_line))
        .collect();
    targets.sort();
    targets
}

/// Id-independent shape: per path, per range span, the resolved targets of
/// its definition and reference results.
type Shape = BTreeMap<String, Vec<(u32, Vec<(String, u32)>, Vec<(String, u32)>)>>;

fn shape(bundle: &BundleData) -> Shape {
    bundle
        .documents
        .iter()
        .map(|(path, document)| {
            let mut ranges: Vec<_> = document
                .ranges
                .values()
                .map(|range| {
                    let resolve = |id: &Option<String>| {
                        id.as_deref()
                            .map(|id| targets(bundle, id))
                            .unwrap_or_default()
                    };
                    (
                        range.start_line,
                        resolve(&range.definition_result_id),
                        resolve(&range.reference_result_id),
                    )
                })
                .collect();
            ranges.sort();
            (path.clone(), ranges)
        })
        .collect()
}

#[test]
fn test_patch_replaces_changed_files() {
    let merged = patch_bundle(
        base_bundle(),
        patch_bundle_data(),
        &paths(&["b.go", "d.go"]),
        &file_status(),
    )
    .unwrap();

    let mut documents: Vec<&String> = merged.documents.keys().collect();
    documents.sort();
    assert_eq!(documents, vec!["a.go", "b.go", "d.go"]);

    // a.go was not re-indexed and keeps its ids
    let (a1, range) = range_at(&merged, "a.go", 0);
    assert_eq!(a1, "a1");
    assert_eq!(range.definition_result_id.as_deref(), Some("d1"));
    assert_eq!(
        targets(&merged, "r1"),
        vec![
            ("a.go".to_string(), 0),
            ("a.go".to_string(), 5),
            ("b.go".to_string(), 1),
        ]
    );

    // The use of Foo in b.go reuses the base results of its definition
    let (_, usage) = range_at(&merged, "b.go", 1);
    assert_eq!(usage.definition_result_id.as_deref(), Some("d1"));
    assert_eq!(usage.reference_result_id.as_deref(), Some("r1"));

    // Bar was redefined in b.go and gets fresh results
    let (_, bar) = range_at(&merged, "b.go", 3);
    let bar_definition = bar.definition_result_id.clone().unwrap();
    let bar_reference = bar.reference_result_id.clone().unwrap();
    assert_ne!(bar_definition, "d2");
    assert_eq!(targets(&merged, &bar_definition), vec![("b.go".to_string(), 3)]);
    assert_eq!(
        targets(&merged, &bar_reference),
        vec![("b.go".to_string(), 3), ("d.go".to_string(), 0)]
    );

    let (_, use_in_d) = range_at(&merged, "d.go", 0);
    assert_eq!(use_in_d.definition_result_id, Some(bar_definition));

    // Stale results no longer reach pruned files
    assert!(targets(&merged, "d2").is_empty());
    assert!(targets(&merged, "r2").is_empty());
}

#[test]
fn test_patch_leaves_no_dangling_ids() {
    let merged = patch_bundle(
        base_bundle(),
        patch_bundle_data(),
        &paths(&["a.go", "b.go", "d.go"]),
        &file_status(),
    )
    .unwrap();

    assert_eq!(merged.unresolved_result_ids(), Vec::<(String, String)>::new());
    assert_eq!(merged.unregistered_document_ids(), Vec::<(usize, String)>::new());

    for chunk in merged.result_chunks.values() {
        for entries in chunk.document_id_range_ids.values() {
            for entry in entries {
                let path = &chunk.document_paths[&entry.document_id];
                assert_ne!(path, "c.go");
                assert!(merged.documents[path].ranges.contains_key(&entry.range_id));
            }
        }
    }
}

#[test]
fn test_reindexed_unchanged_file_keeps_base_range_ids() {
    let merged = patch_bundle(
        base_bundle(),
        patch_bundle_data(),
        &paths(&["a.go", "b.go", "d.go"]),
        &file_status(),
    )
    .unwrap();

    let mut ids: Vec<&String> = merged.documents["a.go"].ranges.keys().collect();
    ids.sort();
    assert_eq!(ids, vec!["a1", "a2"]);
    assert_eq!(
        merged.documents["a.go"].ranges["a2"].reference_result_id.as_deref(),
        Some("r1")
    );
}

#[test]
fn test_patch_is_deterministic() {
    let run = || {
        patch_bundle(
            base_bundle(),
            patch_bundle_data(),
            &paths(&["a.go", "b.go", "d.go"]),
            &file_status(),
        )
        .unwrap()
    };

    assert_eq!(shape(&run()), shape(&run()));
}

#[test]
fn test_unchanged_file_with_different_ranges_is_rejected() {
    let mut patch = patch_bundle_data();
    patch
        .documents
        .get_mut("a.go")
        .unwrap()
        .ranges
        .remove("pa2");

    let err = patch_bundle(base_bundle(), patch, &paths(&["b.go", "d.go"]), &file_status())
        .unwrap_err();
    match err {
        PatchError::UnequalUnmodifiedPaths {
            path,
            base_count,
            patch_count,
        } => {
            assert_eq!(path, "a.go");
            assert_eq!(base_count, 2);
            assert_eq!(patch_count, 1);
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn test_empty_patch_only_deletes() {
    let status: HashMap<String, FileStatus> =
        [("c.go".to_string(), FileStatus::Deleted)].into_iter().collect();

    let merged = patch_bundle(base_bundle(), BundleData::default(), &HashSet::new(), &status)
        .unwrap();

    assert!(!merged.documents.contains_key("c.go"));
    assert_eq!(targets(&merged, "r2"), vec![("b.go".to_string(), 2)]);
    assert!(merged.unresolved_result_ids().is_empty());
}
