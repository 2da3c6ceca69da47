//! Range unification, result pruning and result merging.

use std::collections::{BTreeSet, HashMap, HashSet};

use codeintel_types::{BundleData, DocumentData, DocumentIdRangeId, FileStatus, Id, ResultChunkData};
use tracing::debug;
use ulid::Ulid;

use crate::error::PatchError;
use crate::tables::{merge_moniker_tables, merge_package_references, merge_packages};

/// A range in the patch bundle, keyed by (path, patch range id).
type RangeKey = (String, Id);

fn fresh_id() -> Id {
    Ulid::new().to_string()
}

fn status_of(file_status: &HashMap<String, FileStatus>, path: &str) -> FileStatus {
    file_status.get(path).copied().unwrap_or_default()
}

/// Merge `patch` onto `base` and return the merged bundle.
///
/// `reindexed_files` lists paths the indexer processed again even when their
/// content did not change. Paths missing from `file_status` are unchanged.
/// Every range id, result id and document id carried over from the patch is
/// rewritten into the base bundle's id space: unchanged files keep the base's
/// range ids, all other copied files get fresh ones.
pub fn patch_bundle(
    mut base: BundleData,
    patch: BundleData,
    reindexed_files: &HashSet<String>,
    file_status: &HashMap<String, FileStatus>,
) -> Result<BundleData, PatchError> {
    let copied: BTreeSet<String> = patch
        .documents
        .keys()
        .filter(|path| match status_of(file_status, path) {
            FileStatus::Deleted => false,
            FileStatus::Unchanged => reindexed_files.contains(*path),
            FileStatus::Added | FileStatus::Modified => true,
        })
        .cloned()
        .collect();

    let mut pruned: HashSet<String> = file_status
        .iter()
        .filter(|(_, status)| matches!(status, FileStatus::Modified | FileStatus::Deleted))
        .map(|(path, _)| path.clone())
        .collect();
    pruned.extend(
        copied
            .iter()
            .filter(|path| status_of(file_status, path) != FileStatus::Unchanged)
            .cloned(),
    );

    let range_ids = unify_ranges(&base, &patch, &copied, file_status)?;
    let pruned_entries = prune_results(&mut base, &pruned);

    let (definition_ids, reference_ids) = {
        let mut merge = ResultMerge {
            base: &mut base,
            patch: &patch,
            file_status,
            range_ids: &range_ids,
            definition_ids: HashMap::new(),
            reference_ids: HashMap::new(),
            document_ids: HashMap::new(),
        };
        merge.run(&copied);
        (merge.definition_ids, merge.reference_ids)
    };

    let BundleData {
        mut documents,
        definitions,
        references,
        packages,
        package_references,
        ..
    } = patch;

    let mut replaced: HashSet<String> = pruned.clone();
    replaced.extend(copied.iter().cloned());
    merge_moniker_tables(&mut base.definitions, definitions, &replaced, &copied);
    merge_moniker_tables(&mut base.references, references, &replaced, &copied);
    merge_packages(&mut base.packages, packages);
    merge_package_references(&mut base.package_references, package_references)?;

    for path in &copied {
        if let Some(document) = documents.remove(path) {
            let document =
                rewrite_document(path, document, &range_ids, &definition_ids, &reference_ids);
            base.documents.insert(path.clone(), document);
        }
    }
    base.documents
        .retain(|path, _| copied.contains(path) || !pruned.contains(path));

    debug!(
        copied = copied.len(),
        pruned = pruned.len(),
        pruned_entries,
        documents = base.documents.len(),
        "Patched bundle"
    );
    Ok(base)
}

/// Map every patch range that survives into the merged bundle to its merged id.
///
/// Ranges of paths unchanged on both sides are paired by span order and keep
/// the base id. Ranges of other copied paths get fresh ids.
fn unify_ranges(
    base: &BundleData,
    patch: &BundleData,
    copied: &BTreeSet<String>,
    file_status: &HashMap<String, FileStatus>,
) -> Result<HashMap<RangeKey, Id>, PatchError> {
    let mut paths: Vec<&String> = patch.documents.keys().collect();
    paths.sort();

    let mut range_ids = HashMap::new();
    for path in paths {
        let patch_document = &patch.documents[path];
        let unchanged = status_of(file_status, path) == FileStatus::Unchanged;

        match base.documents.get(path) {
            Some(base_document) if unchanged => {
                let base_ids = base_document.sorted_range_ids();
                let patch_ids = patch_document.sorted_range_ids();
                if base_ids.len() != patch_ids.len() {
                    return Err(PatchError::UnequalUnmodifiedPaths {
                        path: path.clone(),
                        base_count: base_ids.len(),
                        patch_count: patch_ids.len(),
                    });
                }
                for (patch_id, base_id) in patch_ids.into_iter().zip(base_ids) {
                    range_ids.insert((path.clone(), patch_id.clone()), base_id.clone());
                }
            }
            _ if copied.contains(path) => {
                for patch_id in patch_document.sorted_range_ids() {
                    range_ids.insert((path.clone(), patch_id.clone()), fresh_id());
                }
            }
            _ => {}
        }
    }

    Ok(range_ids)
}

/// Drop result entries that point into pruned paths.
///
/// Only results reachable from ranges of pruned documents can hold such
/// entries. Each result id is filtered once. Returns the number of removed
/// entries.
fn prune_results(base: &mut BundleData, pruned: &HashSet<String>) -> usize {
    let mut paths: Vec<&String> = base
        .documents
        .keys()
        .filter(|path| pruned.contains(*path))
        .collect();
    paths.sort();

    let mut seen = HashSet::new();
    let mut result_ids = Vec::new();
    for path in paths {
        let document = &base.documents[path];
        for range_id in document.sorted_range_ids() {
            let range = &document.ranges[range_id];
            for id in [&range.definition_result_id, &range.reference_result_id]
                .into_iter()
                .flatten()
            {
                if seen.insert(id.clone()) {
                    result_ids.push(id.clone());
                }
            }
        }
    }

    let mut removed = 0;
    for id in result_ids {
        let index = base.result_chunk_index(&id);
        let Some(chunk) = base.result_chunks.get_mut(&index) else {
            continue;
        };
        let ResultChunkData {
            document_paths,
            document_id_range_ids,
        } = chunk;
        if let Some(entries) = document_id_range_ids.get_mut(&id) {
            let before = entries.len();
            entries.retain(|entry| {
                !document_paths
                    .get(&entry.document_id)
                    .is_some_and(|path| pruned.contains(path))
            });
            removed += before - entries.len();
        }
    }
    removed
}

/// State of the definition/reference merge.
struct ResultMerge<'a> {
    base: &'a mut BundleData,
    patch: &'a BundleData,
    file_status: &'a HashMap<String, FileStatus>,
    range_ids: &'a HashMap<RangeKey, Id>,
    /// Patch definition result id -> merged (definition, reference) ids
    definition_ids: HashMap<Id, (Id, Id)>,
    /// Patch reference result id -> merged reference id
    reference_ids: HashMap<Id, Id>,
    /// Chunk index -> path -> document id, built lazily per chunk
    document_ids: HashMap<usize, HashMap<String, Id>>,
}

impl ResultMerge<'_> {
    fn run(&mut self, copied: &BTreeSet<String>) {
        let patch = self.patch;

        for path in copied {
            let document = &patch.documents[path];
            for range_id in document.sorted_range_ids() {
                let range = &document.ranges[range_id];
                if let Some(definition) = &range.definition_result_id {
                    self.merge_definition(definition, range.reference_result_id.as_ref());
                }
            }
        }

        // Reference results of ranges without a definition result
        for path in copied {
            let document = &patch.documents[path];
            for range_id in document.sorted_range_ids() {
                if let Some(reference) = &document.ranges[range_id].reference_result_id {
                    if !self.reference_ids.contains_key(reference) {
                        let merged = fresh_id();
                        self.append_entries(reference, &merged);
                        self.reference_ids.insert(reference.clone(), merged);
                    }
                }
            }
        }
    }

    fn merge_definition(&mut self, definition: &Id, reference: Option<&Id>) {
        let merged_reference = match self.definition_ids.get(definition) {
            Some((_, merged_reference)) => merged_reference.clone(),
            None => {
                let (merged_definition, merged_reference) = self
                    .reusable_ids(definition)
                    .unwrap_or_else(|| (fresh_id(), fresh_id()));
                self.append_entries(definition, &merged_definition);
                self.definition_ids.insert(
                    definition.clone(),
                    (merged_definition, merged_reference.clone()),
                );
                merged_reference
            }
        };

        if let Some(reference) = reference {
            if !self.reference_ids.contains_key(reference) {
                self.append_entries(reference, &merged_reference);
                self.reference_ids
                    .insert(reference.clone(), merged_reference);
            }
        }
    }

    /// Base result ids of the definition target, when that target lives in
    /// an unchanged file.
    fn reusable_ids(&self, definition: &str) -> Option<(Id, Id)> {
        let (path, range_id) = self.patch.resolve_result(definition).into_iter().next()?;
        if status_of(self.file_status, path) != FileStatus::Unchanged {
            return None;
        }

        let unified = self
            .range_ids
            .get(&(path.to_string(), range_id.to_string()))?;
        let range = self.base.documents.get(path)?.ranges.get(unified)?;
        let merged_definition = range.definition_result_id.clone()?;
        let merged_reference = range
            .reference_result_id
            .clone()
            .unwrap_or_else(fresh_id);
        Some((merged_definition, merged_reference))
    }

    /// Append the patch entries of `patch_id` to the base list of `merged_id`.
    ///
    /// Entries are remapped into merged range ids and into the owning chunk's
    /// document ids; a path new to the chunk gets a fresh document id that is
    /// registered in the chunk before it is referenced. Entries whose range
    /// does not survive the merge are dropped. The list is created even when
    /// empty so the merged id always resolves.
    fn append_entries(&mut self, patch_id: &str, merged_id: &Id) {
        let targets: Vec<(String, Id)> = self
            .patch
            .resolve_result(patch_id)
            .into_iter()
            .filter_map(|(path, range_id)| {
                self.range_ids
                    .get(&(path.to_string(), range_id.to_string()))
                    .map(|id| (path.to_string(), id.clone()))
            })
            .collect();

        let index = self.base.result_chunk_index(merged_id);
        let chunk = self.base.result_chunks.entry(index).or_default();
        let document_ids = self
            .document_ids
            .entry(index)
            .or_insert_with(|| paths_to_document_ids(chunk));

        let mut entries = Vec::with_capacity(targets.len());
        for (path, range_id) in targets {
            let document_id = match document_ids.get(&path) {
                Some(id) => id.clone(),
                None => {
                    let id = fresh_id();
                    chunk.document_paths.insert(id.clone(), path.clone());
                    document_ids.insert(path, id.clone());
                    id
                }
            };
            entries.push(DocumentIdRangeId::new(document_id, range_id));
        }

        let list = chunk
            .document_id_range_ids
            .entry(merged_id.clone())
            .or_default();
        for entry in entries {
            if !list.contains(&entry) {
                list.push(entry);
            }
        }
    }
}

/// Reverse document map of a chunk. The smallest id wins when a path is
/// registered twice.
fn paths_to_document_ids(chunk: &ResultChunkData) -> HashMap<String, Id> {
    let mut pairs: Vec<(&Id, &String)> = chunk.document_paths.iter().collect();
    pairs.sort();

    let mut document_ids = HashMap::new();
    for (id, path) in pairs {
        document_ids
            .entry(path.clone())
            .or_insert_with(|| id.clone());
    }
    document_ids
}

/// Rewrite a copied patch document into merged range and result ids.
fn rewrite_document(
    path: &str,
    document: DocumentData,
    range_ids: &HashMap<RangeKey, Id>,
    definition_ids: &HashMap<Id, (Id, Id)>,
    reference_ids: &HashMap<Id, Id>,
) -> DocumentData {
    let DocumentData {
        ranges,
        hover_results,
        monikers,
        package_information,
    } = document;

    let ranges = ranges
        .into_iter()
        .filter_map(|(id, mut range)| {
            let merged_id = range_ids.get(&(path.to_string(), id))?.clone();
            range.definition_result_id = range
                .definition_result_id
                .and_then(|id| definition_ids.get(&id).map(|(d, _)| d.clone()));
            range.reference_result_id = range
                .reference_result_id
                .and_then(|id| reference_ids.get(&id).cloned());
            Some((merged_id, range))
        })
        .collect();

    DocumentData {
        ranges,
        hover_results,
        monikers,
        package_information,
    }
}
