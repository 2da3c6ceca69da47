//! Normalized bundle data model.
//!
//! A bundle is the index for one (repository, commit, root, indexer) tuple.
//! It is built transiently by correlation (or by patching a stored bundle),
//! handed to the persistence layer, and then dropped.

use std::cmp::Ordering;
use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::hash::hash_key;

/// Identifier of a range, result, hover, moniker or document within a bundle.
pub type Id = String;

/// Bundle-level metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Meta {
    /// Number of result chunks that result ids are hashed into.
    pub num_result_chunks: usize,
}

impl Default for Meta {
    fn default() -> Self {
        Self {
            num_result_chunks: 1,
        }
    }
}

/// A span in a document plus the results attached to it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RangeData {
    pub start_line: u32,
    pub start_character: u32,
    pub end_line: u32,
    pub end_character: u32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub definition_result_id: Option<Id>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference_result_id: Option<Id>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hover_result_id: Option<Id>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub moniker_ids: Vec<Id>,
}

impl RangeData {
    /// Create a range with no attached results.
    pub fn new(start_line: u32, start_character: u32, end_line: u32, end_character: u32) -> Self {
        Self {
            start_line,
            start_character,
            end_line,
            end_character,
            ..Default::default()
        }
    }

    /// The (start line, start character, end line, end character) tuple.
    pub fn span(&self) -> (u32, u32, u32, u32) {
        (
            self.start_line,
            self.start_character,
            self.end_line,
            self.end_character,
        )
    }

    /// Total order on spans used wherever ranges are enumerated deterministically.
    pub fn compare_span(&self, other: &RangeData) -> Ordering {
        self.span().cmp(&other.span())
    }

    pub fn with_definition_result(mut self, id: impl Into<Id>) -> Self {
        self.definition_result_id = Some(id.into());
        self
    }

    pub fn with_reference_result(mut self, id: impl Into<Id>) -> Self {
        self.reference_result_id = Some(id.into());
        self
    }

    pub fn with_hover_result(mut self, id: impl Into<Id>) -> Self {
        self.hover_result_id = Some(id.into());
        self
    }
}

/// Moniker attached to one or more ranges.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonikerData {
    /// "import", "export" or "local"
    pub kind: String,
    pub scheme: String,
    pub identifier: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub package_information_id: Option<Id>,
}

/// Package name and version referenced by monikers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageInformationData {
    pub name: String,
    pub version: String,
}

/// All data stored for a single file of the bundle.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DocumentData {
    /// Ranges keyed by range id. Unordered; see [`DocumentData::sorted_range_ids`].
    #[serde(default)]
    pub ranges: HashMap<Id, RangeData>,

    #[serde(default)]
    pub hover_results: HashMap<Id, String>,

    #[serde(default)]
    pub monikers: HashMap<Id, MonikerData>,

    #[serde(default)]
    pub package_information: HashMap<Id, PackageInformationData>,
}

impl DocumentData {
    /// Range ids ordered by span, ties broken by id.
    pub fn sorted_range_ids(&self) -> Vec<&Id> {
        let mut ids: Vec<&Id> = self.ranges.keys().collect();
        ids.sort_by(|a, b| {
            self.ranges[*a]
                .compare_span(&self.ranges[*b])
                .then_with(|| a.cmp(b))
        });
        ids
    }
}

/// A (document id, range id) pair inside a result chunk.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DocumentIdRangeId {
    pub document_id: Id,
    pub range_id: Id,
}

impl DocumentIdRangeId {
    pub fn new(document_id: impl Into<Id>, range_id: impl Into<Id>) -> Self {
        Self {
            document_id: document_id.into(),
            range_id: range_id.into(),
        }
    }
}

/// One shard of the definition/reference result index.
///
/// Document ids are local to the chunk: the same path may have different
/// document ids in different chunks.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResultChunkData {
    #[serde(default)]
    pub document_paths: HashMap<Id, String>,

    #[serde(default)]
    pub document_id_range_ids: HashMap<Id, Vec<DocumentIdRangeId>>,
}

impl ResultChunkData {
    /// Resolve a result id to (path, range id) pairs, skipping entries whose
    /// document id has no registered path.
    pub fn resolve(&self, result_id: &str) -> Vec<(&str, &str)> {
        self.document_id_range_ids
            .get(result_id)
            .map(|entries| {
                entries
                    .iter()
                    .filter_map(|entry| {
                        self.document_paths
                            .get(&entry.document_id)
                            .map(|path| (path.as_str(), entry.range_id.as_str()))
                    })
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Position of a moniker occurrence.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Location {
    pub path: String,
    pub start_line: u32,
    pub start_character: u32,
    pub end_line: u32,
    pub end_character: u32,
}

/// Locations of a moniker, one row of the definitions or references table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonikerLocations {
    pub scheme: String,
    pub identifier: String,
    pub locations: Vec<Location>,
}

/// A package exported by a bundle.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Package {
    pub scheme: String,
    pub name: String,
    pub version: String,
}

impl Package {
    pub fn new(
        scheme: impl Into<String>,
        name: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        Self {
            scheme: scheme.into(),
            name: name.into(),
            version: version.into(),
        }
    }
}

/// A package imported by a bundle, with a bloom filter over the identifiers
/// the bundle uses from it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageReference {
    pub scheme: String,
    pub name: String,
    pub version: String,
    /// Encoded bloom filter (see the `codeintel-bloom` crate).
    pub filter: Vec<u8>,
}

impl PackageReference {
    /// The package this reference points at.
    pub fn package(&self) -> Package {
        Package::new(&self.scheme, &self.name, &self.version)
    }
}

/// Change classification of a file between a base commit and a patch commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FileStatus {
    #[default]
    Unchanged,
    Added,
    Modified,
    Deleted,
}

/// The normalized index for one (repository, commit, root, indexer) tuple.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BundleData {
    pub meta: Meta,

    #[serde(default)]
    pub documents: HashMap<String, DocumentData>,

    #[serde(default)]
    pub result_chunks: HashMap<usize, ResultChunkData>,

    #[serde(default)]
    pub definitions: Vec<MonikerLocations>,

    #[serde(default)]
    pub references: Vec<MonikerLocations>,

    #[serde(default)]
    pub packages: Vec<Package>,

    #[serde(default)]
    pub package_references: Vec<PackageReference>,
}

impl BundleData {
    /// Index of the result chunk owning `result_id`.
    pub fn result_chunk_index(&self, result_id: &str) -> usize {
        hash_key(result_id, self.meta.num_result_chunks)
    }

    /// The result chunk owning `result_id`, if present.
    pub fn result_chunk_for(&self, result_id: &str) -> Option<&ResultChunkData> {
        self.result_chunks.get(&self.result_chunk_index(result_id))
    }

    /// Resolve a definition or reference result id to (path, range id) pairs.
    pub fn resolve_result(&self, result_id: &str) -> Vec<(&str, &str)> {
        self.result_chunk_for(result_id)
            .map(|chunk| chunk.resolve(result_id))
            .unwrap_or_default()
    }

    /// Result ids carried by ranges that do not resolve.
    ///
    /// Definition and reference result ids must have an entry in their owning
    /// result chunk; hover result ids must exist in the range's own document.
    /// Returns `(path, result id)` pairs sorted for stable output.
    pub fn unresolved_result_ids(&self) -> Vec<(String, Id)> {
        let mut unresolved = Vec::new();

        for (path, document) in &self.documents {
            for range in document.ranges.values() {
                for id in [&range.definition_result_id, &range.reference_result_id]
                    .into_iter()
                    .flatten()
                {
                    let found = self
                        .result_chunk_for(id)
                        .is_some_and(|chunk| chunk.document_id_range_ids.contains_key(id));
                    if !found {
                        unresolved.push((path.clone(), id.clone()));
                    }
                }

                if let Some(id) = &range.hover_result_id {
                    if !document.hover_results.contains_key(id) {
                        unresolved.push((path.clone(), id.clone()));
                    }
                }
            }
        }

        unresolved.sort();
        unresolved.dedup();
        unresolved
    }

    /// Chunk entries whose document id is missing from the chunk's path map.
    pub fn unregistered_document_ids(&self) -> Vec<(usize, Id)> {
        let mut missing = Vec::new();
        for (index, chunk) in &self.result_chunks {
            for entries in chunk.document_id_range_ids.values() {
                for entry in entries {
                    if !chunk.document_paths.contains_key(&entry.document_id) {
                        missing.push((*index, entry.document_id.clone()));
                    }
                }
            }
        }
        missing.sort();
        missing.dedup();
        missing
    }
}
