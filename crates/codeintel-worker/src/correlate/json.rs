//! Correlator for pre-correlated JSON uploads.
//!
//! The raw upload is a JSON rendering of a bundle whose package references
//! list plain identifiers instead of an encoded filter. Paths may be given
//! relative to the repository or to the upload root.

use std::collections::{BTreeSet, HashMap, HashSet};

use async_trait::async_trait;
use codeintel_bloom::create_filter;
use codeintel_types::{
    BundleData, DocumentData, Meta, MonikerLocations, Package, PackageReference, ResultChunkData,
};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{CorrelateError, Correlator, PathExistenceChecker};

/// A package reference as written by the indexer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawPackageReference {
    pub scheme: String,
    pub name: String,
    pub version: String,
    /// Identifiers the bundle uses from the package
    #[serde(default)]
    pub identifiers: Vec<String>,
}

/// Wire form of a JSON upload.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawBundle {
    #[serde(default)]
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
    pub package_references: Vec<RawPackageReference>,
}

/// Correlates [`RawBundle`] JSON uploads.
#[derive(Debug, Default, Clone)]
pub struct JsonCorrelator;

impl JsonCorrelator {
    pub fn new() -> Self {
        Self
    }
}

/// Upload root with a trailing slash, or empty for the repository root.
fn root_prefix(root: &str) -> String {
    let root = root.trim_start_matches("./").trim_matches('/');
    if root.is_empty() {
        String::new()
    } else {
        format!("{}/", root)
    }
}

fn relative(prefix: &str, path: &str) -> String {
    path.strip_prefix(prefix).unwrap_or(path).to_string()
}

fn dirname(path: &str) -> &str {
    path.rsplit_once('/').map_or("", |(dir, _)| dir)
}

/// The root-relative paths among `paths` that exist in the commit.
async fn existing_paths<'a>(
    prefix: &str,
    paths: impl Iterator<Item = &'a String>,
    checker: &dyn PathExistenceChecker,
) -> Result<HashSet<String>, CorrelateError> {
    let candidates: Vec<(&String, String)> = paths
        .map(|path| (path, format!("{}{}", prefix, path)))
        .collect();
    if candidates.is_empty() {
        return Ok(HashSet::new());
    }

    let dirnames: Vec<String> = candidates
        .iter()
        .map(|(_, full)| dirname(full).to_string())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();

    let children = checker.directory_children(&dirnames).await?;
    let known: HashSet<&String> = children.values().flatten().collect();

    Ok(candidates
        .into_iter()
        .filter(|(_, full)| known.contains(full))
        .map(|(path, _)| path.clone())
        .collect())
}

fn prune_monikers(
    rows: Vec<MonikerLocations>,
    prefix: &str,
    existing: &HashSet<String>,
) -> Vec<MonikerLocations> {
    rows.into_iter()
        .filter_map(|mut row| {
            row.locations = row
                .locations
                .into_iter()
                .map(|mut location| {
                    location.path = relative(prefix, &location.path);
                    location
                })
                .filter(|location| existing.contains(&location.path))
                .collect();
            (!row.locations.is_empty()).then_some(row)
        })
        .collect()
}

/// Parse an upload and key its documents relative to the root.
fn parse(raw: &[u8], prefix: &str) -> Result<RawBundle, CorrelateError> {
    let mut raw: RawBundle =
        serde_json::from_slice(raw).map_err(|e| CorrelateError::InvalidUpload(e.to_string()))?;
    if raw.meta.num_result_chunks == 0 {
        return Err(CorrelateError::InvalidUpload(
            "num_result_chunks must be positive".to_string(),
        ));
    }

    raw.documents = std::mem::take(&mut raw.documents)
        .into_iter()
        .map(|(path, document)| (relative(prefix, &path), document))
        .collect();
    Ok(raw)
}

/// Drop everything outside `existing` and build the reference filters.
fn assemble(
    raw: RawBundle,
    prefix: &str,
    existing: &HashSet<String>,
) -> Result<BundleData, CorrelateError> {
    let mut documents = raw.documents;
    let total = documents.len();
    documents.retain(|path, _| existing.contains(path));

    let mut result_chunks = raw.result_chunks;
    for chunk in result_chunks.values_mut() {
        let ResultChunkData {
            document_paths,
            document_id_range_ids,
        } = chunk;

        *document_paths = document_paths
            .drain()
            .map(|(id, path)| (id, relative(prefix, &path)))
            .filter(|(_, path)| existing.contains(path))
            .collect();
        for entries in document_id_range_ids.values_mut() {
            entries.retain(|entry| document_paths.contains_key(&entry.document_id));
        }
    }

    let package_references = raw
        .package_references
        .into_iter()
        .map(|reference| {
            Ok(PackageReference {
                filter: create_filter(&reference.identifiers)?,
                scheme: reference.scheme,
                name: reference.name,
                version: reference.version,
            })
        })
        .collect::<Result<Vec<_>, CorrelateError>>()?;

    let bundle = BundleData {
        meta: raw.meta,
        documents,
        result_chunks,
        definitions: prune_monikers(raw.definitions, prefix, existing),
        references: prune_monikers(raw.references, prefix, existing),
        packages: raw.packages,
        package_references,
    };

    if let Some((path, result_id)) = bundle.unresolved_result_ids().into_iter().next() {
        return Err(CorrelateError::InvalidUpload(format!(
            "Range in {} references unknown result {}",
            path, result_id
        )));
    }

    debug!(
        documents = bundle.documents.len(),
        pruned = total - bundle.documents.len(),
        "Correlated upload"
    );
    Ok(bundle)
}

/// Parsing and assembly run on the blocking pool; only the path lookup is
/// awaited on the runtime.
#[async_trait]
impl Correlator for JsonCorrelator {
    async fn correlate(
        &self,
        raw: Vec<u8>,
        root: &str,
        paths: &dyn PathExistenceChecker,
    ) -> Result<BundleData, CorrelateError> {
        let prefix = root_prefix(root);

        let parse_prefix = prefix.clone();
        let raw = tokio::task::spawn_blocking(move || parse(&raw, &parse_prefix)).await??;

        let existing = existing_paths(&prefix, raw.documents.keys(), paths).await?;

        let bundle =
            tokio::task::spawn_blocking(move || assemble(raw, &prefix, &existing)).await??;
        Ok(bundle)
    }
}
