//! Column family definitions for RocksDB.
//!
//! - uploads: job queue rows keyed by upload id
//! - upload_queue: index of the Queued, Errored and Processing rows
//! - dumps_by_key: index of Completed rows by upload key
//! - bundle tables (meta, documents, result_chunks, definitions, references):
//!   rows prefixed by dump id so a dump can be purged with one range delete
//! - cross-repository tables (packages, package_references): also dump-prefixed
//! - dirty_repositories: per-repository dirty tokens

use rocksdb::{ColumnFamilyDescriptor, Options};

pub const CF_UPLOADS: &str = "uploads";
pub const CF_UPLOAD_QUEUE: &str = "upload_queue";
pub const CF_DUMPS_BY_KEY: &str = "dumps_by_key";
pub const CF_META: &str = "meta";
pub const CF_DOCUMENTS: &str = "documents";
pub const CF_RESULT_CHUNKS: &str = "result_chunks";
pub const CF_DEFINITIONS: &str = "definitions";
pub const CF_REFERENCES: &str = "references";
pub const CF_PACKAGES: &str = "packages";
pub const CF_PACKAGE_REFERENCES: &str = "package_references";
pub const CF_DIRTY_REPOSITORIES: &str = "dirty_repositories";

/// Column families holding rows owned by a single dump
pub const DUMP_CF_NAMES: &[&str] = &[
    CF_META,
    CF_DOCUMENTS,
    CF_RESULT_CHUNKS,
    CF_DEFINITIONS,
    CF_REFERENCES,
    CF_PACKAGES,
    CF_PACKAGE_REFERENCES,
];

/// All column family names
pub const ALL_CF_NAMES: &[&str] = &[
    CF_UPLOADS,
    CF_UPLOAD_QUEUE,
    CF_DUMPS_BY_KEY,
    CF_META,
    CF_DOCUMENTS,
    CF_RESULT_CHUNKS,
    CF_DEFINITIONS,
    CF_REFERENCES,
    CF_PACKAGES,
    CF_PACKAGE_REFERENCES,
    CF_DIRTY_REPOSITORIES,
];

/// Bundle payloads are large JSON blobs and compress well
fn bundle_options() -> Options {
    let mut opts = Options::default();
    opts.set_compression_type(rocksdb::DBCompressionType::Zstd);
    opts
}

/// Build all column family descriptors
pub fn build_cf_descriptors() -> Vec<ColumnFamilyDescriptor> {
    ALL_CF_NAMES
        .iter()
        .map(|name| {
            let opts = match *name {
                CF_DOCUMENTS | CF_RESULT_CHUNKS | CF_DEFINITIONS | CF_REFERENCES => {
                    bundle_options()
                }
                _ => Options::default(),
            };
            ColumnFamilyDescriptor::new(*name, opts)
        })
        .collect()
}
