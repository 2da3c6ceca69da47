//! # codeintel-types
//!
//! Shared domain types for the precise code-intelligence worker.
//!
//! - [`BundleData`]: the normalized, in-memory form of one index bundle
//!   (documents, ranges, result chunks, moniker tables, packages)
//! - [`Upload`]: a queued unit of work and its state machine fields
//! - [`hash_key`]: routing from a result id to the result chunk that owns it
//! - [`Settings`]: layered configuration for the worker process

pub mod bundle;
pub mod config;
pub mod error;
pub mod hash;
pub mod upload;

pub use bundle::{
    BundleData, DocumentData, DocumentIdRangeId, FileStatus, Id, Location, Meta, MonikerData,
    MonikerLocations, Package, PackageInformationData, PackageReference, RangeData,
    ResultChunkData,
};
pub use config::{Settings, WorkerSettings};
pub use error::CodeIntelError;
pub use hash::hash_key;
pub use upload::{NewUpload, Upload, UploadState};
